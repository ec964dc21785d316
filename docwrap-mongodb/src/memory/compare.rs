//! BSON ordering, equality and field-path access.

use std::cmp::Ordering;

use bson::{Bson, Document};

/// Position of a value's type in the store's cross-type sort order.
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => 13,
        _ => 12,
    }
}

/// The value as a float, if it is numeric.
pub fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

/// The value as an integer, if it is an integer or an integral float.
pub fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        Bson::Double(f) if f.fract() == 0.0 => Some(*f as i64),
        _ => None,
    }
}

/// Check if the value is numeric.
pub fn is_number(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

/// Total order over BSON values.
pub fn compare(a: &Bson, b: &Bson) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            as_i64(a).cmp(&as_i64(b))
        }
        _ if is_number(a) && is_number(b) => {
            let (x, y) = (as_f64(a).unwrap_or(f64::NAN), as_f64(b).unwrap_or(f64::NAN));
            x.partial_cmp(&y).unwrap_or_else(|| x.is_nan().cmp(&y.is_nan()).reverse())
        }
        (Bson::String(x) | Bson::Symbol(x), Bson::String(y) | Bson::Symbol(y)) => x.cmp(y),
        (Bson::Document(x), Bson::Document(y)) => compare_documents(x, y),
        (Bson::Array(x), Bson::Array(y)) => compare_arrays(x, y),
        (Bson::Binary(x), Bson::Binary(y)) => x
            .bytes
            .len()
            .cmp(&y.bytes.len())
            .then_with(|| x.bytes.cmp(&y.bytes)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        (Bson::Timestamp(x), Bson::Timestamp(y)) => {
            (x.time, x.increment).cmp(&(y.time, y.increment))
        }
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn compare_documents(a: &Document, b: &Document) -> Ordering {
    for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
        let ord = compare(va, vb).then_with(|| ka.cmp(kb));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn compare_arrays(a: &[Bson], b: &[Bson]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = compare(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Equality as the store defines it: numbers compare by value across types.
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    compare(a, b) == Ordering::Equal
}

/// Check if the value counts as true in an expression.
pub fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(f) => *f != 0.0,
        _ => true,
    }
}

/// The `$type` alias of a value.
pub fn type_alias(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        Bson::Binary(_) => "binData",
        Bson::Undefined => "undefined",
        Bson::ObjectId(_) => "objectId",
        Bson::Boolean(_) => "bool",
        Bson::DateTime(_) => "date",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::DbPointer(_) => "dbPointer",
        Bson::JavaScriptCode(_) => "javascript",
        Bson::Symbol(_) => "symbol",
        Bson::JavaScriptCodeWithScope(_) => "javascriptWithScope",
        Bson::Int32(_) => "int",
        Bson::Timestamp(_) => "timestamp",
        Bson::Int64(_) => "long",
        Bson::Decimal128(_) => "decimal",
        Bson::MinKey => "minKey",
        Bson::MaxKey => "maxKey",
    }
}

/// Every value reachable at a dotted path, descending into arrays.
///
/// A numeric path segment indexes into an array; otherwise each element of
/// an array is searched. An empty result means the path is missing.
pub fn values_at<'a>(doc: &'a Document, path: &str) -> Vec<&'a Bson> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some(first) = doc.get(parts[0]) {
        collect(first, &parts[1..], &mut out);
    }
    out
}

fn collect<'a>(value: &'a Bson, rest: &[&str], out: &mut Vec<&'a Bson>) {
    let Some((head, tail)) = rest.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Bson::Document(doc) => {
            if let Some(next) = doc.get(*head) {
                collect(next, tail, out);
            }
        }
        Bson::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(next) = items.get(index) {
                    collect(next, tail, out);
                }
            } else {
                for item in items {
                    if let Bson::Document(doc) = item {
                        if let Some(next) = doc.get(*head) {
                            collect(next, tail, out);
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

/// The single value at a dotted path through nested documents.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set the value at a dotted path, creating intermediate documents.
///
/// Fails with the offending prefix when the path crosses a non-document.
pub fn set_path(doc: &mut Document, path: &str, value: Bson) -> Result<(), String> {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| Bson::Document(Document::new()));
            match entry {
                Bson::Document(inner) => set_path(inner, rest, value),
                Bson::Array(items) => {
                    let (index, tail) = match rest.split_once('.') {
                        Some((index, tail)) => (index, Some(tail)),
                        None => (rest, None),
                    };
                    let index: usize = index
                        .parse()
                        .map_err(|_| format!("cannot create field '{}' in array '{}'", index, head))?;
                    while items.len() <= index {
                        items.push(Bson::Null);
                    }
                    match tail {
                        None => {
                            items[index] = value;
                            Ok(())
                        }
                        Some(tail) => {
                            if !matches!(items[index], Bson::Document(_)) {
                                items[index] = Bson::Document(Document::new());
                            }
                            match &mut items[index] {
                                Bson::Document(inner) => set_path(inner, tail, value),
                                _ => Err(format!("cannot traverse '{}'", head)),
                            }
                        }
                    }
                }
                _ => Err(format!("cannot create field in non-document '{}'", head)),
            }
        }
    }
}

/// Remove the value at a dotted path, returning it.
pub fn remove_path(doc: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => match doc.get_mut(head)? {
            Bson::Document(inner) => remove_path(inner, rest),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_numbers_compare_across_types() {
        assert!(values_equal(&Bson::Int32(3), &Bson::Double(3.0)));
        assert!(values_equal(&Bson::Int64(3), &Bson::Int32(3)));
        assert_eq!(compare(&Bson::Int32(2), &Bson::Double(2.5)), Ordering::Less);
    }

    #[test]
    fn test_type_order() {
        assert_eq!(
            compare(&Bson::Null, &Bson::Int32(0)),
            Ordering::Less
        );
        assert_eq!(
            compare(&Bson::String("a".into()), &Bson::Int32(100)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_values_at_descends_arrays() {
        let doc = doc! { "items": [ { "sku": "a" }, { "sku": "b" }, { "other": 1 } ] };
        let found = values_at(&doc, "items.sku");
        assert_eq!(found.len(), 2);
        assert_eq!(values_at(&doc, "items.1.sku"), vec![&Bson::String("b".into())]);
        assert!(values_at(&doc, "missing").is_empty());
    }

    #[test]
    fn test_set_and_remove_path() {
        let mut doc = doc! { "a": 1 };
        set_path(&mut doc, "b.c.d", Bson::Int32(5)).unwrap();
        assert_eq!(get_path(&doc, "b.c.d"), Some(&Bson::Int32(5)));

        assert!(set_path(&mut doc, "a.x", Bson::Null).is_err());

        assert_eq!(remove_path(&mut doc, "b.c.d"), Some(Bson::Int32(5)));
        assert_eq!(get_path(&doc, "b.c"), Some(&Bson::Document(doc! {})));
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&Bson::Int32(0)));
        assert!(!is_truthy(&Bson::Null));
        assert!(is_truthy(&Bson::String(String::new())));
        assert!(is_truthy(&Bson::Array(vec![])));
    }
}
