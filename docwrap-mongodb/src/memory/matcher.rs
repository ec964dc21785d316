//! Query filter evaluation.

use bson::{Bson, Document};
use regex_lite::Regex;

use super::compare::{as_f64, as_i64, compare, is_number, type_alias, values_at, values_equal};
use crate::error::{MongoError, MongoResult};

/// Evaluates filters against documents of one collection.
#[derive(Debug, Clone, Copy)]
pub struct Matcher<'a> {
    text_fields: Option<&'a [String]>,
}

impl<'a> Matcher<'a> {
    /// A matcher for a collection with the given text-indexed fields.
    ///
    /// `None` means the collection has no text index, so `$text` fails.
    pub fn new(text_fields: Option<&'a [String]>) -> Self {
        Self { text_fields }
    }

    /// Check if `doc` satisfies `filter`.
    pub fn matches(&self, doc: &Document, filter: &Document) -> MongoResult<bool> {
        for (key, condition) in filter {
            let ok = match key.as_str() {
                "$and" => {
                    let mut all = true;
                    for sub in sub_filters(key, condition)? {
                        if !self.matches(doc, sub)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                "$or" => {
                    let mut any = false;
                    for sub in sub_filters(key, condition)? {
                        if self.matches(doc, sub)? {
                            any = true;
                            break;
                        }
                    }
                    any
                }
                "$nor" => {
                    let mut none = true;
                    for sub in sub_filters(key, condition)? {
                        if self.matches(doc, sub)? {
                            none = false;
                            break;
                        }
                    }
                    none
                }
                "$text" => self.text(doc, condition)?,
                "$where" => {
                    return Err(MongoError::operation(
                        "$where is not supported by the in-memory store",
                    ));
                }
                op if op.starts_with('$') => {
                    return Err(MongoError::operation(format!(
                        "unknown top level operator: {}",
                        op
                    )));
                }
                field => self.field(doc, field, condition)?,
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn text(&self, doc: &Document, condition: &Bson) -> MongoResult<bool> {
        let fields = self
            .text_fields
            .ok_or_else(|| MongoError::operation("text index required for $text query"))?;
        let search = match condition {
            Bson::Document(spec) => spec.get_str("$search").ok(),
            _ => None,
        }
        .ok_or_else(|| MongoError::operation("$text requires a $search string"))?;

        let terms: Vec<String> = search.split_whitespace().map(str::to_lowercase).collect();
        if terms.is_empty() {
            return Ok(false);
        }

        for field in fields {
            for value in values_at(doc, field) {
                let mut strings = Vec::new();
                flatten_strings(value, &mut strings);
                for text in strings {
                    let words: Vec<String> = text
                        .split(|c: char| !c.is_alphanumeric())
                        .filter(|w| !w.is_empty())
                        .map(str::to_lowercase)
                        .collect();
                    if terms.iter().any(|term| words.contains(term)) {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    fn field(&self, doc: &Document, path: &str, condition: &Bson) -> MongoResult<bool> {
        let values = values_at(doc, path);
        match condition {
            Bson::Document(ops) if is_operator_document(ops) => {
                self.operators(&values, ops)
            }
            Bson::RegularExpression(regex) => {
                let re = compile(&regex.pattern, &regex.options)?;
                Ok(any_element(&values, |v| regex_matches(&re, v)))
            }
            expected => Ok(equals_any(&values, expected)),
        }
    }

    fn operators(&self, values: &[&Bson], ops: &Document) -> MongoResult<bool> {
        for (op, operand) in ops {
            let ok = match op.as_str() {
                "$eq" => equals_any(values, operand),
                "$ne" => !equals_any(values, operand),
                "$gt" => any_element(values, |v| comparable(v, operand) && compare(v, operand).is_gt()),
                "$gte" => any_element(values, |v| comparable(v, operand) && compare(v, operand).is_ge()),
                "$lt" => any_element(values, |v| comparable(v, operand) && compare(v, operand).is_lt()),
                "$lte" => any_element(values, |v| comparable(v, operand) && compare(v, operand).is_le()),
                "$in" => in_list(values, op, operand)?,
                "$nin" => !in_list(values, op, operand)?,
                "$exists" => !values.is_empty() == bson_truthy(operand),
                "$type" => type_matches(values, operand)?,
                "$regex" => {
                    let (pattern, inline) = match operand {
                        Bson::String(p) => (p.clone(), String::new()),
                        Bson::RegularExpression(r) => (r.pattern.clone(), r.options.clone()),
                        _ => return Err(MongoError::operation("$regex has to be a string")),
                    };
                    let options = ops.get_str("$options").map(str::to_string).unwrap_or(inline);
                    let re = compile(&pattern, &options)?;
                    any_element(values, |v| regex_matches(&re, v))
                }
                "$options" => true,
                "$not" => match operand {
                    Bson::Document(inner) => !self.operators(values, inner)?,
                    Bson::RegularExpression(r) => {
                        let re = compile(&r.pattern, &r.options)?;
                        !any_element(values, |v| regex_matches(&re, v))
                    }
                    _ => return Err(MongoError::operation("$not needs a regex or a document")),
                },
                "$mod" => {
                    let (divisor, remainder) = mod_operands(operand)?;
                    any_element(values, |v| {
                        is_number(v)
                            && as_f64(v).map(|f| f.trunc() as i64 % divisor == remainder) == Some(true)
                    })
                }
                "$all" => {
                    let items = operand
                        .as_array()
                        .ok_or_else(|| MongoError::operation("$all needs an array"))?;
                    !items.is_empty() && items.iter().all(|item| equals_any(values, item))
                }
                "$elemMatch" => {
                    let cond = operand
                        .as_document()
                        .ok_or_else(|| MongoError::operation("$elemMatch needs an object"))?;
                    self.elem_match(values, cond)?
                }
                "$size" => {
                    let size = as_i64(operand)
                        .ok_or_else(|| MongoError::operation("$size needs a number"))?;
                    values.iter().any(|v| match v {
                        Bson::Array(items) => items.len() as i64 == size,
                        _ => false,
                    })
                }
                "$bitsAllSet" => bits(values, operand, |v, m| v & m == m)?,
                "$bitsAllClear" => bits(values, operand, |v, m| v & m == 0)?,
                "$bitsAnySet" => bits(values, operand, |v, m| v & m != 0)?,
                "$bitsAnyClear" => bits(values, operand, |v, m| v & m != m)?,
                other => {
                    return Err(MongoError::operation(format!("unknown operator: {}", other)));
                }
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn elem_match(&self, values: &[&Bson], cond: &Document) -> MongoResult<bool> {
        let field_style = cond
            .keys()
            .any(|k| !k.starts_with('$') || matches!(k.as_str(), "$and" | "$or" | "$nor"));
        for value in values {
            let Bson::Array(items) = value else { continue };
            for item in items {
                let ok = if field_style {
                    match item {
                        Bson::Document(inner) => self.matches(inner, cond)?,
                        _ => false,
                    }
                } else {
                    self.operators(&[item], cond)?
                };
                if ok {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

fn sub_filters<'b>(operator: &str, condition: &'b Bson) -> MongoResult<Vec<&'b Document>> {
    let items = condition
        .as_array()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| MongoError::operation(format!("{} must be a nonempty array", operator)))?;
    items
        .iter()
        .map(|item| {
            item.as_document().ok_or_else(|| {
                MongoError::operation(format!("{} entries need to be full objects", operator))
            })
        })
        .collect()
}

/// Check if every key of the document is an operator.
pub fn is_operator_document(doc: &Document) -> bool {
    !doc.is_empty() && doc.keys().all(|k| k.starts_with('$'))
}

/// Apply `pred` to each value and, for arrays, to each element.
fn any_element(values: &[&Bson], pred: impl Fn(&Bson) -> bool) -> bool {
    values.iter().copied().any(|value| match value {
        Bson::Array(items) => pred(value) || items.iter().any(&pred),
        other => pred(other),
    })
}

fn equals_any(values: &[&Bson], expected: &Bson) -> bool {
    if values.is_empty() {
        return matches!(expected, Bson::Null);
    }
    any_element(values, |v| values_equal(v, expected))
}

/// Range operators only compare values of the same type class.
fn comparable(a: &Bson, b: &Bson) -> bool {
    (is_number(a) && is_number(b)) || std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn in_list(values: &[&Bson], op: &str, operand: &Bson) -> MongoResult<bool> {
    let items = operand
        .as_array()
        .ok_or_else(|| MongoError::operation(format!("{} needs an array", op)))?;
    for item in items {
        let hit = match item {
            Bson::RegularExpression(r) => {
                let re = compile(&r.pattern, &r.options)?;
                any_element(values, |v| regex_matches(&re, v))
            }
            other => equals_any(values, other),
        };
        if hit {
            return Ok(true);
        }
    }
    Ok(false)
}

fn bson_truthy(value: &Bson) -> bool {
    super::compare::is_truthy(value)
}

fn type_matches(values: &[&Bson], operand: &Bson) -> MongoResult<bool> {
    let wanted: Vec<&Bson> = match operand {
        Bson::Array(items) => items.iter().collect(),
        single => vec![single],
    };
    let mut aliases = Vec::with_capacity(wanted.len());
    for w in wanted {
        let alias = match w {
            Bson::String(s) => s.clone(),
            number if is_number(number) => numeric_type_alias(as_i64(number).unwrap_or(-1))?,
            _ => return Err(MongoError::operation("$type needs a string or number")),
        };
        aliases.push(alias);
    }

    let check = |v: &Bson| {
        aliases.iter().any(|alias| {
            alias == type_alias(v) || (alias == "number" && is_number(v))
        })
    };
    Ok(any_element(values, check))
}

fn numeric_type_alias(code: i64) -> MongoResult<String> {
    let alias = match code {
        1 => "double",
        2 => "string",
        3 => "object",
        4 => "array",
        5 => "binData",
        7 => "objectId",
        8 => "bool",
        9 => "date",
        10 => "null",
        11 => "regex",
        13 => "javascript",
        15 => "javascriptWithScope",
        16 => "int",
        17 => "timestamp",
        18 => "long",
        19 => "decimal",
        _ => return Err(MongoError::operation(format!("invalid numerical type code: {}", code))),
    };
    Ok(alias.to_string())
}

fn mod_operands(operand: &Bson) -> MongoResult<(i64, i64)> {
    let items = operand
        .as_array()
        .filter(|items| items.len() == 2)
        .ok_or_else(|| MongoError::operation("malformed mod, needs to be an array of 2"))?;
    let divisor = as_f64(&items[0])
        .map(|f| f.trunc() as i64)
        .ok_or_else(|| MongoError::operation("malformed mod, divisor not a number"))?;
    let remainder = as_f64(&items[1])
        .map(|f| f.trunc() as i64)
        .ok_or_else(|| MongoError::operation("malformed mod, remainder not a number"))?;
    if divisor == 0 {
        return Err(MongoError::operation("divisor cannot be 0"));
    }
    Ok((divisor, remainder))
}

fn bits(values: &[&Bson], operand: &Bson, test: impl Fn(i64, i64) -> bool) -> MongoResult<bool> {
    let mask = match operand {
        Bson::Array(positions) => {
            let mut mask = 0i64;
            for position in positions {
                let bit = as_i64(position)
                    .filter(|b| (0..64).contains(b))
                    .ok_or_else(|| MongoError::operation("bit positions must be integers in 0..64"))?;
                mask |= 1 << bit;
            }
            mask
        }
        other => as_i64(other).ok_or_else(|| MongoError::operation("bitmask must be an integer"))?,
    };
    Ok(values.iter().any(|v| as_i64(v).is_some_and(|n| test(n, mask))))
}

/// Compile a pattern with store-style option letters.
pub fn compile(pattern: &str, options: &str) -> MongoResult<Regex> {
    let flags: String = options.chars().filter(|c| matches!(c, 'i' | 'm' | 's' | 'x')).collect();
    let source = if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{}){}", flags, pattern)
    };
    Regex::new(&source).map_err(|e| MongoError::operation(format!("invalid regex: {}", e)))
}

fn regex_matches(re: &Regex, value: &Bson) -> bool {
    match value {
        Bson::String(s) | Bson::Symbol(s) => re.is_match(s),
        _ => false,
    }
}

fn flatten_strings<'b>(value: &'b Bson, out: &mut Vec<&'b str>) {
    match value {
        Bson::String(s) => out.push(s),
        Bson::Array(items) => items.iter().for_each(|item| flatten_strings(item, out)),
        Bson::Document(doc) => doc.values().for_each(|item| flatten_strings(item, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn check(doc: &Document, filter: Document) -> bool {
        Matcher::new(None).matches(doc, &filter).unwrap()
    }

    #[test]
    fn test_equality_and_arrays() {
        let doc = doc! { "name": "red fish", "tags": ["a", "b"], "n": 3 };
        assert!(check(&doc, doc! { "name": "red fish" }));
        assert!(check(&doc, doc! { "tags": { "$eq": "b" } }));
        assert!(check(&doc, doc! { "n": { "$eq": 3.0 } }));
        assert!(!check(&doc, doc! { "tags": { "$ne": "a" } }));
        assert!(check(&doc, doc! { "missing": null }));
    }

    #[test]
    fn test_range_does_not_cross_types() {
        let doc = doc! { "n": 5, "s": "5" };
        assert!(check(&doc, doc! { "n": { "$gt": 4, "$lte": 5 } }));
        assert!(!check(&doc, doc! { "s": { "$gt": 4 } }));
    }

    #[test]
    fn test_logical_operators() {
        let doc = doc! { "a": 1, "b": 2 };
        assert!(check(&doc, doc! { "$or": [ { "a": 5 }, { "b": 2 } ] }));
        assert!(!check(&doc, doc! { "$and": [ { "a": 1 }, { "b": 3 } ] }));
        assert!(check(&doc, doc! { "$nor": [ { "a": 2 } ] }));
        assert!(!check(&doc, doc! { "$nor": [ { "a": 1 } ] }));
    }

    #[test]
    fn test_element_operators() {
        let doc = doc! { "a": 1, "s": "x", "scores": [ { "v": 3 }, { "v": 8 } ] };
        assert!(check(&doc, doc! { "a": { "$exists": true } }));
        assert!(check(&doc, doc! { "b": { "$exists": false } }));
        assert!(check(&doc, doc! { "a": { "$type": "int" } }));
        assert!(check(&doc, doc! { "a": { "$type": "number" } }));
        assert!(check(&doc, doc! { "s": { "$type": 2 } }));
        assert!(check(
            &doc,
            doc! { "scores": { "$elemMatch": { "$and": [ { "v": { "$gt": 5 } }, { "v": { "$lt": 9 } } ] } } }
        ));
        assert!(!check(
            &doc,
            doc! { "scores": { "$elemMatch": { "v": { "$gt": 8 } } } }
        ));
        assert!(check(&doc, doc! { "scores": { "$size": 2 } }));
    }

    #[test]
    fn test_in_all_nin() {
        let doc = doc! { "tags": ["red", "blue"] };
        assert!(check(&doc, doc! { "tags": { "$in": ["green", "red"] } }));
        assert!(check(&doc, doc! { "tags": { "$nin": ["green"] } }));
        assert!(check(&doc, doc! { "tags": { "$all": ["blue", "red"] } }));
        assert!(!check(&doc, doc! { "tags": { "$all": ["blue", "green"] } }));
    }

    #[test]
    fn test_regex_mod_and_bits() {
        let doc = doc! { "name": "Luca", "n": 10, "flags": 0b1010 };
        assert!(check(&doc, doc! { "name": { "$regex": "^lu", "$options": "i" } }));
        assert!(!check(&doc, doc! { "name": { "$regex": "^lu" } }));
        assert!(check(&doc, doc! { "n": { "$mod": [4, 2] } }));
        assert!(check(&doc, doc! { "flags": { "$bitsAllSet": 0b1000 } }));
        assert!(check(&doc, doc! { "flags": { "$bitsAnyClear": [0, 1] } }));
        assert!(check(&doc, doc! { "flags": { "$bitsAllClear": 0b0101 } }));
    }

    #[test]
    fn test_not() {
        let doc = doc! { "n": 3 };
        assert!(check(&doc, doc! { "n": { "$not": { "$gt": 5 } } }));
        assert!(!check(&doc, doc! { "n": { "$not": { "$lt": 5 } } }));
    }

    #[test]
    fn test_text_requires_index() {
        let doc = doc! { "name": "Luca Casonato" };
        let err = Matcher::new(None)
            .matches(&doc, &doc! { "$text": { "$search": "luca" } })
            .unwrap_err();
        assert!(matches!(err, MongoError::Operation(_)));

        let fields = vec!["name".to_string()];
        let matcher = Matcher::new(Some(&fields));
        assert!(matcher.matches(&doc, &doc! { "$text": { "$search": "luca" } }).unwrap());
        assert!(!matcher.matches(&doc, &doc! { "$text": { "$search": "jaap" } }).unwrap());
    }

    #[test]
    fn test_where_is_rejected() {
        let err = Matcher::new(None)
            .matches(&doc! {}, &doc! { "$where": "true" })
            .unwrap_err();
        assert!(matches!(err, MongoError::Operation(_)));
    }
}
