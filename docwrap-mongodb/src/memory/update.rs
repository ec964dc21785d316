//! Update operator evaluation.

use std::cmp::Ordering;

use bson::{Bson, Document, Timestamp};

use super::compare::{as_i64, compare, get_path, remove_path, set_path, values_equal};
use crate::error::{MongoError, MongoResult};

/// Check if the document is made of update operators.
///
/// Anything else is a replacement document.
pub fn is_update_document(update: &Document) -> bool {
    update.keys().next().is_some_and(|k| k.starts_with('$'))
}

/// Reject updates where two operators touch the same path, or where one
/// path is a prefix of another.
fn check_conflicts(update: &Document) -> MongoResult<()> {
    let mut targets: Vec<&str> = Vec::new();
    for (op, spec) in update {
        let Some(fields) = spec.as_document() else {
            continue;
        };
        for (path, operand) in fields {
            targets.push(path);
            if op == "$rename" {
                if let Some(to) = operand.as_str() {
                    targets.push(to);
                }
            }
        }
    }

    for (i, a) in targets.iter().enumerate() {
        for b in &targets[i + 1..] {
            if paths_overlap(a, b) {
                return Err(MongoError::operation(format!(
                    "Updating the path '{}' would create a conflict at '{}'",
                    b, a
                )));
            }
        }
    }
    Ok(())
}

fn paths_overlap(a: &str, b: &str) -> bool {
    let is_prefix = |short: &str, long: &str| {
        long.strip_prefix(short)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
    };
    is_prefix(a, b) || is_prefix(b, a)
}

/// Apply an update document in place.
///
/// `is_insert` is set when the update builds an upserted document, which is
/// the only time `$setOnInsert` applies.
pub fn apply(doc: &mut Document, update: &Document, is_insert: bool) -> MongoResult<()> {
    if update.is_empty() {
        return Err(MongoError::operation("update document must not be empty"));
    }

    check_conflicts(update)?;
    let original_id = doc.get("_id").cloned();

    for (op, spec) in update {
        let fields = spec.as_document().ok_or_else(|| {
            MongoError::operation(format!("modifiers for {} must be an object", op))
        })?;

        for (path, operand) in fields {
            match op.as_str() {
                "$set" => write(doc, path, operand.clone())?,
                "$setOnInsert" => {
                    if is_insert {
                        write(doc, path, operand.clone())?;
                    }
                }
                "$unset" => {
                    remove_path(doc, path);
                }
                "$inc" => {
                    let next = match get_path(doc, path) {
                        None => number(op, operand)?.clone(),
                        Some(current) => arith(op, current, operand, Arith::Add)?,
                    };
                    write(doc, path, next)?;
                }
                "$mul" => {
                    let next = match get_path(doc, path) {
                        None => arith(op, &zero_like(number(op, operand)?), operand, Arith::Mul)?,
                        Some(current) => arith(op, current, operand, Arith::Mul)?,
                    };
                    write(doc, path, next)?;
                }
                "$min" | "$max" => {
                    let wanted = if op == "$min" { Ordering::Less } else { Ordering::Greater };
                    let replace = match get_path(doc, path) {
                        None => true,
                        Some(current) => compare(operand, current) == wanted,
                    };
                    if replace {
                        write(doc, path, operand.clone())?;
                    }
                }
                "$rename" => {
                    let target = operand.as_str().ok_or_else(|| {
                        MongoError::operation("the 'to' field for $rename must be a string")
                    })?;
                    if let Some(value) = remove_path(doc, path) {
                        write(doc, target, value)?;
                    }
                }
                "$currentDate" => {
                    let kind = match operand {
                        Bson::Boolean(true) => "date",
                        Bson::Document(spec) => spec.get_str("$type").unwrap_or("invalid"),
                        _ => "invalid",
                    };
                    let now = bson::DateTime::now();
                    let value = match kind {
                        "date" => Bson::DateTime(now),
                        "timestamp" => Bson::Timestamp(Timestamp {
                            time: (now.timestamp_millis() / 1000) as u32,
                            increment: 1,
                        }),
                        _ => {
                            return Err(MongoError::operation(
                                "$currentDate expects true or {$type: 'date' | 'timestamp'}",
                            ));
                        }
                    };
                    write(doc, path, value)?;
                }
                "$push" | "$addToSet" => {
                    let items = match operand {
                        Bson::Document(modifiers) if modifiers.contains_key("$each") => modifiers
                            .get_array("$each")
                            .map_err(|_| MongoError::operation("$each requires an array"))?
                            .clone(),
                        single => vec![single.clone()],
                    };
                    let mut array = existing_array(doc, op, path)?;
                    for item in items {
                        if op == "$addToSet" && array.iter().any(|v| values_equal(v, &item)) {
                            continue;
                        }
                        array.push(item);
                    }
                    write(doc, path, Bson::Array(array))?;
                }
                "$pop" => {
                    if get_path(doc, path).is_none() {
                        continue;
                    }
                    let mut array = existing_array(doc, op, path)?;
                    match as_i64(operand) {
                        Some(-1) => {
                            if !array.is_empty() {
                                array.remove(0);
                            }
                        }
                        Some(1) => {
                            array.pop();
                        }
                        _ => return Err(MongoError::operation("$pop expects 1 or -1")),
                    }
                    write(doc, path, Bson::Array(array))?;
                }
                "$pullAll" => {
                    let remove = operand
                        .as_array()
                        .ok_or_else(|| MongoError::operation("$pullAll requires an array argument"))?;
                    if get_path(doc, path).is_none() {
                        continue;
                    }
                    let mut array = existing_array(doc, op, path)?;
                    array.retain(|v| !remove.iter().any(|r| values_equal(v, r)));
                    write(doc, path, Bson::Array(array))?;
                }
                "$bit" => {
                    let ops = operand
                        .as_document()
                        .ok_or_else(|| MongoError::operation("$bit needs an object"))?;
                    let mut current = match get_path(doc, path) {
                        None => Bson::Int32(0),
                        Some(v @ (Bson::Int32(_) | Bson::Int64(_))) => v.clone(),
                        Some(_) => {
                            return Err(MongoError::operation(
                                "cannot apply $bit to a value of non-integral type",
                            ));
                        }
                    };
                    for (bit_op, mask) in ops {
                        current = bitwise(&current, bit_op, mask)?;
                    }
                    write(doc, path, current)?;
                }
                other => {
                    return Err(MongoError::operation(format!(
                        "unknown modifier: {}",
                        other
                    )));
                }
            }
        }
    }

    if original_id.is_some() && doc.get("_id") != original_id.as_ref() {
        return Err(MongoError::operation(
            "performing an update on the path '_id' would modify the immutable field '_id'",
        ));
    }
    Ok(())
}

fn write(doc: &mut Document, path: &str, value: Bson) -> MongoResult<()> {
    set_path(doc, path, value).map_err(MongoError::operation)
}

fn number<'a>(op: &str, operand: &'a Bson) -> MongoResult<&'a Bson> {
    match operand {
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => Ok(operand),
        _ => Err(MongoError::operation(format!(
            "cannot {} with non-numeric argument",
            op
        ))),
    }
}

fn zero_like(value: &Bson) -> Bson {
    match value {
        Bson::Int32(_) => Bson::Int32(0),
        Bson::Int64(_) => Bson::Int64(0),
        _ => Bson::Double(0.0),
    }
}

fn existing_array(doc: &Document, op: &str, path: &str) -> MongoResult<Vec<Bson>> {
    match get_path(doc, path) {
        None => Ok(Vec::new()),
        Some(Bson::Array(items)) => Ok(items.clone()),
        Some(_) => Err(MongoError::operation(format!(
            "the field '{}' must be an array for {}",
            path, op
        ))),
    }
}

#[derive(Clone, Copy)]
enum Arith {
    Add,
    Mul,
}

/// Numeric arithmetic that keeps the narrowest type able to hold the result.
fn arith(op: &str, current: &Bson, operand: &Bson, kind: Arith) -> MongoResult<Bson> {
    let non_numeric = || {
        MongoError::operation(format!(
            "cannot apply {} to a value of non-numeric type",
            op
        ))
    };
    number(op, operand)?;

    let int = |a: i64, b: i64| match kind {
        Arith::Add => a.checked_add(b),
        Arith::Mul => a.checked_mul(b),
    };
    let float = |a: f64, b: f64| match kind {
        Arith::Add => a + b,
        Arith::Mul => a * b,
    };

    let result = match (current, operand) {
        (Bson::Int32(a), Bson::Int32(b)) => {
            let wide = int(i64::from(*a), i64::from(*b)).ok_or_else(overflow)?;
            i32::try_from(wide).map(Bson::Int32).unwrap_or(Bson::Int64(wide))
        }
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            let (a, b) = (as_i64(current).ok_or_else(non_numeric)?, as_i64(operand).ok_or_else(non_numeric)?);
            Bson::Int64(int(a, b).ok_or_else(overflow)?)
        }
        (Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_), _) => {
            let a = super::compare::as_f64(current).ok_or_else(non_numeric)?;
            let b = super::compare::as_f64(operand).ok_or_else(non_numeric)?;
            Bson::Double(float(a, b))
        }
        _ => return Err(non_numeric()),
    };
    Ok(result)
}

fn overflow() -> MongoError {
    MongoError::operation("integer overflow")
}

fn bitwise(current: &Bson, op: &str, mask: &Bson) -> MongoResult<Bson> {
    let value = as_i64(current).unwrap_or(0);
    let m = match mask {
        Bson::Int32(_) | Bson::Int64(_) => as_i64(mask).unwrap_or(0),
        _ => return Err(MongoError::operation("$bit operands must be integers")),
    };
    let result = match op {
        "and" => value & m,
        "or" => value | m,
        "xor" => value ^ m,
        other => {
            return Err(MongoError::operation(format!(
                "$bit only supports and, or and xor, not {}",
                other
            )));
        }
    };
    let wide = matches!(current, Bson::Int64(_)) || matches!(mask, Bson::Int64(_));
    Ok(if wide {
        Bson::Int64(result)
    } else {
        Bson::Int32(result as i32)
    })
}
