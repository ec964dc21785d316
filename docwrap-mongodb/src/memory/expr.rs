//! Aggregation expression evaluation.
//!
//! A missing field evaluates to [`Bson::Undefined`]; stages drop fields whose
//! computed value is missing instead of writing them.

use std::cmp::Ordering;
use std::collections::HashMap;

use bson::oid::ObjectId;
use bson::{Bson, Document};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};

use super::compare::{as_f64, as_i64, compare, is_number, is_truthy, type_alias, values_equal};
use crate::error::{MongoError, MongoResult};

/// Evaluate `expr` against `root`.
pub fn evaluate(expr: &Bson, root: &Document) -> MongoResult<Bson> {
    Scope::new(root).eval(expr)
}

fn err(message: impl Into<String>) -> MongoError {
    MongoError::operation(message)
}

fn is_missing(value: &Bson) -> bool {
    matches!(value, Bson::Null | Bson::Undefined)
}

struct Scope<'a> {
    root: &'a Document,
    vars: HashMap<String, Bson>,
}

impl<'a> Scope<'a> {
    fn new(root: &'a Document) -> Self {
        Self {
            root,
            vars: HashMap::new(),
        }
    }

    fn with_vars(&self, bindings: impl IntoIterator<Item = (String, Bson)>) -> Scope<'a> {
        let mut vars = self.vars.clone();
        vars.extend(bindings);
        Scope {
            root: self.root,
            vars,
        }
    }

    fn eval(&self, expr: &Bson) -> MongoResult<Bson> {
        match expr {
            Bson::String(s) if s.starts_with("$$") => self.variable(&s[2..]),
            Bson::String(s) if s.starts_with('$') => {
                Ok(resolve(&Bson::Document(self.root.clone()), &s[1..]))
            }
            Bson::Array(items) => Ok(Bson::Array(
                items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<MongoResult<Vec<_>>>()?,
            )),
            Bson::Document(doc) => match single_operator(doc) {
                Some((name, arg)) => self.operator(name, arg),
                None => {
                    let mut out = Document::new();
                    for (key, value) in doc {
                        let value = self.eval(value)?;
                        if !matches!(value, Bson::Undefined) {
                            out.insert(key.clone(), value);
                        }
                    }
                    Ok(Bson::Document(out))
                }
            },
            other => Ok(other.clone()),
        }
    }

    fn variable(&self, reference: &str) -> MongoResult<Bson> {
        let (name, path) = match reference.split_once('.') {
            Some((name, path)) => (name, Some(path)),
            None => (reference, None),
        };
        let base = match name {
            "ROOT" | "CURRENT" => Bson::Document(self.root.clone()),
            _ => self
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| err(format!("use of undefined variable: {}", name)))?,
        };
        Ok(match path {
            Some(path) => resolve(&base, path),
            None => base,
        })
    }

    fn eval_operands(&self, arg: &Bson) -> MongoResult<Vec<Bson>> {
        match arg {
            Bson::Array(items) => items.iter().map(|item| self.eval(item)).collect(),
            single => Ok(vec![self.eval(single)?]),
        }
    }

    fn eval_exact<const N: usize>(&self, name: &str, arg: &Bson) -> MongoResult<[Bson; N]> {
        let values = self.eval_operands(arg)?;
        let count = values.len();
        values.try_into().map_err(|_| {
            err(format!(
                "expression {} takes exactly {} arguments, {} were passed in",
                name, N, count
            ))
        })
    }

    fn eval_single(&self, name: &str, arg: &Bson) -> MongoResult<Bson> {
        let [value] = self.eval_exact::<1>(name, arg)?;
        Ok(value)
    }

    fn eval_range(&self, name: &str, arg: &Bson, min: usize, max: usize) -> MongoResult<Vec<Bson>> {
        let values = self.eval_operands(arg)?;
        if values.len() < min || values.len() > max {
            return Err(err(format!(
                "expression {} takes between {} and {} arguments, {} were passed in",
                name,
                min,
                max,
                values.len()
            )));
        }
        Ok(values)
    }

    fn named<'b>(&self, name: &str, arg: &'b Bson) -> MongoResult<&'b Document> {
        arg.as_document()
            .ok_or_else(|| err(format!("{} only supports an object as its argument", name)))
    }

    fn eval_named(&self, spec: &Document, key: &str) -> MongoResult<Option<Bson>> {
        spec.get(key).map(|expr| self.eval(expr)).transpose()
    }

    /// Inputs of an accumulator-style operator: a single array operand
    /// contributes its elements, several operands contribute themselves.
    fn accumulator_inputs(&self, arg: &Bson) -> MongoResult<Vec<Bson>> {
        match arg {
            Bson::Array(items) if items.len() != 1 => self.eval_operands(arg),
            _ => {
                let value = self.eval_single("accumulator", arg)?;
                Ok(match value {
                    Bson::Array(items) => items,
                    other => vec![other],
                })
            }
        }
    }

    fn operator(&self, name: &str, arg: &Bson) -> MongoResult<Bson> {
        match name {
            "$literal" => Ok(arg.clone()),
            "$let" => {
                let spec = self.named(name, arg)?;
                let vars = spec
                    .get_document("vars")
                    .map_err(|_| err("$let requires a 'vars' object"))?;
                let body = spec.get("in").ok_or_else(|| err("$let requires 'in'"))?;
                let mut bindings = Vec::with_capacity(vars.len());
                for (var, expr) in vars {
                    bindings.push((var.clone(), self.eval(expr)?));
                }
                self.with_vars(bindings).eval(body)
            }
            "$range" => {
                let values = self.eval_range(name, arg, 2, 3)?;
                let start = int_arg(name, &values[0])?;
                let end = int_arg(name, &values[1])?;
                let step = values.get(2).map(|s| int_arg(name, s)).transpose()?.unwrap_or(1);
                if step == 0 {
                    return Err(err("$range requires a non-zero step value"));
                }
                let mut out = Vec::new();
                let mut i = start;
                while (step > 0 && i < end) || (step < 0 && i > end) {
                    out.push(int_bson(i));
                    i += step;
                }
                Ok(Bson::Array(out))
            }
            "$meta" => Err(err("$meta is not supported by the in-memory store")),

            // Arithmetic
            "$abs" => unary_number(name, self.eval_single(name, arg)?, |n| match n {
                Bson::Int32(i) => i.checked_abs().map(Bson::Int32).unwrap_or(Bson::Int64(i64::from(i).abs())),
                Bson::Int64(i) => Bson::Int64(i.abs()),
                other => Bson::Double(as_f64(&other).unwrap_or(f64::NAN).abs()),
            }),
            "$add" => add(self.eval_operands(arg)?),
            "$subtract" => {
                let [a, b] = self.eval_exact::<2>(name, arg)?;
                subtract(a, b)
            }
            "$multiply" => {
                let values = self.eval_operands(arg)?;
                fold_numbers(name, values, Bson::Int32(1), |a, b| a.checked_mul(b), |a, b| a * b)
            }
            "$divide" => {
                let [a, b] = self.eval_exact::<2>(name, arg)?;
                if is_missing(&a) || is_missing(&b) {
                    return Ok(Bson::Null);
                }
                let (x, y) = (number_arg(name, &a)?, number_arg(name, &b)?);
                if y == 0.0 {
                    return Err(err("can't $divide by zero"));
                }
                Ok(Bson::Double(x / y))
            }
            "$mod" => {
                let [a, b] = self.eval_exact::<2>(name, arg)?;
                if is_missing(&a) || is_missing(&b) {
                    return Ok(Bson::Null);
                }
                match (int_value(&a), int_value(&b)) {
                    (Some(_), Some(0)) => Err(err("can't $mod by zero")),
                    (Some(x), Some(y)) => Ok(narrow(x % y, &a, &b)),
                    _ => Ok(Bson::Double(number_arg(name, &a)? % number_arg(name, &b)?)),
                }
            }
            "$ceil" => unary_float(name, self.eval_single(name, arg)?, f64::ceil),
            "$floor" => unary_float(name, self.eval_single(name, arg)?, f64::floor),
            "$trunc" => unary_float(name, self.eval_single(name, arg)?, f64::trunc),
            "$exp" => to_double(name, self.eval_single(name, arg)?, f64::exp),
            "$ln" => to_double(name, self.eval_single(name, arg)?, f64::ln),
            "$log10" => to_double(name, self.eval_single(name, arg)?, f64::log10),
            "$sqrt" => {
                let value = self.eval_single(name, arg)?;
                if as_f64(&value).is_some_and(|f| f < 0.0) {
                    return Err(err("$sqrt's argument must be greater than or equal to 0"));
                }
                to_double(name, value, f64::sqrt)
            }
            "$log" => {
                let [n, base] = self.eval_exact::<2>(name, arg)?;
                if is_missing(&n) || is_missing(&base) {
                    return Ok(Bson::Null);
                }
                Ok(Bson::Double(number_arg(name, &n)?.log(number_arg(name, &base)?)))
            }
            "$pow" => {
                let [base, exp] = self.eval_exact::<2>(name, arg)?;
                if is_missing(&base) || is_missing(&exp) {
                    return Ok(Bson::Null);
                }
                if let (Some(b), Some(e)) = (int_value(&base), int_value(&exp)) {
                    if let Some(result) = u32::try_from(e).ok().and_then(|e| b.checked_pow(e)) {
                        return Ok(narrow(result, &base, &exp));
                    }
                }
                Ok(Bson::Double(number_arg(name, &base)?.powf(number_arg(name, &exp)?)))
            }
            "$sum" => {
                let numbers: Vec<Bson> = self
                    .accumulator_inputs(arg)?
                    .into_iter()
                    .filter(is_number)
                    .collect();
                fold_numbers(name, numbers, Bson::Int32(0), |a, b| a.checked_add(b), |a, b| a + b)
            }
            "$avg" => {
                let numbers = numbers_of(self.accumulator_inputs(arg)?);
                if numbers.is_empty() {
                    return Ok(Bson::Null);
                }
                Ok(Bson::Double(numbers.iter().sum::<f64>() / numbers.len() as f64))
            }
            "$stdDevPop" | "$stdDevSamp" => {
                let numbers = numbers_of(self.accumulator_inputs(arg)?);
                let sample = name == "$stdDevSamp";
                let n = numbers.len();
                if n == 0 || (sample && n < 2) {
                    return Ok(Bson::Null);
                }
                let mean = numbers.iter().sum::<f64>() / n as f64;
                let squares: f64 = numbers.iter().map(|x| (x - mean).powi(2)).sum();
                let divisor = (if sample { n - 1 } else { n }) as f64;
                Ok(Bson::Double((squares / divisor).sqrt()))
            }
            "$max" | "$min" => {
                let wanted = if name == "$max" { Ordering::Greater } else { Ordering::Less };
                let mut best: Option<Bson> = None;
                for value in self.accumulator_inputs(arg)? {
                    if is_missing(&value) {
                        continue;
                    }
                    best = match best {
                        Some(current) if compare(&value, &current) != wanted => Some(current),
                        _ => Some(value),
                    };
                }
                Ok(best.unwrap_or(Bson::Null))
            }

            // Arrays
            "$arrayElemAt" => {
                let [array, index] = self.eval_exact::<2>(name, arg)?;
                if is_missing(&array) || is_missing(&index) {
                    return Ok(Bson::Null);
                }
                let items = array_arg(name, &array)?;
                let index = int_arg(name, &index)?;
                let position = if index < 0 { items.len() as i64 + index } else { index };
                Ok(usize::try_from(position)
                    .ok()
                    .and_then(|p| items.get(p))
                    .cloned()
                    .unwrap_or(Bson::Undefined))
            }
            "$arrayToObject" => {
                let mut value = self.eval(arg)?;
                if let Bson::Array(items) = &value {
                    if let [Bson::Array(inner)] = items.as_slice() {
                        if inner.iter().all(|pair| matches!(pair, Bson::Array(_) | Bson::Document(_))) {
                            value = Bson::Array(inner.clone());
                        }
                    }
                }
                if is_missing(&value) {
                    return Ok(Bson::Null);
                }
                array_to_object(&value)
            }
            "$concatArrays" => {
                let mut out = Vec::new();
                for value in self.eval_operands(arg)? {
                    if is_missing(&value) {
                        return Ok(Bson::Null);
                    }
                    out.extend(array_arg(name, &value)?.iter().cloned());
                }
                Ok(Bson::Array(out))
            }
            "$filter" => {
                let spec = self.named(name, arg)?;
                let input = self.eval_named(spec, "input")?.unwrap_or(Bson::Null);
                if is_missing(&input) {
                    return Ok(Bson::Null);
                }
                let var = spec.get_str("as").unwrap_or("this").to_string();
                let cond = spec.get("cond").ok_or_else(|| err("$filter requires 'cond'"))?;
                let mut out = Vec::new();
                for item in array_arg(name, &input)? {
                    let scope = self.with_vars([(var.clone(), item.clone())]);
                    if is_truthy(&scope.eval(cond)?) {
                        out.push(item.clone());
                    }
                }
                Ok(Bson::Array(out))
            }
            "$map" => {
                let spec = self.named(name, arg)?;
                let input = self.eval_named(spec, "input")?.unwrap_or(Bson::Null);
                if is_missing(&input) {
                    return Ok(Bson::Null);
                }
                let var = spec.get_str("as").unwrap_or("this").to_string();
                let body = spec.get("in").ok_or_else(|| err("$map requires 'in'"))?;
                let mut out = Vec::new();
                for item in array_arg(name, &input)? {
                    out.push(self.with_vars([(var.clone(), item.clone())]).eval(body)?);
                }
                Ok(Bson::Array(out))
            }
            "$reduce" => {
                let spec = self.named(name, arg)?;
                let input = self.eval_named(spec, "input")?.unwrap_or(Bson::Null);
                if is_missing(&input) {
                    return Ok(Bson::Null);
                }
                let mut acc = self.eval_named(spec, "initialValue")?.unwrap_or(Bson::Null);
                let body = spec.get("in").ok_or_else(|| err("$reduce requires 'in'"))?;
                for item in array_arg(name, &input)? {
                    let scope =
                        self.with_vars([("value".to_string(), acc), ("this".to_string(), item.clone())]);
                    acc = scope.eval(body)?;
                }
                Ok(acc)
            }
            "$isArray" => Ok(Bson::Boolean(matches!(
                self.eval_single(name, arg)?,
                Bson::Array(_)
            ))),
            "$size" => {
                let value = self.eval_single(name, arg)?;
                match value {
                    Bson::Array(items) => Ok(int_bson(items.len() as i64)),
                    other => Err(err(format!(
                        "the argument to $size must be an array, but was of type: {}",
                        missing_alias(&other)
                    ))),
                }
            }
            "$slice" => {
                let values = self.eval_range(name, arg, 2, 3)?;
                if values.iter().any(is_missing) {
                    return Ok(Bson::Null);
                }
                let items = array_arg(name, &values[0])?;
                let len = items.len() as i64;
                let (start, count) = if values.len() == 2 {
                    let n = int_arg(name, &values[1])?;
                    if n >= 0 { (0, n) } else { (len.saturating_add(n).max(0), n.saturating_neg()) }
                } else {
                    let position = int_arg(name, &values[1])?;
                    let n = int_arg(name, &values[2])?;
                    if n <= 0 {
                        return Err(err("third argument to $slice must be positive"));
                    }
                    let start = if position < 0 { len.saturating_add(position).max(0) } else { position.min(len) };
                    (start, n)
                };
                let end = start.saturating_add(count).min(len);
                Ok(Bson::Array(items[start as usize..end as usize].to_vec()))
            }
            "$zip" => {
                let spec = self.named(name, arg)?;
                let inputs = self.eval_named(spec, "inputs")?.unwrap_or(Bson::Null);
                let mut arrays = Vec::new();
                for input in array_arg(name, &inputs)? {
                    if is_missing(input) {
                        return Ok(Bson::Null);
                    }
                    arrays.push(array_arg(name, input)?.to_vec());
                }
                let longest = self
                    .eval_named(spec, "useLongestLength")?
                    .is_some_and(|v| is_truthy(&v));
                let defaults = match self.eval_named(spec, "defaults")? {
                    Some(Bson::Array(d)) if longest => d,
                    Some(_) if !longest => {
                        return Err(err("cannot specify defaults unless useLongestLength is true"));
                    }
                    _ => Vec::new(),
                };
                let len = if longest {
                    arrays.iter().map(Vec::len).max().unwrap_or(0)
                } else {
                    arrays.iter().map(Vec::len).min().unwrap_or(0)
                };
                let out = (0..len)
                    .map(|i| {
                        Bson::Array(
                            arrays
                                .iter()
                                .enumerate()
                                .map(|(j, a)| {
                                    a.get(i)
                                        .or_else(|| defaults.get(j))
                                        .cloned()
                                        .unwrap_or(Bson::Null)
                                })
                                .collect(),
                        )
                    })
                    .collect();
                Ok(Bson::Array(out))
            }
            "$in" => {
                let [search, array] = self.eval_exact::<2>(name, arg)?;
                let items = array_arg(name, &array)?;
                Ok(Bson::Boolean(items.iter().any(|item| values_equal(item, &search))))
            }
            "$indexOfArray" => {
                let values = self.eval_range(name, arg, 2, 4)?;
                if is_missing(&values[0]) {
                    return Ok(Bson::Null);
                }
                let items = array_arg(name, &values[0])?;
                let (start, end) = bounds(name, &values[2..], items.len())?;
                let found = (start..end).find(|&i| values_equal(&items[i], &values[1]));
                Ok(int_bson(found.map(|i| i as i64).unwrap_or(-1)))
            }
            "$mergeObjects" => {
                let operands = match arg {
                    Bson::Array(_) => self.eval_operands(arg)?,
                    single => match self.eval(single)? {
                        Bson::Array(items) => items,
                        other => vec![other],
                    },
                };
                let mut out = Document::new();
                for operand in operands {
                    match operand {
                        Bson::Document(doc) => out.extend(doc),
                        missing if is_missing(&missing) => {}
                        other => {
                            return Err(err(format!(
                                "$mergeObjects requires object inputs, but input is of type {}",
                                type_alias(&other)
                            )));
                        }
                    }
                }
                Ok(Bson::Document(out))
            }
            "$reverseArray" => {
                let value = self.eval_single(name, arg)?;
                if is_missing(&value) {
                    return Ok(Bson::Null);
                }
                let mut items = array_arg(name, &value)?.to_vec();
                items.reverse();
                Ok(Bson::Array(items))
            }
            "$allElementsTrue" | "$anyElementTrue" => {
                let value = self.eval_single(name, arg)?;
                let items = array_arg(name, &value)?;
                Ok(Bson::Boolean(if name == "$allElementsTrue" {
                    items.iter().all(is_truthy)
                } else {
                    items.iter().any(is_truthy)
                }))
            }

            // Sets
            "$setUnion" | "$setIntersection" | "$setEquals" => {
                let mut sets = Vec::new();
                for value in self.eval_operands(arg)? {
                    if is_missing(&value) {
                        if name == "$setEquals" {
                            return Err(err("all operands of $setEquals must be arrays"));
                        }
                        return Ok(Bson::Null);
                    }
                    sets.push(distinct(array_arg(name, &value)?));
                }
                match name {
                    "$setUnion" => Ok(Bson::Array(distinct(&sets.concat()))),
                    "$setIntersection" => {
                        let mut iter = sets.into_iter();
                        let first = iter.next().unwrap_or_default();
                        let rest: Vec<Vec<Bson>> = iter.collect();
                        Ok(Bson::Array(
                            first
                                .into_iter()
                                .filter(|v| rest.iter().all(|s| contains(s, v)))
                                .collect(),
                        ))
                    }
                    _ => {
                        if sets.len() < 2 {
                            return Err(err("$setEquals needs at least two arguments"));
                        }
                        let first = &sets[0];
                        Ok(Bson::Boolean(sets[1..].iter().all(|s| {
                            s.len() == first.len() && s.iter().all(|v| contains(first, v))
                        })))
                    }
                }
            }
            "$setDifference" | "$setIsSubset" => {
                let [a, b] = self.eval_exact::<2>(name, arg)?;
                if name == "$setDifference" && (is_missing(&a) || is_missing(&b)) {
                    return Ok(Bson::Null);
                }
                let (a, b) = (distinct(array_arg(name, &a)?), distinct(array_arg(name, &b)?));
                if name == "$setDifference" {
                    Ok(Bson::Array(a.into_iter().filter(|v| !contains(&b, v)).collect()))
                } else {
                    Ok(Bson::Boolean(a.iter().all(|v| contains(&b, v))))
                }
            }

            // Strings
            "$concat" => {
                let mut out = String::new();
                for value in self.eval_operands(arg)? {
                    match value {
                        Bson::String(s) => out.push_str(&s),
                        missing if is_missing(&missing) => return Ok(Bson::Null),
                        other => {
                            return Err(err(format!(
                                "$concat only supports strings, not {}",
                                type_alias(&other)
                            )));
                        }
                    }
                }
                Ok(Bson::String(out))
            }
            "$toLower" | "$toUpper" => {
                let value = self.eval_single(name, arg)?;
                let s = string_or_empty(name, &value)?;
                Ok(Bson::String(if name == "$toLower" {
                    s.to_lowercase()
                } else {
                    s.to_uppercase()
                }))
            }
            "$trim" | "$ltrim" | "$rtrim" => {
                let spec = self.named(name, arg)?;
                let input = self.eval_named(spec, "input")?.unwrap_or(Bson::Null);
                if is_missing(&input) {
                    return Ok(Bson::Null);
                }
                let input = string_arg(name, &input)?;
                let chars: Option<Vec<char>> = match self.eval_named(spec, "chars")? {
                    None => None,
                    Some(value) if is_missing(&value) => return Ok(Bson::Null),
                    Some(value) => Some(string_arg(name, &value)?.chars().collect()),
                };
                let strip = |c: char| match &chars {
                    Some(set) => set.contains(&c),
                    None => c.is_whitespace() || c == '\0',
                };
                let trimmed = match name {
                    "$trim" => input.trim_matches(strip),
                    "$ltrim" => input.trim_start_matches(strip),
                    _ => input.trim_end_matches(strip),
                };
                Ok(Bson::String(trimmed.to_string()))
            }
            "$split" => {
                let [s, delimiter] = self.eval_exact::<2>(name, arg)?;
                if is_missing(&s) {
                    return Ok(Bson::Null);
                }
                let (s, delimiter) = (string_arg(name, &s)?, string_arg(name, &delimiter)?);
                if delimiter.is_empty() {
                    return Err(err("$split requires a non-empty separator"));
                }
                Ok(Bson::Array(
                    s.split(delimiter).map(|part| Bson::String(part.to_string())).collect(),
                ))
            }
            "$strLenBytes" => {
                let value = self.eval_single(name, arg)?;
                Ok(int_bson(string_arg(name, &value)?.len() as i64))
            }
            "$strLenCP" => {
                let value = self.eval_single(name, arg)?;
                Ok(int_bson(string_arg(name, &value)?.chars().count() as i64))
            }
            "$substr" | "$substrBytes" => {
                let [s, start, count] = self.eval_exact::<3>(name, arg)?;
                let s = string_or_empty(name, &s)?;
                let start = usize::try_from(int_arg(name, &start)?).unwrap_or(0).min(s.len());
                let count = int_arg(name, &count)?;
                let end = if count < 0 { s.len() } else { (start + count as usize).min(s.len()) };
                let slice = s
                    .get(start..end)
                    .ok_or_else(|| err(format!("{}: invalid range, not a UTF-8 boundary", name)))?;
                Ok(Bson::String(slice.to_string()))
            }
            "$substrCP" => {
                let [s, index, count] = self.eval_exact::<3>(name, arg)?;
                let s = string_or_empty(name, &s)?;
                let index = usize::try_from(int_arg(name, &index)?)
                    .map_err(|_| err("$substrCP: starting index must be non-negative"))?;
                let count = usize::try_from(int_arg(name, &count)?)
                    .map_err(|_| err("$substrCP: length must be non-negative"))?;
                Ok(Bson::String(s.chars().skip(index).take(count).collect()))
            }
            "$indexOfBytes" | "$indexOfCP" => {
                let values = self.eval_range(name, arg, 2, 4)?;
                if is_missing(&values[0]) {
                    return Ok(Bson::Null);
                }
                let haystack = string_arg(name, &values[0])?;
                let needle = string_arg(name, &values[1])?;
                if name == "$indexOfBytes" {
                    let (start, end) = bounds(name, &values[2..], haystack.len())?;
                    let found = haystack
                        .as_bytes()
                        .get(start..end)
                        .and_then(|window| find_bytes(window, needle.as_bytes()))
                        .map(|i| (start + i) as i64);
                    Ok(int_bson(found.unwrap_or(-1)))
                } else {
                    let chars: Vec<char> = haystack.chars().collect();
                    let needle: Vec<char> = needle.chars().collect();
                    let (start, end) = bounds(name, &values[2..], chars.len())?;
                    let found = (start..=end.saturating_sub(needle.len()))
                        .take_while(|_| end >= needle.len())
                        .find(|&i| i + needle.len() <= end && chars[i..i + needle.len()] == needle[..]);
                    Ok(int_bson(found.map(|i| i as i64).unwrap_or(-1)))
                }
            }
            "$strcasecmp" => {
                let [a, b] = self.eval_exact::<2>(name, arg)?;
                let a = string_or_empty(name, &a)?.to_lowercase();
                let b = string_or_empty(name, &b)?.to_lowercase();
                Ok(Bson::Int32(ordering_value(a.cmp(&b))))
            }

            // Logic and comparison
            "$and" => {
                for value in self.eval_operands(arg)? {
                    if !is_truthy(&value) {
                        return Ok(Bson::Boolean(false));
                    }
                }
                Ok(Bson::Boolean(true))
            }
            "$or" => {
                for value in self.eval_operands(arg)? {
                    if is_truthy(&value) {
                        return Ok(Bson::Boolean(true));
                    }
                }
                Ok(Bson::Boolean(false))
            }
            "$not" => Ok(Bson::Boolean(!is_truthy(&self.eval_single(name, arg)?))),
            "$cond" => {
                let (condition, then, otherwise) = match arg {
                    Bson::Document(spec) => (
                        spec.get("if").ok_or_else(|| err("missing 'if' parameter to $cond"))?,
                        spec.get("then").ok_or_else(|| err("missing 'then' parameter to $cond"))?,
                        spec.get("else").ok_or_else(|| err("missing 'else' parameter to $cond"))?,
                    ),
                    Bson::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
                    _ => return Err(err("$cond takes an object or an array of three expressions")),
                };
                if is_truthy(&self.eval(condition)?) {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            "$cmp" | "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
                let [a, b] = self.eval_exact::<2>(name, arg)?;
                let a = if matches!(a, Bson::Undefined) { Bson::Null } else { a };
                let b = if matches!(b, Bson::Undefined) { Bson::Null } else { b };
                let ord = compare(&a, &b);
                Ok(match name {
                    "$cmp" => Bson::Int32(ordering_value(ord)),
                    "$eq" => Bson::Boolean(ord.is_eq()),
                    "$ne" => Bson::Boolean(ord.is_ne()),
                    "$gt" => Bson::Boolean(ord.is_gt()),
                    "$gte" => Bson::Boolean(ord.is_ge()),
                    "$lt" => Bson::Boolean(ord.is_lt()),
                    _ => Bson::Boolean(ord.is_le()),
                })
            }
            "$ifNull" => {
                let values = self.eval_operands(arg)?;
                if values.len() < 2 {
                    return Err(err("$ifNull needs at least two arguments"));
                }
                let fallback = values.len() - 1;
                Ok(values
                    .iter()
                    .take(fallback)
                    .find(|v| !is_missing(v))
                    .unwrap_or(&values[fallback])
                    .clone())
            }
            "$switch" => {
                let spec = self.named(name, arg)?;
                let branches = spec
                    .get_array("branches")
                    .map_err(|_| err("$switch expects an array for 'branches'"))?;
                for branch in branches {
                    let branch = branch
                        .as_document()
                        .ok_or_else(|| err("$switch expected each branch to be an object"))?;
                    let case = branch.get("case").ok_or_else(|| err("$switch requires each branch have a 'case'"))?;
                    if is_truthy(&self.eval(case)?) {
                        let then = branch.get("then").ok_or_else(|| err("$switch requires each branch have a 'then'"))?;
                        return self.eval(then);
                    }
                }
                match spec.get("default") {
                    Some(default) => self.eval(default),
                    None => Err(err("$switch could not find a matching branch for an input, and no default was specified")),
                }
            }

            // Types
            "$type" => Ok(Bson::String(missing_alias(&self.eval_single(name, arg)?).to_string())),
            "$convert" => {
                let spec = self.named(name, arg)?;
                let input = self.eval_named(spec, "input")?.unwrap_or(Bson::Undefined);
                let to = self
                    .eval_named(spec, "to")?
                    .ok_or_else(|| err("missing 'to' parameter to $convert"))?;
                let target = match &to {
                    Bson::String(alias) => alias.clone(),
                    _ => return Err(err("$convert's 'to' argument must be a string")),
                };
                if is_missing(&input) {
                    return Ok(self.eval_named(spec, "onNull")?.unwrap_or(Bson::Null));
                }
                match convert(&input, &target) {
                    Ok(value) => Ok(value),
                    Err(message) => match spec.get("onError") {
                        Some(on_error) => self.eval(on_error),
                        None => Err(err(message)),
                    },
                }
            }
            "$toBool" | "$toString" | "$toInt" | "$toLong" | "$toDouble" | "$toDecimal"
            | "$toObjectId" | "$toDate" => {
                let value = self.eval_single(name, arg)?;
                if is_missing(&value) {
                    return Ok(Bson::Null);
                }
                let target = match name {
                    "$toBool" => "bool",
                    "$toString" => "string",
                    "$toInt" => "int",
                    "$toLong" => "long",
                    "$toDouble" | "$toDecimal" => "double",
                    "$toObjectId" => "objectId",
                    _ => "date",
                };
                convert(&value, target).map_err(err)
            }
            "$objectToArray" => {
                let value = self.eval_single(name, arg)?;
                match value {
                    Bson::Document(doc) => Ok(Bson::Array(
                        doc.into_iter()
                            .map(|(k, v)| {
                                let mut pair = Document::new();
                                pair.insert("k", k);
                                pair.insert("v", v);
                                Bson::Document(pair)
                            })
                            .collect(),
                    )),
                    missing if is_missing(&missing) => Ok(Bson::Null),
                    other => Err(err(format!(
                        "$objectToArray requires a document input, found: {}",
                        type_alias(&other)
                    ))),
                }
            }

            // Dates
            "$year" | "$month" | "$dayOfMonth" | "$hour" | "$minute" | "$second"
            | "$millisecond" | "$dayOfWeek" | "$dayOfYear" | "$week" | "$isoWeek"
            | "$isoWeekYear" | "$isoDayOfWeek" => {
                let (date, timezone) = match arg {
                    Bson::Document(spec) if spec.contains_key("date") => {
                        (self.eval_named(spec, "date")?.unwrap_or(Bson::Null), self.eval_named(spec, "timezone")?)
                    }
                    other => (self.eval_single(name, other)?, None),
                };
                if is_missing(&date) {
                    return Ok(Bson::Null);
                }
                let local = localize(name, &date, timezone.as_ref())?;
                let part = match name {
                    "$year" => i64::from(local.year()),
                    "$month" => i64::from(local.month()),
                    "$dayOfMonth" => i64::from(local.day()),
                    "$hour" => i64::from(local.hour()),
                    "$minute" => i64::from(local.minute()),
                    "$second" => i64::from(local.second()),
                    "$millisecond" => i64::from(local.nanosecond() / 1_000_000),
                    "$dayOfWeek" => i64::from(local.weekday().number_from_sunday()),
                    "$dayOfYear" => i64::from(local.ordinal()),
                    "$week" => sunday_week(&local),
                    "$isoWeek" => i64::from(local.iso_week().week()),
                    "$isoWeekYear" => i64::from(local.iso_week().year()),
                    _ => i64::from(local.weekday().number_from_monday()),
                };
                Ok(int_bson(part))
            }
            "$dateToString" => {
                let spec = self.named(name, arg)?;
                let date = self.eval_named(spec, "date")?.unwrap_or(Bson::Null);
                if is_missing(&date) {
                    return Ok(self.eval_named(spec, "onNull")?.unwrap_or(Bson::Null));
                }
                let timezone = self.eval_named(spec, "timezone")?;
                let format = match self.eval_named(spec, "format")? {
                    Some(Bson::String(f)) => f,
                    Some(_) => return Err(err("$dateToString requires that 'format' be a string")),
                    None => "%Y-%m-%dT%H:%M:%S.%LZ".to_string(),
                };
                let local = localize(name, &date, timezone.as_ref())?;
                Ok(Bson::String(format_date(&local, &format)?))
            }
            "$dateFromParts" => {
                let spec = self.named(name, arg)?;
                let part = |key: &str, default: i64| -> MongoResult<i64> {
                    match self.eval_named(spec, key)? {
                        None => Ok(default),
                        Some(value) => int_arg(name, &value),
                    }
                };
                let date = if spec.contains_key("isoWeekYear") {
                    let year = i32::try_from(part("isoWeekYear", 1970)?).map_err(|_| err("isoWeekYear out of range"))?;
                    let week = u32::try_from(part("isoWeek", 1)?).map_err(|_| err("isoWeek out of range"))?;
                    let weekday = match part("isoDayOfWeek", 1)? {
                        1 => chrono::Weekday::Mon,
                        2 => chrono::Weekday::Tue,
                        3 => chrono::Weekday::Wed,
                        4 => chrono::Weekday::Thu,
                        5 => chrono::Weekday::Fri,
                        6 => chrono::Weekday::Sat,
                        7 => chrono::Weekday::Sun,
                        _ => return Err(err("isoDayOfWeek must be between 1 and 7")),
                    };
                    NaiveDate::from_isoywd_opt(year, week, weekday)
                } else {
                    let year = i32::try_from(part("year", 1970)?).map_err(|_| err("year out of range"))?;
                    let month = u32::try_from(part("month", 1)?).map_err(|_| err("month out of range"))?;
                    let day = u32::try_from(part("day", 1)?).map_err(|_| err("day out of range"))?;
                    NaiveDate::from_ymd_opt(year, month, day)
                }
                .ok_or_else(|| err("$dateFromParts: invalid date"))?;
                let time = date
                    .and_hms_milli_opt(
                        u32::try_from(part("hour", 0)?).unwrap_or(u32::MAX),
                        u32::try_from(part("minute", 0)?).unwrap_or(u32::MAX),
                        u32::try_from(part("second", 0)?).unwrap_or(u32::MAX),
                        u32::try_from(part("millisecond", 0)?).unwrap_or(u32::MAX),
                    )
                    .ok_or_else(|| err("$dateFromParts: invalid time"))?;
                let offset = offset_of(name, self.eval_named(spec, "timezone")?.as_ref())?;
                let utc = offset
                    .from_local_datetime(&time)
                    .single()
                    .ok_or_else(|| err("$dateFromParts: ambiguous local time"))?
                    .with_timezone(&Utc);
                Ok(Bson::DateTime(bson::DateTime::from_chrono(utc)))
            }
            "$dateFromString" => {
                let spec = self.named(name, arg)?;
                let input = self.eval_named(spec, "dateString")?.unwrap_or(Bson::Null);
                if is_missing(&input) {
                    return Ok(self.eval_named(spec, "onNull")?.unwrap_or(Bson::Null));
                }
                let format = match self.eval_named(spec, "format")? {
                    Some(Bson::String(f)) => Some(f),
                    Some(_) => return Err(err("$dateFromString requires that 'format' be a string")),
                    None => None,
                };
                let offset = offset_of(name, self.eval_named(spec, "timezone")?.as_ref())?;
                let parsed = match &input {
                    Bson::String(s) => parse_date(s, format.as_deref(), offset),
                    other => Err(format!(
                        "$dateFromString requires that 'dateString' be a string, found: {}",
                        type_alias(other)
                    )),
                };
                match parsed {
                    Ok(dt) => Ok(Bson::DateTime(bson::DateTime::from_chrono(dt))),
                    Err(message) => match spec.get("onError") {
                        Some(on_error) => self.eval(on_error),
                        None => Err(err(message)),
                    },
                }
            }

            other => Err(err(format!("unrecognized expression operator: {}", other))),
        }
    }
}

/// The operator name and argument when `doc` is a single-operator node.
fn single_operator(doc: &Document) -> Option<(&str, &Bson)> {
    if doc.len() != 1 {
        return None;
    }
    doc.iter()
        .next()
        .filter(|(k, _)| k.starts_with('$'))
        .map(|(k, v)| (k.as_str(), v))
}

/// Resolve a dotted path, mapping over arrays.
fn resolve(value: &Bson, path: &str) -> Bson {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let next = match value {
        Bson::Document(doc) => match doc.get(head) {
            Some(v) => v.clone(),
            None => return Bson::Undefined,
        },
        Bson::Array(items) => {
            return Bson::Array(
                items
                    .iter()
                    .map(|item| resolve(item, path))
                    .filter(|v| !matches!(v, Bson::Undefined))
                    .collect(),
            );
        }
        _ => return Bson::Undefined,
    };
    match rest {
        Some(rest) => resolve(&next, rest),
        None => next,
    }
}

fn missing_alias(value: &Bson) -> &'static str {
    if matches!(value, Bson::Undefined) {
        "missing"
    } else {
        type_alias(value)
    }
}

fn int_bson(value: i64) -> Bson {
    i32::try_from(value).map(Bson::Int32).unwrap_or(Bson::Int64(value))
}

/// Integer result typed like its operands: long if either operand is long.
fn narrow(value: i64, a: &Bson, b: &Bson) -> Bson {
    if matches!(a, Bson::Int64(_)) || matches!(b, Bson::Int64(_)) {
        Bson::Int64(value)
    } else {
        int_bson(value)
    }
}

fn int_value(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(_) | Bson::Int64(_) => as_i64(value),
        _ => None,
    }
}

fn int_arg(name: &str, value: &Bson) -> MongoResult<i64> {
    as_i64(value).ok_or_else(|| {
        err(format!(
            "{} requires an integral argument, found: {}",
            name,
            missing_alias(value)
        ))
    })
}

fn number_arg(name: &str, value: &Bson) -> MongoResult<f64> {
    as_f64(value).ok_or_else(|| {
        err(format!(
            "{} only supports numeric types, not {}",
            name,
            missing_alias(value)
        ))
    })
}

fn array_arg<'b>(name: &str, value: &'b Bson) -> MongoResult<&'b [Bson]> {
    match value {
        Bson::Array(items) => Ok(items),
        other => Err(err(format!(
            "{} requires an array argument, found: {}",
            name,
            missing_alias(other)
        ))),
    }
}

fn string_arg<'b>(name: &str, value: &'b Bson) -> MongoResult<&'b str> {
    match value {
        Bson::String(s) => Ok(s),
        other => Err(err(format!(
            "{} requires a string argument, found: {}",
            name,
            missing_alias(other)
        ))),
    }
}

fn string_or_empty<'b>(name: &str, value: &'b Bson) -> MongoResult<&'b str> {
    if is_missing(value) {
        Ok("")
    } else {
        string_arg(name, value)
    }
}

fn numbers_of(values: Vec<Bson>) -> Vec<f64> {
    values.iter().filter_map(as_f64).collect()
}

fn unary_number(name: &str, value: Bson, f: impl Fn(Bson) -> Bson) -> MongoResult<Bson> {
    if is_missing(&value) {
        return Ok(Bson::Null);
    }
    number_arg(name, &value)?;
    Ok(f(value))
}

/// Rounding operators leave integers untouched.
fn unary_float(name: &str, value: Bson, f: fn(f64) -> f64) -> MongoResult<Bson> {
    if is_missing(&value) {
        return Ok(Bson::Null);
    }
    match value {
        Bson::Int32(_) | Bson::Int64(_) => Ok(value),
        other => Ok(Bson::Double(f(number_arg(name, &other)?))),
    }
}

fn to_double(name: &str, value: Bson, f: fn(f64) -> f64) -> MongoResult<Bson> {
    if is_missing(&value) {
        return Ok(Bson::Null);
    }
    Ok(Bson::Double(f(number_arg(name, &value)?)))
}

fn fold_numbers(
    name: &str,
    values: Vec<Bson>,
    init: Bson,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> MongoResult<Bson> {
    let mut acc = init;
    for value in values {
        if is_missing(&value) {
            return Ok(Bson::Null);
        }
        number_arg(name, &value)?;
        acc = match (int_value(&acc), int_value(&value)) {
            (Some(a), Some(b)) => match int_op(a, b) {
                Some(result) => narrow(result, &acc, &value),
                None => Bson::Double(float_op(a as f64, b as f64)),
            },
            _ => Bson::Double(float_op(
                as_f64(&acc).unwrap_or(f64::NAN),
                as_f64(&value).unwrap_or(f64::NAN),
            )),
        };
    }
    Ok(acc)
}

fn add(values: Vec<Bson>) -> MongoResult<Bson> {
    let mut date: Option<bson::DateTime> = None;
    let mut numbers = Vec::with_capacity(values.len());
    for value in values {
        match value {
            Bson::DateTime(dt) => {
                if date.is_some() {
                    return Err(err("only one date allowed in an $add expression"));
                }
                date = Some(dt);
            }
            other => numbers.push(other),
        }
    }
    let sum = fold_numbers("$add", numbers, Bson::Int32(0), |a, b| a.checked_add(b), |a, b| a + b)?;
    match date {
        None => Ok(sum),
        Some(_) if sum == Bson::Null => Ok(Bson::Null),
        Some(dt) => {
            let millis = as_f64(&sum).unwrap_or(0.0).round() as i64;
            Ok(Bson::DateTime(bson::DateTime::from_millis(
                dt.timestamp_millis() + millis,
            )))
        }
    }
}

fn subtract(a: Bson, b: Bson) -> MongoResult<Bson> {
    if is_missing(&a) || is_missing(&b) {
        return Ok(Bson::Null);
    }
    match (&a, &b) {
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            Ok(Bson::Int64(x.timestamp_millis() - y.timestamp_millis()))
        }
        (Bson::DateTime(x), n) if is_number(n) => Ok(Bson::DateTime(bson::DateTime::from_millis(
            x.timestamp_millis() - as_f64(n).unwrap_or(0.0).round() as i64,
        ))),
        _ => match (int_value(&a), int_value(&b)) {
            (Some(x), Some(y)) => Ok(x
                .checked_sub(y)
                .map(|v| narrow(v, &a, &b))
                .unwrap_or(Bson::Double(x as f64 - y as f64))),
            _ => Ok(Bson::Double(
                number_arg("$subtract", &a)? - number_arg("$subtract", &b)?,
            )),
        },
    }
}

fn array_to_object(value: &Bson) -> MongoResult<Bson> {
    let items = array_arg("$arrayToObject", value)?;
    let mut out = Document::new();
    for item in items {
        let (key, value) = match item {
            Bson::Array(pair) if pair.len() == 2 => (pair[0].clone(), pair[1].clone()),
            Bson::Document(pair) if pair.len() == 2 => (
                pair.get("k").cloned().unwrap_or(Bson::Null),
                pair.get("v").cloned().unwrap_or(Bson::Null),
            ),
            _ => {
                return Err(err(
                    "$arrayToObject requires an array of [k, v] pairs or {k, v} objects",
                ));
            }
        };
        let key = match key {
            Bson::String(k) => k,
            other => {
                return Err(err(format!(
                    "$arrayToObject requires string keys, found: {}",
                    type_alias(&other)
                )));
            }
        };
        out.insert(key, value);
    }
    Ok(Bson::Document(out))
}

fn distinct(items: &[Bson]) -> Vec<Bson> {
    let mut out: Vec<Bson> = Vec::with_capacity(items.len());
    for item in items {
        if !contains(&out, item) {
            out.push(item.clone());
        }
    }
    out
}

fn contains(set: &[Bson], value: &Bson) -> bool {
    set.iter().any(|v| values_equal(v, value))
}

/// Optional `[start, end]` search bounds, clamped to `len`.
fn bounds(name: &str, extra: &[Bson], len: usize) -> MongoResult<(usize, usize)> {
    let index = |value: &Bson| -> MongoResult<usize> {
        let i = int_arg(name, value)?;
        usize::try_from(i).map_err(|_| err(format!("{} index must be non-negative", name)))
    };
    let start = extra.first().map(index).transpose()?.unwrap_or(0).min(len);
    let end = extra.get(1).map(index).transpose()?.unwrap_or(len).min(len);
    Ok((start, end.max(start)))
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn ordering_value(ord: Ordering) -> i32 {
    match ord {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

fn convert(value: &Bson, target: &str) -> Result<Bson, String> {
    let fail = || {
        format!(
            "unsupported conversion from {} to {}",
            type_alias(value),
            target
        )
    };
    match target {
        "bool" => Ok(Bson::Boolean(match value {
            Bson::String(_) => true,
            other => is_truthy(other),
        })),
        "string" => match value {
            Bson::String(s) => Ok(Bson::String(s.clone())),
            Bson::Int32(i) => Ok(Bson::String(i.to_string())),
            Bson::Int64(i) => Ok(Bson::String(i.to_string())),
            Bson::Double(f) => Ok(Bson::String(f.to_string())),
            Bson::Boolean(b) => Ok(Bson::String(b.to_string())),
            Bson::ObjectId(oid) => Ok(Bson::String(oid.to_hex())),
            Bson::DateTime(dt) => Ok(Bson::String(
                dt.to_chrono().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            )),
            _ => Err(fail()),
        },
        "int" | "long" => {
            let n = match value {
                Bson::Boolean(b) => i64::from(*b),
                Bson::Int32(i) => i64::from(*i),
                Bson::Int64(i) => *i,
                Bson::Double(f) if f.is_finite() => f.trunc() as i64,
                Bson::String(s) => s.trim().parse::<i64>().map_err(|_| fail())?,
                Bson::DateTime(dt) if target == "long" => dt.timestamp_millis(),
                _ => return Err(fail()),
            };
            if target == "int" {
                i32::try_from(n).map(Bson::Int32).map_err(|_| fail())
            } else {
                Ok(Bson::Int64(n))
            }
        }
        "double" | "decimal" => match value {
            Bson::Boolean(b) => Ok(Bson::Double(if *b { 1.0 } else { 0.0 })),
            Bson::String(s) => s.trim().parse::<f64>().map(Bson::Double).map_err(|_| fail()),
            Bson::DateTime(dt) => Ok(Bson::Double(dt.timestamp_millis() as f64)),
            other => as_f64(other).map(Bson::Double).ok_or_else(fail),
        },
        "objectId" => match value {
            Bson::ObjectId(oid) => Ok(Bson::ObjectId(*oid)),
            Bson::String(s) => ObjectId::parse_str(s).map(Bson::ObjectId).map_err(|_| fail()),
            _ => Err(fail()),
        },
        "date" => match value {
            Bson::DateTime(dt) => Ok(Bson::DateTime(*dt)),
            Bson::Int64(ms) => Ok(Bson::DateTime(bson::DateTime::from_millis(*ms))),
            Bson::Double(ms) => Ok(Bson::DateTime(bson::DateTime::from_millis(*ms as i64))),
            Bson::ObjectId(oid) => Ok(Bson::DateTime(oid.timestamp())),
            Bson::String(s) => parse_date(s, None, FixedOffset::east_opt(0).ok_or_else(fail)?)
                .map(|dt| Bson::DateTime(bson::DateTime::from_chrono(dt))),
            _ => Err(fail()),
        },
        _ => Err(format!("unknown type name: {}", target)),
    }
}

fn offset_of(name: &str, timezone: Option<&Bson>) -> MongoResult<FixedOffset> {
    let utc = || FixedOffset::east_opt(0).ok_or_else(|| err("invalid offset"));
    let tz = match timezone {
        None => return utc(),
        Some(value) if is_missing(value) => return utc(),
        Some(Bson::String(tz)) => tz.as_str(),
        Some(_) => return Err(err(format!("{}: timezone must be a string", name))),
    };
    if matches!(tz, "UTC" | "GMT" | "Z" | "Etc/UTC" | "Etc/GMT") {
        return utc();
    }

    let (sign, digits) = match tz.as_bytes().first() {
        Some(b'+') => (1, &tz[1..]),
        Some(b'-') => (-1, &tz[1..]),
        _ => {
            return Err(err(format!(
                "{}: timezone '{}' is not supported by the in-memory store, use a UTC offset",
                name, tz
            )));
        }
    };
    let digits: String = digits.chars().filter(|c| *c != ':').collect();
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok(), Some(0)),
        4 => (digits[..2].parse::<i32>().ok(), digits[2..].parse::<i32>().ok()),
        _ => (None, None),
    };
    match (hours, minutes) {
        (Some(h), Some(m)) => FixedOffset::east_opt(sign * (h * 3600 + m * 60))
            .ok_or_else(|| err(format!("{}: invalid offset '{}'", name, tz))),
        _ => Err(err(format!("{}: invalid offset '{}'", name, tz))),
    }
}

fn localize(name: &str, date: &Bson, timezone: Option<&Bson>) -> MongoResult<DateTime<FixedOffset>> {
    let utc = match date {
        Bson::DateTime(dt) => dt.to_chrono(),
        Bson::ObjectId(oid) => oid.timestamp().to_chrono(),
        Bson::Timestamp(ts) => Utc
            .timestamp_opt(i64::from(ts.time), 0)
            .single()
            .ok_or_else(|| err("invalid timestamp"))?,
        other => {
            return Err(err(format!(
                "{} requires a date, found: {}",
                name,
                missing_alias(other)
            )));
        }
    };
    Ok(utc.with_timezone(&offset_of(name, timezone)?))
}

/// Week of the year where weeks begin on Sunday (0-53).
fn sunday_week(date: &DateTime<FixedOffset>) -> i64 {
    let ordinal0 = i64::from(date.ordinal0());
    let weekday0 = i64::from(date.weekday().num_days_from_sunday());
    (ordinal0 + 7 - weekday0) / 7
}

fn format_date(date: &DateTime<FixedOffset>, format: &str) -> MongoResult<String> {
    let mut out = String::with_capacity(format.len() + 8);
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let spec = chars
            .next()
            .ok_or_else(|| err("$dateToString: unmatched '%' at end of format"))?;
        let piece = match spec {
            'Y' => format!("{:04}", date.year()),
            'm' => format!("{:02}", date.month()),
            'd' => format!("{:02}", date.day()),
            'H' => format!("{:02}", date.hour()),
            'M' => format!("{:02}", date.minute()),
            'S' => format!("{:02}", date.second()),
            'L' => format!("{:03}", date.nanosecond() / 1_000_000),
            'j' => format!("{:03}", date.ordinal()),
            'w' => date.weekday().number_from_sunday().to_string(),
            'u' => date.weekday().number_from_monday().to_string(),
            'U' => format!("{:02}", sunday_week(date)),
            'V' => format!("{:02}", date.iso_week().week()),
            'G' => format!("{:04}", date.iso_week().year()),
            'z' => date.format("%z").to_string(),
            'Z' => (date.offset().local_minus_utc() / 60).to_string(),
            '%' => "%".to_string(),
            other => {
                return Err(err(format!(
                    "$dateToString: invalid format character '%{}'",
                    other
                )));
            }
        };
        out.push_str(&piece);
    }
    Ok(out)
}

fn parse_date(input: &str, format: Option<&str>, offset: FixedOffset) -> Result<DateTime<Utc>, String> {
    let fail = || format!("error parsing date string '{}'", input);
    if let Some(format) = format {
        let chrono_format = format.replace("%L", "%3f");
        if let Ok(dt) = DateTime::parse_from_str(input, &chrono_format) {
            return Ok(dt.with_timezone(&Utc));
        }
        let naive = NaiveDateTime::parse_from_str(input, &chrono_format)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(input, &chrono_format)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
            .ok_or_else(fail)?;
        return offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(fail);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(input, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(fail)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(fail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    fn eval(expr: Bson, root: &Document) -> Bson {
        evaluate(&expr, root).unwrap()
    }

    #[test]
    fn test_field_paths_and_missing() {
        let root = doc! { "a": { "b": 2 }, "items": [ { "x": 1 }, { "x": 2 } ] };
        assert_eq!(eval(Bson::String("$a.b".into()), &root), Bson::Int32(2));
        assert_eq!(
            eval(Bson::String("$items.x".into()), &root),
            Bson::Array(vec![Bson::Int32(1), Bson::Int32(2)])
        );
        assert_eq!(eval(Bson::String("$nope".into()), &root), Bson::Undefined);
    }

    #[test]
    fn test_arithmetic() {
        let root = doc! { "a": 3, "b": 4.5, "nums": [1, 2, 3, 4] };
        assert_eq!(eval(Bson::Document(doc! { "$add": ["$a", 2] }), &root), Bson::Int32(5));
        assert_eq!(eval(Bson::Document(doc! { "$add": ["$a", "$b"] }), &root), Bson::Double(7.5));
        assert_eq!(eval(Bson::Document(doc! { "$subtract": ["$a", 5] }), &root), Bson::Int32(-2));
        assert_eq!(eval(Bson::Document(doc! { "$avg": "$nums" }), &root), Bson::Double(2.5));
        assert_eq!(eval(Bson::Document(doc! { "$sum": "$nums" }), &root), Bson::Int32(10));
        assert_eq!(eval(Bson::Document(doc! { "$max": "$nums" }), &root), Bson::Int32(4));
        assert_eq!(eval(Bson::Document(doc! { "$pow": [2, 10] }), &root), Bson::Int32(1024));
        assert_eq!(eval(Bson::Document(doc! { "$mod": [10, 4] }), &root), Bson::Int32(2));
        assert!(evaluate(&Bson::Document(doc! { "$divide": [1, 0] }), &root).is_err());
    }

    #[test]
    fn test_comparison_and_conditionals() {
        let root = doc! { "n": 5 };
        assert_eq!(eval(Bson::Document(doc! { "$cmp": ["$n", 7] }), &root), Bson::Int32(-1));
        assert_eq!(eval(Bson::Document(doc! { "$cmp": ["$n", 5.0] }), &root), Bson::Int32(0));
        assert_eq!(
            eval(Bson::Document(doc! { "$cond": { "if": { "$gt": ["$n", 3] }, "then": "big", "else": "small" } }), &root),
            Bson::String("big".into())
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$ifNull": ["$missing", "fallback"] }), &root),
            Bson::String("fallback".into())
        );
        let switch = doc! { "$switch": {
            "branches": [
                { "case": { "$lt": ["$n", 0] }, "then": "negative" },
                { "case": { "$eq": ["$n", 5] }, "then": "five" },
            ],
            "default": "other",
        } };
        assert_eq!(eval(Bson::Document(switch), &root), Bson::String("five".into()));
    }

    #[test]
    fn test_slice_with_extreme_counts() {
        let root = doc! { "nums": [1, 2, 3] };
        assert_eq!(
            eval(Bson::Document(doc! { "$slice": ["$nums", 1, i64::MAX] }), &root),
            Bson::Array(vec![Bson::Int32(2), Bson::Int32(3)])
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$slice": ["$nums", i64::MIN] }), &root),
            Bson::Array(vec![Bson::Int32(1), Bson::Int32(2), Bson::Int32(3)])
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$slice": ["$nums", i64::MAX] }), &root),
            Bson::Array(vec![Bson::Int32(1), Bson::Int32(2), Bson::Int32(3)])
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$slice": ["$nums", i64::MIN, 2] }), &root),
            Bson::Array(vec![Bson::Int32(1), Bson::Int32(2)])
        );
    }

    #[test]
    fn test_array_operators() {
        let root = doc! { "tags": ["red", "blue", "red"], "nums": [1, 2, 3] };
        assert_eq!(
            eval(Bson::Document(doc! { "$indexOfArray": ["$tags", "blue"] }), &root),
            Bson::Int32(1)
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$indexOfArray": ["$tags", "green"] }), &root),
            Bson::Int32(-1)
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$in": ["red", "$tags"] }), &root),
            Bson::Boolean(true)
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$map": { "input": "$nums", "as": "n", "in": { "$multiply": ["$$n", 2] } } }), &root),
            Bson::Array(vec![Bson::Int32(2), Bson::Int32(4), Bson::Int32(6)])
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$filter": { "input": "$nums", "as": "n", "cond": { "$gte": ["$$n", 2] } } }), &root),
            Bson::Array(vec![Bson::Int32(2), Bson::Int32(3)])
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$reduce": { "input": "$nums", "initialValue": 0, "in": { "$add": ["$$value", "$$this"] } } }), &root),
            Bson::Int32(6)
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$slice": ["$nums", -2] }), &root),
            Bson::Array(vec![Bson::Int32(2), Bson::Int32(3)])
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$arrayElemAt": ["$nums", -1] }), &root),
            Bson::Int32(3)
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$size": "$tags" }), &root),
            Bson::Int32(3)
        );
    }

    #[test]
    fn test_set_operators() {
        let root = doc! {};
        assert_eq!(
            eval(Bson::Document(doc! { "$setUnion": [[1, 2], [2, 3]] }), &root),
            Bson::Array(vec![Bson::Int32(1), Bson::Int32(2), Bson::Int32(3)])
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$setDifference": [[1, 2, 3], [2]] }), &root),
            Bson::Array(vec![Bson::Int32(1), Bson::Int32(3)])
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$setEquals": [[1, 2, 2], [2, 1]] }), &root),
            Bson::Boolean(true)
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$setIsSubset": [[1], [1, 2]] }), &root),
            Bson::Boolean(true)
        );
    }

    #[test]
    fn test_string_operators() {
        let root = doc! { "s": "  Hello World  " };
        assert_eq!(
            eval(Bson::Document(doc! { "$trim": { "input": "$s" } }), &root),
            Bson::String("Hello World".into())
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$ltrim": { "input": "$s" } }), &root),
            Bson::String("Hello World  ".into())
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$toUpper": "abc" }), &root),
            Bson::String("ABC".into())
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$split": ["a,b,c", ","] }), &root),
            Bson::Array(vec!["a".into(), "b".into(), "c".into()])
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$indexOfCP": ["héllo", "l"] }), &root),
            Bson::Int32(2)
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$indexOfBytes": ["héllo", "l"] }), &root),
            Bson::Int32(3)
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$strcasecmp": ["ABC", "abc"] }), &root),
            Bson::Int32(0)
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$substrCP": ["héllo", 1, 3] }), &root),
            Bson::String("éll".into())
        );
    }

    #[test]
    fn test_convert() {
        let root = doc! { "s": "42", "bad": "x" };
        assert_eq!(
            eval(Bson::Document(doc! { "$convert": { "input": "$s", "to": "int" } }), &root),
            Bson::Int32(42)
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$convert": { "input": "$bad", "to": "int", "onError": -1 } }), &root),
            Bson::Int32(-1)
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$convert": { "input": "$missing", "to": "int", "onNull": 0 } }), &root),
            Bson::Int32(0)
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$type": "$missing" }), &root),
            Bson::String("missing".into())
        );
    }

    #[test]
    fn test_date_parts() {
        let at = Utc.with_ymd_and_hms(2020, 3, 14, 15, 9, 26).single().unwrap();
        let root = doc! { "at": bson::DateTime::from_chrono(at) };
        assert_eq!(eval(Bson::Document(doc! { "$year": { "date": "$at" } }), &root), Bson::Int32(2020));
        assert_eq!(eval(Bson::Document(doc! { "$month": { "date": "$at" } }), &root), Bson::Int32(3));
        assert_eq!(eval(Bson::Document(doc! { "$minute": { "date": "$at" } }), &root), Bson::Int32(9));
        assert_eq!(
            eval(Bson::Document(doc! { "$hour": { "date": "$at", "timezone": "+02:00" } }), &root),
            Bson::Int32(17)
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$dateToString": { "date": "$at", "format": "%Y-%m-%d" } }), &root),
            Bson::String("2020-03-14".into())
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$dateFromParts": { "year": 2020, "month": 3, "day": 14, "hour": 15, "minute": 9, "second": 26 } }), &root),
            Bson::DateTime(bson::DateTime::from_chrono(at))
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$dateFromString": { "dateString": "2020-03-14T15:09:26Z" } }), &root),
            Bson::DateTime(bson::DateTime::from_chrono(at))
        );
    }

    #[test]
    fn test_literal_and_let() {
        let root = doc! { "price": 10 };
        assert_eq!(
            eval(Bson::Document(doc! { "$literal": "$price" }), &root),
            Bson::String("$price".into())
        );
        assert_eq!(
            eval(
                Bson::Document(doc! { "$let": { "vars": { "p": "$price" }, "in": { "$multiply": ["$$p", 3] } } }),
                &root
            ),
            Bson::Int32(30)
        );
        assert!(evaluate(&Bson::Document(doc! { "$nope": 1 }), &root).is_err());
    }
}
