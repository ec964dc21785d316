//! Aggregation expression constructors.
//!
//! Expressions are pure values: composing them never touches the store. Each
//! constructor wraps its inputs in an operator-tagged node, keeping the
//! operator's arity (a single operand, an argument array, or a named-argument
//! document) and emitting optional operands only when supplied.
//!
//! The constructors are grouped by operator family, the way the store
//! documents them.
//!
//! ```rust
//! use docwrap_query::expression::{self, array, math};
//!
//! // { "$avg": "$favoriteNumbers" }
//! let average = math::avg(expression::field("favoriteNumbers"));
//!
//! // { "$indexOfArray": [ "$tags", "red" ] }
//! let position = array::index_of(expression::field("tags"), "red", None, None);
//! # let _ = (average, position);
//! ```

use crate::types::BsonType;
use crate::value::{Document, Value};

/// Projection flag keeping a field.
pub const INCLUDE: bool = true;

/// Projection flag dropping a field.
pub const EXCLUDE: bool = false;

/// A computation usable inside aggregation stages.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression(Value);

impl Expression {
    /// Wrap a raw value as an expression.
    pub fn from_value(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    /// Get the wrapped value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consume the expression, returning the wrapped value.
    pub fn into_value(self) -> Value {
        self.0
    }
}

fn node(operator: &str, operand: impl Into<Value>) -> Expression {
    Expression(Value::single(operator, operand))
}

fn args<const N: usize>(operator: &str, operands: [Value; N]) -> Expression {
    node(operator, Value::Array(operands.into()))
}

fn list<V: Into<Value>>(operator: &str, operands: impl IntoIterator<Item = V>) -> Expression {
    node(
        operator,
        Value::Array(operands.into_iter().map(Into::into).collect()),
    )
}

/// Build a named-argument node, dropping arguments that were not supplied.
fn named<const N: usize>(operator: &str, fields: [(&str, Option<Value>); N]) -> Expression {
    let doc: Document = fields
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name.to_string(), v)))
        .collect();
    node(operator, Value::Document(doc))
}

/// Build `[a, b, start?, end?]`; `start` defaults to 0 when only `end` is given.
fn search_args(
    operator: &str,
    haystack: Value,
    needle: Value,
    start: Option<Value>,
    end: Option<Value>,
) -> Expression {
    let mut operands = vec![haystack, needle];
    match (start, end) {
        (Some(start), Some(end)) => operands.extend([start, end]),
        (Some(start), None) => operands.push(start),
        (None, Some(end)) => operands.extend([Value::Int(0), end]),
        (None, None) => {}
    }
    node(operator, Value::Array(operands))
}

/// Reference a field of the current document (`"$path"`).
pub fn field(path: &str) -> Expression {
    Expression(Value::String(format!("${}", path)))
}

/// Reference a variable bound by `$let`, `$map`, `$filter` or `$reduce` (`"$$name"`).
pub fn variable(name: &str) -> Expression {
    Expression(Value::String(format!("$${}", name)))
}

/// Use a value as-is, without interpreting `$`-prefixed strings or operators.
pub fn literal(value: impl Into<Value>) -> Expression {
    node("$literal", value)
}

/// Bind variables for use inside `body`.
pub fn let_vars(vars: Document, body: impl Into<Value>) -> Expression {
    named("$let", [("vars", Some(vars.into())), ("in", Some(body.into()))])
}

/// An array of integers from `start` (inclusive) to `end` (exclusive).
pub fn range(start: impl Into<Value>, end: impl Into<Value>, step: Option<Value>) -> Expression {
    let mut operands = vec![start.into(), end.into()];
    operands.extend(step);
    node("$range", Value::Array(operands))
}

/// The relevance score of a `$text` match.
pub fn meta_text_score() -> Expression {
    node("$meta", "textScore")
}

/// Arithmetic operators.
pub mod math {
    use super::*;

    /// Absolute value.
    pub fn abs(n: impl Into<Value>) -> Expression {
        node("$abs", n)
    }

    /// Sum of all operands (numbers, or a date plus milliseconds).
    pub fn add<V: Into<Value>>(operands: impl IntoIterator<Item = V>) -> Expression {
        list("$add", operands)
    }

    /// Average of an array-valued expression.
    pub fn avg(expression: impl Into<Value>) -> Expression {
        node("$avg", expression)
    }

    /// Smallest integer greater than or equal to `n`.
    pub fn ceil(n: impl Into<Value>) -> Expression {
        node("$ceil", n)
    }

    /// `numerator / denominator`.
    pub fn divide(numerator: impl Into<Value>, denominator: impl Into<Value>) -> Expression {
        args("$divide", [numerator.into(), denominator.into()])
    }

    /// e raised to `n`.
    pub fn exp(n: impl Into<Value>) -> Expression {
        node("$exp", n)
    }

    /// Largest integer less than or equal to `n`.
    pub fn floor(n: impl Into<Value>) -> Expression {
        node("$floor", n)
    }

    /// `n` with its fractional part removed.
    pub fn trunc(n: impl Into<Value>) -> Expression {
        node("$trunc", n)
    }

    /// Natural logarithm.
    pub fn ln(n: impl Into<Value>) -> Expression {
        node("$ln", n)
    }

    /// Logarithm of `n` in `base`.
    pub fn log(n: impl Into<Value>, base: impl Into<Value>) -> Expression {
        args("$log", [n.into(), base.into()])
    }

    /// Base-10 logarithm.
    pub fn log10(n: impl Into<Value>) -> Expression {
        node("$log10", n)
    }

    /// Remainder of `numerator / denominator`.
    pub fn modulo(numerator: impl Into<Value>, denominator: impl Into<Value>) -> Expression {
        args("$mod", [numerator.into(), denominator.into()])
    }

    /// Product of all operands.
    pub fn multiply<V: Into<Value>>(operands: impl IntoIterator<Item = V>) -> Expression {
        list("$multiply", operands)
    }

    /// `base` raised to `exponent`.
    pub fn pow(base: impl Into<Value>, exponent: impl Into<Value>) -> Expression {
        args("$pow", [base.into(), exponent.into()])
    }

    /// Square root.
    pub fn sqrt(n: impl Into<Value>) -> Expression {
        node("$sqrt", n)
    }

    /// Population standard deviation.
    pub fn std_dev_pop(expression: impl Into<Value>) -> Expression {
        node("$stdDevPop", expression)
    }

    /// Sample standard deviation.
    pub fn std_dev_samp(expression: impl Into<Value>) -> Expression {
        node("$stdDevSamp", expression)
    }

    /// `a - b` (numbers or dates).
    pub fn subtract(a: impl Into<Value>, b: impl Into<Value>) -> Expression {
        args("$subtract", [a.into(), b.into()])
    }

    /// Sum of all operands; array operands contribute their numeric items.
    pub fn sum<V: Into<Value>>(operands: impl IntoIterator<Item = V>) -> Expression {
        list("$sum", operands)
    }
}

/// Array operators.
pub mod array {
    use super::*;

    /// True if no element of the array is false, null, 0 or undefined.
    pub fn all_elements_true(array: impl Into<Value>) -> Expression {
        args("$allElementsTrue", [array.into()])
    }

    /// True if any element of the array is truthy.
    pub fn any_element_true(array: impl Into<Value>) -> Expression {
        args("$anyElementTrue", [array.into()])
    }

    /// Element at `index` (negative counts from the end).
    pub fn element_at(array: impl Into<Value>, index: impl Into<Value>) -> Expression {
        args("$arrayElemAt", [array.into(), index.into()])
    }

    /// Document built from `[k, v]` pairs or `{k, v}` documents.
    pub fn to_object(array: impl Into<Value>) -> Expression {
        node("$arrayToObject", array)
    }

    /// Concatenation of all array operands.
    pub fn concat<V: Into<Value>>(arrays: impl IntoIterator<Item = V>) -> Expression {
        list("$concatArrays", arrays)
    }

    /// Elements of `input` for which `cond` holds, with each bound to `$$as`.
    pub fn filter(input: impl Into<Value>, as_var: &str, cond: impl Into<Value>) -> Expression {
        named(
            "$filter",
            [
                ("input", Some(input.into())),
                ("as", Some(Value::from(as_var))),
                ("cond", Some(cond.into())),
            ],
        )
    }

    /// True if the operand is an array.
    pub fn is_array(expression: impl Into<Value>) -> Expression {
        args("$isArray", [expression.into()])
    }

    /// Number of elements.
    pub fn size(array: impl Into<Value>) -> Expression {
        node("$size", array)
    }

    /// `n` elements starting at `position`.
    pub fn slice(array: impl Into<Value>, position: impl Into<Value>, n: impl Into<Value>) -> Expression {
        args("$slice", [array.into(), position.into(), n.into()])
    }

    /// Transpose the input arrays.
    ///
    /// `defaults` is only meaningful with `use_longest_length`.
    pub fn zip<V: Into<Value>>(
        inputs: impl IntoIterator<Item = V>,
        use_longest_length: bool,
        defaults: Option<Value>,
    ) -> Expression {
        let inputs = Value::Array(inputs.into_iter().map(Into::into).collect());
        named(
            "$zip",
            [
                ("inputs", Some(inputs)),
                ("useLongestLength", Some(Value::Bool(use_longest_length))),
                ("defaults", defaults),
            ],
        )
    }

    /// True if `search` is an element of `array`.
    pub fn contains(array: impl Into<Value>, search: impl Into<Value>) -> Expression {
        args("$in", [search.into(), array.into()])
    }

    /// Index of the first element equal to `search`, or -1.
    pub fn index_of(
        array: impl Into<Value>,
        search: impl Into<Value>,
        start: Option<Value>,
        end: Option<Value>,
    ) -> Expression {
        search_args("$indexOfArray", array.into(), search.into(), start, end)
    }

    /// Apply `body` to each element bound to `$$as`.
    pub fn map(input: impl Into<Value>, as_var: &str, body: impl Into<Value>) -> Expression {
        named(
            "$map",
            [
                ("input", Some(input.into())),
                ("as", Some(Value::from(as_var))),
                ("in", Some(body.into())),
            ],
        )
    }

    /// Largest element.
    pub fn max(expression: impl Into<Value>) -> Expression {
        node("$max", expression)
    }

    /// Smallest element.
    pub fn min(expression: impl Into<Value>) -> Expression {
        node("$min", expression)
    }

    /// Merge an array of documents into one.
    pub fn merge_objects(expression: impl Into<Value>) -> Expression {
        node("$mergeObjects", expression)
    }

    /// Fold the array with `body`, using `$$value` and `$$this`.
    pub fn reduce(
        input: impl Into<Value>,
        initial_value: impl Into<Value>,
        body: impl Into<Value>,
    ) -> Expression {
        named(
            "$reduce",
            [
                ("input", Some(input.into())),
                ("initialValue", Some(initial_value.into())),
                ("in", Some(body.into())),
            ],
        )
    }

    /// The array in reverse order.
    pub fn reverse(array: impl Into<Value>) -> Expression {
        node("$reverseArray", array)
    }
}

/// Set operators. Arrays are treated as sets: order and duplicates do not matter.
pub mod set {
    use super::*;

    /// Distinct elements of `a` missing from `b`.
    pub fn difference(a: impl Into<Value>, b: impl Into<Value>) -> Expression {
        args("$setDifference", [a.into(), b.into()])
    }

    /// True if all arrays hold the same distinct elements.
    pub fn equals<V: Into<Value>>(arrays: impl IntoIterator<Item = V>) -> Expression {
        list("$setEquals", arrays)
    }

    /// Distinct elements present in every array.
    pub fn intersection<V: Into<Value>>(arrays: impl IntoIterator<Item = V>) -> Expression {
        list("$setIntersection", arrays)
    }

    /// True if every element of `a` is in `b`.
    pub fn is_subset(a: impl Into<Value>, b: impl Into<Value>) -> Expression {
        args("$setIsSubset", [a.into(), b.into()])
    }

    /// Distinct elements of all arrays.
    pub fn union<V: Into<Value>>(arrays: impl IntoIterator<Item = V>) -> Expression {
        list("$setUnion", arrays)
    }
}

/// String operators.
pub mod string {
    use super::*;

    /// Concatenation of all string operands.
    pub fn concat<V: Into<Value>>(strings: impl IntoIterator<Item = V>) -> Expression {
        list("$concat", strings)
    }

    /// Remove `chars` (whitespace when absent) from both ends.
    pub fn trim(input: impl Into<Value>, chars: Option<Value>) -> Expression {
        named("$trim", [("input", Some(input.into())), ("chars", chars)])
    }

    /// Remove `chars` (whitespace when absent) from the start.
    pub fn trim_start(input: impl Into<Value>, chars: Option<Value>) -> Expression {
        named("$ltrim", [("input", Some(input.into())), ("chars", chars)])
    }

    /// Remove `chars` (whitespace when absent) from the end.
    pub fn trim_end(input: impl Into<Value>, chars: Option<Value>) -> Expression {
        named("$rtrim", [("input", Some(input.into())), ("chars", chars)])
    }

    /// UTF-8 byte index of the first occurrence of `substring`, or -1.
    pub fn index_of_bytes(
        string: impl Into<Value>,
        substring: impl Into<Value>,
        start: Option<Value>,
        end: Option<Value>,
    ) -> Expression {
        search_args("$indexOfBytes", string.into(), substring.into(), start, end)
    }

    /// Code point index of the first occurrence of `substring`, or -1.
    pub fn index_of_code_points(
        string: impl Into<Value>,
        substring: impl Into<Value>,
        start: Option<Value>,
        end: Option<Value>,
    ) -> Expression {
        search_args("$indexOfCP", string.into(), substring.into(), start, end)
    }

    /// Split at every occurrence of `delimiter`.
    pub fn split(string: impl Into<Value>, delimiter: impl Into<Value>) -> Expression {
        args("$split", [string.into(), delimiter.into()])
    }

    /// Case-insensitive comparison: -1, 0 or 1.
    pub fn case_compare(a: impl Into<Value>, b: impl Into<Value>) -> Expression {
        args("$strcasecmp", [a.into(), b.into()])
    }

    /// Length in UTF-8 bytes.
    pub fn len_bytes(string: impl Into<Value>) -> Expression {
        node("$strLenBytes", string)
    }

    /// Length in code points.
    pub fn len_code_points(string: impl Into<Value>) -> Expression {
        node("$strLenCP", string)
    }

    /// `length` bytes starting at byte `start` (deprecated alias of `substr_bytes`).
    pub fn substr(string: impl Into<Value>, start: impl Into<Value>, length: impl Into<Value>) -> Expression {
        args("$substr", [string.into(), start.into(), length.into()])
    }

    /// `count` bytes starting at byte `index`.
    pub fn substr_bytes(
        string: impl Into<Value>,
        index: impl Into<Value>,
        count: impl Into<Value>,
    ) -> Expression {
        args("$substrBytes", [string.into(), index.into(), count.into()])
    }

    /// `count` code points starting at code point `index`.
    pub fn substr_code_points(
        string: impl Into<Value>,
        index: impl Into<Value>,
        count: impl Into<Value>,
    ) -> Expression {
        args("$substrCP", [string.into(), index.into(), count.into()])
    }

    /// Lowercase.
    pub fn to_lower(string: impl Into<Value>) -> Expression {
        node("$toLower", string)
    }

    /// Uppercase.
    pub fn to_upper(string: impl Into<Value>) -> Expression {
        node("$toUpper", string)
    }
}

/// Date operators.
pub mod date {
    use super::*;

    /// Calendar parts for [`from_parts`]. Unset parts are omitted.
    #[derive(Debug, Clone, Default)]
    pub struct DateParts {
        /// Calendar year.
        pub year: Option<Value>,
        /// Month (1-12).
        pub month: Option<Value>,
        /// Day of month.
        pub day: Option<Value>,
        /// Hour.
        pub hour: Option<Value>,
        /// Minute.
        pub minute: Option<Value>,
        /// Second.
        pub second: Option<Value>,
        /// Millisecond.
        pub millisecond: Option<Value>,
        /// Olson timezone or UTC offset.
        pub timezone: Option<Value>,
    }

    /// ISO week-date parts for [`from_iso_parts`]. Unset parts are omitted.
    #[derive(Debug, Clone, Default)]
    pub struct IsoDateParts {
        /// ISO week-numbering year.
        pub iso_week_year: Option<Value>,
        /// ISO week (1-53).
        pub iso_week: Option<Value>,
        /// ISO day of week (1 = Monday).
        pub iso_day_of_week: Option<Value>,
        /// Hour.
        pub hour: Option<Value>,
        /// Minute.
        pub minute: Option<Value>,
        /// Second.
        pub second: Option<Value>,
        /// Millisecond.
        pub millisecond: Option<Value>,
        /// Olson timezone or UTC offset.
        pub timezone: Option<Value>,
    }

    /// Build a date from calendar parts.
    pub fn from_parts(parts: DateParts) -> Expression {
        named(
            "$dateFromParts",
            [
                ("year", parts.year),
                ("month", parts.month),
                ("day", parts.day),
                ("hour", parts.hour),
                ("minute", parts.minute),
                ("second", parts.second),
                ("millisecond", parts.millisecond),
                ("timezone", parts.timezone),
            ],
        )
    }

    /// Build a date from ISO week-date parts.
    pub fn from_iso_parts(parts: IsoDateParts) -> Expression {
        named(
            "$dateFromParts",
            [
                ("isoWeekYear", parts.iso_week_year),
                ("isoWeek", parts.iso_week),
                ("isoDayOfWeek", parts.iso_day_of_week),
                ("hour", parts.hour),
                ("minute", parts.minute),
                ("second", parts.second),
                ("millisecond", parts.millisecond),
                ("timezone", parts.timezone),
            ],
        )
    }

    /// Parse a date string. `on_error` and `on_null` are emitted only when given.
    pub fn from_string(
        date_string: impl Into<Value>,
        format: Option<Value>,
        timezone: Option<Value>,
        on_error: Option<Value>,
        on_null: Option<Value>,
    ) -> Expression {
        named(
            "$dateFromString",
            [
                ("dateString", Some(date_string.into())),
                ("format", format),
                ("timezone", timezone),
                ("onError", on_error),
                ("onNull", on_null),
            ],
        )
    }

    /// Format a date. `on_null` is emitted only when given.
    pub fn to_string(
        date: impl Into<Value>,
        format: Option<Value>,
        timezone: Option<Value>,
        on_null: Option<Value>,
    ) -> Expression {
        named(
            "$dateToString",
            [
                ("date", Some(date.into())),
                ("format", format),
                ("timezone", timezone),
                ("onNull", on_null),
            ],
        )
    }

    fn part(operator: &str, date: Value, timezone: Option<&str>) -> Expression {
        named(
            operator,
            [("date", Some(date)), ("timezone", timezone.map(Value::from))],
        )
    }

    /// Day of the month (1-31).
    pub fn day_of_month(date: impl Into<Value>, timezone: Option<&str>) -> Expression {
        part("$dayOfMonth", date.into(), timezone)
    }

    /// Day of the week (1 = Sunday).
    pub fn day_of_week(date: impl Into<Value>, timezone: Option<&str>) -> Expression {
        part("$dayOfWeek", date.into(), timezone)
    }

    /// Day of the year (1-366).
    pub fn day_of_year(date: impl Into<Value>, timezone: Option<&str>) -> Expression {
        part("$dayOfYear", date.into(), timezone)
    }

    /// Hour (0-23).
    pub fn hour(date: impl Into<Value>, timezone: Option<&str>) -> Expression {
        part("$hour", date.into(), timezone)
    }

    /// ISO day of the week (1 = Monday).
    pub fn iso_day_of_week(date: impl Into<Value>, timezone: Option<&str>) -> Expression {
        part("$isoDayOfWeek", date.into(), timezone)
    }

    /// ISO week number (1-53).
    pub fn iso_week(date: impl Into<Value>, timezone: Option<&str>) -> Expression {
        part("$isoWeek", date.into(), timezone)
    }

    /// ISO week-numbering year.
    pub fn iso_week_year(date: impl Into<Value>, timezone: Option<&str>) -> Expression {
        part("$isoWeekYear", date.into(), timezone)
    }

    /// Millisecond (0-999).
    pub fn millisecond(date: impl Into<Value>, timezone: Option<&str>) -> Expression {
        part("$millisecond", date.into(), timezone)
    }

    /// Second (0-60).
    pub fn second(date: impl Into<Value>, timezone: Option<&str>) -> Expression {
        part("$second", date.into(), timezone)
    }

    /// Minute (0-59).
    pub fn minute(date: impl Into<Value>, timezone: Option<&str>) -> Expression {
        part("$minute", date.into(), timezone)
    }

    /// Month (1-12).
    pub fn month(date: impl Into<Value>, timezone: Option<&str>) -> Expression {
        part("$month", date.into(), timezone)
    }

    /// Week of the year (0-53, weeks start on Sunday).
    pub fn week(date: impl Into<Value>, timezone: Option<&str>) -> Expression {
        part("$week", date.into(), timezone)
    }

    /// Year.
    pub fn year(date: impl Into<Value>, timezone: Option<&str>) -> Expression {
        part("$year", date.into(), timezone)
    }
}

/// Boolean, comparison and conditional operators.
pub mod logic {
    use super::*;

    /// True if every operand is truthy.
    pub fn and<V: Into<Value>>(expressions: impl IntoIterator<Item = V>) -> Expression {
        list("$and", expressions)
    }

    /// True if any operand is truthy.
    pub fn or<V: Into<Value>>(expressions: impl IntoIterator<Item = V>) -> Expression {
        list("$or", expressions)
    }

    /// Negation.
    pub fn not(expression: impl Into<Value>) -> Expression {
        args("$not", [expression.into()])
    }

    /// `then` if `condition` is truthy, otherwise `otherwise`.
    pub fn cond(
        condition: impl Into<Value>,
        then: impl Into<Value>,
        otherwise: impl Into<Value>,
    ) -> Expression {
        named(
            "$cond",
            [
                ("if", Some(condition.into())),
                ("then", Some(then.into())),
                ("else", Some(otherwise.into())),
            ],
        )
    }

    /// -1 if `a < b`, 1 if `a > b`, 0 if equivalent.
    pub fn cmp(a: impl Into<Value>, b: impl Into<Value>) -> Expression {
        args("$cmp", [a.into(), b.into()])
    }

    /// `a == b`.
    pub fn eq(a: impl Into<Value>, b: impl Into<Value>) -> Expression {
        args("$eq", [a.into(), b.into()])
    }

    /// `a != b`.
    pub fn ne(a: impl Into<Value>, b: impl Into<Value>) -> Expression {
        args("$ne", [a.into(), b.into()])
    }

    /// `a > b`.
    pub fn gt(a: impl Into<Value>, b: impl Into<Value>) -> Expression {
        args("$gt", [a.into(), b.into()])
    }

    /// `a >= b`.
    pub fn gte(a: impl Into<Value>, b: impl Into<Value>) -> Expression {
        args("$gte", [a.into(), b.into()])
    }

    /// `a < b`.
    pub fn lt(a: impl Into<Value>, b: impl Into<Value>) -> Expression {
        args("$lt", [a.into(), b.into()])
    }

    /// `a <= b`.
    pub fn lte(a: impl Into<Value>, b: impl Into<Value>) -> Expression {
        args("$lte", [a.into(), b.into()])
    }

    /// `expression`, or `replacement` when it is null or missing.
    pub fn if_null(expression: impl Into<Value>, replacement: impl Into<Value>) -> Expression {
        args("$ifNull", [expression.into(), replacement.into()])
    }

    /// One `case`/`then` pair of a [`switch`].
    #[derive(Debug, Clone, PartialEq)]
    pub struct SwitchBranch {
        /// Condition.
        pub case: Value,
        /// Result when the condition holds.
        pub then: Value,
    }

    impl SwitchBranch {
        /// Create a branch.
        pub fn new(case: impl Into<Value>, then: impl Into<Value>) -> Self {
            Self {
                case: case.into(),
                then: then.into(),
            }
        }
    }

    /// The `then` of the first branch whose `case` holds, else `default`.
    pub fn switch(
        default: impl Into<Value>,
        branches: impl IntoIterator<Item = SwitchBranch>,
    ) -> Expression {
        let branches = branches
            .into_iter()
            .map(|b| {
                let mut doc = Document::with_capacity(2);
                doc.insert("case".to_string(), b.case);
                doc.insert("then".to_string(), b.then);
                Value::Document(doc)
            })
            .collect::<Vec<_>>();
        named(
            "$switch",
            [
                ("branches", Some(Value::Array(branches))),
                ("default", Some(default.into())),
            ],
        )
    }
}

/// Type inspection and conversion operators.
pub mod types {
    use super::*;

    /// Type alias of the operand, e.g. `"string"`.
    pub fn type_of(value: impl Into<Value>) -> Expression {
        node("$type", value)
    }

    /// Convert to `to`. `on_error` and `on_null` are emitted only when given.
    pub fn convert(
        input: impl Into<Value>,
        to: BsonType,
        on_error: Option<Value>,
        on_null: Option<Value>,
    ) -> Expression {
        named(
            "$convert",
            [
                ("input", Some(input.into())),
                ("to", Some(to.into())),
                ("onError", on_error),
                ("onNull", on_null),
            ],
        )
    }

    /// Convert to boolean.
    pub fn to_bool(value: impl Into<Value>) -> Expression {
        node("$toBool", value)
    }

    /// Convert to date.
    pub fn to_date(value: impl Into<Value>) -> Expression {
        node("$toDate", value)
    }

    /// Convert to decimal.
    pub fn to_decimal(value: impl Into<Value>) -> Expression {
        node("$toDecimal", value)
    }

    /// Convert to double.
    pub fn to_double(value: impl Into<Value>) -> Expression {
        node("$toDouble", value)
    }

    /// Convert to 32-bit integer.
    pub fn to_int(value: impl Into<Value>) -> Expression {
        node("$toInt", value)
    }

    /// Convert to 64-bit integer.
    pub fn to_long(value: impl Into<Value>) -> Expression {
        node("$toLong", value)
    }

    /// Convert a 24-character hex string to an identifier.
    pub fn to_object_id(value: impl Into<Value>) -> Expression {
        node("$toObjectId", value)
    }

    /// Convert to string.
    pub fn to_string(value: impl Into<Value>) -> Expression {
        node("$toString", value)
    }

    /// Turn a document into an array of `{k, v}` documents.
    pub fn object_to_array(expression: impl Into<Value>) -> Expression {
        node("$objectToArray", expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document;
    use pretty_assertions::assert_eq;

    fn plain(expr: Expression) -> Value {
        Value::from(expr).into_plain()
    }

    #[test]
    fn test_field_and_variable() {
        assert_eq!(plain(field("a.b")), Value::from("$a.b"));
        assert_eq!(plain(variable("this")), Value::from("$$this"));
    }

    #[test]
    fn test_binary_operator_keeps_argument_order() {
        let expr = math::subtract(field("total"), 5);
        assert_eq!(
            plain(expr),
            Value::from(document! {
                "$subtract" => vec![Value::from("$total"), Value::from(5)]
            })
        );
    }

    #[test]
    fn test_index_of_array_puts_array_first() {
        let expr = array::index_of(field("tags"), "red", None, Some(Value::from(3)));
        assert_eq!(
            plain(expr),
            Value::from(document! {
                "$indexOfArray" => vec![
                    Value::from("$tags"),
                    Value::from("red"),
                    Value::from(0),
                    Value::from(3),
                ]
            })
        );
    }

    #[test]
    fn test_contains_puts_search_first() {
        let expr = array::contains(field("tags"), "red");
        assert_eq!(
            plain(expr),
            Value::from(document! {
                "$in" => vec![Value::from("red"), Value::from("$tags")]
            })
        );
    }

    #[test]
    fn test_convert_omits_absent_optionals() {
        let expr = types::convert(field("age"), BsonType::Int, None, Some(Value::from(0)));
        assert_eq!(
            plain(expr),
            Value::from(document! {
                "$convert" => document! {
                    "input" => "$age",
                    "to" => "int",
                    "onNull" => 0,
                }
            })
        );
    }

    #[test]
    fn test_date_parts_use_correct_operators() {
        let month = plain(date::month(field("createdAt"), None));
        assert!(month.as_document().unwrap().contains_key("$month"));

        let hour = plain(date::hour(field("createdAt"), Some("Europe/Amsterdam")));
        let inner = hour.as_document().unwrap().get("$hour").unwrap();
        assert_eq!(
            inner.as_document().unwrap().get("timezone"),
            Some(&Value::from("Europe/Amsterdam"))
        );
    }

    #[test]
    fn test_trim_variants() {
        assert!(plain(string::trim(field("s"), None)).as_document().unwrap().contains_key("$trim"));
        assert!(plain(string::trim_start(field("s"), None)).as_document().unwrap().contains_key("$ltrim"));
        assert!(plain(string::trim_end(field("s"), None)).as_document().unwrap().contains_key("$rtrim"));
    }

    #[test]
    fn test_switch_branches() {
        let expr = logic::switch(
            "other",
            [
                logic::SwitchBranch::new(logic::lt(field("n"), 0), "negative"),
                logic::SwitchBranch::new(logic::eq(field("n"), 0), "zero"),
            ],
        );
        let value = plain(expr);
        let switch = value.as_document().unwrap().get("$switch").unwrap().as_document().unwrap();
        assert_eq!(switch.get("branches").unwrap().as_array().unwrap().len(), 2);
        assert_eq!(switch.get("default"), Some(&Value::from("other")));
    }

    #[test]
    fn test_cmp_is_binary() {
        let value = plain(logic::cmp(field("a"), field("b")));
        let operands = value.as_document().unwrap().get("$cmp").unwrap().as_array().unwrap();
        assert_eq!(operands.len(), 2);
    }

    #[test]
    fn test_range_optional_step() {
        let without = plain(range(0, 10, None));
        assert_eq!(
            without.as_document().unwrap().get("$range").unwrap().as_array().unwrap().len(),
            2
        );
        let with = plain(range(0, 10, Some(Value::from(2))));
        assert_eq!(
            with.as_document().unwrap().get("$range").unwrap().as_array().unwrap().len(),
            3
        );
    }
}
