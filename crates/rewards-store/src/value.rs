//! Scalar values and records exchanged across the store boundary.
//!
//! Callers never see driver types. Parameters are bound from [`Value`] and
//! result columns are read back into [`Value`] according to a [`ValueKind`]
//! chosen by the caller. Reading a column as a kind it was not stored as
//! follows a fixed coercion table:
//!
//! | stored   | as `String`      | as `Int64`/`Int`  | as `Double`  | as `Bool`  |
//! |----------|------------------|-------------------|--------------|------------|
//! | NULL     | `""`             | `0`               | `0.0`        | `false`    |
//! | integer  | decimal text     | value             | `value as f64` | `!= 0`   |
//! | real     | 15-digit text (`64.0`, `1.0e+20`) | truncated | value | truncated `!= 0` |
//! | text     | text             | numeric prefix    | numeric prefix | prefix `!= 0` |
//!
//! `Int` reads keep only the low 32 bits, matching a 32-bit column read.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, StoreError};

/// A scalar value bound to a statement or read from a result column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// UTF-8 text.
    String(String),
    /// 64-bit signed integer.
    Int64(i64),
    /// Double-precision float.
    Double(f64),
    /// Boolean, stored as integer `0`/`1`.
    Bool(bool),
    /// SQL `NULL`.
    Null,
}

/// How a result column should be read back into a [`Value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Read as text.
    String,
    /// Read as a 32-bit integer (widened into [`Value::Int64`]).
    Int,
    /// Read as a 64-bit integer.
    Int64,
    /// Read as a double.
    Double,
    /// Read as a boolean.
    Bool,
}

impl Value {
    /// The kind that reads this value back unchanged. `Null` has none.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Self::String(_) => Some(ValueKind::String),
            Self::Int64(_) => Some(ValueKind::Int64),
            Self::Double(_) => Some(ValueKind::Double),
            Self::Bool(_) => Some(ValueKind::Bool),
            Self::Null => None,
        }
    }

    /// Convert into the native column value used for binding.
    pub fn encode(&self) -> rusqlite::types::Value {
        match self {
            Self::String(s) => rusqlite::types::Value::Text(s.clone()),
            Self::Int64(i) => rusqlite::types::Value::Integer(*i),
            Self::Double(d) => rusqlite::types::Value::Real(*d),
            Self::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
            Self::Null => rusqlite::types::Value::Null,
        }
    }

    /// Read a native column value as `kind`.
    pub fn decode(raw: ValueRef<'_>, kind: ValueKind) -> Self {
        match kind {
            ValueKind::String => Self::String(column_text(raw)),
            ValueKind::Int64 => Self::Int64(column_i64(raw)),
            ValueKind::Int => Self::Int64(i64::from(column_i64(raw) as i32)),
            ValueKind::Double => Self::Double(column_f64(raw)),
            ValueKind::Bool => Self::Bool(column_i64(raw) != 0),
        }
    }

    /// Borrow the text payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The integer payload, if this is an `Int64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// The float payload, if this is a `Double`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// The boolean payload, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Whether this is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            other => ToSqlOutput::Owned(other.encode()),
        })
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int64(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int64(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Int64 => "int64",
            Self::Double => "double",
            Self::Bool => "bool",
        };
        f.write_str(name)
    }
}

impl FromStr for ValueKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "string" | "text" => Ok(Self::String),
            "int" => Ok(Self::Int),
            "int64" => Ok(Self::Int64),
            "double" | "real" => Ok(Self::Double),
            "bool" => Ok(Self::Bool),
            other => Err(format!("unknown value kind: {other}")),
        }
    }
}

/// One result row, positional in the order of the issuing command's bindings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    /// Column values in binding order.
    pub fields: Vec<Value>,
}

impl Record {
    /// Column value at `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.fields.get(index)
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no columns.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Vec<Value>> for Record {
    fn from(fields: Vec<Value>) -> Self {
        Self { fields }
    }
}

/// Decode every column of `row` according to `bindings`.
///
/// The caller must have checked that the statement's column count equals
/// `bindings.len()`.
pub(crate) fn decode_row(row: &rusqlite::Row<'_>, bindings: &[ValueKind]) -> Result<Record> {
    let fields = bindings
        .iter()
        .enumerate()
        .map(|(idx, kind)| Ok(Value::decode(row.get_ref(idx)?, *kind)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Record { fields })
}

/// Fail with a binding mismatch when widths differ.
pub(crate) fn check_bindings(bindings: &[ValueKind], columns: usize) -> Result<()> {
    if bindings.len() == columns {
        Ok(())
    } else {
        Err(StoreError::BindingMismatch {
            expected: bindings.len(),
            actual: columns,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Column coercions
// ─────────────────────────────────────────────────────────────────────────────

fn column_text(raw: ValueRef<'_>) -> String {
    match raw {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(r) => real_to_text(r),
        ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
    }
}

fn column_i64(raw: ValueRef<'_>) -> i64 {
    match raw {
        ValueRef::Null => 0,
        ValueRef::Integer(i) => i,
        ValueRef::Real(r) => r as i64,
        ValueRef::Text(t) | ValueRef::Blob(t) => text_to_i64(&String::from_utf8_lossy(t)),
    }
}

fn column_f64(raw: ValueRef<'_>) -> f64 {
    match raw {
        ValueRef::Null => 0.0,
        ValueRef::Integer(i) => i as f64,
        ValueRef::Real(r) => r,
        ValueRef::Text(t) | ValueRef::Blob(t) => text_to_f64(&String::from_utf8_lossy(t)),
    }
}

/// Render a real as `SQLite`'s own text conversion does (`%!.15g`): 15
/// significant digits, exponent form outside `1e-4..1e15`, and always at
/// least one fractional digit.
fn real_to_text(r: f64) -> String {
    if r.is_nan() {
        return String::new();
    }
    if r.is_infinite() {
        return if r > 0.0 { "Inf".into() } else { "-Inf".into() };
    }

    let sign = if r < 0.0 { "-" } else { "" };
    let scientific = format!("{:.14e}", r.abs());
    let (mantissa, exponent) = scientific
        .split_once('e')
        .unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let digits = match digits.trim_end_matches('0') {
        "" => "0",
        trimmed => trimmed,
    };

    if !(-4..=14).contains(&exponent) {
        let (lead, rest) = digits.split_at(1);
        let rest = if rest.is_empty() { "0" } else { rest };
        let exp_sign = if exponent < 0 { '-' } else { '+' };
        return format!("{sign}{lead}.{rest}e{exp_sign}{:02}", exponent.abs());
    }
    if exponent < 0 {
        let zeros = "0".repeat((-exponent - 1) as usize);
        return format!("{sign}0.{zeros}{digits}");
    }

    let whole_len = exponent as usize + 1;
    if digits.len() <= whole_len {
        let pad = "0".repeat(whole_len - digits.len());
        format!("{sign}{digits}{pad}.0")
    } else {
        let (whole, fraction) = digits.split_at(whole_len);
        format!("{sign}{whole}.{fraction}")
    }
}

/// Longest leading slice of `text` that looks like a number.
fn numeric_prefix(text: &str) -> &str {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut saw_digits = end > digits_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let mut frac_end = end + 1;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        if frac_end > end + 1 || saw_digits {
            saw_digits = saw_digits || frac_end > end + 1;
            end = frac_end;
        }
    }

    if !saw_digits {
        return "";
    }

    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && matches!(bytes[exp_end], b'+' | b'-') {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }

    &text[..end]
}

fn text_to_i64(text: &str) -> i64 {
    let prefix = numeric_prefix(text);
    if prefix.is_empty() {
        return 0;
    }
    if prefix.contains(['.', 'e', 'E']) {
        return prefix.parse::<f64>().map_or(0, |f| f as i64);
    }
    prefix
        .parse::<i64>()
        .or_else(|_| prefix.parse::<f64>().map(|f| f as i64))
        .unwrap_or(0)
}

fn text_to_f64(text: &str) -> f64 {
    numeric_prefix(text).parse::<f64>().unwrap_or(0.0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn read_back(stored: &Value, kind: ValueKind) -> Value {
        let conn = Connection::open_in_memory().unwrap();
        conn.query_row("SELECT ?1", [stored], |row| Ok(Value::decode(row.get_ref(0)?, kind)))
            .unwrap()
    }

    #[test]
    fn null_coercions() {
        assert_eq!(read_back(&Value::Null, ValueKind::Bool), Value::Bool(false));
        assert_eq!(read_back(&Value::Null, ValueKind::Int64), Value::Int64(0));
        assert_eq!(read_back(&Value::Null, ValueKind::Int), Value::Int64(0));
        assert_eq!(read_back(&Value::Null, ValueKind::Double), Value::Double(0.0));
        assert_eq!(read_back(&Value::Null, ValueKind::String), Value::String(String::new()));
    }

    #[test]
    fn integer_coercions() {
        let stored = Value::Int64(64);
        assert_eq!(read_back(&stored, ValueKind::Bool), Value::Bool(true));
        assert_eq!(read_back(&stored, ValueKind::Double), Value::Double(64.0));
        assert_eq!(read_back(&stored, ValueKind::String), Value::String("64".into()));
        assert_eq!(read_back(&stored, ValueKind::Int), Value::Int64(64));
    }

    #[test]
    fn zero_reads_as_false() {
        assert_eq!(read_back(&Value::Int64(0), ValueKind::Bool), Value::Bool(false));
    }

    #[test]
    fn int_read_keeps_low_32_bits() {
        let stored = Value::Int64((1_i64 << 32) + 7);
        assert_eq!(read_back(&stored, ValueKind::Int), Value::Int64(7));
        assert_eq!(read_back(&stored, ValueKind::Int64), stored);
    }

    #[test]
    fn real_coercions() {
        let stored = Value::Double(64.0);
        assert_eq!(read_back(&stored, ValueKind::String), Value::String("64.0".into()));
        assert_eq!(read_back(&Value::Double(2.75), ValueKind::Int64), Value::Int64(2));
        assert_eq!(read_back(&Value::Double(0.4), ValueKind::Bool), Value::Bool(false));
    }

    #[test]
    fn real_text_uses_fifteen_significant_digits() {
        let cases = [
            (0.1 + 0.2, "0.3"),
            (1.0 / 3.0, "0.333333333333333"),
            (-2.5, "-2.5"),
            (0.0, "0.0"),
            (1e14, "100000000000000.0"),
            (1e15, "1.0e+15"),
            (1e20, "1.0e+20"),
            (2.0_f64.sqrt(), "1.4142135623731"),
            (0.0001, "0.0001"),
            (0.00001, "1.0e-05"),
            (-1.5e-300, "-1.5e-300"),
        ];
        for (real, text) in cases {
            assert_eq!(real_to_text(real), text, "{real:e}");
        }
    }

    #[test]
    fn text_coercions() {
        assert_eq!(read_back(&Value::from("42abc"), ValueKind::Int64), Value::Int64(42));
        assert_eq!(read_back(&Value::from(" 3.5"), ValueKind::Double), Value::Double(3.5));
        assert_eq!(read_back(&Value::from("3.9"), ValueKind::Int64), Value::Int64(3));
        assert_eq!(read_back(&Value::from("abc"), ValueKind::Bool), Value::Bool(false));
        assert_eq!(read_back(&Value::from("1"), ValueKind::Bool), Value::Bool(true));
    }

    #[test]
    fn bool_is_bound_as_integer() {
        let conn = Connection::open_in_memory().unwrap();
        let ty: String = conn
            .query_row("SELECT typeof(?1)", [&Value::Bool(true)], |row| row.get(0))
            .unwrap();
        assert_eq!(ty, "integer");
    }

    #[test]
    fn numeric_prefix_edges() {
        assert_eq!(numeric_prefix("-12.5e3xyz"), "-12.5e3");
        assert_eq!(numeric_prefix("1e"), "1");
        assert_eq!(numeric_prefix("."), "");
        assert_eq!(numeric_prefix("+"), "");
        assert_eq!(numeric_prefix(".5"), ".5");
    }

    #[test]
    fn kind_parses_from_cli_names() {
        assert_eq!("int64".parse::<ValueKind>().unwrap(), ValueKind::Int64);
        assert_eq!("TEXT".parse::<ValueKind>().unwrap(), ValueKind::String);
        assert!("blob".parse::<ValueKind>().is_err());
    }

    #[test]
    fn record_serializes_as_array() {
        let record = Record::from(vec![Value::from("a"), Value::Int64(1), Value::Null]);
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"["a",1,null]"#);
    }

    #[test]
    fn binding_width_checked() {
        assert!(check_bindings(&[ValueKind::String], 1).is_ok());
        assert!(matches!(
            check_bindings(&[ValueKind::String], 2),
            Err(StoreError::BindingMismatch { expected: 1, actual: 2 })
        ));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn non_null_value() -> impl Strategy<Value = Value> {
            prop_oneof![
                ".*".prop_map(Value::String),
                any::<i64>().prop_map(Value::Int64),
                any::<f64>()
                    .prop_filter("finite", |d| d.is_finite())
                    .prop_map(Value::Double),
                any::<bool>().prop_map(Value::Bool),
            ]
        }

        proptest! {
            #[test]
            fn decode_of_encode_is_identity(v in non_null_value()) {
                let kind = v.kind().unwrap();
                let conn = Connection::open_in_memory().unwrap();
                let back = conn
                    .query_row("SELECT ?1", [&v], |row| Ok(Value::decode(row.get_ref(0)?, kind)))
                    .unwrap();
                prop_assert_eq!(back, v);
            }
        }
    }
}
