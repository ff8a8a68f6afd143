//! Tagged record values and the coercion rules shared by transformation and matching.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A single field value in a raw row or canonical record.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// An instant; interpreted in UTC whenever a calendar date is needed.
    Timestamp(DateTime<Utc>),
}

/// A value could not be coerced to the type a comparison or operation needs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoercionError {
    #[error("cannot convert '{value}' to a decimal")]
    Numeric { value: String },
    #[error("unable to parse date value: {value}")]
    Date { value: String },
    #[error("unable to parse date-time value: {value}")]
    DateTime { value: String },
    #[error("unable to parse boolean value: {value}")]
    Boolean { value: String },
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null, or text that is empty after trimming.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Text rendering, `None` for null.
    pub fn to_text(&self) -> Option<String> {
        if self.is_null() {
            None
        } else {
            Some(self.to_string())
        }
    }

    /// Accepts decimals, integers and any text parseable as a decimal.
    pub fn to_decimal(&self) -> Result<Decimal, CoercionError> {
        match self {
            Value::Decimal(d) => Ok(*d),
            Value::Integer(i) => Ok(Decimal::from(*i)),
            Value::Text(s) => parse_decimal(s).ok_or_else(|| self.numeric_error()),
            _ => Err(self.numeric_error()),
        }
    }

    /// Lenient numeric view: `None` for null, blank or unparseable values.
    pub fn try_decimal(&self) -> Option<Decimal> {
        if self.is_blank() {
            return None;
        }
        self.to_decimal().ok()
    }

    /// Accepts a date, a date-time (date portion), a timestamp (UTC) or an
    /// ISO-8601 date / date-time string.
    pub fn to_date(&self) -> Result<NaiveDate, CoercionError> {
        let err = || CoercionError::Date { value: self.to_string() };
        match self {
            Value::Date(d) => Ok(*d),
            Value::DateTime(dt) => Ok(dt.date()),
            Value::Timestamp(ts) => Ok(ts.date_naive()),
            Value::Text(s) => {
                let s = s.trim();
                if let Ok(d) = NaiveDate::parse_from_str(s, DATE_FORMAT) {
                    return Ok(d);
                }
                parse_datetime(s).map(|dt| dt.date()).ok_or_else(err)
            }
            _ => Err(err()),
        }
    }

    pub fn to_datetime(&self) -> Result<NaiveDateTime, CoercionError> {
        let err = || CoercionError::DateTime { value: self.to_string() };
        match self {
            Value::DateTime(dt) => Ok(*dt),
            Value::Timestamp(ts) => Ok(ts.naive_utc()),
            Value::Date(d) => d.and_hms_opt(0, 0, 0).ok_or_else(err),
            Value::Text(s) => {
                let s = s.trim();
                if let Some(dt) = parse_datetime(s) {
                    return Ok(dt);
                }
                NaiveDate::parse_from_str(s, DATE_FORMAT)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .ok_or_else(err)
            }
            _ => Err(err()),
        }
    }

    /// Flexible boolean: `true/false/1/0/yes/no/y/n`, case-insensitive.
    pub fn to_bool(&self) -> Result<bool, CoercionError> {
        let err = || CoercionError::Boolean { value: self.to_string() };
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Integer(1) => Ok(true),
            Value::Integer(0) => Ok(false),
            Value::Decimal(d) if *d == Decimal::ONE => Ok(true),
            Value::Decimal(d) if d.is_zero() => Ok(false),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" => Ok(true),
                "false" | "0" | "no" | "n" => Ok(false),
                _ => Err(err()),
            },
            _ => Err(err()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            other => serde_json::Value::String(other.to_string()),
        }
    }

    fn numeric_error(&self) -> CoercionError {
        CoercionError::Numeric { value: self.to_string() }
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s).or_else(|_| Decimal::from_scientific(s)).ok()
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).naive_utc())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Text(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::Timestamp(ts) => f.write_str(&ts.to_rfc3339()),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => {
                    let s = n.to_string();
                    parse_decimal(&s).map(Value::Decimal).unwrap_or(Value::Text(s))
                }
            },
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Text(other.to_string()),
        }
    }
}

// Decimals and dates go out as strings so no precision is lost in JSON.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Bool(b) => serializer.serialize_bool(*b),
            other => serializer.collect_str(other),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}
