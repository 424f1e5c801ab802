//! Best-effort conversion of model-supplied arguments to declared types.
//!
//! Coercion never fails: unparseable numbers become NaN, missing booleans
//! become `false`, and missing strings become [`ArgValue::Absent`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    Number,
    Boolean,
    String,
}

impl ArgType {
    pub fn as_str(self) -> &'static str {
        match self {
            ArgType::Number => "number",
            ArgType::Boolean => "boolean",
            ArgType::String => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Number(f64),
    Boolean(bool),
    Text(String),
    Absent,
}

impl ArgValue {
    pub fn as_number(&self) -> f64 {
        match self {
            ArgValue::Number(n) => *n,
            _ => f64::NAN,
        }
    }

    pub fn as_bool(&self) -> bool {
        matches!(self, ArgValue::Boolean(true))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ArgValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Number(n) => write!(f, "{}", format_number(*n)),
            ArgValue::Boolean(b) => write!(f, "{b}"),
            ArgValue::Text(s) => f.write_str(s),
            ArgValue::Absent => f.write_str("null"),
        }
    }
}

/// Render a number the way it reads in a chat transcript: integral values
/// without a fractional part, infinities spelled out.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let spelled = if n > 0.0 { "Infinity" } else { "-Infinity" };
        spelled.to_string()
    } else {
        n.to_string()
    }
}

/// Arguments after coercion, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedArgs(Vec<(String, ArgValue)>);

impl TypedArgs {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.0.iter().find(|(key, _)| key == name).map(|(_, v)| v)
    }

    pub fn number(&self, name: &str) -> f64 {
        self.get(name).map_or(f64::NAN, ArgValue::as_number)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ArgValue::as_text)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Values joined with `", "`, as shown in the "Calling function" notice.
    pub fn joined_values(&self) -> String {
        self.0
            .iter()
            .map(|(_, v)| v.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromIterator<(String, ArgValue)> for TypedArgs {
    fn from_iter<I: IntoIterator<Item = (String, ArgValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub fn coerce<'a, I>(raw: &Map<String, Value>, declared: I) -> TypedArgs
where
    I: IntoIterator<Item = (&'a str, ArgType)>,
{
    declared
        .into_iter()
        .map(|(name, ty)| {
            let value = raw.get(name);
            let coerced = match ty {
                ArgType::Number => ArgValue::Number(to_number(value)),
                ArgType::Boolean => ArgValue::Boolean(to_bool(value)),
                ArgType::String => to_text(value),
            };
            (name.to_string(), coerced)
        })
        .collect()
}

fn to_number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => parse_numeric(s),
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        Some(Value::Null) => 0.0,
        _ => f64::NAN,
    }
}

fn parse_numeric(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    let lowered = trimmed.to_ascii_lowercase();
    if let Some(hex) = lowered.strip_prefix("0x") {
        return i64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64);
    }
    // Rust accepts "inf" and "nan" spellings that a numeric field should not.
    if lowered.contains("inf") || lowered.contains("nan") {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

fn to_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        _ => false,
    }
}

fn to_text(value: Option<&Value>) -> ArgValue {
    match value {
        Some(Value::String(s)) => ArgValue::Text(s.clone()),
        Some(Value::Null) | None => ArgValue::Absent,
        Some(other) => ArgValue::Text(other.to_string()),
    }
}
