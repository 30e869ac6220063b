//! Dynamic argument values
//!
//! Phase arguments are untyped: each is a [`Value`] (null, bool, number,
//! string, list or mapping). [`FromArg`] is the explicit conversion from a
//! dynamic value into a semantic target type. Conversions never coerce: a
//! string `"5"` is not a number and a number is not a string.

use std::collections::{BTreeMap, HashMap};

pub use serde_json::{Map, Value};

/// Argument bag of one phase
pub type ArgMap = BTreeMap<String, Value>;

/// Output bag produced by one phase
pub type OutputMap = BTreeMap<String, Value>;

/// Name of the dynamic kind of a value, used in type mismatch errors
#[must_use]
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

/// Conversion from a dynamic value into a typed argument
pub trait FromArg: Sized {
    /// Human-readable name of the target type
    const EXPECTED: &'static str;

    /// Convert, returning `None` when the value has the wrong shape
    fn from_arg(value: &Value) -> Option<Self>;
}

impl FromArg for Value {
    const EXPECTED: &'static str = "any";

    fn from_arg(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromArg for String {
    const EXPECTED: &'static str = "string";

    fn from_arg(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl FromArg for bool {
    const EXPECTED: &'static str = "bool";

    fn from_arg(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromArg for i64 {
    const EXPECTED: &'static str = "integer";

    fn from_arg(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromArg for u64 {
    const EXPECTED: &'static str = "unsigned integer";

    fn from_arg(value: &Value) -> Option<Self> {
        value.as_u64()
    }
}

impl FromArg for f64 {
    const EXPECTED: &'static str = "number";

    fn from_arg(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

/// Optional reference: null maps to `None`, a string to `Some`
impl FromArg for Option<String> {
    const EXPECTED: &'static str = "string or null";

    fn from_arg(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            Value::String(s) => Some(Some(s.clone())),
            _ => None,
        }
    }
}

impl FromArg for Vec<String> {
    const EXPECTED: &'static str = "list of strings";

    fn from_arg(value: &Value) -> Option<Self> {
        value
            .as_array()?
            .iter()
            .map(|v| v.as_str().map(str::to_owned))
            .collect()
    }
}

impl FromArg for BTreeMap<String, String> {
    const EXPECTED: &'static str = "mapping of strings";

    fn from_arg(value: &Value) -> Option<Self> {
        value
            .as_object()?
            .iter()
            .map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_owned())))
            .collect()
    }
}

impl FromArg for HashMap<String, String> {
    const EXPECTED: &'static str = "mapping of strings";

    fn from_arg(value: &Value) -> Option<Self> {
        BTreeMap::<String, String>::from_arg(value).map(|m| m.into_iter().collect())
    }
}

impl FromArg for Map<String, Value> {
    const EXPECTED: &'static str = "mapping";

    fn from_arg(value: &Value) -> Option<Self> {
        value.as_object().cloned()
    }
}
