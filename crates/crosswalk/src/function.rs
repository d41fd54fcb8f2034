//! External value-conversion functions.
//!
//! The engine only knows the [`FunctionInvoker`] trait. [`FunctionRegistry`]
//! is a closure-backed implementation with a set of generic builtins.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Argument that carries the value being converted.
pub const INPUT_ARG: &str = "input";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionError {
    UnknownFunction(String),
    InvalidArgument { function: String, message: String },
    Failed { function: String, message: String },
}

impl FunctionError {
    pub fn invalid_argument(function: &str, message: impl Into<String>) -> Self {
        FunctionError::InvalidArgument {
            function: function.to_string(),
            message: message.into(),
        }
    }

    pub fn failed(function: &str, message: impl Into<String>) -> Self {
        FunctionError::Failed {
            function: function.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FunctionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionError::UnknownFunction(id) => write!(f, "unknown function: {}", id),
            FunctionError::InvalidArgument { function, message } => {
                write!(f, "{}: invalid argument: {}", function, message)
            }
            FunctionError::Failed { function, message } => write!(f, "{}: {}", function, message),
        }
    }
}

impl std::error::Error for FunctionError {}

/// Executes a named pure function with keyword arguments.
///
/// Implementations are shared across concurrent transforms.
pub trait FunctionInvoker: Send + Sync {
    fn execute(
        &self,
        function_id: &str,
        args: &JsonMap<String, JsonValue>,
    ) -> Result<JsonValue, FunctionError>;
}

type FunctionImpl =
    Arc<dyn Fn(&JsonMap<String, JsonValue>) -> Result<JsonValue, FunctionError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionImpl>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the builtin string, number and date functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register("trim", |args| map_string("trim", args, |s| s.trim().to_string()))
            .register("lowercase", |args| map_string("lowercase", args, |s| s.to_lowercase()))
            .register("uppercase", |args| map_string("uppercase", args, |s| s.to_uppercase()))
            .register("to_string", to_string)
            .register("to_number", to_number)
            .register("concat", concat)
            .register("add", |args| arithmetic("add", args, |a, b| a + b))
            .register("multiply", |args| arithmetic("multiply", args, |a, b| a * b))
            .register("default", default_value)
            .register("replace", replace)
            .register("format_date", format_date);
        registry
    }

    pub fn register<F>(&mut self, function_id: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(&JsonMap<String, JsonValue>) -> Result<JsonValue, FunctionError>
            + Send
            + Sync
            + 'static,
    {
        self.functions.insert(function_id.into(), Arc::new(function));
        self
    }

    pub fn contains(&self, function_id: &str) -> bool {
        self.functions.contains_key(function_id)
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.functions.keys().collect();
        ids.sort();
        f.debug_struct("FunctionRegistry").field("functions", &ids).finish()
    }
}

impl FunctionInvoker for FunctionRegistry {
    fn execute(
        &self,
        function_id: &str,
        args: &JsonMap<String, JsonValue>,
    ) -> Result<JsonValue, FunctionError> {
        let function = self
            .functions
            .get(function_id)
            .ok_or_else(|| FunctionError::UnknownFunction(function_id.to_string()))?;
        function(args)
    }
}

// =============================================================================
// Builtins
// =============================================================================

fn input<'a>(name: &str, args: &'a JsonMap<String, JsonValue>) -> Result<&'a JsonValue, FunctionError> {
    args.get(INPUT_ARG)
        .ok_or_else(|| FunctionError::invalid_argument(name, "missing input"))
}

fn value_as_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_as_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Integral results stay integers so they print without a trailing `.0`.
fn number_value(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        JsonValue::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(JsonValue::Null, JsonValue::Number)
    }
}

fn string_param<'a>(
    name: &str,
    args: &'a JsonMap<String, JsonValue>,
    param: &str,
) -> Result<Option<&'a str>, FunctionError> {
    match args.get(param) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(FunctionError::invalid_argument(
            name,
            format!("{} must be a string, got {}", param, other),
        )),
    }
}

fn map_string(
    name: &str,
    args: &JsonMap<String, JsonValue>,
    f: impl Fn(&str) -> String,
) -> Result<JsonValue, FunctionError> {
    let value = input(name, args)?;
    let s = value_as_string(value)
        .ok_or_else(|| FunctionError::invalid_argument(name, format!("expected string, got {}", value)))?;
    Ok(JsonValue::String(f(&s)))
}

fn to_string(args: &JsonMap<String, JsonValue>) -> Result<JsonValue, FunctionError> {
    let value = input("to_string", args)?;
    let s = match value {
        JsonValue::Null => "null".to_string(),
        JsonValue::Array(_) | JsonValue::Object(_) => value.to_string(),
        other => value_as_string(other).unwrap_or_default(),
    };
    Ok(JsonValue::String(s))
}

fn to_number(args: &JsonMap<String, JsonValue>) -> Result<JsonValue, FunctionError> {
    let value = input("to_number", args)?;
    value_as_f64(value)
        .map(number_value)
        .ok_or_else(|| FunctionError::failed("to_number", format!("cannot convert {} to a number", value)))
}

fn concat(args: &JsonMap<String, JsonValue>) -> Result<JsonValue, FunctionError> {
    let delimiter = string_param("concat", args, "delimiter")?.unwrap_or("");
    let parts: Vec<String> = match input("concat", args)? {
        JsonValue::Array(items) => items.iter().filter_map(value_as_string).collect(),
        JsonValue::Object(map) => map.values().filter_map(value_as_string).collect(),
        other => value_as_string(other).into_iter().collect(),
    };
    Ok(JsonValue::String(parts.join(delimiter)))
}

fn arithmetic(
    name: &str,
    args: &JsonMap<String, JsonValue>,
    op: impl Fn(f64, f64) -> f64,
) -> Result<JsonValue, FunctionError> {
    let value = input(name, args)?;
    let left = value_as_f64(value)
        .ok_or_else(|| FunctionError::invalid_argument(name, format!("expected number, got {}", value)))?;
    let right = args
        .get("operand")
        .and_then(value_as_f64)
        .ok_or_else(|| FunctionError::invalid_argument(name, "operand must be a number"))?;
    Ok(number_value(op(left, right)))
}

fn default_value(args: &JsonMap<String, JsonValue>) -> Result<JsonValue, FunctionError> {
    let value = input("default", args)?;
    let empty = match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.is_empty(),
        _ => false,
    };
    if empty {
        Ok(args.get("value").cloned().unwrap_or(JsonValue::Null))
    } else {
        Ok(value.clone())
    }
}

fn replace(args: &JsonMap<String, JsonValue>) -> Result<JsonValue, FunctionError> {
    let pattern = string_param("replace", args, "pattern")?
        .ok_or_else(|| FunctionError::invalid_argument("replace", "pattern is required"))?;
    let replacement = string_param("replace", args, "replacement")?.unwrap_or("");
    let re = Regex::new(pattern)
        .map_err(|err| FunctionError::invalid_argument("replace", format!("invalid regex pattern: {}", err)))?;
    map_string("replace", args, |s| re.replace_all(s, replacement).into_owned())
}

fn format_date(args: &JsonMap<String, JsonValue>) -> Result<JsonValue, FunctionError> {
    let from = string_param("format_date", args, "from")?.unwrap_or("%Y-%m-%d");
    let to = string_param("format_date", args, "to")?
        .ok_or_else(|| FunctionError::invalid_argument("format_date", "to is required"))?;
    let value = input("format_date", args)?;
    let text = value_as_string(value)
        .ok_or_else(|| FunctionError::invalid_argument("format_date", format!("expected string, got {}", value)))?;

    let parsed = NaiveDateTime::parse_from_str(&text, from).or_else(|_| {
        NaiveDate::parse_from_str(&text, from)
            .map(|date| date.and_hms_opt(0, 0, 0).unwrap_or_default())
    });
    let datetime = parsed.map_err(|err| {
        FunctionError::failed("format_date", format!("cannot parse '{}' with '{}': {}", text, from, err))
    })?;

    let mut out = String::new();
    write!(out, "{}", datetime.format(to))
        .map_err(|_| FunctionError::invalid_argument("format_date", format!("invalid output format '{}'", to)))?;
    Ok(JsonValue::String(out))
}
