//! Filter predicates evaluated against a source document or a single array element.

use serde_json::Value as JsonValue;
use url::Url;

use crate::error::{TransformError, TransformErrorKind};
use crate::model::{FilterExpr, FilterOperator};
use crate::path::{get_path, parse_path, wildcard_count};

/// Evaluation subject - either a value or missing
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvalValue<'a> {
    Missing,
    Value(&'a JsonValue),
}

impl<'a> EvalValue<'a> {
    pub fn as_value(&self) -> Option<&'a JsonValue> {
        match *self {
            EvalValue::Value(v) => Some(v),
            EvalValue::Missing => None,
        }
    }
}

/// Evaluates `filter` with its path resolved inside `scope`.
///
/// A path that does not resolve is not an error: the subject becomes
/// [`EvalValue::Missing`], which matches nothing (so `EQ` is false, `NEQ` is
/// true).
pub fn evaluate(scope: &JsonValue, filter: &FilterExpr) -> Result<bool, TransformError> {
    let tokens = parse_path(&filter.path).map_err(|err| {
        TransformError::new(
            TransformErrorKind::InvalidPath,
            format!("invalid filter path '{}': {}", filter.path, err),
        )
    })?;
    if wildcard_count(&tokens) > 0 {
        return Err(TransformError::new(
            TransformErrorKind::InvalidRule,
            format!("filter path '{}' cannot contain wildcards", filter.path),
        ));
    }
    let subject = match get_path(scope, &tokens) {
        Some(value) => EvalValue::Value(value),
        None => EvalValue::Missing,
    };
    apply_operator(filter.operator, subject, &filter.value)
}

pub fn apply_operator(
    operator: FilterOperator,
    subject: EvalValue<'_>,
    expected: &JsonValue,
) -> Result<bool, TransformError> {
    let matched = match operator {
        FilterOperator::Eq => subject.as_value().is_some_and(|v| values_equal(v, expected)),
        FilterOperator::Neq => !subject.as_value().is_some_and(|v| values_equal(v, expected)),
        FilterOperator::In => {
            let JsonValue::Array(candidates) = expected else {
                return Err(TransformError::new(
                    TransformErrorKind::InvalidRule,
                    "IN filter requires an array value",
                ));
            };
            subject
                .as_value()
                .is_some_and(|v| candidates.iter().any(|candidate| values_equal(v, candidate)))
        }
        FilterOperator::StartsWith => subject
            .as_value()
            .is_some_and(|v| text_of(v).starts_with(&text_of(expected))),
        FilterOperator::Contains => subject
            .as_value()
            .is_some_and(|v| text_of(v).contains(&text_of(expected))),
        FilterOperator::NotContains => !subject
            .as_value()
            .is_some_and(|v| text_of(v).contains(&text_of(expected))),
        FilterOperator::IsUri => subject.as_value().is_some_and(|v| is_uri(&text_of(v))),
    };
    Ok(matched)
}

/// Structural equality, except that numbers compare by numeric value.
fn values_equal(left: &JsonValue, right: &JsonValue) -> bool {
    match (left, right) {
        (JsonValue::Number(l), JsonValue::Number(r)) => match (l.as_f64(), r.as_f64()) {
            (Some(l), Some(r)) => l == r,
            _ => l == r,
        },
        _ => left == right,
    }
}

/// String representation used by the text operators.
pub(crate) fn text_of(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Null => "null".to_string(),
        JsonValue::Array(_) | JsonValue::Object(_) => value.to_string(),
    }
}

fn is_uri(text: &str) -> bool {
    !text.is_empty() && !text.chars().any(char::is_whitespace) && Url::parse(text).is_ok()
}
