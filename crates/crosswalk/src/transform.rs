use serde_json::Value as JsonValue;
use tracing::debug;

use crate::assemble::assemble;
use crate::error::{TransformError, TransformWarning};
use crate::executor::execute_rules;
use crate::format::{decode, encode};
use crate::function::FunctionInvoker;
use crate::model::Crosswalk;
use crate::validator::validate_crosswalk;

/// Decodes `input`, runs the crosswalk and encodes the result.
pub fn transform(
    crosswalk: &Crosswalk,
    input: &str,
    invoker: &dyn FunctionInvoker,
) -> Result<String, TransformError> {
    transform_with_warnings(crosswalk, input, invoker).map(|(output, _)| output)
}

pub fn transform_with_warnings(
    crosswalk: &Crosswalk,
    input: &str,
    invoker: &dyn FunctionInvoker,
) -> Result<(String, Vec<TransformWarning>), TransformError> {
    preflight(crosswalk)?;
    let doc = decode(input, crosswalk.source_format)?;
    let (output, warnings) = run(crosswalk, &doc, invoker)?;
    Ok((encode(&output, crosswalk)?, warnings))
}

/// Runs the crosswalk against an already decoded document and returns the
/// reconstructed target document without serializing it.
pub fn transform_document(
    crosswalk: &Crosswalk,
    doc: &JsonValue,
    invoker: &dyn FunctionInvoker,
) -> Result<(JsonValue, Vec<TransformWarning>), TransformError> {
    preflight(crosswalk)?;
    run(crosswalk, doc, invoker)
}

fn preflight(crosswalk: &Crosswalk) -> Result<(), TransformError> {
    validate_crosswalk(crosswalk).map_err(|errors| TransformError::from_rule_errors(&errors))
}

fn run(
    crosswalk: &Crosswalk,
    doc: &JsonValue,
    invoker: &dyn FunctionInvoker,
) -> Result<(JsonValue, Vec<TransformWarning>), TransformError> {
    debug!(
        source = crosswalk.source_format.as_str(),
        target = crosswalk.target_format.as_str(),
        rules = crosswalk.rules.len(),
        "running crosswalk"
    );
    let execution = execute_rules(doc, &crosswalk.rules, invoker)?;
    let output = assemble(
        &execution.columns,
        &execution.reserved,
        crosswalk.target_format,
        crosswalk.namespaces.as_ref(),
        crosswalk.root_element.as_deref(),
    )?;
    Ok((output, execution.warnings))
}
