mod assemble;
mod csv_format;
mod error;
mod executor;
mod filter;
mod format;
mod function;
mod model;
mod path;
mod transform;
mod validator;
mod xml_format;

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use assemble::{ColumnMap, assemble, reconstruct, sort_columns};
pub use csv_format::{CsvColumn, csv_columns};
pub use error::{
    ErrorCode, RuleError, TransformError, TransformErrorKind, TransformWarning, ValidationResult,
};
pub use executor::{Execution, execute_rules};
pub use filter::{EvalValue, evaluate as evaluate_filter};
pub use format::{decode, encode};
pub use function::{FunctionError, FunctionInvoker, FunctionRegistry, INPUT_ARG};
pub use model::{
    Crosswalk, FilterExpr, FilterOperator, Format, FunctionCall, MappingRule, NodeRef, OneOfBranch,
};
pub use path::{Hit, PathError, PathToken, Resolved, format_path, get_path, parse_path, resolve};
pub use transform::{transform, transform_document, transform_with_warnings};
pub use validator::validate_crosswalk;
pub use xml_format::DEFAULT_ROOT_ELEMENT;

/// Loads a crosswalk from YAML (JSON is accepted as a YAML subset).
pub fn parse_crosswalk(yaml: &str) -> Result<Crosswalk, serde_yaml::Error> {
    serde_yaml::from_str(yaml)
}
