#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    MissingRules,
    MissingRuleId,
    DuplicateRuleId,
    RuleShapeExclusive,
    MissingSources,
    MissingTargets,
    EmptyBranch,

    InvalidPath,
    InvalidFilterPath,
    InvalidFilterValue,

    MissingFunctionId,
    MissingTargetLabel,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingRules => "MissingRules",
            ErrorCode::MissingRuleId => "MissingRuleId",
            ErrorCode::DuplicateRuleId => "DuplicateRuleId",
            ErrorCode::RuleShapeExclusive => "RuleShapeExclusive",
            ErrorCode::MissingSources => "MissingSources",
            ErrorCode::MissingTargets => "MissingTargets",
            ErrorCode::EmptyBranch => "EmptyBranch",
            ErrorCode::InvalidPath => "InvalidPath",
            ErrorCode::InvalidFilterPath => "InvalidFilterPath",
            ErrorCode::InvalidFilterValue => "InvalidFilterValue",
            ErrorCode::MissingFunctionId => "MissingFunctionId",
            ErrorCode::MissingTargetLabel => "MissingTargetLabel",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleError {
    pub code: ErrorCode,
    pub message: String,
    pub path: Option<String>,
}

impl RuleError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl std::fmt::Display for RuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {} (path: {})", self.code.as_str(), self.message, path),
            None => write!(f, "{}: {}", self.code.as_str(), self.message),
        }
    }
}

pub type ValidationResult = Result<(), Vec<RuleError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformErrorKind {
    InvalidInput,
    InvalidRule,
    InvalidPath,
    UnsupportedFormat,
    SerializeFailed,
    FunctionFailed,
}

impl TransformErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformErrorKind::InvalidInput => "InvalidInput",
            TransformErrorKind::InvalidRule => "InvalidRule",
            TransformErrorKind::InvalidPath => "InvalidPath",
            TransformErrorKind::UnsupportedFormat => "UnsupportedFormat",
            TransformErrorKind::SerializeFailed => "SerializeFailed",
            TransformErrorKind::FunctionFailed => "FunctionFailed",
        }
    }
}

/// A recovered problem. The transform carried on with a fallback value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformWarning {
    pub kind: TransformErrorKind,
    pub message: String,
    pub path: Option<String>,
}

impl TransformWarning {
    pub fn new(kind: TransformErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl std::fmt::Display for TransformWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{} (path: {})", self.message, path)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformError {
    pub kind: TransformErrorKind,
    pub message: String,
    pub path: Option<String>,
}

impl TransformError {
    pub fn new(kind: TransformErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub(crate) fn from_rule_errors(errors: &[RuleError]) -> Self {
        let message = errors
            .iter()
            .map(|err| err.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        let mut err = TransformError::new(
            TransformErrorKind::InvalidRule,
            format!("invalid crosswalk: {}", message),
        );
        if let Some(path) = errors.first().and_then(|first| first.path.clone()) {
            err = err.with_path(path);
        }
        err
    }
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{} (path: {})", self.message, path)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for TransformError {}

impl From<csv::Error> for TransformError {
    fn from(err: csv::Error) -> Self {
        TransformError::new(
            TransformErrorKind::InvalidInput,
            format!("csv error: {}", err),
        )
    }
}

impl From<serde_json::Error> for TransformError {
    fn from(err: serde_json::Error) -> Self {
        TransformError::new(
            TransformErrorKind::InvalidInput,
            format!("json error: {}", err),
        )
    }
}
