use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::{TransformError, TransformErrorKind};

/// A complete crosswalk: the formats on both sides plus the ordered rules.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Crosswalk {
    pub source_format: Format,
    pub target_format: Format,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_element: Option<String>,
    #[serde(default)]
    pub rules: Vec<MappingRule>,
}

impl Crosswalk {
    pub fn new(source_format: Format, target_format: Format, rules: Vec<MappingRule>) -> Self {
        Self {
            source_format,
            target_format,
            namespaces: None,
            root_element: None,
            rules,
        }
    }

    pub fn with_namespaces(mut self, namespaces: BTreeMap<String, String>) -> Self {
        self.namespaces = Some(namespaces);
        self
    }

    pub fn with_root_element(mut self, root_element: impl Into<String>) -> Self {
        self.root_element = Some(root_element.into());
        self
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Csv,
    Xml,
    Json,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Csv => "csv",
            Format::Xml => "xml",
            Format::Json => "json",
        }
    }
}

impl std::str::FromStr for Format {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Format::Csv),
            "xml" => Ok(Format::Xml),
            "json" => Ok(Format::Json),
            other => Err(TransformError::new(
                TransformErrorKind::UnsupportedFormat,
                format!("unsupported format: {}", other),
            )),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct MappingRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub sources: Vec<NodeRef>,
    #[serde(default)]
    pub targets: Vec<NodeRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<OneOfBranch>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl MappingRule {
    pub fn is_one_of(&self) -> bool {
        self.one_of.is_some()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct NodeRef {
    pub path: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing: Option<FunctionCall>,
}

impl NodeRef {
    pub fn new(path: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
            uri: None,
            processing: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct FunctionCall {
    pub function_id: String,
    #[serde(default)]
    pub params: JsonMap<String, JsonValue>,
}

impl FunctionCall {
    pub fn new(function_id: impl Into<String>) -> Self {
        Self {
            function_id: function_id.into(),
            params: JsonMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.params.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperator {
    Eq,
    Neq,
    In,
    StartsWith,
    IsUri,
    Contains,
    NotContains,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct FilterExpr {
    pub path: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: JsonValue,
    /// When set, elements rejected by the filter do not reserve a target slot.
    #[serde(default)]
    pub distinct_values: bool,
}

impl FilterExpr {
    pub fn new(path: impl Into<String>, operator: FilterOperator, value: JsonValue) -> Self {
        Self {
            path: path.into(),
            operator,
            value,
            distinct_values: false,
        }
    }

    pub fn distinct(mut self, distinct_values: bool) -> Self {
        self.distinct_values = distinct_values;
        self
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OneOfBranch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterExpr>,
    #[serde(default)]
    pub rules: Vec<MappingRule>,
}
