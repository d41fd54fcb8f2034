//! Decoding raw text into documents and encoding documents back out.

use serde_json::Value as JsonValue;

use crate::csv_format::{csv_columns, decode_csv, encode_csv};
use crate::error::{TransformError, TransformErrorKind};
use crate::model::{Crosswalk, Format};
use crate::xml_format::{DEFAULT_ROOT_ELEMENT, decode_xml, encode_xml};

pub fn decode(input: &str, format: Format) -> Result<JsonValue, TransformError> {
    match format {
        Format::Csv => decode_csv(input),
        Format::Xml => decode_xml(input),
        Format::Json => Ok(serde_json::from_str(input)?),
    }
}

/// Serializes `doc` in the crosswalk's target format. CSV columns come from
/// the labelled targets of the rules.
pub fn encode(doc: &JsonValue, crosswalk: &Crosswalk) -> Result<String, TransformError> {
    match crosswalk.target_format {
        Format::Json => serde_json::to_string(doc).map_err(serialize_error),
        Format::Xml => encode_xml(
            doc,
            crosswalk
                .root_element
                .as_deref()
                .unwrap_or(DEFAULT_ROOT_ELEMENT),
        ),
        Format::Csv => encode_csv(doc, &csv_columns(&crosswalk.rules)?),
    }
}

pub(crate) fn serialize_error(err: impl std::fmt::Display) -> TransformError {
    TransformError::new(TransformErrorKind::SerializeFailed, err.to_string())
}

#[cfg(test)]
mod format_tests {
    use super::*;
    use crate::model::{MappingRule, NodeRef};
    use serde_json::json;

    #[test]
    fn json_round_trip_is_compact_and_ordered() {
        let doc = decode(r#"{ "b": 1, "a": [true, null] }"#, Format::Json).unwrap();
        let crosswalk = Crosswalk::new(Format::Json, Format::Json, Vec::new());
        assert_eq!(encode(&doc, &crosswalk).unwrap(), r#"{"b":1,"a":[true,null]}"#);
    }

    #[test]
    fn malformed_json_is_invalid_input() {
        let err = decode("{", Format::Json).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::InvalidInput);
    }

    #[test]
    fn xml_target_uses_configured_root_element() {
        let crosswalk =
            Crosswalk::new(Format::Json, Format::Xml, Vec::new()).with_root_element("record");
        let out = encode(&json!({"a": "1", "b": "2"}), &crosswalk).unwrap();
        assert_eq!(
            out,
            r#"<?xml version="1.0" encoding="UTF-8"?><record><a>1</a><b>2</b></record>"#
        );
    }

    #[test]
    fn csv_target_uses_rule_labels() {
        let rule = MappingRule {
            id: "r1".to_string(),
            sources: vec![NodeRef::new("a", "a")],
            targets: vec![NodeRef::new("a", "column_a")],
            ..MappingRule::default()
        };
        let crosswalk = Crosswalk::new(Format::Json, Format::Csv, vec![rule]);
        let out = encode(&json!({"a": 7}), &crosswalk).unwrap();
        assert_eq!(out, "column_a\n7\n");
    }
}
