use std::collections::HashSet;

use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::{TransformError, TransformErrorKind};
use crate::filter::text_of;
use crate::format::serialize_error;
use crate::model::MappingRule;
use crate::path::{PathToken, bind_wildcards, first_wildcard, get_path, parse_path};

/// One output column: the target label and the target path it reads.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvColumn {
    pub label: String,
    pub tokens: Vec<PathToken>,
}

/// Reads the header row and the first data row into a flat object of strings.
/// Later rows are ignored.
pub fn decode_csv(input: &str) -> Result<JsonValue, TransformError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(input.as_bytes());
    let headers = reader.headers()?.clone();

    let mut doc = JsonMap::new();
    let mut record = StringRecord::new();
    if reader.read_record(&mut record)? {
        for (header, field) in headers.iter().zip(record.iter()) {
            doc.insert(header.to_string(), JsonValue::String(field.to_string()));
        }
    }
    Ok(JsonValue::Object(doc))
}

/// Distinct target labels in declaration order, `oneOf` branches included.
pub fn csv_columns(rules: &[MappingRule]) -> Result<Vec<CsvColumn>, TransformError> {
    let mut columns = Vec::new();
    let mut seen = HashSet::new();
    collect_columns(rules, &mut seen, &mut columns)?;
    Ok(columns)
}

fn collect_columns(
    rules: &[MappingRule],
    seen: &mut HashSet<String>,
    columns: &mut Vec<CsvColumn>,
) -> Result<(), TransformError> {
    for rule in rules {
        for target in &rule.targets {
            if target.label.is_empty() || !seen.insert(target.label.clone()) {
                continue;
            }
            let tokens = parse_path(&target.path).map_err(|err| {
                TransformError::new(
                    TransformErrorKind::InvalidPath,
                    format!("invalid target path '{}': {}", target.path, err),
                )
            })?;
            columns.push(CsvColumn {
                label: target.label.clone(),
                tokens,
            });
        }
        for branch in rule.one_of.iter().flatten() {
            collect_columns(&branch.rules, seen, columns)?;
        }
    }
    Ok(())
}

/// Writes a header of column labels and one row per element of the first
/// wildcard column's array (a single row when no column has a wildcard).
pub fn encode_csv(doc: &JsonValue, columns: &[CsvColumn]) -> Result<String, TransformError> {
    if columns.is_empty() {
        return Err(TransformError::new(
            TransformErrorKind::SerializeFailed,
            "CSV output needs at least one labelled target",
        ));
    }

    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer
        .write_record(columns.iter().map(|column| column.label.as_str()))
        .map_err(serialize_error)?;

    for row in 0..row_count(doc, columns) {
        let cells: Vec<String> = columns
            .iter()
            .map(|column| cell(doc, column, row))
            .collect();
        writer.write_record(&cells).map_err(serialize_error)?;
    }

    let bytes = writer.into_inner().map_err(serialize_error)?;
    String::from_utf8(bytes).map_err(serialize_error)
}

fn row_count(doc: &JsonValue, columns: &[CsvColumn]) -> usize {
    let wildcard = columns.iter().find_map(|column| {
        first_wildcard(&column.tokens).map(|at| &column.tokens[..at])
    });
    match wildcard {
        None => 1,
        Some(prefix) => match get_path(doc, prefix) {
            Some(JsonValue::Array(items)) => items.len(),
            _ => 0,
        },
    }
}

fn cell(doc: &JsonValue, column: &CsvColumn, row: usize) -> String {
    let tokens = bind_wildcards(&column.tokens, &[row]);
    match get_path(doc, &tokens) {
        None | Some(JsonValue::Null) => String::new(),
        Some(value) => text_of(value),
    }
}
