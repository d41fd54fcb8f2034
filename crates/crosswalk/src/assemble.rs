//! Column map and document reconstruction.
//!
//! Rule execution writes into a flat [`ColumnMap`] keyed by concrete target
//! paths. Assembly sorts those keys into a deterministic order, rebuilds a
//! nested document, pads reserved array slots and optionally injects XML
//! namespace declarations.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::{TransformError, TransformErrorKind};
use crate::model::Format;
use crate::path::{PathToken, format_path, get_path, parse_path, set_path};

/// Insertion-ordered map from concrete target path to value.
/// Re-inserting a key replaces its value and keeps its position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMap {
    entries: JsonMap<String, JsonValue>,
}

impl ColumnMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: JsonValue) -> Option<JsonValue> {
        self.entries.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.entries.iter()
    }

    /// Highest `N` among keys of the form `<prefix>[N]...`.
    pub fn highest_index(&self, prefix: &str) -> Option<usize> {
        self.entries
            .keys()
            .filter_map(|key| {
                let rest = key.strip_prefix(prefix)?.strip_prefix('[')?;
                let end = rest.find(']')?;
                rest[..end].parse::<usize>().ok()
            })
            .max()
    }
}

/// Orders entries by collection: keys sharing the prefix before their first
/// `[N]` form a group placed where the prefix was first seen, ordered inside
/// by their numeric indices. Keys without an index keep their position.
pub fn sort_columns(columns: &ColumnMap) -> Vec<(String, JsonValue)> {
    struct Group {
        entries: Vec<(Vec<usize>, String, JsonValue)>,
    }

    let mut groups: Vec<Group> = Vec::new();
    let mut by_prefix: HashMap<String, usize> = HashMap::new();

    for (key, value) in columns.iter() {
        match collection_of(key) {
            Some((prefix, indices)) => {
                let entry = (indices, key.clone(), value.clone());
                match by_prefix.get(&prefix) {
                    Some(&at) => groups[at].entries.push(entry),
                    None => {
                        by_prefix.insert(prefix, groups.len());
                        groups.push(Group { entries: vec![entry] });
                    }
                }
            }
            None => groups.push(Group {
                entries: vec![(Vec::new(), key.clone(), value.clone())],
            }),
        }
    }

    groups
        .into_iter()
        .flat_map(|mut group| {
            group.entries.sort_by(|a, b| a.0.cmp(&b.0));
            group.entries.into_iter().map(|(_, key, value)| (key, value))
        })
        .collect()
}

fn collection_of(key: &str) -> Option<(String, Vec<usize>)> {
    let tokens = parse_path(key).ok()?;
    let first = tokens
        .iter()
        .position(|token| matches!(token, PathToken::Index(_)))?;
    let indices = tokens
        .iter()
        .filter_map(|token| match token {
            PathToken::Index(index) => Some(*index),
            _ => None,
        })
        .collect();
    Some((format_path(&tokens[..first]), indices))
}

/// Adds `-xmlns[:prefix]` attributes for every namespace. They go on the
/// `root_element` child when the document is exactly that element, otherwise
/// on the top level, which the XML encoder wraps in `root_element`.
pub fn inject_namespaces(
    doc: &mut JsonValue,
    namespaces: &BTreeMap<String, String>,
    root_element: &str,
) {
    if namespaces.is_empty() {
        return;
    }
    if doc.is_null() {
        *doc = JsonValue::Object(JsonMap::new());
    }
    let JsonValue::Object(top) = doc else {
        return;
    };

    let holds_root = top.len() == 1
        && matches!(top.get(root_element), Some(value) if !value.is_array());
    if !holds_root {
        add_declarations(top, namespaces);
        return;
    }
    let Some(element) = top.get_mut(root_element) else {
        return;
    };
    match element {
        JsonValue::Object(map) => add_declarations(map, namespaces),
        other => {
            let mut map = JsonMap::new();
            if !other.is_null() {
                map.insert(TEXT_KEY.to_string(), other.take());
            }
            add_declarations(&mut map, namespaces);
            *other = JsonValue::Object(map);
        }
    }
}

const TEXT_KEY: &str = "#text";

fn add_declarations(map: &mut JsonMap<String, JsonValue>, namespaces: &BTreeMap<String, String>) {
    for (prefix, uri) in namespaces {
        let attribute = if prefix.is_empty() {
            "-xmlns".to_string()
        } else {
            format!("-xmlns:{}", prefix)
        };
        map.insert(attribute, JsonValue::String(uri.clone()));
    }
}

/// Extends every reserved array to at least its reserved length with `null`.
pub fn pad_reserved(
    doc: &mut JsonValue,
    reserved: &BTreeMap<String, usize>,
) -> Result<(), TransformError> {
    for (prefix, &len) in reserved {
        let Some(last) = len.checked_sub(1) else {
            continue;
        };
        let mut tokens = parse_path(prefix).map_err(|err| {
            TransformError::new(
                TransformErrorKind::InvalidPath,
                format!("invalid reserved prefix: {}", err),
            )
            .with_path(prefix)
        })?;
        let filled = match get_path(doc, &tokens) {
            Some(JsonValue::Array(items)) => items.len(),
            _ => 0,
        };
        if filled >= len {
            continue;
        }
        tokens.push(PathToken::Index(last));
        set_path(doc, &tokens, JsonValue::Null).map_err(|err| {
            TransformError::new(TransformErrorKind::InvalidPath, err.to_string()).with_path(prefix)
        })?;
    }
    Ok(())
}

/// Rebuilds a document by writing every entry in order.
pub fn reconstruct(entries: &[(String, JsonValue)]) -> Result<JsonValue, TransformError> {
    let mut doc = JsonValue::Null;
    for (key, value) in entries {
        let tokens = parse_path(key).map_err(|err| {
            TransformError::new(
                TransformErrorKind::InvalidPath,
                format!("invalid column key: {}", err),
            )
            .with_path(key)
        })?;
        set_path(&mut doc, &tokens, value.clone()).map_err(|err| {
            TransformError::new(TransformErrorKind::InvalidPath, err.to_string()).with_path(key)
        })?;
    }
    if entries.is_empty() {
        doc = JsonValue::Object(JsonMap::new());
    }
    Ok(doc)
}

/// Sort, rebuild, pad reserved slots and inject namespaces for XML targets.
pub fn assemble(
    columns: &ColumnMap,
    reserved: &BTreeMap<String, usize>,
    target_format: Format,
    namespaces: Option<&BTreeMap<String, String>>,
    root_element: Option<&str>,
) -> Result<JsonValue, TransformError> {
    let mut doc = reconstruct(&sort_columns(columns))?;
    pad_reserved(&mut doc, reserved)?;
    if target_format == Format::Xml {
        if let (Some(namespaces), Some(root)) = (namespaces, root_element) {
            inject_namespaces(&mut doc, namespaces, root);
        }
    }
    Ok(doc)
}

#[cfg(test)]
mod assemble_tests {
    use super::*;
    use serde_json::json;

    fn columns(entries: &[(&str, JsonValue)]) -> ColumnMap {
        let mut map = ColumnMap::new();
        for (key, value) in entries {
            map.insert(*key, value.clone());
        }
        map
    }

    fn keys(entries: &[(String, JsonValue)]) -> Vec<&str> {
        entries.iter().map(|(key, _)| key.as_str()).collect()
    }

    #[test]
    fn later_insert_overwrites_in_place() {
        let mut map = columns(&[("a", json!(1)), ("b", json!(2))]);
        map.insert("a", json!(3));
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("a"), Some(&json!(3)));
        assert_eq!(map.iter().next().map(|(k, _)| k.as_str()), Some("a"));
    }

    #[test]
    fn highest_index_matches_exact_prefix() {
        let map = columns(&[
            ("out[0].v", json!(1)),
            ("out[3].v", json!(2)),
            ("outer[9].v", json!(3)),
        ]);
        assert_eq!(map.highest_index("out"), Some(3));
        assert_eq!(map.highest_index("outer"), Some(9));
        assert_eq!(map.highest_index("missing"), None);
    }

    #[test]
    fn sort_groups_by_collection_and_index() {
        let map = columns(&[
            ("title", json!("t")),
            ("out[1].a", json!(1)),
            ("other[0]", json!(0)),
            ("out[0].a", json!(0)),
            ("out[1].b", json!(2)),
            ("id", json!("x")),
        ]);
        let sorted = sort_columns(&map);
        assert_eq!(
            keys(&sorted),
            vec!["title", "out[0].a", "out[1].a", "out[1].b", "other[0]", "id"]
        );
    }

    #[test]
    fn sort_is_independent_of_index_write_order() {
        let forward = columns(&[("out[0]", json!("a")), ("out[1]", json!("b"))]);
        let backward = columns(&[("out[1]", json!("b")), ("out[0]", json!("a"))]);
        assert_eq!(sort_columns(&forward), sort_columns(&backward));
    }

    #[test]
    fn reconstruct_builds_nested_document() {
        let map = columns(&[
            ("out[0].v", json!(1)),
            ("out[2].v", json!(3)),
            ("meta.name", json!("n")),
        ]);
        let doc = reconstruct(&sort_columns(&map)).unwrap();
        assert_eq!(doc, json!({"out": [{"v": 1}, null, {"v": 3}], "meta": {"name": "n"}}));
    }

    #[test]
    fn reconstruct_array_root_and_empty_map() {
        let map = columns(&[("[0].a", json!(1))]);
        assert_eq!(reconstruct(&sort_columns(&map)).unwrap(), json!([{"a": 1}]));
        assert_eq!(reconstruct(&[]).unwrap(), json!({}));
    }

    fn dc_namespaces() -> BTreeMap<String, String> {
        let mut namespaces = BTreeMap::new();
        namespaces.insert(String::new(), "urn:default".to_string());
        namespaces.insert("dc".to_string(), "http://purl.org/dc/elements/1.1/".to_string());
        namespaces
    }

    #[test]
    fn namespaces_are_injected_for_xml_only() {
        let map = columns(&[("record.title", json!("t"))]);
        let namespaces = dc_namespaces();
        let none = BTreeMap::new();

        let xml = assemble(&map, &none, Format::Xml, Some(&namespaces), Some("record")).unwrap();
        assert_eq!(
            xml,
            json!({"record": {
                "title": "t",
                "-xmlns": "urn:default",
                "-xmlns:dc": "http://purl.org/dc/elements/1.1/"
            }})
        );

        let json_doc =
            assemble(&map, &none, Format::Json, Some(&namespaces), Some("record")).unwrap();
        assert_eq!(json_doc, json!({"record": {"title": "t"}}));
    }

    #[test]
    fn namespaces_go_on_the_wrapper_when_targets_are_not_under_root() {
        let map = columns(&[("dc:title", json!("T")), ("dc:creator", json!("C"))]);
        let doc = assemble(
            &map,
            &BTreeMap::new(),
            Format::Xml,
            Some(&dc_namespaces()),
            Some("record"),
        )
        .unwrap();
        assert_eq!(
            doc,
            json!({
                "dc:title": "T",
                "dc:creator": "C",
                "-xmlns": "urn:default",
                "-xmlns:dc": "http://purl.org/dc/elements/1.1/"
            })
        );
    }

    #[test]
    fn namespaces_keep_text_of_a_scalar_root() {
        let mut doc = json!({"record": "t"});
        inject_namespaces(&mut doc, &dc_namespaces(), "record");
        assert_eq!(
            doc,
            json!({"record": {
                "#text": "t",
                "-xmlns": "urn:default",
                "-xmlns:dc": "http://purl.org/dc/elements/1.1/"
            }})
        );
    }

    #[test]
    fn reserved_slots_pad_trailing_gaps() {
        let map = columns(&[("out[0].v", json!(1)), ("out[1].v", json!(2))]);
        let mut reserved = BTreeMap::new();
        reserved.insert("out".to_string(), 3);
        reserved.insert("empty".to_string(), 2);
        let doc = assemble(&map, &reserved, Format::Json, None, None).unwrap();
        assert_eq!(
            doc,
            json!({"out": [{"v": 1}, {"v": 2}, null], "empty": [null, null]})
        );
    }

    #[test]
    fn reserved_slots_never_shrink_arrays() {
        let mut doc = json!({"out": [1, 2, 3]});
        let mut reserved = BTreeMap::new();
        reserved.insert("out".to_string(), 2);
        pad_reserved(&mut doc, &reserved).unwrap();
        assert_eq!(doc, json!({"out": [1, 2, 3]}));
    }

    #[test]
    fn conflicting_container_writes_fail() {
        let map = columns(&[
            ("out[0]", json!("a")),
            ("out[1]", json!("b")),
            ("out.name", json!("n")),
        ]);
        let err = reconstruct(&sort_columns(&map)).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::InvalidPath);
        assert_eq!(err.path.as_deref(), Some("out.name"));
    }
}
