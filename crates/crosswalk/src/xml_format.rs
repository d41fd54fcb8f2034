//! XML <-> document conversion.
//!
//! Attributes map to `-name` keys, mixed text to `#text`, repeated child
//! elements to arrays and empty elements to `null`. All values are strings.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::{TransformError, TransformErrorKind};
use crate::filter::text_of;
use crate::format::serialize_error;

pub const DEFAULT_ROOT_ELEMENT: &str = "root";

const TEXT_KEY: &str = "#text";
const ATTRIBUTE_PREFIX: char = '-';

struct Frame {
    name: String,
    content: JsonMap<String, JsonValue>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self, TransformError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut content = JsonMap::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(input_error)?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute.unescape_value().map_err(input_error)?;
            content.insert(
                format!("{}{}", ATTRIBUTE_PREFIX, key),
                JsonValue::String(value.into_owned()),
            );
        }
        Ok(Self {
            name,
            content,
            text: String::new(),
        })
    }

    fn add_child(&mut self, name: String, value: JsonValue) {
        match self.content.get_mut(&name) {
            Some(JsonValue::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = JsonValue::Array(vec![first, value]);
            }
            None => {
                self.content.insert(name, value);
            }
        }
    }

    fn finish(self) -> (String, JsonValue) {
        let value = if self.content.is_empty() {
            if self.text.is_empty() {
                JsonValue::Null
            } else {
                JsonValue::String(self.text)
            }
        } else {
            let mut content = self.content;
            if !self.text.is_empty() {
                content.insert(TEXT_KEY.to_string(), JsonValue::String(self.text));
            }
            JsonValue::Object(content)
        };
        (self.name, value)
    }
}

pub fn decode_xml(input: &str) -> Result<JsonValue, TransformError> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<(String, JsonValue)> = None;

    loop {
        match reader.read_event().map_err(input_error)? {
            Event::Start(start) => stack.push(Frame::open(&start)?),
            Event::Empty(start) => {
                let frame = Frame::open(&start)?;
                close(frame, &mut stack, &mut root)?;
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| input_error("unexpected closing tag"))?;
                close(frame, &mut stack, &mut root)?;
            }
            Event::Text(text) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&text.unescape().map_err(input_error)?);
                }
            }
            Event::CData(data) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(frame) = stack.last() {
        return Err(input_error(format!("element <{}> is not closed", frame.name)));
    }
    let (name, value) = root.ok_or_else(|| input_error("document has no root element"))?;
    let mut doc = JsonMap::new();
    doc.insert(name, value);
    Ok(JsonValue::Object(doc))
}

fn close(
    frame: Frame,
    stack: &mut [Frame],
    root: &mut Option<(String, JsonValue)>,
) -> Result<(), TransformError> {
    let (name, value) = frame.finish();
    match stack.last_mut() {
        Some(parent) => parent.add_child(name, value),
        None => {
            if root.is_some() {
                return Err(input_error("document has more than one root element"));
            }
            *root = Some((name, value));
        }
    }
    Ok(())
}

/// Writes `doc` as XML. A single-key object naming one element is emitted as
/// its own root; anything else, including a lone array or attribute, is
/// wrapped in `root_element` so the output has exactly one root.
pub fn encode_xml(doc: &JsonValue, root_element: &str) -> Result<String, TransformError> {
    let JsonValue::Object(map) = doc else {
        return Err(serialize_error("XML output requires an object document"));
    };

    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(serialize_error)?;
    match map.iter().next() {
        Some((name, value)) if map.len() == 1 && is_single_element(name, value) => {
            write_element(&mut writer, name, value)?
        }
        _ => write_element(&mut writer, root_element, doc)?,
    }
    String::from_utf8(writer.into_inner()).map_err(serialize_error)
}

fn is_single_element(name: &str, value: &JsonValue) -> bool {
    !value.is_array() && !name.starts_with(ATTRIBUTE_PREFIX) && name != TEXT_KEY
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    value: &JsonValue,
) -> Result<(), TransformError> {
    match value {
        JsonValue::Array(items) => {
            for item in items {
                write_element(writer, name, item)?;
            }
        }
        JsonValue::Null => {
            writer
                .write_event(Event::Empty(BytesStart::new(name)))
                .map_err(serialize_error)?;
        }
        JsonValue::Object(map) => {
            let mut start = BytesStart::new(name);
            let mut text = None;
            let mut children = Vec::new();
            for (key, child) in map {
                if let Some(attribute) = key.strip_prefix(ATTRIBUTE_PREFIX) {
                    let attribute_value = text_of(child);
                    start.push_attribute((attribute, attribute_value.as_str()));
                } else if key == TEXT_KEY {
                    text = Some(text_of(child));
                } else {
                    children.push((key, child));
                }
            }

            if text.is_none() && children.is_empty() {
                writer
                    .write_event(Event::Empty(start))
                    .map_err(serialize_error)?;
                return Ok(());
            }
            writer
                .write_event(Event::Start(start))
                .map_err(serialize_error)?;
            if let Some(text) = text {
                writer
                    .write_event(Event::Text(BytesText::new(&text)))
                    .map_err(serialize_error)?;
            }
            for (key, child) in children {
                write_element(writer, key, child)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(serialize_error)?;
        }
        scalar => {
            let text = text_of(scalar);
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(serialize_error)?;
            writer
                .write_event(Event::Text(BytesText::new(&text)))
                .map_err(serialize_error)?;
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(serialize_error)?;
        }
    }
    Ok(())
}

fn input_error(err: impl std::fmt::Display) -> TransformError {
    TransformError::new(
        TransformErrorKind::InvalidInput,
        format!("xml error: {}", err),
    )
}
