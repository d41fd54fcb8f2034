//! Path expressions over documents.
//!
//! Grammar:
//!
//! ```text
//! path     := root? segment ( '.' key | '[' selector ']' )*
//! root     := '$' '.'?
//! segment  := key | '[' selector ']'
//! selector := '*' | digits | '"' chars '"' | '\'' chars '\''
//! ```
//!
//! Keys may contain any character except `.`, `[` and `]`, so XML-shaped keys
//! such as `-id`, `-xmlns:dc` and `#text` need no quoting.

use serde_json::{Map as JsonMap, Value as JsonValue};

/// Maximum number of `[*]` segments in one path.
pub const MAX_WILDCARDS: usize = 2;
/// Maximum number of tokens in one path.
pub const MAX_TOKENS: usize = 64;
/// Largest array index a path may name or a write may produce.
pub const MAX_INDEX: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathToken {
    Key(String),
    Index(usize),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    Empty,
    EmptyKey { position: usize },
    UnexpectedChar { position: usize, found: char },
    UnterminatedBracket { position: usize },
    InvalidIndex { position: usize, text: String },
    IndexTooLarge { index: String },
    TooManyWildcards { count: usize },
    TooManyTokens { count: usize },
    UnboundWildcard,
    ShapeConflict { expected: &'static str },
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::Empty => write!(f, "path is empty"),
            PathError::EmptyKey { position } => write!(f, "empty key at {}", position),
            PathError::UnexpectedChar { position, found } => {
                write!(f, "unexpected '{}' at {}", found, position)
            }
            PathError::UnterminatedBracket { position } => {
                write!(f, "unterminated '[' at {}", position)
            }
            PathError::InvalidIndex { position, text } => {
                write!(f, "invalid index '{}' at {}", text, position)
            }
            PathError::IndexTooLarge { index } => {
                write!(f, "index {} exceeds the limit of {}", index, MAX_INDEX)
            }
            PathError::TooManyWildcards { count } => write!(
                f,
                "path has {} wildcards, at most {} are supported",
                count, MAX_WILDCARDS
            ),
            PathError::TooManyTokens { count } => write!(
                f,
                "path has {} segments, at most {} are supported",
                count, MAX_TOKENS
            ),
            PathError::UnboundWildcard => write!(f, "cannot write through a wildcard"),
            PathError::ShapeConflict { expected } => write!(
                f,
                "an earlier write left a different container where {} is needed",
                expected
            ),
        }
    }
}

impl std::error::Error for PathError {}

pub fn parse_path(path: &str) -> Result<Vec<PathToken>, PathError> {
    let chars: Vec<char> = path.chars().collect();
    if chars.is_empty() {
        return Err(PathError::Empty);
    }

    let mut pos = 0;
    let mut tokens = Vec::new();
    let mut need_segment = true;
    let mut after_dot = false;

    if chars[0] == '$' {
        pos = 1;
        match chars.get(pos) {
            None => return Ok(tokens),
            Some('.') => {
                pos += 1;
                after_dot = true;
            }
            Some('[') => {}
            Some(&found) => return Err(PathError::UnexpectedChar { position: pos, found }),
        }
    }

    while pos < chars.len() {
        match chars[pos] {
            '[' => {
                let (token, next) = parse_bracket(&chars, pos)?;
                tokens.push(token);
                pos = next;
                need_segment = false;
                after_dot = false;
            }
            '.' => {
                if need_segment {
                    return Err(PathError::EmptyKey { position: pos });
                }
                pos += 1;
                need_segment = true;
                after_dot = true;
            }
            ']' => return Err(PathError::UnexpectedChar { position: pos, found: ']' }),
            found => {
                if !need_segment {
                    return Err(PathError::UnexpectedChar { position: pos, found });
                }
                let start = pos;
                while pos < chars.len() && !matches!(chars[pos], '.' | '[' | ']') {
                    pos += 1;
                }
                tokens.push(PathToken::Key(chars[start..pos].iter().collect()));
                need_segment = false;
                after_dot = false;
            }
        }
    }

    if after_dot {
        return Err(PathError::EmptyKey { position: chars.len() });
    }

    let wildcards = wildcard_count(&tokens);
    if wildcards > MAX_WILDCARDS {
        return Err(PathError::TooManyWildcards { count: wildcards });
    }
    if tokens.len() > MAX_TOKENS {
        return Err(PathError::TooManyTokens { count: tokens.len() });
    }
    Ok(tokens)
}

fn parse_bracket(chars: &[char], open: usize) -> Result<(PathToken, usize), PathError> {
    let start = open + 1;
    match chars.get(start) {
        Some(&quote) if quote == '"' || quote == '\'' => {
            let mut pos = start + 1;
            while pos < chars.len() && chars[pos] != quote {
                pos += 1;
            }
            if pos >= chars.len() || chars.get(pos + 1) != Some(&']') {
                return Err(PathError::UnterminatedBracket { position: open });
            }
            let key: String = chars[start + 1..pos].iter().collect();
            Ok((PathToken::Key(key), pos + 2))
        }
        _ => {
            let mut pos = start;
            while pos < chars.len() && chars[pos] != ']' {
                pos += 1;
            }
            if pos >= chars.len() {
                return Err(PathError::UnterminatedBracket { position: open });
            }
            let text: String = chars[start..pos].iter().collect();
            let selector = text.trim();
            if selector == "*" {
                return Ok((PathToken::Wildcard, pos + 1));
            }
            if selector.is_empty() || !selector.chars().all(|c| c.is_ascii_digit()) {
                return Err(PathError::InvalidIndex { position: start, text });
            }
            let too_large = || PathError::IndexTooLarge {
                index: selector.to_string(),
            };
            let index = selector.parse::<usize>().map_err(|_| too_large())?;
            if index > MAX_INDEX {
                return Err(too_large());
            }
            Ok((PathToken::Index(index), pos + 1))
        }
    }
}

/// Renders tokens in the canonical form accepted by [`parse_path`].
pub fn format_path(tokens: &[PathToken]) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        match token {
            PathToken::Key(key) => {
                if needs_quotes(key) {
                    let quote = if key.contains('"') { '\'' } else { '"' };
                    out.push('[');
                    out.push(quote);
                    out.push_str(key);
                    out.push(quote);
                    out.push(']');
                } else {
                    if i > 0 {
                        out.push('.');
                    }
                    out.push_str(key);
                }
            }
            PathToken::Index(index) => {
                out.push('[');
                out.push_str(&index.to_string());
                out.push(']');
            }
            PathToken::Wildcard => out.push_str("[*]"),
        }
    }
    out
}

fn needs_quotes(key: &str) -> bool {
    key.is_empty() || key.starts_with('$') || key.contains(['.', '[', ']'])
}

pub fn wildcard_count(tokens: &[PathToken]) -> usize {
    tokens
        .iter()
        .filter(|token| matches!(token, PathToken::Wildcard))
        .count()
}

pub fn first_wildcard(tokens: &[PathToken]) -> Option<usize> {
    tokens
        .iter()
        .position(|token| matches!(token, PathToken::Wildcard))
}

/// Replaces wildcards left to right with `indices`; missing indices bind to 0.
pub fn bind_wildcards(tokens: &[PathToken], indices: &[usize]) -> Vec<PathToken> {
    let mut bound = indices.iter().copied();
    tokens
        .iter()
        .map(|token| match token {
            PathToken::Wildcard => PathToken::Index(bound.next().unwrap_or(0)),
            other => other.clone(),
        })
        .collect()
}

/// Looks up a concrete path. A wildcard never matches.
pub fn get_path<'a>(value: &'a JsonValue, tokens: &[PathToken]) -> Option<&'a JsonValue> {
    let mut current = value;
    for token in tokens {
        current = match (token, current) {
            (PathToken::Key(key), JsonValue::Object(map)) => map.get(key)?,
            (PathToken::Index(index), JsonValue::Array(items)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

/// One value found below a wildcard, with the array element it was found in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit<'a> {
    pub scope: &'a JsonValue,
    pub value: &'a JsonValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<'a> {
    Absent,
    Single(&'a JsonValue),
    Flat(Vec<Hit<'a>>),
    /// One group per outer element. `None` marks an outer element whose
    /// inner array could not be resolved.
    Grouped(Vec<Vec<Option<Hit<'a>>>>),
}

impl Resolved<'_> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Resolved::Absent)
    }
}

pub fn resolve<'a>(doc: &'a JsonValue, tokens: &[PathToken]) -> Result<Resolved<'a>, PathError> {
    let wildcards: Vec<usize> = tokens
        .iter()
        .enumerate()
        .filter(|(_, token)| matches!(token, PathToken::Wildcard))
        .map(|(pos, _)| pos)
        .collect();

    match wildcards.as_slice() {
        [] => Ok(get_path(doc, tokens).map_or(Resolved::Absent, Resolved::Single)),
        [at] => {
            let Some(JsonValue::Array(items)) = get_path(doc, &tokens[..*at]) else {
                return Ok(Resolved::Absent);
            };
            Ok(Resolved::Flat(collect_hits(items, &tokens[at + 1..])))
        }
        [outer, inner] => {
            let Some(JsonValue::Array(outers)) = get_path(doc, &tokens[..*outer]) else {
                return Ok(Resolved::Absent);
            };
            let middle = &tokens[outer + 1..*inner];
            let rest = &tokens[inner + 1..];
            let groups = outers
                .iter()
                .map(|element| match get_path(element, middle) {
                    Some(JsonValue::Array(items)) => {
                        collect_hits(items, rest).into_iter().map(Some).collect()
                    }
                    _ => vec![None],
                })
                .collect();
            Ok(Resolved::Grouped(groups))
        }
        _ => Err(PathError::TooManyWildcards {
            count: wildcards.len(),
        }),
    }
}

fn collect_hits<'a>(items: &'a [JsonValue], rest: &[PathToken]) -> Vec<Hit<'a>> {
    items
        .iter()
        .filter_map(|item| get_path(item, rest).map(|value| Hit { scope: item, value }))
        .collect()
}

/// Writes `value` at a concrete path, creating objects and arrays on the way.
/// Arrays are padded with `null` up to the written index. A scalar in the way
/// is replaced; an object where an array is needed (or the reverse) is a
/// [`PathError::ShapeConflict`] so earlier writes are never dropped.
pub fn set_path(doc: &mut JsonValue, tokens: &[PathToken], value: JsonValue) -> Result<(), PathError> {
    let mut current = doc;
    for token in tokens {
        current = match token {
            PathToken::Key(key) => {
                if current.is_array() {
                    return Err(PathError::ShapeConflict { expected: "an object" });
                }
                if !current.is_object() {
                    *current = JsonValue::Object(JsonMap::new());
                }
                match current {
                    JsonValue::Object(map) => map.entry(key.clone()).or_insert(JsonValue::Null),
                    _ => return Err(PathError::ShapeConflict { expected: "an object" }),
                }
            }
            PathToken::Index(index) => {
                let len = index
                    .checked_add(1)
                    .filter(|_| *index <= MAX_INDEX)
                    .ok_or_else(|| PathError::IndexTooLarge {
                        index: index.to_string(),
                    })?;
                if current.is_object() {
                    return Err(PathError::ShapeConflict { expected: "an array" });
                }
                if !current.is_array() {
                    *current = JsonValue::Array(Vec::new());
                }
                match current {
                    JsonValue::Array(items) => {
                        if items.len() < len {
                            items.resize(len, JsonValue::Null);
                        }
                        &mut items[*index]
                    }
                    _ => return Err(PathError::ShapeConflict { expected: "an array" }),
                }
            }
            PathToken::Wildcard => return Err(PathError::UnboundWildcard),
        };
    }
    *current = value;
    Ok(())
}
