//! Typed read/write paths into JSON request and response bodies.
//!
//! Profiles name fields with dotted strings such as `messages.0.content`.
//! Some sites keep the prompt inside a JSON document that is itself stored as
//! a string field; for those the path is split into an `outer` part, which
//! addresses the string, and an `inner` part navigated after re-parsing it.

use crate::error::FieldPathError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One path step. Resolves as an array index when the current value is an
/// array and the text is a non-negative integer, otherwise as an object key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment(String);

impl Segment {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn step<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        match value {
            Value::Array(items) => self.0.parse::<usize>().ok().and_then(|i| items.get(i)),
            Value::Object(map) => map.get(&self.0),
            _ => None,
        }
    }

    fn step_mut<'a>(&self, value: &'a mut Value) -> Option<&'a mut Value> {
        match value {
            Value::Array(items) => self
                .0
                .parse::<usize>()
                .ok()
                .and_then(move |i| items.get_mut(i)),
            Value::Object(map) => map.get_mut(&self.0),
            _ => None,
        }
    }

    fn assign(&self, container: &mut Value, value: Value) -> Result<(), FieldPathError> {
        match container {
            Value::Object(map) => {
                map.insert(self.0.clone(), value);
                Ok(())
            }
            Value::Array(items) => {
                let slot = self
                    .0
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get_mut(i))
                    .ok_or_else(|| FieldPathError::NotWritable(self.0.clone()))?;
                *slot = value;
                Ok(())
            }
            _ => Err(FieldPathError::NotWritable(self.0.clone())),
        }
    }
}

/// Path into a JSON value, optionally descending through an embedded
/// JSON-encoded string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    outer: Vec<Segment>,
    inner: Vec<Segment>,
}

impl FieldPath {
    /// Parse a plain dotted path.
    pub fn parse(path: &str) -> Self {
        Self {
            outer: split_segments(path),
            inner: Vec::new(),
        }
    }

    /// Parse a dotted path, treating the last segment as a key inside an
    /// embedded JSON string when `embedded` is set.
    ///
    /// Paths with fewer than two segments cannot address an embedded field
    /// and stay plain.
    pub fn parse_with_embedding(path: &str, embedded: bool) -> Self {
        let mut outer = split_segments(path);
        if !embedded || outer.len() < 2 {
            return Self {
                outer,
                inner: Vec::new(),
            };
        }
        let inner = outer.split_off(outer.len() - 1);
        Self { outer, inner }
    }

    pub fn is_embedded(&self) -> bool {
        !self.inner.is_empty()
    }

    /// Read the value at this path.
    pub fn get(&self, root: &Value) -> Result<Value, FieldPathError> {
        let target = navigate(root, &self.outer)?;
        if !self.is_embedded() {
            return Ok(target.clone());
        }
        let decoded = decode_embedded(target, self.outer.last())?;
        navigate(&decoded, &self.inner).cloned()
    }

    /// Write `value` at this path.
    ///
    /// The final key is created on an object when absent; intermediate
    /// containers are never created. Embedded writes re-serialize the inner
    /// document with its other keys untouched.
    pub fn set(&self, root: &mut Value, value: Value) -> Result<(), FieldPathError> {
        if !self.is_embedded() {
            return assign_path(root, &self.outer, value);
        }
        let target = navigate_mut(root, &self.outer)?;
        let mut decoded = decode_embedded(target, self.outer.last())?;
        assign_path(&mut decoded, &self.inner, value)?;
        *target = Value::String(decoded.to_string());
        Ok(())
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl From<String> for FieldPath {
    fn from(path: String) -> Self {
        Self::parse(&path)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .outer
            .iter()
            .chain(self.inner.iter())
            .map(Segment::as_str)
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&joined)
    }
}

impl Serialize for FieldPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Self::parse(&text))
    }
}

fn split_segments(path: &str) -> Vec<Segment> {
    path.split('.')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| Segment(part.to_string()))
        .collect()
}

fn navigate<'a>(root: &'a Value, segments: &[Segment]) -> Result<&'a Value, FieldPathError> {
    segments.iter().try_fold(root, |current, segment| {
        segment
            .step(current)
            .ok_or_else(|| FieldPathError::Missing(segment.0.clone()))
    })
}

fn navigate_mut<'a>(
    root: &'a mut Value,
    segments: &[Segment],
) -> Result<&'a mut Value, FieldPathError> {
    let mut current = root;
    for segment in segments {
        current = segment
            .step_mut(current)
            .ok_or_else(|| FieldPathError::Missing(segment.0.clone()))?;
    }
    Ok(current)
}

fn assign_path(root: &mut Value, segments: &[Segment], value: Value) -> Result<(), FieldPathError> {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return Ok(());
    };
    let container = navigate_mut(root, parents)?;
    last.assign(container, value)
}

fn decode_embedded(value: &Value, segment: Option<&Segment>) -> Result<Value, FieldPathError> {
    let name = segment.map(|s| s.0.clone()).unwrap_or_default();
    let Value::String(text) = value else {
        return Err(FieldPathError::NotEmbeddedString(name));
    };
    serde_json::from_str(text).map_err(|err| FieldPathError::EmbeddedParse(err.to_string()))
}
