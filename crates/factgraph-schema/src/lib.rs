//! Input schemas for FactGraph.
//!
//! The evaluation engine treats input validation as a capability: every
//! declared input carries a schema that can
//!
//! - validate a single-key record (`Schema::call`),
//! - describe the key paths it accepts (`Schema::key_map`), and
//! - project an arbitrary record down to that accepted sub-structure
//!   (`KeyMap::write`).
//!
//! This crate defines the capability interface plus the typed key-map
//! machinery, and ships a concrete rule-driven validator in [`rules`].
//!
//! Key paths address locations in nested input records: named segments for
//! map keys, integer segments for positions in entity collections. Matching
//! is *structural prefix* matching: `[:circles]` is accepted by an array
//! key named `circles`, and so is `[:circles, 0, :radius]` when the element
//! schema declares `radius`.

pub mod rules;

use std::fmt;

use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

pub type Name = String;

// ============================================================================
// Key paths
// ============================================================================

/// One segment of a key path: a record key or a collection index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(untagged)]
pub enum KeySegment {
    Index(usize),
    Name(Name),
}

impl From<&str> for KeySegment {
    fn from(name: &str) -> Self {
        KeySegment::Name(name.to_string())
    }
}

impl From<usize> for KeySegment {
    fn from(index: usize) -> Self {
        KeySegment::Index(index)
    }
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySegment::Name(name) => write!(f, "{name}"),
            KeySegment::Index(index) => write!(f, "{index}"),
        }
    }
}

impl Serialize for KeySegment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            KeySegment::Name(name) => serializer.serialize_str(name),
            KeySegment::Index(index) => serializer.serialize_u64(*index as u64),
        }
    }
}

/// An ordered sequence of key segments addressing a location in a nested
/// input record, e.g. `circles[1].radius`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyPath(Vec<KeySegment>);

impl KeyPath {
    pub fn new(segments: Vec<KeySegment>) -> Self {
        Self(segments)
    }

    /// A path of length 1 addressing a top-level key.
    pub fn root(name: impl Into<Name>) -> Self {
        Self(vec![KeySegment::Name(name.into())])
    }

    pub fn segments(&self) -> &[KeySegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The top-level key name, if the path starts with one.
    pub fn first_name(&self) -> Option<&str> {
        match self.0.first() {
            Some(KeySegment::Name(name)) => Some(name),
            _ => None,
        }
    }

    /// Extend the path downward by one segment.
    pub fn child(&self, segment: impl Into<KeySegment>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }
}

impl From<Vec<KeySegment>> for KeyPath {
    fn from(segments: Vec<KeySegment>) -> Self {
        Self(segments)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                KeySegment::Name(name) if i == 0 => write!(f, "{name}")?,
                KeySegment::Name(name) => write!(f, ".{name}")?,
                KeySegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

// Error maps are keyed by path; serialize as the display form so they stay
// representable as JSON object keys.
impl Serialize for KeyPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Build a [`KeyPath`] from name and index literals:
/// `key_path!["circles", 0, "radius"]`.
#[macro_export]
macro_rules! key_path {
    ($($segment:expr),* $(,)?) => {
        $crate::KeyPath::new(vec![$($crate::KeySegment::from($segment)),*])
    };
}

// ============================================================================
// Typed keys
// ============================================================================

/// A typed key structure exposed by a schema.
///
/// - `Scalar` matches a key path of length 1 equal to its name.
/// - `Array` matches when the first segment equals its name; a second
///   segment, if present, must be an index (any index position matches); the
///   remainder, if any, must recursively match the element key map.
/// - `Hash` matches when the first segment equals its name; the remainder,
///   if any, must recursively match one of its member keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Key {
    Scalar { name: Name },
    Array { name: Name, element: KeyMap },
    Hash { name: Name, members: KeyMap },
}

impl Key {
    pub fn name(&self) -> &str {
        match self {
            Key::Scalar { name } | Key::Array { name, .. } | Key::Hash { name, .. } => name,
        }
    }

    pub fn matches(&self, segments: &[KeySegment]) -> bool {
        let Some(first) = segments.first() else {
            return false;
        };
        match self {
            Key::Scalar { name } => {
                segments.len() == 1 && matches!(first, KeySegment::Name(n) if n == name)
            }
            Key::Array { name, element } => {
                if !matches!(first, KeySegment::Name(n) if n == name) {
                    return false;
                }
                match segments.get(1) {
                    None => true,
                    Some(KeySegment::Index(_)) => {
                        segments.len() == 2 || element.matches_segments(&segments[2..])
                    }
                    Some(KeySegment::Name(_)) => false,
                }
            }
            Key::Hash { name, members } => {
                if !matches!(first, KeySegment::Name(n) if n == name) {
                    return false;
                }
                segments.len() == 1 || members.matches_segments(&segments[1..])
            }
        }
    }
}

/// The set of typed keys a schema accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMap {
    keys: Vec<Key>,
}

impl KeyMap {
    pub fn new(keys: Vec<Key>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// True when any key accepts `path` (structural prefix matching).
    pub fn matches(&self, path: &KeyPath) -> bool {
        self.matches_segments(path.segments())
    }

    fn matches_segments(&self, segments: &[KeySegment]) -> bool {
        self.keys.iter().any(|key| key.matches(segments))
    }

    /// Project `record` down to the sub-structure this key map recognises.
    ///
    /// Unknown top-level keys are dropped, absent keys are omitted, and
    /// values whose shape does not match the key (e.g. a non-array under an
    /// array key) are passed through unchanged so the validator can report
    /// them.
    pub fn write(&self, record: &serde_json::Value) -> serde_json::Value {
        let Some(fields) = record.as_object() else {
            return serde_json::Value::Object(serde_json::Map::new());
        };

        let mut out = serde_json::Map::new();
        for key in &self.keys {
            let Some(value) = fields.get(key.name()) else {
                continue;
            };
            out.insert(key.name().to_string(), project_value(key, value));
        }
        serde_json::Value::Object(out)
    }
}

fn project_value(key: &Key, value: &serde_json::Value) -> serde_json::Value {
    match key {
        Key::Scalar { .. } => value.clone(),
        Key::Array { element, .. } => {
            let Some(items) = value.as_array() else {
                return value.clone();
            };
            if element.is_empty() {
                return value.clone();
            }
            serde_json::Value::Array(items.iter().map(|item| element.write(item)).collect())
        }
        Key::Hash { members, .. } => {
            if value.is_object() {
                members.write(value)
            } else {
                value.clone()
            }
        }
    }
}

// ============================================================================
// Schema capability
// ============================================================================

/// A single validation failure: where, and what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaError {
    pub path: KeyPath,
    pub text: String,
}

/// The outcome of validating one input record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaResult {
    pub errors: Vec<SchemaError>,
}

impl SchemaResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failure(errors: Vec<SchemaError>) -> Self {
        Self { errors }
    }

    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// The capability the evaluation engine consumes: validate one named value
/// and describe the key paths the schema accepts.
pub trait Schema: fmt::Debug + Send + Sync {
    /// Validate a single-key record, e.g. `{"scale": 5}`.
    fn call(&self, record: &serde_json::Value) -> SchemaResult;

    /// The typed keys this schema accepts.
    fn key_map(&self) -> &KeyMap;
}
