//! Config bag
//!
//! The orchestration engine's per-resource state: an ordered JSON object
//! addressed by [`FieldPath`]. Typed access goes through the field codec in
//! [`codec`], checked against a static [`schema::Schema`].

pub mod codec;
pub mod path;
pub mod schema;

use serde_json::{Map, Value};
use thiserror::Error;

pub use codec::{normalize, BlockReader, BlockWriter};
pub use path::{FieldPath, Segment};
pub use schema::{DefaultValue, Field, FieldKind, Schema};

/// Field holding the resource identity; its presence marks the resource as
/// existing.
pub const ID_FIELD: &str = "id";

/// Errors raised by field access
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("invalid field path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("field '{path}' is not declared by schema '{schema}'")]
    UnknownField { schema: &'static str, path: String },

    #[error("field '{path}' is declared as {declared} but was accessed as {requested}")]
    KindMismatch {
        path: String,
        declared: &'static str,
        requested: &'static str,
    },

    #[error("field '{path}' expected a {expected} value, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("required field '{path}' is not set")]
    MissingRequired { path: String },

    #[error("field '{path}' has value '{value}', expected one of {allowed:?}")]
    NotAllowed {
        path: String,
        value: String,
        allowed: &'static [&'static str],
    },

    #[error("field '{path}' allows at most {max} items, found {found}")]
    TooManyItems {
        path: String,
        max: usize,
        found: usize,
    },
}

/// Get/set access to named fields. No transactions, last write wins.
pub trait ConfigStore {
    /// Value at `path`; the root path yields the whole bag
    fn get(&self, path: &FieldPath) -> Option<Value>;

    /// Write `value` at `path`, creating intermediate blocks and lists
    fn set(&mut self, path: &FieldPath, value: Value) -> Result<(), FieldError>;

    /// Remove every field; signals that the resource no longer exists
    fn clear(&mut self);
}

/// In-memory config store backed by an ordered JSON object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigBag {
    root: Map<String, Value>,
}

impl ConfigBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value; anything other than an object is rejected
    pub fn from_value(value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            Value::Null => Ok(Self::new()),
            other => Err(FieldError::TypeMismatch {
                path: "<root>".to_string(),
                expected: "block",
                found: codec::json_type(&other),
            }),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.root)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    /// Persisted identity, if the resource exists
    pub fn id(&self) -> Option<&str> {
        self.root
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn exists(&self) -> bool {
        self.id().is_some()
    }
}

fn invalid(path: &FieldPath, reason: impl Into<String>) -> FieldError {
    FieldError::InvalidPath {
        path: path.to_string(),
        reason: reason.into(),
    }
}

/// Walk into `slot` along `rest`, creating containers as needed, and store
/// `value` at the end.
fn set_in(
    slot: &mut Value,
    full: &FieldPath,
    rest: &[Segment],
    value: Value,
) -> Result<(), FieldError> {
    let Some((head, tail)) = rest.split_first() else {
        *slot = value;
        return Ok(());
    };

    match head {
        Segment::Key(key) => {
            if slot.is_null() {
                *slot = Value::Object(Map::new());
            }
            let Value::Object(map) = slot else {
                return Err(invalid(full, format!("'{}' is not inside a block", key)));
            };
            let child = map.entry(key.clone()).or_insert(Value::Null);
            set_in(child, full, tail, value)
        }
        Segment::Index(idx) => {
            if slot.is_null() {
                *slot = Value::Array(Vec::new());
            }
            let Value::Array(items) = slot else {
                return Err(invalid(full, format!("index {} is not inside a list", idx)));
            };
            if *idx == items.len() {
                items.push(Value::Null);
            }
            let len = items.len();
            let child = items
                .get_mut(*idx)
                .ok_or_else(|| invalid(full, format!("index {} out of range (len {})", idx, len)))?;
            set_in(child, full, tail, value)
        }
    }
}

impl ConfigStore for ConfigBag {
    fn get(&self, path: &FieldPath) -> Option<Value> {
        let mut segments = path.segments().iter();
        let Some(first) = segments.next() else {
            return Some(Value::Object(self.root.clone()));
        };

        let mut current = match first {
            Segment::Key(key) => self.root.get(key)?,
            Segment::Index(_) => return None,
        };
        for segment in segments {
            current = match segment {
                Segment::Key(key) => current.as_object()?.get(key)?,
                Segment::Index(idx) => current.as_array()?.get(*idx)?,
            };
        }
        Some(current.clone())
    }

    fn set(&mut self, path: &FieldPath, value: Value) -> Result<(), FieldError> {
        let Some((first, tail)) = path.segments().split_first() else {
            return match value {
                Value::Object(map) => {
                    self.root = map;
                    Ok(())
                }
                _ => Err(invalid(path, "the bag root must be a block")),
            };
        };

        match first {
            Segment::Key(key) => {
                let slot = self.root.entry(key.clone()).or_insert(Value::Null);
                set_in(slot, path, tail, value)
            }
            Segment::Index(_) => Err(invalid(path, "the bag root is not a list")),
        }
    }

    fn clear(&mut self) {
        self.root.clear();
    }
}
