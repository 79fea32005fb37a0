//! Field Codec
//!
//! Typed reads and writes of config bag blocks, checked against a static
//! [`Schema`]. Reading an undeclared field, or reading a field through a
//! getter of the wrong kind, is an error at the mapper boundary rather than a
//! silent coercion deep inside expand/flatten helpers.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use super::path::FieldPath;
use super::schema::{DefaultValue, Field, FieldKind, Schema};
use super::{FieldError, ID_FIELD};

/// Name of a JSON value's type, for error messages
pub fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "block",
    }
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Value used for a field the source left absent: its declared default, or
/// the canonical empty value of its kind.
fn empty_value(field: &Field) -> Value {
    match field.default {
        Some(DefaultValue::Str(s)) => return Value::String(s.to_string()),
        Some(DefaultValue::Bool(b)) => return Value::Bool(b),
        Some(DefaultValue::Int(i)) => return Value::Number(i.into()),
        Some(DefaultValue::Float(f)) => return float_value(f),
        None => {}
    }

    match field.kind {
        FieldKind::String => Value::String(String::new()),
        FieldKind::Int => Value::Number(0.into()),
        FieldKind::Float => float_value(0.0),
        FieldKind::Bool => Value::Bool(false),
        FieldKind::StringMap => Value::Object(Map::new()),
        FieldKind::StringList
        | FieldKind::StringSet
        | FieldKind::IntList
        | FieldKind::BlockList(_)
        | FieldKind::BlockSet(_) => Value::Array(Vec::new()),
    }
}

fn sorted_set(mut values: Vec<String>) -> Vec<String> {
    values.sort();
    values.dedup();
    values
}

/// Typed read access to one block of a config bag
#[derive(Debug, Clone)]
pub struct BlockReader<'a> {
    schema: &'static Schema,
    values: &'a Map<String, Value>,
    path: FieldPath,
}

impl<'a> BlockReader<'a> {
    pub fn new(schema: &'static Schema, values: &'a Map<String, Value>) -> Self {
        Self {
            schema,
            values,
            path: FieldPath::root(),
        }
    }

    /// Wrap a value that must be a block
    pub fn from_value(schema: &'static Schema, value: &'a Value) -> Result<Self, FieldError> {
        match value {
            Value::Object(map) => Ok(Self::new(schema, map)),
            other => Err(FieldError::TypeMismatch {
                path: "<root>".to_string(),
                expected: "block",
                found: json_type(other),
            }),
        }
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    fn field_path(&self, name: &str) -> String {
        self.path.key(name).to_string()
    }

    fn lookup(
        &self,
        name: &str,
        requested: &'static str,
        accepts: fn(&FieldKind) -> bool,
    ) -> Result<&'static Field, FieldError> {
        let field = self
            .schema
            .field(name)
            .ok_or_else(|| FieldError::UnknownField {
                schema: self.schema.name,
                path: self.field_path(name),
            })?;

        if !accepts(&field.kind) {
            return Err(FieldError::KindMismatch {
                path: self.field_path(name),
                declared: field.kind.name(),
                requested,
            });
        }

        Ok(field)
    }

    /// Raw value; `null` counts as absent
    fn raw(&self, name: &str) -> Option<&'a Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    fn mismatch(&self, name: &str, expected: &'static str, found: &Value) -> FieldError {
        FieldError::TypeMismatch {
            path: self.field_path(name),
            expected,
            found: json_type(found),
        }
    }

    fn check_allowed(&self, field: &Field, value: &str) -> Result<(), FieldError> {
        if field.allowed.is_empty() || value.is_empty() || field.allowed.contains(&value) {
            return Ok(());
        }
        Err(FieldError::NotAllowed {
            path: self.field_path(field.name),
            value: value.to_string(),
            allowed: field.allowed,
        })
    }

    pub fn string(&self, name: &str) -> Result<String, FieldError> {
        let field = self.lookup(name, "string", |k| matches!(k, FieldKind::String))?;
        let value = match self.raw(name) {
            None => match field.default {
                Some(DefaultValue::Str(s)) => s.to_string(),
                _ => String::new(),
            },
            Some(Value::String(s)) => s.clone(),
            Some(other) => return Err(self.mismatch(name, "string", other)),
        };
        self.check_allowed(field, &value)?;
        Ok(value)
    }

    /// A string field, `None` when empty
    pub fn optional_string(&self, name: &str) -> Result<Option<String>, FieldError> {
        let value = self.string(name)?;
        Ok((!value.is_empty()).then_some(value))
    }

    pub fn int(&self, name: &str) -> Result<i64, FieldError> {
        let field = self.lookup(name, "int", |k| matches!(k, FieldKind::Int))?;
        match self.raw(name) {
            None => Ok(match field.default {
                Some(DefaultValue::Int(i)) => i,
                _ => 0,
            }),
            Some(value) => value
                .as_i64()
                .ok_or_else(|| self.mismatch(name, "int", value)),
        }
    }

    pub fn float(&self, name: &str) -> Result<f64, FieldError> {
        let field = self.lookup(name, "float", |k| matches!(k, FieldKind::Float))?;
        match self.raw(name) {
            None => Ok(match field.default {
                Some(DefaultValue::Float(f)) => f,
                Some(DefaultValue::Int(i)) => i as f64,
                _ => 0.0,
            }),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| self.mismatch(name, "float", value)),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool, FieldError> {
        let field = self.lookup(name, "bool", |k| matches!(k, FieldKind::Bool))?;
        match self.raw(name) {
            None => Ok(matches!(field.default, Some(DefaultValue::Bool(true)))),
            Some(value) => value
                .as_bool()
                .ok_or_else(|| self.mismatch(name, "bool", value)),
        }
    }

    /// String list or set. Sets come back sorted and de-duplicated.
    pub fn strings(&self, name: &str) -> Result<Vec<String>, FieldError> {
        let field = self.lookup(name, "string list", |k| {
            matches!(k, FieldKind::StringList | FieldKind::StringSet)
        })?;
        let Some(value) = self.raw(name) else {
            return Ok(Vec::new());
        };
        let items = value
            .as_array()
            .ok_or_else(|| self.mismatch(name, "list", value))?;

        let mut result = Vec::with_capacity(items.len());
        for item in items {
            let s = item
                .as_str()
                .ok_or_else(|| self.mismatch(name, "string", item))?;
            result.push(s.to_string());
        }

        Ok(match field.kind {
            FieldKind::StringSet => sorted_set(result),
            _ => result,
        })
    }

    pub fn ints(&self, name: &str) -> Result<Vec<i64>, FieldError> {
        self.lookup(name, "int list", |k| matches!(k, FieldKind::IntList))?;
        let Some(value) = self.raw(name) else {
            return Ok(Vec::new());
        };
        let items = value
            .as_array()
            .ok_or_else(|| self.mismatch(name, "list", value))?;
        items
            .iter()
            .map(|item| item.as_i64().ok_or_else(|| self.mismatch(name, "int", item)))
            .collect()
    }

    pub fn string_map(&self, name: &str) -> Result<BTreeMap<String, String>, FieldError> {
        self.lookup(name, "string map", |k| matches!(k, FieldKind::StringMap))?;
        let Some(value) = self.raw(name) else {
            return Ok(BTreeMap::new());
        };
        let map = value
            .as_object()
            .ok_or_else(|| self.mismatch(name, "string map", value))?;

        let mut result = BTreeMap::new();
        for (key, item) in map {
            let s = item
                .as_str()
                .ok_or_else(|| self.mismatch(name, "string", item))?;
            result.insert(key.clone(), s.to_string());
        }
        Ok(result)
    }

    /// Nested blocks of a block list or set
    pub fn blocks(&self, name: &str) -> Result<Vec<BlockReader<'a>>, FieldError> {
        let field = self.lookup(name, "block list", |k| {
            matches!(k, FieldKind::BlockList(_) | FieldKind::BlockSet(_))
        })?;
        let Some(value) = self.raw(name) else {
            return Ok(Vec::new());
        };
        let items = value
            .as_array()
            .ok_or_else(|| self.mismatch(name, "list", value))?;
        let Some(schema) = field.kind.block_schema() else {
            return Ok(Vec::new());
        };

        let mut result = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            let map = item
                .as_object()
                .ok_or_else(|| self.mismatch(name, "block", item))?;
            result.push(BlockReader {
                schema,
                values: map,
                path: self.path.key(name).index(idx),
            });
        }
        Ok(result)
    }

    /// First block of a single-item block list
    pub fn block(&self, name: &str) -> Result<Option<BlockReader<'a>>, FieldError> {
        Ok(self.blocks(name)?.into_iter().next())
    }

    /// Whether a field carries a non-empty value. Used as the presence test
    /// for variant groups.
    pub fn is_populated(&self, name: &str) -> Result<bool, FieldError> {
        self.lookup(name, "any", |_| true)?;
        Ok(match self.raw(name) {
            None => false,
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        })
    }

    /// Check the block against its schema: no undeclared fields, required
    /// fields present, types and permitted values respected. Recurses into
    /// nested blocks.
    pub fn validate(&self) -> Result<(), FieldError> {
        for key in self.values.keys() {
            if self.path.is_root() && key == ID_FIELD {
                continue;
            }
            if self.schema.field(key).is_none() {
                return Err(FieldError::UnknownField {
                    schema: self.schema.name,
                    path: self.field_path(key),
                });
            }
        }

        for field in self.schema.fields {
            let name = field.name;
            if field.required && self.raw(name).is_none() {
                return Err(FieldError::MissingRequired {
                    path: self.field_path(name),
                });
            }

            let count = match field.kind {
                FieldKind::String => {
                    let value = self.string(name)?;
                    if field.required && value.is_empty() {
                        return Err(FieldError::MissingRequired {
                            path: self.field_path(name),
                        });
                    }
                    None
                }
                FieldKind::Int => self.int(name).map(|_| None)?,
                FieldKind::Float => self.float(name).map(|_| None)?,
                FieldKind::Bool => self.bool(name).map(|_| None)?,
                FieldKind::StringList | FieldKind::StringSet => {
                    Some(self.strings(name)?.len())
                }
                FieldKind::IntList => Some(self.ints(name)?.len()),
                FieldKind::StringMap => self.string_map(name).map(|_| None)?,
                FieldKind::BlockList(_) | FieldKind::BlockSet(_) => {
                    let blocks = self.blocks(name)?;
                    for block in &blocks {
                        block.validate()?;
                    }
                    Some(blocks.len())
                }
            };

            if let Some(count) = count {
                if field.required && count == 0 {
                    return Err(FieldError::MissingRequired {
                        path: self.field_path(name),
                    });
                }
                if let Some(max) = field.max_items {
                    if count > max {
                        return Err(FieldError::TooManyItems {
                            path: self.field_path(name),
                            max,
                            found: count,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

/// Typed construction of a bag fragment
#[derive(Debug)]
pub struct BlockWriter {
    schema: &'static Schema,
    values: Map<String, Value>,
}

impl BlockWriter {
    pub fn new(schema: &'static Schema) -> Self {
        Self {
            schema,
            values: Map::new(),
        }
    }

    fn lookup(
        &self,
        name: &str,
        requested: &'static str,
        accepts: fn(&FieldKind) -> bool,
    ) -> Result<&'static Field, FieldError> {
        let field = self
            .schema
            .field(name)
            .ok_or_else(|| FieldError::UnknownField {
                schema: self.schema.name,
                path: name.to_string(),
            })?;
        if !accepts(&field.kind) {
            return Err(FieldError::KindMismatch {
                path: name.to_string(),
                declared: field.kind.name(),
                requested,
            });
        }
        Ok(field)
    }

    pub fn string(&mut self, name: &str, value: impl Into<String>) -> Result<&mut Self, FieldError> {
        self.lookup(name, "string", |k| matches!(k, FieldKind::String))?;
        self.values
            .insert(name.to_string(), Value::String(value.into()));
        Ok(self)
    }

    /// Absent values fall back to the declared default on [`finish`](Self::finish)
    pub fn opt_string(&mut self, name: &str, value: Option<&str>) -> Result<&mut Self, FieldError> {
        match value {
            Some(v) => self.string(name, v),
            None => {
                self.lookup(name, "string", |k| matches!(k, FieldKind::String))?;
                Ok(self)
            }
        }
    }

    pub fn int(&mut self, name: &str, value: i64) -> Result<&mut Self, FieldError> {
        self.lookup(name, "int", |k| matches!(k, FieldKind::Int))?;
        self.values.insert(name.to_string(), Value::Number(value.into()));
        Ok(self)
    }

    pub fn opt_int(&mut self, name: &str, value: Option<i64>) -> Result<&mut Self, FieldError> {
        match value {
            Some(v) => self.int(name, v),
            None => {
                self.lookup(name, "int", |k| matches!(k, FieldKind::Int))?;
                Ok(self)
            }
        }
    }

    pub fn float(&mut self, name: &str, value: f64) -> Result<&mut Self, FieldError> {
        self.lookup(name, "float", |k| matches!(k, FieldKind::Float))?;
        self.values.insert(name.to_string(), float_value(value));
        Ok(self)
    }

    pub fn bool(&mut self, name: &str, value: bool) -> Result<&mut Self, FieldError> {
        self.lookup(name, "bool", |k| matches!(k, FieldKind::Bool))?;
        self.values.insert(name.to_string(), Value::Bool(value));
        Ok(self)
    }

    pub fn opt_bool(&mut self, name: &str, value: Option<bool>) -> Result<&mut Self, FieldError> {
        match value {
            Some(v) => self.bool(name, v),
            None => {
                self.lookup(name, "bool", |k| matches!(k, FieldKind::Bool))?;
                Ok(self)
            }
        }
    }

    pub fn strings<I, S>(&mut self, name: &str, values: I) -> Result<&mut Self, FieldError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let field = self.lookup(name, "string list", |k| {
            matches!(k, FieldKind::StringList | FieldKind::StringSet)
        })?;
        let mut items: Vec<String> = values.into_iter().map(Into::into).collect();
        if matches!(field.kind, FieldKind::StringSet) {
            items = sorted_set(items);
        }
        self.values.insert(
            name.to_string(),
            Value::Array(items.into_iter().map(Value::String).collect()),
        );
        Ok(self)
    }

    pub fn ints(&mut self, name: &str, values: &[i64]) -> Result<&mut Self, FieldError> {
        self.lookup(name, "int list", |k| matches!(k, FieldKind::IntList))?;
        self.values.insert(
            name.to_string(),
            Value::Array(values.iter().map(|v| Value::Number((*v).into())).collect()),
        );
        Ok(self)
    }

    pub fn string_map(
        &mut self,
        name: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<&mut Self, FieldError> {
        self.lookup(name, "string map", |k| matches!(k, FieldKind::StringMap))?;
        let map: Map<String, Value> = values
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        self.values.insert(name.to_string(), Value::Object(map));
        Ok(self)
    }

    /// Writer for the nested schema of a block field
    pub fn nested(&self, name: &str) -> Result<BlockWriter, FieldError> {
        let field = self.lookup(name, "block list", |k| {
            matches!(k, FieldKind::BlockList(_) | FieldKind::BlockSet(_))
        })?;
        match field.kind.block_schema() {
            Some(schema) => Ok(BlockWriter::new(schema)),
            None => Err(FieldError::KindMismatch {
                path: name.to_string(),
                declared: field.kind.name(),
                requested: "block list",
            }),
        }
    }

    pub fn blocks(
        &mut self,
        name: &str,
        blocks: Vec<Map<String, Value>>,
    ) -> Result<&mut Self, FieldError> {
        self.lookup(name, "block list", |k| {
            matches!(k, FieldKind::BlockList(_) | FieldKind::BlockSet(_))
        })?;
        self.values.insert(
            name.to_string(),
            Value::Array(blocks.into_iter().map(Value::Object).collect()),
        );
        Ok(self)
    }

    /// A single-item block list; `None` writes an empty list
    pub fn block(
        &mut self,
        name: &str,
        block: Option<Map<String, Value>>,
    ) -> Result<&mut Self, FieldError> {
        self.blocks(name, block.into_iter().collect())
    }

    /// Complete the fragment: every declared field that was not written gets
    /// its default or canonical empty value.
    pub fn finish(self) -> Map<String, Value> {
        let mut values = self.values;
        for field in self.schema.fields {
            if !values.contains_key(field.name) {
                values.insert(field.name.to_string(), empty_value(field));
            }
        }
        values
    }
}

/// Canonical form of a config block: absent fields filled with defaults or
/// empty values, sets sorted, float fields held as floats. Flattening an
/// expanded block reproduces its normalized form.
pub fn normalize(schema: &'static Schema, values: &Map<String, Value>) -> Map<String, Value> {
    let mut result = Map::new();

    for field in schema.fields {
        let raw = values.get(field.name).filter(|v| !v.is_null());
        let normalized = match (raw, field.kind) {
            (None, _) => empty_value(field),
            (Some(Value::Array(items)), FieldKind::StringSet) => {
                let strings: Vec<String> = items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                Value::Array(sorted_set(strings).into_iter().map(Value::String).collect())
            }
            (Some(Value::Number(n)), FieldKind::Float) => {
                n.as_f64().map(float_value).unwrap_or(Value::Null)
            }
            (Some(Value::Array(items)), FieldKind::BlockList(nested))
            | (Some(Value::Array(items)), FieldKind::BlockSet(nested)) => Value::Array(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Object(map) => Value::Object(normalize(nested, map)),
                        other => other.clone(),
                    })
                    .collect(),
            ),
            (Some(value), _) => value.clone(),
        };
        result.insert(field.name.to_string(), normalized);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::schema::{DefaultValue, Field, FieldKind, Schema};
    use serde_json::json;

    static DIM: Schema = Schema::new(
        "dim",
        &[
            Field::required("name", FieldKind::String),
            Field::required("values", FieldKind::StringList),
        ],
    );

    static ROOT: Schema = Schema::new(
        "root",
        &[
            Field::required("name", FieldKind::String),
            Field::optional("severity", FieldKind::Int).with_default(DefaultValue::Int(3)),
            Field::optional("threshold", FieldKind::Float),
            Field::optional("enabled", FieldKind::Bool).with_default(DefaultValue::Bool(true)),
            Field::optional("scopes", FieldKind::StringSet),
            Field::optional("mode", FieldKind::String).one_of(&["Include", "Exclude"]),
            Field::optional("tags", FieldKind::StringMap),
            Field::optional("dimension", FieldKind::BlockList(&DIM)).max_items(2),
        ],
    );

    #[test]
    fn test_defaults_for_absent_fields() {
        let value = json!({"name": "a"});
        let reader = BlockReader::from_value(&ROOT, &value).unwrap();
        assert_eq!(reader.int("severity").unwrap(), 3);
        assert!(reader.bool("enabled").unwrap());
        assert_eq!(reader.float("threshold").unwrap(), 0.0);
        assert!(reader.strings("scopes").unwrap().is_empty());
        assert!(reader.string_map("tags").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let value = json!({"name": "a"});
        let reader = BlockReader::from_value(&ROOT, &value).unwrap();
        assert!(matches!(
            reader.string("nmae"),
            Err(FieldError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let value = json!({"name": "a"});
        let reader = BlockReader::from_value(&ROOT, &value).unwrap();
        assert!(matches!(
            reader.int("name"),
            Err(FieldError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_type_mismatch_reports_path() {
        let value = json!({"name": "a", "dimension": [{"name": 5, "values": ["x"]}]});
        let reader = BlockReader::from_value(&ROOT, &value).unwrap();
        let dims = reader.blocks("dimension").unwrap();
        match dims[0].string("name") {
            Err(FieldError::TypeMismatch { path, .. }) => assert_eq!(path, "dimension.0.name"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_set_sorted_and_deduplicated() {
        let value = json!({"name": "a", "scopes": ["b", "a", "b"]});
        let reader = BlockReader::from_value(&ROOT, &value).unwrap();
        assert_eq!(reader.strings("scopes").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_validate_checks_required_allowed_and_max_items() {
        let missing = json!({"severity": 1});
        let reader = BlockReader::from_value(&ROOT, &missing).unwrap();
        assert!(matches!(
            reader.validate(),
            Err(FieldError::MissingRequired { .. })
        ));

        let not_allowed = json!({"name": "a", "mode": "include"});
        let reader = BlockReader::from_value(&ROOT, &not_allowed).unwrap();
        assert!(matches!(reader.validate(), Err(FieldError::NotAllowed { .. })));

        let too_many = json!({"name": "a", "dimension": [
            {"name": "a", "values": ["1"]},
            {"name": "b", "values": ["1"]},
            {"name": "c", "values": ["1"]}
        ]});
        let reader = BlockReader::from_value(&ROOT, &too_many).unwrap();
        assert!(matches!(
            reader.validate(),
            Err(FieldError::TooManyItems { max: 2, found: 3, .. })
        ));

        let nested_missing = json!({"name": "a", "dimension": [{"name": "a"}]});
        let reader = BlockReader::from_value(&ROOT, &nested_missing).unwrap();
        match reader.validate() {
            Err(FieldError::MissingRequired { path }) => assert_eq!(path, "dimension.0.values"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_validate_skips_root_id() {
        let value = json!({"id": "/subscriptions/x", "name": "a"});
        let reader = BlockReader::from_value(&ROOT, &value).unwrap();
        assert!(reader.validate().is_ok());
    }

    #[test]
    fn test_writer_fills_defaults() {
        let mut writer = BlockWriter::new(&ROOT);
        writer.string("name", "a").unwrap();
        writer.opt_int("severity", None).unwrap();
        let fragment = writer.finish();
        assert_eq!(fragment["severity"], json!(3));
        assert_eq!(fragment["enabled"], json!(true));
        assert_eq!(fragment["mode"], json!(""));
        assert_eq!(fragment["dimension"], json!([]));
    }

    #[test]
    fn test_writer_rejects_wrong_kind() {
        let mut writer = BlockWriter::new(&ROOT);
        assert!(matches!(
            writer.bool("name", true),
            Err(FieldError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_normalize_matches_writer_output() {
        let input = json!({"name": "a", "threshold": 80, "scopes": ["z", "a"]});
        let normalized = normalize(&ROOT, input.as_object().unwrap());

        let mut writer = BlockWriter::new(&ROOT);
        writer.string("name", "a").unwrap();
        writer.float("threshold", 80.0).unwrap();
        writer.strings("scopes", ["a", "z"]).unwrap();
        assert_eq!(normalized, writer.finish());
    }
}
