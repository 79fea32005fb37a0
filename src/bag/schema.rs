//! Typed schema descriptions
//!
//! Each resource declares a static [`Schema`]; the field codec consults it so
//! that misspelled fields and kind mismatches surface at the mapper boundary.

/// Declared default for an optional field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(&'static str),
}

/// Value kind of a schema field
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    String,
    Int,
    Float,
    Bool,
    /// Ordered list of strings
    StringList,
    /// Unordered, de-duplicated strings
    StringSet,
    IntList,
    StringMap,
    /// Ordered nested blocks
    BlockList(&'static Schema),
    /// Unordered nested blocks
    BlockSet(&'static Schema),
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
            FieldKind::StringList => "string list",
            FieldKind::StringSet => "string set",
            FieldKind::IntList => "int list",
            FieldKind::StringMap => "string map",
            FieldKind::BlockList(_) => "block list",
            FieldKind::BlockSet(_) => "block set",
        }
    }

    /// Nested schema for block kinds
    pub fn block_schema(&self) -> Option<&'static Schema> {
        match self {
            FieldKind::BlockList(schema) | FieldKind::BlockSet(schema) => Some(schema),
            _ => None,
        }
    }
}

/// A single schema field
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<DefaultValue>,
    /// Permitted values for string fields (empty = unrestricted)
    pub allowed: &'static [&'static str],
    pub max_items: Option<usize>,
}

impl Field {
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            allowed: &[],
            max_items: None,
        }
    }

    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            allowed: &[],
            max_items: None,
        }
    }

    pub const fn with_default(self, default: DefaultValue) -> Self {
        Self {
            default: Some(default),
            ..self
        }
    }

    pub const fn one_of(self, allowed: &'static [&'static str]) -> Self {
        Self { allowed, ..self }
    }

    pub const fn max_items(self, max: usize) -> Self {
        Self {
            max_items: Some(max),
            ..self
        }
    }
}

/// A block of fields
#[derive(Debug)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [Field],
}

impl Schema {
    pub const fn new(name: &'static str, fields: &'static [Field]) -> Self {
        Self { name, fields }
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&'static Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static INNER: Schema = Schema::new("inner", &[Field::required("value", FieldKind::Int)]);

    static OUTER: Schema = Schema::new(
        "outer",
        &[
            Field::required("name", FieldKind::String),
            Field::optional("mode", FieldKind::String)
                .one_of(&["Fast", "Slow"])
                .with_default(DefaultValue::Str("Fast")),
            Field::optional("inner", FieldKind::BlockList(&INNER)).max_items(1),
        ],
    );

    #[test]
    fn test_field_lookup() {
        let mode = OUTER.field("mode").unwrap();
        assert!(!mode.required);
        assert_eq!(mode.default, Some(DefaultValue::Str("Fast")));
        assert_eq!(mode.allowed, &["Fast", "Slow"]);
        assert!(OUTER.field("missing").is_none());
    }

    #[test]
    fn test_nested_schema() {
        let inner = OUTER.field("inner").unwrap();
        assert_eq!(inner.max_items, Some(1));
        assert_eq!(inner.kind.block_schema().unwrap().name, "inner");
        assert_eq!(inner.kind.name(), "block list");
    }
}
