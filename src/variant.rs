//! Variant Resolver
//!
//! Picks which of several mutually exclusive config groups is populated, and
//! lets a write-side shape be pinned to the shape already persisted remotely.

use std::fmt::Debug;

use thiserror::Error;

use crate::bag::{BlockReader, FieldError};

/// One mutually exclusive group, identified by its presence field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantGroup<T> {
    pub tag: T,
    pub presence_field: &'static str,
}

impl<T> VariantGroup<T> {
    pub const fn new(tag: T, presence_field: &'static str) -> Self {
        Self {
            tag,
            presence_field,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VariantError {
    #[error("exactly one of {candidates:?} must be set, none are")]
    NoVariantSelected { candidates: Vec<&'static str> },

    #[error("exactly one of {candidates:?} may be set, found {populated:?}")]
    AmbiguousVariant {
        candidates: Vec<&'static str>,
        populated: Vec<&'static str>,
    },

    #[error(transparent)]
    Field(#[from] FieldError),
}

fn candidates<T>(groups: &[VariantGroup<T>]) -> Vec<&'static str> {
    groups.iter().map(|g| g.presence_field).collect()
}

/// At most one group may be populated; none is allowed
pub fn resolve_optional<T: Copy>(
    reader: &BlockReader<'_>,
    groups: &[VariantGroup<T>],
) -> Result<Option<T>, VariantError> {
    let mut populated = Vec::new();
    for group in groups {
        if reader.is_populated(group.presence_field)? {
            populated.push(group);
        }
    }

    match populated.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(only.tag)),
        _ => Err(VariantError::AmbiguousVariant {
            candidates: candidates(groups),
            populated: populated.iter().map(|g| g.presence_field).collect(),
        }),
    }
}

/// Exactly one group must be populated
pub fn resolve_for_write<T: Copy>(
    reader: &BlockReader<'_>,
    groups: &[VariantGroup<T>],
) -> Result<T, VariantError> {
    resolve_optional(reader, groups)?.ok_or_else(|| VariantError::NoVariantSelected {
        candidates: candidates(groups),
    })
}

/// Domain unions whose runtime variant is their tag
pub trait Tagged {
    type Tag: Copy + Eq + Debug;

    fn tag(&self) -> Self::Tag;
}

pub fn resolve_for_read<D: Tagged>(object: &D) -> D::Tag {
    object.tag()
}

/// Write-side shape of a resource family.
///
/// `pin_to` combines the shape the config resolves to with the shape the
/// remote object already uses; families whose remote shapes are not freely
/// interchangeable return the persisted one. The default is the shape used
/// when nothing is persisted yet.
pub trait PersistedShape: Copy + Eq + Debug + Default + Send + Sync {
    fn pin_to(self, persisted: Self) -> Self;
}

impl PersistedShape for () {
    fn pin_to(self, _persisted: Self) -> Self {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::{Field, FieldKind, Schema};
    use serde_json::{json, Map, Value};

    static ITEM: Schema = Schema::new("item", &[Field::optional("x", FieldKind::Int)]);

    static FOUR: Schema = Schema::new(
        "four",
        &[
            Field::optional("alpha", FieldKind::BlockList(&ITEM)),
            Field::optional("beta", FieldKind::BlockList(&ITEM)),
            Field::optional("gamma", FieldKind::StringList),
            Field::optional("delta", FieldKind::String),
        ],
    );

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Tag {
        Alpha,
        Beta,
        Gamma,
        Delta,
    }

    const GROUPS: [VariantGroup<Tag>; 4] = [
        VariantGroup::new(Tag::Alpha, "alpha"),
        VariantGroup::new(Tag::Beta, "beta"),
        VariantGroup::new(Tag::Gamma, "gamma"),
        VariantGroup::new(Tag::Delta, "delta"),
    ];

    fn populated_value(field: &str) -> Value {
        match field {
            "gamma" => json!(["g"]),
            "delta" => json!("d"),
            _ => json!([{"x": 1}]),
        }
    }

    #[test]
    fn test_exclusivity_over_all_combinations() {
        for mask in 0u8..16 {
            let mut bag = Map::new();
            let mut expected = Vec::new();
            for (bit, group) in GROUPS.iter().enumerate() {
                if mask & (1 << bit) != 0 {
                    bag.insert(
                        group.presence_field.to_string(),
                        populated_value(group.presence_field),
                    );
                    expected.push(group.tag);
                } else {
                    // empty blocks do not count as populated
                    let empty = match group.presence_field {
                        "delta" => json!(""),
                        _ => json!([]),
                    };
                    bag.insert(group.presence_field.to_string(), empty);
                }
            }

            let reader = BlockReader::new(&FOUR, &bag);
            let result = resolve_for_write(&reader, &GROUPS);
            match expected.as_slice() {
                [] => assert!(
                    matches!(result, Err(VariantError::NoVariantSelected { .. })),
                    "mask {:04b}",
                    mask
                ),
                [tag] => assert_eq!(result, Ok(*tag), "mask {:04b}", mask),
                _ => assert!(
                    matches!(result, Err(VariantError::AmbiguousVariant { ref populated, .. }) if populated.len() == expected.len()),
                    "mask {:04b}",
                    mask
                ),
            }
        }
    }

    #[test]
    fn test_resolve_optional_allows_none() {
        let bag = Map::new();
        let reader = BlockReader::new(&FOUR, &bag);
        assert_eq!(resolve_optional(&reader, &GROUPS), Ok(None));
    }

    #[test]
    fn test_undeclared_presence_field_is_error() {
        let bag = Map::new();
        let reader = BlockReader::new(&FOUR, &bag);
        let groups = [VariantGroup::new(Tag::Alpha, "epsilon")];
        assert!(matches!(
            resolve_for_write(&reader, &groups),
            Err(VariantError::Field(FieldError::UnknownField { .. }))
        ));
    }
}
