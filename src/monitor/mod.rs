//! Monitor resource families
//!
//! Each submodule declares a config [`Schema`](crate::bag::Schema), the wire
//! model of its management API resource, and the expand/flatten pair that
//! maps between them.

pub mod action_group;
pub mod autoscale;
pub mod diagnostic_setting;
pub mod metric_alert;
pub mod numeric;
pub mod scheduled_query;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::bag::{BlockReader, BlockWriter, Field, FieldKind, Schema};
use crate::error::MapError;

pub use action_group::ActionGroupKind;
pub use autoscale::AutoscaleSettingKind;
pub use diagnostic_setting::DiagnosticSettingKind;
pub use metric_alert::MetricAlertKind;
pub use scheduled_query::ScheduledQueryRuleKind;

/// Location of resources that are not region bound
pub const GLOBAL_LOCATION: &str = "global";

/// Deserialize `null` as the type's default, so absent and null collections
/// flatten to the same empty value
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Empty strings map to `None`
pub(crate) fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

// ============================================================================
// Dimensions (shared by metric alerts and log-to-metric rules)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimensionOperator {
    Include,
    Exclude,
}

impl DimensionOperator {
    pub const ALLOWED: &'static [&'static str] = &["Include", "Exclude"];

    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionOperator::Include => "Include",
            DimensionOperator::Exclude => "Exclude",
        }
    }
}

impl fmt::Display for DimensionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DimensionOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Include" => Ok(DimensionOperator::Include),
            "Exclude" => Ok(DimensionOperator::Exclude),
            other => Err(format!("unknown dimension operator '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub operator: DimensionOperator,
    #[serde(default, deserialize_with = "nullable")]
    pub values: Vec<String>,
}

pub static DIMENSION_SCHEMA: Schema = Schema::new(
    "dimension",
    &[
        Field::required("name", FieldKind::String),
        Field::required("operator", FieldKind::String).one_of(DimensionOperator::ALLOWED),
        Field::required("values", FieldKind::StringList),
    ],
);

pub(crate) fn expand_dimensions(
    reader: &BlockReader<'_>,
    field: &str,
) -> Result<Vec<Dimension>, MapError> {
    reader
        .blocks(field)?
        .iter()
        .map(|block| -> Result<Dimension, MapError> {
            let raw = block.string("operator")?;
            let operator = raw.parse().map_err(|reason: String| {
                MapError::invalid(block.path().key("operator").to_string(), reason)
            })?;
            Ok(Dimension {
                name: block.string("name")?,
                operator,
                values: block.strings("values")?,
            })
        })
        .collect()
}

pub(crate) fn flatten_dimensions(dimensions: &[Dimension]) -> Result<Vec<Map<String, Value>>, MapError> {
    dimensions
        .iter()
        .map(|dimension| -> Result<Map<String, Value>, MapError> {
            let mut w = BlockWriter::new(&DIMENSION_SCHEMA);
            w.string("name", dimension.name.as_str())?
                .string("operator", dimension.operator.as_str())?
                .strings("values", dimension.values.iter().cloned())?;
            Ok(w.finish())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nullable_collections() {
        let dim: Dimension =
            serde_json::from_value(json!({"name": "a", "operator": "Include", "values": null}))
                .unwrap();
        assert!(dim.values.is_empty());
    }

    #[test]
    fn test_dimension_operator_case_preserved() {
        assert!("include".parse::<DimensionOperator>().is_err());
        assert_eq!(
            "Exclude".parse::<DimensionOperator>().unwrap(),
            DimensionOperator::Exclude
        );
    }
}
