//! Resource Identity Codec
//!
//! Two identity shapes are handled:
//! - hierarchical management paths,
//!   `/subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}`
//! - composite keys for resources scoped to another resource,
//!   `{target_resource_id}|{name}`
//!
//! Both must round-trip exactly: `decode(encode(x)) == x`.

use std::fmt;

use thiserror::Error;

/// Provider namespace of every monitor resource
pub const INSIGHTS_NAMESPACE: &str = "Microsoft.Insights";

/// Separator of composite identities
pub const COMPOSITE_SEPARATOR: char = '|';

const PATH_SEPARATOR: char = '/';

/// Segment count of a hierarchical identity
const HIERARCHICAL_SEGMENTS: usize = 8;

/// Segment count of a composite identity
const COMPOSITE_SEGMENTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("malformed identity '{input}': expected {expected} segments, found {actual}")]
    SegmentCount {
        input: String,
        expected: usize,
        actual: usize,
    },

    #[error("malformed identity '{input}': expected segment '{expected}' at position {position}, found '{found}'")]
    UnexpectedSegment {
        input: String,
        position: usize,
        expected: String,
        found: String,
    },

    #[error("{component} '{value}' may not contain the reserved separator '{separator}'")]
    ReservedSeparator {
        component: &'static str,
        value: String,
        separator: char,
    },

    #[error("{component} may not be empty")]
    Empty { component: &'static str },

    #[error("malformed identity '{input}': expected a path starting with '{separator}'")]
    NotRooted { input: String, separator: char },
}

/// Common surface of the identity shapes
pub trait Identity: Clone + fmt::Debug + Send + Sync {
    /// Persisted string form
    fn encode(&self) -> Result<String, IdentityError>;

    /// Management API path addressing the resource
    fn resource_path(&self) -> String;
}

// ============================================================================
// Hierarchical identity
// ============================================================================

/// A resource-group scoped resource path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub subscription_id: String,
    pub resource_group: String,
    pub resource_type: String,
    pub name: String,
}

fn check_path_component(component: &'static str, value: &str) -> Result<(), IdentityError> {
    if value.is_empty() {
        return Err(IdentityError::Empty { component });
    }
    if value.contains(PATH_SEPARATOR) {
        return Err(IdentityError::ReservedSeparator {
            component,
            value: value.to_string(),
            separator: PATH_SEPARATOR,
        });
    }
    Ok(())
}

impl ResourceId {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        resource_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        let id = Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            resource_type: resource_type.into(),
            name: name.into(),
        };
        id.check()?;
        Ok(id)
    }

    fn check(&self) -> Result<(), IdentityError> {
        check_path_component("subscription id", &self.subscription_id)?;
        check_path_component("resource group", &self.resource_group)?;
        check_path_component("resource type", &self.resource_type)?;
        check_path_component("name", &self.name)
    }

    /// Parse a path of the given resource type. Only the canonical form
    /// written by [`Identity::encode`] is accepted, so the fixed keys,
    /// namespace and type must match exactly.
    pub fn parse(input: &str, resource_type: &str) -> Result<Self, IdentityError> {
        if input.is_empty() {
            return Err(IdentityError::Empty {
                component: "resource id",
            });
        }
        let Some(trimmed) = input.strip_prefix(PATH_SEPARATOR) else {
            return Err(IdentityError::NotRooted {
                input: input.to_string(),
                separator: PATH_SEPARATOR,
            });
        };

        let segments: Vec<&str> = trimmed.split(PATH_SEPARATOR).collect();
        if segments.len() != HIERARCHICAL_SEGMENTS {
            return Err(IdentityError::SegmentCount {
                input: input.to_string(),
                expected: HIERARCHICAL_SEGMENTS,
                actual: segments.len(),
            });
        }

        let fixed = [
            (0, "subscriptions"),
            (2, "resourceGroups"),
            (4, "providers"),
            (5, INSIGHTS_NAMESPACE),
            (6, resource_type),
        ];
        for (position, expected) in fixed {
            if segments[position] != expected {
                return Err(IdentityError::UnexpectedSegment {
                    input: input.to_string(),
                    position,
                    expected: expected.to_string(),
                    found: segments[position].to_string(),
                });
            }
        }

        let id = Self {
            subscription_id: segments[1].to_string(),
            resource_group: segments[3].to_string(),
            resource_type: resource_type.to_string(),
            name: segments[7].to_string(),
        };
        id.check()?;
        Ok(id)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}/providers/{}/{}/{}",
            self.subscription_id,
            self.resource_group,
            INSIGHTS_NAMESPACE,
            self.resource_type,
            self.name
        )
    }
}

impl Identity for ResourceId {
    fn encode(&self) -> Result<String, IdentityError> {
        self.check()?;
        Ok(self.to_string())
    }

    fn resource_path(&self) -> String {
        self.to_string()
    }
}

// ============================================================================
// Composite identity
// ============================================================================

/// Diagnostic settings are scoped to an arbitrary target resource, so their
/// identity pairs the target's id with the setting name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiagnosticSettingId {
    pub target_resource_id: String,
    pub name: String,
}

impl DiagnosticSettingId {
    pub fn new(
        target_resource_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        let id = Self {
            target_resource_id: target_resource_id.into(),
            name: name.into(),
        };
        id.check()?;
        Ok(id)
    }

    fn check(&self) -> Result<(), IdentityError> {
        for (component, value) in [
            ("target resource id", &self.target_resource_id),
            ("setting name", &self.name),
        ] {
            if value.is_empty() {
                return Err(IdentityError::Empty { component });
            }
            if value.contains(COMPOSITE_SEPARATOR) {
                return Err(IdentityError::ReservedSeparator {
                    component,
                    value: value.clone(),
                    separator: COMPOSITE_SEPARATOR,
                });
            }
        }
        Ok(())
    }

    /// Split `{target}|{name}`; anything other than exactly two non-empty
    /// segments is rejected.
    pub fn decode(input: &str) -> Result<Self, IdentityError> {
        let segments: Vec<&str> = input.split(COMPOSITE_SEPARATOR).collect();
        if segments.len() != COMPOSITE_SEGMENTS {
            return Err(IdentityError::SegmentCount {
                input: input.to_string(),
                expected: COMPOSITE_SEGMENTS,
                actual: segments.len(),
            });
        }
        Self::new(segments[0], segments[1])
    }
}

impl Identity for DiagnosticSettingId {
    fn encode(&self) -> Result<String, IdentityError> {
        self.check()?;
        Ok(format!(
            "{}{}{}",
            self.target_resource_id, COMPOSITE_SEPARATOR, self.name
        ))
    }

    fn resource_path(&self) -> String {
        format!(
            "{}/providers/{}/diagnosticSettings/{}",
            self.target_resource_id.trim_end_matches(PATH_SEPARATOR),
            INSIGHTS_NAMESPACE,
            self.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALERT: &str = "/subscriptions/0000/resourceGroups/rg-Prod/providers/Microsoft.Insights/metricAlerts/cpu-high";

    #[test]
    fn test_parse_hierarchical() {
        let id = ResourceId::parse(ALERT, "metricAlerts").unwrap();
        assert_eq!(id.subscription_id, "0000");
        assert_eq!(id.resource_group, "rg-Prod");
        assert_eq!(id.name, "cpu-high");
        assert_eq!(id.encode().unwrap(), ALERT);
    }

    #[test]
    fn test_parse_rejects_non_canonical_keys() {
        let lower = "/subscriptions/0000/resourcegroups/rg/providers/microsoft.insights/metricalerts/a";
        assert!(matches!(
            ResourceId::parse(lower, "metricAlerts"),
            Err(IdentityError::UnexpectedSegment { position: 2, .. })
        ));

        let wrong_type = "/subscriptions/0000/resourceGroups/rg/providers/Microsoft.Insights/metricalerts/a";
        assert!(matches!(
            ResourceId::parse(wrong_type, "metricAlerts"),
            Err(IdentityError::UnexpectedSegment { position: 6, .. })
        ));
    }

    #[test]
    fn test_parse_requires_leading_separator() {
        let relative = ALERT.trim_start_matches('/');
        assert_eq!(
            ResourceId::parse(relative, "metricAlerts").unwrap_err(),
            IdentityError::NotRooted {
                input: relative.to_string(),
                separator: '/',
            }
        );
        assert!(matches!(
            ResourceId::parse(&format!("/{}", ALERT), "metricAlerts"),
            Err(IdentityError::SegmentCount { .. })
        ));
        assert!(matches!(
            ResourceId::parse("", "metricAlerts"),
            Err(IdentityError::Empty { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_segment_count() {
        let err = ResourceId::parse("/subscriptions/0000/resourceGroups/rg", "metricAlerts")
            .unwrap_err();
        assert_eq!(
            err,
            IdentityError::SegmentCount {
                input: "/subscriptions/0000/resourceGroups/rg".to_string(),
                expected: 8,
                actual: 4,
            }
        );
    }

    #[test]
    fn test_parse_rejects_wrong_type() {
        let err = ResourceId::parse(ALERT, "actionGroups").unwrap_err();
        assert!(matches!(
            err,
            IdentityError::UnexpectedSegment { position: 6, .. }
        ));
    }

    #[test]
    fn test_new_rejects_slash_in_name() {
        assert!(matches!(
            ResourceId::new("s", "rg", "metricAlerts", "a/b"),
            Err(IdentityError::ReservedSeparator { .. })
        ));
    }

    #[test]
    fn test_composite_round_trip() {
        let id = DiagnosticSettingId::new(ALERT, "to-workspace").unwrap();
        let encoded = id.encode().unwrap();
        assert_eq!(encoded, format!("{}|to-workspace", ALERT));
        assert_eq!(DiagnosticSettingId::decode(&encoded).unwrap(), id);
    }

    #[test]
    fn test_composite_rejects_separator() {
        assert!(matches!(
            DiagnosticSettingId::new("a|b", "c"),
            Err(IdentityError::ReservedSeparator { .. })
        ));
        assert!(matches!(
            DiagnosticSettingId::new("a", "b|c"),
            Err(IdentityError::ReservedSeparator { .. })
        ));
    }

    #[test]
    fn test_composite_decode_segment_count() {
        for input in ["no-separator", "a|b|c"] {
            assert!(matches!(
                DiagnosticSettingId::decode(input),
                Err(IdentityError::SegmentCount { expected: 2, .. })
            ));
        }
    }

    #[test]
    fn test_composite_decode_rejects_empty_components() {
        assert_eq!(
            DiagnosticSettingId::decode("|audit").unwrap_err(),
            IdentityError::Empty {
                component: "target resource id"
            }
        );
        assert_eq!(
            DiagnosticSettingId::decode(&format!("{}|", ALERT)).unwrap_err(),
            IdentityError::Empty {
                component: "setting name"
            }
        );
        assert!(matches!(
            DiagnosticSettingId::decode("|"),
            Err(IdentityError::Empty { .. })
        ));
        assert!(DiagnosticSettingId::new("", "audit").is_err());
    }

    #[test]
    fn test_composite_resource_path() {
        let id = DiagnosticSettingId::new("/subscriptions/1/resourceGroups/rg/providers/Microsoft.Web/sites/app", "diag").unwrap();
        assert_eq!(
            id.resource_path(),
            "/subscriptions/1/resourceGroups/rg/providers/Microsoft.Web/sites/app/providers/Microsoft.Insights/diagnosticSettings/diag"
        );
    }
}
