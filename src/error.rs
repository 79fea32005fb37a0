//! Error taxonomy
//!
//! Mappers raise [`MapError`] without resource context; the reconciler wraps
//! it, together with remote and polling failures, into [`ReconcileError`].

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::azure::ApiError;
use crate::bag::FieldError;
use crate::identity::IdentityError;
use crate::variant::VariantError;

/// The four reconciler operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        })
    }
}

/// Failures of expand/flatten
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapError {
    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Variant(#[from] VariantError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("malformed remote value for '{field}' ({raw:?}): {reason}")]
    Malformed {
        field: String,
        raw: String,
        reason: String,
    },
}

impl MapError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        MapError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed(
        field: impl Into<String>,
        raw: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        MapError::Malformed {
            field: field.into(),
            raw: raw.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Bad user input; raised before any remote call
    #[error("invalid configuration for {resource}: {reason}")]
    Configuration {
        resource: &'static str,
        reason: String,
    },

    #[error("invalid identity for {resource}: {source}")]
    Identity {
        resource: &'static str,
        #[source]
        source: IdentityError,
    },

    /// A trusted-format response carried an unparseable value
    #[error("{resource}: malformed remote value for '{field}' ({raw:?}): {reason}")]
    MalformedRemoteValue {
        resource: &'static str,
        field: String,
        raw: String,
        reason: String,
    },

    #[error("a {resource} with id '{id}' already exists and must be imported to be managed")]
    AlreadyExists { resource: &'static str, id: String },

    #[error("{operation} of {resource} '{id}' timed out after {elapsed:?}; the remote change may already have been applied")]
    Timeout {
        operation: Operation,
        resource: &'static str,
        id: String,
        elapsed: Duration,
    },

    #[error("{operation} of {resource} '{id}' failed: {source}")]
    Remote {
        operation: Operation,
        resource: &'static str,
        id: String,
        #[source]
        source: ApiError,
    },

    #[error("{resource} '{id}' disappeared after {operation}")]
    Vanished {
        operation: Operation,
        resource: &'static str,
        id: String,
    },

    #[error("{operation} of {resource} '{id}' was cancelled; the remote change may already have been applied")]
    Cancelled {
        operation: Operation,
        resource: &'static str,
        id: String,
    },

    #[error("{resource} '{id}' reported unexpected state {state} during {operation}")]
    UnexpectedState {
        operation: Operation,
        resource: &'static str,
        id: String,
        state: String,
    },
}

impl ReconcileError {
    /// Attach resource context to a mapper error
    pub fn from_map(resource: &'static str, err: MapError) -> Self {
        match err {
            MapError::Identity(source) => ReconcileError::Identity { resource, source },
            MapError::Malformed { field, raw, reason } => ReconcileError::MalformedRemoteValue {
                resource,
                field,
                raw,
                reason,
            },
            other @ (MapError::Field(_) | MapError::Variant(_) | MapError::Invalid { .. }) => {
                ReconcileError::Configuration {
                    resource,
                    reason: other.to_string(),
                }
            }
        }
    }

    /// Raised before any remote call was made
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ReconcileError::Configuration { .. } | ReconcileError::Identity { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_mentions_applied_change() {
        let err = ReconcileError::Timeout {
            operation: Operation::Create,
            resource: "azurerm_monitor_metric_alert",
            id: "/subscriptions/1".to_string(),
            elapsed: Duration::from_secs(90),
        };
        let msg = err.to_string();
        assert!(msg.contains("azurerm_monitor_metric_alert"));
        assert!(msg.contains("90s"));
        assert!(msg.contains("may already have been applied"));
    }

    #[test]
    fn test_from_map_classification() {
        let err = ReconcileError::from_map(
            "azurerm_monitor_autoscale_setting",
            MapError::malformed("profile.0.capacity.minimum", "one", "not a base-10 integer"),
        );
        match err {
            ReconcileError::MalformedRemoteValue { raw, .. } => assert_eq!(raw, "one"),
            other => panic!("unexpected: {}", other),
        }

        let err = ReconcileError::from_map(
            "azurerm_monitor_autoscale_setting",
            MapError::Field(FieldError::MissingRequired {
                path: "name".to_string(),
            }),
        );
        assert!(err.is_configuration());
    }
}
