//! Remote API Client contract
//!
//! The reconciler only ever sees this trait; the HTTP implementation lives in
//! [`super::client`].

use async_trait::async_trait;
use thiserror::Error;

use crate::reconciler::ResourceKind;

fn request_id_label(request_id: &Option<String>) -> &str {
    request_id.as_deref().unwrap_or("none")
}

/// Failures of the Remote API Client. `NotFound` is kept distinct from every
/// other failure so callers can classify it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    #[error("resource not found (request id: {})", request_id_label(.request_id))]
    NotFound { request_id: Option<String> },

    #[error("HTTP {status} {code}: {message} (request id: {})", request_id_label(.request_id))]
    Remote {
        status: u16,
        code: String,
        message: String,
        request_id: Option<String>,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }
}

/// Remote operations for one resource family
#[async_trait]
pub trait RemoteApi<K: ResourceKind>: Send + Sync {
    async fn get(&self, id: &K::Id) -> Result<K::Model, ApiError>;

    async fn create_or_update(&self, id: &K::Id, model: &K::Model) -> Result<K::Model, ApiError>;

    /// `NotFound` is reported as an error; idempotent delete is the caller's
    /// decision
    async fn delete(&self, id: &K::Id) -> Result<(), ApiError>;
}
