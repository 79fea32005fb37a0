//! ARM client
//!
//! Implements [`RemoteApi`] for every resource family over the Azure
//! Resource Manager REST surface: `GET`/`PUT`/`DELETE` on the identity's
//! resource path with the family's `api-version`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use url::Url;

use super::api::{ApiError, RemoteApi};
use super::http::ArmHttpClient;
use crate::identity::Identity;
use crate::reconciler::ResourceKind;

pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com/";

/// Main ARM client
#[derive(Clone)]
pub struct ArmClient {
    http: ArmHttpClient,
    endpoint: Url,
    token: String,
}

impl ArmClient {
    pub fn new(endpoint: &str, token: impl Into<String>) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .with_context(|| format!("Invalid management endpoint '{}'", endpoint))?;
        Ok(Self {
            http: ArmHttpClient::new()?,
            endpoint,
            token: token.into(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Full request URL for a resource path. Each path segment is
    /// percent-encoded; the endpoint's own path is kept as a prefix.
    pub fn resource_url(&self, resource_path: &str, api_version: &str) -> Result<Url, ApiError> {
        let encoded: Vec<String> = resource_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();

        let base = self.endpoint.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{}/{}", base, encoded.join("/")))
            .map_err(|e| ApiError::Transport(format!("invalid request URL: {}", e)))?;
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url)
    }

    fn url_for<K: ResourceKind>(&self, id: &K::Id) -> Result<Url, ApiError> {
        self.resource_url(&id.resource_path(), K::API_VERSION)
    }

    fn decode<K: ResourceKind>(value: Value) -> Result<K::Model, ApiError> {
        serde_json::from_value(value)
            .map_err(|e| ApiError::Decode(format!("{} response: {}", K::TYPE_NAME, e)))
    }
}

#[async_trait]
impl<K: ResourceKind> RemoteApi<K> for ArmClient {
    async fn get(&self, id: &K::Id) -> Result<K::Model, ApiError> {
        let url = self.url_for::<K>(id)?;
        let response = self.http.send(Method::GET, &url, &self.token, None).await?;
        Self::decode::<K>(response.json()?)
    }

    async fn create_or_update(&self, id: &K::Id, model: &K::Model) -> Result<K::Model, ApiError> {
        let url = self.url_for::<K>(id)?;
        let body = serde_json::to_value(model)
            .map_err(|e| ApiError::Decode(format!("encoding {} request: {}", K::TYPE_NAME, e)))?;
        let response = self
            .http
            .send(Method::PUT, &url, &self.token, Some(&body))
            .await?;

        // some families answer an accepted PUT with an empty body
        match response.json()? {
            Value::Null => Ok(model.clone()),
            value => Self::decode::<K>(value),
        }
    }

    async fn delete(&self, id: &K::Id) -> Result<(), ApiError> {
        let url = self.url_for::<K>(id)?;
        let response = self
            .http
            .send(Method::DELETE, &url, &self.token, None)
            .await?;
        // ARM answers a DELETE of an absent resource with 204
        if response.status == reqwest::StatusCode::NO_CONTENT {
            tracing::debug!("DELETE {} -> nothing to delete", url);
        }
        Ok(())
    }
}
