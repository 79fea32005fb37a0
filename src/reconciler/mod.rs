//! Resource Reconciler
//!
//! Generic Create/Read/Update/Delete over a [`ResourceKind`]. The reconciler
//! keeps no state of its own: every call works from the config store and the
//! remote object, so repeating a call is safe.

#[cfg(test)]
mod testing;

use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::azure::{ApiError, RemoteApi};
use crate::bag::{BlockReader, ConfigStore, FieldPath, Schema, ID_FIELD};
use crate::error::{MapError, ReconcileError};
use crate::identity::{Identity, IdentityError};
use crate::poller::{self, PollError, Presence, WaitSpec};
use crate::variant::PersistedShape;

pub use crate::error::Operation;

/// Coordinates supplied by the provider rather than the resource config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub subscription_id: String,
}

impl Scope {
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
        }
    }
}

/// One resource family: its schema, wire model and mapping
pub trait ResourceKind: Send + Sync + 'static {
    type Id: Identity;
    type Model: Serialize + DeserializeOwned + Clone + Debug + Send + Sync;
    type Shape: PersistedShape;

    /// Name used in messages and logs
    const TYPE_NAME: &'static str;
    const API_VERSION: &'static str;
    const SCHEMA: &'static Schema;

    /// Keep the persisted write shape on update; requires a read before the
    /// write
    const PRESERVE_PERSISTED_SHAPE: bool = false;
    /// A fresh resource can 404 for a while after creation
    const WAITS_FOR_VISIBILITY: bool = false;
    /// A deleted resource can stay visible for a while
    const WAITS_FOR_DELETION: bool = false;

    fn id_from_config(scope: &Scope, config: &BlockReader<'_>) -> Result<Self::Id, MapError>;

    fn parse_id(raw: &str) -> Result<Self::Id, IdentityError>;

    fn resolve_shape(_config: &BlockReader<'_>) -> Result<Self::Shape, MapError> {
        Ok(Self::Shape::default())
    }

    fn persisted_shape(_model: &Self::Model) -> Self::Shape {
        Self::Shape::default()
    }

    fn expand(config: &BlockReader<'_>, shape: Self::Shape) -> Result<Self::Model, MapError>;

    /// Bag fragment for every schema field except the id
    fn flatten(id: &Self::Id, model: &Self::Model) -> Result<Map<String, Value>, MapError>;
}

// ============================================================================
// Options
// ============================================================================

/// Hard per-operation deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(30 * 60),
            read: Duration::from_secs(5 * 60),
            update: Duration::from_secs(30 * 60),
            delete: Duration::from_secs(30 * 60),
        }
    }
}

impl Timeouts {
    pub fn for_operation(&self, operation: Operation) -> Duration {
        match operation {
            Operation::Create => self.create,
            Operation::Read => self.read,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        }
    }
}

/// Debounce parameters of a consistency wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub required_hits: u32,
    pub min_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub timeouts: Timeouts,
    pub create_wait: WaitPolicy,
    pub delete_wait: WaitPolicy,
    /// Refuse to create over an existing remote resource
    pub import_protection: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            create_wait: WaitPolicy {
                required_hits: 2,
                min_interval: Duration::from_secs(15),
            },
            delete_wait: WaitPolicy {
                required_hits: 5,
                min_interval: Duration::from_secs(15),
            },
            import_protection: true,
        }
    }
}

// ============================================================================
// Per-call context
// ============================================================================

/// Error construction for one running operation
struct OpContext {
    operation: Operation,
    resource: &'static str,
    id: String,
    started: Instant,
    deadline: Instant,
}

impl OpContext {
    fn new(operation: Operation, resource: &'static str, id: String, budget: Duration) -> Self {
        let started = Instant::now();
        Self {
            operation,
            resource,
            id,
            started,
            deadline: started + budget,
        }
    }

    fn remote(&self, source: ApiError) -> ReconcileError {
        ReconcileError::Remote {
            operation: self.operation,
            resource: self.resource,
            id: self.id.clone(),
            source,
        }
    }

    fn timeout(&self) -> ReconcileError {
        ReconcileError::Timeout {
            operation: self.operation,
            resource: self.resource,
            id: self.id.clone(),
            elapsed: self.started.elapsed(),
        }
    }

    fn vanished(&self) -> ReconcileError {
        ReconcileError::Vanished {
            operation: self.operation,
            resource: self.resource,
            id: self.id.clone(),
        }
    }

    fn poll_error<L: Debug>(&self, err: PollError<L, ApiError>) -> ReconcileError {
        match err {
            PollError::Timeout { .. } => self.timeout(),
            PollError::Cancelled => ReconcileError::Cancelled {
                operation: self.operation,
                resource: self.resource,
                id: self.id.clone(),
            },
            PollError::UnexpectedLabel { label } => ReconcileError::UnexpectedState {
                operation: self.operation,
                resource: self.resource,
                id: self.id.clone(),
                state: format!("{:?}", label),
            },
            PollError::OverlappingLabels { labels } => ReconcileError::UnexpectedState {
                operation: self.operation,
                resource: self.resource,
                id: self.id.clone(),
                state: format!("wait overlaps on {:?}", labels),
            },
            PollError::Probe(source) => self.remote(source),
        }
    }
}

fn snapshot(store: &dyn ConfigStore) -> Map<String, Value> {
    match store.get(&FieldPath::root()) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn stored_id(store: &dyn ConfigStore) -> Option<String> {
    store
        .get(&FieldPath::field(ID_FIELD))
        .and_then(|v| v.as_str().map(str::to_string))
        .filter(|id| !id.is_empty())
}

// ============================================================================
// Reconciler
// ============================================================================

pub struct Reconciler<K: ResourceKind> {
    client: Arc<dyn RemoteApi<K>>,
    scope: Scope,
    options: ReconcileOptions,
    cancel: CancellationToken,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ResourceKind> Reconciler<K> {
    pub fn new(client: Arc<dyn RemoteApi<K>>, scope: Scope, options: ReconcileOptions) -> Self {
        Self {
            client,
            scope,
            options,
            cancel: CancellationToken::new(),
            _kind: PhantomData,
        }
    }

    /// Share a cancellation token with the host, e.g. for Ctrl-C
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn map_err(err: MapError) -> ReconcileError {
        ReconcileError::from_map(K::TYPE_NAME, err)
    }

    fn identity_err(source: IdentityError) -> ReconcileError {
        ReconcileError::Identity {
            resource: K::TYPE_NAME,
            source,
        }
    }

    /// Validate the config and build the write-side object without touching
    /// the remote API
    fn prepare(&self, config: &BlockReader<'_>) -> Result<(K::Id, K::Shape, K::Model), ReconcileError> {
        config.validate().map_err(|e| Self::map_err(e.into()))?;
        let id = K::id_from_config(&self.scope, config).map_err(Self::map_err)?;
        let shape = K::resolve_shape(config).map_err(Self::map_err)?;
        let model = K::expand(config, shape).map_err(Self::map_err)?;
        Ok((id, shape, model))
    }

    fn persisted_id(store: &dyn ConfigStore) -> Result<(String, K::Id), ReconcileError> {
        let raw = stored_id(store).ok_or_else(|| {
            Self::identity_err(IdentityError::Empty {
                component: "resource id",
            })
        })?;
        let id = K::parse_id(&raw).map_err(Self::identity_err)?;
        Ok((raw, id))
    }

    fn write_back(
        store: &mut dyn ConfigStore,
        id: &str,
        fragment: Map<String, Value>,
    ) -> Result<(), ReconcileError> {
        store
            .set(&FieldPath::field(ID_FIELD), Value::String(id.to_string()))
            .map_err(|e| Self::map_err(e.into()))?;
        for (name, value) in fragment {
            store
                .set(&FieldPath::field(&name), value)
                .map_err(|e| Self::map_err(e.into()))?;
        }
        Ok(())
    }

    /// Fetch the object, treating NotFound as a vanished resource
    async fn read_back(&self, ctx: &OpContext, id: &K::Id) -> Result<K::Model, ReconcileError> {
        match self.client.get(id).await {
            Ok(model) => Ok(model),
            Err(e) if e.is_not_found() => Err(ctx.vanished()),
            Err(e) => Err(ctx.remote(e)),
        }
    }

    async fn wait_visible(&self, ctx: &OpContext, id: &K::Id) -> Result<K::Model, ReconcileError> {
        let policy = self.options.create_wait;
        let spec = WaitSpec::visibility(policy.required_hits, policy.min_interval);
        let client = &self.client;

        debug!(
            "Waiting for {} {} to become visible ({} consecutive hits)",
            K::TYPE_NAME,
            ctx.id,
            policy.required_hits
        );
        let converged = poller::wait_for(&spec, ctx.deadline, &self.cancel, || async move {
            match client.get(id).await {
                Ok(model) => Ok((Presence::Found, Some(model))),
                Err(e) if e.is_not_found() => Ok((Presence::NotFound, None)),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(|e| ctx.poll_error(e))?;

        debug!(
            "{} {} visible after {} probes",
            K::TYPE_NAME,
            ctx.id,
            converged.probes
        );
        converged.value.ok_or_else(|| ctx.vanished())
    }

    async fn wait_deleted(&self, ctx: &OpContext, id: &K::Id) -> Result<(), ReconcileError> {
        let policy = self.options.delete_wait;
        let spec = WaitSpec::deletion(policy.required_hits, policy.min_interval);
        let client = &self.client;

        debug!(
            "Waiting for {} {} to disappear ({} consecutive hits)",
            K::TYPE_NAME,
            ctx.id,
            policy.required_hits
        );
        poller::wait_for(&spec, ctx.deadline, &self.cancel, || async move {
            match client.get(id).await {
                Ok(_) => Ok((Presence::Found, ())),
                Err(e) if e.is_not_found() => Ok((Presence::NotFound, ())),
                Err(e) => Err(e),
            }
        })
        .await
        .map(|_| ())
        .map_err(|e| ctx.poll_error(e))
    }

    /// Write `model`, wait for it to settle and store the observed state
    async fn apply(
        &self,
        ctx: &OpContext,
        store: &mut dyn ConfigStore,
        id: &K::Id,
        model: &K::Model,
    ) -> Result<(), ReconcileError> {
        self.client
            .create_or_update(id, model)
            .await
            .map_err(|e| ctx.remote(e))?;
        debug!("{} {} accepted", K::TYPE_NAME, ctx.id);

        let observed = if K::WAITS_FOR_VISIBILITY {
            self.wait_visible(ctx, id).await?
        } else {
            self.read_back(ctx, id).await?
        };

        let fragment = K::flatten(id, &observed).map_err(Self::map_err)?;
        Self::write_back(store, &ctx.id, fragment)
    }

    pub async fn create(&self, store: &mut dyn ConfigStore) -> Result<(), ReconcileError> {
        let config = snapshot(store);
        let reader = BlockReader::new(K::SCHEMA, &config);
        let (id, _shape, model) = self.prepare(&reader)?;
        let encoded = id.encode().map_err(Self::identity_err)?;

        let ctx = OpContext::new(
            Operation::Create,
            K::TYPE_NAME,
            encoded,
            self.options.timeouts.create,
        );
        info!("Creating {} {}", K::TYPE_NAME, ctx.id);

        let work = async {
            if self.options.import_protection {
                match self.client.get(&id).await {
                    Ok(_) => {
                        return Err(ReconcileError::AlreadyExists {
                            resource: K::TYPE_NAME,
                            id: ctx.id.clone(),
                        })
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(ctx.remote(e)),
                }
            }
            self.apply(&ctx, store, &id, &model).await
        };

        let result = tokio::time::timeout_at(ctx.deadline, work)
            .await
            .unwrap_or_else(|_| Err(ctx.timeout()));
        if result.is_ok() {
            info!("Created {} {}", K::TYPE_NAME, ctx.id);
        }
        result
    }

    pub async fn read(&self, store: &mut dyn ConfigStore) -> Result<(), ReconcileError> {
        let (raw, id) = Self::persisted_id(store)?;
        let ctx = OpContext::new(Operation::Read, K::TYPE_NAME, raw, self.options.timeouts.read);
        debug!("Reading {} {}", K::TYPE_NAME, ctx.id);

        let work = async {
            match self.client.get(&id).await {
                Ok(model) => {
                    let fragment = K::flatten(&id, &model).map_err(Self::map_err)?;
                    Self::write_back(store, &ctx.id, fragment)
                }
                Err(e) if e.is_not_found() => {
                    warn!(
                        "{} {} was not found - removing from state",
                        K::TYPE_NAME,
                        ctx.id
                    );
                    store.clear();
                    Ok(())
                }
                Err(e) => Err(ctx.remote(e)),
            }
        };

        tokio::time::timeout_at(ctx.deadline, work)
            .await
            .unwrap_or_else(|_| Err(ctx.timeout()))
    }

    pub async fn update(&self, store: &mut dyn ConfigStore) -> Result<(), ReconcileError> {
        let config = snapshot(store);
        let reader = BlockReader::new(K::SCHEMA, &config);
        let (id, shape, model) = self.prepare(&reader)?;
        let encoded = id.encode().map_err(Self::identity_err)?;

        if let Some(previous) = stored_id(store) {
            let previous = K::parse_id(&previous).map_err(Self::identity_err)?;
            if previous.encode().map_err(Self::identity_err)? != encoded {
                return Err(ReconcileError::Configuration {
                    resource: K::TYPE_NAME,
                    reason: format!(
                        "identity changed to '{}'; the resource must be replaced",
                        encoded
                    ),
                });
            }
        }

        let ctx = OpContext::new(
            Operation::Update,
            K::TYPE_NAME,
            encoded,
            self.options.timeouts.update,
        );
        info!("Updating {} {}", K::TYPE_NAME, ctx.id);

        let work = async {
            let mut model = model;
            if K::PRESERVE_PERSISTED_SHAPE {
                let existing = self.read_back(&ctx, &id).await?;
                let persisted = K::persisted_shape(&existing);
                let pinned = shape.pin_to(persisted);
                if pinned != shape {
                    debug!(
                        "Keeping persisted shape {:?} of {} {} instead of {:?}",
                        pinned,
                        K::TYPE_NAME,
                        ctx.id,
                        shape
                    );
                    model = K::expand(&reader, pinned).map_err(Self::map_err)?;
                }
            }
            self.apply(&ctx, store, &id, &model).await
        };

        let result = tokio::time::timeout_at(ctx.deadline, work)
            .await
            .unwrap_or_else(|_| Err(ctx.timeout()));
        if result.is_ok() {
            info!("Updated {} {}", K::TYPE_NAME, ctx.id);
        }
        result
    }

    pub async fn delete(&self, store: &mut dyn ConfigStore) -> Result<(), ReconcileError> {
        let (raw, id) = Self::persisted_id(store)?;
        let ctx = OpContext::new(
            Operation::Delete,
            K::TYPE_NAME,
            raw,
            self.options.timeouts.delete,
        );
        info!("Deleting {} {}", K::TYPE_NAME, ctx.id);

        let work = async {
            match self.client.delete(&id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!("{} {} already gone", K::TYPE_NAME, ctx.id);
                    return Ok(());
                }
                Err(e) => return Err(ctx.remote(e)),
            }
            if K::WAITS_FOR_DELETION {
                self.wait_deleted(&ctx, &id).await?;
            }
            Ok(())
        };

        let result = tokio::time::timeout_at(ctx.deadline, work)
            .await
            .unwrap_or_else(|_| Err(ctx.timeout()));
        if result.is_ok() {
            info!("Deleted {} {}", K::TYPE_NAME, ctx.id);
        }
        result
    }
}
