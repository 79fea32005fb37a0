//! azmon
//!
//! Reconciles declarative configuration with Azure Monitor resources. A
//! resource's config lives in a [`bag::ConfigStore`]; a
//! [`reconciler::Reconciler`] maps it to the management API object of its
//! [`reconciler::ResourceKind`], applies it through a
//! [`azure::RemoteApi`], waits out eventual consistency with the
//! [`poller`], and writes the observed state back.
//!
//! # Module Structure
//!
//! - [`bag`] - config store, field paths and the schema-checked codec
//! - [`identity`] - hierarchical and composite resource identities
//! - [`variant`] - mutually exclusive config groups and tagged unions
//! - [`poller`] - debounced eventual-consistency waits
//! - [`monitor`] - the resource families and their mappers
//! - [`reconciler`] - generic create/read/update/delete
//! - [`azure`] - the ARM REST client
//! - [`config`] - provider settings
//! - [`error`] - error taxonomy

pub mod azure;
pub mod bag;
pub mod config;
pub mod error;
pub mod identity;
pub mod monitor;
pub mod poller;
pub mod reconciler;
pub mod variant;

pub use error::{MapError, ReconcileError};
