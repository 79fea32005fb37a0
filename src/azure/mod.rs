//! Azure Resource Manager access
//!
//! # Module Structure
//!
//! - [`api`] - the Remote API Client contract the reconciler depends on
//! - [`client`] - ARM implementation of that contract
//! - [`http`] - request plumbing, status classification and log sanitizing

pub mod api;
pub mod client;
pub mod http;

pub use api::{ApiError, RemoteApi};
pub use client::{ArmClient, DEFAULT_ENDPOINT};
