//! natpmp-operator - keeps NAT-PMP port mappings alive from Kubernetes
//!
//! A `NatPMP` custom resource describes a port mapping to request from a
//! NAT-PMP gateway. The operator negotiates the mapping, records what the
//! gateway granted in the resource status, renders the user's templates
//! against that status and applies the resulting objects, then requeues
//! itself to renew the lease before it expires.
//!
//! # Modules
//!
//! - [`crd`] - The `NatPMP` Custom Resource Definition and its validation
//! - [`gateway`] - NAT-PMP gateway client abstraction
//! - [`template`] - Template rendering and multi-document decoding
//! - [`controller`] - Reconciliation logic
//! - [`config`] - Operator configuration
//! - [`retry`] - Backoff helpers
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod gateway;
pub mod retry;
pub mod template;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager identity used for server-side apply of rendered templates
///
/// A stable identity lets repeated reconciliations converge instead of
/// conflicting with their own earlier writes.
pub const DEFAULT_FIELD_MANAGER: &str = "natpmp-controller";

/// Default timeout for one request/response exchange with the gateway
pub const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;

/// Default number of NatPMP resources reconciled concurrently
pub const DEFAULT_CONCURRENCY: u16 = 4;
