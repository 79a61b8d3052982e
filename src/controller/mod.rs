//! Controller for NatPMP resources
//!
//! Each reconcile negotiates the mapping with the gateway, records the grant
//! in the resource status, applies the rendered templates and requeues the
//! resource for renewal.

mod apply;
mod client;
mod natpmp;
mod schedule;

pub use apply::{set_controller_reference, ResourceApplier, ServerSideApplier};
pub use client::{KubeClient, KubeClientImpl};
pub use natpmp::{
    error_policy, reconcile, reconcile_natpmp, Context, ContextBuilder, Outcome,
};
pub use schedule::{renew_after, renew_in};
