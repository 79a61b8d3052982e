//! Templating for resources derived from a port mapping
//!
//! Each template in `spec.templates` is rendered with minijinja against the
//! mapping's spec and status, then decoded into generic documents that the
//! controller applies.
//!
//! - `{{ Spec.ExternalPort }}`, `{{ Spec.InternalPort }}`, `{{ Spec.Lifetime }}`,
//!   `{{ Spec.Gateway }}`, `{{ Spec.Protocol }}`
//! - `{{ Status.ExternalIP }}`, `{{ Status.MappedInternalPort }}`,
//!   `{{ Status.MappedExternalPort }}`, `{{ Status.MappedLifetime }}`,
//!   `{{ Status.SecondsSinceStartOfEpoch }}`
//! - `{% if %}`, `{% for %}` and `{% set %}` blocks

mod context;
mod decode;
mod engine;
mod error;

pub use context::{SpecFields, StatusFields, TemplateContext};
pub use decode::{decode, DerivedDocument, DocumentStream};
pub use engine::TemplateEngine;
pub use error::TemplateError;
