//! Values bound into templates
//!
//! Templates see exactly two top-level names:
//! - `Spec.{ExternalPort, InternalPort, Lifetime, Gateway, Protocol}`
//! - `Status.{ExternalIP, MappedInternalPort, MappedExternalPort,
//!   MappedLifetime, SecondsSinceStartOfEpoch}`

use minijinja::Value;
use serde::Serialize;

use crate::crd::{NatPMPSpec, NatPMPStatus};

/// Spec fields visible to templates
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpecFields {
    /// Requested external port
    pub external_port: i32,
    /// Requested internal port
    pub internal_port: i32,
    /// Requested lifetime in seconds
    pub lifetime: i32,
    /// Gateway address as written in the spec
    pub gateway: String,
    /// Protocol as written in the spec
    pub protocol: String,
}

/// Status fields visible to templates
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusFields {
    /// External address reported by the gateway
    #[serde(rename = "ExternalIP")]
    pub external_ip: String,
    /// Internal port the gateway mapped
    pub mapped_internal_port: i32,
    /// External port the gateway granted
    pub mapped_external_port: i32,
    /// Lifetime the gateway granted
    pub mapped_lifetime: i64,
    /// Gateway epoch counter
    pub seconds_since_start_of_epoch: i64,
}

/// Root object templates are rendered against
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TemplateContext {
    /// `Spec.*`
    #[serde(rename = "Spec")]
    pub spec: SpecFields,
    /// `Status.*`
    #[serde(rename = "Status")]
    pub status: StatusFields,
}

impl TemplateContext {
    /// Bind the template-visible fields of a spec and status
    ///
    /// A missing status binds zero values, which is what templates see
    /// before the first successful negotiation.
    pub fn new(spec: &NatPMPSpec, status: Option<&NatPMPStatus>) -> Self {
        let status = status.map(StatusFields::from).unwrap_or_default();
        Self {
            spec: SpecFields::from(spec),
            status,
        }
    }

    /// Convert to minijinja Value for rendering
    pub fn to_value(&self) -> Value {
        Value::from_serialize(self)
    }
}

impl From<&NatPMPSpec> for SpecFields {
    fn from(spec: &NatPMPSpec) -> Self {
        Self {
            external_port: spec.external_port,
            internal_port: spec.internal_port,
            lifetime: spec.lifetime,
            gateway: spec.gateway.clone(),
            protocol: spec.protocol.clone(),
        }
    }
}

impl From<&NatPMPStatus> for StatusFields {
    fn from(status: &NatPMPStatus) -> Self {
        Self {
            external_ip: status.external_ip.clone(),
            mapped_internal_port: status.mapped_internal_port,
            mapped_external_port: status.mapped_external_port,
            mapped_lifetime: status.mapped_lifetime,
            seconds_since_start_of_epoch: status.seconds_since_start_of_epoch,
        }
    }
}
