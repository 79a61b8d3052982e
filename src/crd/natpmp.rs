//! NatPMP Custom Resource Definition
//!
//! A NatPMP resource asks the operator to keep one port mapping open on a
//! NAT-PMP gateway, and to render a list of templates against the granted
//! mapping so other resources can follow the external address and port.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{set_condition, Condition};

/// Specification for a NatPMP port mapping
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "network.natpmp.jkoelker.github.io",
    version = "v1",
    kind = "NatPMP",
    plural = "natpmps",
    status = "NatPMPStatus",
    namespaced,
    printcolumn = r#"{"name":"Gateway","type":"string","jsonPath":".spec.gateway"}"#,
    printcolumn = r#"{"name":"Protocol","type":"string","jsonPath":".spec.protocol"}"#,
    printcolumn = r#"{"name":"External IP","type":"string","jsonPath":".status.externalIP"}"#,
    printcolumn = r#"{"name":"External Port","type":"integer","jsonPath":".status.mappedExternalPort"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NatPMPSpec {
    /// Requested external port on the gateway
    pub external_port: i32,

    /// Internal port the external port forwards to
    pub internal_port: i32,

    /// Requested mapping lifetime in seconds
    pub lifetime: i32,

    /// IP address of the NAT-PMP gateway
    pub gateway: String,

    /// Transport protocol, `tcp` or `udp` (case-insensitive)
    pub protocol: String,

    /// Template sources rendered against the mapping and applied in order
    ///
    /// Each template renders to one or more YAML or JSON documents. The
    /// names `Spec.ExternalPort`, `Spec.InternalPort`, `Spec.Protocol`,
    /// `Spec.Gateway`, `Spec.Lifetime`, `Status.ExternalIP`,
    /// `Status.MappedInternalPort`, `Status.MappedExternalPort`,
    /// `Status.MappedLifetime` and `Status.SecondsSinceStartOfEpoch` are
    /// available.
    #[serde(default)]
    pub templates: Vec<String>,
}

/// Observed state of a NatPMP port mapping
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NatPMPStatus {
    /// External address reported by the gateway
    #[serde(rename = "externalIP", default, skip_serializing_if = "String::is_empty")]
    pub external_ip: String,

    /// Internal port the gateway mapped
    #[serde(default)]
    pub mapped_internal_port: i32,

    /// External port the gateway granted
    #[serde(default)]
    pub mapped_external_port: i32,

    /// Lifetime in seconds the gateway granted
    #[serde(default)]
    pub mapped_lifetime: i64,

    /// Gateway epoch counter at the time of the mapping
    #[serde(default)]
    pub seconds_since_start_of_epoch: i64,

    /// Conditions representing the mapping state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation of the spec this status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl NatPMPStatus {
    /// Set a condition and return self for chaining
    ///
    /// Replaces any condition of the same type, keeping its transition time
    /// when the status is unchanged.
    pub fn condition(mut self, condition: Condition) -> Self {
        set_condition(&mut self.conditions, condition);
        self
    }

    /// Set the observed generation and return self for chaining
    pub fn observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }
}
