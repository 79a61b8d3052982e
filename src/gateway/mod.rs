//! NAT-PMP gateway abstraction
//!
//! The reconciler talks to the gateway through the [`MappingClient`] trait so
//! tests can substitute a fake gateway. [`NatPmpGateway`] is the production
//! implementation built on the `natpmp` crate.

mod nat_pmp;

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

pub use nat_pmp::NatPmpGateway;

/// Transport protocol of a port mapping
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// TCP mapping
    Tcp,
    /// UDP mapping
    Udp,
}

impl Protocol {
    /// Lowercase wire name of the protocol
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            _ => Err(GatewayError::UnsupportedProtocol(s.to_string())),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External address reported by the gateway
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalAddress {
    /// Public address of the gateway
    pub ip: IpAddr,
    /// Gateway epoch counter at the time of the response
    pub seconds_since_start_of_epoch: u32,
}

/// A port mapping request sent to the gateway
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortMappingRequest {
    /// Protocol to map
    pub protocol: Protocol,
    /// Port on the internal host
    pub internal_port: u16,
    /// Requested external port (the gateway may grant another)
    pub external_port: u16,
    /// Requested lease in seconds (the gateway may grant another)
    pub lifetime: u32,
}

/// The mapping the gateway actually granted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortMapping {
    /// Internal port the mapping forwards to
    pub internal_port: u16,
    /// External port the gateway opened
    pub external_port: u16,
    /// Granted lease in seconds
    pub lifetime: u32,
    /// Gateway epoch counter at the time of the response
    pub seconds_since_start_of_epoch: u32,
}

/// Errors talking to a NAT-PMP gateway
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// NAT-PMP only addresses IPv4 gateways
    #[error("gateway {0} is not an IPv4 address")]
    UnsupportedGateway(IpAddr),

    /// Protocol string is neither tcp nor udp
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// Socket setup or request transmission failed
    #[error("gateway request failed: {0}")]
    Request(String),

    /// No response arrived within the configured timeout
    #[error("no response from gateway within {0:?}")]
    Timeout(Duration),

    /// The gateway answered with the wrong kind of response
    #[error("unexpected gateway response: {0}")]
    UnexpectedResponse(String),
}

/// Capability to negotiate port mappings with a gateway
///
/// Neither call is idempotent: retrying may yield a
/// different mapping than an earlier attempt.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MappingClient: Send + Sync {
    /// Ask the gateway for its external address
    async fn get_external_address(&self, gateway: IpAddr)
        -> Result<ExternalAddress, GatewayError>;

    /// Request (or renew) a port mapping on the gateway
    async fn add_port_mapping(
        &self,
        gateway: IpAddr,
        request: PortMappingRequest,
    ) -> Result<PortMapping, GatewayError>;
}
