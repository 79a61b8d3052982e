//! Field validation for [`NatPMPSpec`]
//!
//! Every check runs regardless of the others so one pass reports every
//! problem with the spec.

use std::fmt;
use std::net::IpAddr;

use super::natpmp::NatPMPSpec;
use crate::gateway::Protocol;

const MAX_PORT: i32 = u16::MAX as i32;

/// A single invalid field, rendered the way the API server reports field errors
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldViolation {
    /// Path to the field, e.g. `spec.gateway`
    pub path: String,
    /// Offending value, already formatted (strings are quoted)
    pub value: String,
    /// What is wrong with the value
    pub detail: String,
}

impl FieldViolation {
    fn invalid(path: &str, value: impl fmt::Debug, detail: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            value: format!("{value:?}"),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: Invalid value: {}: {}", self.path, self.value, self.detail)
    }
}

/// Join violations into the single message carried by errors and conditions
pub fn format_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result of validating a spec
///
/// The parsed gateway and normalized protocol are returned even when other
/// fields are invalid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validation {
    /// Parsed gateway address, if it parsed
    pub gateway: Option<IpAddr>,
    /// Lowercased protocol string
    pub protocol: String,
    /// Every violation found
    pub violations: Vec<FieldViolation>,
}

/// A spec that passed validation, with every field in its wire type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidatedMapping {
    /// Gateway address
    pub gateway: IpAddr,
    /// Transport protocol
    pub protocol: Protocol,
    /// Requested internal port
    pub internal_port: u16,
    /// Requested external port
    pub external_port: u16,
    /// Requested lifetime in seconds
    pub lifetime: u32,
}

impl Validation {
    /// True if no violation was found
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// Convert into typed fields, or hand back the violations
    pub fn into_valid(self, spec: &NatPMPSpec) -> Result<ValidatedMapping, Vec<FieldViolation>> {
        if !self.violations.is_empty() {
            return Err(self.violations);
        }

        let invalid = |path: &str, detail: &str| {
            vec![FieldViolation {
                path: path.to_string(),
                value: String::new(),
                detail: detail.to_string(),
            }]
        };

        let gateway = self
            .gateway
            .ok_or_else(|| invalid("spec.gateway", "invalid IP address"))?;
        let protocol = self
            .protocol
            .parse::<Protocol>()
            .map_err(|_| invalid("spec.protocol", "must be tcp or udp"))?;
        let internal_port = u16::try_from(spec.internal_port)
            .map_err(|_| invalid("spec.internalPort", "out of range"))?;
        let external_port = u16::try_from(spec.external_port)
            .map_err(|_| invalid("spec.externalPort", "out of range"))?;
        let lifetime =
            u32::try_from(spec.lifetime).map_err(|_| invalid("spec.lifetime", "out of range"))?;

        Ok(ValidatedMapping {
            gateway,
            protocol,
            internal_port,
            external_port,
            lifetime,
        })
    }
}

impl NatPMPSpec {
    /// Check every field and collect all violations
    pub fn validate(&self) -> Validation {
        let mut violations = Vec::new();

        let gateway = match self.gateway.parse::<IpAddr>() {
            Ok(ip) => Some(ip),
            Err(_) => {
                violations.push(FieldViolation::invalid(
                    "spec.gateway",
                    &self.gateway,
                    "invalid IP address",
                ));
                None
            }
        };

        let protocol = self.protocol.to_lowercase();
        if protocol.parse::<Protocol>().is_err() {
            violations.push(FieldViolation::invalid(
                "spec.protocol",
                &self.protocol,
                "must be tcp or udp",
            ));
        }

        for (path, port) in [
            ("spec.externalPort", self.external_port),
            ("spec.internalPort", self.internal_port),
        ] {
            if !(0..=MAX_PORT).contains(&port) {
                violations.push(FieldViolation::invalid(
                    path,
                    port,
                    format!("must be between 0 and {MAX_PORT}, inclusive"),
                ));
            }
        }

        if self.lifetime < 1 {
            violations.push(FieldViolation::invalid(
                "spec.lifetime",
                self.lifetime,
                "must be greater than or equal to 1",
            ));
        }

        Validation {
            gateway,
            protocol,
            violations,
        }
    }
}
