//! Custom Resource Definitions for the NAT-PMP operator
//!
//! This module contains the `NatPMP` CRD, its condition types and the spec
//! validator.

mod natpmp;
mod types;
mod validation;

pub use natpmp::{NatPMP, NatPMPSpec, NatPMPStatus};
pub use types::{
    find_condition, set_condition, Condition, ConditionStatus, CONDITION_READY,
    CONDITION_TEMPLATES_APPLIED,
};
pub use validation::{format_violations, FieldViolation, ValidatedMapping, Validation};
