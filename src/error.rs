//! Error types for the NAT-PMP operator

use thiserror::Error;

use crate::crd::{format_violations, FieldViolation};
use crate::gateway::GatewayError;
use crate::template::TemplateError;

/// Main error type for operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error outside of status persistence
    #[error("{context}: {source}")]
    Kube {
        /// What the operator was doing
        context: String,
        /// Underlying client error
        #[source]
        source: kube::Error,
    },

    /// The spec failed validation
    #[error("invalid NatPMP {name}: {}", format_violations(.violations))]
    Validation {
        /// Name of the resource
        name: String,
        /// Every violation found
        violations: Vec<FieldViolation>,
    },

    /// The gateway exchange failed
    #[error("{stage}: {source}")]
    Protocol {
        /// Which exchange failed
        stage: String,
        /// Gateway client error
        #[source]
        source: GatewayError,
    },

    /// Writing the status failed
    #[error("unable to update status: {message}")]
    Persist {
        /// Error reported by the API server
        message: String,
        /// True if the write lost an optimistic-concurrency race
        conflict: bool,
    },

    /// A template could not be turned into documents
    #[error("template {index}: {source}")]
    Template {
        /// Position of the template in `spec.templates`
        index: usize,
        /// What went wrong
        source: TemplateError,
    },

    /// Applying a rendered document failed
    #[error("unable to apply {kind} {name}: {message}")]
    Apply {
        /// Document kind
        kind: String,
        /// Document name
        name: String,
        /// Why the apply failed
        message: String,
    },

    /// The reconcile was cancelled before it finished
    #[error("cancelled during {stage}")]
    Cancelled {
        /// Step that was interrupted
        stage: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Wrap a Kubernetes client error with what was being attempted
    pub fn kube(context: impl Into<String>, source: kube::Error) -> Self {
        Self::Kube {
            context: context.into(),
            source,
        }
    }

    /// Wrap a gateway error with the failing stage
    pub fn protocol(stage: impl Into<String>, source: GatewayError) -> Self {
        Self::Protocol {
            stage: stage.into(),
            source,
        }
    }

    /// Classify a failed status write
    pub fn persist(source: kube::Error) -> Self {
        let conflict = matches!(&source, kube::Error::Api(resp) if resp.code == 409);
        Self::Persist {
            message: source.to_string(),
            conflict,
        }
    }

    /// Create an apply error for a document
    pub fn apply(
        kind: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Apply {
            kind: kind.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a cancellation error for the interrupted stage
    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// True if retrying without a spec change cannot succeed
    ///
    /// Validation and template errors are the user's to fix. Everything else
    /// may clear on its own and is retried with backoff.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::Template { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
