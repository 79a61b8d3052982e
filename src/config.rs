//! Operator configuration
//!
//! Every setting is a CLI flag with an environment variable fallback. The
//! flags are global so they can be given before or after the subcommand.

use std::time::Duration;

use clap::{Args, ValueEnum};
use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::controller::Context;
use crate::{DEFAULT_CONCURRENCY, DEFAULT_FIELD_MANAGER, DEFAULT_GATEWAY_TIMEOUT_SECS};

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines (default)
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Settings for the controller
#[derive(Args, Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Timeout in seconds for one request/response exchange with a gateway
    #[arg(
        long,
        global = true,
        env = "NATPMP_GATEWAY_TIMEOUT_SECS",
        default_value_t = DEFAULT_GATEWAY_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub gateway_timeout_secs: u64,

    /// Field manager used when applying rendered templates
    #[arg(
        long,
        global = true,
        env = "NATPMP_FIELD_MANAGER",
        default_value = DEFAULT_FIELD_MANAGER
    )]
    pub field_manager: String,

    /// Maximum number of NatPMP resources reconciled at once
    #[arg(
        long,
        global = true,
        env = "NATPMP_CONCURRENCY",
        default_value_t = DEFAULT_CONCURRENCY,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub concurrency: u16,

    /// Only watch NatPMP resources in this namespace (default: all namespaces)
    #[arg(long, global = true, env = "NATPMP_WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Install or update the NatPMP CRD at startup
    #[arg(long, global = true, env = "NATPMP_INSTALL_CRD")]
    pub install_crd: bool,

    /// Log output format
    #[arg(
        long,
        global = true,
        env = "NATPMP_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Text
    )]
    pub log_format: LogFormat,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            gateway_timeout_secs: DEFAULT_GATEWAY_TIMEOUT_SECS,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            namespace: None,
            install_crd: false,
            log_format: LogFormat::Text,
        }
    }
}

impl OperatorConfig {
    /// Gateway exchange timeout
    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    /// Build the controller context for these settings
    pub fn context(&self, client: Client, shutdown: CancellationToken) -> Context {
        Context::builder(client)
            .gateway_timeout(self.gateway_timeout())
            .field_manager(self.field_manager.clone())
            .shutdown(shutdown)
            .build()
    }
}
