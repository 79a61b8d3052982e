//! NatPMP Operator - keeps NAT-PMP port mappings alive from Kubernetes

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{predicates, reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client, CustomResourceExt, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use natpmp_operator::config::{LogFormat, OperatorConfig};
use natpmp_operator::controller::{error_policy, reconcile};
use natpmp_operator::crd::NatPMP;
use natpmp_operator::retry::{retry_with_backoff, RetryConfig};

/// NatPMP operator - requests, renews and publishes NAT-PMP port mappings
#[derive(Parser, Debug)]
#[command(name = "natpmp-operator", version, about, long_about = None)]
struct Cli {
    /// Generate the CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches NatPMP resources, keeps their mappings renewed on the gateway
    /// and applies the objects rendered from their templates.
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.config.log_format);

    if cli.crd {
        let crd = serde_yaml::to_string(&NatPMP::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.config).await,
    }
}

/// Install the global subscriber, defaulting to `info` when RUST_LOG is unset
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

/// Ensure the NatPMP CRD is installed
///
/// Server-side apply keeps the installed CRD in step with the operator
/// version. The API server may still be starting, so failures are retried.
async fn ensure_crd_installed(client: &Client, field_manager: &str) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let crd = NatPMP::crd();
    let name = crd.name_any();
    let params = PatchParams::apply(field_manager).force();
    let patch = Patch::Apply(&crd);

    info!(crd = %name, "Installing NatPMP CRD...");
    let (crds, crd_name, params, patch) = (&crds, name.as_str(), &params, &patch);
    retry_with_backoff(
        &RetryConfig::with_max_attempts(5),
        "install NatPMP CRD",
        || crds.patch(crd_name, params, patch),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install NatPMP CRD: {}", e))?;

    info!(crd = %name, "NatPMP CRD installed/updated");
    Ok(())
}

/// Run the controller until a shutdown signal arrives
async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if config.install_crd {
        ensure_crd_installed(&client, &config.field_manager).await?;
    }

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let ctx = Arc::new(config.context(client.clone(), shutdown.clone()));
    let natpmps: Api<NatPMP> = match &config.namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    };

    info!(
        namespace = config.namespace.as_deref().unwrap_or("<all>"),
        concurrency = config.concurrency,
        field_manager = %config.field_manager,
        gateway_timeout_secs = config.gateway_timeout_secs,
        "Starting NatPMP controller"
    );

    // Status writes do not bump the generation, so they never trigger a pass
    let (reader, writer) = reflector::store();
    let natpmp_events = watcher(natpmps, WatcherConfig::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .predicate_filter(predicates::generation);

    Controller::for_stream(natpmp_events, reader)
        .with_config(ControllerConfig::default().concurrency(config.concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => debug!(natpmp = %obj.name, "reconciled"),
                Err(e) => debug!(error = %e, "reconcile error"),
            }
        })
        .await;

    shutdown.cancel();
    info!("NatPMP controller stopped");
    Ok(())
}

/// Cancel in-flight passes as soon as SIGINT or SIGTERM arrives
///
/// The controller itself stops taking new work on the same signals.
fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested, cancelling in-flight reconciles");
        token.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Unable to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
