//! NatPMP controller implementation
//!
//! One reconcile pass walks a fixed sequence:
//! fetch, validate, negotiate, persist, render/apply, schedule.
//! The pass either renews the mapping and asks to be requeued before the
//! lease expires, or stops at the first failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::apply::{set_controller_reference, ResourceApplier, ServerSideApplier};
use super::client::{KubeClient, KubeClientImpl};
use super::schedule::renew_after;
use crate::crd::{
    find_condition, format_violations, set_condition, Condition, ConditionStatus, NatPMP,
    NatPMPStatus, CONDITION_READY, CONDITION_TEMPLATES_APPLIED,
};
use crate::gateway::{MappingClient, NatPmpGateway, PortMappingRequest};
use crate::retry::RetryConfig;
use crate::template::{TemplateContext, TemplateEngine};
use crate::{Error, DEFAULT_FIELD_MANAGER, DEFAULT_GATEWAY_TIMEOUT_SECS};

/// Controller context shared by every reconcile pass
pub struct Context {
    /// NatPMP reads and status writes
    pub kube: Arc<dyn KubeClient>,
    /// NAT-PMP gateway client
    pub gateway: Arc<dyn MappingClient>,
    /// Applies rendered documents
    pub applier: Arc<dyn ResourceApplier>,
    /// Renders `spec.templates`
    pub templates: TemplateEngine,
    /// Field manager for server-side apply
    pub field_manager: String,
    /// Backoff curve for failed passes
    pub retry: RetryConfig,
    /// Cancelled when the operator shuts down
    pub shutdown: CancellationToken,
    failures: DashMap<String, u32>,
}

impl Context {
    /// Create a builder for the production context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context from explicit collaborators with default settings
    pub fn new(
        kube: Arc<dyn KubeClient>,
        gateway: Arc<dyn MappingClient>,
        applier: Arc<dyn ResourceApplier>,
    ) -> Self {
        Self {
            kube,
            gateway,
            applier,
            templates: TemplateEngine::new(),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            retry: RetryConfig::reconcile(),
            shutdown: CancellationToken::new(),
            failures: DashMap::new(),
        }
    }

    /// Use a different field manager for applied documents
    pub fn with_field_manager(mut self, field_manager: impl Into<String>) -> Self {
        self.field_manager = field_manager.into();
        self
    }

    /// Use the given token to cancel in-flight passes
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Consecutive failed passes recorded for `key`
    pub fn failure_count(&self, key: &str) -> u32 {
        self.failures.get(key).map(|n| *n).unwrap_or(0)
    }

    fn record_failure(&self, key: &str) -> u32 {
        let mut count = self.failures.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    fn reset_failures(&self, key: &str) {
        self.failures.remove(key);
    }
}

/// Builder for the production [`Context`]
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .gateway_timeout(Duration::from_secs(5))
///     .field_manager("natpmp-controller")
///     .shutdown(token)
///     .build();
/// ```
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    gateway: Option<Arc<dyn MappingClient>>,
    applier: Option<Arc<dyn ResourceApplier>>,
    gateway_timeout: Duration,
    field_manager: String,
    shutdown: CancellationToken,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            gateway: None,
            applier: None,
            gateway_timeout: Duration::from_secs(DEFAULT_GATEWAY_TIMEOUT_SECS),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Bound each gateway exchange by `timeout`
    pub fn gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    /// Set the field manager for applied documents
    pub fn field_manager(mut self, field_manager: impl Into<String>) -> Self {
        self.field_manager = field_manager.into();
        self
    }

    /// Set the shutdown token
    pub fn shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Override the Kubernetes client
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the gateway client
    pub fn mapping_client(mut self, gateway: Arc<dyn MappingClient>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Override the document applier
    pub fn applier(mut self, applier: Arc<dyn ResourceApplier>) -> Self {
        self.applier = Some(applier);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let kube = self
            .kube
            .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone())));
        let gateway = self
            .gateway
            .unwrap_or_else(|| Arc::new(NatPmpGateway::new(self.gateway_timeout)));
        let applier = self
            .applier
            .unwrap_or_else(|| Arc::new(ServerSideApplier::new(self.client.clone())));

        Context::new(kube, gateway, applier)
            .with_field_manager(self.field_manager)
            .with_shutdown(self.shutdown)
    }
}

/// How a successful pass ended
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// The NatPMP no longer exists
    Deleted,
    /// The mapping was renewed and should be renewed again after `delay`
    Renewed {
        /// Time until the next renewal
        delay: Duration,
        /// Status describing the granted mapping
        status: NatPMPStatus,
    },
}

/// Run one reconcile pass for the NatPMP `namespace/name`
///
/// Every external call races `cancel`. Once cancelled, the pass stops with
/// [`Error::Cancelled`]; only a status write that already completed is kept.
#[instrument(skip_all, fields(natpmp = %format!("{namespace}/{name}")))]
pub async fn reconcile_natpmp(
    namespace: &str,
    name: &str,
    ctx: &Context,
    cancel: &CancellationToken,
) -> Result<Outcome, Error> {
    let started = Instant::now();
    debug!("reconciling NatPMP");

    let fetched = guarded(cancel, "fetch", move || ctx.kube.get_natpmp(namespace, name))
        .await
        .map_err(report)?;
    let Some(natpmp) = fetched else {
        info!("NatPMP not found, ignoring since it must have been deleted");
        return Ok(Outcome::Deleted);
    };

    let validation = natpmp.spec.validate();
    let mapping = match validation.into_valid(&natpmp.spec) {
        Ok(mapping) => mapping,
        Err(violations) => {
            let message = format_violations(&violations);
            let err = report(Error::Validation {
                name: name.to_string(),
                violations,
            });
            let condition = Condition::new(
                CONDITION_READY,
                ConditionStatus::False,
                "InvalidSpec",
                message,
            );
            record_condition(ctx, cancel, &natpmp, condition).await;
            return Err(err);
        }
    };

    let address = guarded(cancel, "negotiate", move || async move {
        ctx.gateway
            .get_external_address(mapping.gateway)
            .await
            .map_err(|e| Error::protocol("unable to get external address", e))
    })
    .await
    .map_err(report)?;

    let request = PortMappingRequest {
        protocol: mapping.protocol,
        internal_port: mapping.internal_port,
        external_port: mapping.external_port,
        lifetime: mapping.lifetime,
    };
    let granted = guarded(cancel, "negotiate", move || async move {
        ctx.gateway
            .add_port_mapping(mapping.gateway, request)
            .await
            .map_err(|e| Error::protocol("unable to add port mapping", e))
    })
    .await
    .map_err(report)?;

    let mut status = natpmp.status.clone().unwrap_or_default();
    status.external_ip = address.ip.to_string();
    status.mapped_internal_port = i32::from(granted.internal_port);
    status.mapped_external_port = i32::from(granted.external_port);
    status.mapped_lifetime = i64::from(granted.lifetime);
    status.seconds_since_start_of_epoch = i64::from(granted.seconds_since_start_of_epoch);
    status.observed_generation = natpmp.metadata.generation;
    let status = status.condition(Condition::new(
        CONDITION_READY,
        ConditionStatus::True,
        "PortMapped",
        format!(
            "{} {}:{} forwards to port {}",
            request.protocol, address.ip, granted.external_port, granted.internal_port
        ),
    ));

    let mut updated = natpmp;
    updated.status = Some(status.clone());
    let current = guarded(cancel, "persist", move || async move {
        ctx.kube.replace_status(&updated).await
    })
    .await
    .map_err(report)?;
    info!(
        external_ip = %address.ip,
        external_port = granted.external_port,
        lifetime = granted.lifetime,
        "port mapping in place"
    );

    match apply_templates(ctx, cancel, &current).await {
        Ok(applied) => {
            let already_applied = current
                .status
                .as_ref()
                .and_then(|s| find_condition(&s.conditions, CONDITION_TEMPLATES_APPLIED))
                .is_some_and(|c| c.status == ConditionStatus::True);
            if !already_applied {
                let condition = if current.spec.templates.is_empty() {
                    Condition::new(
                        CONDITION_TEMPLATES_APPLIED,
                        ConditionStatus::True,
                        "NoTemplates",
                        "no templates to apply",
                    )
                } else {
                    Condition::new(
                        CONDITION_TEMPLATES_APPLIED,
                        ConditionStatus::True,
                        "Applied",
                        format!("{applied} documents applied"),
                    )
                };
                record_condition(ctx, cancel, &current, condition).await;
            }
        }
        Err(err) => {
            let err = report(err);
            let reason = match &err {
                Error::Template { .. } => Some("TemplateError"),
                Error::Cancelled { .. } => None,
                _ => Some("ApplyFailed"),
            };
            if let Some(reason) = reason {
                let condition = Condition::new(
                    CONDITION_TEMPLATES_APPLIED,
                    ConditionStatus::False,
                    reason,
                    err.to_string(),
                );
                record_condition(ctx, cancel, &current, condition).await;
            }
            return Err(err);
        }
    }

    let delay = renew_after(granted.lifetime, started.elapsed());
    info!(renew_after_secs = delay.as_secs(), "port mapping renewed");
    Ok(Outcome::Renewed { delay, status })
}

/// Render every template and apply the documents in order
async fn apply_templates(
    ctx: &Context,
    cancel: &CancellationToken,
    natpmp: &NatPMP,
) -> Result<usize, Error> {
    let bound = TemplateContext::new(&natpmp.spec, natpmp.status.as_ref());
    let documents = ctx
        .templates
        .process_templates(&natpmp.spec.templates, &bound)?;
    let count = documents.len();

    for mut document in documents {
        set_controller_reference(&mut document, natpmp)?;
        let field_manager = ctx.field_manager.as_str();
        guarded(cancel, "apply", move || async move {
            ctx.applier.apply(&document, field_manager).await
        })
        .await?;
    }

    Ok(count)
}

/// Record a condition on the stored status, logging instead of failing
async fn record_condition(
    ctx: &Context,
    cancel: &CancellationToken,
    natpmp: &NatPMP,
    condition: Condition,
) {
    let mut status = natpmp.status.clone().unwrap_or_default();
    let changed = set_condition(&mut status.conditions, condition);
    if !changed && status.observed_generation == natpmp.metadata.generation {
        return;
    }
    status.observed_generation = natpmp.metadata.generation;

    let mut updated = natpmp.clone();
    updated.status = Some(status);
    let written = guarded(cancel, "record condition", move || async move {
        ctx.kube.replace_status(&updated).await
    })
    .await;

    if let Err(e) = written {
        warn!(error = %e, "unable to record status condition");
    }
}

/// Run `call` unless `cancel` fires first
///
/// `call` is not invoked at all if the token is already cancelled.
async fn guarded<T, F, Fut>(cancel: &CancellationToken, stage: &str, call: F) -> Result<T, Error>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    if cancel.is_cancelled() {
        return Err(Error::cancelled(stage));
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::cancelled(stage)),
        result = call() => result,
    }
}

/// Log an error where it was detected, then hand it on
fn report(err: Error) -> Error {
    match &err {
        Error::Cancelled { .. } => warn!(error = %err, "reconcile interrupted"),
        _ => error!(error = %err, "reconcile failed"),
    }
    err
}

fn object_key(natpmp: &NatPMP) -> String {
    format!("{}/{}", natpmp.namespace().unwrap_or_default(), natpmp.name_any())
}

/// Reconcile a NatPMP for the kube-runtime controller
///
/// Renewed mappings are requeued at their renewal time. A deleted NatPMP
/// waits for the next change.
pub async fn reconcile(natpmp: Arc<NatPMP>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = natpmp.namespace().unwrap_or_default();
    let name = natpmp.name_any();

    let outcome = reconcile_natpmp(&namespace, &name, &ctx, &ctx.shutdown).await?;
    ctx.reset_failures(&object_key(&natpmp));

    Ok(match outcome {
        Outcome::Deleted => Action::await_change(),
        Outcome::Renewed { delay, .. } => Action::requeue(delay),
    })
}

/// Decide when to retry a failed pass
///
/// Permanent errors wait for the spec to change. Transient errors back off
/// exponentially per NatPMP until a pass succeeds. The error itself was
/// already logged where it happened.
pub fn error_policy(natpmp: Arc<NatPMP>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = object_key(&natpmp);

    if error.is_permanent() {
        ctx.reset_failures(&key);
        debug!(natpmp = %key, %error, "waiting for spec change");
        return Action::await_change();
    }

    let failures = ctx.record_failure(&key);
    let delay = ctx.retry.delay_for(failures);
    debug!(
        natpmp = %key,
        %error,
        failures,
        delay_secs = delay.as_secs(),
        "requeueing after transient failure"
    );
    Action::requeue(delay)
}
