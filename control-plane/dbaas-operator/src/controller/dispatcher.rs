//! Per-resource reconcile entry point shared by every kind.
//!
//! The dispatcher owns the steps that are identical across kinds (skip
//! marker, generation and version checks, provider support, credentials,
//! validation, branching on existence and deletion, the single status
//! flush) and delegates the kind-specific parts to a [`ResourceHandler`].

use std::sync::Arc;

use async_trait::async_trait;
use dbaas_provider::{ProviderClient, ProviderError, ProviderFactory};
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::crd::{
    ANNOTATION_RECONCILIATION_POLICY, ConditionType, DeclaredResource, FINALIZER,
    LABEL_RESOURCE_VERSION, SecretRef, StatusObject,
};
use crate::store::{CredentialResolver, ResourceStore, has_finalizer, is_deleting};

use super::ReconcileError;
use super::conditions::WorkflowContext;
use super::finalizer::{self, CleanupError};
use super::registry::{ReconcileOutcome, Reconciler};
use super::retry::{Backoff, PollIntervals};
use super::state::Lifecycle;
use super::workflow::{WorkflowResult, reason};

/// Capabilities withheld by the provider environment.
#[derive(Debug, Clone, Default)]
pub struct ProviderRestrictions {
    /// Government cloud: no serverless deployments, no search indexes.
    pub cloud_gov: bool,
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Keep remote resources on deletion unless a resource opts out.
    pub deletion_protection: bool,
    pub restrictions: ProviderRestrictions,
    pub backoff: Backoff,
    pub polls: PollIntervals,
    pub operator_version: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            deletion_protection: false,
            restrictions: ProviderRestrictions::default(),
            backoff: Backoff::default(),
            polls: PollIntervals::default(),
            operator_version: crate::OPERATOR_VERSION.to_string(),
        }
    }
}

/// Where a resource's provider credentials come from.
pub enum CredentialSource<'a> {
    Secret(&'a SecretRef),
    Default,
    /// The kind never calls the provider itself.
    NotRequired,
}

/// Collaborators available to a handler for one reconciliation.
pub struct RunContext {
    provider: Option<Arc<dyn ProviderClient>>,
    pub polls: PollIntervals,
    pub backoff: Backoff,
}

impl RunContext {
    pub fn new(
        provider: Option<Arc<dyn ProviderClient>>,
        polls: PollIntervals,
        backoff: Backoff,
    ) -> Self {
        Self {
            provider,
            polls,
            backoff,
        }
    }

    /// The provider client; only `None` for kinds declaring
    /// [`CredentialSource::NotRequired`].
    pub fn provider(&self) -> Option<&dyn ProviderClient> {
        self.provider.as_deref()
    }
}

/// Kind-specific part of a reconciliation.
#[async_trait]
pub trait ResourceHandler: Send + Sync + 'static {
    type Resource: DeclaredResource;
    type Observed: Send + Sync;

    /// Condition that reports the remote resource itself.
    fn main_condition(&self) -> ConditionType;

    fn validate(&self, resource: &Self::Resource) -> Result<(), String>;

    fn check_support(
        &self,
        _resource: &Self::Resource,
        _restrictions: &ProviderRestrictions,
    ) -> Result<(), String> {
        Ok(())
    }

    fn credentials_source<'a>(&self, resource: &'a Self::Resource) -> CredentialSource<'a>;

    async fn fetch_observed(
        &self,
        run: &RunContext,
        resource: &Self::Resource,
    ) -> Result<Option<Self::Observed>, WorkflowResult>;

    fn lifecycle(
        &self,
        _resource: &Self::Resource,
        _observed: &Self::Observed,
        _polls: &PollIntervals,
    ) -> Lifecycle {
        Lifecycle::Quiescent
    }

    /// Copies read-only remote attributes into the status before branching.
    fn record_observed(
        &self,
        _observed: &Self::Observed,
        _status: &mut <Self::Resource as DeclaredResource>::Status,
    ) {
    }

    /// Diff and apply. Called with the finalizer in place.
    async fn apply(
        &self,
        run: &RunContext,
        resource: &Self::Resource,
        observed: Option<&Self::Observed>,
        wf: &mut WorkflowContext<<Self::Resource as DeclaredResource>::Status>,
    ) -> WorkflowResult;

    /// Removes or verifies the absence of everything that depends on the
    /// remote resource.
    async fn cleanup_dependents(
        &self,
        run: &RunContext,
        resource: &Self::Resource,
    ) -> Result<(), CleanupError>;

    fn termination_protected(
        &self,
        _resource: &Self::Resource,
        _observed: &Self::Observed,
    ) -> bool {
        false
    }

    async fn delete_remote(
        &self,
        run: &RunContext,
        resource: &Self::Resource,
        observed: &Self::Observed,
    ) -> Result<(), ProviderError>;
}

/// Result of the branch logic; `object` is `None` once the resource has
/// been released and must not be written again.
pub(crate) struct Step<K> {
    pub result: WorkflowResult,
    pub object: Option<K>,
}

impl<K> Step<K> {
    pub fn keep(result: WorkflowResult, object: K) -> Self {
        Self {
            result,
            object: Some(object),
        }
    }

    pub fn released() -> Self {
        Self {
            result: WorkflowResult::ok(),
            object: None,
        }
    }
}

pub struct Dispatcher<H: ResourceHandler> {
    handler: H,
    store: Arc<dyn ResourceStore<H::Resource>>,
    credentials: Arc<dyn CredentialResolver>,
    providers: Arc<dyn ProviderFactory>,
    settings: DispatchSettings,
}

impl<H: ResourceHandler> Dispatcher<H> {
    pub fn new(
        handler: H,
        store: Arc<dyn ResourceStore<H::Resource>>,
        credentials: Arc<dyn CredentialResolver>,
        providers: Arc<dyn ProviderFactory>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            handler,
            store,
            credentials,
            providers,
            settings,
        }
    }

    fn requeue_for(&self, result: &WorkflowResult, attempt: u32) -> Option<std::time::Duration> {
        if result.is_transient() {
            Some(self.settings.backoff.jittered(attempt))
        } else if result.is_in_progress() {
            result.requeue_after()
        } else {
            None
        }
    }

    /// The version label, when present, must not come from a newer major
    /// release than this operator.
    fn check_resource_version(&self, obj: &H::Resource) -> Result<(), String> {
        let Some(label) = obj.labels().get(LABEL_RESOURCE_VERSION) else {
            return Ok(());
        };
        let theirs = major_version(label)
            .ok_or_else(|| format!("label {LABEL_RESOURCE_VERSION}='{label}' is not a version"))?;
        let ours = major_version(&self.settings.operator_version).unwrap_or(0);
        if theirs > ours {
            return Err(format!(
                "resource was written by operator {label}, this operator is {}",
                self.settings.operator_version
            ));
        }
        Ok(())
    }

    async fn connect(&self, obj: &H::Resource) -> Result<RunContext, WorkflowResult> {
        let ns = obj.namespace().unwrap_or_else(|| "default".to_string());
        let secret = match self.handler.credentials_source(obj) {
            CredentialSource::NotRequired => {
                return Ok(RunContext::new(
                    None,
                    self.settings.polls.clone(),
                    self.settings.backoff,
                ));
            }
            CredentialSource::Secret(r) => Some(r),
            CredentialSource::Default => None,
        };
        let creds = self.credentials.resolve(&ns, secret).await.map_err(|e| {
            WorkflowResult::terminate(reason::API_ACCESS_NOT_CONFIGURED, e.to_string())
        })?;
        let client = self.providers.client_for(&creds).map_err(|e| {
            WorkflowResult::terminate(reason::API_ACCESS_NOT_CONFIGURED, e.to_string())
        })?;
        Ok(RunContext::new(
            Some(client),
            self.settings.polls.clone(),
            self.settings.backoff,
        ))
    }

    async fn run(
        &self,
        obj: H::Resource,
        wf: &mut WorkflowContext<<H::Resource as DeclaredResource>::Status>,
    ) -> Result<Step<H::Resource>, ReconcileError> {
        let deleting = is_deleting(&obj);

        // 3. concurrent edits and resource version
        let generation = obj.meta().generation;
        let recorded = obj.status().and_then(|s| s.observed_generation());
        if let (Some(seen), Some(current)) = (recorded, generation) {
            if seen > current {
                let r = WorkflowResult::terminate(
                    reason::GENERATION_AHEAD,
                    format!("status.observedGeneration {seen} is ahead of metadata.generation {current}"),
                );
                wf.set_condition(ConditionType::ResourceVersionIsValid, &r);
                return Ok(Step::keep(r, obj));
            }
        }
        if let Err(msg) = self.check_resource_version(&obj) {
            let r = WorkflowResult::terminate(reason::RESOURCE_VERSION_INVALID, msg);
            wf.set_condition(ConditionType::ResourceVersionIsValid, &r);
            return Ok(Step::keep(r, obj));
        }
        wf.set_condition_true(ConditionType::ResourceVersionIsValid);

        // 4. provider support and credentials
        if let Err(msg) = self.handler.check_support(&obj, &self.settings.restrictions) {
            return Ok(Step::keep(
                WorkflowResult::terminate(reason::GOV_UNSUPPORTED, msg),
                obj,
            ));
        }
        let run = match self.connect(&obj).await {
            Ok(run) => run,
            Err(r) => return Ok(Step::keep(r, obj)),
        };

        // 5. spec validation, skipped while deleting
        if !deleting {
            match self.handler.validate(&obj) {
                Ok(()) => wf.set_condition_true(ConditionType::ValidationSucceeded),
                Err(msg) => {
                    let r = WorkflowResult::terminate(reason::VALIDATION_FAILED, msg);
                    wf.set_condition(ConditionType::ValidationSucceeded, &r);
                    return Ok(Step::keep(r, obj));
                }
            }
        }

        // 6. remote state
        let observed = match self.handler.fetch_observed(&run, &obj).await {
            Ok(o) => o,
            Err(r) => {
                wf.set_condition(self.handler.main_condition(), &r);
                return Ok(Step::keep(r, obj));
            }
        };
        if let Some(o) = &observed {
            self.handler.record_observed(o, wf.status_mut());
        }
        let observed = match observed {
            Some(o) => match self.handler.lifecycle(&obj, &o, &run.polls) {
                Lifecycle::Gone => None,
                Lifecycle::Unrecognized(r) => {
                    wf.set_condition(self.handler.main_condition(), &r);
                    return Ok(Step::keep(r, obj));
                }
                // no mutation while the remote is mid-transition, deletion
                // included
                Lifecycle::Transitional(r) => {
                    debug!(deleting, "remote resource is transitional, polling only");
                    wf.set_condition(self.handler.main_condition(), &r);
                    return Ok(Step::keep(r, obj));
                }
                Lifecycle::Quiescent => Some(o),
            },
            None => None,
        };

        // 7. branch on existence and deletion
        match (observed, deleting) {
            (Some(o), true) => {
                finalizer::delete_path(
                    &self.handler,
                    self.store.as_ref(),
                    &run,
                    obj,
                    &o,
                    self.settings.deletion_protection,
                )
                .await
            }
            (None, true) => {
                if has_finalizer(&obj, FINALIZER) {
                    info!("remote resource absent, releasing finalizer");
                    self.store.remove_finalizer(&obj, FINALIZER).await?;
                }
                Ok(Step::released())
            }
            (o, false) => {
                let obj = if has_finalizer(&obj, FINALIZER) {
                    obj
                } else {
                    info!("adding finalizer");
                    self.store.add_finalizer(&obj, FINALIZER).await?
                };
                let r = self.handler.apply(&run, &obj, o.as_ref(), wf).await;
                Ok(Step::keep(r, obj))
            }
        }
    }
}

fn major_version(v: &str) -> Option<u64> {
    v.trim_start_matches('v').split('.').next()?.parse().ok()
}

#[async_trait]
impl<H: ResourceHandler> Reconciler for Dispatcher<H> {
    #[instrument(skip_all, fields(kind = %<H::Resource as DeclaredResource>::KIND, %ns, %name))]
    async fn reconcile(
        &self,
        ns: &str,
        name: &str,
        attempt: u32,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        // 1. fetch
        let Some(obj) = self.store.get(ns, name).await? else {
            debug!("resource no longer exists");
            return Ok(ReconcileOutcome::done());
        };

        // 2. skip marker
        let skip = obj
            .annotations()
            .get(ANNOTATION_RECONCILIATION_POLICY)
            .is_some_and(|v| v == "skip");
        if skip {
            if is_deleting(&obj) && has_finalizer(&obj, FINALIZER) {
                info!("reconciliation skipped, releasing finalizer");
                self.store.remove_finalizer(&obj, FINALIZER).await?;
            }
            return Ok(ReconcileOutcome::done());
        }

        let current_status = obj.status().cloned();
        let generation = obj.meta().generation;
        let recorded = current_status.as_ref().and_then(|s| s.observed_generation());
        // an out-of-band edit must not be papered over by bumping the
        // recorded generation
        let stamp = match (recorded, generation) {
            (Some(seen), Some(current)) if seen > current => Some(seen),
            _ => generation,
        };
        let mut wf = WorkflowContext::new(current_status.as_ref(), stamp);

        let step = self.run(obj, &mut wf).await?;
        let result = step.result;

        // 8. single status flush
        if let Some(obj) = step.object {
            if let Some(status) = wf.finish_if_changed(&result) {
                match self.store.patch_status(&obj, &status).await {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if result.is_terminate() {
            warn!(reason = result.reason(), message = result.message(), "reconcile terminated");
        } else if result.is_in_progress() {
            info!(reason = result.reason(), message = result.message(), "reconcile in progress");
        } else {
            debug!("reconciled");
        }
        if result.is_transient() {
            error!(message = result.message(), attempt, "transient provider failure");
        }

        Ok(ReconcileOutcome {
            requeue_after: self.requeue_for(&result, attempt),
            result,
        })
    }
}
