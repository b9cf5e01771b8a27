use std::collections::BTreeMap;

use dbaas_provider::ProviderError;
use futures_util::future::{BoxFuture, join_all};
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::crd::{ANNOTATION_RESOURCE_POLICY, DeclaredResource, FINALIZER};
use crate::store::{ResourceStore, StoreError, has_finalizer};

use super::ReconcileError;
use super::dispatcher::{ResourceHandler, RunContext, Step};
use super::retry::{ErrorClass, PollState, classify, provider_failure};
use super::workflow::{WorkflowResult, aggregate, reason};

/// What happens to the remote resource when its declaration is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Leave the remote resource in place.
    Keep,
    /// Delete unless the remote side is termination protected.
    DeleteUnlessProtected,
    /// Explicit `delete` annotation.
    Delete,
}

pub fn deletion_policy(
    annotations: &BTreeMap<String, String>,
    default_protection: bool,
) -> DeletionPolicy {
    match annotations.get(ANNOTATION_RESOURCE_POLICY).map(String::as_str) {
        Some("keep") => DeletionPolicy::Keep,
        Some("delete") => DeletionPolicy::Delete,
        _ if default_protection => DeletionPolicy::Keep,
        _ => DeletionPolicy::DeleteUnlessProtected,
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CleanupError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("{0}")]
    DependentsRemain(String),
    #[error("cancelled after a sibling cleanup step failed")]
    Cancelled,
    #[error("{}", join_messages(.0))]
    Multiple(Vec<CleanupError>),
}

fn join_messages(errors: &[CleanupError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Runs independent cleanup branches concurrently. The first failure
/// cancels the shared token; every branch is still awaited and all real
/// failures are reported together.
pub struct CleanupGroup<'a> {
    token: CancellationToken,
    tasks: Vec<BoxFuture<'a, Result<(), CleanupError>>>,
}

impl Default for CleanupGroup<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> CleanupGroup<'a> {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Branches check this between steps and stop with
    /// [`CleanupError::Cancelled`] once it fires.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn push(&mut self, task: BoxFuture<'a, Result<(), CleanupError>>) {
        self.tasks.push(task);
    }

    pub async fn join(self) -> Result<(), CleanupError> {
        let token = self.token;
        let results = join_all(self.tasks.into_iter().map(|task| {
            let token = token.clone();
            async move {
                let r = task.await;
                if r.is_err() {
                    token.cancel();
                }
                r
            }
        }))
        .await;

        let mut errors: Vec<CleanupError> = results.into_iter().filter_map(Result::err).collect();
        if errors.iter().any(|e| !matches!(e, CleanupError::Cancelled)) {
            errors.retain(|e| !matches!(e, CleanupError::Cancelled));
        }
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(CleanupError::Multiple(errors)),
        }
    }
}

/// Result for a failed cascade. Dependents that are still present are
/// polled, retryable provider and store failures back off, and only a
/// permanent provider error terminates.
pub fn cleanup_failure(err: &CleanupError, run: &RunContext) -> WorkflowResult {
    match err {
        CleanupError::Provider(e) => match classify(e) {
            ErrorClass::Transient => WorkflowResult::transient(
                reason::DEPENDENTS_NOT_CLEANED,
                err.to_string(),
                run.backoff.delay(0),
            ),
            ErrorClass::NotFound | ErrorClass::Permanent => {
                WorkflowResult::terminate(reason::DEPENDENTS_NOT_CLEANED, err.to_string())
            }
        },
        CleanupError::Store(_) => WorkflowResult::transient(
            reason::DEPENDENTS_NOT_CLEANED,
            err.to_string(),
            run.backoff.delay(0),
        ),
        CleanupError::DependentsRemain(_) | CleanupError::Cancelled => WorkflowResult::in_progress(
            reason::DEPENDENTS_NOT_CLEANED,
            err.to_string(),
            run.polls.interval(PollState::DependencyPending),
        ),
        CleanupError::Multiple(errors) => {
            aggregate(errors.iter().map(|e| cleanup_failure(e, run)))
        }
    }
}

/// Deletion of a resource whose remote counterpart still exists: dependents
/// first, then the remote resource per policy, then the finalizer.
pub(crate) async fn delete_path<H: ResourceHandler>(
    handler: &H,
    store: &dyn ResourceStore<H::Resource>,
    run: &RunContext,
    obj: H::Resource,
    observed: &H::Observed,
    default_protection: bool,
) -> Result<Step<H::Resource>, ReconcileError> {
    if !has_finalizer(&obj, FINALIZER) {
        return Ok(Step::released());
    }

    if let Err(e) = handler.cleanup_dependents(run, &obj).await {
        warn!(error = %e, "dependents not cleaned up, keeping finalizer");
        return Ok(Step::keep(cleanup_failure(&e, run), obj));
    }

    let delete = match deletion_policy(obj.annotations(), default_protection) {
        DeletionPolicy::Keep => {
            info!("deletion policy keeps the remote resource");
            false
        }
        DeletionPolicy::DeleteUnlessProtected if handler.termination_protected(&obj, observed) => {
            warn!("remote resource is termination protected, leaving it in place");
            false
        }
        DeletionPolicy::DeleteUnlessProtected | DeletionPolicy::Delete => true,
    };

    if delete {
        match handler.delete_remote(run, &obj, observed).await {
            Ok(()) => info!("remote resource deleted"),
            Err(e) if e.is_not_found() => info!("remote resource already gone"),
            Err(e) => {
                let r = provider_failure(
                    &e,
                    reason::DELETION_FAILED,
                    &format!("deleting {}", <H::Resource as DeclaredResource>::KIND),
                    &run.backoff,
                );
                return Ok(Step::keep(r, obj));
            }
        }
    }

    store.remove_finalizer(&obj, FINALIZER).await?;
    Ok(Step::released())
}
