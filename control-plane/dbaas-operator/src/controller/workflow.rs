use std::time::Duration;

/// Outcome class of one reconciliation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    InProgress,
    Terminate,
}

/// Result of a reconciliation step. Build it through the constructors;
/// `InProgress` and `Terminate` always carry a reason and a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowResult {
    outcome: Outcome,
    reason: String,
    message: String,
    requeue_after: Option<Duration>,
    transient: bool,
}

impl WorkflowResult {
    pub fn ok() -> Self {
        Self {
            outcome: Outcome::Ok,
            reason: String::new(),
            message: String::new(),
            requeue_after: None,
            transient: false,
        }
    }

    pub fn in_progress(
        reason: impl Into<String>,
        message: impl Into<String>,
        requeue_after: Duration,
    ) -> Self {
        Self {
            outcome: Outcome::InProgress,
            reason: reason.into(),
            message: message.into(),
            requeue_after: Some(requeue_after),
            transient: false,
        }
    }

    /// In progress because of a retryable failure; the requeue delay comes
    /// from the backoff policy instead of a poll interval.
    pub fn transient(
        reason: impl Into<String>,
        message: impl Into<String>,
        initial_delay: Duration,
    ) -> Self {
        Self {
            transient: true,
            ..Self::in_progress(reason, message, initial_delay)
        }
    }

    pub fn terminate(
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            outcome: Outcome::Terminate,
            reason: reason.into(),
            message: message.into(),
            requeue_after: None,
            transient: false,
        }
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == Outcome::Ok
    }

    pub fn is_in_progress(&self) -> bool {
        self.outcome == Outcome::InProgress
    }

    pub fn is_terminate(&self) -> bool {
        self.outcome == Outcome::Terminate
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

/// First `Terminate` in scan order wins; otherwise the first `InProgress`
/// with the smallest requeue delay among all in-progress results; otherwise
/// `Ok`.
pub fn aggregate<I>(results: I) -> WorkflowResult
where
    I: IntoIterator<Item = WorkflowResult>,
{
    let mut progress: Option<WorkflowResult> = None;
    let mut min_after: Option<Duration> = None;
    let mut any_transient = false;
    for r in results {
        match r.outcome {
            Outcome::Terminate => return r,
            Outcome::InProgress => {
                any_transient |= r.transient;
                min_after = match (min_after, r.requeue_after) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                if progress.is_none() {
                    progress = Some(r);
                }
            }
            Outcome::Ok => {}
        }
    }
    match progress {
        Some(mut p) => {
            p.requeue_after = min_after;
            p.transient = any_transient;
            p
        }
        None => WorkflowResult::ok(),
    }
}

/// Condition reasons surfaced to users.
pub mod reason {
    pub const RESOURCE_VERSION_INVALID: &str = "ResourceVersionIsInvalid";
    pub const GENERATION_AHEAD: &str = "ObservedGenerationAhead";
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    pub const GOV_UNSUPPORTED: &str = "GovUnsupported";
    pub const UNSUPPORTED_FEATURE: &str = "UnsupportedFeature";
    pub const API_ACCESS_NOT_CONFIGURED: &str = "ApiAccessNotConfigured";
    pub const PROVIDER_TRANSIENT: &str = "ProviderTransientError";
    pub const PROVIDER_ERROR: &str = "ProviderError";
    pub const DEPENDENTS_NOT_CLEANED: &str = "DependentsNotCleaned";
    pub const DELETION_FAILED: &str = "DeletionFailed";

    pub const DEPLOYMENT_CREATING: &str = "DeploymentCreating";
    pub const DEPLOYMENT_UPDATING: &str = "DeploymentUpdating";
    pub const DEPLOYMENT_REPAIRING: &str = "DeploymentRepairing";
    pub const DEPLOYMENT_UNKNOWN_STATE: &str = "DeploymentUnknownState";
    pub const DEPLOYMENT_NOT_CREATED: &str = "DeploymentNotCreated";
    pub const DEPLOYMENT_NOT_UPDATED: &str = "DeploymentNotUpdated";

    pub const SEARCH_INDEXES_NOT_READY: &str = "SearchIndexesNotReady";
    pub const SEARCH_INDEX_FAILED: &str = "SearchIndexFailed";
    pub const SEARCH_INDEX_DUPLICATE: &str = "SearchIndexDuplicate";

    pub const SEARCH_NODES_CREATING: &str = "SearchNodesCreating";
    pub const SEARCH_NODES_UPDATING: &str = "SearchNodesUpdating";
    pub const SEARCH_NODES_DELETING: &str = "SearchNodesDeleting";
    pub const SEARCH_NODES_NOT_UPSERTED: &str = "SearchNodesNotUpsertedInAtlas";
    pub const SEARCH_NODES_NOT_DELETED: &str = "SearchNodesNotDeletedInAtlas";

    pub const SERVERLESS_PE_IN_PROGRESS: &str = "ServerlessPrivateEndpointInProgress";
    pub const SERVERLESS_PE_FAILED: &str = "ServerlessPrivateEndpointFailed";

    pub const ZONE_MAPPING_FAILED: &str = "CustomZoneMappingFailed";
    pub const MANAGED_NAMESPACES_FAILED: &str = "ManagedNamespacesFailed";

    pub const BACKUP_SCHEDULE_NOT_FOUND: &str = "BackupScheduleNotFound";
    pub const BACKUP_SCHEDULE_FAILED: &str = "BackupScheduleFailed";

    pub const DATABASE_USER_EXPIRED: &str = "DatabaseUserExpired";
    pub const DATABASE_USER_INVALID_PASSWORD: &str = "DatabaseUserInvalidPassword";
    pub const DATABASE_USER_DEPLOYMENT_NOT_READY: &str =
        "DatabaseUserDeploymentNotReady";
    pub const CONNECTION_SECRETS_FAILED: &str = "ConnectionSecretsFailed";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn all_ok_aggregates_to_ok() {
        let r = aggregate([WorkflowResult::ok(), WorkflowResult::ok()]);
        assert!(r.is_ok());
        assert!(aggregate(Vec::new()).is_ok());
    }

    #[test]
    fn first_terminate_wins() {
        let r = aggregate([
            WorkflowResult::in_progress("A", "a", secs(5)),
            WorkflowResult::terminate("B", "b"),
            WorkflowResult::terminate("C", "c"),
        ]);
        assert!(r.is_terminate());
        assert_eq!(r.reason(), "B");
        assert_eq!(r.requeue_after(), None);
    }

    #[test]
    fn in_progress_takes_minimum_requeue() {
        let r = aggregate([
            WorkflowResult::ok(),
            WorkflowResult::in_progress("A", "a", secs(30)),
            WorkflowResult::in_progress("B", "b", secs(10)),
        ]);
        assert!(r.is_in_progress());
        assert_eq!(r.reason(), "A");
        assert_eq!(r.requeue_after(), Some(secs(10)));
        assert!(!r.is_transient());
    }

    #[test]
    fn transient_marker_survives_aggregation() {
        let r = aggregate([
            WorkflowResult::in_progress("A", "a", secs(30)),
            WorkflowResult::transient("B", "b", secs(2)),
        ]);
        assert!(r.is_transient());
        assert_eq!(r.requeue_after(), Some(secs(2)));
    }
}
