//! Binding between a deployment and a shared `BackupSchedule`.
//!
//! The schedule's status lists every deployment bound to it; the deployment
//! side writes that list and pushes the schedule to the provider.

use dbaas_provider::ProviderClient;
use kube::ResourceExt;
use tracing::info;

use crate::controller::dispatcher::RunContext;
use crate::controller::finalizer::CleanupError;
use crate::controller::handlers::binding_id;
use crate::controller::retry::{PollState, provider_failure};
use crate::controller::workflow::{WorkflowResult, reason};
use crate::crd::{BackupSchedule, DatabaseDeployment, ResourceRef};
use crate::store::{ResourceStore, StoreError, is_deleting};

fn store_failure(e: &StoreError, run: &RunContext) -> WorkflowResult {
    WorkflowResult::transient(
        reason::BACKUP_SCHEDULE_FAILED,
        format!("updating backup schedule bindings: {e}"),
        run.backoff.delay(0),
    )
}

async fn set_bound(
    schedules: &dyn ResourceStore<BackupSchedule>,
    schedule: &BackupSchedule,
    id: &str,
    bound: bool,
) -> Result<(), StoreError> {
    let mut status = schedule.status.clone().unwrap_or_default();
    let present = status.deployment_ids.iter().any(|d| d == id);
    if present == bound {
        return Ok(());
    }
    if bound {
        status.deployment_ids.push(id.to_string());
        status.deployment_ids.sort();
    } else {
        status.deployment_ids.retain(|d| d != id);
    }
    schedules.patch_status(schedule, &status).await?;
    Ok(())
}

/// Removes `id` from every schedule except `keep`.
async fn unbind_others(
    schedules: &dyn ResourceStore<BackupSchedule>,
    id: &str,
    keep: Option<(&str, &str)>,
) -> Result<(), StoreError> {
    for s in schedules.list(None).await? {
        let ns = s.namespace().unwrap_or_default();
        if keep == Some((ns.as_str(), s.name_any().as_str())) {
            continue;
        }
        let bound = s
            .status
            .as_ref()
            .is_some_and(|st| st.deployment_ids.iter().any(|d| d == id));
        if bound {
            info!(schedule = %s.name_any(), "unbinding backup schedule");
            set_bound(schedules, &s, id, false).await?;
        }
    }
    Ok(())
}

/// Converges the binding and the provider-side schedule of a provisioned
/// cluster. `None` when no schedule is referenced.
pub async fn sync(
    provider: &dyn ProviderClient,
    schedules: &dyn ResourceStore<BackupSchedule>,
    run: &RunContext,
    deployment: &DatabaseDeployment,
    cluster: &str,
) -> Option<WorkflowResult> {
    let ns = deployment.namespace().unwrap_or_default();
    let id = binding_id(&ns, &deployment.name_any());

    let Some(reference) = &deployment.spec.backup_schedule_ref else {
        return match unbind_others(schedules, &id, None).await {
            Ok(()) => None,
            Err(e) => Some(store_failure(&e, run)),
        };
    };

    let schedule = match fetch(schedules, reference, &ns).await {
        Ok(Some(s)) if !is_deleting(&s) => s,
        Ok(_) => {
            return Some(WorkflowResult::terminate(
                reason::BACKUP_SCHEDULE_NOT_FOUND,
                format!(
                    "backup schedule {}/{} does not exist",
                    reference.namespace_or(&ns),
                    reference.name
                ),
            ));
        }
        Err(e) => return Some(store_failure(&e, run)),
    };

    let bound = set_bound(schedules, &schedule, &id, true).await;
    let others = unbind_others(
        schedules,
        &id,
        Some((reference.namespace_or(&ns), reference.name.as_str())),
    )
    .await;
    if let Err(e) = bound.and(others) {
        if e.is_conflict() {
            return Some(WorkflowResult::in_progress(
                reason::BACKUP_SCHEDULE_FAILED,
                "backup schedule changed concurrently",
                run.polls.interval(PollState::DependencyPending),
            ));
        }
        return Some(store_failure(&e, run));
    }

    let desired = schedule.spec.to_remote();
    let project = deployment.spec.project_id.as_str();
    let current = match provider.get_backup_schedule(project, cluster).await {
        Ok(c) => c,
        Err(e) => {
            return Some(provider_failure(
                &e,
                reason::BACKUP_SCHEDULE_FAILED,
                "reading backup schedule",
                &run.backoff,
            ));
        }
    };
    if current != desired {
        if let Err(e) = provider.update_backup_schedule(project, cluster, &desired).await {
            return Some(provider_failure(
                &e,
                reason::BACKUP_SCHEDULE_FAILED,
                "applying backup schedule",
                &run.backoff,
            ));
        }
        info!(schedule = %reference.name, "backup schedule applied");
    }
    Some(WorkflowResult::ok())
}

async fn fetch(
    schedules: &dyn ResourceStore<BackupSchedule>,
    reference: &ResourceRef,
    default_ns: &str,
) -> Result<Option<BackupSchedule>, StoreError> {
    schedules
        .get(reference.namespace_or(default_ns), &reference.name)
        .await
}

/// Deletion cleanup: drop this deployment from every schedule, then verify.
pub async fn release(
    schedules: &dyn ResourceStore<BackupSchedule>,
    deployment: &DatabaseDeployment,
) -> Result<(), CleanupError> {
    let id = binding_id(
        &deployment.namespace().unwrap_or_default(),
        &deployment.name_any(),
    );
    unbind_others(schedules, &id, None).await?;
    let still: Vec<String> = schedules
        .list(None)
        .await?
        .iter()
        .filter(|s| {
            s.status
                .as_ref()
                .is_some_and(|st| st.deployment_ids.iter().any(|d| d == &id))
        })
        .map(|s| s.name_any())
        .collect();
    if still.is_empty() {
        Ok(())
    } else {
        Err(CleanupError::DependentsRemain(format!(
            "still bound to backup schedules: {}",
            still.join(", ")
        )))
    }
}
