//! `BackupSchedule` has no remote object of its own: the policy is pushed by
//! every deployment bound to it. Reconciling a schedule only prunes stale
//! bindings and guards deletion while deployments still use it.

use std::sync::Arc;

use async_trait::async_trait;
use dbaas_provider::ProviderError;
use kube::ResourceExt;
use tracing::debug;

use crate::controller::conditions::WorkflowContext;
use crate::controller::dispatcher::{CredentialSource, ResourceHandler, RunContext};
use crate::controller::finalizer::CleanupError;
use crate::controller::validate;
use crate::controller::workflow::{WorkflowResult, reason};
use crate::crd::{BackupSchedule, BackupScheduleStatus, ConditionType, DatabaseDeployment};
use crate::store::{ResourceStore, StoreError};

use super::binding_id;

pub struct BackupScheduleHandler {
    deployments: Arc<dyn ResourceStore<DatabaseDeployment>>,
}

impl BackupScheduleHandler {
    pub fn new(deployments: Arc<dyn ResourceStore<DatabaseDeployment>>) -> Self {
        Self { deployments }
    }

    /// Recorded bindings whose deployment still exists and still points here.
    async fn verified_bindings(&self, schedule: &BackupSchedule) -> Result<Vec<String>, StoreError> {
        let ns = schedule.namespace().unwrap_or_default();
        let name = schedule.name_any();
        let recorded = schedule
            .status
            .as_ref()
            .map(|s| s.deployment_ids.clone())
            .unwrap_or_default();

        let mut verified = Vec::new();
        for id in recorded {
            let Some((dns, dname)) = id.split_once('/') else {
                continue;
            };
            let Some(d) = self.deployments.get(dns, dname).await? else {
                debug!(deployment = %id, "dropping binding of missing deployment");
                continue;
            };
            let points_here = d
                .spec
                .backup_schedule_ref
                .as_ref()
                .is_some_and(|r| r.namespace_or(dns) == ns && r.name == name);
            if points_here {
                verified.push(binding_id(dns, dname));
            }
        }
        verified.sort();
        verified.dedup();
        Ok(verified)
    }
}

#[async_trait]
impl ResourceHandler for BackupScheduleHandler {
    type Resource = BackupSchedule;
    type Observed = Vec<String>;

    fn main_condition(&self) -> ConditionType {
        ConditionType::BackupScheduleReady
    }

    fn validate(&self, res: &BackupSchedule) -> Result<(), String> {
        validate::backup_schedule(&res.spec)
    }

    fn credentials_source<'a>(&self, _res: &'a BackupSchedule) -> CredentialSource<'a> {
        CredentialSource::NotRequired
    }

    async fn fetch_observed(
        &self,
        run: &RunContext,
        res: &BackupSchedule,
    ) -> Result<Option<Vec<String>>, WorkflowResult> {
        self.verified_bindings(res).await.map(Some).map_err(|e| {
            WorkflowResult::transient(
                reason::BACKUP_SCHEDULE_FAILED,
                format!("reading bound deployments: {e}"),
                run.backoff.delay(0),
            )
        })
    }

    async fn apply(
        &self,
        _run: &RunContext,
        _res: &BackupSchedule,
        observed: Option<&Vec<String>>,
        wf: &mut WorkflowContext<BackupScheduleStatus>,
    ) -> WorkflowResult {
        wf.status_mut().deployment_ids = observed.cloned().unwrap_or_default();
        wf.set_condition_true(ConditionType::BackupScheduleReady);
        WorkflowResult::ok()
    }

    async fn cleanup_dependents(
        &self,
        _run: &RunContext,
        res: &BackupSchedule,
    ) -> Result<(), CleanupError> {
        let bound = self.verified_bindings(res).await?;
        if bound.is_empty() {
            Ok(())
        } else {
            Err(CleanupError::DependentsRemain(format!(
                "still bound to deployments: {}",
                bound.join(", ")
            )))
        }
    }

    async fn delete_remote(
        &self,
        _run: &RunContext,
        _res: &BackupSchedule,
        _observed: &Vec<String>,
    ) -> Result<(), ProviderError> {
        Ok(())
    }
}
