//! `DatabaseDeployment`: a provisioned cluster or a serverless instance,
//! plus everything hanging off it (search indexes and nodes, private
//! endpoints, global cluster settings, backup schedule binding).

pub mod backup;
pub mod global_cluster;
pub mod private_endpoints;
pub mod search_indexes;
pub mod search_nodes;

use std::sync::Arc;

use async_trait::async_trait;
use dbaas_provider::{Deployment, ProviderError};
use futures_util::FutureExt;
use kube::ResourceExt;
use tracing::info;

use crate::controller::conditions::WorkflowContext;
use crate::controller::dispatcher::{
    CredentialSource, ProviderRestrictions, ResourceHandler, RunContext,
};
use crate::controller::finalizer::{CleanupError, CleanupGroup};
use crate::controller::retry::{PollIntervals, PollState, provider_failure};
use crate::controller::state::{DeploymentVariant, Lifecycle};
use crate::controller::validate;
use crate::controller::workflow::{WorkflowResult, aggregate, reason};
use crate::crd::{
    BackupSchedule, ConditionType, DatabaseDeployment, DatabaseDeploymentStatus,
};
use crate::store::{ResourceStore, SecretAccess};

use super::connection;
use super::require_provider;

pub struct DeploymentHandler {
    secrets: Arc<dyn SecretAccess>,
    schedules: Arc<dyn ResourceStore<BackupSchedule>>,
}

impl DeploymentHandler {
    pub fn new(
        secrets: Arc<dyn SecretAccess>,
        schedules: Arc<dyn ResourceStore<BackupSchedule>>,
    ) -> Self {
        Self { secrets, schedules }
    }
}

/// Name of the remote cluster or instance, falling back to the object name
/// for an inconsistent spec.
pub fn remote_name(res: &DatabaseDeployment) -> String {
    DeploymentVariant::from_spec(&res.spec)
        .map(|v| v.name().to_string())
        .unwrap_or_else(|_| res.name_any())
}

fn variant(res: &DatabaseDeployment) -> Result<DeploymentVariant<'_>, WorkflowResult> {
    DeploymentVariant::from_spec(&res.spec)
        .map_err(|msg| WorkflowResult::terminate(reason::VALIDATION_FAILED, msg))
}

/// Sets or drops a sub-condition and hands back the result for aggregation.
fn track(
    wf: &mut WorkflowContext<DatabaseDeploymentStatus>,
    type_: ConditionType,
    result: Option<WorkflowResult>,
) -> WorkflowResult {
    match result {
        Some(r) => {
            wf.set_condition(type_, &r);
            r
        }
        None => {
            wf.unset_condition(type_);
            WorkflowResult::ok()
        }
    }
}

#[async_trait]
impl ResourceHandler for DeploymentHandler {
    type Resource = DatabaseDeployment;
    type Observed = Deployment;

    fn main_condition(&self) -> ConditionType {
        ConditionType::DeploymentReady
    }

    fn validate(&self, res: &DatabaseDeployment) -> Result<(), String> {
        validate::deployment(&res.spec)
    }

    fn check_support(
        &self,
        res: &DatabaseDeployment,
        restrictions: &ProviderRestrictions,
    ) -> Result<(), String> {
        if !restrictions.cloud_gov {
            return Ok(());
        }
        if res.spec.serverless_spec.is_some() {
            return Err("serverless instances are not available in the government cloud".into());
        }
        let has_indexes = res
            .spec
            .deployment_spec
            .as_ref()
            .is_some_and(|p| !p.search_indexes.is_empty());
        if has_indexes {
            return Err("search indexes are not available in the government cloud".into());
        }
        Ok(())
    }

    fn credentials_source<'a>(&self, res: &'a DatabaseDeployment) -> CredentialSource<'a> {
        match &res.spec.connection_secret {
            Some(r) => CredentialSource::Secret(r),
            None => CredentialSource::Default,
        }
    }

    async fn fetch_observed(
        &self,
        run: &RunContext,
        res: &DatabaseDeployment,
    ) -> Result<Option<Deployment>, WorkflowResult> {
        let provider = require_provider(run)?;
        let v = variant(res)?;
        provider
            .get_deployment(&res.spec.project_id, v.kind(), v.name())
            .await
            .map_err(|e| {
                provider_failure(
                    &e,
                    reason::PROVIDER_ERROR,
                    &format!("reading {} '{}'", v.noun(), v.name()),
                    &run.backoff,
                )
            })
    }

    fn lifecycle(
        &self,
        res: &DatabaseDeployment,
        observed: &Deployment,
        polls: &PollIntervals,
    ) -> Lifecycle {
        match DeploymentVariant::from_spec(&res.spec) {
            Ok(v) => v.classify(&observed.state_name, polls),
            Err(_) => Lifecycle::Quiescent,
        }
    }

    fn record_observed(&self, observed: &Deployment, status: &mut DatabaseDeploymentStatus) {
        status.state_name = (!observed.state_name.is_empty()).then(|| observed.state_name.clone());
        status.mongo_db_version = observed.mongo_db_version.clone();
        status.connection_strings = observed.connection_strings.as_ref().map(Into::into);
    }

    async fn apply(
        &self,
        run: &RunContext,
        res: &DatabaseDeployment,
        observed: Option<&Deployment>,
        wf: &mut WorkflowContext<DatabaseDeploymentStatus>,
    ) -> WorkflowResult {
        let provider = match require_provider(run) {
            Ok(p) => p,
            Err(r) => return r,
        };
        let v = match variant(res) {
            Ok(v) => v,
            Err(r) => return r,
        };
        let project = res.spec.project_id.as_str();

        let Some(observed) = observed else {
            let r = match provider.create_deployment(project, v.kind(), &v.to_remote()).await {
                Ok(created) => {
                    info!(deployment = %v.name(), "{} creation requested", v.noun());
                    self.record_observed(&created, wf.status_mut());
                    WorkflowResult::in_progress(
                        reason::DEPLOYMENT_CREATING,
                        format!("{} '{}' is being created", v.noun(), v.name()),
                        run.polls.interval(PollState::Creating),
                    )
                }
                Err(e) => provider_failure(
                    &e,
                    reason::DEPLOYMENT_NOT_CREATED,
                    &format!("creating {} '{}'", v.noun(), v.name()),
                    &run.backoff,
                ),
            };
            wf.set_condition(ConditionType::DeploymentReady, &r);
            return r;
        };

        if v.needs_update(observed) {
            let r = match provider.update_deployment(project, v.kind(), &v.to_remote()).await {
                Ok(updated) => {
                    info!(deployment = %v.name(), "{} update requested", v.noun());
                    self.record_observed(&updated, wf.status_mut());
                    WorkflowResult::in_progress(
                        reason::DEPLOYMENT_UPDATING,
                        format!("{} '{}' is being updated", v.noun(), v.name()),
                        run.polls.interval(PollState::Updating),
                    )
                }
                Err(e) => provider_failure(
                    &e,
                    reason::DEPLOYMENT_NOT_UPDATED,
                    &format!("updating {} '{}'", v.noun(), v.name()),
                    &run.backoff,
                ),
            };
            wf.set_condition(ConditionType::DeploymentReady, &r);
            return r;
        }

        wf.set_condition_true(ConditionType::DeploymentReady);

        let mut results = Vec::new();
        match v {
            DeploymentVariant::Provisioned(p) => {
                let backup =
                    backup::sync(provider, self.schedules.as_ref(), run, res, &p.name).await;
                results.push(track(wf, ConditionType::BackupScheduleReady, backup));

                let indexes = search_indexes::sync(
                    provider,
                    run,
                    project,
                    &p.name,
                    &p.search_indexes,
                    &mut wf.status_mut().search_indexes,
                )
                .await;
                results.push(track(wf, ConditionType::SearchIndexesReady, indexes));

                let previous = wf
                    .condition(ConditionType::SearchNodesReady)
                    .and_then(|c| c.reason.clone());
                let nodes = search_nodes::sync(
                    provider,
                    run,
                    project,
                    &p.name,
                    &p.search_nodes,
                    previous.as_deref(),
                )
                .await;
                results.push(track(wf, ConditionType::SearchNodesReady, nodes));

                let status = wf.status_mut();
                let global = global_cluster::sync(
                    provider,
                    run,
                    project,
                    p,
                    &mut status.custom_zone_mapping,
                    &mut status.managed_namespaces,
                )
                .await;
                results.push(track(wf, ConditionType::CustomZoneMappingReady, global.zone_mapping));
                results.push(track(
                    wf,
                    ConditionType::ManagedNamespacesReady,
                    global.managed_namespaces,
                ));
            }
            DeploymentVariant::Serverless(s) => {
                let backup = res.spec.backup_schedule_ref.as_ref().map(|_| {
                    WorkflowResult::terminate(
                        reason::UNSUPPORTED_FEATURE,
                        "backup schedules cannot be bound to serverless instances",
                    )
                });
                results.push(track(wf, ConditionType::BackupScheduleReady, backup));

                let endpoints = private_endpoints::sync(
                    provider,
                    run,
                    project,
                    s,
                    &mut wf.status_mut().serverless_private_endpoints,
                )
                .await;
                results.push(track(
                    wf,
                    ConditionType::ServerlessPrivateEndpointReady,
                    endpoints,
                ));
            }
        }
        aggregate(results)
    }

    async fn cleanup_dependents(
        &self,
        _run: &RunContext,
        res: &DatabaseDeployment,
    ) -> Result<(), CleanupError> {
        let ns = res.namespace().unwrap_or_default();
        let selector = connection::deployment_selector(&res.spec.project_id, &remote_name(res));

        let mut group = CleanupGroup::new();
        let secrets = self.secrets.as_ref();
        let schedules = self.schedules.as_ref();
        let token = group.token();
        group.push(
            async move {
                if token.is_cancelled() {
                    return Err(CleanupError::Cancelled);
                }
                connection::purge(secrets, &ns, &selector).await
            }
            .boxed(),
        );
        let token = group.token();
        group.push(
            async move {
                if token.is_cancelled() {
                    return Err(CleanupError::Cancelled);
                }
                backup::release(schedules, res).await
            }
            .boxed(),
        );
        group.join().await
    }

    fn termination_protected(&self, res: &DatabaseDeployment, observed: &Deployment) -> bool {
        observed.termination_protection_enabled
            || DeploymentVariant::from_spec(&res.spec).is_ok_and(|v| v.termination_protected())
    }

    async fn delete_remote(
        &self,
        run: &RunContext,
        res: &DatabaseDeployment,
        observed: &Deployment,
    ) -> Result<(), ProviderError> {
        let provider = run
            .provider()
            .ok_or_else(|| ProviderError::InvalidRequest("no provider client".into()))?;
        let kind = match DeploymentVariant::from_spec(&res.spec) {
            Ok(v) => v.kind(),
            Err(msg) => return Err(ProviderError::InvalidRequest(msg)),
        };
        info!(deployment = %observed.name, "deleting remote deployment");
        provider
            .delete_deployment(&res.spec.project_id, kind, &observed.name)
            .await
    }
}
