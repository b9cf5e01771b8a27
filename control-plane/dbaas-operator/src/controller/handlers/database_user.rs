//! `DatabaseUser`: a database user in a project plus one connection secret
//! per deployment the user can reach.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dbaas_provider::{DatabaseUser as RemoteUser, ProviderClient, ProviderError};
use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::conditions::WorkflowContext;
use crate::controller::dispatcher::{CredentialSource, ResourceHandler, RunContext};
use crate::controller::finalizer::CleanupError;
use crate::controller::retry::{PollState, provider_failure};
use crate::controller::state::{DeploymentState, DeploymentVariant};
use crate::controller::validate;
use crate::controller::workflow::{WorkflowResult, reason};
use crate::crd::{
    ConditionType, DatabaseDeployment, DatabaseUser, DatabaseUserStatus,
};
use crate::store::{ResourceStore, SecretAccess, StoreError, secret_value};

use super::connection::{self, ConnectionData, KEY_PASSWORD};
use super::require_provider;

pub struct DatabaseUserHandler {
    secrets: Arc<dyn SecretAccess>,
    deployments: Arc<dyn ResourceStore<DatabaseDeployment>>,
}

impl DatabaseUserHandler {
    pub fn new(
        secrets: Arc<dyn SecretAccess>,
        deployments: Arc<dyn ResourceStore<DatabaseDeployment>>,
    ) -> Self {
        Self {
            secrets,
            deployments,
        }
    }

    /// Password and the resourceVersion of the secret it came from.
    async fn password(&self, res: &DatabaseUser) -> Result<(String, String), WorkflowResult> {
        let invalid = |msg: String| WorkflowResult::terminate(reason::DATABASE_USER_INVALID_PASSWORD, msg);
        let Some(reference) = &res.spec.password_secret_ref else {
            return Err(invalid("passwordSecretRef is required".into()));
        };
        let ns = res.namespace().unwrap_or_default();
        let ns = reference.namespace.as_deref().unwrap_or(&ns);
        let secret = match self.secrets.read(ns, &reference.name).await {
            Ok(Some(s)) => s,
            Ok(None) => {
                return Err(invalid(format!(
                    "password secret {ns}/{} not found",
                    reference.name
                )));
            }
            Err(e) => return Err(secret_failure(&e)),
        };
        let password = secret_value(&secret, KEY_PASSWORD)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                invalid(format!(
                    "password secret {ns}/{} has no '{KEY_PASSWORD}' entry",
                    reference.name
                ))
            })?;
        Ok((password, secret.resource_version().unwrap_or_default()))
    }

    /// Declared deployments the user can reach, with their remote state.
    async fn targets(
        &self,
        provider: &dyn ProviderClient,
        res: &DatabaseUser,
    ) -> Result<Vec<(String, dbaas_provider::Deployment)>, WorkflowResult> {
        let ns = res.namespace().unwrap_or_default();
        let scopes = res.spec.cluster_scopes();
        let declared = self
            .deployments
            .list(Some(&ns))
            .await
            .map_err(|e| secret_failure(&e))?;

        let mut out = Vec::new();
        for d in &declared {
            if d.spec.project_id != res.spec.project_id {
                continue;
            }
            let Ok(v) = DeploymentVariant::from_spec(&d.spec) else {
                continue;
            };
            if !scopes.is_empty() && !scopes.contains(&v.name()) {
                continue;
            }
            match provider
                .get_deployment(&res.spec.project_id, v.kind(), v.name())
                .await
            {
                Ok(Some(remote)) => out.push((v.name().to_string(), remote)),
                Ok(None) => debug!(deployment = %v.name(), "scoped deployment not created yet"),
                Err(e) => {
                    return Err(WorkflowResult::transient(
                        reason::PROVIDER_TRANSIENT,
                        format!("reading deployment '{}': {e}", v.name()),
                        std::time::Duration::from_secs(2),
                    ));
                }
            }
        }
        Ok(out)
    }

    async fn expire(
        &self,
        provider: &dyn ProviderClient,
        run: &RunContext,
        res: &DatabaseUser,
        observed: Option<&RemoteUser>,
        wf: &mut WorkflowContext<DatabaseUserStatus>,
    ) -> WorkflowResult {
        if observed.is_some() {
            let spec = &res.spec;
            match provider
                .delete_database_user(&spec.project_id, &spec.database_name, &spec.username)
                .await
            {
                Ok(()) => info!(user = %spec.username, "expired database user deleted"),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    return provider_failure(
                        &e,
                        reason::DATABASE_USER_EXPIRED,
                        "deleting expired database user",
                        &run.backoff,
                    );
                }
            }
        }
        let ns = res.namespace().unwrap_or_default();
        let selector = connection::user_selector(&res.spec.project_id, &res.spec.username);
        if let Err(e) = connection::purge(self.secrets.as_ref(), &ns, &selector).await {
            return WorkflowResult::transient(
                reason::CONNECTION_SECRETS_FAILED,
                e.to_string(),
                run.backoff.delay(0),
            );
        }
        wf.status_mut().connection_secrets.clear();
        WorkflowResult::terminate(
            reason::DATABASE_USER_EXPIRED,
            format!(
                "user '{}' expired at {}",
                res.spec.username,
                res.spec.delete_after_date.as_deref().unwrap_or_default()
            ),
        )
    }

    async fn sync_secrets(
        &self,
        run: &RunContext,
        res: &DatabaseUser,
        password: &str,
        targets: &[(String, dbaas_provider::Deployment)],
        status: &mut DatabaseUserStatus,
    ) -> WorkflowResult {
        let ns = res.namespace().unwrap_or_default();
        let spec = &res.spec;
        let mut wanted = BTreeSet::new();
        for (name, remote) in targets {
            let secret = connection::build(&ConnectionData {
                namespace: &ns,
                project_id: &spec.project_id,
                deployment: name,
                username: &spec.username,
                password,
                strings: remote.connection_strings.as_ref(),
            });
            wanted.insert(secret.name_any());
            if let Err(e) = self.secrets.apply(&secret).await {
                return WorkflowResult::transient(
                    reason::CONNECTION_SECRETS_FAILED,
                    format!("writing connection secret {}: {e}", secret.name_any()),
                    run.backoff.delay(0),
                );
            }
        }

        let selector = connection::user_selector(&spec.project_id, &spec.username);
        let existing = match self.secrets.list(&ns, &selector).await {
            Ok(s) => s,
            Err(e) => return secret_failure(&e),
        };
        for stale in existing.iter().filter(|s| !wanted.contains(&s.name_any())) {
            info!(secret = %stale.name_any(), "deleting stale connection secret");
            if let Err(e) = self.secrets.delete(&ns, &stale.name_any()).await {
                return secret_failure(&e);
            }
        }
        status.connection_secrets = wanted.into_iter().collect();
        WorkflowResult::ok()
    }
}

fn secret_failure(e: &StoreError) -> WorkflowResult {
    WorkflowResult::transient(
        reason::CONNECTION_SECRETS_FAILED,
        e.to_string(),
        std::time::Duration::from_secs(2),
    )
}

fn expired(res: &DatabaseUser, now: DateTime<Utc>) -> bool {
    res.spec
        .delete_after_date
        .as_deref()
        .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
        .is_some_and(|d| d.with_timezone(&Utc) <= now)
}

/// Roles, scopes and expiry as the provider reports them; the password is
/// never returned and is tracked through the secret version instead.
fn same_user(desired: &RemoteUser, observed: &RemoteUser) -> bool {
    let sorted = |u: &RemoteUser| {
        let mut roles: Vec<_> = u
            .roles
            .iter()
            .map(|r| (r.role_name.clone(), r.database_name.clone(), r.collection_name.clone()))
            .collect();
        roles.sort();
        let mut scopes: Vec<_> = u
            .scopes
            .iter()
            .map(|s| (s.name.clone(), s.scope_type.clone()))
            .collect();
        scopes.sort();
        (roles, scopes)
    };
    sorted(desired) == sorted(observed) && desired.delete_after_date == observed.delete_after_date
}

#[async_trait]
impl ResourceHandler for DatabaseUserHandler {
    type Resource = DatabaseUser;
    type Observed = RemoteUser;

    fn main_condition(&self) -> ConditionType {
        ConditionType::DatabaseUserReady
    }

    fn validate(&self, res: &DatabaseUser) -> Result<(), String> {
        validate::database_user(&res.spec)
    }

    fn credentials_source<'a>(&self, res: &'a DatabaseUser) -> CredentialSource<'a> {
        match &res.spec.connection_secret {
            Some(r) => CredentialSource::Secret(r),
            None => CredentialSource::Default,
        }
    }

    async fn fetch_observed(
        &self,
        run: &RunContext,
        res: &DatabaseUser,
    ) -> Result<Option<RemoteUser>, WorkflowResult> {
        let provider = require_provider(run)?;
        let spec = &res.spec;
        provider
            .get_database_user(&spec.project_id, &spec.database_name, &spec.username)
            .await
            .map_err(|e| {
                provider_failure(
                    &e,
                    reason::PROVIDER_ERROR,
                    &format!("reading database user '{}'", spec.username),
                    &run.backoff,
                )
            })
    }

    async fn apply(
        &self,
        run: &RunContext,
        res: &DatabaseUser,
        observed: Option<&RemoteUser>,
        wf: &mut WorkflowContext<DatabaseUserStatus>,
    ) -> WorkflowResult {
        let provider = match require_provider(run) {
            Ok(p) => p,
            Err(r) => return r,
        };

        if expired(res, Utc::now()) {
            let r = self.expire(provider, run, res, observed, wf).await;
            wf.set_condition(ConditionType::DatabaseUserReady, &r);
            return r;
        }

        let (password, version) = match self.password(res).await {
            Ok(p) => p,
            Err(r) => {
                wf.set_condition(ConditionType::DatabaseUserReady, &r);
                return r;
            }
        };

        let spec = &res.spec;
        let mut desired = spec.to_remote();
        let password_changed = wf.status().password_version.as_deref() != Some(version.as_str());
        let call = match observed {
            None => {
                desired.password = Some(password.clone());
                Some(provider.create_database_user(&spec.project_id, &desired).await)
            }
            Some(o) if password_changed || !same_user(&desired, o) => {
                desired.password = password_changed.then(|| password.clone());
                Some(provider.update_database_user(&spec.project_id, &desired).await)
            }
            Some(_) => None,
        };
        match call {
            Some(Ok(_)) => {
                info!(user = %spec.username, created = observed.is_none(), "database user applied");
            }
            Some(Err(e)) => {
                let r = provider_failure(
                    &e,
                    reason::PROVIDER_ERROR,
                    &format!("applying database user '{}'", spec.username),
                    &run.backoff,
                );
                wf.set_condition(ConditionType::DatabaseUserReady, &r);
                return r;
            }
            None => {}
        }
        wf.status_mut().username = Some(spec.username.clone());
        wf.status_mut().password_version = Some(version);

        let targets = match self.targets(provider, res).await {
            Ok(t) => t,
            Err(r) => {
                wf.set_condition(ConditionType::DatabaseUserReady, &r);
                return r;
            }
        };
        if let Some((name, remote)) = targets
            .iter()
            .find(|(_, d)| DeploymentState::parse(&d.state_name) != DeploymentState::Idle)
        {
            let r = WorkflowResult::in_progress(
                reason::DATABASE_USER_DEPLOYMENT_NOT_READY,
                format!("deployment '{name}' is {}", remote.state_name),
                run.polls.interval(PollState::DependencyPending),
            );
            wf.set_condition(ConditionType::DatabaseUserReady, &r);
            return r;
        }

        let r = self
            .sync_secrets(run, res, &password, &targets, wf.status_mut())
            .await;
        wf.set_condition(ConditionType::DatabaseUserReady, &r);
        r
    }

    async fn cleanup_dependents(
        &self,
        _run: &RunContext,
        res: &DatabaseUser,
    ) -> Result<(), CleanupError> {
        let ns = res.namespace().unwrap_or_default();
        let selector = connection::user_selector(&res.spec.project_id, &res.spec.username);
        connection::purge(self.secrets.as_ref(), &ns, &selector).await
    }

    async fn delete_remote(
        &self,
        run: &RunContext,
        res: &DatabaseUser,
        _observed: &RemoteUser,
    ) -> Result<(), ProviderError> {
        let provider = run
            .provider()
            .ok_or_else(|| ProviderError::InvalidRequest("no provider client".into()))?;
        let spec = &res.spec;
        provider
            .delete_database_user(&spec.project_id, &spec.database_name, &spec.username)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DatabaseUserSpec;
    use crate::crd::database_user::RoleSpec;
    use dbaas_provider::Role;

    fn user(date: Option<&str>) -> DatabaseUser {
        DatabaseUser::new(
            "app",
            DatabaseUserSpec {
                project_id: "p1".into(),
                connection_secret: None,
                username: "app".into(),
                database_name: "admin".into(),
                roles: vec![RoleSpec {
                    role_name: "readWrite".into(),
                    database_name: "app".into(),
                    collection_name: None,
                }],
                scopes: vec![],
                password_secret_ref: None,
                delete_after_date: date.map(Into::into),
            },
        )
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(expired(&user(Some("2024-05-01T00:00:00Z")), now));
        assert!(!expired(&user(Some("2024-05-02T00:00:00Z")), now));
        assert!(!expired(&user(None), now));
    }

    #[test]
    fn role_order_does_not_matter() {
        let desired = user(None).spec.to_remote();
        let mut observed = desired.clone();
        observed.roles.insert(
            0,
            Role {
                role_name: "read".into(),
                database_name: "logs".into(),
                collection_name: None,
            },
        );
        assert!(!same_user(&desired, &observed));
        observed.roles.remove(0);
        observed.password = Some("ignored".into());
        assert!(same_user(&desired, &observed));
    }
}
