//! Reconcile engine: one kube-runtime [`Controller`] per kind hands each
//! triggered object to that kind's [`Dispatcher`](dispatcher::Dispatcher)
//! through the [`Registry`].

pub mod conditions;
pub mod dispatcher;
pub mod finalizer;
pub mod handlers;
pub mod registry;
pub mod retry;
pub mod state;
pub mod validate;
pub mod workflow;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dbaas_provider::{HttpProviderFactory, ProviderFactory};
use futures_util::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher;
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, error, info, warn};

use crate::config::OperatorConfig;
use crate::crd::{
    BackupSchedule, DatabaseDeployment, DatabaseUser, DeclaredResource, LABEL_TYPE, ResourceKind,
    SecretRef, TYPE_CONNECTION,
};
use crate::store::{
    CredentialResolver, KubeSecrets, KubeStore, ResourceStore, SecretAccess,
    SecretCredentialResolver, StoreError,
};

use dispatcher::{DispatchSettings, Dispatcher};
use handlers::deployment::remote_name;
use handlers::{BackupScheduleHandler, DatabaseUserHandler, DeploymentHandler, connection};
use registry::{ObjectKey, Registry};
use retry::Backoff;

#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    /// The object changed under us; retried right away.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store error: {0}")]
    Store(StoreError),
    #[error("reconcile did not finish within {0:?}")]
    Timeout(Duration),
}

impl From<StoreError> for ReconcileError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => ReconcileError::Conflict(msg),
            other => ReconcileError::Store(other),
        }
    }
}

/// Access to every kind the operator reads or writes.
#[derive(Clone)]
pub struct Stores {
    pub deployments: Arc<dyn ResourceStore<DatabaseDeployment>>,
    pub users: Arc<dyn ResourceStore<DatabaseUser>>,
    pub schedules: Arc<dyn ResourceStore<BackupSchedule>>,
    pub secrets: Arc<dyn SecretAccess>,
}

impl Stores {
    pub fn kube(client: Client) -> Self {
        Self {
            deployments: Arc::new(KubeStore::new(client.clone())),
            users: Arc::new(KubeStore::new(client.clone())),
            schedules: Arc::new(KubeStore::new(client.clone())),
            secrets: Arc::new(KubeSecrets::new(client)),
        }
    }
}

pub fn build_registry(
    stores: &Stores,
    credentials: Arc<dyn CredentialResolver>,
    providers: Arc<dyn ProviderFactory>,
    settings: DispatchSettings,
) -> Registry {
    let deployments = Dispatcher::new(
        DeploymentHandler::new(stores.secrets.clone(), stores.schedules.clone()),
        stores.deployments.clone(),
        credentials.clone(),
        providers.clone(),
        settings.clone(),
    );
    let users = Dispatcher::new(
        DatabaseUserHandler::new(stores.secrets.clone(), stores.deployments.clone()),
        stores.users.clone(),
        credentials.clone(),
        providers.clone(),
        settings.clone(),
    );
    let schedules = Dispatcher::new(
        BackupScheduleHandler::new(stores.deployments.clone()),
        stores.schedules.clone(),
        credentials,
        providers,
        settings,
    );

    let mut registry = Registry::new();
    registry
        .register(ResourceKind::Deployment, Arc::new(deployments))
        .register(ResourceKind::DatabaseUser, Arc::new(users))
        .register(ResourceKind::BackupSchedule, Arc::new(schedules));
    registry
}

/// Shared by every controller: the registry plus retry bookkeeping.
pub struct ControllerContext {
    pub registry: Arc<Registry>,
    pub reconcile_timeout: Duration,
    pub backoff: Backoff,
    /// Requeue delay for results that ask for none.
    pub resync_period: Duration,
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl ControllerContext {
    pub fn new(
        registry: Arc<Registry>,
        reconcile_timeout: Duration,
        backoff: Backoff,
        resync_period: Duration,
    ) -> Self {
        Self {
            registry,
            reconcile_timeout,
            backoff,
            resync_period,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Consecutive failed attempts for `key`.
    pub fn attempts(&self, key: &ObjectKey) -> u32 {
        let failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        failures.get(key).copied().unwrap_or(0)
    }

    fn record_failure(&self, key: &ObjectKey) -> u32 {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let n = failures.entry(key.clone()).or_insert(0);
        *n += 1;
        *n
    }

    fn forget(&self, key: &ObjectKey) {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        failures.remove(key);
    }
}

pub fn key_of<K: DeclaredResource>(obj: &K) -> ObjectKey {
    ObjectKey::new(
        K::KIND,
        obj.namespace().unwrap_or_else(|| "default".to_string()),
        obj.name_any(),
    )
}

/// Runs the kind's reconciler under the configured timeout and turns its
/// outcome into the controller's next action.
pub async fn reconcile<K: DeclaredResource>(
    obj: Arc<K>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileError> {
    let key = key_of(obj.as_ref());
    let Some(reconciler) = ctx.registry.get(K::KIND) else {
        error!(kind = %K::KIND, "no reconciler registered");
        return Ok(Action::await_change());
    };
    let attempt = ctx.attempts(&key);
    let run = reconciler.reconcile(&key.namespace, &key.name, attempt);
    let outcome = tokio::time::timeout(ctx.reconcile_timeout, run)
        .await
        .map_err(|_| ReconcileError::Timeout(ctx.reconcile_timeout))??;

    if outcome.is_transient() {
        ctx.record_failure(&key);
    } else {
        ctx.forget(&key);
    }
    Ok(Action::requeue(outcome.requeue_after.unwrap_or(ctx.resync_period)))
}

pub fn error_policy<K: DeclaredResource>(
    obj: Arc<K>,
    err: &ReconcileError,
    ctx: Arc<ControllerContext>,
) -> Action {
    let key = key_of(obj.as_ref());
    if let ReconcileError::Conflict(msg) = err {
        debug!(%key, %msg, "resource changed during reconcile, retrying");
        return Action::requeue(Duration::ZERO);
    }
    let attempt = ctx.record_failure(&key);
    let delay = ctx.backoff.jittered(attempt);
    warn!(%key, error = %err, attempt, ?delay, "reconcile failed");
    Action::requeue(delay)
}

/// A schedule change has to reach the deployments that push it.
fn schedule_deployments(schedule: BackupSchedule) -> Vec<ObjectRef<DatabaseDeployment>> {
    schedule
        .status
        .into_iter()
        .flat_map(|s| s.deployment_ids)
        .filter_map(|id| {
            let (ns, name) = id.split_once('/')?;
            Some(ObjectRef::new(name).within(ns))
        })
        .collect()
}

fn is_connection_secret(secret: &Secret) -> bool {
    secret
        .labels()
        .get(LABEL_TYPE)
        .is_some_and(|t| t == TYPE_CONNECTION)
}

fn carries(secret: &Secret, selector: &BTreeMap<String, String>) -> bool {
    let labels = secret.labels();
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

fn refers_to(
    reference: Option<&SecretRef>,
    owner_ns: &str,
    secret_ns: &str,
    secret_name: &str,
) -> bool {
    reference.is_some_and(|r| {
        r.name == secret_name && r.namespace.as_deref().unwrap_or(owner_ns) == secret_ns
    })
}

/// Deployments using the secret as API key, or whose connection secret it is.
fn secret_deployments(
    cache: &Store<DatabaseDeployment>,
    secret: &Secret,
) -> Vec<ObjectRef<DatabaseDeployment>> {
    let ns = secret.namespace().unwrap_or_default();
    let name = secret.name_any();
    let connection = is_connection_secret(secret);
    cache
        .state()
        .iter()
        .filter(|d| {
            let own_ns = d.namespace().unwrap_or_default();
            refers_to(d.spec.connection_secret.as_ref(), &own_ns, &ns, &name)
                || (connection
                    && own_ns == ns
                    && carries(
                        secret,
                        &connection::deployment_selector(&d.spec.project_id, &remote_name(d)),
                    ))
        })
        .map(|d| ObjectRef::from_obj(d.as_ref()))
        .collect()
}

/// Users whose password, API key or connection secret this is.
fn secret_users(cache: &Store<DatabaseUser>, secret: &Secret) -> Vec<ObjectRef<DatabaseUser>> {
    let ns = secret.namespace().unwrap_or_default();
    let name = secret.name_any();
    let connection = is_connection_secret(secret);
    cache
        .state()
        .iter()
        .filter(|u| {
            let own_ns = u.namespace().unwrap_or_default();
            refers_to(u.spec.password_secret_ref.as_ref(), &own_ns, &ns, &name)
                || refers_to(u.spec.connection_secret.as_ref(), &own_ns, &ns, &name)
                || (connection
                    && own_ns == ns
                    && carries(
                        secret,
                        &connection::user_selector(&u.spec.project_id, &u.spec.username),
                    ))
        })
        .map(|u| ObjectRef::from_obj(u.as_ref()))
        .collect()
}

fn api_for<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

pub async fn run_controller(client: Client, cfg: OperatorConfig) -> anyhow::Result<()> {
    let stores = Stores::kube(client.clone());
    let credentials: Arc<dyn CredentialResolver> = Arc::new(SecretCredentialResolver::new(
        stores.secrets.clone(),
        cfg.global_secret(),
    ));
    let providers: Arc<dyn ProviderFactory> = Arc::new(HttpProviderFactory::new(
        cfg.provider.base_url.clone(),
        Duration::from_secs(cfg.provider.request_timeout_secs),
    )?);
    let registry = Arc::new(build_registry(
        &stores,
        credentials,
        providers,
        cfg.dispatch_settings(),
    ));
    let ctx = Arc::new(ControllerContext::new(
        registry,
        cfg.reconcile_timeout(),
        cfg.backoff(),
        cfg.resync_period(),
    ));
    let ns = cfg.watch_namespace.as_deref();
    let concurrency = u16::try_from(cfg.worker_count()).unwrap_or(u16::MAX);
    let settings = controller::Config::default().concurrency(concurrency);

    let deployments = Controller::new(
        api_for::<DatabaseDeployment>(&client, ns),
        watcher::Config::default(),
    )
    .with_config(settings.clone());
    let cache = deployments.store();
    let deployments = deployments
        .watches(
            api_for::<BackupSchedule>(&client, ns),
            watcher::Config::default(),
            schedule_deployments,
        )
        .watches(
            api_for::<Secret>(&client, ns),
            watcher::Config::default(),
            move |s| secret_deployments(&cache, &s),
        )
        .shutdown_on_signal()
        .run(
            reconcile::<DatabaseDeployment>,
            error_policy::<DatabaseDeployment>,
            ctx.clone(),
        )
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => debug!(%obj, ?action, "reconciled"),
                Err(e) => error!(error = %e, "deployment controller error"),
            }
        });

    let users = Controller::new(api_for::<DatabaseUser>(&client, ns), watcher::Config::default())
        .with_config(settings.clone());
    let cache = users.store();
    let users = users
        .watches(
            api_for::<Secret>(&client, ns),
            watcher::Config::default(),
            move |s| secret_users(&cache, &s),
        )
        .shutdown_on_signal()
        .run(reconcile::<DatabaseUser>, error_policy::<DatabaseUser>, ctx.clone())
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => debug!(%obj, ?action, "reconciled"),
                Err(e) => error!(error = %e, "user controller error"),
            }
        });

    let schedules = Controller::new(
        api_for::<BackupSchedule>(&client, ns),
        watcher::Config::default(),
    )
    .with_config(settings)
    .shutdown_on_signal()
    .run(reconcile::<BackupSchedule>, error_policy::<BackupSchedule>, ctx)
    .for_each(|res| async move {
        match res {
            Ok((obj, action)) => debug!(%obj, ?action, "reconciled"),
            Err(e) => error!(error = %e, "backup schedule controller error"),
        }
    });

    info!(concurrency, namespace = ?cfg.watch_namespace, "controllers started");
    futures_util::join!(deployments, users, schedules);
    info!("controllers stopped");
    Ok(())
}
