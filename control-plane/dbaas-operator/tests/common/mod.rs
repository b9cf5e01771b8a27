#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use dbaas_operator::controller::dispatcher::DispatchSettings;
use dbaas_operator::controller::registry::{ReconcileOutcome, Registry};
use dbaas_operator::controller::{Stores, build_registry};
use dbaas_operator::crd::deployment::{ProvisionedSpec, ServerlessProviderSpec, ServerlessSpec};
use dbaas_operator::crd::database_user::RoleSpec;
use dbaas_operator::crd::{
    BackupSchedule, Condition, ConditionType, DatabaseDeployment, DatabaseDeploymentSpec,
    DatabaseUser, DatabaseUserSpec, DeclaredResource, ResourceKind, SecretRef, StatusObject,
};
use dbaas_operator::store::{
    KEY_ORG_ID, KEY_PRIVATE_KEY, KEY_PUBLIC_KEY, MemorySecrets, MemoryStore,
    SecretCredentialResolver,
};
use dbaas_provider::memory::MemoryProvider;
use dbaas_provider::{ConnectionStrings, Deployment, DeploymentKind};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;

pub const NS: &str = "team";
pub const PROJECT: &str = "p1";
pub const API_KEY_SECRET: &str = "dbaas-operator-api-key";
pub const OPERATOR_NS: &str = "dbaas-system";

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] = ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

/// Operator wired against in-memory stores and provider.
pub struct Harness {
    pub provider: MemoryProvider,
    pub deployments: MemoryStore<DatabaseDeployment>,
    pub users: MemoryStore<DatabaseUser>,
    pub schedules: MemoryStore<BackupSchedule>,
    pub secrets: MemorySecrets,
    pub registry: Arc<Registry>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(DispatchSettings::default()).await
    }

    pub async fn with_settings(settings: DispatchSettings) -> Self {
        let provider = MemoryProvider::new();
        let deployments = MemoryStore::new();
        let users = MemoryStore::new();
        let schedules = MemoryStore::new();
        let secrets = MemorySecrets::new();
        secrets
            .insert(secret(
                OPERATOR_NS,
                API_KEY_SECRET,
                &[
                    (KEY_ORG_ID, "org"),
                    (KEY_PUBLIC_KEY, "public"),
                    (KEY_PRIVATE_KEY, "private"),
                ],
            ))
            .await;

        let stores = Stores {
            deployments: Arc::new(deployments.clone()),
            users: Arc::new(users.clone()),
            schedules: Arc::new(schedules.clone()),
            secrets: Arc::new(secrets.clone()),
        };
        let credentials = Arc::new(SecretCredentialResolver::new(
            stores.secrets.clone(),
            SecretRef {
                name: API_KEY_SECRET.into(),
                namespace: Some(OPERATOR_NS.into()),
            },
        ));
        let registry = build_registry(
            &stores,
            credentials,
            Arc::new(provider.clone()),
            settings,
        );
        Self {
            provider,
            deployments,
            users,
            schedules,
            secrets,
            registry: Arc::new(registry),
        }
    }

    pub async fn reconcile(&self, kind: ResourceKind, name: &str) -> ReconcileOutcome {
        self.registry
            .get(kind)
            .expect("reconciler registered")
            .reconcile(NS, name, 0)
            .await
            .expect("reconcile")
    }

    pub async fn deployment(&self, name: &str) -> Option<DatabaseDeployment> {
        self.deployments.object(NS, name).await
    }

    pub async fn user(&self, name: &str) -> Option<DatabaseUser> {
        self.users.object(NS, name).await
    }
}

pub fn secret(ns: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(ns.into()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect::<BTreeMap<_, _>>(),
        ),
        ..Default::default()
    }
}

pub fn provisioned(name: &str, cluster: &str) -> DatabaseDeployment {
    let mut d = DatabaseDeployment::new(
        name,
        DatabaseDeploymentSpec {
            project_id: PROJECT.into(),
            connection_secret: None,
            backup_schedule_ref: None,
            deployment_spec: Some(ProvisionedSpec {
                name: cluster.into(),
                cluster_type: "REPLICASET".into(),
                ..Default::default()
            }),
            serverless_spec: None,
        },
    );
    d.metadata.namespace = Some(NS.into());
    d
}

pub fn serverless(name: &str, instance: &str, backing: &str) -> DatabaseDeployment {
    let mut d = DatabaseDeployment::new(
        name,
        DatabaseDeploymentSpec {
            project_id: PROJECT.into(),
            connection_secret: None,
            backup_schedule_ref: None,
            deployment_spec: None,
            serverless_spec: Some(ServerlessSpec {
                name: instance.into(),
                provider_settings: ServerlessProviderSpec {
                    backing_provider_name: backing.into(),
                    region_name: "US_EAST_1".into(),
                },
                ..Default::default()
            }),
        },
    );
    d.metadata.namespace = Some(NS.into());
    d
}

/// Remote cluster matching [`provisioned`] in the given state.
pub fn remote_cluster(cluster: &str, state: &str) -> Deployment {
    Deployment {
        name: cluster.into(),
        state_name: state.into(),
        cluster_type: Some("REPLICASET".into()),
        mongo_db_version: Some("7.0.12".into()),
        connection_strings: Some(ConnectionStrings {
            standard: Some(format!("mongodb://{cluster}.example.net:27017")),
            standard_srv: Some(format!("mongodb+srv://{cluster}.example.net")),
        }),
        ..Default::default()
    }
}

pub async fn seed_cluster(provider: &MemoryProvider, cluster: &str, state: &str) {
    provider
        .put_deployment(PROJECT, DeploymentKind::Provisioned, remote_cluster(cluster, state))
        .await;
}

pub fn database_user(name: &str, username: &str, password_secret: &str) -> DatabaseUser {
    let mut u = DatabaseUser::new(
        name,
        DatabaseUserSpec {
            project_id: PROJECT.into(),
            connection_secret: None,
            username: username.into(),
            database_name: "admin".into(),
            roles: vec![RoleSpec {
                role_name: "readWrite".into(),
                database_name: "app".into(),
                collection_name: None,
            }],
            scopes: vec![],
            password_secret_ref: Some(SecretRef {
                name: password_secret.into(),
                namespace: None,
            }),
            delete_after_date: None,
        },
    );
    u.metadata.namespace = Some(NS.into());
    u
}

pub fn condition<K: DeclaredResource>(obj: &K, type_: ConditionType) -> Option<Condition> {
    obj.status()?
        .conditions()
        .iter()
        .find(|c| c.type_ == type_)
        .cloned()
}
