//! Access to declared resources and Secrets.
//!
//! The reconcile core only talks to these traits; `kube` backs them in the
//! running operator and the in-memory variants back the tests.

mod credentials;
mod k8s;
mod memory;
mod secrets;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};

use crate::crd::DeclaredResource;

pub use credentials::{
    CredentialError, CredentialResolver, KEY_ORG_ID, KEY_PRIVATE_KEY,
    KEY_PUBLIC_KEY, SecretCredentialResolver,
};
pub use k8s::KubeStore;
pub use memory::MemoryStore;
pub use secrets::{KubeSecrets, MemorySecrets, SecretAccess, secret_value};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    /// The object changed since it was read; the caller should re-fetch.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(ae.message),
            kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(ae.message),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Verbs the reconciler may use on a declared kind. Writes carry the
/// object's `resourceVersion` so a concurrent edit surfaces as
/// [`StoreError::Conflict`].
#[async_trait]
pub trait ResourceStore<K: DeclaredResource>: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError>;

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>, StoreError>;

    async fn patch_status(&self, obj: &K, status: &K::Status) -> Result<K, StoreError>;

    async fn add_finalizer(&self, obj: &K, finalizer: &str) -> Result<K, StoreError>;

    async fn remove_finalizer(&self, obj: &K, finalizer: &str) -> Result<(), StoreError>;
}

pub fn has_finalizer<K: DeclaredResource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

pub fn is_deleting<K: DeclaredResource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}
