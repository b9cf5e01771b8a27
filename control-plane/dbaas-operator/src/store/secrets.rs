use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tokio::sync::RwLock;

use super::StoreError;

const FIELD_MANAGER: &str = "dbaas-operator";

#[async_trait]
pub trait SecretAccess: Send + Sync {
    async fn read(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError>;

    /// Secrets in `namespace` carrying every given label.
    async fn list(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Secret>, StoreError>;

    /// Server-side apply of the full secret.
    async fn apply(&self, secret: &Secret) -> Result<Secret, StoreError>;

    /// Deleting a missing secret succeeds.
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

/// Value of `key`, from `data` or `stringData`.
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .and_then(|b| String::from_utf8(b.0.clone()).ok())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|d| d.get(key))
                .cloned()
        })
}

fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Clone)]
pub struct KubeSecrets {
    client: Client,
}

impl KubeSecrets {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl SecretAccess for KubeSecrets {
    async fn read(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn list(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Secret>, StoreError> {
        let lp = ListParams::default().labels(&label_selector(labels));
        Ok(self.api(namespace).list(&lp).await?.items)
    }

    async fn apply(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let ns = secret
            .namespace()
            .ok_or_else(|| StoreError::Backend("secret without namespace".into()))?;
        let name = secret.name_any();
        let pp = PatchParams::apply(FIELD_MANAGER).force();
        Ok(self.api(&ns).patch(&name, &pp, &Patch::Apply(secret)).await?)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => match StoreError::from(e) {
                StoreError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }
}

#[derive(Default)]
struct SecretState {
    secrets: BTreeMap<(String, String), Secret>,
    held: BTreeSet<(String, String)>,
    failing_lists: u32,
    version: u64,
}

/// In-memory [`SecretAccess`]. A held secret survives `delete`, the way a
/// secret with a foreign finalizer would.
#[derive(Clone, Default)]
pub struct MemorySecrets {
    state: Arc<RwLock<SecretState>>,
}

impl MemorySecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, secret: Secret) -> Secret {
        let mut st = self.state.write().await;
        Self::store(&mut st, secret)
    }

    pub async fn get(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state
            .read()
            .await
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub async fn names(&self, namespace: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .secrets
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub async fn hold(&self, namespace: &str, name: &str) {
        self.state
            .write()
            .await
            .held
            .insert((namespace.to_string(), name.to_string()));
    }

    pub async fn release(&self, namespace: &str, name: &str) {
        self.state
            .write()
            .await
            .held
            .remove(&(namespace.to_string(), name.to_string()));
    }

    /// The next `list` calls fail with a backend error.
    pub async fn fail_next_lists(&self, count: u32) {
        self.state.write().await.failing_lists = count;
    }

    fn store(st: &mut SecretState, mut secret: Secret) -> Secret {
        st.version += 1;
        secret.metadata.resource_version = Some(st.version.to_string());
        let key = (
            secret.namespace().unwrap_or_else(|| "default".to_string()),
            secret.name_any(),
        );
        st.secrets.insert(key, secret.clone());
        secret
    }
}

#[async_trait]
impl SecretAccess for MemorySecrets {
    async fn read(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.get(namespace, name).await)
    }

    async fn list(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Secret>, StoreError> {
        let mut st = self.state.write().await;
        if st.failing_lists > 0 {
            st.failing_lists -= 1;
            return Err(StoreError::Backend("secret list unavailable".into()));
        }
        Ok(st
            .secrets
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter(|(_, s)| {
                let have = s.labels();
                labels.iter().all(|(k, v)| have.get(k) == Some(v))
            })
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn apply(&self, secret: &Secret) -> Result<Secret, StoreError> {
        if secret.namespace().is_none() {
            return Err(StoreError::Backend("secret without namespace".into()));
        }
        let mut st = self.state.write().await;
        let key = (secret.namespace().unwrap_or_default(), secret.name_any());
        // Unchanged content keeps its version, like a no-op apply.
        if let Some(existing) = st.secrets.get(&key) {
            if existing.data == secret.data
                && existing.string_data == secret.string_data
                && existing.metadata.labels == secret.metadata.labels
            {
                return Ok(existing.clone());
            }
        }
        Ok(Self::store(&mut st, secret.clone()))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut st = self.state.write().await;
        let key = (namespace.to_string(), name.to_string());
        if !st.held.contains(&key) {
            st.secrets.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    fn secret(name: &str, labels: &[(&str, &str)]) -> Secret {
        let mut s = Secret::default();
        s.metadata.name = Some(name.into());
        s.metadata.namespace = Some("ns".into());
        s.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        s.data = Some(BTreeMap::from([(
            "password".to_string(),
            ByteString(b"hunter2".to_vec()),
        )]));
        s
    }

    #[tokio::test]
    async fn list_filters_by_every_label() {
        let secrets = MemorySecrets::new();
        secrets.insert(secret("a", &[("app", "x"), ("tier", "db")])).await;
        secrets.insert(secret("b", &[("app", "x")])).await;
        let want = BTreeMap::from([
            ("app".to_string(), "x".to_string()),
            ("tier".to_string(), "db".to_string()),
        ]);
        let found = secrets.list("ns", &want).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name_any(), "a");
        assert_eq!(secret_value(&found[0], "password").as_deref(), Some("hunter2"));
    }

    #[tokio::test]
    async fn held_secret_survives_delete() {
        let secrets = MemorySecrets::new();
        secrets.insert(secret("a", &[])).await;
        secrets.hold("ns", "a").await;
        secrets.delete("ns", "a").await.unwrap();
        assert!(secrets.get("ns", "a").await.is_some());
        secrets.release("ns", "a").await;
        secrets.delete("ns", "a").await.unwrap();
        assert!(secrets.get("ns", "a").await.is_none());
        secrets.delete("ns", "missing").await.unwrap();
    }

    #[tokio::test]
    async fn unchanged_apply_keeps_version() {
        let secrets = MemorySecrets::new();
        let first = secrets.apply(&secret("a", &[])).await.unwrap();
        let again = secrets.apply(&secret("a", &[])).await.unwrap();
        assert_eq!(first.metadata.resource_version, again.metadata.resource_version);
    }
}
