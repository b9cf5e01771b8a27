use std::marker::PhantomData;

use async_trait::async_trait;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

use crate::crd::DeclaredResource;

use super::{ResourceStore, StoreError};

/// [`ResourceStore`] over the Kubernetes API server.
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for KubeStore<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: DeclaredResource> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn locate(obj: &K) -> (String, String) {
        (
            obj.namespace().unwrap_or_else(|| "default".to_string()),
            obj.name_any(),
        )
    }

    async fn patch_finalizers(
        &self,
        obj: &K,
        finalizers: Vec<String>,
    ) -> Result<K, StoreError> {
        let (ns, name) = Self::locate(obj);
        let patch = json!({
            "metadata": {
                "resourceVersion": obj.resource_version(),
                "finalizers": finalizers,
            }
        });
        Ok(self
            .api(&ns)
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }
}

#[async_trait]
impl<K: DeclaredResource> ResourceStore<K> for KubeStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>, StoreError> {
        let api: Api<K> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_status(&self, obj: &K, status: &K::Status) -> Result<K, StoreError> {
        let (ns, name) = Self::locate(obj);
        debug!(%ns, %name, kind = %K::KIND, "patching status");
        let patch = json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": status,
        });
        Ok(self
            .api(&ns)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn add_finalizer(&self, obj: &K, finalizer: &str) -> Result<K, StoreError> {
        let mut finals = obj.finalizers().to_vec();
        if !finals.iter().any(|f| f == finalizer) {
            finals.push(finalizer.to_string());
        }
        self.patch_finalizers(obj, finals).await
    }

    async fn remove_finalizer(&self, obj: &K, finalizer: &str) -> Result<(), StoreError> {
        let finals = obj
            .finalizers()
            .iter()
            .filter(|f| *f != finalizer)
            .cloned()
            .collect::<Vec<_>>();
        match self.patch_finalizers(obj, finals).await {
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
