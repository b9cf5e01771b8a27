use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use tokio::sync::RwLock;

use crate::crd::DeclaredResource;

use super::{ResourceStore, StoreError};

struct Inner<K> {
    objects: BTreeMap<(String, String), K>,
    version: u64,
    status_writes: usize,
}

impl<K: DeclaredResource> Inner<K> {
    fn bump(&mut self, obj: &mut K) {
        self.version += 1;
        obj.meta_mut().resource_version = Some(self.version.to_string());
    }

    /// Fetches the stored copy, failing when the caller's copy is stale.
    fn checked(&mut self, obj: &K) -> Result<&mut K, StoreError> {
        let key = key_of(obj);
        let stored = self
            .objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", key.0, key.1)))?;
        if stored.resource_version() != obj.resource_version() {
            return Err(StoreError::Conflict(format!(
                "{}/{}: resourceVersion {:?} is stale",
                key.0,
                key.1,
                obj.resource_version()
            )));
        }
        Ok(stored)
    }
}

fn key_of<K: DeclaredResource>(obj: &K) -> (String, String) {
    (
        obj.namespace().unwrap_or_else(|| "default".to_string()),
        obj.name_any(),
    )
}

/// In-memory [`ResourceStore`] with API-server-like versioning: every write
/// bumps `resourceVersion`, and an object marked for deletion disappears
/// once its last finalizer is removed.
pub struct MemoryStore<K> {
    inner: Arc<RwLock<Inner<K>>>,
}

impl<K> Clone for MemoryStore<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: DeclaredResource> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: DeclaredResource> MemoryStore<K> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                objects: BTreeMap::new(),
                version: 0,
                status_writes: 0,
            })),
        }
    }

    /// Creates or replaces an object. A replaced object gets the next
    /// generation, like a spec edit.
    pub async fn put(&self, mut obj: K) -> K {
        let mut inner = self.inner.write().await;
        let key = key_of(&obj);
        if obj.meta().namespace.is_none() {
            obj.meta_mut().namespace = Some(key.0.clone());
        }
        let generation = match inner.objects.get(&key) {
            Some(prev) => prev.meta().generation.unwrap_or(1) + 1,
            None => obj.meta().generation.unwrap_or(1),
        };
        obj.meta_mut().generation = Some(generation);
        inner.bump(&mut obj);
        inner.objects.insert(key, obj.clone());
        obj
    }

    /// Applies `edit` to the stored object as a spec change.
    pub async fn edit(&self, namespace: &str, name: &str, edit: impl FnOnce(&mut K)) -> Option<K> {
        let mut current = self.object(namespace, name).await?;
        edit(&mut current);
        Some(self.put(current).await)
    }

    pub async fn object(&self, namespace: &str, name: &str) -> Option<K> {
        self.inner
            .read()
            .await
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Sets the deletion timestamp, or removes the object right away when
    /// no finalizer holds it.
    pub async fn mark_deleted(&self, namespace: &str, name: &str) {
        let mut inner = self.inner.write().await;
        let key = (namespace.to_string(), name.to_string());
        let Some(mut obj) = inner.objects.get(&key).cloned() else {
            return;
        };
        if obj.finalizers().is_empty() {
            inner.objects.remove(&key);
            return;
        }
        obj.meta_mut().deletion_timestamp = Some(Time(Utc::now()));
        inner.bump(&mut obj);
        inner.objects.insert(key, obj);
    }

    pub async fn status_writes(&self) -> usize {
        self.inner.read().await.status_writes
    }
}

#[async_trait]
impl<K: DeclaredResource> ResourceStore<K> for MemoryStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        Ok(self.object(namespace, name).await)
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .objects
            .iter()
            .filter(|((ns, _), _)| namespace.is_none_or(|want| want == ns))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn patch_status(&self, obj: &K, status: &K::Status) -> Result<K, StoreError> {
        let mut inner = self.inner.write().await;
        let mut next = inner.checked(obj)?.clone();
        *next.status_mut() = Some(status.clone());
        inner.bump(&mut next);
        inner.status_writes += 1;
        inner.objects.insert(key_of(&next), next.clone());
        Ok(next)
    }

    async fn add_finalizer(&self, obj: &K, finalizer: &str) -> Result<K, StoreError> {
        let mut inner = self.inner.write().await;
        let mut next = inner.checked(obj)?.clone();
        let finals = next.finalizers_mut();
        if !finals.iter().any(|f| f == finalizer) {
            finals.push(finalizer.to_string());
        }
        inner.bump(&mut next);
        inner.objects.insert(key_of(&next), next.clone());
        Ok(next)
    }

    async fn remove_finalizer(&self, obj: &K, finalizer: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let mut next = match inner.checked(obj) {
            Ok(stored) => stored.clone(),
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        next.finalizers_mut().retain(|f| f != finalizer);
        let key = key_of(&next);
        if next.meta().deletion_timestamp.is_some() && next.finalizers().is_empty() {
            inner.objects.remove(&key);
        } else {
            inner.bump(&mut next);
            inner.objects.insert(key, next);
        }
        Ok(())
    }
}
