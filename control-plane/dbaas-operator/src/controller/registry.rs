use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::crd::ResourceKind;

use super::ReconcileError;
use super::workflow::WorkflowResult;

/// Identity of one declared resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(
        kind: ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// What one reconciliation produced and when the key should come back.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub result: WorkflowResult,
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    pub fn done() -> Self {
        Self {
            result: WorkflowResult::ok(),
            requeue_after: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.result.is_transient()
    }
}

/// Reconciles every resource of one kind.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
        attempt: u32,
    ) -> Result<ReconcileOutcome, ReconcileError>;
}

/// Kind → reconciler table, built once at startup.
#[derive(Default, Clone)]
pub struct Registry {
    handlers: HashMap<ResourceKind, Arc<dyn Reconciler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: ResourceKind,
        reconciler: Arc<dyn Reconciler>,
    ) -> &mut Self {
        self.handlers.insert(kind, reconciler);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&Arc<dyn Reconciler>> {
        self.handlers.get(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl Reconciler for Fixed {
        async fn reconcile(
            &self,
            _: &str,
            _: &str,
            _: u32,
        ) -> Result<ReconcileOutcome, ReconcileError> {
            Ok(ReconcileOutcome::done())
        }
    }

    #[tokio::test]
    async fn lookup_by_kind() {
        let mut reg = Registry::new();
        reg.register(ResourceKind::BackupSchedule, Arc::new(Fixed));
        assert!(reg.get(ResourceKind::Deployment).is_none());
        let r = reg.get(ResourceKind::BackupSchedule).unwrap();
        let out = r.reconcile("ns", "a", 0).await.unwrap();
        assert!(out.result.is_ok());
        assert_eq!(
            ObjectKey::new(ResourceKind::BackupSchedule, "ns", "a").to_string(),
            "BackupSchedule/ns/a"
        );
    }
}
