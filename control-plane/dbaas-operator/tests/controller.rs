//! Controller glue: how reconcile outcomes and errors become requeues.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use dbaas_operator::controller::dispatcher::DispatchSettings;
use dbaas_operator::controller::registry::{ReconcileOutcome, Reconciler, Registry};
use dbaas_operator::controller::retry::Backoff;
use dbaas_operator::controller::{
    ControllerContext, ReconcileError, error_policy, key_of, reconcile,
};
use dbaas_operator::crd::{BackupSchedule, BackupScheduleSpec, ResourceKind};
use dbaas_operator::store::StoreError;
use kube::runtime::controller::Action;

const RESYNC: Duration = Duration::from_secs(900);

// below 10ms the backoff carries no jitter
fn backoff() -> Backoff {
    Backoff::new(Duration::from_millis(1), Duration::from_millis(8))
}

fn context(registry: Arc<Registry>) -> Arc<ControllerContext> {
    Arc::new(ControllerContext::new(
        registry,
        Duration::from_secs(5),
        backoff(),
        RESYNC,
    ))
}

#[test_log::test(tokio::test)]
async fn settled_resource_waits_for_resync() {
    let h = Harness::new().await;
    seed_cluster(&h.provider, "orders-c0", "IDLE").await;
    h.deployments.put(provisioned("orders", "orders-c0")).await;
    let ctx = context(h.registry.clone());

    let obj = Arc::new(h.deployment("orders").await.unwrap());
    let action = reconcile(obj, ctx).await.unwrap();
    assert_eq!(action, Action::requeue(RESYNC));
}

#[test_log::test(tokio::test)]
async fn in_progress_resource_is_polled() {
    let h = Harness::new().await;
    h.deployments.put(provisioned("orders", "orders-c0")).await;
    let ctx = context(h.registry.clone());

    let obj = Arc::new(h.deployment("orders").await.unwrap());
    let action = reconcile(obj, ctx).await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(30)));
    assert_eq!(h.provider.mutation_count("create_deployment").await, 1);
}

#[test_log::test(tokio::test)]
async fn transient_failures_count_up_then_reset() {
    let h = Harness::with_settings(DispatchSettings {
        backoff: backoff(),
        ..Default::default()
    })
    .await;
    h.deployments.put(provisioned("orders", "orders-c0")).await;
    let ctx = context(h.registry.clone());
    let obj = Arc::new(h.deployment("orders").await.unwrap());
    let key = key_of(obj.as_ref());

    h.provider.fail_next("get_deployment", 503).await;
    let action = reconcile(obj.clone(), ctx.clone()).await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_millis(1)));
    assert_eq!(ctx.attempts(&key), 1);
    assert_eq!(h.provider.mutation_count("create_deployment").await, 0);

    reconcile(obj, ctx.clone()).await.unwrap();
    assert_eq!(ctx.attempts(&key), 0);
    assert_eq!(h.provider.mutation_count("create_deployment").await, 1);
}

fn schedule() -> Arc<BackupSchedule> {
    let mut s = BackupSchedule::new(
        "daily",
        BackupScheduleSpec {
            reference_hour_of_day: 0,
            reference_minute_of_hour: 0,
            restore_window_days: 1,
            auto_export_enabled: false,
            policy_items: vec![],
        },
    );
    s.metadata.namespace = Some(NS.into());
    Arc::new(s)
}

#[test]
fn errors_back_off_but_conflicts_retry_at_once() {
    let ctx = context(Arc::new(Registry::new()));
    let obj = schedule();
    let key = key_of(obj.as_ref());

    let conflict = ReconcileError::Conflict("stale resourceVersion".into());
    assert_eq!(
        error_policy(obj.clone(), &conflict, ctx.clone()),
        Action::requeue(Duration::ZERO)
    );
    assert_eq!(ctx.attempts(&key), 0);

    let down = ReconcileError::Store(StoreError::Backend("apiserver unavailable".into()));
    assert_eq!(
        error_policy(obj.clone(), &down, ctx.clone()),
        Action::requeue(Duration::from_millis(2))
    );
    assert_eq!(
        error_policy(obj, &down, ctx.clone()),
        Action::requeue(Duration::from_millis(4))
    );
    assert_eq!(ctx.attempts(&key), 2);
}

struct Slow;

#[async_trait]
impl Reconciler for Slow {
    async fn reconcile(
        &self,
        _: &str,
        _: &str,
        _: u32,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ReconcileOutcome::done())
    }
}

#[tokio::test(start_paused = true)]
async fn stuck_reconcile_times_out() {
    let mut registry = Registry::new();
    registry.register(ResourceKind::BackupSchedule, Arc::new(Slow));
    let ctx = context(Arc::new(registry));

    let err = reconcile(schedule(), ctx).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Timeout(d) if d == Duration::from_secs(5)));
}
