use dbaas_provider::{ProviderClient, SearchNodeSpec};
use tracing::info;

use crate::controller::dispatcher::RunContext;
use crate::controller::retry::{PollState, provider_failure};
use crate::controller::state::search_nodes::{Step, plan};
use crate::controller::workflow::{WorkflowResult, reason};
use crate::crd::deployment;

fn progress(run: &RunContext, reason: &str, message: String) -> WorkflowResult {
    WorkflowResult::in_progress(
        reason,
        message,
        run.polls.interval(PollState::SearchNodesPending),
    )
}

/// Converges the cluster's dedicated search nodes. `previous` is the reason
/// last recorded on the `SearchNodesReady` condition. Returns `None` when
/// nothing is declared or left so the condition can be dropped.
pub async fn sync(
    provider: &dyn ProviderClient,
    run: &RunContext,
    project_id: &str,
    cluster: &str,
    desired: &[deployment::SearchNodeSpec],
    previous: Option<&str>,
) -> Option<WorkflowResult> {
    let desired: Vec<SearchNodeSpec> = desired.iter().map(SearchNodeSpec::from).collect();
    let observed = match provider.get_search_nodes(project_id, cluster).await {
        Ok(o) => o,
        Err(e) => {
            return Some(provider_failure(
                &e,
                reason::SEARCH_NODES_NOT_UPSERTED,
                "reading search nodes",
                &run.backoff,
            ));
        }
    };

    let result = match plan(previous, &desired, observed.as_ref()) {
        Step::Unmanaged => return None,
        Step::Settled => WorkflowResult::ok(),
        Step::Wait { reason, state } => {
            progress(run, reason, format!("search nodes are {state}"))
        }
        Step::Lost => WorkflowResult::terminate(
            reason::SEARCH_NODES_NOT_UPSERTED,
            format!("search nodes of '{cluster}' were requested but are not present"),
        ),
        Step::Create => match provider.create_search_nodes(project_id, cluster, &desired).await {
            Ok(_) => {
                info!(%cluster, "search nodes requested");
                progress(
                    run,
                    reason::SEARCH_NODES_CREATING,
                    "search nodes are being created".into(),
                )
            }
            Err(e) => provider_failure(
                &e,
                reason::SEARCH_NODES_NOT_UPSERTED,
                "creating search nodes",
                &run.backoff,
            ),
        },
        Step::Update => match provider.update_search_nodes(project_id, cluster, &desired).await {
            Ok(_) => {
                info!(%cluster, "search nodes update requested");
                progress(
                    run,
                    reason::SEARCH_NODES_UPDATING,
                    "search nodes are being updated".into(),
                )
            }
            Err(e) => provider_failure(
                &e,
                reason::SEARCH_NODES_NOT_UPSERTED,
                "updating search nodes",
                &run.backoff,
            ),
        },
        Step::Delete => match provider.delete_search_nodes(project_id, cluster).await {
            Ok(()) => {
                info!(%cluster, "search nodes deletion requested");
                progress(
                    run,
                    reason::SEARCH_NODES_DELETING,
                    "search nodes are being deleted".into(),
                )
            }
            // already gone
            Err(e) if e.is_not_found() => return None,
            Err(e) => provider_failure(
                &e,
                reason::SEARCH_NODES_NOT_DELETED,
                "deleting search nodes",
                &run.backoff,
            ),
        },
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::retry::{Backoff, PollIntervals};
    use dbaas_provider::memory::MemoryProvider;
    use std::sync::Arc;
    use std::time::Duration;

    fn nodes(count: u8) -> Vec<deployment::SearchNodeSpec> {
        vec![deployment::SearchNodeSpec {
            instance_size: "S30_LOWCPU_NVME".into(),
            node_count: count,
        }]
    }

    fn run(p: &MemoryProvider) -> RunContext {
        RunContext::new(
            Some(Arc::new(p.clone())),
            PollIntervals::default(),
            Backoff::default(),
        )
    }

    #[tokio::test]
    async fn created_nodes_settle_once_idle() {
        let provider = MemoryProvider::new();
        let run = run(&provider);

        let r = sync(&provider, &run, "p1", "c0", &nodes(2), None).await.unwrap();
        assert!(r.is_in_progress());
        assert_eq!(r.reason(), reason::SEARCH_NODES_CREATING);
        assert_eq!(r.requeue_after(), Some(Duration::from_secs(30)));
        assert_eq!(provider.mutation_count("create_search_nodes").await, 1);

        let r = sync(&provider, &run, "p1", "c0", &nodes(2), Some(r.reason()))
            .await
            .unwrap();
        assert_eq!(r.reason(), reason::SEARCH_NODES_CREATING);
        assert_eq!(provider.mutation_count("create_search_nodes").await, 1);

        provider.set_search_nodes_state("p1", "c0", "IDLE").await;
        let r = sync(&provider, &run, "p1", "c0", &nodes(2), Some(r.reason()))
            .await
            .unwrap();
        assert!(r.is_ok());
    }

    #[tokio::test]
    async fn resize_waits_for_the_running_operation() {
        let provider = MemoryProvider::new();
        let run = run(&provider);
        sync(&provider, &run, "p1", "c0", &nodes(2), None).await;

        // still creating: the new count is not sent yet
        let r = sync(
            &provider,
            &run,
            "p1",
            "c0",
            &nodes(4),
            Some(reason::SEARCH_NODES_CREATING),
        )
        .await
        .unwrap();
        assert!(r.is_in_progress());
        assert_eq!(provider.mutation_count("update_search_nodes").await, 0);

        provider.set_search_nodes_state("p1", "c0", "IDLE").await;
        let r = sync(&provider, &run, "p1", "c0", &nodes(4), Some(r.reason()))
            .await
            .unwrap();
        assert_eq!(r.reason(), reason::SEARCH_NODES_UPDATING);
        assert_eq!(provider.mutation_count("update_search_nodes").await, 1);
        let remote = provider.search_nodes("p1", "c0").await.unwrap();
        assert_eq!(remote.specs[0].node_count, 4);
    }

    #[tokio::test]
    async fn withdrawn_nodes_are_deleted_then_forgotten() {
        let provider = MemoryProvider::new();
        let run = run(&provider);
        sync(&provider, &run, "p1", "c0", &nodes(2), None).await;
        provider.set_search_nodes_state("p1", "c0", "IDLE").await;

        let r = sync(&provider, &run, "p1", "c0", &[], None).await.unwrap();
        assert_eq!(r.reason(), reason::SEARCH_NODES_DELETING);
        assert_eq!(provider.mutation_count("delete_search_nodes").await, 1);

        let r = sync(&provider, &run, "p1", "c0", &[], Some(r.reason())).await;
        assert!(r.is_none());
    }

    #[tokio::test]
    async fn vanished_upsert_is_reported() {
        let provider = MemoryProvider::new();
        let run = run(&provider);

        let r = sync(
            &provider,
            &run,
            "p1",
            "c0",
            &nodes(2),
            Some(reason::SEARCH_NODES_UPDATING),
        )
        .await
        .unwrap();
        assert!(r.is_terminate());
        assert_eq!(r.reason(), reason::SEARCH_NODES_NOT_UPSERTED);

        // the next pass starts over from pending
        let r = sync(&provider, &run, "p1", "c0", &nodes(2), Some(r.reason()))
            .await
            .unwrap();
        assert_eq!(r.reason(), reason::SEARCH_NODES_CREATING);
    }

    #[tokio::test]
    async fn unavailable_provider_backs_off() {
        let provider = MemoryProvider::new();
        let run = run(&provider);
        provider.fail_next("create_search_nodes", 503).await;

        let r = sync(&provider, &run, "p1", "c0", &nodes(2), None).await.unwrap();
        assert!(r.is_transient());
        assert_eq!(provider.mutation_count("create_search_nodes").await, 0);
    }

    #[tokio::test]
    async fn nothing_declared_drops_the_condition() {
        let provider = MemoryProvider::new();
        let run = run(&provider);
        assert!(sync(&provider, &run, "p1", "c0", &[], None).await.is_none());
    }
}
