use dbaas_provider::{ProviderClient, SearchIndex};
use tracing::{debug, info};

use crate::controller::dispatcher::RunContext;
use crate::controller::retry::{PollState, provider_failure};
use crate::controller::state::search_index::{self, is_failed, is_steady, same_definition};
use crate::controller::workflow::{WorkflowResult, aggregate, reason};
use crate::crd::deployment::{SearchIndexSpec, SearchIndexStatus};
use crate::sync::diff;

const IN_PROGRESS: &str = "IN_PROGRESS";

fn status_of(index: &SearchIndex) -> SearchIndexStatus {
    SearchIndexStatus {
        name: index.name.clone(),
        id: index.index_id.clone(),
        status: index
            .status
            .clone()
            .unwrap_or_else(|| search_index::STEADY.to_string()),
        message: None,
    }
}

fn failed_status(name: &str, id: Option<String>, result: &WorkflowResult) -> SearchIndexStatus {
    SearchIndexStatus {
        name: name.to_string(),
        id,
        status: search_index::FAILED.to_string(),
        message: Some(result.message().to_string()),
    }
}

fn pending(run: &RunContext, name: &str, status: &str) -> WorkflowResult {
    WorkflowResult::in_progress(
        reason::SEARCH_INDEXES_NOT_READY,
        format!("search index '{name}' is {status}"),
        run.polls.interval(PollState::SearchIndexPending),
    )
}

/// Converges the cluster's search indexes. Returns `None` when none are
/// declared or present so the condition can be dropped.
pub async fn sync(
    provider: &dyn ProviderClient,
    run: &RunContext,
    project_id: &str,
    cluster: &str,
    desired: &[SearchIndexSpec],
    status: &mut Vec<SearchIndexStatus>,
) -> Option<WorkflowResult> {
    let observed = match provider.list_search_indexes(project_id, cluster).await {
        Ok(o) => o,
        Err(e) => {
            return Some(provider_failure(
                &e,
                reason::SEARCH_INDEX_FAILED,
                "listing search indexes",
                &run.backoff,
            ));
        }
    };
    if desired.is_empty() && observed.is_empty() {
        status.clear();
        return None;
    }

    let desired: Vec<SearchIndex> = desired.iter().map(SearchIndex::from).collect();
    let plan = diff(
        &desired,
        &observed,
        |d| d.name.clone(),
        |o| o.name.clone(),
        same_definition,
    );
    debug!(
        create = plan.to_create.len(),
        update = plan.to_update.len(),
        delete = plan.to_delete.len(),
        "search index plan"
    );

    let mut results = Vec::new();
    let mut entries = Vec::new();

    for d in &plan.to_create {
        match provider.create_search_index(project_id, cluster, d).await {
            Ok(created) => {
                info!(index = %d.name, "search index created");
                let mut st = status_of(&created);
                if created.status.is_none() {
                    st.status = IN_PROGRESS.to_string();
                }
                results.push(pending(run, &d.name, &st.status));
                entries.push(st);
            }
            Err(e) => {
                let r = provider_failure(
                    &e,
                    reason::SEARCH_INDEX_FAILED,
                    &format!("creating search index '{}'", d.name),
                    &run.backoff,
                );
                entries.push(failed_status(&d.name, None, &r));
                results.push(r);
            }
        }
    }

    for (name, (d, o)) in &plan.to_update {
        if !is_steady(o) {
            let st = status_of(o);
            results.push(pending(run, name, &st.status));
            entries.push(st);
            continue;
        }
        let Some(id) = o.index_id.as_deref() else {
            let r = WorkflowResult::terminate(
                reason::SEARCH_INDEX_FAILED,
                format!("search index '{name}' has no id"),
            );
            entries.push(failed_status(name, None, &r));
            results.push(r);
            continue;
        };
        match provider.update_search_index(project_id, cluster, id, d).await {
            Ok(updated) => {
                info!(index = %name, "search index updated");
                let mut st = status_of(&updated);
                st.id = st.id.or_else(|| Some(id.to_string()));
                if updated.status.as_deref().is_none_or(|s| s == search_index::STEADY) {
                    st.status = IN_PROGRESS.to_string();
                }
                results.push(pending(run, name, &st.status));
                entries.push(st);
            }
            Err(e) => {
                let r = provider_failure(
                    &e,
                    reason::SEARCH_INDEX_FAILED,
                    &format!("updating search index '{name}'"),
                    &run.backoff,
                );
                entries.push(failed_status(name, Some(id.to_string()), &r));
                results.push(r);
            }
        }
    }

    for (name, o) in &plan.to_delete {
        if !is_steady(o) && !is_failed(o) {
            results.push(pending(run, name, o.status.as_deref().unwrap_or(IN_PROGRESS)));
            continue;
        }
        let Some(id) = o.index_id.as_deref() else {
            continue;
        };
        match provider.delete_search_index(project_id, cluster, id).await {
            Ok(()) => info!(index = %name, "search index deleted"),
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                let r = provider_failure(
                    &e,
                    reason::SEARCH_INDEX_FAILED,
                    &format!("deleting search index '{name}'"),
                    &run.backoff,
                );
                results.push(r);
            }
        }
    }

    for (name, o) in &plan.to_reconcile_status_only {
        // a failed build of an unchanged definition is the provider's to
        // retry; keep polling it
        let st = status_of(o);
        if !is_steady(o) {
            results.push(pending(run, name, &st.status));
        }
        entries.push(st);
    }

    for d in &plan.duplicates {
        results.push(WorkflowResult::terminate(
            reason::SEARCH_INDEX_DUPLICATE,
            format!("search index '{}' is declared more than once", d.name),
        ));
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    *status = entries;
    Some(aggregate(results))
}
