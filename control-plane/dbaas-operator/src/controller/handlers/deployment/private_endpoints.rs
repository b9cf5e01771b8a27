use dbaas_provider::{EndpointConnection, ProviderClient, ServerlessPrivateEndpoint, endpoint_status};
use tracing::{debug, info};

use crate::controller::dispatcher::RunContext;
use crate::controller::retry::provider_failure;
use crate::controller::state::private_endpoint::{
    PROVIDER_GCP, duplicate_status, sort, status_from, summarize,
};
use crate::controller::workflow::{WorkflowResult, aggregate, reason};
use crate::crd::deployment::{
    ServerlessPrivateEndpointSpec, ServerlessPrivateEndpointStatus, ServerlessSpec,
};

fn connection_of(spec: &ServerlessPrivateEndpointSpec) -> EndpointConnection {
    EndpointConnection {
        cloud_provider_endpoint_id: spec.cloud_provider_endpoint_id.clone(),
        private_endpoint_ip_address: spec.private_endpoint_ip_address.clone(),
    }
}

fn failure(err: &dbaas_provider::ProviderError, what: String, run: &RunContext) -> WorkflowResult {
    provider_failure(err, reason::SERVERLESS_PE_FAILED, &what, &run.backoff)
}

async fn delete(
    provider: &dyn ProviderClient,
    run: &RunContext,
    project_id: &str,
    instance: &str,
    observed: &ServerlessPrivateEndpoint,
) -> Option<WorkflowResult> {
    if observed.status == endpoint_status::DELETING {
        return None;
    }
    let id = observed.id.as_deref()?;
    match provider.delete_serverless_endpoint(project_id, instance, id).await {
        Ok(()) => {
            info!(endpoint = %observed.name, %id, "private endpoint deleted");
            None
        }
        Err(e) if e.is_not_found() => None,
        Err(e) => Some(failure(&e, format!("deleting private endpoint '{}'", observed.name), run)),
    }
}

/// Converges the serverless instance's private endpoints. `None` means the
/// feature is not in use and the condition should be dropped.
pub async fn sync(
    provider: &dyn ProviderClient,
    run: &RunContext,
    project_id: &str,
    spec: &ServerlessSpec,
    status: &mut Vec<ServerlessPrivateEndpointStatus>,
) -> Option<WorkflowResult> {
    let backing = spec.provider_settings.backing_provider_name.as_str();
    if backing.eq_ignore_ascii_case(PROVIDER_GCP) {
        if spec.private_endpoints.is_empty() {
            status.clear();
            return None;
        }
        return Some(WorkflowResult::terminate(
            reason::UNSUPPORTED_FEATURE,
            "serverless private endpoints are not supported on GCP",
        ));
    }

    let instance = spec.name.as_str();
    let observed = match provider.list_serverless_endpoints(project_id, instance).await {
        Ok(o) => o,
        Err(e) => return Some(failure(&e, "listing private endpoints".into(), run)),
    };
    if spec.private_endpoints.is_empty() && observed.is_empty() {
        status.clear();
        return None;
    }

    let sorted = sort(&spec.private_endpoints, &observed, backing);
    debug!(
        create = sorted.to_create.len(),
        connect = sorted.to_connect.len(),
        recreate = sorted.to_recreate.len(),
        delete = sorted.to_delete.len(),
        duplicates = sorted.duplicate_to_create.len(),
        "private endpoint plan"
    );

    let mut errors = Vec::new();
    let mut entries = Vec::new();

    for o in &sorted.to_delete {
        errors.extend(delete(provider, run, project_id, instance, o).await);
    }

    for (_, o) in &sorted.to_recreate {
        errors.extend(delete(provider, run, project_id, instance, o).await);
    }

    let creates = sorted
        .to_create
        .iter()
        .copied()
        .chain(sorted.to_recreate.iter().map(|(d, _)| *d));
    for d in creates {
        match provider
            .create_serverless_endpoint(project_id, instance, &d.name)
            .await
        {
            Ok(created) => {
                info!(endpoint = %d.name, "private endpoint reservation requested");
                entries.push(status_from(&created));
            }
            Err(e) => errors.push(failure(&e, format!("creating private endpoint '{}'", d.name), run)),
        }
    }

    for (d, o) in &sorted.to_connect {
        let Some(id) = o.id.as_deref() else {
            entries.push(status_from(o));
            continue;
        };
        match provider
            .connect_serverless_endpoint(project_id, instance, id, &connection_of(d))
            .await
        {
            Ok(connected) => {
                info!(endpoint = %d.name, %id, "private endpoint connected");
                entries.push(status_from(&connected));
            }
            Err(e) => {
                entries.push(status_from(o));
                errors.push(failure(&e, format!("connecting private endpoint '{}'", d.name), run));
            }
        }
    }

    entries.extend(sorted.status_only.iter().map(|(_, o)| status_from(o)));
    entries.extend(sorted.duplicate_to_create.iter().map(|d| duplicate_status(d)));
    // a copy on its way out is only reported while nothing else holds its name
    for o in &sorted.deleting {
        if !entries.iter().any(|e| e.name == o.name) {
            entries.push(status_from(o));
        }
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let summary = summarize(&entries, &run.polls);
    *status = entries;
    Some(aggregate(errors.into_iter().chain(std::iter::once(summary))))
}
