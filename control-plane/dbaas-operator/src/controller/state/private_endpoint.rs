//! Serverless private endpoint sorting.
//!
//! An endpoint is first reserved on the provider side (`RESERVATION_REQUESTED`
//! then `RESERVED`) and only becomes usable after it is connected with the
//! id (and on Azure the IP) of the endpoint the user created in their cloud
//! account. Desired endpoints therefore split in two groups: those that
//! already carry connection data and those that do not, and each group is
//! diffed against the remote endpoints at a matching stage.

use std::collections::BTreeSet;

use dbaas_provider::{ServerlessPrivateEndpoint, endpoint_status};

use crate::crd::deployment::{ServerlessPrivateEndpointSpec, ServerlessPrivateEndpointStatus};
use crate::controller::retry::{PollIntervals, PollState};
use crate::controller::workflow::{WorkflowResult, reason};
use crate::sync::{diff, diff_preferring};

pub const PROVIDER_AWS: &str = "AWS";
pub const PROVIDER_AZURE: &str = "AZURE";
pub const PROVIDER_GCP: &str = "GCP";

/// Status reported for a desired endpoint that could not be claimed.
pub const STATUS_DUPLICATE: &str = "DUPLICATE";

/// Whether the spec entry carries everything needed to connect it.
pub fn has_connection_data(spec: &ServerlessPrivateEndpointSpec, backing_provider: &str) -> bool {
    let id = spec
        .cloud_provider_endpoint_id
        .as_deref()
        .is_some_and(|s| !s.is_empty());
    if backing_provider.eq_ignore_ascii_case(PROVIDER_AZURE) {
        id && spec
            .private_endpoint_ip_address
            .as_deref()
            .is_some_and(|s| !s.is_empty())
    } else {
        id
    }
}

fn same_connection(spec: &ServerlessPrivateEndpointSpec, observed: &ServerlessPrivateEndpoint) -> bool {
    spec.cloud_provider_endpoint_id == observed.cloud_provider_endpoint_id
        && (spec.private_endpoint_ip_address.is_none()
            || spec.private_endpoint_ip_address == observed.private_endpoint_ip_address)
}

fn is_connected(observed: &ServerlessPrivateEndpoint) -> bool {
    observed.cloud_provider_endpoint_id.is_some()
}

fn awaiting_reservation(observed: &ServerlessPrivateEndpoint) -> bool {
    observed.status == endpoint_status::RESERVATION_REQUESTED
        || observed.status == endpoint_status::RESERVED
}

/// What to do with every desired and observed endpoint.
#[derive(Debug, Default)]
pub struct SortedEndpoints<'a> {
    pub to_create: Vec<&'a ServerlessPrivateEndpointSpec>,
    /// Reserved remotely and now connectable.
    pub to_connect: Vec<(&'a ServerlessPrivateEndpointSpec, &'a ServerlessPrivateEndpoint)>,
    /// Connected with different data; must be deleted and created again.
    pub to_recreate: Vec<(&'a ServerlessPrivateEndpointSpec, &'a ServerlessPrivateEndpoint)>,
    pub to_delete: Vec<&'a ServerlessPrivateEndpoint>,
    pub status_only: Vec<(&'a ServerlessPrivateEndpointSpec, &'a ServerlessPrivateEndpoint)>,
    /// Names already claimed by an earlier desired entry; never created.
    pub duplicate_to_create: Vec<&'a ServerlessPrivateEndpointSpec>,
    /// Already being removed remotely. They never claim a name, so a copy
    /// created to replace one is matched instead.
    pub deleting: Vec<&'a ServerlessPrivateEndpoint>,
}

pub fn sort<'a>(
    desired: &'a [ServerlessPrivateEndpointSpec],
    observed: &'a [ServerlessPrivateEndpoint],
    backing_provider: &str,
) -> SortedEndpoints<'a> {
    let (with_data, without_data): (Vec<&'a ServerlessPrivateEndpointSpec>, Vec<_>) = desired
        .iter()
        .partition(|d| has_connection_data(d, backing_provider));
    let with_names: BTreeSet<&str> = with_data.iter().map(|d| d.name.as_str()).collect();

    let (deleting, live): (Vec<&'a ServerlessPrivateEndpoint>, Vec<_>) = observed
        .iter()
        .partition(|o| o.status == endpoint_status::DELETING);

    // RESERVED entries join the ready set only when their desired
    // counterpart can already be connected.
    let (ready, create_track): (Vec<&'a ServerlessPrivateEndpoint>, Vec<_>) = live
        .into_iter()
        .partition(|o| with_names.contains(o.name.as_str()) || !awaiting_reservation(o));

    let mut out = SortedEndpoints {
        deleting,
        ..Default::default()
    };

    // pass 2: endpoints that can be connected
    let plan = diff_preferring(
        &with_data,
        &ready,
        |d| d.name.clone(),
        |o| o.name.clone(),
        |d, o| same_connection(d, o),
        |candidate, current| is_connected(candidate) && !is_connected(current),
    );
    out.to_create.extend(plan.to_create.iter().map(|d| **d));
    for (d, o) in plan.to_update.values() {
        let pair = (**d, **o);
        match o.status.as_str() {
            endpoint_status::RESERVED => out.to_connect.push(pair),
            endpoint_status::RESERVATION_REQUESTED => out.status_only.push(pair),
            _ => out.to_recreate.push(pair),
        }
    }
    for (name, o) in &plan.to_reconcile_status_only {
        if let Some(d) = with_data.iter().find(|d| &d.name == name) {
            out.status_only.push((*d, **o));
        }
    }
    out.to_delete.extend(plan.to_delete.values().map(|o| **o));
    out.to_delete.extend(plan.shadowed.iter().map(|o| **o));
    out.duplicate_to_create
        .extend(plan.duplicates.iter().map(|d| **d));

    // pass 1: endpoints still waiting for connection data
    let (claimed, unclaimed): (Vec<&'a ServerlessPrivateEndpointSpec>, Vec<_>) = without_data
        .into_iter()
        .partition(|d| with_names.contains(d.name.as_str()));
    out.duplicate_to_create.extend(claimed);
    let plan = diff(
        &unclaimed,
        &create_track,
        |d| d.name.clone(),
        |o| o.name.clone(),
        |_, _| true,
    );
    out.to_create.extend(plan.to_create.iter().map(|d| **d));
    for (name, o) in &plan.to_reconcile_status_only {
        if let Some(d) = unclaimed.iter().find(|d| &d.name == name) {
            out.status_only.push((*d, **o));
        }
    }
    out.to_delete.extend(plan.to_delete.values().map(|o| **o));
    out.to_delete.extend(plan.shadowed.iter().map(|o| **o));
    out.duplicate_to_create
        .extend(plan.duplicates.iter().map(|d| **d));

    out
}

pub fn status_from(observed: &ServerlessPrivateEndpoint) -> ServerlessPrivateEndpointStatus {
    ServerlessPrivateEndpointStatus {
        name: observed.name.clone(),
        id: observed.id.clone(),
        status: observed.status.clone(),
        cloud_provider_endpoint_id: observed.cloud_provider_endpoint_id.clone(),
        private_endpoint_ip_address: observed.private_endpoint_ip_address.clone(),
        endpoint_service_name: observed.endpoint_service_name.clone(),
        error_message: observed.error_message.clone(),
    }
}

pub fn duplicate_status(spec: &ServerlessPrivateEndpointSpec) -> ServerlessPrivateEndpointStatus {
    ServerlessPrivateEndpointStatus {
        name: spec.name.clone(),
        status: STATUS_DUPLICATE.to_string(),
        error_message: Some(format!(
            "private endpoint name '{}' is declared more than once",
            spec.name
        )),
        ..Default::default()
    }
}

/// Any failed or duplicate entry terminates; anything not yet available is
/// still in progress.
pub fn summarize(
    entries: &[ServerlessPrivateEndpointStatus],
    polls: &PollIntervals,
) -> WorkflowResult {
    if let Some(bad) = entries.iter().find(|e| {
        e.status == endpoint_status::FAILED || e.status == STATUS_DUPLICATE
    }) {
        return WorkflowResult::terminate(
            reason::SERVERLESS_PE_FAILED,
            format!(
                "private endpoint '{}' failed: {}",
                bad.name,
                bad.error_message.as_deref().unwrap_or("no details")
            ),
        );
    }
    if let Some(pending) = entries
        .iter()
        .find(|e| e.status != endpoint_status::AVAILABLE)
    {
        let msg = if pending.status == endpoint_status::RESERVED
            && pending.cloud_provider_endpoint_id.is_none()
        {
            format!(
                "private endpoint '{}' is reserved and awaiting connection data",
                pending.name
            )
        } else {
            format!("private endpoint '{}' is {}", pending.name, pending.status)
        };
        return WorkflowResult::in_progress(
            reason::SERVERLESS_PE_IN_PROGRESS,
            msg,
            polls.interval(PollState::PrivateEndpointPending),
        );
    }
    WorkflowResult::ok()
}
