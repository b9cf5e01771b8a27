//! Dedicated search nodes move through three phases. The phase is not
//! stored anywhere on the provider; it is carried from one pass to the
//! next in the reason of the `SearchNodesReady` condition.

use dbaas_provider::{SearchDeployment, SearchNodeSpec};

use crate::controller::workflow::reason;

pub const IDLE: &str = "IDLE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing requested yet, or the last request settled or failed.
    Pending,
    /// A create or update was requested and has not settled.
    Upserting,
    Deleting,
}

impl Phase {
    pub fn from_reason(reason: Option<&str>) -> Self {
        match reason {
            Some(reason::SEARCH_NODES_CREATING) | Some(reason::SEARCH_NODES_UPDATING) => {
                Phase::Upserting
            }
            Some(reason::SEARCH_NODES_DELETING) => Phase::Deleting,
            _ => Phase::Pending,
        }
    }
}

/// What the handler should do on this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Create,
    Update,
    Delete,
    /// Provider is busy; keep the given reason and poll.
    Wait { reason: &'static str, state: String },
    /// An upsert was requested but the provider has no record of it.
    Lost,
    Settled,
    /// Nothing declared and nothing left remotely.
    Unmanaged,
}

fn is_idle(d: &SearchDeployment) -> bool {
    d.state_name.eq_ignore_ascii_case(IDLE)
}

fn waiting(phase: Phase, previous: Option<&str>, d: &SearchDeployment) -> Step {
    let reason = match (phase, previous) {
        (Phase::Deleting, _) => reason::SEARCH_NODES_DELETING,
        (_, Some(reason::SEARCH_NODES_CREATING)) => reason::SEARCH_NODES_CREATING,
        _ => reason::SEARCH_NODES_UPDATING,
    };
    Step::Wait {
        reason,
        state: d.state_name.clone(),
    }
}

/// Nodes are only changed while the provider reports them idle. A spec
/// edited mid-operation waits for the running operation and is applied
/// on the pass after it settles.
pub fn plan(
    previous: Option<&str>,
    desired: &[SearchNodeSpec],
    observed: Option<&SearchDeployment>,
) -> Step {
    let phase = Phase::from_reason(previous);
    match (phase, observed) {
        (Phase::Deleting, Some(d)) => waiting(phase, previous, d),
        (Phase::Upserting, None) if !desired.is_empty() => Step::Lost,
        (_, None) if desired.is_empty() => Step::Unmanaged,
        (_, None) => Step::Create,
        (_, Some(d)) if !is_idle(d) => waiting(phase, previous, d),
        (_, Some(_)) if desired.is_empty() => Step::Delete,
        (_, Some(d)) if d.specs != desired => Step::Update,
        (_, Some(_)) => Step::Settled,
    }
}
