//! Remote lifecycle state machines.

pub mod deployment;
pub mod private_endpoint;
pub mod search_index;
pub mod search_nodes;


use super::workflow::WorkflowResult;

pub use deployment::{DeploymentState, DeploymentVariant, LifecycleStateMachine};

/// Where a remote resource stands for the purpose of acting on it.
#[derive(Debug, Clone, PartialEq)]
pub enum Lifecycle {
    /// Settled; the desired state may be applied.
    Quiescent,
    /// Busy on the provider side; poll only.
    Transitional(WorkflowResult),
    /// Being deleted or already deleted; treated as absent.
    Gone,
    /// A state this operator does not know how to handle.
    Unrecognized(WorkflowResult),
}
