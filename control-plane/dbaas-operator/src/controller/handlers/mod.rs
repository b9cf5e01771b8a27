//! Kind-specific [`ResourceHandler`](super::dispatcher::ResourceHandler)
//! implementations.

pub mod backup_schedule;
pub mod connection;
pub mod database_user;
pub mod deployment;

pub use backup_schedule::BackupScheduleHandler;
pub use database_user::DatabaseUserHandler;
pub use deployment::DeploymentHandler;

use dbaas_provider::ProviderClient;

use super::dispatcher::RunContext;
use super::workflow::{WorkflowResult, reason};

/// Provider client for kinds that always resolve credentials.
pub(crate) fn require_provider(run: &RunContext) -> Result<&dyn ProviderClient, WorkflowResult> {
    run.provider().ok_or_else(|| {
        WorkflowResult::terminate(
            reason::API_ACCESS_NOT_CONFIGURED,
            "no provider client available",
        )
    })
}

/// `namespace/name` identity used in cross-resource bindings.
pub(crate) fn binding_id(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}
