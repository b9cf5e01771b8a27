pub mod backup_schedule;
pub mod common;
pub mod database_user;
pub mod deployment;

use std::fmt;

use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::{Serialize, de::DeserializeOwned};

pub use backup_schedule::{BackupSchedule, BackupScheduleSpec, BackupScheduleStatus};
pub use common::{
    Condition, ConditionStatus, ConditionType, ResourceRef, SecretRef,
};
pub use database_user::{DatabaseUser, DatabaseUserSpec, DatabaseUserStatus};
pub use deployment::{
    DatabaseDeployment, DatabaseDeploymentSpec, DatabaseDeploymentStatus,
};

pub const GROUP: &str = "dbaas.io";
pub const FINALIZER: &str = "dbaas.io/finalizer";

/// `skip` leaves the resource alone apart from releasing its finalizer.
pub const ANNOTATION_RECONCILIATION_POLICY: &str =
    "dbaas.io/reconciliation-policy";
/// `keep` or `delete`; anything else falls back to the operator default.
pub const ANNOTATION_RESOURCE_POLICY: &str = "dbaas.io/resource-policy";
/// Operator version that last wrote the resource.
pub const LABEL_RESOURCE_VERSION: &str = "dbaas.io/resource-version";

pub const LABEL_TYPE: &str = "dbaas.io/type";
pub const LABEL_PROJECT: &str = "dbaas.io/project-id";
pub const LABEL_DEPLOYMENT: &str = "dbaas.io/deployment";
pub const LABEL_USER: &str = "dbaas.io/database-user";
pub const TYPE_CONNECTION: &str = "connection";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Deployment,
    DatabaseUser,
    BackupSchedule,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => "DatabaseDeployment",
            ResourceKind::DatabaseUser => "DatabaseUser",
            ResourceKind::BackupSchedule => "BackupSchedule",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status block shared by every declared kind.
pub trait StatusObject:
    Clone
    + fmt::Debug
    + Default
    + PartialEq
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn conditions(&self) -> &[Condition];
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
    fn observed_generation(&self) -> Option<i64>;
    fn set_observed_generation(&mut self, generation: Option<i64>);
}

/// A namespaced custom resource this operator reconciles.
pub trait DeclaredResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    type Status: StatusObject;
    const KIND: ResourceKind;

    fn status(&self) -> Option<&Self::Status>;
    fn status_mut(&mut self) -> &mut Option<Self::Status>;
}

impl DeclaredResource for DatabaseDeployment {
    type Status = DatabaseDeploymentStatus;
    const KIND: ResourceKind = ResourceKind::Deployment;

    fn status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
    fn status_mut(&mut self) -> &mut Option<Self::Status> {
        &mut self.status
    }
}

impl DeclaredResource for DatabaseUser {
    type Status = DatabaseUserStatus;
    const KIND: ResourceKind = ResourceKind::DatabaseUser;

    fn status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
    fn status_mut(&mut self) -> &mut Option<Self::Status> {
        &mut self.status
    }
}

impl DeclaredResource for BackupSchedule {
    type Status = BackupScheduleStatus;
    const KIND: ResourceKind = ResourceKind::BackupSchedule;

    fn status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
    fn status_mut(&mut self) -> &mut Option<Self::Status> {
        &mut self.status
    }
}

macro_rules! impl_status_object {
    ($($ty:ty),+) => {
        $(impl StatusObject for $ty {
            fn conditions(&self) -> &[Condition] {
                &self.conditions
            }
            fn conditions_mut(&mut self) -> &mut Vec<Condition> {
                &mut self.conditions
            }
            fn observed_generation(&self) -> Option<i64> {
                self.observed_generation
            }
            fn set_observed_generation(&mut self, generation: Option<i64>) {
                self.observed_generation = generation;
            }
        })+
    };
}

impl_status_object!(
    DatabaseDeploymentStatus,
    DatabaseUserStatus,
    BackupScheduleStatus
);
