use dbaas_provider as provider;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::Condition;

/// Backup schedule shared by any number of deployments. It is kept alive by
/// the finalizer for as long as a deployment references it.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "dbaas.io",
    version = "v1",
    kind = "BackupSchedule",
    plural = "backupschedules",
    namespaced,
    status = "BackupScheduleStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BackupScheduleSpec {
    #[serde(default)]
    pub reference_hour_of_day: i32,
    #[serde(default)]
    pub reference_minute_of_hour: i32,
    #[serde(default = "default_restore_window")]
    pub restore_window_days: i32,
    #[serde(default)]
    pub auto_export_enabled: bool,
    #[serde(default)]
    pub policy_items: Vec<BackupPolicyItemSpec>,
}

fn default_restore_window() -> i32 {
    1
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupPolicyItemSpec {
    /// hourly, daily, weekly or monthly
    pub frequency_type: String,
    pub frequency_interval: i32,
    pub retention_unit: String,
    pub retention_value: i32,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupScheduleStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// `namespace/name` of every deployment bound to this schedule.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deployment_ids: Vec<String>,
}

impl BackupScheduleSpec {
    pub fn to_remote(&self) -> provider::BackupSchedule {
        provider::BackupSchedule {
            reference_hour_of_day: self.reference_hour_of_day,
            reference_minute_of_hour: self.reference_minute_of_hour,
            restore_window_days: self.restore_window_days,
            auto_export_enabled: self.auto_export_enabled,
            policy_items: self
                .policy_items
                .iter()
                .map(|p| provider::BackupPolicyItem {
                    frequency_type: p.frequency_type.clone(),
                    frequency_interval: p.frequency_interval,
                    retention_unit: p.retention_unit.clone(),
                    retention_value: p.retention_value,
                })
                .collect(),
        }
    }
}
