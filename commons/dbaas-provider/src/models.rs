//! Wire representations of the provider's resources.
//!
//! Field names follow the provider's camelCase JSON. Optional attributes the
//! provider may omit are `Option` and skipped on serialization so that update
//! payloads only carry what the caller set.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// API key pair used to authenticate against the provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub org_id: String,
    pub public_key: String,
    pub private_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("org_id", &self.org_id)
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Which provider endpoint family serves a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeploymentKind {
    Provisioned,
    Serverless,
}

impl DeploymentKind {
    pub fn path_segment(&self) -> &'static str {
        match self {
            DeploymentKind::Provisioned => "clusters",
            DeploymentKind::Serverless => "serverless",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionConfig {
    pub provider_name: String,
    pub region_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerlessProviderSettings {
    pub backing_provider_name: String,
    #[serde(default = "serverless_provider_name")]
    pub provider_name: String,
    pub region_name: String,
}

fn serverless_provider_name() -> String {
    "SERVERLESS".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStrings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standard: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standard_srv: Option<String>,
}

/// A cluster or serverless instance as reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_type: Option<String>,
    #[serde(
        rename = "mongoDBMajorVersion",
        skip_serializing_if = "Option::is_none"
    )]
    pub mongo_db_major_version: Option<String>,
    #[serde(rename = "mongoDBVersion", skip_serializing_if = "Option::is_none")]
    pub mongo_db_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<RegionConfig>,
    #[serde(rename = "diskSizeGB", skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_settings: Option<ServerlessProviderSettings>,
    #[serde(default)]
    pub termination_protection_enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_strings: Option<ConnectionStrings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Synonym {
    pub name: String,
    pub analyzer: String,
    pub source_collection: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndex {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_id: Option<String>,
    pub name: String,
    pub database: String,
    pub collection_name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub index_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_analyzer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mappings: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<Synonym>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,
}

/// Dedicated search node tier for one instance size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchNodeSpec {
    pub instance_size: String,
    pub node_count: u8,
}

/// A cluster's dedicated search nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDeployment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state_name: String,
    #[serde(default)]
    pub specs: Vec<SearchNodeSpec>,
}

pub mod endpoint_status {
    pub const RESERVATION_REQUESTED: &str = "RESERVATION_REQUESTED";
    pub const RESERVED: &str = "RESERVED";
    pub const INITIATING: &str = "INITIATING";
    pub const AVAILABLE: &str = "AVAILABLE";
    pub const FAILED: &str = "FAILED";
    pub const DELETING: &str = "DELETING";
}

/// Serverless private endpoint. The user-facing name travels as the
/// provider's `comment` attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerlessPrivateEndpoint {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "comment", default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_provider_endpoint_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_endpoint_ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConnection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_provider_endpoint_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_endpoint_ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneMapping {
    pub location: String,
    pub zone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedNamespace {
    pub db: String,
    pub collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_shard_key: Option<String>,
    #[serde(default)]
    pub is_custom_shard_key_hashed: bool,
    #[serde(default)]
    pub is_shard_key_unique: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_initial_chunks: Option<i64>,
    #[serde(default)]
    pub presplit_hashed_zones: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalCluster {
    #[serde(default)]
    pub custom_zone_mapping: Vec<ZoneMapping>,
    #[serde(default)]
    pub managed_namespaces: Vec<ManagedNamespace>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub role_name: String,
    pub database_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserScope {
    pub name: String,
    #[serde(rename = "type")]
    pub scope_type: String,
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseUser {
    pub username: String,
    pub database_name: String,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<UserScope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_after_date: Option<String>,
}

impl fmt::Debug for DatabaseUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseUser")
            .field("username", &self.username)
            .field("database_name", &self.database_name)
            .field("roles", &self.roles)
            .field("scopes", &self.scopes)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("delete_after_date", &self.delete_after_date)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPolicyItem {
    pub frequency_type: String,
    pub frequency_interval: i32,
    pub retention_unit: String,
    pub retention_value: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSchedule {
    pub reference_hour_of_day: i32,
    pub reference_minute_of_hour: i32,
    pub restore_window_days: i32,
    #[serde(default)]
    pub auto_export_enabled: bool,
    #[serde(default)]
    pub policy_items: Vec<BackupPolicyItem>,
}
