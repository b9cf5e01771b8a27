use dbaas_provider as provider;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::common::{Condition, ResourceRef, SecretRef};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "dbaas.io",
    version = "v1",
    kind = "DatabaseDeployment",
    plural = "databasedeployments",
    shortname = "dbd",
    namespaced,
    status = "DatabaseDeploymentStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseDeploymentSpec {
    /// Provider project (group) the deployment lives in.
    pub project_id: String,
    /// API key secret; the operator-wide secret is used when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_secret: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_schedule_ref: Option<ResourceRef>,
    /// Provisioned cluster. Mutually exclusive with `serverlessSpec`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_spec: Option<ProvisionedSpec>,
    /// Serverless instance. Mutually exclusive with `deploymentSpec`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serverless_spec: Option<ServerlessSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedSpec {
    pub name: String,
    #[serde(default = "default_cluster_type")]
    pub cluster_type: String,
    #[serde(
        rename = "mongoDBMajorVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub mongo_db_major_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<RegionSpec>,
    #[serde(
        rename = "diskSizeGB",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub disk_size_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(default)]
    pub termination_protection_enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<TagSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_indexes: Vec<SearchIndexSpec>,
    /// Dedicated search nodes. At most one entry is accepted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_nodes: Vec<SearchNodeSpec>,
    /// Location → zone name; only meaningful for GEOSHARDED clusters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_zone_mapping: Vec<ZoneMappingSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_namespaces: Vec<ManagedNamespaceSpec>,
}

fn default_cluster_type() -> String {
    "REPLICASET".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchNodeSpec {
    /// Search tier, e.g. `S20_HIGHCPU_NVME`.
    pub instance_size: String,
    pub node_count: u8,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RegionSpec {
    pub provider_name: String,
    pub region_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_count: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct TagSpec {
    pub key: String,
    pub value: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerlessSpec {
    pub name: String,
    pub provider_settings: ServerlessProviderSpec,
    #[serde(default)]
    pub termination_protection_enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<TagSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private_endpoints: Vec<ServerlessPrivateEndpointSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerlessProviderSpec {
    /// AWS, AZURE or GCP.
    pub backing_provider_name: String,
    pub region_name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerlessPrivateEndpointSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_provider_endpoint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_endpoint_ip_address: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexSpec {
    pub name: String,
    #[serde(rename = "dbName")]
    pub database: String,
    pub collection_name: String,
    /// `search` (default) or `vectorSearch`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub index_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_analyzer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "super::common::preserve_unknown_fields")]
    pub mappings: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<SynonymSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "super::common::preserve_unknown_list")]
    pub fields: Option<Vec<Value>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SynonymSpec {
    pub name: String,
    pub analyzer: String,
    pub source_collection: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct ZoneMappingSpec {
    pub location: String,
    pub zone: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ManagedNamespaceSpec {
    pub db: String,
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_shard_key: Option<String>,
    #[serde(default)]
    pub is_custom_shard_key_hashed: bool,
    #[serde(default)]
    pub is_shard_key_unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_initial_chunks: Option<i64>,
    #[serde(default)]
    pub presplit_hashed_zones: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseDeploymentStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Provider lifecycle state (IDLE, CREATING, UPDATING, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_name: Option<String>,
    #[serde(rename = "mongoDBVersion", skip_serializing_if = "Option::is_none")]
    pub mongo_db_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_strings: Option<ConnectionStringsStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_indexes: Vec<SearchIndexStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub serverless_private_endpoints: Vec<ServerlessPrivateEndpointStatus>,
    /// Location → zone as last applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_zone_mapping: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_namespaces: Vec<ManagedNamespaceStatus>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStringsStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standard: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standard_srv: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexStatus {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerlessPrivateEndpointStatus {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_provider_endpoint_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_endpoint_ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedNamespaceStatus {
    /// `db.collection`
    pub namespace: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&TagSpec> for provider::Tag {
    fn from(t: &TagSpec) -> Self {
        provider::Tag {
            key: t.key.clone(),
            value: t.value.clone(),
        }
    }
}

impl From<&RegionSpec> for provider::RegionConfig {
    fn from(r: &RegionSpec) -> Self {
        provider::RegionConfig {
            provider_name: r.provider_name.clone(),
            region_name: r.region_name.clone(),
            instance_size: r.instance_size.clone(),
            node_count: r.node_count,
            priority: r.priority,
            zone_name: r.zone_name.clone(),
        }
    }
}

impl From<&SearchNodeSpec> for provider::SearchNodeSpec {
    fn from(s: &SearchNodeSpec) -> Self {
        provider::SearchNodeSpec {
            instance_size: s.instance_size.clone(),
            node_count: s.node_count,
        }
    }
}

impl From<&SearchIndexSpec> for provider::SearchIndex {
    fn from(s: &SearchIndexSpec) -> Self {
        provider::SearchIndex {
            index_id: None,
            name: s.name.clone(),
            database: s.database.clone(),
            collection_name: s.collection_name.clone(),
            index_type: s.index_type.clone(),
            status: None,
            analyzer: s.analyzer.clone(),
            search_analyzer: s.search_analyzer.clone(),
            mappings: s.mappings.clone(),
            synonyms: s
                .synonyms
                .iter()
                .map(|syn| provider::Synonym {
                    name: syn.name.clone(),
                    analyzer: syn.analyzer.clone(),
                    source_collection: syn.source_collection.clone(),
                })
                .collect(),
            fields: s.fields.clone().map(Value::Array),
        }
    }
}

impl From<&ZoneMappingSpec> for provider::ZoneMapping {
    fn from(z: &ZoneMappingSpec) -> Self {
        provider::ZoneMapping {
            location: z.location.clone(),
            zone: z.zone.clone(),
        }
    }
}

impl From<&ManagedNamespaceSpec> for provider::ManagedNamespace {
    fn from(n: &ManagedNamespaceSpec) -> Self {
        provider::ManagedNamespace {
            db: n.db.clone(),
            collection: n.collection.clone(),
            custom_shard_key: n.custom_shard_key.clone(),
            is_custom_shard_key_hashed: n.is_custom_shard_key_hashed,
            is_shard_key_unique: n.is_shard_key_unique,
            num_initial_chunks: n.num_initial_chunks,
            presplit_hashed_zones: n.presplit_hashed_zones,
        }
    }
}

impl From<&provider::ConnectionStrings> for ConnectionStringsStatus {
    fn from(c: &provider::ConnectionStrings) -> Self {
        ConnectionStringsStatus {
            standard: c.standard.clone(),
            standard_srv: c.standard_srv.clone(),
        }
    }
}
