use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        rename = "lastTransitionTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_transition_time: Option<String>,
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Hash,
)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionType {
    Ready,
    ResourceVersionIsValid,
    ValidationSucceeded,
    DeploymentReady,
    BackupScheduleReady,
    SearchIndexesReady,
    SearchNodesReady,
    ServerlessPrivateEndpointReady,
    CustomZoneMappingReady,
    ManagedNamespacesReady,
    DatabaseUserReady,
    #[serde(other)]
    Unknown,
}

impl ConditionType {
    /// Stable ordering in the status block to reduce churn.
    pub fn rank(&self) -> u8 {
        match self {
            ConditionType::Ready => 0,
            ConditionType::ResourceVersionIsValid => 1,
            ConditionType::ValidationSucceeded => 2,
            ConditionType::DeploymentReady => 3,
            ConditionType::DatabaseUserReady => 4,
            ConditionType::BackupScheduleReady => 5,
            ConditionType::SearchIndexesReady => 6,
            ConditionType::SearchNodesReady => 7,
            ConditionType::ServerlessPrivateEndpointReady => 8,
            ConditionType::CustomZoneMappingReady => 9,
            ConditionType::ManagedNamespacesReady => 10,
            ConditionType::Unknown => 250,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Reference to a Secret; the namespace defaults to the referencing resource's.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct SecretRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Reference to another custom resource managed by this operator.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct ResourceRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ResourceRef {
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default)
    }
}

/// Free-form JSON documents (search mappings, vector fields).
pub fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        extensions: [(
            "x-kubernetes-preserve-unknown-fields".to_string(),
            serde_json::Value::Bool(true),
        )]
        .into_iter()
        .collect(),
        ..Default::default()
    })
}

pub fn preserve_unknown_list(g: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(schemars::schema::ArrayValidation {
            items: Some(preserve_unknown_fields(g).into()),
            ..Default::default()
        })),
        ..Default::default()
    })
}
