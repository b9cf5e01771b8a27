use dbaas_provider as provider;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Condition, SecretRef};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "dbaas.io",
    version = "v1",
    kind = "DatabaseUser",
    plural = "databaseusers",
    shortname = "dbu",
    namespaced,
    status = "DatabaseUserStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseUserSpec {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_secret: Option<SecretRef>,
    pub username: String,
    /// Authentication database.
    #[serde(default = "default_auth_db")]
    pub database_name: String,
    #[serde(default)]
    pub roles: Vec<RoleSpec>,
    /// Deployments the user may access; all deployments of the project
    /// when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<ScopeSpec>,
    /// Secret holding the password under the `password` key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_secret_ref: Option<SecretRef>,
    /// RFC 3339 timestamp after which the user is removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after_date: Option<String>,
}

fn default_auth_db() -> String {
    "admin".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    pub role_name: String,
    pub database_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct ScopeSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub scope_type: ScopeType,
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeType {
    #[default]
    Cluster,
    DataLake,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Cluster => "CLUSTER",
            ScopeType::DataLake => "DATA_LAKE",
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseUserStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// resourceVersion of the password secret last pushed to the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connection_secrets: Vec<String>,
}

impl DatabaseUserSpec {
    /// Remote representation without the password.
    pub fn to_remote(&self) -> provider::DatabaseUser {
        provider::DatabaseUser {
            username: self.username.clone(),
            database_name: self.database_name.clone(),
            roles: self
                .roles
                .iter()
                .map(|r| provider::Role {
                    role_name: r.role_name.clone(),
                    database_name: r.database_name.clone(),
                    collection_name: r.collection_name.clone(),
                })
                .collect(),
            scopes: self
                .scopes
                .iter()
                .map(|s| provider::UserScope {
                    name: s.name.clone(),
                    scope_type: s.scope_type.as_str().to_string(),
                })
                .collect(),
            password: None,
            delete_after_date: self.delete_after_date.clone(),
        }
    }

    /// Names of deployments this user is scoped to, if scoped at all.
    pub fn cluster_scopes(&self) -> Vec<&str> {
        self.scopes
            .iter()
            .filter(|s| s.scope_type == ScopeType::Cluster)
            .map(|s| s.name.as_str())
            .collect()
    }
}
