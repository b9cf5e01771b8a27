use async_trait::async_trait;

use crate::error::ProviderResult;
use crate::models::*;

#[async_trait]
pub trait DeploymentApi: Send + Sync {
    /// `Ok(None)` when the provider has no deployment with that name.
    async fn get_deployment(
        &self,
        project_id: &str,
        kind: DeploymentKind,
        name: &str,
    ) -> ProviderResult<Option<Deployment>>;
    async fn create_deployment(
        &self,
        project_id: &str,
        kind: DeploymentKind,
        deployment: &Deployment,
    ) -> ProviderResult<Deployment>;
    async fn update_deployment(
        &self,
        project_id: &str,
        kind: DeploymentKind,
        deployment: &Deployment,
    ) -> ProviderResult<Deployment>;
    async fn delete_deployment(
        &self,
        project_id: &str,
        kind: DeploymentKind,
        name: &str,
    ) -> ProviderResult<()>;
}

#[async_trait]
pub trait SearchIndexApi: Send + Sync {
    async fn list_search_indexes(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> ProviderResult<Vec<SearchIndex>>;
    async fn create_search_index(
        &self,
        project_id: &str,
        cluster: &str,
        index: &SearchIndex,
    ) -> ProviderResult<SearchIndex>;
    async fn update_search_index(
        &self,
        project_id: &str,
        cluster: &str,
        index_id: &str,
        index: &SearchIndex,
    ) -> ProviderResult<SearchIndex>;
    async fn delete_search_index(
        &self,
        project_id: &str,
        cluster: &str,
        index_id: &str,
    ) -> ProviderResult<()>;
}

#[async_trait]
pub trait SearchNodesApi: Send + Sync {
    /// `Ok(None)` when the cluster has no dedicated search nodes.
    async fn get_search_nodes(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> ProviderResult<Option<SearchDeployment>>;
    async fn create_search_nodes(
        &self,
        project_id: &str,
        cluster: &str,
        specs: &[SearchNodeSpec],
    ) -> ProviderResult<SearchDeployment>;
    async fn update_search_nodes(
        &self,
        project_id: &str,
        cluster: &str,
        specs: &[SearchNodeSpec],
    ) -> ProviderResult<SearchDeployment>;
    async fn delete_search_nodes(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> ProviderResult<()>;
}

#[async_trait]
pub trait ServerlessEndpointApi: Send + Sync {
    async fn list_serverless_endpoints(
        &self,
        project_id: &str,
        instance: &str,
    ) -> ProviderResult<Vec<ServerlessPrivateEndpoint>>;
    async fn create_serverless_endpoint(
        &self,
        project_id: &str,
        instance: &str,
        name: &str,
    ) -> ProviderResult<ServerlessPrivateEndpoint>;
    async fn connect_serverless_endpoint(
        &self,
        project_id: &str,
        instance: &str,
        endpoint_id: &str,
        connection: &EndpointConnection,
    ) -> ProviderResult<ServerlessPrivateEndpoint>;
    async fn delete_serverless_endpoint(
        &self,
        project_id: &str,
        instance: &str,
        endpoint_id: &str,
    ) -> ProviderResult<()>;
}

#[async_trait]
pub trait GlobalClusterApi: Send + Sync {
    async fn get_global_cluster(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> ProviderResult<GlobalCluster>;
    /// Replaces the whole custom zone mapping set in one call.
    async fn replace_zone_mappings(
        &self,
        project_id: &str,
        cluster: &str,
        mappings: &[ZoneMapping],
    ) -> ProviderResult<GlobalCluster>;
    async fn delete_zone_mappings(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> ProviderResult<()>;
    async fn create_managed_namespace(
        &self,
        project_id: &str,
        cluster: &str,
        namespace: &ManagedNamespace,
    ) -> ProviderResult<GlobalCluster>;
    async fn delete_managed_namespace(
        &self,
        project_id: &str,
        cluster: &str,
        db: &str,
        collection: &str,
    ) -> ProviderResult<()>;
}

#[async_trait]
pub trait DatabaseUserApi: Send + Sync {
    async fn get_database_user(
        &self,
        project_id: &str,
        auth_db: &str,
        username: &str,
    ) -> ProviderResult<Option<DatabaseUser>>;
    async fn create_database_user(
        &self,
        project_id: &str,
        user: &DatabaseUser,
    ) -> ProviderResult<DatabaseUser>;
    async fn update_database_user(
        &self,
        project_id: &str,
        user: &DatabaseUser,
    ) -> ProviderResult<DatabaseUser>;
    async fn delete_database_user(
        &self,
        project_id: &str,
        auth_db: &str,
        username: &str,
    ) -> ProviderResult<()>;
}

#[async_trait]
pub trait BackupApi: Send + Sync {
    async fn get_backup_schedule(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> ProviderResult<BackupSchedule>;
    async fn update_backup_schedule(
        &self,
        project_id: &str,
        cluster: &str,
        schedule: &BackupSchedule,
    ) -> ProviderResult<BackupSchedule>;
}

/// Everything the operator needs from the provider, as one object-safe bound.
pub trait ProviderClient:
    DeploymentApi
    + SearchIndexApi
    + SearchNodesApi
    + ServerlessEndpointApi
    + GlobalClusterApi
    + DatabaseUserApi
    + BackupApi
{
}

impl<T> ProviderClient for T where
    T: DeploymentApi
        + SearchIndexApi
        + SearchNodesApi
        + ServerlessEndpointApi
        + GlobalClusterApi
        + DatabaseUserApi
        + BackupApi
{
}
