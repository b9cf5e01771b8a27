//! In-process provider used by tests and local development.
//!
//! Every mutating call is appended to a call log so tests can assert on the
//! exact remote side effects of a reconciliation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, RwLockWriteGuard};

use crate::api::*;
use crate::error::{ProviderError, ProviderResult};
use crate::factory::ProviderFactory;
use crate::models::*;

type ProjectKey = (String, String);

#[derive(Default)]
struct State {
    deployments: HashMap<(String, DeploymentKind, String), Deployment>,
    search_indexes: HashMap<ProjectKey, Vec<SearchIndex>>,
    search_nodes: HashMap<ProjectKey, SearchDeployment>,
    endpoints: HashMap<ProjectKey, Vec<ServerlessPrivateEndpoint>>,
    global: HashMap<ProjectKey, GlobalCluster>,
    users: HashMap<(String, String, String), DatabaseUser>,
    backups: HashMap<ProjectKey, BackupSchedule>,
    calls: Vec<String>,
    failures: HashMap<String, u16>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }
}

fn key(a: &str, b: &str) -> ProjectKey {
    (a.to_string(), b.to_string())
}

#[derive(Clone, Default)]
pub struct MemoryProvider {
    state: Arc<RwLock<State>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of `op` (e.g. `"create_deployment"`) fail with
    /// the given HTTP status.
    pub async fn fail_next(&self, op: &str, status: u16) {
        self.state.write().await.failures.insert(op.to_string(), status);
    }

    pub async fn mutations(&self) -> Vec<String> {
        self.state.read().await.calls.clone()
    }

    pub async fn mutation_count(&self, op: &str) -> usize {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    pub async fn clear_mutations(&self) {
        self.state.write().await.calls.clear();
    }

    pub async fn put_deployment(
        &self,
        project_id: &str,
        kind: DeploymentKind,
        deployment: Deployment,
    ) {
        self.state.write().await.deployments.insert(
            (project_id.to_string(), kind, deployment.name.clone()),
            deployment,
        );
    }

    pub async fn deployment(
        &self,
        project_id: &str,
        kind: DeploymentKind,
        name: &str,
    ) -> Option<Deployment> {
        self.state
            .read()
            .await
            .deployments
            .get(&(project_id.to_string(), kind, name.to_string()))
            .cloned()
    }

    pub async fn set_deployment_state(
        &self,
        project_id: &str,
        kind: DeploymentKind,
        name: &str,
        state_name: &str,
    ) {
        if let Some(d) = self
            .state
            .write()
            .await
            .deployments
            .get_mut(&(project_id.to_string(), kind, name.to_string()))
        {
            d.state_name = state_name.to_string();
        }
    }

    pub async fn put_search_index(
        &self,
        project_id: &str,
        cluster: &str,
        mut index: SearchIndex,
    ) {
        let mut st = self.state.write().await;
        if index.index_id.is_none() {
            index.index_id = Some(st.next_id("idx"));
        }
        st.search_indexes
            .entry(key(project_id, cluster))
            .or_default()
            .push(index);
    }

    pub async fn set_search_index_status(
        &self,
        project_id: &str,
        cluster: &str,
        name: &str,
        status: &str,
    ) {
        let mut st = self.state.write().await;
        if let Some(list) = st.search_indexes.get_mut(&key(project_id, cluster))
        {
            for idx in list.iter_mut().filter(|i| i.name == name) {
                idx.status = Some(status.to_string());
            }
        }
    }

    pub async fn search_nodes(&self, project_id: &str, cluster: &str) -> Option<SearchDeployment> {
        self.state
            .read()
            .await
            .search_nodes
            .get(&key(project_id, cluster))
            .cloned()
    }

    pub async fn set_search_nodes_state(&self, project_id: &str, cluster: &str, state: &str) {
        let mut st = self.state.write().await;
        if let Some(d) = st.search_nodes.get_mut(&key(project_id, cluster)) {
            d.state_name = state.to_string();
        }
    }

    pub async fn put_serverless_endpoint(
        &self,
        project_id: &str,
        instance: &str,
        mut endpoint: ServerlessPrivateEndpoint,
    ) {
        let mut st = self.state.write().await;
        if endpoint.id.is_none() {
            endpoint.id = Some(st.next_id("spe"));
        }
        st.endpoints
            .entry(key(project_id, instance))
            .or_default()
            .push(endpoint);
    }

    pub async fn serverless_endpoints(
        &self,
        project_id: &str,
        instance: &str,
    ) -> Vec<ServerlessPrivateEndpoint> {
        self.state
            .read()
            .await
            .endpoints
            .get(&key(project_id, instance))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn set_endpoint_status(
        &self,
        project_id: &str,
        instance: &str,
        name: &str,
        status: &str,
    ) {
        let mut st = self.state.write().await;
        if let Some(list) = st.endpoints.get_mut(&key(project_id, instance)) {
            for e in list.iter_mut().filter(|e| e.name == name) {
                e.status = status.to_string();
            }
        }
    }

    /// Drops every endpoint of the instance that is being deleted.
    pub async fn finish_endpoint_deletions(&self, project_id: &str, instance: &str) {
        let mut st = self.state.write().await;
        if let Some(list) = st.endpoints.get_mut(&key(project_id, instance)) {
            list.retain(|e| e.status != endpoint_status::DELETING);
        }
    }

    pub async fn put_database_user(&self, project_id: &str, user: DatabaseUser) {
        self.state.write().await.users.insert(
            (
                project_id.to_string(),
                user.database_name.clone(),
                user.username.clone(),
            ),
            user,
        );
    }

    pub async fn database_user(
        &self,
        project_id: &str,
        auth_db: &str,
        username: &str,
    ) -> Option<DatabaseUser> {
        self.state
            .read()
            .await
            .users
            .get(&(
                project_id.to_string(),
                auth_db.to_string(),
                username.to_string(),
            ))
            .cloned()
    }

    pub async fn backup_schedule(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> Option<BackupSchedule> {
        self.state
            .read()
            .await
            .backups
            .get(&key(project_id, cluster))
            .cloned()
    }

    /// Takes the write lock after consuming a pending injected failure.
    async fn enter(
        &self,
        op: &str,
    ) -> ProviderResult<RwLockWriteGuard<'_, State>> {
        let mut st = self.state.write().await;
        let injected = st.failures.remove(op);
        match injected {
            Some(404) => Err(ProviderError::NotFound(format!("{op}: injected"))),
            Some(status) => Err(ProviderError::api(
                status,
                "INJECTED_FAILURE",
                format!("{op}: injected failure"),
            )),
            None => Ok(st),
        }
    }
}

fn record(st: &mut State, op: &str, detail: String) {
    st.calls.push(format!("{op} {detail}"));
}

#[async_trait]
impl DeploymentApi for MemoryProvider {
    async fn get_deployment(
        &self,
        project_id: &str,
        kind: DeploymentKind,
        name: &str,
    ) -> ProviderResult<Option<Deployment>> {
        let st = self.enter("get_deployment").await?;
        Ok(st
            .deployments
            .get(&(project_id.to_string(), kind, name.to_string()))
            .cloned())
    }

    async fn create_deployment(
        &self,
        project_id: &str,
        kind: DeploymentKind,
        deployment: &Deployment,
    ) -> ProviderResult<Deployment> {
        let mut st = self.enter("create_deployment").await?;
        let k = (project_id.to_string(), kind, deployment.name.clone());
        if st.deployments.contains_key(&k) {
            return Err(ProviderError::api(
                409,
                "DUPLICATE_CLUSTER_NAME",
                format!("{} already exists", deployment.name),
            ));
        }
        let mut created = deployment.clone();
        created.state_name = "CREATING".to_string();
        st.deployments.insert(k, created.clone());
        record(&mut st, "create_deployment", format!("{project_id}/{}", deployment.name));
        Ok(created)
    }

    async fn update_deployment(
        &self,
        project_id: &str,
        kind: DeploymentKind,
        deployment: &Deployment,
    ) -> ProviderResult<Deployment> {
        let mut st = self.enter("update_deployment").await?;
        let k = (project_id.to_string(), kind, deployment.name.clone());
        let Some(existing) = st.deployments.get(&k).cloned() else {
            return Err(ProviderError::NotFound(deployment.name.clone()));
        };
        let mut updated = deployment.clone();
        updated.state_name = "UPDATING".to_string();
        updated.connection_strings = existing.connection_strings;
        updated.mongo_db_version = existing.mongo_db_version;
        st.deployments.insert(k, updated.clone());
        record(&mut st, "update_deployment", format!("{project_id}/{}", deployment.name));
        Ok(updated)
    }

    async fn delete_deployment(
        &self,
        project_id: &str,
        kind: DeploymentKind,
        name: &str,
    ) -> ProviderResult<()> {
        let mut st = self.enter("delete_deployment").await?;
        record(&mut st, "delete_deployment", format!("{project_id}/{name}"));
        match st
            .deployments
            .remove(&(project_id.to_string(), kind, name.to_string()))
        {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound(name.to_string())),
        }
    }
}

#[async_trait]
impl SearchNodesApi for MemoryProvider {
    async fn get_search_nodes(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> ProviderResult<Option<SearchDeployment>> {
        let st = self.enter("get_search_nodes").await?;
        Ok(st.search_nodes.get(&key(project_id, cluster)).cloned())
    }

    async fn create_search_nodes(
        &self,
        project_id: &str,
        cluster: &str,
        specs: &[SearchNodeSpec],
    ) -> ProviderResult<SearchDeployment> {
        let mut st = self.enter("create_search_nodes").await?;
        let created = SearchDeployment {
            id: Some(st.next_id("sn")),
            state_name: "UPDATING".to_string(),
            specs: specs.to_vec(),
        };
        st.search_nodes.insert(key(project_id, cluster), created.clone());
        record(&mut st, "create_search_nodes", cluster.to_string());
        Ok(created)
    }

    async fn update_search_nodes(
        &self,
        project_id: &str,
        cluster: &str,
        specs: &[SearchNodeSpec],
    ) -> ProviderResult<SearchDeployment> {
        let mut st = self.enter("update_search_nodes").await?;
        let Some(current) = st.search_nodes.get_mut(&key(project_id, cluster)) else {
            return Err(ProviderError::NotFound(format!("search nodes of {cluster}")));
        };
        current.specs = specs.to_vec();
        current.state_name = "UPDATING".to_string();
        let updated = current.clone();
        record(&mut st, "update_search_nodes", cluster.to_string());
        Ok(updated)
    }

    async fn delete_search_nodes(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> ProviderResult<()> {
        let mut st = self.enter("delete_search_nodes").await?;
        record(&mut st, "delete_search_nodes", cluster.to_string());
        match st.search_nodes.remove(&key(project_id, cluster)) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound(format!("search nodes of {cluster}"))),
        }
    }
}

#[async_trait]
impl SearchIndexApi for MemoryProvider {
    async fn list_search_indexes(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> ProviderResult<Vec<SearchIndex>> {
        let st = self.enter("list_search_indexes").await?;
        Ok(st
            .search_indexes
            .get(&key(project_id, cluster))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_search_index(
        &self,
        project_id: &str,
        cluster: &str,
        index: &SearchIndex,
    ) -> ProviderResult<SearchIndex> {
        let mut st = self.enter("create_search_index").await?;
        let mut created = index.clone();
        created.index_id = Some(st.next_id("idx"));
        created.status = Some("IN_PROGRESS".to_string());
        st.search_indexes
            .entry(key(project_id, cluster))
            .or_default()
            .push(created.clone());
        record(&mut st, "create_search_index", format!("{cluster}/{}", index.name));
        Ok(created)
    }

    async fn update_search_index(
        &self,
        project_id: &str,
        cluster: &str,
        index_id: &str,
        index: &SearchIndex,
    ) -> ProviderResult<SearchIndex> {
        let mut st = self.enter("update_search_index").await?;
        let list = st.search_indexes.entry(key(project_id, cluster)).or_default();
        let Some(slot) = list
            .iter_mut()
            .find(|i| i.index_id.as_deref() == Some(index_id))
        else {
            return Err(ProviderError::NotFound(index_id.to_string()));
        };
        let mut updated = index.clone();
        updated.index_id = Some(index_id.to_string());
        updated.status = Some("IN_PROGRESS".to_string());
        *slot = updated.clone();
        record(&mut st, "update_search_index", format!("{cluster}/{}", index.name));
        Ok(updated)
    }

    async fn delete_search_index(
        &self,
        project_id: &str,
        cluster: &str,
        index_id: &str,
    ) -> ProviderResult<()> {
        let mut st = self.enter("delete_search_index").await?;
        let list = st.search_indexes.entry(key(project_id, cluster)).or_default();
        let before = list.len();
        list.retain(|i| i.index_id.as_deref() != Some(index_id));
        let removed = before != list.len();
        record(&mut st, "delete_search_index", format!("{cluster}/{index_id}"));
        if removed {
            Ok(())
        } else {
            Err(ProviderError::NotFound(index_id.to_string()))
        }
    }
}

#[async_trait]
impl ServerlessEndpointApi for MemoryProvider {
    async fn list_serverless_endpoints(
        &self,
        project_id: &str,
        instance: &str,
    ) -> ProviderResult<Vec<ServerlessPrivateEndpoint>> {
        let st = self.enter("list_serverless_endpoints").await?;
        Ok(st
            .endpoints
            .get(&key(project_id, instance))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_serverless_endpoint(
        &self,
        project_id: &str,
        instance: &str,
        name: &str,
    ) -> ProviderResult<ServerlessPrivateEndpoint> {
        let mut st = self.enter("create_serverless_endpoint").await?;
        let created = ServerlessPrivateEndpoint {
            id: Some(st.next_id("spe")),
            name: name.to_string(),
            status: endpoint_status::RESERVATION_REQUESTED.to_string(),
            ..Default::default()
        };
        st.endpoints
            .entry(key(project_id, instance))
            .or_default()
            .push(created.clone());
        record(&mut st, "create_serverless_endpoint", format!("{instance}/{name}"));
        Ok(created)
    }

    async fn connect_serverless_endpoint(
        &self,
        project_id: &str,
        instance: &str,
        endpoint_id: &str,
        connection: &EndpointConnection,
    ) -> ProviderResult<ServerlessPrivateEndpoint> {
        let mut st = self.enter("connect_serverless_endpoint").await?;
        let list = st.endpoints.entry(key(project_id, instance)).or_default();
        let Some(slot) = list
            .iter_mut()
            .find(|e| e.id.as_deref() == Some(endpoint_id))
        else {
            return Err(ProviderError::NotFound(endpoint_id.to_string()));
        };
        slot.cloud_provider_endpoint_id =
            connection.cloud_provider_endpoint_id.clone();
        slot.private_endpoint_ip_address =
            connection.private_endpoint_ip_address.clone();
        slot.status = endpoint_status::INITIATING.to_string();
        let connected = slot.clone();
        record(
            &mut st,
            "connect_serverless_endpoint",
            format!("{instance}/{}", connected.name),
        );
        Ok(connected)
    }

    async fn delete_serverless_endpoint(
        &self,
        project_id: &str,
        instance: &str,
        endpoint_id: &str,
    ) -> ProviderResult<()> {
        let mut st = self.enter("delete_serverless_endpoint").await?;
        let list = st.endpoints.entry(key(project_id, instance)).or_default();
        // removal is asynchronous on the provider; the entry lingers as
        // DELETING until `finish_endpoint_deletions`
        let mut removed = false;
        for e in list
            .iter_mut()
            .filter(|e| e.id.as_deref() == Some(endpoint_id))
        {
            e.status = endpoint_status::DELETING.to_string();
            removed = true;
        }
        record(
            &mut st,
            "delete_serverless_endpoint",
            format!("{instance}/{endpoint_id}"),
        );
        if removed {
            Ok(())
        } else {
            Err(ProviderError::NotFound(endpoint_id.to_string()))
        }
    }
}

#[async_trait]
impl GlobalClusterApi for MemoryProvider {
    async fn get_global_cluster(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> ProviderResult<GlobalCluster> {
        let st = self.enter("get_global_cluster").await?;
        Ok(st
            .global
            .get(&key(project_id, cluster))
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_zone_mappings(
        &self,
        project_id: &str,
        cluster: &str,
        mappings: &[ZoneMapping],
    ) -> ProviderResult<GlobalCluster> {
        let mut st = self.enter("replace_zone_mappings").await?;
        let g = st.global.entry(key(project_id, cluster)).or_default();
        g.custom_zone_mapping = mappings.to_vec();
        let out = g.clone();
        record(&mut st, "replace_zone_mappings", cluster.to_string());
        Ok(out)
    }

    async fn delete_zone_mappings(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> ProviderResult<()> {
        let mut st = self.enter("delete_zone_mappings").await?;
        st.global
            .entry(key(project_id, cluster))
            .or_default()
            .custom_zone_mapping
            .clear();
        record(&mut st, "delete_zone_mappings", cluster.to_string());
        Ok(())
    }

    async fn create_managed_namespace(
        &self,
        project_id: &str,
        cluster: &str,
        namespace: &ManagedNamespace,
    ) -> ProviderResult<GlobalCluster> {
        let mut st = self.enter("create_managed_namespace").await?;
        let g = st.global.entry(key(project_id, cluster)).or_default();
        g.managed_namespaces.push(namespace.clone());
        let out = g.clone();
        record(
            &mut st,
            "create_managed_namespace",
            format!("{cluster}/{}.{}", namespace.db, namespace.collection),
        );
        Ok(out)
    }

    async fn delete_managed_namespace(
        &self,
        project_id: &str,
        cluster: &str,
        db: &str,
        collection: &str,
    ) -> ProviderResult<()> {
        let mut st = self.enter("delete_managed_namespace").await?;
        st.global
            .entry(key(project_id, cluster))
            .or_default()
            .managed_namespaces
            .retain(|n| !(n.db == db && n.collection == collection));
        record(
            &mut st,
            "delete_managed_namespace",
            format!("{cluster}/{db}.{collection}"),
        );
        Ok(())
    }
}

#[async_trait]
impl DatabaseUserApi for MemoryProvider {
    async fn get_database_user(
        &self,
        project_id: &str,
        auth_db: &str,
        username: &str,
    ) -> ProviderResult<Option<DatabaseUser>> {
        let st = self.enter("get_database_user").await?;
        Ok(st
            .users
            .get(&(
                project_id.to_string(),
                auth_db.to_string(),
                username.to_string(),
            ))
            .cloned())
    }

    async fn create_database_user(
        &self,
        project_id: &str,
        user: &DatabaseUser,
    ) -> ProviderResult<DatabaseUser> {
        let mut st = self.enter("create_database_user").await?;
        st.users.insert(
            (
                project_id.to_string(),
                user.database_name.clone(),
                user.username.clone(),
            ),
            user.clone(),
        );
        record(&mut st, "create_database_user", user.username.clone());
        Ok(user.clone())
    }

    async fn update_database_user(
        &self,
        project_id: &str,
        user: &DatabaseUser,
    ) -> ProviderResult<DatabaseUser> {
        let mut st = self.enter("update_database_user").await?;
        let k = (
            project_id.to_string(),
            user.database_name.clone(),
            user.username.clone(),
        );
        if !st.users.contains_key(&k) {
            return Err(ProviderError::NotFound(user.username.clone()));
        }
        st.users.insert(k, user.clone());
        record(&mut st, "update_database_user", user.username.clone());
        Ok(user.clone())
    }

    async fn delete_database_user(
        &self,
        project_id: &str,
        auth_db: &str,
        username: &str,
    ) -> ProviderResult<()> {
        let mut st = self.enter("delete_database_user").await?;
        record(&mut st, "delete_database_user", username.to_string());
        match st.users.remove(&(
            project_id.to_string(),
            auth_db.to_string(),
            username.to_string(),
        )) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound(username.to_string())),
        }
    }
}

#[async_trait]
impl BackupApi for MemoryProvider {
    async fn get_backup_schedule(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> ProviderResult<BackupSchedule> {
        let st = self.enter("get_backup_schedule").await?;
        Ok(st
            .backups
            .get(&key(project_id, cluster))
            .cloned()
            .unwrap_or_default())
    }

    async fn update_backup_schedule(
        &self,
        project_id: &str,
        cluster: &str,
        schedule: &BackupSchedule,
    ) -> ProviderResult<BackupSchedule> {
        let mut st = self.enter("update_backup_schedule").await?;
        st.backups.insert(key(project_id, cluster), schedule.clone());
        record(&mut st, "update_backup_schedule", cluster.to_string());
        Ok(schedule.clone())
    }
}

impl ProviderFactory for MemoryProvider {
    fn client_for(
        &self,
        _credentials: &Credentials,
    ) -> ProviderResult<Arc<dyn ProviderClient>> {
        Ok(Arc::new(self.clone()))
    }
}
