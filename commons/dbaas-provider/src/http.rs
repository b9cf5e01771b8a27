use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, header::ACCEPT};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tracing::{debug, trace};

use crate::api::*;
use crate::error::{ProviderError, ProviderResult};
use crate::models::*;

const API_PREFIX: &str = "/api/atlas/v2";
const API_MEDIA_TYPE: &str = "application/vnd.atlas.2023-02-01+json";

/// Error payload returned by the provider on non-2xx responses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
    error_code: Option<String>,
    detail: Option<String>,
    reason: Option<String>,
}

/// reqwest-backed client for the provider's versioned admin API.
#[derive(Clone)]
pub struct HttpProviderClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl HttpProviderClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Credentials,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url, credentials))
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            credentials,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}{}", self.base_url, API_PREFIX, path);
        trace!(%method, %url, "provider request");
        self.client
            .request(method, url)
            .basic_auth(
                &self.credentials.public_key,
                Some(&self.credentials.private_key),
            )
            .header(ACCEPT, API_MEDIA_TYPE)
    }

    async fn execute(&self, rb: RequestBuilder) -> ProviderResult<Response> {
        let res = rb.send().await.map_err(transport_error)?;
        if res.status().is_success() {
            Ok(res)
        } else {
            Err(error_from_response(res).await)
        }
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        rb: RequestBuilder,
    ) -> ProviderResult<T> {
        let res = self.execute(rb).await?;
        let bytes = res.bytes().await.map_err(transport_error)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn fetch_opt<T: DeserializeOwned>(
        &self,
        rb: RequestBuilder,
    ) -> ProviderResult<Option<T>> {
        match self.fetch(rb).await {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn send_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> ProviderResult<T> {
        self.fetch(self.request(method, path).json(body)).await
    }

    async fn delete(&self, path: &str) -> ProviderResult<()> {
        self.execute(self.request(Method::DELETE, path)).await?;
        Ok(())
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Transport(e)
    }
}

async fn error_from_response(res: Response) -> ProviderError {
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(b) => (
            b.error_code.unwrap_or_default(),
            b.detail.or(b.reason).unwrap_or_default(),
        ),
        Err(_) => (String::new(), body),
    };
    debug!(status, %code, %message, "provider returned an error");
    if status == 404 {
        ProviderError::NotFound(if message.is_empty() { code } else { message })
    } else {
        ProviderError::Api {
            status,
            code,
            message,
        }
    }
}

fn deployment_path(project_id: &str, kind: DeploymentKind) -> String {
    format!("/groups/{}/{}", project_id, kind.path_segment())
}

fn search_index_path(project_id: &str, cluster: &str) -> String {
    format!("/groups/{}/clusters/{}/search/indexes", project_id, cluster)
}

fn search_nodes_path(project_id: &str, cluster: &str) -> String {
    format!("/groups/{}/clusters/{}/search/deployment", project_id, cluster)
}

fn serverless_endpoint_path(project_id: &str, instance: &str) -> String {
    format!(
        "/groups/{}/privateEndpoint/serverless/instance/{}/endpoint",
        project_id, instance
    )
}

fn global_writes_path(project_id: &str, cluster: &str) -> String {
    format!("/groups/{}/clusters/{}/globalWrites", project_id, cluster)
}

#[async_trait]
impl DeploymentApi for HttpProviderClient {
    async fn get_deployment(
        &self,
        project_id: &str,
        kind: DeploymentKind,
        name: &str,
    ) -> ProviderResult<Option<Deployment>> {
        let path = format!("{}/{}", deployment_path(project_id, kind), name);
        self.fetch_opt(self.request(Method::GET, &path)).await
    }

    async fn create_deployment(
        &self,
        project_id: &str,
        kind: DeploymentKind,
        deployment: &Deployment,
    ) -> ProviderResult<Deployment> {
        self.send_json(
            Method::POST,
            &deployment_path(project_id, kind),
            deployment,
        )
        .await
    }

    async fn update_deployment(
        &self,
        project_id: &str,
        kind: DeploymentKind,
        deployment: &Deployment,
    ) -> ProviderResult<Deployment> {
        let path = format!(
            "{}/{}",
            deployment_path(project_id, kind),
            deployment.name
        );
        self.send_json(Method::PATCH, &path, deployment).await
    }

    async fn delete_deployment(
        &self,
        project_id: &str,
        kind: DeploymentKind,
        name: &str,
    ) -> ProviderResult<()> {
        self.delete(&format!("{}/{}", deployment_path(project_id, kind), name))
            .await
    }
}

#[async_trait]
impl SearchIndexApi for HttpProviderClient {
    async fn list_search_indexes(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> ProviderResult<Vec<SearchIndex>> {
        let path = search_index_path(project_id, cluster);
        self.fetch(self.request(Method::GET, &path)).await
    }

    async fn create_search_index(
        &self,
        project_id: &str,
        cluster: &str,
        index: &SearchIndex,
    ) -> ProviderResult<SearchIndex> {
        self.send_json(
            Method::POST,
            &search_index_path(project_id, cluster),
            index,
        )
        .await
    }

    async fn update_search_index(
        &self,
        project_id: &str,
        cluster: &str,
        index_id: &str,
        index: &SearchIndex,
    ) -> ProviderResult<SearchIndex> {
        let path =
            format!("{}/{}", search_index_path(project_id, cluster), index_id);
        self.send_json(Method::PATCH, &path, index).await
    }

    async fn delete_search_index(
        &self,
        project_id: &str,
        cluster: &str,
        index_id: &str,
    ) -> ProviderResult<()> {
        self.delete(&format!(
            "{}/{}",
            search_index_path(project_id, cluster),
            index_id
        ))
        .await
    }
}

#[async_trait]
impl SearchNodesApi for HttpProviderClient {
    async fn get_search_nodes(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> ProviderResult<Option<SearchDeployment>> {
        let path = search_nodes_path(project_id, cluster);
        let found: Option<SearchDeployment> =
            match self.fetch_opt(self.request(Method::GET, &path)).await {
                // the provider answers 400 for a cluster without search nodes
                Err(ProviderError::Api { status: 400, .. }) => None,
                other => other?,
            };
        Ok(found.filter(|d| !d.specs.is_empty()))
    }

    async fn create_search_nodes(
        &self,
        project_id: &str,
        cluster: &str,
        specs: &[SearchNodeSpec],
    ) -> ProviderResult<SearchDeployment> {
        self.send_json(
            Method::POST,
            &search_nodes_path(project_id, cluster),
            &json!({ "specs": specs }),
        )
        .await
    }

    async fn update_search_nodes(
        &self,
        project_id: &str,
        cluster: &str,
        specs: &[SearchNodeSpec],
    ) -> ProviderResult<SearchDeployment> {
        self.send_json(
            Method::PATCH,
            &search_nodes_path(project_id, cluster),
            &json!({ "specs": specs }),
        )
        .await
    }

    async fn delete_search_nodes(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> ProviderResult<()> {
        self.delete(&search_nodes_path(project_id, cluster)).await
    }
}

#[async_trait]
impl ServerlessEndpointApi for HttpProviderClient {
    async fn list_serverless_endpoints(
        &self,
        project_id: &str,
        instance: &str,
    ) -> ProviderResult<Vec<ServerlessPrivateEndpoint>> {
        let path = serverless_endpoint_path(project_id, instance);
        self.fetch(self.request(Method::GET, &path)).await
    }

    async fn create_serverless_endpoint(
        &self,
        project_id: &str,
        instance: &str,
        name: &str,
    ) -> ProviderResult<ServerlessPrivateEndpoint> {
        self.send_json(
            Method::POST,
            &serverless_endpoint_path(project_id, instance),
            &json!({ "comment": name }),
        )
        .await
    }

    async fn connect_serverless_endpoint(
        &self,
        project_id: &str,
        instance: &str,
        endpoint_id: &str,
        connection: &EndpointConnection,
    ) -> ProviderResult<ServerlessPrivateEndpoint> {
        let path = format!(
            "{}/{}",
            serverless_endpoint_path(project_id, instance),
            endpoint_id
        );
        self.send_json(Method::PATCH, &path, connection).await
    }

    async fn delete_serverless_endpoint(
        &self,
        project_id: &str,
        instance: &str,
        endpoint_id: &str,
    ) -> ProviderResult<()> {
        self.delete(&format!(
            "{}/{}",
            serverless_endpoint_path(project_id, instance),
            endpoint_id
        ))
        .await
    }
}

#[async_trait]
impl GlobalClusterApi for HttpProviderClient {
    async fn get_global_cluster(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> ProviderResult<GlobalCluster> {
        let path = global_writes_path(project_id, cluster);
        self.fetch(self.request(Method::GET, &path)).await
    }

    async fn replace_zone_mappings(
        &self,
        project_id: &str,
        cluster: &str,
        mappings: &[ZoneMapping],
    ) -> ProviderResult<GlobalCluster> {
        let path = format!(
            "{}/customZoneMapping",
            global_writes_path(project_id, cluster)
        );
        self.send_json(
            Method::POST,
            &path,
            &json!({ "customZoneMappings": mappings }),
        )
        .await
    }

    async fn delete_zone_mappings(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> ProviderResult<()> {
        self.delete(&format!(
            "{}/customZoneMapping",
            global_writes_path(project_id, cluster)
        ))
        .await
    }

    async fn create_managed_namespace(
        &self,
        project_id: &str,
        cluster: &str,
        namespace: &ManagedNamespace,
    ) -> ProviderResult<GlobalCluster> {
        let path = format!(
            "{}/managedNamespaces",
            global_writes_path(project_id, cluster)
        );
        self.send_json(Method::POST, &path, namespace).await
    }

    async fn delete_managed_namespace(
        &self,
        project_id: &str,
        cluster: &str,
        db: &str,
        collection: &str,
    ) -> ProviderResult<()> {
        let path = format!(
            "{}/managedNamespaces",
            global_writes_path(project_id, cluster)
        );
        let rb = self
            .request(Method::DELETE, &path)
            .query(&[("db", db), ("collection", collection)]);
        self.execute(rb).await?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseUserApi for HttpProviderClient {
    async fn get_database_user(
        &self,
        project_id: &str,
        auth_db: &str,
        username: &str,
    ) -> ProviderResult<Option<DatabaseUser>> {
        let path = format!(
            "/groups/{}/databaseUsers/{}/{}",
            project_id, auth_db, username
        );
        self.fetch_opt(self.request(Method::GET, &path)).await
    }

    async fn create_database_user(
        &self,
        project_id: &str,
        user: &DatabaseUser,
    ) -> ProviderResult<DatabaseUser> {
        let path = format!("/groups/{}/databaseUsers", project_id);
        self.send_json(Method::POST, &path, user).await
    }

    async fn update_database_user(
        &self,
        project_id: &str,
        user: &DatabaseUser,
    ) -> ProviderResult<DatabaseUser> {
        let path = format!(
            "/groups/{}/databaseUsers/{}/{}",
            project_id, user.database_name, user.username
        );
        self.send_json(Method::PATCH, &path, user).await
    }

    async fn delete_database_user(
        &self,
        project_id: &str,
        auth_db: &str,
        username: &str,
    ) -> ProviderResult<()> {
        self.delete(&format!(
            "/groups/{}/databaseUsers/{}/{}",
            project_id, auth_db, username
        ))
        .await
    }
}

#[async_trait]
impl BackupApi for HttpProviderClient {
    async fn get_backup_schedule(
        &self,
        project_id: &str,
        cluster: &str,
    ) -> ProviderResult<BackupSchedule> {
        let path = format!(
            "/groups/{}/clusters/{}/backup/schedule",
            project_id, cluster
        );
        self.fetch(self.request(Method::GET, &path)).await
    }

    async fn update_backup_schedule(
        &self,
        project_id: &str,
        cluster: &str,
        schedule: &BackupSchedule,
    ) -> ProviderResult<BackupSchedule> {
        let path = format!(
            "/groups/{}/clusters/{}/backup/schedule",
            project_id, cluster
        );
        self.send_json(Method::PATCH, &path, schedule).await
    }
}
