use std::sync::Arc;
use std::time::Duration;

use crate::api::ProviderClient;
use crate::error::ProviderResult;
use crate::http::HttpProviderClient;
use crate::models::Credentials;

/// Builds a provider client bound to one set of credentials.
pub trait ProviderFactory: Send + Sync {
    fn client_for(
        &self,
        credentials: &Credentials,
    ) -> ProviderResult<Arc<dyn ProviderClient>>;
}

/// Shares one connection pool between all credential sets.
#[derive(Clone)]
pub struct HttpProviderFactory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProviderFactory {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn client_for(
        &self,
        credentials: &Credentials,
    ) -> ProviderResult<Arc<dyn ProviderClient>> {
        Ok(Arc::new(HttpProviderClient::with_client(
            self.client.clone(),
            self.base_url.clone(),
            credentials.clone(),
        )))
    }
}
