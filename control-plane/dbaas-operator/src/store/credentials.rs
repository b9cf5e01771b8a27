use std::sync::Arc;

use async_trait::async_trait;
use dbaas_provider::Credentials;
use tracing::debug;

use crate::crd::SecretRef;

use super::{SecretAccess, StoreError, secret_value};

pub const KEY_ORG_ID: &str = "orgId";
pub const KEY_PUBLIC_KEY: &str = "publicApiKey";
pub const KEY_PRIVATE_KEY: &str = "privateApiKey";

#[derive(thiserror::Error, Debug)]
pub enum CredentialError {
    #[error("API key secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },
    #[error("API key secret {namespace}/{name} has no '{key}' entry")]
    MissingKey {
        namespace: String,
        name: String,
        key: &'static str,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolves provider credentials for a resource, falling back to the
/// operator-wide secret when the resource names none.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(
        &self,
        namespace: &str,
        secret: Option<&SecretRef>,
    ) -> Result<Credentials, CredentialError>;
}

pub struct SecretCredentialResolver {
    secrets: Arc<dyn SecretAccess>,
    default_secret: SecretRef,
}

impl SecretCredentialResolver {
    pub fn new(secrets: Arc<dyn SecretAccess>, default_secret: SecretRef) -> Self {
        Self {
            secrets,
            default_secret,
        }
    }
}

#[async_trait]
impl CredentialResolver for SecretCredentialResolver {
    async fn resolve(
        &self,
        namespace: &str,
        secret: Option<&SecretRef>,
    ) -> Result<Credentials, CredentialError> {
        let reference = secret.unwrap_or(&self.default_secret);
        let ns = reference.namespace.as_deref().unwrap_or(namespace);
        debug!(%ns, name = %reference.name, "resolving API key secret");
        let found = self
            .secrets
            .read(ns, &reference.name)
            .await?
            .ok_or_else(|| CredentialError::SecretNotFound {
                namespace: ns.to_string(),
                name: reference.name.clone(),
            })?;
        let field = |key: &'static str| {
            secret_value(&found, key).ok_or_else(|| CredentialError::MissingKey {
                namespace: ns.to_string(),
                name: reference.name.clone(),
                key,
            })
        };
        Ok(Credentials {
            org_id: field(KEY_ORG_ID)?,
            public_key: field(KEY_PUBLIC_KEY)?,
            private_key: field(KEY_PRIVATE_KEY)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySecrets;
    use k8s_openapi::api::core::v1::Secret;
    use std::collections::BTreeMap;

    fn key_secret(ns: &str, name: &str, with_private: bool) -> Secret {
        let mut s = Secret::default();
        s.metadata.name = Some(name.into());
        s.metadata.namespace = Some(ns.into());
        let mut data = BTreeMap::from([
            (KEY_ORG_ID.to_string(), "org".to_string()),
            (KEY_PUBLIC_KEY.to_string(), "pub".to_string()),
        ]);
        if with_private {
            data.insert(KEY_PRIVATE_KEY.to_string(), "priv".to_string());
        }
        s.string_data = Some(data);
        s
    }

    fn resolver(secrets: &MemorySecrets) -> SecretCredentialResolver {
        SecretCredentialResolver::new(
            Arc::new(secrets.clone()),
            SecretRef {
                name: "global".into(),
                namespace: Some("system".into()),
            },
        )
    }

    #[tokio::test]
    async fn falls_back_to_the_global_secret() {
        let secrets = MemorySecrets::new();
        secrets.insert(key_secret("system", "global", true)).await;
        let creds = resolver(&secrets).resolve("team-a", None).await.unwrap();
        assert_eq!(creds.org_id, "org");
        assert_eq!(creds.private_key, "priv");
    }

    #[tokio::test]
    async fn resource_secret_defaults_to_resource_namespace() {
        let secrets = MemorySecrets::new();
        secrets.insert(key_secret("team-a", "mine", true)).await;
        let r = SecretRef {
            name: "mine".into(),
            namespace: None,
        };
        assert!(resolver(&secrets).resolve("team-a", Some(&r)).await.is_ok());
        let err = resolver(&secrets).resolve("team-b", Some(&r)).await.unwrap_err();
        assert!(matches!(err, CredentialError::SecretNotFound { .. }));
    }

    #[tokio::test]
    async fn incomplete_secret_is_rejected() {
        let secrets = MemorySecrets::new();
        secrets.insert(key_secret("system", "global", false)).await;
        let err = resolver(&secrets).resolve("x", None).await.unwrap_err();
        assert!(matches!(
            err,
            CredentialError::MissingKey {
                key: KEY_PRIVATE_KEY,
                ..
            }
        ));
    }
}
