//! Connection secrets: one Secret per (deployment, database user) pair
//! holding the credentials and connection strings an application needs.

use std::collections::BTreeMap;

use dbaas_provider::ConnectionStrings;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::api::ObjectMeta;
use tracing::debug;

use crate::controller::finalizer::CleanupError;
use crate::crd::{LABEL_DEPLOYMENT, LABEL_PROJECT, LABEL_TYPE, LABEL_USER, TYPE_CONNECTION};
use crate::store::SecretAccess;

pub const KEY_USERNAME: &str = "username";
pub const KEY_PASSWORD: &str = "password";
pub const KEY_STANDARD: &str = "connectionStringStandard";
pub const KEY_STANDARD_SRV: &str = "connectionStringStandardSrv";

const MAX_NAME_LEN: usize = 63;

/// Lowercase DNS-label form: anything outside `[a-z0-9-]` becomes `-`,
/// runs collapse, and the result is trimmed to 63 characters.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_alphanumeric() { c } else { '-' };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    let mut out: String = out.trim_matches('-').chars().take(MAX_NAME_LEN).collect();
    while out.ends_with('-') {
        out.pop();
    }
    out
}

pub fn secret_name(project_id: &str, deployment: &str, username: &str) -> String {
    normalize(&format!("{project_id}-{deployment}-{username}"))
}

/// Selector for every connection secret of one user.
pub fn user_selector(project_id: &str, username: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_TYPE.to_string(), TYPE_CONNECTION.to_string()),
        (LABEL_PROJECT.to_string(), normalize(project_id)),
        (LABEL_USER.to_string(), normalize(username)),
    ])
}

/// Selector for every connection secret pointing at one deployment.
pub fn deployment_selector(project_id: &str, deployment: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_TYPE.to_string(), TYPE_CONNECTION.to_string()),
        (LABEL_PROJECT.to_string(), normalize(project_id)),
        (LABEL_DEPLOYMENT.to_string(), normalize(deployment)),
    ])
}

pub struct ConnectionData<'a> {
    pub namespace: &'a str,
    pub project_id: &'a str,
    pub deployment: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub strings: Option<&'a ConnectionStrings>,
}

pub fn build(data: &ConnectionData<'_>) -> Secret {
    let mut labels = user_selector(data.project_id, data.username);
    labels.insert(LABEL_DEPLOYMENT.to_string(), normalize(data.deployment));

    let mut entries = BTreeMap::from([
        (KEY_USERNAME.to_string(), ByteString(data.username.as_bytes().to_vec())),
        (KEY_PASSWORD.to_string(), ByteString(data.password.as_bytes().to_vec())),
    ]);
    if let Some(s) = data.strings {
        if let Some(std) = &s.standard {
            entries.insert(KEY_STANDARD.to_string(), ByteString(std.as_bytes().to_vec()));
        }
        if let Some(srv) = &s.standard_srv {
            entries.insert(KEY_STANDARD_SRV.to_string(), ByteString(srv.as_bytes().to_vec()));
        }
    }

    Secret {
        metadata: ObjectMeta {
            name: Some(secret_name(data.project_id, data.deployment, data.username)),
            namespace: Some(data.namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        data: Some(entries),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Deletes every secret matching `selector`, then fails if any is still
/// there.
pub async fn purge(
    secrets: &dyn SecretAccess,
    namespace: &str,
    selector: &BTreeMap<String, String>,
) -> Result<(), CleanupError> {
    for s in secrets.list(namespace, selector).await? {
        debug!(secret = %s.name_any(), "deleting connection secret");
        secrets.delete(namespace, &s.name_any()).await?;
    }
    let left: Vec<String> = secrets
        .list(namespace, selector)
        .await?
        .iter()
        .map(ResourceExt::name_any)
        .collect();
    if left.is_empty() {
        Ok(())
    } else {
        Err(CleanupError::DependentsRemain(format!(
            "connection secrets still present: {}",
            left.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySecrets;

    #[test]
    fn names_are_dns_labels() {
        assert_eq!(secret_name("P1", "Cluster0", "app@corp.io"), "p1-cluster0-app-corp-io");
        assert_eq!(normalize("--a__b--"), "a-b");
        let long = normalize(&"x".repeat(100));
        assert_eq!(long.len(), 63);
    }

    #[tokio::test]
    async fn purge_reports_survivors() {
        let secrets = MemorySecrets::new();
        let data = ConnectionData {
            namespace: "ns",
            project_id: "p1",
            deployment: "c0",
            username: "app",
            password: "pw",
            strings: None,
        };
        let s = secrets.apply(&build(&data)).await.unwrap();
        secrets.hold("ns", &s.name_any()).await;

        let sel = deployment_selector("p1", "c0");
        let err = purge(&secrets, "ns", &sel).await.unwrap_err();
        assert!(err.to_string().contains("p1-c0-app"));

        secrets.release("ns", &s.name_any()).await;
        purge(&secrets, "ns", &sel).await.unwrap();
        assert!(secrets.names("ns").await.is_empty());
    }
}
