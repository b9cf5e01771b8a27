use std::collections::HashSet;
use std::hash::Hash;

use crate::crd::{BackupScheduleSpec, DatabaseDeploymentSpec, DatabaseUserSpec};

use super::state::DeploymentVariant;

/// First value seen twice, if any.
fn first_duplicate<'a, T, I>(items: I) -> Option<T>
where
    T: Eq + Hash + Clone + 'a,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    items.into_iter().find(|i| !seen.insert(i.clone()))
}

pub fn deployment(spec: &DatabaseDeploymentSpec) -> Result<(), String> {
    if spec.project_id.trim().is_empty() {
        return Err("projectId must not be empty".into());
    }
    match DeploymentVariant::from_spec(spec)? {
        DeploymentVariant::Provisioned(p) => {
            if p.name.trim().is_empty() {
                return Err("deploymentSpec.name must not be empty".into());
            }
            if let Some(k) = first_duplicate(p.tags.iter().map(|t| t.key.as_str())) {
                return Err(format!("duplicate tag key '{k}'"));
            }
            if let Some(n) = first_duplicate(p.search_indexes.iter().map(|i| i.name.as_str())) {
                return Err(format!("duplicate search index name '{n}'"));
            }
            if p.search_nodes.len() > 1 {
                return Err("searchNodes accepts a single entry".into());
            }
            if let Some(n) = p.search_nodes.iter().find(|n| !(2..=32).contains(&n.node_count)) {
                return Err(format!(
                    "searchNodes.nodeCount must be between 2 and 32, got {}",
                    n.node_count
                ));
            }
            if let Some(l) =
                first_duplicate(p.custom_zone_mapping.iter().map(|z| z.location.as_str()))
            {
                return Err(format!("duplicate custom zone mapping location '{l}'"));
            }
            if let Some((db, coll)) = first_duplicate(
                p.managed_namespaces
                    .iter()
                    .map(|n| (n.db.as_str(), n.collection.as_str())),
            ) {
                return Err(format!("duplicate managed namespace '{db}.{coll}'"));
            }
            if !p.custom_zone_mapping.is_empty() && p.cluster_type != "GEOSHARDED" {
                return Err("customZoneMapping requires clusterType GEOSHARDED".into());
            }
        }
        DeploymentVariant::Serverless(s) => {
            if s.name.trim().is_empty() {
                return Err("serverlessSpec.name must not be empty".into());
            }
            if let Some(k) = first_duplicate(s.tags.iter().map(|t| t.key.as_str())) {
                return Err(format!("duplicate tag key '{k}'"));
            }
            // repeated endpoint names are reported per entry in the
            // endpoint sub-status instead of failing the whole resource
        }
    }
    Ok(())
}

pub fn database_user(spec: &DatabaseUserSpec) -> Result<(), String> {
    if spec.username.trim().is_empty() {
        return Err("username must not be empty".into());
    }
    if spec.roles.is_empty() {
        return Err("at least one role is required".into());
    }
    if let Some(s) = first_duplicate(
        spec.scopes
            .iter()
            .map(|s| (s.name.as_str(), s.scope_type.as_str())),
    ) {
        return Err(format!("duplicate scope '{}' ({})", s.0, s.1));
    }
    if let Some(date) = &spec.delete_after_date {
        chrono::DateTime::parse_from_rfc3339(date)
            .map_err(|e| format!("deleteAfterDate '{date}' is not RFC 3339: {e}"))?;
    }
    Ok(())
}

pub fn backup_schedule(spec: &BackupScheduleSpec) -> Result<(), String> {
    if !(0..24).contains(&spec.reference_hour_of_day) {
        return Err("referenceHourOfDay must be within 0..=23".into());
    }
    if !(0..60).contains(&spec.reference_minute_of_hour) {
        return Err("referenceMinuteOfHour must be within 0..=59".into());
    }
    if spec.restore_window_days < 1 {
        return Err("restoreWindowDays must be at least 1".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::deployment::{
        ProvisionedSpec, SearchIndexSpec, SearchNodeSpec, TagSpec, ZoneMappingSpec,
    };
    use crate::crd::database_user::{RoleSpec, ScopeSpec, ScopeType};

    fn spec(p: ProvisionedSpec) -> DatabaseDeploymentSpec {
        DatabaseDeploymentSpec {
            project_id: "p1".into(),
            connection_secret: None,
            backup_schedule_ref: None,
            deployment_spec: Some(p),
            serverless_spec: None,
        }
    }

    fn cluster() -> ProvisionedSpec {
        ProvisionedSpec {
            name: "c0".into(),
            cluster_type: "REPLICASET".into(),
            ..Default::default()
        }
    }

    #[test]
    fn accepts_a_plain_cluster() {
        assert!(deployment(&spec(cluster())).is_ok());
    }

    #[test]
    fn rejects_duplicate_identities() {
        let mut p = cluster();
        p.tags = vec![
            TagSpec { key: "a".into(), value: "1".into() },
            TagSpec { key: "a".into(), value: "2".into() },
        ];
        assert!(deployment(&spec(p)).unwrap_err().contains("tag key 'a'"));

        let mut p = cluster();
        let idx = SearchIndexSpec {
            name: "i".into(),
            database: "db".into(),
            collection_name: "c".into(),
            ..Default::default()
        };
        p.search_indexes = vec![idx.clone(), idx];
        assert!(deployment(&spec(p)).unwrap_err().contains("search index"));

        let mut p = cluster();
        p.cluster_type = "GEOSHARDED".into();
        p.custom_zone_mapping = vec![
            ZoneMappingSpec { location: "US".into(), zone: "z1".into() },
            ZoneMappingSpec { location: "US".into(), zone: "z2".into() },
        ];
        assert!(deployment(&spec(p)).unwrap_err().contains("location 'US'"));
    }

    #[test]
    fn search_nodes_are_bounded() {
        let node = |count| SearchNodeSpec {
            instance_size: "S20_HIGHCPU_NVME".into(),
            node_count: count,
        };
        let mut p = cluster();
        p.search_nodes = vec![node(2)];
        assert!(deployment(&spec(p.clone())).is_ok());

        p.search_nodes = vec![node(33)];
        assert!(deployment(&spec(p.clone())).unwrap_err().contains("nodeCount"));

        p.search_nodes = vec![node(2), node(4)];
        assert!(deployment(&spec(p)).unwrap_err().contains("single entry"));
    }

    #[test]
    fn zone_mapping_needs_a_geosharded_cluster() {
        let mut p = cluster();
        p.custom_zone_mapping = vec![ZoneMappingSpec { location: "US".into(), zone: "z".into() }];
        assert!(deployment(&spec(p)).is_err());
    }

    #[test]
    fn user_scopes_and_dates_are_checked() {
        let mut u = DatabaseUserSpec {
            project_id: "p1".into(),
            connection_secret: None,
            username: "app".into(),
            database_name: "admin".into(),
            roles: vec![RoleSpec {
                role_name: "readWrite".into(),
                database_name: "app".into(),
                collection_name: None,
            }],
            scopes: vec![],
            password_secret_ref: None,
            delete_after_date: None,
        };
        assert!(database_user(&u).is_ok());
        let scope = ScopeSpec { name: "c0".into(), scope_type: ScopeType::Cluster };
        u.scopes = vec![scope.clone(), scope];
        assert!(database_user(&u).is_err());
        u.scopes.pop();
        u.delete_after_date = Some("tomorrow".into());
        assert!(database_user(&u).is_err());
    }
}
