//! Custom zone mapping and managed namespaces of a GEOSHARDED cluster.

use std::collections::BTreeMap;

use dbaas_provider::{GlobalCluster, ManagedNamespace, ProviderClient, ZoneMapping};
use tracing::info;

use crate::controller::dispatcher::RunContext;
use crate::controller::retry::provider_failure;
use crate::controller::workflow::{WorkflowResult, aggregate, reason};
use crate::crd::deployment::{ManagedNamespaceStatus, ProvisionedSpec};
use crate::sync::diff;

pub const NS_APPLIED: &str = "APPLIED";
pub const NS_FAILED: &str = "FAILED";

pub struct GlobalOutcome {
    pub zone_mapping: Option<WorkflowResult>,
    pub managed_namespaces: Option<WorkflowResult>,
}

pub async fn sync(
    provider: &dyn ProviderClient,
    run: &RunContext,
    project_id: &str,
    spec: &ProvisionedSpec,
    zone_status: &mut Option<BTreeMap<String, String>>,
    ns_status: &mut Vec<ManagedNamespaceStatus>,
) -> GlobalOutcome {
    if spec.cluster_type != "GEOSHARDED" {
        *zone_status = None;
        ns_status.clear();
        return GlobalOutcome {
            zone_mapping: None,
            managed_namespaces: None,
        };
    }
    let observed = match provider.get_global_cluster(project_id, &spec.name).await {
        Ok(g) => g,
        Err(e) => {
            let r = provider_failure(
                &e,
                reason::ZONE_MAPPING_FAILED,
                "reading global cluster settings",
                &run.backoff,
            );
            return GlobalOutcome {
                zone_mapping: Some(r.clone()),
                managed_namespaces: Some(r),
            };
        }
    };
    GlobalOutcome {
        zone_mapping: zone_mapping(provider, run, project_id, spec, &observed, zone_status).await,
        managed_namespaces: managed_namespaces(provider, run, project_id, spec, &observed, ns_status)
            .await,
    }
}

/// The provider only accepts the full mapping set, so any difference
/// replaces all of it.
async fn zone_mapping(
    provider: &dyn ProviderClient,
    run: &RunContext,
    project_id: &str,
    spec: &ProvisionedSpec,
    observed: &GlobalCluster,
    status: &mut Option<BTreeMap<String, String>>,
) -> Option<WorkflowResult> {
    if spec.custom_zone_mapping.is_empty() && observed.custom_zone_mapping.is_empty() {
        *status = None;
        return None;
    }
    let desired: Vec<ZoneMapping> = spec.custom_zone_mapping.iter().map(ZoneMapping::from).collect();
    let plan = diff(
        &desired,
        &observed.custom_zone_mapping,
        |d| d.location.clone(),
        |o| o.location.clone(),
        |d, o| d.zone == o.zone,
    );
    if !plan.is_noop() {
        let call = if desired.is_empty() {
            provider.delete_zone_mappings(project_id, &spec.name).await
        } else {
            provider
                .replace_zone_mappings(project_id, &spec.name, &desired)
                .await
                .map(|_| ())
        };
        if let Err(e) = call {
            return Some(provider_failure(
                &e,
                reason::ZONE_MAPPING_FAILED,
                "applying custom zone mapping",
                &run.backoff,
            ));
        }
        info!(mappings = desired.len(), "custom zone mapping applied");
    }
    *status = (!desired.is_empty()).then(|| {
        desired
            .iter()
            .map(|z| (z.location.clone(), z.zone.clone()))
            .collect()
    });
    Some(WorkflowResult::ok())
}

fn ns_key(db: &str, collection: &str) -> String {
    format!("{db}.{collection}")
}

/// Managed namespaces cannot be modified in place; a changed definition is
/// dropped and created again. Each namespace reports its own status so one
/// failing entry does not hide the others.
async fn managed_namespaces(
    provider: &dyn ProviderClient,
    run: &RunContext,
    project_id: &str,
    spec: &ProvisionedSpec,
    observed: &GlobalCluster,
    status: &mut Vec<ManagedNamespaceStatus>,
) -> Option<WorkflowResult> {
    if spec.managed_namespaces.is_empty() && observed.managed_namespaces.is_empty() {
        status.clear();
        return None;
    }
    let cluster = spec.name.as_str();
    let desired: Vec<ManagedNamespace> =
        spec.managed_namespaces.iter().map(ManagedNamespace::from).collect();
    let plan = diff(
        &desired,
        &observed.managed_namespaces,
        |d| ns_key(&d.db, &d.collection),
        |o| ns_key(&o.db, &o.collection),
        |d, o| d == o,
    );

    let mut results = Vec::new();
    let mut entries = Vec::new();
    let mut record = |key: String, r: WorkflowResult| {
        entries.push(ManagedNamespaceStatus {
            namespace: key,
            status: if r.is_ok() { NS_APPLIED } else { NS_FAILED }.to_string(),
            message: (!r.is_ok()).then(|| r.message().to_string()),
        });
        results.push(r);
    };

    for (key, o) in &plan.to_delete {
        if let Err(e) = provider
            .delete_managed_namespace(project_id, cluster, &o.db, &o.collection)
            .await
        {
            if !e.is_not_found() {
                record(
                    key.clone(),
                    provider_failure(
                        &e,
                        reason::MANAGED_NAMESPACES_FAILED,
                        &format!("deleting managed namespace {key}"),
                        &run.backoff,
                    ),
                );
            }
        }
    }

    for (key, (d, o)) in &plan.to_update {
        let r = match provider
            .delete_managed_namespace(project_id, cluster, &o.db, &o.collection)
            .await
        {
            Ok(()) => create(provider, run, project_id, cluster, d).await,
            Err(e) => provider_failure(
                &e,
                reason::MANAGED_NAMESPACES_FAILED,
                &format!("replacing managed namespace {key}"),
                &run.backoff,
            ),
        };
        record(key.clone(), r);
    }

    for d in &plan.to_create {
        let r = create(provider, run, project_id, cluster, d).await;
        record(ns_key(&d.db, &d.collection), r);
    }

    for key in plan.to_reconcile_status_only.keys() {
        record(key.clone(), WorkflowResult::ok());
    }

    drop(record);
    entries.sort_by(|a, b| a.namespace.cmp(&b.namespace));
    *status = entries;
    Some(aggregate(results))
}

async fn create(
    provider: &dyn ProviderClient,
    run: &RunContext,
    project_id: &str,
    cluster: &str,
    ns: &ManagedNamespace,
) -> WorkflowResult {
    match provider.create_managed_namespace(project_id, cluster, ns).await {
        Ok(_) => {
            info!(namespace = %ns_key(&ns.db, &ns.collection), "managed namespace created");
            WorkflowResult::ok()
        }
        Err(e) => provider_failure(
            &e,
            reason::MANAGED_NAMESPACES_FAILED,
            &format!("creating managed namespace {}", ns_key(&ns.db, &ns.collection)),
            &run.backoff,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::retry::{Backoff, PollIntervals};
    use crate::crd::deployment::{ManagedNamespaceSpec, ZoneMappingSpec};
    use dbaas_provider::memory::MemoryProvider;
    use std::sync::Arc;

    fn geo() -> ProvisionedSpec {
        ProvisionedSpec {
            name: "geo0".into(),
            cluster_type: "GEOSHARDED".into(),
            custom_zone_mapping: vec![ZoneMappingSpec {
                location: "US".into(),
                zone: "Zone 1".into(),
            }],
            managed_namespaces: vec![
                ManagedNamespaceSpec {
                    db: "app".into(),
                    collection: "orders".into(),
                    custom_shard_key: Some("location".into()),
                    ..Default::default()
                },
                ManagedNamespaceSpec {
                    db: "app".into(),
                    collection: "users".into(),
                    custom_shard_key: Some("location".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    fn run(p: &MemoryProvider) -> RunContext {
        RunContext::new(Some(Arc::new(p.clone())), PollIntervals::default(), Backoff::default())
    }

    #[tokio::test]
    async fn applies_once_then_idles() {
        let provider = MemoryProvider::new();
        let run = run(&provider);
        let mut zones = None;
        let mut nss = Vec::new();

        let out = sync(&provider, &run, "p1", &geo(), &mut zones, &mut nss).await;
        assert!(out.zone_mapping.unwrap().is_ok());
        assert!(out.managed_namespaces.unwrap().is_ok());
        assert_eq!(provider.mutation_count("replace_zone_mappings").await, 1);
        assert_eq!(provider.mutation_count("create_managed_namespace").await, 2);
        assert_eq!(zones.as_ref().and_then(|z| z.get("US")).map(String::as_str), Some("Zone 1"));

        provider.clear_mutations().await;
        sync(&provider, &run, "p1", &geo(), &mut zones, &mut nss).await;
        assert!(provider.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn one_failing_namespace_keeps_the_other() {
        let provider = MemoryProvider::new();
        provider.fail_next("create_managed_namespace", 400).await;
        let run = run(&provider);
        let mut zones = None;
        let mut nss = Vec::new();

        let out = sync(&provider, &run, "p1", &geo(), &mut zones, &mut nss).await;
        let r = out.managed_namespaces.unwrap();
        assert!(r.is_terminate());
        assert_eq!(r.reason(), reason::MANAGED_NAMESPACES_FAILED);
        let states: Vec<_> = nss.iter().map(|n| n.status.as_str()).collect();
        assert_eq!(states, vec![NS_FAILED, NS_APPLIED]);
    }

    #[tokio::test]
    async fn other_cluster_types_are_skipped() {
        let provider = MemoryProvider::new();
        let run = run(&provider);
        let mut spec = geo();
        spec.cluster_type = "REPLICASET".into();
        let mut zones = Some(BTreeMap::new());
        let mut nss = Vec::new();
        let out = sync(&provider, &run, "p1", &spec, &mut zones, &mut nss).await;
        assert!(out.zone_mapping.is_none() && out.managed_namespaces.is_none());
        assert!(zones.is_none());
        assert!(provider.mutations().await.is_empty());
    }
}
