//! End-to-end reconciliation against the in-memory provider and stores.

mod common;

use common::*;
use dbaas_operator::controller::handlers::connection;
use dbaas_operator::controller::workflow::reason;
use dbaas_operator::crd::deployment::{
    SearchIndexSpec, SearchNodeSpec, ServerlessPrivateEndpointSpec,
};
use dbaas_operator::crd::{ConditionStatus, ConditionType, FINALIZER, ResourceKind};
use dbaas_operator::store::SecretAccess;
use dbaas_provider::SearchIndex;
use dbaas_provider::endpoint_status;
use serde_json::json;
use std::time::Duration;

fn index(name: &str) -> SearchIndexSpec {
    SearchIndexSpec {
        name: name.into(),
        database: "app".into(),
        collection_name: "movies".into(),
        mappings: Some(json!({"dynamic": true})),
        ..Default::default()
    }
}

#[test_log::test(tokio::test)]
async fn creates_cluster_then_settles() {
    let h = Harness::new().await;
    h.deployments.put(provisioned("orders", "orders-c0")).await;

    let out = h.reconcile(ResourceKind::Deployment, "orders").await;
    assert!(out.result.is_in_progress());
    assert_eq!(out.result.reason(), reason::DEPLOYMENT_CREATING);
    assert!(out.requeue_after.is_some());
    assert_eq!(h.provider.mutation_count("create_deployment").await, 1);
    let d = h.deployment("orders").await.unwrap();
    assert!(d.metadata.finalizers.unwrap_or_default().contains(&FINALIZER.to_string()));

    h.provider
        .set_deployment_state(PROJECT, dbaas_provider::DeploymentKind::Provisioned, "orders-c0", "IDLE")
        .await;
    let out = h.reconcile(ResourceKind::Deployment, "orders").await;
    assert!(out.result.is_ok(), "{out:?}");
    assert!(out.requeue_after.is_none());
    let d = h.deployment("orders").await.unwrap();
    let ready = condition(&d, ConditionType::Ready).unwrap();
    assert_eq!(ready.status, ConditionStatus::True);
    assert_eq!(d.status.as_ref().unwrap().observed_generation, d.metadata.generation);

    // a settled resource produces no further writes
    let writes = h.deployments.status_writes().await;
    h.provider.clear_mutations().await;
    h.reconcile(ResourceKind::Deployment, "orders").await;
    assert_eq!(h.deployments.status_writes().await, writes);
    assert!(h.provider.mutations().await.is_empty());
}

#[test_log::test(tokio::test)]
async fn search_indexes_are_diffed_by_name() {
    let h = Harness::new().await;
    seed_cluster(&h.provider, "search-c0", "IDLE").await;
    h.provider
        .put_search_index(PROJECT, "search-c0", SearchIndex::from(&index("idx2")))
        .await;
    h.provider
        .put_search_index(PROJECT, "search-c0", SearchIndex::from(&index("idx3")))
        .await;

    let mut d = provisioned("search", "search-c0");
    if let Some(p) = d.spec.deployment_spec.as_mut() {
        p.search_indexes = vec![index("idx1"), index("idx2")];
    }
    h.deployments.put(d).await;

    let out = h.reconcile(ResourceKind::Deployment, "search").await;
    assert!(out.result.is_in_progress(), "{out:?}");
    assert_eq!(h.provider.mutation_count("create_search_index").await, 1);
    assert_eq!(h.provider.mutation_count("update_search_index").await, 0);
    assert_eq!(h.provider.mutation_count("delete_search_index").await, 1);

    let d = h.deployment("search").await.unwrap();
    let names: Vec<_> = d
        .status
        .unwrap()
        .search_indexes
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["idx1", "idx2"]);
}

#[test_log::test(tokio::test)]
async fn search_nodes_follow_the_declaration() {
    let h = Harness::new().await;
    seed_cluster(&h.provider, "nodes-c0", "IDLE").await;
    let mut d = provisioned("nodes", "nodes-c0");
    if let Some(p) = d.spec.deployment_spec.as_mut() {
        p.search_nodes = vec![SearchNodeSpec {
            instance_size: "S20_HIGHCPU_NVME".into(),
            node_count: 2,
        }];
    }
    h.deployments.put(d).await;

    let out = h.reconcile(ResourceKind::Deployment, "nodes").await;
    assert_eq!(out.result.reason(), reason::SEARCH_NODES_CREATING);
    let out = h.reconcile(ResourceKind::Deployment, "nodes").await;
    assert_eq!(out.result.reason(), reason::SEARCH_NODES_CREATING);
    assert_eq!(h.provider.mutation_count("create_search_nodes").await, 1);

    h.provider.set_search_nodes_state(PROJECT, "nodes-c0", "IDLE").await;
    let out = h.reconcile(ResourceKind::Deployment, "nodes").await;
    assert!(out.result.is_ok(), "{out:?}");
    let d = h.deployment("nodes").await.unwrap();
    let c = condition(&d, ConditionType::SearchNodesReady).unwrap();
    assert_eq!(c.status, ConditionStatus::True);

    let mut d = h.deployment("nodes").await.unwrap();
    if let Some(p) = d.spec.deployment_spec.as_mut() {
        p.search_nodes.clear();
    }
    h.deployments.put(d).await;
    let out = h.reconcile(ResourceKind::Deployment, "nodes").await;
    assert_eq!(out.result.reason(), reason::SEARCH_NODES_DELETING);
    assert_eq!(h.provider.mutation_count("delete_search_nodes").await, 1);

    let out = h.reconcile(ResourceKind::Deployment, "nodes").await;
    assert!(out.result.is_ok(), "{out:?}");
    let d = h.deployment("nodes").await.unwrap();
    assert!(condition(&d, ConditionType::SearchNodesReady).is_none());
}

#[test_log::test(tokio::test)]
async fn reserved_endpoint_waits_for_connection_data() {
    let h = Harness::new().await;
    let mut d = serverless("edge", "edge-sl0", "AWS");
    if let Some(s) = d.spec.serverless_spec.as_mut() {
        s.private_endpoints = vec![ServerlessPrivateEndpointSpec {
            name: "spe-1".into(),
            cloud_provider_endpoint_id: Some(String::new()),
            private_endpoint_ip_address: Some(String::new()),
        }];
    }
    h.deployments.put(d).await;
    h.provider
        .put_deployment(
            PROJECT,
            dbaas_provider::DeploymentKind::Serverless,
            dbaas_provider::Deployment {
                name: "edge-sl0".into(),
                state_name: "IDLE".into(),
                provider_settings: Some(dbaas_provider::ServerlessProviderSettings {
                    backing_provider_name: "AWS".into(),
                    provider_name: "SERVERLESS".into(),
                    region_name: "US_EAST_1".into(),
                }),
                ..Default::default()
            },
        )
        .await;

    let out = h.reconcile(ResourceKind::Deployment, "edge").await;
    assert!(out.result.is_in_progress(), "{out:?}");
    assert_eq!(h.provider.mutation_count("create_serverless_endpoint").await, 1);

    h.provider
        .set_endpoint_status(PROJECT, "edge-sl0", "spe-1", endpoint_status::RESERVED)
        .await;
    h.provider.clear_mutations().await;
    let out = h.reconcile(ResourceKind::Deployment, "edge").await;
    assert!(out.result.is_in_progress());
    assert!(h.provider.mutations().await.is_empty());

    let d = h.deployment("edge").await.unwrap();
    let c = condition(&d, ConditionType::ServerlessPrivateEndpointReady).unwrap();
    assert_eq!(c.status, ConditionStatus::False);
    assert!(
        c.message.as_deref().unwrap_or_default().contains("awaiting connection data"),
        "{c:?}"
    );
}

#[test_log::test(tokio::test)]
async fn busy_cluster_is_only_polled() {
    let h = Harness::new().await;
    seed_cluster(&h.provider, "busy-c0", "UPDATING").await;
    let mut d = provisioned("busy", "busy-c0");
    if let Some(p) = d.spec.deployment_spec.as_mut() {
        p.disk_size_gb = Some(40.0);
    }
    h.deployments.put(d).await;

    let out = h.reconcile(ResourceKind::Deployment, "busy").await;
    assert!(out.result.is_in_progress());
    assert_eq!(out.result.reason(), reason::DEPLOYMENT_UPDATING);
    assert!(h.provider.mutations().await.is_empty());

    h.provider
        .set_deployment_state(PROJECT, dbaas_provider::DeploymentKind::Provisioned, "busy-c0", "IDLE")
        .await;
    let out = h.reconcile(ResourceKind::Deployment, "busy").await;
    assert_eq!(out.result.reason(), reason::DEPLOYMENT_UPDATING);
    assert_eq!(h.provider.mutation_count("update_deployment").await, 1);
}

#[test_log::test(tokio::test)]
async fn deletion_waits_for_connection_secrets() {
    let h = Harness::new().await;
    seed_cluster(&h.provider, "gone-c0", "IDLE").await;
    h.deployments.put(provisioned("gone", "gone-c0")).await;
    let out = h.reconcile(ResourceKind::Deployment, "gone").await;
    assert!(out.result.is_ok(), "{out:?}");

    let strings = h
        .provider
        .deployment(PROJECT, dbaas_provider::DeploymentKind::Provisioned, "gone-c0")
        .await
        .and_then(|d| d.connection_strings);
    let conn = connection::build(&connection::ConnectionData {
        namespace: NS,
        project_id: PROJECT,
        deployment: "gone-c0",
        username: "app",
        password: "s3cret",
        strings: strings.as_ref(),
    });
    let conn_name = conn.metadata.name.clone().unwrap();
    h.secrets.apply(&conn).await.unwrap();
    h.secrets.hold(NS, &conn_name).await;

    h.deployments.mark_deleted(NS, "gone").await;
    let out = h.reconcile(ResourceKind::Deployment, "gone").await;
    assert!(out.result.is_in_progress(), "{out:?}");
    assert!(!out.is_transient());
    assert_eq!(out.result.reason(), reason::DEPENDENTS_NOT_CLEANED);
    assert_eq!(out.requeue_after, Some(Duration::from_secs(10)));
    let d = h.deployment("gone").await.expect("finalizer keeps the object");
    assert!(d.metadata.finalizers.unwrap_or_default().contains(&FINALIZER.to_string()));
    assert_eq!(h.provider.mutation_count("delete_deployment").await, 0);

    h.secrets.release(NS, &conn_name).await;
    let out = h.reconcile(ResourceKind::Deployment, "gone").await;
    assert!(out.result.is_ok(), "{out:?}");
    assert!(h.deployment("gone").await.is_none());
    assert!(h.secrets.get(NS, &conn_name).await.is_none());
    assert_eq!(h.provider.mutation_count("delete_deployment").await, 1);

    // nothing left to do once the object is gone
    let out = h.reconcile(ResourceKind::Deployment, "gone").await;
    assert!(out.result.is_ok());
    assert_eq!(h.provider.mutation_count("delete_deployment").await, 1);
}

#[test_log::test(tokio::test)]
async fn keep_policy_leaves_remote_cluster() {
    let h = Harness::new().await;
    seed_cluster(&h.provider, "kept-c0", "IDLE").await;
    let mut d = provisioned("kept", "kept-c0");
    d.metadata.annotations = Some(
        [("dbaas.io/resource-policy".to_string(), "keep".to_string())].into(),
    );
    h.deployments.put(d).await;
    h.reconcile(ResourceKind::Deployment, "kept").await;

    h.deployments.mark_deleted(NS, "kept").await;
    let out = h.reconcile(ResourceKind::Deployment, "kept").await;
    assert!(out.result.is_ok());
    assert!(h.deployment("kept").await.is_none());
    assert_eq!(h.provider.mutation_count("delete_deployment").await, 0);
    assert!(
        h.provider
            .deployment(PROJECT, dbaas_provider::DeploymentKind::Provisioned, "kept-c0")
            .await
            .is_some()
    );
}

#[test_log::test(tokio::test)]
async fn newer_resource_version_is_refused() {
    let h = Harness::new().await;
    let mut d = provisioned("future", "future-c0");
    d.metadata.labels = Some(
        [("dbaas.io/resource-version".to_string(), "99.0.0".to_string())].into(),
    );
    h.deployments.put(d).await;

    let out = h.reconcile(ResourceKind::Deployment, "future").await;
    assert!(out.result.is_terminate());
    assert_eq!(out.result.reason(), reason::RESOURCE_VERSION_INVALID);
    assert!(h.provider.mutations().await.is_empty());
    let d = h.deployment("future").await.unwrap();
    let c = condition(&d, ConditionType::ResourceVersionIsValid).unwrap();
    assert_eq!(c.status, ConditionStatus::False);
}

#[test_log::test(tokio::test)]
async fn missing_api_key_is_reported() {
    let h = Harness::new().await;
    let mut d = provisioned("nokey", "nokey-c0");
    d.spec.connection_secret = Some(dbaas_operator::crd::SecretRef {
        name: uniq("absent"),
        namespace: None,
    });
    h.deployments.put(d).await;

    let out = h.reconcile(ResourceKind::Deployment, "nokey").await;
    assert!(out.result.is_terminate());
    assert_eq!(out.result.reason(), reason::API_ACCESS_NOT_CONFIGURED);
    assert!(out.requeue_after.is_none());
}

#[test_log::test(tokio::test)]
async fn secret_store_outage_during_cleanup_is_retried() {
    let h = Harness::new().await;
    seed_cluster(&h.provider, "flaky-c0", "IDLE").await;
    h.deployments.put(provisioned("flaky", "flaky-c0")).await;
    h.reconcile(ResourceKind::Deployment, "flaky").await;

    h.deployments.mark_deleted(NS, "flaky").await;
    h.secrets.fail_next_lists(1).await;
    let out = h.reconcile(ResourceKind::Deployment, "flaky").await;
    assert!(out.result.is_in_progress(), "{out:?}");
    assert!(out.is_transient());
    assert_eq!(out.result.reason(), reason::DEPENDENTS_NOT_CLEANED);
    assert!(out.requeue_after.is_some());
    assert!(h.deployment("flaky").await.is_some());
    assert_eq!(h.provider.mutation_count("delete_deployment").await, 0);

    let out = h.reconcile(ResourceKind::Deployment, "flaky").await;
    assert!(out.result.is_ok(), "{out:?}");
    assert!(h.deployment("flaky").await.is_none());
    assert_eq!(h.provider.mutation_count("delete_deployment").await, 1);
}

#[test_log::test(tokio::test)]
async fn unavailable_provider_during_delete_is_retried() {
    let h = Harness::new().await;
    seed_cluster(&h.provider, "retry-c0", "IDLE").await;
    h.deployments.put(provisioned("retry", "retry-c0")).await;
    h.reconcile(ResourceKind::Deployment, "retry").await;

    h.deployments.mark_deleted(NS, "retry").await;
    h.provider.fail_next("delete_deployment", 503).await;
    let out = h.reconcile(ResourceKind::Deployment, "retry").await;
    assert!(out.result.is_in_progress(), "{out:?}");
    assert!(out.is_transient());
    assert!(out.requeue_after.is_some());
    let d = h.deployment("retry").await.expect("finalizer keeps the object");
    assert!(d.metadata.finalizers.unwrap_or_default().contains(&FINALIZER.to_string()));

    let out = h.reconcile(ResourceKind::Deployment, "retry").await;
    assert!(out.result.is_ok(), "{out:?}");
    assert!(h.deployment("retry").await.is_none());
    assert_eq!(h.provider.mutation_count("delete_deployment").await, 1);
}

#[test_log::test(tokio::test)]
async fn deletion_waits_for_transition_to_finish() {
    let h = Harness::new().await;
    seed_cluster(&h.provider, "moving-c0", "IDLE").await;
    h.deployments.put(provisioned("moving", "moving-c0")).await;
    h.reconcile(ResourceKind::Deployment, "moving").await;

    h.provider
        .set_deployment_state(PROJECT, dbaas_provider::DeploymentKind::Provisioned, "moving-c0", "UPDATING")
        .await;
    h.deployments.mark_deleted(NS, "moving").await;
    let out = h.reconcile(ResourceKind::Deployment, "moving").await;
    assert!(out.result.is_in_progress(), "{out:?}");
    assert_eq!(out.result.reason(), reason::DEPLOYMENT_UPDATING);
    assert_eq!(h.provider.mutation_count("delete_deployment").await, 0);
    let d = h.deployment("moving").await.expect("finalizer keeps the object");
    assert!(d.metadata.finalizers.unwrap_or_default().contains(&FINALIZER.to_string()));

    h.provider
        .set_deployment_state(PROJECT, dbaas_provider::DeploymentKind::Provisioned, "moving-c0", "IDLE")
        .await;
    let out = h.reconcile(ResourceKind::Deployment, "moving").await;
    assert!(out.result.is_ok(), "{out:?}");
    assert_eq!(h.provider.mutation_count("delete_deployment").await, 1);
    assert!(h.deployment("moving").await.is_none());
}

#[test_log::test(tokio::test)]
async fn recreated_endpoint_survives_next_pass() {
    let h = Harness::new().await;
    let mut d = serverless("moved", "moved-sl0", "AWS");
    if let Some(s) = d.spec.serverless_spec.as_mut() {
        s.private_endpoints = vec![ServerlessPrivateEndpointSpec {
            name: "spe-1".into(),
            cloud_provider_endpoint_id: Some("vpce-b".into()),
            private_endpoint_ip_address: None,
        }];
    }
    h.deployments.put(d).await;
    h.provider
        .put_deployment(
            PROJECT,
            dbaas_provider::DeploymentKind::Serverless,
            dbaas_provider::Deployment {
                name: "moved-sl0".into(),
                state_name: "IDLE".into(),
                provider_settings: Some(dbaas_provider::ServerlessProviderSettings {
                    backing_provider_name: "AWS".into(),
                    provider_name: "SERVERLESS".into(),
                    region_name: "US_EAST_1".into(),
                }),
                ..Default::default()
            },
        )
        .await;
    h.provider
        .put_serverless_endpoint(
            PROJECT,
            "moved-sl0",
            dbaas_provider::ServerlessPrivateEndpoint {
                name: "spe-1".into(),
                status: endpoint_status::AVAILABLE.into(),
                cloud_provider_endpoint_id: Some("vpce-a".into()),
                ..Default::default()
            },
        )
        .await;

    // connected elsewhere: delete and reserve again
    let out = h.reconcile(ResourceKind::Deployment, "moved").await;
    assert!(out.result.is_in_progress(), "{out:?}");
    assert_eq!(h.provider.mutation_count("delete_serverless_endpoint").await, 1);
    assert_eq!(h.provider.mutation_count("create_serverless_endpoint").await, 1);

    // the old copy is still DELETING; the new reservation must be left alone
    h.provider.clear_mutations().await;
    let out = h.reconcile(ResourceKind::Deployment, "moved").await;
    assert!(out.result.is_in_progress(), "{out:?}");
    assert!(h.provider.mutations().await.is_empty());
    let d = h.deployment("moved").await.unwrap();
    let entries = &d.status.as_ref().unwrap().serverless_private_endpoints;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, endpoint_status::RESERVATION_REQUESTED);

    h.provider.finish_endpoint_deletions(PROJECT, "moved-sl0").await;
    h.provider
        .set_endpoint_status(PROJECT, "moved-sl0", "spe-1", endpoint_status::RESERVED)
        .await;
    h.reconcile(ResourceKind::Deployment, "moved").await;
    assert_eq!(h.provider.mutation_count("connect_serverless_endpoint").await, 1);
    assert_eq!(h.provider.mutation_count("delete_serverless_endpoint").await, 0);
    assert_eq!(h.provider.serverless_endpoints(PROJECT, "moved-sl0").await.len(), 1);
}
