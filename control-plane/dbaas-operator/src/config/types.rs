use std::time::Duration;

use envconfig::Envconfig;

use crate::controller::dispatcher::{DispatchSettings, ProviderRestrictions};
use crate::controller::retry::{Backoff, PollIntervals, PollState};
use crate::crd::SecretRef;

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    #[envconfig(from = "DBAAS_OPERATOR_PROFILE", default = "dev")]
    pub profile: String,

    #[envconfig(from = "HTTP_PORT", default = "8088")]
    pub http_port: u16,

    /// Restrict watches to one namespace; all namespaces when unset.
    /// Env: DBAAS_OPERATOR_WATCH_NAMESPACE
    #[envconfig(from = "DBAAS_OPERATOR_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Concurrent reconciles per kind (profile default: 2 in dev, 8 in prod)
    /// Env: DBAAS_OPERATOR_WORKERS
    #[envconfig(from = "DBAAS_OPERATOR_WORKERS")]
    pub workers: Option<usize>,

    /// Requeue delay for settled or terminated resources
    #[envconfig(from = "DBAAS_OPERATOR_RESYNC_PERIOD_SECS", default = "900")]
    pub resync_period_secs: u64,

    #[envconfig(from = "DBAAS_OPERATOR_RECONCILE_TIMEOUT_SECS", default = "120")]
    pub reconcile_timeout_secs: u64,

    /// Keep remote resources on deletion unless a resource opts out
    /// (profile default: false in dev, true in prod)
    /// Env: DBAAS_OPERATOR_DELETION_PROTECTION
    #[envconfig(from = "DBAAS_OPERATOR_DELETION_PROTECTION")]
    pub deletion_protection: Option<bool>,

    #[envconfig(
        from = "DBAAS_OPERATOR_GLOBAL_SECRET_NAME",
        default = "dbaas-operator-api-key"
    )]
    pub global_secret_name: String,

    #[envconfig(
        from = "DBAAS_OPERATOR_GLOBAL_SECRET_NAMESPACE",
        default = "dbaas-system"
    )]
    pub global_secret_namespace: String,

    #[envconfig(nested)]
    pub provider: ProviderConfig,

    #[envconfig(nested)]
    pub retry: RetryConfig,

    #[envconfig(nested)]
    pub poll: PollConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ProviderConfig {
    #[envconfig(
        from = "DBAAS_OPERATOR_PROVIDER_URL",
        default = "https://cloud.mongodb.com"
    )]
    pub base_url: String,
    #[envconfig(from = "DBAAS_OPERATOR_PROVIDER_TIMEOUT_SECS", default = "30")]
    pub request_timeout_secs: u64,
    /// Government cloud: serverless deployments and search indexes are
    /// not offered there.
    #[envconfig(from = "DBAAS_OPERATOR_CLOUD_GOV", default = "false")]
    pub cloud_gov: bool,
}

#[derive(Envconfig, Clone, Debug)]
pub struct RetryConfig {
    #[envconfig(from = "DBAAS_OPERATOR_BACKOFF_BASE_MS", default = "2000")]
    pub backoff_base_ms: u64,
    #[envconfig(from = "DBAAS_OPERATOR_BACKOFF_MAX_SECS", default = "300")]
    pub backoff_max_secs: u64,
}

/// Poll intervals per transitional state, in seconds.
#[derive(Envconfig, Clone, Debug)]
pub struct PollConfig {
    #[envconfig(from = "DBAAS_OPERATOR_POLL_CREATING_SECS", default = "30")]
    pub creating_secs: u64,
    #[envconfig(from = "DBAAS_OPERATOR_POLL_UPDATING_SECS", default = "15")]
    pub updating_secs: u64,
    #[envconfig(from = "DBAAS_OPERATOR_POLL_REPAIRING_SECS", default = "30")]
    pub repairing_secs: u64,
    #[envconfig(from = "DBAAS_OPERATOR_POLL_SEARCH_INDEX_SECS", default = "10")]
    pub search_index_secs: u64,
    #[envconfig(from = "DBAAS_OPERATOR_POLL_SEARCH_NODES_SECS", default = "30")]
    pub search_nodes_secs: u64,
    #[envconfig(
        from = "DBAAS_OPERATOR_POLL_PRIVATE_ENDPOINT_SECS",
        default = "10"
    )]
    pub private_endpoint_secs: u64,
    #[envconfig(from = "DBAAS_OPERATOR_POLL_DEPENDENCY_SECS", default = "10")]
    pub dependency_secs: u64,
}

impl OperatorConfig {
    /// Apply profile → defaults mapping, while respecting explicit env overrides.
    ///
    /// Rules:
    /// - dev: workers=2, deletion_protection=false
    /// - prod: workers=8, deletion_protection=true
    pub fn apply_profile_defaults(mut self) -> Self {
        let (def_workers, def_protection) = match self.profile.as_str() {
            "prod" | "production" => (8, true),
            _ /* dev */ => (2, false),
        };
        if self.workers.is_none() {
            self.workers = Some(def_workers);
        }
        if self.deletion_protection.is_none() {
            self.deletion_protection = Some(def_protection);
        }
        self
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or(2).max(1)
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    pub fn global_secret(&self) -> SecretRef {
        SecretRef {
            name: self.global_secret_name.clone(),
            namespace: Some(self.global_secret_namespace.clone()),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.retry.backoff_base_ms),
            Duration::from_secs(self.retry.backoff_max_secs),
        )
    }

    pub fn poll_intervals(&self) -> PollIntervals {
        let p = &self.poll;
        PollIntervals::new(Duration::from_secs(p.dependency_secs))
            .with(PollState::Creating, Duration::from_secs(p.creating_secs))
            .with(PollState::Updating, Duration::from_secs(p.updating_secs))
            .with(PollState::Repairing, Duration::from_secs(p.repairing_secs))
            .with(
                PollState::SearchIndexPending,
                Duration::from_secs(p.search_index_secs),
            )
            .with(
                PollState::SearchNodesPending,
                Duration::from_secs(p.search_nodes_secs),
            )
            .with(
                PollState::PrivateEndpointPending,
                Duration::from_secs(p.private_endpoint_secs),
            )
            .with(
                PollState::DependencyPending,
                Duration::from_secs(p.dependency_secs),
            )
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            deletion_protection: self.deletion_protection.unwrap_or(false),
            restrictions: ProviderRestrictions {
                cloud_gov: self.provider.cloud_gov,
            },
            backoff: self.backoff(),
            polls: self.poll_intervals(),
            operator_version: crate::OPERATOR_VERSION.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(profile: &str) -> OperatorConfig {
        OperatorConfig {
            profile: profile.to_string(),
            http_port: 8088,
            watch_namespace: None,
            workers: None,
            resync_period_secs: 900,
            reconcile_timeout_secs: 120,
            deletion_protection: None,
            global_secret_name: "dbaas-operator-api-key".into(),
            global_secret_namespace: "dbaas-system".into(),
            provider: ProviderConfig {
                base_url: "https://cloud.mongodb.com".into(),
                request_timeout_secs: 30,
                cloud_gov: false,
            },
            retry: RetryConfig {
                backoff_base_ms: 2000,
                backoff_max_secs: 300,
            },
            poll: PollConfig {
                creating_secs: 30,
                updating_secs: 15,
                repairing_secs: 30,
                search_index_secs: 10,
                search_nodes_secs: 30,
                private_endpoint_secs: 10,
                dependency_secs: 10,
            },
        }
    }

    #[test]
    fn profile_defaults_dev() {
        let cfg = base("dev").apply_profile_defaults();
        assert_eq!(cfg.workers, Some(2));
        assert_eq!(cfg.deletion_protection, Some(false));
    }

    #[test]
    fn profile_defaults_prod() {
        for p in ["prod", "production"] {
            let cfg = base(p).apply_profile_defaults();
            assert_eq!(cfg.workers, Some(8));
            assert_eq!(cfg.deletion_protection, Some(true));
        }
    }

    #[test]
    fn profile_defaults_respect_env_overrides() {
        let mut cfg = base("prod");
        cfg.deletion_protection = Some(false);
        let cfg = cfg.apply_profile_defaults();
        assert_eq!(cfg.deletion_protection, Some(false));
        assert_eq!(cfg.workers, Some(8));
    }

    #[test]
    fn poll_table_maps_each_state() {
        let polls = base("dev").poll_intervals();
        assert_eq!(polls.interval(PollState::Creating), Duration::from_secs(30));
        assert_eq!(polls.interval(PollState::Updating), Duration::from_secs(15));
        assert_eq!(
            polls.interval(PollState::PrivateEndpointPending),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn global_secret_points_at_operator_namespace() {
        let r = base("dev").global_secret();
        assert_eq!(r.name, "dbaas-operator-api-key");
        assert_eq!(r.namespace.as_deref(), Some("dbaas-system"));
    }
}
