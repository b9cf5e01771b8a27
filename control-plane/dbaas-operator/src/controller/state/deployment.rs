use dbaas_provider::{
    Deployment, DeploymentKind, RegionConfig, ServerlessProviderSettings, Tag,
};

use crate::controller::retry::{PollIntervals, PollState};
use crate::controller::workflow::{WorkflowResult, reason};
use crate::crd::DatabaseDeploymentSpec;
use crate::crd::deployment::{ProvisionedSpec, ServerlessSpec, TagSpec};

use super::Lifecycle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentState {
    Idle,
    Creating,
    Updating,
    Repairing,
    Deleting,
    Deleted,
    Unknown(String),
}

impl DeploymentState {
    pub fn parse(state_name: &str) -> Self {
        match state_name {
            "IDLE" => DeploymentState::Idle,
            "CREATING" => DeploymentState::Creating,
            "UPDATING" => DeploymentState::Updating,
            "REPAIRING" => DeploymentState::Repairing,
            "DELETING" => DeploymentState::Deleting,
            "DELETED" => DeploymentState::Deleted,
            other => DeploymentState::Unknown(other.to_string()),
        }
    }
}

/// Maps provider state names onto a [`Lifecycle`].
pub trait LifecycleStateMachine {
    fn kind(&self) -> DeploymentKind;

    /// Human name used in condition messages.
    fn noun(&self) -> &'static str;

    /// Poll state for a transitional provider state, `None` when the state
    /// is not transitional for this variant.
    fn poll_state(&self, state: &DeploymentState) -> Option<PollState> {
        match state {
            DeploymentState::Creating => Some(PollState::Creating),
            DeploymentState::Updating => Some(PollState::Updating),
            DeploymentState::Repairing => Some(PollState::Repairing),
            _ => None,
        }
    }

    fn classify(&self, state_name: &str, polls: &PollIntervals) -> Lifecycle {
        let state = DeploymentState::parse(state_name);
        match state {
            DeploymentState::Idle => Lifecycle::Quiescent,
            DeploymentState::Deleting | DeploymentState::Deleted => Lifecycle::Gone,
            ref s => match self.poll_state(s) {
                Some(poll) => {
                    let why = match poll {
                        PollState::Creating => reason::DEPLOYMENT_CREATING,
                        PollState::Repairing => reason::DEPLOYMENT_REPAIRING,
                        _ => reason::DEPLOYMENT_UPDATING,
                    };
                    Lifecycle::Transitional(WorkflowResult::in_progress(
                        why,
                        format!("{} is {}", self.noun(), state_name),
                        polls.interval(poll),
                    ))
                }
                None => Lifecycle::Unrecognized(WorkflowResult::terminate(
                    reason::DEPLOYMENT_UNKNOWN_STATE,
                    format!("{} reports unknown state '{}'", self.noun(), state_name),
                )),
            },
        }
    }
}

impl LifecycleStateMachine for ProvisionedSpec {
    fn kind(&self) -> DeploymentKind {
        DeploymentKind::Provisioned
    }
    fn noun(&self) -> &'static str {
        "cluster"
    }
}

impl LifecycleStateMachine for ServerlessSpec {
    fn kind(&self) -> DeploymentKind {
        DeploymentKind::Serverless
    }
    fn noun(&self) -> &'static str {
        "serverless instance"
    }
    // serverless instances are never repaired in place
    fn poll_state(&self, state: &DeploymentState) -> Option<PollState> {
        match state {
            DeploymentState::Creating => Some(PollState::Creating),
            DeploymentState::Updating => Some(PollState::Updating),
            _ => None,
        }
    }
}

/// The one deployment flavour a resource declares.
#[derive(Debug, Clone, Copy)]
pub enum DeploymentVariant<'a> {
    Provisioned(&'a ProvisionedSpec),
    Serverless(&'a ServerlessSpec),
}

impl<'a> DeploymentVariant<'a> {
    pub fn from_spec(spec: &'a DatabaseDeploymentSpec) -> Result<Self, String> {
        match (&spec.deployment_spec, &spec.serverless_spec) {
            (Some(p), None) => Ok(DeploymentVariant::Provisioned(p)),
            (None, Some(s)) => Ok(DeploymentVariant::Serverless(s)),
            (Some(_), Some(_)) => Err(
                "deploymentSpec and serverlessSpec are mutually exclusive".to_string(),
            ),
            (None, None) => {
                Err("one of deploymentSpec or serverlessSpec is required".to_string())
            }
        }
    }

    fn machine(&self) -> &'a dyn LifecycleStateMachine {
        match *self {
            DeploymentVariant::Provisioned(p) => p,
            DeploymentVariant::Serverless(s) => s,
        }
    }

    pub fn name(&self) -> &'a str {
        match *self {
            DeploymentVariant::Provisioned(p) => &p.name,
            DeploymentVariant::Serverless(s) => &s.name,
        }
    }

    pub fn kind(&self) -> DeploymentKind {
        self.machine().kind()
    }

    pub fn noun(&self) -> &'static str {
        self.machine().noun()
    }

    pub fn classify(&self, state_name: &str, polls: &PollIntervals) -> Lifecycle {
        self.machine().classify(state_name, polls)
    }

    pub fn termination_protected(&self) -> bool {
        match self {
            DeploymentVariant::Provisioned(p) => p.termination_protection_enabled,
            DeploymentVariant::Serverless(s) => s.termination_protection_enabled,
        }
    }

    pub fn to_remote(&self) -> Deployment {
        match self {
            DeploymentVariant::Provisioned(p) => Deployment {
                name: p.name.clone(),
                cluster_type: Some(p.cluster_type.clone()),
                mongo_db_major_version: p.mongo_db_major_version.clone(),
                regions: p.regions.iter().map(Into::into).collect(),
                disk_size_gb: p.disk_size_gb,
                paused: p.paused,
                termination_protection_enabled: p.termination_protection_enabled,
                tags: p.tags.iter().map(Into::into).collect(),
                ..Default::default()
            },
            DeploymentVariant::Serverless(s) => Deployment {
                name: s.name.clone(),
                provider_settings: Some(ServerlessProviderSettings {
                    backing_provider_name: s.provider_settings.backing_provider_name.clone(),
                    provider_name: "SERVERLESS".to_string(),
                    region_name: s.provider_settings.region_name.clone(),
                }),
                termination_protection_enabled: s.termination_protection_enabled,
                tags: s.tags.iter().map(Into::into).collect(),
                ..Default::default()
            },
        }
    }

    /// True when a declared attribute differs from what the provider
    /// reports. Attributes left unset in the spec are not compared.
    pub fn needs_update(&self, observed: &Deployment) -> bool {
        match self {
            DeploymentVariant::Provisioned(p) => {
                observed.cluster_type.as_deref() != Some(p.cluster_type.as_str())
                    || differs(&p.mongo_db_major_version, &observed.mongo_db_major_version)
                    || (!p.regions.is_empty()
                        && p.regions
                            .iter()
                            .map(RegionConfig::from)
                            .collect::<Vec<_>>()
                            != observed.regions)
                    || differs(&p.disk_size_gb, &observed.disk_size_gb)
                    || differs(&p.paused, &observed.paused)
                    || p.termination_protection_enabled
                        != observed.termination_protection_enabled
                    || !same_tags(&p.tags, &observed.tags)
            }
            DeploymentVariant::Serverless(s) => {
                s.termination_protection_enabled != observed.termination_protection_enabled
                    || !same_tags(&s.tags, &observed.tags)
            }
        }
    }
}

fn differs<T: PartialEq>(desired: &Option<T>, observed: &Option<T>) -> bool {
    desired.is_some() && desired != observed
}

fn same_tags(desired: &[TagSpec], observed: &[Tag]) -> bool {
    let mut want: Vec<(&str, &str)> = desired
        .iter()
        .map(|t| (t.key.as_str(), t.value.as_str()))
        .collect();
    let mut have: Vec<(&str, &str)> = observed
        .iter()
        .map(|t| (t.key.as_str(), t.value.as_str()))
        .collect();
    want.sort_unstable();
    have.sort_unstable();
    want == have
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::deployment::{RegionSpec, ServerlessProviderSpec};

    fn provisioned() -> ProvisionedSpec {
        ProvisionedSpec {
            name: "c0".into(),
            cluster_type: "REPLICASET".into(),
            regions: vec![RegionSpec {
                provider_name: "AWS".into(),
                region_name: "US_EAST_1".into(),
                instance_size: Some("M10".into()),
                node_count: Some(3),
                ..Default::default()
            }],
            tags: vec![
                TagSpec { key: "team".into(), value: "a".into() },
                TagSpec { key: "env".into(), value: "dev".into() },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn states_map_onto_lifecycle() {
        let p = provisioned();
        let polls = PollIntervals::default();
        assert_eq!(p.classify("IDLE", &polls), Lifecycle::Quiescent);
        assert_eq!(p.classify("DELETED", &polls), Lifecycle::Gone);
        match p.classify("UPDATING", &polls) {
            Lifecycle::Transitional(r) => {
                assert_eq!(r.reason(), reason::DEPLOYMENT_UPDATING);
                assert_eq!(r.requeue_after(), Some(polls.interval(PollState::Updating)));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(p.classify("MELTING", &polls), Lifecycle::Unrecognized(r) if r.is_terminate()));
    }

    #[test]
    fn serverless_has_no_repairing_state() {
        let s = ServerlessSpec::default();
        let polls = PollIntervals::default();
        assert!(matches!(s.classify("REPAIRING", &polls), Lifecycle::Unrecognized(_)));
        assert!(matches!(s.classify("CREATING", &polls), Lifecycle::Transitional(_)));
    }

    #[test]
    fn exactly_one_variant_is_required() {
        let mut spec = DatabaseDeploymentSpec {
            project_id: "p".into(),
            connection_secret: None,
            backup_schedule_ref: None,
            deployment_spec: None,
            serverless_spec: None,
        };
        assert!(DeploymentVariant::from_spec(&spec).is_err());
        spec.deployment_spec = Some(provisioned());
        assert!(matches!(
            DeploymentVariant::from_spec(&spec),
            Ok(DeploymentVariant::Provisioned(_))
        ));
        spec.serverless_spec = Some(ServerlessSpec {
            name: "s".into(),
            provider_settings: ServerlessProviderSpec {
                backing_provider_name: "AWS".into(),
                region_name: "US_EAST_1".into(),
            },
            ..Default::default()
        });
        assert!(DeploymentVariant::from_spec(&spec).is_err());
    }

    #[test]
    fn tag_order_does_not_trigger_updates() {
        let p = provisioned();
        let v = DeploymentVariant::Provisioned(&p);
        let mut observed = v.to_remote();
        observed.tags.reverse();
        observed.state_name = "IDLE".into();
        observed.mongo_db_version = Some("7.0.2".into());
        assert!(!v.needs_update(&observed));

        observed.termination_protection_enabled = true;
        assert!(v.needs_update(&observed));
    }
}
