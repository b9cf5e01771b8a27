use std::collections::HashMap;
use std::time::Duration;

use dbaas_provider::ProviderError;
use rand::Rng;

use super::workflow::{WorkflowResult, reason};

/// Exponential backoff with a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// `base * 2^attempt`, capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// [`Backoff::delay`] plus up to 10% random jitter, still capped.
    pub fn jittered(&self, attempt: u32) -> Duration {
        let d = self.delay(attempt);
        let spread = (d.as_millis() as u64) / 10;
        if spread == 0 {
            return d;
        }
        let extra = rand::rng().random_range(0..=spread);
        (d + Duration::from_millis(extra)).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(300))
    }
}

/// Transitional states that are polled rather than acted upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollState {
    Creating,
    Updating,
    Repairing,
    SearchIndexPending,
    SearchNodesPending,
    PrivateEndpointPending,
    DependencyPending,
}

#[derive(Debug, Clone)]
pub struct PollIntervals {
    table: HashMap<PollState, Duration>,
    fallback: Duration,
}

impl PollIntervals {
    pub fn new(fallback: Duration) -> Self {
        Self {
            table: HashMap::new(),
            fallback,
        }
    }

    pub fn with(mut self, state: PollState, interval: Duration) -> Self {
        self.table.insert(state, interval);
        self
    }

    pub fn interval(&self, state: PollState) -> Duration {
        self.table.get(&state).copied().unwrap_or(self.fallback)
    }
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
            .with(PollState::Creating, Duration::from_secs(30))
            .with(PollState::Updating, Duration::from_secs(15))
            .with(PollState::Repairing, Duration::from_secs(30))
            .with(PollState::SearchIndexPending, Duration::from_secs(10))
            .with(PollState::SearchNodesPending, Duration::from_secs(30))
            .with(PollState::PrivateEndpointPending, Duration::from_secs(10))
            .with(PollState::DependencyPending, Duration::from_secs(10))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    Transient,
    Permanent,
}

pub fn classify(err: &ProviderError) -> ErrorClass {
    if err.is_not_found() {
        ErrorClass::NotFound
    } else if err.is_transient() {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

/// Maps a provider failure onto a workflow result. Transient failures are
/// retried with backoff; everything else terminates under `reason` and waits
/// for a spec change or the periodic resync.
pub fn provider_failure(
    err: &ProviderError,
    reason: &str,
    context: &str,
    backoff: &Backoff,
) -> WorkflowResult {
    match classify(err) {
        ErrorClass::Transient => WorkflowResult::transient(
            reason::PROVIDER_TRANSIENT,
            format!("{context}: {err}"),
            backoff.delay(0),
        ),
        ErrorClass::NotFound | ErrorClass::Permanent => {
            WorkflowResult::terminate(reason, format!("{context}: {err}"))
        }
    }
}
