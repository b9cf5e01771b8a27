use chrono::Utc;

use crate::crd::{Condition, ConditionStatus, ConditionType, StatusObject};

use super::workflow::WorkflowResult;

/// Buffers condition and sub-status changes for one reconciliation. Nothing
/// is written until the dispatcher flushes the finished status in a single
/// patch.
#[derive(Debug)]
pub struct WorkflowContext<S: StatusObject> {
    current: Option<S>,
    status: S,
    generation: Option<i64>,
}

impl<S: StatusObject> WorkflowContext<S> {
    pub fn new(current: Option<&S>, generation: Option<i64>) -> Self {
        Self {
            current: current.cloned(),
            status: current.cloned().unwrap_or_default(),
            generation,
        }
    }

    pub fn status(&self) -> &S {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut S {
        &mut self.status
    }

    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.status.conditions().iter().find(|c| c.type_ == type_)
    }

    pub fn set_condition(&mut self, type_: ConditionType, result: &WorkflowResult) {
        upsert(self.status.conditions_mut(), condition_from(type_, result));
    }

    pub fn set_condition_true(&mut self, type_: ConditionType) {
        self.set_condition(type_, &WorkflowResult::ok());
    }

    pub fn unset_condition(&mut self, type_: ConditionType) {
        self.status.conditions_mut().retain(|c| c.type_ != type_);
    }

    /// Derives `Ready` from the final result and every other tracked
    /// condition, stamps the generation and returns the status to write.
    pub fn finish(mut self, result: &WorkflowResult) -> S {
        let ready = if result.is_ok() {
            match self
                .status
                .conditions()
                .iter()
                .find(|c| c.type_ != ConditionType::Ready && c.status != ConditionStatus::True)
            {
                Some(blocking) => Condition {
                    type_: ConditionType::Ready,
                    status: ConditionStatus::False,
                    reason: blocking.reason.clone(),
                    message: blocking.message.clone(),
                    last_transition_time: None,
                },
                None => condition_from(ConditionType::Ready, result),
            }
        } else {
            condition_from(ConditionType::Ready, result)
        };
        upsert(self.status.conditions_mut(), ready);
        self.status
            .conditions_mut()
            .sort_by_key(|c| c.type_.rank());
        self.status.set_observed_generation(self.generation);
        self.status
    }

    /// Finished status, or `None` when it only differs from what is
    /// stored by timestamps.
    pub fn finish_if_changed(self, result: &WorkflowResult) -> Option<S> {
        let current = self.current.clone();
        let next = self.finish(result);
        status_changed(current.as_ref(), &next).then_some(next)
    }
}

pub fn condition_from(type_: ConditionType, result: &WorkflowResult) -> Condition {
    if result.is_ok() {
        Condition {
            type_,
            status: ConditionStatus::True,
            reason: None,
            message: None,
            last_transition_time: None,
        }
    } else {
        Condition {
            type_,
            status: ConditionStatus::False,
            reason: Some(result.reason().to_string()),
            message: Some(result.message().to_string()),
            last_transition_time: None,
        }
    }
}

/// Replace the condition of the same type. The transition time only moves
/// when the status flips.
fn upsert(conditions: &mut Vec<Condition>, mut incoming: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == incoming.type_) {
        Some(existing) => {
            incoming.last_transition_time = if existing.status == incoming.status {
                existing
                    .last_transition_time
                    .clone()
                    .or_else(|| Some(Utc::now().to_rfc3339()))
            } else {
                Some(Utc::now().to_rfc3339())
            };
            *existing = incoming;
        }
        None => {
            incoming.last_transition_time = Some(Utc::now().to_rfc3339());
            conditions.push(incoming);
        }
    }
}

fn normalize<S: StatusObject>(status: &S) -> S {
    let mut s = status.clone();
    for c in s.conditions_mut().iter_mut() {
        c.last_transition_time = None;
    }
    s
}

/// Compare ignoring timestamps so a no-op reconcile never writes.
pub fn status_changed<S: StatusObject>(current: Option<&S>, next: &S) -> bool {
    match current {
        None => true,
        Some(cur) => normalize(cur) != normalize(next),
    }
}
