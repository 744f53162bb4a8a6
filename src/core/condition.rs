//! # Condition manager module
//!
//! Translates an action-pipeline outcome into the standard condition set
//! written back to an instance's status (spec.md §4.9). Modeled as a plain
//! translation function rather than a stateful object: the reconciler
//! supplies the previous condition list so `lastTransitionTime` is only
//! bumped on an actual status change.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

use super::action::ActionError;

pub const DEFAULT_HAPPY_CONDITION: &str = "Ready";
pub const DEFAULT_DEPENDENT_CONDITION: &str = "ProvisioningSucceeded";

// -----------------------------------------------------------------------------
// PipelineOutcome

/// the action pipeline's result, already stripped of which action produced
/// it; all the condition manager needs to know.
#[derive(Debug)]
pub enum PipelineOutcome {
    Success,
    Stopped { phase: String, message: String },
    Failed { phase: String, reason: String, message: String },
}

impl PipelineOutcome {
    /// builds the outcome for the currently executing phase from an
    /// action's result, defaulting the failure reason to `FailedApplying`
    /// when the error carries no explicit reason tag.
    pub fn from_action_result(phase: impl Into<String>, result: Result<(), ActionError>) -> Self {
        let phase = phase.into();
        match result {
            Ok(()) => Self::Success,
            Err(ActionError::Stop(message)) => Self::Stopped { phase, message },
            Err(err) => {
                let reason = err.reason().unwrap_or("FailedApplying").to_string();
                Self::Failed {
                    phase,
                    reason,
                    message: err.to_string(),
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ConditionManager

pub struct ConditionManager {
    happy_condition: String,
    dependent_conditions: Vec<String>,
}

impl Default for ConditionManager {
    fn default() -> Self {
        Self {
            happy_condition: DEFAULT_HAPPY_CONDITION.to_string(),
            dependent_conditions: vec![DEFAULT_DEPENDENT_CONDITION.to_string()],
        }
    }
}

impl ConditionManager {
    pub fn new(happy_condition: impl Into<String>) -> Self {
        Self {
            happy_condition: happy_condition.into(),
            dependent_conditions: Vec::new(),
        }
    }

    pub fn with_dependent(mut self, condition_type: impl Into<String>) -> Self {
        self.dependent_conditions.push(condition_type.into());
        self
    }

    /// the condition type this manager treats as the instance's overall
    /// readiness signal; used by the reconciler to read back the last
    /// `observedGeneration` it reported (spec.md §4.10 generation-only
    /// predicate default).
    pub fn happy_condition(&self) -> &str {
        &self.happy_condition
    }

    /// derives the full condition set for `outcome`, merging against
    /// `existing` so unchanged conditions keep their `lastTransitionTime`.
    pub fn derive(
        &self,
        observed_generation: i64,
        existing: &[Condition],
        outcome: &PipelineOutcome,
    ) -> Vec<Condition> {
        let mut dependents: Vec<Condition> = self
            .dependent_conditions
            .iter()
            .map(|condition_type| match outcome {
                PipelineOutcome::Success => {
                    self.build(existing, condition_type, "True", "Ready", "", observed_generation)
                }
                PipelineOutcome::Stopped { phase, message } if condition_type == phase => self
                    .build(
                        existing,
                        condition_type,
                        "False",
                        "Stopped",
                        message,
                        observed_generation,
                    ),
                PipelineOutcome::Failed {
                    phase,
                    reason,
                    message,
                } if condition_type == phase => {
                    self.build(existing, condition_type, "False", reason, message, observed_generation)
                }
                _ => self.carry_forward(existing, condition_type, observed_generation),
            })
            .collect();

        let ready_status = if dependents.iter().all(|c| c.status == "True") {
            "True"
        } else {
            "False"
        };
        let (ready_reason, ready_message) = match outcome {
            PipelineOutcome::Success => ("Ready".to_string(), String::new()),
            PipelineOutcome::Stopped { message, .. } => ("Stopped".to_string(), message.clone()),
            PipelineOutcome::Failed { reason, message, .. } => (reason.clone(), message.clone()),
        };

        let happy = self.build(
            existing,
            &self.happy_condition,
            ready_status,
            &ready_reason,
            &ready_message,
            observed_generation,
        );

        dependents.push(happy);
        dependents
    }

    fn build(
        &self,
        existing: &[Condition],
        condition_type: &str,
        status: &str,
        reason: &str,
        message: &str,
        observed_generation: i64,
    ) -> Condition {
        let previous = existing.iter().find(|c| c.type_ == condition_type);
        let last_transition_time = match previous {
            Some(prev) if prev.status == status => prev.last_transition_time.clone(),
            _ => Time(Utc::now()),
        };

        Condition {
            type_: condition_type.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: Some(observed_generation),
            last_transition_time,
        }
    }

    /// a dependent condition this outcome's phase doesn't govern keeps
    /// whatever it last reported rather than being forced true; an action
    /// that never ran this cycle has nothing new to say about it. A
    /// dependent with no prior entry defaults to `True`/`Ready`, since it
    /// hasn't yet been exercised by a failing phase.
    fn carry_forward(&self, existing: &[Condition], condition_type: &str, observed_generation: i64) -> Condition {
        match existing.iter().find(|c| c.type_ == condition_type) {
            Some(previous) => Condition {
                observed_generation: Some(observed_generation),
                ..previous.clone()
            },
            None => self.build(existing, condition_type, "True", "Ready", "", observed_generation),
        }
    }
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_sets_every_condition_true() {
        let manager = ConditionManager::default();
        let conditions = manager.derive(1, &[], &PipelineOutcome::Success);

        assert!(conditions.iter().all(|c| c.status == "True"));
        let ready = conditions.iter().find(|c| c.type_ == "Ready").unwrap();
        assert_eq!(ready.reason, "Ready");
    }

    #[test]
    fn stop_sets_matching_dependent_false_with_stop_message() {
        let manager = ConditionManager::default();
        let outcome = PipelineOutcome::Stopped {
            phase: DEFAULT_DEPENDENT_CONDITION.to_string(),
            message: "blocked by policy".to_string(),
        };
        let conditions = manager.derive(1, &[], &outcome);

        let dependent = conditions
            .iter()
            .find(|c| c.type_ == DEFAULT_DEPENDENT_CONDITION)
            .unwrap();
        assert_eq!(dependent.status, "False");
        assert_eq!(dependent.reason, "Stopped");
        assert_eq!(dependent.message, "blocked by policy");

        let ready = conditions.iter().find(|c| c.type_ == "Ready").unwrap();
        assert_eq!(ready.status, "False");
        assert_eq!(ready.message, "blocked by policy");
    }

    #[test]
    fn failed_uses_error_reason_tag() {
        let manager = ConditionManager::default();
        let outcome = PipelineOutcome::Failed {
            phase: DEFAULT_DEPENDENT_CONDITION.to_string(),
            reason: "PreConditions".to_string(),
            message: "serverless-operator".to_string(),
        };
        let conditions = manager.derive(2, &[], &outcome);

        let dependent = conditions
            .iter()
            .find(|c| c.type_ == DEFAULT_DEPENDENT_CONDITION)
            .unwrap();
        assert_eq!(dependent.reason, "PreConditions");
        assert!(dependent.message.contains("serverless-operator"));
    }

    #[test]
    fn unchanged_status_preserves_last_transition_time() {
        let manager = ConditionManager::default();
        let first = manager.derive(1, &[], &PipelineOutcome::Success);
        let second = manager.derive(1, &first, &PipelineOutcome::Success);

        let first_ready = first.iter().find(|c| c.type_ == "Ready").unwrap();
        let second_ready = second.iter().find(|c| c.type_ == "Ready").unwrap();
        assert_eq!(first_ready.last_transition_time.0, second_ready.last_transition_time.0);
    }
}
