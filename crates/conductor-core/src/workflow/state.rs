//! Event reducer: the only code that turns events into `WorkflowState`.
//!
//! `apply` is pure. The journal runs it against a copy of the live state
//! before appending, and `replay` runs it over the log on load, so a state
//! rebuilt from disk is exactly the state the writer held.

use thiserror::Error;

use conductor_types::event::{EventRecord, WorkflowEvent};
use conductor_types::state::{
    Artifact, CompletionKind, StepExecution, StepStatus, WorkflowState, WorkflowStatus,
};

/// An event that cannot be applied to the current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    #[error("event for workflow '{found}' applied to workflow '{expected}'")]
    WrongWorkflow { expected: String, found: String },

    #[error("event log gap: expected sequence {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },

    #[error("illegal status transition {from} -> {to} at sequence {sequence}")]
    IllegalTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
        sequence: u64,
    },

    #[error("step '{step_id}' started while workflow is {status} (sequence {sequence})")]
    NotRunning {
        step_id: String,
        status: WorkflowStatus,
        sequence: u64,
    },

    #[error("step '{step_id}' already has a running execution (sequence {sequence})")]
    AlreadyRunning { step_id: String, sequence: u64 },

    #[error("step '{step_id}' is already completed or skipped (sequence {sequence})")]
    AlreadyDone { step_id: String, sequence: u64 },

    #[error("{event} for step '{step_id}' without a running execution (sequence {sequence})")]
    NoActiveExecution {
        step_id: String,
        event: &'static str,
        sequence: u64,
    },
}

/// Apply one record. Records at or below `last_sequence` are duplicates and
/// leave the state unchanged.
pub fn apply(mut state: WorkflowState, record: &EventRecord) -> Result<WorkflowState, ReplayError> {
    if record.workflow_id != state.workflow_id {
        return Err(ReplayError::WrongWorkflow {
            expected: state.workflow_id.clone(),
            found: record.workflow_id.clone(),
        });
    }
    if record.sequence <= state.last_sequence {
        tracing::debug!(
            workflow_id = %state.workflow_id,
            sequence = record.sequence,
            "skipping duplicate event"
        );
        return Ok(state);
    }
    let expected = state.last_sequence + 1;
    if record.sequence != expected {
        return Err(ReplayError::SequenceGap {
            expected,
            found: record.sequence,
        });
    }

    let sequence = record.sequence;
    match &record.event {
        WorkflowEvent::WorkflowStarted {
            definition_id,
            variables,
            ..
        } => {
            transition(&mut state, WorkflowStatus::Running, sequence)?;
            state.definition_id = Some(definition_id.clone());
            state.variables = variables.clone();
            state.created_at.get_or_insert(record.timestamp);
        }
        WorkflowEvent::WorkflowResumed { .. } => {
            transition(&mut state, WorkflowStatus::Running, sequence)?;
            state.error = None;
            state.pause_reason = None;
        }
        WorkflowEvent::StepStarted {
            step_id,
            agent,
            action,
            attempt,
        } => {
            if state.status != WorkflowStatus::Running {
                return Err(ReplayError::NotRunning {
                    step_id: step_id.clone(),
                    status: state.status,
                    sequence,
                });
            }
            if state.is_done(step_id) {
                return Err(ReplayError::AlreadyDone {
                    step_id: step_id.clone(),
                    sequence,
                });
            }
            if state.is_running(step_id) {
                return Err(ReplayError::AlreadyRunning {
                    step_id: step_id.clone(),
                    sequence,
                });
            }
            state.executions.push(StepExecution {
                step_id: step_id.clone(),
                agent: agent.clone(),
                action: action.clone(),
                status: StepStatus::Running,
                attempt: *attempt,
                started_at: record.timestamp,
                ended_at: None,
                error: None,
            });
        }
        WorkflowEvent::StepCompleted {
            step_id,
            attempt,
            artifacts,
        } => {
            close_execution(&mut state, record, step_id, StepStatus::Completed, None)?;
            state
                .completed_steps
                .insert(step_id.clone(), CompletionKind::Completed);
            for (id, value) in artifacts {
                state.artifacts.insert(
                    id.clone(),
                    Artifact {
                        produced_by: step_id.clone(),
                        attempt: *attempt,
                        value: value.clone(),
                    },
                );
            }
        }
        WorkflowEvent::StepFailed { step_id, error, .. } => {
            close_execution(&mut state, record, step_id, StepStatus::Failed, Some(error.clone()))?;
        }
        WorkflowEvent::StepCancelled { step_id, .. }
        | WorkflowEvent::StepInterrupted { step_id, .. } => {
            close_execution(&mut state, record, step_id, StepStatus::Cancelled, None)?;
        }
        WorkflowEvent::StepSkipped { step_id, .. } => {
            if state.is_done(step_id) {
                return Err(ReplayError::AlreadyDone {
                    step_id: step_id.clone(),
                    sequence,
                });
            }
            if state.is_running(step_id) {
                return Err(ReplayError::AlreadyRunning {
                    step_id: step_id.clone(),
                    sequence,
                });
            }
            state
                .completed_steps
                .insert(step_id.clone(), CompletionKind::Skipped);
        }
        WorkflowEvent::WorkflowPaused { reason } => {
            transition(&mut state, WorkflowStatus::Paused, sequence)?;
            state.pause_reason = Some(reason.clone());
        }
        WorkflowEvent::WorkflowCompleted => {
            transition(&mut state, WorkflowStatus::Completed, sequence)?;
            state.error = None;
        }
        WorkflowEvent::WorkflowFailed { error } => {
            transition(&mut state, WorkflowStatus::Failed, sequence)?;
            state.error = Some(error.clone());
        }
        WorkflowEvent::CheckpointTaken { sequence: at } => {
            state.last_checkpoint = Some(*at);
        }
    }

    state.last_sequence = sequence;
    state.updated_at = Some(record.timestamp);
    Ok(state)
}

/// Fold `records` over `state` in order.
pub fn replay<'a>(
    state: WorkflowState,
    records: impl IntoIterator<Item = &'a EventRecord>,
) -> Result<WorkflowState, ReplayError> {
    records.into_iter().try_fold(state, apply)
}

fn transition(
    state: &mut WorkflowState,
    to: WorkflowStatus,
    sequence: u64,
) -> Result<(), ReplayError> {
    if !state.status.can_transition_to(to) {
        return Err(ReplayError::IllegalTransition {
            from: state.status,
            to,
            sequence,
        });
    }
    state.status = to;
    Ok(())
}

fn close_execution(
    state: &mut WorkflowState,
    record: &EventRecord,
    step_id: &str,
    status: StepStatus,
    error: Option<conductor_types::error::ErrorInfo>,
) -> Result<(), ReplayError> {
    let Some(execution) = state
        .executions
        .iter_mut()
        .rev()
        .find(|e| e.step_id == step_id && e.is_active())
    else {
        return Err(ReplayError::NoActiveExecution {
            step_id: step_id.to_string(),
            event: record.event.kind(),
            sequence: record.sequence,
        });
    };
    execution.status = status;
    execution.ended_at = Some(record.timestamp);
    execution.error = error;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conductor_types::error::{ErrorCategory, ErrorInfo};
    use serde_json::json;
    use std::collections::BTreeMap;

    struct Log {
        records: Vec<EventRecord>,
    }

    impl Log {
        fn new() -> Self {
            Self { records: Vec::new() }
        }

        fn push(&mut self, event: WorkflowEvent) -> &mut Self {
            let sequence = self.records.len() as u64 + 1;
            self.records.push(EventRecord {
                sequence,
                timestamp: Utc::now(),
                workflow_id: "wf-1".into(),
                event,
            });
            self
        }
    }

    fn started() -> WorkflowEvent {
        WorkflowEvent::WorkflowStarted {
            definition_id: "demo".into(),
            definition_name: None,
            variables: BTreeMap::from([("env".to_string(), json!("ci"))]),
        }
    }

    fn step_started(step: &str, attempt: u32) -> WorkflowEvent {
        WorkflowEvent::StepStarted {
            step_id: step.into(),
            agent: "agent".into(),
            action: "act".into(),
            attempt,
        }
    }

    fn step_completed(step: &str, attempt: u32) -> WorkflowEvent {
        WorkflowEvent::StepCompleted {
            step_id: step.into(),
            attempt,
            artifacts: BTreeMap::from([(format!("{step}-out"), json!(attempt))]),
        }
    }

    fn step_failed(step: &str, attempt: u32, will_retry: bool) -> WorkflowEvent {
        WorkflowEvent::StepFailed {
            step_id: step.into(),
            attempt,
            error: ErrorInfo::new(ErrorCategory::ExternalDependency, "503"),
            will_retry,
        }
    }

    fn fresh() -> WorkflowState {
        WorkflowState::new("wf-1")
    }

    #[test]
    fn happy_path_projection() {
        let mut log = Log::new();
        log.push(started())
            .push(step_started("a", 1))
            .push(step_failed("a", 1, true))
            .push(step_started("a", 2))
            .push(step_completed("a", 2))
            .push(WorkflowEvent::CheckpointTaken { sequence: 5 })
            .push(WorkflowEvent::WorkflowCompleted);

        let state = replay(fresh(), &log.records).unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.definition_id.as_deref(), Some("demo"));
        assert_eq!(state.variables["env"], json!("ci"));
        assert_eq!(state.completed_steps["a"], CompletionKind::Completed);
        assert_eq!(state.artifacts["a-out"].attempt, 2);
        assert_eq!(state.artifacts["a-out"].produced_by, "a");
        assert_eq!(state.executions.len(), 2);
        assert_eq!(state.executions[0].status, StepStatus::Failed);
        assert_eq!(state.last_sequence, 7);
        assert_eq!(state.last_checkpoint, Some(5));
        assert!(state.created_at.is_some());
    }

    #[test]
    fn duplicate_sequence_is_ignored() {
        let mut log = Log::new();
        log.push(started()).push(step_started("a", 1));
        let state = replay(fresh(), &log.records).unwrap();
        let again = apply(state.clone(), &log.records[1]).unwrap();
        assert_eq!(again, state);
    }

    #[test]
    fn sequence_gap_is_an_error() {
        let mut log = Log::new();
        log.push(started()).push(step_started("a", 1));
        let err = apply(fresh(), &log.records[1]).unwrap_err();
        assert_eq!(err, ReplayError::SequenceGap { expected: 1, found: 2 });
    }

    #[test]
    fn double_start_rejected() {
        let mut log = Log::new();
        log.push(started()).push(step_started("a", 1)).push(step_started("a", 2));
        let err = replay(fresh(), &log.records).unwrap_err();
        assert!(matches!(err, ReplayError::AlreadyRunning { ref step_id, .. } if step_id == "a"));
    }

    #[test]
    fn completion_without_start_rejected() {
        let mut log = Log::new();
        log.push(started()).push(step_completed("a", 1));
        let err = replay(fresh(), &log.records).unwrap_err();
        assert!(err.to_string().contains("step_completed"));
    }

    #[test]
    fn completed_is_terminal() {
        let mut log = Log::new();
        log.push(started())
            .push(WorkflowEvent::WorkflowCompleted)
            .push(WorkflowEvent::WorkflowResumed {
                from: WorkflowStatus::Completed,
            });
        let err = replay(fresh(), &log.records).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::IllegalTransition {
                from: WorkflowStatus::Completed,
                to: WorkflowStatus::Running,
                ..
            }
        ));
    }

    #[test]
    fn step_cannot_start_while_paused() {
        let mut log = Log::new();
        log.push(started())
            .push(WorkflowEvent::WorkflowPaused {
                reason: "operator".into(),
            })
            .push(step_started("a", 1));
        let err = replay(fresh(), &log.records).unwrap_err();
        assert!(matches!(err, ReplayError::NotRunning { .. }));
    }

    #[test]
    fn failed_workflow_resumes_and_clears_error() {
        let mut log = Log::new();
        log.push(started())
            .push(step_started("a", 1))
            .push(step_failed("a", 1, false))
            .push(WorkflowEvent::WorkflowFailed {
                error: ErrorInfo::new(ErrorCategory::Execution, "a failed"),
            });
        let failed = replay(fresh(), &log.records).unwrap();
        assert_eq!(failed.status, WorkflowStatus::Failed);
        assert!(failed.error.is_some());

        log.push(WorkflowEvent::WorkflowResumed {
            from: WorkflowStatus::Failed,
        })
        .push(step_started("a", 2));
        let resumed = replay(failed, &log.records).unwrap();
        assert_eq!(resumed.status, WorkflowStatus::Running);
        assert!(resumed.error.is_none());
        assert!(resumed.is_running("a"));
        assert_eq!(resumed.attempts_for("a"), 2);
    }

    #[test]
    fn interrupted_execution_becomes_retryable() {
        let mut log = Log::new();
        log.push(started())
            .push(step_started("a", 1))
            .push(WorkflowEvent::StepInterrupted {
                step_id: "a".into(),
                attempt: 1,
            })
            .push(WorkflowEvent::WorkflowResumed {
                from: WorkflowStatus::Running,
            })
            .push(step_started("a", 2));
        let state = replay(fresh(), &log.records).unwrap();
        assert_eq!(state.executions[0].status, StepStatus::Cancelled);
        assert!(state.is_running("a"));
    }

    #[test]
    fn skipped_step_counts_as_done() {
        let mut log = Log::new();
        log.push(started())
            .push(step_started("opt", 1))
            .push(step_failed("opt", 1, false))
            .push(WorkflowEvent::StepSkipped {
                step_id: "opt".into(),
                reason: "optional step failed".into(),
            });
        let state = replay(fresh(), &log.records).unwrap();
        assert_eq!(state.completed_steps["opt"], CompletionKind::Skipped);

        log.push(step_started("opt", 2));
        let err = replay(fresh(), &log.records).unwrap_err();
        assert!(matches!(err, ReplayError::AlreadyDone { .. }));
    }

    #[test]
    fn wrong_workflow_rejected() {
        let mut log = Log::new();
        log.push(started());
        let err = apply(WorkflowState::new("other"), &log.records[0]).unwrap_err();
        assert!(matches!(err, ReplayError::WrongWorkflow { .. }));
    }
}
