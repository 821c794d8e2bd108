//! Pairs decisions produced by replay with the events recorded in history to detect
//! non-deterministic workflow code.

use crate::{
    errors::NondeterminismError,
    protocol::{
        decisions::Decision,
        history::{
            EventAttributes, HistoryEvent, MUTABLE_SIDE_EFFECT_MARKER_NAME, VERSION_MARKER_NAME,
        },
    },
};

/// Walk replay decisions and historical decision events in lockstep. Version and
/// mutable-side-effect markers are invisible to the check on both sides: they may legitimately
/// appear or disappear as workflow code evolves.
pub(crate) fn match_replay_with_history(
    replay_decisions: &[Decision],
    history_events: &[HistoryEvent],
) -> Result<(), NondeterminismError> {
    let mut di = 0;
    let mut hi = 0;

    while hi < history_events.len() || di < replay_decisions.len() {
        let event = match history_events.get(hi) {
            Some(e) if skip_deterministic_check_for_event(e) => {
                hi += 1;
                continue;
            }
            other => other,
        };

        let decision = match replay_decisions.get(di) {
            Some(d) if skip_deterministic_check_for_decision(d) => {
                di += 1;
                continue;
            }
            other => other,
        };

        match (decision, event) {
            (None, Some(e)) => {
                return Err(NondeterminismError::MissingDecision {
                    event: describe_event(e),
                })
            }
            (Some(d), None) => {
                return Err(NondeterminismError::ExtraDecision {
                    decision: describe_decision(d),
                })
            }
            (Some(d), Some(e)) => {
                if !is_decision_match_event(d, e, false) {
                    return Err(NondeterminismError::Mismatch {
                        event: describe_event(e),
                        decision: describe_decision(d),
                    });
                }
            }
            (None, None) => break,
        }

        di += 1;
        hi += 1;
    }
    Ok(())
}

fn skip_deterministic_check_for_decision(decision: &Decision) -> bool {
    match decision {
        Decision::RecordMarker(attrs) => {
            attrs.marker_name == VERSION_MARKER_NAME
                || attrs.marker_name == MUTABLE_SIDE_EFFECT_MARKER_NAME
        }
        _ => false,
    }
}

fn skip_deterministic_check_for_event(event: &HistoryEvent) -> bool {
    matches!(
        event.marker_name(),
        Some(VERSION_MARKER_NAME) | Some(MUTABLE_SIDE_EFFECT_MARKER_NAME)
    )
}

/// Compare only the suffix after the final `.`, tolerating refactors that move a workflow or
/// activity between fully-qualified namespaces.
fn last_part_of_name(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx + 1 < name.len() => &name[idx + 1..],
        _ => name,
    }
}

/// The base match table. Strict mode additionally compares inputs, task lists, domains, and
/// timeout fields; it is not used on the replay path.
pub(crate) fn is_decision_match_event(
    decision: &Decision,
    event: &HistoryEvent,
    strict_mode: bool,
) -> bool {
    match (decision, &event.attributes) {
        (
            Decision::ScheduleActivityTask(d),
            EventAttributes::ActivityTaskScheduled(e),
        ) => {
            d.activity_id == e.activity_id
                && last_part_of_name(&d.activity_type.name)
                    == last_part_of_name(&e.activity_type.name)
                && (!strict_mode || (d.task_list == e.task_list && d.input == e.input))
        }
        (
            Decision::RequestCancelActivityTask(d),
            EventAttributes::ActivityTaskCancelRequested(e),
        ) => d.activity_id == e.activity_id,
        (
            Decision::RequestCancelActivityTask(d),
            EventAttributes::RequestCancelActivityTaskFailed(e),
        ) => d.activity_id == e.activity_id,
        (Decision::StartTimer(d), EventAttributes::TimerStarted(e)) => {
            d.timer_id == e.timer_id
                && (!strict_mode
                    || d.start_to_fire_timeout_seconds == e.start_to_fire_timeout_seconds)
        }
        (Decision::CancelTimer(d), EventAttributes::TimerCanceled(e)) => d.timer_id == e.timer_id,
        (Decision::CancelTimer(d), EventAttributes::CancelTimerFailed(e)) => {
            d.timer_id == e.timer_id
        }
        (
            Decision::CompleteWorkflowExecution(d),
            EventAttributes::WorkflowExecutionCompleted(e),
        ) => !strict_mode || d.result == e.result,
        (Decision::FailWorkflowExecution(d), EventAttributes::WorkflowExecutionFailed(e)) => {
            !strict_mode || (d.reason == e.reason && d.details == e.details)
        }
        (Decision::CancelWorkflowExecution(d), EventAttributes::WorkflowExecutionCanceled(e)) => {
            !strict_mode || d.details == e.details
        }
        (
            Decision::ContinueAsNewWorkflowExecution(_),
            EventAttributes::WorkflowExecutionContinuedAsNew(_),
        ) => true,
        (Decision::RecordMarker(d), EventAttributes::MarkerRecorded(e)) => {
            d.marker_name == e.marker_name
        }
        (
            Decision::RequestCancelExternalWorkflowExecution(d),
            EventAttributes::RequestCancelExternalWorkflowExecutionInitiated(e),
        ) => d.domain == e.domain && d.workflow_id == e.workflow_execution.workflow_id,
        (
            Decision::SignalExternalWorkflowExecution(d),
            EventAttributes::SignalExternalWorkflowExecutionInitiated(e),
        ) => {
            d.domain == e.domain
                && d.signal_name == e.signal_name
                && d.workflow_id == e.workflow_execution.workflow_id
        }
        (
            Decision::StartChildWorkflowExecution(d),
            EventAttributes::StartChildWorkflowExecutionInitiated(e),
        ) => {
            last_part_of_name(&d.workflow_type.name) == last_part_of_name(&e.workflow_type.name)
                && (!strict_mode || (d.domain == e.domain && d.task_list == e.task_list))
        }
        _ => false,
    }
}

fn describe_event(event: &HistoryEvent) -> String {
    format!("{:?} (event_id: {})", event.event_type(), event.event_id)
}

fn describe_decision(decision: &Decision) -> String {
    match decision {
        Decision::ScheduleActivityTask(d) => {
            format!("ScheduleActivityTask (activity_id: {})", d.activity_id)
        }
        Decision::RequestCancelActivityTask(d) => {
            format!("RequestCancelActivityTask (activity_id: {})", d.activity_id)
        }
        Decision::StartTimer(d) => format!("StartTimer (timer_id: {})", d.timer_id),
        Decision::CancelTimer(d) => format!("CancelTimer (timer_id: {})", d.timer_id),
        Decision::RecordMarker(d) => format!("RecordMarker (marker_name: {})", d.marker_name),
        Decision::CompleteWorkflowExecution(_) => "CompleteWorkflowExecution".to_string(),
        Decision::FailWorkflowExecution(_) => "FailWorkflowExecution".to_string(),
        Decision::CancelWorkflowExecution(_) => "CancelWorkflowExecution".to_string(),
        Decision::ContinueAsNewWorkflowExecution(_) => {
            "ContinueAsNewWorkflowExecution".to_string()
        }
        Decision::StartChildWorkflowExecution(d) => format!(
            "StartChildWorkflowExecution (workflow_type: {})",
            d.workflow_type.name
        ),
        Decision::RequestCancelExternalWorkflowExecution(d) => format!(
            "RequestCancelExternalWorkflowExecution (workflow_id: {})",
            d.workflow_id
        ),
        Decision::SignalExternalWorkflowExecution(d) => format!(
            "SignalExternalWorkflowExecution (signal_name: {})",
            d.signal_name
        ),
    }
}
