//! History events as recorded by the server, one attribute variant per event type.

use crate::protocol::{ActivityType, Payload, WorkflowExecution, WorkflowType};
use std::time::SystemTime;

/// Marker recorded for each local activity completing within a decision task.
pub const LOCAL_ACTIVITY_MARKER_NAME: &str = "localActivity";
/// Marker recorded by `get_version` style workflow versioning.
pub const VERSION_MARKER_NAME: &str = "version";
/// Marker recorded by mutable side effects.
pub const MUTABLE_SIDE_EFFECT_MARKER_NAME: &str = "mutableSideEffect";
/// Marker recorded by plain side effects.
pub const SIDE_EFFECT_MARKER_NAME: &str = "sideEffect";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    WorkflowExecutionStarted,
    WorkflowExecutionCompleted,
    WorkflowExecutionFailed,
    WorkflowExecutionCanceled,
    WorkflowExecutionContinuedAsNew,
    WorkflowExecutionCancelRequested,
    WorkflowExecutionSignaled,
    DecisionTaskScheduled,
    DecisionTaskStarted,
    DecisionTaskCompleted,
    DecisionTaskTimedOut,
    DecisionTaskFailed,
    ActivityTaskScheduled,
    ActivityTaskStarted,
    ActivityTaskCompleted,
    ActivityTaskFailed,
    ActivityTaskTimedOut,
    ActivityTaskCancelRequested,
    RequestCancelActivityTaskFailed,
    ActivityTaskCanceled,
    TimerStarted,
    TimerFired,
    TimerCanceled,
    CancelTimerFailed,
    MarkerRecorded,
    StartChildWorkflowExecutionInitiated,
    RequestCancelExternalWorkflowExecutionInitiated,
    SignalExternalWorkflowExecutionInitiated,
}

/// A single entry in a workflow execution's history.
///
/// Event ids are dense and gap-free within one execution. The event type is derived from the
/// attribute variant so the two can never disagree.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEvent {
    pub event_id: i64,
    pub timestamp: SystemTime,
    pub attributes: EventAttributes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventAttributes {
    WorkflowExecutionStarted(WorkflowExecutionStartedEventAttributes),
    WorkflowExecutionCompleted(WorkflowExecutionCompletedEventAttributes),
    WorkflowExecutionFailed(WorkflowExecutionFailedEventAttributes),
    WorkflowExecutionCanceled(WorkflowExecutionCanceledEventAttributes),
    WorkflowExecutionContinuedAsNew(WorkflowExecutionContinuedAsNewEventAttributes),
    WorkflowExecutionCancelRequested,
    WorkflowExecutionSignaled(WorkflowExecutionSignaledEventAttributes),
    DecisionTaskScheduled,
    DecisionTaskStarted,
    DecisionTaskCompleted,
    DecisionTaskTimedOut,
    DecisionTaskFailed,
    ActivityTaskScheduled(ActivityTaskScheduledEventAttributes),
    ActivityTaskStarted(ActivityTaskStartedEventAttributes),
    ActivityTaskCompleted(ActivityTaskCompletedEventAttributes),
    ActivityTaskFailed(ActivityTaskFailedEventAttributes),
    ActivityTaskTimedOut(ActivityTaskTimedOutEventAttributes),
    ActivityTaskCancelRequested(ActivityTaskCancelRequestedEventAttributes),
    RequestCancelActivityTaskFailed(RequestCancelActivityTaskFailedEventAttributes),
    ActivityTaskCanceled(ActivityTaskCanceledEventAttributes),
    TimerStarted(TimerStartedEventAttributes),
    TimerFired(TimerFiredEventAttributes),
    TimerCanceled(TimerCanceledEventAttributes),
    CancelTimerFailed(CancelTimerFailedEventAttributes),
    MarkerRecorded(MarkerRecordedEventAttributes),
    StartChildWorkflowExecutionInitiated(StartChildWorkflowExecutionInitiatedEventAttributes),
    RequestCancelExternalWorkflowExecutionInitiated(
        RequestCancelExternalWorkflowExecutionInitiatedEventAttributes,
    ),
    SignalExternalWorkflowExecutionInitiated(SignalExternalWorkflowExecutionInitiatedEventAttributes),
}

impl HistoryEvent {
    pub fn event_type(&self) -> EventType {
        match &self.attributes {
            EventAttributes::WorkflowExecutionStarted(_) => EventType::WorkflowExecutionStarted,
            EventAttributes::WorkflowExecutionCompleted(_) => EventType::WorkflowExecutionCompleted,
            EventAttributes::WorkflowExecutionFailed(_) => EventType::WorkflowExecutionFailed,
            EventAttributes::WorkflowExecutionCanceled(_) => EventType::WorkflowExecutionCanceled,
            EventAttributes::WorkflowExecutionContinuedAsNew(_) => {
                EventType::WorkflowExecutionContinuedAsNew
            }
            EventAttributes::WorkflowExecutionCancelRequested => {
                EventType::WorkflowExecutionCancelRequested
            }
            EventAttributes::WorkflowExecutionSignaled(_) => EventType::WorkflowExecutionSignaled,
            EventAttributes::DecisionTaskScheduled => EventType::DecisionTaskScheduled,
            EventAttributes::DecisionTaskStarted => EventType::DecisionTaskStarted,
            EventAttributes::DecisionTaskCompleted => EventType::DecisionTaskCompleted,
            EventAttributes::DecisionTaskTimedOut => EventType::DecisionTaskTimedOut,
            EventAttributes::DecisionTaskFailed => EventType::DecisionTaskFailed,
            EventAttributes::ActivityTaskScheduled(_) => EventType::ActivityTaskScheduled,
            EventAttributes::ActivityTaskStarted(_) => EventType::ActivityTaskStarted,
            EventAttributes::ActivityTaskCompleted(_) => EventType::ActivityTaskCompleted,
            EventAttributes::ActivityTaskFailed(_) => EventType::ActivityTaskFailed,
            EventAttributes::ActivityTaskTimedOut(_) => EventType::ActivityTaskTimedOut,
            EventAttributes::ActivityTaskCancelRequested(_) => {
                EventType::ActivityTaskCancelRequested
            }
            EventAttributes::RequestCancelActivityTaskFailed(_) => {
                EventType::RequestCancelActivityTaskFailed
            }
            EventAttributes::ActivityTaskCanceled(_) => EventType::ActivityTaskCanceled,
            EventAttributes::TimerStarted(_) => EventType::TimerStarted,
            EventAttributes::TimerFired(_) => EventType::TimerFired,
            EventAttributes::TimerCanceled(_) => EventType::TimerCanceled,
            EventAttributes::CancelTimerFailed(_) => EventType::CancelTimerFailed,
            EventAttributes::MarkerRecorded(_) => EventType::MarkerRecorded,
            EventAttributes::StartChildWorkflowExecutionInitiated(_) => {
                EventType::StartChildWorkflowExecutionInitiated
            }
            EventAttributes::RequestCancelExternalWorkflowExecutionInitiated(_) => {
                EventType::RequestCancelExternalWorkflowExecutionInitiated
            }
            EventAttributes::SignalExternalWorkflowExecutionInitiated(_) => {
                EventType::SignalExternalWorkflowExecutionInitiated
            }
        }
    }

    /// The marker name, for `MarkerRecorded` events.
    pub fn marker_name(&self) -> Option<&str> {
        match &self.attributes {
            EventAttributes::MarkerRecorded(attrs) => Some(attrs.marker_name.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct History {
    pub events: Vec<HistoryEvent>,
}

impl History {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkflowExecutionStartedEventAttributes {
    pub workflow_type: WorkflowType,
    pub task_list: String,
    pub input: Option<Payload>,
    pub execution_start_to_close_timeout_seconds: i32,
    pub task_start_to_close_timeout_seconds: i32,
    pub attempt: i32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkflowExecutionCompletedEventAttributes {
    pub result: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkflowExecutionFailedEventAttributes {
    pub reason: String,
    pub details: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkflowExecutionCanceledEventAttributes {
    pub details: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkflowExecutionContinuedAsNewEventAttributes {
    pub workflow_type: WorkflowType,
    pub task_list: String,
    pub input: Option<Payload>,
    pub execution_start_to_close_timeout_seconds: i32,
    pub task_start_to_close_timeout_seconds: i32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkflowExecutionSignaledEventAttributes {
    pub signal_name: String,
    pub input: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivityTaskScheduledEventAttributes {
    pub activity_id: String,
    pub activity_type: ActivityType,
    pub task_list: String,
    pub input: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivityTaskStartedEventAttributes {
    pub scheduled_event_id: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivityTaskCompletedEventAttributes {
    pub scheduled_event_id: i64,
    pub result: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivityTaskFailedEventAttributes {
    pub scheduled_event_id: i64,
    pub reason: String,
    pub details: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivityTaskTimedOutEventAttributes {
    pub scheduled_event_id: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivityTaskCancelRequestedEventAttributes {
    pub activity_id: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestCancelActivityTaskFailedEventAttributes {
    pub activity_id: String,
    pub cause: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivityTaskCanceledEventAttributes {
    pub scheduled_event_id: i64,
    pub details: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimerStartedEventAttributes {
    pub timer_id: String,
    pub start_to_fire_timeout_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimerFiredEventAttributes {
    pub timer_id: String,
    pub started_event_id: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimerCanceledEventAttributes {
    pub timer_id: String,
    pub started_event_id: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CancelTimerFailedEventAttributes {
    pub timer_id: String,
    pub cause: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarkerRecordedEventAttributes {
    pub marker_name: String,
    pub details: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StartChildWorkflowExecutionInitiatedEventAttributes {
    pub domain: String,
    pub workflow_id: String,
    pub workflow_type: WorkflowType,
    pub task_list: String,
    pub input: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestCancelExternalWorkflowExecutionInitiatedEventAttributes {
    pub domain: String,
    pub workflow_execution: WorkflowExecution,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignalExternalWorkflowExecutionInitiatedEventAttributes {
    pub domain: String,
    pub workflow_execution: WorkflowExecution,
    pub signal_name: String,
    pub input: Option<Payload>,
}
