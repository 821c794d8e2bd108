//! Outgoing commands produced by a decision task.

use crate::protocol::{ActivityType, Payload, WorkflowType};

/// A command to the workflow service, generated while advancing workflow state. Decisions within
/// one respond request keep the order in which the workflow produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    ScheduleActivityTask(ScheduleActivityTaskDecisionAttributes),
    RequestCancelActivityTask(RequestCancelActivityTaskDecisionAttributes),
    StartTimer(StartTimerDecisionAttributes),
    CancelTimer(CancelTimerDecisionAttributes),
    RecordMarker(RecordMarkerDecisionAttributes),
    CompleteWorkflowExecution(CompleteWorkflowExecutionDecisionAttributes),
    FailWorkflowExecution(FailWorkflowExecutionDecisionAttributes),
    CancelWorkflowExecution(CancelWorkflowExecutionDecisionAttributes),
    ContinueAsNewWorkflowExecution(ContinueAsNewWorkflowExecutionDecisionAttributes),
    StartChildWorkflowExecution(StartChildWorkflowExecutionDecisionAttributes),
    RequestCancelExternalWorkflowExecution(RequestCancelExternalWorkflowExecutionDecisionAttributes),
    SignalExternalWorkflowExecution(SignalExternalWorkflowExecutionDecisionAttributes),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScheduleActivityTaskDecisionAttributes {
    pub activity_id: String,
    pub activity_type: ActivityType,
    pub task_list: String,
    pub input: Option<Payload>,
    pub schedule_to_close_timeout_seconds: i32,
    pub start_to_close_timeout_seconds: i32,
    pub heartbeat_timeout_seconds: i32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestCancelActivityTaskDecisionAttributes {
    pub activity_id: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StartTimerDecisionAttributes {
    pub timer_id: String,
    pub start_to_fire_timeout_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CancelTimerDecisionAttributes {
    pub timer_id: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordMarkerDecisionAttributes {
    pub marker_name: String,
    pub details: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompleteWorkflowExecutionDecisionAttributes {
    pub result: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FailWorkflowExecutionDecisionAttributes {
    pub reason: String,
    pub details: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CancelWorkflowExecutionDecisionAttributes {
    pub details: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContinueAsNewWorkflowExecutionDecisionAttributes {
    pub workflow_type: WorkflowType,
    pub task_list: String,
    pub input: Option<Payload>,
    pub execution_start_to_close_timeout_seconds: i32,
    pub task_start_to_close_timeout_seconds: i32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StartChildWorkflowExecutionDecisionAttributes {
    pub domain: String,
    pub workflow_id: String,
    pub workflow_type: WorkflowType,
    pub task_list: String,
    pub input: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestCancelExternalWorkflowExecutionDecisionAttributes {
    pub domain: String,
    pub workflow_id: String,
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignalExternalWorkflowExecutionDecisionAttributes {
    pub domain: String,
    pub workflow_id: String,
    pub run_id: String,
    pub signal_name: String,
    pub input: Option<Payload>,
}
