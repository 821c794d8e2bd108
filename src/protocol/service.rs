//! Poll task shapes coming in from the transport and respond requests going back out.

use crate::{
    protocol::{
        decisions::Decision,
        history::History,
        ActivityType, Payload, WorkflowExecution, WorkflowType,
    },
    task_token::TaskToken,
};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkflowQuery {
    pub query_type: String,
    pub query_args: Option<Payload>,
}

/// A decision task as delivered by a poll. `history` holds the first page only; the rest is
/// reachable through the task's history iterator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PollForDecisionTaskResponse {
    pub task_token: TaskToken,
    pub workflow_execution: WorkflowExecution,
    pub workflow_type: WorkflowType,
    pub history: History,
    pub previous_started_event_id: i64,
    pub started_event_id: i64,
    pub attempt: i64,
    pub query: Option<WorkflowQuery>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PollForActivityTaskResponse {
    pub task_token: TaskToken,
    pub workflow_execution: WorkflowExecution,
    pub activity_id: String,
    pub activity_type: ActivityType,
    pub input: Option<Payload>,
    pub heartbeat_timeout_seconds: i32,
    pub schedule_to_close_timeout_seconds: i32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RespondDecisionTaskCompletedRequest {
    pub task_token: TaskToken,
    pub decisions: Vec<Decision>,
    pub identity: String,
    pub return_new_decision_task: bool,
    pub force_create_new_decision_task: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionTaskFailedCause {
    UnhandledDecision,
    BadScheduleActivityAttributes,
    WorkflowWorkerUnhandledFailure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RespondDecisionTaskFailedRequest {
    pub task_token: TaskToken,
    pub cause: DecisionTaskFailedCause,
    pub details: Option<Payload>,
    pub identity: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTaskCompletedType {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RespondQueryTaskCompletedRequest {
    pub task_token: TaskToken,
    pub completed_type: QueryTaskCompletedType,
    pub query_result: Option<Payload>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RespondActivityTaskCompletedRequest {
    pub task_token: TaskToken,
    pub result: Option<Payload>,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RespondActivityTaskFailedRequest {
    pub task_token: TaskToken,
    pub reason: String,
    pub details: Option<Payload>,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RespondActivityTaskCanceledRequest {
    pub task_token: TaskToken,
    pub details: Option<Payload>,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordActivityTaskHeartbeatRequest {
    pub task_token: TaskToken,
    pub details: Option<Payload>,
    pub identity: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordActivityTaskHeartbeatResponse {
    pub cancel_requested: bool,
}

/// Asks the server to drop worker affinity for a run, so its next decision task is scheduled on
/// the non-sticky task list.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetStickyTaskListRequest {
    pub domain: String,
    pub execution: WorkflowExecution,
}

/// The outcome of processing one decision task, ready for the transport to send.
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionTaskCompletion {
    Completed(RespondDecisionTaskCompletedRequest),
    Failed(RespondDecisionTaskFailedRequest),
    QueryCompleted(RespondQueryTaskCompletedRequest),
}

/// The outcome of executing one activity task. Asynchronously-completing activities produce no
/// completion at all.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityTaskCompletion {
    Completed(RespondActivityTaskCompletedRequest),
    Failed(RespondActivityTaskFailedRequest),
    Canceled(RespondActivityTaskCanceledRequest),
}
