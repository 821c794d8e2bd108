//! Error types exposed by public APIs.

use crate::protocol::{Payload, WorkflowType};

/// Reason string used when a terminal failure originated in a panic rather than a value returned
/// by workflow code.
pub const PANIC_ERROR_REASON: &str = "cadenceInternal:Panic";

/// A terminal workflow outcome that is not a clean completion. Stored on the execution context's
/// completion slot and translated into a closing decision when the task completes.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    /// Workflow code raised an unrecoverable fault. Fails the decision task (not the workflow)
    /// with the captured stack trace.
    #[error("workflow panic: {reason}")]
    Panic { reason: String, stack_trace: String },
    /// Cooperative cancellation was honored by the workflow.
    #[error("workflow canceled")]
    Canceled { details: Option<Payload> },
    /// Not an error: the workflow wants to close this run and start a fresh one.
    #[error("continue as new")]
    ContinueAsNew(ContinueAsNewParams),
    /// Workflow code returned an error; fails the workflow with reason and details.
    #[error("{reason}")]
    Custom {
        reason: String,
        details: Option<Payload>,
    },
}

impl WorkflowError {
    pub fn custom(reason: impl Into<String>, details: Option<Payload>) -> Self {
        Self::Custom {
            reason: reason.into(),
            details,
        }
    }
}

/// Parameters carried by [WorkflowError::ContinueAsNew] for the replacement run.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinueAsNewParams {
    pub workflow_type: WorkflowType,
    pub task_list: String,
    pub input: Option<Payload>,
    pub execution_start_to_close_timeout_seconds: i32,
    pub task_start_to_close_timeout_seconds: i32,
}

/// Replay produced decisions that do not line up with recorded history. Routed through the
/// configured [crate::NonDeterministicWorkflowPolicy].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum NondeterminismError {
    #[error("nondeterministic workflow: missing replay decision for {event}")]
    MissingDecision { event: String },
    #[error("nondeterministic workflow: extra replay decision for {decision}")]
    ExtraDecision { decision: String },
    #[error("nondeterministic workflow: history event is {event}, replay decision is {decision}")]
    Mismatch { event: String, decision: String },
}

/// Errors surfaced by the [crate::worker::client::WorkflowService] transport.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// The referenced entity is gone server-side. On the heartbeat path this is treated as a
    /// cancellation signal.
    #[error("entity not exists: {0}")]
    EntityNotExists(String),
    #[error("service busy: {0}")]
    ServiceBusy(String),
    #[error("internal service error: {0}")]
    Internal(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ServiceError {
    /// Transient errors are retried under the active [crate::retry_logic::RetryPolicy]; anything
    /// else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::ServiceBusy(_) | ServiceError::Internal(_) | ServiceError::Unavailable(_)
        )
    }
}

/// Errors thrown by [crate::worker::workflow::WorkflowTaskHandler::process_workflow_task].
/// A non-nil error at unlock evicts the run from the sticky cache.
#[derive(thiserror::Error, Debug)]
pub enum WorkflowTaskError {
    /// The task carried neither a query nor any history events. Nothing can be done with it.
    #[error("decision task has no query and no history events")]
    EmptyTask,
    /// The task's history does not have the shape the handler requires.
    #[error("malformed history: {0}")]
    MalformedHistory(String),
    /// History page fetching or another service call failed.
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// The event handler rejected an event. The cached state for this run is discarded.
    #[error("error processing history event for run {run_id}: {source:?}")]
    EventHandling {
        run_id: String,
        #[source]
        source: anyhow::Error,
    },
    /// Replay mismatch under the BlockWorkflow policy: no response is produced and the server
    /// will see the task time out.
    #[error(transparent)]
    Nondeterminism(#[from] NondeterminismError),
    /// A pressure point test hook asked for this task to fail.
    #[error("pressure point triggered: {0:?}")]
    PressurePoint(anyhow::Error),
}

/// The outcome of user activity code, as distinct from handler-level failures.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ActivityError {
    /// The activity honored a cancellation request.
    #[error("activity canceled")]
    Canceled { details: Option<Payload> },
    /// The activity failed with a reason the workflow can inspect.
    #[error("{reason}")]
    Failed {
        reason: String,
        details: Option<Payload>,
    },
    /// The activity will complete asynchronously; no respond request should be produced now.
    #[error("activity result pending")]
    ResultPending,
}

/// Errors thrown by [crate::worker::activities::ActivityTaskHandler::execute].
#[derive(thiserror::Error, Debug)]
pub enum ActivityTaskError {
    #[error("unable to find activity type {requested}. Supported types: [{supported}]")]
    UnknownActivityType { requested: String, supported: String },
    /// The schedule-to-close deadline elapsed while the activity was running.
    #[error("activity deadline exceeded")]
    DeadlineExceeded,
}

/// Errors returned to activity code from [crate::worker::activities::ActivityInvoker::heartbeat].
/// Cancellation is reported as an error so the activity can decide whether to honor it.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum HeartbeatError {
    #[error("activity cancellation requested")]
    Canceled,
    #[error(transparent)]
    Service(#[from] ServiceError),
}
