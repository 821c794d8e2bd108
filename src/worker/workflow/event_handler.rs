//! The contract between the task handler and the workflow coroutine dispatcher.
//!
//! How workflow code actually runs - cooperative fibers, a generated state machine, an async
//! task, an interpreter - is none of this crate's business. The dispatcher sits behind
//! [EventHandler]: it consumes history events, advances workflow state, and yields the decisions
//! that state produced since the last drain.

use crate::{
    errors::WorkflowError,
    protocol::{decisions::Decision, history::HistoryEvent, Payload, WorkflowInfo},
    telemetry::MetricsContext,
    worker::{LocalActivityResult, LocalActivityTask},
    DataConverter,
};
use std::sync::Arc;

/// Environment handed to a freshly-created event handler.
#[derive(Clone)]
pub struct EventHandlerEnv {
    pub metrics: MetricsContext,
    /// When false, workflow-facing log statements are suppressed while replaying.
    pub enable_logging_in_replay: bool,
    pub data_converter: Arc<dyn DataConverter>,
}

/// Drives workflow state for one run. Methods are invoked with the owning execution context's
/// mutex held, so implementations never see concurrent calls.
pub trait EventHandler: Send {
    /// Consume one history event. `is_replay` is true when the event was already observed by a
    /// prior decision task; `is_last` only for a non-replay event that closes its batch.
    fn process_event(
        &mut self,
        event: &HistoryEvent,
        is_replay: bool,
        is_last: bool,
    ) -> Result<(), anyhow::Error>;

    /// Answer a query against current workflow state.
    fn process_query(
        &mut self,
        query_type: &str,
        query_args: Option<&Payload>,
    ) -> Result<Option<Payload>, anyhow::Error>;

    /// Feed back the outcome of a dispatched local activity.
    fn process_local_activity_result(
        &mut self,
        result: LocalActivityResult,
    ) -> Result<(), anyhow::Error>;

    /// Force a terminal outcome onto the workflow, as if its code had finished with it.
    fn complete(&mut self, result: Option<Payload>, error: Option<WorkflowError>);

    /// Decisions accumulated since the last drain, in generation order.
    fn drain_decisions(&mut self) -> Vec<Decision>;

    /// Local activities surfaced by workflow state that have not finished yet.
    fn pending_local_activity_count(&self) -> usize;

    /// Local activities that have not been handed to the runner yet. Returned tasks are
    /// considered started and will not be returned again.
    fn take_unstarted_local_activities(&mut self) -> Vec<LocalActivityTask>;

    /// Stack trace of the suspended workflow, for debugging queries.
    fn stack_trace(&self) -> String;

    /// Tear down dispatcher resources. The handler is never used again afterwards.
    fn close(&mut self);
}

/// Creates event handlers for arbitrary workflow types; typically backed by the host's workflow
/// registry.
pub trait EventHandlerFactory: Send + Sync {
    fn create(
        &self,
        info: &WorkflowInfo,
        completion: CompletionHandle,
        env: EventHandlerEnv,
    ) -> Box<dyn EventHandler>;
}

/// The slot an event handler reports its workflow's terminal outcome through. Cloned into the
/// handler at creation; the execution context reads it after each processing pass.
///
/// Uses its own small lock rather than the context mutex: `complete` is called from inside
/// `process_event`, while the context mutex is already held by the processing pass.
#[derive(Clone, Debug, Default)]
pub struct CompletionHandle {
    state: Arc<parking_lot::Mutex<CompletionState>>,
}

#[derive(Debug, Default)]
struct CompletionState {
    completed: bool,
    result: Option<Payload>,
    error: Option<WorkflowError>,
}

impl CompletionHandle {
    /// Record the terminal outcome. Later calls overwrite earlier ones; the forced completion of
    /// a nondeterministic workflow takes precedence over whatever replay produced.
    pub fn complete(&self, result: Option<Payload>, error: Option<WorkflowError>) {
        let mut state = self.state.lock();
        state.completed = true;
        state.result = result;
        state.error = error;
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    pub fn result(&self) -> Option<Payload> {
        self.state.lock().result.clone()
    }

    pub fn error(&self) -> Option<WorkflowError> {
        self.state.lock().error.clone()
    }
}
