//! Worker-side task handling: workflow (decision) tasks, activity tasks, and the plumbing
//! connecting cached workflow state back to the worker that owns it.

pub mod activities;
pub mod client;
pub mod workflow;

use crate::{
    errors::ActivityError,
    protocol::{service::ResetStickyTaskListRequest, Payload},
    worker::workflow::WorkflowContext,
};
use std::{fmt, sync::Arc};
use tokio::sync::mpsc;

/// Default bound for both tunnel channels.
pub const DEFAULT_LOCAL_ACTIVITY_TUNNEL_CAPACITY: usize = 1000;

/// A local activity surfaced by workflow state, to be run in-process before the decision task
/// responds.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalActivityTask {
    pub activity_id: String,
    pub activity_type: String,
    pub input: Option<Payload>,
}

/// Outcome of one local activity, reported back through
/// [WorkflowContext::process_local_activity_result].
#[derive(Debug, Clone, PartialEq)]
pub struct LocalActivityResult {
    pub activity_id: String,
    pub result: Result<Option<Payload>, ActivityError>,
}

/// A local activity handed to the worker's runner, with the execution context to call back into
/// once it finishes.
pub struct LocalActivityDispatch {
    pub task: LocalActivityTask,
    pub context: Arc<WorkflowContext>,
}

impl fmt::Debug for LocalActivityDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalActivityDispatch")
            .field("task", &self.task)
            .field("run_id", &self.context.run_id())
            .finish()
    }
}

/// Traffic flowing back to the worker on the tunnel's result channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TunnelResult {
    LocalActivity(LocalActivityResult),
    /// Enqueued when a live execution context is evicted from the sticky cache; the worker must
    /// forward this to the server so it releases task affinity for the run.
    ResetStickiness(ResetStickyTaskListRequest),
}

/// Bounded channel pair connecting cached workflow contexts to the worker that runs local
/// activities. Contexts receive a clone when they enter the cache, so a context never owns the
/// worker and eviction can outlive it.
#[derive(Clone, Debug)]
pub struct LocalActivityTunnel {
    task_tx: mpsc::Sender<LocalActivityDispatch>,
    result_tx: mpsc::Sender<TunnelResult>,
}

impl LocalActivityTunnel {
    /// Returns the tunnel plus the receiving halves the worker drains: dispatched local activity
    /// tasks, and results / reset-stickiness requests.
    pub fn new(
        capacity: usize,
    ) -> (
        Self,
        mpsc::Receiver<LocalActivityDispatch>,
        mpsc::Receiver<TunnelResult>,
    ) {
        let (task_tx, task_rx) = mpsc::channel(capacity);
        let (result_tx, result_rx) = mpsc::channel(capacity);
        (Self { task_tx, result_tx }, task_rx, result_rx)
    }

    pub(crate) async fn send_task(&self, dispatch: LocalActivityDispatch) {
        if self.task_tx.send(dispatch).await.is_err() {
            warn!("Local activity runner is gone, dropping dispatched task");
        }
    }

    pub(crate) async fn send_result(&self, result: TunnelResult) {
        if self.result_tx.send(result).await.is_err() {
            warn!("Worker result channel is gone, dropping notice");
        }
    }
}
