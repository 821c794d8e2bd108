//! Per-run cached workflow state and its processing pass.

use crate::{
    errors::{WorkflowError, WorkflowTaskError},
    protocol::{
        decisions::Decision,
        history::{EventType, HistoryEvent, LOCAL_ACTIVITY_MARKER_NAME},
        service::{DecisionTaskCompletion, PollForDecisionTaskResponse, ResetStickyTaskListRequest},
        WorkflowInfo,
    },
    worker::{
        workflow::{
            event_handler::{CompletionHandle, EventHandler},
            history::{
                is_decision_event, is_full_history, reset_history, HistoryIterator,
                ReorderedHistory,
            },
            matcher::match_replay_with_history,
            WorkflowTaskHandler,
        },
        LocalActivityDispatch, LocalActivityResult, LocalActivityTunnel, TunnelResult,
    },
    NonDeterministicWorkflowPolicy,
};
use std::{
    mem,
    sync::{Arc, Weak},
    time::{Duration, Instant, SystemTime},
};
use tokio::sync::OwnedMutexGuard;

/// A workflow run suspended on this worker. Shared between the sticky cache, in-flight
/// processing passes, and dispatched local activities; all state lives behind one async mutex
/// held for the entirety of each processing pass.
pub struct WorkflowContext {
    run_id: String,
    workflow_id: String,
    state: Arc<tokio::sync::Mutex<ContextState>>,
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("run_id", &self.run_id)
            .field("workflow_id", &self.workflow_id)
            .finish()
    }
}

pub(crate) struct ContextState {
    pub(crate) wth: Arc<WorkflowTaskHandler>,
    pub(crate) me: Weak<WorkflowContext>,
    pub(crate) workflow_info: WorkflowInfo,
    pub(crate) workflow_start_time: SystemTime,
    /// None means the context is destroyed and must be rebuilt (with a full-history fetch)
    /// before the next processing pass.
    pub(crate) event_handler: Option<Box<dyn EventHandler>>,
    pub(crate) completion: CompletionHandle,
    /// Event id of the last `DecisionTaskStarted` the handler has consumed up to. Zero before
    /// the first task; query tasks leave it untouched.
    pub(crate) previous_started_event_id: i64,
    pub(crate) new_decisions: Vec<Decision>,
    pub(crate) current_task: Option<PollForDecisionTaskResponse>,
    pub(crate) decision_start_time: Instant,
    pub(crate) la_tunnel: Option<LocalActivityTunnel>,
}

impl WorkflowContext {
    pub(crate) fn new(
        wth: Arc<WorkflowTaskHandler>,
        workflow_info: WorkflowInfo,
        workflow_start_time: SystemTime,
        la_tunnel: Option<LocalActivityTunnel>,
    ) -> Arc<Self> {
        let run_id = workflow_info.workflow_execution.run_id.clone();
        let workflow_id = workflow_info.workflow_execution.workflow_id.clone();
        Arc::new_cyclic(|me| {
            let completion = CompletionHandle::default();
            let event_handler = wth.create_event_handler(&workflow_info, &completion);
            WorkflowContext {
                run_id,
                workflow_id,
                state: Arc::new(tokio::sync::Mutex::new(ContextState {
                    wth,
                    me: me.clone(),
                    workflow_info,
                    workflow_start_time,
                    event_handler: Some(event_handler),
                    completion,
                    previous_started_event_id: 0,
                    new_decisions: vec![],
                    current_task: None,
                    decision_start_time: Instant::now(),
                    la_tunnel,
                })),
            }
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub(crate) async fn lock(&self) -> OwnedMutexGuard<ContextState> {
        self.state.clone().lock_owned().await
    }

    /// Stack trace of the suspended workflow, if it still has live state.
    pub async fn stack_trace(&self) -> String {
        self.lock().await.stack_trace()
    }

    /// Time budget the server gives each decision task for this workflow.
    pub async fn decision_timeout(&self) -> Duration {
        self.lock().await.decision_timeout()
    }

    /// Callback for a finished local activity. Feeds the result to the event handler and, if no
    /// further local activity work is pending, completes the suspended decision task.
    pub async fn process_local_activity_result(
        self: &Arc<Self>,
        result: LocalActivityResult,
    ) -> Result<Option<DecisionTaskCompletion>, WorkflowTaskError> {
        let mut state = self.lock().await;
        let wth = state.wth.clone();
        let handled = match state.event_handler.as_mut() {
            Some(handler) => handler.process_local_activity_result(result),
            None => {
                warn!(run_id = %self.run_id, "Dropping local activity result for destroyed context");
                return Ok(None);
            }
        };
        match handled {
            Ok(()) => {
                let completion = state.complete_decision_task(true).await;
                wth.unlock(self, state, false);
                Ok(completion)
            }
            Err(source) => {
                let err = WorkflowTaskError::EventHandling {
                    run_id: self.run_id.clone(),
                    source,
                };
                wth.unlock(self, state, true);
                Err(err)
            }
        }
    }

    /// Runs when the sticky cache pushes this context out. Live contexts ask the worker to tell
    /// the server to release affinity; the request must be enqueued before state is cleared,
    /// since a destroyed context must not be touched again.
    pub(crate) async fn on_eviction(&self) {
        let mut state = self.lock().await;
        if state.should_reset_sticky_on_eviction() {
            state.queue_reset_stickiness().await;
        }
        state.clear_state();
    }
}

impl ContextState {
    pub(crate) fn is_destroyed(&self) -> bool {
        self.event_handler.is_none()
    }

    /// Not every eviction warrants a server call: contexts that completed or failed already had
    /// their affinity dropped by the terminal respond request.
    fn should_reset_sticky_on_eviction(&self) -> bool {
        self.completion.error().is_none() && !self.completion.is_completed()
    }

    async fn queue_reset_stickiness(&mut self) {
        let request = ResetStickyTaskListRequest {
            domain: self.workflow_info.domain.clone(),
            execution: self.workflow_info.workflow_execution.clone(),
        };
        if let Some(tunnel) = &self.la_tunnel {
            tunnel.send_result(TunnelResult::ResetStickiness(request)).await;
        }
    }

    pub(crate) fn has_pending_local_activity_work(&self) -> bool {
        !self.completion.is_completed()
            && self
                .event_handler
                .as_ref()
                .map(|h| h.pending_local_activity_count() > 0)
                .unwrap_or(false)
    }

    pub(crate) fn clear_current_task(&mut self) {
        self.new_decisions.clear();
        self.current_task = None;
    }

    pub(crate) fn clear_state(&mut self) {
        self.clear_current_task();
        self.completion = CompletionHandle::default();
        self.previous_started_event_id = 0;
        if let Some(mut handler) = self.event_handler.take() {
            handler.close();
        }
    }

    pub(crate) fn create_event_handler(&mut self) {
        self.clear_state();
        let completion = CompletionHandle::default();
        self.event_handler = Some(
            self.wth
                .create_event_handler(&self.workflow_info, &completion),
        );
        self.completion = completion;
    }

    fn set_current_task(&mut self, task: PollForDecisionTaskResponse) {
        // query tasks must not advance replay progress
        if task.query.is_none() {
            self.previous_started_event_id = task.started_event_id;
        }
        self.decision_start_time = Instant::now();
        self.current_task = Some(task);
    }

    pub(crate) fn stack_trace(&self) -> String {
        match &self.event_handler {
            Some(handler) => handler.stack_trace(),
            None => "event handler is closed".to_string(),
        }
    }

    /// Time budget the server gives each decision task for this workflow.
    pub(crate) fn decision_timeout(&self) -> Duration {
        self.workflow_info.task_start_to_close_timeout
    }

    /// The cached state is stale when the incoming task's first event does not directly follow
    /// what the handler has consumed; events are missing and the run must be rebuilt from full
    /// history.
    pub(crate) async fn reset_if_stale(
        &mut self,
        task: &mut PollForDecisionTaskResponse,
        iterator: &mut dyn HistoryIterator,
    ) -> Result<(), WorkflowTaskError> {
        let first_event_id = match task.history.events.first() {
            Some(e) => e.event_id,
            None => return Ok(()),
        };
        if first_event_id != self.previous_started_event_id + 1 {
            debug!(
                workflow_id = %task.workflow_execution.workflow_id,
                run_id = %task.workflow_execution.run_id,
                cached_previous_started_event_id = self.previous_started_event_id,
                task_first_event_id = first_event_id,
                task_started_event_id = task.started_event_id,
                "Cached state stale, new task has unexpected events",
            );
            self.wth
                .metrics
                .for_workflow_type(task.workflow_type.name.clone())
                .sticky_cache_stall();
            self.clear_state();
            self.reset_state_if_destroyed(task, iterator).await?;
        }
        Ok(())
    }

    /// Two tasks (say a decision and a query) can retrieve the same cached context; if the first
    /// finished with an error it destroyed the state, and the second must rebuild it and replay
    /// from the beginning of history.
    pub(crate) async fn reset_state_if_destroyed(
        &mut self,
        task: &mut PollForDecisionTaskResponse,
        iterator: &mut dyn HistoryIterator,
    ) -> Result<(), WorkflowTaskError> {
        if self.is_destroyed() {
            self.create_event_handler();
            if !is_full_history(&task.history) {
                reset_history(task, iterator).await?;
            }
        }
        Ok(())
    }

    /// Process all the events of one decision task and assemble the respond request. Returns
    /// `None` when the task cannot respond yet because local activities are still running.
    pub(crate) async fn process_workflow_task(
        &mut self,
        mut task: PollForDecisionTaskResponse,
        iterator: &mut dyn HistoryIterator,
    ) -> Result<Option<DecisionTaskCompletion>, WorkflowTaskError> {
        self.reset_if_stale(&mut task, iterator).await?;

        let skip_replay_check = task.query.is_some() || !is_full_history(&task.history);
        let previous_started_event_id = task.previous_started_event_id;
        let events = mem::take(&mut task.history.events);
        self.set_current_task(task);

        let run_id = self.workflow_info.workflow_execution.run_id.clone();
        let workflow_type = self.workflow_info.workflow_type.name.clone();
        let wth = self.wth.clone();
        let mut event_handler = self.event_handler.take().ok_or_else(|| {
            WorkflowTaskError::MalformedHistory("no event handler for processing pass".to_string())
        })?;

        let mut reordered = ReorderedHistory::new(events, previous_started_event_id, iterator);
        let loop_result = run_replay_loop(
            &wth,
            event_handler.as_mut(),
            &mut reordered,
            skip_replay_check,
            &run_id,
            &workflow_type,
        )
        .await;
        self.event_handler = Some(event_handler);
        loop_result?;

        Ok(self.complete_decision_task(true).await)
    }

    /// Close out the current task: dispatch unstarted local activities, and unless we must wait
    /// for their results, drain decisions and build the respond request.
    pub(crate) async fn complete_decision_task(
        &mut self,
        wait_for_local_activities: bool,
    ) -> Option<DecisionTaskCompletion> {
        self.current_task.as_ref()?;

        // The tunnel can be absent for pure replay hosts; pending local activities are then
        // irrelevant because nothing will ever run them.
        if self.has_pending_local_activity_work() && self.la_tunnel.is_some() {
            let unstarted = self
                .event_handler
                .as_mut()
                .map(|h| h.take_unstarted_local_activities())
                .unwrap_or_default();
            if !unstarted.is_empty() {
                if let (Some(context), Some(tunnel)) = (self.me.upgrade(), self.la_tunnel.clone())
                {
                    for task in unstarted {
                        tunnel
                            .send_task(LocalActivityDispatch {
                                task,
                                context: context.clone(),
                            })
                            .await;
                    }
                }
            }
            if wait_for_local_activities {
                return None;
            }
        }

        if let Some(handler) = self.event_handler.as_mut() {
            let event_decisions = handler.drain_decisions();
            self.new_decisions.extend(event_decisions);
        }

        let decisions = mem::take(&mut self.new_decisions);
        let wth = self.wth.clone();
        let completion = wth.complete_workflow(self, decisions, !wait_for_local_activities);
        self.clear_current_task();
        completion
    }
}

async fn run_replay_loop(
    wth: &Arc<WorkflowTaskHandler>,
    handler: &mut dyn EventHandler,
    reordered: &mut ReorderedHistory<'_>,
    skip_replay_check: bool,
    run_id: &str,
    workflow_type: &str,
) -> Result<(), WorkflowTaskError> {
    let event_handling_err = |source: anyhow::Error| WorkflowTaskError::EventHandling {
        run_id: run_id.to_string(),
        source,
    };

    let mut replay_decisions: Vec<Decision> = vec![];
    let mut respond_events: Vec<HistoryEvent> = vec![];

    loop {
        let (reordered_events, markers) = reordered.next_decision_events().await?;
        if reordered_events.is_empty() {
            break;
        }

        // Markers were produced by the decision currently re-executing; apply them before its
        // events so side-effect and version state is already visible. Local activity markers
        // must instead follow the decision task started event.
        for marker in &markers {
            if marker.marker_name() != Some(LOCAL_ACTIVITY_MARKER_NAME) {
                handler
                    .process_event(marker, true, false)
                    .map_err(event_handling_err)?;
            }
        }

        let last_index = reordered_events.len() - 1;
        for (i, event) in reordered_events.iter().enumerate() {
            let is_in_replay = reordered.is_replay_event(event);
            let is_last = !is_in_replay && i == last_index;

            if !skip_replay_check && is_decision_event(event.event_type()) {
                respond_events.push(event.clone());
            }

            // marker events were applied above or are deferred below
            if event.event_type() == EventType::MarkerRecorded {
                continue;
            }

            wth.execute_any_pressure_points(event, is_in_replay)?;

            handler
                .process_event(event, is_in_replay, is_last)
                .map_err(event_handling_err)?;
        }

        for marker in &markers {
            if marker.marker_name() == Some(LOCAL_ACTIVITY_MARKER_NAME) {
                handler
                    .process_event(marker, true, false)
                    .map_err(event_handling_err)?;
            }
        }

        let batch_was_replay = reordered_events
            .last()
            .map(|e| reordered.is_replay_event(e))
            .unwrap_or(false);
        if batch_was_replay {
            let event_decisions = handler.drain_decisions();
            if !event_decisions.is_empty() && !skip_replay_check {
                replay_decisions.extend(event_decisions);
            }
        }
    }

    if !skip_replay_check {
        if let Err(mismatch) = match_replay_with_history(&replay_decisions, &respond_events) {
            wth.metrics
                .for_workflow_type(workflow_type.to_string())
                .non_deterministic_error();
            error!(
                run_id,
                workflow_type,
                error = %mismatch,
                "Replay and history mismatch",
            );
            // Whether the outcome lands on the completion slot or is returned as an error is
            // observable: a stored outcome flows into a respond request that fails the
            // workflow, while a returned error suppresses the response entirely and the server
            // sees a decision task timeout.
            match wth.non_deterministic_workflow_policy {
                NonDeterministicWorkflowPolicy::FailWorkflow => {
                    handler.complete(
                        None,
                        Some(WorkflowError::custom(
                            "nondeterministic workflow",
                            Some(mismatch.to_string().into_bytes()),
                        )),
                    );
                }
                NonDeterministicWorkflowPolicy::BlockWorkflow => {
                    return Err(mismatch.into());
                }
            }
        }
    }

    Ok(())
}
