//! Shared fixtures for unit and scenario tests.


pub use history_builder::{history_event, TestHistoryBuilder};

use crate::{
    errors::{ServiceError, WorkflowError},
    protocol::{
        decisions::Decision,
        history::{EventType, History, HistoryEvent},
        Payload, WorkflowInfo,
    },
    worker::{
        workflow::{
            event_handler::{CompletionHandle, EventHandler, EventHandlerEnv, EventHandlerFactory},
            history::HistoryIterator,
        },
        LocalActivityResult, LocalActivityTask,
    },
};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

/// Iterator for tasks that already carry their complete history.
pub struct EmptyHistoryIterator;

#[async_trait::async_trait]
impl HistoryIterator for EmptyHistoryIterator {
    fn reset(&mut self) {}

    fn has_next_page(&self) -> bool {
        false
    }

    async fn next_page(&mut self) -> Result<History, ServiceError> {
        Err(ServiceError::Internal(
            "no history pages available".to_string(),
        ))
    }
}

/// Serves history pages from memory. `from_pages` positions the cursor mid-history, the way a
/// server continuation token would; `new` starts exhausted so only a `reset` exposes the pages.
pub struct TestHistoryIterator {
    all_pages: Vec<Vec<HistoryEvent>>,
    pending: VecDeque<Vec<HistoryEvent>>,
}

impl TestHistoryIterator {
    pub fn new(full_history: Vec<HistoryEvent>, page_size: usize) -> Self {
        let all_pages: Vec<Vec<HistoryEvent>> = full_history
            .chunks(page_size.max(1))
            .map(|c| c.to_vec())
            .collect();
        Self {
            all_pages,
            pending: VecDeque::new(),
        }
    }

    pub fn from_pages(pages: Vec<Vec<HistoryEvent>>) -> Self {
        Self {
            all_pages: pages.clone(),
            pending: pages.into(),
        }
    }
}

#[async_trait::async_trait]
impl HistoryIterator for TestHistoryIterator {
    fn reset(&mut self) {
        self.pending = self.all_pages.clone().into();
    }

    fn has_next_page(&self) -> bool {
        !self.pending.is_empty()
    }

    async fn next_page(&mut self) -> Result<History, ServiceError> {
        self.pending
            .pop_front()
            .map(|events| History { events })
            .ok_or_else(|| ServiceError::Internal("fetched past end of history".to_string()))
    }
}

/// What a [ScriptedEventHandler] does when it sees the n-th `DecisionTaskStarted` event
/// (1-indexed) of its lifetime.
#[derive(Clone, Default)]
pub struct ScriptAction {
    pub decisions: Vec<Decision>,
    pub complete: Option<(Option<Payload>, Option<WorkflowError>)>,
}

impl ScriptAction {
    pub fn decide(decisions: Vec<Decision>) -> Self {
        Self {
            decisions,
            complete: None,
        }
    }

    pub fn complete_workflow(result: Option<Payload>) -> Self {
        Self {
            decisions: vec![],
            complete: Some((result, None)),
        }
    }
}

/// Introspection shared between a factory, the handlers it created, and the test body.
#[derive(Default)]
pub struct HandlerState {
    pub processed: Vec<(i64, EventType, bool, bool)>,
    pub created: usize,
    pub closed: usize,
    pub queries: Vec<String>,
}

/// Stand-in for the workflow coroutine dispatcher: replays a fixed script keyed by decision
/// number, which makes it deterministic across replays of the same history.
pub struct ScriptedEventHandler {
    completion: CompletionHandle,
    actions: HashMap<usize, ScriptAction>,
    state: Arc<parking_lot::Mutex<HandlerState>>,
    queued_decisions: Vec<Decision>,
    started_count: usize,
    unstarted_local_activities: Vec<LocalActivityTask>,
    pending_local_activities: usize,
    la_completes_workflow: bool,
    query_response: Option<Result<Option<Payload>, String>>,
}

impl EventHandler for ScriptedEventHandler {
    fn process_event(
        &mut self,
        event: &HistoryEvent,
        is_replay: bool,
        is_last: bool,
    ) -> Result<(), anyhow::Error> {
        self.state
            .lock()
            .processed
            .push((event.event_id, event.event_type(), is_replay, is_last));
        if event.event_type() == EventType::DecisionTaskStarted {
            self.started_count += 1;
            if let Some(action) = self.actions.get(&self.started_count) {
                self.queued_decisions.extend(action.decisions.clone());
                if let Some((result, error)) = &action.complete {
                    self.completion.complete(result.clone(), error.clone());
                }
            }
        }
        Ok(())
    }

    fn process_query(
        &mut self,
        query_type: &str,
        _query_args: Option<&Payload>,
    ) -> Result<Option<Payload>, anyhow::Error> {
        self.state.lock().queries.push(query_type.to_string());
        match &self.query_response {
            Some(Ok(result)) => Ok(result.clone()),
            Some(Err(message)) => Err(anyhow::anyhow!("{}", message.clone())),
            None => Ok(Some(b"query-result".to_vec())),
        }
    }

    fn process_local_activity_result(
        &mut self,
        result: LocalActivityResult,
    ) -> Result<(), anyhow::Error> {
        self.pending_local_activities = self.pending_local_activities.saturating_sub(1);
        if self.la_completes_workflow && self.pending_local_activities == 0 {
            let payload = result.result.ok().flatten();
            self.completion.complete(payload, None);
        }
        Ok(())
    }

    fn complete(&mut self, result: Option<Payload>, error: Option<WorkflowError>) {
        self.completion.complete(result, error);
    }

    fn drain_decisions(&mut self) -> Vec<Decision> {
        std::mem::take(&mut self.queued_decisions)
    }

    fn pending_local_activity_count(&self) -> usize {
        self.pending_local_activities
    }

    fn take_unstarted_local_activities(&mut self) -> Vec<LocalActivityTask> {
        std::mem::take(&mut self.unstarted_local_activities)
    }

    fn stack_trace(&self) -> String {
        "scripted handler has no stack".to_string()
    }

    fn close(&mut self) {
        self.state.lock().closed += 1;
    }
}

/// Creates [ScriptedEventHandler]s from a shared template.
#[derive(Default)]
pub struct ScriptedHandlerFactory {
    pub actions: HashMap<usize, ScriptAction>,
    pub state: Arc<parking_lot::Mutex<HandlerState>>,
    pub unstarted_local_activities: Vec<LocalActivityTask>,
    pub la_completes_workflow: bool,
    pub query_response: Option<Result<Option<Payload>, String>>,
}

impl ScriptedHandlerFactory {
    pub fn with_actions(actions: impl IntoIterator<Item = (usize, ScriptAction)>) -> Self {
        Self {
            actions: actions.into_iter().collect(),
            ..Default::default()
        }
    }
}

impl EventHandlerFactory for ScriptedHandlerFactory {
    fn create(
        &self,
        _info: &WorkflowInfo,
        completion: CompletionHandle,
        _env: EventHandlerEnv,
    ) -> Box<dyn EventHandler> {
        let mut state = self.state.lock();
        state.created += 1;
        drop(state);
        Box::new(ScriptedEventHandler {
            completion,
            actions: self.actions.clone(),
            state: self.state.clone(),
            queued_decisions: vec![],
            started_count: 0,
            unstarted_local_activities: self.unstarted_local_activities.clone(),
            pending_local_activities: self.unstarted_local_activities.len(),
            la_completes_workflow: self.la_completes_workflow,
            query_response: self.query_response.clone(),
        })
    }
}
