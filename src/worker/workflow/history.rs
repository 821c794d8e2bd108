//! History reordering: partitioning a raw event stream into the sequences each successive
//! decision observes.

use crate::{
    errors::{ServiceError, WorkflowTaskError},
    protocol::{
        history::{EventType, History, HistoryEvent},
        service::PollForDecisionTaskResponse,
    },
};

/// A restartable paged cursor over a workflow execution's history. Implemented by the transport
/// layer; the task handler only ever walks it forward or rewinds it to the beginning.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait HistoryIterator: Send {
    /// Rewind so the next fetched page is the first page of history.
    fn reset(&mut self);
    fn has_next_page(&self) -> bool;
    async fn next_page(&mut self) -> Result<History, ServiceError>;
}

/// Rewind the iterator and replace the task's (partial) history with the first full-history page.
pub(crate) async fn reset_history(
    task: &mut PollForDecisionTaskResponse,
    iterator: &mut dyn HistoryIterator,
) -> Result<(), WorkflowTaskError> {
    iterator.reset();
    let first_page = iterator.next_page().await?;
    task.history = first_page;
    Ok(())
}

/// True for events produced by a prior decision of this workflow, as opposed to events the
/// environment delivered to it.
pub(crate) fn is_decision_event(event_type: EventType) -> bool {
    matches!(
        event_type,
        EventType::WorkflowExecutionCompleted
            | EventType::WorkflowExecutionFailed
            | EventType::WorkflowExecutionCanceled
            | EventType::WorkflowExecutionContinuedAsNew
            | EventType::ActivityTaskScheduled
            | EventType::ActivityTaskCancelRequested
            | EventType::RequestCancelActivityTaskFailed
            | EventType::TimerStarted
            | EventType::TimerCanceled
            | EventType::CancelTimerFailed
            | EventType::MarkerRecorded
            | EventType::StartChildWorkflowExecutionInitiated
            | EventType::RequestCancelExternalWorkflowExecutionInitiated
            | EventType::SignalExternalWorkflowExecutionInitiated
    )
}

/// A full history starts at the `WorkflowExecutionStarted` event; anything else is the partial
/// suffix delivered to a sticky worker.
pub(crate) fn is_full_history(history: &History) -> bool {
    history
        .events
        .first()
        .map(|e| e.event_type() == EventType::WorkflowExecutionStarted)
        .unwrap_or(false)
}

/// Replays history as if the events produced by each decision arrive in exactly the order
/// "decision N's events, then decision N+1's started event". Events racing with decision N's
/// execution but recorded before it completed are deferred to decision N+1's batch; without the
/// reordering a replayed workflow would observe a completion too early and diverge from history.
///
/// Batches are lazy: pages are pulled from the iterator only when the loaded buffer runs dry,
/// and consumed events are discarded after every batch.
pub(crate) struct ReorderedHistory<'a> {
    iterator: &'a mut dyn HistoryIterator,
    loaded_events: Vec<HistoryEvent>,
    current_index: usize,
    previous_started_event_id: i64,
    next: Option<Vec<HistoryEvent>>,
}

impl<'a> ReorderedHistory<'a> {
    pub fn new(
        events: Vec<HistoryEvent>,
        previous_started_event_id: i64,
        iterator: &'a mut dyn HistoryIterator,
    ) -> Self {
        Self {
            iterator,
            loaded_events: events,
            current_index: 0,
            previous_started_event_id,
            next: None,
        }
    }

    /// An event is replayed (as opposed to seen for the first time) if a previous decision task
    /// already consumed it, or if it is the record of a decision this workflow made earlier.
    pub fn is_replay_event(&self, event: &HistoryEvent) -> bool {
        event.event_id <= self.previous_started_event_id || is_decision_event(event.event_type())
    }

    /// The events the next decision iteration should process, plus marker events. The returned
    /// markers belong to the decision *after* the returned batch - they are the records of what
    /// the currently-replaying decision produced, surfaced one batch early so side-effect and
    /// version state is visible before the code that recorded it re-executes.
    pub async fn next_decision_events(
        &mut self,
    ) -> Result<(Vec<HistoryEvent>, Vec<HistoryEvent>), WorkflowTaskError> {
        if self.next.is_none() {
            let (events, _) = self.scan_next_batch().await?;
            self.next = Some(events);
        }

        let result = self.next.take().unwrap_or_default();
        let mut markers = vec![];
        if !result.is_empty() {
            let (events, batch_markers) = self.scan_next_batch().await?;
            self.next = Some(events);
            markers = batch_markers;
        }
        Ok((result, markers))
    }

    /// Forward scan from the current position: does the decision task we are looking at end in
    /// failure or timeout rather than completion?
    fn is_next_decision_failed(&self) -> bool {
        for event in &self.loaded_events[self.current_index..] {
            match event.event_type() {
                EventType::DecisionTaskCompleted => return false,
                EventType::DecisionTaskTimedOut | EventType::DecisionTaskFailed => return true,
                _ => {}
            }
        }
        false
    }

    fn has_more_events(&self) -> bool {
        self.iterator.has_next_page()
    }

    async fn scan_next_batch(
        &mut self,
    ) -> Result<(Vec<HistoryEvent>, Vec<HistoryEvent>), WorkflowTaskError> {
        if self.current_index == self.loaded_events.len() && !self.has_more_events() {
            return Ok((vec![], vec![]));
        }

        let mut next_events = vec![];
        let mut markers = vec![];

        'order_events: loop {
            // load more history events if needed
            while self.current_index == self.loaded_events.len() {
                if !self.has_more_events() {
                    break 'order_events;
                }
                let page = self.iterator.next_page().await?;
                self.loaded_events.extend(page.events);
            }

            let event_type = self.loaded_events[self.current_index].event_type();
            match event_type {
                EventType::DecisionTaskStarted => {
                    if !self.is_next_decision_failed() {
                        next_events.push(self.loaded_events[self.current_index].clone());
                        self.current_index += 1;
                        break 'order_events;
                    }
                    // a failed or timed-out decision: skip its started event entirely
                }
                EventType::DecisionTaskCompleted
                | EventType::DecisionTaskScheduled
                | EventType::DecisionTaskTimedOut
                | EventType::DecisionTaskFailed => {}
                _ => {
                    let event = self.loaded_events[self.current_index].clone();
                    if event.event_type() == EventType::MarkerRecorded {
                        markers.push(event.clone());
                    }
                    next_events.push(event);
                }
            }
            self.current_index += 1;
        }

        // shrink the loaded buffer so consumed events can be freed
        self.loaded_events.drain(..self.current_index);
        self.current_index = 0;

        Ok((next_events, markers))
    }
}
