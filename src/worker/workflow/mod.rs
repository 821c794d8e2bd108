//! Decision task handling: replay orchestration, the sticky cache, and response assembly.

pub mod cache;
pub mod context;
pub mod event_handler;
pub mod history;
pub(crate) mod matcher;

pub use cache::{set_sticky_cache_size, sticky_cache, StickyCache, DEFAULT_STICKY_CACHE_SIZE};
pub use context::WorkflowContext;
pub use event_handler::{CompletionHandle, EventHandler, EventHandlerEnv, EventHandlerFactory};
pub use history::HistoryIterator;

use crate::{
    errors::{WorkflowError, WorkflowTaskError},
    protocol::{
        decisions::{
            CancelWorkflowExecutionDecisionAttributes,
            ContinueAsNewWorkflowExecutionDecisionAttributes, Decision,
            FailWorkflowExecutionDecisionAttributes,
            CompleteWorkflowExecutionDecisionAttributes,
        },
        history::{EventAttributes, EventType, HistoryEvent},
        service::{
            DecisionTaskCompletion, DecisionTaskFailedCause, PollForDecisionTaskResponse,
            QueryTaskCompletedType, RespondDecisionTaskCompletedRequest,
            RespondDecisionTaskFailedRequest, RespondQueryTaskCompletedRequest,
        },
        WorkflowInfo,
    },
    telemetry::MetricsContext,
    worker::{
        workflow::{
            context::ContextState,
            history::{is_full_history, reset_history},
        },
        LocalActivityTunnel,
    },
    DataConverter, NonDeterministicWorkflowPolicy, WorkerConfig,
};
use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::sync::OwnedMutexGuard;

/// Well-known spots where a test can inject failures into task processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressurePoint {
    DecisionTaskStartTimeout,
    DecisionTaskCompleted,
    ActivityTaskScheduleTimeout,
    ActivityTaskStartTimeout,
}

/// Test hook invoked while processing non-replay events.
pub trait PressurePointHandler: Send + Sync {
    fn execute(&self, point: PressurePoint) -> Result<(), anyhow::Error>;
}

/// Turns decision tasks into respond requests by replaying history against cached (or freshly
/// rebuilt) workflow state. One handler serves every run polled from its task list.
pub struct WorkflowTaskHandler {
    pub(crate) domain: String,
    pub(crate) identity: String,
    pub(crate) disable_sticky_execution: bool,
    pub(crate) enable_logging_in_replay: bool,
    pub(crate) non_deterministic_workflow_policy: NonDeterministicWorkflowPolicy,
    pub(crate) data_converter: Arc<dyn DataConverter>,
    pub(crate) factory: Arc<dyn EventHandlerFactory>,
    pub(crate) pressure_points: Option<Arc<dyn PressurePointHandler>>,
    pub(crate) metrics: MetricsContext,
    pub(crate) cache: Arc<StickyCache>,
    pub(crate) la_tunnel: Option<LocalActivityTunnel>,
}

impl WorkflowTaskHandler {
    pub fn new(
        config: &WorkerConfig,
        factory: Arc<dyn EventHandlerFactory>,
        cache: Arc<StickyCache>,
        la_tunnel: Option<LocalActivityTunnel>,
        metrics: MetricsContext,
    ) -> Arc<Self> {
        Arc::new(Self {
            domain: config.domain.clone(),
            identity: config.identity.clone(),
            disable_sticky_execution: config.disable_sticky_execution,
            enable_logging_in_replay: config.enable_logging_in_replay,
            non_deterministic_workflow_policy: config.non_deterministic_workflow_policy,
            data_converter: config.data_converter.clone(),
            factory,
            pressure_points: config.pressure_points.clone(),
            metrics,
            cache,
            la_tunnel,
        })
    }

    /// Process one decision task against its history iterator. Returns the respond request to
    /// send (or `None` while waiting on local activities) along with the execution context, which
    /// the caller needs to route local activity callbacks.
    pub async fn process_workflow_task(
        self: &Arc<Self>,
        mut task: PollForDecisionTaskResponse,
        iterator: &mut dyn HistoryIterator,
    ) -> Result<(Option<DecisionTaskCompletion>, Arc<WorkflowContext>), WorkflowTaskError> {
        if task.query.is_none() && task.history.events.is_empty() {
            return Err(WorkflowTaskError::EmptyTask);
        }

        debug!(
            workflow_type = %task.workflow_type.name,
            workflow_id = %task.workflow_execution.workflow_id,
            run_id = %task.workflow_execution.run_id,
            previous_started_event_id = task.previous_started_event_id,
            "Processing new workflow task",
        );

        let run_id = task.workflow_execution.run_id.clone();
        let (context, mut state) = match self
            .get_or_create_workflow_context(&mut task, iterator)
            .await
        {
            Ok(acquired) => acquired,
            Err(err) => {
                // A half-built or unrecoverably stale entry must not linger in the cache.
                self.cache.delete(&run_id);
                return Err(err);
            }
        };

        let result = state.process_workflow_task(task, iterator).await;
        self.unlock(&context, state, result.is_err());
        result.map(|completion| (completion, context))
    }

    /// Release a processing pass. Terminal or errored runs leave the cache here; so do runs on
    /// workers with sticky execution disabled, once no local activity work remains. The close
    /// respond is assumed to succeed server-side; if it does not, the next poll rebuilds the run
    /// from full history.
    pub(crate) fn unlock(
        &self,
        context: &WorkflowContext,
        state: OwnedMutexGuard<ContextState>,
        had_error: bool,
    ) {
        if had_error
            || state.completion.error().is_some()
            || state.completion.is_completed()
            || (self.disable_sticky_execution && !state.has_pending_local_activity_work())
        {
            self.cache.delete(context.run_id());
        }
        drop(state);
    }

    async fn get_or_create_workflow_context(
        self: &Arc<Self>,
        task: &mut PollForDecisionTaskResponse,
        iterator: &mut dyn HistoryIterator,
    ) -> Result<(Arc<WorkflowContext>, OwnedMutexGuard<ContextState>), WorkflowTaskError> {
        let metrics = self
            .metrics
            .for_workflow_type(task.workflow_type.name.clone());
        let run_id = task.workflow_execution.run_id.clone();
        let full_history = is_full_history(&task.history);

        let cached = if task.query.is_none() || !full_history {
            self.cache.get(&run_id)
        } else {
            None
        };

        let (context, mut state) = match cached {
            Some(context) => {
                let mut state = context.lock().await;
                if task.query.is_some() && !full_history {
                    // query task against valid cached state
                    metrics.sticky_cache_hit();
                } else if task.history.events.first().map(|e| e.event_id)
                    == Some(state.previous_started_event_id + 1)
                {
                    metrics.sticky_cache_hit();
                } else {
                    // cached state is missing events; discard it and rebuild from full history
                    state.reset_if_stale(task, iterator).await?;
                }
                (context, state)
            }
            None => {
                if !full_history {
                    // partial-history task whose state was already evicted
                    metrics.sticky_cache_miss();
                    reset_history(task, iterator).await?;
                }
                let context = self.create_workflow_context(task)?;
                let context = if !self.disable_sticky_execution && task.query.is_none() {
                    self.cache.put_if_not_exist(run_id, context)
                } else {
                    context
                };
                let state = context.lock().await;
                (context, state)
            }
        };

        state.la_tunnel = self.la_tunnel.clone();
        self.metrics.sticky_cache_size(self.cache.size() as u64);

        state.reset_state_if_destroyed(task, iterator).await?;
        Ok((context, state))
    }

    fn create_workflow_context(
        self: &Arc<Self>,
        task: &PollForDecisionTaskResponse,
    ) -> Result<Arc<WorkflowContext>, WorkflowTaskError> {
        let first_event = task.history.events.first().ok_or_else(|| {
            WorkflowTaskError::MalformedHistory("history has no events".to_string())
        })?;
        let attributes = match &first_event.attributes {
            EventAttributes::WorkflowExecutionStarted(attrs) => attrs,
            _ => {
                return Err(WorkflowTaskError::MalformedHistory(
                    "first history event is not WorkflowExecutionStarted".to_string(),
                ))
            }
        };
        if attributes.task_list.is_empty() {
            return Err(WorkflowTaskError::MalformedHistory(
                "empty task list in WorkflowExecutionStarted event".to_string(),
            ));
        }

        let workflow_info = WorkflowInfo {
            workflow_execution: task.workflow_execution.clone(),
            workflow_type: task.workflow_type.clone(),
            task_list: attributes.task_list.clone(),
            domain: self.domain.clone(),
            attempt: attributes.attempt,
            execution_start_to_close_timeout: Duration::from_secs(
                attributes.execution_start_to_close_timeout_seconds.max(0) as u64,
            ),
            task_start_to_close_timeout: Duration::from_secs(
                attributes.task_start_to_close_timeout_seconds.max(0) as u64,
            ),
        };

        Ok(WorkflowContext::new(
            self.clone(),
            workflow_info,
            first_event.timestamp,
            self.la_tunnel.clone(),
        ))
    }

    pub(crate) fn create_event_handler(
        &self,
        info: &WorkflowInfo,
        completion: &CompletionHandle,
    ) -> Box<dyn EventHandler> {
        let env = EventHandlerEnv {
            metrics: self.metrics.for_workflow_type(info.workflow_type.name.clone()),
            enable_logging_in_replay: self.enable_logging_in_replay,
            data_converter: self.data_converter.clone(),
        };
        self.factory.create(info, completion.clone(), env)
    }

    pub(crate) fn execute_any_pressure_points(
        &self,
        event: &HistoryEvent,
        is_in_replay: bool,
    ) -> Result<(), WorkflowTaskError> {
        let handler = match &self.pressure_points {
            Some(handler) if !is_in_replay => handler,
            _ => return Ok(()),
        };
        let point = match event.event_type() {
            EventType::DecisionTaskStarted => PressurePoint::DecisionTaskStartTimeout,
            EventType::DecisionTaskCompleted => PressurePoint::DecisionTaskCompleted,
            EventType::ActivityTaskScheduled => PressurePoint::ActivityTaskScheduleTimeout,
            EventType::ActivityTaskStarted => PressurePoint::ActivityTaskStartTimeout,
            _ => return Ok(()),
        };
        handler
            .execute(point)
            .map_err(WorkflowTaskError::PressurePoint)
    }

    /// Assemble the respond request for the current task: query answers, decision-task failure on
    /// panic, or the accumulated decisions plus a closing decision when the workflow reached a
    /// terminal state.
    pub(crate) fn complete_workflow(
        &self,
        state: &mut ContextState,
        mut decisions: Vec<Decision>,
        mut force_new_decision: bool,
    ) -> Option<DecisionTaskCompletion> {
        let task = state.current_task.clone()?;

        if let Some(query) = &task.query {
            if let Some(WorkflowError::Panic { reason, .. }) = state.completion.error() {
                return Some(DecisionTaskCompletion::QueryCompleted(
                    RespondQueryTaskCompletedRequest {
                        task_token: task.task_token,
                        completed_type: QueryTaskCompletedType::Failed,
                        query_result: None,
                        error_message: Some(format!("Workflow panic: {}", reason)),
                    },
                ));
            }
            let mut request = RespondQueryTaskCompletedRequest {
                task_token: task.task_token,
                completed_type: QueryTaskCompletedType::Completed,
                query_result: None,
                error_message: None,
            };
            match state.event_handler.as_mut() {
                Some(handler) => {
                    match handler.process_query(&query.query_type, query.query_args.as_ref()) {
                        Ok(result) => request.query_result = result,
                        Err(err) => {
                            request.completed_type = QueryTaskCompletedType::Failed;
                            request.error_message = Some(err.to_string());
                        }
                    }
                }
                None => {
                    request.completed_type = QueryTaskCompletedType::Failed;
                    request.error_message = Some("event handler is closed".to_string());
                }
            }
            return Some(DecisionTaskCompletion::QueryCompleted(request));
        }

        let metrics = self
            .metrics
            .for_workflow_type(state.workflow_info.workflow_type.name.clone());
        metrics.decision_execution_latency(state.decision_start_time.elapsed());

        let close_decision = match state.completion.error() {
            Some(WorkflowError::Panic {
                reason,
                stack_trace,
            }) => {
                metrics.decision_task_panic();
                error!(
                    workflow_id = %task.workflow_execution.workflow_id,
                    run_id = %task.workflow_execution.run_id,
                    panic = %reason,
                    stack = %stack_trace,
                    "Workflow panic",
                );
                let details = format!("{}\n{}", reason, stack_trace);
                return Some(DecisionTaskCompletion::Failed(
                    RespondDecisionTaskFailedRequest {
                        task_token: task.task_token,
                        cause: DecisionTaskFailedCause::WorkflowWorkerUnhandledFailure,
                        details: Some(self.data_converter.encode_string(&details)),
                        identity: self.identity.clone(),
                    },
                ));
            }
            Some(WorkflowError::Canceled { details }) => {
                metrics.wf_canceled();
                Some(Decision::CancelWorkflowExecution(
                    CancelWorkflowExecutionDecisionAttributes { details },
                ))
            }
            Some(WorkflowError::ContinueAsNew(params)) => {
                metrics.wf_continued_as_new();
                Some(Decision::ContinueAsNewWorkflowExecution(
                    ContinueAsNewWorkflowExecutionDecisionAttributes {
                        workflow_type: params.workflow_type,
                        task_list: params.task_list,
                        input: params.input,
                        execution_start_to_close_timeout_seconds: params
                            .execution_start_to_close_timeout_seconds,
                        task_start_to_close_timeout_seconds: params
                            .task_start_to_close_timeout_seconds,
                    },
                ))
            }
            Some(WorkflowError::Custom { reason, details }) => {
                metrics.wf_failed();
                Some(Decision::FailWorkflowExecution(
                    FailWorkflowExecutionDecisionAttributes { reason, details },
                ))
            }
            None if state.completion.is_completed() => {
                metrics.wf_completed();
                Some(Decision::CompleteWorkflowExecution(
                    CompleteWorkflowExecutionDecisionAttributes {
                        result: state.completion.result(),
                    },
                ))
            }
            None => None,
        };

        if let Some(close) = close_decision {
            decisions.push(close);
            let elapsed = SystemTime::now()
                .duration_since(state.workflow_start_time)
                .unwrap_or_default();
            metrics.wf_e2e_latency(elapsed);
            force_new_decision = false;
        }

        Some(DecisionTaskCompletion::Completed(
            RespondDecisionTaskCompletedRequest {
                task_token: task.task_token,
                decisions,
                identity: self.identity.clone(),
                return_new_decision_task: true,
                force_create_new_decision_task: force_new_decision,
            },
        ))
    }
}
