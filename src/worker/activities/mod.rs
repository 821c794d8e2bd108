//! Activity task handling: lookup, cancellable deadline-bound execution, panic containment, and
//! result conversion.

pub mod heartbeat;

pub use heartbeat::ActivityInvoker;

use crate::{
    errors::{ActivityError, ActivityTaskError, HeartbeatError, PANIC_ERROR_REASON},
    protocol::{
        service::{
            ActivityTaskCompletion, PollForActivityTaskResponse,
            RespondActivityTaskCanceledRequest, RespondActivityTaskCompletedRequest,
            RespondActivityTaskFailedRequest,
        },
        ActivityType, Payload, WorkflowExecution,
    },
    retry_logic::RetryPolicy,
    task_token::TaskToken,
    telemetry::MetricsContext,
    worker::client::WorkflowService,
    DataConverter, WorkerConfig,
};
use dashmap::DashMap;
use futures_util::FutureExt;
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// An activity implementation. Implementations must honor cancellation cooperatively by watching
/// the context's cancellation token.
#[async_trait::async_trait]
pub trait Activity: Send + Sync {
    async fn execute(
        &self,
        ctx: ActivityContext,
        input: Option<Payload>,
    ) -> Result<Option<Payload>, ActivityError>;
}

/// Resolves activity type names ahead of the registry; lets hosts route lookup through their own
/// machinery (dynamic activities, sharding, test fakes).
pub type ActivityProvider = Arc<dyn Fn(&str) -> Option<Arc<dyn Activity>> + Send + Sync>;

/// Activity implementations registered with this worker, keyed by type name.
#[derive(Default)]
pub struct ActivityRegistry {
    activities: DashMap<String, Arc<dyn Activity>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, activity: Arc<dyn Activity>) {
        self.activities.insert(name.into(), activity);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Activity>> {
        self.activities.get(name).map(|a| a.value().clone())
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.activities.iter().map(|e| e.key().clone()).collect()
    }
}

/// Immutable facts about the running activity task.
#[derive(Debug, Clone)]
pub struct ActivityInfo {
    pub task_token: TaskToken,
    pub workflow_execution: WorkflowExecution,
    pub activity_id: String,
    pub activity_type: ActivityType,
    pub task_list: String,
    pub heartbeat_timeout: Option<Duration>,
    /// The schedule-to-close deadline, when the task carries one. Checked after the activity
    /// returns; enforcement never preempts a running activity.
    pub deadline: Option<Instant>,
}

/// Execution environment handed to activity code.
#[derive(Clone)]
pub struct ActivityContext {
    pub info: ActivityInfo,
    invoker: Arc<ActivityInvoker>,
    cancellation: CancellationToken,
    metrics: MetricsContext,
    data_converter: Arc<dyn DataConverter>,
}

impl ActivityContext {
    /// Report progress. Batched per the invoker's rules; returns cancellation as an error so the
    /// activity can decide whether to stop.
    pub async fn record_heartbeat(&self, details: Option<Payload>) -> Result<(), HeartbeatError> {
        self.invoker.heartbeat(details).await
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// A token that fires when cancellation is requested, for `select!`-style cooperation.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn metrics(&self) -> &MetricsContext {
        &self.metrics
    }

    pub fn data_converter(&self) -> &Arc<dyn DataConverter> {
        &self.data_converter
    }
}

/// Runs activity tasks polled from one task list.
pub struct ActivityTaskHandler {
    task_list: String,
    identity: String,
    service: Arc<dyn WorkflowService>,
    registry: Arc<ActivityRegistry>,
    activity_provider: Option<ActivityProvider>,
    metrics: MetricsContext,
    data_converter: Arc<dyn DataConverter>,
    /// Root of every per-task cancellation token; the host cancels it to stop all activities.
    root_cancellation: CancellationToken,
}

impl ActivityTaskHandler {
    pub fn new(
        config: &WorkerConfig,
        service: Arc<dyn WorkflowService>,
        registry: Arc<ActivityRegistry>,
        metrics: MetricsContext,
        root_cancellation: CancellationToken,
    ) -> Self {
        Self::with_custom_provider(config, service, registry, metrics, root_cancellation, None)
    }

    pub fn with_custom_provider(
        config: &WorkerConfig,
        service: Arc<dyn WorkflowService>,
        registry: Arc<ActivityRegistry>,
        metrics: MetricsContext,
        root_cancellation: CancellationToken,
        activity_provider: Option<ActivityProvider>,
    ) -> Self {
        Self {
            task_list: config.task_list.clone(),
            identity: config.identity.clone(),
            service,
            registry,
            activity_provider,
            metrics,
            data_converter: config.data_converter.clone(),
            root_cancellation,
        }
    }

    /// Execute one activity task to a respond request. `Ok(None)` means the activity will
    /// complete asynchronously and no response should be sent now.
    pub async fn execute(
        &self,
        task: PollForActivityTaskResponse,
    ) -> Result<Option<ActivityTaskCompletion>, ActivityTaskError> {
        debug!(
            workflow_id = %task.workflow_execution.workflow_id,
            run_id = %task.workflow_execution.run_id,
            activity_type = %task.activity_type.name,
            "Processing new activity task",
        );

        let cancellation = self.root_cancellation.child_token();
        let heartbeat_timeout = positive_secs(task.heartbeat_timeout_seconds);
        let deadline =
            positive_secs(task.schedule_to_close_timeout_seconds).map(|d| Instant::now() + d);

        let invoker = Arc::new(ActivityInvoker::new(
            task.task_token.clone(),
            self.identity.clone(),
            self.service.clone(),
            cancellation.clone(),
            heartbeat_timeout,
            RetryPolicy::service_operation(),
        ));

        let activity = match self.get_activity(&task.activity_type.name) {
            Some(activity) => activity,
            None => {
                invoker.close();
                let mut supported = self.registry.registered_names();
                supported.sort();
                return Err(ActivityTaskError::UnknownActivityType {
                    requested: task.activity_type.name.clone(),
                    supported: supported.join(", "),
                });
            }
        };

        let metrics = self
            .metrics
            .for_activity_type(task.activity_type.name.clone());
        let ctx = ActivityContext {
            info: ActivityInfo {
                task_token: task.task_token.clone(),
                workflow_execution: task.workflow_execution.clone(),
                activity_id: task.activity_id.clone(),
                activity_type: task.activity_type.clone(),
                task_list: self.task_list.clone(),
                heartbeat_timeout,
                deadline,
            },
            invoker: invoker.clone(),
            cancellation: cancellation.clone(),
            metrics: metrics.clone(),
            data_converter: self.data_converter.clone(),
        };

        let execution = AssertUnwindSafe(activity.execute(ctx, task.input.clone())).catch_unwind();
        let outcome = execution.await;
        invoker.close();

        // Cancellation is cooperative: an activity that overran its budget still ran to
        // completion, and only its result is discarded here.
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(ActivityTaskError::DeadlineExceeded);
            }
        }

        let completion = match outcome {
            Err(panic) => {
                let reason = panic_message(panic);
                error!(
                    activity_type = %task.activity_type.name,
                    panic = %reason,
                    "Activity panic",
                );
                metrics.activity_task_panic();
                Some(ActivityTaskCompletion::Failed(
                    RespondActivityTaskFailedRequest {
                        task_token: task.task_token.clone(),
                        reason: PANIC_ERROR_REASON.to_string(),
                        details: Some(self.data_converter.encode_string(&reason)),
                        identity: self.identity.clone(),
                    },
                ))
            }
            Ok(result) => self.convert_activity_result(&task, result),
        };
        Ok(completion)
    }

    fn convert_activity_result(
        &self,
        task: &PollForActivityTaskResponse,
        result: Result<Option<Payload>, ActivityError>,
    ) -> Option<ActivityTaskCompletion> {
        match result {
            Ok(output) => Some(ActivityTaskCompletion::Completed(
                RespondActivityTaskCompletedRequest {
                    task_token: task.task_token.clone(),
                    result: output,
                    identity: self.identity.clone(),
                },
            )),
            Err(ActivityError::ResultPending) => None,
            Err(ActivityError::Canceled { details }) => Some(ActivityTaskCompletion::Canceled(
                RespondActivityTaskCanceledRequest {
                    task_token: task.task_token.clone(),
                    details,
                    identity: self.identity.clone(),
                },
            )),
            Err(ActivityError::Failed { reason, details }) => Some(
                ActivityTaskCompletion::Failed(RespondActivityTaskFailedRequest {
                    task_token: task.task_token.clone(),
                    reason,
                    details,
                    identity: self.identity.clone(),
                }),
            ),
        }
    }

    fn get_activity(&self, name: &str) -> Option<Arc<dyn Activity>> {
        if let Some(provider) = &self.activity_provider {
            return provider(name);
        }
        self.registry.get(name)
    }
}

fn positive_secs(seconds: i32) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds as u64))
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
