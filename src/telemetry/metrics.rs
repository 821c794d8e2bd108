//! Metric emission for the task handling core.
//!
//! The host process decides where metrics actually go; it hands the worker a [MetricSink] and the
//! core records through a [MetricsContext], which carries the key/values already known at
//! construction time (domain, task list, workflow type, ...).

use std::{fmt::Debug, sync::Arc, time::Duration};

pub const STICKY_CACHE_HIT: &str = "sticky-cache-hit";
pub const STICKY_CACHE_MISS: &str = "sticky-cache-miss";
pub const STICKY_CACHE_STALL: &str = "sticky-cache-stall";
pub const STICKY_CACHE_SIZE: &str = "sticky-cache-size";
pub const NON_DETERMINISTIC_ERROR: &str = "non-deterministic-error";
pub const DECISION_TASK_PANIC: &str = "decision-task-panic";
pub const WORKFLOW_COMPLETED: &str = "workflow-completed";
pub const WORKFLOW_CANCELED: &str = "workflow-canceled";
pub const WORKFLOW_FAILED: &str = "workflow-failed";
pub const WORKFLOW_CONTINUE_AS_NEW: &str = "workflow-continue-as-new";
pub const WORKFLOW_ENDTOEND_LATENCY: &str = "workflow-endtoend-latency";
pub const DECISION_EXECUTION_LATENCY: &str = "decision-execution-latency";
pub const ACTIVITY_TASK_PANIC: &str = "activity-task-panic";

/// A metric label. The context's preset labels are prepended to every emission.
pub type KeyValue = (&'static str, String);

/// Where emitted metrics land. Implemented by the host over whatever exporter it runs.
pub trait MetricSink: Send + Sync + Debug {
    fn counter(&self, name: &'static str, kvs: &[KeyValue]);
    fn gauge(&self, name: &'static str, value: u64, kvs: &[KeyValue]);
    fn timer(&self, name: &'static str, duration: Duration, kvs: &[KeyValue]);
}

/// Sink used when the host does not care about metrics.
#[derive(Debug, Default)]
pub struct NoopSink;

impl MetricSink for NoopSink {
    fn counter(&self, _: &'static str, _: &[KeyValue]) {}
    fn gauge(&self, _: &'static str, _: u64, _: &[KeyValue]) {}
    fn timer(&self, _: &'static str, _: Duration, _: &[KeyValue]) {}
}

/// Used to track context associated with metrics, and record/update them.
#[derive(Clone, Debug)]
pub struct MetricsContext {
    sink: Arc<dyn MetricSink>,
    kvs: Arc<Vec<KeyValue>>,
}

impl Default for MetricsContext {
    fn default() -> Self {
        Self::new(Arc::new(NoopSink))
    }
}

impl MetricsContext {
    pub fn new(sink: Arc<dyn MetricSink>) -> Self {
        Self {
            sink,
            kvs: Arc::new(vec![]),
        }
    }

    pub fn top_level(sink: Arc<dyn MetricSink>, domain: String, task_list: String) -> Self {
        Self {
            sink,
            kvs: Arc::new(vec![("domain", domain), ("task-list", task_list)]),
        }
    }

    /// Extend an existing metrics context with new attributes.
    pub fn with_new_attrs(&self, new_kvs: impl IntoIterator<Item = KeyValue>) -> Self {
        let mut kvs = self.kvs.clone();
        Arc::make_mut(&mut kvs).extend(new_kvs);
        Self {
            sink: self.sink.clone(),
            kvs,
        }
    }

    /// Attach the workflow type label.
    pub fn for_workflow_type(&self, workflow_type: String) -> Self {
        self.with_new_attrs([("workflow-type", workflow_type)])
    }

    /// Attach the activity type label.
    pub fn for_activity_type(&self, activity_type: String) -> Self {
        self.with_new_attrs([("activity-type", activity_type)])
    }

    /// A decision task was served from cached workflow state
    pub fn sticky_cache_hit(&self) {
        self.sink.counter(STICKY_CACHE_HIT, &self.kvs);
    }

    /// A decision task with partial history found no cached state
    pub fn sticky_cache_miss(&self) {
        self.sink.counter(STICKY_CACHE_MISS, &self.kvs);
    }

    /// Cached state was discarded because the incoming task did not line up with it
    pub fn sticky_cache_stall(&self) {
        self.sink.counter(STICKY_CACHE_STALL, &self.kvs);
    }

    /// Current number of cached workflow executions
    pub fn sticky_cache_size(&self, size: u64) {
        self.sink.gauge(STICKY_CACHE_SIZE, size, &self.kvs);
    }

    /// Replay produced decisions that did not match history
    pub fn non_deterministic_error(&self) {
        self.sink.counter(NON_DETERMINISTIC_ERROR, &self.kvs);
    }

    /// Workflow code panicked during a decision task
    pub fn decision_task_panic(&self) {
        self.sink.counter(DECISION_TASK_PANIC, &self.kvs);
    }

    pub fn wf_completed(&self) {
        self.sink.counter(WORKFLOW_COMPLETED, &self.kvs);
    }

    pub fn wf_canceled(&self) {
        self.sink.counter(WORKFLOW_CANCELED, &self.kvs);
    }

    pub fn wf_failed(&self) {
        self.sink.counter(WORKFLOW_FAILED, &self.kvs);
    }

    pub fn wf_continued_as_new(&self) {
        self.sink.counter(WORKFLOW_CONTINUE_AS_NEW, &self.kvs);
    }

    /// Time from workflow start to the closing decision, recorded when a run reaches a terminal
    /// state on this worker.
    pub fn wf_e2e_latency(&self, duration: Duration) {
        self.sink.timer(WORKFLOW_ENDTOEND_LATENCY, duration, &self.kvs);
    }

    /// Wall time one decision task spent inside the replay loop and response assembly.
    pub fn decision_execution_latency(&self, duration: Duration) {
        self.sink
            .timer(DECISION_EXECUTION_LATENCY, duration, &self.kvs);
    }

    /// Activity code panicked
    pub fn activity_task_panic(&self) {
        self.sink.counter(ACTIVITY_TASK_PANIC, &self.kvs);
    }
}
