//! Worker-specific service client needs.

use crate::{
    errors::ServiceError,
    protocol::service::{RecordActivityTaskHeartbeatRequest, RecordActivityTaskHeartbeatResponse},
};

type Result<T, E = ServiceError> = std::result::Result<T, E>;

/// The slice of the workflow service the task handling core calls itself, and hence a minimal
/// mocking surface. Polling and responding stay with the transport layer; the core only ever
/// needs to push activity heartbeats while an activity is running.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait WorkflowService: Send + Sync {
    async fn record_activity_task_heartbeat(
        &self,
        request: RecordActivityTaskHeartbeatRequest,
    ) -> Result<RecordActivityTaskHeartbeatResponse>;
}
