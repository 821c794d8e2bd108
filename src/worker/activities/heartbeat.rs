//! Heartbeat batching for a single running activity.

use crate::{
    errors::{HeartbeatError, ServiceError},
    protocol::{service::RecordActivityTaskHeartbeatRequest, Payload},
    retry_logic::RetryPolicy,
    task_token::TaskToken,
    worker::client::WorkflowService,
};
use futures_util::{future::BoxFuture, FutureExt};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// Batching window applied when the activity has no heartbeat timeout configured.
pub(crate) const DEFAULT_HEARTBEAT_BATCH_INTERVAL: Duration = Duration::from_secs(600);
/// Fraction of the heartbeat timeout at which a batched heartbeat must be flushed.
pub(crate) const HEARTBEAT_BATCH_FRACTION: f64 = 0.8;

/// Reports activity progress to the server without letting a hot heartbeat loop saturate it.
///
/// The first heartbeat goes out immediately and opens a batching window sized to stay inside the
/// server's heartbeat timeout; heartbeats inside the window only overwrite the buffered details,
/// and a deferred task flushes the freshest observation when the window closes. Cancellation
/// learned from the server (cancel-requested, or the execution no longer existing) fires the
/// activity's cancellation token but is also surfaced to the caller, because cancellation is
/// cooperative and the activity decides whether to honor it.
pub struct ActivityInvoker {
    task_token: TaskToken,
    identity: String,
    service: Arc<dyn WorkflowService>,
    cancellation: CancellationToken,
    heartbeat_timeout: Option<Duration>,
    retry_policy: RetryPolicy,
    close_token: CancellationToken,
    state: tokio::sync::Mutex<InvokerState>,
}

#[derive(Default)]
struct InvokerState {
    batch_open: bool,
    pending_details: Option<Option<Payload>>,
}

impl ActivityInvoker {
    pub(crate) fn new(
        task_token: TaskToken,
        identity: String,
        service: Arc<dyn WorkflowService>,
        cancellation: CancellationToken,
        heartbeat_timeout: Option<Duration>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            task_token,
            identity,
            service,
            cancellation,
            heartbeat_timeout,
            retry_policy,
            close_token: CancellationToken::new(),
            state: tokio::sync::Mutex::new(InvokerState::default()),
        }
    }

    /// Record activity progress. Outside a batching window this performs one RPC; inside it the
    /// details are buffered and the freshest value is flushed when the window closes.
    pub async fn heartbeat(
        self: &Arc<Self>,
        details: Option<Payload>,
    ) -> Result<(), HeartbeatError> {
        self.heartbeat_boxed(details).await
    }

    // Boxed so the window-close flush can re-enter heartbeat without an infinitely-sized future.
    fn heartbeat_boxed(
        self: &Arc<Self>,
        details: Option<Payload>,
    ) -> BoxFuture<'static, Result<(), HeartbeatError>> {
        let this = self.clone();
        async move {
            let mut state = this.state.lock().await;
            if state.batch_open {
                state.pending_details = Some(details);
                return Ok(());
            }

            let (activity_canceled, result) = this.internal_heartbeat(details).await;

            // Even a cancelled activity keeps heartbeating if it decides to finish its work, so
            // a cancellation outcome still opens the next batching window.
            if result.is_ok() || activity_canceled {
                state.pending_details = None;
                state.batch_open = true;

                let window = this
                    .heartbeat_timeout
                    .unwrap_or(DEFAULT_HEARTBEAT_BATCH_INTERVAL)
                    .mul_f64(HEARTBEAT_BATCH_FRACTION);
                let flusher = this.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(window) => {}
                        _ = flusher.close_token.cancelled() => return,
                    }
                    let pending = {
                        let mut state = flusher.state.lock().await;
                        state.batch_open = false;
                        state.pending_details.take()
                    };
                    if let Some(details) = pending {
                        let _ = flusher.heartbeat_boxed(details).await;
                    }
                });
            }

            result
        }
        .boxed()
    }

    async fn internal_heartbeat(
        &self,
        details: Option<Payload>,
    ) -> (bool, Result<(), HeartbeatError>) {
        let request = RecordActivityTaskHeartbeatRequest {
            task_token: self.task_token.clone(),
            details,
            identity: self.identity.clone(),
        };
        match self.record_heartbeat_with_retry(request).await {
            Ok(response) if response.cancel_requested => {
                self.cancellation.cancel();
                (true, Err(HeartbeatError::Canceled))
            }
            Ok(_) => (false, Ok(())),
            Err(err @ ServiceError::EntityNotExists(_)) => {
                // The execution is gone; all this activity can usefully do is stop.
                self.cancellation.cancel();
                (true, Err(err.into()))
            }
            Err(err) => (false, Err(err.into())),
        }
    }

    async fn record_heartbeat_with_retry(
        &self,
        request: RecordActivityTaskHeartbeatRequest,
    ) -> Result<crate::protocol::service::RecordActivityTaskHeartbeatResponse, ServiceError> {
        let mut attempt = 1;
        loop {
            match self
                .service
                .record_activity_task_heartbeat(request.clone())
                .await
            {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() => match self.retry_policy.should_retry(attempt) {
                    Some(delay) => {
                        debug!(task_token = %request.task_token, attempt, "Retrying heartbeat RPC");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }
    }

    /// Stop the invoker. Idempotent; any open batching window is abandoned and its buffered
    /// details are dropped.
    pub fn close(&self) {
        self.close_token.cancel();
    }
}
