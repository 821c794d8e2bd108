//! Worker-side task handling core for a Cadence-style durable workflow service.
//!
//! This crate is the engine between a transport layer that polls the workflow service and the
//! workflow/activity code a host registers. It receives decision and activity tasks, drives
//! deterministic replay of workflow state against event history, keeps suspended runs in a
//! bounded sticky cache, and produces the respond requests for the transport to send back. The
//! workflow coroutine dispatcher itself stays behind the
//! [worker::workflow::EventHandler] contract; how workflow code actually runs is the host's
//! choice.

#[macro_use]
extern crate tracing;
#[cfg(test)]
#[macro_use]
extern crate assert_matches;

pub mod errors;
pub mod protocol;
pub mod retry_logic;
pub mod task_token;
pub mod telemetry;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_help;

pub use task_token::TaskToken;
pub use worker::workflow::{set_sticky_cache_size, sticky_cache, PressurePoint, PressurePointHandler};

use crate::protocol::Payload;
use std::{fmt::Debug, sync::Arc};

/// What to do when replay does not reproduce recorded history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NonDeterministicWorkflowPolicy {
    /// Fail the workflow execution with a "nondeterministic workflow" reason, via a normal
    /// decision task completion.
    #[default]
    FailWorkflow,
    /// Produce no response at all; the server sees a decision task timeout and the workflow
    /// stays stuck until someone intervenes.
    BlockWorkflow,
}

/// Converts between user-facing values and the opaque payloads carried on the wire. Workflow and
/// activity inputs/outputs pass through this crate untouched; the core itself only converts the
/// strings it originates (panic messages, stack traces).
pub trait DataConverter: Send + Sync + Debug {
    fn encode_string(&self, value: &str) -> Payload;
    fn decode_string(&self, payload: &Payload) -> Result<String, anyhow::Error>;
}

/// UTF-8 passthrough converter used unless the host supplies its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDataConverter;

impl DataConverter for DefaultDataConverter {
    fn encode_string(&self, value: &str) -> Payload {
        value.as_bytes().to_vec()
    }

    fn decode_string(&self, payload: &Payload) -> Result<String, anyhow::Error> {
        Ok(String::from_utf8(payload.clone())?)
    }
}

fn default_data_converter() -> Arc<dyn DataConverter> {
    Arc::new(DefaultDataConverter)
}

/// Defines per-worker configuration options
#[derive(Clone, derive_builder::Builder)]
#[builder(setter(into))]
#[non_exhaustive]
pub struct WorkerConfig {
    /// The service domain this worker is bound to.
    pub domain: String,
    /// The task list this worker polls for both decision and activity tasks.
    pub task_list: String,
    /// A human-readable string identifying this worker in respond requests and heartbeats.
    /// Something like host name plus process id is a good choice.
    pub identity: String,
    /// When true, no run is ever cached and every decision task replays from full history.
    /// The process-wide cache capacity itself is set with [set_sticky_cache_size].
    #[builder(default = "false")]
    pub disable_sticky_execution: bool,
    #[builder(default)]
    pub non_deterministic_workflow_policy: NonDeterministicWorkflowPolicy,
    /// When false, log statements made by workflow code are suppressed during replay so each
    /// statement is observed once per execution rather than once per replay.
    #[builder(default = "false")]
    pub enable_logging_in_replay: bool,
    #[builder(default = "default_data_converter()", setter(into = false))]
    pub data_converter: Arc<dyn DataConverter>,
    /// Test hook; production workers leave this unset.
    #[builder(default, setter(into = false, strip_option))]
    pub pressure_points: Option<Arc<dyn PressurePointHandler>>,
    /// Bound for the local activity tunnel's channels.
    #[builder(default = "crate::worker::DEFAULT_LOCAL_ACTIVITY_TUNNEL_CAPACITY")]
    pub local_activity_tunnel_capacity: usize,
}
