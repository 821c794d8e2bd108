//! Hand-written wire shapes for the workflow service surface this crate consumes and produces.
//!
//! The RPC transport and data codecs live outside this crate, so nothing here knows how to
//! serialize itself. These types exist to be constructed from a poll response by the transport
//! layer and handed to the task handlers, and vice versa for the respond requests.

pub mod decisions;
pub mod history;
pub mod service;

use std::time::Duration;

/// Opaque user data. Conversion to and from user types is the data converter's business.
pub type Payload = Vec<u8>;

/// Identifies a single run of a workflow. The pair is globally unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct WorkflowExecution {
    pub workflow_id: String,
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkflowType {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActivityType {
    pub name: String,
}

/// Immutable description of a workflow run, assembled from the `WorkflowExecutionStarted`
/// attributes of the first history event when a fresh execution context is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowInfo {
    pub workflow_execution: WorkflowExecution,
    pub workflow_type: WorkflowType,
    pub task_list: String,
    pub domain: String,
    pub attempt: i32,
    pub execution_start_to_close_timeout: Duration,
    pub task_start_to_close_timeout: Duration,
}
