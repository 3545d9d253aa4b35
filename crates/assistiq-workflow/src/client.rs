//! Engine-facing client contract.
//!
//! The durable engine is an external collaborator. Everything the rest of
//! the system needs from it goes through [`WorkflowClient`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::DEFAULT_TASK_QUEUE;

/// Errors surfaced by the workflow engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow engine unavailable: {0}")]
    Unavailable(String),

    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("workflow {id} failed: {reason}")]
    WorkflowFailed { id: String, reason: String },

    #[error("workflow {0} was cancelled")]
    Cancelled(String),

    #[error("malformed workflow payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// What happens when a workflow is started with an id that is already
/// running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdReusePolicy {
    /// Both instances run; the engine does not correlate them.
    #[default]
    AllowDuplicate,
    /// Cancel the in-flight instance and start fresh. Reissuing the same
    /// logical operation therefore yields exactly-one-latest semantics.
    TerminateIfRunning,
}

/// Options for starting a workflow instance.
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Logical instance id, e.g. `validate-ticket-<key>`.
    pub workflow_id: String,
    pub task_queue: String,
    pub reuse_policy: IdReusePolicy,
}

impl StartOptions {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            task_queue: DEFAULT_TASK_QUEUE.to_string(),
            reuse_policy: IdReusePolicy::default(),
        }
    }

    pub fn task_queue(mut self, queue: impl Into<String>) -> Self {
        self.task_queue = queue.into();
        self
    }

    pub fn terminate_if_running(mut self) -> Self {
        self.reuse_policy = IdReusePolicy::TerminateIfRunning;
        self
    }
}

/// Handle to a started workflow instance.
///
/// Awaiting [`WorkflowHandle::result`] resolves to the workflow's JSON
/// output. If the instance is superseded by a `TerminateIfRunning` restart,
/// the handle resolves to [`EngineError::Cancelled`].
pub struct WorkflowHandle {
    pub workflow_id: String,
    pub(crate) rx: oneshot::Receiver<Result<Value, EngineError>>,
}

impl WorkflowHandle {
    pub async fn result(self) -> Result<Value, EngineError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            // Sender dropped without a result: the instance was aborted.
            Err(_) => Err(EngineError::Cancelled(self.workflow_id)),
        }
    }
}

/// Client contract for the durable workflow engine.
#[async_trait]
pub trait WorkflowClient: Send + Sync {
    /// Start a workflow by registered name with a JSON input payload.
    async fn start_workflow(
        &self,
        name: &str,
        input: Value,
        opts: StartOptions,
    ) -> Result<WorkflowHandle, EngineError>;

    /// Whether the engine currently accepts work.
    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_options_builder() {
        let opts = StartOptions::new("validate-ticket-ERP-1")
            .task_queue("custom-queue")
            .terminate_if_running();
        assert_eq!(opts.workflow_id, "validate-ticket-ERP-1");
        assert_eq!(opts.task_queue, "custom-queue");
        assert_eq!(opts.reuse_policy, IdReusePolicy::TerminateIfRunning);
    }

    #[test]
    fn default_reuse_policy_allows_duplicates() {
        let opts = StartOptions::new("x");
        assert_eq!(opts.reuse_policy, IdReusePolicy::AllowDuplicate);
        assert_eq!(opts.task_queue, DEFAULT_TASK_QUEUE);
    }
}
