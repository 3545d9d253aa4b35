//! In-process engine binding.
//!
//! Executes registered workflows as tokio tasks. Instances are tracked by
//! workflow id so `TerminateIfRunning` can supersede an in-flight run, which
//! is what gives a re-triggered ticket validation exactly-one-latest
//! semantics within the process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::{
    EngineError, IdReusePolicy, StartOptions, WorkflowClient, WorkflowHandle,
};
use crate::registry::WorkflowRegistry;

/// Non-durable [`WorkflowClient`] that runs workflows on the local runtime.
pub struct InProcessEngine {
    registry: WorkflowRegistry,
    running: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl InProcessEngine {
    pub fn new(registry: WorkflowRegistry) -> Self {
        info!(
            workflows = ?registry.names(),
            "in-process workflow engine initialized"
        );
        Self {
            registry,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of instances still executing.
    pub async fn active_count(&self) -> usize {
        self.running
            .lock()
            .await
            .values()
            .filter(|task| !task.is_finished())
            .count()
    }
}

#[async_trait]
impl WorkflowClient for InProcessEngine {
    async fn start_workflow(
        &self,
        name: &str,
        input: Value,
        opts: StartOptions,
    ) -> Result<WorkflowHandle, EngineError> {
        let handler = self
            .registry
            .get(name)
            .ok_or_else(|| EngineError::UnknownWorkflow(name.to_string()))?;

        let mut running = self.running.lock().await;
        running.retain(|_, task| !task.is_finished());

        if let Some(prev) = running.get(&opts.workflow_id) {
            match opts.reuse_policy {
                IdReusePolicy::TerminateIfRunning => {
                    debug!(
                        workflow_id = %opts.workflow_id,
                        "superseding in-flight instance"
                    );
                    prev.abort();
                }
                IdReusePolicy::AllowDuplicate => {}
            }
        }

        let run_id = Uuid::new_v4();
        debug!(
            workflow = name,
            workflow_id = %opts.workflow_id,
            %run_id,
            task_queue = %opts.task_queue,
            "starting workflow"
        );

        let (tx, rx) = oneshot::channel();
        let workflow_id = opts.workflow_id.clone();
        let body = handler(input);
        let task = tokio::spawn(async move {
            let outcome = body.await;
            // Receiver may be gone (fire-and-forget start); that's fine.
            let _ = tx.send(outcome);
        });
        running.insert(opts.workflow_id.clone(), task);

        Ok(WorkflowHandle { workflow_id, rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn echo_registry() -> WorkflowRegistry {
        let mut registry = WorkflowRegistry::new();
        registry.register("Echo", |input| async move { Ok(input) });
        registry.register("Slow", |input| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(input)
        });
        registry
    }

    #[tokio::test]
    async fn runs_registered_workflow_to_completion() {
        let engine = InProcessEngine::new(echo_registry());
        let handle = engine
            .start_workflow("Echo", json!({"k": 1}), StartOptions::new("echo-1"))
            .await
            .unwrap();
        assert_eq!(handle.result().await.unwrap()["k"], 1);
    }

    #[tokio::test]
    async fn unknown_workflow_is_rejected() {
        let engine = InProcessEngine::new(echo_registry());
        let err = engine
            .start_workflow("Missing", json!({}), StartOptions::new("x"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::UnknownWorkflow(_)));
    }

    #[tokio::test]
    async fn terminate_if_running_supersedes_prior_instance() {
        let engine = InProcessEngine::new(echo_registry());
        let first = engine
            .start_workflow(
                "Slow",
                json!({"n": 1}),
                StartOptions::new("slow-1").terminate_if_running(),
            )
            .await
            .unwrap();
        let second = engine
            .start_workflow(
                "Echo",
                json!({"n": 2}),
                StartOptions::new("slow-1").terminate_if_running(),
            )
            .await
            .unwrap();

        // The superseded instance resolves to Cancelled; the latest wins.
        assert!(matches!(
            first.result().await,
            Err(EngineError::Cancelled(_))
        ));
        assert_eq!(second.result().await.unwrap()["n"], 2);
    }

    #[tokio::test]
    async fn allow_duplicate_keeps_both_running() {
        let engine = InProcessEngine::new(echo_registry());
        let first = engine
            .start_workflow("Echo", json!({"n": 1}), StartOptions::new("dup"))
            .await
            .unwrap();
        let second = engine
            .start_workflow("Echo", json!({"n": 2}), StartOptions::new("dup"))
            .await
            .unwrap();
        assert_eq!(first.result().await.unwrap()["n"], 1);
        assert_eq!(second.result().await.unwrap()["n"], 2);
    }

    #[tokio::test]
    async fn health_check_defaults_to_ok() {
        let engine = InProcessEngine::new(echo_registry());
        assert!(engine.health_check().await);
    }
}
