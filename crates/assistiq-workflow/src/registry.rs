//! Workflow definition registry.
//!
//! Handlers take their input as raw JSON and re-inflate it into typed
//! records with `serde_json::from_value`. The engine may hand a workflow
//! either a typed value or a generic object map; deserialization is the
//! single code path that tolerates both.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::client::EngineError;

/// Boxed async workflow body: JSON in, JSON out.
pub type WorkflowHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, EngineError>> + Send + Sync>;

/// Named workflow definitions available to an engine binding.
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    handlers: HashMap<String, WorkflowHandler>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow body under its name. A later registration with
    /// the same name replaces the earlier one.
    pub fn register<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, EngineError>> + Send + 'static,
    {
        self.handlers
            .insert(name.to_string(), Arc::new(move |input| Box::pin(handler(input))));
    }

    pub fn get(&self, name: &str) -> Option<WorkflowHandler> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registered_handler_is_invocable() {
        let mut registry = WorkflowRegistry::new();
        registry.register("Echo", |input| async move { Ok(input) });

        let handler = registry.get("Echo").unwrap();
        let out = handler(json!({"ticket_key": "ERP-1"})).await.unwrap();
        assert_eq!(out["ticket_key"], "ERP-1");
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = WorkflowRegistry::new();
        registry.register("B", |input| async move { Ok(input) });
        registry.register("A", |input| async move { Ok(input) });
        assert_eq!(registry.names(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn missing_handler_is_none() {
        let registry = WorkflowRegistry::new();
        assert!(registry.get("Nope").is_none());
        assert!(registry.is_empty());
    }
}
