//! Shared API state.
//!
//! Besides the service handles, this holds the process-wide request
//! registry for solution generation: a rate window, an in-flight set, and
//! the last-payload cache. The registry exists purely to de-duplicate
//! requests within one process lifetime and is never persisted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use assistiq_retrieval::{LazyEmbedder, RetrievalService};
use assistiq_workflow::WorkflowClient;

use crate::config::Settings;
use crate::services::db_service::DbService;
use crate::services::external_ingest::ExternalIngestService;
use crate::services::jira_client::JiraClient;
use crate::services::llm::ModelService;
use crate::services::web_search::WebSearchService;
use crate::workflows::resolution::ResolutionActivities;

/// Seconds a ticket must wait between generation requests.
const RATE_WINDOW: Duration = Duration::from_secs(25);

/// Everything the handlers need.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: Arc<DbService>,
    pub jira: Arc<JiraClient>,
    pub llm: Arc<ModelService>,
    pub retrieval: Arc<RetrievalService>,
    pub embedder: Arc<LazyEmbedder>,
    pub search: Arc<WebSearchService>,
    pub ingest: Arc<ExternalIngestService>,
    pub engine: Arc<dyn WorkflowClient>,
    pub resolution: Arc<ResolutionActivities>,
    pub generation_guard: GenerationGuard,
}

/// Why a generation request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardRejection {
    /// A generation for this ticket is already running (409).
    InFlight,
    /// Re-requested inside the rate window (429).
    RateLimited,
}

#[derive(Default)]
struct GuardInner {
    last_request: HashMap<String, Instant>,
    in_flight: HashSet<String>,
    cache: HashMap<String, serde_json::Value>,
}

/// Per-process rate-limit / single-flight registry for solution generation.
#[derive(Clone, Default)]
pub struct GenerationGuard {
    inner: Arc<Mutex<GuardInner>>,
}

impl GenerationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the generation slot for a ticket, or say why not.
    pub fn try_begin(&self, ticket_key: &str) -> Result<(), GuardRejection> {
        self.try_begin_at(ticket_key, Instant::now())
    }

    fn try_begin_at(&self, ticket_key: &str, now: Instant) -> Result<(), GuardRejection> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.in_flight.contains(ticket_key) {
            return Err(GuardRejection::InFlight);
        }
        if let Some(last) = inner.last_request.get(ticket_key) {
            if now.duration_since(*last) < RATE_WINDOW {
                return Err(GuardRejection::RateLimited);
            }
        }
        inner.last_request.insert(ticket_key.to_string(), now);
        inner.in_flight.insert(ticket_key.to_string());
        Ok(())
    }

    /// Release the slot, optionally caching the produced payload.
    pub fn finish(&self, ticket_key: &str, payload: Option<serde_json::Value>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.in_flight.remove(ticket_key);
        if let Some(payload) = payload {
            inner.cache.insert(ticket_key.to_string(), payload);
        }
    }

    /// Last generation payload for a ticket, if any.
    pub fn cached(&self, ticket_key: &str) -> Option<serde_json::Value> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.cache.get(ticket_key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn second_request_while_in_flight_is_409() {
        let guard = GenerationGuard::new();
        assert!(guard.try_begin("ERP-1").is_ok());
        assert_eq!(guard.try_begin("ERP-1"), Err(GuardRejection::InFlight));
    }

    #[test]
    fn request_inside_rate_window_is_429() {
        let guard = GenerationGuard::new();
        let start = Instant::now();
        assert!(guard.try_begin_at("ERP-1", start).is_ok());
        guard.finish("ERP-1", None);
        assert_eq!(
            guard.try_begin_at("ERP-1", start + Duration::from_secs(5)),
            Err(GuardRejection::RateLimited)
        );
    }

    #[test]
    fn request_after_rate_window_succeeds() {
        let guard = GenerationGuard::new();
        let start = Instant::now();
        assert!(guard.try_begin_at("ERP-1", start).is_ok());
        guard.finish("ERP-1", None);
        assert!(guard
            .try_begin_at("ERP-1", start + Duration::from_secs(26))
            .is_ok());
    }

    #[test]
    fn tickets_are_independent() {
        let guard = GenerationGuard::new();
        assert!(guard.try_begin("ERP-1").is_ok());
        assert!(guard.try_begin("ERP-2").is_ok());
    }

    #[test]
    fn exactly_one_of_two_concurrent_calls_wins() {
        let guard = GenerationGuard::new();
        let now = Instant::now();
        let results = [
            guard.try_begin_at("ERP-1", now),
            guard.try_begin_at("ERP-1", now),
        ];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    }

    #[test]
    fn finish_caches_the_payload() {
        let guard = GenerationGuard::new();
        guard.try_begin("ERP-1").unwrap();
        guard.finish("ERP-1", Some(json!({"status": "success"})));
        assert_eq!(guard.cached("ERP-1").unwrap()["status"], "success");
        assert!(guard.cached("ERP-2").is_none());
    }
}
