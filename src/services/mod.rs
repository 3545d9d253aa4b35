//! Service layer: persistence, ticket platform client, model providers,
//! external search, and the cross-cutting helpers used by the pipelines.

pub mod compliance;
pub mod constants;
pub mod context_hints;
pub mod db_service;
pub mod external_ingest;
pub mod guardrail;
pub mod jira_client;
pub mod llm;
pub mod ocr;
pub mod polling;
pub mod priority;
pub mod web_search;

pub use db_service::DbService;
pub use external_ingest::ExternalIngestService;
pub use jira_client::JiraClient;
pub use llm::ModelService;
pub use polling::PollingService;
pub use web_search::WebSearchService;
