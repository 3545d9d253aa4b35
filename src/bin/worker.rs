//! AssistIQ workflow worker.
//!
//! Hosts the workflow definitions and activity implementations on the
//! task queue, independent of the HTTP surface. With the bundled
//! in-process engine this is the execution runtime; a durable engine
//! binding would attach the same registry to its own worker poller.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use assistiq::config::Settings;
use assistiq::services::db_service::DbService;
use assistiq::services::external_ingest::ExternalIngestService;
use assistiq::services::jira_client::JiraClient;
use assistiq::services::llm::ModelService;
use assistiq::services::ocr::PlainTextExtractor;
use assistiq::services::web_search::WebSearchService;
use assistiq::workflows::definitions::register_workflows;
use assistiq::workflows::{ResolutionActivities, ValidationActivities};
use assistiq_retrieval::{LazyEmbedder, RetrievalService};
use assistiq_workflow::{InProcessEngine, WorkflowRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::from_env();

    let db = Arc::new(
        DbService::connect(&settings.database_url(), settings.db_pool_size)
            .await
            .context("connecting to database")?,
    );
    db.migrate().await.context("applying schema migrations")?;

    let embedder = Arc::new(LazyEmbedder::candle());
    let retrieval = Arc::new(RetrievalService::new(db.pool().clone(), embedder.clone()));
    let jira = Arc::new(JiraClient::new(&settings).context("configuring ticket platform client")?);
    let llm = Arc::new(ModelService::from_settings(&settings));
    let search = Arc::new(WebSearchService::new(&settings, db.clone()));
    let ingest = Arc::new(ExternalIngestService::new(db.pool().clone(), embedder));

    let validation = Arc::new(ValidationActivities::new(
        jira.clone(),
        Arc::new(PlainTextExtractor),
        db.clone(),
        llm.clone(),
        retrieval.clone(),
    ));
    let resolution = Arc::new(ResolutionActivities::new(
        retrieval, search, ingest, llm, jira, db,
    ));

    let mut registry = WorkflowRegistry::new();
    register_workflows(&mut registry, validation, resolution);
    let workflows = registry.names();
    let _engine = InProcessEngine::new(registry);

    info!(
        task_queue = %settings.task_queue,
        ?workflows,
        "worker ready"
    );

    tokio::signal::ctrl_c().await.context("waiting for shutdown")?;
    info!("worker stopped");
    Ok(())
}
