//! AssistIQ API server.
//!
//! Hosts the admin/webhook HTTP surface, the in-process workflow engine,
//! and the background polling loop.

use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use assistiq::api::{create_api_router, AppState, GenerationGuard};
use assistiq::config::Settings;
use assistiq::services::db_service::DbService;
use assistiq::services::external_ingest::ExternalIngestService;
use assistiq::services::jira_client::JiraClient;
use assistiq::services::llm::ModelService;
use assistiq::services::ocr::PlainTextExtractor;
use assistiq::services::polling::PollingService;
use assistiq::services::web_search::WebSearchService;
use assistiq::workflows::definitions::register_workflows;
use assistiq::workflows::{ResolutionActivities, ValidationActivities};
use assistiq_retrieval::{LazyEmbedder, RetrievalService};
use assistiq_workflow::{InProcessEngine, WorkflowClient, WorkflowRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Arc::new(Settings::from_env());

    let db = Arc::new(
        DbService::connect(&settings.database_url(), settings.db_pool_size)
            .await
            .context("connecting to database")?,
    );
    db.migrate().await.context("applying schema migrations")?;

    // Heavy model load is deferred until the first embedding request.
    let embedder = Arc::new(LazyEmbedder::candle());
    let retrieval = Arc::new(RetrievalService::new(db.pool().clone(), embedder.clone()));

    let jira = Arc::new(JiraClient::new(&settings).context("configuring ticket platform client")?);
    let llm = Arc::new(ModelService::from_settings(&settings));
    let search = Arc::new(WebSearchService::new(&settings, db.clone()));
    let ingest = Arc::new(ExternalIngestService::new(
        db.pool().clone(),
        embedder.clone(),
    ));

    let validation = Arc::new(ValidationActivities::new(
        jira.clone(),
        Arc::new(PlainTextExtractor),
        db.clone(),
        llm.clone(),
        retrieval.clone(),
    ));
    let resolution = Arc::new(ResolutionActivities::new(
        retrieval.clone(),
        search.clone(),
        ingest.clone(),
        llm.clone(),
        jira.clone(),
        db.clone(),
    ));

    let mut registry = WorkflowRegistry::new();
    register_workflows(&mut registry, validation, resolution.clone());
    let engine: Arc<dyn WorkflowClient> = Arc::new(InProcessEngine::new(registry));

    // Polling loop with cooperative shutdown.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let polling = Arc::new(PollingService::new(
        jira.clone(),
        db.clone(),
        engine.clone(),
        settings.task_queue.clone(),
        settings.jira_project.clone(),
        settings.poll_base_interval,
    ));
    let polling_task = tokio::spawn(polling.run(shutdown_rx));

    let state = AppState {
        settings: settings.clone(),
        db,
        jira,
        llm,
        retrieval,
        embedder,
        search,
        ingest,
        engine,
        resolution,
        generation_guard: GenerationGuard::new(),
    };

    let app = create_api_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.bind_addr))?;
    info!("server listening on http://{}", settings.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("serving HTTP")?;

    let _ = shutdown_tx.send(true);
    let _ = polling_task.await;
    info!("server stopped");
    Ok(())
}
