//! Seed the local database with a small knowledge base and solved-ticket
//! corpus for development.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use assistiq::config::Settings;
use assistiq::services::db_service::DbService;
use assistiq_retrieval::{LazyEmbedder, RetrievalService, SolvedTicketRecord};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::from_env();
    let db = DbService::connect(&settings.database_url(), settings.db_pool_size)
        .await
        .context("connecting to database")?;
    db.migrate().await.context("applying schema migrations")?;

    let knowledge: Vec<(String, String)> = [
        ("AP.Invoice", "Invoice ID"),
        ("AP.Invoice", "Invoice Date"),
        ("AP.Invoice", "Amount"),
        ("PO.Creation", "PO Number"),
        ("PO.Creation", "Vendor Name"),
        ("PO.Creation", "Delivery Date"),
        ("GL.JournalEntry", "Journal ID"),
        ("GL.JournalEntry", "Posting Period"),
    ]
    .iter()
    .map(|(m, f)| (m.to_string(), f.to_string()))
    .collect();

    let outcome = db.upsert_module_knowledge(&knowledge).await?;
    info!(
        processed = outcome.rows_processed,
        upserted = outcome.rows_upserted,
        "module knowledge seeded"
    );

    let embedder = Arc::new(LazyEmbedder::candle());
    let retrieval = RetrievalService::new(db.pool().clone(), embedder);

    let corpus = vec![
        SolvedTicketRecord {
            ticket_key: "ERP-101".into(),
            summary: "Invoice stuck in posting queue".into(),
            description: Some("Invoice INV-2024-001 has been in posting status for two days.".into()),
            resolution: "Re-run the AP posting job and clear the stale lock on the batch table.".into(),
        },
        SolvedTicketRecord {
            ticket_key: "ERP-102".into(),
            summary: "User cannot log in after password reset".into(),
            description: Some("Account locks immediately after the nightly sync.".into()),
            resolution: "Unlock account via admin console.".into(),
        },
        SolvedTicketRecord {
            ticket_key: "ERP-103".into(),
            summary: "Ledger export timeout on month-end close".into(),
            description: Some("GL export to the warehouse times out around 40 minutes.".into()),
            resolution: "Increase the export batch window and rebuild the stale index on gl_entries.".into(),
        },
    ];

    let upserted = retrieval.upsert_solved_tickets(&corpus).await?;
    info!(upserted, "solved-ticket corpus seeded");

    Ok(())
}
