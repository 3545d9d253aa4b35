//! HTTP route handlers.
//!
//! Webhook ingress, admin uploads, queue views, the resolution trigger
//! with its rate-limit / single-flight guard, drafts, timeline, and
//! health. Workflow starts fall back to direct in-process activity
//! execution when the engine refuses the start; the response is tagged so
//! the caller knows durability was lost for that request.

use std::collections::HashMap;
use std::io::Cursor;

use assistiq_retrieval::SolvedTicketRecord;
use assistiq_workflow::{EngineError, StartOptions};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use calamine::{Reader, Xlsx};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::workflows::definitions::{FIND_RESOLUTION, POST_RESOLUTION, VALIDATE_TICKET};
use crate::workflows::shared::{ResolutionInput, SynthesizedSolution};

use super::schemas::{
    ErrorResponse, HealthQuery, HealthResponse, PostSolutionRequest, SaveDraftRequest,
    UploadResponse, WebhookPayload,
};
use super::state::{AppState, GuardRejection};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn internal_error(detail: impl std::fmt::Display) -> ApiError {
    error!("request failed: {detail}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(detail.to_string())),
    )
}

fn bad_request(detail: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(detail)))
}

/// Build the API router.
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/jira-webhook", post(jira_webhook))
        .route("/api/trigger-validation/:ticket_key", post(trigger_validation))
        .route("/api/upload-knowledge", post(upload_knowledge))
        .route("/api/upload-solved-tickets", post(upload_solved_tickets))
        .route("/api/complete-tickets", get(complete_tickets))
        .route("/api/incomplete-tickets", get(incomplete_tickets))
        .route("/api/generate-solutions/:ticket_key", post(generate_solutions))
        .route("/api/solutions-cache/:ticket_key", get(solutions_cache))
        .route("/api/save-draft/:ticket_key", post(save_draft))
        .route("/api/drafts/:ticket_key", get(list_drafts))
        .route("/api/post-solution/:ticket_key", post(post_solution))
        .route("/api/timeline/:ticket_key", get(timeline))
        .route("/api/impact-counters", get(impact_counters))
        .route("/api/validation-stats", get(validation_stats))
        .route("/api/health", get(health))
        .with_state(state)
}

/// POST /api/jira-webhook — always answers 200; a failed workflow start is
/// logged, not surfaced to the platform.
async fn jira_webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Json<Value> {
    info!(event = %payload.webhook_event, "received ticket webhook");
    if payload.triggers_validation() {
        if let Some(issue) = &payload.issue {
            if let Err(e) = start_validation(&state, &issue.key).await {
                error!(ticket_key = %issue.key, "webhook failed to start validation: {e}");
            }
        }
    }
    Json(json!({ "status": "received" }))
}

/// POST /api/trigger-validation/{key} — manual start, 202 on accept.
async fn trigger_validation(
    State(state): State<AppState>,
    Path(ticket_key): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    start_validation(&state, &ticket_key)
        .await
        .map_err(internal_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "success",
            "message": format!("Workflow 'validate-ticket-{ticket_key}' started successfully."),
            "workflow_id": format!("validate-ticket-{ticket_key}"),
        })),
    ))
}

async fn start_validation(state: &AppState, ticket_key: &str) -> Result<(), EngineError> {
    let opts = StartOptions::new(format!("validate-ticket-{ticket_key}"))
        .task_queue(state.settings.task_queue.clone())
        .terminate_if_running();
    state
        .engine
        .start_workflow(VALIDATE_TICKET, json!({ "ticket_key": ticket_key }), opts)
        .await?;
    Ok(())
}

/// POST /api/upload-knowledge — CSV/XLSX with `module_name,field_name`.
async fn upload_knowledge(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let (filename, bytes) = read_upload(multipart).await?;
    let rows = parse_tabular(&filename, &bytes, &["module_name", "field_name"])
        .map_err(bad_request)?;

    let pairs: Vec<(String, String)> = rows
        .iter()
        .map(|row| {
            (
                row.get("module_name").cloned().unwrap_or_default(),
                row.get("field_name").cloned().unwrap_or_default(),
            )
        })
        .collect();

    let outcome = state
        .db
        .upsert_module_knowledge(&pairs)
        .await
        .map_err(internal_error)?;
    if !outcome.errors.is_empty() {
        return Err(bad_request(format!(
            "Errors occurred during processing: {}",
            outcome.errors.join("; ")
        )));
    }

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            filename,
            status: "success".to_string(),
            message: "Knowledge base updated successfully.".to_string(),
            rows_processed: outcome.rows_processed,
            rows_upserted: outcome.rows_upserted,
        }),
    ))
}

/// POST /api/upload-solved-tickets — CSV/XLSX with
/// `ticket_key,summary,resolution` (+ optional `description`).
async fn upload_solved_tickets(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let (filename, bytes) = read_upload(multipart).await?;
    let rows = parse_tabular(&filename, &bytes, &["ticket_key", "summary", "resolution"])
        .map_err(bad_request)?;

    let records: Vec<SolvedTicketRecord> = rows
        .iter()
        .map(|row| SolvedTicketRecord {
            ticket_key: row.get("ticket_key").cloned().unwrap_or_default(),
            summary: row.get("summary").cloned().unwrap_or_default(),
            description: row.get("description").cloned().filter(|d| !d.is_empty()),
            resolution: row.get("resolution").cloned().unwrap_or_default(),
        })
        .collect();

    let upserted = state
        .retrieval
        .upsert_solved_tickets(&records)
        .await
        .map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            filename,
            status: "success".to_string(),
            message: "Solved tickets knowledge base updated successfully.".to_string(),
            rows_processed: records.len(),
            rows_upserted: upserted,
        }),
    ))
}

/// GET /api/complete-tickets
async fn complete_tickets(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let tickets = state
        .db
        .get_complete_tickets()
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({ "tickets": tickets })))
}

/// GET /api/incomplete-tickets
async fn incomplete_tickets(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let tickets = state
        .db
        .get_incomplete_tickets()
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({ "tickets": tickets })))
}

/// POST /api/generate-solutions/{key} — 429 inside the rate window, 409
/// when already in flight, otherwise the resolution payload.
async fn generate_solutions(
    State(state): State<AppState>,
    Path(ticket_key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.generation_guard.try_begin(&ticket_key) {
        Ok(()) => {}
        Err(GuardRejection::InFlight) => {
            return Err((
                StatusCode::CONFLICT,
                Json(ErrorResponse::new(format!(
                    "A solution generation for {ticket_key} is already in progress."
                ))),
            ));
        }
        Err(GuardRejection::RateLimited) => {
            return Err((
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorResponse::new(format!(
                    "Solutions for {ticket_key} were just generated; retry shortly."
                ))),
            ));
        }
    }

    let result = run_generation(&state, &ticket_key).await;
    match result {
        Ok(payload) => {
            state.generation_guard.finish(&ticket_key, Some(payload.clone()));
            Ok(Json(payload))
        }
        Err(e) => {
            state.generation_guard.finish(&ticket_key, None);
            Err(e)
        }
    }
}

async fn run_generation(state: &AppState, ticket_key: &str) -> Result<Value, ApiError> {
    let details = state
        .jira
        .get_ticket_details(ticket_key)
        .await
        .map_err(internal_error)?;
    let bundled_text = format!(
        "Ticket Key: {ticket_key}\nSummary: {}\nDescription: {}",
        details.summary,
        details.description.unwrap_or_default()
    );
    let input = ResolutionInput {
        ticket_key: ticket_key.to_string(),
        ticket_bundled_text: bundled_text,
    };
    let input_value = serde_json::to_value(&input).map_err(internal_error)?;

    let opts = StartOptions::new(format!("find-resolution-{ticket_key}"))
        .task_queue(state.settings.task_queue.clone())
        .terminate_if_running();

    match state
        .engine
        .start_workflow(FIND_RESOLUTION, input_value, opts)
        .await
    {
        Ok(handle) => handle.result().await.map_err(internal_error),
        Err(engine_error) => {
            // Liveness over durability: run the same activity in-process
            // and tag the response with the original engine error.
            warn!(
                ticket_key,
                "engine start failed, running resolution in-process: {engine_error}"
            );
            let outcome = state
                .resolution
                .find_and_synthesize(&input)
                .await
                .map_err(|fallback_error| {
                    internal_error(format!(
                        "fallback failed: {fallback_error}; original engine error: {engine_error}"
                    ))
                })?;
            let mut payload = serde_json::to_value(outcome).map_err(internal_error)?;
            if let Some(object) = payload.as_object_mut() {
                if object.get("status").and_then(Value::as_str) == Some("success") {
                    object.insert("status".into(), Value::String("success_fallback".into()));
                }
                object.insert("engine_error".into(), Value::String(engine_error.to_string()));
            }
            Ok(payload)
        }
    }
}

/// GET /api/solutions-cache/{key} — 404 when nothing was generated yet.
async fn solutions_cache(
    State(state): State<AppState>,
    Path(ticket_key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .generation_guard
        .cached(&ticket_key)
        .map(Json)
        .ok_or((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(format!(
                "No cached solutions for {ticket_key}."
            ))),
        ))
}

/// POST /api/save-draft/{key}
async fn save_draft(
    State(state): State<AppState>,
    Path(ticket_key): Path<String>,
    Json(body): Json<SaveDraftRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let draft = state
        .db
        .save_draft(&ticket_key, &body.draft_text, body.author.as_deref())
        .await
        .map_err(internal_error)?;
    Ok((StatusCode::CREATED, Json(json!({ "draft": draft }))))
}

/// GET /api/drafts/{key}
async fn list_drafts(
    State(state): State<AppState>,
    Path(ticket_key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let drafts = state
        .db
        .list_drafts(&ticket_key)
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({ "drafts": drafts })))
}

/// POST /api/post-solution/{key} — start `PostResolution`, falling back to
/// in-process posting when the engine refuses the start.
async fn post_solution(
    State(state): State<AppState>,
    Path(ticket_key): Path<String>,
    Json(body): Json<PostSolutionRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let solution = SynthesizedSolution {
        solution_text: body.solution_text,
        llm_provider_model: body
            .llm_provider_model
            .unwrap_or_else(|| "human-approved".to_string()),
        sources: body.sources,
        reasoning: body.reasoning,
    };
    let input = json!({ "ticket_key": ticket_key, "solution": solution });

    let opts = StartOptions::new(format!("post-resolution-{ticket_key}"))
        .task_queue(state.settings.task_queue.clone())
        .terminate_if_running();

    match state.engine.start_workflow(POST_RESOLUTION, input, opts).await {
        Ok(_handle) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "success",
                "message": format!("Solution posting started for ticket {ticket_key}."),
                "workflow_id": format!("post-resolution-{ticket_key}"),
            })),
        )),
        Err(engine_error) => {
            warn!(
                ticket_key = %ticket_key,
                "engine start failed, posting solution in-process: {engine_error}"
            );
            state
                .resolution
                .post_solution(&ticket_key, &solution)
                .await
                .map_err(|fallback_error| {
                    internal_error(format!(
                        "fallback failed: {fallback_error}; original engine error: {engine_error}"
                    ))
                })?;
            state
                .resolution
                .log_resolution(&ticket_key, &solution)
                .await
                .map_err(internal_error)?;
            Ok((
                StatusCode::ACCEPTED,
                Json(json!({
                    "status": "success_fallback",
                    "message": format!("Solution posted in-process for ticket {ticket_key}."),
                    "engine_error": engine_error.to_string(),
                })),
            ))
        }
    }
}

/// GET /api/timeline/{key}
async fn timeline(
    State(state): State<AppState>,
    Path(ticket_key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let events = state
        .db
        .get_timeline(&ticket_key)
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({ "events": events })))
}

/// GET /api/impact-counters
async fn impact_counters(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let counters = state.db.impact_counters().await.map_err(internal_error)?;
    Ok(Json(json!(counters)))
}

/// GET /api/validation-stats
async fn validation_stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = state.db.validation_stats().await.map_err(internal_error)?;
    Ok(Json(json!({ "counts": stats })))
}

/// GET /api/health?warm=bool
async fn health(
    State(state): State<AppState>,
    Query(query): Query<HealthQuery>,
) -> Json<HealthResponse> {
    if query.warm {
        if let Err(e) = state.embedder.get().await {
            warn!("embedding model warm-up failed: {e}");
        }
    }
    Json(HealthResponse {
        db_ok: state.db.health_check().await,
        engine_ok: state.engine.health_check().await,
        embedding_model_loaded: state.embedder.is_loaded(),
        retrieval_only_mode: state.llm.is_empty(),
    })
}

// ---- Upload parsing ----

/// Read the first file field of a multipart upload.
async fn read_upload(mut multipart: Multipart) -> Result<(String, Vec<u8>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {e}")))?
    {
        if let Some(filename) = field.file_name().map(str::to_string) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| bad_request(format!("failed to read upload: {e}")))?;
            return Ok((filename, bytes.to_vec()));
        }
    }
    Err(bad_request("no file field in upload"))
}

fn normalize_header(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "_")
}

/// Parse a CSV or XLSX upload into header-keyed rows, verifying the
/// required columns are present.
pub fn parse_tabular(
    filename: &str,
    bytes: &[u8],
    required: &[&str],
) -> Result<Vec<HashMap<String, String>>, String> {
    let rows = if filename.ends_with(".csv") {
        parse_csv(bytes)?
    } else if filename.ends_with(".xlsx") {
        parse_xlsx(bytes)?
    } else {
        return Err("Invalid file format. Please upload a CSV or XLSX file.".to_string());
    };

    if let Some(first) = rows.first() {
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|col| !first.contains_key(*col))
            .collect();
        if !missing.is_empty() {
            return Err(format!(
                "File is missing required column(s): {}",
                missing.join(", ")
            ));
        }
    } else {
        return Err("File contains no data rows.".to_string());
    }

    Ok(rows)
}

fn parse_csv(bytes: &[u8]) -> Result<Vec<HashMap<String, String>>, String> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| format!("invalid CSV header: {e}"))?
        .iter()
        .map(normalize_header)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| format!("invalid CSV row: {e}"))?;
        let row: HashMap<String, String> = headers
            .iter()
            .cloned()
            .zip(record.iter().map(|v| v.trim().to_string()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

fn parse_xlsx(bytes: &[u8]) -> Result<Vec<HashMap<String, String>>, String> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes.to_vec()))
        .map_err(|e| format!("invalid XLSX file: {e}"))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| "XLSX file has no worksheets".to_string())?
        .map_err(|e| format!("failed to read worksheet: {e}"))?;

    let mut iter = range.rows();
    let headers: Vec<String> = iter
        .next()
        .ok_or_else(|| "XLSX worksheet is empty".to_string())?
        .iter()
        .map(|cell| normalize_header(&cell.to_string()))
        .collect();

    let mut rows = Vec::new();
    for row in iter {
        let map: HashMap<String, String> = headers
            .iter()
            .cloned()
            .zip(row.iter().map(|cell| cell.to_string().trim().to_string()))
            .collect();
        rows.push(map);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_upload_parses_with_normalized_headers() {
        let csv = b"Module Name,Field Name\nAP.Invoice,Invoice ID\nAP.Invoice,Amount\n";
        let rows = parse_tabular("knowledge.csv", csv, &["module_name", "field_name"]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["module_name"], "AP.Invoice");
        assert_eq!(rows[1]["field_name"], "Amount");
    }

    #[test]
    fn missing_required_column_is_rejected() {
        let csv = b"module_name\nAP.Invoice\n";
        let err =
            parse_tabular("knowledge.csv", csv, &["module_name", "field_name"]).unwrap_err();
        assert!(err.contains("field_name"));
    }

    #[test]
    fn wrong_extension_is_rejected() {
        let err = parse_tabular("knowledge.txt", b"x", &["module_name"]).unwrap_err();
        assert!(err.contains("Invalid file format"));
    }

    #[test]
    fn empty_file_is_rejected() {
        let err = parse_tabular("empty.csv", b"module_name,field_name\n", &["module_name"])
            .unwrap_err();
        assert!(err.contains("no data rows"));
    }
}
