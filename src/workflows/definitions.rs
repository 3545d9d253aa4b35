//! Workflow definitions wired into the engine registry.
//!
//! Each workflow body re-inflates its JSON input into the typed record,
//! runs its activities under the default activity options (5 minute
//! timeout, 3 attempts), and returns a JSON outcome.

use std::sync::Arc;

use assistiq_workflow::{run_activity, ActivityOptions, EngineError, WorkflowRegistry};
use serde_json::{json, Value};
use tracing::info;

use super::resolution::ResolutionActivities;
use super::shared::{
    ResolutionInput, TicketValidationInput, ValidationStatus,
};
use super::validation::ValidationActivities;

pub const VALIDATE_TICKET: &str = "ValidateTicket";
pub const FIND_RESOLUTION: &str = "FindResolution";
pub const POST_RESOLUTION: &str = "PostResolution";

fn activity_failed(workflow: &str, e: impl std::fmt::Display) -> EngineError {
    EngineError::WorkflowFailed {
        id: workflow.to_string(),
        reason: e.to_string(),
    }
}

/// Register the three ticket workflows.
pub fn register_workflows(
    registry: &mut WorkflowRegistry,
    validation: Arc<ValidationActivities>,
    resolution: Arc<ResolutionActivities>,
) {
    let v = validation.clone();
    registry.register(VALIDATE_TICKET, move |input| {
        let activities = v.clone();
        async move { validate_ticket(activities, input).await }
    });

    let r = resolution.clone();
    registry.register(FIND_RESOLUTION, move |input| {
        let activities = r.clone();
        async move { find_resolution(activities, input).await }
    });

    registry.register(POST_RESOLUTION, move |input| {
        let activities = resolution.clone();
        async move { post_resolution(activities, input).await }
    });
}

/// Validation state machine: fetch → verdict → log → status side-effect.
async fn validate_ticket(
    activities: Arc<ValidationActivities>,
    input: Value,
) -> Result<Value, EngineError> {
    let input: TicketValidationInput = serde_json::from_value(input)?;
    let ticket_key = input.ticket_key;
    let opts = ActivityOptions::default();

    info!(%ticket_key, "gathering multimodal context");
    let context = run_activity("fetch_context", opts, || {
        activities.fetch_context(&ticket_key)
    })
    .await
    .map_err(|e| activity_failed(VALIDATE_TICKET, e))?;

    let verdict = run_activity("verdict", opts, || activities.verdict(&context))
        .await
        .map_err(|e| activity_failed(VALIDATE_TICKET, e))?;
    info!(
        %ticket_key,
        confidence = verdict.confidence,
        "verdict received"
    );

    run_activity("log_validation", opts, || {
        activities.log_validation(&ticket_key, &verdict)
    })
    .await
    .map_err(|e| activity_failed(VALIDATE_TICKET, e))?;

    let summary = match verdict.validation_status {
        ValidationStatus::Incomplete => {
            info!(
                %ticket_key,
                missing = ?verdict.missing_fields,
                "verdict: INCOMPLETE"
            );
            let message = run_activity("comment_and_reassign", opts, || {
                activities.comment_and_reassign(
                    &ticket_key,
                    &verdict,
                    context.reporter_id.as_deref(),
                )
            })
            .await
            .map_err(|e| activity_failed(VALIDATE_TICKET, e))?;
            format!("Workflow complete. Status: Incomplete. {message}")
        }
        ValidationStatus::Complete => {
            info!(%ticket_key, "verdict: COMPLETE");
            let message = run_activity("notify_in_queue", opts, || {
                activities.notify_in_queue(&ticket_key)
            })
            .await
            .map_err(|e| activity_failed(VALIDATE_TICKET, e))?;
            format!("Workflow complete. Status: Complete. {message}")
        }
        ValidationStatus::Error => {
            // No external side-effect; the error event is already logged.
            format!("Workflow complete. Status: Error. No action taken for {ticket_key}.")
        }
    };

    Ok(json!({
        "ticket_key": ticket_key,
        "status": verdict.validation_status.as_str(),
        "summary": summary,
    }))
}

/// Generate alternatives; never posts anything.
async fn find_resolution(
    activities: Arc<ResolutionActivities>,
    input: Value,
) -> Result<Value, EngineError> {
    let input: ResolutionInput = serde_json::from_value(input)?;
    info!(ticket_key = %input.ticket_key, "resolution workflow started");

    let outcome = run_activity("find_and_synthesize", ActivityOptions::default(), || {
        activities.find_and_synthesize(&input)
    })
    .await
    .map_err(|e| activity_failed(FIND_RESOLUTION, e))?;

    Ok(serde_json::to_value(outcome)?)
}

/// Post a human-approved solution, then log it.
async fn post_resolution(
    activities: Arc<ResolutionActivities>,
    input: Value,
) -> Result<Value, EngineError> {
    #[derive(serde::Deserialize)]
    struct PostInput {
        ticket_key: String,
        solution: super::shared::SynthesizedSolution,
    }

    let input: PostInput = serde_json::from_value(input)?;
    let opts = ActivityOptions::default();

    let message = run_activity("post_solution", opts, || {
        activities.post_solution(&input.ticket_key, &input.solution)
    })
    .await
    .map_err(|e| activity_failed(POST_RESOLUTION, e))?;

    run_activity("log_resolution", opts, || {
        activities.log_resolution(&input.ticket_key, &input.solution)
    })
    .await
    .map_err(|e| activity_failed(POST_RESOLUTION, e))?;

    info!(ticket_key = %input.ticket_key, "approved solution posted");
    Ok(json!({
        "ticket_key": input.ticket_key,
        "message": message,
    }))
}
