//! Resolution pipeline activities.
//!
//! retrieve → cluster → augment → synthesize → guardrail → score. Invoked
//! on demand for a validated ticket; drafts are reviewed by a human before
//! anything is posted back.

use std::sync::Arc;

use anyhow::Context;
use assistiq_retrieval::{
    cluster_representatives, RetrievalService, SimilarTicket, DEFAULT_MAX_DISTANCE, DEFAULT_TOP_K,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::services::constants::{AGENT_SIGNATURE, FOLLOW_UP_QUESTIONS};
use crate::services::db_service::{DbService, TicketEventType};
use crate::services::external_ingest::{ExternalIngestService, IngestedDoc};
use crate::services::guardrail::{validate_solution, ValidationIssue};
use crate::services::jira_client::JiraClient;
use crate::services::llm::{EvidenceSource, ModelService, SolutionDraft};
use crate::services::web_search::WebSearchService;

use super::shared::{ResolutionInput, SynthesizedSolution};

/// Bundled text shorter than this cannot ground a resolution attempt.
const MIN_CONTEXT_LEN: usize = 120;
/// Characters of the referenced resolution shown on duplicate short-circuit.
const DUPLICATE_PREVIEW_LEN: usize = 600;
/// External results requested when augmentation triggers.
const EXTERNAL_MAX_RESULTS: usize = 3;
/// Cosine similarity threshold for collapsing near-duplicate evidence.
const CLUSTER_SIM_THRESHOLD: f32 = 0.90;
/// Number of solution alternatives synthesized per request.
const NUM_ALTERNATIVES: usize = 3;
/// Per-rank confidence decay across alternatives.
const RANK_DECAY: &[f64] = &[1.0, 0.93, 0.87];
/// Confidence cap for alternatives the guardrail rejected.
const INVALID_CONFIDENCE_CAP: f64 = 0.55;
/// Alternatives below this confidence raise the escalate flag.
const ESCALATE_THRESHOLD: f64 = 0.2;

/// One scored, guardrail-checked alternative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredSolution {
    pub solution_text: String,
    pub confidence: f64,
    pub llm_provider_model: String,
    pub sources: Vec<String>,
    pub reasoning: String,
    #[serde(default)]
    pub validation_issues: Vec<ValidationIssue>,
    pub guardrail_valid: bool,
}

/// Outcome of a resolution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// The ticket duplicates an already-solved one.
    Duplicate {
        ticket_key: String,
        duplicate_of: String,
        resolution_preview: String,
    },
    /// Not enough context to ground a resolution.
    NeedsMoreInfo {
        ticket_key: String,
        follow_up_questions: Vec<String>,
    },
    /// Synthesized alternatives ready for review.
    Success {
        ticket_key: String,
        solutions: Vec<ScoredSolution>,
        ticket_context: String,
        escalate: bool,
        external_used: bool,
    },
}

/// Activity implementations for `FindResolution` and `PostResolution`.
pub struct ResolutionActivities {
    retrieval: Arc<RetrievalService>,
    search: Arc<WebSearchService>,
    ingest: Arc<ExternalIngestService>,
    llm: Arc<ModelService>,
    jira: Arc<JiraClient>,
    db: Arc<DbService>,
}

impl ResolutionActivities {
    pub fn new(
        retrieval: Arc<RetrievalService>,
        search: Arc<WebSearchService>,
        ingest: Arc<ExternalIngestService>,
        llm: Arc<ModelService>,
        jira: Arc<JiraClient>,
        db: Arc<DbService>,
    ) -> Self {
        Self {
            retrieval,
            search,
            ingest,
            llm,
            jira,
            db,
        }
    }

    /// Full retrieve→synthesize→score pass for one ticket.
    pub async fn find_and_synthesize(
        &self,
        input: &ResolutionInput,
    ) -> anyhow::Result<ResolutionOutcome> {
        let ticket_key = &input.ticket_key;

        // Duplicate short-circuit from the stored verdict.
        if let Some(record) = self.db.get_validation(ticket_key).await? {
            if let Some(duplicate_of) = record.duplicate_of {
                let preview = self
                    .retrieval
                    .get_resolution(&duplicate_of)
                    .await?
                    .unwrap_or_default()
                    .chars()
                    .take(DUPLICATE_PREVIEW_LEN)
                    .collect::<String>();
                self.db
                    .add_event(
                        ticket_key,
                        TicketEventType::DuplicateShortCircuit,
                        &format!("Resolution short-circuited to duplicate {duplicate_of}"),
                    )
                    .await?;
                info!(%ticket_key, duplicate_of = %duplicate_of, "duplicate short-circuit");
                return Ok(ResolutionOutcome::Duplicate {
                    ticket_key: ticket_key.clone(),
                    duplicate_of,
                    resolution_preview: preview,
                });
            }
        }

        // Low-information short-circuit; no model call is issued.
        if input.ticket_bundled_text.len() < MIN_CONTEXT_LEN {
            info!(%ticket_key, "ticket too thin for resolution, asking follow-ups");
            return Ok(ResolutionOutcome::NeedsMoreInfo {
                ticket_key: ticket_key.clone(),
                follow_up_questions: FOLLOW_UP_QUESTIONS
                    .iter()
                    .map(|q| q.to_string())
                    .collect(),
            });
        }

        // Internal retrieval.
        let similar = self
            .retrieval
            .find_similar(
                &input.ticket_bundled_text,
                DEFAULT_TOP_K,
                Some(DEFAULT_MAX_DISTANCE),
            )
            .await
            .context("retrieving similar tickets")?;
        let distances: Vec<f64> = similar.iter().map(|t| t.distance).collect();

        // Quality-aware external augmentation.
        let mut external_sources: Vec<IngestedDoc> = Vec::new();
        if needs_external_augmentation(&distances) {
            info!(%ticket_key, "triggering external augmentation");
            let raw = self
                .search
                .search(&input.ticket_bundled_text, EXTERNAL_MAX_RESULTS)
                .await;
            if !raw.is_empty() {
                match self.ingest.ingest_results(&raw).await {
                    Ok(docs) => external_sources = docs,
                    Err(e) => {
                        warn!("external ingestion failed (continuing with internal only): {}", e)
                    }
                }
            }
        }

        // Cluster internal hits down to representatives.
        let representatives = self.cluster_internal(&similar).await;
        info!(
            %ticket_key,
            internal = similar.len(),
            representatives = representatives.len(),
            external = external_sources.len(),
            "evidence prepared for synthesis"
        );

        let external_used = !external_sources.is_empty();
        let internal_keys: Vec<String> =
            representatives.iter().map(|t| t.ticket_key.clone()).collect();
        let external_indices: Vec<String> = (1..=external_sources.len())
            .map(|i| i.to_string())
            .collect();

        let evidence = build_evidence(&representatives, &external_sources);

        // Synthesize alternatives over the shared evidence set.
        let drafts = self
            .llm
            .generate_solution_alternatives(
                &input.ticket_bundled_text,
                &evidence,
                NUM_ALTERNATIVES,
            )
            .await;

        let base_confidence = compute_confidence(&distances, 1.0, external_used);
        let mut solutions = score_alternatives(
            drafts,
            base_confidence,
            &internal_keys,
            &external_indices,
        );

        // Local heuristic fallback when the model produced nothing usable.
        if solutions.iter().all(|s| s.solution_text.is_empty()) {
            warn!(%ticket_key, "all model drafts empty, using heuristic fallback");
            solutions = vec![heuristic_fallback(base_confidence)];
        }

        let escalate = solutions
            .iter()
            .any(|s| s.confidence < ESCALATE_THRESHOLD);

        self.db
            .add_event(
                ticket_key,
                TicketEventType::SolutionsGenerated,
                &format!("{} solution alternative(s) generated", solutions.len()),
            )
            .await?;

        Ok(ResolutionOutcome::Success {
            ticket_key: ticket_key.clone(),
            solutions,
            ticket_context: input.ticket_bundled_text.clone(),
            escalate,
            external_used,
        })
    }

    /// Cluster internal hits; on embedding failure every hit stays its own
    /// representative.
    async fn cluster_internal(&self, similar: &[SimilarTicket]) -> Vec<SimilarTicket> {
        if similar.is_empty() {
            return Vec::new();
        }
        let texts: Vec<String> = similar
            .iter()
            .map(|t| format!("{}\n{}", t.summary, t.resolution))
            .collect();
        match self.retrieval.embed_texts(&texts).await {
            Ok(embeddings) => cluster_representatives(&embeddings, CLUSTER_SIM_THRESHOLD)
                .into_iter()
                .map(|idx| similar[idx].clone())
                .collect(),
            Err(e) => {
                warn!("clustering skipped, embedding failed: {}", e);
                similar.to_vec()
            }
        }
    }

    /// Post a human-approved solution as a comment on the ticket.
    pub async fn post_solution(
        &self,
        ticket_key: &str,
        solution: &SynthesizedSolution,
    ) -> anyhow::Result<String> {
        let comment = format!(
            "Hello,\n\nBased on an analysis of similar past issues, here is a \
             suggested resolution for your ticket:\n\n---\n{}\n---\n\nThis is an \
             automated suggestion. Please review before executing any steps.{}",
            solution.solution_text, AGENT_SIGNATURE
        );
        self.jira
            .add_comment(ticket_key, &comment)
            .await
            .context("posting solution comment")?;
        info!(ticket_key, "solution posted to ticket");
        Ok(format!("Solution posted to ticket {ticket_key}."))
    }

    /// Append-only audit of a posted resolution. Only tickets validated
    /// `complete` may acquire a resolution record.
    pub async fn log_resolution(
        &self,
        ticket_key: &str,
        solution: &SynthesizedSolution,
    ) -> anyhow::Result<()> {
        let validation = self.db.get_validation(ticket_key).await?;
        if validation.map(|r| r.status) != Some("complete".to_string()) {
            anyhow::bail!(
                "ticket {ticket_key} has no complete validation; refusing to log resolution"
            );
        }
        self.db
            .log_resolution(
                ticket_key,
                &solution.solution_text,
                &solution.llm_provider_model,
                &solution.sources,
                solution.reasoning.as_deref(),
                None,
            )
            .await
            .context("logging resolution")?;
        self.db
            .add_event(
                ticket_key,
                TicketEventType::SolutionPosted,
                &format!("Solution posted using {}", solution.llm_provider_model),
            )
            .await?;
        Ok(())
    }
}

/// External augmentation triggers when internal evidence is missing, weak,
/// or dominated by a single outlier hit.
pub fn needs_external_augmentation(distances: &[f64]) -> bool {
    if distances.is_empty() {
        return true;
    }
    let mut sorted = distances.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    if sorted[0] > 0.55 {
        return true;
    }
    if sorted.len() > 1 {
        let gap_ratio = (sorted[1] - sorted[0]) / (sorted[0] + 1e-6);
        if gap_ratio > 1.2 {
            return true;
        }
    }
    false
}

/// Evidence-based confidence shared by every alternative:
/// `0.55·top_sim + 0.30·avg_sim + 0.10·coverage + external_boost`,
/// where `sim = 1/(1+distance)`, clamped to `[0, 0.98]`.
pub fn compute_confidence(distances: &[f64], coverage_ratio: f64, external_used: bool) -> f64 {
    let sims: Vec<f64> = distances.iter().map(|d| 1.0 / (1.0 + d)).collect();
    if sims.is_empty() {
        return 0.15;
    }
    let top_sim = sims.iter().cloned().fold(f64::MIN, f64::max);
    let avg_sim = sims.iter().sum::<f64>() / sims.len() as f64;
    let external_boost = if external_used && top_sim < 0.45 {
        0.05
    } else {
        0.0
    };
    let raw = 0.55 * top_sim + 0.30 * avg_sim + 0.10 * coverage_ratio + external_boost;
    raw.clamp(0.0, 0.98)
}

/// Interleave internal representatives (first) and external documents into
/// the evidence list handed to synthesis.
fn build_evidence(
    representatives: &[SimilarTicket],
    external: &[IngestedDoc],
) -> Vec<EvidenceSource> {
    let mut evidence: Vec<EvidenceSource> = representatives
        .iter()
        .map(|t| EvidenceSource {
            display_ref: format!("INT:{}", t.ticket_key),
            title: t.summary.clone(),
            content: t.resolution.clone(),
        })
        .collect();
    evidence.extend(external.iter().enumerate().map(|(i, doc)| EvidenceSource {
        display_ref: format!("WEB:{}", i + 1),
        title: doc.title.clone(),
        content: doc.content.clone(),
    }));
    evidence
}

/// Guardrail-check and score drafted alternatives.
fn score_alternatives(
    drafts: Vec<SolutionDraft>,
    base_confidence: f64,
    internal_keys: &[String],
    external_indices: &[String],
) -> Vec<ScoredSolution> {
    drafts
        .into_iter()
        .enumerate()
        .map(|(rank, draft)| {
            let (cleaned_text, issues, is_valid) =
                validate_solution(&draft.solution_text, internal_keys, external_indices);

            let decay = RANK_DECAY[rank.min(RANK_DECAY.len() - 1)];
            let mut confidence = base_confidence * decay;
            if !is_valid {
                confidence = confidence.min(INVALID_CONFIDENCE_CAP);
            }

            ScoredSolution {
                solution_text: cleaned_text,
                confidence: (confidence * 10_000.0).round() / 10_000.0,
                llm_provider_model: draft.llm_provider_model,
                sources: draft.sources,
                reasoning: draft.reasoning,
                validation_issues: issues,
                guardrail_valid: is_valid,
            }
        })
        .collect()
}

/// Five-step generic triage used when the model chain yields nothing.
fn heuristic_fallback(base_confidence: f64) -> ScoredSolution {
    ScoredSolution {
        solution_text: "Preliminary heuristic guidance (LLM unavailable):\n\
             1. Reproduce and capture the exact error or log snippet.\n\
             2. Identify recent changes (deployments, configuration).\n\
             3. Compare working vs failing environment.\n\
             4. Collect impact scope (users, transactions).\n\
             5. Escalate with diagnostics if unresolved."
            .to_string(),
        confidence: ((base_confidence * 0.5) * 10_000.0).round() / 10_000.0,
        llm_provider_model: "local-fallback".to_string(),
        sources: vec![],
        reasoning: "Heuristic fallback due to LLM failure".to_string(),
        validation_issues: vec![],
        guardrail_valid: true,
    }
}
