//! Validation pipeline activities.
//!
//! Per ticket: fetch and bundle context (text, OCR'd attachments, raw
//! images), obtain a model verdict enriched with priority, vagueness, and
//! duplicate detection, persist the verdict, then run the status-dependent
//! side-effect against the ticket platform.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context;
use assistiq_retrieval::{RetrievalService, DUPLICATE_THRESHOLD};
use tracing::{info, warn};

use crate::services::compliance;
use crate::services::constants::AGENT_SIGNATURE;
use crate::services::context_hints;
use crate::services::db_service::DbService;
use crate::services::jira_client::JiraClient;
use crate::services::llm::ModelService;
use crate::services::ocr::TextExtractor;
use crate::services::priority::classify_priority;

use super::shared::{LlmVerdict, TicketContext, ValidationStatus};

/// Unique alphabetic words below which a ticket counts as vague.
const VAGUE_WORD_FLOOR: usize = 12;

/// Activity implementations for `ValidateTicket`.
pub struct ValidationActivities {
    jira: Arc<JiraClient>,
    ocr: Arc<dyn TextExtractor>,
    db: Arc<DbService>,
    llm: Arc<ModelService>,
    retrieval: Arc<RetrievalService>,
}

impl ValidationActivities {
    pub fn new(
        jira: Arc<JiraClient>,
        ocr: Arc<dyn TextExtractor>,
        db: Arc<DbService>,
        llm: Arc<ModelService>,
        retrieval: Arc<RetrievalService>,
    ) -> Self {
        Self {
            jira,
            ocr,
            db,
            llm,
            retrieval,
        }
    }

    /// Pull the ticket and bundle everything the model needs. Images pass
    /// through verbatim; other attachments are run through the text
    /// extractor and appended under a delimiter header.
    pub async fn fetch_context(&self, ticket_key: &str) -> anyhow::Result<TicketContext> {
        info!(ticket_key, "fetching ticket context");
        let details = self
            .jira
            .get_ticket_details(ticket_key)
            .await
            .context("fetching ticket details")?;

        let mut text_parts = vec![
            format!("Ticket Key: {ticket_key}"),
            format!("Summary: {}", details.summary),
            format!(
                "Description: {}",
                details.description.clone().unwrap_or_default()
            ),
        ];

        let (images, others) = details.partition_attachments();

        let mut image_attachments = Vec::with_capacity(images.len());
        for attachment in images {
            info!(filename = %attachment.filename, "downloading image attachment");
            let bytes = self
                .jira
                .download_attachment(&attachment.url)
                .await
                .context("downloading image attachment")?;
            image_attachments.push(bytes);
        }

        for attachment in others {
            info!(filename = %attachment.filename, "extracting text from attachment");
            let bytes = self
                .jira
                .download_attachment(&attachment.url)
                .await
                .context("downloading attachment")?;
            let extracted = self.ocr.extract_text(&bytes, &attachment.mime_type).await;
            text_parts.push(format!(
                "\n--- Attachment: {} ---\n{}",
                attachment.filename, extracted
            ));
        }

        Ok(TicketContext {
            bundled_text: text_parts.join("\n"),
            reporter_id: details.reporter_id,
            image_attachments,
        })
    }

    /// Produce the enriched verdict for a bundled ticket context.
    pub async fn verdict(&self, context: &TicketContext) -> anyhow::Result<LlmVerdict> {
        let knowledge = self
            .db
            .get_knowledge_base()
            .await
            .context("loading knowledge base")?;

        let (scrubbed_text, redactions) = compliance::scrub(&context.bundled_text);
        if redactions > 0 {
            info!(redactions, "compliance scrub applied");
        }

        let raw = self
            .llm
            .get_validation_verdict(&scrubbed_text, &knowledge, &context.image_attachments)
            .await;

        // Priority and vagueness run over the raw text, not the scrub.
        let (priority, priority_reason) = classify_priority(None, Some(&context.bundled_text));
        info!(priority = %priority, "{}", priority_reason);

        let vague = is_vague(&context.bundled_text);
        let hints = context_hints::derive_hints(&context.bundled_text);

        let mut verdict = LlmVerdict {
            module: if raw.module.is_empty() {
                // Fall back to the keyword guess when the model gave nothing.
                hints.module_hint.clone()
            } else {
                raw.module
            },
            validation_status: ValidationStatus::parse(&raw.validation_status),
            missing_fields: raw.missing_fields,
            confidence: raw.confidence.clamp(0.0, 1.0),
            llm_provider_model: raw.llm_provider_model,
            priority: Some(priority),
            is_vague: vague,
            vagueness_reason: vague.then(|| "Low information density".to_string()),
            duplicate_of: None,
            context_entities: hints.entities,
        };

        // Duplicate detection is best-effort; a retrieval failure never
        // fails the verdict.
        match self
            .retrieval
            .find_potential_duplicate(&context.bundled_text, DUPLICATE_THRESHOLD)
            .await
        {
            Ok(Some(duplicate)) => {
                info!(
                    duplicate_of = %duplicate.ticket_key,
                    distance = duplicate.distance,
                    "potential duplicate detected"
                );
                verdict.duplicate_of = Some(duplicate.ticket_key);
            }
            Ok(None) => {}
            Err(e) => warn!("duplicate detection failed: {}", e),
        }

        Ok(verdict)
    }

    /// Persist the verdict (upsert by ticket key plus timeline event).
    pub async fn log_validation(
        &self,
        ticket_key: &str,
        verdict: &LlmVerdict,
    ) -> anyhow::Result<()> {
        self.db
            .upsert_validation(ticket_key, verdict)
            .await
            .context("logging validation verdict")?;
        info!(
            ticket_key,
            model = %verdict.llm_provider_model,
            "validation verdict logged"
        );
        Ok(())
    }

    /// Incomplete side-effect: comment with the missing fields and try to
    /// hand the ticket back to its reporter. Reassignment failure degrades
    /// to comment-only.
    pub async fn comment_and_reassign(
        &self,
        ticket_key: &str,
        verdict: &LlmVerdict,
        reporter_id: Option<&str>,
    ) -> anyhow::Result<String> {
        let message = incomplete_message(verdict);

        let Some(reporter) = reporter_id else {
            warn!(ticket_key, "no reporter found, adding comment only");
            self.jira.add_comment(ticket_key, &message).await?;
            return Ok(format!(
                "Ticket {ticket_key} commented on successfully (no reassignment)."
            ));
        };

        match self
            .jira
            .comment_and_reassign(ticket_key, &message, reporter)
            .await
        {
            Ok(()) => Ok(format!(
                "Ticket {ticket_key} commented on and reassigned to reporter."
            )),
            Err(e) => {
                warn!(
                    ticket_key,
                    "reassignment failed, falling back to comment-only: {}", e
                );
                self.jira.add_comment(ticket_key, &message).await?;
                Ok(format!(
                    "Ticket {ticket_key} commented on, but reassignment failed."
                ))
            }
        }
    }

    /// Complete side-effect: tell the reporter the ticket entered the
    /// resolution queue.
    pub async fn notify_in_queue(&self, ticket_key: &str) -> anyhow::Result<String> {
        let message = format!(
            "Hello,\n\nYour ticket has passed automated validation and entered the \
             resolution queue. You will be notified when a proposed solution is \
             posted.{AGENT_SIGNATURE}"
        );
        self.jira.add_comment(ticket_key, &message).await?;
        Ok(format!("Ticket {ticket_key} notified of queue entry."))
    }
}

/// User-visible message enumerating the missing fields, plus whatever the
/// heuristics already picked up so the reporter does not re-supply it.
fn incomplete_message(verdict: &LlmVerdict) -> String {
    let missing = if verdict.missing_fields.is_empty() {
        "None".to_string()
    } else {
        verdict.missing_fields.join(", ")
    };
    let detected = if verdict.context_entities.is_empty() {
        String::new()
    } else {
        let pairs: Vec<String> = verdict
            .context_entities
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect();
        format!("\nAlready detected: {}.\n", pairs.join("; "))
    };
    format!(
        "Hello,\n\nThis ticket (module: {}) is incomplete. Please add the missing \
         field(s):\n- {}\n{detected}\nOnce updated, the validation agent will re-check it \
         automatically.{}",
        verdict.module, missing, AGENT_SIGNATURE
    )
}

/// Vagueness heuristic: very few distinct alphabetic words, or a narrow
/// error-only sentence.
pub fn is_vague(text: &str) -> bool {
    let words: BTreeSet<String> = text
        .split_whitespace()
        .filter(|w| w.chars().all(|c| c.is_alphabetic()))
        .map(|w| w.to_lowercase())
        .collect();
    words.len() < VAGUE_WORD_FLOOR || (words.contains("error") && words.len() < 5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::priority::Priority;

    fn verdict_with_missing(fields: &[&str]) -> LlmVerdict {
        LlmVerdict {
            module: "AP.Invoice".into(),
            validation_status: ValidationStatus::Incomplete,
            missing_fields: fields.iter().map(|f| f.to_string()).collect(),
            confidence: 0.9,
            llm_provider_model: "gemini-2.0-flash".into(),
            priority: Some(Priority::P3),
            is_vague: false,
            vagueness_reason: None,
            duplicate_of: None,
            context_entities: Default::default(),
        }
    }

    #[test]
    fn incomplete_message_lists_missing_fields() {
        let message = incomplete_message(&verdict_with_missing(&[
            "Invoice ID",
            "Invoice Date",
            "Amount",
        ]));
        assert!(message.contains("module: AP.Invoice"));
        assert!(message.contains("Invoice ID, Invoice Date, Amount"));
        assert!(message.ends_with(AGENT_SIGNATURE));
    }

    #[test]
    fn incomplete_message_handles_empty_list() {
        let message = incomplete_message(&verdict_with_missing(&[]));
        assert!(message.contains("- None"));
        assert!(!message.contains("Already detected"));
    }

    #[test]
    fn incomplete_message_lists_detected_entities() {
        let mut verdict = verdict_with_missing(&["Invoice Date"]);
        verdict
            .context_entities
            .insert("Invoice ID".into(), "INV-2024-001".into());
        let message = incomplete_message(&verdict);
        assert!(message.contains("Already detected: Invoice ID: INV-2024-001."));
    }

    #[test]
    fn terse_tickets_are_vague() {
        assert!(is_vague("Error."));
        assert!(is_vague("it is broken please fix"));
    }

    #[test]
    fn informative_tickets_are_not_vague() {
        let text = "Invoice posting fails with a timeout after the nightly batch; \
                    vendor records show duplicates and the ledger export never \
                    completes for the Frankfurt company code";
        assert!(!is_vague(text));
    }

    #[test]
    fn repeated_words_do_not_count_twice() {
        // Nine distinct words repeated many times still reads as vague.
        let text = "help help help broken broken system system now now please again error ok";
        assert!(is_vague(text));
    }
}
