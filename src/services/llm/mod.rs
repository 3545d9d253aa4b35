//! Model service: a provider fallback chain for ticket validation and
//! multi-alternative solution synthesis.
//!
//! Providers are opaque model identifiers from configuration; the only
//! capability the service distinguishes is `supports_images` for the
//! vision-assisted validation call. Each provider gets bounded retries
//! with exponential backoff; authentication failures skip straight to the
//! next provider; a fully exhausted chain yields a sentinel error verdict
//! rather than a pipeline failure.

pub mod gemini;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Settings;
use crate::services::db_service::KnowledgeBase;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// Backoff base for rate-limited retries.
const BACKOFF_BASE: Duration = Duration::from_secs(2);
/// Attempts per provider before advancing along the chain.
const MAX_ATTEMPTS_PER_PROVIDER: u32 = 3;

/// Errors from model providers.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("provider error: {0}")]
    Api(String),

    #[error("authentication error: missing or invalid API key")]
    Authentication,

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("invalid response format: {0}")]
    InvalidResponse(String),
}

pub type ModelResult<T> = Result<T, ModelError>;

/// One model behind an HTTP API.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Model identifier as configured in the fallback chain.
    fn name(&self) -> &str;

    /// Whether raw image bytes can ride along with the prompt.
    fn supports_images(&self) -> bool;

    /// Run one completion. The response is expected to be a JSON object;
    /// parsing happens in the service so retry policy stays uniform.
    async fn complete(&self, prompt: &str, images: &[Vec<u8>]) -> ModelResult<String>;
}

/// Raw verdict as produced by a provider, before pipeline enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawVerdict {
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub validation_status: String,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub llm_provider_model: String,
}

impl RawVerdict {
    /// Sentinel returned when the whole chain is exhausted.
    pub fn all_failed() -> Self {
        Self {
            module: "Unknown".to_string(),
            validation_status: "error".to_string(),
            missing_fields: vec![],
            confidence: 0.0,
            llm_provider_model: "all_failed".to_string(),
        }
    }
}

/// One evidence item offered to synthesis, internal or external.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceSource {
    /// Citation token body: `INT:<ticket_key>` or `WEB:<n>`.
    pub display_ref: String,
    pub title: String,
    pub content: String,
}

/// One synthesized solution alternative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionDraft {
    pub solution_text: String,
    /// Filled by the resolution pipeline's evidence-based scorer.
    pub confidence: f64,
    pub llm_provider_model: String,
    pub sources: Vec<String>,
    pub reasoning: String,
}

/// The approach each alternative takes over the same evidence.
const APPROACH_DIRECTIVES: &[&str] = &[
    "Produce a concrete step-by-step remediation plan the reporter can follow.",
    "Identify the most likely root cause and the fix addressing it directly.",
    "Focus on prevention and optimization so the issue does not recur.",
];

/// Provider fallback chain.
pub struct ModelService {
    providers: Vec<Arc<dyn ModelProvider>>,
}

impl ModelService {
    pub fn new(providers: Vec<Arc<dyn ModelProvider>>) -> Self {
        Self { providers }
    }

    /// Resolve the configured chain to concrete providers. Identifiers
    /// without a usable credential are skipped with a warning.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut providers: Vec<Arc<dyn ModelProvider>> = Vec::new();
        for model in &settings.llm_fallback_chain {
            if model.starts_with("gemini") || model.starts_with("gemma") {
                match &settings.gemini_api_key {
                    Some(key) => providers
                        .push(Arc::new(GeminiProvider::new(model.clone(), key.clone()))),
                    None => warn!(%model, "skipping provider: GEMINI_API_KEY not set"),
                }
            } else if model.starts_with("gpt") {
                match &settings.openai_api_key {
                    Some(key) => providers
                        .push(Arc::new(OpenAiProvider::new(model.clone(), key.clone()))),
                    None => warn!(%model, "skipping provider: OPENAI_API_KEY not set"),
                }
            } else {
                warn!(%model, "unsupported model identifier in fallback chain");
            }
        }
        info!("Model fallback chain resolved to {} provider(s)", providers.len());
        Self::new(providers)
    }

    /// True when no provider is usable (retrieval-only mode).
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Validate a ticket text bundle against the knowledge base.
    ///
    /// Tries each provider in chain order. Per provider: malformed JSON is
    /// retried once, rate limits back off and retry, auth errors skip to
    /// the next provider, anything else retries once then advances.
    pub async fn get_validation_verdict(
        &self,
        ticket_text_bundle: &str,
        knowledge: &KnowledgeBase,
        images: &[Vec<u8>],
    ) -> RawVerdict {
        let prompt = build_validation_prompt(ticket_text_bundle, knowledge);

        for provider in &self.providers {
            if !images.is_empty() && !provider.supports_images() {
                warn!(
                    model = provider.name(),
                    "provider lacks multimodal input, sending text only"
                );
            }
            match self
                .call_provider_json(provider.as_ref(), &prompt, images)
                .await
            {
                Some(value) => {
                    let mut verdict: RawVerdict = match serde_json::from_value(value) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(model = provider.name(), "verdict shape mismatch: {}", e);
                            continue;
                        }
                    };
                    verdict.llm_provider_model = provider.name().to_string();
                    info!(model = provider.name(), "validation verdict obtained");
                    return verdict;
                }
                None => continue,
            }
        }

        warn!("all model providers in the fallback chain failed");
        RawVerdict::all_failed()
    }

    /// Generate `n` solution alternatives over the same evidence set, one
    /// per approach directive.
    pub async fn generate_solution_alternatives(
        &self,
        ticket_context: &str,
        sources: &[EvidenceSource],
        num_alternatives: usize,
    ) -> Vec<SolutionDraft> {
        let mut drafts = Vec::with_capacity(num_alternatives);
        let refs: Vec<String> = sources.iter().map(|s| s.display_ref.clone()).collect();

        for i in 0..num_alternatives {
            let directive = APPROACH_DIRECTIVES[i.min(APPROACH_DIRECTIVES.len() - 1)];
            let prompt = build_synthesis_prompt(ticket_context, sources, directive);

            let mut draft = SolutionDraft {
                solution_text: String::new(),
                confidence: 0.0,
                llm_provider_model: "none".to_string(),
                sources: refs.clone(),
                reasoning: String::new(),
            };

            for provider in &self.providers {
                if let Some(value) = self
                    .call_provider_json(provider.as_ref(), &prompt, &[])
                    .await
                {
                    draft.solution_text = value
                        .get("solution_text")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    draft.reasoning = value
                        .get("reasoning")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    draft.llm_provider_model = provider.name().to_string();
                    break;
                }
            }
            drafts.push(draft);
        }
        drafts
    }

    /// Call one provider until it yields parseable JSON or its budget is
    /// spent. `None` means "advance along the chain".
    async fn call_provider_json(
        &self,
        provider: &dyn ModelProvider,
        prompt: &str,
        images: &[Vec<u8>],
    ) -> Option<serde_json::Value> {
        let mut json_retry_used = false;
        let mut attempt = 0u32;

        while attempt < MAX_ATTEMPTS_PER_PROVIDER {
            attempt += 1;
            match provider.complete(prompt, images).await {
                Ok(raw) => match parse_json_response(&raw) {
                    Ok(value) => return Some(value),
                    Err(e) => {
                        warn!(
                            model = provider.name(),
                            attempt, "malformed JSON from provider: {}", e
                        );
                        if json_retry_used {
                            return None;
                        }
                        json_retry_used = true;
                    }
                },
                Err(ModelError::Authentication) => {
                    warn!(model = provider.name(), "authentication failed, skipping provider");
                    return None;
                }
                Err(ModelError::RateLimit) => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        model = provider.name(),
                        attempt,
                        "rate limited, backing off {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(model = provider.name(), attempt, "provider call failed: {}", e);
                    if attempt >= 2 {
                        return None;
                    }
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
            }
        }
        None
    }
}

/// `base × 2^attempt` plus up to a second of jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.0..1.0);
    BACKOFF_BASE * 2u32.saturating_pow(attempt) + Duration::from_secs_f64(jitter)
}

/// Deterministic validation prompt embedding the knowledge base.
fn build_validation_prompt(ticket_text_bundle: &str, knowledge: &KnowledgeBase) -> String {
    let knowledge_json =
        serde_json::to_string_pretty(knowledge).unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"**System Preamble**
You are an expert AI agent for ERP support operations. Analyze a support ticket's text and any attached images to determine whether it contains all mandatory information for a business process.

**Instructions**
1. Analyze the 'Ticket Text Bundle' and critically examine any images provided.
2. Determine which ERP module the ticket relates to from the 'Module Knowledge Base'.
3. Check whether all 'mandatory_fields' for that module are present in the combined content.
4. Provide a numeric confidence score (0.0 to 1.0) for your validation.
5. Respond with a single clean JSON object. Do not add any text outside the JSON.

**JSON Output Format**
{{
  "module": "The module you identified (e.g., AP.Invoice)",
  "validation_status": "Either 'complete' or 'incomplete'",
  "missing_fields": ["Missing mandatory fields. Empty if complete."],
  "confidence": 1.0
}}

---
**Module Knowledge Base**
```json
{knowledge_json}
```
---
**Ticket Text Bundle**
```text
{ticket_text_bundle}
```
---
**Your Verdict (JSON only)**
"#
    )
}

/// Synthesis prompt: evidence block with citation tokens plus an approach
/// directive.
fn build_synthesis_prompt(
    ticket_context: &str,
    sources: &[EvidenceSource],
    directive: &str,
) -> String {
    let mut evidence = String::new();
    for source in sources {
        evidence.push_str(&format!(
            "[{}] {}\n{}\n\n",
            source.display_ref, source.title, source.content
        ));
    }

    format!(
        r#"You are an expert ERP support engineer drafting a resolution for the ticket below, grounded ONLY in the evidence provided.

Approach for this draft: {directive}

Cite evidence inline using its bracket token, e.g. [INT:ERP-12] or [WEB:1]. Every substantive paragraph needs at least one citation. Never invent citations.

Respond with a single JSON object:
{{
  "solution_text": "The drafted resolution with inline citations",
  "reasoning": "Why this resolution fits the evidence"
}}

---
**Ticket**
{ticket_context}

---
**Evidence**
{evidence}
---
**Your Draft (JSON only)**
"#
    )
}

/// Strip code fences and extract the outermost JSON object.
pub fn parse_json_response(raw: &str) -> ModelResult<serde_json::Value> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => {
            Ok(serde_json::from_str(&cleaned[start..=end])?)
        }
        _ => Err(ModelError::InvalidResponse(
            "no JSON object in response".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::db_service::ModuleKnowledge;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedProvider {
        name: String,
        supports_images: bool,
        responses: Vec<ModelResult<String>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(name: &str, responses: Vec<ModelResult<String>>) -> Self {
            Self {
                name: name.to_string(),
                supports_images: true,
                responses,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn supports_images(&self) -> bool {
            self.supports_images
        }

        async fn complete(&self, _prompt: &str, _images: &[Vec<u8>]) -> ModelResult<String> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.responses.get(idx.min(self.responses.len() - 1)) {
                Some(Ok(s)) => Ok(s.clone()),
                Some(Err(ModelError::Authentication)) => Err(ModelError::Authentication),
                Some(Err(ModelError::RateLimit)) => Err(ModelError::RateLimit),
                Some(Err(e)) => Err(ModelError::Api(e.to_string())),
                None => Err(ModelError::Api("no scripted response".into())),
            }
        }
    }

    fn sample_kb() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new();
        kb.insert(
            "AP.Invoice".to_string(),
            ModuleKnowledge {
                description: "AP.Invoice process".to_string(),
                mandatory_fields: vec![
                    "Invoice ID".to_string(),
                    "Invoice Date".to_string(),
                    "Amount".to_string(),
                ],
            },
        );
        kb
    }

    const GOOD_VERDICT: &str = r#"{"module":"AP.Invoice","validation_status":"incomplete","missing_fields":["Amount"],"confidence":0.9}"#;

    #[tokio::test]
    async fn first_provider_success_wins() {
        let service = ModelService::new(vec![Arc::new(ScriptedProvider::new(
            "model-a",
            vec![Ok(GOOD_VERDICT.to_string())],
        ))]);
        let verdict = service
            .get_validation_verdict("ticket text", &sample_kb(), &[])
            .await;
        assert_eq!(verdict.module, "AP.Invoice");
        assert_eq!(verdict.llm_provider_model, "model-a");
        assert_eq!(verdict.missing_fields, vec!["Amount"]);
    }

    #[tokio::test]
    async fn malformed_json_is_retried_once_then_falls_over() {
        let bad = Arc::new(ScriptedProvider::new(
            "bad",
            vec![Ok("not json".into()), Ok("still not json".into())],
        ));
        let good = Arc::new(ScriptedProvider::new(
            "good",
            vec![Ok(GOOD_VERDICT.to_string())],
        ));
        let service = ModelService::new(vec![bad.clone(), good]);
        let verdict = service
            .get_validation_verdict("ticket text", &sample_kb(), &[])
            .await;
        assert_eq!(bad.calls.load(Ordering::SeqCst), 2);
        assert_eq!(verdict.llm_provider_model, "good");
    }

    #[tokio::test]
    async fn auth_error_skips_provider_immediately() {
        let locked = Arc::new(ScriptedProvider::new(
            "locked",
            vec![Err(ModelError::Authentication)],
        ));
        let good = Arc::new(ScriptedProvider::new(
            "good",
            vec![Ok(GOOD_VERDICT.to_string())],
        ));
        let service = ModelService::new(vec![locked.clone(), good]);
        let verdict = service
            .get_validation_verdict("ticket text", &sample_kb(), &[])
            .await;
        assert_eq!(locked.calls.load(Ordering::SeqCst), 1);
        assert_eq!(verdict.llm_provider_model, "good");
    }

    #[tokio::test]
    async fn exhausted_chain_yields_sentinel() {
        let service = ModelService::new(vec![Arc::new(ScriptedProvider::new(
            "down",
            vec![Err(ModelError::Authentication)],
        ))]);
        let verdict = service
            .get_validation_verdict("ticket text", &sample_kb(), &[])
            .await;
        assert_eq!(verdict.module, "Unknown");
        assert_eq!(verdict.validation_status, "error");
        assert_eq!(verdict.llm_provider_model, "all_failed");
    }

    #[tokio::test]
    async fn synthesis_produces_one_draft_per_directive() {
        let provider = Arc::new(ScriptedProvider::new(
            "writer",
            vec![Ok(
                r#"{"solution_text":"Do the thing [INT:K1]","reasoning":"matched"}"#.to_string(),
            )],
        ));
        let service = ModelService::new(vec![provider]);
        let sources = vec![EvidenceSource {
            display_ref: "INT:K1".into(),
            title: "Past fix".into(),
            content: "Re-run the job".into(),
        }];
        let drafts = service
            .generate_solution_alternatives("context", &sources, 3)
            .await;
        assert_eq!(drafts.len(), 3);
        for draft in &drafts {
            assert_eq!(draft.llm_provider_model, "writer");
            assert_eq!(draft.sources, vec!["INT:K1"]);
            assert_eq!(draft.confidence, 0.0);
        }
    }

    #[test]
    fn parse_strips_code_fences() {
        let value = parse_json_response("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn parse_extracts_embedded_object() {
        let value = parse_json_response("Sure! {\"a\": 2} hope that helps").unwrap();
        assert_eq!(value["a"], 2);
    }

    #[test]
    fn parse_rejects_json_free_text() {
        assert!(parse_json_response("no braces here").is_err());
    }

    #[test]
    fn validation_prompt_embeds_knowledge_and_text() {
        let prompt = build_validation_prompt("Summary: pay invoice", &sample_kb());
        assert!(prompt.contains("AP.Invoice"));
        assert!(prompt.contains("Invoice Date"));
        assert!(prompt.contains("Summary: pay invoice"));
    }

    #[test]
    fn synthesis_prompt_carries_citation_tokens() {
        let sources = vec![EvidenceSource {
            display_ref: "WEB:1".into(),
            title: "Vendor note".into(),
            content: "Patch available".into(),
        }];
        let prompt = build_synthesis_prompt("ctx", &sources, APPROACH_DIRECTIVES[0]);
        assert!(prompt.contains("[WEB:1]"));
        assert!(prompt.contains("step-by-step"));
    }
}
