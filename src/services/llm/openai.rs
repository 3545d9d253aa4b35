//! OpenAI provider.
//!
//! Text-only member of the fallback chain; JSON output is requested via
//! `response_format`.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use super::{ModelError, ModelProvider, ModelResult};

const BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const SYSTEM_PROMPT: &str =
    "You are an expert AI agent for ERP support operations. Respond only with valid JSON.";

/// OpenAI API client for one model in the fallback chain.
pub struct OpenAiProvider {
    model: String,
    api_key: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

impl OpenAiProvider {
    pub fn new(model: String, api_key: String) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            model,
            api_key,
            client,
        }
    }
}

#[async_trait::async_trait]
impl ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn supports_images(&self) -> bool {
        false
    }

    async fn complete(&self, prompt: &str, _images: &[Vec<u8>]) -> ModelResult<String> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
        };

        debug!(model = %self.model, "sending OpenAI request");
        let response = self
            .client
            .post(format!("{BASE_URL}/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status.as_u16() == 429 {
            return Err(ModelError::RateLimit);
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ModelError::Authentication);
        }
        if !status.is_success() {
            error!(model = %self.model, %status, "OpenAI API error");
            return Err(ModelError::Api(format!("HTTP {status}: {text}")));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("no choices".to_string()))?;
        Ok(choice.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_is_text_only() {
        let provider = OpenAiProvider::new("gpt-4o-mini".into(), "test-key".into());
        assert_eq!(provider.name(), "gpt-4o-mini");
        assert!(!provider.supports_images());
    }

    #[test]
    fn request_demands_json_output() {
        let body = ChatRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: "hi".into(),
            }],
            response_format: ResponseFormat {
                format_type: "json_object".into(),
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
    }
}
