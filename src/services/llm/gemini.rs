//! Google Gemini provider.
//!
//! Vision-capable: image attachments ride along as inline base64 parts.

use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use super::{ModelError, ModelProvider, ModelResult};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Gemini API client for one model in the fallback chain.
pub struct GeminiProvider {
    model: String,
    api_key: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiResponseContent,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
}

impl GeminiProvider {
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
impl ModelProvider for GeminiProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn supports_images(&self) -> bool {
        true
    }

    async fn complete(&self, prompt: &str, images: &[Vec<u8>]) -> ModelResult<String> {
        let mut parts = vec![GeminiPart::Text {
            text: prompt.to_string(),
        }];
        for image in images {
            parts.push(GeminiPart::InlineData {
                inline_data: InlineData {
                    mime_type: "image/jpeg".to_string(),
                    data: base64::engine::general_purpose::STANDARD.encode(image),
                },
            });
        }

        let body = GeminiRequest {
            contents: vec![GeminiContent { parts }],
            generation_config: Some(GenerationConfig { temperature: 0.1 }),
        };

        let url = format!(
            "{}/{}:generateContent?key={}",
            BASE_URL, self.model, self.api_key
        );
        debug!(model = %self.model, "sending Gemini request");

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.as_u16() == 429 {
            return Err(ModelError::RateLimit);
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ModelError::Authentication);
        }
        if !status.is_success() {
            error!(model = %self.model, %status, "Gemini API error");
            return Err(ModelError::Api(format!("HTTP {status}: {text}")));
        }

        let parsed: GeminiResponse = serde_json::from_str(&text)?;
        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("no candidates".to_string()))?;
        let part = candidate
            .content
            .parts
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("no parts in candidate".to_string()))?;
        Ok(part.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_reports_model_name_and_vision() {
        let provider = GeminiProvider::new("gemini-2.0-flash".into(), "test-key".into());
        assert_eq!(provider.name(), "gemini-2.0-flash");
        assert!(provider.supports_images());
    }

    #[test]
    fn request_serializes_text_and_inline_image_parts() {
        let body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![
                    GeminiPart::Text {
                        text: "hello".into(),
                    },
                    GeminiPart::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/jpeg".into(),
                            data: "aGk=".into(),
                        },
                    },
                ],
            }],
            generation_config: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(
            json["contents"][0]["parts"][1]["inline_data"]["mime_type"],
            "image/jpeg"
        );
    }
}
