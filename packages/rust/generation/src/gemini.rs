//! Gemini `generateContent` REST backend.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use photoblog_shared::{PhotoblogError, Result};

use crate::backend::{Attempt, GenerationBackend, GenerationRequest, Part};

/// User-Agent string for provider requests.
const USER_AGENT: &str = concat!("Photoblog/", env!("CARGO_PKG_VERSION"));

/// Finish reason reported when the output token budget ran out.
const FINISH_MAX_TOKENS: &str = "MAX_TOKENS";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WirePart {
    Text(TextPart),
    InlineData(InlineDataPart),
}

#[derive(Debug, Serialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineDataPart {
    inline_data: InlineData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String, // base64-encoded
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl From<&Part> for WirePart {
    fn from(part: &Part) -> Self {
        match part {
            Part::Text(text) => WirePart::Text(TextPart { text: text.clone() }),
            Part::Image { mime_type, data } => WirePart::InlineData(InlineDataPart {
                inline_data: InlineData {
                    mime_type: mime_type.clone(),
                    data: BASE64.encode(data),
                },
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Talks to `{base_url}/v1beta/models/{model}:generateContent`.
pub struct GeminiBackend {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiBackend {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PhotoblogError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{model}:generateContent", self.base_url)
    }
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    #[instrument(skip_all, fields(purpose = request.purpose.as_str(), model = %request.model))]
    async fn attempt(&self, request: &GenerationRequest) -> Result<Attempt> {
        let payload = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: request.parts.iter().map(WirePart::from).collect(),
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(self.endpoint(&request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PhotoblogError::Network(format!("gemini request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PhotoblogError::Network(format!("failed to read gemini response: {e}")))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("rate limited by provider");
            return Ok(Attempt::RateLimited);
        }
        if !status.is_success() {
            return Err(PhotoblogError::provider(status.as_u16(), &body));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
            PhotoblogError::malformed(format!("unexpected response shape: {e}"), &body)
        })?;

        classify(parsed, &body)
    }
}

/// Turn a parsed response into an attempt outcome.
///
/// Text comes from the first candidate that carries any, with all of its text
/// parts joined in order.
fn classify(response: GenerateContentResponse, raw: &str) -> Result<Attempt> {
    let text = response.candidates.iter().find_map(|candidate| {
        let joined: String = candidate
            .content
            .as_ref()?
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!joined.trim().is_empty()).then_some(joined)
    });

    if let Some(text) = text {
        debug!(chars = text.len(), "received completion");
        return Ok(Attempt::Completed(text));
    }

    let truncated = response
        .candidates
        .iter()
        .any(|c| c.finish_reason.as_deref() == Some(FINISH_MAX_TOKENS));
    if truncated {
        warn!("response truncated before any text was produced");
        return Ok(Attempt::Truncated);
    }

    Err(PhotoblogError::malformed("response contained no text", raw))
}
