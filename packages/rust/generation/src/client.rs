//! Multi-stage generation: captions, draft, tone rewrite.
//!
//! [`GenerationClient`] builds prompts, drives the retry loop around a
//! [`GenerationBackend`], and validates what comes back. Backends only ever
//! see one attempt at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument, warn};

use photoblog_shared::{
    AiConfig, CaptionSet, MAX_BATCH_SIZE, MediaItem, PhotoblogError, Result, RetryTrigger,
    SUPPORTED_PROVIDER, resolve_api_key,
};

use crate::backend::{Attempt, GenerationBackend, GenerationRequest, Part, RequestPurpose};
use crate::gemini::GeminiBackend;
use crate::mock::MockBackend;
use crate::prompts::{CAPTIONS_PROMPT, DRAFT_PROMPT, PromptStore, REWRITE_PROMPT};
use crate::retry::RetryPolicy;

/// Marker preceding the caption JSON in the draft prompt.
pub const CAPTIONS_BLOCK: &str = "[CAPTIONS_JSON]";
/// Marker preceding the optional context note in the draft prompt.
pub const INPUT_TEXT_BLOCK: &str = "[INPUT_TEXT]";
/// Marker preceding the draft in the rewrite prompt.
pub const DRAFT_BLOCK: &str = "[DRAFT]";
/// Marker preceding the optional style guidance in the rewrite prompt.
pub const STYLE_NOTE_BLOCK: &str = "[STYLE_NOTE]";

const PLACEHOLDER_INSTRUCTION: &str = "Write one section per entry of the images array above, \
in the same order. Put the token [[IMAGE_1]] where the first photo belongs, [[IMAGE_2]] for the \
second, and so on. Do not write image paths yourself.";

/// Sampling parameters per stage.
#[derive(Debug, Clone, Copy)]
struct Sampling {
    temperature: f32,
    max_output_tokens: u32,
}

const CAPTION_SAMPLING: Sampling = Sampling {
    temperature: 0.4,
    max_output_tokens: 900,
};
const DRAFT_SAMPLING: Sampling = Sampling {
    temperature: 0.6,
    max_output_tokens: 1400,
};
const REWRITE_SAMPLING: Sampling = Sampling {
    temperature: 0.7,
    max_output_tokens: 1600,
};

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct GenerationClient {
    backend: Arc<dyn GenerationBackend>,
    prompts: PromptStore,
    policy: RetryPolicy,
    vision_model: String,
    text_model: String,
}

impl GenerationClient {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        prompts: PromptStore,
        vision_model: impl Into<String>,
        text_model: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            prompts,
            policy: RetryPolicy::default(),
            vision_model: vision_model.into(),
            text_model: text_model.into(),
        }
    }

    /// Replace the default backoff policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build a client from the `[ai]` config section, reading templates from
    /// `prompts_dir` (see `AppConfig::prompts_dir`).
    ///
    /// In mock mode no credential is needed. Otherwise a missing API key is a
    /// config error, raised before any request is made.
    pub fn from_config(ai: &AiConfig, prompts_dir: impl Into<PathBuf>) -> Result<Self> {
        let backend: Arc<dyn GenerationBackend> = if ai.mock_mode {
            Arc::new(MockBackend)
        } else {
            if !ai.provider.eq_ignore_ascii_case(SUPPORTED_PROVIDER) {
                return Err(PhotoblogError::config(format!(
                    "real mode supports only provider '{SUPPORTED_PROVIDER}' (got {})",
                    ai.provider
                )));
            }
            let api_key = resolve_api_key(ai)?;
            Arc::new(GeminiBackend::new(&ai.base_url, api_key, ai.timeout_secs)?)
        };

        Ok(Self::new(
            backend,
            PromptStore::new(prompts_dir),
            &ai.vision_model,
            &ai.text_model,
        ))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    /// Caption up to [`MAX_BATCH_SIZE`] fetched images in one multimodal call.
    ///
    /// Extra items are ignored. The returned set has exactly one caption per
    /// image used, ordered by index.
    #[instrument(skip_all, fields(batch = batch.len()))]
    pub async fn generate_captions(&self, batch: &[MediaItem]) -> Result<CaptionSet> {
        if batch.is_empty() {
            return Err(PhotoblogError::validation("generate_captions: batch is empty"));
        }
        let batch = &batch[..batch.len().min(MAX_BATCH_SIZE)];

        let mut parts = vec![Part::Text(self.prompts.load(CAPTIONS_PROMPT).await?)];
        for item in batch {
            let path = item.require_local_path()?;
            let data = tokio::fs::read(path)
                .await
                .map_err(|e| PhotoblogError::io(path, e))?;
            parts.push(Part::Image {
                mime_type: mime_for(path).to_string(),
                data,
            });
        }

        let request = self.request(RequestPurpose::Captions, parts, CAPTION_SAMPLING);
        let raw = self.generate(&request).await?;
        let captions = parse_captions(&raw, batch.len())?;

        info!(captions = captions.len(), "captions generated");
        Ok(captions)
    }

    /// Draft a post from captions and an optional free-text note.
    #[instrument(skip_all, fields(captions = captions.len(), has_note = context_note.is_some()))]
    pub async fn generate_draft(
        &self,
        captions: &CaptionSet,
        context_note: Option<&str>,
    ) -> Result<String> {
        let template = self.prompts.load(DRAFT_PROMPT).await?;
        let captions_json = serde_json::to_string_pretty(captions)
            .map_err(|e| PhotoblogError::validation(format!("failed to encode captions: {e}")))?;

        let mut sections = vec![template.trim_end().to_string()];
        sections.push(format!("{CAPTIONS_BLOCK}\n{captions_json}"));
        if let Some(note) = context_note.map(str::trim).filter(|n| !n.is_empty()) {
            sections.push(format!("{INPUT_TEXT_BLOCK}\n{note}"));
        }
        sections.push(PLACEHOLDER_INSTRUCTION.to_string());

        let request = self.request(
            RequestPurpose::Draft,
            vec![Part::Text(sections.join("\n\n"))],
            DRAFT_SAMPLING,
        );
        let draft = self.generate(&request).await?.trim().to_string();

        info!(chars = draft.len(), "draft generated");
        Ok(draft)
    }

    /// Second pass that adjusts tone while keeping structure and placeholders.
    #[instrument(skip_all, fields(has_style_note = style_note.is_some()))]
    pub async fn rewrite_tone(&self, draft: &str, style_note: Option<&str>) -> Result<String> {
        let template = self.prompts.load(REWRITE_PROMPT).await?;

        let mut sections = vec![template.trim_end().to_string()];
        sections.push(format!("{DRAFT_BLOCK}\n{}", draft.trim()));
        if let Some(note) = style_note.map(str::trim).filter(|n| !n.is_empty()) {
            sections.push(format!("{STYLE_NOTE_BLOCK}\n{note}"));
        }

        let request = self.request(
            RequestPurpose::Rewrite,
            vec![Part::Text(sections.join("\n\n"))],
            REWRITE_SAMPLING,
        );
        let rewritten = self.generate(&request).await?.trim().to_string();

        info!(chars = rewritten.len(), "draft rewritten");
        Ok(rewritten)
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    fn request(
        &self,
        purpose: RequestPurpose,
        parts: Vec<Part>,
        sampling: Sampling,
    ) -> GenerationRequest {
        let model = match purpose {
            RequestPurpose::Captions => &self.vision_model,
            RequestPurpose::Draft | RequestPurpose::Rewrite => &self.text_model,
        };
        GenerationRequest {
            purpose,
            model: model.clone(),
            parts,
            temperature: sampling.temperature,
            max_output_tokens: sampling.max_output_tokens,
        }
    }

    /// Run attempts until one completes, backing off on rate limits and
    /// truncation. Errors from the backend end the call immediately.
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_trigger = None;

        for attempt in 0..max_attempts {
            let trigger = match self.backend.attempt(request).await? {
                Attempt::Completed(text) => return Ok(text),
                Attempt::RateLimited => RetryTrigger::RateLimited,
                Attempt::Truncated => RetryTrigger::Truncated,
            };
            last_trigger = Some(trigger);

            if attempt + 1 < max_attempts {
                let delay = self.policy.delay_for(trigger, attempt);
                warn!(
                    purpose = request.purpose.as_str(),
                    attempt = attempt + 1,
                    %trigger,
                    delay_ms = delay.as_millis() as u64,
                    "retrying generation"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(PhotoblogError::RetriesExhausted {
            attempts: max_attempts,
            trigger: last_trigger.unwrap_or(RetryTrigger::RateLimited),
        })
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Media type sent for an image file.
pub fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "image/png",
    }
}

/// Remove markdown code-fence decoration around a model answer.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        text = rest.trim_start();
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest.trim_end();
    }
    text
}

/// Parse and validate the caption JSON contract.
///
/// Tolerates fences and prose around the object. Captions are reordered by
/// index before validation.
pub fn parse_captions(raw: &str, expected: usize) -> Result<CaptionSet> {
    let cleaned = strip_code_fences(raw);

    let mut set: CaptionSet = match serde_json::from_str(cleaned) {
        Ok(set) => set,
        Err(first_err) => outer_object(cleaned)
            .and_then(|obj| serde_json::from_str(obj).ok())
            .ok_or_else(|| {
                PhotoblogError::malformed(
                    format!("captions JSON parse failed: {first_err}"),
                    cleaned,
                )
            })?,
    };

    set.items.sort_by_key(|c| c.index);
    set.validate(expected)
        .map_err(|e| PhotoblogError::malformed(format!("invalid captions: {e}"), cleaned))?;

    Ok(set)
}

fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
