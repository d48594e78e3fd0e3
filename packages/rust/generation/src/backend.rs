//! The seam between [`GenerationClient`](crate::GenerationClient) and a model provider.

use async_trait::async_trait;

use photoblog_shared::Result;

/// Which stage of the pipeline a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPurpose {
    Captions,
    Draft,
    Rewrite,
}

impl RequestPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Captions => "captions",
            Self::Draft => "draft",
            Self::Rewrite => "rewrite",
        }
    }
}

/// One segment of a multimodal prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    /// Raw image bytes; backends encode them as their wire format requires.
    Image { mime_type: String, data: Vec<u8> },
}

/// A single generation request, independent of provider wire format.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub purpose: RequestPurpose,
    pub model: String,
    pub parts: Vec<Part>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl GenerationRequest {
    /// Concatenated text segments, in order.
    pub fn prompt_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                Part::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, Part::Image { .. }))
            .count()
    }
}

/// Outcome of one attempt that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// The model returned usable text.
    Completed(String),
    /// The provider answered HTTP 429.
    RateLimited,
    /// The model hit its token limit without producing any text.
    Truncated,
}

/// A model provider.
///
/// Implementations perform exactly one attempt per call and classify it.
/// Any other failure (transport, non-2xx, unexpected shape) is returned as an
/// error and is never retried by the client.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    async fn attempt(&self, request: &GenerationRequest) -> Result<Attempt>;
}
