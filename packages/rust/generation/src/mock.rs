//! Offline backend that fabricates captions and drafts.

use async_trait::async_trait;
use tracing::info;

use photoblog_shared::{Caption, CaptionSet, PhotoblogError, Result};

use crate::backend::{Attempt, GenerationBackend, GenerationRequest, RequestPurpose};
use crate::client::{CAPTIONS_BLOCK, DRAFT_BLOCK, STYLE_NOTE_BLOCK};

/// Backend used when `ai.mock_mode` is on. Never touches the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockBackend;

#[async_trait]
impl GenerationBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn attempt(&self, request: &GenerationRequest) -> Result<Attempt> {
        info!(purpose = request.purpose.as_str(), "mock generation");

        let text = match request.purpose {
            RequestPurpose::Captions => mock_captions(request.image_count())?,
            RequestPurpose::Draft => mock_draft(&request.prompt_text()),
            RequestPurpose::Rewrite => block_after(&request.prompt_text(), DRAFT_BLOCK)
                .map(|draft| {
                    draft
                        .split(STYLE_NOTE_BLOCK)
                        .next()
                        .unwrap_or(draft)
                        .trim()
                        .to_string()
                })
                .unwrap_or_default(),
        };

        Ok(Attempt::Completed(text))
    }
}

fn mock_captions(count: usize) -> Result<String> {
    let set = CaptionSet {
        items: (1..=count as u32)
            .map(|index| Caption {
                index,
                line1: format!("(mock) photo {index}, first line"),
                line2: format!("(mock) photo {index}, second line"),
                summary: None,
            })
            .collect(),
    };
    serde_json::to_string(&set)
        .map_err(|e| PhotoblogError::validation(format!("failed to encode mock captions: {e}")))
}

fn mock_draft(prompt: &str) -> String {
    let captions: CaptionSet = block_after(prompt, CAPTIONS_BLOCK)
        .and_then(|block| block.split("\n\n").next())
        .and_then(|json| serde_json::from_str(json.trim()).ok())
        .unwrap_or_default();

    let mut lines = vec![
        "Mock post: automated blog test".to_string(),
        String::new(),
        "Today the pipeline ran in mock mode.".to_string(),
        String::new(),
    ];
    for caption in &captions.items {
        lines.push(format!("[[IMAGE_{}]]", caption.index));
        lines.push(format!(
            "- photo {}: {} / {}",
            caption.index, caption.line1, caption.line2
        ));
        lines.push(String::new());
    }
    lines.push("Once a real model is configured this text will be replaced.".to_string());
    lines.join("\n")
}

/// Text following a `[BLOCK]` marker line, if present.
fn block_after<'a>(prompt: &'a str, marker: &str) -> Option<&'a str> {
    let start = prompt.find(marker)? + marker.len();
    Some(prompt[start..].trim_start_matches('\n'))
}
