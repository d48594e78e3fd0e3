//! Instruction templates read from the prompt directory.

use std::path::PathBuf;

use photoblog_shared::{PhotoblogError, Result};

/// Template for the multimodal caption request.
pub const CAPTIONS_PROMPT: &str = "photo_captions.txt";

/// Template for the first-pass post draft.
pub const DRAFT_PROMPT: &str = "post_writer.txt";

/// Template for the optional tone rewrite.
pub const REWRITE_PROMPT: &str = "tone_rewrite.txt";

/// Reads named templates from a directory. Files are read on every call so
/// edits take effect without a restart.
#[derive(Debug, Clone)]
pub struct PromptStore {
    dir: PathBuf,
}

impl PromptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load a template by file name. A missing file is a config error.
    pub async fn load(&self, name: &str) -> Result<String> {
        let path = self.dir.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PhotoblogError::config(
                format!("Missing prompt file: {}", path.display()),
            )),
            Err(e) => Err(PhotoblogError::io(path, e)),
        }
    }
}
