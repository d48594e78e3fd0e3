//! AI generation for Photoblog.
//!
//! Three stages share one transport: captions (images → JSON), draft
//! (captions → markdown) and an optional tone rewrite. Retry and response
//! validation live in [`GenerationClient`]; providers plug in through
//! [`GenerationBackend`].

mod backend;
mod client;
mod gemini;
mod mock;
mod prompts;
mod retry;

pub use backend::{Attempt, GenerationBackend, GenerationRequest, Part, RequestPurpose};
pub use client::{
    CAPTIONS_BLOCK, DRAFT_BLOCK, GenerationClient, INPUT_TEXT_BLOCK, STYLE_NOTE_BLOCK, mime_for,
    parse_captions, strip_code_fences,
};
pub use gemini::GeminiBackend;
pub use mock::MockBackend;
pub use prompts::{CAPTIONS_PROMPT, DRAFT_PROMPT, PromptStore, REWRITE_PROMPT};
pub use retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};
