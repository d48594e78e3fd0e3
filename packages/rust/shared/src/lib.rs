//! Shared types, error model, and configuration for Photoblog.
//!
//! This crate is the foundation depended on by all other Photoblog crates.
//! It provides:
//! - [`PhotoblogError`], the unified error type
//! - Domain types ([`MediaItem`], [`CaptionSet`], [`PublishedPost`], [`ProcessedRecord`])
//! - Configuration ([`AppConfig`], config loading, credential lookup)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AiConfig, AppConfig, BatchConfig, BlogConfig, GitConfig, ImageResizeConfig,
    SUPPORTED_PROVIDER, SourceConfig, SourceKind, config_dir, config_file_path, expand_path,
    init_config, load_config, load_config_from, resolve_api_key, resolve_drive_token,
};
pub use error::{EXCERPT_LIMIT, PhotoblogError, Result, RetryTrigger, excerpt};
pub use types::{Caption, CaptionSet, MAX_BATCH_SIZE, MediaItem, ProcessedRecord, PublishedPost};
