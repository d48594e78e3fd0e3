//! Core domain types for Photoblog runs.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PhotoblogError, Result};

/// Maximum number of images sent to the model in one caption request,
/// and the number of positional image placeholders a draft may contain.
pub const MAX_BATCH_SIZE: usize = 4;

// ---------------------------------------------------------------------------
// MediaItem
// ---------------------------------------------------------------------------

/// A photo discovered in the media source.
///
/// `local_path` is write-once: the fetch stage attaches it after a successful
/// download and nothing may replace it afterward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    /// Stable provider-assigned identifier.
    pub id: String,
    /// File name as shown by the provider.
    pub display_name: String,
    /// Provider media type (e.g. `image/jpeg`).
    pub media_kind: String,
    /// Last modification time reported by the provider.
    pub last_modified: DateTime<Utc>,
    local_path: Option<PathBuf>,
}

impl MediaItem {
    /// Create an item that has not been fetched yet.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        media_kind: impl Into<String>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            media_kind: media_kind.into(),
            last_modified,
            local_path: None,
        }
    }

    /// Local file path, once fetched.
    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    /// Local file path, or a validation error if the item was never fetched.
    pub fn require_local_path(&self) -> Result<&Path> {
        self.local_path().ok_or_else(|| {
            PhotoblogError::validation(format!(
                "media item {} ({}) has not been fetched",
                self.id, self.display_name
            ))
        })
    }

    /// Record where the item was downloaded to. Fails if a path is already set.
    pub fn attach_local_path(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        if let Some(existing) = &self.local_path {
            return Err(PhotoblogError::validation(format!(
                "media item {} already fetched to {}",
                self.id,
                existing.display()
            )));
        }
        self.local_path = Some(path.into());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Captions
// ---------------------------------------------------------------------------

/// Caption for one image, as returned by the vision model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caption {
    /// 1-based position of the image in the batch.
    pub index: u32,
    pub line1: String,
    pub line2: String,
    /// Optional one-line summary (used as image alt text).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// The caption JSON contract: `{"images": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionSet {
    #[serde(rename = "images")]
    pub items: Vec<Caption>,
}

impl CaptionSet {
    /// Check that there is one caption per batch item with indices `1..=expected`
    /// in order.
    pub fn validate(&self, expected: usize) -> Result<()> {
        if self.items.len() != expected {
            return Err(PhotoblogError::validation(format!(
                "expected {expected} captions, got {}",
                self.items.len()
            )));
        }

        for (pos, caption) in self.items.iter().enumerate() {
            let want = pos as u32 + 1;
            if caption.index != want {
                return Err(PhotoblogError::validation(format!(
                    "caption at position {pos} has index {}, expected {want}",
                    caption.index
                )));
            }
        }

        Ok(())
    }

    /// Caption for the 1-based image index.
    pub fn get(&self, index: u32) -> Option<&Caption> {
        self.items.iter().find(|c| c.index == index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// A post written to disk by the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPost {
    /// Path of the markdown file.
    pub path: PathBuf,
    /// Filesystem-safe slug, also the image directory name.
    pub slug: String,
    /// Title written to the front matter.
    pub title: String,
    /// Copied image files, in batch order.
    pub image_paths: Vec<PathBuf>,
}

/// A durable record that an item produced a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub item_id: String,
    pub post_slug: String,
    pub processed_at: DateTime<Utc>,
}
