//! The `posts.json` index read by the blog front page.

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use photoblog_shared::{PhotoblogError, PublishedPost, Result};

use crate::assembler::write_atomic;

/// One post in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub title: String,
    /// Post file name, relative to the posts directory.
    pub file: String,
    /// `YYYY-MM-DD`.
    pub date: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ManifestEntry {
    pub fn for_post(post: &PublishedPost, date: NaiveDate) -> Self {
        Self {
            title: post.title.clone(),
            file: post
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{}.md", post.slug)),
            date: date.format("%Y-%m-%d").to_string(),
            tags: vec!["blog".to_string()],
        }
    }
}

/// Ordered list of posts, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostManifest {
    entries: Vec<ManifestEntry>,
}

impl PostManifest {
    /// Load the manifest. A missing or unreadable file yields an empty one.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "could not read manifest, starting empty"
                );
                return Self::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid manifest, starting empty");
                Self::default()
            }
        }
    }

    /// Prepend `entry` unless one with the same file already exists.
    /// Returns whether the entry was added.
    pub fn insert(&mut self, entry: ManifestEntry) -> bool {
        if self.entries.iter().any(|e| e.file == entry.file) {
            debug!(file = %entry.file, "manifest already lists post");
            return false;
        }
        self.entries.insert(0, entry);
        true
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Write pretty-printed JSON atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PhotoblogError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            PhotoblogError::validation(format!("JSON serialization failed: {e}"))
        })?;
        write_atomic(path, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pb-manifest-{}", uuid::Uuid::now_v7()));
        dir.join("posts.json")
    }

    fn entry(file: &str, title: &str) -> ManifestEntry {
        ManifestEntry {
            title: title.into(),
            file: file.into(),
            date: "2024-05-17".into(),
            tags: vec!["blog".into()],
        }
    }

    #[test]
    fn insert_prepends_and_dedups_by_file() {
        let mut manifest = PostManifest::default();
        assert!(manifest.insert(entry("a.md", "A")));
        assert!(manifest.insert(entry("b.md", "B")));
        assert!(!manifest.insert(entry("a.md", "A again")));

        let files: Vec<&str> = manifest.entries().iter().map(|e| e.file.as_str()).collect();
        assert_eq!(files, ["b.md", "a.md"]);
        assert_eq!(manifest.entries()[1].title, "A");
    }

    #[test]
    fn missing_or_invalid_file_loads_empty() {
        let path = temp_path();
        assert!(PostManifest::load(&path).entries().is_empty());

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert!(PostManifest::load(&path).entries().is_empty());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn save_then_load_preserves_order_and_unicode() {
        let path = temp_path();
        let mut manifest = PostManifest::default();
        manifest.insert(entry("old.md", "Old"));
        manifest.insert(entry("new.md", "제주 바다"));
        manifest.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("제주 바다"));
        assert!(raw.starts_with("[\n"));

        let loaded = PostManifest::load(&path);
        assert_eq!(loaded, manifest);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn entry_uses_post_file_name() {
        let post = PublishedPost {
            path: PathBuf::from("/repo/blog/posts/2024-05-17-My-Title-abcdef.md"),
            slug: "My-Title-abcdef".into(),
            title: "My Title".into(),
            image_paths: vec![],
        };
        let e = ManifestEntry::for_post(&post, NaiveDate::from_ymd_opt(2024, 5, 17).unwrap());
        assert_eq!(e.file, "2024-05-17-My-Title-abcdef.md");
        assert_eq!(e.date, "2024-05-17");
        assert_eq!(e.tags, ["blog"]);
    }
}
