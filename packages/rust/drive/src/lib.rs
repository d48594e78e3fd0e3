//! Media sources for Photoblog.
//!
//! A [`MediaSource`] lists candidate photos oldest-first, downloads a photo
//! to a local directory, and optionally supplies a free-text context note
//! that steers the draft.

mod drive;
mod local;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use photoblog_shared::{
    MediaItem, PhotoblogError, Result, SourceConfig, SourceKind, expand_path,
};

pub use drive::DriveSource;
pub use local::LocalFolderSource;

/// Characters replaced with `_` in downloaded file names.
const UNSAFE_FILENAME_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Short source name for logs.
    fn name(&self) -> &str;

    /// Image items in the watched location, oldest first.
    async fn list_images(&self) -> Result<Vec<MediaItem>>;

    /// Download `item` into `dest_dir` and attach its local path.
    ///
    /// Fails without touching the disk if the item was already fetched.
    async fn fetch(&self, item: &mut MediaItem, dest_dir: &Path) -> Result<PathBuf>;

    /// Latest context note, if the source has one configured.
    async fn load_context_note(&self) -> Result<Option<String>>;
}

/// Build the source selected by `[source].kind`.
pub fn source_from_config(
    config: &SourceConfig,
    timeout_secs: u64,
) -> Result<Box<dyn MediaSource>> {
    match config.kind {
        SourceKind::Drive => Ok(Box::new(DriveSource::from_config(config, timeout_secs)?)),
        SourceKind::Local => {
            let dir = config.local_dir.as_deref().ok_or_else(|| {
                PhotoblogError::config("source.local_dir is required when source.kind = \"local\"")
            })?;
            Ok(Box::new(LocalFolderSource::new(
                expand_path(dir),
                config.notes_dir.as_deref().map(expand_path),
            )))
        }
    }
}

/// Replace characters that are invalid in file names on common platforms.
pub fn safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| if UNSAFE_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Local file name for a fetched item, unique per item id.
///
/// Display names are not unique (phones upload many `image.jpg`), so the
/// id is prefixed.
pub fn incoming_file_name(item: &MediaItem) -> String {
    safe_filename(&format!("{}_{}", item.id, item.display_name))
}

/// Shared by both sources: reject re-fetch, write bytes, attach the path.
pub(crate) async fn store_fetched(
    item: &mut MediaItem,
    dest_dir: &Path,
    data: &[u8],
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|e| PhotoblogError::io(dest_dir, e))?;

    let path = dest_dir.join(incoming_file_name(item));
    tokio::fs::write(&path, data)
        .await
        .map_err(|e| PhotoblogError::io(&path, e))?;

    item.attach_local_path(path.clone())?;
    Ok(path)
}

pub(crate) fn ensure_not_fetched(item: &MediaItem) -> Result<()> {
    match item.local_path() {
        Some(existing) => Err(PhotoblogError::validation(format!(
            "media item {} already fetched to {}",
            item.id,
            existing.display()
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_filename_replaces_reserved_chars() {
        assert_eq!(safe_filename("a<b>c:d\"e/f\\g|h?i*j.jpg"), "a_b_c_d_e_f_g_h_i_j.jpg");
        assert_eq!(safe_filename("제주 바다.JPG"), "제주 바다.JPG");
    }

    #[test]
    fn incoming_names_differ_for_same_display_name() {
        let ts = chrono::Utc::now();
        let a = MediaItem::new("id1", "image.jpg", "image/jpeg", ts);
        let b = MediaItem::new("id2", "image.jpg", "image/jpeg", ts);
        assert_eq!(incoming_file_name(&a), "id1_image.jpg");
        assert_ne!(incoming_file_name(&a), incoming_file_name(&b));
    }

    #[test]
    fn local_source_requires_dir() {
        let config = SourceConfig {
            kind: SourceKind::Local,
            ..SourceConfig::default()
        };
        let err = source_from_config(&config, 5).err().unwrap();
        assert_eq!(err.kind(), "ConfigError");
    }
}
