//! Local directory source, for offline runs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use photoblog_shared::{MediaItem, PhotoblogError, Result};

use crate::{MediaSource, ensure_not_fetched, store_fetched};

/// Hex characters of the name hash used as the item id.
const ID_LEN: usize = 16;

/// Scans one directory for photos and another for `.txt` notes.
pub struct LocalFolderSource {
    dir: PathBuf,
    notes_dir: Option<PathBuf>,
}

impl LocalFolderSource {
    pub fn new(dir: impl Into<PathBuf>, notes_dir: Option<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            notes_dir,
        }
    }

    /// Stable id for a file name.
    pub fn item_id(file_name: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(file_name.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        hash[..ID_LEN].to_string()
    }
}

fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

/// Regular files in `dir` with their modification times.
async fn scan(dir: &Path) -> Result<Vec<(PathBuf, DateTime<Utc>)>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PhotoblogError::io(dir, e))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PhotoblogError::io(dir, e))?
    {
        let path = entry.path();
        let meta = entry
            .metadata()
            .await
            .map_err(|e| PhotoblogError::io(&path, e))?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .map_err(|e| PhotoblogError::io(&path, e))?;
        files.push((path, modified));
    }
    Ok(files)
}

#[async_trait]
impl MediaSource for LocalFolderSource {
    fn name(&self) -> &str {
        "local"
    }

    #[instrument(skip_all, fields(dir = %self.dir.display()))]
    async fn list_images(&self) -> Result<Vec<MediaItem>> {
        let mut items: Vec<MediaItem> = scan(&self.dir)
            .await?
            .into_iter()
            .filter_map(|(path, modified)| {
                let mime = image_mime(&path)?;
                let name = path.file_name()?.to_str()?.to_string();
                Some(MediaItem::new(Self::item_id(&name), name, mime, modified))
            })
            .collect();

        items.sort_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });

        info!(count = items.len(), "listed local images");
        Ok(items)
    }

    #[instrument(skip_all, fields(id = %item.id))]
    async fn fetch(&self, item: &mut MediaItem, dest_dir: &Path) -> Result<PathBuf> {
        ensure_not_fetched(item)?;

        let src = self.dir.join(&item.display_name);
        let data = tokio::fs::read(&src)
            .await
            .map_err(|e| PhotoblogError::io(&src, e))?;

        let path = store_fetched(item, dest_dir, &data).await?;
        debug!(from = %src.display(), to = %path.display(), "copied image");
        Ok(path)
    }

    async fn load_context_note(&self) -> Result<Option<String>> {
        let Some(notes_dir) = &self.notes_dir else {
            return Ok(None);
        };
        if !notes_dir.exists() {
            return Ok(None);
        }

        let newest = scan(notes_dir)
            .await?
            .into_iter()
            .filter(|(path, _)| path.extension().is_some_and(|e| e.eq_ignore_ascii_case("txt")))
            .max_by_key(|(_, modified)| *modified);

        let Some((path, _)) = newest else {
            return Ok(None);
        };
        info!(path = %path.display(), "using context note");

        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| PhotoblogError::io(&path, e))?;
        let text = text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}
