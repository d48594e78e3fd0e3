//! Processed-set tracking and batch selection.

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use photoblog_drive::MediaSource;
use photoblog_shared::{MediaItem, Result};
use photoblog_storage::Storage;

/// Durable record of which items already produced a post.
#[async_trait]
pub trait ProcessedSetTracker: Send + Sync {
    async fn is_processed(&self, item_id: &str) -> Result<bool>;

    /// Record `item_id` under `label` (the post slug). Re-marking keeps the
    /// first record and is not an error.
    async fn mark_processed(&self, item_id: &str, label: &str) -> Result<()>;
}

#[async_trait]
impl ProcessedSetTracker for Storage {
    async fn is_processed(&self, item_id: &str) -> Result<bool> {
        Storage::is_processed(self, item_id).await
    }

    async fn mark_processed(&self, item_id: &str, label: &str) -> Result<()> {
        Storage::mark_processed(self, item_id, label).await.map(|_| ())
    }
}

/// Pick up to `batch_size` unprocessed items, oldest first.
///
/// Stops asking the tracker as soon as the batch is full.
#[instrument(skip_all, fields(source = source.name(), batch_size = batch_size))]
pub async fn pick_new_items(
    source: &dyn MediaSource,
    tracker: &dyn ProcessedSetTracker,
    batch_size: usize,
) -> Result<Vec<MediaItem>> {
    let candidates = source.list_images().await?;
    let total = candidates.len();

    let mut picked = Vec::with_capacity(batch_size);
    for item in candidates {
        if picked.len() >= batch_size {
            break;
        }
        if tracker.is_processed(&item.id).await? {
            debug!(id = %item.id, "skipping processed item");
            continue;
        }
        picked.push(item);
    }

    info!(candidates = total, picked = picked.len(), "selected batch");
    Ok(picked)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use chrono::{TimeZone, Utc};
    use photoblog_shared::PhotoblogError;

    use super::*;

    /// In-memory tracker that counts lookups.
    #[derive(Default)]
    pub(crate) struct MemoryTracker {
        pub marked: Mutex<HashMap<String, String>>,
        pub lookups: Mutex<usize>,
        pub fail_marks: bool,
    }

    #[async_trait]
    impl ProcessedSetTracker for MemoryTracker {
        async fn is_processed(&self, item_id: &str) -> Result<bool> {
            *self.lookups.lock().unwrap() += 1;
            Ok(self.marked.lock().unwrap().contains_key(item_id))
        }

        async fn mark_processed(&self, item_id: &str, label: &str) -> Result<()> {
            if self.fail_marks {
                return Err(PhotoblogError::Storage("disk full".into()));
            }
            self.marked
                .lock()
                .unwrap()
                .entry(item_id.to_string())
                .or_insert_with(|| label.to_string());
            Ok(())
        }
    }

    /// Source with a fixed listing; fetch writes a small file, or a real
    /// photo of `photo_size` when set.
    pub(crate) struct FixedSource {
        pub items: Vec<MediaItem>,
        pub note: Option<String>,
        pub photo_size: Option<(u32, u32)>,
    }

    impl FixedSource {
        pub fn with_ids(ids: &[&str]) -> Self {
            let items = ids
                .iter()
                .enumerate()
                .map(|(i, id)| {
                    let ts = Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap();
                    MediaItem::new(*id, format!("{id}.jpg"), "image/jpeg", ts)
                })
                .collect();
            Self {
                items,
                note: None,
                photo_size: None,
            }
        }
    }

    #[async_trait]
    impl MediaSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn list_images(&self) -> Result<Vec<MediaItem>> {
            Ok(self.items.clone())
        }

        async fn fetch(&self, item: &mut MediaItem, dest_dir: &Path) -> Result<PathBuf> {
            std::fs::create_dir_all(dest_dir).unwrap();
            let path = dest_dir.join(&item.display_name);
            match self.photo_size {
                Some((w, h)) => image::RgbImage::new(w, h).save(&path).unwrap(),
                None => std::fs::write(&path, item.id.as_bytes()).unwrap(),
            }
            item.attach_local_path(path.clone())?;
            Ok(path)
        }

        async fn load_context_note(&self) -> Result<Option<String>> {
            Ok(self.note.clone())
        }
    }

    fn ids(items: &[MediaItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[tokio::test]
    async fn picks_oldest_unprocessed_first() {
        let source = FixedSource::with_ids(&["a", "b", "c", "d", "e", "f"]);
        let tracker = MemoryTracker::default();
        tracker.mark_processed("b", "old-post").await.unwrap();

        let picked = pick_new_items(&source, &tracker, 4).await.unwrap();
        assert_eq!(ids(&picked), ["a", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn stops_scanning_once_full() {
        let source = FixedSource::with_ids(&["a", "b", "c", "d", "e", "f"]);
        let tracker = MemoryTracker::default();

        let picked = pick_new_items(&source, &tracker, 2).await.unwrap();
        assert_eq!(ids(&picked), ["a", "b"]);
        assert_eq!(*tracker.lookups.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn marked_items_are_never_reselected() {
        let source = FixedSource::with_ids(&["a", "b", "c"]);
        let tracker = MemoryTracker::default();

        let first = pick_new_items(&source, &tracker, 2).await.unwrap();
        let again = pick_new_items(&source, &tracker, 2).await.unwrap();
        assert_eq!(ids(&first), ids(&again));

        for item in &first {
            tracker.mark_processed(&item.id, "post").await.unwrap();
        }
        let next = pick_new_items(&source, &tracker, 2).await.unwrap();
        assert_eq!(ids(&next), ["c"]);

        let none = {
            tracker.mark_processed("c", "post").await.unwrap();
            pick_new_items(&source, &tracker, 2).await.unwrap()
        };
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn storage_backs_the_tracker() {
        let db = std::env::temp_dir().join(format!("pb_sel_{}.db", uuid::Uuid::now_v7()));
        let storage = Storage::open(&db).await.unwrap();
        let source = FixedSource::with_ids(&["a", "b"]);

        ProcessedSetTracker::mark_processed(&storage, "a", "first").await.unwrap();
        ProcessedSetTracker::mark_processed(&storage, "a", "second").await.unwrap();

        let picked = pick_new_items(&source, &storage, 4).await.unwrap();
        assert_eq!(ids(&picked), ["b"]);
        assert_eq!(
            storage.get_processed("a").await.unwrap().unwrap().post_slug,
            "first"
        );
    }
}
