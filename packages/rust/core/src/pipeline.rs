//! End-to-end `run` pipeline: source → captions → draft → post → publish → mark.
//!
//! One run handles at most one batch. Runs are not safe to execute
//! concurrently against the same blog repo or state database: two runs can
//! select the same items and race on the post files and the manifest.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use photoblog_drive::{MediaSource, source_from_config};
use photoblog_generation::GenerationClient;
use photoblog_shared::{
    AppConfig, ImageResizeConfig, MediaItem, PhotoblogError, PublishedPost, Result,
};
use photoblog_storage::Storage;

use crate::assembler::ContentAssembler;
use crate::manifest::{ManifestEntry, PostManifest};
use crate::publish::{DryRunPublisher, GitPublisher, Publisher, commit_message};
use crate::resize::{ResizeOutcome, resize_in_place};
use crate::selection::{ProcessedSetTracker, pick_new_items};

/// Knobs for a run that are not owned by a collaborator.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Items per post, 1..=4.
    pub batch_size: usize,
    /// Where fetched photos land before assembly.
    pub incoming_dir: PathBuf,
    /// `posts.json` location.
    pub manifest_path: PathBuf,
    /// Run the tone rewrite pass after drafting.
    pub rewrite_tone: bool,
    pub style_note: Option<String>,
    /// Commit message template with a `{slug}` placeholder.
    pub commit_template: String,
    /// Bounds for fetched photos. `None` leaves them as downloaded.
    pub resize: Option<ImageResizeConfig>,
    /// Record published items in the processed set. Off for dry runs.
    pub record: bool,
}

impl RunOptions {
    /// Options for a run against `config`.
    ///
    /// Only `dry_run` turns recording off. With `[git] enabled = false` the
    /// post is still written locally, so its items are recorded.
    pub fn from_config(config: &AppConfig, dry_run: bool) -> Self {
        Self {
            batch_size: config.pipeline.batch_size,
            incoming_dir: config.incoming_dir(),
            manifest_path: config.manifest_path(),
            rewrite_tone: config.ai.rewrite_tone,
            style_note: config.ai.style_note.clone(),
            commit_template: config.git.commit_message_template.clone(),
            resize: config.image_resize.enabled.then(|| config.image_resize.clone()),
            record: !dry_run,
        }
    }
}

/// Outcome of one run. Produced for failures too.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: Uuid,
    pub ok: bool,
    pub message: String,
    /// Items selected for this run.
    pub attempted_count: usize,
    /// Items successfully recorded as processed.
    pub processed_count: usize,
    pub post_path: Option<PathBuf>,
    pub post_slug: Option<String>,
    /// `"<kind>: <message>"` per failure.
    pub errors: Vec<String>,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once the run has a result.
    fn done(&self, result: &RunResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _result: &RunResult) {}
}

pub struct Pipeline {
    source: Box<dyn MediaSource>,
    tracker: Arc<dyn ProcessedSetTracker>,
    generator: GenerationClient,
    assembler: ContentAssembler,
    publisher: Box<dyn Publisher>,
    options: RunOptions,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn MediaSource>,
        tracker: Arc<dyn ProcessedSetTracker>,
        generator: GenerationClient,
        assembler: ContentAssembler,
        publisher: Box<dyn Publisher>,
        options: RunOptions,
    ) -> Self {
        Self {
            source,
            tracker,
            generator,
            assembler,
            publisher,
            options,
        }
    }

    /// Wire every collaborator from config.
    ///
    /// `dry_run` swaps in [`DryRunPublisher`] and leaves the processed set
    /// untouched. Credentials are resolved here, so a missing key fails
    /// before any item is selected.
    pub async fn from_config(config: &AppConfig, dry_run: bool) -> Result<Self> {
        config.validate()?;

        let source = source_from_config(&config.source, config.ai.timeout_secs)?;
        let generator = GenerationClient::from_config(&config.ai, config.prompts_dir())?;
        let tracker = Arc::new(Storage::open(&config.state_db_path()).await?);

        let publisher: Box<dyn Publisher> = if dry_run || !config.git.enabled {
            Box::new(DryRunPublisher)
        } else {
            Box::new(GitPublisher::from_config(&config.repo_dir(), &config.git))
        };

        Ok(Self::new(
            source,
            tracker,
            generator,
            ContentAssembler::from_config(config),
            publisher,
            RunOptions::from_config(config, dry_run),
        ))
    }

    /// Execute one run. Never fails; problems are reported in the result.
    pub async fn run(&self, progress: &dyn ProgressReporter) -> RunResult {
        let run_id = Uuid::now_v7();
        let span = info_span!(
            "run",
            %run_id,
            source = self.source.name(),
            backend = self.generator.backend_name(),
            publisher = self.publisher.name(),
        );

        let result = self.run_inner(run_id, progress).instrument(span).await;
        progress.done(&result);
        result
    }

    async fn run_inner(&self, run_id: Uuid, progress: &dyn ProgressReporter) -> RunResult {
        let start = Instant::now();
        let mut result = RunResult {
            run_id,
            ok: false,
            message: String::new(),
            attempted_count: 0,
            processed_count: 0,
            post_path: None,
            post_slug: None,
            errors: Vec::new(),
            elapsed: Duration::ZERO,
        };

        progress.phase("Pre-flight checks");
        if let Err(e) = self.publisher.preflight().await {
            error!(error = %e, "pre-flight check failed");
            result.message = e.to_string();
            result.errors.push(describe(&e));
            result.elapsed = start.elapsed();
            return result;
        }

        let mut batch = Vec::new();
        let mut post = None;
        let outcome = self.produce(progress, &mut batch, &mut post).await;
        result.attempted_count = batch.len();
        if let Some(post) = &post {
            result.post_path = Some(post.path.clone());
            result.post_slug = Some(post.slug.clone());
        }

        match (outcome, post) {
            (Err(e), _) => {
                error!(kind = e.kind(), error = %e, "run failed");
                result.message = "Pipeline failed.".into();
                result.errors.push(describe(&e));
            }
            (Ok(()), None) => {
                info!("no new images");
                result.ok = true;
                result.message = "No new images.".into();
            }
            (Ok(()), Some(post)) => {
                result.ok = true;
                if self.options.record {
                    progress.phase("Recording processed items");
                    result.processed_count =
                        self.record(&batch, &post.slug, &mut result.errors).await;
                    result.message = "Pipeline completed successfully.".into();
                } else {
                    result.message = "Dry run completed; processed set unchanged.".into();
                }
            }
        }

        result.elapsed = start.elapsed();
        info!(
            ok = result.ok,
            attempted = result.attempted_count,
            processed = result.processed_count,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "run finished"
        );
        result
    }

    /// Every stage up to and including publish.
    ///
    /// `batch` and `post` are filled as soon as they exist so a failure
    /// can still report them.
    async fn produce(
        &self,
        progress: &dyn ProgressReporter,
        batch: &mut Vec<MediaItem>,
        post: &mut Option<PublishedPost>,
    ) -> Result<()> {
        progress.phase("Selecting new images");
        *batch = pick_new_items(
            self.source.as_ref(),
            self.tracker.as_ref(),
            self.options.batch_size,
        )
        .await?;
        if batch.is_empty() {
            return Ok(());
        }

        let total = batch.len();
        for (i, item) in batch.iter_mut().enumerate() {
            progress.phase(&format!("Downloading [{}/{total}] {}", i + 1, item.display_name));
            self.source.fetch(item, &self.options.incoming_dir).await?;
        }

        if let Some(bounds) = &self.options.resize {
            progress.phase("Resizing images");
            resize_batch(batch, bounds).await;
        }

        progress.phase("Generating captions");
        let captions = self.generator.generate_captions(batch).await?;

        progress.phase("Loading context note");
        let note = self.source.load_context_note().await?;
        info!(note_chars = note.as_deref().map_or(0, |n| n.chars().count()), "context note loaded");

        progress.phase("Drafting post");
        let mut draft = self.generator.generate_draft(&captions, note.as_deref()).await?;

        if self.options.rewrite_tone {
            progress.phase("Rewriting tone");
            draft = self
                .generator
                .rewrite_tone(&draft, self.options.style_note.as_deref())
                .await?;
        }

        progress.phase("Assembling post");
        let today = Local::now().date_naive();
        let built = self.assembler.build_dated(&captions, &draft, batch, today)?;
        let entry = ManifestEntry::for_post(&built, today);
        let message = commit_message(&self.options.commit_template, &built.slug);
        *post = Some(built);

        progress.phase("Updating posts manifest");
        let mut manifest = PostManifest::load(&self.options.manifest_path);
        if manifest.insert(entry) {
            manifest.save(&self.options.manifest_path)?;
        }

        progress.phase("Publishing");
        self.publisher.publish(&message).await?;
        Ok(())
    }

    /// Mark every item in the batch. Failures are collected, not raised.
    async fn record(&self, batch: &[MediaItem], slug: &str, errors: &mut Vec<String>) -> usize {
        let mut marked = 0;
        for item in batch {
            match self.tracker.mark_processed(&item.id, slug).await {
                Ok(()) => marked += 1,
                Err(e) => {
                    warn!(id = %item.id, error = %e, "failed to mark item processed");
                    errors.push(describe(&e));
                }
            }
        }
        info!(marked, total = batch.len(), "processed set updated");
        marked
    }
}

/// Bound every fetched photo. A photo that cannot be resized is logged and
/// published as downloaded.
async fn resize_batch(batch: &[MediaItem], bounds: &ImageResizeConfig) {
    for item in batch {
        let Some(path) = item.local_path().map(Path::to_path_buf) else {
            continue;
        };
        let config = bounds.clone();
        let outcome = tokio::task::spawn_blocking(move || resize_in_place(&path, &config))
            .await
            .map_err(|e| PhotoblogError::Image(format!("resize task failed: {e}")))
            .and_then(|r| r);

        match outcome {
            Ok(ResizeOutcome::Resized { from, to }) => {
                info!(id = %item.id, ?from, ?to, "resized image");
            }
            Ok(ResizeOutcome::Unchanged { .. }) => {}
            Err(e) => {
                warn!(id = %item.id, error = %e, "could not resize image, keeping original");
            }
        }
    }
}

fn describe(e: &PhotoblogError) -> String {
    format!("{}: {e}", e.kind())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use photoblog_generation::{
        CAPTIONS_PROMPT, DRAFT_PROMPT, MockBackend, PromptStore, REWRITE_PROMPT, RetryPolicy,
    };

    use super::*;
    use crate::selection::tests::{FixedSource, MemoryTracker};

    struct FailingPublisher {
        at_preflight: bool,
    }

    #[async_trait]
    impl Publisher for FailingPublisher {
        fn name(&self) -> &str {
            "failing"
        }

        async fn preflight(&self) -> Result<()> {
            if self.at_preflight {
                return Err(PhotoblogError::Publish(
                    "SECURITY BLOCK: .env is tracked by git".into(),
                ));
            }
            Ok(())
        }

        async fn publish(&self, _message: &str) -> Result<()> {
            Err(PhotoblogError::Publish("git push failed: rejected".into()))
        }
    }

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("pb-pipeline-{}", Uuid::now_v7()))
    }

    fn write_prompts(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(CAPTIONS_PROMPT), "Caption these photos.").unwrap();
        std::fs::write(dir.join(DRAFT_PROMPT), "Write a post.").unwrap();
        std::fs::write(dir.join(REWRITE_PROMPT), "Rewrite warmly.").unwrap();
    }

    fn options(root: &Path) -> RunOptions {
        RunOptions {
            batch_size: 4,
            incoming_dir: root.join("blog/assets/images/incoming"),
            manifest_path: root.join("posts.json"),
            rewrite_tone: false,
            style_note: None,
            commit_template: "chore: publish {slug}".into(),
            resize: Some(ImageResizeConfig::default()),
            record: true,
        }
    }

    fn pipeline(
        root: &Path,
        source: FixedSource,
        tracker: Arc<MemoryTracker>,
        publisher: Box<dyn Publisher>,
        options: RunOptions,
    ) -> Pipeline {
        let prompts = root.join("prompts");
        if !prompts.exists() {
            write_prompts(&prompts);
        }
        let generator =
            GenerationClient::new(Arc::new(MockBackend), PromptStore::new(prompts), "v", "t")
                .with_retry_policy(RetryPolicy::no_delay());
        let assembler = ContentAssembler::new(
            root.join("blog/posts"),
            root.join("blog/assets/images"),
            "/blog/assets/images",
            false,
        );
        Pipeline::new(
            Box::new(source),
            tracker,
            generator,
            assembler,
            publisher,
            options,
        )
    }

    fn marked_ids(tracker: &MemoryTracker) -> Vec<String> {
        let mut ids: Vec<String> = tracker.marked.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn publishes_one_batch_and_marks_it() {
        let root = temp_root();
        let tracker = Arc::new(MemoryTracker::default());
        let source = FixedSource::with_ids(&["a", "b", "c", "d", "e"]);
        let p = pipeline(&root, source, tracker.clone(), Box::new(DryRunPublisher), options(&root));

        let result = p.run(&SilentProgress).await;
        assert!(result.ok, "{:?}", result.errors);
        assert_eq!(result.message, "Pipeline completed successfully.");
        assert_eq!(result.attempted_count, 4);
        assert_eq!(result.processed_count, 4);
        assert!(result.errors.is_empty());
        assert_eq!(result.post_slug.as_deref(), Some("Mock-post-automated-blog-test-a"));

        let post_path = result.post_path.unwrap();
        let markdown = std::fs::read_to_string(&post_path).unwrap();
        assert!(markdown.contains("title: \"Mock post: automated blog test\""));
        assert!(!markdown.contains("[[IMAGE_"));
        assert!(markdown.contains("/blog/assets/images/Mock-post-automated-blog-test-a/d.jpg"));

        assert_eq!(marked_ids(&tracker), ["a", "b", "c", "d"]);
        assert_eq!(
            tracker.marked.lock().unwrap()["a"],
            "Mock-post-automated-blog-test-a"
        );

        let manifest = PostManifest::load(&root.join("posts.json"));
        assert_eq!(manifest.entries().len(), 1);
        assert_eq!(
            manifest.entries()[0].file,
            post_path.file_name().unwrap().to_str().unwrap()
        );

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn reruns_never_reprocess_items() {
        let root = temp_root();
        let tracker = Arc::new(MemoryTracker::default());
        let ids = ["a", "b", "c", "d", "e"];

        let first = pipeline(
            &root,
            FixedSource::with_ids(&ids),
            tracker.clone(),
            Box::new(DryRunPublisher),
            options(&root),
        )
        .run(&SilentProgress)
        .await;
        assert_eq!(first.processed_count, 4);

        let second = pipeline(
            &root,
            FixedSource::with_ids(&ids),
            tracker.clone(),
            Box::new(DryRunPublisher),
            options(&root),
        )
        .run(&SilentProgress)
        .await;
        assert!(second.ok);
        assert_eq!(second.attempted_count, 1);
        assert_eq!(second.post_slug.as_deref(), Some("Mock-post-automated-blog-test-e"));

        let third = pipeline(
            &root,
            FixedSource::with_ids(&ids),
            tracker.clone(),
            Box::new(DryRunPublisher),
            options(&root),
        )
        .run(&SilentProgress)
        .await;
        assert!(third.ok);
        assert_eq!(third.message, "No new images.");
        assert_eq!(third.attempted_count, 0);
        assert!(third.post_path.is_none());

        assert_eq!(marked_ids(&tracker), ids);
        assert_eq!(PostManifest::load(&root.join("posts.json")).entries().len(), 2);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn mark_failures_are_counted_not_fatal() {
        let root = temp_root();
        let tracker = Arc::new(MemoryTracker {
            fail_marks: true,
            ..Default::default()
        });
        let p = pipeline(
            &root,
            FixedSource::with_ids(&["a", "b"]),
            tracker,
            Box::new(DryRunPublisher),
            options(&root),
        );

        let result = p.run(&SilentProgress).await;
        assert!(result.ok);
        assert_eq!(result.attempted_count, 2);
        assert_eq!(result.processed_count, 0);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].starts_with("StorageError: "));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn publish_failure_reports_partial_post_and_marks_nothing() {
        let root = temp_root();
        let tracker = Arc::new(MemoryTracker::default());
        let p = pipeline(
            &root,
            FixedSource::with_ids(&["a", "b"]),
            tracker.clone(),
            Box::new(FailingPublisher { at_preflight: false }),
            options(&root),
        );

        let result = p.run(&SilentProgress).await;
        assert!(!result.ok);
        assert_eq!(result.message, "Pipeline failed.");
        assert_eq!(result.attempted_count, 2);
        assert_eq!(result.processed_count, 0);
        assert!(result.post_path.as_ref().is_some_and(|p| p.exists()));
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("PublishError: "));
        assert!(marked_ids(&tracker).is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn preflight_failure_stops_before_selection() {
        let root = temp_root();
        let tracker = Arc::new(MemoryTracker::default());
        let p = pipeline(
            &root,
            FixedSource::with_ids(&["a"]),
            tracker.clone(),
            Box::new(FailingPublisher { at_preflight: true }),
            options(&root),
        );

        let result = p.run(&SilentProgress).await;
        assert!(!result.ok);
        assert!(result.message.contains("SECURITY BLOCK"));
        assert_eq!(result.attempted_count, 0);
        assert_eq!(*tracker.lookups.lock().unwrap(), 0);
        assert!(!root.join("blog/posts").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn missing_prompt_is_a_config_failure() {
        let root = temp_root();
        let prompts = root.join("prompts");
        write_prompts(&prompts);
        std::fs::remove_file(prompts.join(DRAFT_PROMPT)).unwrap();

        let tracker = Arc::new(MemoryTracker::default());
        let p = pipeline(
            &root,
            FixedSource::with_ids(&["a"]),
            tracker.clone(),
            Box::new(DryRunPublisher),
            options(&root),
        );

        let result = p.run(&SilentProgress).await;
        assert!(!result.ok);
        assert_eq!(result.attempted_count, 1);
        assert!(result.post_path.is_none());
        assert!(result.errors[0].starts_with("ConfigError: "));
        assert!(result.errors[0].contains(DRAFT_PROMPT));
        assert!(marked_ids(&tracker).is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn dry_run_leaves_processed_set_alone() {
        let root = temp_root();
        let tracker = Arc::new(MemoryTracker::default());
        let mut opts = options(&root);
        opts.record = false;
        opts.rewrite_tone = true;
        opts.style_note = Some("short sentences".into());

        let mut source = FixedSource::with_ids(&["a"]);
        source.note = Some("We went to the beach.".into());
        let p = pipeline(&root, source, tracker.clone(), Box::new(DryRunPublisher), opts);

        let result = p.run(&SilentProgress).await;
        assert!(result.ok, "{:?}", result.errors);
        assert_eq!(result.processed_count, 0);
        assert!(result.message.starts_with("Dry run"));
        assert!(result.post_path.unwrap().exists());
        assert!(marked_ids(&tracker).is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn only_dry_run_turns_recording_off() {
        let mut config = AppConfig::default();
        config.git.enabled = false;

        let options = RunOptions::from_config(&config, false);
        assert!(options.record, "git disabled must still record");
        assert_eq!(options.resize, Some(config.image_resize.clone()));
        assert!(!RunOptions::from_config(&config, true).record);

        config.image_resize.enabled = false;
        assert!(RunOptions::from_config(&config, false).resize.is_none());
    }

    #[tokio::test]
    async fn oversized_photos_are_bounded_before_publishing() {
        let root = temp_root();
        let tracker = Arc::new(MemoryTracker::default());
        let mut source = FixedSource::with_ids(&["a", "b"]);
        source.photo_size = Some((2000, 1000));
        let p = pipeline(&root, source, tracker.clone(), Box::new(DryRunPublisher), options(&root));

        let result = p.run(&SilentProgress).await;
        assert!(result.ok, "{:?}", result.errors);
        assert_eq!(result.processed_count, 2);

        let slug = result.post_slug.unwrap();
        for name in ["a.jpg", "b.jpg"] {
            let published = root.join("blog/assets/images").join(&slug).join(name);
            assert_eq!(image::image_dimensions(&published).unwrap(), (1024, 512));
        }

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn unreadable_photos_are_published_as_downloaded() {
        let root = temp_root();
        let tracker = Arc::new(MemoryTracker::default());
        let p = pipeline(
            &root,
            FixedSource::with_ids(&["a"]),
            tracker.clone(),
            Box::new(DryRunPublisher),
            options(&root),
        );

        let result = p.run(&SilentProgress).await;
        assert!(result.ok, "{:?}", result.errors);
        assert!(result.errors.is_empty());
        assert_eq!(marked_ids(&tracker), ["a"]);

        let slug = result.post_slug.unwrap();
        let published = root.join("blog/assets/images").join(&slug).join("a.jpg");
        assert_eq!(std::fs::read(published).unwrap(), b"a");

        let _ = std::fs::remove_dir_all(&root);
    }
}
