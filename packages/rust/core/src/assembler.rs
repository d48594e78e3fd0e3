//! Post assembler.
//!
//! Takes captions, the (optionally rewritten) draft, and the fetched photos,
//! then writes the final markdown post and its images into the blog repo.
//! Assembly is not idempotent on its own; the processed set guards reruns.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{Local, NaiveDate};
use regex::Regex;
use tracing::{debug, info, instrument};

use photoblog_shared::{
    AppConfig, CaptionSet, MAX_BATCH_SIZE, MediaItem, PhotoblogError, PublishedPost, Result,
};

use crate::slug::{extract_title, make_slug, sanitize_file_name};

static IMAGE_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[IMAGE_(\d+)\]\]").expect("valid regex"));

/// A whole image reference whose target is a placeholder: `![alt]([[IMAGE_n]])`.
static IMAGE_LINK_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[[^\]\n]*\]\(\s*\[\[IMAGE_(\d+)\]\]\s*\)").expect("valid regex")
});

static ADJACENT_IMAGES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\)\s*!\[").expect("valid regex"));

/// Where posts and images go, and how images are linked.
#[derive(Debug, Clone)]
pub struct ContentAssembler {
    posts_dir: PathBuf,
    images_dir: PathBuf,
    web_image_prefix: String,
    gallery: bool,
}

impl ContentAssembler {
    pub fn new(
        posts_dir: impl Into<PathBuf>,
        images_dir: impl Into<PathBuf>,
        web_image_prefix: impl Into<String>,
        gallery: bool,
    ) -> Self {
        Self {
            posts_dir: posts_dir.into(),
            images_dir: images_dir.into(),
            web_image_prefix: web_image_prefix.into().trim_end_matches('/').to_string(),
            gallery,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.posts_dir(),
            config.images_dir(),
            &config.blog.web_image_prefix,
            config.blog.gallery,
        )
    }

    /// Assemble a post dated today (local time).
    pub fn build(
        &self,
        captions: &CaptionSet,
        draft: &str,
        images: &[MediaItem],
    ) -> Result<PublishedPost> {
        self.build_dated(captions, draft, images, Local::now().date_naive())
    }

    /// Assemble a post with an explicit date prefix.
    ///
    /// Writes `<posts_dir>/<date>-<slug>.md` and copies every image to
    /// `<images_dir>/<slug>/`.
    #[instrument(skip_all, fields(images = images.len(), %date))]
    pub fn build_dated(
        &self,
        captions: &CaptionSet,
        draft: &str,
        images: &[MediaItem],
        date: NaiveDate,
    ) -> Result<PublishedPost> {
        let draft = strip_front_matter(draft);
        let title = extract_title(&draft);
        let slug = make_slug(&title, images.first().map(|i| i.id.as_str()));

        let image_paths = self.copy_images(images, &slug)?;
        let web_paths: Vec<String> = image_paths
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .map(|name| format!("{}/{slug}/{name}", self.web_image_prefix))
            .collect();

        let body = inject_images(&draft, &web_paths, captions);
        let body = if self.gallery && !web_paths.is_empty() {
            format!("{}\n\n---\n\n{}", gallery_block(&web_paths, captions), body.trim())
        } else {
            body
        };
        let markdown = render_post(&title, &body);

        std::fs::create_dir_all(&self.posts_dir)
            .map_err(|e| PhotoblogError::io(&self.posts_dir, e))?;
        let path = self
            .posts_dir
            .join(format!("{}-{slug}.md", date.format("%Y-%m-%d")));
        write_atomic(&path, &markdown)?;

        info!(path = %path.display(), %slug, "post assembled");
        Ok(PublishedPost {
            path,
            slug,
            title,
            image_paths,
        })
    }

    /// Copy fetched images into the post's image directory.
    fn copy_images(&self, images: &[MediaItem], slug: &str) -> Result<Vec<PathBuf>> {
        let target_dir = self.images_dir.join(slug);
        std::fs::create_dir_all(&target_dir).map_err(|e| PhotoblogError::io(&target_dir, e))?;

        let mut copied = Vec::with_capacity(images.len());
        for item in images {
            let src = item.require_local_path()?;
            let name = src
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(item.display_name.as_str());
            let dst = target_dir.join(sanitize_file_name(name));

            std::fs::copy(src, &dst).map_err(|e| PhotoblogError::io(&dst, e))?;
            debug!(from = %src.display(), to = %dst.display(), "copied image");
            copied.push(dst);
        }
        Ok(copied)
    }
}

// ---------------------------------------------------------------------------
// Text transforms
// ---------------------------------------------------------------------------

/// Drop a leading `---`-delimited front-matter block, if any.
pub fn strip_front_matter(text: &str) -> String {
    let trimmed = text.trim_start();
    let Some(rest) = trimmed.strip_prefix("---") else {
        return text.to_string();
    };
    if !rest.starts_with(['\n', '\r']) {
        return text.to_string();
    }

    let mut offset = 0;
    for line in rest.split_inclusive('\n').skip(1) {
        offset += line.len();
        if line.trim_end() == "---" {
            let first_line = rest.find('\n').map_or(rest.len(), |i| i + 1);
            return rest[first_line + offset..].trim_start().to_string();
        }
    }
    // Unterminated block: leave the text alone.
    text.to_string()
}

/// Replace every `[[IMAGE_n]]` token.
///
/// Tokens `1..=N` become links to the N supplied paths; every other token is
/// removed together with any `![alt](...)` wrapped around it. A token already inside a link target (`![alt]([[IMAGE_1]])`)
/// becomes the bare path, anywhere else it becomes a full image reference.
pub fn inject_images(text: &str, web_paths: &[String], captions: &CaptionSet) -> String {
    let in_range = |caps: &regex::Captures<'_>| -> Option<usize> {
        let index: usize = caps[1].parse().unwrap_or(0);
        (index >= 1 && index <= web_paths.len().min(MAX_BATCH_SIZE)).then_some(index)
    };

    // An unused index drops the whole reference, not just its target.
    let links = IMAGE_LINK_TOKEN_RE.replace_all(text, |caps: &regex::Captures<'_>| {
        match in_range(caps) {
            Some(_) => caps[0].to_string(),
            None => String::new(),
        }
    });

    let replaced = IMAGE_TOKEN_RE.replace_all(&links, |caps: &regex::Captures<'_>| {
        let Some(index) = in_range(caps) else {
            return String::new();
        };
        let path = &web_paths[index - 1];

        let start = caps.get(0).map_or(0, |m| m.start());
        if links[..start].ends_with('(') {
            path.clone()
        } else {
            format!("![{}]({path})", alt_text(captions, index))
        }
    });

    ADJACENT_IMAGES_RE
        .replace_all(&replaced, ")\n\n![")
        .into_owned()
}

fn alt_text(captions: &CaptionSet, index: usize) -> String {
    captions
        .get(index as u32)
        .and_then(|c| c.summary.as_deref())
        .map(|s| s.replace(['[', ']'], ""))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| format!("photo {index}"))
}

/// One image line per path, alt text from the caption summary.
fn gallery_block(web_paths: &[String], captions: &CaptionSet) -> String {
    web_paths
        .iter()
        .enumerate()
        .map(|(i, path)| format!("![{}]({path})", alt_text(captions, i + 1)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Front matter plus body.
fn render_post(title: &str, body: &str) -> String {
    let mut md = String::new();
    md.push_str("---\n");
    md.push_str(&format!("title: \"{}\"\n", escape_yaml_string(title)));
    md.push_str("layout: post\n");
    md.push_str("categories: [blog]\n");
    md.push_str("---\n\n");
    md.push_str(body.trim());
    md.push('\n');
    md
}

/// Escape a string for a double-quoted YAML scalar.
fn escape_yaml_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Write to a temp file in the same directory, then rename over the target.
pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PhotoblogError::validation(format!("invalid path: {}", path.display())))?;
    let temp = path.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&temp, content).map_err(|e| PhotoblogError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| PhotoblogError::io(path, e))?;
    debug!(path = %path.display(), size = content.len(), "wrote file");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
