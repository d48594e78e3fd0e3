//! Application configuration for Photoblog.
//!
//! User config lives at `~/.photoblog/photoblog.toml` (or wherever `--config`
//! points). The loaded [`AppConfig`] is immutable: it is built once at startup
//! and passed by reference to every component constructor.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PhotoblogError, Result};
use crate::types::MAX_BATCH_SIZE;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "photoblog.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".photoblog";

/// The only generation provider this build talks to.
pub const SUPPORTED_PROVIDER: &str = "gemini";

// ---------------------------------------------------------------------------
// Config structs (matching photoblog.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generation provider settings.
    #[serde(default)]
    pub ai: AiConfig,

    /// Where new photos come from.
    #[serde(default)]
    pub source: SourceConfig,

    /// Blog repository layout.
    #[serde(default)]
    pub blog: BlogConfig,

    /// Batch selection and local state.
    #[serde(default)]
    pub pipeline: BatchConfig,

    /// Git publishing.
    #[serde(default)]
    pub git: GitConfig,

    /// Downscaling of fetched photos before captioning.
    #[serde(default)]
    pub image_resize: ImageResizeConfig,
}

/// `[ai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Provider name. Only `gemini` is supported.
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Vision-capable model used for captions.
    #[serde(default = "default_model")]
    pub vision_model: String,

    /// Text model used for drafting and rewriting.
    #[serde(default = "default_model")]
    pub text_model: String,

    /// Generate dummy captions and drafts without calling the provider.
    #[serde(default)]
    pub mock_mode: bool,

    /// Env vars checked, in order, for the API key (never store the key itself).
    #[serde(default = "default_api_key_envs")]
    pub api_key_envs: Vec<String>,

    /// Provider endpoint root.
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,

    /// Directory holding the instruction templates. Relative paths are
    /// resolved against `blog.repo_dir`.
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Run the second-pass tone rewrite after drafting.
    #[serde(default)]
    pub rewrite_tone: bool,

    /// Free-text style guidance passed to the tone rewrite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_note: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            vision_model: default_model(),
            text_model: default_model(),
            mock_mode: false,
            api_key_envs: default_api_key_envs(),
            base_url: default_ai_base_url(),
            prompts_dir: default_prompts_dir(),
            timeout_secs: default_timeout_secs(),
            rewrite_tone: false,
            style_note: None,
        }
    }
}

fn default_provider() -> String {
    SUPPORTED_PROVIDER.into()
}
fn default_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_api_key_envs() -> Vec<String> {
    vec!["GEMINI_API_KEY".into(), "AI_API_KEY".into()]
}
fn default_ai_base_url() -> String {
    "https://generativelanguage.googleapis.com".into()
}
fn default_prompts_dir() -> String {
    "prompts".into()
}
fn default_timeout_secs() -> u64 {
    120
}

/// Kind of media source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Google Drive folder.
    #[default]
    Drive,
    /// Local directory (offline use).
    Local,
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,

    /// Drive folder watched for new photos (required for `drive`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_folder_id: Option<String>,

    /// Drive folder whose newest Google Doc becomes the context note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_text_folder_id: Option<String>,

    /// Name of the env var holding a Drive OAuth access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Drive API root.
    #[serde(default = "default_drive_base_url")]
    pub base_url: String,

    /// Directory scanned for photos (required for `local`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_dir: Option<String>,

    /// Directory whose newest `.txt` file becomes the context note (`local` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_dir: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            input_folder_id: None,
            input_text_folder_id: None,
            token_env: default_token_env(),
            base_url: default_drive_base_url(),
            local_dir: None,
            notes_dir: None,
        }
    }
}

fn default_token_env() -> String {
    "GOOGLE_DRIVE_TOKEN".into()
}
fn default_drive_base_url() -> String {
    "https://www.googleapis.com".into()
}

/// `[blog]` section. Paths are relative to `repo_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlogConfig {
    /// Root of the blog's git checkout.
    #[serde(default = "default_repo_dir")]
    pub repo_dir: String,

    #[serde(default = "default_posts_path")]
    pub posts_path: String,

    #[serde(default = "default_images_path")]
    pub images_path: String,

    /// Prefix used for image links inside posts.
    #[serde(default = "default_images_path")]
    pub web_image_prefix: String,

    /// Post index read by the blog front page.
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,

    /// Prepend an image gallery above the post body.
    #[serde(default)]
    pub gallery: bool,
}

impl Default for BlogConfig {
    fn default() -> Self {
        Self {
            repo_dir: default_repo_dir(),
            posts_path: default_posts_path(),
            images_path: default_images_path(),
            web_image_prefix: default_images_path(),
            manifest_file: default_manifest_file(),
            gallery: false,
        }
    }
}

fn default_repo_dir() -> String {
    ".".into()
}
fn default_posts_path() -> String {
    "blog/posts".into()
}
fn default_images_path() -> String {
    "blog/assets/images".into()
}
fn default_manifest_file() -> String {
    "posts.json".into()
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Photos per post (1..=4).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Download directory for fetched photos, relative to `blog.images_path`.
    #[serde(default = "default_incoming_dir")]
    pub incoming_dir: String,

    /// Processed-set database.
    #[serde(default = "default_state_db")]
    pub state_db: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            incoming_dir: default_incoming_dir(),
            state_db: default_state_db(),
        }
    }
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}
fn default_incoming_dir() -> String {
    "incoming".into()
}
fn default_state_db() -> String {
    "~/.photoblog/state.db".into()
}

/// `[git]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Commit and push after assembling. When false, posts are written and
    /// items recorded, but nothing is committed.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_remote")]
    pub remote: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Commit message; `{slug}` is replaced with the post slug.
    #[serde(default = "default_commit_template")]
    pub commit_message_template: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            remote: default_remote(),
            branch: default_branch(),
            commit_message_template: default_commit_template(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_remote() -> String {
    "origin".into()
}
fn default_branch() -> String {
    "main".into()
}
fn default_commit_template() -> String {
    "chore: publish {slug}".into()
}

/// `[image_resize]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResizeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_dimension")]
    pub max_width: u32,

    #[serde(default = "default_max_dimension")]
    pub max_height: u32,

    /// JPEG quality, 1..=100. Other formats are re-encoded losslessly.
    #[serde(default = "default_jpeg_quality")]
    pub quality: u8,
}

impl Default for ImageResizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_width: default_max_dimension(),
            max_height: default_max_dimension(),
            quality: default_jpeg_quality(),
        }
    }
}

fn default_max_dimension() -> u32 {
    1024
}
fn default_jpeg_quality() -> u8 {
    85
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Check cross-field constraints. Runs before any network call.
    pub fn validate(&self) -> Result<()> {
        if !self.ai.provider.eq_ignore_ascii_case(SUPPORTED_PROVIDER) {
            return Err(PhotoblogError::config(format!(
                "unsupported provider '{}': only '{SUPPORTED_PROVIDER}' is available",
                self.ai.provider
            )));
        }

        if !(1..=MAX_BATCH_SIZE).contains(&self.pipeline.batch_size) {
            return Err(PhotoblogError::config(format!(
                "pipeline.batch_size must be between 1 and {MAX_BATCH_SIZE} (got {})",
                self.pipeline.batch_size
            )));
        }

        match self.source.kind {
            SourceKind::Drive => {
                if self
                    .source
                    .input_folder_id
                    .as_deref()
                    .is_none_or(|id| id.trim().is_empty())
                {
                    return Err(PhotoblogError::config("source.input_folder_id is required"));
                }
            }
            SourceKind::Local => {
                if self.source.local_dir.is_none() {
                    return Err(PhotoblogError::config(
                        "source.local_dir is required when source.kind = \"local\"",
                    ));
                }
            }
        }

        let resize = &self.image_resize;
        if resize.enabled {
            if resize.max_width == 0 || resize.max_height == 0 {
                return Err(PhotoblogError::config(
                    "image_resize.max_width and max_height must be positive",
                ));
            }
            if !(1..=100).contains(&resize.quality) {
                return Err(PhotoblogError::config(format!(
                    "image_resize.quality must be between 1 and 100 (got {})",
                    resize.quality
                )));
            }
        }

        if self.git.commit_message_template.trim().is_empty() {
            return Err(PhotoblogError::config(
                "git.commit_message_template must not be empty",
            ));
        }

        Ok(())
    }

    /// Absolute blog repository root.
    pub fn repo_dir(&self) -> PathBuf {
        expand_path(&self.blog.repo_dir)
    }

    /// Directory where posts are written.
    pub fn posts_dir(&self) -> PathBuf {
        self.repo_dir().join(&self.blog.posts_path)
    }

    /// Directory where post images are copied.
    pub fn images_dir(&self) -> PathBuf {
        self.repo_dir().join(&self.blog.images_path)
    }

    /// Download directory for fetched photos.
    pub fn incoming_dir(&self) -> PathBuf {
        self.images_dir().join(&self.pipeline.incoming_dir)
    }

    /// Path of the post index file.
    pub fn manifest_path(&self) -> PathBuf {
        self.repo_dir().join(&self.blog.manifest_file)
    }

    /// Prompt template directory. A relative `ai.prompts_dir` is resolved
    /// against the blog repo, so scheduled runs do not depend on the cwd.
    pub fn prompts_dir(&self) -> PathBuf {
        let dir = expand_path(&self.ai.prompts_dir);
        if dir.is_absolute() {
            dir
        } else {
            self.repo_dir().join(dir)
        }
    }

    /// Path of the processed-set database.
    pub fn state_db_path(&self) -> PathBuf {
        expand_path(&self.pipeline.state_db)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.photoblog/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PhotoblogError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.photoblog/photoblog.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PhotoblogError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        PhotoblogError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PhotoblogError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PhotoblogError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PhotoblogError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the provider API key from the first configured env var that is set.
pub fn resolve_api_key(ai: &AiConfig) -> Result<String> {
    ai.api_key_envs
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
        .ok_or_else(|| {
            PhotoblogError::config(format!(
                "Missing API key: set {} (or set ai.mock_mode = true)",
                ai.api_key_envs.join(" or ")
            ))
        })
}

/// Read the Drive access token from its env var.
pub fn resolve_drive_token(source: &SourceConfig) -> Result<String> {
    match std::env::var(&source.token_env) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(PhotoblogError::config(format!(
            "Drive access token not found. Set the {} environment variable.",
            source.token_env
        ))),
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_path(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.source.input_folder_id = Some("folder-123".into());
        config
    }

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("vision_model"));
        assert!(toml_str.contains("GEMINI_API_KEY"));
        assert!(toml_str.contains("chore: publish {slug}"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.pipeline.batch_size, 4);
        assert_eq!(parsed.ai.provider, "gemini");
        assert_eq!(parsed.blog.posts_path, "blog/posts");
    }

    #[test]
    fn partial_config_uses_defaults() {
        let toml_str = r#"
[ai]
mock_mode = true
rewrite_tone = true
style_note = "warm, short sentences"

[source]
kind = "local"
local_dir = "/tmp/photos"

[pipeline]
batch_size = 2
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert!(config.ai.mock_mode);
        assert_eq!(config.ai.style_note.as_deref(), Some("warm, short sentences"));
        assert_eq!(config.source.kind, SourceKind::Local);
        assert_eq!(config.pipeline.batch_size, 2);
        assert_eq!(config.git.branch, "main");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_requires_folder_id_for_drive() {
        let err = AppConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("input_folder_id"));
        assert!(drive_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_other_providers() {
        let mut config = drive_config();
        config.ai.provider = "openai".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unsupported provider"));
    }

    #[test]
    fn validate_bounds_batch_size() {
        let mut config = drive_config();
        config.pipeline.batch_size = 0;
        assert!(config.validate().is_err());
        config.pipeline.batch_size = 5;
        assert!(config.validate().is_err());
        config.pipeline.batch_size = 4;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn derived_paths_follow_repo_dir() {
        let mut config = drive_config();
        config.blog.repo_dir = "/srv/blog".into();
        assert_eq!(config.posts_dir(), PathBuf::from("/srv/blog/blog/posts"));
        assert_eq!(
            config.incoming_dir(),
            PathBuf::from("/srv/blog/blog/assets/images/incoming")
        );
        assert_eq!(config.manifest_path(), PathBuf::from("/srv/blog/posts.json"));
    }

    #[test]
    fn relative_prompts_dir_follows_repo_dir() {
        let mut config = drive_config();
        config.blog.repo_dir = "/srv/blog".into();
        assert_eq!(config.prompts_dir(), PathBuf::from("/srv/blog/prompts"));

        config.ai.prompts_dir = "/etc/photoblog/prompts".into();
        assert_eq!(config.prompts_dir(), PathBuf::from("/etc/photoblog/prompts"));
    }

    #[test]
    fn image_resize_defaults_and_bounds() {
        let config: AppConfig = toml::from_str("[image_resize]\nmax_width = 640\n").unwrap();
        assert_eq!(config.image_resize.max_width, 640);
        assert_eq!(config.image_resize.max_height, 1024);
        assert_eq!(config.image_resize.quality, 85);
        assert!(config.image_resize.enabled);

        let mut config = drive_config();
        config.image_resize.quality = 0;
        assert!(config.validate().is_err());
        config.image_resize.enabled = false;
        assert!(config.validate().is_ok());
        config.image_resize.enabled = true;
        config.image_resize.quality = 85;
        config.image_resize.max_height = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn api_key_resolution() {
        let mut ai = AiConfig::default();
        // Use unique env var names to avoid interfering with other tests
        ai.api_key_envs = vec!["PB_TEST_NONEXISTENT_KEY_12345".into()];
        let err = resolve_api_key(&ai).unwrap_err();
        assert!(err.to_string().contains("Missing API key"));
        assert_eq!(err.kind(), "ConfigError");

        ai.api_key_envs.push("PATH".into());
        assert!(resolve_api_key(&ai).is_ok());
    }
}
