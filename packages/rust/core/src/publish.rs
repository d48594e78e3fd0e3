//! Publishing the blog repo.
//!
//! [`GitPublisher`] shells out to `git` in the blog repository. A pre-flight
//! check refuses to publish when credential files are tracked.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use photoblog_shared::{GitConfig, PhotoblogError, Result};

/// Files that must never be committed to the blog repo.
pub const SECRET_FILES: &[&str] = &["client_secret.json", "token.json", ".env"];

/// Placeholder replaced by the post slug in commit message templates.
pub const SLUG_PLACEHOLDER: &str = "{slug}";

#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    /// Checks that run before any generation work is spent.
    async fn preflight(&self) -> Result<()>;

    /// Commit everything and push.
    async fn publish(&self, message: &str) -> Result<()>;
}

/// Render a commit message from `template`.
pub fn commit_message(template: &str, slug: &str) -> String {
    template.replace(SLUG_PLACEHOLDER, slug)
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GitPublisher {
    repo_dir: PathBuf,
    remote: String,
    branch: String,
}

impl GitPublisher {
    pub fn new(
        repo_dir: impl Into<PathBuf>,
        remote: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            remote: remote.into(),
            branch: branch.into(),
        }
    }

    pub fn from_config(repo_dir: &Path, git: &GitConfig) -> Self {
        Self::new(repo_dir, &git.remote, &git.branch)
    }

    async fn git(&self, args: &[&str]) -> Result<Output> {
        debug!(?args, "running git");
        Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .await
            .map_err(|e| PhotoblogError::Publish(format!("failed to spawn git: {e}")))
    }

    /// Run git and fail on a non-zero exit status.
    async fn git_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.git(args).await?;
        if !output.status.success() {
            return Err(PhotoblogError::Publish(format!(
                "git {} failed: {}",
                args.join(" "),
                combined_output(&output).trim()
            )));
        }
        Ok(output)
    }
}

#[async_trait]
impl Publisher for GitPublisher {
    fn name(&self) -> &str {
        "git"
    }

    #[instrument(skip_all, fields(repo = %self.repo_dir.display()))]
    async fn preflight(&self) -> Result<()> {
        self.git_checked(&["rev-parse", "--is-inside-work-tree"])
            .await
            .map_err(|_| {
                PhotoblogError::Publish(format!(
                    "not a git repository: {}",
                    self.repo_dir.display()
                ))
            })?;

        for secret in SECRET_FILES {
            let tracked = self
                .git(&["ls-files", "--error-unmatch", secret])
                .await?
                .status
                .success();
            if tracked {
                return Err(PhotoblogError::Publish(format!(
                    "SECURITY BLOCK: {secret} is tracked by git. Remove it from the index \
                     (git rm --cached {secret}) and add it to .gitignore"
                )));
            }
        }

        debug!("git preflight passed");
        Ok(())
    }

    #[instrument(skip_all, fields(remote = %self.remote, branch = %self.branch))]
    async fn publish(&self, message: &str) -> Result<()> {
        self.git_checked(&["add", "-A"]).await?;

        let commit = self.git(&["commit", "-m", message]).await?;
        if !commit.status.success() {
            let text = combined_output(&commit);
            if text.contains("nothing to commit") {
                warn!("nothing to commit, pushing anyway");
            } else {
                return Err(PhotoblogError::Publish(format!(
                    "git commit failed: {}",
                    text.trim()
                )));
            }
        }

        self.git_checked(&["push", &self.remote, &self.branch])
            .await?;
        info!("pushed");
        Ok(())
    }
}

fn combined_output(output: &Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

/// Logs what would be published and touches nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunPublisher;

#[async_trait]
impl Publisher for DryRunPublisher {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn preflight(&self) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, message: &str) -> Result<()> {
        info!(message, "dry run: skipping commit and push");
        Ok(())
    }
}
