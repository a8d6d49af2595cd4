use anyhow::{Context, Result};
use std::path::Path;
use thiserror::Error;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Thin async wrapper over the `git` binary.
///
/// Every invocation uses `kill_on_drop` so a task timeout or cancellation
/// that drops the in-flight future also terminates the subprocess.
#[derive(Debug, Clone, Default)]
pub struct GitClient;

/// Worktree state snapshot used for conflict-policy decisions.
#[derive(Debug, Clone, Default)]
pub struct WorktreeState {
    pub has_uncommitted_changes: bool,
    pub ahead: u64,
    pub behind: u64,
    pub current_branch: Option<String>,
    pub remote_url: Option<String>,
}

impl WorktreeState {
    /// Local work the remote does not have: dirty files or unpushed commits.
    pub fn has_local_divergence(&self) -> bool {
        self.has_uncommitted_changes || self.ahead > 0
    }
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git {operation} failed: {stderr}")]
    Command { operation: String, stderr: String },

    #[error("failed to run git: {0}")]
    Spawn(#[from] std::io::Error),
}

impl GitError {
    /// Whether the failure is a merge/rebase content conflict rather than a
    /// transport or usage error.
    pub fn is_conflict(&self) -> bool {
        match self {
            GitError::Command { stderr, .. } => {
                let lower = stderr.to_ascii_lowercase();
                lower.contains("conflict")
                    || lower.contains("needs merge")
                    || lower.contains("could not apply")
            }
            GitError::Spawn(_) => false,
        }
    }
}

impl GitClient {
    pub fn new() -> Self {
        Self
    }

    async fn run_git(&self, args: &[&str], cwd: Option<&Path>) -> Result<String, GitError> {
        let mut cmd = AsyncCommand::new("git");
        cmd.args(args).kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        debug!(?args, cwd = ?cwd, "running git");

        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(GitError::Command {
                operation: args.first().copied().unwrap_or("?").to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub async fn clone(
        &self,
        url: &str,
        target: &Path,
        branch: Option<&str>,
        depth: Option<u32>,
        bare: bool,
    ) -> Result<(), GitError> {
        let depth_arg;
        let target_str = target.to_string_lossy();
        let mut args = vec!["clone"];
        if let Some(branch) = branch {
            args.extend_from_slice(&["--branch", branch]);
        }
        if let Some(depth) = depth {
            depth_arg = depth.to_string();
            args.extend_from_slice(&["--depth", &depth_arg]);
        }
        if bare {
            args.push("--bare");
        }
        args.push(url);
        args.push(&target_str);

        self.run_git(&args, None).await?;
        Ok(())
    }

    pub async fn fetch(&self, path: &Path) -> Result<(), GitError> {
        self.run_git(&["fetch", "--prune", "origin"], Some(path))
            .await?;
        Ok(())
    }

    pub async fn pull(&self, path: &Path) -> Result<(), GitError> {
        self.run_git(&["pull", "--ff-only", "origin"], Some(path))
            .await?;
        Ok(())
    }

    pub async fn reset_hard(&self, path: &Path, upstream: &str) -> Result<(), GitError> {
        self.run_git(&["reset", "--hard", upstream], Some(path))
            .await?;
        Ok(())
    }

    /// Rebase onto the upstream ref. On conflict git stops mid-rebase; the
    /// repository is intentionally left in that state for manual resolution.
    pub async fn rebase(&self, path: &Path, upstream: &str) -> Result<(), GitError> {
        self.run_git(&["rebase", upstream], Some(path)).await?;
        Ok(())
    }

    pub async fn current_branch(&self, path: &Path) -> Result<String, GitError> {
        self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"], Some(path))
            .await
    }

    pub async fn remote_url(&self, path: &Path) -> Result<String, GitError> {
        self.run_git(&["remote", "get-url", "origin"], Some(path))
            .await
    }

    pub async fn is_git_repo(&self, path: &Path) -> bool {
        path.join(".git").exists()
            || self
                .run_git(&["rev-parse", "--git-dir"], Some(path))
                .await
                .is_ok()
    }

    pub async fn has_uncommitted_changes(&self, path: &Path) -> Result<bool, GitError> {
        let status = self.run_git(&["status", "--porcelain"], Some(path)).await?;
        Ok(!status.is_empty())
    }

    /// Commits ahead/behind the upstream ref as `(ahead, behind)`.
    pub async fn ahead_behind(&self, path: &Path, upstream: &str) -> Result<(u64, u64), GitError> {
        let range = format!("HEAD...{upstream}");
        let output = self
            .run_git(&["rev-list", "--left-right", "--count", &range], Some(path))
            .await?;
        let mut parts = output.split_whitespace();
        let ahead = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let behind = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        Ok((ahead, behind))
    }

    /// Snapshot the worktree state relative to the upstream ref. Missing
    /// upstream (fresh repo, no tracking branch) degrades to zero counts.
    pub async fn worktree_state(&self, path: &Path, upstream: &str) -> Result<WorktreeState, GitError> {
        let has_uncommitted_changes = self.has_uncommitted_changes(path).await?;
        let (ahead, behind) = self.ahead_behind(path, upstream).await.unwrap_or((0, 0));
        let current_branch = self.current_branch(path).await.ok();
        let remote_url = self.remote_url(path).await.ok();
        Ok(WorktreeState {
            has_uncommitted_changes,
            ahead,
            behind,
            current_branch,
            remote_url,
        })
    }

    /// Upstream ref for the checked-out branch, e.g. `origin/main`.
    pub async fn upstream_ref(&self, path: &Path) -> Result<String, GitError> {
        let branch = self.current_branch(path).await?;
        Ok(format!("origin/{branch}"))
    }

    /// Predict whether merging the upstream ref would conflict, without
    /// touching the worktree: a three-way `merge-tree` against the merge
    /// base, scanned for conflict markers.
    pub async fn predict_merge_conflict(
        &self,
        path: &Path,
        upstream: &str,
    ) -> Result<bool, GitError> {
        let base = match self
            .run_git(&["merge-base", "HEAD", upstream], Some(path))
            .await
        {
            Ok(base) => base,
            // No common ancestor: any merge would conflict.
            Err(GitError::Command { .. }) => return Ok(true),
            Err(e) => return Err(e),
        };
        let tree = self
            .run_git(&["merge-tree", &base, "HEAD", upstream], Some(path))
            .await?;
        Ok(tree.contains("<<<<<<<") || tree.contains("changed in both"))
    }

    /// Whether the origin URL of an existing clone points at the expected
    /// repository, tolerating protocol and `.git` suffix differences.
    pub async fn remote_matches(&self, path: &Path, expected_url: &str) -> Result<bool> {
        let actual = self
            .remote_url(path)
            .await
            .context("Failed to read origin URL")?;
        Ok(remote_urls_match(&actual, expected_url))
    }
}

/// Compare two clone URLs for repository identity: `https://host/org/repo.git`,
/// `git@host:org/repo.git` and trailing-slash variants all match.
pub fn remote_urls_match(a: &str, b: &str) -> bool {
    normalize_remote_url(a) == normalize_remote_url(b)
}

fn normalize_remote_url(url: &str) -> String {
    let mut u = url.trim().trim_end_matches('/').to_string();
    if let Some(rest) = u.strip_suffix(".git") {
        u = rest.to_string();
    }
    // ssh scp-like form: git@host:org/repo -> host/org/repo
    if let Some(rest) = u.strip_prefix("git@") {
        u = rest.replacen(':', "/", 1);
    } else {
        // strip scheme and optional user@
        for scheme in ["https://", "http://", "ssh://", "git://"] {
            if let Some(rest) = u.strip_prefix(scheme) {
                u = rest.to_string();
                break;
            }
        }
        if let Some(idx) = u.find('@') {
            u = u[idx + 1..].to_string();
        }
    }
    u.to_ascii_lowercase()
}
