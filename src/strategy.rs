//! Sync strategies and their executor
//!
//! A [`CloneTask`] pairs one repository with a resolved target path and a
//! strategy. The executor maps the pair to a git operation sequence and
//! always returns a [`TaskResult`]; per-task failures never escape as
//! errors, they become Failed/Conflict results.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::conflict::{self, ConflictPolicy, Resolution};
use crate::git::{GitClient, GitError};
use crate::provider::{Protocol, RepositoryRecord};

/// How an individual repository is synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Fetch and hard-reset to the remote ref; local divergence handled by
    /// the conflict policy.
    #[default]
    Reset,
    /// Fetch and fast-forward pull.
    Pull,
    /// Fetch only; the worktree is never touched.
    Fetch,
    /// Fetch and rebase local commits onto the remote.
    Rebase,
    /// Always produce a pristine clone, replacing whatever is at the target.
    Clone,
    /// Clone if absent, otherwise leave the target completely alone.
    Skip,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Reset => "reset",
            Strategy::Pull => "pull",
            Strategy::Fetch => "fetch",
            Strategy::Rebase => "rebase",
            Strategy::Clone => "clone",
            Strategy::Skip => "skip",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reset" => Ok(Strategy::Reset),
            "pull" => Ok(Strategy::Pull),
            "fetch" => Ok(Strategy::Fetch),
            "rebase" => Ok(Strategy::Rebase),
            "clone" => Ok(Strategy::Clone),
            "skip" => Ok(Strategy::Skip),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

/// One unit of work: immutable once created, unique target path per run.
#[derive(Debug, Clone)]
pub struct CloneTask {
    pub record: RepositoryRecord,
    pub target_path: PathBuf,
    pub strategy: Strategy,
    pub branch: Option<String>,
    pub depth: Option<u32>,
    pub bare: bool,
    pub protocol: Protocol,
}

impl CloneTask {
    pub fn key(&self) -> String {
        self.record.key()
    }

    pub fn clone_url(&self) -> &str {
        self.record.clone_url(self.protocol)
    }
}

/// Terminal task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Success,
    Skipped,
    Failed,
    Conflict,
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    GitOperation,
    TimedOut,
    Io,
    RemoteMismatch,
    Auth,
    Network,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Permanent failures are not re-enqueued on resume.
    pub fn is_permanent(&self) -> bool {
        matches!(self.kind, TaskErrorKind::Auth | TaskErrorKind::RemoteMismatch)
    }
}

impl From<GitError> for ErrorDetail {
    fn from(e: GitError) -> Self {
        let kind = match &e {
            GitError::Command { .. } => TaskErrorKind::GitOperation,
            GitError::Spawn(_) => TaskErrorKind::Io,
        };
        ErrorDetail::new(kind, e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub key: String,
    pub path: PathBuf,
    pub status: TaskStatus,
    pub error: Option<ErrorDetail>,
    pub reason: Option<String>,
    pub duration: Duration,
}

impl TaskResult {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, TaskStatus::Failed | TaskStatus::Conflict)
    }
}

enum Outcome {
    Done(Option<String>),
    Skipped(String),
    Conflict(String),
}

/// Executes one task's git sequence under the configured conflict policy.
#[derive(Debug, Clone)]
pub struct StrategyExecutor {
    git: GitClient,
    policy: ConflictPolicy,
}

impl StrategyExecutor {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            git: GitClient::new(),
            policy,
        }
    }

    /// Run one task to a terminal result. Never returns Err; every failure
    /// path is a Failed or Conflict result.
    pub async fn execute(&self, task: &CloneTask) -> TaskResult {
        let start = Instant::now();
        let outcome = self.run(task).await;
        let duration = start.elapsed();

        match outcome {
            Ok(Outcome::Done(reason)) => {
                info!(repo = %task.key(), strategy = %task.strategy, ?duration, "sync complete");
                TaskResult {
                    key: task.key(),
                    path: task.target_path.clone(),
                    status: TaskStatus::Success,
                    error: None,
                    reason,
                    duration,
                }
            }
            Ok(Outcome::Skipped(reason)) => {
                info!(repo = %task.key(), %reason, "skipped");
                TaskResult {
                    key: task.key(),
                    path: task.target_path.clone(),
                    status: TaskStatus::Skipped,
                    error: None,
                    reason: Some(reason),
                    duration,
                }
            }
            Ok(Outcome::Conflict(reason)) => {
                warn!(repo = %task.key(), path = %task.target_path.display(), %reason, "conflict");
                TaskResult {
                    key: task.key(),
                    path: task.target_path.clone(),
                    status: TaskStatus::Conflict,
                    error: None,
                    reason: Some(reason),
                    duration,
                }
            }
            Err(error) => {
                warn!(repo = %task.key(), error = %error.message, "sync failed");
                TaskResult {
                    key: task.key(),
                    path: task.target_path.clone(),
                    status: TaskStatus::Failed,
                    error: Some(error),
                    reason: None,
                    duration,
                }
            }
        }
    }

    async fn run(&self, task: &CloneTask) -> Result<Outcome, ErrorDetail> {
        let exists = task.target_path.exists();

        match task.strategy {
            Strategy::Clone => {
                if exists {
                    tokio::fs::remove_dir_all(&task.target_path)
                        .await
                        .map_err(|e| {
                            ErrorDetail::new(
                                TaskErrorKind::Io,
                                format!("failed to remove existing target: {e}"),
                            )
                        })?;
                }
                self.clone_fresh(task).await?;
                Ok(Outcome::Done(Some("cloned".to_string())))
            }
            Strategy::Skip => {
                if exists {
                    Ok(Outcome::Skipped("target already exists".to_string()))
                } else {
                    self.clone_fresh(task).await?;
                    Ok(Outcome::Done(Some("cloned".to_string())))
                }
            }
            Strategy::Reset | Strategy::Pull | Strategy::Fetch | Strategy::Rebase => {
                if !exists {
                    self.clone_fresh(task).await?;
                    return Ok(Outcome::Done(Some("cloned".to_string())));
                }
                self.update_existing(task).await
            }
        }
    }

    async fn clone_fresh(&self, task: &CloneTask) -> Result<(), ErrorDetail> {
        if let Some(parent) = task.target_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ErrorDetail::new(TaskErrorKind::Io, format!("failed to create parent dir: {e}"))
            })?;
        }
        self.git
            .clone(
                task.clone_url(),
                &task.target_path,
                task.branch.as_deref(),
                task.depth,
                task.bare,
            )
            .await?;
        Ok(())
    }

    async fn update_existing(&self, task: &CloneTask) -> Result<Outcome, ErrorDetail> {
        if !self.git.is_git_repo(&task.target_path).await {
            return Ok(Outcome::Skipped(
                "existing path is not a git repository".to_string(),
            ));
        }

        // An existing clone pointing somewhere else is never updated.
        match self.git.remote_matches(&task.target_path, task.clone_url()).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(ErrorDetail::new(
                    TaskErrorKind::RemoteMismatch,
                    format!(
                        "origin URL does not match {} at {}",
                        task.clone_url(),
                        task.target_path.display()
                    ),
                ));
            }
            Err(e) => {
                return Err(ErrorDetail::new(TaskErrorKind::GitOperation, e.to_string()));
            }
        }

        if task.strategy == Strategy::Fetch {
            self.git.fetch(&task.target_path).await?;
            return Ok(Outcome::Done(Some("fetched".to_string())));
        }

        // Policy decision comes before any network traffic: dirty files and
        // unpushed commits are visible against the last-known remote ref,
        // and local-preserve leaves the repository alone without fetching.
        let upstream = match &task.branch {
            Some(branch) => format!("origin/{branch}"),
            None => self.git.upstream_ref(&task.target_path).await?,
        };
        let state = self.git.worktree_state(&task.target_path, &upstream).await?;

        match conflict::resolve(self.policy, &state) {
            Resolution::Preserve => Ok(Outcome::Skipped("local changes preserved".to_string())),
            Resolution::Apply => {
                self.git.fetch(&task.target_path).await?;
                self.apply(task, &upstream).await
            }
            Resolution::Overwrite => {
                self.git.fetch(&task.target_path).await?;
                self.git.reset_hard(&task.target_path, &upstream).await?;
                Ok(Outcome::Done(Some("local changes overwritten".to_string())))
            }
            Resolution::Rebase => {
                self.git.fetch(&task.target_path).await?;
                self.try_rebase(task, &upstream).await
            }
            Resolution::Predict => {
                self.git.fetch(&task.target_path).await?;
                if self
                    .git
                    .predict_merge_conflict(&task.target_path, &upstream)
                    .await?
                {
                    Ok(Outcome::Skipped("conflict predicted".to_string()))
                } else {
                    self.apply(task, &upstream).await
                }
            }
        }
    }

    async fn apply(&self, task: &CloneTask, upstream: &str) -> Result<Outcome, ErrorDetail> {
        match task.strategy {
            Strategy::Reset => {
                self.git.reset_hard(&task.target_path, upstream).await?;
                Ok(Outcome::Done(None))
            }
            Strategy::Pull => match self.git.pull(&task.target_path).await {
                Ok(()) => Ok(Outcome::Done(None)),
                Err(e) if e.is_conflict() => Ok(Outcome::Conflict(e.to_string())),
                Err(e) => Err(e.into()),
            },
            Strategy::Rebase => self.try_rebase(task, upstream).await,
            // Clone, Skip and Fetch never reach here.
            _ => Ok(Outcome::Done(None)),
        }
    }

    /// A conflicted rebase is deliberately left mid-rebase so the user can
    /// resolve or abort it; a clean rebase is a plain success.
    async fn try_rebase(&self, task: &CloneTask, upstream: &str) -> Result<Outcome, ErrorDetail> {
        match self.git.rebase(&task.target_path, upstream).await {
            Ok(()) => Ok(Outcome::Done(None)),
            Err(e) if e.is_conflict() => Ok(Outcome::Conflict(format!(
                "rebase stopped on conflict at {}",
                task.target_path.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }
}
