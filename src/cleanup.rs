//! Orphan directory cleanup
//!
//! After a full pass, directories under the base target that no longer
//! correspond to an upstream repository are removed. Files, hidden entries
//! and the manifest itself are never touched, and a directory with
//! uncommitted changes is only removed under `--force`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::git::GitClient;

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub retained: Vec<(PathBuf, String)>,
}

pub struct OrphanCleaner {
    git: GitClient,
    force: bool,
}

impl OrphanCleaner {
    pub fn new(force: bool) -> Self {
        Self {
            git: GitClient::new(),
            force,
        }
    }

    /// Remove every orphaned directory under `base` that is not in the
    /// keep-set. Each removal is logged individually.
    pub async fn clean(&self, base: &Path, keep: &HashSet<String>) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        let entries = std::fs::read_dir(base)
            .with_context(|| format!("Failed to read target dir: {}", base.display()))?;

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();

            if !path.is_dir() || name.starts_with('.') || keep.contains(&name) {
                continue;
            }

            if !self.force && self.has_local_work(&path).await {
                warn!(path = %path.display(), "orphan has uncommitted changes, keeping (use --force to remove)");
                report
                    .retained
                    .push((path, "uncommitted changes".to_string()));
                continue;
            }

            tokio::fs::remove_dir_all(&path)
                .await
                .with_context(|| format!("Failed to remove orphan: {}", path.display()))?;
            info!(path = %path.display(), "removed orphan directory");
            report.removed.push(path);
        }

        Ok(report)
    }

    async fn has_local_work(&self, path: &Path) -> bool {
        self.git.is_git_repo(path).await
            && self
                .git
                .has_uncommitted_changes(path)
                .await
                .unwrap_or(true)
    }
}
