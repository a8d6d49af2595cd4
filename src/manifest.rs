//! `gzh.yml` manifest
//!
//! Written into the base target directory after a successful listing, the
//! manifest marks a directory as managed by this tool. Its presence gates
//! update mode; a non-empty directory without one is rejected before any
//! network call. The repository list drives orphan cleanup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::{PlatformKind, RepositoryRecord};
use crate::strategy::Strategy;

pub const MANIFEST_FILE: &str = "gzh.yml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub provider: PlatformKind,
    pub organization: String,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub default_strategy: Option<Strategy>,
    #[serde(default)]
    pub sync_mode: ManifestSyncMode,
    #[serde(default)]
    pub repositories: Vec<ManifestRepo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestSyncMode {
    #[serde(default)]
    pub cleanup_orphans: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRepo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
}

impl Manifest {
    pub fn new(
        provider: PlatformKind,
        organization: &str,
        default_strategy: Option<Strategy>,
        cleanup_orphans: bool,
        records: &[RepositoryRecord],
    ) -> Self {
        Self {
            version: "1.0".to_string(),
            provider,
            organization: organization.to_string(),
            generated_at: Utc::now(),
            default_strategy,
            sync_mode: ManifestSyncMode { cleanup_orphans },
            repositories: records
                .iter()
                .map(|r| ManifestRepo {
                    name: r.name.clone(),
                    default_branch: r.default_branch.clone(),
                })
                .collect(),
        }
    }

    pub fn path_in(base: &Path) -> PathBuf {
        base.join(MANIFEST_FILE)
    }

    pub fn exists_in(base: &Path) -> bool {
        Self::path_in(base).is_file()
    }

    pub fn load(base: &Path) -> Result<Self> {
        let path = Self::path_in(base);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        let manifest: Manifest = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))?;
        Ok(manifest)
    }

    /// Write the manifest via temp file + rename so a crash never leaves a
    /// truncated `gzh.yml` gating future runs.
    pub fn save(&self, base: &Path) -> Result<()> {
        let path = Self::path_in(base);
        let content =
            serde_yaml::to_string(self).context("Failed to serialize manifest")?;
        let tmp = path.with_extension("yml.tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write manifest: {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace manifest: {}", path.display()))?;
        Ok(())
    }

    /// Repository names currently tracked, used as the cleanup keep-set.
    pub fn repo_names(&self) -> HashSet<String> {
        self.repositories.iter().map(|r| r.name.clone()).collect()
    }
}
