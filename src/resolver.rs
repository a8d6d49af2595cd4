//! Target path resolution and base directory validation
//!
//! Path rules are deterministic and independent of the filesystem:
//! no target flag resolves to `./{org}`, a relative target to `./{target}`,
//! an absolute target to itself; each repository lands at `{base}/{repo}`.
//! Validation runs before any network call so a refused directory never
//! costs an API request.

use std::path::{Path, PathBuf};

use path_clean::PathClean;
use thiserror::Error;
use tracing::debug;

use crate::manifest::{Manifest, MANIFEST_FILE};

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("directory validation failed for {path}: {reason}")]
    DirectoryValidation { path: PathBuf, reason: String },

    #[error("failed to inspect {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How the base directory will be treated for this run.
#[derive(Debug)]
pub enum DirectoryMode {
    /// Directory absent or empty; a manifest will be created after listing.
    Fresh,
    /// Managed directory with a valid manifest; its settings seed the run.
    Update(Box<Manifest>),
}

/// Resolve the base target directory from the optional `-t` value.
pub fn resolve_base_target(target: Option<&str>, org: &str) -> PathBuf {
    let raw = match target {
        Some(t) => shellexpand::tilde(t).into_owned(),
        None => format!("./{org}"),
    };
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        // Normalization is limited to absolute paths so relative targets
        // keep their documented `./x` spelling.
        path.clean()
    } else if path.starts_with(".") {
        path
    } else {
        PathBuf::from(".").join(path)
    }
}

/// Resolve the checkout path for one repository under the base directory.
pub fn resolve_repo_path(base: &Path, repo_name: &str) -> PathBuf {
    base.join(repo_name)
}

/// Classify the base directory before any network activity.
///
/// A non-empty directory without a `gzh.yml` manifest is refused: the tool
/// will not adopt a directory it did not populate. Hidden entries do not
/// count toward emptiness so a leftover `.gzh` state directory never blocks
/// a fresh run.
pub fn validate_target_dir(base: &Path) -> Result<DirectoryMode, ResolverError> {
    if !base.exists() {
        debug!(path = %base.display(), "target directory absent, fresh mode");
        return Ok(DirectoryMode::Fresh);
    }

    if !base.is_dir() {
        return Err(ResolverError::DirectoryValidation {
            path: base.to_path_buf(),
            reason: "target exists but is not a directory".to_string(),
        });
    }

    if Manifest::exists_in(base) {
        let manifest = Manifest::load(base).map_err(|e| ResolverError::DirectoryValidation {
            path: base.to_path_buf(),
            reason: format!("invalid {MANIFEST_FILE}: {e}"),
        })?;
        debug!(path = %base.display(), org = %manifest.organization, "manifest found, update mode");
        return Ok(DirectoryMode::Update(Box::new(manifest)));
    }

    let entries = std::fs::read_dir(base).map_err(|source| ResolverError::Io {
        path: base.to_path_buf(),
        source,
    })?;
    let mut visible = 0usize;
    for entry in entries {
        let entry = entry.map_err(|source| ResolverError::Io {
            path: base.to_path_buf(),
            source,
        })?;
        if !entry.file_name().to_string_lossy().starts_with('.') {
            visible += 1;
        }
    }

    if visible == 0 {
        debug!(path = %base.display(), "target directory empty, fresh mode");
        Ok(DirectoryMode::Fresh)
    } else {
        Err(ResolverError::DirectoryValidation {
            path: base.to_path_buf(),
            reason: format!(
                "directory is not empty and has no {MANIFEST_FILE}; refusing to sync into an unmanaged directory"
            ),
        })
    }
}
