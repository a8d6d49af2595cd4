//! Conflict resolution policies
//!
//! When an update-class strategy finds local state diverging from the remote
//! (uncommitted changes or unpushed commits), the configured policy decides
//! what happens. The decision itself is pure; the strategy executor carries
//! it out.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::git::WorktreeState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Discard local divergence and match the remote exactly.
    #[default]
    RemoteOverwrite,
    /// Leave a diverged repository untouched and mark it Skipped.
    LocalPreserve,
    /// Rebase local commits onto the remote; a conflicted rebase is left
    /// mid-flight and reported as Conflict.
    RebaseAttempt,
    /// Predict the merge without touching the worktree; a predicted conflict
    /// leaves the repository untouched and is reported as Skipped.
    ConflictSkip,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::RemoteOverwrite => "remote-overwrite",
            ConflictPolicy::LocalPreserve => "local-preserve",
            ConflictPolicy::RebaseAttempt => "rebase-attempt",
            ConflictPolicy::ConflictSkip => "conflict-skip",
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "remote-overwrite" => Ok(ConflictPolicy::RemoteOverwrite),
            "local-preserve" => Ok(ConflictPolicy::LocalPreserve),
            "rebase-attempt" => Ok(ConflictPolicy::RebaseAttempt),
            "conflict-skip" => Ok(ConflictPolicy::ConflictSkip),
            other => Err(format!("unknown conflict policy: {other}")),
        }
    }
}

/// What the executor should do for one diverged-or-not repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No divergence: apply the strategy as-is.
    Apply,
    /// Force the worktree to the remote state, discarding local work.
    Overwrite,
    /// Leave the repository untouched; report Skipped.
    Preserve,
    /// Rebase local commits onto the remote.
    Rebase,
    /// Run the conflict prediction dry-run before deciding.
    Predict,
}

/// Decide the action for a repository given its worktree state.
pub fn resolve(policy: ConflictPolicy, state: &WorktreeState) -> Resolution {
    if !state.has_local_divergence() {
        return Resolution::Apply;
    }
    match policy {
        ConflictPolicy::RemoteOverwrite => Resolution::Overwrite,
        ConflictPolicy::LocalPreserve => Resolution::Preserve,
        ConflictPolicy::RebaseAttempt => Resolution::Rebase,
        ConflictPolicy::ConflictSkip => Resolution::Predict,
    }
}
