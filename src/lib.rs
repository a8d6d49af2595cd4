//! gzh-sync - Multi-Platform Git Organization Synchronization Engine
//!
//! gzh-sync mirrors every repository of an organization or group from
//! GitHub, GitLab, Gitea or Gogs into a local directory tree, updating
//! existing clones with a configurable strategy while protecting local
//! work from careless automated overwrites.
//!
//! ## Core Features
//!
//! - **Multi-Provider Listing**: one trait, four platform adapters, with
//!   exhaustive pagination and shared rate-limit budgets
//! - **Sync Strategies**: reset, pull, fetch, rebase, clone, skip
//! - **Conflict Policies**: remote-overwrite, local-preserve,
//!   rebase-attempt, conflict-skip
//! - **Bounded Concurrency**: separate clone/update/api worker pools with
//!   retry, backoff and cancellation
//! - **Resumable Runs**: append-only checkpoint journal under the target
//!   directory
//! - **Orphan Cleanup**: manifest-driven removal of directories that no
//!   longer exist upstream
//!
//! ## Modules
//!
//! - [`provider`]: platform adapters and the repository record model
//! - [`engine`]: run orchestration from listing to cleanup

pub mod cleanup;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod git;
pub mod manifest;
pub mod provider;
pub mod resolver;
pub mod scheduler;
pub mod state;
pub mod strategy;

pub use config::Config;
pub use engine::{EngineOptions, SyncEngine, SyncSummary};
pub use git::GitClient;
pub use provider::{GitProvider, PlatformKind, RepositoryRecord};
pub use strategy::{CloneTask, Strategy, TaskResult, TaskStatus};
