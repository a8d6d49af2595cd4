//! Sync engine orchestration
//!
//! One run: for each configured scope, validate the base directory, list the
//! remote repositories, write the manifest, build the task set (filtered by
//! prior checkpoints on resume), drive it through the scheduler, and finally
//! reconcile orphan directories. Per-scope listing failures are isolated;
//! only configuration and directory validation errors abort the run.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::cleanup::OrphanCleaner;
use crate::config::{Config, ScopeConfig};
use crate::manifest::Manifest;
use crate::provider::{
    GitProvider, GiteaProvider, GitHubProvider, GitLabProvider, GogsProvider, PlatformKind,
    RepoFilters, RepositoryRecord, Scope,
};
use crate::resolver::{self, DirectoryMode};
use crate::scheduler::{CancelSignal, RateLimitBudget, Scheduler};
use crate::state::StateStore;
use crate::strategy::{CloneTask, Strategy, StrategyExecutor, TaskResult, TaskStatus};

/// Run-level options coming from the CLI rather than the config file.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub resume: bool,
    pub dry_run: bool,
    pub force: bool,
}

pub type ProviderFactory =
    Box<dyn Fn(&ScopeConfig, Arc<RateLimitBudget>) -> Arc<dyn GitProvider> + Send + Sync>;

fn default_provider_factory(
    scope: &ScopeConfig,
    budget: Arc<RateLimitBudget>,
) -> Arc<dyn GitProvider> {
    let token = scope
        .token
        .clone()
        .or_else(|| std::env::var(scope.provider.token_env_var()).ok());
    let base_url = scope.base_url.clone();
    match scope.provider {
        PlatformKind::GitHub => Arc::new(GitHubProvider::new(base_url, token, budget)),
        PlatformKind::GitLab => Arc::new(GitLabProvider::new(base_url, token, budget)),
        PlatformKind::Gitea => Arc::new(GiteaProvider::new(base_url, token, budget)),
        PlatformKind::Gogs => Arc::new(GogsProvider::new(base_url, token, budget)),
    }
}

/// Aggregate outcome of a run.
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    pub conflict: usize,
    pub interrupted: usize,
    /// Scopes whose listing failed entirely (auth, missing org).
    pub scope_failures: usize,
    pub results: Vec<TaskResult>,
}

impl SyncSummary {
    fn absorb(&mut self, results: Vec<TaskResult>) {
        for result in &results {
            match result.status {
                TaskStatus::Success => self.success += 1,
                TaskStatus::Skipped => self.skipped += 1,
                TaskStatus::Failed => self.failed += 1,
                TaskStatus::Conflict => self.conflict += 1,
                TaskStatus::Interrupted => self.interrupted += 1,
            }
        }
        self.results.extend(results);
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// 0 when everything landed as Success or Skipped, 1 on any partial
    /// failure. Fatal errors never reach a summary; they abort the run.
    pub fn exit_code(&self) -> i32 {
        if self.failed == 0
            && self.conflict == 0
            && self.interrupted == 0
            && self.scope_failures == 0
        {
            0
        } else {
            1
        }
    }
}

pub struct SyncEngine {
    config: Config,
    options: EngineOptions,
    cancel: CancelSignal,
    factory: ProviderFactory,
}

impl SyncEngine {
    pub fn new(config: Config, options: EngineOptions, cancel: CancelSignal) -> Self {
        Self {
            config,
            options,
            cancel,
            factory: Box::new(default_provider_factory),
        }
    }

    /// Replace the provider construction, used by tests to point scopes at
    /// local fixtures.
    pub fn with_provider_factory(mut self, factory: ProviderFactory) -> Self {
        self.factory = factory;
        self
    }

    pub async fn run(&self) -> Result<SyncSummary> {
        let scheduler = Scheduler::new(self.config.scheduler_config(), self.cancel.clone());
        let mut summary = SyncSummary::default();

        for scope in &self.config.scopes {
            if self.cancel.is_cancelled() {
                warn!(org = %scope.org, "cancelled before scope started");
                break;
            }
            self.run_scope(scope, &scheduler, &mut summary).await?;
        }

        info!(
            success = summary.success,
            skipped = summary.skipped,
            failed = summary.failed,
            conflict = summary.conflict,
            interrupted = summary.interrupted,
            scope_failures = summary.scope_failures,
            "sync run finished"
        );
        Ok(summary)
    }

    async fn run_scope(
        &self,
        scope: &ScopeConfig,
        scheduler: &Scheduler,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        let base = resolver::resolve_base_target(scope.target.as_deref(), &scope.org);

        // Directory validation happens before any network call; a refused
        // directory is fatal for the whole run.
        let mode = resolver::validate_target_dir(&base)?;
        let prior_manifest = match &mode {
            DirectoryMode::Fresh => None,
            DirectoryMode::Update(manifest) => Some(manifest.as_ref().clone()),
        };

        let strategy = self.effective_strategy(scope, prior_manifest.as_ref());
        let cleanup_orphans = self.config.sync_mode.cleanup_orphans
            || prior_manifest
                .as_ref()
                .is_some_and(|m| m.sync_mode.cleanup_orphans);

        let budget = scheduler.budget_for(scope.provider);
        let provider = (self.factory)(scope, budget);
        let filters = RepoFilters::from_patterns(&scope.include, &scope.exclude, scope.visibility)
            .context("Invalid repository filters")?;
        let list_scope = Scope::new(scope.org.clone());

        let records = match scheduler
            .run_api(|| provider.list_repositories(&list_scope, &filters))
            .await
        {
            Ok(records) => records,
            Err(e) => {
                // A dead scope never stops the others.
                error!(provider = %scope.provider, org = %scope.org, error = %e, "listing failed, skipping scope");
                summary.scope_failures += 1;
                return Ok(());
            }
        };
        info!(provider = %scope.provider, org = %scope.org, count = records.len(), "listed repositories");

        let tasks = self.build_tasks(scope, strategy, &base, &records);

        if self.options.dry_run {
            for task in &tasks {
                info!(repo = %task.key(), strategy = %task.strategy, path = %task.target_path.display(), "would sync");
            }
            info!(org = %scope.org, planned = tasks.len(), "dry run, nothing executed");
            return Ok(());
        }

        std::fs::create_dir_all(&base)
            .with_context(|| format!("Failed to create target dir: {}", base.display()))?;
        let manifest = Manifest::new(
            scope.provider,
            &scope.org,
            Some(strategy),
            cleanup_orphans,
            &records,
        );
        manifest.save(&base)?;

        let mut store = StateStore::open(&base)?;
        if !self.options.resume {
            store.reset()?;
        }
        let before = tasks.len();
        let tasks: Vec<_> = tasks
            .into_iter()
            .filter(|t| store.state().should_enqueue(&t.key()))
            .collect();
        if self.options.resume && tasks.len() < before {
            info!(
                org = %scope.org,
                resumed = tasks.len(),
                already_done = before - tasks.len(),
                "resuming from checkpoint"
            );
        }

        let executor = Arc::new(StrategyExecutor::new(
            self.config.sync_mode.conflict_resolution,
        ));
        let results = scheduler
            .run_tasks_with(tasks, executor, |result| {
                if let Err(e) = store.record(result) {
                    warn!(repo = %result.key, error = %e, "failed to checkpoint result");
                }
            })
            .await;

        let full_pass = !results.iter().any(|r| r.status == TaskStatus::Interrupted);
        summary.absorb(results);

        if cleanup_orphans && full_pass {
            let report = OrphanCleaner::new(self.options.force)
                .clean(&base, &manifest.repo_names())
                .await?;
            if !report.removed.is_empty() || !report.retained.is_empty() {
                info!(
                    removed = report.removed.len(),
                    retained = report.retained.len(),
                    "orphan cleanup finished"
                );
            }
        } else if cleanup_orphans {
            warn!(org = %scope.org, "skipping orphan cleanup after interrupted pass");
        }

        Ok(())
    }

    /// Per-scope strategy wins; otherwise a manifest from a previous run;
    /// otherwise the global default.
    fn effective_strategy(&self, scope: &ScopeConfig, manifest: Option<&Manifest>) -> Strategy {
        scope
            .strategy
            .or_else(|| manifest.and_then(|m| m.default_strategy))
            .unwrap_or(self.config.global.default_strategy)
    }

    fn build_tasks(
        &self,
        scope: &ScopeConfig,
        strategy: Strategy,
        base: &Path,
        records: &[RepositoryRecord],
    ) -> Vec<CloneTask> {
        let mut seen = HashSet::new();
        records
            .iter()
            .filter(|r| seen.insert(r.name.clone()))
            .map(|record| CloneTask {
                record: record.clone(),
                target_path: resolver::resolve_repo_path(base, &record.name),
                strategy,
                branch: scope.branch.clone(),
                depth: scope.depth,
                bare: scope.bare,
                protocol: scope.protocol,
            })
            .collect()
    }
}
