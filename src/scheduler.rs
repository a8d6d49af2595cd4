//! Concurrency scheduler
//!
//! Owns every piece of shared mutable state for a run: the three worker
//! pools (clone / update / api), the per-provider rate-limit budgets, the
//! retry policy and the cancellation signal. Nothing here is a global;
//! one scheduler instance is created per run and dropped with it.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use rand::Rng;
use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::provider::{PlatformKind, ProviderError};
use crate::strategy::{
    CloneTask, ErrorDetail, StrategyExecutor, TaskErrorKind, TaskResult, TaskStatus,
};

type GovernorBucket = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-provider request budget.
///
/// Header-driven when the platform reports `remaining`/`reset`: a depleted
/// budget blocks callers until the reset time. A token bucket at the
/// configured fallback rate applies either way, covering platforms that
/// send no headers at all.
pub struct RateLimitBudget {
    provider: PlatformKind,
    bucket: GovernorBucket,
    inner: Mutex<BudgetInner>,
}

#[derive(Debug, Default)]
struct BudgetInner {
    remaining: Option<u64>,
    reset_at: Option<DateTime<Utc>>,
}

impl RateLimitBudget {
    pub fn new(provider: PlatformKind, fallback_rps: u32) -> Self {
        let rps = NonZeroU32::new(fallback_rps.max(1)).unwrap_or(NonZeroU32::MIN);
        Self {
            provider,
            bucket: RateLimiter::direct(Quota::per_second(rps)),
            inner: Mutex::new(BudgetInner::default()),
        }
    }

    /// Record the latest header values. Called by providers after every
    /// response; the budget is the single owner of this state.
    pub fn update_from_headers(&self, remaining: u64, reset_at: Option<DateTime<Utc>>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remaining = Some(remaining);
        if reset_at.is_some() {
            inner.reset_at = reset_at;
        }
        debug!(provider = %self.provider, remaining, "rate limit budget updated");
    }

    pub fn remaining(&self) -> Option<u64> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remaining
    }

    /// Block until a request may be issued. The lock is never held across
    /// an await.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                match (inner.remaining, inner.reset_at) {
                    (Some(0), Some(reset)) => (reset - Utc::now()).to_std().ok(),
                    (Some(0), None) => Some(Duration::from_secs(60)),
                    _ => None,
                }
            };
            match wait {
                Some(delay) if !delay.is_zero() => {
                    warn!(
                        provider = %self.provider,
                        wait_secs = delay.as_secs(),
                        "rate limit exhausted, waiting for reset"
                    );
                    tokio::time::sleep(delay).await;
                    let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                    inner.remaining = None;
                    inner.reset_at = None;
                }
                _ => break,
            }
        }
        self.bucket.until_ready().await;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(remaining) = inner.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
    }
}

/// One-shot cancellation signal shared by every in-flight task.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation fires; pends forever if it never does.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub clone_workers: usize,
    pub update_workers: usize,
    pub api_workers: usize,
    pub max_attempts: u32,
    pub task_timeout: Duration,
    pub fallback_rps: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            clone_workers: 4,
            update_workers: 6,
            api_workers: 2,
            max_attempts: 3,
            task_timeout: Duration::from_secs(600),
            fallback_rps: 10,
        }
    }
}

impl SchedulerConfig {
    /// Derive pool sizes from a single `--parallel` value the way the
    /// worker split is documented: clones at `p`, updates at `p + p/2`,
    /// api at `p/2` with a floor of one.
    pub fn with_parallelism(mut self, parallel: usize) -> Self {
        let p = parallel.max(1);
        self.clone_workers = p;
        self.update_workers = p + p / 2;
        self.api_workers = (p / 2).max(1);
        self
    }
}

/// Anything the scheduler can drive to a terminal [`TaskResult`].
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &CloneTask) -> TaskResult;
}

#[async_trait]
impl TaskExecutor for StrategyExecutor {
    async fn execute(&self, task: &CloneTask) -> TaskResult {
        StrategyExecutor::execute(self, task).await
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    clone_sem: Arc<Semaphore>,
    update_sem: Arc<Semaphore>,
    api_sem: Arc<Semaphore>,
    budgets: Mutex<HashMap<PlatformKind, Arc<RateLimitBudget>>>,
    cancel: CancelSignal,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, cancel: CancelSignal) -> Self {
        Self {
            clone_sem: Arc::new(Semaphore::new(config.clone_workers)),
            update_sem: Arc::new(Semaphore::new(config.update_workers)),
            api_sem: Arc::new(Semaphore::new(config.api_workers)),
            budgets: Mutex::new(HashMap::new()),
            config,
            cancel,
        }
    }

    /// The shared budget for one provider, created on first use.
    pub fn budget_for(&self, provider: PlatformKind) -> Arc<RateLimitBudget> {
        let mut budgets = self.budgets.lock().unwrap_or_else(|e| e.into_inner());
        budgets
            .entry(provider)
            .or_insert_with(|| {
                Arc::new(RateLimitBudget::new(provider, self.config.fallback_rps))
            })
            .clone()
    }

    /// Run a provider API call under the api pool with retry on retryable
    /// failures.
    pub async fn run_api<T, Fut, F>(&self, mut call: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let _permit = self
            .api_sem
            .acquire()
            .await
            .expect("api semaphore closed");
        let mut attempt = 1u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    let delay = backoff_delay(attempt);
                    warn!(attempt, wait_ms = delay.as_millis() as u64, error = %e, "api call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drive every task to a terminal result. Duplicate target paths are
    /// rejected up front so no two workers ever touch the same directory.
    pub async fn run_tasks(
        &self,
        tasks: Vec<CloneTask>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Vec<TaskResult> {
        self.run_tasks_with(tasks, executor, |_| {}).await
    }

    /// Like [`run_tasks`](Self::run_tasks), invoking `on_complete` as each
    /// result lands so callers can checkpoint incrementally.
    pub async fn run_tasks_with<F>(
        &self,
        tasks: Vec<CloneTask>,
        executor: Arc<dyn TaskExecutor>,
        mut on_complete: F,
    ) -> Vec<TaskResult>
    where
        F: FnMut(&TaskResult),
    {
        let mut seen_paths = HashSet::new();
        let mut futures = FuturesUnordered::new();
        let mut results = Vec::with_capacity(tasks.len());

        for task in tasks {
            if !seen_paths.insert(task.target_path.clone()) {
                warn!(repo = %task.key(), path = %task.target_path.display(), "duplicate target path, dropping task");
                let result = TaskResult {
                    key: task.key(),
                    path: task.target_path.clone(),
                    status: TaskStatus::Skipped,
                    error: None,
                    reason: Some("duplicate target path".to_string()),
                    duration: Duration::ZERO,
                };
                on_complete(&result);
                results.push(result);
                continue;
            }

            let sem = if task.target_path.exists() {
                self.update_sem.clone()
            } else {
                self.clone_sem.clone()
            };
            let executor = executor.clone();
            let cancel = self.cancel.clone();
            let max_attempts = self.config.max_attempts;
            let task_timeout = self.config.task_timeout;

            futures.push(async move {
                let _permit = sem.acquire_owned().await.expect("worker pool closed");
                if cancel.is_cancelled() {
                    return interrupted_result(&task, "cancelled before start");
                }
                tokio::select! {
                    () = cancel.cancelled() => interrupted_result(&task, "cancelled mid-flight"),
                    result = run_with_retry(&task, executor.as_ref(), max_attempts, task_timeout) => result,
                }
            });
        }

        while let Some(result) = futures.next().await {
            on_complete(&result);
            results.push(result);
        }
        info!(total = results.len(), "scheduler drained");
        results
    }
}

/// Dropping the timed-out execute future kills the git subprocess via
/// `kill_on_drop`, so a timeout never leaves a stray process.
async fn run_with_retry(
    task: &CloneTask,
    executor: &dyn TaskExecutor,
    max_attempts: u32,
    task_timeout: Duration,
) -> TaskResult {
    let mut attempt = 1u32;
    loop {
        let result = match timeout(task_timeout, executor.execute(task)).await {
            Ok(result) => result,
            Err(_) => TaskResult {
                key: task.key(),
                path: task.target_path.clone(),
                status: TaskStatus::Failed,
                error: Some(ErrorDetail::new(
                    TaskErrorKind::TimedOut,
                    format!("timed out after {}s", task_timeout.as_secs()),
                )),
                reason: None,
                duration: task_timeout,
            },
        };

        // Only network failures retry; a timeout already consumed the full
        // task budget and is recorded as a terminal failure.
        let retryable = result.status == TaskStatus::Failed
            && result
                .error
                .as_ref()
                .is_some_and(|e| matches!(e.kind, TaskErrorKind::Network));
        if retryable && attempt < max_attempts {
            let delay = backoff_delay(attempt);
            warn!(repo = %task.key(), attempt, wait_ms = delay.as_millis() as u64, "task failed, retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
            continue;
        }
        return result;
    }
}

/// Exponential backoff starting at 500ms, doubling per attempt, capped at
/// 30s, with up to 250ms of jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let base = Duration::from_millis(500)
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(Duration::from_secs(30));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
    base + jitter
}

fn interrupted_result(task: &CloneTask, reason: &str) -> TaskResult {
    TaskResult {
        key: task.key(),
        path: task.target_path.clone(),
        status: TaskStatus::Interrupted,
        error: None,
        reason: Some(reason.to_string()),
        duration: Duration::ZERO,
    }
}
