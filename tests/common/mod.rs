/// Common test utilities and helpers for gzh-sync integration tests
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use gzh_sync::provider::{
    GitProvider, PlatformKind, ProviderError, RepoFilters, RepositoryRecord, Scope, Visibility,
};

/// Run a git command in `dir`, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git not available");
    assert!(status.success(), "git {:?} failed in {}", args, dir.display());
}

/// Initialize a local origin repository with one initial commit.
pub fn init_origin(dir: &Path) {
    git(dir, &["init", "-b", "main"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test"]);
    std::fs::write(dir.join("README.md"), "initial\n").unwrap();
    git(dir, &["add", "."]);
    git(dir, &["commit", "-m", "initial"]);
}

/// Add a commit touching `file` to an existing repository.
pub fn commit_file(dir: &Path, file: &str, content: &str) {
    std::fs::write(dir.join(file), content).unwrap();
    git(dir, &["add", "."]);
    git(dir, &["commit", "-m", "update"]);
}

/// A repository record whose clone URL is a local filesystem path.
pub fn local_record(origin: &Path, org: &str, name: &str) -> RepositoryRecord {
    let url = origin.to_string_lossy().to_string();
    RepositoryRecord {
        provider: PlatformKind::GitHub,
        org: org.to_string(),
        name: name.to_string(),
        visibility: Visibility::Public,
        default_branch: Some("main".to_string()),
        https_url: url.clone(),
        ssh_url: url,
        archived: false,
        fork: false,
    }
}

/// In-memory provider serving a fixed record set, optionally failing every
/// listing call with an auth error.
pub struct StaticProvider {
    pub records: Vec<RepositoryRecord>,
    pub fail_auth: bool,
    pub calls: AtomicUsize,
}

impl StaticProvider {
    pub fn new(records: Vec<RepositoryRecord>) -> Self {
        Self {
            records,
            fail_auth: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_auth() -> Self {
        Self {
            records: vec![],
            fail_auth: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GitProvider for StaticProvider {
    fn kind(&self) -> PlatformKind {
        PlatformKind::GitHub
    }

    async fn list_repositories(
        &self,
        _scope: &Scope,
        filters: &RepoFilters,
    ) -> Result<Vec<RepositoryRecord>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_auth {
            return Err(ProviderError::AuthFailure {
                provider: PlatformKind::GitHub,
                message: "bad credentials".to_string(),
            });
        }
        Ok(self
            .records
            .iter()
            .filter(|r| filters.matches(r))
            .cloned()
            .collect())
    }
}

/// A provider that must never be reached; listing panics.
pub struct UnreachableProvider;

#[async_trait]
impl GitProvider for UnreachableProvider {
    fn kind(&self) -> PlatformKind {
        PlatformKind::GitHub
    }

    async fn list_repositories(
        &self,
        _scope: &Scope,
        _filters: &RepoFilters,
    ) -> Result<Vec<RepositoryRecord>, ProviderError> {
        panic!("provider contacted before directory validation");
    }
}
