use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;

use gzh_sync::config::{Config, ScopeConfig};
use gzh_sync::engine::{EngineOptions, ProviderFactory};
use gzh_sync::manifest::{Manifest, MANIFEST_FILE};
use gzh_sync::provider::{GitProvider, PlatformKind, RepositoryRecord};
use gzh_sync::scheduler::cancel_pair;
use gzh_sync::SyncEngine;

mod common;
use common::{commit_file, init_origin, local_record, StaticProvider, UnreachableProvider};

/// Integration tests driving the full engine (validate -> list -> sync ->
/// cleanup) against local git origins through an in-memory provider.

fn scope_for(org: &str, base: &Path) -> ScopeConfig {
    ScopeConfig {
        provider: PlatformKind::GitHub,
        org: org.to_string(),
        base_url: None,
        token: None,
        target: Some(base.to_string_lossy().into_owned()),
        include: vec![],
        exclude: vec![],
        visibility: None,
        protocol: Default::default(),
        depth: None,
        bare: false,
        branch: None,
        strategy: None,
    }
}

fn factory_for(records_by_org: HashMap<String, Vec<RepositoryRecord>>) -> ProviderFactory {
    Box::new(move |scope, _budget| -> Arc<dyn GitProvider> {
        match records_by_org.get(&scope.org) {
            Some(records) => Arc::new(StaticProvider::new(records.clone())),
            None => Arc::new(StaticProvider::failing_auth()),
        }
    })
}

fn engine_for(
    config: Config,
    options: EngineOptions,
    records_by_org: HashMap<String, Vec<RepositoryRecord>>,
) -> SyncEngine {
    let (_handle, cancel) = cancel_pair();
    SyncEngine::new(config, options, cancel).with_provider_factory(factory_for(records_by_org))
}

fn one_org(records: Vec<RepositoryRecord>) -> HashMap<String, Vec<RepositoryRecord>> {
    HashMap::from([("acme".to_string(), records)])
}

#[tokio::test]
async fn test_fresh_sync_clones_everything_and_writes_manifest() {
    let alpha = TempDir::new().unwrap();
    let beta = TempDir::new().unwrap();
    init_origin(alpha.path());
    init_origin(beta.path());

    let workspace = TempDir::new().unwrap();
    let base = workspace.path().join("acme");

    let mut config = Config::default();
    config.scopes = vec![scope_for("acme", &base)];
    let records = vec![
        local_record(alpha.path(), "acme", "alpha"),
        local_record(beta.path(), "acme", "beta"),
    ];

    let engine = engine_for(config, EngineOptions::default(), one_org(records));
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.success, 2);
    assert_eq!(summary.exit_code(), 0);
    assert!(base.join("alpha/README.md").exists());
    assert!(base.join("beta/README.md").exists());

    let manifest = Manifest::load(&base).unwrap();
    assert_eq!(manifest.organization, "acme");
    assert!(manifest.repo_names().contains("alpha"));
    assert!(manifest.repo_names().contains("beta"));
}

#[tokio::test]
async fn test_second_run_updates_existing_clone() {
    let origin = TempDir::new().unwrap();
    init_origin(origin.path());

    let workspace = TempDir::new().unwrap();
    let base = workspace.path().join("acme");
    let mut config = Config::default();
    config.scopes = vec![scope_for("acme", &base)];
    let records = vec![local_record(origin.path(), "acme", "alpha")];

    let engine = engine_for(config.clone(), EngineOptions::default(), one_org(records.clone()));
    assert_eq!(engine.run().await.unwrap().success, 1);

    // New upstream commit, then a second pass over the now-managed directory.
    commit_file(origin.path(), "feature.txt", "new work\n");
    let engine = engine_for(config, EngineOptions::default(), one_org(records));
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.success, 1);
    assert_eq!(
        std::fs::read_to_string(base.join("alpha/feature.txt")).unwrap(),
        "new work\n"
    );
}

#[tokio::test]
async fn test_orphan_cleanup_removes_unlisted_directory() {
    let alpha = TempDir::new().unwrap();
    let beta = TempDir::new().unwrap();
    init_origin(alpha.path());
    init_origin(beta.path());

    let workspace = TempDir::new().unwrap();
    let base = workspace.path().join("acme");
    let mut config = Config::default();
    config.sync_mode.cleanup_orphans = true;
    config.scopes = vec![scope_for("acme", &base)];

    let engine = engine_for(
        config.clone(),
        EngineOptions::default(),
        one_org(vec![
            local_record(alpha.path(), "acme", "alpha"),
            local_record(beta.path(), "acme", "beta"),
        ]),
    );
    engine.run().await.unwrap();
    assert!(base.join("beta").exists());

    // beta disappears upstream; the next full pass removes its clone.
    let engine = engine_for(
        config,
        EngineOptions::default(),
        one_org(vec![local_record(alpha.path(), "acme", "alpha")]),
    );
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.exit_code(), 0);
    assert!(base.join("alpha").exists());
    assert!(!base.join("beta").exists());
}

#[tokio::test]
async fn test_cleanup_disabled_leaves_orphans_alone() {
    let alpha = TempDir::new().unwrap();
    let beta = TempDir::new().unwrap();
    init_origin(alpha.path());
    init_origin(beta.path());

    let workspace = TempDir::new().unwrap();
    let base = workspace.path().join("acme");
    let mut config = Config::default();
    config.scopes = vec![scope_for("acme", &base)];

    let engine = engine_for(
        config.clone(),
        EngineOptions::default(),
        one_org(vec![
            local_record(alpha.path(), "acme", "alpha"),
            local_record(beta.path(), "acme", "beta"),
        ]),
    );
    engine.run().await.unwrap();

    let engine = engine_for(
        config,
        EngineOptions::default(),
        one_org(vec![local_record(alpha.path(), "acme", "alpha")]),
    );
    engine.run().await.unwrap();

    assert!(base.join("beta").exists());
}

#[tokio::test]
async fn test_unmanaged_directory_refused_before_listing() {
    use assert_fs::prelude::*;

    let workspace = assert_fs::TempDir::new().unwrap();
    workspace
        .child("existing/precious.txt")
        .write_str("not ours")
        .unwrap();
    let base = workspace.path().join("existing");

    let mut config = Config::default();
    config.scopes = vec![scope_for("acme", &base)];

    let (_handle, cancel) = cancel_pair();
    // UnreachableProvider panics on contact, so a passing test proves the
    // directory was refused before any listing happened.
    let engine = SyncEngine::new(config, EngineOptions::default(), cancel)
        .with_provider_factory(Box::new(|_, _| -> Arc<dyn GitProvider> {
            Arc::new(UnreachableProvider)
        }));

    let err = engine.run().await.unwrap_err();
    assert!(err.to_string().contains(MANIFEST_FILE));
    workspace
        .child("existing/precious.txt")
        .assert(predicates::path::exists());
}

#[tokio::test]
async fn test_resume_skips_completed_repositories() {
    let origin = TempDir::new().unwrap();
    init_origin(origin.path());

    let workspace = TempDir::new().unwrap();
    let base = workspace.path().join("acme");
    let mut config = Config::default();
    config.scopes = vec![scope_for("acme", &base)];
    let records = vec![local_record(origin.path(), "acme", "alpha")];

    let engine = engine_for(config.clone(), EngineOptions::default(), one_org(records.clone()));
    assert_eq!(engine.run().await.unwrap().success, 1);

    let resume = EngineOptions {
        resume: true,
        ..Default::default()
    };
    let engine = engine_for(config, resume, one_org(records));
    let summary = engine.run().await.unwrap();

    // Everything checkpointed as Success; nothing re-enqueued.
    assert_eq!(summary.total(), 0);
    assert_eq!(summary.exit_code(), 0);
}

#[tokio::test]
async fn test_auth_failure_isolated_to_its_scope() {
    let origin = TempDir::new().unwrap();
    init_origin(origin.path());

    let workspace = TempDir::new().unwrap();
    let good_base = workspace.path().join("acme");
    let bad_base = workspace.path().join("denied");

    let mut config = Config::default();
    config.scopes = vec![scope_for("denied-org", &bad_base), scope_for("acme", &good_base)];

    // Only "acme" is known to the factory; "denied-org" gets auth failures.
    let engine = engine_for(
        config,
        EngineOptions::default(),
        one_org(vec![local_record(origin.path(), "acme", "alpha")]),
    );
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.scope_failures, 1);
    assert_eq!(summary.success, 1);
    assert_eq!(summary.exit_code(), 1);
    assert!(good_base.join("alpha").exists());
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let origin = TempDir::new().unwrap();
    init_origin(origin.path());

    let workspace = TempDir::new().unwrap();
    let base = workspace.path().join("acme");
    let mut config = Config::default();
    config.scopes = vec![scope_for("acme", &base)];

    let options = EngineOptions {
        dry_run: true,
        ..Default::default()
    };
    let engine = engine_for(
        config,
        options,
        one_org(vec![local_record(origin.path(), "acme", "alpha")]),
    );
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.total(), 0);
    assert_eq!(summary.exit_code(), 0);
    assert!(!base.exists());
}

#[test]
fn test_cli_help() {
    let output = Command::new("cargo")
        .args(["run", "--quiet", "--", "--help"])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--strategy", "--parallel", "--resume", "--cleanup-orphans", "--dry-run", "--target"] {
        assert!(stdout.contains(flag), "help missing {flag}");
    }
}

#[test]
fn test_cli_rejects_unknown_provider() {
    let output = Command::new("cargo")
        .args(["run", "--quiet", "--", "--org", "acme", "--provider", "sourcehut"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown provider"));
}
