use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gzh_sync::config::ScopeConfig;
use gzh_sync::conflict::ConflictPolicy;
use gzh_sync::engine::EngineOptions;
use gzh_sync::provider::{PlatformKind, Protocol, Visibility};
use gzh_sync::scheduler::cancel_pair;
use gzh_sync::strategy::{TaskResult, TaskStatus};
use gzh_sync::{Config, Strategy, SyncEngine, SyncSummary};

#[derive(Parser)]
#[command(name = "gzh-sync")]
#[command(about = "Multi-platform git organization synchronization engine")]
#[command(version)]
struct Cli {
    /// Organization or group to synchronize (replaces config file scopes)
    #[arg(short, long)]
    org: Option<String>,

    /// Hosting platform: github, gitlab, gitea, gogs
    #[arg(long, default_value = "github")]
    provider: String,

    /// API base URL for self-hosted instances
    #[arg(long)]
    base_url: Option<String>,

    /// API token (falls back to the provider's environment variable)
    #[arg(long)]
    token: Option<String>,

    /// Base target directory (default: ./{org})
    #[arg(short, long)]
    target: Option<String>,

    /// Sync strategy: reset, pull, fetch, rebase, clone, skip
    #[arg(short, long)]
    strategy: Option<String>,

    /// Conflict policy: remote-overwrite, local-preserve, rebase-attempt, conflict-skip
    #[arg(long)]
    conflict_resolution: Option<String>,

    /// Only sync repositories whose name matches this regex
    #[arg(long = "match")]
    match_pattern: Option<String>,

    /// Exclude repositories whose name matches this regex (repeatable)
    #[arg(long)]
    exclude: Vec<String>,

    /// Filter by visibility: public, private, internal
    #[arg(long)]
    visibility: Option<String>,

    /// Clone URL protocol: https, ssh
    #[arg(long)]
    protocol: Option<String>,

    /// Branch to sync instead of each repository's default
    #[arg(short, long)]
    branch: Option<String>,

    /// Shallow clone depth
    #[arg(long)]
    depth: Option<u32>,

    /// Create bare clones
    #[arg(long)]
    bare: bool,

    /// Worker parallelism (clones at p, updates at p + p/2)
    #[arg(long)]
    parallel: Option<usize>,

    /// Attempts per repository before giving up
    #[arg(long)]
    max_retries: Option<u32>,

    /// Resume from the last interrupted run's checkpoints
    #[arg(long)]
    resume: bool,

    /// Remove local directories no longer present upstream
    #[arg(long)]
    cleanup_orphans: bool,

    /// Remove orphans even when they hold uncommitted changes
    #[arg(long)]
    force: bool,

    /// Show what would be synced without touching anything
    #[arg(long)]
    dry_run: bool,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ Error: {e:#}");
            2
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    info!("Starting gzh-sync v{}", env!("CARGO_PKG_VERSION"));

    let config = build_config(&cli)?;
    if config.scopes.is_empty() {
        anyhow::bail!("No scopes to sync: pass --org or configure scopes in the config file");
    }

    let (handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, marking in-flight work interrupted");
            handle.cancel();
        }
    });

    let options = EngineOptions {
        resume: cli.resume,
        dry_run: cli.dry_run,
        force: cli.force,
    };
    let engine = SyncEngine::new(config, options, cancel);
    let summary = engine.run().await?;

    print_summary(&summary, cli.verbose);
    Ok(summary.exit_code())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

/// Merge the config file with CLI flags; flags win.
fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(strategy) = &cli.strategy {
        config.global.default_strategy = strategy
            .parse::<Strategy>()
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    if let Some(policy) = &cli.conflict_resolution {
        config.sync_mode.conflict_resolution = policy
            .parse::<ConflictPolicy>()
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    if let Some(max_retries) = cli.max_retries {
        anyhow::ensure!(max_retries >= 1, "--max-retries must be at least 1");
        config.global.max_retries = max_retries;
    }
    if let Some(parallel) = cli.parallel {
        let sizes = config.scheduler_config().with_parallelism(parallel);
        config.global.concurrency.clone_workers = sizes.clone_workers;
        config.global.concurrency.update_workers = sizes.update_workers;
        config.global.concurrency.api_workers = sizes.api_workers;
    }
    if cli.cleanup_orphans {
        config.sync_mode.cleanup_orphans = true;
    }

    if let Some(org) = &cli.org {
        let provider = cli
            .provider
            .parse::<PlatformKind>()
            .map_err(|e| anyhow::anyhow!(e))?;
        let visibility = cli
            .visibility
            .as_deref()
            .map(str::parse::<Visibility>)
            .transpose()
            .map_err(|e| anyhow::anyhow!(e))?;
        let protocol = cli
            .protocol
            .as_deref()
            .map(str::parse::<Protocol>)
            .transpose()
            .map_err(|e| anyhow::anyhow!(e))?
            .unwrap_or_default();
        let strategy = cli
            .strategy
            .as_deref()
            .map(str::parse::<Strategy>)
            .transpose()
            .map_err(|e| anyhow::anyhow!(e))?;

        config.scopes = vec![ScopeConfig {
            provider,
            org: org.clone(),
            base_url: cli.base_url.clone(),
            token: cli.token.clone(),
            target: cli.target.clone(),
            include: cli.match_pattern.clone().into_iter().collect(),
            exclude: cli.exclude.clone(),
            visibility,
            protocol,
            depth: cli.depth,
            bare: cli.bare,
            branch: cli.branch.clone(),
            strategy,
        }];
    } else {
        anyhow::ensure!(
            cli.target.is_none(),
            "--target requires --org; per-scope targets belong in the config file"
        );
    }

    Ok(config)
}

fn print_summary(summary: &SyncSummary, verbose: bool) {
    println!("\n🎉 Synchronization Complete!");
    println!("   📊 Total repositories: {}", summary.total());
    println!("   ✅ Successful: {}", summary.success);
    println!("   ⏭️  Skipped: {}", summary.skipped);
    println!("   ❌ Failed: {}", summary.failed);
    println!("   ⚠️  Conflicts: {}", summary.conflict);
    if summary.interrupted > 0 {
        println!("   🛑 Interrupted: {} (re-run with --resume)", summary.interrupted);
    }
    if summary.scope_failures > 0 {
        println!("   🚫 Scopes skipped entirely: {}", summary.scope_failures);
    }

    for line in attention_lines(summary, verbose) {
        println!("{line}");
    }
}

fn result_detail(result: &TaskResult) -> String {
    result
        .error
        .as_ref()
        .map(|e| e.message.clone())
        .or_else(|| result.reason.clone())
        .unwrap_or_default()
}

/// Every conflict names its repository path unconditionally; it needs a
/// human decision. Failure detail is elided on large runs unless verbose.
fn attention_lines(summary: &SyncSummary, verbose: bool) -> Vec<String> {
    let (conflicts, failures): (Vec<_>, Vec<_>) = summary
        .results
        .iter()
        .filter(|r| matches!(r.status, TaskStatus::Failed | TaskStatus::Conflict))
        .partition(|r| r.status == TaskStatus::Conflict);
    if conflicts.is_empty() && failures.is_empty() {
        return Vec::new();
    }

    let mut lines = vec!["\n🔍 Needs attention:".to_string()];
    for result in &conflicts {
        lines.push(format!(
            "   ⚠️  {} ({}): {}",
            result.key,
            result.path.display(),
            result_detail(result)
        ));
    }
    if verbose || failures.len() <= 10 {
        for result in &failures {
            lines.push(format!(
                "   ❌ {} ({}): {}",
                result.key,
                result.path.display(),
                result_detail(result)
            ));
        }
    } else if !failures.is_empty() {
        lines.push(format!(
            "   ❌ {} failures; re-run with --verbose to list them",
            failures.len()
        ));
    }
    lines
}
