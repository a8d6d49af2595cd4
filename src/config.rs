use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::conflict::ConflictPolicy;
use crate::provider::{PlatformKind, Protocol, Visibility};
use crate::scheduler::SchedulerConfig;
use crate::strategy::Strategy;

/// Main configuration structure for gzh-sync
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// Engine-wide settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Conflict and cleanup behavior
    #[serde(default)]
    pub sync_mode: SyncModeConfig,

    /// Organizations/groups to synchronize
    #[serde(default)]
    pub scopes: Vec<ScopeConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GlobalConfig {
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    /// Strategy used when a scope does not set its own
    #[serde(default)]
    pub default_strategy: Strategy,

    /// Attempts per task / API call before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-task timeout in seconds
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Requests per second when a provider sends no rate-limit headers
    #[serde(default = "default_fallback_rps")]
    pub fallback_rps: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_clone_workers")]
    pub clone_workers: usize,

    #[serde(default = "default_update_workers")]
    pub update_workers: usize,

    #[serde(default = "default_api_workers")]
    pub api_workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SyncModeConfig {
    /// Remove local directories no longer present upstream
    #[serde(default)]
    pub cleanup_orphans: bool,

    /// Policy applied when local state diverges from the remote
    #[serde(default)]
    pub conflict_resolution: ConflictPolicy,
}

/// One organization/group on one platform.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScopeConfig {
    pub provider: PlatformKind,
    pub org: String,

    /// API base URL for self-hosted instances
    pub base_url: Option<String>,

    /// API token; `${VAR}` references are expanded at load time
    pub token: Option<String>,

    /// Base target directory (`-t` equivalent)
    pub target: Option<String>,

    #[serde(default)]
    pub include: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    pub visibility: Option<Visibility>,

    #[serde(default)]
    pub protocol: Protocol,

    /// Shallow clone depth
    pub depth: Option<u32>,

    #[serde(default)]
    pub bare: bool,

    /// Branch to sync instead of each repository's default
    pub branch: Option<String>,

    /// Per-scope strategy override
    pub strategy: Option<Strategy>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_task_timeout_secs() -> u64 {
    600
}

fn default_fallback_rps() -> u32 {
    10
}

fn default_clone_workers() -> usize {
    4
}

fn default_update_workers() -> usize {
    6
}

fn default_api_workers() -> usize {
    2
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyConfig::default(),
            default_strategy: Strategy::default(),
            max_retries: default_max_retries(),
            task_timeout_secs: default_task_timeout_secs(),
            fallback_rps: default_fallback_rps(),
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            clone_workers: default_clone_workers(),
            update_workers: default_update_workers(),
            api_workers: default_api_workers(),
        }
    }
}

impl Config {
    /// Default configuration file path: `$XDG_CONFIG_HOME/gzh-sync/config.yml`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Could not determine config directory")?;
        Ok(config_dir.join("gzh-sync").join("config.yml"))
    }

    /// Load from the given path, or the default location. A missing default
    /// file yields the built-in defaults; an explicitly named missing file
    /// is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path()?, false),
        };

        if !path.exists() {
            if explicit {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.expand_tokens()?;
        config.validate()?;
        Ok(config)
    }

    /// Expand `${VAR}`/`~` in token and target values.
    fn expand_tokens(&mut self) -> Result<()> {
        for scope in &mut self.scopes {
            if let Some(token) = &scope.token {
                scope.token = Some(
                    shellexpand::env(token)
                        .with_context(|| format!("Failed to expand token for {}", scope.org))?
                        .into_owned(),
                );
            }
            if let Some(target) = &scope.target {
                scope.target = Some(shellexpand::tilde(target).into_owned());
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for scope in &self.scopes {
            if scope.org.trim().is_empty() {
                anyhow::bail!("Scope with empty org for provider {}", scope.provider);
            }
        }
        if self.global.max_retries == 0 {
            anyhow::bail!("global.max_retries must be at least 1");
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            clone_workers: self.global.concurrency.clone_workers,
            update_workers: self.global.concurrency.update_workers,
            api_workers: self.global.concurrency.api_workers,
            max_attempts: self.global.max_retries,
            task_timeout: Duration::from_secs(self.global.task_timeout_secs),
            fallback_rps: self.global.fallback_rps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.global.concurrency.clone_workers, 4);
        assert_eq!(config.global.concurrency.update_workers, 6);
        assert_eq!(config.global.concurrency.api_workers, 2);
        assert_eq!(config.global.default_strategy, Strategy::Reset);
        assert_eq!(config.global.max_retries, 3);
        assert!(!config.sync_mode.cleanup_orphans);
        assert_eq!(
            config.sync_mode.conflict_resolution,
            ConflictPolicy::RemoteOverwrite
        );
    }

    #[test]
    fn test_load_full_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            r#"
global:
  concurrency:
    clone_workers: 8
  default_strategy: pull
  max_retries: 5
sync_mode:
  cleanup_orphans: true
  conflict_resolution: local-preserve
scopes:
  - provider: github
    org: acme
    include:
      - "^web-.*"
    protocol: ssh
    depth: 1
  - provider: gitea
    org: internal
    base_url: "https://git.example.com"
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.global.concurrency.clone_workers, 8);
        // Unset keys keep their defaults.
        assert_eq!(config.global.concurrency.update_workers, 6);
        assert_eq!(config.global.default_strategy, Strategy::Pull);
        assert!(config.sync_mode.cleanup_orphans);
        assert_eq!(config.scopes.len(), 2);
        assert_eq!(config.scopes[0].protocol, Protocol::Ssh);
        assert_eq!(config.scopes[0].depth, Some(1));
        assert_eq!(
            config.scopes[1].base_url.as_deref(),
            Some("https://git.example.com")
        );
    }

    #[test]
    #[serial_test::serial]
    fn test_token_env_expansion() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        std::env::set_var("GZH_TEST_TOKEN", "sekrit");
        std::fs::write(
            &path,
            r#"
scopes:
  - provider: github
    org: acme
    token: "${GZH_TEST_TOKEN}"
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.scopes[0].token.as_deref(), Some("sekrit"));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/config.yml"))).is_err());
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "global: [not: a map").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_empty_org_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            r#"
scopes:
  - provider: github
    org: ""
"#,
        )
        .unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
