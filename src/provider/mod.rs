//! Provider abstraction layer
//!
//! This module normalizes repository listing across git hosting platforms
//! (GitHub, GitLab, Gitea, Gogs) into a common vocabulary: each platform
//! implementation paginates exhaustively, translates HTTP failures into a
//! shared [`ErrorKind`] taxonomy, and feeds rate-limit response headers back
//! into the scheduler's per-provider budget.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod gitea;
mod github;
mod gitlab;
mod gogs;

pub use gitea::GiteaProvider;
pub use github::GitHubProvider;
pub use gitlab::GitLabProvider;
pub use gogs::GogsProvider;

/// Supported hosting platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    GitHub,
    GitLab,
    Gitea,
    Gogs,
}

impl PlatformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::GitHub => "github",
            PlatformKind::GitLab => "gitlab",
            PlatformKind::Gitea => "gitea",
            PlatformKind::Gogs => "gogs",
        }
    }

    /// Environment variable consulted for this platform's API token.
    pub fn token_env_var(&self) -> &'static str {
        match self {
            PlatformKind::GitHub => "GITHUB_TOKEN",
            PlatformKind::GitLab => "GITLAB_TOKEN",
            PlatformKind::Gitea => "GITEA_TOKEN",
            PlatformKind::Gogs => "GOGS_TOKEN",
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(PlatformKind::GitHub),
            "gitlab" => Ok(PlatformKind::GitLab),
            "gitea" => Ok(PlatformKind::Gitea),
            "gogs" => Ok(PlatformKind::Gogs),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Repository visibility as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
    Internal,
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            "internal" => Ok(Visibility::Internal),
            other => Err(format!("unknown visibility: {other}")),
        }
    }
}

/// Clone URL protocol preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Https,
    Ssh,
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "https" => Ok(Protocol::Https),
            "ssh" => Ok(Protocol::Ssh),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

/// Platform-independent repository record, created fresh on every listing
/// call and never persisted beyond a run.
#[derive(Debug, Clone)]
pub struct RepositoryRecord {
    pub provider: PlatformKind,
    pub org: String,
    pub name: String,
    pub visibility: Visibility,
    pub default_branch: Option<String>,
    pub https_url: String,
    pub ssh_url: String,
    pub archived: bool,
    pub fork: bool,
}

impl RepositoryRecord {
    /// Display name in `org/name` form.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.org, self.name)
    }

    /// Stable key identifying this repository across runs.
    pub fn key(&self) -> String {
        format!("{}:{}/{}", self.provider, self.org, self.name)
    }

    pub fn clone_url(&self, protocol: Protocol) -> &str {
        match protocol {
            Protocol::Https => &self.https_url,
            Protocol::Ssh => &self.ssh_url,
        }
    }
}

/// The listing scope: one organization or group on one platform.
#[derive(Debug, Clone)]
pub struct Scope {
    pub org: String,
}

impl Scope {
    pub fn new(org: impl Into<String>) -> Self {
        Self { org: org.into() }
    }
}

/// Filters applied after pagination completes for a scope.
#[derive(Debug, Clone, Default)]
pub struct RepoFilters {
    pub include: Vec<Regex>,
    pub exclude: Vec<Regex>,
    pub visibility: Option<Visibility>,
    pub include_archived: bool,
    pub include_forks: bool,
}

impl RepoFilters {
    /// Compile include/exclude pattern strings into a filter set.
    pub fn from_patterns(
        include: &[String],
        exclude: &[String],
        visibility: Option<Visibility>,
    ) -> Result<Self, ProviderError> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>, ProviderError> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| ProviderError::Unknown {
                        status: None,
                        message: format!("invalid filter pattern '{p}': {e}"),
                    })
                })
                .collect()
        };

        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
            visibility,
            include_archived: false,
            include_forks: true,
        })
    }

    /// Whether a repository passes this filter set.
    pub fn matches(&self, record: &RepositoryRecord) -> bool {
        if record.archived && !self.include_archived {
            return false;
        }
        if record.fork && !self.include_forks {
            return false;
        }
        if let Some(visibility) = self.visibility {
            if record.visibility != visibility {
                return false;
            }
        }
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(&record.name)) {
            return false;
        }
        if self.exclude.iter().any(|re| re.is_match(&record.name)) {
            return false;
        }
        true
    }
}

/// Generic classification of provider failures, used by the scheduler to
/// decide retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthFailure,
    RateLimited,
    NotFound,
    NetworkError,
    Unknown,
}

/// Errors raised by platform implementations.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider}: authentication failed: {message}")]
    AuthFailure {
        provider: PlatformKind,
        message: String,
    },

    #[error("{provider}: rate limit exceeded (resets at {reset_at:?})")]
    RateLimited {
        provider: PlatformKind,
        reset_at: Option<DateTime<Utc>>,
    },

    #[error("not found: {resource}")]
    NotFound { resource: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("unexpected provider error (status {status:?}): {message}")]
    Unknown {
        status: Option<u16>,
        message: String,
    },
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::AuthFailure { .. } => ErrorKind::AuthFailure,
            ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
            ProviderError::NotFound { .. } => ErrorKind::NotFound,
            ProviderError::Network { .. } => ErrorKind::NetworkError,
            ProviderError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// RateLimited and NetworkError (including transient 5xx) are retryable;
    /// AuthFailure and NotFound are terminal on first occurrence.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimited | ErrorKind::NetworkError
        )
    }

    /// Map an HTTP response status into the generic taxonomy.
    pub fn from_status(
        provider: PlatformKind,
        status: reqwest::StatusCode,
        resource: &str,
        body: String,
    ) -> Self {
        match status.as_u16() {
            401 | 403 => ProviderError::AuthFailure {
                provider,
                message: first_line(&body),
            },
            404 => ProviderError::NotFound {
                resource: resource.to_string(),
            },
            429 => ProviderError::RateLimited {
                provider,
                reset_at: None,
            },
            code if code >= 500 => ProviderError::Network {
                message: format!("{provider} returned {code}: {}", first_line(&body)),
            },
            code => ProviderError::Unknown {
                status: Some(code),
                message: first_line(&body),
            },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Network {
            message: e.to_string(),
        }
    }
}

fn first_line(s: &str) -> String {
    s.lines().next().unwrap_or("").trim().to_string()
}

/// Trait implemented by each platform adapter.
///
/// Pagination is exhausted before filtering so include/exclude patterns see
/// the complete repository set for the scope.
#[async_trait]
pub trait GitProvider: Send + Sync {
    fn kind(&self) -> PlatformKind;

    /// List every repository in the scope, filtered after listing completes.
    async fn list_repositories(
        &self,
        scope: &Scope,
        filters: &RepoFilters,
    ) -> Result<Vec<RepositoryRecord>, ProviderError>;

    /// Pick the clone URL for the requested protocol.
    fn resolve_clone_url(&self, record: &RepositoryRecord, protocol: Protocol) -> String {
        record.clone_url(protocol).to_string()
    }
}

/// Shared helper: parse an epoch-seconds reset header value.
pub(crate) fn parse_reset_epoch(value: &str) -> Option<DateTime<Utc>> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}

/// Shared helper: pull `remaining` and `reset` rate-limit headers and feed
/// them into the provider's budget.
pub(crate) fn record_rate_limit_headers(
    budget: &crate::scheduler::RateLimitBudget,
    headers: &reqwest::header::HeaderMap,
    remaining_header: &str,
    reset_header: &str,
) {
    let remaining = headers
        .get(remaining_header)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let reset_at = headers
        .get(reset_header)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_reset_epoch);

    if let Some(remaining) = remaining {
        budget.update_from_headers(remaining, reset_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, visibility: Visibility, archived: bool, fork: bool) -> RepositoryRecord {
        RepositoryRecord {
            provider: PlatformKind::GitHub,
            org: "acme".to_string(),
            name: name.to_string(),
            visibility,
            default_branch: Some("main".to_string()),
            https_url: format!("https://github.com/acme/{name}.git"),
            ssh_url: format!("git@github.com:acme/{name}.git"),
            archived,
            fork,
        }
    }

    #[test]
    fn test_filters_include_exclude() {
        let filters = RepoFilters::from_patterns(
            &["^web-.*".to_string()],
            &[".*-deprecated$".to_string()],
            None,
        )
        .unwrap();

        assert!(filters.matches(&record("web-app", Visibility::Public, false, false)));
        assert!(!filters.matches(&record("api-server", Visibility::Public, false, false)));
        assert!(!filters.matches(&record(
            "web-app-deprecated",
            Visibility::Public,
            false,
            false
        )));
    }

    #[test]
    fn test_filters_visibility_and_archived() {
        let filters = RepoFilters::from_patterns(&[], &[], Some(Visibility::Private)).unwrap();

        assert!(filters.matches(&record("a", Visibility::Private, false, false)));
        assert!(!filters.matches(&record("b", Visibility::Public, false, false)));
        // Archived repositories are excluded by default.
        assert!(!filters.matches(&record("c", Visibility::Private, true, false)));
    }

    #[test]
    fn test_error_status_mapping() {
        let auth = ProviderError::from_status(
            PlatformKind::GitHub,
            reqwest::StatusCode::UNAUTHORIZED,
            "orgs/acme",
            "bad credentials".to_string(),
        );
        assert_eq!(auth.kind(), ErrorKind::AuthFailure);
        assert!(!auth.is_retryable());

        let rate = ProviderError::from_status(
            PlatformKind::GitLab,
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "groups/acme",
            String::new(),
        );
        assert_eq!(rate.kind(), ErrorKind::RateLimited);
        assert!(rate.is_retryable());

        let server = ProviderError::from_status(
            PlatformKind::Gitea,
            reqwest::StatusCode::BAD_GATEWAY,
            "orgs/acme",
            String::new(),
        );
        assert_eq!(server.kind(), ErrorKind::NetworkError);
        assert!(server.is_retryable());

        let missing = ProviderError::from_status(
            PlatformKind::Gogs,
            reqwest::StatusCode::NOT_FOUND,
            "orgs/acme",
            String::new(),
        );
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_record_key_and_clone_url() {
        let r = record("repo", Visibility::Public, false, false);
        assert_eq!(r.key(), "github:acme/repo");
        assert_eq!(r.full_name(), "acme/repo");
        assert_eq!(r.clone_url(Protocol::Ssh), "git@github.com:acme/repo.git");
        assert_eq!(
            r.clone_url(Protocol::Https),
            "https://github.com/acme/repo.git"
        );
    }

    #[test]
    fn test_parse_reset_epoch() {
        let dt = parse_reset_epoch("1700000000").unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
        assert!(parse_reset_epoch("not-a-number").is_none());
    }
}
