//! GitHub provider
//!
//! Lists organization repositories through the REST v3 API with exhaustive
//! pagination. Rate-limit headers (`X-RateLimit-Remaining` /
//! `X-RateLimit-Reset`) feed the shared per-provider budget.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::scheduler::RateLimitBudget;

use super::{
    record_rate_limit_headers, GitProvider, PlatformKind, ProviderError, RepoFilters,
    RepositoryRecord, Scope, Visibility,
};

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const PER_PAGE: usize = 100;

pub struct GitHubProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    budget: Arc<RateLimitBudget>,
}

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    name: String,
    private: bool,
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    archived: bool,
    default_branch: Option<String>,
    clone_url: String,
    ssh_url: String,
    visibility: Option<String>,
}

impl GitHubProvider {
    pub fn new(
        base_url: Option<String>,
        token: Option<String>,
        budget: Arc<RateLimitBudget>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            token,
            budget,
        }
    }

    fn to_record(&self, org: &str, repo: GitHubRepo) -> RepositoryRecord {
        let visibility = match repo.visibility.as_deref() {
            Some("internal") => Visibility::Internal,
            Some("private") => Visibility::Private,
            Some("public") => Visibility::Public,
            _ if repo.private => Visibility::Private,
            _ => Visibility::Public,
        };
        RepositoryRecord {
            provider: PlatformKind::GitHub,
            org: org.to_string(),
            name: repo.name,
            visibility,
            default_branch: repo.default_branch,
            https_url: repo.clone_url,
            ssh_url: repo.ssh_url,
            archived: repo.archived,
            fork: repo.fork,
        }
    }
}

#[async_trait]
impl GitProvider for GitHubProvider {
    fn kind(&self) -> PlatformKind {
        PlatformKind::GitHub
    }

    async fn list_repositories(
        &self,
        scope: &Scope,
        filters: &RepoFilters,
    ) -> Result<Vec<RepositoryRecord>, ProviderError> {
        let resource = format!("orgs/{}/repos", scope.org);
        let mut records = Vec::new();
        let mut page = 1u32;

        loop {
            self.budget.acquire().await;

            let url = format!("{}/{}", self.base_url, resource);
            let mut request = self
                .client
                .get(&url)
                .header("Accept", "application/vnd.github+json")
                .header("User-Agent", "gzh-sync")
                .query(&[
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                    ("type", "all".to_string()),
                ]);
            if let Some(token) = &self.token {
                request = request.header("Authorization", format!("Bearer {token}"));
            }

            let response = request.send().await?;
            record_rate_limit_headers(
                &self.budget,
                response.headers(),
                "x-ratelimit-remaining",
                "x-ratelimit-reset",
            );

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::from_status(
                    PlatformKind::GitHub,
                    status,
                    &resource,
                    body,
                ));
            }

            let repos: Vec<GitHubRepo> = response.json().await?;
            debug!(org = %scope.org, page, count = repos.len(), "fetched github repo page");
            let last_page = repos.len() < PER_PAGE;
            records.extend(repos.into_iter().map(|r| self.to_record(&scope.org, r)));
            if last_page {
                break;
            }
            page += 1;
        }

        records.retain(|r| filters.matches(r));
        Ok(records)
    }
}
