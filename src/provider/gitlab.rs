//! GitLab provider
//!
//! Lists group projects through the REST v4 API. GitLab's rate-limit headers
//! use the `RateLimit-*` prefix rather than GitHub's `X-RateLimit-*`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::scheduler::RateLimitBudget;

use super::{
    record_rate_limit_headers, GitProvider, PlatformKind, ProviderError, RepoFilters,
    RepositoryRecord, Scope, Visibility,
};

const DEFAULT_BASE_URL: &str = "https://gitlab.com";
const PER_PAGE: usize = 100;

pub struct GitLabProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    budget: Arc<RateLimitBudget>,
}

#[derive(Debug, Deserialize)]
struct GitLabProject {
    path: String,
    visibility: String,
    default_branch: Option<String>,
    http_url_to_repo: String,
    ssh_url_to_repo: String,
    #[serde(default)]
    archived: bool,
    forked_from_project: Option<serde_json::Value>,
}

impl GitLabProvider {
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

    fn to_record(&self, org: &str, project: GitLabProject) -> RepositoryRecord {
        let visibility = match project.visibility.as_str() {
            "private" => Visibility::Private,
            "internal" => Visibility::Internal,
            _ => Visibility::Public,
        };
        RepositoryRecord {
            provider: PlatformKind::GitLab,
            org: org.to_string(),
            name: project.path,
            visibility,
            default_branch: project.default_branch,
            https_url: project.http_url_to_repo,
            ssh_url: project.ssh_url_to_repo,
            archived: project.archived,
            fork: project.forked_from_project.is_some(),
        }
    }
}

#[async_trait]
impl GitProvider for GitLabProvider {
    fn kind(&self) -> PlatformKind {
        PlatformKind::GitLab
    }

    async fn list_repositories(
        &self,
        scope: &Scope,
        filters: &RepoFilters,
    ) -> Result<Vec<RepositoryRecord>, ProviderError> {
        // Subgroup paths contain slashes and must be encoded in the URL.
        let group = scope.org.replace('/', "%2F");
        let resource = format!("api/v4/groups/{group}/projects");
        let mut records = Vec::new();
        let mut page = 1u32;

        loop {
            self.budget.acquire().await;

            let url = format!("{}/{}", self.base_url, resource);
            let mut request = self.client.get(&url).query(&[
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
                ("include_subgroups", "false".to_string()),
            ]);
            if let Some(token) = &self.token {
                request = request.header("PRIVATE-TOKEN", token);
            }

            let response = request.send().await?;
            record_rate_limit_headers(
                &self.budget,
                response.headers(),
                "ratelimit-remaining",
                "ratelimit-reset",
            );

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::from_status(
                    PlatformKind::GitLab,
                    status,
                    &resource,
                    body,
                ));
            }

            let projects: Vec<GitLabProject> = response.json().await?;
            debug!(group = %scope.org, page, count = projects.len(), "fetched gitlab project page");
            let last_page = projects.len() < PER_PAGE;
            records.extend(projects.into_iter().map(|p| self.to_record(&scope.org, p)));
            if last_page {
                break;
            }
            page += 1;
        }

        records.retain(|r| filters.matches(r));
        Ok(records)
    }
}
