//! Gitea provider
//!
//! Lists organization repositories through the Gitea v1 API. The response
//! model is shared with the Gogs provider, whose API predates Gitea's fork
//! and still speaks the same repository shape.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::scheduler::RateLimitBudget;

use super::{
    record_rate_limit_headers, GitProvider, PlatformKind, ProviderError, RepoFilters,
    RepositoryRecord, Scope, Visibility,
};

pub(crate) const PER_PAGE: usize = 50;

/// Repository payload common to Gitea and Gogs.
#[derive(Debug, Deserialize)]
pub(crate) struct GiteaRepo {
    pub name: String,
    pub private: bool,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub archived: bool,
    pub default_branch: Option<String>,
    pub clone_url: String,
    pub ssh_url: String,
}

pub(crate) fn to_record(
    provider: PlatformKind,
    org: &str,
    repo: GiteaRepo,
) -> RepositoryRecord {
    RepositoryRecord {
        provider,
        org: org.to_string(),
        name: repo.name,
        visibility: if repo.private {
            Visibility::Private
        } else {
            Visibility::Public
        },
        default_branch: repo.default_branch,
        https_url: repo.clone_url,
        ssh_url: repo.ssh_url,
        archived: repo.archived,
        fork: repo.fork,
    }
}

pub struct GiteaProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    budget: Arc<RateLimitBudget>,
}

impl GiteaProvider {
    /// Gitea is self-hosted; `base_url` is required by the CLI layer, but a
    /// missing value falls back to the public gitea.com instance.
    pub fn new(
        base_url: Option<String>,
        token: Option<String>,
        budget: Arc<RateLimitBudget>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or_else(|| "https://gitea.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            token,
            budget,
        }
    }
}

#[async_trait]
impl GitProvider for GiteaProvider {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Gitea
    }

    async fn list_repositories(
        &self,
        scope: &Scope,
        filters: &RepoFilters,
    ) -> Result<Vec<RepositoryRecord>, ProviderError> {
        let resource = format!("api/v1/orgs/{}/repos", scope.org);
        let mut records = Vec::new();
        let mut page = 1u32;

        loop {
            self.budget.acquire().await;

            let url = format!("{}/{}", self.base_url, resource);
            let mut request = self.client.get(&url).query(&[
                ("limit", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ]);
            if let Some(token) = &self.token {
                request = request.header("Authorization", format!("token {token}"));
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
                    PlatformKind::Gitea,
                    status,
                    &resource,
                    body,
                ));
            }

            let repos: Vec<GiteaRepo> = response.json().await?;
            debug!(org = %scope.org, page, count = repos.len(), "fetched gitea repo page");
            let last_page = repos.len() < PER_PAGE;
            records.extend(
                repos
                    .into_iter()
                    .map(|r| to_record(PlatformKind::Gitea, &scope.org, r)),
            );
            if last_page {
                break;
            }
            page += 1;
        }

        records.retain(|r| filters.matches(r));
        Ok(records)
    }
}
