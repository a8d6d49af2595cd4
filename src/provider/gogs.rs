//! Gogs provider
//!
//! Gogs shares Gitea's repository wire shape (Gitea forked from Gogs) but is
//! kept as its own implementation: its API omits rate-limit headers entirely
//! and caps page size differently, so the budget stays in token-bucket
//! fallback mode.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::scheduler::RateLimitBudget;

use super::gitea::{to_record, GiteaRepo};
use super::{GitProvider, PlatformKind, ProviderError, RepoFilters, RepositoryRecord, Scope};

const PER_PAGE: usize = 50;

pub struct GogsProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    budget: Arc<RateLimitBudget>,
}

impl GogsProvider {
    pub fn new(
        base_url: Option<String>,
        token: Option<String>,
        budget: Arc<RateLimitBudget>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or_else(|| "https://try.gogs.io".to_string())
                .trim_end_matches('/')
                .to_string(),
            token,
            budget,
        }
    }
}

#[async_trait]
impl GitProvider for GogsProvider {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Gogs
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

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::from_status(
                    PlatformKind::Gogs,
                    status,
                    &resource,
                    body,
                ));
            }

            let repos: Vec<GiteaRepo> = response.json().await?;
            debug!(org = %scope.org, page, count = repos.len(), "fetched gogs repo page");
            let last_page = repos.len() < PER_PAGE;
            records.extend(
                repos
                    .into_iter()
                    .map(|r| to_record(PlatformKind::Gogs, &scope.org, r)),
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

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_list_single_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/orgs/acme/repos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec![serde_json::json!({
                "name": "legacy",
                "private": false,
                "fork": false,
                "archived": false,
                "default_branch": "master",
                "clone_url": "https://gogs.example.com/acme/legacy.git",
                "ssh_url": "git@gogs.example.com:acme/legacy.git",
            })]))
            .mount(&server)
            .await;

        let provider = GogsProvider::new(
            Some(server.uri()),
            None,
            Arc::new(RateLimitBudget::new(PlatformKind::Gogs, 100)),
        );
        let records = provider
            .list_repositories(&Scope::new("acme"), &RepoFilters::default())
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key(), "gogs:acme/legacy");
        assert_eq!(records[0].default_branch.as_deref(), Some("master"));
    }
}
