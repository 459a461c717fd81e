//! Service layer that sequences fetching, aggregation and forecasting per request.
//!
//! This module implements `IssueQuerier`, the entry point used by the HTTP handlers. For each
//! operation it:
//! 1. Computes the creation-time window relative to the current time.
//! 2. Fetches open and closed issues, one repository and one state at a time.
//! 3. Aggregates the raw issues into the response shape.
//! 4. For the time series, forwards the issues to the forecasting service.
//!
//! Nothing is cached: every call fetches fresh data.

use crate::config::{AppConfig, RepoId};
use crate::forecast::{ForecastClient, ForecastError};
use crate::github::GitHubClient;
use crate::metrics::{self, ActivityModes, RepoSummary};
use crate::transport::{ReqwestTransport, Transport};
use crate::types::{DateField, FetchWindow, IssueRecord, IssueState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Combined monthly series, repository counts and forecast output for one repository.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesResponse {
    pub created: Vec<(String, usize)>,
    pub closed: Vec<(String, usize)>,
    pub star_count: u64,
    pub fork_count: u64,
    pub created_at_image_urls: Map<String, Value>,
    pub closed_at_image_urls: Map<String, Value>,
}

/// Raw upstream listings for one repository, each `[]` when unavailable.
#[derive(Debug, Clone, Serialize)]
pub struct FullRepoData {
    pub issues_open: Value,
    pub issues_closed: Value,
    pub pulls: Value,
    pub commits: Value,
    pub branches: Value,
    pub contributors: Value,
    pub releases: Value,
}

#[derive(Clone)]
pub struct IssueQuerier {
    github: GitHubClient,
    forecast: Option<ForecastClient>,
    config: AppConfig,
}

impl IssueQuerier {
    /// Initializes a new IssueQuerier backed by real HTTP clients.
    ///
    /// The GitHub token is only attached to the GitHub transport.
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        if config.github_token.is_none() {
            tracing::warn!("GITHUB_TOKEN is not set; GitHub requests are unauthenticated");
        }
        let github = Arc::new(ReqwestTransport::new(config.github_token.as_deref())?);
        let forecast = Arc::new(ReqwestTransport::new(None)?);
        Ok(Self::with_transports(config, github, forecast))
    }

    /// Builds a querier over caller-supplied transports.
    pub fn with_transports(
        config: &AppConfig,
        github: Arc<dyn Transport>,
        forecast: Arc<dyn Transport>,
    ) -> Self {
        let forecast = match &config.forecast_api_url {
            Some(url) => Some(ForecastClient::new(forecast, url)),
            None => {
                tracing::warn!("FORECAST_API_URL is not set; time series requests will fail");
                None
            }
        };

        Self {
            github: GitHubClient::new(
                github,
                &config.github_api_url,
                config.max_rate_limit_retries,
            ),
            forecast,
            config: config.clone(),
        }
    }

    pub fn repositories(&self) -> &[RepoId] {
        &self.config.repositories
    }

    /// Summarizes every configured repository over the last `months` calendar months.
    ///
    /// Repositories are processed one after another, so the latency is the sum of all
    /// fetches including rate-limit waits.
    pub async fn summary(&self, months: u32) -> BTreeMap<String, RepoSummary> {
        let now = Utc::now();
        let mut summaries = BTreeMap::new();

        for repo in &self.config.repositories {
            let (open, closed) = self.fetch_open_and_closed(repo, months, now).await;
            let details = self.github.fetch_repo_details(repo).await;
            tracing::info!(
                repo = %repo,
                open = open.len(),
                closed = closed.len(),
                "Summarized repository"
            );
            summaries.insert(repo.to_string(), RepoSummary::build(&open, &closed, details));
        }

        summaries
    }

    /// Most frequent weekday and month of issue activity over the extended window.
    pub async fn repo_stats(&self, repo: &RepoId) -> ActivityModes {
        let (open, closed) = self
            .fetch_open_and_closed(repo, self.config.extended_months, Utc::now())
            .await;
        ActivityModes::build(&open, &closed)
    }

    /// Gap-filled monthly created/closed series plus forecasts for both series.
    ///
    /// Fails if the forecasting service is not configured or either forecast call fails.
    pub async fn time_series(&self, repo: &RepoId) -> Result<TimeSeriesResponse, ForecastError> {
        let forecast = self.forecast.as_ref().ok_or(ForecastError::NotConfigured)?;

        let (mut issues, closed) = self
            .fetch_open_and_closed(repo, self.config.extended_months, Utc::now())
            .await;
        issues.extend(closed);

        let created = metrics::monthly_series_filled(&issues, DateField::CreatedAt);
        let closed = metrics::monthly_series_filled(&issues, DateField::ClosedAt);
        let details = self.github.fetch_repo_details(repo).await;

        let created_at_image_urls = forecast
            .dispatch(&issues, DateField::CreatedAt, &repo.repo)
            .await?;
        let closed_at_image_urls = forecast
            .dispatch(&issues, DateField::ClosedAt, &repo.repo)
            .await?;

        Ok(TimeSeriesResponse {
            created,
            closed,
            star_count: details.stargazers_count,
            fork_count: details.forks_count,
            created_at_image_urls,
            closed_at_image_urls,
        })
    }

    /// Raw issue, pull, commit, branch, contributor and release listings for a repository.
    pub async fn full_repo_data(&self, repo: &RepoId) -> FullRepoData {
        let github = &self.github;
        FullRepoData {
            issues_open: github
                .fetch_repo_collection(repo, "issues", &[("state", "open".to_string())])
                .await,
            issues_closed: github
                .fetch_repo_collection(repo, "issues", &[("state", "closed".to_string())])
                .await,
            pulls: github.fetch_repo_collection(repo, "pulls", &[]).await,
            commits: github.fetch_repo_collection(repo, "commits", &[]).await,
            branches: github.fetch_repo_collection(repo, "branches", &[]).await,
            contributors: github.fetch_repo_collection(repo, "contributors", &[]).await,
            releases: github.fetch_repo_collection(repo, "releases", &[]).await,
        }
    }

    async fn fetch_open_and_closed(
        &self,
        repo: &RepoId,
        months: u32,
        now: DateTime<Utc>,
    ) -> (Vec<IssueRecord>, Vec<IssueRecord>) {
        let open = self
            .github
            .fetch_issues(repo, &FetchWindow::trailing_months(now, months, IssueState::Open))
            .await;
        let closed = self
            .github
            .fetch_issues(repo, &FetchWindow::trailing_months(now, months, IssueState::Closed))
            .await;
        (open.issues, closed.issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{issue_json, ok_json, search_page, ScriptedTransport};
    use crate::transport::HttpReply;
    use reqwest::StatusCode;
    use serde_json::json;

    fn config(repos: &str, forecast: Option<&str>) -> AppConfig {
        AppConfig {
            github_api_url: "https://api.github.test".to_string(),
            forecast_api_url: forecast.map(str::to_string),
            repositories: repos
                .split(',')
                .filter_map(RepoId::parse)
                .collect(),
            ..AppConfig::default()
        }
    }

    fn demo() -> RepoId {
        RepoId::parse("octocat/demo").unwrap()
    }

    fn querier(config: &AppConfig, transport: Arc<ScriptedTransport>) -> IssueQuerier {
        IssueQuerier::with_transports(config, transport.clone(), transport)
    }

    fn demo_transport() -> ScriptedTransport {
        ScriptedTransport::new()
            .on(
                "state:open",
                [
                    search_page(vec![
                        issue_json(1, "2024-03-04T10:00:00Z", None),
                        issue_json(2, "2024-03-12T10:00:00Z", None),
                        issue_json(3, "2024-03-20T10:00:00Z", None),
                        issue_json(4, "2024-04-01T10:00:00Z", None),
                        issue_json(5, "2024-04-18T10:00:00Z", None),
                    ]),
                    search_page(vec![]),
                ],
            )
            .on(
                "state:closed",
                [
                    search_page(vec![issue_json(
                        6,
                        "2024-01-04T10:00:00Z",
                        Some("2024-04-02T10:00:00Z"),
                    )]),
                    search_page(vec![]),
                ],
            )
            .on(
                "/repos/octocat/demo",
                [ok_json(json!({ "stargazers_count": 12, "forks_count": 4 }))],
            )
    }

    #[tokio::test]
    async fn test_summary_end_to_end() {
        let transport = Arc::new(demo_transport());
        let querier = querier(&config("octocat/demo", None), transport);

        let summaries = querier.summary(2).await;

        let summary = &summaries["octocat/demo"];
        let json = serde_json::to_value(summary).unwrap();
        assert_eq!(
            json["monthly_created_issues"],
            json!({ "March 2024": 3, "April 2024": 2 })
        );
        assert_eq!(json["total_created_issues"], 5);
        assert_eq!(json["monthly_closed_issues"], json!({ "April 2024": 1 }));
        assert_eq!(json["total_closed_issues"], 1);
        assert_eq!(json["total_stars"], 12);
        assert_eq!(json["total_forks"], 4);
    }

    #[tokio::test]
    async fn test_summary_processes_repositories_sequentially() {
        let transport = Arc::new(ScriptedTransport::new());
        let querier = querier(&config("a/one,b/two", None), transport.clone());

        let summaries = querier.summary(2).await;

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries["a/one"], RepoSummary::default());

        let lines: Vec<String> = transport.requests().into_iter().map(|r| r.line).collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].contains("repo:a/one") && lines[0].contains("state:open"));
        assert!(lines[1].contains("repo:a/one") && lines[1].contains("state:closed"));
        assert!(lines[2].ends_with("/repos/a/one"));
        assert!(lines[3].contains("repo:b/two") && lines[3].contains("state:open"));
        assert!(lines[4].contains("repo:b/two") && lines[4].contains("state:closed"));
        assert!(lines[5].ends_with("/repos/b/two"));
    }

    #[tokio::test]
    async fn test_repo_stats() {
        let transport = Arc::new(demo_transport());
        let querier = querier(&config("", None), transport);

        let stats = querier.repo_stats(&demo()).await;

        // Two of the five open issues were created on a Monday, the rest on distinct days.
        assert_eq!(stats.max_created_day.as_deref(), Some("Monday"));
        assert_eq!(stats.max_created_month.as_deref(), Some("March"));
        assert_eq!(stats.max_closed_day.as_deref(), Some("Tuesday"));
        assert_eq!(stats.max_closed_month.as_deref(), Some("April"));
    }

    #[tokio::test]
    async fn test_time_series_merges_forecasts() {
        let transport = Arc::new(demo_transport().on(
            "/api/forecast",
            [
                ok_json(json!({ "created_plot": "gs://created.png" })),
                ok_json(json!({ "closed_plot": "gs://closed.png" })),
            ],
        ));
        let querier = querier(
            &config("", Some("http://forecast.test")),
            transport.clone(),
        );

        let response = querier.time_series(&demo()).await.unwrap();
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(
            json["created"],
            json!([["2024-01", 1], ["2024-02", 0], ["2024-03", 3], ["2024-04", 2]])
        );
        assert_eq!(json["closed"], json!([["2024-04", 1]]));
        assert_eq!(json["starCount"], 12);
        assert_eq!(json["forkCount"], 4);
        assert_eq!(json["createdAtImageUrls"]["created_plot"], "gs://created.png");
        assert_eq!(json["closedAtImageUrls"]["closed_plot"], "gs://closed.png");

        let posts: Vec<_> = transport
            .requests()
            .into_iter()
            .filter(|r| r.method == "POST")
            .collect();
        assert_eq!(posts.len(), 2);
        let first = posts[0].body.as_ref().unwrap();
        assert_eq!(first["type"], "created_at");
        assert_eq!(first["repo"], "demo");
        assert_eq!(first["issues"].as_array().unwrap().len(), 6);
        assert_eq!(posts[1].body.as_ref().unwrap()["type"], "closed_at");
    }

    #[tokio::test]
    async fn test_time_series_propagates_forecast_failure() {
        let transport = Arc::new(demo_transport().on(
            "/api/forecast",
            [HttpReply::new(StatusCode::SERVICE_UNAVAILABLE, "")],
        ));
        let querier = querier(&config("", Some("http://forecast.test")), transport);

        let result = querier.time_series(&demo()).await;

        assert!(matches!(result, Err(ForecastError::Status(503))));
    }

    #[tokio::test]
    async fn test_time_series_requires_forecast_url() {
        let transport = Arc::new(demo_transport());
        let querier = querier(&config("", None), transport.clone());

        let result = querier.time_series(&demo()).await;

        assert!(matches!(result, Err(ForecastError::NotConfigured)));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_full_repo_data_falls_back_to_empty_lists() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on("/repos/octocat/demo/pulls", [ok_json(json!([{ "number": 9 }]))])
                .on(
                    "/repos/octocat/demo/issues?state=closed",
                    [ok_json(json!([{ "number": 3 }]))],
                ),
        );
        let querier = querier(&config("", None), transport.clone());

        let data = querier.full_repo_data(&demo()).await;

        assert_eq!(data.pulls, json!([{ "number": 9 }]));
        assert_eq!(data.issues_closed, json!([{ "number": 3 }]));
        assert_eq!(data.issues_open, json!([]));
        assert_eq!(data.releases, json!([]));
        assert_eq!(transport.requests().len(), 7);
    }
}
