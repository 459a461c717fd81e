//! Client for the GitHub REST endpoints the service reads from.
//!
//! Every method degrades instead of failing: pagination stops early and returns what it has,
//! and single-shot lookups fall back to empty values. The reason a fetch stopped early is
//! kept on [`FetchOutcome`] so callers can tell complete results from truncated ones.

use crate::config::RepoId;
use crate::transport::Transport;
use crate::types::{FetchWindow, IssueRecord, IssueState, RepoDetails};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Page size requested from the search endpoint (the API maximum).
pub const PER_PAGE: u32 = 100;

/// Lower bound on the wait after a rate-limited response without `retry-after`.
const MIN_RATE_LIMIT_WAIT_SECS: i64 = 60;

/// Upper bound on any rate-limit wait; GitHub rate-limit windows last at most an hour.
const MAX_RATE_LIMIT_WAIT_SECS: i64 = 3600;

/// Why a paginated fetch stopped before reaching an empty page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TruncationReason {
    RateLimitExhausted,
    UpstreamStatus(u16),
    Transport(String),
    MalformedBody(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Completeness {
    #[default]
    Complete,
    Truncated(TruncationReason),
}

/// The result of a paginated issue fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub issues: Vec<IssueRecord>,
    pub completeness: Completeness,
    /// Number of requests sent upstream, including retried ones.
    pub requests: u32,
    /// Number of rate-limit sleeps performed.
    pub backoffs: u32,
}

impl FetchOutcome {
    pub fn is_complete(&self) -> bool {
        self.completeness == Completeness::Complete
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Deserialize)]
struct SearchItem {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    number: u64,
    created_at: Option<String>,
    closed_at: Option<String>,
    state: Option<String>,
    labels: Option<Vec<LabelItem>>,
    user: Option<UserItem>,
}

#[derive(Deserialize)]
struct LabelItem {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct UserItem {
    #[serde(default)]
    login: String,
}

#[derive(Clone)]
pub struct GitHubClient {
    transport: Arc<dyn Transport>,
    api_url: String,
    max_rate_limit_retries: u32,
}

impl GitHubClient {
    pub fn new(transport: Arc<dyn Transport>, api_url: &str, max_rate_limit_retries: u32) -> Self {
        Self {
            transport,
            api_url: api_url.trim_end_matches('/').to_string(),
            max_rate_limit_retries,
        }
    }

    /// Fetches every issue of `repo` matching `window`, one page at a time.
    ///
    /// Rate-limited pages (403/429) are retried after the delay computed by
    /// [`rate_limit_delay`]; the fetch gives up once more than `max_rate_limit_retries`
    /// consecutive retries were needed. Any other failure ends pagination. In every case
    /// the issues gathered so far are returned.
    pub async fn fetch_issues(&self, repo: &RepoId, window: &FetchWindow) -> FetchOutcome {
        let url = format!("{}/search/issues", self.api_url);
        let q = window.search_query(repo);
        let mut outcome = FetchOutcome::default();
        let mut page: u32 = 1;
        let mut retries: u32 = 0;

        loop {
            let query = [
                ("q", q.clone()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];

            outcome.requests += 1;
            let reply = match self.transport.get(&url, &query).await {
                Ok(reply) => reply,
                Err(e) => {
                    outcome.completeness =
                        Completeness::Truncated(TruncationReason::Transport(e.to_string()));
                    break;
                }
            };

            if is_rate_limited(reply.status) {
                let delay = rate_limit_delay(&reply.headers, Utc::now());
                tracing::warn!(
                    repo = %repo,
                    page,
                    status = reply.status.as_u16(),
                    delay_secs = delay.as_secs(),
                    retry = retries + 1,
                    "Rate limited by GitHub, backing off"
                );
                tokio::time::sleep(delay).await;
                outcome.backoffs += 1;
                retries += 1;
                if retries > self.max_rate_limit_retries {
                    outcome.completeness =
                        Completeness::Truncated(TruncationReason::RateLimitExhausted);
                    break;
                }
                continue;
            }

            if reply.status != StatusCode::OK {
                outcome.completeness = Completeness::Truncated(TruncationReason::UpstreamStatus(
                    reply.status.as_u16(),
                ));
                break;
            }

            let items = match reply.json::<SearchResponse>() {
                Ok(body) => body.items,
                Err(e) => {
                    outcome.completeness =
                        Completeness::Truncated(TruncationReason::MalformedBody(e.to_string()));
                    break;
                }
            };

            if items.is_empty() {
                break;
            }

            tracing::debug!(repo = %repo, page, items = items.len(), "Fetched issue page");
            outcome
                .issues
                .extend(items.into_iter().filter_map(parse_search_item));
            page += 1;
            retries = 0;
        }

        if let Completeness::Truncated(reason) = &outcome.completeness {
            tracing::warn!(
                repo = %repo,
                state = %window.state,
                fetched = outcome.issues.len(),
                ?reason,
                "Issue fetch stopped early, returning partial results"
            );
        }

        outcome
    }

    /// Looks up star and fork counts. Any failure yields zeros.
    pub async fn fetch_repo_details(&self, repo: &RepoId) -> RepoDetails {
        let url = format!("{}/repos/{}", self.api_url, repo);
        match self.transport.get(&url, &[]).await {
            Ok(reply) if reply.status == StatusCode::OK => {
                reply.json::<RepoDetails>().unwrap_or_else(|e| {
                    tracing::warn!(repo = %repo, "Malformed repository details: {}", e);
                    RepoDetails::default()
                })
            }
            Ok(reply) => {
                tracing::warn!(repo = %repo, status = reply.status.as_u16(), "Repository details unavailable");
                RepoDetails::default()
            }
            Err(e) => {
                tracing::warn!(repo = %repo, "Failed to fetch repository details: {}", e);
                RepoDetails::default()
            }
        }
    }

    /// Fetches `/repos/<repo>/<endpoint>` verbatim. Any failure yields an empty JSON array.
    pub async fn fetch_repo_collection(
        &self,
        repo: &RepoId,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Value {
        let url = format!("{}/repos/{}/{}", self.api_url, repo, endpoint);
        match self.transport.get(&url, query).await {
            Ok(reply) if reply.status == StatusCode::OK => reply.json().unwrap_or_else(|e| {
                tracing::warn!(repo = %repo, endpoint, "Malformed collection body: {}", e);
                json!([])
            }),
            Ok(reply) => {
                tracing::warn!(repo = %repo, endpoint, status = reply.status.as_u16(), "Collection unavailable");
                json!([])
            }
            Err(e) => {
                tracing::warn!(repo = %repo, endpoint, "Failed to fetch collection: {}", e);
                json!([])
            }
        }
    }
}

fn is_rate_limited(status: StatusCode) -> bool {
    status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS
}

/// Computes how long to wait after a rate-limited response.
///
/// `retry-after` wins when present (seconds or an HTTP date). Otherwise the wait lasts until
/// `x-ratelimit-reset`, but never less than 60 seconds; a missing reset counts as `now`.
/// No wait exceeds one hour, whatever the headers claim.
pub fn rate_limit_delay(headers: &HeaderMap, now: DateTime<Utc>) -> Duration {
    let max_wait = Duration::from_secs(MAX_RATE_LIMIT_WAIT_SECS.unsigned_abs());

    if let Some(value) = headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()) {
        if let Ok(seconds) = value.trim().parse::<u64>() {
            return Duration::from_secs(seconds).min(max_wait);
        }
        if let Ok(date) = httpdate::parse_http_date(value) {
            return date
                .duration_since(SystemTime::from(now))
                .unwrap_or(Duration::ZERO)
                .min(max_wait);
        }
    }

    let reset = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or_else(|| now.timestamp());

    let wait = reset
        .saturating_sub(now.timestamp())
        .clamp(MIN_RATE_LIMIT_WAIT_SECS, MAX_RATE_LIMIT_WAIT_SECS);
    Duration::from_secs(wait.unsigned_abs())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Converts one search item, skipping it when it has no usable creation time.
fn parse_search_item(raw: Value) -> Option<IssueRecord> {
    let item: SearchItem = match serde_json::from_value(raw) {
        Ok(item) => item,
        Err(e) => {
            tracing::warn!("Skipping malformed search item: {}", e);
            return None;
        }
    };

    let Some(created_at) = item.created_at.as_deref().and_then(parse_timestamp) else {
        tracing::warn!(number = item.number, "Skipping search item without a valid created_at");
        return None;
    };
    let closed_at = item.closed_at.as_deref().and_then(parse_timestamp);

    let state = match item.state.as_deref() {
        Some("open") => IssueState::Open,
        Some("closed") => IssueState::Closed,
        _ if closed_at.is_some() => IssueState::Closed,
        _ => IssueState::Open,
    };

    Some(IssueRecord {
        id: item.id,
        number: item.number,
        created_at,
        closed_at,
        state,
        labels: item
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|label| label.name)
            .collect(),
        author: item.user.map(|user| user.login).unwrap_or_default(),
    })
}
