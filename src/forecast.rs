//! Client for the external forecasting service.
//!
//! Unlike the GitHub fetchers, failures here are returned to the caller: the time-series
//! response embeds the forecast output and is meaningless without it.

use crate::transport::Transport;
use crate::types::{DateField, IssueRecord, IssueState};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

const FORECAST_PATH: &str = "/api/forecast";

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("forecast service is not configured")]
    NotConfigured,
    #[error("failed to encode forecast request: {0}")]
    Encode(serde_json::Error),
    #[error("forecast request failed: {0}")]
    Transport(String),
    #[error("forecast service responded with status {0}")]
    Status(u16),
    #[error("forecast service returned invalid JSON: {0}")]
    InvalidBody(serde_json::Error),
    #[error("forecast service returned a JSON value that is not an object")]
    NotAnObject,
}

/// An issue as the forecasting service expects it: dates only, labels by name.
#[derive(Debug, Serialize)]
struct ForecastIssue<'a> {
    issue_number: u64,
    created_at: String,
    closed_at: Option<String>,
    labels: &'a [String],
    state: IssueState,
    author: &'a str,
}

impl<'a> From<&'a IssueRecord> for ForecastIssue<'a> {
    fn from(issue: &'a IssueRecord) -> Self {
        Self {
            issue_number: issue.number,
            created_at: issue.created_at.format("%Y-%m-%d").to_string(),
            closed_at: issue
                .closed_at
                .map(|closed| closed.format("%Y-%m-%d").to_string()),
            labels: &issue.labels,
            state: issue.state,
            author: &issue.author,
        }
    }
}

#[derive(Debug, Serialize)]
struct ForecastRequest<'a> {
    issues: Vec<ForecastIssue<'a>>,
    #[serde(rename = "type")]
    series: DateField,
    repo: &'a str,
}

#[derive(Clone)]
pub struct ForecastClient {
    transport: Arc<dyn Transport>,
    endpoint: String,
}

impl ForecastClient {
    pub fn new(transport: Arc<dyn Transport>, base_url: &str) -> Self {
        Self {
            transport,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), FORECAST_PATH),
        }
    }

    /// Sends one forecast request for the `series` timestamps of `issues`.
    ///
    /// Makes a single attempt and returns the response object as-is.
    pub async fn dispatch(
        &self,
        issues: &[IssueRecord],
        series: DateField,
        repo_short_name: &str,
    ) -> Result<Map<String, Value>, ForecastError> {
        let request = ForecastRequest {
            issues: issues.iter().map(ForecastIssue::from).collect(),
            series,
            repo: repo_short_name,
        };
        let body = serde_json::to_value(&request).map_err(ForecastError::Encode)?;

        tracing::info!(
            repo = repo_short_name,
            series = %series,
            issues = issues.len(),
            "Requesting forecast"
        );

        let reply = self
            .transport
            .post_json(&self.endpoint, &body)
            .await
            .map_err(|e| ForecastError::Transport(e.to_string()))?;

        if !reply.status.is_success() {
            return Err(ForecastError::Status(reply.status.as_u16()));
        }

        match reply.json::<Value>().map_err(ForecastError::InvalidBody)? {
            Value::Object(map) => Ok(map),
            _ => Err(ForecastError::NotAnObject),
        }
    }
}
