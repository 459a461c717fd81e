//! Domain types shared by the fetchers, the aggregator and the forecast client.

use crate::config::RepoId;
use chrono::{DateTime, Datelike, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp layout used inside `created:<since>..<until>` search qualifiers.
const QUALIFIER_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// The state of an issue, as understood by the search API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueState::Open => "open",
            IssueState::Closed => "closed",
        }
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which timestamp of an issue an aggregation or forecast works on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateField {
    CreatedAt,
    ClosedAt,
}

impl DateField {
    pub fn as_str(self) -> &'static str {
        match self {
            DateField::CreatedAt => "created_at",
            DateField::ClosedAt => "closed_at",
        }
    }

    /// Reads the selected timestamp from an issue, if it has one.
    pub fn value_of(self, issue: &IssueRecord) -> Option<DateTime<Utc>> {
        match self {
            DateField::CreatedAt => Some(issue.created_at),
            DateField::ClosedAt => issue.closed_at,
        }
    }
}

impl fmt::Display for DateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single issue as returned by the search API, reduced to the fields we use.
///
/// Records are never modified after ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub id: u64,
    pub number: u64,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub state: IssueState,
    pub labels: Vec<String>,
    pub author: String,
}

/// The creation-time range and state filter for one paginated fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub state: IssueState,
}

impl FetchWindow {
    /// Builds a window ending at `now` and starting on the first day of the month
    /// `months` calendar months earlier, keeping the time of day.
    pub fn trailing_months(now: DateTime<Utc>, months: u32, state: IssueState) -> Self {
        let since = now
            .with_day(1)
            .and_then(|first| first.checked_sub_months(Months::new(months)))
            .unwrap_or(now);

        Self {
            since,
            until: now,
            state,
        }
    }

    /// The `q` parameter for the issue search endpoint.
    pub fn search_query(&self, repo: &RepoId) -> String {
        format!(
            "repo:{} type:issue state:{} created:{}..{}",
            repo,
            self.state,
            self.since.format(QUALIFIER_FORMAT),
            self.until.format(QUALIFIER_FORMAT),
        )
    }
}

/// Star and fork counts for a repository. Zero when the lookup failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoDetails {
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_trailing_months_snaps_to_first_of_month() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 15, 30, 0).unwrap();
        let window = FetchWindow::trailing_months(now, 2, IssueState::Open);

        assert_eq!(
            window.since,
            Utc.with_ymd_and_hms(2024, 1, 1, 15, 30, 0).unwrap()
        );
        assert_eq!(window.until, now);
    }

    #[test]
    fn test_trailing_months_crosses_year_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 2, 10, 8, 0, 0).unwrap();
        let window = FetchWindow::trailing_months(now, 12, IssueState::Closed);

        assert_eq!(
            window.since,
            Utc.with_ymd_and_hms(2023, 2, 1, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_search_query() {
        let now = Utc.with_ymd_and_hms(2024, 4, 15, 12, 0, 0).unwrap();
        let window = FetchWindow::trailing_months(now, 1, IssueState::Closed);
        let repo = RepoId {
            owner: "octocat".to_string(),
            repo: "demo".to_string(),
        };

        assert_eq!(
            window.search_query(&repo),
            "repo:octocat/demo type:issue state:closed created:2024-03-01T12:00:00Z..2024-04-15T12:00:00Z"
        );
    }

    #[test]
    fn test_date_field_reads_optional_close_time() {
        let issue = IssueRecord {
            id: 1,
            number: 1,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            closed_at: None,
            state: IssueState::Open,
            labels: vec![],
            author: "octocat".to_string(),
        };

        assert_eq!(
            DateField::CreatedAt.value_of(&issue),
            Some(issue.created_at)
        );
        assert_eq!(DateField::ClosedAt.value_of(&issue), None);
    }
}
