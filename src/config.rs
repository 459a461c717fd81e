//! Application configuration and environment variable parsing.
//!
//! This module handles loading configuration settings from the environment (e.g., .env file).
//! It defines the `AppConfig` struct which governs the upstream API endpoints, the token used
//! to call them, the tracked repositories and the lookback windows used for aggregation.
//!
//! The configuration is built once in `main` and handed to each component's constructor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Repositories tracked when `REPOSITORIES` is not set.
const DEFAULT_REPOSITORIES: &str = "langchain-ai/langchain,langchain-ai/langgraph,microsoft/autogen,openai/openai-cookbook,elastic/elasticsearch,milvus-io/pymilvus";

/// A unique identifier for a GitHub repository.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoId {
    /// The owner of the repository (e.g., "octocat").
    pub owner: String,
    /// The name of the repository (e.g., "demo").
    pub repo: String,
}

impl RepoId {
    /// Parses an `owner/name` pair. Returns `None` unless both halves are valid path segments.
    pub fn parse(s: &str) -> Option<Self> {
        let (owner, repo) = s.trim().split_once('/')?;
        let id = Self {
            owner: owner.trim().to_string(),
            repo: repo.trim().to_string(),
        };
        id.is_valid().then_some(id)
    }

    /// Rejects segments that would change the shape of the upstream URL.
    pub fn is_valid(&self) -> bool {
        [&self.owner, &self.repo].iter().all(|segment| {
            !segment.is_empty()
                && !segment.contains('/')
                && !segment.contains("..")
                && !segment.chars().any(char::is_whitespace)
        })
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Application configuration loaded from environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Optional GitHub Personal Access Token. Requests are unauthenticated without it.
    pub github_token: Option<String>,

    /// Base URL of the GitHub REST API.
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,

    /// Base URL of the forecasting service. `/api/forecast` is appended to it.
    pub forecast_api_url: Option<String>,

    /// Repositories included in the summary endpoints.
    /// Expected format: comma-separated string of "owner/repo" pairs.
    /// Example: "octocat/demo,rust-lang/rust"
    #[serde(
        default = "default_repositories",
        deserialize_with = "deserialize_repositories"
    )]
    pub repositories: Vec<RepoId>,

    /// Lookback in calendar months for the quick multi-repository summary.
    #[serde(default = "default_summary_months")]
    pub summary_months: u32,

    /// Lookback in calendar months for the extended summary, statistics and time series.
    #[serde(default = "default_extended_months")]
    pub extended_months: u32,

    /// Number of consecutive rate-limited responses tolerated for a single page.
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    /// Port the HTTP server binds to.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_repositories() -> Vec<RepoId> {
    parse_repositories(DEFAULT_REPOSITORIES)
}

fn default_summary_months() -> u32 {
    2
}

fn default_extended_months() -> u32 {
    12
}

fn default_max_rate_limit_retries() -> u32 {
    5
}

fn default_port() -> u16 {
    5000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            github_token: None,
            github_api_url: default_github_api_url(),
            forecast_api_url: None,
            repositories: default_repositories(),
            summary_months: default_summary_months(),
            extended_months: default_extended_months(),
            max_rate_limit_retries: default_max_rate_limit_retries(),
            port: default_port(),
        }
    }
}

fn deserialize_repositories<'de, D>(deserializer: D) -> Result<Vec<RepoId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Ok(parse_repositories(&s))
}

fn parse_repositories(s: &str) -> Vec<RepoId> {
    s.split(',')
        .filter_map(|part| {
            let parsed = RepoId::parse(part);
            if parsed.is_none() && !part.trim().is_empty() {
                tracing::warn!(entry = part, "Ignoring malformed repository entry");
            }
            parsed
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: [&str; 8] = [
        "GITHUB_TOKEN",
        "GITHUB_API_URL",
        "FORECAST_API_URL",
        "REPOSITORIES",
        "SUMMARY_MONTHS",
        "EXTENDED_MONTHS",
        "MAX_RATE_LIMIT_RETRIES",
        "PORT",
    ];

    fn clear_vars() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        clear_vars();
        env::set_var("GITHUB_TOKEN", "secret");
        env::set_var("FORECAST_API_URL", "http://forecast.local");
        env::set_var("REPOSITORIES", "owner1/repo1, owner2/repo2");
        env::set_var("SUMMARY_MONTHS", "3");
        env::set_var("EXTENDED_MONTHS", "6");
        env::set_var("MAX_RATE_LIMIT_RETRIES", "2");
        env::set_var("PORT", "8080");

        let config = AppConfig::from_env().expect("Failed to load config");

        assert_eq!(config.github_token.as_deref(), Some("secret"));
        assert_eq!(config.github_api_url, "https://api.github.com");
        assert_eq!(
            config.forecast_api_url.as_deref(),
            Some("http://forecast.local")
        );
        assert_eq!(config.repositories.len(), 2);
        assert_eq!(config.repositories[1].owner, "owner2");
        assert_eq!(config.repositories[1].repo, "repo2");
        assert_eq!(config.summary_months, 3);
        assert_eq!(config.extended_months, 6);
        assert_eq!(config.max_rate_limit_retries, 2);
        assert_eq!(config.port, 8080);

        clear_vars();
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_vars();

        let config = AppConfig::from_env().expect("Failed to load config");

        assert_eq!(config.github_token, None);
        assert_eq!(config.forecast_api_url, None);
        assert_eq!(config.repositories.len(), 6);
        assert_eq!(config.repositories[0].to_string(), "langchain-ai/langchain");
        assert_eq!(config.summary_months, 2);
        assert_eq!(config.extended_months, 12);
        assert_eq!(config.max_rate_limit_retries, 5);
        assert_eq!(config.port, 5000);
    }

    #[test]
    #[serial]
    fn test_config_rejects_bad_number() {
        clear_vars();
        env::set_var("SUMMARY_MONTHS", "two");

        assert!(AppConfig::from_env().is_err());

        clear_vars();
    }

    #[test]
    fn test_parse_repositories_skips_malformed_entries() {
        let repos = parse_repositories("a/b,,nope,c/d/e,../x,f/g");
        let names: Vec<String> = repos.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["a/b", "f/g"]);
    }
}
