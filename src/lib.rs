pub mod config;
pub mod error;
pub mod forecast;
pub mod github;
pub mod metrics;
pub mod querier;
pub mod test_utils;
pub mod transport;
pub mod types;

use axum::{
    extract::{Path, State},
    http::{header, Method},
    routing::get,
    Json, Router,
};
use config::{AppConfig, RepoId};
use error::{ApiError, ApiResult};
use metrics::{ActivityModes, RepoSummary};
use querier::{FullRepoData, IssueQuerier, TimeSeriesResponse};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use transport::Transport;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// Shared application state accessible to all request handlers.
pub struct AppState {
    /// Service sequencing upstream fetches, aggregation and forecasting.
    pub querier: IssueQuerier,
    /// Application configuration loaded from environment variables.
    pub config: AppConfig,
}

impl AppState {
    /// Initializes the application state with real HTTP clients.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let querier = IssueQuerier::new(&config)?;
        Ok(Self { querier, config })
    }

    /// Initializes the application state over the given transports.
    pub fn with_transports(
        config: AppConfig,
        github: Arc<dyn Transport>,
        forecast: Arc<dyn Transport>,
    ) -> Self {
        let querier = IssueQuerier::with_transports(&config, github, forecast);
        Self { querier, config }
    }
}

pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/repos", get(get_repositories))
        .route("/api/repo_data", get(get_repo_data))
        .route("/api/repo_data/extended", get(get_extended_repo_data))
        .route("/api/repo_stats/{owner}/{repo}", get(get_repo_stats))
        .route("/api/github/{owner}/{repo}", get(get_time_series))
        .route("/api/full_repo_data/{owner}/{repo}", get(get_full_repo_data))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn validated(repo_id: RepoId) -> ApiResult<RepoId> {
    if repo_id.is_valid() {
        Ok(repo_id)
    } else {
        Err(ApiError::bad_request(format!(
            "Invalid repository identifier: {repo_id}"
        )))
    }
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "issueflow",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn get_repositories(State(state): State<Arc<AppState>>) -> Json<Vec<RepoId>> {
    Json(state.querier.repositories().to_vec())
}

pub async fn get_repo_data(
    State(state): State<Arc<AppState>>,
) -> Json<BTreeMap<String, RepoSummary>> {
    Json(state.querier.summary(state.config.summary_months).await)
}

pub async fn get_extended_repo_data(
    State(state): State<Arc<AppState>>,
) -> Json<BTreeMap<String, RepoSummary>> {
    Json(state.querier.summary(state.config.extended_months).await)
}

pub async fn get_repo_stats(
    Path(repo_id): Path<RepoId>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ActivityModes>> {
    let repo_id = validated(repo_id)?;
    Ok(Json(state.querier.repo_stats(&repo_id).await))
}

pub async fn get_time_series(
    Path(repo_id): Path<RepoId>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<TimeSeriesResponse>> {
    let repo_id = validated(repo_id)?;
    match state.querier.time_series(&repo_id).await {
        Ok(response) => {
            tracing::debug!(repo_id = %repo_id, "Returning time series");
            Ok(Json(response))
        }
        Err(e) => {
            tracing::error!("Failed to build time series for {}: {}", repo_id, e);
            Err(e.into())
        }
    }
}

pub async fn get_full_repo_data(
    Path(repo_id): Path<RepoId>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<FullRepoData>> {
    let repo_id = validated(repo_id)?;
    Ok(Json(state.querier.full_repo_data(&repo_id).await))
}
