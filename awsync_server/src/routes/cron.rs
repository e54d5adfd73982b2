use crate::auth;
use crate::error::ApiError;
use crate::server::AppState;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Extension, Json, Router};
use awsync_core::RunSummary;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct CronResponse {
    pub success: bool,
    pub summary: RunSummary,
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> Router {
    Router::new().route("/api/cron", get(run_cron).post(run_cron))
}

/// Scheduled trigger: authenticate, run the pipeline once in the configured mode.
#[tracing::instrument(level = "info", name = "awsync.cron", skip_all)]
pub async fn run_cron(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CronResponse>, ApiError> {
    auth::require_bearer(&headers, &state.trigger.secret)?;

    let mode = state.trigger.mode;
    tracing::info!(%mode, "cron run started");

    let run = state.pipeline.run(mode);
    let outcome = match state.trigger.run_timeout {
        Some(limit) => match tokio::time::timeout(limit, run).await {
            Ok(res) => res.map_err(ApiError::from),
            Err(_) => Err(ApiError::Timeout(limit)),
        },
        None => run.await.map_err(ApiError::from),
    };

    match outcome {
        Ok(summary) => {
            tracing::info!(
                buckets = summary.buckets,
                events = summary.events,
                buckets_inserted = summary.buckets_inserted,
                events_inserted = summary.events_inserted,
                "cron run completed"
            );
            Ok(Json(CronResponse {
                success: true,
                summary,
            }))
        }
        Err(e) => {
            tracing::error!(error = %e, "cron run failed");
            Err(e)
        }
    }
}
