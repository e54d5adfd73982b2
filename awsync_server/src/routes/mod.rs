use axum::Router;

pub mod cron;
pub mod health;

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> Router {
    Router::new()
        .merge(cron::router())
        .merge(health::router())
}
