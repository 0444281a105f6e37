use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::app::AppContext;
use crate::operation::OperationRecord;

mod table;

pub use table::render_table;

/// Lower bound for how stale the poll loop may be before `/healthz` fails.
const MIN_STALENESS: Duration = Duration::from_secs(30);

pub fn create_router(ctx: AppContext) -> Router {
    let api = Router::new()
        .route("/running", get(get_running))
        .route("/history", get(get_history));

    Router::new()
        .route("/healthz", get(get_healthz))
        .route("/metrics", get(get_metrics))
        .route("/version", get(get_version))
        .route("/running", get(get_running_table))
        .route("/history", get(get_history_table))
        .nest("/api/v1", api)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn get_healthz(State(ctx): State<AppContext>) -> StatusCode {
    let staleness = ctx.config.poll.interval.saturating_mul(3).max(MIN_STALENESS);
    if ctx.state.is_ready(staleness).await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn get_metrics(State(ctx): State<AppContext>) -> Response {
    match ctx.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = ?err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

#[derive(Serialize)]
struct VersionResponse {
    name: &'static str,
    version: &'static str,
}

async fn get_version() -> Json<VersionResponse> {
    Json(VersionResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Operations in flight as of the last tick.
pub async fn get_running(State(ctx): State<AppContext>) -> Json<Vec<OperationRecord>> {
    Json(ctx.state.view().running.clone())
}

/// Completed slow operations, oldest first.
pub async fn get_history(State(ctx): State<AppContext>) -> Json<Vec<OperationRecord>> {
    Json(ctx.state.view().history.to_vec())
}

pub async fn get_running_table(State(ctx): State<AppContext>) -> Html<String> {
    Html(render_table("Running operations", &ctx.state.view().running))
}

pub async fn get_history_table(State(ctx): State<AppContext>) -> Html<String> {
    Html(render_table("Slow operation history", &ctx.state.view().history))
}
