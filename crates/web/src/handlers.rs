use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use pr_ci_core::AppError;

use crate::{AppState, extract::SnsNotification, router::route_notification};

pub fn build_router() -> Router<AppState> {
    Router::new().route("/health", get(health)).route("/events", post(webhook))
}

async fn health() -> &'static str { "ok" }

/// Entry point for SNS-delivered notifications. One notification per request,
/// handled synchronously; the response is the only acknowledgement.
async fn webhook(
    State(state): State<AppState>,
    SnsNotification { notification }: SnsNotification,
) -> Result<Response, AppError> {
    let outcome = route_notification(&state.config, &state.ci, notification).await?;
    tracing::info!("Processed notification: {outcome:?}");
    Ok((StatusCode::OK, "Event processed").into_response())
}
