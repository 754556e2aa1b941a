use std::sync::Arc;

use axum::extract::State;
use axum::response::Redirect;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use huddle_core::auth::TokenResponse;

use crate::errors::ServiceError;
use crate::service::TokenService;

pub fn build_routes(service: Arc<TokenService>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/quickstart", get(quickstart))
        .route("/token", get(issue_token))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn index() -> Redirect {
    Redirect::to("/quickstart")
}

async fn quickstart() -> &'static str {
    "Huddle token service. GET /token for a room credential."
}

async fn issue_token(
    State(service): State<Arc<TokenService>>,
) -> Result<Json<TokenResponse>, ServiceError> {
    Ok(Json(service.issue().await?))
}

async fn health_check() -> &'static str {
    "OK"
}
