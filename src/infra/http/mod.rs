//! Poll, checkin and view endpoints.

mod error;
mod handlers;
mod middleware;

pub use error::{ApiError, ApiErrorBody, ApiErrorMessage};
pub use handlers::ViewParams;

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use sqlx::Error as SqlxError;

use crate::application::error::ErrorReport;
use crate::application::service::CacheService;
use crate::infra::db::PostgresRepositories;

use middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub service: CacheService,
    /// Present when the store or the queue lives in Postgres.
    pub db: Option<Arc<PostgresRepositories>>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/sessions/{session}/checkin", post(handlers::checkin))
        .route("/sessions/{session}/views/{root}", get(handlers::view_table))
        .route(
            "/sessions/{session}/views/{root}/refresh",
            post(handlers::refresh_view),
        )
        .route(
            "/sessions/{session}/views/{root}/ready",
            get(handlers::view_ready),
        )
        .route("/roots/{root}/recompute", post(handlers::recompute_root))
        .route("/roots/{root}/ready", get(handlers::root_ready))
        .route("/health", get(health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

fn db_health_response(result: Result<(), SqlxError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

async fn health(State(state): State<HttpState>) -> Response {
    match &state.db {
        Some(db) => db_health_response(db.health_check().await),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
