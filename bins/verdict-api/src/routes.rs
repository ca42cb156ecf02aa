// Router for the Verdict API

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/languages", get(handlers::list_languages))
        .route("/evaluate", post(handlers::submit_evaluation))
        .route("/evaluate/:submission_id", get(handlers::get_evaluation))
        .route("/compile", post(handlers::submit_compile))
        .route("/compile/:identifier", get(handlers::get_compile))
}
