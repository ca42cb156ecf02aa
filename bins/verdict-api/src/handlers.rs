// HTTP route handlers for the Verdict API

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use verdict_common::redis;
use verdict_common::types::{
    CompileRequest, CompiledProgram, EvalResult, EvaluateRequest, Job, StreamStatus, TestGroup,
};

use crate::language_config::LanguageRegistry;
use crate::metrics;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitEvaluation {
    pub program: CompiledProgram,
    #[serde(default)]
    pub validator: Option<CompiledProgram>,
    pub groups: Vec<TestGroup>,
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
    #[serde(default)]
    pub evaluate_all: bool,
    #[serde(default)]
    pub exact_output: bool,
}

#[derive(Debug, Serialize)]
pub struct SubmitEvaluationResponse {
    pub submission_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    /// Index of the first streamed result to return
    #[serde(default)]
    pub from: usize,
}

#[derive(Debug, Serialize)]
pub struct EvaluationState {
    pub submission_id: Uuid,
    pub status: StreamStatus,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub results: Vec<EvalResult>,
    /// Pass as `from` to continue where this response ends
    pub next: usize,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": message.into()
        })),
    )
        .into_response()
}

/// Reject requests the worker could only fail on
fn validate_evaluation(registry: &LanguageRegistry, request: &SubmitEvaluation) -> Result<(), String> {
    if !registry.is_enabled(&request.program.language_id) {
        return Err(format!("Unknown language: {}", request.program.language_id));
    }
    if let Some(validator) = &request.validator {
        if !registry.is_enabled(&validator.language_id) {
            return Err(format!("Unknown validator language: {}", validator.language_id));
        }
    }
    if request.time_limit_ms == 0 {
        return Err("time_limit_ms must be positive".to_string());
    }
    if request.memory_limit_kb == 0 {
        return Err("memory_limit_kb must be positive".to_string());
    }
    Ok(())
}

fn validate_compile(registry: &LanguageRegistry, request: &CompileRequest) -> Result<(), String> {
    if request.identifier.trim().is_empty() {
        return Err("identifier must not be empty".to_string());
    }
    if !registry.is_enabled(&request.language_id) {
        return Err(format!("Unknown language: {}", request.language_id));
    }
    if request.source_files.is_empty() {
        return Err("source_files must not be empty".to_string());
    }
    Ok(())
}

/// GET /health - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus scrape endpoint
pub async fn metrics_handler() -> Response {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

/// GET /languages - Installed languages
pub async fn list_languages(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.languages.languages().to_vec())
}

/// POST /evaluate - Queue a submission for evaluation
pub async fn submit_evaluation(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitEvaluation>,
) -> Response {
    if let Err(message) = validate_evaluation(&state.languages, &payload) {
        warn!(error = %message, "Evaluation rejected");
        state.metrics.requests_rejected.with_label_values(&["evaluate"]).inc();
        return error_response(StatusCode::BAD_REQUEST, message);
    }

    let submission_id = Uuid::new_v4();
    let request = EvaluateRequest {
        submission_id,
        program: payload.program,
        validator: payload.validator,
        groups: payload.groups,
        time_limit_ms: payload.time_limit_ms,
        memory_limit_kb: payload.memory_limit_kb,
        evaluate_all: payload.evaluate_all,
        exact_output: payload.exact_output,
    };
    let groups = request.groups.len();

    let mut conn = state.redis.clone();
    // Status first so a fast worker never overwrites Running with Queued
    let queued = async {
        redis::set_status(&mut conn, &submission_id, StreamStatus::Queued).await?;
        redis::push_job(&mut conn, &Job::Evaluate(request)).await
    };
    match queued.await {
        Ok(()) => {
            state.metrics.evaluations_submitted.inc();
            info!(submission_id = %submission_id, groups, "Evaluation queued");
            (
                StatusCode::CREATED,
                Json(SubmitEvaluationResponse { submission_id }),
            )
                .into_response()
        }
        Err(e) => {
            error!(submission_id = %submission_id, error = %e, "Failed to queue evaluation");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to queue evaluation: {}", e),
            )
        }
    }
}

/// GET /evaluate/{submission_id} - Stream status and results produced so far
pub async fn get_evaluation(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
    Query(query): Query<ResultsQuery>,
) -> Response {
    let submission_id = match Uuid::parse_str(&submission_id) {
        Ok(id) => id,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid submission ID format"),
    };

    let mut conn = state.redis.clone();
    let record = match redis::get_status(&mut conn, &submission_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Unknown submission"),
        Err(e) => {
            error!(submission_id = %submission_id, error = %e, "Failed to fetch evaluation status");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to query evaluation status: {}", e),
            );
        }
    };

    let from = isize::try_from(query.from).unwrap_or(isize::MAX);
    match redis::get_results(&mut conn, &submission_id, from).await {
        Ok(results) => {
            let next = query.from + results.len();
            (
                StatusCode::OK,
                Json(EvaluationState {
                    submission_id,
                    status: record.status,
                    updated_at: record.updated_at,
                    results,
                    next,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(submission_id = %submission_id, error = %e, "Failed to fetch evaluation results");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to query evaluation results: {}", e),
            )
        }
    }
}

/// POST /compile - Queue a compilation
pub async fn submit_compile(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CompileRequest>,
) -> Response {
    if let Err(message) = validate_compile(&state.languages, &payload) {
        warn!(error = %message, "Compilation rejected");
        state.metrics.requests_rejected.with_label_values(&["compile"]).inc();
        return error_response(StatusCode::BAD_REQUEST, message);
    }

    let identifier = payload.identifier.clone();
    let mut conn = state.redis.clone();
    match redis::push_job(&mut conn, &Job::Compile(payload)).await {
        Ok(()) => {
            state.metrics.compilations_submitted.inc();
            info!(identifier = %identifier, "Compilation queued");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "identifier": identifier })),
            )
                .into_response()
        }
        Err(e) => {
            error!(identifier = %identifier, error = %e, "Failed to queue compilation");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to queue compilation: {}", e),
            )
        }
    }
}

/// GET /compile/{identifier} - Compilation outcome
pub async fn get_compile(
    State(state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
) -> Response {
    let mut conn = state.redis.clone();
    match redis::get_compile_response(&mut conn, &identifier).await {
        Ok(Some(response)) => (StatusCode::OK, Json(response)).into_response(),
        Ok(None) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "identifier": identifier,
                "status": "pending",
                "message": "Compilation is queued or still running"
            })),
        )
            .into_response(),
        Err(e) => {
            error!(identifier = %identifier, error = %e, "Failed to fetch compile response");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to query compilation: {}", e),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn registry() -> LanguageRegistry {
        LanguageRegistry::from_json(
            r#"{"languages": [
                {"id": "cpp", "name": "C++", "version": "17"},
                {"id": "python3", "name": "Python", "version": "3.12"}
            ]}"#,
        )
        .unwrap()
    }

    fn submission(language_id: &str) -> SubmitEvaluation {
        SubmitEvaluation {
            program: CompiledProgram {
                language_id: language_id.to_string(),
                dir: PathBuf::from("/programs/p1"),
            },
            validator: None,
            groups: Vec::new(),
            time_limit_ms: 1000,
            memory_limit_kb: 262_144,
            evaluate_all: false,
            exact_output: false,
        }
    }

    #[test]
    fn test_valid_evaluation() {
        assert!(validate_evaluation(&registry(), &submission("cpp")).is_ok());
    }

    #[test]
    fn test_unknown_languages_rejected() {
        let err = validate_evaluation(&registry(), &submission("cobol")).unwrap_err();
        assert!(err.contains("cobol"));

        let mut request = submission("cpp");
        request.validator = Some(CompiledProgram {
            language_id: "perl".to_string(),
            dir: PathBuf::from("/programs/checker"),
        });
        assert!(validate_evaluation(&registry(), &request).unwrap_err().contains("validator"));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut request = submission("cpp");
        request.time_limit_ms = 0;
        assert!(validate_evaluation(&registry(), &request).is_err());

        let mut request = submission("cpp");
        request.memory_limit_kb = 0;
        assert!(validate_evaluation(&registry(), &request).is_err());
    }

    #[test]
    fn test_submit_evaluation_defaults() {
        let payload: SubmitEvaluation = serde_json::from_str(
            r#"{
                "program": {"language_id": "cpp", "dir": "/programs/p1"},
                "groups": [{"cases": [], "score": 10}],
                "time_limit_ms": 2000,
                "memory_limit_kb": 65536
            }"#,
        )
        .unwrap();
        assert!(payload.validator.is_none());
        assert!(!payload.evaluate_all);
        assert_eq!(payload.groups[0].score, 10);
    }

    #[test]
    fn test_compile_validation() {
        let request = CompileRequest {
            identifier: "p1".to_string(),
            language_id: "python3".to_string(),
            source_files: vec![PathBuf::from("/uploads/main.py")],
            output_dir: PathBuf::from("p1"),
        };
        assert!(validate_compile(&registry(), &request).is_ok());

        let mut blank = request.clone();
        blank.identifier = " ".to_string();
        assert!(validate_compile(&registry(), &blank).is_err());

        let mut no_sources = request.clone();
        no_sources.source_files.clear();
        assert!(validate_compile(&registry(), &no_sources).is_err());
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_results_query_defaults_to_start() {
        let query: ResultsQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.from, 0);
    }
}
