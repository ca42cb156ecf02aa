use crate::types::{CompileResponse, EvalResult, Job, StreamStatus};
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, RedisResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// Redis key layout shared by the API and the worker.
/// Keys are deterministic so either side can address a submission's stream.

pub const QUEUE_KEY: &str = "verdict:queue:jobs";
pub const RESULTS_PREFIX: &str = "verdict:results";
pub const STATUS_PREFIX: &str = "verdict:status";
pub const COMPILE_PREFIX: &str = "verdict:compile";

/// Streams and statuses expire after a day.
pub const RETENTION_SECS: u64 = 86400;

pub fn results_key(submission_id: &Uuid) -> String {
    format!("{}:{}", RESULTS_PREFIX, submission_id)
}

pub fn status_key(submission_id: &Uuid) -> String {
    format!("{}:{}", STATUS_PREFIX, submission_id)
}

pub fn compile_key(identifier: &str) -> String {
    format!("{}:{}", COMPILE_PREFIX, identifier)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: StreamStatus,
    pub updated_at: DateTime<Utc>,
}

fn to_json<T: Serialize>(value: &T) -> RedisResult<String> {
    serde_json::to_string(value).map_err(|e| {
        redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
    })
}

fn from_json<T: DeserializeOwned>(payload: &str) -> RedisResult<T> {
    serde_json::from_str(payload).map_err(|e| {
        redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string()))
    })
}

/// Push a job to the work queue (RPUSH, FIFO with BLPOP)
pub async fn push_job(conn: &mut redis::aio::ConnectionManager, job: &Job) -> RedisResult<()> {
    let payload = to_json(job)?;
    conn.rpush(QUEUE_KEY, payload).await
}

/// Pop a job from the work queue.
/// Uses BLPOP with timeout so the caller can observe shutdown between polls.
pub async fn pop_job(
    conn: &mut redis::aio::ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<Job>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_KEY, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => Ok(Some(from_json(&payload)?)),
        None => Ok(None),
    }
}

/// Append one streamed result to the submission's result list
pub async fn push_result(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &Uuid,
    result: &EvalResult,
) -> RedisResult<()> {
    let key = results_key(submission_id);
    let payload = to_json(result)?;
    let _: () = conn.rpush(&key, payload).await?;
    let _: () = redis::cmd("EXPIRE")
        .arg(&key)
        .arg(RETENTION_SECS)
        .query_async(conn)
        .await?;
    Ok(())
}

/// Read streamed results starting at index `from`
pub async fn get_results(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &Uuid,
    from: isize,
) -> RedisResult<Vec<EvalResult>> {
    let payloads: Vec<String> = conn.lrange(results_key(submission_id), from, -1).await?;
    payloads.iter().map(|p| from_json(p)).collect()
}

pub async fn set_status(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &Uuid,
    status: StreamStatus,
) -> RedisResult<()> {
    let record = StatusRecord {
        status,
        updated_at: Utc::now(),
    };
    let payload = to_json(&record)?;
    conn.set_ex(status_key(submission_id), payload, 86400).await
}

pub async fn get_status(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &Uuid,
) -> RedisResult<Option<StatusRecord>> {
    let payload: Option<String> = conn.get(status_key(submission_id)).await?;
    payload.map(|p| from_json(&p)).transpose()
}

pub async fn store_compile_response(
    conn: &mut redis::aio::ConnectionManager,
    identifier: &str,
    response: &CompileResponse,
) -> RedisResult<()> {
    let payload = to_json(response)?;
    conn.set_ex(compile_key(identifier), payload, 86400).await
}

pub async fn get_compile_response(
    conn: &mut redis::aio::ConnectionManager,
    identifier: &str,
) -> RedisResult<Option<CompileResponse>> {
    let payload: Option<String> = conn.get(compile_key(identifier)).await?;
    payload.map(|p| from_json(&p)).transpose()
}
