/// Job Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Wire a popped job to the components that handle it and publish the outcome.
///
/// **Evaluation Path:**
/// 1. Mark the result stream `Running`
/// 2. Spawn a consumer that forwards every streamed result to Redis as it arrives
/// 3. Run the Evaluator with Docker-backed programs (engine.rs, evaluator.rs)
/// 4. Wait for the consumer to drain, then mark the stream `Completed` or `Failed`
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (engine's job)
/// - How verdicts and scores are derived (evaluator's job)

use crate::compiler::Compiler;
use crate::config::LanguageConfigManager;
use crate::diff::ExactComparator;
use crate::engine::{DockerEngine, DockerProgram};
use crate::evaluator::Evaluator;
use crate::permissions::{CommandPermissionReset, NoopPermissionReset, PermissionReset};
use crate::runner::Program;
use crate::validator::ValidatorLimits;
use anyhow::{anyhow, Context, Result};
use redis::aio::ConnectionManager;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use verdict_common::config::JudgeConfig;
use verdict_common::redis as store;
use verdict_common::types::{
    CompileRequest, CompileResponse, CompiledProgram, EvalResult, EvaluateRequest, Job, StreamStatus,
};

/// Long-lived state shared by every job a worker handles
pub struct JobContext {
    pub config: JudgeConfig,
    pub languages: Arc<LanguageConfigManager>,
    pub engine: DockerEngine,
    pub compiler: Compiler,
    pub cancel: watch::Receiver<bool>,
}

impl JobContext {
    pub fn new(config: JudgeConfig, languages: LanguageConfigManager, engine: DockerEngine, cancel: watch::Receiver<bool>) -> Self {
        let languages = Arc::new(languages);
        let compiler = Compiler::new(engine.clone(), languages.clone(), &config);
        Self {
            config,
            languages,
            engine,
            compiler,
            cancel,
        }
    }

    fn program(&self, program: &CompiledProgram, sandbox_root: &Path) -> Result<Box<dyn Program>> {
        let language = self.languages.get_config(&program.language_id)?;
        Ok(Box::new(DockerProgram::new(
            self.engine.clone(),
            language,
            &program.dir,
            sandbox_root,
        )?))
    }

    fn permissions(&self, sandbox_root: &Path) -> Result<Arc<dyn PermissionReset>> {
        Ok(match &self.config.permission_fixer {
            Some(fixer) => Arc::new(CommandPermissionReset::new(fixer, sandbox_root)?),
            None => Arc::new(NoopPermissionReset),
        })
    }
}

pub async fn handle_job(ctx: &JobContext, conn: &mut ConnectionManager, job: Job) -> Result<()> {
    match job {
        Job::Evaluate(request) => execute_evaluation(ctx, conn, &request).await,
        Job::Compile(request) => execute_compile(ctx, conn, &request).await,
    }
}

/// Evaluate one submission, streaming results to `verdict:results:<id>`.
///
/// The stream status always ends terminal, even when evaluation fails.
#[instrument(skip(ctx, conn, request), fields(submission_id = %request.submission_id))]
pub async fn execute_evaluation(
    ctx: &JobContext,
    conn: &mut ConnectionManager,
    request: &EvaluateRequest,
) -> Result<()> {
    let submission_id = request.submission_id;
    store::set_status(conn, &submission_id, StreamStatus::Running)
        .await
        .context("Failed to mark evaluation running")?;

    info!(
        groups = request.groups.len(),
        cases = request.groups.iter().map(|g| g.cases.len()).sum::<usize>(),
        time_limit_ms = request.time_limit_ms,
        memory_limit_kb = request.memory_limit_kb,
        validator = request.validator.is_some(),
        "Starting evaluation"
    );

    let (tx, rx) = mpsc::channel(ctx.config.result_channel_capacity);
    let consumer = tokio::spawn(forward_results(conn.clone(), submission_id, rx));

    let evaluated = match build_evaluator(ctx, request) {
        Ok(mut evaluator) => {
            evaluator
                .evaluate(&request.groups, request.time_limit_ms, request.memory_limit_kb, tx)
                .await
        }
        Err(e) => {
            drop(tx);
            Err(e)
        }
    };
    let forwarded = consumer
        .await
        .map_err(|e| anyhow!("result forwarder panicked: {}", e))
        .and_then(|r| r);

    let status = final_status(&evaluated, &forwarded);
    match &status {
        StreamStatus::Completed => info!("Evaluation completed"),
        StreamStatus::Failed { error } => error!(error = %error, "Evaluation failed"),
        _ => {}
    }
    store::set_status(conn, &submission_id, status)
        .await
        .context("Failed to record evaluation status")?;
    Ok(())
}

fn build_evaluator(ctx: &JobContext, request: &EvaluateRequest) -> Result<Evaluator> {
    let sandbox_root = ctx.config.submissions_root.join(request.submission_id.to_string());
    let program = ctx.program(&request.program, &sandbox_root)?;
    let permissions = ctx.permissions(&sandbox_root)?;

    let mut evaluator = Evaluator::new(&sandbox_root, program, permissions)?
        .evaluate_all(request.evaluate_all)
        .with_cancellation(ctx.cancel.clone());
    if request.exact_output {
        evaluator = evaluator.with_comparator(Arc::new(ExactComparator));
    }

    if let Some(validator) = &request.validator {
        let limits = ValidatorLimits {
            time_limit_ms: ctx.config.validator_time_limit_ms,
            memory_limit_kb: ctx.config.validator_memory_limit_kb,
        };
        evaluator = evaluator.with_validator(ctx.program(validator, &sandbox_root)?, limits)?;
    }
    Ok(evaluator)
}

/// Concurrent consumer: push each result as soon as it is produced.
///
/// Returning early drops the receiver, which fails the evaluator's next send.
async fn forward_results(
    mut conn: ConnectionManager,
    submission_id: Uuid,
    mut results: mpsc::Receiver<EvalResult>,
) -> Result<usize> {
    let mut forwarded = 0;
    while let Some(result) = results.recv().await {
        store::push_result(&mut conn, &submission_id, &result)
            .await
            .context("Failed to publish evaluation result")?;
        forwarded += 1;
    }
    Ok(forwarded)
}

fn final_status(evaluated: &Result<()>, forwarded: &Result<usize>) -> StreamStatus {
    match (evaluated, forwarded) {
        (Ok(()), Ok(_)) => StreamStatus::Completed,
        // A forwarding failure is the root cause of the evaluator's send error
        (_, Err(e)) | (Err(e), Ok(_)) => StreamStatus::Failed {
            error: format!("{:#}", e),
        },
    }
}

#[instrument(skip(ctx, conn, request), fields(identifier = %request.identifier))]
pub async fn execute_compile(
    ctx: &JobContext,
    conn: &mut ConnectionManager,
    request: &CompileRequest,
) -> Result<()> {
    let response = match ctx.compiler.compile_cached(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Compilation could not run");
            CompileResponse {
                program: None,
                output: String::new(),
                errors: format!("{:#}", e),
            }
        }
    };
    store::store_compile_response(conn, &request.identifier, &response)
        .await
        .context("Failed to store compile response")?;
    Ok(())
}
