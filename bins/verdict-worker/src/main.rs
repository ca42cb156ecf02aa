mod compile_cache;
mod compiler;
mod config;
mod diff;
mod engine;
mod engine_tests;
mod evaluator;
mod executor;
mod permissions;
mod runner;
mod staging;
mod validator;

use config::LanguageConfigManager;
use engine::DockerEngine;
use executor::JobContext;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use verdict_common::config::JudgeConfig;
use verdict_common::redis;
use verdict_common::types::Job;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Verdict Worker booting...");

    let config = JudgeConfig::from_env();
    debug!(config = ?config, "Loaded configuration");

    let languages = LanguageConfigManager::load(&config.languages_path).map_err(|e| {
        error!(path = %config.languages_path.display(), error = %e, "Failed to load language configurations");
        e
    })?;
    let language_ids: Vec<String> = languages.list_languages().into_iter().map(|l| l.id).collect();
    info!(languages = ?language_ids, "Loaded language configurations");

    std::fs::create_dir_all(&config.submissions_root)?;
    std::fs::create_dir_all(&config.programs_root)?;

    let engine = DockerEngine::connect()?;

    let client = ::redis::Client::open(config.redis_url.as_str())?;
    let mut redis_conn = ::redis::aio::ConnectionManager::new(client).await?;
    info!(redis_url = %config.redis_url, "Connected to Redis");

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let ctx = JobContext::new(config, languages, engine, cancel_rx);

    let worker = worker_loop(&ctx, &mut redis_conn);
    tokio::pin!(worker);

    tokio::select! {
        _ = &mut worker => {},
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            warn!("Received shutdown signal, cancelling in-flight evaluation...");
            // Let the current job stop at its next case boundary and record its status
            let _ = cancel_tx.send(true);
            worker.await;
        }
    }

    info!("Worker shutdown complete");
    Ok(())
}

#[instrument(skip(ctx, redis_conn))]
async fn worker_loop(ctx: &JobContext, redis_conn: &mut ::redis::aio::ConnectionManager) {
    loop {
        if *ctx.cancel.borrow() {
            return;
        }

        // BLPOP with 5 second timeout for graceful shutdown
        match redis::pop_job(redis_conn, 5.0).await {
            Ok(Some(job)) => {
                let start = std::time::Instant::now();
                let kind = match &job {
                    Job::Evaluate(request) => {
                        info!(submission_id = %request.submission_id, "Received evaluation job");
                        "evaluate"
                    }
                    Job::Compile(request) => {
                        info!(identifier = %request.identifier, language = %request.language_id, "Received compile job");
                        "compile"
                    }
                };

                match executor::handle_job(ctx, redis_conn, job).await {
                    Ok(()) => info!(kind, elapsed_ms = start.elapsed().as_millis() as u64, "Job finished"),
                    // Non-fatal - worker continues
                    Err(e) => error!(kind, error = %format!("{:#}", e), "Job failed"),
                }
            }
            Ok(None) => {
                // Timeout - check for shutdown
                continue;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }
    }
}
