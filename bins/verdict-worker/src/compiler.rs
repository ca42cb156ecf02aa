/// Compilation - Source Files to Runnable Program
///
/// **Responsibility:**
/// Turn a `CompileRequest` into a `CompiledProgram` directory the evaluator
/// can run.
///
/// **Steps:**
/// 1. Copy the sources into the output directory (relative directories live
///    under the programs root)
/// 2. Run the language's compile snippet in a container with only the output
///    directory mounted, source file names as positional parameters
/// 3. No compile snippet: interpreted language, the copy is the program
///
/// A failed compilation is a response without a program, not an error.

use crate::compile_cache::CompileCache;
use crate::config::LanguageConfigManager;
use crate::engine::{ContainerSpec, DockerEngine};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use verdict_common::config::JudgeConfig;
use verdict_common::types::{CompileRequest, CompileResponse, CompiledProgram};

pub struct Compiler {
    engine: DockerEngine,
    languages: Arc<LanguageConfigManager>,
    programs_root: PathBuf,
    time_limit: Duration,
    cache: CompileCache,
}

impl Compiler {
    pub fn new(engine: DockerEngine, languages: Arc<LanguageConfigManager>, config: &JudgeConfig) -> Self {
        Self {
            engine,
            languages,
            programs_root: config.programs_root.clone(),
            time_limit: Duration::from_millis(config.compile_time_limit_ms),
            cache: CompileCache::new(
                config.compile_cache_capacity,
                Duration::from_secs(config.compile_cache_ttl_secs),
            ),
        }
    }

    /// Compile unless a fresh response for the request's identifier is cached
    pub async fn compile_cached(&self, request: &CompileRequest) -> Result<CompileResponse> {
        self.cache
            .get_or_try_insert_with(&request.identifier, || self.compile(request))
            .await
    }

    #[instrument(skip(self, request), fields(identifier = %request.identifier, language = %request.language_id))]
    pub async fn compile(&self, request: &CompileRequest) -> Result<CompileResponse> {
        let language = self.languages.get_config(&request.language_id)?;
        if request.source_files.is_empty() {
            bail!("No source files to compile");
        }

        let output_dir = self.programs_root.join(&request.output_dir);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;

        let mut file_names = Vec::with_capacity(request.source_files.len());
        for source in &request.source_files {
            let name = source
                .file_name()
                .with_context(|| format!("Source path has no file name: {}", source.display()))?;
            let target = output_dir.join(name);
            tokio::fs::copy(source, &target)
                .await
                .with_context(|| format!("Failed to copy {} to {}", source.display(), target.display()))?;
            file_names.push(name.to_string_lossy().into_owned());
        }

        let program = CompiledProgram {
            language_id: language.id.clone(),
            dir: output_dir.clone(),
        };

        let Some(command) = &language.compile else {
            info!(dir = %output_dir.display(), "Interpreted language, sources copied");
            return Ok(CompileResponse {
                program: Some(program),
                output: String::new(),
                errors: String::new(),
            });
        };

        let dir = output_dir.display().to_string();
        let mut cmd = vec!["sh".to_string(), "-c".to_string(), command.clone(), "sh".to_string()];
        cmd.extend(file_names);

        let spec = ContainerSpec {
            image: language.image.clone(),
            cmd,
            working_dir: Some(dir.clone()),
            binds: vec![format!("{0}:{0}:rw", dir)],
            memory_bytes: i64::from(language.memory_limit_mb) * 1024 * 1024,
            nano_cpus: language.nano_cpus(),
            timeout: self.time_limit,
            capture_logs: true,
        };
        let run = self.engine.run(&spec).await?;

        let mut errors = run.stderr;
        let program = if run.status.timed_out() {
            errors.push_str("\n[Compilation timed out]");
            None
        } else if run.status.crashed() {
            None
        } else {
            Some(program)
        };

        if program.is_some() {
            info!(time_ms = run.status.time_ms, "Compilation succeeded");
        } else {
            warn!(
                time_ms = run.status.time_ms,
                termination = ?run.status.termination,
                error_preview = errors.lines().next().unwrap_or(""),
                "Compilation failed"
            );
        }

        Ok(CompileResponse {
            program,
            output: run.stdout,
            errors,
        })
    }
}
