/// Execution Engine - Docker Sandbox
///
/// **Core Responsibility:**
/// Run one command in a fresh, network-less container under memory, CPU and
/// wall-time limits, and report how it terminated.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (Docker)
/// - Engine does NOT know verdicts or scoring
/// - Engine does NOT read program output (redirected to files by the command)
///
/// **Docker Execution Rules:**
/// 1. Pulls the image if not present
/// 2. Creates the container with network disabled, memory (no swap), CPU and pids limits
/// 3. Bind-mounts host directories at identical paths, staged inputs read-only
/// 4. Enforces the wall-time limit with `tokio::time::timeout`, killing on expiry
/// 5. Reports OOM kills separately from ordinary exits
/// 6. Removes the container on every path via a drop guard

use crate::config::LanguageConfig;
use crate::runner::{ExitStatus, Program, ProgramArgs};
use crate::staging::{PROGRAM_AREA, READ_ONLY_DIR, VALIDATOR_AREA};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Captured compiler logs are truncated past this size
const MAX_LOG_BYTES: usize = 64 * 1024;
const PIDS_LIMIT: i64 = 256;

/// Container cleanup guard - guarantees container removal on drop
/// This ensures containers are cleaned up even if execution is cancelled
struct ContainerGuard {
    docker: Docker,
    container_id: String,
}

impl ContainerGuard {
    fn new(docker: Docker, container_id: String) -> Self {
        Self { docker, container_id }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        // Cannot be async in Drop
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to cleanup container");
            }
        });
    }
}

/// One sandboxed command
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    pub working_dir: Option<String>,
    /// `host:container:mode` bind mounts
    pub binds: Vec<String>,
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub timeout: Duration,
    /// Collect stdout/stderr from the container logs after it exits
    pub capture_logs: bool,
}

#[derive(Debug, Clone)]
pub struct ContainerRun {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;
        Ok(Self { docker })
    }

    /// Ensure Docker image is available (pull if needed)
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %image, "Image cache miss, pulling now");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!(image = %image, "Image pulled successfully");
        Ok(())
    }

    /// Run `spec` to completion or until its timeout expires.
    ///
    /// Limit violations are reported through the returned status; `Err`
    /// means Docker itself failed.
    #[instrument(skip(self, spec), fields(image = %spec.image, timeout_ms = spec.timeout.as_millis() as u64))]
    pub async fn run(&self, spec: &ContainerSpec) -> Result<ContainerRun> {
        self.ensure_image(&spec.image)
            .await
            .with_context(|| format!("Failed to ensure Docker image '{}' is available", spec.image))?;

        let container_name = format!("verdict-{}", uuid::Uuid::new_v4());
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            working_dir: spec.working_dir.clone(),
            attach_stdout: Some(spec.capture_logs),
            attach_stderr: Some(spec.capture_logs),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                memory: Some(spec.memory_bytes),
                memory_swap: Some(spec.memory_bytes),
                nano_cpus: Some(spec.nano_cpus),
                pids_limit: Some(PIDS_LIMIT),
                network_mode: Some("none".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .context("Failed to create Docker container")?;

        let container_id = container.id.clone();
        let _guard = ContainerGuard::new(self.docker.clone(), container_id.clone());

        let start_time = Instant::now();
        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")?;

        let waited = tokio::time::timeout(spec.timeout, self.wait_exit_code(&container_id)).await;
        let elapsed_ms = start_time.elapsed().as_millis() as u64;

        let status = match waited {
            Ok(code) => {
                let code = code?;
                if self.oom_killed(&container_id).await? {
                    ExitStatus::memory_exceeded(elapsed_ms)
                } else {
                    ExitStatus::exited(code, elapsed_ms)
                }
            }
            Err(_) => {
                if let Err(e) = self
                    .docker
                    .kill_container(&container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container_id = %container_id, error = %e, "Failed to kill timed-out container");
                }
                ExitStatus::timed_out_after(elapsed_ms)
            }
        };
        debug!(container_id = %container_id, termination = ?status.termination, time_ms = status.time_ms, "Container finished");

        let (stdout, stderr) = if spec.capture_logs {
            self.collect_logs(&container_id).await?
        } else {
            (String::new(), String::new())
        };

        Ok(ContainerRun {
            status,
            stdout,
            stderr,
        })
    }

    async fn wait_exit_code(&self, container_id: &str) -> Result<i64> {
        let wait_options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut wait_stream = self.docker.wait_container(container_id, Some(wait_options));
        match wait_stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits surface as a wait error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e).context("Failed to wait for container"),
            None => bail!("No wait response from container {}", container_id),
        }
    }

    async fn oom_killed(&self, container_id: &str) -> Result<bool> {
        let inspect = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .context("Failed to inspect container")?;
        Ok(inspect
            .state
            .and_then(|state| state.oom_killed)
            .unwrap_or(false))
    }

    async fn collect_logs(&self, container_id: &str) -> Result<(String, String)> {
        let logs_options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        });

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut logs_stream = self.docker.logs(container_id, logs_options);
        while let Some(output) = logs_stream.next().await {
            match output.context("Failed to read container logs")? {
                LogOutput::StdOut { message } => append_capped(&mut stdout, &message),
                LogOutput::StdErr { message } => append_capped(&mut stderr, &message),
                _ => {}
            }
        }

        Ok((
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
        ))
    }
}

fn append_capped(buf: &mut Vec<u8>, message: &[u8]) {
    let room = MAX_LOG_BYTES.saturating_sub(buf.len());
    buf.extend_from_slice(&message[..message.len().min(room)]);
}

/// Single-quote `s` for `sh`
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// A compiled program run through the language's `run` snippet.
///
/// The sandbox root (where the staging areas live) is mounted read-write and
/// the program directory read-only, both at their host paths, so the
/// configured I/O paths are valid inside the container unchanged.
pub struct DockerProgram {
    engine: DockerEngine,
    image: String,
    run: String,
    program_dir: PathBuf,
    sandbox_root: PathBuf,
    nano_cpus: i64,
    args: ProgramArgs,
}

impl DockerProgram {
    pub fn new(
        engine: DockerEngine,
        language: &LanguageConfig,
        program_dir: impl Into<PathBuf>,
        sandbox_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let program_dir = program_dir.into();
        let sandbox_root = sandbox_root.into();
        for dir in [&program_dir, &sandbox_root] {
            if !dir.is_absolute() {
                bail!("Sandbox mounts need absolute paths, got {}", dir.display());
            }
        }
        Ok(Self {
            engine,
            image: language.image.clone(),
            run: language.run.clone(),
            program_dir,
            sandbox_root,
            nano_cpus: language.nano_cpus(),
            args: ProgramArgs::default(),
        })
    }
}

#[async_trait]
impl Program for DockerProgram {
    fn set_args(&mut self, args: ProgramArgs) {
        self.args = args;
    }

    async fn execute(&mut self) -> Result<ExitStatus> {
        let spec = ContainerSpec {
            image: self.image.clone(),
            cmd: sandbox_command(&self.run, &self.program_dir, &self.args),
            working_dir: Some(self.program_dir.display().to_string()),
            binds: sandbox_binds(&self.sandbox_root, &self.program_dir),
            memory_bytes: i64::try_from(self.args.memory_limit_kb.saturating_mul(1024))
                .unwrap_or(i64::MAX),
            nano_cpus: self.nano_cpus,
            timeout: Duration::from_millis(self.args.time_limit_ms),
            capture_logs: false,
        };
        Ok(self.engine.run(&spec).await?.status)
    }
}

/// `sh -c` command running `run` with its standard streams redirected to the staged files
pub(crate) fn sandbox_command(run: &str, program_dir: &Path, args: &ProgramArgs) -> Vec<String> {
    let script = format!(
        "cd {} && exec {} \"$@\" < {} > {} 2> {}",
        shell_quote(&program_dir.display().to_string()),
        run,
        shell_quote(&args.input_path.display().to_string()),
        shell_quote(&args.output_path.display().to_string()),
        shell_quote(&args.error_path.display().to_string()),
    );
    let mut cmd = vec!["sh".to_string(), "-c".to_string(), script, "sh".to_string()];
    cmd.extend(args.extra_args.iter().cloned());
    cmd
}

/// The sandbox root is writable except for the read-only staging slots,
/// which are mounted over it
pub(crate) fn sandbox_binds(sandbox_root: &Path, program_dir: &Path) -> Vec<String> {
    let mut binds = vec![format!("{0}:{0}:rw", sandbox_root.display())];
    for area in [PROGRAM_AREA, VALIDATOR_AREA] {
        let slots = sandbox_root.join(area).join(READ_ONLY_DIR);
        binds.push(format!("{0}:{0}:ro", slots.display()));
    }
    binds.push(format!("{0}:{0}:ro", program_dir.display()));
    binds
}
