/// Output Validator Protocol
///
/// Drives a problem-specific checker program. The checker is started with the
/// positional arguments `<input> <judge_answer> <feedback_dir>` and reads the
/// team's output on stdin. Its verdict is its exit code:
///
/// | exit                | meaning                                   |
/// |---------------------|-------------------------------------------|
/// | 42                  | wrong answer                              |
/// | 43                  | correct answer                            |
/// | timeout             | infrastructure error                      |
/// | anything else       | infrastructure error (stderr/stdout kept) |
///
/// The validator stages its files in its own area so nothing leaks between
/// the submission's sandbox and the checker's.

use crate::permissions::PermissionReset;
use crate::runner::{Program, ProgramArgs};
use crate::staging::FileLinker;
use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{debug, warn};

pub const EXIT_WRONG_ANSWER: i64 = 42;
pub const EXIT_ACCEPTED: i64 = 43;

/// Resource limits applied to validator runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorLimits {
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
}

impl Default for ValidatorLimits {
    fn default() -> Self {
        Self {
            time_limit_ms: 60_000,
            memory_limit_kb: 1000 * 1000,
        }
    }
}

pub struct Validator {
    linker: FileLinker,
    program: Box<dyn Program>,
    limits: ValidatorLimits,
}

impl Validator {
    pub fn new(linker: FileLinker, program: Box<dyn Program>, limits: ValidatorLimits) -> Self {
        Self {
            linker,
            program,
            limits,
        }
    }

    pub fn linker(&self) -> &FileLinker {
        &self.linker
    }

    /// Point the checker at its staging slots. Call once before `check`.
    pub fn configure(&mut self) {
        let args = ProgramArgs {
            input_path: self.linker.path_for("team_output", false),
            output_path: self.linker.path_for("output", true),
            error_path: self.linker.path_for("error", true),
            time_limit_ms: self.limits.time_limit_ms,
            memory_limit_kb: self.limits.memory_limit_kb,
            extra_args: vec![
                self.linker.path_for("input", false).display().to_string(),
                self.linker.path_for("judge_answer", false).display().to_string(),
                self.linker.path_for("feedback", true).display().to_string(),
            ],
        };
        self.program.set_args(args);
    }

    /// Returns `true` when the checker judged the team output wrong
    pub async fn check(
        &mut self,
        input: &Path,
        team_output: &Path,
        judge_answer: &Path,
        permissions: &dyn PermissionReset,
    ) -> Result<bool> {
        self.linker.link_file(input, "input", false)?;
        self.linker.link_file(team_output, "team_output", false)?;
        self.linker.link_file(judge_answer, "judge_answer", false)?;
        self.linker.create_dir("feedback", true)?;

        let exit = self.program.execute().await.context("Failed to run output validator")?;
        permissions.reset().await?;

        debug!(termination = ?exit.termination, time_ms = exit.time_ms, "Validator finished");

        if exit.timed_out() {
            bail!("output validator timed out");
        }
        if exit.crashed_with(EXIT_WRONG_ANSWER) {
            return Ok(true);
        }
        if exit.crashed_with(EXIT_ACCEPTED) {
            return Ok(false);
        }

        warn!(termination = ?exit.termination, "Output validator exited abnormally");
        let stderr = tokio::fs::read(self.linker.path_for("error", true))
            .await
            .context("could not read output validator errors")?;
        let stdout = tokio::fs::read(self.linker.path_for("output", true))
            .await
            .context("could not read output validator output")?;
        bail!(
            "output validator crashed: {} {}",
            String::from_utf8_lossy(&stderr),
            String::from_utf8_lossy(&stdout)
        )
    }
}
