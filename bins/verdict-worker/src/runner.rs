/// Sandboxed Program Contract
///
/// The evaluator drives untrusted submissions and trusted output validators
/// through the same [`Program`] capability. How the sandbox enforces limits is
/// the implementation's business (see `engine.rs`); the evaluator only relies
/// on the structured [`ExitStatus`] it returns.
///
/// Ordinary limit violations are reported through `ExitStatus`, never as
/// errors. `Err` from `execute` means the sandbox itself failed.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// I/O wiring and limits for the next executions of a program
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramArgs {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub error_path: PathBuf,
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
    /// Positional arguments appended to the program's command line
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Process exited on its own with this code
    Exited(i64),
    /// Killed by the sandbox for exceeding the memory limit
    MemoryExceeded,
    /// Killed by the sandbox for exceeding the time limit
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub termination: Termination,
    pub time_ms: u64,
}

impl ExitStatus {
    pub fn exited(code: i64, time_ms: u64) -> Self {
        Self {
            termination: Termination::Exited(code),
            time_ms,
        }
    }

    pub fn timed_out_after(time_ms: u64) -> Self {
        Self {
            termination: Termination::TimedOut,
            time_ms,
        }
    }

    pub fn memory_exceeded(time_ms: u64) -> Self {
        Self {
            termination: Termination::MemoryExceeded,
            time_ms,
        }
    }

    /// Abnormal termination: non-zero exit code or killed for memory
    pub fn crashed(&self) -> bool {
        match self.termination {
            Termination::Exited(code) => code != 0,
            Termination::MemoryExceeded => true,
            Termination::TimedOut => false,
        }
    }

    pub fn crashed_with(&self, code: i64) -> bool {
        code != 0 && self.termination == Termination::Exited(code)
    }

    pub fn timed_out(&self) -> bool {
        self.termination == Termination::TimedOut
    }
}

#[async_trait]
pub trait Program: Send {
    /// Configure the I/O paths and limits used by every following `execute`
    fn set_args(&mut self, args: ProgramArgs);

    async fn execute(&mut self) -> Result<ExitStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_exit() {
        let status = ExitStatus::exited(0, 12);
        assert!(!status.crashed());
        assert!(!status.timed_out());
        assert!(!status.crashed_with(0));
    }

    #[test]
    fn test_nonzero_exit_is_crash() {
        let status = ExitStatus::exited(42, 5);
        assert!(status.crashed());
        assert!(status.crashed_with(42));
        assert!(!status.crashed_with(43));
        assert!(!status.timed_out());
    }

    #[test]
    fn test_timeout_is_not_crash() {
        let status = ExitStatus::timed_out_after(1001);
        assert!(status.timed_out());
        assert!(!status.crashed());
        assert!(!status.crashed_with(42));
    }

    #[test]
    fn test_memory_kill_is_crash() {
        let status = ExitStatus::memory_exceeded(30);
        assert!(status.crashed());
        assert!(!status.timed_out());
        assert!(!status.crashed_with(137));
    }
}
