use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Classification of a judged test case, test group or submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    #[default]
    Unspecified,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    RunTimeError,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Unspecified => "UNSPECIFIED",
            Verdict::Accepted => "ACCEPTED",
            Verdict::WrongAnswer => "WRONG_ANSWER",
            Verdict::TimeLimitExceeded => "TIME_LIMIT_EXCEEDED",
            Verdict::RunTimeError => "RUN_TIME_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// One input / reference output pair. Both paths point at externally managed files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

/// Ordered test cases sharing one score, awarded only when every case is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestGroup {
    pub cases: Vec<TestCase>,
    pub score: u32,
}

/// A unit of the evaluation stream.
///
/// Emitted in order: the case results of a group, then the group result,
/// repeated per group, then exactly one submission result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvalResult {
    TestCase {
        verdict: Verdict,
        time_ms: u64,
    },
    TestGroup {
        verdict: Verdict,
        time_ms: u64,
        score: u32,
    },
    Submission {
        verdict: Verdict,
        time_ms: u64,
        score: u32,
    },
}

impl EvalResult {
    pub fn verdict(&self) -> Verdict {
        match self {
            EvalResult::TestCase { verdict, .. }
            | EvalResult::TestGroup { verdict, .. }
            | EvalResult::Submission { verdict, .. } => *verdict,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, EvalResult::Submission { .. })
    }
}

/// A program that is ready to run: the language it runs under and the
/// directory holding its compiled artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledProgram {
    pub language_id: String,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub submission_id: Uuid,
    pub program: CompiledProgram,
    /// Custom output validator. When absent, outputs are diffed against the reference.
    #[serde(default)]
    pub validator: Option<CompiledProgram>,
    pub groups: Vec<TestGroup>,
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
    #[serde(default)]
    pub evaluate_all: bool,
    /// Compare outputs byte for byte instead of token by token (no validator only)
    #[serde(default)]
    pub exact_output: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileRequest {
    /// Cache identity of the compilation. Requests sharing an identifier compile once.
    pub identifier: String,
    pub language_id: String,
    pub source_files: Vec<PathBuf>,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileResponse {
    /// `None` when compilation failed.
    pub program: Option<CompiledProgram>,
    pub output: String,
    pub errors: String,
}

/// Work item popped from the job queue by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    Evaluate(EvaluateRequest),
    Compile(CompileRequest),
}

/// Lifecycle of an evaluation result stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamStatus {
    Queued,
    Running,
    /// The stream ended with a submission result.
    Completed,
    /// The stream ended early on an infrastructure error.
    Failed { error: String },
}

impl StreamStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamStatus::Completed | StreamStatus::Failed { .. })
    }
}

/// Installed language as advertised to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub id: String,
    pub name: String,
    pub version: String,
}
