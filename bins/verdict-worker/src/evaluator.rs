/// Submission Evaluator - Verdicts, Caching and Aggregation
///
/// **Core Responsibility:**
/// Run a compiled submission against hierarchical test data and stream every
/// case, group and submission result as soon as it is known.
///
/// **Critical Properties:**
/// - Knows nothing about Docker (runs programs through `runner::Program`)
/// - Knows nothing about Redis (results go to an mpsc channel)
/// - Sequential: one case at a time, the staging area is shared
///
/// **Case Rules:**
/// - Crash → RUN_TIME_ERROR (highest priority)
/// - Timeout → TIME_LIMIT_EXCEEDED
/// - Otherwise the validator (if any) or the output comparator decides
///   between WRONG_ANSWER and ACCEPTED
/// - A (input, reference output) pair is executed at most once per evaluator
///
/// **Aggregation Rules:**
/// - Group verdict = first non-accepted case verdict
/// - Without `evaluate_all` a group stops at its first failing case
/// - Score = sum of scores of accepted groups
/// - Submission verdict = first failing group's verdict, unless any points
///   were earned, in which case it is ACCEPTED (partial credit)
///
/// Verdicts are values. Every `Err` is an infrastructure failure that aborts
/// the whole evaluation without a submission result.

use crate::diff::{OutputComparator, TokenComparator};
use crate::permissions::PermissionReset;
use crate::runner::{Program, ProgramArgs};
use crate::staging::{FileLinker, PROGRAM_AREA, VALIDATOR_AREA};
use crate::validator::{Validator, ValidatorLimits};
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use verdict_common::types::{EvalResult, TestCase, TestGroup, Verdict};

/// Judged result of one test case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub verdict: Verdict,
    pub time_ms: u64,
}

/// Identity of physical test data: (input path, reference output path)
type CacheKey = (PathBuf, PathBuf);

pub struct Evaluator {
    root: PathBuf,
    linker: FileLinker,
    program: Box<dyn Program>,
    validator: Option<Validator>,
    comparator: Arc<dyn OutputComparator>,
    permissions: Arc<dyn PermissionReset>,
    evaluate_all: bool,
    cancel: Option<watch::Receiver<bool>>,
    cache: HashMap<CacheKey, Outcome>,
}

impl Evaluator {
    /// Create an evaluator working under `root`, staging program I/O in `<root>/env`
    pub fn new(
        root: impl Into<PathBuf>,
        program: Box<dyn Program>,
        permissions: Arc<dyn PermissionReset>,
    ) -> Result<Self> {
        let root = root.into();
        let linker = FileLinker::new(root.join(PROGRAM_AREA)).context("failed creating FileLinker")?;
        Ok(Self {
            root,
            linker,
            program,
            validator: None,
            comparator: Arc::new(TokenComparator),
            permissions,
            evaluate_all: false,
            cancel: None,
            cache: HashMap::new(),
        })
    }

    /// Judge outputs with a custom validator staged in `<root>/valenv`
    pub fn with_validator(mut self, program: Box<dyn Program>, limits: ValidatorLimits) -> Result<Self> {
        let linker = FileLinker::new(self.root.join(VALIDATOR_AREA))
            .context("failed creating validator FileLinker")?;
        self.validator = Some(Validator::new(linker, program, limits));
        Ok(self)
    }

    pub fn with_comparator(mut self, comparator: Arc<dyn OutputComparator>) -> Self {
        self.comparator = comparator;
        self
    }

    /// Keep running a group's cases after its first failure
    pub fn evaluate_all(mut self, evaluate_all: bool) -> Self {
        self.evaluate_all = evaluate_all;
        self
    }

    /// Stop between cases once the receiver observes `true`
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Evaluate every group in order, streaming results into `results`.
    ///
    /// The channel closes when this returns: after the submission result on
    /// success, or right after the last emitted result on failure.
    pub async fn evaluate(
        &mut self,
        groups: &[TestGroup],
        time_limit_ms: u64,
        memory_limit_kb: u64,
        results: mpsc::Sender<EvalResult>,
    ) -> Result<()> {
        let outcome = self
            .evaluate_submission(groups, time_limit_ms, memory_limit_kb, &results)
            .await;
        if let Err(e) = self.clear_staging() {
            warn!(root = %self.root.display(), error = %e, "Failed to release staging areas");
        }
        outcome
    }

    async fn evaluate_submission(
        &mut self,
        groups: &[TestGroup],
        time_limit_ms: u64,
        memory_limit_kb: u64,
        results: &mpsc::Sender<EvalResult>,
    ) -> Result<()> {
        self.permissions
            .reset()
            .await
            .context("could not reset permissions")?;

        self.program.set_args(ProgramArgs {
            input_path: self.linker.path_for("input", false),
            output_path: self.linker.path_for("output", true),
            error_path: self.linker.path_for("error", true),
            time_limit_ms,
            memory_limit_kb,
            extra_args: Vec::new(),
        });
        if let Some(validator) = self.validator.as_mut() {
            validator.configure();
        }

        let mut first_failure: Option<Verdict> = None;
        let mut time_ms = 0;
        let mut score = 0u32;

        for (idx, group) in groups.iter().enumerate() {
            self.check_cancelled()?;
            let (group_time, group_verdict) = self.evaluate_group(group, results).await?;
            time_ms = time_ms.max(group_time);

            let group_score = if group_verdict.is_accepted() {
                score += group.score;
                group.score
            } else {
                first_failure.get_or_insert(group_verdict);
                0
            };
            debug!(
                group = idx,
                verdict = %group_verdict,
                time_ms = group_time,
                score = group_score,
                "Group evaluated"
            );
            emit(
                results,
                EvalResult::TestGroup {
                    verdict: group_verdict,
                    time_ms: group_time,
                    score: group_score,
                },
            )
            .await?;
        }

        let verdict = if score != 0 {
            Verdict::Accepted
        } else {
            first_failure.unwrap_or(Verdict::Accepted)
        };
        info!(verdict = %verdict, score, time_ms, "Submission evaluated");
        emit(results, EvalResult::Submission { verdict, time_ms, score }).await
    }

    /// Returns the group's max case time and its verdict
    async fn evaluate_group(
        &mut self,
        group: &TestGroup,
        results: &mpsc::Sender<EvalResult>,
    ) -> Result<(u64, Verdict)> {
        let mut group_time = 0;
        let mut first_failure: Option<Verdict> = None;

        for case in &group.cases {
            self.check_cancelled()?;
            let outcome = self.evaluate_case(case).await?;
            emit(
                results,
                EvalResult::TestCase {
                    verdict: outcome.verdict,
                    time_ms: outcome.time_ms,
                },
            )
            .await?;
            group_time = group_time.max(outcome.time_ms);

            self.clear_staging()?;

            if !outcome.verdict.is_accepted() {
                first_failure.get_or_insert(outcome.verdict);
                if !self.evaluate_all {
                    break;
                }
            }
        }

        Ok((group_time, first_failure.unwrap_or(Verdict::Accepted)))
    }

    pub async fn evaluate_case(&mut self, case: &TestCase) -> Result<Outcome> {
        let key = (case.input_path.clone(), case.output_path.clone());
        if let Some(outcome) = self.cache.get(&key) {
            debug!(case = %case.name, verdict = %outcome.verdict, "Cached outcome reused");
            return Ok(*outcome);
        }

        let case_dir = self.case_dir(&case.name)?;
        tokio::fs::create_dir_all(&case_dir)
            .await
            .with_context(|| format!("Failed to create {}", case_dir.display()))?;

        self.linker.link_file(&case.input_path, "input", false)?;
        for slot in ["output", "error"] {
            let capture = case_dir.join(slot);
            tokio::fs::write(&capture, b"")
                .await
                .with_context(|| format!("Failed to create {}", capture.display()))?;
            self.linker.link_file(&capture, slot, true)?;
        }

        let exit = self.program.execute().await?;
        self.permissions.reset().await?;

        let verdict = if exit.crashed() {
            Verdict::RunTimeError
        } else if exit.timed_out() {
            Verdict::TimeLimitExceeded
        } else {
            let produced = self.linker.path_for("output", true);
            let wrong = match self.validator.as_mut() {
                Some(validator) => {
                    validator
                        .check(
                            &case.input_path,
                            &produced,
                            &case.output_path,
                            self.permissions.as_ref(),
                        )
                        .await?
                }
                None => !self.comparator.matches(&case.output_path, &produced).await?,
            };
            if wrong {
                Verdict::WrongAnswer
            } else {
                Verdict::Accepted
            }
        };

        let outcome = Outcome {
            verdict,
            time_ms: exit.time_ms,
        };
        debug!(case = %case.name, verdict = %verdict, time_ms = exit.time_ms, "Case evaluated");
        self.cache.insert(key, outcome);
        Ok(outcome)
    }

    fn case_dir(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let valid = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            bail!("invalid test case name: {:?}", name);
        }
        Ok(self.root.join(relative))
    }

    fn clear_staging(&self) -> Result<()> {
        self.linker.clear()?;
        if let Some(validator) = &self.validator {
            validator.linker().clear()?;
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(cancel) if *cancel.borrow() => bail!("evaluation cancelled"),
            _ => Ok(()),
        }
    }
}

async fn emit(results: &mpsc::Sender<EvalResult>, result: EvalResult) -> Result<()> {
    results
        .send(result)
        .await
        .map_err(|_| anyhow!("result stream receiver dropped"))
}
