//! Check pipeline: runs configured checks and folds their outcomes

use super::{Check, CheckContext, CheckExecutionError, CheckOutcome, CheckResult, CheckStage};
use crate::module::ModuleSet;
use crate::reply::{EnhancedCode, SmtpReply, StructuredError};
use mailgate_common::config::{CheckErrorPolicy, PipelineConfig};
use mailgate_common::ConfigError;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SCORE_REJECT_MESSAGE: &str = "Message rejected due to a high spam score";
const CHECK_ERROR_MESSAGE: &str = "Internal error during policy check";

/// Origin reported for verdicts the pipeline makes itself
const PIPELINE_ORIGIN: &str = "pipeline";

/// Final disposition of a message
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Accept,
    /// Accept and mark for deferred review
    Quarantine,
    Reject(StructuredError),
    /// A check failed under the fail-closed policy
    TempFail(StructuredError),
}

/// Aggregated pipeline result
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub disposition: Disposition,
    /// Sum of score adjustments of all non-empty results
    pub score: f64,
    /// Every non-empty check result, in evaluation order
    pub outcomes: Vec<CheckOutcome>,
    /// Checks that could not reach a verdict
    pub errors: Vec<CheckExecutionError>,
}

impl Verdict {
    /// Whether the message is taken in (possibly quarantined)
    pub fn is_accepted(&self) -> bool {
        matches!(
            self.disposition,
            Disposition::Accept | Disposition::Quarantine
        )
    }

    /// Protocol reply for a refused message
    pub fn reply(&self) -> Option<SmtpReply> {
        match &self.disposition {
            Disposition::Reject(reason) | Disposition::TempFail(reason) => Some(reason.reply()),
            Disposition::Accept | Disposition::Quarantine => None,
        }
    }
}

/// Evaluation was cancelled before it finished
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("check evaluation cancelled")]
pub struct Cancelled;

#[derive(Default)]
struct Tally {
    outcomes: Vec<CheckOutcome>,
    errors: Vec<CheckExecutionError>,
    score: f64,
}

/// Ordered list of checks plus the policy that combines their results
pub struct CheckPipeline {
    checks: Vec<Arc<dyn Check>>,
    on_check_error: CheckErrorPolicy,
    quarantine_score: Option<f64>,
    reject_score: Option<f64>,
    expose_check_name: bool,
}

impl CheckPipeline {
    /// Create an empty pipeline
    pub fn new(on_check_error: CheckErrorPolicy) -> Self {
        Self {
            checks: Vec::new(),
            on_check_error,
            quarantine_score: None,
            reject_score: None,
            expose_check_name: false,
        }
    }

    /// Build the pipeline described by `config`, resolving check instances
    /// from `modules`
    pub fn from_config(config: &PipelineConfig, modules: &ModuleSet) -> Result<Self, ConfigError> {
        let mut pipeline = Self::new(config.on_check_error);
        for name in &config.checks {
            pipeline = pipeline.with_check(modules.check(name)?);
        }
        pipeline.quarantine_score = config.quarantine_score;
        pipeline.reject_score = config.reject_score;
        pipeline.expose_check_name = config.expose_check_name;

        info!(
            checks = pipeline.checks.len(),
            on_check_error = ?pipeline.on_check_error,
            "Check pipeline configured"
        );
        Ok(pipeline)
    }

    pub fn with_check(mut self, check: Arc<dyn Check>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn with_quarantine_score(mut self, threshold: f64) -> Self {
        self.quarantine_score = Some(threshold);
        self
    }

    pub fn with_reject_score(mut self, threshold: f64) -> Self {
        self.reject_score = Some(threshold);
        self
    }

    pub fn expose_check_name(mut self, expose: bool) -> Self {
        self.expose_check_name = expose;
        self
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run every check for one stage
    pub async fn evaluate(&self, stage: &CheckStage, ctx: &CheckContext) -> Verdict {
        let mut tally = Tally::default();
        self.run_stage(stage, ctx, &mut tally).await;
        self.resolve(tally)
    }

    /// Run several stages in order, aggregating one score over all of them.
    ///
    /// Stops early once a stage produces an explicit reject and no score
    /// threshold is configured.
    pub async fn evaluate_all(&self, stages: &[CheckStage], ctx: &CheckContext) -> Verdict {
        let mut tally = Tally::default();
        for stage in stages {
            if self.run_stage(stage, ctx, &mut tally).await {
                break;
            }
        }
        self.resolve(tally)
    }

    /// [`evaluate`](Self::evaluate), abandoned as soon as `token` fires
    pub async fn evaluate_cancellable(
        &self,
        stage: &CheckStage,
        ctx: &CheckContext,
        token: &CancellationToken,
    ) -> Result<Verdict, Cancelled> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(msg_id = %ctx.msg.id, stage = stage.name(), "Check evaluation cancelled");
                Err(Cancelled)
            }
            verdict = self.evaluate(stage, ctx) => Ok(verdict),
        }
    }

    /// Render a rejection as a reply line
    pub fn reply_line(&self, reason: &StructuredError) -> String {
        if self.expose_check_name {
            reason.to_string()
        } else {
            reason.reply().to_string()
        }
    }

    fn has_score_thresholds(&self) -> bool {
        self.quarantine_score.is_some() || self.reject_score.is_some()
    }

    /// Returns true when evaluation should stop
    async fn run_stage(&self, stage: &CheckStage, ctx: &CheckContext, tally: &mut Tally) -> bool {
        for check in &self.checks {
            match check
                .run(stage, ctx)
                .await
                .and_then(|result| validate_reason(check.name(), stage, result))
            {
                Ok(result) => {
                    let Some(outcome) = check.fail_action().apply(result) else {
                        continue;
                    };
                    debug!(
                        msg_id = %ctx.msg.id,
                        check = check.name(),
                        stage = stage.name(),
                        reject = outcome.reject,
                        quarantine = outcome.quarantine,
                        score = outcome.score,
                        "Check produced a rejection"
                    );
                    let stop = outcome.reject && !self.has_score_thresholds();
                    tally.score += outcome.score;
                    tally.outcomes.push(outcome);
                    if stop {
                        return true;
                    }
                }
                Err(e) => {
                    warn!(
                        msg_id = %ctx.msg.id,
                        check = %e.check,
                        stage = e.stage,
                        policy = ?self.on_check_error,
                        "Check execution failed: {}",
                        e.reason
                    );
                    tally.errors.push(e);
                }
            }
        }
        false
    }

    fn resolve(&self, tally: Tally) -> Verdict {
        let explicit_reject = tally
            .outcomes
            .iter()
            .find(|o| o.reject)
            .map(|o| o.reason.clone());
        let over = |threshold: Option<f64>| threshold.is_some_and(|t| tally.score >= t);

        let disposition = if let Some(reason) = explicit_reject {
            Disposition::Reject(reason)
        } else if over(self.reject_score) {
            Disposition::Reject(
                StructuredError::new(
                    550,
                    EnhancedCode(5, 7, 1),
                    SCORE_REJECT_MESSAGE,
                    PIPELINE_ORIGIN,
                )
                .with_misc("score", tally.score),
            )
        } else if !tally.errors.is_empty() && self.on_check_error == CheckErrorPolicy::FailClosed {
            let origin = tally
                .errors
                .first()
                .map(|e| e.check.clone())
                .unwrap_or_else(|| PIPELINE_ORIGIN.to_string());
            Disposition::TempFail(StructuredError::new(
                451,
                EnhancedCode(4, 7, 0),
                CHECK_ERROR_MESSAGE,
                origin,
            ))
        } else if tally.outcomes.iter().any(|o| o.quarantine) || over(self.quarantine_score) {
            Disposition::Quarantine
        } else {
            Disposition::Accept
        };

        match &disposition {
            Disposition::Reject(reason) | Disposition::TempFail(reason) => {
                info!(score = tally.score, "Message refused: {reason}")
            }
            Disposition::Quarantine => info!(score = tally.score, "Message quarantined"),
            Disposition::Accept => debug!(score = tally.score, "Message accepted"),
        }

        Verdict {
            disposition,
            score: tally.score,
            outcomes: tally.outcomes,
            errors: tally.errors,
        }
    }
}

/// Reject replies that could not be sent as a refusal
fn validate_reason(
    check: &str,
    stage: &CheckStage,
    result: CheckResult,
) -> Result<CheckResult, CheckExecutionError> {
    match &result.reason {
        Some(reason) if !reason.is_valid_rejection() => Err(CheckExecutionError {
            check: check.to_string(),
            stage: stage.name(),
            reason: format!("malformed rejection reply \"{}\"", reason.reply()),
        }),
        _ => Ok(result),
    }
}
