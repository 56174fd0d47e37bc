//! Checks built from plain functions
//!
//! A stateless check is a set of optional per-stage `fn` pointers. Plain
//! function pointers cannot capture anything, so these checks hold no state
//! between invocations and can run concurrently for any number of sessions.

use super::{Check, CheckContext, CheckExecutionError, CheckResult, CheckStage, FailAction};
use async_trait::async_trait;
use mailgate_common::types::EmailAddress;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::debug;

/// Stage function for connection, sender and body stages
pub type StageFn = fn(&CheckContext) -> anyhow::Result<CheckResult>;

/// Stage function for the recipient stage
pub type RecipientFn = fn(&CheckContext, &EmailAddress) -> anyhow::Result<CheckResult>;

/// The stages a stateless check participates in
#[derive(Debug, Clone, Copy, Default)]
pub struct StatelessStages {
    pub connection: Option<StageFn>,
    pub sender: Option<StageFn>,
    pub recipient: Option<RecipientFn>,
    pub body: Option<StageFn>,
}

/// A [`Check`] backed by [`StatelessStages`]
#[derive(Debug, Clone)]
pub struct StatelessCheck {
    name: String,
    instance: String,
    fail_action: FailAction,
    stages: StatelessStages,
}

impl StatelessCheck {
    pub fn new(
        name: impl Into<String>,
        instance: impl Into<String>,
        fail_action: FailAction,
        stages: StatelessStages,
    ) -> Self {
        Self {
            name: name.into(),
            instance: instance.into(),
            fail_action,
            stages,
        }
    }

    fn execution_error(&self, stage: &CheckStage, reason: String) -> CheckExecutionError {
        CheckExecutionError {
            check: self.name.clone(),
            stage: stage.name(),
            reason,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

#[async_trait]
impl Check for StatelessCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn fail_action(&self) -> &FailAction {
        &self.fail_action
    }

    async fn run(
        &self,
        stage: &CheckStage,
        ctx: &CheckContext,
    ) -> Result<CheckResult, CheckExecutionError> {
        let invoked = match (stage, &self.stages) {
            (CheckStage::Connection, StatelessStages { connection: Some(f), .. })
            | (CheckStage::Sender, StatelessStages { sender: Some(f), .. })
            | (CheckStage::Body, StatelessStages { body: Some(f), .. }) => {
                panic::catch_unwind(AssertUnwindSafe(|| f(ctx)))
            }
            (CheckStage::Recipient(rcpt), StatelessStages { recipient: Some(f), .. }) => {
                panic::catch_unwind(AssertUnwindSafe(|| f(ctx, rcpt)))
            }
            _ => return Ok(CheckResult::accept()),
        };

        let mut result = match invoked {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return Err(self.execution_error(stage, format!("{e:#}"))),
            Err(payload) => {
                return Err(self.execution_error(
                    stage,
                    format!("check panicked: {}", panic_message(payload.as_ref())),
                ))
            }
        };

        if let Some(reason) = result.reason.as_mut() {
            if reason.check_name.is_empty() {
                reason.check_name = self.name.clone();
            }
        }

        debug!(
            check = %self.name,
            instance = %self.instance,
            stage = stage.name(),
            accepted = result.is_accept(),
            "Check evaluated"
        );

        Ok(result)
    }
}
