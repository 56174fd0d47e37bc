//! `require_tls`: refuse connections that did not complete a TLS handshake

use super::{CheckContext, CheckResult, FailAction, StatelessStages};
use crate::module::RegistryBuilder;
use crate::reply::{EnhancedCode, StructuredError};
use mailgate_common::ConfigError;

pub const NAME: &str = "require_tls";

fn require_tls(ctx: &CheckContext) -> anyhow::Result<CheckResult> {
    if ctx.conn.as_ref().is_some_and(|conn| conn.tls.handshake_complete) {
        return Ok(CheckResult::accept());
    }

    Ok(CheckResult::reject(StructuredError::new(
        550,
        EnhancedCode(5, 7, 1),
        "TLS conversation required",
        NAME,
    )))
}

pub(crate) fn register(builder: &mut RegistryBuilder) -> Result<(), ConfigError> {
    builder.register_stateless_check(
        NAME,
        FailAction::reject(),
        StatelessStages {
            connection: Some(require_tls),
            ..Default::default()
        },
    )
}
