//! Fail actions: what a check's rejection does to the message

use super::CheckResult;
use crate::reply::{EnhancedCode, StructuredError};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Replacement reply used instead of the one the check produced
#[derive(Debug, Clone, PartialEq)]
pub struct ReasonOverride {
    pub code: u16,
    pub enhanced_code: EnhancedCode,
    pub message: String,
}

/// Disposition policy for a non-empty [`CheckResult`].
///
/// The same check can be advisory in one deployment (`quarantine`,
/// `score 2`) and rejecting in another without touching its logic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailAction {
    pub reject: bool,
    pub quarantine: bool,
    pub score_adjustment: Option<f64>,
    pub reason_override: Option<ReasonOverride>,
}

impl FailAction {
    /// Record the rejection and otherwise accept
    pub fn ignore() -> Self {
        Self::default()
    }

    pub fn reject() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn quarantine() -> Self {
        Self {
            quarantine: true,
            ..Self::default()
        }
    }

    pub fn score(adjustment: f64) -> Self {
        Self {
            score_adjustment: Some(adjustment),
            ..Self::default()
        }
    }

    pub fn is_ignore(&self) -> bool {
        !self.reject && !self.quarantine && self.score_adjustment.is_none()
    }

    /// Interpret a check result; `None` when the check accepted
    pub fn apply(&self, result: CheckResult) -> Option<CheckOutcome> {
        let mut reason = result.reason?;

        if let Some(replacement) = &self.reason_override {
            reason = reason.wrap(
                replacement.code,
                replacement.enhanced_code,
                replacement.message.clone(),
            );
        }

        Some(CheckOutcome {
            reason,
            reject: self.reject,
            quarantine: self.quarantine,
            score: self.score_adjustment.unwrap_or(0.0),
        })
    }
}

/// A rejection after its fail action was applied
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub reason: StructuredError,
    pub reject: bool,
    pub quarantine: bool,
    pub score: f64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid fail action {input:?}: {reason}")]
pub struct FailActionParseError {
    pub input: String,
    pub reason: String,
}

impl FromStr for FailAction {
    type Err = FailActionParseError;

    /// Parses `ignore`, `reject`, `quarantine`, `score <n>` and combinations
    /// such as `quarantine score 2.5`. `reject <code> <x.y.z> <message>`
    /// replaces the reply sent to the peer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: &str| FailActionParseError {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let mut action = FailAction::default();
        let mut ignore = false;
        let mut tokens = s.split_whitespace().peekable();

        if tokens.peek().is_none() {
            return Err(fail("empty directive"));
        }

        while let Some(token) = tokens.next() {
            match token {
                "ignore" => ignore = true,
                "quarantine" => action.quarantine = true,
                "score" => {
                    let value = tokens
                        .next()
                        .ok_or_else(|| fail("score needs a value"))?;
                    let value: f64 = value.parse().map_err(|_| fail("score is not a number"))?;
                    if !value.is_finite() {
                        return Err(fail("score must be finite"));
                    }
                    action.score_adjustment = Some(value);
                }
                "reject" => {
                    action.reject = true;
                    let Some(code) = tokens.peek().and_then(|t| t.parse::<u16>().ok()) else {
                        continue;
                    };
                    tokens.next();

                    if !(400..600).contains(&code) {
                        return Err(fail("reply code must be 4xx or 5xx"));
                    }
                    let enhanced_code = tokens
                        .next()
                        .and_then(EnhancedCode::parse)
                        .ok_or_else(|| fail("expected an enhanced status code"))?;
                    if u16::from(enhanced_code.class()) != code / 100 {
                        return Err(fail("enhanced code class does not match reply code"));
                    }
                    let message = tokens.by_ref().collect::<Vec<_>>().join(" ");
                    if message.is_empty() {
                        return Err(fail("reply override needs a message"));
                    }

                    action.reason_override = Some(ReasonOverride {
                        code,
                        enhanced_code,
                        message,
                    });
                }
                _ => return Err(fail(&format!("unknown directive {token:?}"))),
            }
        }

        if ignore && !action.is_ignore() {
            return Err(fail("ignore cannot be combined with other directives"));
        }

        Ok(action)
    }
}

impl fmt::Display for FailAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ignore() {
            return f.write_str("ignore");
        }

        let mut parts = Vec::new();
        if self.quarantine {
            parts.push("quarantine".to_string());
        }
        if let Some(score) = self.score_adjustment {
            parts.push(format!("score {}", score));
        }
        // The override swallows the rest of the directive, so reject goes last.
        match (&self.reason_override, self.reject) {
            (Some(o), _) => parts.push(format!(
                "reject {} {} {}",
                o.code, o.enhanced_code, o.message
            )),
            (None, true) => parts.push("reject".to_string()),
            (None, false) => {}
        }
        f.write_str(&parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tls_rejection() -> CheckResult {
        CheckResult::reject(StructuredError::new(
            550,
            EnhancedCode(5, 7, 1),
            "TLS conversation required",
            "require_tls",
        ))
    }

    #[test]
    fn test_parse_simple_directives() {
        assert_eq!("ignore".parse::<FailAction>().unwrap(), FailAction::ignore());
        assert_eq!("reject".parse::<FailAction>().unwrap(), FailAction::reject());
        assert_eq!(
            "quarantine".parse::<FailAction>().unwrap(),
            FailAction::quarantine()
        );
        assert_eq!("score 2.5".parse::<FailAction>().unwrap(), FailAction::score(2.5));
        assert_eq!("score -3".parse::<FailAction>().unwrap(), FailAction::score(-3.0));
    }

    #[test]
    fn test_parse_combined() {
        let action: FailAction = "quarantine score 4".parse().unwrap();
        assert!(action.quarantine);
        assert!(!action.reject);
        assert_eq!(action.score_adjustment, Some(4.0));
    }

    #[test]
    fn test_parse_reject_override() {
        let action: FailAction = "reject 554 5.7.0 Go away please".parse().unwrap();
        assert!(action.reject);
        assert_eq!(
            action.reason_override,
            Some(ReasonOverride {
                code: 554,
                enhanced_code: EnhancedCode(5, 7, 0),
                message: "Go away please".to_string(),
            })
        );
        assert_eq!(action.to_string(), "reject 554 5.7.0 Go away please");
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "",
            "   ",
            "bounce",
            "score",
            "score lots",
            "ignore reject",
            "reject 250 2.0.0 ok",
            "reject 550 4.7.1 mismatch",
            "reject 550 5.7.1",
            "reject 550 nonsense text",
        ] {
            assert!(bad.parse::<FailAction>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_apply_accept_yields_nothing() {
        assert_eq!(FailAction::reject().apply(CheckResult::accept()), None);
    }

    #[test]
    fn test_apply_reject() {
        let outcome = FailAction::reject().apply(tls_rejection()).unwrap();
        assert!(outcome.reject);
        assert!(!outcome.quarantine);
        assert_eq!(outcome.score, 0.0);
        assert_eq!(outcome.reason.code, 550);
    }

    #[test]
    fn test_apply_override_keeps_origin() {
        let action: FailAction = "reject 451 4.7.0 Come back later".parse().unwrap();
        let outcome = action.apply(tls_rejection()).unwrap();

        assert_eq!(outcome.reason.code, 451);
        assert_eq!(outcome.reason.enhanced_code, EnhancedCode(4, 7, 0));
        assert_eq!(outcome.reason.message, "Come back later");
        assert_eq!(outcome.reason.check_name, "require_tls");

        let original = outcome.reason.original();
        assert_eq!(original.code, 550);
        assert_eq!(original.enhanced_code, EnhancedCode(5, 7, 1));
        assert_eq!(original.message, "TLS conversation required");
    }

    #[test]
    fn test_display_round_trips() {
        let action: FailAction = "reject quarantine score 1.5".parse().unwrap();
        assert_eq!(action.to_string().parse::<FailAction>().unwrap(), action);
        assert_eq!(FailAction::ignore().to_string(), "ignore");

        let action: FailAction = "score 2 reject 554 5.7.0 Go away".parse().unwrap();
        assert_eq!(action.score_adjustment, Some(2.0));
        assert_eq!(action.to_string(), "score 2 reject 554 5.7.0 Go away");
        assert_eq!(action.to_string().parse::<FailAction>().unwrap(), action);
    }
}
