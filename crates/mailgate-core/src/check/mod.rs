//! Message checks
//!
//! A check looks at a read-only [`CheckContext`] and either accepts or
//! returns a [`StructuredError`]. What a rejection *means* for the message is
//! decided separately by the check's [`FailAction`], and the
//! [`CheckPipeline`] folds the outcomes of all configured checks into one
//! [`Verdict`].

mod fail_action;
mod pipeline;
pub mod require_tls;
mod stateless;

pub use fail_action::{CheckOutcome, FailAction, FailActionParseError, ReasonOverride};
pub use pipeline::{Cancelled, CheckPipeline, Disposition, Verdict};
pub use stateless::{RecipientFn, StageFn, StatelessCheck, StatelessStages};

use crate::reply::StructuredError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailgate_common::types::EmailAddress;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;

/// Security state of the transport
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsState {
    pub handshake_complete: bool,
    pub version: Option<String>,
    pub cipher_suite: Option<String>,
    pub server_name: Option<String>,
}

impl TlsState {
    /// State after a completed handshake
    pub fn established(version: impl Into<String>) -> Self {
        Self {
            handshake_complete: true,
            version: Some(version.into()),
            ..Self::default()
        }
    }
}

/// Per-connection data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnState {
    pub remote_addr: Option<SocketAddr>,
    /// HELO/EHLO hostname
    pub helo: Option<String>,
    /// "ESMTP", "LMTP", ...
    pub proto: String,
    pub tls: TlsState,
    pub auth_user: Option<String>,
}

impl ConnState {
    pub fn new(proto: impl Into<String>) -> Self {
        Self {
            remote_addr: None,
            helo: None,
            proto: proto.into(),
            tls: TlsState::default(),
            auth_user: None,
        }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_helo(mut self, helo: impl Into<String>) -> Self {
        self.helo = Some(helo.into());
        self
    }

    pub fn with_tls(mut self, tls: TlsState) -> Self {
        self.tls = tls;
        self
    }
}

/// Per-message metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMeta {
    pub id: String,
    pub size: Option<u64>,
    pub headers: Vec<(String, String)>,
    pub received_at: DateTime<Utc>,
}

impl MessageMeta {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            size: None,
            headers: Vec::new(),
            received_at: Utc::now(),
        }
    }

    /// First header with the given name, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Read-only snapshot handed to checks.
///
/// `conn` is `None` for messages that did not arrive over the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckContext {
    pub msg: MessageMeta,
    pub conn: Option<ConnState>,
    /// Envelope sender; `None` for the null reverse-path
    pub sender: Option<EmailAddress>,
    pub recipients: Vec<EmailAddress>,
}

impl CheckContext {
    pub fn new(msg_id: impl Into<String>) -> Self {
        Self {
            msg: MessageMeta::new(msg_id),
            conn: None,
            sender: None,
            recipients: Vec::new(),
        }
    }

    pub fn with_conn(mut self, conn: ConnState) -> Self {
        self.conn = Some(conn);
        self
    }

    pub fn with_sender(mut self, sender: EmailAddress) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_recipient(mut self, rcpt: EmailAddress) -> Self {
        self.recipients.push(rcpt);
        self
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.msg.headers = headers;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.msg.size = Some(size);
        self
    }
}

/// Point of the SMTP transaction a check runs at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStage {
    Connection,
    Sender,
    Recipient(EmailAddress),
    Body,
}

impl CheckStage {
    pub fn name(&self) -> &'static str {
        match self {
            CheckStage::Connection => "connection",
            CheckStage::Sender => "sender",
            CheckStage::Recipient(_) => "recipient",
            CheckStage::Body => "body",
        }
    }
}

/// Result of one check invocation; no reason means accept
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckResult {
    pub reason: Option<StructuredError>,
}

impl CheckResult {
    pub fn accept() -> Self {
        Self { reason: None }
    }

    pub fn reject(reason: StructuredError) -> Self {
        Self {
            reason: Some(reason),
        }
    }

    pub fn is_accept(&self) -> bool {
        self.reason.is_none()
    }
}

/// A check could not reach a verdict.
///
/// Kept apart from [`CheckResult`] so a fault is never mistaken for an
/// accept or a reject; the pipeline's error policy decides what happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("check {check} failed at {stage} stage: {reason}")]
pub struct CheckExecutionError {
    pub check: String,
    pub stage: &'static str,
    pub reason: String,
}

/// A message check
#[async_trait]
pub trait Check: Send + Sync {
    /// Check name, reported as the origin of its rejections
    fn name(&self) -> &str;

    /// How a rejection from this check affects the message
    fn fail_action(&self) -> &FailAction;

    /// Evaluate the check at `stage`
    async fn run(
        &self,
        stage: &CheckStage,
        ctx: &CheckContext,
    ) -> Result<CheckResult, CheckExecutionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder() {
        let ctx = CheckContext::new("msg-1")
            .with_conn(
                ConnState::new("ESMTP")
                    .with_helo("client.example")
                    .with_tls(TlsState::established("TLSv1.3")),
            )
            .with_sender(EmailAddress::new("alice", "example.org"))
            .with_recipient(EmailAddress::new("bob", "example.com"))
            .with_headers(vec![("Subject".to_string(), "hi".to_string())])
            .with_size(42);

        let conn = ctx.conn.as_ref().unwrap();
        assert!(conn.tls.handshake_complete);
        assert_eq!(conn.tls.version.as_deref(), Some("TLSv1.3"));
        assert_eq!(ctx.recipients.len(), 1);
        assert_eq!(ctx.msg.header("subject"), Some("hi"));
        assert_eq!(ctx.msg.size, Some(42));
    }

    #[test]
    fn test_check_result() {
        assert!(CheckResult::accept().is_accept());
        assert_eq!(CheckResult::default(), CheckResult::accept());
    }
}
