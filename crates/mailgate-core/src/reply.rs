//! Protocol-shaped rejection reasons

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// RFC 3463 enhanced status code: class, subject, detail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnhancedCode(pub u8, pub u16, pub u16);

impl EnhancedCode {
    pub fn class(&self) -> u8 {
        self.0
    }

    /// Parse the dotted `class.subject.detail` form
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let class: u8 = parts.next()?.parse().ok()?;
        let subject: u16 = parts.next()?.parse().ok()?;
        let detail: u16 = parts.next()?.parse().ok()?;
        if parts.next().is_some() || !matches!(class, 2 | 4 | 5) {
            return None;
        }
        Some(Self(class, subject, detail))
    }
}

impl fmt::Display for EnhancedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

/// A deliberate rejection produced by a check.
///
/// This is ordinary pipeline output, not an exceptional error. Once built by
/// a check its code, enhanced code and message are never changed; later
/// stages may attach diagnostics through [`StructuredError::with_misc`] or
/// replace the reply with [`StructuredError::wrap`], which keeps the original.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredError {
    /// Three-digit reply code; 4xx temporary, 5xx permanent
    pub code: u16,
    pub enhanced_code: EnhancedCode,
    pub message: String,
    /// Originating check, for diagnostics only
    pub check_name: String,
    /// Extra diagnostic fields, never sent to the peer
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub misc: BTreeMap<String, serde_json::Value>,
    /// The reason this one replaced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrapped: Option<Box<StructuredError>>,
}

impl StructuredError {
    pub fn new(
        code: u16,
        enhanced_code: EnhancedCode,
        message: impl Into<String>,
        check_name: impl Into<String>,
    ) -> Self {
        Self {
            code,
            enhanced_code,
            message: message.into(),
            check_name: check_name.into(),
            misc: BTreeMap::new(),
            wrapped: None,
        }
    }

    /// A new reply for the same check, carrying `self` as the wrapped reason
    pub fn wrap(self, code: u16, enhanced_code: EnhancedCode, message: impl Into<String>) -> Self {
        Self {
            code,
            enhanced_code,
            message: message.into(),
            check_name: self.check_name.clone(),
            misc: BTreeMap::new(),
            wrapped: Some(Box::new(self)),
        }
    }

    /// The reason as first produced, before any wrapping
    pub fn original(&self) -> &StructuredError {
        let mut reason = self;
        while let Some(inner) = &reason.wrapped {
            reason = inner;
        }
        reason
    }

    pub fn is_temporary(&self) -> bool {
        (400..500).contains(&self.code)
    }

    pub fn is_permanent(&self) -> bool {
        (500..600).contains(&self.code)
    }

    /// Reply code class and enhanced code class agree
    pub fn is_consistent(&self) -> bool {
        u16::from(self.enhanced_code.class()) == self.code / 100
    }

    /// A 4xx or 5xx reply whose enhanced code class agrees
    pub fn is_valid_rejection(&self) -> bool {
        (self.is_temporary() || self.is_permanent()) && self.is_consistent()
    }

    /// Attach a diagnostic field
    pub fn with_misc(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.misc.insert(key.into(), value.into());
        self
    }

    /// The part of this error that goes on the wire
    pub fn reply(&self) -> SmtpReply {
        SmtpReply {
            code: self.code,
            enhanced_code: self.enhanced_code.to_string(),
            message: self.message.clone(),
        }
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (check: {})", self.reply(), self.check_name)
    }
}

/// Wire shape of a verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpReply {
    pub code: u16,
    pub enhanced_code: String,
    pub message: String,
}

impl fmt::Display for SmtpReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.code, self.enhanced_code, self.message)
    }
}
