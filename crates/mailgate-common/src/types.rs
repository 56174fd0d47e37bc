//! Common types for mailgate

use serde::{Deserialize, Serialize};

/// Email address as seen in the SMTP envelope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string, with or without angle brackets
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().trim_start_matches('<').trim_end_matches('>');
        let (local, domain) = s.rsplit_once('@')?;
        if local.is_empty() || domain.is_empty() {
            return None;
        }
        Some(Self::new(local, domain))
    }

    /// Domain part, lowercased
    pub fn normalized_domain(&self) -> String {
        self.domain.to_ascii_lowercase()
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Parse(format!("invalid email address: {s}")))
    }
}

/// Identifies one configured module instance.
///
/// `module_name` selects the factory, `instance_name` tells apart several
/// instances built by the same factory and is unique within the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub module_name: String,
    pub instance_name: String,
}

impl ModuleDescriptor {
    pub fn new(module_name: impl Into<String>, instance_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            instance_name: instance_name.into(),
        }
    }
}

impl std::fmt::Display for ModuleDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.module_name, self.instance_name)
    }
}
