//! Configuration for mailgate

use crate::error::ConfigError;
use crate::types::ModuleDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Values module options may inherit (e.g. `hostname`)
    #[serde(default)]
    pub globals: toml::Table,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Check pipeline configuration
    pub pipeline: Option<PipelineConfig>,

    /// Declared module instances
    #[serde(default)]
    pub modules: Vec<ModuleDecl>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// What the pipeline does when a check cannot reach a verdict.
///
/// There is intentionally no default: operators must pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckErrorPolicy {
    /// Accept and log
    FailOpen,
    /// Temporarily reject
    FailClosed,
}

/// Check pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Check instance names, evaluated in this order
    #[serde(default)]
    pub checks: Vec<String>,

    /// Handling of check execution errors
    pub on_check_error: CheckErrorPolicy,

    /// Aggregate score at which an accepted message is quarantined
    pub quarantine_score: Option<f64>,

    /// Aggregate score at which the message is rejected
    pub reject_score: Option<f64>,

    /// Append the originating check name to protocol replies
    #[serde(default)]
    pub expose_check_name: bool,
}

/// One `[[modules]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleDecl {
    /// Registered module name, e.g. `storage.blob.fs`
    pub module: String,

    /// Instance name; defaults to the module name
    pub instance: Option<String>,

    /// Options handed to the module's factory
    #[serde(default)]
    pub args: toml::Table,
}

impl ModuleDecl {
    pub fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor::new(
            self.module.clone(),
            self.instance.clone().unwrap_or_else(|| self.module.clone()),
        )
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), modules = config.modules.len(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an explicit path or the default locations
    pub fn load(explicit: Option<&Path>) -> crate::Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let paths = [
            PathBuf::from("./mailgate.toml"),
            PathBuf::from("/etc/mailgate/mailgate.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Internal(
            "No configuration file found".to_string(),
        ))
    }

    /// Structural checks that do not need the module registry
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for decl in &self.modules {
            let descriptor = decl.descriptor();
            if !seen.insert(descriptor.instance_name.clone()) {
                return Err(ConfigError::DuplicateInstance(descriptor.instance_name));
            }
        }

        if let Some(pipeline) = &self.pipeline {
            for check in &pipeline.checks {
                if !seen.contains(check) {
                    return Err(ConfigError::UnknownInstance(check.clone()));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_logging() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.level, "info");
        assert_eq!(logging.format, "json");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[globals]
hostname = "mx.example.org"

[logging]
format = "text"

[pipeline]
checks = ["tls"]
on_check_error = "fail_closed"
reject_score = 10.0

[[modules]]
module = "require_tls"
instance = "tls"

[[modules]]
module = "storage.blob.fs"
[modules.args]
root = "/var/lib/mailgate/blobs"
"#;

        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.logging.format, "text");
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.globals.get("hostname").and_then(|v| v.as_str()),
            Some("mx.example.org")
        );

        let pipeline = config.pipeline.unwrap();
        assert_eq!(pipeline.on_check_error, CheckErrorPolicy::FailClosed);
        assert_eq!(pipeline.reject_score, Some(10.0));
        assert!(!pipeline.expose_check_name);

        assert_eq!(config.modules.len(), 2);
        assert_eq!(
            config.modules[1].descriptor(),
            ModuleDescriptor::new("storage.blob.fs", "storage.blob.fs")
        );
    }

    #[test]
    fn test_pipeline_requires_explicit_error_policy() {
        let toml = r#"
[pipeline]
checks = []
"#;
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_duplicate_instance_rejected() {
        let toml = r#"
[[modules]]
module = "require_tls"
instance = "tls"

[[modules]]
module = "storage.blob.memory"
instance = "tls"
"#;
        let err = Config::from_toml_str(toml).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Config(ConfigError::DuplicateInstance(ref name)) if name == "tls"
        ));
    }

    #[test]
    fn test_pipeline_references_unknown_check() {
        let toml = r#"
[pipeline]
checks = ["missing"]
on_check_error = "fail_open"
"#;
        let err = Config::from_toml_str(toml).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Config(ConfigError::UnknownInstance(_))
        ));
    }

    #[test]
    fn test_mistyped_keys_rejected() {
        let pipeline = r#"
[pipeline]
on_check_error = "fail_open"
reject_scor = 5.0
"#;
        let err = Config::from_toml_str(pipeline).unwrap_err();
        assert!(err.to_string().contains("reject_scor"), "{err}");

        for toml in [
            "[logging]\nlevl = \"debug\"\n",
            "[[modules]]\nmodule = \"require_tls\"\ninstnace = \"tls\"\n",
            "[globals]\nhostname = \"mx\"\n[pipline]\non_check_error = \"fail_open\"\n",
        ] {
            assert!(
                matches!(Config::from_toml_str(toml), Err(crate::Error::Parse(_))),
                "{toml:?} should be rejected"
            );
        }
    }
}
