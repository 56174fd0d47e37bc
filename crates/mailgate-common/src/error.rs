//! Error types for mailgate

use thiserror::Error;

/// Error reported by a module factory. Anything a constructor can fail with
/// (binding errors, I/O while preparing a root directory, ...) converts into it.
pub type FactoryError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Startup-time configuration and registry errors.
///
/// None of these are recoverable: they abort process startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required option: {key}")]
    MissingRequiredOption { key: String },

    #[error("invalid type for option {key}: expected {expected}, got {got}")]
    InvalidOptionType {
        key: String,
        expected: &'static str,
        got: &'static str,
    },

    #[error("invalid value for option {key}: {reason}")]
    InvalidOptionValue { key: String, reason: String },

    #[error("unknown option: {key}")]
    UnknownOption { key: String },

    #[error("module {0} is already registered")]
    DuplicateRegistration(String),

    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("instance name {0} is used more than once")]
    DuplicateInstance(String),

    #[error("unknown module instance: {0}")]
    UnknownInstance(String),

    #[error("instance {instance} is a {actual}, expected a {expected}")]
    WrongModuleRole {
        instance: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("module registry is already installed")]
    RegistryAlreadyInstalled,

    #[error("failed to instantiate {module} ({instance}): {source}")]
    Factory {
        module: String,
        instance: String,
        #[source]
        source: FactoryError,
    },
}

impl ConfigError {
    /// The option key this error refers to, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            ConfigError::MissingRequiredOption { key }
            | ConfigError::InvalidOptionType { key, .. }
            | ConfigError::InvalidOptionValue { key, .. }
            | ConfigError::UnknownOption { key } => Some(key),
            _ => None,
        }
    }

    /// Walks a factory error chain down to the binder error that caused it
    pub fn root_config_error(&self) -> &ConfigError {
        match self {
            ConfigError::Factory { source, .. } => source
                .downcast_ref::<ConfigError>()
                .map(ConfigError::root_config_error)
                .unwrap_or(self),
            other => other,
        }
    }
}

/// Main error type for mailgate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for mailgate
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_config_error_unwraps_factory() {
        let err = ConfigError::Factory {
            module: "storage.blob.fs".to_string(),
            instance: "local".to_string(),
            source: Box::new(ConfigError::MissingRequiredOption {
                key: "root".to_string(),
            }),
        };

        let root = err.root_config_error();
        assert!(matches!(root, ConfigError::MissingRequiredOption { .. }));
        assert_eq!(root.key(), Some("root"));
    }

    #[test]
    fn test_error_codes() {
        let err: Error = ConfigError::UnknownModule("nope".to_string()).into();
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert_eq!(
            err.to_string(),
            "Configuration error: unknown module: nope"
        );

        let err = Error::Parse("bad".to_string());
        assert_eq!(err.code(), "PARSE_ERROR");
    }
}
