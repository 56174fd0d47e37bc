//! mailgate Common - Shared types and utilities
//!
//! This crate provides the error taxonomy, process configuration,
//! the module option binder and small shared types used by all
//! mailgate components.

pub mod config;
pub mod config_map;
pub mod error;
pub mod types;

pub use config::Config;
pub use config_map::{Binding, BoundConfig, ConfigMap, OptionKind};
pub use error::{ConfigError, Error, FactoryError, Result};
pub use types::{EmailAddress, ModuleDescriptor};
