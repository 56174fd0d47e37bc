//! DNS record providers
//!
//! Providers manage records in a zone hosted by some DNS service. Only the
//! capability traits and an in-memory provider live here; bindings for real
//! DNS services plug in through [`ProviderModule`].

mod acme;
mod memory;

pub use acme::Dns01Solver;
pub use memory::MemoryProvider;

use crate::module::{ModuleKind, RegistryBuilder};
use async_trait::async_trait;
use mailgate_common::{BoundConfig, ConfigError, ConfigMap, FactoryError, ModuleDescriptor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// A resource record, named relative to its zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    /// "TXT", "A", ...
    pub record_type: String,
    /// Relative name; "@" or "" for the zone apex
    pub name: String,
    pub value: String,
    /// Seconds; `None` lets the provider choose
    pub ttl: Option<u32>,
}

impl DnsRecord {
    pub fn new(
        record_type: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            record_type: record_type.into(),
            name: name.into(),
            value: value.into(),
            ttl: None,
        }
    }

    pub fn txt(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new("TXT", name, value)
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    #[error("invalid zone: {0:?}")]
    InvalidZone(String),

    #[error("{name} is not inside zone {zone}")]
    NotInZone { name: String, zone: String },

    #[error("provider error: {0}")]
    Provider(String),
}

pub type DnsResult<T> = Result<T, DnsError>;

/// Adds records to a zone
#[async_trait]
pub trait RecordAppender: Send + Sync {
    /// Returns the records as created by the provider
    async fn append_records(&self, zone: &str, records: &[DnsRecord]) -> DnsResult<Vec<DnsRecord>>;
}

/// Removes records from a zone
#[async_trait]
pub trait RecordDeleter: Send + Sync {
    /// Returns the records that were actually deleted
    async fn delete_records(&self, zone: &str, records: &[DnsRecord]) -> DnsResult<Vec<DnsRecord>>;
}

/// Full record management capability
pub trait RecordProvider: RecordAppender + RecordDeleter {}

impl<T: RecordAppender + RecordDeleter + ?Sized> RecordProvider for T {}

/// Zone name in canonical form: lowercase, without the trailing dot
pub(crate) fn normalize_zone(zone: &str) -> DnsResult<String> {
    let zone = zone.trim().trim_end_matches('.').to_ascii_lowercase();
    if zone.is_empty() || zone.split('.').any(str::is_empty) {
        return Err(DnsError::InvalidZone(zone));
    }
    Ok(zone)
}

/// Declares the options of a provider
pub type DeclareFn = fn(&mut ConfigMap<'_>);

/// Builds a provider from its bound options
pub type BuildFn<P> = fn(&BoundConfig) -> Result<P, FactoryError>;

/// Wraps a provider implementation as a module instance
pub struct ProviderModule<P> {
    descriptor: ModuleDescriptor,
    provider: P,
}

impl<P: RecordProvider + 'static> ProviderModule<P> {
    pub fn new(descriptor: ModuleDescriptor, provider: P) -> Self {
        Self {
            descriptor,
            provider,
        }
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// Register a provider under `name`: `declare` binds its options and
    /// `build` constructs it from the processed values
    pub fn register(
        builder: &mut RegistryBuilder,
        name: &str,
        declare: DeclareFn,
        build: BuildFn<P>,
    ) -> Result<(), ConfigError> {
        builder.register(name, move |args| {
            let mut map = args.config_map();
            declare(&mut map);
            let provider = build(&map.process()?)?;
            Ok(ModuleKind::RecordProvider(Arc::new(Self::new(
                args.descriptor.clone(),
                provider,
            ))))
        })
    }
}

#[async_trait]
impl<P: RecordProvider> RecordAppender for ProviderModule<P> {
    async fn append_records(&self, zone: &str, records: &[DnsRecord]) -> DnsResult<Vec<DnsRecord>> {
        debug!(provider = %self.descriptor, zone, count = records.len(), "Appending DNS records");
        self.provider.append_records(zone, records).await
    }
}

#[async_trait]
impl<P: RecordProvider> RecordDeleter for ProviderModule<P> {
    async fn delete_records(&self, zone: &str, records: &[DnsRecord]) -> DnsResult<Vec<DnsRecord>> {
        debug!(provider = %self.descriptor, zone, count = records.len(), "Deleting DNS records");
        self.provider.delete_records(zone, records).await
    }
}
