//! In-memory record provider

use super::{normalize_zone, DnsRecord, DnsResult, ProviderModule, RecordAppender, RecordDeleter};
use crate::module::RegistryBuilder;
use async_trait::async_trait;
use mailgate_common::{Binding, BoundConfig, ConfigError, ConfigMap, FactoryError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const NAME: &str = "libdns.memory";

const DEFAULT_TTL: u32 = 300;

/// Keeps zones in process memory
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    zones: Arc<RwLock<BTreeMap<String, Vec<DnsRecord>>>>,
    default_ttl: u32,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl MemoryProvider {
    pub fn new(default_ttl: u32) -> Self {
        Self {
            zones: Arc::new(RwLock::new(BTreeMap::new())),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> u32 {
        self.default_ttl
    }

    /// Current records of `zone`
    pub async fn records(&self, zone: &str) -> DnsResult<Vec<DnsRecord>> {
        let zone = normalize_zone(zone)?;
        let zones = self.zones.read().await;
        Ok(zones.get(&zone).cloned().unwrap_or_default())
    }

    pub(crate) fn register(builder: &mut RegistryBuilder) -> Result<(), ConfigError> {
        ProviderModule::<MemoryProvider>::register(builder, NAME, declare, build)
    }
}

fn declare(map: &mut ConfigMap<'_>) {
    map.bind(
        Binding::integer("default_ttl")
            .default_value(i64::from(DEFAULT_TTL))
            .validate(|value| match value.as_integer() {
                Some(ttl) if u32::try_from(ttl).is_ok() => Ok(()),
                _ => Err("must be between 0 and 4294967295".to_string()),
            }),
    );
}

fn build(bound: &BoundConfig) -> Result<MemoryProvider, FactoryError> {
    let ttl = bound
        .integer("default_ttl")
        .and_then(|ttl| u32::try_from(ttl).ok())
        .unwrap_or(DEFAULT_TTL);
    Ok(MemoryProvider::new(ttl))
}

/// Records match on type and name; an empty value matches any value
fn matches(stored: &DnsRecord, wanted: &DnsRecord) -> bool {
    stored.record_type.eq_ignore_ascii_case(&wanted.record_type)
        && stored.name.eq_ignore_ascii_case(&wanted.name)
        && (wanted.value.is_empty() || stored.value == wanted.value)
}

#[async_trait]
impl RecordAppender for MemoryProvider {
    async fn append_records(&self, zone: &str, records: &[DnsRecord]) -> DnsResult<Vec<DnsRecord>> {
        let zone = normalize_zone(zone)?;
        let created: Vec<DnsRecord> = records
            .iter()
            .map(|record| DnsRecord {
                ttl: record.ttl.or(Some(self.default_ttl)),
                ..record.clone()
            })
            .collect();

        let mut zones = self.zones.write().await;
        zones.entry(zone).or_default().extend(created.iter().cloned());
        Ok(created)
    }
}

#[async_trait]
impl RecordDeleter for MemoryProvider {
    async fn delete_records(&self, zone: &str, records: &[DnsRecord]) -> DnsResult<Vec<DnsRecord>> {
        let zone = normalize_zone(zone)?;
        let mut zones = self.zones.write().await;
        let Some(stored) = zones.get_mut(&zone) else {
            return Ok(Vec::new());
        };

        let mut deleted = Vec::new();
        stored.retain(|existing| {
            let doomed = records.iter().any(|wanted| matches(existing, wanted));
            if doomed {
                deleted.push(existing.clone());
            }
            !doomed
        });
        if stored.is_empty() {
            zones.remove(&zone);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_append_applies_default_ttl() {
        let provider = MemoryProvider::new(120);
        let created = provider
            .append_records(
                "Example.org.",
                &[
                    DnsRecord::txt("a", "one"),
                    DnsRecord::txt("b", "two").with_ttl(30),
                ],
            )
            .await
            .unwrap();

        assert_eq!(created[0].ttl, Some(120));
        assert_eq!(created[1].ttl, Some(30));
        assert_eq!(provider.records("example.org").await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_delete_matching_records() {
        let provider = MemoryProvider::default();
        provider
            .append_records(
                "example.org",
                &[
                    DnsRecord::txt("a", "one"),
                    DnsRecord::txt("a", "two"),
                    DnsRecord::new("A", "a", "192.0.2.1"),
                ],
            )
            .await
            .unwrap();

        let deleted = provider
            .delete_records("example.org", &[DnsRecord::txt("a", "one")])
            .await
            .unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(provider.records("example.org").await.unwrap().len(), 2);

        let deleted = provider
            .delete_records("example.org", &[DnsRecord::txt("A", "")])
            .await
            .unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].value, "two");
    }

    #[tokio::test]
    async fn test_delete_from_unknown_zone() {
        let provider = MemoryProvider::default();
        let deleted = provider
            .delete_records("nowhere.test", &[DnsRecord::txt("x", "")])
            .await
            .unwrap();
        assert!(deleted.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_zone() {
        let provider = MemoryProvider::default();
        assert!(provider.append_records("", &[]).await.is_err());
    }
}
