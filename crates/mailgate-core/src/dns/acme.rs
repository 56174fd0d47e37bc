//! ACME DNS-01 challenge records

use super::{normalize_zone, DnsError, DnsRecord, DnsResult, RecordProvider};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

const CHALLENGE_LABEL: &str = "_acme-challenge";
const CHALLENGE_TTL: u32 = 120;

/// Publishes and removes `_acme-challenge` TXT records through a provider
pub struct Dns01Solver {
    provider: Arc<dyn RecordProvider>,
    zone: String,
    ttl: u32,
}

impl Dns01Solver {
    pub fn new(provider: Arc<dyn RecordProvider>, zone: &str) -> DnsResult<Self> {
        Ok(Self {
            provider,
            zone: normalize_zone(zone)?,
            ttl: CHALLENGE_TTL,
        })
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// TXT value for a key authorization: unpadded base64url SHA-256 digest
    pub fn challenge_value(key_authorization: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(key_authorization.as_bytes()))
    }

    /// Name of the challenge record for `domain`, relative to the zone
    pub fn record_name(&self, domain: &str) -> DnsResult<String> {
        let domain = domain
            .trim()
            .trim_start_matches("*.")
            .trim_end_matches('.')
            .to_ascii_lowercase();

        if domain == self.zone {
            return Ok(CHALLENGE_LABEL.to_string());
        }
        match domain.strip_suffix(&self.zone) {
            Some(prefix) if prefix.ends_with('.') => {
                Ok(format!("{CHALLENGE_LABEL}.{}", prefix.trim_end_matches('.')))
            }
            _ => Err(DnsError::NotInZone {
                name: domain,
                zone: self.zone.clone(),
            }),
        }
    }

    fn challenge_record(&self, domain: &str, key_authorization: &str) -> DnsResult<DnsRecord> {
        Ok(
            DnsRecord::txt(self.record_name(domain)?, Self::challenge_value(key_authorization))
                .with_ttl(self.ttl),
        )
    }

    /// Publish the challenge record for `domain`
    pub async fn present(&self, domain: &str, key_authorization: &str) -> DnsResult<DnsRecord> {
        let record = self.challenge_record(domain, key_authorization)?;
        let created = self
            .provider
            .append_records(&self.zone, std::slice::from_ref(&record))
            .await?;
        info!(zone = %self.zone, name = %record.name, "DNS-01 challenge presented");
        Ok(created.into_iter().next().unwrap_or(record))
    }

    /// Remove the challenge record published by [`Dns01Solver::present`]
    pub async fn cleanup(&self, domain: &str, key_authorization: &str) -> DnsResult<()> {
        let record = self.challenge_record(domain, key_authorization)?;
        let deleted = self
            .provider
            .delete_records(&self.zone, std::slice::from_ref(&record))
            .await?;
        info!(
            zone = %self.zone,
            name = %record.name,
            deleted = deleted.len(),
            "DNS-01 challenge cleaned up"
        );
        Ok(())
    }
}
