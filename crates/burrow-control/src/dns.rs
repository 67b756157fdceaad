//! Dynamic DNS for relay hostnames
//!
//! After a relay registers, its hostname is pointed at this service's own
//! address through a [`DnsProvider`]. Upserts are fire-and-forget: a failure
//! is logged and the relay keeps working for clients that can already
//! resolve it.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

const CLOUDFLARE_API: &str = "https://api.cloudflare.com/client/v4";

/// DNS errors
#[derive(Debug, Error)]
pub enum DnsError {
    #[error("Failed to resolve {hostname}: {reason}")]
    Resolve { hostname: String, reason: String },

    #[error("DNS provider error: {0}")]
    Provider(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// DNS record types this service publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
    Aaaa,
}

impl RecordType {
    pub fn for_address(address: IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => RecordType::A,
            IpAddr::V6(_) => RecordType::Aaaa,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that can create or replace a DNS record
#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn upsert(&self, hostname: &str, record_type: RecordType, value: &str)
        -> Result<(), DnsError>;
}

/// Logs upserts without publishing anything
#[derive(Debug, Default, Clone)]
pub struct NoopDnsProvider;

#[async_trait]
impl DnsProvider for NoopDnsProvider {
    async fn upsert(
        &self,
        hostname: &str,
        record_type: RecordType,
        value: &str,
    ) -> Result<(), DnsError> {
        info!("DNS (not published): {} {} => {}", hostname, record_type, value);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CloudflareRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    r#type: String,
    name: String,
    content: String,
    ttl: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxied: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CloudflareResponse<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<CloudflareError>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CloudflareError {
    code: u32,
    message: String,
}

impl<T> CloudflareResponse<T> {
    fn into_result(self) -> Result<Option<T>, DnsError> {
        if self.success {
            return Ok(self.result);
        }
        let errors: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect();
        Err(DnsError::Provider(format!(
            "Cloudflare API errors: {}",
            errors.join(", ")
        )))
    }
}

/// Publishes records in one Cloudflare zone
pub struct CloudflareDnsProvider {
    client: Client,
    api_token: String,
    zone_id: String,
    ttl: u32,
    base_url: String,
}

impl fmt::Debug for CloudflareDnsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudflareDnsProvider")
            .field("zone_id", &self.zone_id)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl CloudflareDnsProvider {
    pub fn new(api_token: impl Into<String>, zone_id: impl Into<String>) -> Result<Self, DnsError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            api_token: api_token.into(),
            zone_id: zone_id.into(),
            // Cloudflare's "automatic" TTL
            ttl: 1,
            base_url: CLOUDFLARE_API.to_string(),
        })
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    /// Point the provider at another API root, e.g. a local mock.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn records_url(&self) -> String {
        format!("{}/zones/{}/dns_records", self.base_url, self.zone_id)
    }

    async fn find_record(
        &self,
        hostname: &str,
        record_type: RecordType,
    ) -> Result<Option<String>, DnsError> {
        let response = self
            .client
            .get(self.records_url())
            .bearer_auth(&self.api_token)
            .query(&[("name", hostname), ("type", record_type.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DnsError::Provider(format!("Record lookup failed: {}", text)));
        }

        let records: CloudflareResponse<Vec<CloudflareRecord>> = response.json().await?;
        Ok(records
            .into_result()?
            .unwrap_or_default()
            .into_iter()
            .find_map(|record| record.id))
    }
}

#[async_trait]
impl DnsProvider for CloudflareDnsProvider {
    async fn upsert(
        &self,
        hostname: &str,
        record_type: RecordType,
        value: &str,
    ) -> Result<(), DnsError> {
        let record = CloudflareRecord {
            id: None,
            r#type: record_type.as_str().to_string(),
            name: hostname.to_string(),
            content: value.to_string(),
            ttl: self.ttl,
            proxied: Some(false),
        };

        let request = match self.find_record(hostname, record_type).await? {
            Some(record_id) => {
                debug!("Updating {} record {} for {}", record_type, record_id, hostname);
                self.client
                    .put(format!("{}/{}", self.records_url(), record_id))
            }
            None => {
                debug!("Creating {} record for {}", record_type, hostname);
                self.client.post(self.records_url())
            }
        };

        let response = request
            .bearer_auth(&self.api_token)
            .json(&record)
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DnsError::Provider(format!("Record upsert failed: {}", text)));
        }

        let result: CloudflareResponse<CloudflareRecord> = response.json().await?;
        result.into_result()?;

        info!("DNS upserted: {} {} => {}", hostname, record_type, value);
        Ok(())
    }
}

/// Points relay hostnames at this service
///
/// The service's own address is resolved once per name and cached for the
/// life of the process.
pub struct DynamicDns {
    provider: Arc<dyn DnsProvider>,
    service_hostname: String,
    public_address: Option<IpAddr>,
    resolved: DashMap<String, IpAddr>,
}

impl DynamicDns {
    /// Resolve `service_hostname` to find the address to publish.
    pub fn new(provider: Arc<dyn DnsProvider>, service_hostname: impl Into<String>) -> Self {
        Self {
            provider,
            service_hostname: service_hostname.into(),
            public_address: None,
            resolved: DashMap::new(),
        }
    }

    /// Publish `address` instead of resolving the service hostname.
    pub fn with_public_address(mut self, address: Option<IpAddr>) -> Self {
        self.public_address = address;
        self
    }

    /// Address of `hostname`, from the cache when possible
    pub async fn resolve(&self, hostname: &str) -> Result<IpAddr, DnsError> {
        if let Some(address) = self.resolved.get(hostname) {
            return Ok(*address);
        }

        let resolve_error = |reason: String| DnsError::Resolve {
            hostname: hostname.to_string(),
            reason,
        };

        let address = tokio::net::lookup_host((hostname, 0))
            .await
            .map_err(|e| resolve_error(e.to_string()))?
            .map(|addr| addr.ip())
            .next()
            .ok_or_else(|| resolve_error("no addresses".to_string()))?;

        debug!("Resolved {} to {}", hostname, address);
        self.resolved.insert(hostname.to_string(), address);
        Ok(address)
    }

    /// Address relay hostnames are published under
    pub async fn service_address(&self) -> Result<IpAddr, DnsError> {
        match self.public_address {
            Some(address) => Ok(address),
            None => self.resolve(&self.service_hostname).await,
        }
    }

    /// Point `hostname` at this service.
    pub async fn upsert(&self, hostname: &str) -> Result<(), DnsError> {
        let address = self.service_address().await?;
        self.provider
            .upsert(hostname, RecordType::for_address(address), &address.to_string())
            .await
    }

    /// [`upsert`](Self::upsert) on a background task, logging failures
    pub fn spawn_upsert(self: &Arc<Self>, hostname: String) {
        let dns = Arc::clone(self);
        tokio::spawn(async move {
            match dns.upsert(&hostname).await {
                Ok(()) => debug!("Dynamic DNS upsert for {} succeeded", hostname),
                Err(e) => error!("Dynamic DNS upsert for {} failed: {}", hostname, e),
            }
        });
    }
}

impl fmt::Debug for DynamicDns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicDns")
            .field("service_hostname", &self.service_hostname)
            .field("public_address", &self.public_address)
            .field("resolved", &self.resolved.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProvider {
        upserts: Mutex<Vec<(String, RecordType, String)>>,
    }

    #[async_trait]
    impl DnsProvider for RecordingProvider {
        async fn upsert(
            &self,
            hostname: &str,
            record_type: RecordType,
            value: &str,
        ) -> Result<(), DnsError> {
            self.upserts.lock().unwrap().push((
                hostname.to_string(),
                record_type,
                value.to_string(),
            ));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_upsert_uses_public_address() {
        let provider = Arc::new(RecordingProvider::default());
        let dns = DynamicDns::new(provider.clone(), "api.example.com")
            .with_public_address(Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7))));

        dns.upsert("app.alice.example.com").await.unwrap();

        let upserts = provider.upserts.lock().unwrap();
        assert_eq!(
            upserts.as_slice(),
            &[(
                "app.alice.example.com".to_string(),
                RecordType::A,
                "203.0.113.7".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_resolve_is_cached() {
        let dns = DynamicDns::new(Arc::new(NoopDnsProvider), "localhost");

        let first = dns.resolve("localhost").await.unwrap();
        assert!(first.is_loopback());
        assert_eq!(dns.resolved.len(), 1);
        assert_eq!(dns.resolve("localhost").await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_resolve_failure() {
        let dns = DynamicDns::new(Arc::new(NoopDnsProvider), "does-not-exist.invalid");

        let result = dns.upsert("app.alice.example.com").await;
        assert!(matches!(result, Err(DnsError::Resolve { .. })));
    }

    #[test]
    fn test_record_type() {
        assert_eq!(
            RecordType::for_address("::1".parse().unwrap()),
            RecordType::Aaaa
        );
        assert_eq!(RecordType::A.to_string(), "A");
    }

    #[test]
    fn test_cloudflare_error_envelope() {
        let body = r#"{"success":false,"errors":[{"code":9109,"message":"Invalid access token"}],"result":null}"#;
        let response: CloudflareResponse<CloudflareRecord> = serde_json::from_str(body).unwrap();

        match response.into_result() {
            Err(DnsError::Provider(message)) => assert!(message.contains("9109")),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_cloudflare_record_serialization() {
        let record = CloudflareRecord {
            id: None,
            r#type: "A".into(),
            name: "app.alice.example.com".into(),
            content: "203.0.113.7".into(),
            ttl: 1,
            proxied: Some(false),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "A");
        assert!(json.get("id").is_none());
    }
}
