//! Ingress service configuration

use crate::hostnames::is_valid_hostname;
use crate::IngressError;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

/// Hostnames, ports and header names of the ingress service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Root domain; relay hostnames are `<subdomain>.<username>.<domain>`
    pub domain: String,

    /// Hostname serving the API and relay upgrades
    #[serde(default)]
    pub api_hostname: Option<String>,

    /// Hostname serving the website; the root domain redirects here
    #[serde(default)]
    pub web_hostname: Option<String>,

    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    #[serde(default)]
    pub ports: PortConfig,

    /// Prefix of the relay handshake headers (`<prefix>-subdomain`, ...)
    #[serde(default = "default_header_prefix")]
    pub header_prefix: String,

    /// Address published in DNS for relay hostnames.
    /// Resolved from the API hostname when unset.
    #[serde(default)]
    pub public_address: Option<IpAddr>,
}

/// Listening ports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    #[serde(default = "default_http_port")]
    pub http: u16,

    #[serde(default = "default_https_port")]
    pub https: u16,

    /// Extra TLS ports, each routed like the HTTPS port
    #[serde(default)]
    pub range: Option<PortRange>,
}

/// Inclusive range of ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_header_prefix() -> String {
    "x-burrow".to_string()
}

fn default_http_port() -> u16 {
    80
}

fn default_https_port() -> u16 {
    443
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            http: default_http_port(),
            https: default_https_port(),
            range: None,
        }
    }
}

impl ServiceConfig {
    /// Configuration for `domain` with `api.` and `www.` self-hostnames
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            api_hostname: None,
            web_hostname: None,
            bind_address: default_bind_address(),
            ports: PortConfig::default(),
            header_prefix: default_header_prefix(),
            public_address: None,
        }
    }

    pub fn api_hostname(&self) -> String {
        self.api_hostname
            .clone()
            .unwrap_or_else(|| format!("api.{}", self.domain))
    }

    pub fn web_hostname(&self) -> String {
        self.web_hostname
            .clone()
            .unwrap_or_else(|| format!("www.{}", self.domain))
    }

    /// The HTTPS port followed by every port of the range
    pub fn tls_ports(&self) -> Vec<u16> {
        let mut ports = vec![self.ports.https];
        if let Some(range) = &self.ports.range {
            ports.extend(range.ports().filter(|port| *port != self.ports.https));
        }
        ports
    }

    /// Full name of a relay handshake header, e.g. `header("username")`
    pub fn header(&self, name: &str) -> String {
        format!("{}-{}", self.header_prefix.to_ascii_lowercase(), name)
    }

    pub fn validate(&self) -> Result<(), IngressError> {
        for (what, hostname) in [
            ("domain", self.domain.clone()),
            ("api hostname", self.api_hostname()),
            ("web hostname", self.web_hostname()),
        ] {
            if !is_valid_hostname(&hostname) {
                return Err(IngressError::Config(format!(
                    "{} '{}' is not a valid hostname",
                    what, hostname
                )));
            }
        }

        if self.api_hostname().eq_ignore_ascii_case(&self.web_hostname()) {
            return Err(IngressError::Config(
                "API and web hostnames must differ".to_string(),
            ));
        }

        if let Some(range) = &self.ports.range {
            if range.start > range.end {
                return Err(IngressError::Config(format!(
                    "Port range {}-{} is empty",
                    range.start, range.end
                )));
            }
            if range.start == 0 {
                return Err(IngressError::Config(
                    "Port range must not include port 0".to_string(),
                ));
            }
        }

        if self.ports.http == self.ports.https
            || self.tls_ports()[1..].contains(&self.ports.http)
        {
            return Err(IngressError::Config(format!(
                "HTTP port {} collides with a TLS port",
                self.ports.http
            )));
        }

        if self.header_prefix.trim().is_empty() {
            return Err(IngressError::Config(
                "Header prefix must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_hostnames() {
        let config = ServiceConfig::new("example.com");
        assert_eq!(config.api_hostname(), "api.example.com");
        assert_eq!(config.web_hostname(), "www.example.com");
        assert_eq!(config.header("apikey"), "x-burrow-apikey");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tls_ports_include_range() {
        let mut config = ServiceConfig::new("example.com");
        config.ports.https = 8443;
        config.ports.range = Some(PortRange {
            start: 9100,
            end: 9102,
        });

        assert_eq!(config.tls_ports(), vec![8443, 9100, 9101, 9102]);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = ServiceConfig::new("example.com");
        config.ports.range = Some(PortRange {
            start: 9200,
            end: 9100,
        });
        assert!(matches!(config.validate(), Err(IngressError::Config(_))));

        let mut config = ServiceConfig::new("example.com");
        config.web_hostname = Some("API.example.com".into());
        assert!(matches!(config.validate(), Err(IngressError::Config(_))));

        let mut config = ServiceConfig::new("example.com");
        config.ports.http = 443;
        assert!(matches!(config.validate(), Err(IngressError::Config(_))));

        let config = ServiceConfig::new("not a domain");
        assert!(matches!(config.validate(), Err(IngressError::Config(_))));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let yaml = r#"
domain: tunnel.example
ports:
  https: 8443
  range:
    start: 9100
    end: 9199
"#;
        let config: ServiceConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.api_hostname(), "api.tunnel.example");
        assert_eq!(config.ports.http, 80);
        assert_eq!(config.ports.https, 8443);
        assert_eq!(config.header_prefix, "x-burrow");
        assert_eq!(config.tls_ports().len(), 101);
    }
}
