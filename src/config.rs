//! Process configuration: YAML file merged with command-line flags

use anyhow::{bail, Context, Result};
use burrow_auth::UserRecord;
use burrow_cert::{AcmeConfig, AcmeDirectory};
use burrow_control::ServiceConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything `burrow serve` needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,

    #[serde(default)]
    pub certificates: CertificateSettings,

    #[serde(default)]
    pub dns: DnsSettings,

    /// Users allowed to register relays
    #[serde(default)]
    pub users: Vec<UserRecord>,
}

/// Where certificates come from and where they are kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSettings {
    #[serde(default = "default_cert_dir")]
    pub dir: PathBuf,

    #[serde(default)]
    pub authority: AuthorityKind,

    /// Contact address for the ACME account
    #[serde(default)]
    pub email: String,

    /// `production`, `staging`, or a directory URL
    #[serde(default = "default_directory")]
    pub directory: String,

    /// Seconds between background renewal sweeps
    #[serde(default = "default_renewal_check_secs")]
    pub renewal_check_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthorityKind {
    #[default]
    Acme,
    SelfSigned,
}

/// DNS provider that relay hostnames are published through
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum DnsSettings {
    /// Log upserts without publishing anything
    #[default]
    None,
    Cloudflare {
        api_token: String,
        zone_id: String,
        #[serde(default)]
        ttl: Option<u32>,
    },
}

fn default_cert_dir() -> PathBuf {
    PathBuf::from("./.certs")
}

fn default_directory() -> String {
    "production".to_string()
}

fn default_renewal_check_secs() -> u64 {
    12 * 60 * 60
}

impl Default for CertificateSettings {
    fn default() -> Self {
        Self {
            dir: default_cert_dir(),
            authority: AuthorityKind::default(),
            email: String::new(),
            directory: default_directory(),
            renewal_check_secs: default_renewal_check_secs(),
        }
    }
}

impl CertificateSettings {
    pub fn acme_directory(&self) -> AcmeDirectory {
        match self.directory.as_str() {
            "production" => AcmeDirectory::Production,
            "staging" => AcmeDirectory::Staging,
            url => AcmeDirectory::Custom(url.to_string()),
        }
    }

    pub fn acme_config(&self) -> AcmeConfig {
        AcmeConfig {
            directory: self.acme_directory(),
            account_dir: self.dir.join("acme"),
            ..AcmeConfig::default()
        }
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_check_secs.max(60))
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub domain: Option<String>,
    pub bind_address: Option<std::net::IpAddr>,
    pub http_port: Option<u16>,
    pub https_port: Option<u16>,
    pub public_address: Option<std::net::IpAddr>,
    pub cert_dir: Option<PathBuf>,
    pub acme_email: Option<String>,
    pub acme_directory: Option<String>,
    pub self_signed: bool,
}

impl Config {
    /// Read and parse a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Build the effective configuration from an optional file and flags.
    pub fn resolve(path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => match overrides.domain.as_deref() {
                Some(domain) => Self {
                    service: ServiceConfig::new(domain),
                    certificates: CertificateSettings::default(),
                    dns: DnsSettings::default(),
                    users: Vec::new(),
                },
                None => bail!("Either --config or --domain is required"),
            },
        };

        config.apply(overrides);
        config
            .service
            .validate()
            .context("Invalid service configuration")?;
        Ok(config)
    }

    fn apply(&mut self, overrides: Overrides) {
        if let Some(domain) = overrides.domain {
            self.service.domain = domain;
        }
        if let Some(address) = overrides.bind_address {
            self.service.bind_address = address;
        }
        if let Some(port) = overrides.http_port {
            self.service.ports.http = port;
        }
        if let Some(port) = overrides.https_port {
            self.service.ports.https = port;
        }
        if overrides.public_address.is_some() {
            self.service.public_address = overrides.public_address;
        }
        if let Some(dir) = overrides.cert_dir {
            self.certificates.dir = dir;
        }
        if let Some(email) = overrides.acme_email {
            self.certificates.email = email;
        }
        if let Some(directory) = overrides.acme_directory {
            self.certificates.directory = directory;
        }
        if overrides.self_signed {
            self.certificates.authority = AuthorityKind::SelfSigned;
        }
    }
}
