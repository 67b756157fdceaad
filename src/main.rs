//! burrow ingress service
//!
//! Terminates public TCP/TLS traffic for a domain and relays customer
//! hostnames to clients connected over authenticated WebSocket tunnels.

mod config;

use anyhow::{Context, Result};
use burrow_auth::{hash_secret, MemoryStore, RelayAuthenticator};
use burrow_cert::{
    AcmeAuthority, CertificateAuthority, CertificateManager, CertificateStorage,
    FileCertificateStorage, SelfSignedAuthority,
};
use burrow_control::{
    CloudflareDnsProvider, DnsProvider, DynamicDns, IngressService, NoopDnsProvider,
};
use clap::{Parser, Subcommand};
use config::{AuthorityKind, Config, DnsSettings, Overrides};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Reverse-tunnel ingress for a domain family
#[derive(Parser, Debug)]
#[command(name = "burrow")]
#[command(about = "Route public TLS and HTTP traffic to relays behind NAT", long_about = None)]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    server_args: ServerArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the Argon2 hash of a key for the `users` section of the config
    HashKey {
        /// Key to hash
        #[arg(env = "BURROW_KEY")]
        key: String,
    },
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// YAML configuration file
    #[arg(short, long, env = "BURROW_CONFIG")]
    config: Option<PathBuf>,

    /// Root domain (e.g. "example.com"); relays get <subdomain>.<user>.<domain>
    #[arg(long, env = "BURROW_DOMAIN")]
    domain: Option<String>,

    /// Address to bind every listener on
    #[arg(long)]
    bind_address: Option<IpAddr>,

    /// Plaintext HTTP port (redirects and ACME challenges)
    #[arg(long)]
    http_port: Option<u16>,

    /// HTTPS/SNI port
    #[arg(long)]
    https_port: Option<u16>,

    /// Address published in DNS for relay hostnames
    #[arg(long, env = "BURROW_PUBLIC_ADDRESS")]
    public_address: Option<IpAddr>,

    /// Certificate storage directory
    #[arg(long)]
    cert_dir: Option<PathBuf>,

    /// ACME account contact email
    #[arg(long, env = "BURROW_ACME_EMAIL")]
    acme_email: Option<String>,

    /// ACME directory: "production", "staging", or a URL
    #[arg(long)]
    acme_directory: Option<String>,

    /// Issue self-signed certificates instead of using ACME
    #[arg(long)]
    self_signed: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl ServerArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            domain: self.domain.clone(),
            bind_address: self.bind_address,
            http_port: self.http_port,
            https_port: self.https_port,
            public_address: self.public_address,
            cert_dir: self.cert_dir.clone(),
            acme_email: self.acme_email.clone(),
            acme_directory: self.acme_directory.clone(),
            self_signed: self.self_signed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Required before any rustls config is built
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();

    if let Some(command) = cli.command {
        return match command {
            Commands::HashKey { key } => {
                let hash = hash_secret(&key).context("Failed to hash key")?;
                println!("{}", hash);
                Ok(())
            }
        };
    }

    let args = cli.server_args;
    init_logging(&args.log_level)?;

    let config = Config::resolve(args.config.as_deref(), args.overrides())?;
    run(config).await
}

async fn run(config: Config) -> Result<()> {
    info!("Starting burrow for {}", config.service.domain);
    info!("API hostname: {}", config.service.api_hostname());
    info!("Web hostname: {}", config.service.web_hostname());
    info!(
        "Relay hostnames will be: {{subdomain}}.{{username}}.{}",
        config.service.domain
    );

    if config.users.is_empty() {
        warn!("No users configured; every relay registration will be refused");
    } else {
        info!("{} user(s) configured", config.users.len());
    }
    let store = Arc::new(MemoryStore::new(config.users.clone()));
    let authenticator = RelayAuthenticator::new(store.clone(), store);

    let storage: Arc<dyn CertificateStorage> =
        Arc::new(FileCertificateStorage::new(&config.certificates.dir));
    let authority: Arc<dyn CertificateAuthority> = match config.certificates.authority {
        AuthorityKind::Acme => {
            let acme = config.certificates.acme_config();
            info!("Certificates from ACME directory {}", acme.directory.url());
            Arc::new(AcmeAuthority::new(acme, storage))
        }
        AuthorityKind::SelfSigned => {
            warn!("Issuing self-signed certificates (not trusted by browsers)");
            Arc::new(SelfSignedAuthority::new(storage))
        }
    };
    let certificates = CertificateManager::new(authority, config.certificates.email.clone());
    let renewal = certificates.spawn_renewal_task(config.certificates.renewal_interval());

    let provider: Arc<dyn DnsProvider> = match &config.dns {
        DnsSettings::None => {
            info!("DNS updates are logged only");
            Arc::new(NoopDnsProvider)
        }
        DnsSettings::Cloudflare {
            api_token,
            zone_id,
            ttl,
        } => {
            info!("DNS updates via Cloudflare zone {}", zone_id);
            let mut provider = CloudflareDnsProvider::new(api_token.clone(), zone_id.clone())
                .context("Failed to create Cloudflare client")?;
            if let Some(ttl) = ttl {
                provider = provider.with_ttl(*ttl);
            }
            Arc::new(provider)
        }
    };
    let dns = Arc::new(
        DynamicDns::new(provider, config.service.api_hostname())
            .with_public_address(config.service.public_address),
    );

    let service = IngressService::new(config.service, certificates, authenticator, dns)
        .context("Failed to create ingress service")?;

    let result = tokio::select! {
        result = service.serve() => result.context("Ingress service stopped"),
        signal = signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Shutdown signal received, stopping listeners..."),
                Err(e) => error!("Error listening for shutdown signal: {}", e),
            }
            Ok(())
        }
    };

    renewal.abort();
    info!("burrow stopped");
    result
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
