//! ACME issuance via Let's Encrypt HTTP-01 challenges

use crate::bundle::CertificateBundle;
use crate::challenge::ChallengeHooks;
use crate::storage::CertificateStorage;
use crate::{CertError, CertResult};
use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, LetsEncrypt,
    NewAccount, NewOrder, Order, OrderStatus,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Source of certificates for a hostname
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Previously issued bundle, if one is persisted
    async fn fetch(&self, hostname: &str) -> CertResult<Option<CertificateBundle>>;

    /// Issue a new bundle, publishing challenges through `hooks`
    async fn register(
        &self,
        hostname: &str,
        email: &str,
        hooks: Arc<dyn ChallengeHooks>,
    ) -> CertResult<CertificateBundle>;
}

/// ACME directory to order from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcmeDirectory {
    Production,
    Staging,
    Custom(String),
}

impl AcmeDirectory {
    pub fn url(&self) -> String {
        match self {
            AcmeDirectory::Production => LetsEncrypt::Production.url().to_string(),
            AcmeDirectory::Staging => LetsEncrypt::Staging.url().to_string(),
            AcmeDirectory::Custom(url) => url.clone(),
        }
    }

    fn account_file(&self) -> &'static str {
        match self {
            AcmeDirectory::Production => "account.json",
            AcmeDirectory::Staging => "account-staging.json",
            AcmeDirectory::Custom(_) => "account-custom.json",
        }
    }
}

/// ACME configuration
#[derive(Clone)]
pub struct AcmeConfig {
    pub directory: AcmeDirectory,
    /// Where account credentials are kept
    pub account_dir: PathBuf,
    /// Order status checks before giving up on validation
    pub poll_attempts: u32,
    pub poll_interval: Duration,
}

impl std::fmt::Debug for AcmeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeConfig")
            .field("directory", &self.directory)
            .field("account_dir", &self.account_dir)
            .field("poll_attempts", &self.poll_attempts)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            directory: AcmeDirectory::Production,
            account_dir: PathBuf::from("./.certs/acme"),
            poll_attempts: 30,
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl AcmeConfig {
    pub fn account_path(&self) -> PathBuf {
        self.account_dir.join(self.directory.account_file())
    }
}

/// Certificate authority backed by an ACME server
pub struct AcmeAuthority {
    config: AcmeConfig,
    storage: Arc<dyn CertificateStorage>,
    account: RwLock<Option<Arc<Account>>>,
}

impl AcmeAuthority {
    pub fn new(config: AcmeConfig, storage: Arc<dyn CertificateStorage>) -> Self {
        Self {
            config,
            storage,
            account: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &AcmeConfig {
        &self.config
    }

    /// Get or create the ACME account
    async fn account(&self, email: &str) -> CertResult<Arc<Account>> {
        if let Some(account) = self.account.read().await.as_ref() {
            return Ok(account.clone());
        }

        let mut slot = self.account.write().await;
        if let Some(account) = slot.as_ref() {
            return Ok(account.clone());
        }

        let creds_path = self.config.account_path();
        let account = if tokio::fs::try_exists(&creds_path).await.unwrap_or(false) {
            debug!("Loading ACME account from {}", creds_path.display());
            let creds_json = tokio::fs::read_to_string(&creds_path).await?;
            let creds: AccountCredentials = serde_json::from_str(&creds_json)
                .map_err(|e| CertError::Storage(format!("Invalid account credentials: {}", e)))?;
            Account::builder()?.from_credentials(creds).await?
        } else {
            info!("Creating new ACME account at {}", self.config.directory.url());
            let contact = format!("mailto:{email}");
            let contacts: Vec<&str> = if email.is_empty() {
                Vec::new()
            } else {
                vec![contact.as_str()]
            };

            let (account, creds) = Account::builder()?
                .create(
                    &NewAccount {
                        contact: &contacts,
                        terms_of_service_agreed: true,
                        only_return_existing: false,
                    },
                    self.config.directory.url(),
                    None,
                )
                .await?;

            let creds_json = serde_json::to_string_pretty(&creds)
                .map_err(|e| CertError::Storage(e.to_string()))?;
            tokio::fs::create_dir_all(&self.config.account_dir).await?;
            tokio::fs::write(&creds_path, creds_json).await?;

            account
        };

        let account = Arc::new(account);
        *slot = Some(account.clone());
        Ok(account)
    }

    /// Publish every pending HTTP-01 challenge of the order and mark it ready
    async fn publish_challenges(
        &self,
        order: &mut Order,
        hostname: &str,
        hooks: &dyn ChallengeHooks,
    ) -> CertResult<()> {
        let mut authorizations = order.authorizations();

        while let Some(authz) = authorizations.next().await {
            let mut authz = authz?;
            match &authz.status {
                AuthorizationStatus::Pending => {}
                AuthorizationStatus::Valid => continue,
                other => {
                    return Err(CertError::ChallengeFailed(format!(
                        "Authorization for {} is {:?}",
                        hostname, other
                    )))
                }
            }

            let mut challenge = authz.challenge(ChallengeType::Http01).ok_or_else(|| {
                CertError::ChallengeFailed(format!("No HTTP-01 challenge offered for {}", hostname))
            })?;

            let key_authorization = challenge.key_authorization();
            hooks.set(hostname, &challenge.token, key_authorization.as_str());

            challenge.set_ready().await?;
        }

        Ok(())
    }

    async fn wait_until_ready(&self, order: &mut Order, hostname: &str) -> CertResult<()> {
        for _ in 0..self.config.poll_attempts {
            tokio::time::sleep(self.config.poll_interval).await;

            let state = order.refresh().await?;
            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => {
                    error!("ACME order for {} is invalid: {:?}", hostname, state);
                    return Err(CertError::ChallengeFailed(format!(
                        "Order for {} failed validation",
                        hostname
                    )));
                }
                status => debug!("ACME order for {} is {:?}", hostname, status),
            }
        }

        Err(CertError::Timeout(format!("order validation for {}", hostname)))
    }

    async fn download_chain(&self, order: &mut Order, hostname: &str) -> CertResult<String> {
        for _ in 0..self.config.poll_attempts {
            if let Some(chain) = order.certificate().await? {
                return Ok(chain);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        Err(CertError::Timeout(format!("certificate for {}", hostname)))
    }
}

#[async_trait]
impl CertificateAuthority for AcmeAuthority {
    async fn fetch(&self, hostname: &str) -> CertResult<Option<CertificateBundle>> {
        self.storage.load(hostname).await
    }

    async fn register(
        &self,
        hostname: &str,
        email: &str,
        hooks: Arc<dyn ChallengeHooks>,
    ) -> CertResult<CertificateBundle> {
        info!("Requesting certificate for {}", hostname);

        let account = self.account(email).await?;
        let identifier = Identifier::Dns(hostname.to_string());
        let mut order = account.new_order(&NewOrder::new(&[identifier])).await?;
        debug!("ACME order created: {:?}", order.state().status);

        let validated = async {
            if order.state().status == OrderStatus::Pending {
                self.publish_challenges(&mut order, hostname, hooks.as_ref())
                    .await?;
            }
            self.wait_until_ready(&mut order, hostname).await
        }
        .await;
        hooks.clear(hostname);
        validated?;

        // instant-acme generates the key for us
        let private_key_pem = order.finalize().await?;
        let chain_pem = self.download_chain(&mut order, hostname).await?;

        let bundle = CertificateBundle::from_pem(hostname, private_key_pem, chain_pem)?;
        self.storage.save(&bundle).await?;

        info!(
            "Certificate issued for {} (expires {})",
            hostname, bundle.expires_at
        );
        Ok(bundle)
    }
}
