//! Per-hostname certificate cache and issuance coordination

use crate::acme::CertificateAuthority;
use crate::bundle::CertificateBundle;
use crate::challenge::{ChallengeHooks, ChallengeStore};
use crate::{normalize_hostname, CertResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use rustls::ServerConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Re-issue once a certificate is this close to expiry
pub const DEFAULT_RENEWAL_WINDOW: chrono::Duration = chrono::Duration::days(7);

type Issuance = Shared<BoxFuture<'static, CertResult<Arc<CertificateBundle>>>>;

/// Certificate cache in front of a [`CertificateAuthority`]
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct CertificateManager {
    inner: Arc<Inner>,
}

struct Inner {
    authority: Arc<dyn CertificateAuthority>,
    challenges: Arc<ChallengeStore>,
    cache: DashMap<String, Arc<CertificateBundle>>,
    in_flight: DashMap<String, Issuance>,
    email: String,
    renewal_window: chrono::Duration,
}

impl CertificateManager {
    pub fn new(authority: Arc<dyn CertificateAuthority>, email: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                authority,
                challenges: Arc::new(ChallengeStore::new()),
                cache: DashMap::new(),
                in_flight: DashMap::new(),
                email: email.into(),
                renewal_window: DEFAULT_RENEWAL_WINDOW,
            }),
        }
    }

    /// Must be called before the manager is cloned or shared.
    pub fn with_renewal_window(mut self, window: chrono::Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.renewal_window = window;
        }
        self
    }

    pub fn renewal_window(&self) -> chrono::Duration {
        self.inner.renewal_window
    }

    /// A usable bundle for `hostname`, issuing one if necessary.
    ///
    /// Concurrent callers for the same hostname share a single lookup or
    /// issuance.
    pub async fn ensure_certificate(&self, hostname: &str) -> CertResult<Arc<CertificateBundle>> {
        let host = normalize_hostname(hostname)?;

        if let Some(bundle) = self.cached(&host) {
            if !bundle.needs_renewal(self.inner.renewal_window) {
                return Ok(bundle);
            }
        }

        let issuance = match self.inner.in_flight.entry(host.clone()) {
            Entry::Occupied(entry) => {
                debug!("Joining in-flight certificate request for {}", host);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let inner = Arc::clone(&self.inner);
                let key = host.clone();
                let issuance = async move {
                    let result = inner.obtain(&key).await;
                    inner.in_flight.remove(&key);
                    result
                }
                .boxed()
                .shared();
                entry.insert(issuance.clone());
                issuance
            }
        };

        issuance.await
    }

    /// TLS configuration for a handshake naming `hostname`
    pub async fn server_config(&self, hostname: &str) -> CertResult<Arc<ServerConfig>> {
        Ok(self.ensure_certificate(hostname).await?.server_config())
    }

    /// Cached bundle, whatever its age
    pub fn cached(&self, hostname: &str) -> Option<Arc<CertificateBundle>> {
        self.inner
            .cache
            .get(hostname)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Key authorization to serve for an HTTP-01 request, if one is pending
    pub fn challenge_value(&self, hostname: &str, token: &str) -> Option<String> {
        self.inner.challenges.get(hostname, token)
    }

    pub fn challenges(&self) -> Arc<ChallengeStore> {
        Arc::clone(&self.inner.challenges)
    }

    /// Refresh every cached bundle whose renewal window has opened.
    ///
    /// Returns how many were renewed.
    pub async fn renew_due(&self) -> usize {
        let due: Vec<String> = self
            .inner
            .cache
            .iter()
            .filter(|entry| entry.value().needs_renewal(self.inner.renewal_window))
            .map(|entry| entry.key().clone())
            .collect();

        let mut renewed = 0;
        for host in due {
            info!("Renewing certificate for {}", host);
            match self.ensure_certificate(&host).await {
                Ok(_) => renewed += 1,
                Err(e) => error!("Certificate renewal for {} failed: {}", host, e),
            }
        }
        renewed
    }

    /// Run [`renew_due`](Self::renew_due) every `interval`.
    pub fn spawn_renewal_task(&self, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let renewed = manager.renew_due().await;
                if renewed > 0 {
                    info!("Renewed {} certificate(s)", renewed);
                }
            }
        })
    }
}

impl Inner {
    /// Storage first, then issuance.
    async fn obtain(&self, host: &str) -> CertResult<Arc<CertificateBundle>> {
        let stored = match self.authority.fetch(host).await {
            Ok(Some(bundle)) if !bundle.needs_renewal(self.renewal_window) => {
                debug!("Loaded stored certificate for {}", host);
                return Ok(self.store(host, bundle));
            }
            Ok(Some(bundle)) => {
                info!(
                    "Stored certificate for {} expires {}, re-issuing",
                    host, bundle.expires_at
                );
                Some(bundle)
            }
            Ok(None) => {
                debug!("No stored certificate for {}", host);
                None
            }
            Err(e) => {
                warn!("Could not read stored certificate for {}: {}", host, e);
                None
            }
        };

        let hooks: Arc<dyn ChallengeHooks> = self.challenges.clone();
        match self.authority.register(host, &self.email, hooks).await {
            Ok(bundle) => Ok(self.store(host, bundle)),
            Err(e) => {
                error!("Certificate issuance for {} failed: {}", host, e);
                match self.still_valid(host, stored) {
                    Some(bundle) => Ok(bundle),
                    None => Err(e),
                }
            }
        }
    }

    fn store(&self, host: &str, bundle: CertificateBundle) -> Arc<CertificateBundle> {
        let bundle = Arc::new(bundle);
        self.cache.insert(host.to_string(), Arc::clone(&bundle));
        bundle
    }

    /// The freshest known bundle that is due for renewal but not yet expired
    fn still_valid(
        &self,
        host: &str,
        stored: Option<CertificateBundle>,
    ) -> Option<Arc<CertificateBundle>> {
        let cached = self.cache.get(host).map(|e| Arc::clone(e.value()));
        let stored = stored.map(Arc::new);

        let best = match (cached, stored) {
            (Some(c), Some(s)) if s.expires_at > c.expires_at => s,
            (Some(c), _) => c,
            (None, Some(s)) => s,
            (None, None) => return None,
        };
        if best.is_expired() {
            return None;
        }

        warn!(
            "Serving {} with its current certificate until renewal succeeds",
            host
        );
        self.cache.insert(host.to_string(), Arc::clone(&best));
        Some(best)
    }
}

impl std::fmt::Debug for CertificateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateManager")
            .field("cached", &self.inner.cache.len())
            .field("in_flight", &self.inner.in_flight.len())
            .field("renewal_window", &self.inner.renewal_window)
            .finish()
    }
}
