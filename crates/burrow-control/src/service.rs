//! The ingress service: shared state, relay registration and listeners

use crate::config::ServiceConfig;
use crate::dns::DynamicDns;
use crate::hostnames::Hostnames;
use crate::IngressError;
use burrow_auth::{RelayAuthenticator, RelaySecret};
use burrow_cert::CertificateManager;
use burrow_proto::{ChannelMessage, CLOSE_GOING_AWAY};
use burrow_relay::{Relay, RelayHandle};
use burrow_router::RouteRegistry;
use futures::{Sink, Stream};
use http::HeaderMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Kind of traffic a listening socket receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// TLS, routed by SNI
    Tls,
    /// Plain HTTP, routed by `Host`
    Plain,
}

/// A bound listening socket and what it serves
#[derive(Debug)]
pub struct BoundListener {
    pub endpoint: Endpoint,
    pub listener: TcpListener,
}

/// Ingress service
///
/// Cheap to clone; clones share the routing table and certificate cache.
#[derive(Clone)]
pub struct IngressService {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServiceConfig,
    hostnames: Hostnames,
    routes: RouteRegistry<RelayHandle>,
    certificates: CertificateManager,
    authenticator: RelayAuthenticator,
    dns: Arc<DynamicDns>,
}

impl IngressService {
    pub fn new(
        config: ServiceConfig,
        certificates: CertificateManager,
        authenticator: RelayAuthenticator,
        dns: Arc<DynamicDns>,
    ) -> Result<Self, IngressError> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(Inner {
                hostnames: Hostnames::new(&config),
                config,
                routes: RouteRegistry::new(),
                certificates,
                authenticator,
                dns,
            }),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn hostnames(&self) -> &Hostnames {
        &self.inner.hostnames
    }

    pub fn routes(&self) -> &RouteRegistry<RelayHandle> {
        &self.inner.routes
    }

    pub fn certificates(&self) -> &CertificateManager {
        &self.inner.certificates
    }

    /// Relay currently registered for `hostname`
    pub fn relay(&self, hostname: &str) -> Option<RelayHandle> {
        self.inner.routes.lookup(hostname)
    }

    /// Verify the handshake headers of a relay upgrade.
    ///
    /// Returns the hostname the relay will serve.
    pub async fn authenticate_relay(&self, headers: &HeaderMap) -> Result<String, IngressError> {
        let config = &self.inner.config;
        let header = |name: &str| -> Option<String> {
            headers
                .get(config.header(name))
                .and_then(|value| value.to_str().ok())
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let subdomain =
            header("subdomain").ok_or_else(|| IngressError::MissingHeader(config.header("subdomain")))?;
        let username =
            header("username").ok_or_else(|| IngressError::MissingHeader(config.header("username")))?;
        let secret = match (header("apikey"), header("authkey")) {
            (Some(key), _) => RelaySecret::ApiKey(key),
            (None, Some(key)) => RelaySecret::SessionKey(key),
            (None, None) => return Err(IngressError::MissingHeader(config.header("apikey"))),
        };

        let hostname = self.inner.hostnames.relay_hostname(&subdomain, &username)?;

        if let Err(e) = self.inner.authenticator.authenticate(&username, &secret).await {
            info!("Relay authentication for {} failed: {}", hostname, e);
            return Err(e.into());
        }

        info!("Relay authenticated for {}", hostname);
        Ok(hostname)
    }

    /// Start a relay over an authenticated channel and route `hostname` to it.
    ///
    /// A relay already registered for the hostname is closed with 1001. The
    /// route is dropped again when the new relay closes, unless a newer relay
    /// has taken over by then.
    pub fn register_relay<Si, St, E>(&self, hostname: String, sink: Si, stream: St) -> RelayHandle
    where
        Si: Sink<ChannelMessage> + Unpin + Send + 'static,
        Si::Error: fmt::Display + Send,
        St: Stream<Item = Result<ChannelMessage, E>> + Unpin + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let relay = Relay::spawn(hostname.clone(), sink, stream);

        if let Some(previous) = self.inner.routes.insert(&hostname, relay.clone()) {
            info!(
                "Relay {} replaces {} for {}",
                relay.id(),
                previous.id(),
                hostname
            );
            previous.close(CLOSE_GOING_AWAY);
        }

        let watched = relay.clone();
        let service = self.clone();
        tokio::spawn(async move {
            watched.closed().await;
            let removed = service
                .inner
                .routes
                .remove_if(watched.hostname(), |current| current.same_relay(&watched));
            if removed.is_some() {
                info!("Relay {} for {} closed", watched.id(), watched.hostname());
            }
        });

        self.inner.dns.spawn_upsert(hostname);
        relay
    }

    /// Bind every configured endpoint.
    ///
    /// Any bind failure is returned; nothing is served until all succeed.
    pub async fn bind(&self) -> Result<Vec<BoundListener>, IngressError> {
        let config = &self.inner.config;
        let mut endpoints: Vec<(Endpoint, u16)> = config
            .tls_ports()
            .into_iter()
            .map(|port| (Endpoint::Tls, port))
            .collect();
        endpoints.push((Endpoint::Plain, config.ports.http));

        let mut listeners = Vec::with_capacity(endpoints.len());
        for (endpoint, port) in endpoints {
            let addr = SocketAddr::new(config.bind_address, port);
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| IngressError::BindError {
                    address: addr.ip().to_string(),
                    port,
                    reason: e.to_string(),
                })?;
            debug!("Bound {:?} endpoint on {}", endpoint, addr);
            listeners.push(BoundListener { endpoint, listener });
        }

        Ok(listeners)
    }

    /// Accept connections on `listener` until the task is aborted.
    pub fn spawn_listener(
        &self,
        listener: TcpListener,
        endpoint: Endpoint,
    ) -> Result<JoinHandle<()>, IngressError> {
        let local_addr = listener.local_addr()?;
        let port = local_addr.port();
        let service = self.clone();

        info!("Listening for {:?} connections on {}", endpoint, local_addr);

        Ok(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, peer_addr)) => {
                        debug!("New connection from {} on port {}", peer_addr, port);
                        let service = service.clone();
                        tokio::spawn(async move {
                            match endpoint {
                                Endpoint::Tls => service.handle_tls_connection(socket, port).await,
                                Endpoint::Plain => {
                                    service.handle_plain_connection(socket, port).await
                                }
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error on port {}: {}", port, e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }))
    }

    /// Bind every endpoint and serve until the listener tasks end.
    pub async fn serve(&self) -> Result<(), IngressError> {
        let listeners = self.bind().await?;

        let mut tasks = Vec::with_capacity(listeners.len());
        for BoundListener { endpoint, listener } in listeners {
            tasks.push(self.spawn_listener(listener, endpoint)?);
        }

        info!(
            "Ingress ready: api={} web={} domain={}",
            self.inner.hostnames.api(),
            self.inner.hostnames.web(),
            self.inner.hostnames.domain()
        );

        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!("Listener task ended: {}", e);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for IngressService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngressService")
            .field("hostnames", &self.inner.hostnames)
            .field("relays", &self.inner.routes.count())
            .finish_non_exhaustive()
    }
}
