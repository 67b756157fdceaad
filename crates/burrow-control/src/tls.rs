//! TLS endpoints: SNI routing and termination for the service's own hostnames

use crate::hostnames::HostClass;
use crate::service::IngressService;
use crate::{api, web, IngressError};
use axum::Router;
use burrow_router::{normalize_hostname, read_client_hello, PrefixedIo, RawStream, SniError};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

impl IngressService {
    /// Route one accepted TLS connection by its SNI hostname.
    ///
    /// Connections without SNI, or for a hostname no relay serves, are closed
    /// without a response.
    pub async fn handle_tls_connection<S: RawStream>(&self, mut socket: S, port: u16) {
        let (hello, sni) = read_client_hello(&mut socket).await;

        let hostname = match sni {
            Ok(Some(hostname)) => normalize_hostname(&hostname),
            Ok(None) => {
                info!("TLS connection on port {} without SNI, closing", port);
                return;
            }
            Err(SniError::Closed) => {
                debug!("Connection closed before ClientHello");
                return;
            }
            Err(e) => {
                debug!("Unreadable ClientHello on port {}: {}", port, e);
                return;
            }
        };

        debug!("TLS connection for {} on port {}", hostname, port);
        let socket = PrefixedIo::new(hello, socket);

        let router = match self.hostnames().classify(&hostname) {
            HostClass::Api => api::router(self.clone()),
            HostClass::Web | HostClass::Apex => web::router(self.hostnames().clone()),
            HostClass::Customer => {
                match self.relay(&hostname) {
                    Some(relay) => {
                        if let Err(e) = relay.attach(Box::new(socket), hostname.clone(), port).await
                        {
                            info!("Relay for {} unavailable: {}", hostname, e);
                        }
                    }
                    None => info!("No relay for {}, closing", hostname),
                }
                return;
            }
        };

        if let Err(e) = self.serve_https(socket, &hostname, router).await {
            match e {
                IngressError::Certificate(_) => error!("HTTPS for {} failed: {}", hostname, e),
                _ => debug!("HTTPS for {} ended: {}", hostname, e),
            }
        }
    }

    /// Terminate TLS with the hostname's certificate and serve `router`.
    async fn serve_https<S: RawStream>(
        &self,
        socket: PrefixedIo<S>,
        hostname: &str,
        router: Router,
    ) -> Result<(), IngressError> {
        let server_config = self.certificates().server_config(hostname).await?;

        let tls = TlsAcceptor::from(server_config)
            .accept(socket)
            .await
            .map_err(|e| IngressError::Tls(e.to_string()))?;

        http1::Builder::new()
            .serve_connection(TokioIo::new(tls), TowerToHyperService::new(router))
            .with_upgrades()
            .await
            .map_err(|e| IngressError::Http(e.to_string()))
    }
}
