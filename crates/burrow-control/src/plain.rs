//! Plaintext endpoint: HTTPS redirects and ACME HTTP-01 challenges

use crate::hostnames::{strip_port, HostClass};
use crate::service::IngressService;
use burrow_router::{
    normalize_hostname, read_request_head, HostSniff, PrefixedIo, RawStream, RejectReason,
    PARSE_ERROR_RESPONSE,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Path prefix of ACME HTTP-01 validation requests
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// `301` to `location`
pub fn redirect_response(location: &str) -> String {
    format!(
        "HTTP/1.1 301 Moved Permanently\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        location
    )
}

/// `200` with `body` as plain text
pub fn text_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

pub const NOT_FOUND_RESPONSE: &[u8] =
    b"HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\nConnection: close\r\n\r\nNot Found";

/// What to do with a classified plaintext request
#[derive(Debug, Clone, PartialEq, Eq)]
enum PlainRoute {
    Respond(Vec<u8>),
    Relay(String),
}

impl IngressService {
    /// Route one accepted plaintext connection by its `Host` header.
    pub async fn handle_plain_connection<S: RawStream>(&self, mut socket: S, port: u16) {
        let (head, verdict) = read_request_head(&mut socket).await;

        let (hostname, path) = match verdict {
            HostSniff::Found { hostname, path } => (hostname, path),
            HostSniff::Reject(RejectReason::Closed) => {
                debug!("Connection closed before request head");
                return;
            }
            HostSniff::Reject(reason) => {
                warn!("Rejecting plaintext request on port {}: {:?}", port, reason);
                respond(&mut socket, PARSE_ERROR_RESPONSE).await;
                return;
            }
            // read_request_head only returns a verdict
            HostSniff::NeedMore => return,
        };

        let hostname = normalize_hostname(strip_port(&hostname));
        info!("Plaintext request for {}{}", hostname, path);

        match self.route_plain(&hostname, &path) {
            PlainRoute::Respond(response) => respond(&mut socket, &response).await,
            PlainRoute::Relay(hostname) => match self.relay(&hostname) {
                Some(relay) => {
                    let socket = Box::new(PrefixedIo::new(head, socket));
                    if let Err(e) = relay.attach(socket, hostname.clone(), port).await {
                        info!("Relay for {} unavailable: {}", hostname, e);
                    }
                }
                None => info!("No relay for {}, closing", hostname),
            },
        }
    }

    fn route_plain(&self, hostname: &str, path: &str) -> PlainRoute {
        let hostnames = self.hostnames();

        match hostnames.classify(hostname) {
            // The apex is served over TLS too, so its challenges are answered here
            HostClass::Api | HostClass::Web | HostClass::Apex
                if path.starts_with(ACME_CHALLENGE_PREFIX) =>
            {
                let token = challenge_token(path);
                match self.certificates().challenge_value(hostname, token) {
                    Some(value) => PlainRoute::Respond(text_response(&value).into_bytes()),
                    None => {
                        info!("No pending challenge {} for {}", token, hostname);
                        PlainRoute::Respond(NOT_FOUND_RESPONSE.to_vec())
                    }
                }
            }
            HostClass::Apex => PlainRoute::Respond(
                redirect_response(&format!("https://{}{}", hostnames.web(), path)).into_bytes(),
            ),
            // Customers complete their own ACME exchanges
            HostClass::Customer if path.starts_with(ACME_CHALLENGE_PREFIX) => {
                PlainRoute::Relay(hostname.to_string())
            }
            _ => PlainRoute::Respond(
                redirect_response(&format!("https://{}{}", hostname, path)).into_bytes(),
            ),
        }
    }
}

fn challenge_token(path: &str) -> &str {
    let token = &path[ACME_CHALLENGE_PREFIX.len()..];
    token.split(['?', '#']).next().unwrap_or(token)
}

async fn respond<S: AsyncWrite + Unpin>(socket: &mut S, response: &[u8]) {
    let result = async {
        socket.write_all(response).await?;
        socket.shutdown().await
    }
    .await;

    if let Err(e) = result {
        debug!("Failed to write synthetic response: {}", e);
    }
}
