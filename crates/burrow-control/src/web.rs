//! Website hostname and root domain

use crate::hostnames::{strip_port, Hostnames};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::Router;
use burrow_router::normalize_hostname;
use std::sync::Arc;

const INDEX_PAGE: &str = "<!doctype html>\n<html><head><title>burrow</title></head>\
<body><h1>burrow</h1><p>Secure tunnels to services behind NAT.</p></body></html>\n";

pub fn router(hostnames: Hostnames) -> Router {
    Router::new()
        .fallback(handle)
        .with_state(Arc::new(hostnames))
}

/// Redirect the root domain to the web hostname; serve the landing page otherwise.
async fn handle(State(hostnames): State<Arc<Hostnames>>, headers: HeaderMap, uri: Uri) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|value| normalize_hostname(strip_port(value)));

    if host.as_deref() == Some(hostnames.domain()) {
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let location = format!("https://{}{}", hostnames.web(), path);
        return (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response();
    }

    Html(INDEX_PAGE).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        router(Hostnames::new(&ServiceConfig::new("example.com")))
    }

    #[tokio::test]
    async fn test_root_domain_redirects() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/about?lang=en")
                    .header("host", "example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://www.example.com/about?lang=en"
        );
    }

    #[tokio::test]
    async fn test_web_hostname_serves_page() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("host", "www.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
