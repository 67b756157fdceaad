//! API hostname: relay upgrades and credential checks

use crate::service::IngressService;
use crate::IngressError;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use burrow_auth::AuthError;
use burrow_proto::ChannelMessage;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, error};

pub fn router(service: IngressService) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .fallback(relay_upgrade)
        .with_state(service)
}

#[derive(Debug, Serialize)]
struct PingReply {
    success: bool,
    errors: Vec<String>,
}

fn status_for(error: &IngressError) -> StatusCode {
    match error {
        IngressError::MissingHeader(_) | IngressError::InvalidHostname(_) => StatusCode::BAD_REQUEST,
        IngressError::Auth(AuthError::InvalidCredentials) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Check relay credentials without opening a channel.
async fn ping(State(service): State<IngressService>, headers: HeaderMap) -> Response {
    match service.authenticate_relay(&headers).await {
        Ok(_) => Json(PingReply {
            success: true,
            errors: Vec::new(),
        })
        .into_response(),
        Err(e) => {
            let status = status_for(&e);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                error!("Ping failed: {}", e);
            }
            let message = match status {
                StatusCode::UNAUTHORIZED => {
                    "either the api key is invalid or the username is incorrect".to_string()
                }
                StatusCode::INTERNAL_SERVER_ERROR => "exception encountered".to_string(),
                _ => e.to_string(),
            };
            (
                status,
                Json(PingReply {
                    success: false,
                    errors: vec![message],
                }),
            )
                .into_response()
        }
    }
}

/// Authenticate a relay and hand its WebSocket to the relay multiplexer.
async fn relay_upgrade(
    State(service): State<IngressService>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(_) => return (StatusCode::NOT_FOUND, "Not Found").into_response(),
    };

    let hostname = match service.authenticate_relay(&headers).await {
        Ok(hostname) => hostname,
        Err(e) => {
            let status = status_for(&e);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                error!("Relay authentication error: {}", e);
            }
            return (status, e.to_string()).into_response();
        }
    };

    let response = ws.on_upgrade(move |socket| async move {
        debug!("Relay channel open for {}", hostname);
        let (sink, stream) = relay_channel(socket);
        service.register_relay(hostname, sink, stream);
    });

    ([(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")], response).into_response()
}

/// Adapt a WebSocket to the message types the relay speaks.
///
/// Pings and pongs are answered by the WebSocket itself and never reach the
/// relay.
pub fn relay_channel(
    socket: WebSocket,
) -> (
    impl Sink<ChannelMessage, Error = axum::Error> + Unpin + Send + 'static,
    impl Stream<Item = Result<ChannelMessage, axum::Error>> + Unpin + Send + 'static,
) {
    let (sink, stream) = socket.split();

    let sink = sink.with(|message: ChannelMessage| {
        future::ready(Ok::<_, axum::Error>(into_ws(message)))
    });
    let stream = stream.filter_map(|message| {
        future::ready(match message {
            Ok(message) => from_ws(message).map(Ok),
            Err(e) => Some(Err(e)),
        })
    });

    (sink, stream)
}

fn into_ws(message: ChannelMessage) -> Message {
    match message {
        ChannelMessage::Text(text) => Message::Text(text.into()),
        ChannelMessage::Binary(data) => Message::Binary(data),
        ChannelMessage::Close(code) => Message::Close(code.map(|code| CloseFrame {
            code,
            reason: Utf8Bytes::from_static(""),
        })),
    }
}

fn from_ws(message: Message) -> Option<ChannelMessage> {
    match message {
        Message::Text(text) => Some(ChannelMessage::Text(text.as_str().to_owned())),
        Message::Binary(data) => Some(ChannelMessage::Binary(data)),
        Message::Close(frame) => Some(ChannelMessage::Close(frame.map(|frame| frame.code))),
        Message::Ping(_) | Message::Pong(_) => None,
    }
}
