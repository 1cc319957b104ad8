//! Transport seam and the Socket.IO-over-WebSocket implementation.
//!
//! The connection manager only talks to the [`Transport`] trait, so tests
//! can script connections without a server. [`WebSocketTransport`] speaks
//! Engine.IO v4 / Socket.IO v5 framing over a plain WebSocket, which is
//! what the telemetry backend exposes.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use pw_core::config::ServerConfig;
use pw_core::constants;
use pw_core::error::{PulseError, PulseResult};

/// A named event as read off the transport, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub name: String,
    pub payload: serde_json::Value,
}

/// Opens connections to the telemetry server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the full handshake and return a live session.
    async fn connect(&self, config: &ServerConfig) -> PulseResult<Box<dyn TransportSession>>;
}

/// One established connection.
#[async_trait]
pub trait TransportSession: Send {
    /// Wait for the next named event.
    ///
    /// `Ok(None)` means the peer closed the connection cleanly. Any error
    /// is a transport fault; the caller treats both as an unexpected close.
    async fn next_event(&mut self) -> PulseResult<Option<RawEvent>>;

    /// Close the connection politely. Never fails.
    async fn close(&mut self);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn socket_err(e: tokio_tungstenite::tungstenite::Error) -> PulseError {
    PulseError::Socket(e.to_string())
}

/// Engine.IO OPEN packet payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenPayload {
    #[serde(default)]
    sid: String,
    ping_interval: u64,
    ping_timeout: u64,
}

/// A decoded Engine.IO / Socket.IO text frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Frame {
    Open { ping_interval: u64, ping_timeout: u64 },
    Close,
    Ping,
    Connected,
    ConnectError(String),
    Disconnected,
    Event(RawEvent),
    Ignored,
}

/// Decode one text frame.
///
/// Engine.IO packet types: 0 open, 1 close, 2 ping, 3 pong, 4 message.
/// Socket.IO packet types inside a message: 0 connect, 1 disconnect,
/// 2 event, 3 ack, 4 connect error.
pub(crate) fn decode_frame(text: &str) -> PulseResult<Frame> {
    let mut chars = text.chars();
    let frame = match chars.next() {
        Some('0') => {
            let open: OpenPayload = serde_json::from_str(chars.as_str())?;
            debug!("engine.io open, sid={}", open.sid);
            Frame::Open {
                ping_interval: open.ping_interval,
                ping_timeout: open.ping_timeout,
            }
        }
        Some('1') => Frame::Close,
        Some('2') => Frame::Ping,
        Some('3') => Frame::Ignored,
        Some('4') => decode_socket_io(chars.as_str())?,
        _ => Frame::Ignored,
    };
    Ok(frame)
}

fn decode_socket_io(packet: &str) -> PulseResult<Frame> {
    let mut chars = packet.chars();
    let kind = chars.next();
    let mut rest = chars.as_str();

    // Optional namespace ("/admin,") and ack id digits precede the body.
    if rest.starts_with('/') {
        rest = rest.split_once(',').map(|(_, body)| body).unwrap_or("");
    }
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    let frame = match kind {
        Some('0') => Frame::Connected,
        Some('1') => Frame::Disconnected,
        Some('2') => {
            let mut args: Vec<serde_json::Value> = serde_json::from_str(rest)?;
            if args.is_empty() {
                return Err(PulseError::Serialization("event packet without name".into()));
            }
            let name = match args.remove(0) {
                serde_json::Value::String(name) => name,
                other => {
                    return Err(PulseError::Serialization(format!(
                        "event name is not a string: {other}"
                    )))
                }
            };
            let payload = if args.is_empty() {
                serde_json::Value::Null
            } else {
                args.remove(0)
            };
            Frame::Event(RawEvent { name, payload })
        }
        Some('4') => {
            let message = serde_json::from_str::<serde_json::Value>(rest)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
                .unwrap_or_else(|| rest.to_string());
            Frame::ConnectError(message)
        }
        _ => Frame::Ignored,
    };
    Ok(frame)
}

/// Socket.IO client transport over WebSocket.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }

    /// Build the Engine.IO WebSocket endpoint for a server address.
    pub fn endpoint_url(config: &ServerConfig) -> PulseResult<Url> {
        if config.address.is_empty() {
            return Err(PulseError::MissingConfig("server address".into()));
        }
        let mut url = Url::parse(&config.address)
            .map_err(|e| PulseError::Config(format!("invalid server address: {e}")))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(PulseError::Config(format!("unsupported scheme: {other}")));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| PulseError::Config(format!("cannot use scheme {scheme}")))?;

        let path = format!(
            "{}{}",
            url.path().trim_end_matches('/'),
            constants::SOCKET_IO_PATH
        );
        url.set_path(&path);
        url.set_query(None);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("EIO", &constants::ENGINE_IO_VERSION.to_string())
                .append_pair("transport", "websocket");
            if !config.auth_token.is_empty() {
                query.append_pair("token", &config.auth_token);
            }
        }
        Ok(url)
    }

    async fn handshake(url: Url, auth_token: String) -> PulseResult<WebSocketSession> {
        let (mut stream, _) = connect_async(url.as_str()).await.map_err(socket_err)?;

        let heartbeat = loop {
            match read_frame(&mut stream).await? {
                Frame::Open {
                    ping_interval,
                    ping_timeout,
                } => break heartbeat_window(ping_interval, ping_timeout),
                Frame::Close => {
                    return Err(PulseError::Handshake("closed before open packet".into()))
                }
                other => debug!("ignoring frame before open: {other:?}"),
            }
        };

        let connect_packet = if auth_token.is_empty() {
            "40".to_string()
        } else {
            format!("40{}", serde_json::json!({ "token": auth_token }))
        };
        stream
            .send(Message::Text(connect_packet.into()))
            .await
            .map_err(socket_err)?;

        loop {
            match read_frame(&mut stream).await? {
                Frame::Connected => break,
                Frame::ConnectError(message) => return Err(PulseError::Handshake(message)),
                Frame::Ping => send_pong(&mut stream).await?,
                Frame::Close | Frame::Disconnected => {
                    return Err(PulseError::Handshake("closed during namespace connect".into()))
                }
                other => debug!("ignoring frame during handshake: {other:?}"),
            }
        }

        info!("socket.io handshake complete (heartbeat window {heartbeat:?})");
        Ok(WebSocketSession { stream, heartbeat })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, config: &ServerConfig) -> PulseResult<Box<dyn TransportSession>> {
        let url = Self::endpoint_url(config)?;
        let limit = Duration::from_millis(config.connect_timeout_ms);
        debug!("opening websocket to {url}");

        let session = tokio::time::timeout(limit, Self::handshake(url, config.auth_token.clone()))
            .await
            .map_err(|_| {
                PulseError::Timeout(format!("handshake exceeded {}ms", config.connect_timeout_ms))
            })??;
        Ok(Box::new(session))
    }
}

/// Silence tolerated before the server counts as gone. Both values come
/// from the server, so the sum saturates.
fn heartbeat_window(ping_interval: u64, ping_timeout: u64) -> Duration {
    Duration::from_millis(ping_interval.saturating_add(ping_timeout))
}

async fn read_frame(stream: &mut WsStream) -> PulseResult<Frame> {
    match stream.next().await {
        Some(Ok(Message::Text(text))) => decode_frame(text.as_str()),
        Some(Ok(Message::Close(_))) => Ok(Frame::Close),
        Some(Ok(_)) => Ok(Frame::Ignored),
        Some(Err(e)) => Err(socket_err(e)),
        None => Err(PulseError::Socket("stream ended".into())),
    }
}

async fn send_pong(stream: &mut WsStream) -> PulseResult<()> {
    stream
        .send(Message::Text("3".into()))
        .await
        .map_err(socket_err)
}

/// A live Socket.IO session.
pub struct WebSocketSession {
    stream: WsStream,
    /// Longest silence tolerated before the server is considered gone.
    heartbeat: Duration,
}

#[async_trait]
impl TransportSession for WebSocketSession {
    async fn next_event(&mut self) -> PulseResult<Option<RawEvent>> {
        loop {
            let message = match tokio::time::timeout(self.heartbeat, self.stream.next()).await {
                Err(_) => {
                    return Err(PulseError::Timeout(format!(
                        "no heartbeat within {:?}",
                        self.heartbeat
                    )))
                }
                Ok(None) => return Ok(None),
                Ok(Some(Err(e))) => return Err(socket_err(e)),
                Ok(Some(Ok(message))) => message,
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => return Ok(None),
                _ => continue,
            };

            match decode_frame(text.as_str()) {
                Ok(Frame::Event(event)) => return Ok(Some(event)),
                Ok(Frame::Ping) => send_pong(&mut self.stream).await?,
                Ok(Frame::Close) | Ok(Frame::Disconnected) => return Ok(None),
                Ok(Frame::ConnectError(message)) => return Err(PulseError::Handshake(message)),
                Ok(_) => {}
                Err(e) => warn!("dropping undecodable frame: {e}"),
            }
        }
    }

    async fn close(&mut self) {
        // Socket.IO disconnect, then the WebSocket close handshake.
        let _ = self.stream.send(Message::Text("41".into())).await;
        if let Err(e) = self.stream.close(None).await {
            debug!("websocket close: {e}");
        }
    }
}
