//! # Live Session Transport
//!
//! WebSocket plumbing for the streaming voice service:
//!
//! - [`handshake`]: connect, send `setup`, wait for `setupComplete`
//! - [`run_writer`]: drains the bounded outbound queue onto the socket
//! - [`classify_frame`]: turns raw websocket frames into payloads or a close
//!
//! The session owns the read half and decides what to do with each payload;
//! this module only moves bytes.

use crate::error::VoiceError;
use crate::voice::protocol::{ClientMessage, ServerEvent, ServerMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

pub type LiveStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type LiveSink = SplitSink<LiveStream, Message>;
pub type LiveSource = SplitStream<LiveStream>;

/// What a single inbound websocket frame amounts to.
#[derive(Debug, PartialEq)]
pub enum Frame {
    /// JSON payload from a text or binary frame
    Payload(Vec<u8>),
    /// The peer closed the connection
    Closed(Option<String>),
    /// Control frames handled by the websocket layer
    Ignored,
}

pub fn classify_frame(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Payload(text.into_bytes()),
        Message::Binary(bytes) => Frame::Payload(bytes),
        Message::Close(frame) => Frame::Closed(frame.map(|f| format!("{} {}", u16::from(f.code), f.reason))),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Frame::Ignored,
    }
}

/// Attach the API key as a query parameter when one is configured.
pub fn endpoint_url(endpoint: &str, api_key: &str) -> String {
    if api_key.trim().is_empty() {
        return endpoint.to_string();
    }
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{}{}key={}", endpoint, separator, api_key.trim())
}

/// Open the connection and complete the setup exchange.
///
/// Frames other than `setupComplete` that arrive before it are logged and
/// skipped. The caller applies the timeout.
///
/// ## Errors:
/// `ConnectionFailed` for refused connections, rejected upgrades, send
/// failures and a close before setup completes.
pub async fn handshake(endpoint: &str, api_key: &str, setup: &ClientMessage) -> Result<LiveStream, VoiceError> {
    let url = endpoint_url(endpoint, api_key);
    let (mut stream, response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| VoiceError::ConnectionFailed(format!("connect to {}: {}", endpoint, e)))?;
    debug!(status = %response.status(), "Live websocket connected");

    let setup_json = setup
        .to_json()
        .map_err(|e| VoiceError::ConnectionFailed(e.to_string()))?;
    stream
        .send(Message::Text(setup_json))
        .await
        .map_err(|e| VoiceError::ConnectionFailed(format!("sending setup: {}", e)))?;

    while let Some(next) = stream.next().await {
        let message = next.map_err(|e| VoiceError::ConnectionFailed(format!("during setup: {}", e)))?;
        match classify_frame(message) {
            Frame::Payload(payload) => match ServerMessage::parse(&payload) {
                Ok(parsed) => {
                    if parsed.into_events().contains(&ServerEvent::SetupComplete) {
                        info!(endpoint, "Live session setup complete");
                        return Ok(stream);
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring unreadable frame during setup"),
            },
            Frame::Closed(reason) => {
                return Err(VoiceError::ConnectionFailed(format!(
                    "server closed during setup: {}",
                    reason.unwrap_or_else(|| "no reason given".to_string())
                )))
            }
            Frame::Ignored => {}
        }
    }

    Err(VoiceError::ConnectionFailed("connection ended before setup completed".to_string()))
}

/// Forward queued messages to the socket until the queue closes or shutdown
/// is signalled, then close the socket.
///
/// ## Errors:
/// `ConnectionError` when a send fails. Messages still queued are discarded.
pub async fn run_writer(
    mut sink: LiveSink,
    mut outbound: mpsc::Receiver<ClientMessage>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), VoiceError> {
    let mut sent: u64 = 0;
    let result = loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break Ok(()),
            next = outbound.recv() => {
                let Some(message) = next else { break Ok(()) };
                let kind = message.kind();
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, kind, "Dropping unencodable outbound message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    break Err(VoiceError::ConnectionError(format!("send failed: {}", e)));
                }
                sent += 1;
            }
        }
    };

    if let Err(e) = sink.close().await {
        debug!(error = %e, "Closing live websocket");
    }
    debug!(sent, "Live writer finished");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    #[test]
    fn test_endpoint_url() {
        assert_eq!(endpoint_url("wss://host/live", ""), "wss://host/live");
        assert_eq!(endpoint_url("wss://host/live", "abc"), "wss://host/live?key=abc");
        assert_eq!(endpoint_url("wss://host/live?alt=1", "abc"), "wss://host/live?alt=1&key=abc");
    }

    #[test]
    fn test_classify_frames() {
        assert_eq!(classify_frame(Message::Text("{}".into())), Frame::Payload(b"{}".to_vec()));
        assert_eq!(classify_frame(Message::Binary(vec![1, 2])), Frame::Payload(vec![1, 2]));
        assert_eq!(classify_frame(Message::Ping(vec![])), Frame::Ignored);
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "bye".into(),
        }));
        assert_eq!(classify_frame(close), Frame::Closed(Some("1001 bye".to_string())));
    }

    #[tokio::test]
    async fn test_handshake_refused_is_connection_failed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let setup = ClientMessage::tool_result("x", "y", "z");
        let err = handshake(&format!("ws://{}", addr), "", &setup).await.unwrap_err();
        assert!(matches!(err, VoiceError::ConnectionFailed(_)));
    }
}
