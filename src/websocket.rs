//! # UI Event WebSocket
//!
//! `/ws/events` keeps a UI in sync with the server-side kitchen state and the
//! voice indicator.
//!
//! ## Protocol:
//! 1. **Connection**: the server sends one `snapshot` frame with the full
//!    kitchen state and the voice session status
//! 2. **Events**: every [`UiEvent`] published afterwards is forwarded as a
//!    JSON text frame tagged by `type`
//! 3. **Lag**: a client that falls behind the broadcast buffer receives a
//!    `lagged` frame with the number of missed events and should re-request
//!    a snapshot
//! 4. **Client → Server**: `{"type":"snapshot"}` re-sends the snapshot,
//!    `{"type":"ping"}` is answered with `{"type":"pong"}`
//!
//! ## Key Rust Concepts:
//! - **Actor model**: each connection is an actix actor with its own context
//! - **Two streams, one actor**: websocket frames and the broadcast receiver
//!   are both attached as `StreamHandler`s with different item types

use crate::events::UiEvent;
use crate::kitchen::store::KitchenState;
use crate::state::AppState;
use crate::voice::SessionStatus;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Frames the server sends besides forwarded events.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Snapshot {
        kitchen: KitchenState,
        voice: SessionStatus,
    },
    Lagged {
        missed: u64,
    },
    Pong,
    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Snapshot,
    Ping,
}

pub struct EventsWebSocket {
    state: web::Data<AppState>,
    last_heartbeat: Instant,
}

impl EventsWebSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        Self {
            state,
            last_heartbeat: Instant::now(),
        }
    }

    fn send<T: Serialize>(&self, ctx: &mut ws::WebsocketContext<Self>, frame: &T) {
        match serde_json::to_string(frame) {
            Ok(json) => ctx.text(json),
            Err(e) => error!(error = %e, "Failed to serialize websocket frame"),
        }
    }

    fn send_snapshot(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let frame = ServerFrame::Snapshot {
            kitchen: self.state.kitchen.snapshot(),
            voice: self.state.voice.status(),
        };
        self.send(ctx, &frame);
    }
}

impl Actor for EventsWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.state.increment_event_subscribers();
        info!(subscribers = self.state.events.subscriber_count() + 1, "Event websocket connected");

        ctx.add_stream(BroadcastStream::new(self.state.events.subscribe()));
        self.send_snapshot(ctx);

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("Event websocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.state.decrement_event_subscribers();
        info!("Event websocket disconnected");
    }
}

/// Events from the broadcast bus.
impl StreamHandler<Result<UiEvent, BroadcastStreamRecvError>> for EventsWebSocket {
    fn handle(&mut self, item: Result<UiEvent, BroadcastStreamRecvError>, ctx: &mut Self::Context) {
        match item {
            Ok(event) => self.send(ctx, &event),
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                warn!(missed, "Event websocket lagged behind the event bus");
                self.send(ctx, &ServerFrame::Lagged { missed });
            }
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        debug!("Event bus closed");
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for EventsWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::Snapshot) => self.send_snapshot(ctx),
                Ok(ClientFrame::Ping) => {
                    self.last_heartbeat = Instant::now();
                    self.send(ctx, &ServerFrame::Pong);
                }
                Err(err) => self.send(
                    ctx,
                    &ServerFrame::Error {
                        code: "invalid_json".to_string(),
                        message: format!("Invalid JSON: {}", err),
                    },
                ),
            },
            Ok(ws::Message::Binary(_)) => {
                warn!("Ignoring binary frame on event websocket");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(?reason, "Event websocket closed by client");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// `GET /ws/events` upgrade handler.
pub async fn events_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    ws::start(EventsWebSocket::new(state), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kitchen::model::View;
    use crate::state::tests::test_state;
    use actix_web::{App, HttpServer};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::Value;
    use tokio_tungstenite::tungstenite::Message;

    #[test]
    fn test_client_frames() {
        assert_eq!(serde_json::from_str::<ClientFrame>(r#"{"type":"ping"}"#).unwrap(), ClientFrame::Ping);
        assert_eq!(
            serde_json::from_str::<ClientFrame>(r#"{"type":"snapshot"}"#).unwrap(),
            ClientFrame::Snapshot
        );
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"start_voice"}"#).is_err());
    }

    #[test]
    fn test_lagged_frame_shape() {
        let json = serde_json::to_value(ServerFrame::Lagged { missed: 4 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "lagged", "missed": 4}));
    }

    async fn next_json(
        stream: &mut (impl futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
    ) -> Value {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("timed out waiting for frame")
                .expect("socket closed")
                .unwrap();
            if let Message::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[actix_web::test]
    async fn test_snapshot_then_events() {
        let (state, _backend) = test_state();
        let data = web::Data::new(state.clone());
        let server = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .route("/ws/events", web::get().to(events_websocket))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/events", addr))
            .await
            .unwrap();

        let snapshot = next_json(&mut socket).await;
        assert_eq!(snapshot["type"], "snapshot");
        assert_eq!(snapshot["kitchen"]["view"], "scan");
        assert_eq!(snapshot["voice"]["state"], "idle");

        state.kitchen.navigate(View::Shopping);
        let event = next_json(&mut socket).await;
        assert_eq!(event["type"], "view_changed");
        assert_eq!(event["view"], "shopping");

        socket.send(Message::Text(r#"{"type":"ping"}"#.to_string())).await.unwrap();
        assert_eq!(next_json(&mut socket).await["type"], "pong");
    }
}
