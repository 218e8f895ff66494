//! # WebSocket Audio Ingest
//!
//! The transport adapter between the WebSocket layer and the session core.
//! Clients connect to `/ws/audio` and stream binary frames of raw audio;
//! the protocol is deliberately minimal:
//!
//! 1. **Connection open**: a session is registered for the connection
//! 2. **Binary message**: one frame of audio in the configured encoding,
//!    decoded and handed to the session's channel
//! 3. **Connection close**: the session is removed and torn down
//!
//! The server sends nothing back except protocol-level pongs; transcription
//! output is the engine's concern, not the stream's.
//!
//! ## Actor Model:
//! Each connection is an independent Actix actor. The actor never blocks:
//! decoding and `produce` are O(frame), and teardown (which joins the
//! worker) runs on a spawned task after the actor stops.

use crate::audio::decoder::{decode_samples, SampleFormat};
use crate::audio::session::{ConnectionId, SessionRegistry};
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often the server pings idle clients.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Connections silent for this long are dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Actor handling one audio streaming connection.
pub struct AudioSocket {
    /// Identity of this connection in the registry
    conn_id: ConnectionId,

    /// Remote address, used for diagnostics and recording file names
    endpoint: String,

    /// Wire encoding every frame on this deployment uses
    format: SampleFormat,

    registry: Arc<SessionRegistry>,

    last_heartbeat: Instant,
}

impl AudioSocket {
    pub fn new(endpoint: String, format: SampleFormat, registry: Arc<SessionRegistry>) -> Self {
        Self {
            conn_id: ConnectionId::new(),
            endpoint,
            format,
            registry,
            last_heartbeat: Instant::now(),
        }
    }

    /// Decode one binary payload and hand it to this connection's session.
    ///
    /// A missing session is not an error: close and late messages can race
    /// during shutdown, and such frames are dropped silently.
    fn handle_frame(&self, data: &[u8]) {
        let Some(session) = self.registry.lookup(&self.conn_id) else {
            debug!(
                connection = %self.conn_id,
                bytes = data.len(),
                "Dropping frame for unregistered connection"
            );
            return;
        };

        let samples = decode_samples(data, self.format);
        debug!(
            connection = %self.conn_id,
            bytes = data.len(),
            samples = samples.len(),
            "Received audio frame"
        );

        if samples.is_empty() {
            // Nothing decodable in the payload; not worth a queue slot
            return;
        }

        session.produce(samples, data.len());
    }
}

impl Actor for AudioSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Connection open: register the session and start its worker.
    fn started(&mut self, ctx: &mut Self::Context) {
        match self.registry.find_or_create(self.conn_id, &self.endpoint) {
            Ok(_session) => {
                info!(
                    connection = %self.conn_id,
                    endpoint = %self.endpoint,
                    "Audio stream connected"
                );
            }
            Err(err) => {
                error!(
                    connection = %self.conn_id,
                    endpoint = %self.endpoint,
                    "Refusing connection: {}",
                    err
                );
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Again,
                    description: Some(err),
                }));
                ctx.stop();
                return;
            }
        }

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(
                    connection = %act.conn_id,
                    "Heartbeat timeout, closing connection"
                );
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    /// Connection gone: remove the session and run the teardown sequence.
    ///
    /// Teardown joins the worker, so it runs on its own task instead of
    /// inside the actor shutdown path. Removal happens before the channel is
    /// stopped, so no new frames can arrive for this identity.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let registry = self.registry.clone();
        let conn_id = self.conn_id;

        tokio::spawn(async move {
            if let Some(session) = registry.remove(&conn_id) {
                session.teardown().await;
            }
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AudioSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.handle_frame(&data);
            }
            Ok(ws::Message::Text(_)) => {
                warn!(
                    connection = %self.conn_id,
                    "Ignoring text message on binary-only audio stream"
                );
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection = %self.conn_id, "Stream closed: {:?}", reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection = %self.conn_id, "Ignoring continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection = %self.conn_id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// HTTP handler upgrading `/ws/audio` requests to streaming connections.
pub async fn audio_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let endpoint = req
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    info!(endpoint = %endpoint, "New WebSocket connection request");

    let config = app_state.get_config();
    let socket = AudioSocket::new(
        endpoint,
        config.audio.sample_format,
        app_state.registry.clone(),
    );

    ws::start(socket, &req, stream)
}
