//! WebSocket endpoint
//!
//! Each connection is an actix actor. On start it registers with the
//! connection registry (last-connection-wins) and optionally joins a chat
//! session's broadcast scope; on stop it unregisters precisely, so a
//! replaced connection never tears down its successor. Outbound events
//! arrive over an unbounded channel and are forwarded as text frames.

use crate::error::AppError;
use crate::metrics;
use crate::models::MessageStatus;
use crate::state::AppContext;
use crate::websocket::{WsClientEvent, WsEvent};
use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use uuid::Uuid;

/// Server-side ping cadence
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Drop the connection when the client is silent past this
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub identity: Uuid,
    pub session_id: Option<Uuid>,
}

// Outbound frame forwarded from the registry channel to the socket
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct OutboundFrame(String);

// The registry dropped our sender (eviction or shutdown)
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct ChannelClosed;

struct WsConn {
    identity: Uuid,
    session_id: Option<Uuid>,
    connection_id: Option<Uuid>,
    app: AppContext,
    hb: Instant,
    sender: Option<crate::websocket::WsSender>,
    receiver: Option<UnboundedReceiver<WsEvent>>,
}

impl WsConn {
    fn new(
        identity: Uuid,
        session_id: Option<Uuid>,
        app: AppContext,
        sender: crate::websocket::WsSender,
        receiver: UnboundedReceiver<WsEvent>,
    ) -> Self {
        Self {
            identity,
            session_id,
            connection_id: None,
            app,
            hb: Instant::now(),
            sender: Some(sender),
            receiver: Some(receiver),
        }
    }

    fn handle_client_event(&self, event: WsClientEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match event {
            WsClientEvent::Ack { message_id, status } => {
                let target = MessageStatus::parse(&status);
                let sessions = self.app.sessions.clone();
                let identity = self.identity;
                actix::spawn(async move {
                    if let Err(e) = sessions.acknowledge(message_id, identity, target).await {
                        tracing::debug!("Ack for {} rejected: {}", message_id, e);
                    }
                });
            }
            WsClientEvent::Typing {
                session_id,
                is_typing,
            } => {
                // Only relay for the session this connection joined
                if self.session_id == Some(session_id) {
                    self.app
                        .sessions
                        .relay_typing(session_id, self.identity, is_typing);
                } else {
                    let frame = WsEvent::error("NOT_JOINED", "typing for a session not joined");
                    if let Ok(json) = frame.to_json() {
                        ctx.text(json);
                    }
                }
            }
        }
    }
}

impl Actor for WsConn {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        if let Some(sender) = self.sender.take() {
            let connection_id = self.app.registry.register(self.identity, sender);
            self.connection_id = Some(connection_id);
        }
        if let Some(session_id) = self.session_id {
            self.app.registry.join_session(session_id, self.identity);
        }
        metrics::set_live_connections(self.app.registry.connection_count());

        // Forward registry events to the socket until the channel closes
        if let Some(mut receiver) = self.receiver.take() {
            let addr = ctx.address();
            actix::spawn(async move {
                while let Some(event) = receiver.recv().await {
                    match event.to_json() {
                        Ok(json) => addr.do_send(OutboundFrame(json)),
                        Err(e) => tracing::error!("Failed to encode ws event: {}", e),
                    }
                }
                addr.do_send(ChannelClosed);
            });
        }

        let connected = WsEvent::connected(self.identity);
        if let Ok(json) = connected.to_json() {
            ctx.text(json);
        }

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::debug!("Client {} heartbeat timed out", act.identity);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn stopping(&mut self, _ctx: &mut Self::Context) -> actix::Running {
        if let Some(connection_id) = self.connection_id {
            self.app
                .registry
                .unregister_connection(self.identity, connection_id);
        }
        metrics::set_live_connections(self.app.registry.connection_count());
        actix::Running::Stop
    }
}

impl Handler<OutboundFrame> for WsConn {
    type Result = ();

    fn handle(&mut self, msg: OutboundFrame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<ChannelClosed> for WsConn {
    type Result = ();

    fn handle(&mut self, _msg: ChannelClosed, ctx: &mut Self::Context) {
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsConn {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(payload)) => {
                self.hb = Instant::now();
                self.app.registry.touch(self.identity);
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
                self.app.registry.touch(self.identity);
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.app.registry.touch(self.identity);
                match WsClientEvent::from_json(&text) {
                    Ok(event) => self.handle_client_event(event, ctx),
                    Err(e) => {
                        let frame =
                            WsEvent::error("BAD_FRAME", &format!("unrecognized frame: {}", e));
                        if let Ok(json) = frame.to_json() {
                            ctx.text(json);
                        }
                    }
                }
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("WebSocket protocol error for {}: {}", self.identity, e);
                ctx.stop();
            }
        }
    }
}

/// GET /ws?identity=...&session_id=...
///
/// Upgrades to a WebSocket. When a session is given, the caller must be
/// an active participant of it.
pub async fn ws_connect(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<WsParams>,
    app: web::Data<AppContext>,
) -> Result<HttpResponse, Error> {
    if let Some(session_id) = query.session_id {
        app.sessions.get_session(session_id).await?;

        let membership = app
            .storage
            .get_participant(session_id, query.identity)
            .await?;
        if !membership.map(|p| p.is_active).unwrap_or(false) {
            return Err(AppError::NotAParticipant.into());
        }
    }

    let (tx, rx) = unbounded_channel();
    let conn = WsConn::new(
        query.identity,
        query.session_id,
        app.get_ref().clone(),
        tx,
        rx,
    );
    ws::start(conn, &req, stream)
}

/// Register WebSocket routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(ws_connect));
}
