// src/ws.rs

use std::time::{Duration, Instant};

use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::auth::validate_jwt;
use crate::error::ApiError;
use crate::events::{Connect, Disconnect, EventHub, ServerEvent};
use crate::models::new_id;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// One WebSocket client on the global event channel.
pub struct EventSession {
    pub id: String,
    pub user_id: Option<String>,
    pub hb: Instant,
    pub hub: Addr<EventHub>,
}

impl EventSession {
    pub fn new(user_id: Option<String>, hub: Addr<EventHub>) -> Self {
        EventSession { id: new_id(), user_id, hb: Instant::now(), hub }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!("Session {} heartbeat failed, disconnecting", act.id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for EventSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);

        self.hub
            .send(Connect {
                session_id: self.id.clone(),
                user_id: self.user_id.clone(),
                addr: ctx.address().recipient(),
            })
            .into_actor(self)
            .then(|res, act, ctx| {
                if res.is_err() {
                    warn!("Session {} failed to register with the event hub", act.id);
                    ctx.stop();
                }
                fut::ready(())
            })
            .wait(ctx);
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        self.hub.do_send(Disconnect { session_id: self.id.clone() });
        Running::Stop
    }
}

/// Clients may send `{"event": "ping"}` as an application-level keepalive.
#[derive(Deserialize)]
struct IncomingFrame {
    event: String,
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for EventSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match serde_json::from_str::<IncomingFrame>(&text) {
                    Ok(frame) if frame.event == "ping" => {
                        ctx.text(json!({ "event": "pong" }).to_string());
                    }
                    Ok(frame) => debug!("Session {} sent unhandled event {}", self.id, frame.event),
                    Err(e) => debug!("Session {} sent unparseable frame: {}", self.id, e),
                }
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!("WebSocket error on session {}: {}", self.id, e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

impl Handler<ServerEvent> for EventSession {
    type Result = ();

    fn handle(&mut self, msg: ServerEvent, ctx: &mut Self::Context) {
        match serde_json::to_string(&msg) {
            Ok(frame) => ctx.text(frame),
            Err(e) => warn!("Could not encode {:?} for session {}: {}", msg.event, self.id, e),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

// GET /ws[?token=...]
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<WsQuery>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let user_id = match &query.token {
        Some(token) => match validate_jwt(token, &data.config.jwt_secret) {
            Ok(claims) => Some(claims.sub),
            Err(e) => {
                return Err(ApiError::Unauthorized(format!("Invalid token: {}", e)).into());
            }
        },
        None => None,
    };

    ws::start(EventSession::new(user_id, data.event_hub.clone()), &req, stream)
}
