// src/events.rs

use std::collections::HashMap;

use actix::prelude::*;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Names of the events pushed over the global socket channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    NewOrder,
    OrderAccepted,
    OrderRejected,
    OrderStatusUpdated,
    StaffOnline,
    StaffOffline,
}

/// A frame as it goes out on the wire: `{"event": "...", "data": {...}}`.
#[derive(Message, Debug, Clone, Serialize)]
#[rtype(result = "()")]
pub struct ServerEvent {
    pub event: EventKind,
    pub data: Value,
}

impl ServerEvent {
    pub fn new(event: EventKind, data: impl Serialize) -> Self {
        ServerEvent {
            event,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub session_id: String,
    pub user_id: Option<String>,
    pub addr: Recipient<ServerEvent>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub session_id: String,
}

/// Fan an event out to every connected session.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Broadcast(pub ServerEvent);

#[derive(Message)]
#[rtype(result = "usize")]
pub struct SessionCount;

struct Session {
    user_id: Option<String>,
    addr: Recipient<ServerEvent>,
}

/// Registry of live WebSocket sessions. There is one channel and no
/// per-user filtering: every session sees every event.
#[derive(Default)]
pub struct EventHub {
    sessions: HashMap<String, Session>,
}

impl EventHub {
    pub fn new() -> Self {
        EventHub::default()
    }
}

impl Actor for EventHub {
    type Context = Context<Self>;
}

impl Handler<Connect> for EventHub {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) {
        info!(
            "Session {} connected (user: {})",
            msg.session_id,
            msg.user_id.as_deref().unwrap_or("anonymous")
        );
        self.sessions.insert(
            msg.session_id,
            Session { user_id: msg.user_id, addr: msg.addr },
        );
    }
}

impl Handler<Disconnect> for EventHub {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        if let Some(session) = self.sessions.remove(&msg.session_id) {
            info!(
                "Session {} disconnected (user: {})",
                msg.session_id,
                session.user_id.as_deref().unwrap_or("anonymous")
            );
        }
    }
}

impl Handler<Broadcast> for EventHub {
    type Result = ();

    fn handle(&mut self, msg: Broadcast, _: &mut Context<Self>) {
        debug!("Broadcasting {:?} to {} sessions", msg.0.event, self.sessions.len());
        for session in self.sessions.values() {
            session.addr.do_send(msg.0.clone());
        }
    }
}

impl Handler<SessionCount> for EventHub {
    type Result = usize;

    fn handle(&mut self, _: SessionCount, _: &mut Context<Self>) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Collector {
        received: Vec<ServerEvent>,
    }

    impl Actor for Collector {
        type Context = Context<Self>;
    }

    impl Handler<ServerEvent> for Collector {
        type Result = ();

        fn handle(&mut self, msg: ServerEvent, _: &mut Context<Self>) {
            self.received.push(msg);
        }
    }

    #[derive(Message)]
    #[rtype(result = "Vec<EventKind>")]
    struct Take;

    impl Handler<Take> for Collector {
        type Result = Vec<EventKind>;

        fn handle(&mut self, _: Take, _: &mut Context<Self>) -> Vec<EventKind> {
            self.received.drain(..).map(|e| e.event).collect()
        }
    }

    fn connect(hub: &Addr<EventHub>, id: &str, collector: &Addr<Collector>) {
        hub.do_send(Connect {
            session_id: id.to_string(),
            user_id: None,
            addr: collector.clone().recipient(),
        });
    }

    #[test]
    fn test_event_names_on_the_wire() {
        let frame = ServerEvent::new(EventKind::OrderStatusUpdated, json!({ "id": "o1" }));
        let wire = serde_json::to_value(&frame).unwrap();
        assert_eq!(wire["event"], "order-status-updated");
        assert_eq!(wire["data"]["id"], "o1");

        assert_eq!(serde_json::to_value(EventKind::NewOrder).unwrap(), "new-order");
        assert_eq!(serde_json::to_value(EventKind::StaffOffline).unwrap(), "staff-offline");
    }

    #[actix_web::test]
    async fn test_broadcast_reaches_every_session() {
        let hub = EventHub::new().start();
        let a = Collector::default().start();
        let b = Collector::default().start();
        connect(&hub, "a", &a);
        connect(&hub, "b", &b);

        hub.do_send(Broadcast(ServerEvent::new(EventKind::NewOrder, json!({}))));
        assert_eq!(hub.send(SessionCount).await.unwrap(), 2);

        assert_eq!(a.send(Take).await.unwrap(), vec![EventKind::NewOrder]);
        assert_eq!(b.send(Take).await.unwrap(), vec![EventKind::NewOrder]);
    }

    #[actix_web::test]
    async fn test_disconnected_session_stops_receiving() {
        let hub = EventHub::new().start();
        let a = Collector::default().start();
        let b = Collector::default().start();
        connect(&hub, "a", &a);
        connect(&hub, "b", &b);
        hub.do_send(Disconnect { session_id: "a".to_string() });

        hub.do_send(Broadcast(ServerEvent::new(EventKind::StaffOnline, json!({}))));
        assert_eq!(hub.send(SessionCount).await.unwrap(), 1);

        assert!(a.send(Take).await.unwrap().is_empty());
        assert_eq!(b.send(Take).await.unwrap(), vec![EventKind::StaffOnline]);
    }
}
