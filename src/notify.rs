// src/notify.rs
//
// Fan-out for order and staff lifecycle changes: a socket broadcast to every
// session plus, where someone should hear about it, an FCM push. Runs after
// the database write has succeeded; nothing here can fail the request.

use futures::stream::TryStreamExt;
use log::{error, info};
use mongodb::bson::doc;
use serde_json::json;

use crate::app_state::AppState;
use crate::events::{Broadcast, EventKind, ServerEvent};
use crate::models::{Order, OrderStatus, Staff};
use crate::push::PushMessage;

fn broadcast(state: &AppState, event: ServerEvent) {
    state.event_hub.do_send(Broadcast(event));
}

async fn customer_token(state: &AppState, order: &Order) -> Option<String> {
    match state
        .mongodb
        .customer_profiles()
        .find_one(doc! { "_id": &order.customer_profile_id })
        .await
    {
        Ok(profile) => profile.and_then(|p| p.fcm_token),
        Err(e) => {
            error!("Error loading profile for order {}: {}", order.id, e);
            None
        }
    }
}

async fn online_staff_tokens(state: &AppState) -> Vec<String> {
    let filter = doc! { "is_online": true, "fcm_token": { "$ne": null } };
    let staff: Result<Vec<Staff>, _> = match state.mongodb.staff().find(filter).await {
        Ok(cursor) => cursor.try_collect().await,
        Err(e) => Err(e),
    };
    match staff {
        Ok(staff) => staff.into_iter().filter_map(|s| s.fcm_token).collect(),
        Err(e) => {
            error!("Error loading online staff tokens: {}", e);
            Vec::new()
        }
    }
}

pub fn status_message(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "Your order is waiting for a delivery partner",
        OrderStatus::Accepted => "A delivery partner accepted your order",
        OrderStatus::Picked => "Your water cans have been picked up",
        OrderStatus::Transit => "Your order is on the way",
        OrderStatus::Delivered => "Your order has been delivered",
        OrderStatus::Cancelled => "Your order was cancelled",
        OrderStatus::Missed => "We could not complete your delivery",
    }
}

pub async fn order_created(state: &AppState, order: &Order) {
    info!("Order {} created by {}", order.id, order.customer_id);
    broadcast(state, ServerEvent::new(EventKind::NewOrder, order));

    let tokens = online_staff_tokens(state).await;
    state.push.dispatch(
        tokens,
        PushMessage::new(
            "New order",
            format!("{} can(s) to {}", order.quantity, order.delivery_address),
            json!({ "orderId": order.id, "type": "new-order" }),
        ),
    );
}

pub async fn order_accepted(state: &AppState, order: &Order, staff: &Staff) {
    info!("Order {} accepted by staff {}", order.id, staff.id);
    broadcast(
        state,
        ServerEvent::new(
            EventKind::OrderAccepted,
            json!({
                "order": order,
                "staff": { "id": staff.id, "name": staff.name, "phone": staff.phone },
            }),
        ),
    );

    if let Some(token) = customer_token(state, order).await {
        state.push.dispatch(
            vec![token],
            PushMessage::new(
                "Order accepted",
                format!("{} will deliver your order", staff.name),
                json!({ "orderId": order.id, "status": order.status }),
            ),
        );
    }
}

pub fn order_rejected(state: &AppState, order: &Order, staff_id: &str) {
    info!("Order {} rejected by staff {}", order.id, staff_id);
    broadcast(
        state,
        ServerEvent::new(
            EventKind::OrderRejected,
            json!({ "orderId": order.id, "staffId": staff_id }),
        ),
    );
}

pub async fn order_status_updated(state: &AppState, order: &Order) {
    info!("Order {} is now {}", order.id, order.status);
    broadcast(state, ServerEvent::new(EventKind::OrderStatusUpdated, order));

    if let Some(token) = customer_token(state, order).await {
        state.push.dispatch(
            vec![token],
            PushMessage::new(
                "Order update",
                status_message(order.status),
                json!({ "orderId": order.id, "status": order.status }),
            ),
        );
    }
}

pub fn staff_presence(state: &AppState, staff: &Staff) {
    let kind = if staff.is_online { EventKind::StaffOnline } else { EventKind::StaffOffline };
    info!("Staff {} is {}", staff.id, if staff.is_online { "online" } else { "offline" });
    broadcast(
        state,
        ServerEvent::new(
            kind,
            json!({ "staffId": staff.id, "name": staff.name, "location": staff.location }),
        ),
    );
}
