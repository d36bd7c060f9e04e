// src/orders.rs

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use mongodb::bson::{doc, to_bson, Bson, Document};
use mongodb::options::ReturnDocument;
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::auth::{ensure_active, AuthUser};
use crate::customers::profile_for_user;
use crate::db::{self, ListQuery, MongoDB};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    new_id, Order, OrderStatus, PaymentMethod, PaymentStatus, Role, Staff, StatusChange,
};
use crate::notify;
use crate::staff::{available_filter, parse_status, staff_for_user};

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub quantity: i64,
    pub delivery_address: Option<String>,
    pub notes: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub payment_method: Option<PaymentMethod>,
}

impl CreateOrderRequest {
    /// Returns the quantity as a `u32` once it is within `1..=max`.
    pub fn validate(&self, max: u32) -> ApiResult<u32> {
        if self.quantity < 1 {
            return Err(ApiError::bad_request("Quantity must be at least 1"));
        }
        if self.quantity > max as i64 {
            return Err(ApiError::bad_request(format!(
                "Quantity cannot exceed {} cans per order",
                max
            )));
        }
        if let Some(when) = self.scheduled_for {
            if when < Utc::now() {
                return Err(ApiError::bad_request("Scheduled time is in the past"));
            }
        }
        Ok(self.quantity as u32)
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// Restricts an order query to what the caller may see.
pub fn scope_filter(auth: &AuthUser, staff_id: Option<&str>) -> Document {
    match (auth.role, staff_id) {
        (Role::Customer, _) => doc! { "customer_id": &auth.user_id },
        (Role::Staff, Some(staff_id)) => doc! {
            "$or": [
                available_filter(staff_id),
                { "assigned_staff_id": staff_id },
            ]
        },
        // A staff user without a staff record sees nothing.
        (Role::Staff, None) => doc! { "_id": Bson::Null },
        (Role::Admin, _) => doc! {},
    }
}

pub fn can_view(auth: &AuthUser, order: &Order, staff_id: Option<&str>) -> bool {
    match auth.role {
        Role::Admin => true,
        Role::Customer => order.customer_id == auth.user_id,
        Role::Staff => match staff_id {
            Some(id) => order.is_assigned_to(id) || order.status == OrderStatus::Pending,
            None => false,
        },
    }
}

pub async fn load_order(db: &MongoDB, order_id: &str) -> ApiResult<Order> {
    db.orders()
        .find_one(doc! { "_id": order_id })
        .await?
        .ok_or_else(|| ApiError::not_found("Order not found"))
}

/// Matches `order_id` only while `staff_id` may still take it. Staff cannot
/// take an order they turned down; an admin assignment overrides that.
pub fn acceptable_filter(order_id: &str, staff_id: &str, by_admin: bool) -> Document {
    let mut filter = doc! {
        "_id": order_id,
        "status": OrderStatus::Pending.as_str(),
        "assigned_staff_id": Bson::Null,
    };
    if !by_admin {
        filter.insert("rejected_by", doc! { "$ne": staff_id });
    }
    filter
}

/// Why the conditional accept matched nothing, judged from the order as it
/// is now.
pub fn accept_conflict(order: &Order, staff_id: &str, by_admin: bool) -> ApiError {
    if order.assigned_staff_id.is_some() {
        ApiError::bad_request("Order already accepted")
    } else if order.status != OrderStatus::Pending {
        ApiError::bad_request(format!("Order is {} and cannot be accepted", order.status))
    } else if !by_admin && order.rejected_by.iter().any(|id| id == staff_id) {
        ApiError::bad_request("You already rejected this order")
    } else {
        ApiError::Conflict("Order was modified concurrently, please retry".to_string())
    }
}

pub fn ensure_can_accept(staff: &Staff) -> ApiResult<()> {
    if staff.is_online {
        Ok(())
    } else {
        Err(ApiError::bad_request("Go online before accepting orders"))
    }
}

/// Assigns `staff` to a pending, unassigned order in one conditional update.
/// Of two racing callers exactly one gets the order back.
pub async fn accept_as(db: &MongoDB, order_id: &str, staff: &Staff, actor: &AuthUser) -> ApiResult<Order> {
    let now = Utc::now();
    let change = StatusChange {
        status: OrderStatus::Accepted,
        changed_by: actor.user_id.clone(),
        changed_at: now,
    };

    let filter = acceptable_filter(order_id, &staff.id, actor.is_admin());
    let update = doc! {
        "$set": {
            "status": OrderStatus::Accepted.as_str(),
            "assigned_staff_id": &staff.id,
            "accepted_at": db::bson_time(now),
            "updated_at": db::bson_time(now),
        },
        "$push": { "status_history": to_bson(&change)? },
    };

    match db
        .orders()
        .find_one_and_update(filter, update)
        .return_document(ReturnDocument::After)
        .await?
    {
        Some(order) => Ok(order),
        None => {
            let existing = load_order(db, order_id).await?;
            Err(accept_conflict(&existing, &staff.id, actor.is_admin()))
        }
    }
}

/// Moves `order` to `next` if the transition table allows it and nobody else
/// changed the status in the meantime.
pub async fn transition(db: &MongoDB, order: &Order, next: OrderStatus, actor_id: &str) -> ApiResult<Order> {
    if next == OrderStatus::Accepted {
        return Err(ApiError::bad_request("Use the accept endpoint to accept an order"));
    }
    if order.status.is_terminal() {
        return Err(ApiError::bad_request(format!("Order is already {}", order.status)));
    }
    if !order.status.can_transition_to(next) {
        return Err(ApiError::bad_request(format!(
            "Cannot move order from {} to {}",
            order.status, next
        )));
    }

    let now = Utc::now();
    let change = StatusChange { status: next, changed_by: actor_id.to_string(), changed_at: now };
    let mut set = doc! { "status": next.as_str(), "updated_at": db::bson_time(now) };
    if next == OrderStatus::Delivered {
        set.insert("delivered_at", db::bson_time(now));
    }

    db.orders()
        .find_one_and_update(
            doc! { "_id": &order.id, "status": order.status.as_str() },
            doc! { "$set": set, "$push": { "status_history": to_bson(&change)? } },
        )
        .return_document(ReturnDocument::After)
        .await?
        .ok_or_else(|| ApiError::Conflict("Order was modified concurrently, please retry".to_string()))
}

async fn caller_staff_id(db: &MongoDB, auth: &AuthUser) -> ApiResult<Option<String>> {
    if auth.role != Role::Staff {
        return Ok(None);
    }
    Ok(db
        .staff()
        .find_one(doc! { "user_id": &auth.user_id })
        .await?
        .map(|s| s.id))
}

// POST /api/orders
pub async fn create_order(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<CreateOrderRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Customer])?;
    let quantity = payload.validate(data.config.max_cans_per_order)?;
    ensure_active(&data.mongodb, &auth).await?;

    let profile = profile_for_user(&data.mongodb, &auth.user_id).await?;
    let delivery_address = payload
        .delivery_address
        .as_deref()
        .or(profile.address.as_deref())
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ApiError::bad_request("Delivery address is required"))?
        .to_string();

    let now = Utc::now();
    let unit_price = data.config.can_unit_price;
    let order = Order {
        id: new_id(),
        customer_id: auth.user_id.clone(),
        customer_profile_id: profile.id.clone(),
        assigned_staff_id: None,
        quantity,
        unit_price,
        total_amount: unit_price * quantity as f64,
        delivery_address,
        notes: payload.notes.clone(),
        scheduled_for: payload.scheduled_for,
        payment_method: payload.payment_method.unwrap_or_default(),
        payment_status: PaymentStatus::Pending,
        status: OrderStatus::Pending,
        rejected_by: Vec::new(),
        status_history: vec![StatusChange {
            status: OrderStatus::Pending,
            changed_by: auth.user_id.clone(),
            changed_at: now,
        }],
        accepted_at: None,
        delivered_at: None,
        created_at: now,
        updated_at: now,
    };

    data.mongodb.orders().insert_one(&order).await?;
    notify::order_created(&data, &order).await;
    Ok(HttpResponse::Created().json(order))
}

// GET /api/orders
pub async fn list_orders(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> ApiResult<HttpResponse> {
    let status = parse_status(query.status.as_deref())?;
    let staff_id = caller_staff_id(&data.mongodb, &auth).await?;

    let mut filter = scope_filter(&auth, staff_id.as_deref());
    if let Some(status) = status {
        filter.insert("status", status.as_str());
    }

    let page = query.pagination();
    let orders = db::find_page(&data.mongodb.orders(), filter, &page).await?;
    Ok(HttpResponse::Ok().json(json!({
        "orders": orders,
        "page": page.page.unwrap_or(1).max(1),
        "limit": page.limit(),
    })))
}

// GET /api/orders/{id}
pub async fn get_order(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let order = load_order(&data.mongodb, &path).await?;
    let staff_id = caller_staff_id(&data.mongodb, &auth).await?;
    if !can_view(&auth, &order, staff_id.as_deref()) {
        return Err(ApiError::forbidden("You cannot view this order"));
    }
    Ok(HttpResponse::Ok().json(order))
}

// PUT /api/orders/{id}/accept
pub async fn accept_order(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Staff])?;
    ensure_active(&data.mongodb, &auth).await?;
    let staff = staff_for_user(&data.mongodb, &auth.user_id).await?;
    ensure_can_accept(&staff)?;

    let order = accept_as(&data.mongodb, &path, &staff, &auth).await?;
    notify::order_accepted(&data, &order, &staff).await;
    Ok(HttpResponse::Ok().json(order))
}

// PUT /api/orders/{id}/reject
pub async fn reject_order(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Staff])?;
    ensure_active(&data.mongodb, &auth).await?;
    let staff = staff_for_user(&data.mongodb, &auth.user_id).await?;

    let order = data
        .mongodb
        .orders()
        .find_one_and_update(
            doc! { "_id": path.as_str(), "status": OrderStatus::Pending.as_str() },
            doc! {
                "$addToSet": { "rejected_by": &staff.id },
                "$set": { "updated_at": db::now_bson() },
            },
        )
        .return_document(ReturnDocument::After)
        .await?;

    let order = match order {
        Some(order) => order,
        None => {
            let existing = load_order(&data.mongodb, &path).await?;
            return Err(ApiError::bad_request(format!(
                "Order is {} and can no longer be rejected",
                existing.status
            )));
        }
    };

    notify::order_rejected(&data, &order, &staff.id);
    Ok(HttpResponse::Ok().json(order))
}

async fn change_status(
    auth: &AuthUser,
    data: &AppState,
    order_id: &str,
    next: OrderStatus,
) -> ApiResult<Order> {
    if !next.settable_by(auth.role) {
        return Err(ApiError::forbidden(format!(
            "Role {} cannot set status {}",
            auth.role, next
        )));
    }

    ensure_active(&data.mongodb, auth).await?;
    let order = load_order(&data.mongodb, order_id).await?;
    match auth.role {
        Role::Customer => {
            if order.customer_id != auth.user_id {
                return Err(ApiError::forbidden("Not your order"));
            }
        }
        Role::Staff => {
            let staff = staff_for_user(&data.mongodb, &auth.user_id).await?;
            if !order.is_assigned_to(&staff.id) {
                return Err(ApiError::forbidden("Order is not assigned to you"));
            }
        }
        Role::Admin => {}
    }

    let updated = transition(&data.mongodb, &order, next, &auth.user_id).await?;
    notify::order_status_updated(data, &updated).await;
    Ok(updated)
}

// PUT /api/orders/{id}/status
pub async fn update_order_status(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateStatusRequest>,
) -> ApiResult<HttpResponse> {
    let next = payload.status.parse::<OrderStatus>().map_err(ApiError::BadRequest)?;
    let order = change_status(&auth, &data, &path, next).await?;
    Ok(HttpResponse::Ok().json(order))
}

// PUT /api/orders/{id}/cancel
pub async fn cancel_order(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Customer])?;
    let order = change_status(&auth, &data, &path, OrderStatus::Cancelled).await?;
    Ok(HttpResponse::Ok().json(order))
}
