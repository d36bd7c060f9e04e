// src/payments.rs

use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::{info, warn};
use mongodb::bson::{doc, Document};
use mongodb::options::ReturnDocument;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::{ensure_active, AuthUser};
use crate::db::{self, ListQuery, MongoDB};
use crate::error::{ApiError, ApiResult};
use crate::models::{new_id, Order, OrderStatus, Payment, PaymentChannel, PaymentStatus, Role};
use crate::orders::load_order;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub order_id: String,
    pub amount: Option<f64>,
    pub method: Option<PaymentChannel>,
    pub transaction_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentStatusRequest {
    pub status: String,
    pub transaction_ref: Option<String>,
}

/// Checks that a new payment may be recorded against `order` and returns the
/// amount to charge.
pub fn payable_amount(order: &Order, requested: Option<f64>) -> ApiResult<f64> {
    if order.status == OrderStatus::Cancelled {
        return Err(ApiError::bad_request("Cannot pay for a cancelled order"));
    }
    if order.payment_status == PaymentStatus::Completed {
        return Err(ApiError::bad_request("Order is already paid"));
    }
    let amount = requested.unwrap_or(order.total_amount);
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ApiError::bad_request("Amount must be greater than zero"));
    }
    Ok(amount)
}

fn ensure_owner_or_admin(auth: &AuthUser, customer_id: &str) -> ApiResult<()> {
    if auth.is_admin() || auth.user_id == customer_id {
        Ok(())
    } else {
        Err(ApiError::forbidden("You cannot access this payment"))
    }
}

/// Every payment recorded against `order_id`.
pub fn order_payments_filter(order_id: &str) -> Document {
    doc! { "order_id": order_id }
}

/// An order reflects only its newest payment. Ties on `created_at` go to the
/// payment being written.
pub fn should_mirror(latest: Option<&Payment>, payment: &Payment) -> bool {
    match latest {
        Some(latest) => latest.id == payment.id || latest.created_at <= payment.created_at,
        None => false,
    }
}

/// Copies `status` onto the order if `payment` is still the latest one for it.
async fn mirror_onto_order(db: &MongoDB, payment: &Payment) -> ApiResult<()> {
    let latest = db
        .payments()
        .find_one(order_payments_filter(&payment.order_id))
        .sort(doc! { "created_at": -1 })
        .await?;

    if !should_mirror(latest.as_ref(), payment) {
        info!(
            "Payment {} is not the latest for order {}, order left unchanged",
            payment.id, payment.order_id
        );
        return Ok(());
    }

    db.orders()
        .update_one(
            doc! { "_id": &payment.order_id },
            doc! { "$set": {
                "payment_status": payment.status.as_str(),
                "updated_at": db::now_bson(),
            } },
        )
        .await?;
    Ok(())
}

async fn load_payment(db: &MongoDB, payment_id: &str) -> ApiResult<Payment> {
    db.payments()
        .find_one(doc! { "_id": payment_id })
        .await?
        .ok_or_else(|| ApiError::not_found("Payment not found"))
}

// POST /api/payments
pub async fn create_payment(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<CreatePaymentRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Customer])?;
    if let Some(amount) = payload.amount {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ApiError::bad_request("Amount must be greater than zero"));
        }
    }

    ensure_active(&data.mongodb, &auth).await?;

    let order = load_order(&data.mongodb, &payload.order_id).await?;
    if order.customer_id != auth.user_id {
        return Err(ApiError::forbidden("Not your order"));
    }
    let amount = payable_amount(&order, payload.amount)?;

    let now = Utc::now();
    let payment = Payment {
        id: new_id(),
        order_id: order.id.clone(),
        customer_id: auth.user_id.clone(),
        amount,
        method: payload.method.unwrap_or_default(),
        status: PaymentStatus::Pending,
        transaction_ref: payload.transaction_ref.clone(),
        created_at: now,
        updated_at: now,
    };
    data.mongodb.payments().insert_one(&payment).await?;
    mirror_onto_order(&data.mongodb, &payment).await?;

    info!("Payment {} recorded for order {}", payment.id, order.id);
    Ok(HttpResponse::Created().json(payment))
}

// GET /api/payments
pub async fn list_payments(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Customer, Role::Admin])?;

    let mut filter = if auth.is_admin() {
        doc! {}
    } else {
        doc! { "customer_id": &auth.user_id }
    };
    if let Some(status) = &query.status {
        let status = status.parse::<PaymentStatus>().map_err(ApiError::BadRequest)?;
        filter.insert("status", status.as_str());
    }

    let payments = db::find_page(&data.mongodb.payments(), filter, &query.pagination()).await?;
    Ok(HttpResponse::Ok().json(payments))
}

// GET /api/payments/order/{order_id}
pub async fn payments_for_order(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Customer, Role::Admin])?;
    let order = load_order(&data.mongodb, &path).await?;
    ensure_owner_or_admin(&auth, &order.customer_id)?;

    let page = db::Pagination { page: None, limit: Some(db::Pagination::MAX_LIMIT) };
    let payments =
        db::find_page(&data.mongodb.payments(), order_payments_filter(&order.id), &page).await?;
    Ok(HttpResponse::Ok().json(payments))
}

// GET /api/payments/{id}
pub async fn get_payment(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Customer, Role::Admin])?;
    let payment = load_payment(&data.mongodb, &path).await?;
    ensure_owner_or_admin(&auth, &payment.customer_id)?;
    Ok(HttpResponse::Ok().json(payment))
}

// PUT /api/payments/{id}/status
pub async fn update_payment_status(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdatePaymentStatusRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Admin])?;
    let next = payload.status.parse::<PaymentStatus>().map_err(ApiError::BadRequest)?;
    ensure_active(&data.mongodb, &auth).await?;

    let current = load_payment(&data.mongodb, &path).await?;
    if !current.status.can_transition_to(next) {
        return Err(ApiError::bad_request(format!(
            "Cannot move payment from {} to {}",
            current.status, next
        )));
    }

    let mut set = doc! { "status": next.as_str(), "updated_at": db::now_bson() };
    if let Some(reference) = &payload.transaction_ref {
        set.insert("transaction_ref", reference);
    }
    let updated = data
        .mongodb
        .payments()
        .find_one_and_update(
            doc! { "_id": &current.id, "status": current.status.as_str() },
            doc! { "$set": set },
        )
        .return_document(ReturnDocument::After)
        .await?
        .ok_or_else(|| {
            warn!("Payment {} changed while updating", current.id);
            ApiError::Conflict("Payment was modified concurrently, please retry".to_string())
        })?;

    mirror_onto_order(&data.mongodb, &updated).await?;
    info!("Payment {} is now {}", updated.id, updated.status);
    Ok(HttpResponse::Ok().json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentMethod;

    fn order(status: OrderStatus, payment_status: PaymentStatus) -> Order {
        let now = Utc::now();
        Order {
            id: "o1".into(),
            customer_id: "c1".into(),
            customer_profile_id: "p1".into(),
            assigned_staff_id: None,
            quantity: 3,
            unit_price: 30.0,
            total_amount: 90.0,
            delivery_address: "12 Lake Road".into(),
            notes: None,
            scheduled_for: None,
            payment_method: PaymentMethod::Online,
            payment_status,
            status,
            rejected_by: vec![],
            status_history: vec![],
            accepted_at: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_amount_defaults_to_order_total() {
        let o = order(OrderStatus::Pending, PaymentStatus::Pending);
        assert_eq!(payable_amount(&o, None).unwrap(), 90.0);
        assert_eq!(payable_amount(&o, Some(45.0)).unwrap(), 45.0);
    }

    #[test]
    fn test_cannot_pay_twice_or_for_cancelled() {
        let paid = order(OrderStatus::Delivered, PaymentStatus::Completed);
        assert!(payable_amount(&paid, None).is_err());

        let cancelled = order(OrderStatus::Cancelled, PaymentStatus::Pending);
        assert!(payable_amount(&cancelled, None).is_err());

        let failed = order(OrderStatus::Accepted, PaymentStatus::Failed);
        assert!(payable_amount(&failed, None).is_ok());
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let o = order(OrderStatus::Pending, PaymentStatus::Pending);
        assert!(payable_amount(&o, Some(0.0)).is_err());
        assert!(payable_amount(&o, Some(-5.0)).is_err());
        assert!(payable_amount(&o, Some(f64::NAN)).is_err());
    }

    #[test]
    fn test_owner_or_admin() {
        let owner = AuthUser { user_id: "c1".into(), role: Role::Customer };
        let other = AuthUser { user_id: "c2".into(), role: Role::Customer };
        let admin = AuthUser { user_id: "a1".into(), role: Role::Admin };
        assert!(ensure_owner_or_admin(&owner, "c1").is_ok());
        assert!(ensure_owner_or_admin(&other, "c1").is_err());
        assert!(ensure_owner_or_admin(&admin, "c1").is_ok());
    }

    fn payment(id: &str, created_at: chrono::DateTime<Utc>, status: PaymentStatus) -> Payment {
        Payment {
            id: id.into(),
            order_id: "o1".into(),
            customer_id: "c1".into(),
            amount: 90.0,
            method: PaymentChannel::Upi,
            status,
            transaction_ref: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn test_only_latest_payment_is_mirrored() {
        let t0 = Utc::now();
        let first = payment("p1", t0, PaymentStatus::Failed);
        let retry = payment("p2", t0 + chrono::Duration::nanoseconds(123_457), PaymentStatus::Pending);

        // A late status change on the failed attempt must not overwrite the retry.
        assert!(!should_mirror(Some(&retry), &first));
        assert!(should_mirror(Some(&retry), &retry));

        let refreshed = payment("p2", retry.created_at, PaymentStatus::Completed);
        assert!(should_mirror(Some(&retry), &refreshed));
        assert!(!should_mirror(None, &first));
    }
}
