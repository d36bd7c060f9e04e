// src/admin.rs

use std::collections::BTreeMap;

use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use log::{info, warn};
use mongodb::bson::{doc, Bson, Document};
use mongodb::Collection;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app_state::AppState;
use crate::auth::{create_account, ensure_active, AuthUser, RegisterRequest};
use crate::db::{self, ListQuery, Pagination};
use crate::error::{ApiError, ApiResult};
use crate::events::SessionCount;
use crate::models::{OrderStatus, PaymentStatus, PublicUser, Role};
use crate::notify;
use crate::orders::{accept_as, load_order};
use crate::payments::order_payments_filter;

#[derive(Debug, Serialize, Default)]
pub struct Stats {
    pub orders_by_status: BTreeMap<String, i64>,
    pub total_orders: i64,
    pub completed_revenue: f64,
    pub users_by_role: BTreeMap<String, i64>,
    pub online_staff: u64,
    pub live_sessions: usize,
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub role: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StaffQuery {
    pub online: Option<bool>,
    pub page: Option<u64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub staff_id: String,
}

/// Runs a `$group` on `field` and returns `{group key: count}`.
async fn count_by<T: Send + Sync>(
    collection: &Collection<T>,
    field: &str,
) -> ApiResult<BTreeMap<String, i64>> {
    let pipeline = vec![doc! { "$group": { "_id": format!("${}", field), "count": { "$sum": 1 } } }];
    let mut cursor = collection.aggregate(pipeline).await?;

    let mut counts = BTreeMap::new();
    while let Some(row) = cursor.next().await {
        let row = row?;
        let key = match row.get("_id") {
            Some(Bson::String(s)) => s.clone(),
            _ => "unknown".to_string(),
        };
        counts.insert(key, numeric(row.get("count")) as i64);
    }
    Ok(counts)
}

fn numeric(value: Option<&Bson>) -> f64 {
    match value {
        Some(Bson::Int32(v)) => *v as f64,
        Some(Bson::Int64(v)) => *v as f64,
        Some(Bson::Double(v)) => *v,
        _ => 0.0,
    }
}

// GET /api/admin/stats
pub async fn get_stats(auth: AuthUser, data: web::Data<AppState>) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Admin])?;
    let db = &data.mongodb;

    let mut stats = Stats {
        orders_by_status: count_by(&db.orders(), "status").await?,
        users_by_role: count_by(&db.users(), "role").await?,
        ..Stats::default()
    };
    for status in OrderStatus::ALL {
        stats.orders_by_status.entry(status.as_str().to_string()).or_insert(0);
    }
    stats.total_orders = stats.orders_by_status.values().sum();

    let revenue_pipeline = vec![
        doc! { "$match": { "status": PaymentStatus::Completed.as_str() } },
        doc! { "$group": { "_id": Bson::Null, "total": { "$sum": "$amount" } } },
    ];
    let mut cursor = db.payments().aggregate(revenue_pipeline).await?;
    if let Some(row) = cursor.next().await {
        stats.completed_revenue = numeric(row?.get("total"));
    }

    stats.online_staff = db.staff().count_documents(doc! { "is_online": true }).await?;
    stats.live_sessions = match data.event_hub.send(SessionCount).await {
        Ok(count) => count,
        Err(e) => {
            warn!("Event hub unavailable for stats: {}", e);
            0
        }
    };

    Ok(HttpResponse::Ok().json(stats))
}

// GET /api/admin/users
pub async fn list_users(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<UserQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Admin])?;
    let mut filter = Document::new();
    if let Some(role) = &query.role {
        let role = role.parse::<Role>().map_err(ApiError::BadRequest)?;
        filter.insert("role", role.as_str());
    }

    let page = Pagination { page: query.page, limit: query.limit };
    let users = db::find_page(&data.mongodb.users(), filter, &page).await?;
    let users: Vec<PublicUser> = users.iter().map(PublicUser::from).collect();
    Ok(HttpResponse::Ok().json(users))
}

// PUT /api/admin/users/{id}/active
pub async fn set_user_active(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<ActiveRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Admin])?;
    if *path == auth.user_id && !payload.is_active {
        return Err(ApiError::bad_request("You cannot deactivate your own account"));
    }
    ensure_active(&data.mongodb, &auth).await?;

    let res = data
        .mongodb
        .users()
        .update_one(
            doc! { "_id": path.as_str() },
            doc! { "$set": { "is_active": payload.is_active, "updated_at": db::now_bson() } },
        )
        .await?;
    if res.matched_count == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    info!("User {} active={} (by {})", path, payload.is_active, auth.user_id);
    Ok(HttpResponse::Ok().json(json!({ "message": "User updated" })))
}

// DELETE /api/admin/users/{id}
pub async fn delete_user(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Admin])?;
    if *path == auth.user_id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }

    let db = &data.mongodb;
    ensure_active(db, &auth).await?;
    let res = db.users().delete_one(doc! { "_id": path.as_str() }).await?;
    if res.deleted_count == 0 {
        return Err(ApiError::not_found("User not found"));
    }
    db.customer_profiles().delete_one(doc! { "user_id": path.as_str() }).await?;
    db.staff().delete_one(doc! { "user_id": path.as_str() }).await?;

    info!("User {} deleted by {}", path, auth.user_id);
    Ok(HttpResponse::Ok().json(json!({ "message": "User deleted" })))
}

// GET /api/admin/customers
pub async fn list_customers(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Admin])?;
    let profiles =
        db::find_page(&data.mongodb.customer_profiles(), doc! {}, &query.pagination()).await?;
    Ok(HttpResponse::Ok().json(profiles))
}

// GET /api/admin/staff
pub async fn list_staff(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<StaffQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Admin])?;
    let mut filter = Document::new();
    if let Some(online) = query.online {
        filter.insert("is_online", online);
    }
    let page = Pagination { page: query.page, limit: query.limit };
    let staff = db::find_page(&data.mongodb.staff(), filter, &page).await?;
    Ok(HttpResponse::Ok().json(staff))
}

// POST /api/admin/staff
pub async fn create_staff(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Admin])?;
    let mut req = payload.into_inner();
    req.role = Some(Role::Staff.as_str().to_string());
    req.validate()?;
    ensure_active(&data.mongodb, &auth).await?;

    let user = create_account(&data.mongodb, &req, Role::Staff).await?;
    Ok(HttpResponse::Created().json(PublicUser::from(&user)))
}

// GET /api/admin/orders
pub async fn list_orders(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Admin])?;
    crate::orders::list_orders(auth, data, query).await
}

// PUT /api/admin/orders/{id}/assign
pub async fn assign_order(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<AssignRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Admin])?;
    ensure_active(&data.mongodb, &auth).await?;
    let staff = data
        .mongodb
        .staff()
        .find_one(doc! { "_id": &payload.staff_id })
        .await?
        .ok_or_else(|| ApiError::not_found("Staff not found"))?;

    let order = accept_as(&data.mongodb, &path, &staff, &auth).await?;
    notify::order_accepted(&data, &order, &staff).await;
    Ok(HttpResponse::Ok().json(order))
}

// DELETE /api/admin/orders/{id}
pub async fn delete_order(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Admin])?;
    ensure_active(&data.mongodb, &auth).await?;
    let order = load_order(&data.mongodb, &path).await?;
    data.mongodb.orders().delete_one(doc! { "_id": &order.id }).await?;
    let payments = data
        .mongodb
        .payments()
        .delete_many(order_payments_filter(&order.id))
        .await?;
    info!(
        "Order {} deleted by {} with {} payment(s)",
        order.id, auth.user_id, payments.deleted_count
    );
    Ok(HttpResponse::Ok().json(json!({ "message": "Order deleted" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_accepts_all_number_types() {
        assert_eq!(numeric(Some(&Bson::Int32(3))), 3.0);
        assert_eq!(numeric(Some(&Bson::Int64(4))), 4.0);
        assert_eq!(numeric(Some(&Bson::Double(2.5))), 2.5);
        assert_eq!(numeric(Some(&Bson::String("x".into()))), 0.0);
        assert_eq!(numeric(None), 0.0);
    }

    #[test]
    fn test_stats_serialize() {
        let mut stats = Stats::default();
        stats.orders_by_status.insert("pending".into(), 2);
        stats.total_orders = 2;
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["orders_by_status"]["pending"], 2);
        assert_eq!(json["live_sessions"], 0);
    }

    #[test]
    fn test_order_delete_cascades_to_its_payments() {
        let cascade = order_payments_filter("o1");
        assert_eq!(cascade, doc! { "order_id": "o1" });

        let now = chrono::Utc::now();
        let payment = crate::models::Payment {
            id: "p1".into(),
            order_id: "o1".into(),
            customer_id: "c1".into(),
            amount: 60.0,
            method: crate::models::PaymentChannel::Cash,
            status: PaymentStatus::Pending,
            transaction_ref: None,
            created_at: now,
            updated_at: now,
        };
        let stored = mongodb::bson::to_document(&payment).unwrap();
        assert_eq!(stored.get_str("order_id").unwrap(), cascade.get_str("order_id").unwrap());
    }
}
