// src/staff.rs

use actix_web::{web, HttpResponse};
use mongodb::bson::{doc, to_bson, Document};
use mongodb::options::ReturnDocument;
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::auth::{ensure_active, AuthUser};
use crate::db::{self, ListQuery, MongoDB};
use crate::error::{ApiError, ApiResult};
use crate::models::{GeoPoint, OrderStatus, Role, Staff};
use crate::notify;

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub is_online: bool,
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Deserialize)]
pub struct FcmTokenRequest {
    pub fcm_token: String,
}

pub async fn staff_for_user(db: &MongoDB, user_id: &str) -> ApiResult<Staff> {
    db.staff()
        .find_one(doc! { "user_id": user_id })
        .await?
        .ok_or_else(|| ApiError::not_found("Staff profile not found"))
}

/// Applies `$set` to the caller's staff record and returns the new version.
async fn update_own(db: &MongoDB, auth: &AuthUser, mut set: Document) -> ApiResult<Staff> {
    ensure_active(db, auth).await?;
    set.insert("updated_at", db::now_bson());
    db.staff()
        .find_one_and_update(doc! { "user_id": &auth.user_id }, doc! { "$set": set })
        .return_document(ReturnDocument::After)
        .await?
        .ok_or_else(|| ApiError::not_found("Staff profile not found"))
}

/// Orders a staff member has been given, optionally narrowed to one status.
pub fn assigned_filter(staff_id: &str, status: Option<OrderStatus>) -> Document {
    let mut filter = doc! { "assigned_staff_id": staff_id };
    if let Some(status) = status {
        filter.insert("status", status.as_str());
    }
    filter
}

/// Pending orders this staff member has not turned down.
pub fn available_filter(staff_id: &str) -> Document {
    doc! { "status": OrderStatus::Pending.as_str(), "rejected_by": { "$ne": staff_id } }
}

pub fn parse_status(raw: Option<&str>) -> ApiResult<Option<OrderStatus>> {
    raw.map(|s| s.parse::<OrderStatus>().map_err(ApiError::BadRequest))
        .transpose()
}

// GET /api/staff/me
pub async fn get_me(auth: AuthUser, data: web::Data<AppState>) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Staff])?;
    let staff = staff_for_user(&data.mongodb, &auth.user_id).await?;
    Ok(HttpResponse::Ok().json(staff))
}

// PUT /api/staff/status
pub async fn set_status(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<StatusRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Staff])?;

    let mut set = doc! { "is_online": payload.is_online, "last_seen_at": db::now_bson() };
    if let Some(location) = &payload.location {
        if !location.is_valid() {
            return Err(ApiError::bad_request("Invalid coordinates"));
        }
        set.insert("location", to_bson(location)?);
    }

    let staff = update_own(&data.mongodb, &auth, set).await?;
    notify::staff_presence(&data, &staff);
    Ok(HttpResponse::Ok().json(staff))
}

// PUT /api/staff/location
pub async fn update_location(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<GeoPoint>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Staff])?;
    if !payload.is_valid() {
        return Err(ApiError::bad_request("Invalid coordinates"));
    }
    let set = doc! { "location": to_bson(&*payload)?, "last_seen_at": db::now_bson() };
    let staff = update_own(&data.mongodb, &auth, set).await?;
    Ok(HttpResponse::Ok().json(staff))
}

// PUT /api/staff/fcm-token
pub async fn update_fcm_token(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<FcmTokenRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Staff])?;
    if payload.fcm_token.trim().is_empty() {
        return Err(ApiError::bad_request("fcm_token is required"));
    }
    update_own(&data.mongodb, &auth, doc! { "fcm_token": payload.fcm_token.trim() }).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "FCM token updated" })))
}

// GET /api/staff/orders
pub async fn my_orders(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Staff])?;
    let status = parse_status(query.status.as_deref())?;
    let staff = staff_for_user(&data.mongodb, &auth.user_id).await?;

    let orders = db::find_page(
        &data.mongodb.orders(),
        assigned_filter(&staff.id, status),
        &query.pagination(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(orders))
}

// GET /api/staff/available-orders
pub async fn available_orders(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Staff])?;
    let staff = staff_for_user(&data.mongodb, &auth.user_id).await?;

    let orders = db::find_page(
        &data.mongodb.orders(),
        available_filter(&staff.id),
        &query.pagination(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(orders))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assigned_filter() {
        assert_eq!(assigned_filter("s1", None), doc! { "assigned_staff_id": "s1" });
        assert_eq!(
            assigned_filter("s1", Some(OrderStatus::Transit)),
            doc! { "assigned_staff_id": "s1", "status": "transit" }
        );
    }

    #[test]
    fn test_available_filter_skips_rejections() {
        let filter = available_filter("s1");
        assert_eq!(filter.get_str("status").unwrap(), "pending");
        assert_eq!(filter.get_document("rejected_by").unwrap(), &doc! { "$ne": "s1" });
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status(None).unwrap(), None);
        assert_eq!(parse_status(Some("picked")).unwrap(), Some(OrderStatus::Picked));
        assert!(parse_status(Some("lost")).is_err());
    }
}
