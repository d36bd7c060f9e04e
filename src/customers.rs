// src/customers.rs

use actix_web::{web, HttpResponse};
use mongodb::bson::{doc, to_bson};
use mongodb::options::ReturnDocument;
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::auth::{ensure_active, is_valid_phone, AuthUser};
use crate::db::{self, ListQuery, MongoDB};
use crate::error::{ApiError, ApiResult};
use crate::models::{CustomerProfile, GeoPoint, Role};
use crate::staff::{parse_status, FcmTokenRequest};

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub location: Option<GeoPoint>,
}

pub async fn profile_for_user(db: &MongoDB, user_id: &str) -> ApiResult<CustomerProfile> {
    db.customer_profiles()
        .find_one(doc! { "user_id": user_id })
        .await?
        .ok_or_else(|| ApiError::not_found("Customer profile not found"))
}

// GET /api/customers/profile
pub async fn get_profile(auth: AuthUser, data: web::Data<AppState>) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Customer])?;
    let profile = profile_for_user(&data.mongodb, &auth.user_id).await?;
    Ok(HttpResponse::Ok().json(profile))
}

// PUT /api/customers/profile
pub async fn update_profile(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<UpdateProfileRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Customer])?;

    let mut update_doc = doc! {};
    if let Some(name) = &payload.name {
        if name.trim().is_empty() {
            return Err(ApiError::bad_request("Name cannot be empty"));
        }
        update_doc.insert("name", name.trim());
    }
    if let Some(phone) = &payload.phone {
        if !is_valid_phone(phone) {
            return Err(ApiError::bad_request("Invalid phone number"));
        }
        update_doc.insert("phone", phone);
    }
    if let Some(address) = &payload.address {
        update_doc.insert("address", address.trim());
    }
    if let Some(location) = &payload.location {
        if !location.is_valid() {
            return Err(ApiError::bad_request("Invalid coordinates"));
        }
        update_doc.insert("location", to_bson(location)?);
    }

    if update_doc.is_empty() {
        return Err(ApiError::bad_request("No fields to update"));
    }
    update_doc.insert("updated_at", db::now_bson());
    ensure_active(&data.mongodb, &auth).await?;

    let profile = data
        .mongodb
        .customer_profiles()
        .find_one_and_update(doc! { "user_id": &auth.user_id }, doc! { "$set": update_doc })
        .return_document(ReturnDocument::After)
        .await?
        .ok_or_else(|| ApiError::not_found("Customer profile not found"))?;

    Ok(HttpResponse::Ok().json(profile))
}

// PUT /api/customers/fcm-token
pub async fn update_fcm_token(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<FcmTokenRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Customer])?;
    if payload.fcm_token.trim().is_empty() {
        return Err(ApiError::bad_request("fcm_token is required"));
    }
    ensure_active(&data.mongodb, &auth).await?;

    let res = data
        .mongodb
        .customer_profiles()
        .update_one(
            doc! { "user_id": &auth.user_id },
            doc! { "$set": { "fcm_token": payload.fcm_token.trim(), "updated_at": db::now_bson() } },
        )
        .await?;
    if res.matched_count == 0 {
        return Err(ApiError::not_found("Customer profile not found"));
    }
    Ok(HttpResponse::Ok().json(json!({ "message": "FCM token updated" })))
}

// GET /api/customers/orders
pub async fn my_orders(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(&[Role::Customer])?;

    let mut filter = doc! { "customer_id": &auth.user_id };
    if let Some(status) = parse_status(query.status.as_deref())? {
        filter.insert("status", status.as_str());
    }
    let orders = db::find_page(&data.mongodb.orders(), filter, &query.pagination()).await?;
    Ok(HttpResponse::Ok().json(orders))
}
