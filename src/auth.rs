// src/auth.rs

use std::future::{ready, Ready};
use std::sync::OnceLock;

use actix_web::{dev::Payload, web, FromRequest, HttpMessage, HttpRequest, HttpResponse};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{error, info, warn};
use mongodb::bson::doc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app_state::AppState;
use crate::config::Config;
use crate::db::{self, MongoDB};
use crate::error::{ApiError, ApiResult};
use crate::models::{new_id, CustomerProfile, PublicUser, Role, Staff, User};

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

/// The authenticated caller, placed in request extensions by the
/// `Authentication` middleware.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub user_id: String,
    pub role: Role,
}

impl AuthUser {
    pub fn require(&self, roles: &[Role]) -> ApiResult<()> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "Access denied for role {}",
                self.role
            )))
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        AuthUser { user_id: claims.sub, role: claims.role }
    }
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthUser>()
                .cloned()
                .ok_or_else(|| ApiError::Unauthorized("No token provided".to_string())),
        )
    }
}

// JWT Creation
pub fn create_jwt(
    user_id: &str,
    role: Role,
    secret: &str,
    expiry_hours: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = Utc::now() + Duration::hours(expiry_hours);
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: expiration.timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))
}

// JWT Validation
pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

pub fn is_valid_email(email: &str) -> bool {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex"))
        .is_match(email)
}

pub fn is_valid_phone(phone: &str) -> bool {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    PHONE
        .get_or_init(|| Regex::new(r"^\+?[0-9]{10,15}$").expect("static regex"))
        .is_match(phone)
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub role: Option<String>,
    pub address: Option<String>,
    pub vehicle_number: Option<String>,
}

impl RegisterRequest {
    /// Checks the fields and returns the requested role.
    pub fn validate(&self) -> ApiResult<Role> {
        if self.name.trim().is_empty() {
            return Err(ApiError::bad_request("Name is required"));
        }
        if !is_valid_email(self.email.trim()) {
            return Err(ApiError::bad_request("A valid email is required"));
        }
        if self.password.len() < MIN_PASSWORD_LEN {
            return Err(ApiError::bad_request(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        if let Some(phone) = &self.phone {
            if !is_valid_phone(phone) {
                return Err(ApiError::bad_request("Invalid phone number"));
            }
        }
        let role = match &self.role {
            Some(r) => r.parse::<Role>().map_err(ApiError::BadRequest)?,
            None => Role::Customer,
        };
        if role == Role::Admin {
            return Err(ApiError::bad_request("Cannot self-register as admin"));
        }
        Ok(role)
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: PublicUser,
}

/// Inserts a user plus the role record that hangs off it (customer profile or
/// staff). If the second insert fails the user is removed again.
pub async fn create_account(db: &MongoDB, req: &RegisterRequest, role: Role) -> ApiResult<User> {
    let email = req.email.trim().to_ascii_lowercase();
    if db.users().find_one(doc! { "email": &email }).await?.is_some() {
        return Err(ApiError::bad_request("Email already registered"));
    }

    let now = Utc::now();
    let user = User {
        id: new_id(),
        name: req.name.trim().to_string(),
        email,
        phone: req.phone.clone(),
        password_hash: hash(&req.password, DEFAULT_COST)?,
        role,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    if let Err(e) = db.users().insert_one(&user).await {
        if db::is_duplicate_key(&e) {
            return Err(ApiError::bad_request("Email already registered"));
        }
        return Err(e.into());
    }

    let linked = match role {
        Role::Customer => {
            let profile = CustomerProfile {
                id: new_id(),
                user_id: user.id.clone(),
                name: user.name.clone(),
                phone: user.phone.clone(),
                address: req.address.clone(),
                location: None,
                fcm_token: None,
                created_at: now,
                updated_at: now,
            };
            db.customer_profiles().insert_one(&profile).await.map(|_| ())
        }
        Role::Staff => {
            let staff = Staff {
                id: new_id(),
                user_id: user.id.clone(),
                name: user.name.clone(),
                phone: user.phone.clone(),
                is_online: false,
                location: None,
                fcm_token: None,
                vehicle_number: req.vehicle_number.clone(),
                last_seen_at: None,
                created_at: now,
                updated_at: now,
            };
            db.staff().insert_one(&staff).await.map(|_| ())
        }
        Role::Admin => Ok(()),
    };

    if let Err(e) = linked {
        error!("Error creating {} record for user {}: {}", role, user.id, e);
        if let Err(cleanup) = db.users().delete_one(doc! { "_id": &user.id }).await {
            error!("Error rolling back user {}: {}", user.id, cleanup);
        }
        return Err(e.into());
    }

    info!("Created {} account {}", role, user.id);
    Ok(user)
}

fn auth_response(user: &User, config: &Config) -> ApiResult<AuthResponse> {
    let token = create_jwt(&user.id, user.role, &config.jwt_secret, config.jwt_expiry_hours)?;
    Ok(AuthResponse { token, user: PublicUser::from(user) })
}

// POST /api/auth/register
pub async fn register(
    data: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> ApiResult<HttpResponse> {
    let role = payload.validate()?;
    let user = create_account(&data.mongodb, &payload, role).await?;
    Ok(HttpResponse::Created().json(auth_response(&user, &data.config)?))
}

// POST /api/auth/login
pub async fn login(
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    let email = payload.email.trim().to_ascii_lowercase();
    let user = match data.mongodb.users().find_one(doc! { "email": &email }).await? {
        Some(user) => user,
        None => return Err(ApiError::Unauthorized("Invalid credentials".to_string())),
    };

    if !verify(&payload.password, &user.password_hash).unwrap_or(false) {
        warn!("Failed login for {}", email);
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }
    check_active(Some(&user))?;

    Ok(HttpResponse::Ok().json(auth_response(&user, &data.config)?))
}

// GET /api/auth/me
pub async fn me(auth: AuthUser, data: web::Data<AppState>) -> ApiResult<HttpResponse> {
    match data.mongodb.users().find_one(doc! { "_id": &auth.user_id }).await? {
        Some(user) => Ok(HttpResponse::Ok().json(json!({ "user": PublicUser::from(&user) }))),
        None => Err(ApiError::not_found("User not found")),
    }
}

/// Tokens outlive account changes, so state-changing handlers re-check the
/// caller's account before writing.
pub fn check_active(user: Option<&User>) -> ApiResult<()> {
    match user {
        Some(user) if user.is_active => Ok(()),
        Some(_) => Err(ApiError::forbidden("Account is deactivated")),
        None => Err(ApiError::Unauthorized("Account no longer exists".to_string())),
    }
}

pub async fn ensure_active(db: &MongoDB, auth: &AuthUser) -> ApiResult<()> {
    let user = db.users().find_one(doc! { "_id": &auth.user_id }).await?;
    check_active(user.as_ref())
}

/// Creates the bootstrap admin from `ADMIN_EMAIL`/`ADMIN_PASSWORD` if no user
/// with that email exists yet.
pub async fn ensure_admin(db: &MongoDB, config: &Config) -> ApiResult<()> {
    let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) else {
        return Ok(());
    };

    let req = RegisterRequest {
        name: "Administrator".to_string(),
        email: email.clone(),
        password: password.clone(),
        phone: None,
        role: None,
        address: None,
        vehicle_number: None,
    };
    if db.users().find_one(doc! { "email": email.to_ascii_lowercase() }).await?.is_some() {
        return Ok(());
    }
    create_account(db, &req, Role::Admin).await?;
    info!("Bootstrap admin {} created", email);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::errors::ErrorKind;

    fn register_request(role: Option<&str>) -> RegisterRequest {
        RegisterRequest {
            name: "Ravi".to_string(),
            email: "ravi@example.com".to_string(),
            password: "hunter22".to_string(),
            phone: Some("+919876543210".to_string()),
            role: role.map(str::to_string),
            address: Some("12 Lake Road".to_string()),
            vehicle_number: None,
        }
    }

    #[test]
    fn test_jwt_round_trip_keeps_role() {
        let token = create_jwt("user-1", Role::Staff, "s3cret", 1).unwrap();
        let claims = validate_jwt(&token, "s3cret").unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.role, Role::Staff);
    }

    #[test]
    fn test_jwt_wrong_secret_is_rejected() {
        let token = create_jwt("user-1", Role::Customer, "s3cret", 1).unwrap();
        let err = validate_jwt(&token, "other").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidSignature));
    }

    #[test]
    fn test_jwt_expired_is_rejected() {
        let token = create_jwt("user-1", Role::Customer, "s3cret", -2).unwrap();
        let err = validate_jwt(&token, "s3cret").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ExpiredSignature));
    }

    #[test]
    fn test_require_role() {
        let staff = AuthUser { user_id: "s".into(), role: Role::Staff };
        assert!(staff.require(&[Role::Staff, Role::Admin]).is_ok());
        assert!(matches!(staff.require(&[Role::Customer]), Err(ApiError::Forbidden(_))));
    }

    #[test]
    fn test_register_validation() {
        assert_eq!(register_request(None).validate().unwrap(), Role::Customer);
        assert_eq!(register_request(Some("staff")).validate().unwrap(), Role::Staff);
        assert!(register_request(Some("admin")).validate().is_err());
        assert!(register_request(Some("driver")).validate().is_err());

        let mut short = register_request(None);
        short.password = "12345".to_string();
        assert!(short.validate().is_err());

        let mut bad_email = register_request(None);
        bad_email.email = "ravi-at-example".to_string();
        assert!(bad_email.validate().is_err());

        let mut bad_phone = register_request(None);
        bad_phone.phone = Some("12-34".to_string());
        assert!(bad_phone.validate().is_err());
    }

    #[test]
    fn test_deactivated_or_deleted_accounts_are_refused() {
        let now = Utc::now();
        let mut user = User {
            id: "user-1".into(),
            name: "Ravi".into(),
            email: "ravi@example.com".into(),
            phone: None,
            password_hash: "x".into(),
            role: Role::Staff,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        assert!(check_active(Some(&user)).is_ok());

        user.is_active = false;
        assert!(matches!(check_active(Some(&user)), Err(ApiError::Forbidden(_))));
        assert!(matches!(check_active(None), Err(ApiError::Unauthorized(_))));
    }
}
