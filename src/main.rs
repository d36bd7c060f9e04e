// src/main.rs

mod admin;
mod app_state;
mod auth;
mod config;
mod customers;
mod db;
mod error;
mod events;
mod models;
mod notify;
mod orders;
mod payments;
mod push;
mod staff;
mod ws;

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix::Actor;
use actix_cors::Cors;
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http,
    middleware::Logger,
    web, App, Error, HttpMessage, HttpServer, ResponseError,
};
use env_logger::Env;
use futures::future::{ok, Ready};
use log::{error, info};

use crate::app_state::AppState;
use crate::auth::{validate_jwt, AuthUser};
use crate::error::ApiError;
use crate::events::EventHub;
use crate::push::PushClient;

/// Resolves `Authorization: Bearer <jwt>` into an `AuthUser` extension.
/// Requests without the header pass through; handlers that need a caller
/// reject them via the `AuthUser` extractor. A bad token is a 401 here.
#[derive(Clone)]
pub struct Authentication {
    secret: Rc<String>,
}

impl Authentication {
    pub fn new(secret: impl Into<String>) -> Self {
        Authentication { secret: Rc::new(secret.into()) }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware { service, secret: self.secret.clone() })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: Rc<String>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let bearer = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string());

        if let Some(token) = bearer {
            match validate_jwt(&token, &self.secret) {
                Ok(claims) => {
                    req.extensions_mut().insert(AuthUser::from(claims));
                }
                Err(e) => {
                    let (req_parts, _payload) = req.into_parts();
                    let resp = ApiError::Unauthorized(format!("Invalid token: {}", e))
                        .error_response()
                        .map_into_boxed_body();
                    let srv_resp = ServiceResponse::new(req_parts, resp);
                    return Box::pin(async move { Ok(srv_resp) });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        ApiError::bad_request(format!("Invalid request body: {}", err)).into()
    })
}

fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| {
        ApiError::bad_request(format!("Invalid query string: {}", err)).into()
    })
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(query_config())
        .service(
            web::scope("/api")
                .service(
                    web::scope("/auth")
                        .route("/register", web::post().to(auth::register))
                        .route("/login", web::post().to(auth::login))
                        .route("/me", web::get().to(auth::me)),
                )
                .service(
                    web::scope("/customers")
                        .route("/profile", web::get().to(customers::get_profile))
                        .route("/profile", web::put().to(customers::update_profile))
                        .route("/fcm-token", web::put().to(customers::update_fcm_token))
                        .route("/orders", web::get().to(customers::my_orders)),
                )
                .service(
                    web::scope("/orders")
                        .route("", web::post().to(orders::create_order))
                        .route("", web::get().to(orders::list_orders))
                        .route("/{id}", web::get().to(orders::get_order))
                        .route("/{id}/accept", web::put().to(orders::accept_order))
                        .route("/{id}/reject", web::put().to(orders::reject_order))
                        .route("/{id}/status", web::put().to(orders::update_order_status))
                        .route("/{id}/cancel", web::put().to(orders::cancel_order)),
                )
                .service(
                    web::scope("/staff")
                        .route("/me", web::get().to(staff::get_me))
                        .route("/status", web::put().to(staff::set_status))
                        .route("/location", web::put().to(staff::update_location))
                        .route("/fcm-token", web::put().to(staff::update_fcm_token))
                        .route("/orders", web::get().to(staff::my_orders))
                        .route("/available-orders", web::get().to(staff::available_orders)),
                )
                .service(
                    web::scope("/admin")
                        .route("/stats", web::get().to(admin::get_stats))
                        .route("/users", web::get().to(admin::list_users))
                        .route("/users/{id}/active", web::put().to(admin::set_user_active))
                        .route("/users/{id}", web::delete().to(admin::delete_user))
                        .route("/customers", web::get().to(admin::list_customers))
                        .route("/staff", web::get().to(admin::list_staff))
                        .route("/staff", web::post().to(admin::create_staff))
                        .route("/orders", web::get().to(admin::list_orders))
                        .route("/orders/{id}/assign", web::put().to(admin::assign_order))
                        .route("/orders/{id}", web::delete().to(admin::delete_order)),
                )
                .service(
                    web::scope("/payments")
                        .route("", web::post().to(payments::create_payment))
                        .route("", web::get().to(payments::list_payments))
                        .route("/order/{order_id}", web::get().to(payments::payments_for_order))
                        .route("/{id}", web::get().to(payments::get_payment))
                        .route("/{id}/status", web::put().to(payments::update_payment_status)),
                ),
        )
        .service(web::resource("/ws").route(web::get().to(ws::ws_index)));
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = config::Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let mongodb = db::MongoDB::init(&config.mongo_uri, &config.database_name)
        .await
        .map(Arc::new)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    if let Err(e) = mongodb.ensure_indexes().await {
        error!("Could not create indexes: {}", e);
    }
    if let Err(e) = auth::ensure_admin(&mongodb, &config).await {
        error!("Could not bootstrap admin account: {}", e);
    }

    let event_hub = EventHub::new().start();
    let push = PushClient::from_config(&config);
    if !push.is_enabled() {
        info!("FCM_SERVER_KEY not set, push notifications disabled");
    }

    let state = AppState { event_hub, mongodb, push, config: config.clone() };
    let frontend_origin = config.frontend_origin.clone();

    info!("Server running at http://{}", config.bind_addr);
    info!("Allowed CORS Origin: {}", frontend_origin);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Authentication::new(state.config.jwt_secret.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(configure_routes)
    })
    .bind(&config.bind_addr)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::create_jwt;
    use crate::config::Config;
    use crate::models::Role;
    use actix_web::test;
    use serde_json::{json, Value};

    async fn test_state() -> AppState {
        let config = Config::for_tests();
        let mongodb = db::MongoDB::init(&config.mongo_uri, &config.database_name)
            .await
            .expect("client options");
        AppState {
            event_hub: EventHub::new().start(),
            mongodb: Arc::new(mongodb),
            push: PushClient::from_config(&config),
            config,
        }
    }

    fn bearer(role: Role) -> (http::header::HeaderName, String) {
        let token = create_jwt("user-1", role, &Config::for_tests().jwt_secret, 1).unwrap();
        (http::header::AUTHORIZATION, format!("Bearer {}", token))
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .wrap(Authentication::new($state.config.jwt_secret.clone()))
                    .app_data(web::Data::new($state.clone()))
                    .configure(configure_routes),
            )
            .await
        };
    }

    async fn message_of(resp: ServiceResponse) -> String {
        let body: Value = test::read_body_json(resp).await;
        body["message"].as_str().unwrap_or_default().to_string()
    }

    #[actix_web::test]
    async fn test_missing_token_is_unauthorized() {
        let state = test_state().await;
        let app = app!(state);

        let req = test::TestRequest::put().uri("/api/orders/o1/accept").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::UNAUTHORIZED);
        assert_eq!(message_of(resp).await, "No token provided");
    }

    #[actix_web::test]
    async fn test_invalid_token_is_unauthorized() {
        let state = test_state().await;
        let app = app!(state);

        let req = test::TestRequest::get()
            .uri("/api/orders")
            .insert_header((http::header::AUTHORIZATION, "Bearer not-a-jwt"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_customer_cannot_accept_orders() {
        let state = test_state().await;
        let app = app!(state);

        let req = test::TestRequest::put()
            .uri("/api/orders/o1/accept")
            .insert_header(bearer(Role::Customer))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn test_order_with_zero_quantity_is_rejected() {
        let state = test_state().await;
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/api/orders")
            .insert_header(bearer(Role::Customer))
            .set_json(json!({ "quantity": 0, "delivery_address": "12 Lake Road" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::BAD_REQUEST);
        assert_eq!(message_of(resp).await, "Quantity must be at least 1");
    }

    #[actix_web::test]
    async fn test_staff_cannot_place_orders() {
        let state = test_state().await;
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/api/orders")
            .insert_header(bearer(Role::Staff))
            .set_json(json!({ "quantity": 2 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn test_customer_cannot_mark_delivered() {
        let state = test_state().await;
        let app = app!(state);

        let req = test::TestRequest::put()
            .uri("/api/orders/o1/status")
            .insert_header(bearer(Role::Customer))
            .set_json(json!({ "status": "delivered" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn test_unknown_status_is_bad_request() {
        let state = test_state().await;
        let app = app!(state);

        let req = test::TestRequest::put()
            .uri("/api/orders/o1/status")
            .insert_header(bearer(Role::Admin))
            .set_json(json!({ "status": "teleported" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_admin_routes_require_admin() {
        let state = test_state().await;
        let app = app!(state);

        for role in [Role::Customer, Role::Staff] {
            let req = test::TestRequest::get()
                .uri("/api/admin/stats")
                .insert_header(bearer(role))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), http::StatusCode::FORBIDDEN);
        }
    }

    #[actix_web::test]
    async fn test_only_admin_updates_payment_status() {
        let state = test_state().await;
        let app = app!(state);

        let req = test::TestRequest::put()
            .uri("/api/payments/p1/status")
            .insert_header(bearer(Role::Customer))
            .set_json(json!({ "status": "completed" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn test_register_validation_runs_before_storage() {
        let state = test_state().await;
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({
                "name": "Root",
                "email": "root@example.com",
                "password": "longenough",
                "role": "admin",
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_malformed_json_is_bad_request() {
        let state = test_state().await;
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .insert_header((http::header::CONTENT_TYPE, "application/json"))
            .set_payload("{ not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_staff_location_validated() {
        let state = test_state().await;
        let app = app!(state);

        let req = test::TestRequest::put()
            .uri("/api/staff/location")
            .insert_header(bearer(Role::Staff))
            .set_json(json!({ "lat": 123.0, "lng": 10.0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::BAD_REQUEST);
    }
}
