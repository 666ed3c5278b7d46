use crate::auth::AuthService;
use crate::mpesa::MpesaClient;
use crate::{auth, bookings, payments, studios};
use axum::routing::{get, patch, post};
use axum::Router;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub auth: AuthService,
    pub mpesa: MpesaClient,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route(
            "/studios",
            get(studios::list_studios).post(studios::create_studio),
        )
        .route("/studios/manager", post(studios::create_manager))
        .route(
            "/studios/:id",
            get(studios::get_studio)
                .put(studios::update_studio)
                .delete(studios::delete_studio),
        )
        .route(
            "/bookings",
            get(bookings::list_bookings).post(bookings::create_booking),
        )
        .route(
            "/bookings/:id",
            get(bookings::get_booking).delete(bookings::delete_booking),
        )
        .route("/bookings/:id/status", patch(bookings::update_booking_status))
        .route("/payments/initiate", post(payments::initiate_payment))
        .route("/payments/callback", post(payments::mpesa_callback))
        .route("/payments/:id", get(payments::payment_status))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn health_check() -> &'static str {
    "OK"
}
