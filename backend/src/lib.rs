//! Water Conditions Service - Backend
//!
//! Keeps a fresh, classified snapshot of wind and wave conditions for every
//! monitored location and serves it to embeddable widgets.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod clock;
pub mod config;
pub mod error;
pub mod external;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

pub use config::Config;

use services::ConditionsService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub conditions: Arc<ConditionsService>,
    pub config: Arc<Config>,
}

/// Create the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    // Widgets are embedded on tenant sites, so any origin may read
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Root endpoint
async fn root() -> &'static str {
    "Water Conditions Service API v1.0"
}
