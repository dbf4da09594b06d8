//! Route definitions for the water conditions service

use axum::{routing::get, Router};

use crate::{handlers, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Embeddable widget routes (API key)
        .nest("/widget", widget_routes())
}

/// Widget routes, authenticated by tenant API key
fn widget_routes() -> Router<AppState> {
    Router::new()
        .route("/conditions", get(handlers::get_widget_conditions))
        .route("/conditions/:api_key", get(handlers::get_widget_conditions_by_key))
}
