mod handlers;
mod state;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

use crate::geocode::EntityGeocoder;
pub use state::AppState;

pub fn build_router(geocoder: EntityGeocoder, provider_timeout: Duration) -> Router {
    let state = Arc::new(AppState {
        geocoder: Arc::new(geocoder),
        provider_timeout,
    });

    Router::new()
        .route("/api/geocode", get(handlers::geocode))
        .route("/api/distance", get(handlers::distance_between))
        .route("/api/nearest", post(handlers::nearest))
        .route("/api/sql", get(handlers::sql_projection))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start(host: &str, port: u16, geocoder: EntityGeocoder, provider_timeout: Duration) {
    let provider = geocoder.provider().name().to_string();
    let app = build_router(geocoder, provider_timeout);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            log::error!("Cannot bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    log::info!("geocoder server listening on http://{} (provider: {})", addr, provider);

    axum::serve(listener, app)
        .await
        .unwrap_or_else(|e| {
            log::error!("Server error: {}", e);
            std::process::exit(1);
        });
}
