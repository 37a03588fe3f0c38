//! Route definitions

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::{HttpConfig, Live2dConfig};
use crate::Live2dApp;

use super::api;

/// Create the main router with all routes
pub fn create_router(app: Arc<Live2dApp>, http: &HttpConfig, live2d: &Live2dConfig) -> Router {
    let cors = if http.cors_enabled {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    let assets_prefix = format!("/{}", live2d.asset_url_prefix.trim_matches('/'));

    Router::new()
        // API endpoints (JSON)
        .route("/api/status", get(api::get_status))
        .route("/api/models", get(api::list_models))
        .route("/api/models/{name}", get(api::get_model))
        .route("/api/current", post(api::set_current_model))
        .route("/api/lipsync/stop", post(api::stop_lip_sync))
        // SSE stream of store changes
        .route("/api/stream", get(api::store_stream))
        // Model assets, the counterpart of the http asset source
        .nest_service(&assets_prefix, ServeDir::new(&live2d.assets_dir))
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}
