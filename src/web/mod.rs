//! HTTP control surface
//!
//! JSON API over the model manager, an SSE stream of store changes, and static
//! serving of the Live2D asset directory.

pub mod api;
pub mod routes;
pub mod sse;

use axum::Router;
use std::sync::Arc;

use crate::config::{HttpConfig, Live2dConfig};
use crate::Live2dApp;

/// Web server for the API and model assets
pub struct WebServer {
    app: Arc<Live2dApp>,
    http: HttpConfig,
    live2d: Live2dConfig,
}

impl WebServer {
    /// Create a new web server
    pub fn new(app: Arc<Live2dApp>, http: &HttpConfig, live2d: &Live2dConfig) -> Self {
        Self {
            app,
            http: http.clone(),
            live2d: live2d.clone(),
        }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        routes::create_router(Arc::clone(&self.app), &self.http, &self.live2d)
    }
}
