use std::path::PathBuf;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};

use crate::api::handlers::{query, user, AppState};
use crate::api::middleware;

/// Build the application router: health, the API surface, and the SPA
/// fallback serving the bundled frontend when a build is present.
pub fn create_router(state: AppState) -> Router {
    let static_dir = PathBuf::from(&state.config.server.static_dir);

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/api/me", get(user::current_user))
        .route("/api/query/warehouse", post(query::warehouse_query))
        .route("/api/query/lakebase", post(query::lakebase_query))
        .layer(axum::middleware::from_fn(middleware::request_context))
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Static assets with index.html fallback for client-side routing
    if static_dir.join("index.html").is_file() {
        let spa = ServeDir::new(&static_dir)
            .fallback(ServeFile::new(static_dir.join("index.html")));
        router = router.fallback_service(spa);
    }

    router
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
