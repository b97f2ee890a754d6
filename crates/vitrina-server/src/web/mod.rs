// crates/vitrina-server/src/web/mod.rs
// Web server layer for Vitrina

pub mod handlers;
pub mod sse;
pub mod state;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::web::state::AppState;

/// Create the web server router
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors(&state.settings.cors_origins);

    Router::new()
        // Direct search
        .route("/search", post(handlers::search))
        // Conversational pipeline
        .route("/chat/search", post(handlers::chat_search))
        .route("/chat/search/sse", get(sse::chat_search_sse))
        .route("/chat/search/load-more", post(handlers::load_more))
        // Liveness & dependencies
        .route("/health", get(handlers::health))
        .route("/live", get(handlers::live))
        .route("/ready", get(handlers::ready))
        // Operational metrics
        .route("/stats", get(handlers::stats))
        .route("/cache/stats", get(handlers::cache_stats))
        .route("/cache/clear", post(handlers::clear_cache))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "Skipping unparseable CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods(Any)
        .allow_headers(Any)
}
