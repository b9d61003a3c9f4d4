// HTTP query API and live viewer WebSocket

pub mod query;
pub mod websocket;

pub use query::{create_query_router, QueryAppState};
pub use websocket::{create_ws_router, ws_handler, WsAppState};

use axum::http::{HeaderValue, Method};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

/// Full HTTP surface: query routes and `/ws`, behind the CORS allow-list.
pub fn router(
    query_state: Arc<QueryAppState>,
    ws_state: Arc<WsAppState>,
    cors_origins: &[String],
) -> Router {
    Router::new()
        .merge(create_query_router(query_state))
        .merge(create_ws_router(ws_state))
        .layer(cors_layer(cors_origins))
}

/// CORS layer allowing GET from the configured dashboard origins.
///
/// Origins that are not valid header values are skipped.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET])
}
