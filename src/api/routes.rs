//! API Routes
//!
//! Configures the Axum router with all cache server endpoints.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    add_handler, clear_keys_handler, decr_handler, delete_handler, get_handler, health_handler,
    incr_handler, keys_handler, set_handler, ttl_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `PUT /set` - Store a value
/// - `PUT /add` - Store a value unless a live entry exists
/// - `GET /get/:key` - Retrieve a value by key
/// - `DELETE /del/:key` - Delete a key
/// - `GET /ttl/:key` - Remaining lifetime in seconds
/// - `POST /incr/:key`, `POST /decr/:key` - Adjust an integer counter
/// - `GET /keys` - List live keys, optionally by `?pattern=`
/// - `DELETE /keys` - Remove keys matching `?pattern=`
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/set", put(set_handler))
        .route("/add", put(add_handler))
        .route("/get/:key", get(get_handler))
        .route("/del/:key", delete(delete_handler))
        .route("/ttl/:key", get(ttl_handler))
        .route("/incr/:key", post(incr_handler))
        .route("/decr/:key", post(decr_handler))
        .route("/keys", get(keys_handler).delete(clear_keys_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
