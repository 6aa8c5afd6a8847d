//! API Module
//!
//! HTTP handlers and routing for the cache server REST API.
//!
//! # Endpoints
//! - `PUT /set`, `PUT /add` - Store a value
//! - `GET /get/:key` - Retrieve a value by key
//! - `DELETE /del/:key` - Delete a key
//! - `GET /ttl/:key` - Remaining lifetime of a key
//! - `POST /incr/:key`, `POST /decr/:key` - Adjust a counter
//! - `GET /keys`, `DELETE /keys` - List or clear keys by pattern
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
