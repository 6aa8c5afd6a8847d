//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.
//!
//! Cache calls block on SQLite, so every handler hands its work to
//! `spawn_blocking`. Each blocking worker thread then holds its own
//! connection.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::Value;
use tracing::debug;

use crate::cache::Cache;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    validate_key, AddResponse, ClearResponse, CounterResponse, DeleteResponse, GetResponse,
    HealthResponse, IncrRequest, KeysQuery, KeysResponse, SetRequest, SetResponse, TtlResponse,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Cache shared by every request
    pub cache: Arc<Cache>,
}

impl AppState {
    /// Creates a new AppState around an open cache.
    pub fn new(cache: Cache) -> Self {
        Self {
            cache: Arc::new(cache),
        }
    }

    /// Opens the cache described by the configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(Cache::open(config.cache.clone())?))
    }

    /// Runs a cache call on the blocking pool.
    async fn run<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Cache) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        tokio::task::spawn_blocking(move || f(&cache))
            .await
            .map_err(|e| CacheError::Internal(format!("cache task failed: {}", e)))?
    }
}

/// Handler for PUT /set
///
/// Stores a value under a key, replacing any existing entry.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let ttl = req.ttl_or(state.cache.default_ttl());
    let key = req.key.clone();
    state
        .run(move |cache| cache.set(&req.key, &req.value, ttl))
        .await?;

    debug!("PUT /set {}", key);
    Ok(Json(SetResponse::new(key)))
}

/// Handler for PUT /add
///
/// Stores a value only when no live entry holds the key.
pub async fn add_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<AddResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let ttl = req.ttl_or(state.cache.default_ttl());
    let key = req.key.clone();
    let stored = state
        .run(move |cache| cache.add(&req.key, &req.value, ttl))
        .await?;

    Ok(Json(AddResponse::new(key, stored)))
}

/// Handler for GET /get/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    let lookup = key.clone();
    let value: Value = state.run(move |cache| cache.fetch(&lookup)).await?;

    Ok(Json(GetResponse::new(key, value)))
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let target = key.clone();
    let deleted = state.run(move |cache| cache.delete(&target)).await?;

    Ok(Json(DeleteResponse::new(key, deleted)))
}

/// Handler for GET /ttl/:key
pub async fn ttl_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<TtlResponse>> {
    let target = key.clone();
    let ttl = state.run(move |cache| cache.ttl(&target)).await?;

    Ok(Json(TtlResponse::new(key, ttl)))
}

/// Handler for POST /incr/:key
///
/// Optional `?delta=` query parameter, default 1.
pub async fn incr_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(req): Query<IncrRequest>,
) -> Result<Json<CounterResponse>> {
    let target = key.clone();
    let delta = req.delta();
    let value = state.run(move |cache| cache.incr(&target, delta)).await?;

    Ok(Json(CounterResponse::new(key, value)))
}

/// Handler for POST /decr/:key
pub async fn decr_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(req): Query<IncrRequest>,
) -> Result<Json<CounterResponse>> {
    let target = key.clone();
    let delta = req.delta();
    let value = state.run(move |cache| cache.decr(&target, delta)).await?;

    Ok(Json(CounterResponse::new(key, value)))
}

/// Handler for GET /keys
///
/// Lists live keys, filtered by `?pattern=` when given.
pub async fn keys_handler(
    State(state): State<AppState>,
    Query(query): Query<KeysQuery>,
) -> Result<Json<KeysResponse>> {
    let keys = state
        .run(move |cache| match query.pattern {
            Some(pattern) => cache.find_matching_keys(&pattern),
            None => cache.get_all_keys(),
        })
        .await?;

    Ok(Json(KeysResponse::new(keys)))
}

/// Handler for DELETE /keys
///
/// Requires a pattern; `%` clears everything.
pub async fn clear_keys_handler(
    State(state): State<AppState>,
    Query(query): Query<KeysQuery>,
) -> Result<Json<ClearResponse>> {
    let pattern = query
        .pattern
        .ok_or_else(|| CacheError::InvalidRequest("pattern is required".to_string()))?;
    if let Some(error_msg) = validate_key(&pattern) {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let removed = state
        .run(move |cache| cache.clear_matching_keys(&pattern))
        .await?;

    debug!("DELETE /keys removed {} rows", removed);
    Ok(Json(ClearResponse::new(removed)))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
