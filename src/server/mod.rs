//! HTTP surface for the sync protocol
//!
//! Three endpoints over an axum router:
//!
//! - `GET /files/sync`: cursored changed-file listing
//! - `GET /files/{id}`: conditional read (`If-None-Match` / 304)
//! - `PUT /files/{id}`: ETag-guarded write (`If-Match` / 412)
//!
//! Authentication lives upstream; this surface trusts the `X-User-Id`
//! header for per-user rate limiting.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::logging::info;
use crate::store::Store;

pub mod handlers;
pub mod ratelimit;

pub use ratelimit::{RateLimitConfig, RateLimiter};

/// Shared handler state
pub struct AppState {
	pub store: Arc<Store>,
	pub rate: RateLimiter,
}

impl AppState {
	pub fn new(store: Arc<Store>, rate_config: RateLimitConfig) -> Self {
		AppState { store, rate: RateLimiter::new(rate_config) }
	}
}

/// Assemble the sync router
pub fn create_router(state: Arc<AppState>) -> Router {
	Router::new()
		.route("/files/sync", get(handlers::pull_changes))
		.route("/files/:id", get(handlers::get_file).put(handlers::put_file))
		.with_state(state)
}

/// Bind and serve until the process exits
pub async fn serve(
	addr: SocketAddr,
	store: Arc<Store>,
	rate_config: RateLimitConfig,
) -> std::io::Result<()> {
	let state = Arc::new(AppState::new(store, rate_config));
	let app = create_router(state);

	let listener = tokio::net::TcpListener::bind(addr).await?;
	info!("sync server listening on {}", listener.local_addr()?);
	axum::serve(listener, app).await
}

// vim: ts=4
