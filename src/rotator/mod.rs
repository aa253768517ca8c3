//! Upstream API credential rotation
//!
//! Multiplexes a bounded pool of upstream secrets across requests. The
//! active index and per-index usage counters live in a shared store so
//! every process in the cluster sees the same rotation state; nothing is
//! cached between calls. A counter only advances after a confirmed
//! successful request, and a counter that reaches its limit is parked
//! behind a TTL cooldown while the pool moves on.

use std::env;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::logging::{debug, info, warn};

pub mod store;

pub use store::{MemoryStore, RedisStore, SharedStore};

/// Requests allowed per key before cooldown
const DEFAULT_REQUESTS_PER_KEY: u32 = 20;

/// Cooldown applied to an exhausted counter, seconds
const DEFAULT_COOLDOWN_TTL_SECS: u64 = 3600;

/// Upstream attempts before giving up
const MAX_UPSTREAM_ATTEMPTS: u32 = 6;

/// Largest supported pool (`GEMINI_KEY_1` .. `GEMINI_KEY_10`)
const MAX_ENV_KEYS: usize = 10;

const INDEX_KEY: &str = "api_keys:current_index";

fn usage_key(index: usize) -> String {
	format!("api_keys:usage:{}", index)
}

/// Rotation failures
#[derive(Debug)]
pub enum RotatorError {
	/// Shared store unreachable or returned garbage
	Store { message: String },

	/// No secrets configured
	NoKeys,

	/// Upstream failed with a non-rotatable error
	Upstream { message: String },

	/// All attempts exhausted across rotations
	Exhausted { attempts: u32, last: String },
}

impl fmt::Display for RotatorError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RotatorError::Store { message } => write!(f, "Shared store error: {}", message),
			RotatorError::NoKeys => write!(f, "No upstream API keys configured"),
			RotatorError::Upstream { message } => write!(f, "Upstream error: {}", message),
			RotatorError::Exhausted { attempts, last } => {
				write!(f, "Upstream failed after {} attempts: {}", attempts, last)
			}
		}
	}
}

impl Error for RotatorError {}

/// A key handed out for one upstream request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyLease {
	pub key: String,
	pub index: usize,
}

/// Snapshot of the pool for diagnostics
#[derive(Debug, Clone)]
pub struct RotationStatus {
	pub current_index: usize,
	pub usage: Vec<i64>,
	pub limit: u32,
}

/// Rotating credential pool over a shared store
pub struct KeyRotator {
	keys: Vec<String>,
	limit: u32,
	ttl_secs: u64,
	store: Arc<dyn SharedStore>,
}

impl KeyRotator {
	pub fn new(
		keys: Vec<String>,
		limit: u32,
		ttl_secs: u64,
		store: Arc<dyn SharedStore>,
	) -> Result<Self, RotatorError> {
		if keys.is_empty() {
			return Err(RotatorError::NoKeys);
		}
		Ok(KeyRotator { keys, limit, ttl_secs, store })
	}

	/// Build the pool from `GEMINI_KEY_1..GEMINI_KEY_10` (any contiguous
	/// prefix) and `GEMINI_REQUESTS_PER_KEY`
	pub fn from_env(store: Arc<dyn SharedStore>) -> Result<Self, RotatorError> {
		let mut keys = Vec::new();
		for i in 1..=MAX_ENV_KEYS {
			match env::var(format!("GEMINI_KEY_{}", i)) {
				Ok(key) if !key.is_empty() => keys.push(key),
				_ => break,
			}
		}

		let limit = env::var("GEMINI_REQUESTS_PER_KEY")
			.ok()
			.and_then(|v| v.parse().ok())
			.unwrap_or(DEFAULT_REQUESTS_PER_KEY);

		info!("credential pool: {} keys, {} requests per key", keys.len(), limit);
		Self::new(keys, limit, DEFAULT_COOLDOWN_TTL_SECS, store)
	}

	pub fn pool_size(&self) -> usize {
		self.keys.len()
	}

	/// The shared index, re-read on every call (never cached across calls)
	async fn current_index(&self) -> Result<usize, RotatorError> {
		let raw = self.store.get(INDEX_KEY).await?;
		let index = raw.and_then(|v| v.parse::<usize>().ok()).unwrap_or(0);
		Ok(index % self.keys.len())
	}

	async fn usage_count(&self, index: usize) -> Result<i64, RotatorError> {
		let raw = self.store.get(&usage_key(index)).await?;
		Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
	}

	async fn advance(&self, from: usize) -> Result<usize, RotatorError> {
		let next = (from + 1) % self.keys.len();
		self.store.set(INDEX_KEY, &next.to_string()).await?;
		self.store.set(&usage_key(next), "0").await?;
		Ok(next)
	}

	/// Pick the key for a request WITHOUT incrementing its counter.
	///
	/// When the active counter has reached its limit, the old counter gets
	/// the cooldown TTL and the pool advances before handing out a key.
	pub async fn get_api_key_for_request(&self) -> Result<ApiKeyLease, RotatorError> {
		let index = self.current_index().await?;
		let usage = self.usage_count(index).await?;

		if usage >= self.limit as i64 {
			self.store.expire(&usage_key(index), self.ttl_secs).await?;
			let next = self.advance(index).await?;
			debug!("key {} exhausted ({} uses), advancing to {}", index, usage, next);
			return Ok(ApiKeyLease { key: self.keys[next].clone(), index: next });
		}

		Ok(ApiKeyLease { key: self.keys[index].clone(), index })
	}

	/// Count one successful request against the key. Attaches the cooldown
	/// TTL the moment the counter reaches its limit. Never call on failure.
	pub async fn confirm_api_key_usage(&self, index: usize) -> Result<i64, RotatorError> {
		let count = self.store.incr(&usage_key(index)).await?;
		if count >= self.limit as i64 {
			self.store.expire(&usage_key(index), self.ttl_secs).await?;
			debug!("key {} reached its limit, cooldown attached", index);
		}
		Ok(count)
	}

	/// Advance unconditionally after an upstream technical failure.
	///
	/// Deliberately leaves the abandoned counter without a TTL; a key
	/// abandoned mid-window stays hot until a limit-driven rotation parks
	/// it.
	pub async fn force_key_rotation_and_get_key(&self) -> Result<ApiKeyLease, RotatorError> {
		let index = self.current_index().await?;
		let next = self.advance(index).await?;
		warn!("forced rotation: {} -> {}", index, next);
		Ok(ApiKeyLease { key: self.keys[next].clone(), index: next })
	}

	/// Upstream status codes that warrant switching keys
	pub fn should_rotate_on_error(code: u16) -> bool {
		matches!(code, 400 | 401 | 403 | 429 | 500 | 502 | 503 | 504)
	}

	/// First run of three consecutive digits in the error's string form;
	/// 0 when none
	pub fn extract_error_code(err: &str) -> u16 {
		let bytes = err.as_bytes();
		for window_start in 0..bytes.len().saturating_sub(2) {
			let window = &bytes[window_start..window_start + 3];
			if window.iter().all(|b| b.is_ascii_digit()) {
				return err[window_start..window_start + 3].parse().unwrap_or(0);
			}
		}
		0
	}

	pub async fn get_rotation_status(&self) -> Result<RotationStatus, RotatorError> {
		let current_index = self.current_index().await?;
		let mut usage = Vec::with_capacity(self.keys.len());
		for index in 0..self.keys.len() {
			usage.push(self.usage_count(index).await?);
		}
		Ok(RotationStatus { current_index, usage, limit: self.limit })
	}

	/// Run an upstream call under the rotation protocol: lease a key, on
	/// success confirm it, on a rotatable error force-rotate and retry (up
	/// to 6 attempts total). Non-rotatable errors propagate immediately
	/// and are never confirmed.
	pub async fn with_rotation<T, Fut>(
		&self,
		mut op: impl FnMut(ApiKeyLease) -> Fut,
	) -> Result<T, RotatorError>
	where
		Fut: Future<Output = Result<T, Box<dyn Error + Send + Sync>>>,
	{
		let mut last = String::new();

		for attempt in 0..MAX_UPSTREAM_ATTEMPTS {
			let lease = if attempt == 0 {
				self.get_api_key_for_request().await?
			} else {
				self.force_key_rotation_and_get_key().await?
			};

			match op(lease.clone()).await {
				Ok(value) => {
					self.confirm_api_key_usage(lease.index).await?;
					return Ok(value);
				}
				Err(e) => {
					let message = e.to_string();
					let code = Self::extract_error_code(&message);
					if !Self::should_rotate_on_error(code) {
						return Err(RotatorError::Upstream { message });
					}
					warn!(
						"upstream error {} on key {} (attempt {}), rotating",
						code,
						lease.index,
						attempt + 1
					);
					last = message;
				}
			}
		}

		Err(RotatorError::Exhausted { attempts: MAX_UPSTREAM_ATTEMPTS, last })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn pool(keys: usize, limit: u32) -> (KeyRotator, Arc<MemoryStore>) {
		let store = Arc::new(MemoryStore::new());
		let keys: Vec<String> = (1..=keys).map(|i| format!("k{}", i)).collect();
		let rotator = KeyRotator::new(keys, limit, 3600, store.clone()).unwrap();
		(rotator, store)
	}

	#[tokio::test]
	async fn test_lease_does_not_increment() {
		let (rotator, _store) = pool(3, 20);

		let lease = rotator.get_api_key_for_request().await.unwrap();
		assert_eq!(lease, ApiKeyLease { key: "k1".to_string(), index: 0 });

		let status = rotator.get_rotation_status().await.unwrap();
		assert_eq!(status.usage[0], 0);
	}

	#[tokio::test]
	async fn test_confirm_counts_and_limits() {
		let (rotator, store) = pool(3, 20);

		for _ in 0..19 {
			rotator.confirm_api_key_usage(0).await.unwrap();
		}
		assert!(!store.has_ttl(&usage_key(0)));

		// The limit-reaching confirm attaches the cooldown
		let count = rotator.confirm_api_key_usage(0).await.unwrap();
		assert_eq!(count, 20);
		assert!(store.has_ttl(&usage_key(0)));
	}

	#[tokio::test]
	async fn test_rotation_at_limit() {
		let (rotator, _store) = pool(3, 20);

		for _ in 0..20 {
			let lease = rotator.get_api_key_for_request().await.unwrap();
			assert_eq!(lease.index, 0);
			rotator.confirm_api_key_usage(lease.index).await.unwrap();
		}

		// Request 21 switches to index 1 with a fresh counter and does not
		// increment it
		let lease = rotator.get_api_key_for_request().await.unwrap();
		assert_eq!(lease, ApiKeyLease { key: "k2".to_string(), index: 1 });

		let status = rotator.get_rotation_status().await.unwrap();
		assert_eq!(status.current_index, 1);
		assert_eq!(status.usage[1], 0);

		rotator.confirm_api_key_usage(lease.index).await.unwrap();
		let status = rotator.get_rotation_status().await.unwrap();
		assert_eq!(status.usage[1], 1);
	}

	#[tokio::test]
	async fn test_forced_rotation_skips_ttl() {
		let (rotator, store) = pool(3, 20);

		rotator.confirm_api_key_usage(0).await.unwrap();
		let lease = rotator.force_key_rotation_and_get_key().await.unwrap();

		assert_eq!(lease, ApiKeyLease { key: "k2".to_string(), index: 1 });
		let status = rotator.get_rotation_status().await.unwrap();
		assert_eq!(status.usage[1], 0);
		// Forced rotation alone never parks the abandoned counter
		assert!(!store.has_ttl(&usage_key(0)));
	}

	#[tokio::test]
	async fn test_rotation_wraps_modulo_pool() {
		let (rotator, _store) = pool(2, 20);

		let lease = rotator.force_key_rotation_and_get_key().await.unwrap();
		assert_eq!(lease.index, 1);
		let lease = rotator.force_key_rotation_and_get_key().await.unwrap();
		assert_eq!(lease.index, 0);
	}

	#[test]
	fn test_should_rotate_on_error() {
		for code in [400u16, 401, 403, 429, 500, 502, 503, 504] {
			assert!(KeyRotator::should_rotate_on_error(code), "{} should rotate", code);
		}
		for code in [200u16, 404, 409, 412] {
			assert!(!KeyRotator::should_rotate_on_error(code), "{} should not rotate", code);
		}
	}

	#[test]
	fn test_extract_error_code() {
		assert_eq!(KeyRotator::extract_error_code("status 429: too many requests"), 429);
		assert_eq!(KeyRotator::extract_error_code("[500] internal"), 500);
		assert_eq!(KeyRotator::extract_error_code("no digits here"), 0);
		assert_eq!(KeyRotator::extract_error_code("v2 error"), 0);
		// First three-digit run wins
		assert_eq!(KeyRotator::extract_error_code("got 502 after 429"), 502);
	}

	#[tokio::test]
	async fn test_with_rotation_confirms_on_success() {
		let (rotator, _store) = pool(3, 20);

		let result = rotator
			.with_rotation(|lease| async move { Ok::<_, Box<dyn Error + Send + Sync>>(lease.key) })
			.await
			.unwrap();

		assert_eq!(result, "k1");
		let status = rotator.get_rotation_status().await.unwrap();
		assert_eq!(status.usage[0], 1);
	}

	#[tokio::test]
	async fn test_with_rotation_rotates_on_rate_limit() {
		let (rotator, store) = pool(3, 20);

		let result = rotator
			.with_rotation(|lease| async move {
				if lease.index == 0 {
					Err("status 429: rate limited".to_string().into())
				} else {
					Ok::<_, Box<dyn Error + Send + Sync>>(lease.index)
				}
			})
			.await
			.unwrap();

		assert_eq!(result, 1);
		let status = rotator.get_rotation_status().await.unwrap();
		// Failed attempt on key 0 was never confirmed
		assert_eq!(status.usage[0], 0);
		assert_eq!(status.usage[1], 1);
		assert!(!store.has_ttl(&usage_key(0)));
	}

	#[tokio::test]
	async fn test_with_rotation_propagates_non_rotatable() {
		let (rotator, _store) = pool(3, 20);

		let result: Result<(), _> = rotator
			.with_rotation(|_| async { Err("status 404: gone".to_string().into()) })
			.await;

		assert!(matches!(result, Err(RotatorError::Upstream { .. })));
	}

	#[tokio::test]
	async fn test_with_rotation_exhausts_after_six_attempts() {
		let (rotator, _store) = pool(2, 20);
		let mut calls = 0;

		let result: Result<(), _> = rotator
			.with_rotation(|_| {
				calls += 1;
				async { Err("status 503: unavailable".to_string().into()) }
			})
			.await;

		assert_eq!(calls, 6);
		assert!(matches!(result, Err(RotatorError::Exhausted { attempts: 6, .. })));
	}

	#[tokio::test]
	async fn test_empty_pool_is_rejected() {
		let store = Arc::new(MemoryStore::new());
		assert!(matches!(
			KeyRotator::new(Vec::new(), 20, 3600, store),
			Err(RotatorError::NoKeys)
		));
	}
}

// vim: ts=4
