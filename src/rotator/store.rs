//! Shared-store backends for rotation state
//!
//! The rotator assumes a multi-process deployment and leans entirely on the
//! store's atomic operations (`GET`, `SET`, `INCR`, `EXPIRE`). Production
//! uses Redis; tests and single-node runs use the in-memory store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::RotatorError;

/// Minimal atomic key-value contract the rotator needs
#[async_trait]
pub trait SharedStore: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<String>, RotatorError>;

	async fn set(&self, key: &str, value: &str) -> Result<(), RotatorError>;

	/// Atomic increment; missing keys start from 0. Preserves any TTL.
	async fn incr(&self, key: &str) -> Result<i64, RotatorError>;

	/// Attach a time-to-live to an existing key
	async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), RotatorError>;
}

//////////////////
// Memory store //
//////////////////

struct MemoryEntry {
	value: String,
	expires_at: Option<Instant>,
}

impl MemoryEntry {
	fn is_expired(&self) -> bool {
		self.expires_at.map_or(false, |at| Instant::now() >= at)
	}
}

/// Process-local store with Redis-like TTL semantics; tests and
/// single-instance deployments
pub struct MemoryStore {
	entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		MemoryStore { entries: Mutex::new(HashMap::new()) }
	}

	/// Whether a live key currently carries a TTL (test introspection)
	pub fn has_ttl(&self, key: &str) -> bool {
		let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
		entries.get(key).map_or(false, |e| !e.is_expired() && e.expires_at.is_some())
	}
}

impl Default for MemoryStore {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl SharedStore for MemoryStore {
	async fn get(&self, key: &str) -> Result<Option<String>, RotatorError> {
		let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
		if entries.get(key).map_or(false, |e| e.is_expired()) {
			entries.remove(key);
		}
		Ok(entries.get(key).map(|e| e.value.clone()))
	}

	async fn set(&self, key: &str, value: &str) -> Result<(), RotatorError> {
		let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
		entries
			.insert(key.to_string(), MemoryEntry { value: value.to_string(), expires_at: None });
		Ok(())
	}

	async fn incr(&self, key: &str) -> Result<i64, RotatorError> {
		let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

		let expired = entries.get(key).map_or(false, |e| e.is_expired());
		if expired {
			entries.remove(key);
		}

		match entries.get_mut(key) {
			Some(entry) => {
				let current: i64 = entry.value.parse().map_err(|_| RotatorError::Store {
					message: format!("non-numeric counter at {}", key),
				})?;
				entry.value = (current + 1).to_string();
				Ok(current + 1)
			}
			None => {
				entries
					.insert(key.to_string(), MemoryEntry { value: "1".to_string(), expires_at: None });
				Ok(1)
			}
		}
	}

	async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), RotatorError> {
		let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
		if let Some(entry) = entries.get_mut(key) {
			entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
		}
		Ok(())
	}
}

/////////////////
// Redis store //
/////////////////

/// Redis-backed shared store; the cluster-visible deployment path
pub struct RedisStore {
	conn: ConnectionManager,
}

impl RedisStore {
	pub async fn connect(url: &str) -> Result<Self, RotatorError> {
		let client = redis::Client::open(url)
			.map_err(|e| RotatorError::Store { message: e.to_string() })?;
		let conn = ConnectionManager::new(client)
			.await
			.map_err(|e| RotatorError::Store { message: e.to_string() })?;
		Ok(RedisStore { conn })
	}
}

#[async_trait]
impl SharedStore for RedisStore {
	async fn get(&self, key: &str) -> Result<Option<String>, RotatorError> {
		let mut conn = self.conn.clone();
		conn.get(key).await.map_err(|e: redis::RedisError| RotatorError::Store {
			message: e.to_string(),
		})
	}

	async fn set(&self, key: &str, value: &str) -> Result<(), RotatorError> {
		let mut conn = self.conn.clone();
		conn.set(key, value).await.map_err(|e: redis::RedisError| RotatorError::Store {
			message: e.to_string(),
		})
	}

	async fn incr(&self, key: &str) -> Result<i64, RotatorError> {
		let mut conn = self.conn.clone();
		conn.incr(key, 1i64).await.map_err(|e: redis::RedisError| RotatorError::Store {
			message: e.to_string(),
		})
	}

	async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), RotatorError> {
		let mut conn = self.conn.clone();
		let _: i64 = conn.expire(key, ttl_secs as i64).await.map_err(
			|e: redis::RedisError| RotatorError::Store { message: e.to_string() },
		)?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_memory_get_set() {
		let store = MemoryStore::new();
		assert_eq!(store.get("k").await.unwrap(), None);

		store.set("k", "v").await.unwrap();
		assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
	}

	#[tokio::test]
	async fn test_memory_incr_from_missing() {
		let store = MemoryStore::new();
		assert_eq!(store.incr("counter").await.unwrap(), 1);
		assert_eq!(store.incr("counter").await.unwrap(), 2);
		assert_eq!(store.get("counter").await.unwrap(), Some("2".to_string()));
	}

	#[tokio::test]
	async fn test_memory_expire_evicts() {
		let store = MemoryStore::new();
		store.set("k", "v").await.unwrap();
		store.expire("k", 0).await.unwrap();

		// TTL of zero expires immediately
		assert_eq!(store.get("k").await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_memory_incr_restarts_after_expiry() {
		let store = MemoryStore::new();
		store.set("counter", "19").await.unwrap();
		store.expire("counter", 0).await.unwrap();

		assert_eq!(store.incr("counter").await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_has_ttl() {
		let store = MemoryStore::new();
		store.set("k", "v").await.unwrap();
		assert!(!store.has_ttl("k"));

		store.expire("k", 3600).await.unwrap();
		assert!(store.has_ttl("k"));
	}
}

// vim: ts=4
