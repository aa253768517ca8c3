//! Unified configuration for the DocSync engine and server
//!
//! Single source of truth for every tunable, following a priority chain:
//!
//! 1. Built-in defaults (`Config::default()`)
//! 2. Config file (`~/.docsync/config.toml` or an explicit path)
//! 3. Environment variables (`DOCSYNC_*` prefix, highest priority)

use std::env;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connectivity::BackoffConfig;
use crate::gc::GcConfig;
use crate::server::RateLimitConfig;
use crate::sync::SyncConfig;

/// Unified configuration for DocSync
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	// ========================================================================
	// RUNTIME & STATE
	// ========================================================================
	/// Home directory for DocSync state (~/.docsync)
	pub docsync_dir: PathBuf,

	/// Database file name inside the state directory
	pub db_file: String,

	// ========================================================================
	// SYNC
	// ========================================================================
	/// Server base URL the client engine pushes to and pulls from
	pub base_url: String,

	/// User identity for sync metadata and rate limiting
	pub user_id: String,

	/// Auto-sync period in seconds; 0 disables the timer
	pub auto_sync_secs: u64,

	/// Push attempts per file before skipping it
	pub push_attempts: u32,

	/// Pull page size (server caps at 100)
	pub pull_page_size: u32,

	// ========================================================================
	// BACKOFF
	// ========================================================================
	pub backoff_initial_secs: u64,
	pub backoff_max_secs: u64,
	pub backoff_multiplier: f64,
	pub backoff_jitter: bool,

	// ========================================================================
	// OPERATION-LOG GC
	// ========================================================================
	/// Age bound for synced operations, hours
	pub gc_max_op_age_hours: u64,

	/// Tightened age bound under storage pressure, hours
	pub gc_aggressive_age_hours: u64,

	pub gc_max_ops_per_file: usize,

	/// Minimum spacing between unforced runs, seconds
	pub gc_min_interval_secs: u64,

	/// Storage fraction that triggers aggressive mode
	pub gc_aggressive_threshold: f64,

	// ========================================================================
	// SERVER
	// ========================================================================
	/// Listen address for `docsync serve`
	pub listen_addr: String,

	pub rate_limit_requests: u32,
	pub rate_limit_window_secs: u64,

	// ========================================================================
	// CREDENTIAL ROTATION
	// ========================================================================
	/// Shared-store connection URL; None keeps rotation process-local
	pub redis_url: Option<String>,
}

impl Default for Config {
	fn default() -> Self {
		let home = env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."));
		Config {
			docsync_dir: home.join(".docsync"),
			db_file: "docsync.db".to_string(),
			base_url: "http://localhost:8787".to_string(),
			user_id: "local".to_string(),
			auto_sync_secs: 30,
			push_attempts: 3,
			pull_page_size: 50,
			backoff_initial_secs: 2,
			backoff_max_secs: 60,
			backoff_multiplier: 2.0,
			backoff_jitter: true,
			gc_max_op_age_hours: 7 * 24,
			gc_aggressive_age_hours: 24,
			gc_max_ops_per_file: 1000,
			gc_min_interval_secs: 5 * 60,
			gc_aggressive_threshold: 0.8,
			listen_addr: "127.0.0.1:8787".to_string(),
			rate_limit_requests: 60,
			rate_limit_window_secs: 60,
			redis_url: None,
		}
	}
}

impl Config {
	/// Load the config: defaults, then an optional TOML file, then
	/// `DOCSYNC_*` environment overrides
	pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
		let mut config = Config::default();

		let file = match path {
			Some(explicit) => Some(explicit.to_path_buf()),
			None => {
				let default_path = config.docsync_dir.join("config.toml");
				if default_path.exists() {
					Some(default_path)
				} else {
					None
				}
			}
		};

		if let Some(file) = file {
			let contents = std::fs::read_to_string(&file)
				.map_err(|e| ConfigError::Io { path: file.clone(), source: e })?;
			config = toml::from_str(&contents)
				.map_err(|e| ConfigError::Parse { path: file, message: e.to_string() })?;
		}

		config.apply_env();
		Ok(config)
	}

	fn apply_env(&mut self) {
		if let Ok(url) = env::var("DOCSYNC_BASE_URL") {
			self.base_url = url;
		}
		if let Ok(user) = env::var("DOCSYNC_USER_ID") {
			self.user_id = user;
		}
		if let Ok(addr) = env::var("DOCSYNC_LISTEN_ADDR") {
			self.listen_addr = addr;
		}
		if let Ok(url) = env::var("DOCSYNC_REDIS_URL") {
			self.redis_url = Some(url);
		}
		if let Ok(dir) = env::var("DOCSYNC_DIR") {
			self.docsync_dir = PathBuf::from(dir);
		}
	}

	pub fn db_path(&self) -> PathBuf {
		self.docsync_dir.join(&self.db_file)
	}

	pub fn backoff(&self) -> BackoffConfig {
		BackoffConfig {
			initial: Duration::from_secs(self.backoff_initial_secs),
			max: Duration::from_secs(self.backoff_max_secs),
			multiplier: self.backoff_multiplier,
			jitter: self.backoff_jitter,
		}
	}

	pub fn sync_config(&self) -> SyncConfig {
		SyncConfig {
			base_url: self.base_url.clone(),
			user_id: self.user_id.clone(),
			auto_sync_interval: if self.auto_sync_secs == 0 {
				None
			} else {
				Some(Duration::from_secs(self.auto_sync_secs))
			},
			push_attempts: self.push_attempts,
			pull_page_size: self.pull_page_size,
			backoff: self.backoff(),
		}
	}

	pub fn gc_config(&self) -> GcConfig {
		GcConfig {
			max_op_age_ms: self.gc_max_op_age_hours as i64 * 3600 * 1000,
			aggressive_op_age_ms: self.gc_aggressive_age_hours as i64 * 3600 * 1000,
			max_ops_per_file: self.gc_max_ops_per_file,
			min_interval: Duration::from_secs(self.gc_min_interval_secs),
			aggressive_threshold: self.gc_aggressive_threshold,
		}
	}

	pub fn rate_limit(&self) -> RateLimitConfig {
		RateLimitConfig {
			max_requests: self.rate_limit_requests,
			window: Duration::from_secs(self.rate_limit_window_secs),
		}
	}
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
	Io { path: PathBuf, source: std::io::Error },
	Parse { path: PathBuf, message: String },
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::Io { path, source } => {
				write!(f, "Failed to read config {}: {}", path.display(), source)
			}
			ConfigError::Parse { path, message } => {
				write!(f, "Failed to parse config {}: {}", path.display(), message)
			}
		}
	}
}

impl Error for ConfigError {}


// vim: ts=4
