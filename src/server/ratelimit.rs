//! Per-user fixed-window rate limiting for the pull endpoint

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Rate limit tuning
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
	pub max_requests: u32,
	pub window: Duration,
}

impl Default for RateLimitConfig {
	fn default() -> Self {
		RateLimitConfig { max_requests: 60, window: Duration::from_secs(60) }
	}
}

/// Fixed-window counter per user id
pub struct RateLimiter {
	config: RateLimitConfig,
	windows: Mutex<HashMap<String, (Instant, u32)>>,
}

impl RateLimiter {
	pub fn new(config: RateLimitConfig) -> Self {
		RateLimiter { config, windows: Mutex::new(HashMap::new()) }
	}

	/// Count a request; `Err(retry_after_secs)` when the user is over
	/// the limit
	pub fn check(&self, user_id: &str) -> Result<(), u64> {
		let now = Instant::now();
		let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

		let entry = windows.entry(user_id.to_string()).or_insert((now, 0));
		if now.duration_since(entry.0) >= self.config.window {
			*entry = (now, 0);
		}

		if entry.1 >= self.config.max_requests {
			let elapsed = now.duration_since(entry.0);
			let retry_after = self.config.window.saturating_sub(elapsed).as_secs().max(1);
			return Err(retry_after);
		}

		entry.1 += 1;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_allows_up_to_limit() {
		let limiter = RateLimiter::new(RateLimitConfig {
			max_requests: 3,
			window: Duration::from_secs(60),
		});

		for _ in 0..3 {
			assert!(limiter.check("u1").is_ok());
		}
		let retry_after = limiter.check("u1").unwrap_err();
		assert!(retry_after >= 1 && retry_after <= 60);
	}

	#[test]
	fn test_users_are_independent() {
		let limiter = RateLimiter::new(RateLimitConfig {
			max_requests: 1,
			window: Duration::from_secs(60),
		});

		assert!(limiter.check("u1").is_ok());
		assert!(limiter.check("u1").is_err());
		assert!(limiter.check("u2").is_ok());
	}
}

// vim: ts=4
