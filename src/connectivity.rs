//! Connectivity detection and retry backoff
//!
//! The detector is host-driven: whatever layer observes the platform's
//! online/offline notifications calls [`ConnectivityDetector::set_online`] /
//! [`set_offline`]. Listeners fire on state transitions only, never on
//! registration. `wait_for_online` resolves immediately when already online.
//!
//! Backoff is exponential with a cap and optional ±25% uniform jitter, and
//! the retry wrapper honours an error's own `retry_after` hint when present.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;

use crate::error::SyncError;
use crate::logging::debug;

/// Observed connectivity state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
	Online,
	Offline,

	/// No observation yet
	Unknown,
}

type ConnListener = Box<dyn Fn(ConnState) + Send + Sync>;

/// Tracks online/offline transitions and wakes waiters on reconnect
pub struct ConnectivityDetector {
	state: Mutex<ConnState>,
	listeners: Mutex<Vec<(u64, ConnListener)>>,
	next_id: AtomicU64,
	online_notify: Notify,
}

impl ConnectivityDetector {
	pub fn new() -> Self {
		ConnectivityDetector {
			state: Mutex::new(ConnState::Unknown),
			listeners: Mutex::new(Vec::new()),
			next_id: AtomicU64::new(1),
			online_notify: Notify::new(),
		}
	}

	/// Detector that starts in a known state (tests, embedded hosts)
	pub fn with_state(initial: ConnState) -> Self {
		let detector = Self::new();
		*detector.state.lock().unwrap_or_else(|e| e.into_inner()) = initial;
		detector
	}

	pub fn get_state(&self) -> ConnState {
		*self.state.lock().unwrap_or_else(|e| e.into_inner())
	}

	pub fn is_online(&self) -> bool {
		self.get_state() == ConnState::Online
	}

	pub fn set_online(&self) {
		self.transition(ConnState::Online);
	}

	pub fn set_offline(&self) {
		self.transition(ConnState::Offline);
	}

	fn transition(&self, next: ConnState) {
		{
			let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
			if *state == next {
				return;
			}
			*state = next;
		}
		debug!("connectivity transition: {:?}", next);

		if next == ConnState::Online {
			self.online_notify.notify_waiters();
		}

		let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
		for (_, cb) in listeners.iter() {
			cb(next);
		}
	}

	/// Register a transition listener; returns an id for `unsubscribe`.
	/// The listener is NOT invoked for the current state.
	pub fn on_change(&self, cb: ConnListener) -> u64 {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		self.listeners.lock().unwrap_or_else(|e| e.into_inner()).push((id, cb));
		id
	}

	pub fn unsubscribe(&self, id: u64) {
		self.listeners
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.retain(|(listener_id, _)| *listener_id != id);
	}

	/// Detach every listener (teardown).
	///
	/// In-flight backoff waits are not interrupted; they resolve on their
	/// own schedule. Callers must not assume prompt abort.
	pub fn destroy(&self) {
		self.listeners.lock().unwrap_or_else(|e| e.into_inner()).clear();
	}

	/// Resolve once the detector is online; immediately if it already is
	pub async fn wait_for_online(&self) {
		loop {
			// Register interest before re-checking to avoid a lost wakeup
			let notified = self.online_notify.notified();
			if self.is_online() {
				return;
			}
			notified.await;
		}
	}
}

impl Default for ConnectivityDetector {
	fn default() -> Self {
		Self::new()
	}
}

/////////////
// Backoff //
/////////////

/// Exponential backoff parameters
#[derive(Debug, Clone)]
pub struct BackoffConfig {
	pub initial: Duration,
	pub max: Duration,
	pub multiplier: f64,

	/// Apply ±25% uniform jitter to each delay
	pub jitter: bool,
}

impl Default for BackoffConfig {
	fn default() -> Self {
		BackoffConfig {
			initial: Duration::from_secs(2),
			max: Duration::from_secs(60),
			multiplier: 2.0,
			jitter: true,
		}
	}
}

impl BackoffConfig {
	/// Delay before retry `attempt` (0-based): `min(initial × mult^n, max)`,
	/// jittered when enabled
	pub fn delay(&self, attempt: u32) -> Duration {
		let exp = self.initial.as_millis() as f64 * self.multiplier.powi(attempt as i32);
		let capped = exp.min(self.max.as_millis() as f64);

		let millis = if self.jitter {
			let factor = rand::thread_rng().gen_range(0.75..=1.25);
			capped * factor
		} else {
			capped
		};

		Duration::from_millis(millis as u64)
	}
}

/// Run `op`, retrying with exponential backoff on failure.
///
/// After `max_attempts` failures the last error is returned. An error
/// carrying its own `retry_after` hint overrides the computed delay.
pub async fn with_backoff<T, Fut>(
	mut op: impl FnMut() -> Fut,
	max_attempts: u32,
	cfg: &BackoffConfig,
) -> Result<T, SyncError>
where
	Fut: Future<Output = Result<T, SyncError>>,
{
	let mut last_err = None;

	for attempt in 0..max_attempts {
		match op().await {
			Ok(value) => return Ok(value),
			Err(err) => {
				let wait = match err.retry_after {
					Some(secs) => Duration::from_secs(secs),
					None => cfg.delay(attempt),
				};
				last_err = Some(err);

				if attempt + 1 < max_attempts {
					debug!(
						"attempt {} failed, retrying in {:?}",
						attempt + 1,
						wait
					);
					tokio::time::sleep(wait).await;
				}
			}
		}
	}

	Err(last_err.expect("max_attempts is at least 1"))
}


// vim: ts=4
