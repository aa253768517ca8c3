//! Operation-log garbage collection
//!
//! Bounds the durable operation log two ways: synced operations age out
//! after a week, and any file holding more than the per-file cap is
//! compacted down to its unsynced operations plus the newest half-cap of
//! synced ones. Under storage pressure the age limit tightens to one day
//! for that run. A best-effort subsystem: scheduled runs swallow and log
//! every failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::StoreError;
use crate::logging::{debug, info, warn};
use crate::store::Store;

/// GC tuning knobs
#[derive(Debug, Clone)]
pub struct GcConfig {
	/// Age past which synced operations are deleted, ms
	pub max_op_age_ms: i64,

	/// Tightened age used when storage pressure is high, ms
	pub aggressive_op_age_ms: i64,

	/// Per-file operation cap before compaction
	pub max_ops_per_file: usize,

	/// Minimum spacing between unforced runs
	pub min_interval: Duration,

	/// Storage-usage fraction that triggers aggressive mode
	pub aggressive_threshold: f64,
}

impl Default for GcConfig {
	fn default() -> Self {
		GcConfig {
			max_op_age_ms: 7 * 24 * 60 * 60 * 1000,
			aggressive_op_age_ms: 24 * 60 * 60 * 1000,
			max_ops_per_file: 1000,
			min_interval: Duration::from_secs(5 * 60),
			aggressive_threshold: 0.8,
		}
	}
}

/// Result of one completed GC run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcStats {
	pub deleted_by_age: usize,
	pub files_compacted: usize,
	pub deleted_by_compaction: usize,
	pub aggressive: bool,
}

/// Age- and count-bounding collector over the operation log
pub struct OperationGc {
	store: Arc<Store>,
	config: GcConfig,
	last_run: Mutex<Option<Instant>>,
	running: AtomicBool,
}

impl OperationGc {
	pub fn new(store: Arc<Store>, config: GcConfig) -> Self {
		OperationGc { store, config, last_run: Mutex::new(None), running: AtomicBool::new(false) }
	}

	/// Run a collection pass.
	///
	/// Returns `Ok(None)` when the run was refused: another run is in
	/// flight, or the last run was under `min_interval` ago and `force`
	/// is not set.
	pub fn run(&self, force: bool) -> Result<Option<GcStats>, StoreError> {
		if !force {
			let last_run = self.last_run.lock().unwrap_or_else(|e| e.into_inner());
			if let Some(last) = *last_run {
				if last.elapsed() < self.config.min_interval {
					debug!("gc refused: last run {:?} ago", last.elapsed());
					return Ok(None);
				}
			}
		}

		if self.running.swap(true, Ordering::SeqCst) {
			debug!("gc refused: already running");
			return Ok(None);
		}

		let result = self.collect();
		self.running.store(false, Ordering::SeqCst);

		if result.is_ok() {
			*self.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
		}

		result.map(Some)
	}

	fn collect(&self) -> Result<GcStats, StoreError> {
		let mut stats = GcStats::default();

		let estimate = self.store.get_storage_estimate();
		stats.aggressive = estimate.percentage > self.config.aggressive_threshold;
		let max_age = if stats.aggressive {
			warn!(
				"storage at {:.0}%, tightening operation age bound",
				estimate.percentage * 100.0
			);
			self.config.aggressive_op_age_ms
		} else {
			self.config.max_op_age_ms
		};

		stats.deleted_by_age = self.store.delete_old_operations(max_age)?;

		for file_id in self.store.operation_file_ids()? {
			let ops = self.store.get_operations(&file_id)?;
			if ops.len() <= self.config.max_ops_per_file {
				continue;
			}

			// Keep every unsynced operation plus the newest synced ones up
			// to half the cap
			let keep_synced = self.config.max_ops_per_file / 2;
			let mut synced: Vec<_> = ops.iter().filter(|op| op.synced).cloned().collect();
			synced.sort_by_key(|op| std::cmp::Reverse(op.timestamp));
			synced.truncate(keep_synced);

			let mut kept: Vec<_> = ops.iter().filter(|op| !op.synced).cloned().collect();
			kept.extend(synced);
			kept.sort_by_key(|op| op.timestamp);

			stats.deleted_by_compaction += ops.len() - kept.len();
			stats.files_compacted += 1;
			self.store.replace_operations(&file_id, &kept)?;
		}

		if stats.deleted_by_age > 0 || stats.deleted_by_compaction > 0 {
			info!(
				"gc: {} aged out, {} compacted from {} files",
				stats.deleted_by_age, stats.deleted_by_compaction, stats.files_compacted
			);
		}

		Ok(stats)
	}

	/// Spawn a periodic runner; failures are logged and swallowed
	pub fn schedule(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
		let gc = self;
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
			// The first tick fires immediately; skip it so scheduling
			// does not imply an instant run
			ticker.tick().await;

			loop {
				ticker.tick().await;
				let gc = gc.clone();
				let result = tokio::task::spawn_blocking(move || gc.run(false)).await;
				match result {
					Ok(Err(e)) => warn!("scheduled gc failed: {}", e),
					Err(e) => warn!("scheduled gc panicked: {}", e),
					Ok(Ok(_)) => {}
				}
			}
		})
	}
}


// vim: ts=4
