//! Sync orchestration: push of dirty files, cursored pull, conflict driving
//!
//! One manager per user session. A cycle runs push before pull so a freshly
//! pushed file is never clobbered by a stale server copy within the same
//! cycle, and every per-file mutation happens under that file's lock. The
//! manager owns the engine status stream and the single conflict-callback
//! slot; it never resolves a conflict on its own.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::future;

use crate::checkpoint::{CheckpointManager, CheckpointReason};
use crate::conflict::{resolve_conflict, Conflict, FileVersion, ResolutionStrategy};
use crate::connectivity::{with_backoff, BackoffConfig, ConnState, ConnectivityDetector};
use crate::error::{ErrorHandler, ErrorKind, StoreError, SyncError};
use crate::etag::compare_etags;
use crate::locks::FileLockManager;
use crate::logging::{debug, info, warn};
use crate::metrics::PerformanceMonitor;
use crate::store::Store;
use crate::types::{
	FileRecord, RemoteFile, ServerVersion, SyncCycleResult, SyncMetadata, SyncStatus,
};
use crate::util::{millis_from_iso, now_millis};

pub mod client;

pub use client::{PushOutcome, SyncClient};

/// Sync manager tuning
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// Server base URL, e.g. `http://localhost:8787`
	pub base_url: String,

	/// User whose metadata row this manager owns
	pub user_id: String,

	/// Auto-sync period; None disables the timer
	pub auto_sync_interval: Option<Duration>,

	/// Per-file push attempts before the file is skipped
	pub push_attempts: u32,

	/// Page size for the pull loop
	pub pull_page_size: u32,

	pub backoff: BackoffConfig,
}

impl Default for SyncConfig {
	fn default() -> Self {
		SyncConfig {
			base_url: "http://localhost:8787".to_string(),
			user_id: "local".to_string(),
			auto_sync_interval: Some(Duration::from_secs(30)),
			push_attempts: 3,
			pull_page_size: 50,
			backoff: BackoffConfig::default(),
		}
	}
}

type ConflictCallback = Arc<dyn Fn(&Conflict) -> ResolutionStrategy + Send + Sync>;
type StatusCallback = Box<dyn Fn(SyncStatus) + Send + Sync>;

/// Outcome of pushing one file
#[derive(Debug)]
enum PushResult {
	Pushed,
	AlreadyClean,
	Missing,
	Conflicted,
	Skipped(String),

	/// Aborts the whole cycle (auth, quota, network-down, rate limit)
	Fatal(SyncError),
}

/// Outcome of merging one remote file
enum PullApply {
	Pulled,
	Skipped,
	Conflicted,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct QueuedSync {
	priority: i32,
	seq: u64,
	file_id: String,
}

/// Orchestrates push/pull cycles against the server
pub struct SyncManager {
	/// Back-reference for the timer and reconnect tasks
	self_ref: Weak<SyncManager>,

	store: Arc<Store>,
	client: SyncClient,
	detector: Arc<ConnectivityDetector>,
	locks: FileLockManager,
	checkpoints: CheckpointManager,
	monitor: Arc<PerformanceMonitor>,
	errors: Arc<ErrorHandler>,
	config: SyncConfig,

	status: Mutex<SyncStatus>,
	status_listeners: Mutex<Vec<(u64, StatusCallback)>>,
	listener_seq: AtomicU64,

	/// Single mutable slot; the UI installs exactly one resolver
	conflict_cb: Mutex<Option<ConflictCallback>>,

	syncing: AtomicBool,
	queue: Mutex<BinaryHeap<Reverse<QueuedSync>>>,
	queue_seq: AtomicU64,

	auto_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
	detector_sub: Mutex<Option<u64>>,
}

impl SyncManager {
	pub fn new(
		store: Arc<Store>,
		detector: Arc<ConnectivityDetector>,
		config: SyncConfig,
	) -> Arc<Self> {
		let initial = if detector.get_state() == ConnState::Offline {
			SyncStatus::Offline
		} else {
			SyncStatus::Idle
		};

		Arc::new_cyclic(|self_ref| SyncManager {
			self_ref: self_ref.clone(),
			client: SyncClient::new(&config.base_url, &config.user_id),
			checkpoints: CheckpointManager::new(store.clone()),
			locks: FileLockManager::new(),
			monitor: Arc::new(PerformanceMonitor::new()),
			errors: Arc::new(ErrorHandler::new()),
			store,
			detector,
			config,
			status: Mutex::new(initial),
			status_listeners: Mutex::new(Vec::new()),
			listener_seq: AtomicU64::new(1),
			conflict_cb: Mutex::new(None),
			syncing: AtomicBool::new(false),
			queue: Mutex::new(BinaryHeap::new()),
			queue_seq: AtomicU64::new(0),
			auto_task: Mutex::new(None),
			detector_sub: Mutex::new(None),
		})
	}

	/// Wire the auto-sync timer and the reconnect trigger.
	///
	/// Must be called from within the tokio runtime; the reconnect trigger
	/// spawns a cycle when the detector comes back online while the engine
	/// is in the offline state.
	pub fn start(&self) {
		if let Some(period) = self.config.auto_sync_interval {
			let weak = self.self_ref.clone();
			let handle = tokio::spawn(async move {
				let mut ticker = tokio::time::interval(period);
				ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
				// interval fires immediately; the first sync should wait a
				// full period
				ticker.tick().await;

				loop {
					ticker.tick().await;
					match weak.upgrade() {
						Some(manager) => {
							let _ = manager.sync().await;
						}
						None => break,
					}
				}
			});
			*self.auto_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
		}

		let weak = self.self_ref.clone();
		let sub = self.detector.on_change(Box::new(move |state| {
			if state != ConnState::Online {
				return;
			}
			if let Some(manager) = weak.upgrade() {
				if manager.status() == SyncStatus::Offline {
					tokio::spawn(async move {
						let _ = manager.sync().await;
					});
				}
			}
		}));
		*self.detector_sub.lock().unwrap_or_else(|e| e.into_inner()) = Some(sub);
	}

	/// Stop timers and listeners and clear the advisory in-progress flag
	pub fn destroy(&self) {
		if let Some(handle) = self.auto_task.lock().unwrap_or_else(|e| e.into_inner()).take() {
			handle.abort();
		}
		if let Some(sub) = self.detector_sub.lock().unwrap_or_else(|e| e.into_inner()).take() {
			self.detector.unsubscribe(sub);
		}
		self.locks.release_all();

		if let Ok(Some(mut meta)) = self.store.get_metadata(&self.config.user_id) {
			if meta.sync_in_progress {
				meta.sync_in_progress = false;
				let _ = self.store.save_metadata(&meta);
			}
		}
	}

	pub fn status(&self) -> SyncStatus {
		*self.status.lock().unwrap_or_else(|e| e.into_inner())
	}

	pub fn error_handler(&self) -> &ErrorHandler {
		&self.errors
	}

	pub fn monitor(&self) -> &PerformanceMonitor {
		&self.monitor
	}

	/// Subscribe to status transitions; returns an id for
	/// [`unsubscribe_status`]
	pub fn on_status_change(&self, cb: StatusCallback) -> u64 {
		let id = self.listener_seq.fetch_add(1, Ordering::Relaxed);
		self.status_listeners.lock().unwrap_or_else(|e| e.into_inner()).push((id, cb));
		id
	}

	pub fn unsubscribe_status(&self, id: u64) {
		self.status_listeners
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.retain(|(listener_id, _)| *listener_id != id);
	}

	/// Install the conflict resolver. Replaces any previous callback.
	pub fn set_conflict_callback(
		&self,
		cb: impl Fn(&Conflict) -> ResolutionStrategy + Send + Sync + 'static,
	) {
		*self.conflict_cb.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(cb));
	}

	fn conflict_callback(&self) -> Option<ConflictCallback> {
		self.conflict_cb.lock().unwrap_or_else(|e| e.into_inner()).clone()
	}

	/// Enqueue a file for the next cycle; lower priority numbers push first
	pub fn queue_sync(&self, file_id: &str, priority: i32) {
		let seq = self.queue_seq.fetch_add(1, Ordering::Relaxed);
		self.queue.lock().unwrap_or_else(|e| e.into_inner()).push(Reverse(QueuedSync {
			priority,
			seq,
			file_id: file_id.to_string(),
		}));
	}

	fn set_status(&self, next: SyncStatus) {
		{
			let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
			if *status == next {
				return;
			}
			*status = next;
		}
		debug!("sync status: {}", next);

		let listeners = self.status_listeners.lock().unwrap_or_else(|e| e.into_inner());
		for (_, cb) in listeners.iter() {
			cb(next);
		}
	}

	fn status_for_failure(kind: ErrorKind) -> SyncStatus {
		if kind == ErrorKind::Network {
			SyncStatus::Offline
		} else {
			SyncStatus::Error
		}
	}

	/// Run one full push-then-pull cycle.
	///
	/// Re-entry is refused while a cycle is in flight, and the cycle is
	/// refused outright while offline.
	pub async fn sync(&self) -> SyncCycleResult {
		if self.syncing.swap(true, Ordering::SeqCst) {
			return SyncCycleResult::refused("Sync already in progress");
		}

		let result = self.run_cycle().await;
		self.syncing.store(false, Ordering::SeqCst);
		result
	}

	async fn run_cycle(&self) -> SyncCycleResult {
		if !self.detector.is_online() {
			self.set_status(SyncStatus::Offline);
			return SyncCycleResult::refused("Offline");
		}

		self.set_status(SyncStatus::Syncing);
		let timing = self.monitor.start_timing("sync_cycle", None);
		let mut result = SyncCycleResult::default();

		// Push phase: queued files first, then the remaining dirty set
		let ordered = match self.dirty_files_in_order() {
			Ok(ordered) => ordered,
			Err(e) => {
				let err = SyncError::from(e);
				self.errors.handle(&err);
				self.set_status(SyncStatus::Error);
				self.monitor.stop_timing(&timing, false);
				result.success = false;
				result.message = Some(err.to_string());
				return result;
			}
		};

		for file_id in ordered {
			let outcome = self.locks.with_lock(&file_id, self.push_locked(&file_id)).await;
			match outcome {
				PushResult::Pushed => result.pushed += 1,
				PushResult::Conflicted => result.conflicts.push(file_id),
				PushResult::Skipped(message) => {
					result.errors.push(format!("{}: {}", file_id, message))
				}
				PushResult::AlreadyClean | PushResult::Missing => {}
				PushResult::Fatal(err) => {
					self.set_status(Self::status_for_failure(err.kind));
					self.monitor.stop_timing(&timing, false);
					result.success = false;
					result.message = Some(err.to_string());
					return result;
				}
			}
		}

		// Pull phase
		if let Err(err) = self.pull_phase(&mut result).await {
			self.errors.handle(&err);
			self.set_status(Self::status_for_failure(err.kind));
			self.monitor.stop_timing(&timing, false);
			result.success = false;
			result.message = Some(err.to_string());
			return result;
		}

		self.set_status(SyncStatus::Idle);
		self.monitor.stop_timing(&timing, true);
		info!(
			"sync cycle complete: {} pushed, {} pulled, {} conflicts",
			result.pushed,
			result.pulled,
			result.conflicts.len()
		);
		result
	}

	/// Push a single dirty file outside the regular cycle
	pub async fn sync_file(&self, file_id: &str) -> SyncCycleResult {
		if !self.detector.is_online() {
			self.set_status(SyncStatus::Offline);
			return SyncCycleResult::refused("Offline");
		}

		let mut result = SyncCycleResult::default();
		let outcome = self.locks.with_lock(file_id, self.push_locked(file_id)).await;
		match outcome {
			PushResult::Pushed => result.pushed = 1,
			PushResult::Conflicted => result.conflicts.push(file_id.to_string()),
			PushResult::Skipped(message) => {
				result.success = false;
				result.errors.push(format!("{}: {}", file_id, message));
			}
			PushResult::AlreadyClean => {}
			PushResult::Missing => {
				result.success = false;
				result.message = Some(format!("unknown file {}", file_id));
			}
			PushResult::Fatal(err) => {
				self.set_status(Self::status_for_failure(err.kind));
				result.success = false;
				result.message = Some(err.to_string());
			}
		}
		result
	}

	fn dirty_files_in_order(&self) -> Result<Vec<String>, StoreError> {
		let dirty: Vec<String> =
			self.store.get_dirty_files()?.into_iter().map(|f| f.id).collect();

		let mut queued = Vec::new();
		{
			let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
			while let Some(Reverse(item)) = queue.pop() {
				queued.push(item.file_id);
			}
		}

		let mut ordered = Vec::new();
		for id in queued {
			if dirty.contains(&id) && !ordered.contains(&id) {
				ordered.push(id);
			}
		}
		for id in dirty {
			if !ordered.contains(&id) {
				ordered.push(id);
			}
		}
		Ok(ordered)
	}

	/// Push one file; the caller holds its lock.
	///
	/// A 412 whose callback chose `Local` adopts the server ETag and loops
	/// exactly once more; a second 412 inside that retry is left for the
	/// next cycle.
	async fn push_locked(&self, file_id: &str) -> PushResult {
		let mut accept_local_retried = false;

		loop {
			let file = match self.store.get_file(file_id) {
				Ok(Some(file)) => file,
				Ok(None) => return PushResult::Missing,
				Err(e) => return PushResult::Skipped(e.to_string()),
			};
			if !file.is_dirty {
				return PushResult::AlreadyClean;
			}

			let checkpoint =
				match self.checkpoints.create_checkpoint(file_id, CheckpointReason::PreSync) {
					Ok(id) => id,
					Err(e) => return PushResult::Skipped(e.to_string()),
				};

			let outcome = with_backoff(
				|| {
					self.client.push_file(
						&file.id,
						&file.title,
						&file.content,
						Some(&file.etag),
					)
				},
				self.config.push_attempts,
				&self.config.backoff,
			)
			.await;

			match outcome {
				Ok(PushOutcome::Accepted(response)) => {
					if let Err(e) = self.commit_push(&file, &response.etag, response.version) {
						// The server accepted but the local commit failed;
						// roll back to the pre-push snapshot so the file
						// stays dirty and retries
						let _ = self.checkpoints.rollback(&checkpoint);
						return PushResult::Skipped(e.to_string());
					}
					self.checkpoints.remove_checkpoint(&checkpoint);
					debug!("pushed {} at version {}", file.id, response.version);
					return PushResult::Pushed;
				}

				Ok(PushOutcome::PreconditionFailed(server)) => {
					// Nothing local was mutated; the checkpoint is moot
					self.checkpoints.remove_checkpoint(&checkpoint);

					let conflict = self.build_conflict(&file, &server);
					let callback = match self.conflict_callback() {
						Some(cb) => cb,
						None => return PushResult::Conflicted,
					};

					match callback(&conflict) {
						ResolutionStrategy::Local => {
							// Adopt the server tag so the next PUT's
							// precondition matches, keep our content
							let mut record = file.clone();
							record.etag = server.etag.clone();
							record.is_dirty = true;
							if let Err(e) = self.store.save_file(&record) {
								return PushResult::Skipped(e.to_string());
							}
							if accept_local_retried {
								// A third party raced us again; next
								// cycle's problem
								return PushResult::Conflicted;
							}
							accept_local_retried = true;
							continue;
						}
						ResolutionStrategy::Server => {
							if let Err(e) = self.accept_server_copy(&file, &server) {
								return PushResult::Skipped(e.to_string());
							}
							return PushResult::Conflicted;
						}
						ResolutionStrategy::Merge => {
							// The UI produces merged content via the
							// resolver and pushes it separately
							return PushResult::Conflicted;
						}
					}
				}

				Err(err) => {
					let _ = self.checkpoints.rollback(&checkpoint);
					self.errors.handle(&err);
					// Network and rate-limit failures pause the whole cycle;
					// server errors already got their in-file retries and
					// only cost this file
					match err.kind {
						ErrorKind::Auth
						| ErrorKind::QuotaExceeded
						| ErrorKind::Network
						| ErrorKind::RateLimit => return PushResult::Fatal(err),
						_ => return PushResult::Skipped(err.to_string()),
					}
				}
			}
		}
	}

	/// Install the server acknowledgement locally and retire the pushed
	/// operations
	fn commit_push(
		&self,
		file: &FileRecord,
		new_etag: &str,
		new_version: u64,
	) -> Result<(), StoreError> {
		let mut record = file.clone();
		record.version = new_version;
		self.store.save_file(&record)?;
		self.store.mark_file_clean(&file.id, new_etag)?;

		let op_ids: Vec<String> = self
			.store
			.get_unsynced_operations(&file.id)?
			.into_iter()
			.map(|op| op.id)
			.collect();
		if !op_ids.is_empty() {
			self.store.mark_operations_synced(&op_ids)?;
		}
		Ok(())
	}

	fn accept_server_copy(
		&self,
		file: &FileRecord,
		server: &ServerVersion,
	) -> Result<(), StoreError> {
		let mut record = file.clone();
		record.content = server.content.clone();
		record.version = server.version;
		self.store.save_file(&record)?;
		self.store.mark_file_clean(&file.id, &server.etag)?;
		Ok(())
	}

	fn build_conflict(&self, file: &FileRecord, server: &ServerVersion) -> Conflict {
		Conflict {
			file_id: file.id.clone(),
			local: FileVersion {
				content: file.content.clone(),
				etag: file.etag.clone(),
				version: file.version,
				last_modified: file.last_modified,
			},
			server: FileVersion {
				content: server.content.clone(),
				etag: server.etag.clone(),
				version: server.version,
				last_modified: millis_from_iso(&server.updated_at).unwrap_or(0),
			},
			operations: self.store.get_unsynced_operations(&file.id).unwrap_or_default(),
			detected_at: now_millis(),
		}
	}

	//////////
	// Pull //
	//////////

	async fn pull_phase(&self, result: &mut SyncCycleResult) -> Result<(), SyncError> {
		let mut meta = self
			.store
			.get_metadata(&self.config.user_id)?
			.unwrap_or_else(|| SyncMetadata::new(&self.config.user_id));
		meta.sync_in_progress = true;
		self.store.save_metadata(&meta)?;

		let updated_after = crate::util::iso_from_millis(meta.last_synced_at);
		let mut cursor = meta.sync_cursor.clone();

		loop {
			let page = with_backoff(
				|| {
					self.client.pull_page(
						&updated_after,
						cursor.as_deref(),
						self.config.pull_page_size,
					)
				},
				3,
				&self.config.backoff,
			)
			.await?;

			// Different file ids are independent; merge the whole page
			// concurrently. Per-file locks still serialize same-id work.
			let merges = future::join_all(page.files.into_iter().map(|remote| {
				let file_id = remote.id.clone();
				async move { (file_id, self.apply_remote(remote).await) }
			}))
			.await;

			for (file_id, outcome) in merges {
				match outcome {
					Ok(PullApply::Pulled) => result.pulled += 1,
					Ok(PullApply::Skipped) => {}
					Ok(PullApply::Conflicted) => result.conflicts.push(file_id),
					Err(e) => {
						warn!("pull merge of {} failed: {}", file_id, e);
						result.errors.push(format!("{}: {}", file_id, e));
					}
				}
			}

			if page.has_more {
				cursor = page.next_cursor;
				// Persist the cursor so an interrupted pull resumes
				meta.sync_cursor = cursor.clone();
				self.store.save_metadata(&meta)?;
			} else {
				break;
			}
		}

		meta.last_synced_at = now_millis();
		meta.sync_cursor = None;
		meta.sync_in_progress = false;
		meta.pending_operations_count = self.count_pending_operations()?;
		self.store.save_metadata(&meta)?;
		Ok(())
	}

	/// Merge one remote file into the store under its lock
	async fn apply_remote(&self, remote: RemoteFile) -> Result<PullApply, StoreError> {
		let file_id = remote.id.clone();
		self.locks
			.with_lock(&file_id, async {
				let local = self.store.get_file(&file_id)?;
				let remote_deleted = remote.deleted_at.is_some();

				let local = match local {
					None => {
						if remote_deleted {
							return Ok(PullApply::Skipped);
						}
						self.store.save_file(&record_from_remote(&remote))?;
						return Ok(PullApply::Pulled);
					}
					Some(local) => local,
				};

				if !remote_deleted && compare_etags(&local.etag, &remote.etag) {
					// Identical copy, nothing to do
					return Ok(PullApply::Skipped);
				}

				if local.is_dirty {
					return self.resolve_pull_conflict(local, &remote);
				}

				if remote_deleted {
					// Soft-delete propagation on a clean local copy
					self.store.delete_file(&file_id)?;
					return Ok(PullApply::Pulled);
				}

				let mut record = record_from_remote(&remote);
				record.last_synced_at = now_millis();
				self.store.save_file(&record)?;
				Ok(PullApply::Pulled)
			})
			.await
	}

	/// A dirty local copy met a different server copy during pull
	fn resolve_pull_conflict(
		&self,
		local: FileRecord,
		remote: &RemoteFile,
	) -> Result<PullApply, StoreError> {
		let server = ServerVersion {
			etag: remote.etag.clone(),
			version: remote.version,
			content: remote.content.clone(),
			updated_at: remote.updated_at.clone(),
		};
		let conflict = self.build_conflict(&local, &server);

		let callback = match self.conflict_callback() {
			Some(cb) => cb,
			// No resolver installed: leave the dirty copy alone and
			// surface the conflict
			None => return Ok(PullApply::Conflicted),
		};

		let strategy = callback(&conflict);
		match resolve_conflict(&conflict, strategy, None) {
			Ok(resolved) => {
				let mut record = local;
				record.content = resolved.content;
				record.version = resolved.version;
				record.is_dirty = resolved.is_dirty;
				if let Some(etag) = resolved.etag {
					record.etag = etag;
				}
				if !record.is_dirty {
					// Server copy adopted wholesale, including its shape
					record.title = remote.title.clone();
					record.parent_folder_id = remote.parent_folder_id.clone();
					record.is_folder = remote.is_folder;
					record.last_modified =
						millis_from_iso(&remote.updated_at).unwrap_or_else(now_millis);
					record.last_synced_at = now_millis();
				}
				self.store.save_file(&record)?;
				Ok(PullApply::Conflicted)
			}
			// Merge chosen: the UI supplies merged content through its own
			// push; keep the dirty copy
			Err(_) => Ok(PullApply::Conflicted),
		}
	}

	fn count_pending_operations(&self) -> Result<u64, StoreError> {
		let mut count = 0u64;
		for file_id in self.store.operation_file_ids()? {
			count += self.store.get_unsynced_operations(&file_id)?.len() as u64;
		}
		Ok(count)
	}
}

fn record_from_remote(remote: &RemoteFile) -> FileRecord {
	FileRecord {
		id: remote.id.clone(),
		title: remote.title.clone(),
		content: remote.content.clone(),
		etag: remote.etag.clone(),
		version: remote.version,
		parent_folder_id: remote.parent_folder_id.clone(),
		is_folder: remote.is_folder,
		last_modified: millis_from_iso(&remote.updated_at).unwrap_or_else(now_millis),
		last_synced_at: now_millis(),
		is_dirty: false,
		deleted_at: remote.deleted_at.as_deref().and_then(millis_from_iso),
	}
}

// vim: ts=4
