//! Pre-sync checkpoints with rollback
//!
//! Snapshots `{content, etag, version}` of a file before a risky mutation so
//! a failed push can be undone. Checkpoints live in memory only: rollback is
//! a within-session safety net, not durable recovery. The set is bounded by
//! age and count.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::error::StoreError;
use crate::logging::{debug, info};
use crate::store::Store;
use crate::util::now_millis;

/// Maximum live checkpoints before oldest-first eviction
const MAX_CHECKPOINTS: usize = 50;

/// Entries older than this are eligible for eviction, ms
const MAX_CHECKPOINT_AGE_MS: i64 = 60 * 60 * 1000;

/// Why a checkpoint was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointReason {
	PreSync,
	PreMerge,
	Manual,
}

/// In-memory snapshot of a file's durable state
#[derive(Debug, Clone)]
pub struct Checkpoint {
	pub id: String,
	pub file_id: String,
	pub content: String,
	pub etag: String,
	pub version: u64,
	pub created_at: i64,
	pub reason: CheckpointReason,
}

/// Bounded in-memory checkpoint set over a store
pub struct CheckpointManager {
	store: Arc<Store>,
	checkpoints: Mutex<HashMap<String, Checkpoint>>,
	max_checkpoints: usize,
	max_age_ms: i64,
}

impl CheckpointManager {
	pub fn new(store: Arc<Store>) -> Self {
		CheckpointManager {
			store,
			checkpoints: Mutex::new(HashMap::new()),
			max_checkpoints: MAX_CHECKPOINTS,
			max_age_ms: MAX_CHECKPOINT_AGE_MS,
		}
	}

	#[cfg(test)]
	pub fn with_limits(store: Arc<Store>, max_checkpoints: usize, max_age_ms: i64) -> Self {
		CheckpointManager {
			store,
			checkpoints: Mutex::new(HashMap::new()),
			max_checkpoints,
			max_age_ms,
		}
	}

	/// Snapshot the file's current durable state; returns the checkpoint id
	pub fn create_checkpoint(
		&self,
		file_id: &str,
		reason: CheckpointReason,
	) -> Result<String, StoreError> {
		let record = self.store.get_file(file_id)?.ok_or_else(|| StoreError::Corrupted {
			message: format!("cannot checkpoint unknown file {}", file_id),
		})?;

		let now = now_millis();
		let suffix = Uuid::new_v4().simple().to_string();
		let id = format!("cp-{}-{}-{}", file_id, now, &suffix[..8]);

		let checkpoint = Checkpoint {
			id: id.clone(),
			file_id: file_id.to_string(),
			content: record.content,
			etag: record.etag,
			version: record.version,
			created_at: now,
			reason,
		};

		let mut checkpoints = self.checkpoints.lock().unwrap_or_else(|e| e.into_inner());
		checkpoints.insert(id.clone(), checkpoint);
		Self::evict(&mut checkpoints, self.max_checkpoints, self.max_age_ms);

		debug!("checkpoint {} created ({:?})", id, reason);
		Ok(id)
	}

	/// Restore the snapshot into the store and discard the checkpoint.
	///
	/// The restored file is marked dirty so the next cycle pushes it again.
	/// Idempotent: rolling back an already-consumed checkpoint succeeds as
	/// a no-op.
	pub fn rollback(&self, checkpoint_id: &str) -> Result<(), StoreError> {
		let checkpoint = {
			let mut checkpoints = self.checkpoints.lock().unwrap_or_else(|e| e.into_inner());
			checkpoints.remove(checkpoint_id)
		};

		let checkpoint = match checkpoint {
			Some(cp) => cp,
			None => return Ok(()),
		};

		if let Some(mut record) = self.store.get_file(&checkpoint.file_id)? {
			record.content = checkpoint.content;
			record.etag = checkpoint.etag;
			record.version = checkpoint.version;
			record.is_dirty = true;
			record.last_modified = now_millis();
			self.store.save_file(&record)?;
			info!("rolled back {} to checkpoint {}", checkpoint.file_id, checkpoint_id);
		}

		Ok(())
	}

	/// Discard a checkpoint after a successful commit
	pub fn remove_checkpoint(&self, checkpoint_id: &str) {
		let mut checkpoints = self.checkpoints.lock().unwrap_or_else(|e| e.into_inner());
		checkpoints.remove(checkpoint_id);
	}

	pub fn get(&self, checkpoint_id: &str) -> Option<Checkpoint> {
		let checkpoints = self.checkpoints.lock().unwrap_or_else(|e| e.into_inner());
		checkpoints.get(checkpoint_id).cloned()
	}

	pub fn live_count(&self) -> usize {
		self.checkpoints.lock().unwrap_or_else(|e| e.into_inner()).len()
	}

	/// Age out stale entries, then drop oldest-first down to the cap
	fn evict(checkpoints: &mut HashMap<String, Checkpoint>, max: usize, max_age_ms: i64) {
		let cutoff = now_millis() - max_age_ms;
		checkpoints.retain(|_, cp| cp.created_at >= cutoff);

		while checkpoints.len() > max {
			let oldest = checkpoints
				.values()
				.min_by_key(|cp| cp.created_at)
				.map(|cp| cp.id.clone())
				.expect("non-empty map has a minimum");
			checkpoints.remove(&oldest);
		}
	}
}


// vim: ts=4
