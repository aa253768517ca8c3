//! Per-file mutual exclusion for sync critical sections
//!
//! One FIFO mutex per file id: two pushes of the same file, or a push and a
//! pull-merge of the same file, never interleave. Different file ids proceed
//! in parallel. Acquisition is not reentrant; recursive acquisition on the
//! same id deadlocks (caller discipline).

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::logging::trace;

/// Release handle from [`FileLockManager::try_acquire`]; dropping it
/// releases the lock
pub struct LockGuard {
	_guard: OwnedMutexGuard<()>,
	file_id: String,
}

impl LockGuard {
	pub fn file_id(&self) -> &str {
		&self.file_id
	}
}

/// Keyed FIFO mutex set over file ids
pub struct FileLockManager {
	locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl FileLockManager {
	pub fn new() -> Self {
		FileLockManager { locks: Mutex::new(HashMap::new()) }
	}

	fn entry(&self, file_id: &str) -> Arc<AsyncMutex<()>> {
		let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
		locks.entry(file_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}

	/// Run `fut` while holding the file's lock.
	///
	/// The lock is released on every exit path, including panic unwinds.
	/// Acquisitions for the same id complete in program order (the
	/// underlying tokio mutex queues waiters FIFO).
	pub async fn with_lock<T>(&self, file_id: &str, fut: impl Future<Output = T>) -> T {
		let mutex = self.entry(file_id);
		let _guard = mutex.lock_owned().await;
		trace!("lock acquired: {}", file_id);
		fut.await
	}

	/// Acquire without waiting; None when the lock is held
	pub fn try_acquire(&self, file_id: &str) -> Option<LockGuard> {
		let mutex = self.entry(file_id);
		mutex
			.try_lock_owned()
			.ok()
			.map(|guard| LockGuard { _guard: guard, file_id: file_id.to_string() })
	}

	pub fn is_locked(&self, file_id: &str) -> bool {
		let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
		match locks.get(file_id) {
			Some(mutex) => mutex.try_lock().is_err(),
			None => false,
		}
	}

	pub fn active_lock_count(&self) -> usize {
		let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
		locks.values().filter(|mutex| mutex.try_lock().is_err()).count()
	}

	pub fn locked_files(&self) -> Vec<String> {
		let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
		locks
			.iter()
			.filter(|(_, mutex)| mutex.try_lock().is_err())
			.map(|(id, _)| id.clone())
			.collect()
	}

	/// Drop the lock table. Teardown only: outstanding guards stay valid
	/// but new acquisitions start from fresh, uncontended locks.
	pub fn release_all(&self) {
		self.locks.lock().unwrap_or_else(|e| e.into_inner()).clear();
	}
}

impl Default for FileLockManager {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	#[tokio::test]
	async fn test_critical_sections_serialize_per_file() {
		let manager = Arc::new(FileLockManager::new());
		let order = Arc::new(Mutex::new(Vec::new()));

		let mut handles = Vec::new();
		for i in 0..4 {
			let manager = manager.clone();
			let order = order.clone();
			handles.push(tokio::spawn(async move {
				manager
					.with_lock("shared", async move {
						order.lock().unwrap().push(format!("enter-{}", i));
						tokio::time::sleep(Duration::from_millis(5)).await;
						order.lock().unwrap().push(format!("exit-{}", i));
					})
					.await;
			}));
			// Give each task a chance to queue before spawning the next,
			// so program order is observable
			tokio::time::sleep(Duration::from_millis(1)).await;
		}

		for handle in handles {
			handle.await.unwrap();
		}

		let order = order.lock().unwrap();
		// Every enter is immediately followed by its own exit
		for pair in order.chunks(2) {
			let enter = pair[0].strip_prefix("enter-").unwrap();
			let exit = pair[1].strip_prefix("exit-").unwrap();
			assert_eq!(enter, exit, "interleaved critical sections: {:?}", *order);
		}
	}

	#[tokio::test]
	async fn test_different_files_run_in_parallel() {
		let manager = Arc::new(FileLockManager::new());
		let concurrent = Arc::new(AtomicUsize::new(0));
		let peak = Arc::new(AtomicUsize::new(0));

		let mut handles = Vec::new();
		for i in 0..3 {
			let manager = manager.clone();
			let concurrent = concurrent.clone();
			let peak = peak.clone();
			handles.push(tokio::spawn(async move {
				let file_id = format!("file-{}", i);
				manager
					.with_lock(&file_id, async move {
						let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
						peak.fetch_max(now, Ordering::SeqCst);
						tokio::time::sleep(Duration::from_millis(20)).await;
						concurrent.fetch_sub(1, Ordering::SeqCst);
					})
					.await;
			}));
		}

		for handle in handles {
			handle.await.unwrap();
		}

		assert!(peak.load(Ordering::SeqCst) > 1, "independent files were serialized");
	}

	#[tokio::test]
	async fn test_try_acquire_and_introspection() {
		let manager = FileLockManager::new();

		assert!(!manager.is_locked("f1"));
		let guard = manager.try_acquire("f1").unwrap();
		assert_eq!(guard.file_id(), "f1");

		assert!(manager.is_locked("f1"));
		assert!(manager.try_acquire("f1").is_none());
		assert_eq!(manager.active_lock_count(), 1);
		assert_eq!(manager.locked_files(), vec!["f1".to_string()]);

		drop(guard);
		assert!(!manager.is_locked("f1"));
		assert_eq!(manager.active_lock_count(), 0);
	}

	#[tokio::test]
	async fn test_lock_released_after_error_path() {
		let manager = FileLockManager::new();

		let result: Result<(), &str> = manager.with_lock("f1", async { Err("boom") }).await;
		assert!(result.is_err());

		// A failed critical section must not leave the lock held
		assert!(!manager.is_locked("f1"));
		assert!(manager.try_acquire("f1").is_some());
	}

	#[tokio::test]
	async fn test_release_all_clears_table() {
		let manager = FileLockManager::new();
		let _guard = manager.try_acquire("f1").unwrap();

		manager.release_all();
		assert_eq!(manager.active_lock_count(), 0);
		assert!(manager.try_acquire("f1").is_some());
	}
}

// vim: ts=4
