//! # DocSync - Offline-First Document Synchronization Engine
//!
//! DocSync keeps a local tree of rich-text documents converging with an
//! authoritative server copy over a strong-ETag optimistic-concurrency
//! protocol. Clients edit while disconnected; when connectivity returns,
//! dirty files push under `If-Match` preconditions, server changes pull
//! through a cursored listing, and divergence surfaces as conflicts for the
//! UI to resolve.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docsync::connectivity::ConnectivityDetector;
//! use docsync::store::Store;
//! use docsync::sync::{SyncConfig, SyncManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(Store::open("docsync.db".as_ref())?);
//!     let detector = Arc::new(ConnectivityDetector::new());
//!     detector.set_online();
//!
//!     let manager = SyncManager::new(store, detector, SyncConfig::default());
//!     manager.start();
//!
//!     let result = manager.sync().await;
//!     println!("pushed {} files", result.pushed);
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(dead_code)]

pub mod checkpoint;
pub mod config;
pub mod conflict;
pub mod connectivity;
pub mod cursor;
pub mod error;
pub mod etag;
pub mod gc;
pub mod locks;
pub mod logging;
pub mod metrics;
pub mod rotator;
pub mod server;
pub mod store;
pub mod sync;
pub mod types;
pub mod util;

// Re-export commonly used types and functions
pub use checkpoint::{CheckpointManager, CheckpointReason};
pub use conflict::{attempt_auto_merge, Conflict, MergeOutcome, ResolutionStrategy};
pub use connectivity::{with_backoff, BackoffConfig, ConnState, ConnectivityDetector};
pub use error::{ErrorHandler, ErrorKind, StoreError, SyncError};
pub use gc::{GcConfig, OperationGc};
pub use locks::FileLockManager;
pub use metrics::PerformanceMonitor;
pub use rotator::{KeyRotator, MemoryStore, RedisStore, SharedStore};
pub use store::{StorageEstimate, Store};
pub use sync::{SyncClient, SyncConfig, SyncManager};
pub use types::{FileRecord, Operation, OperationType, SyncCycleResult, SyncMetadata, SyncStatus};

// vim: ts=4
