//! Error taxonomy for DocSync operations
//!
//! Every failure is classified on creation into a kind with a default
//! recoverability, so that retry policy is a property of the error itself
//! rather than of each call site.

use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::io;
use std::sync::Mutex;

use crate::logging::warn;
use crate::util::now_millis;

/// Bounded length of the in-memory error ring
const ERROR_LOG_CAPACITY: usize = 100;

/// Classification of a sync failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	Network,
	Conflict,
	QuotaExceeded,
	Encryption,
	Database,
	Storage,
	Server,
	Auth,
	RateLimit,
	Unknown,
}

impl ErrorKind {
	/// Default recoverability: transient transport and server-side
	/// failures may be retried, everything else needs intervention
	pub fn default_recoverable(self) -> bool {
		matches!(self, ErrorKind::Network | ErrorKind::Server | ErrorKind::RateLimit)
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			ErrorKind::Network => "network error",
			ErrorKind::Conflict => "conflict",
			ErrorKind::QuotaExceeded => "quota exceeded",
			ErrorKind::Encryption => "encryption error",
			ErrorKind::Database => "database error",
			ErrorKind::Storage => "storage error",
			ErrorKind::Server => "server error",
			ErrorKind::Auth => "authentication error",
			ErrorKind::RateLimit => "rate limited",
			ErrorKind::Unknown => "unknown error",
		};
		write!(f, "{}", name)
	}
}

/// A classified sync error
#[derive(Debug, Clone)]
pub struct SyncError {
	pub kind: ErrorKind,
	pub message: String,
	pub recoverable: bool,

	/// Suggested wait before retrying, seconds
	pub retry_after: Option<u64>,

	/// Originating HTTP status, when the error came off the wire
	pub status_code: Option<u16>,

	/// Classification time, epoch ms
	pub timestamp: i64,
}

impl SyncError {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		SyncError {
			kind,
			message: message.into(),
			recoverable: kind.default_recoverable(),
			retry_after: None,
			status_code: None,
			timestamp: now_millis(),
		}
	}

	/// Classify an HTTP status code.
	///
	/// 429 honours the caller-supplied `Retry-After` (seconds), defaulting
	/// to 60; 5xx responses get a 5 second default delay.
	pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<u64>) -> Self {
		let (kind, delay) = match status {
			401 | 403 => (ErrorKind::Auth, None),
			409 | 412 => (ErrorKind::Conflict, None),
			429 => (ErrorKind::RateLimit, Some(retry_after.unwrap_or(60))),
			500 | 502 | 503 | 504 => (ErrorKind::Server, Some(retry_after.unwrap_or(5))),
			_ => (ErrorKind::Unknown, None),
		};

		let mut err = SyncError::new(kind, message);
		err.status_code = Some(status);
		err.retry_after = delay;
		err
	}

	/// Classify a transport-level failure from the HTTP client
	pub fn from_transport(e: &reqwest::Error) -> Self {
		if e.is_connect() || e.is_timeout() || e.is_request() {
			SyncError::new(ErrorKind::Network, e.to_string())
		} else {
			SyncError::new(ErrorKind::Unknown, e.to_string())
		}
	}

	/// Classify an arbitrary error by its message.
	///
	/// Platform quota exhaustion surfaces with "quota" in the message;
	/// everything unrecognized is Unknown.
	pub fn classify(e: &(dyn Error + 'static)) -> Self {
		let message = e.to_string();
		let lower = message.to_lowercase();
		if lower.contains("quota") {
			SyncError::new(ErrorKind::QuotaExceeded, message)
		} else if lower.contains("network") || lower.contains("connection") {
			SyncError::new(ErrorKind::Network, message)
		} else {
			SyncError::new(ErrorKind::Unknown, message)
		}
	}
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.status_code {
			Some(code) => write!(f, "{} ({}): {}", self.kind, code, self.message),
			None => write!(f, "{}: {}", self.kind, self.message),
		}
	}
}

impl Error for SyncError {}

impl From<StoreError> for SyncError {
	fn from(e: StoreError) -> Self {
		let kind = match &e {
			StoreError::QuotaExhausted { .. } => ErrorKind::QuotaExceeded,
			_ => ErrorKind::Database,
		};
		SyncError::new(kind, e.to_string())
	}
}

/// Durable-store errors
#[derive(Debug)]
pub enum StoreError {
	/// Underlying database rejected the operation
	Database { source: Box<dyn Error + Send + Sync> },

	/// Stored bytes failed to decode
	Corrupted { message: String },

	/// Filesystem-level failure
	Io(io::Error),

	/// Schema version on disk is newer than this build understands
	SchemaTooNew { found: u32, supported: u32 },

	/// Platform storage is exhausted
	QuotaExhausted { message: String },
}

impl fmt::Display for StoreError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StoreError::Database { source } => write!(f, "Database error: {}", source),
			StoreError::Corrupted { message } => write!(f, "Store corrupted: {}", message),
			StoreError::Io(e) => write!(f, "I/O error: {}", e),
			StoreError::SchemaTooNew { found, supported } => {
				write!(f, "Schema version {} is newer than supported {}", found, supported)
			}
			StoreError::QuotaExhausted { message } => {
				write!(f, "Storage quota exhausted: {}", message)
			}
		}
	}
}

impl Error for StoreError {}

impl From<io::Error> for StoreError {
	fn from(e: io::Error) -> Self {
		StoreError::Io(e)
	}
}

impl From<redb::Error> for StoreError {
	fn from(e: redb::Error) -> Self {
		StoreError::Database { source: Box::new(e) }
	}
}

impl From<redb::DatabaseError> for StoreError {
	fn from(e: redb::DatabaseError) -> Self {
		StoreError::Database { source: Box::new(e) }
	}
}

impl From<redb::TransactionError> for StoreError {
	fn from(e: redb::TransactionError) -> Self {
		StoreError::Database { source: Box::new(e) }
	}
}

impl From<redb::TableError> for StoreError {
	fn from(e: redb::TableError) -> Self {
		StoreError::Database { source: Box::new(e) }
	}
}

impl From<redb::StorageError> for StoreError {
	fn from(e: redb::StorageError) -> Self {
		StoreError::Database { source: Box::new(e) }
	}
}

impl From<redb::CommitError> for StoreError {
	fn from(e: redb::CommitError) -> Self {
		StoreError::Database { source: Box::new(e) }
	}
}

impl From<bincode::Error> for StoreError {
	fn from(e: bincode::Error) -> Self {
		StoreError::Corrupted { message: e.to_string() }
	}
}

type ErrorSubscriber = Box<dyn Fn(&SyncError) + Send + Sync>;

/// Central sink for classified errors.
///
/// Keeps a bounded ring of recent errors for diagnostics and fans each
/// error out to registered subscribers (the UI's error toast stream).
pub struct ErrorHandler {
	log: Mutex<VecDeque<SyncError>>,
	subscribers: Mutex<Vec<(u64, ErrorSubscriber)>>,
	next_id: std::sync::atomic::AtomicU64,
}

impl ErrorHandler {
	pub fn new() -> Self {
		ErrorHandler {
			log: Mutex::new(VecDeque::with_capacity(ERROR_LOG_CAPACITY)),
			subscribers: Mutex::new(Vec::new()),
			next_id: std::sync::atomic::AtomicU64::new(1),
		}
	}

	/// Log, record, and fan out a classified error
	pub fn handle(&self, err: &SyncError) {
		warn!("{}", err);

		{
			let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
			if log.len() >= ERROR_LOG_CAPACITY {
				log.pop_front();
			}
			log.push_back(err.clone());
		}

		let subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
		for (_, cb) in subscribers.iter() {
			cb(err);
		}
	}

	/// Register a subscriber; returns an id for `unsubscribe`
	pub fn subscribe(&self, cb: ErrorSubscriber) -> u64 {
		let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
		self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).push((id, cb));
		id
	}

	pub fn unsubscribe(&self, id: u64) {
		self.subscribers
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.retain(|(sub_id, _)| *sub_id != id);
	}

	/// Snapshot of the retained error ring, oldest first
	pub fn recent_errors(&self) -> Vec<SyncError> {
		self.log.lock().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect()
	}

	pub fn clear(&self) {
		self.log.lock().unwrap_or_else(|e| e.into_inner()).clear();
	}
}

impl Default for ErrorHandler {
	fn default() -> Self {
		Self::new()
	}
}


// vim: ts=4
