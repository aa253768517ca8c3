//! Core data types for DocSync

use serde::{Deserialize, Serialize};

/// A document or folder as held in the durable store.
///
/// Both the client engine and the server surface persist this shape; the
/// server additionally uses `deleted_at` for soft deletion. Timestamps are
/// wall-clock milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
	/// Opaque unique identifier
	pub id: String,

	/// Document title
	pub title: String,

	/// Rich-text body as an HTML string
	pub content: String,

	/// Strong ETag: 32 lowercase hex characters
	pub etag: String,

	/// Monotone version counter, bumped by exactly 1 on every
	/// server-accepted write
	pub version: u64,

	/// Parent folder id, None for roots
	pub parent_folder_id: Option<String>,

	/// True for folders (folders carry no content)
	pub is_folder: bool,

	/// Last local modification, epoch ms
	pub last_modified: i64,

	/// Last successful server acknowledgement, epoch ms; 0 means never
	pub last_synced_at: i64,

	/// Modified since the last acknowledgement
	pub is_dirty: bool,

	/// Soft-delete timestamp (server side), epoch ms
	pub deleted_at: Option<i64>,
}

/// Edit operation kinds recorded in the operation log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
	Insert,
	Delete,
	Update,
	Create,
	Rename,
	Move,
}

/// A single recorded edit operation.
///
/// Immutable once recorded except for the `synced` flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
	pub id: String,
	pub file_id: String,
	pub operation_type: OperationType,

	/// Character position for insert/delete operations
	pub position: Option<u64>,

	/// Inserted or replacing content
	pub content: Option<String>,

	/// Recording time, epoch ms
	pub timestamp: i64,

	/// Acknowledged by a successful push
	pub synced: bool,

	/// Replaced content, kept for conflict display
	pub previous_content: Option<String>,
}

/// Per-user sync bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
	pub user_id: String,

	/// Monotone non-decreasing, epoch ms
	pub last_synced_at: i64,

	/// Resumption cursor from an interrupted pull, if any
	pub sync_cursor: Option<String>,

	/// Advisory flag, cleared on engine teardown
	pub sync_in_progress: bool,

	pub pending_operations_count: u64,
}

impl SyncMetadata {
	pub fn new(user_id: &str) -> Self {
		SyncMetadata {
			user_id: user_id.to_string(),
			last_synced_at: 0,
			sync_cursor: None,
			sync_in_progress: false,
			pending_operations_count: 0,
		}
	}
}

/// Engine status as observed by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
	Idle,
	Syncing,
	Error,
	Offline,
}

impl std::fmt::Display for SyncStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SyncStatus::Idle => write!(f, "idle"),
			SyncStatus::Syncing => write!(f, "syncing"),
			SyncStatus::Error => write!(f, "error"),
			SyncStatus::Offline => write!(f, "offline"),
		}
	}
}

/// Aggregate result of one sync cycle
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
	pub success: bool,

	/// Files pushed clean to the server
	pub pushed: usize,

	/// Files merged in from the server
	pub pulled: usize,

	/// File ids that hit a conflict this cycle
	pub conflicts: Vec<String>,

	/// Non-fatal per-file errors
	pub errors: Vec<String>,

	/// Refusal or failure reason when `success` is false
	pub message: Option<String>,
}

impl SyncCycleResult {
	pub fn refused(message: &str) -> Self {
		SyncCycleResult {
			success: false,
			pushed: 0,
			pulled: 0,
			conflicts: Vec::new(),
			errors: Vec::new(),
			message: Some(message.to_string()),
		}
	}
}

impl Default for SyncCycleResult {
	fn default() -> Self {
		SyncCycleResult {
			success: true,
			pushed: 0,
			pulled: 0,
			conflicts: Vec::new(),
			errors: Vec::new(),
			message: None,
		}
	}
}

//////////////////
// Wire formats //
//////////////////

/// File representation on the wire (pull endpoint and 412 payloads)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
	pub id: String,
	pub title: String,
	pub content: String,
	pub etag: String,
	pub version: u64,
	pub parent_folder_id: Option<String>,
	pub is_folder: bool,

	/// RFC 3339 timestamp
	pub updated_at: String,

	/// RFC 3339 soft-delete timestamp, present only for deleted files
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub deleted_at: Option<String>,
}

/// Body of `PUT /files/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutRequest {
	pub content: String,
	pub title: String,
}

/// Success payload of `PUT /files/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutResponse {
	pub id: String,
	pub title: String,
	pub etag: String,
	pub version: u64,
	pub updated_at: String,
}

/// The server's copy as presented in a 412 response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerVersion {
	pub etag: String,
	pub version: u64,
	pub content: String,
	pub updated_at: String,
}

/// 412 Precondition Failed payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResponse {
	pub error: String,
	pub server_version: ServerVersion,
}

/// One page of `GET /files/sync`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPage {
	pub files: Vec<RemoteFile>,
	pub has_more: bool,
	pub next_cursor: Option<String>,

	/// Server wall clock at response time, RFC 3339
	pub sync_timestamp: String,
}


// vim: ts=4
