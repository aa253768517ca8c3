//! Conflict detection and resolution

use crate::types::Operation;

pub mod merge;
pub mod resolver;

pub use merge::{attempt_auto_merge, DiffKind, DiffLine, MergeOutcome};
pub use resolver::{detect_conflict, resolve_conflict, ResolvedFile};

/// One side of a diverged file
#[derive(Debug, Clone, PartialEq)]
pub struct FileVersion {
	pub content: String,
	pub etag: String,
	pub version: u64,

	/// Modification time of this side, epoch ms
	pub last_modified: i64,
}

/// A detected divergence between the local and server copies.
///
/// Lives only as long as the open conflict dialog; the UI callback decides
/// its fate.
#[derive(Debug, Clone)]
pub struct Conflict {
	pub file_id: String,
	pub local: FileVersion,
	pub server: FileVersion,

	/// Unsynced local operations at detection time, for display
	pub operations: Vec<Operation>,

	/// Detection time, epoch ms
	pub detected_at: i64,
}

/// How the UI chose to resolve a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
	/// Keep the local content and force-push it
	Local,

	/// Accept the server copy verbatim
	Server,

	/// Use caller-supplied merged content
	Merge,
}

/// Error type for conflict resolution
#[derive(Debug)]
pub enum ConflictError {
	/// `Merge` strategy chosen but no merged content supplied
	MissingMergedContent,
}

impl std::fmt::Display for ConflictError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ConflictError::MissingMergedContent => {
				write!(f, "Merge resolution requires merged content")
			}
		}
	}
}

impl std::error::Error for ConflictError {}

// vim: ts=4
