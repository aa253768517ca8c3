//! Applying a chosen conflict resolution

use super::{Conflict, ConflictError, ResolutionStrategy};
use crate::types::FileRecord;

/// The file state to install after resolving a conflict.
///
/// `etag` is `None` when the content is locally authored (local keep or
/// merge) and a fresh tag must be derived on the next push; it is the
/// server's tag when the server copy was accepted verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFile {
	pub content: String,
	pub etag: Option<String>,
	pub version: u64,

	/// Whether the result still needs a push
	pub is_dirty: bool,
}

/// A push-time conflict exists iff the local copy has unacknowledged edits
/// and the server holds a different tag
pub fn detect_conflict(local: &FileRecord, server_etag: &str) -> bool {
	local.is_dirty && !crate::etag::compare_etags(&local.etag, server_etag)
}

/// Apply the UI's resolution choice to a conflict.
///
/// `Local` keeps the local content at a version above both sides; `Server`
/// adopts the server copy as-is; `Merge` installs the supplied merged
/// content, also above both versions.
pub fn resolve_conflict(
	conflict: &Conflict,
	strategy: ResolutionStrategy,
	merged_content: Option<String>,
) -> Result<ResolvedFile, ConflictError> {
	let bumped = conflict.local.version.max(conflict.server.version) + 1;

	match strategy {
		ResolutionStrategy::Local => Ok(ResolvedFile {
			content: conflict.local.content.clone(),
			etag: None,
			version: bumped,
			is_dirty: true,
		}),

		ResolutionStrategy::Server => Ok(ResolvedFile {
			content: conflict.server.content.clone(),
			etag: Some(conflict.server.etag.clone()),
			version: conflict.server.version,
			is_dirty: false,
		}),

		ResolutionStrategy::Merge => {
			let content = merged_content.ok_or(ConflictError::MissingMergedContent)?;
			Ok(ResolvedFile { content, etag: None, version: bumped, is_dirty: true })
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::conflict::FileVersion;

	fn sample_conflict() -> Conflict {
		Conflict {
			file_id: "f1".to_string(),
			local: FileVersion {
				content: "L".to_string(),
				etag: "a".repeat(32),
				version: 3,
				last_modified: 2_000,
			},
			server: FileVersion {
				content: "S".to_string(),
				etag: "b".repeat(32),
				version: 5,
				last_modified: 3_000,
			},
			operations: Vec::new(),
			detected_at: 4_000,
		}
	}

	fn dirty_record(etag: &str) -> FileRecord {
		FileRecord {
			id: "f1".to_string(),
			title: "doc".to_string(),
			content: "L".to_string(),
			etag: etag.to_string(),
			version: 3,
			parent_folder_id: None,
			is_folder: false,
			last_modified: 2_000,
			last_synced_at: 1_000,
			is_dirty: true,
			deleted_at: None,
		}
	}

	#[test]
	fn test_detect_requires_dirty_and_mismatch() {
		let local_tag = "a".repeat(32);
		let server_tag = "b".repeat(32);

		let mut record = dirty_record(&local_tag);
		assert!(detect_conflict(&record, &server_tag));

		// Same tag: no conflict regardless of dirt
		assert!(!detect_conflict(&record, &local_tag));

		// Clean file: server wins silently, no conflict
		record.is_dirty = false;
		assert!(!detect_conflict(&record, &server_tag));
	}

	#[test]
	fn test_detect_normalizes_header_forms() {
		let record = dirty_record(&"a".repeat(32));
		let quoted = format!("\"{}\"", "a".repeat(32));
		assert!(!detect_conflict(&record, &quoted));
	}

	#[test]
	fn test_resolve_local_bumps_above_both() {
		let conflict = sample_conflict();
		let resolved = resolve_conflict(&conflict, ResolutionStrategy::Local, None).unwrap();

		assert_eq!(resolved.content, "L");
		assert_eq!(resolved.version, 6);
		assert_eq!(resolved.etag, None);
		assert!(resolved.is_dirty);
	}

	#[test]
	fn test_resolve_server_adopts_server_state() {
		let conflict = sample_conflict();
		let resolved = resolve_conflict(&conflict, ResolutionStrategy::Server, None).unwrap();

		assert_eq!(resolved.content, "S");
		assert_eq!(resolved.version, 5);
		assert_eq!(resolved.etag, Some("b".repeat(32)));
		assert!(!resolved.is_dirty);
	}

	#[test]
	fn test_resolve_merge_requires_content() {
		let conflict = sample_conflict();

		let missing = resolve_conflict(&conflict, ResolutionStrategy::Merge, None);
		assert!(matches!(missing, Err(ConflictError::MissingMergedContent)));

		let resolved =
			resolve_conflict(&conflict, ResolutionStrategy::Merge, Some("LS".to_string()))
				.unwrap();
		assert_eq!(resolved.content, "LS");
		assert_eq!(resolved.version, 6);
		assert!(resolved.is_dirty);
	}
}

// vim: ts=4
