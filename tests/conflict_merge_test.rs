/// Three-way merge and resolution flows
///
/// Covers the merge/resolve pipeline end to end: a clean auto-merge feeding
/// the `Merge` resolution, the conservative overlap decline with its visual
/// diff, and detection over realistic file records.
use docsync::conflict::{
	attempt_auto_merge, detect_conflict, resolve_conflict, Conflict, DiffKind, FileVersion,
	ResolutionStrategy,
};
use docsync::etag::generate_etag;
use docsync::types::FileRecord;

fn conflict_over(local_content: &str, server_content: &str) -> Conflict {
	Conflict {
		file_id: "doc".to_string(),
		local: FileVersion {
			content: local_content.to_string(),
			etag: generate_etag("doc", local_content, 1_000),
			version: 3,
			last_modified: 1_000,
		},
		server: FileVersion {
			content: server_content.to_string(),
			etag: generate_etag("doc", server_content, 2_000),
			version: 4,
			last_modified: 2_000,
		},
		operations: Vec::new(),
		detected_at: 3_000,
	}
}

#[test]
fn test_disjoint_edits_merge_and_resolve() {
	let base = "L1\nL2\nL3";
	let local = "L1 mod\nL2\nL3";
	let server = "L1\nL2\nL3 mod";

	let outcome = attempt_auto_merge(base, local, server);
	assert!(outcome.success);
	assert!(!outcome.has_overlaps);
	assert!(outcome.diffs.is_empty());

	let merged = outcome.merged.unwrap();
	assert!(merged.contains("L1 mod"));
	assert!(merged.contains("L3 mod"));

	// Feed the merged text through the Merge resolution
	let conflict = conflict_over(local, server);
	let resolved =
		resolve_conflict(&conflict, ResolutionStrategy::Merge, Some(merged.clone())).unwrap();
	assert_eq!(resolved.content, merged);
	assert_eq!(resolved.version, 5);
	assert!(resolved.is_dirty, "a merge result still needs a push");
}

#[test]
fn test_overlap_declines_with_visual_diff() {
	let outcome = attempt_auto_merge("X", "local", "server");

	assert!(!outcome.success);
	assert!(outcome.has_overlaps);
	assert!(outcome.merged.is_none());

	let kinds: Vec<DiffKind> = outcome.diffs.iter().map(|d| d.kind).collect();
	assert_eq!(kinds, vec![DiffKind::Delete, DiffKind::Insert]);
	assert_eq!(outcome.diffs[0].text, "local");
	assert_eq!(outcome.diffs[1].text, "server");
}

#[test]
fn test_empty_base_declines_divergent_content() {
	// The engine stores no base revision; auto-merge over an empty base
	// must stay conservative for any line-wise divergence
	let outcome = attempt_auto_merge("", "alpha\nbeta", "alpha\ngamma");
	assert!(!outcome.success);
	assert!(outcome.has_overlaps);

	// But literally identical content on both sides is fine
	let outcome = attempt_auto_merge("", "alpha\nbeta", "alpha\nbeta");
	assert!(outcome.success);
	assert_eq!(outcome.merged.unwrap(), "alpha\nbeta");
}

#[test]
fn test_detect_conflict_over_records() {
	let last_modified = 5_000;
	let content = "<p>draft</p>";
	let record = FileRecord {
		id: "doc".to_string(),
		title: "draft".to_string(),
		content: content.to_string(),
		etag: generate_etag("doc", content, last_modified),
		version: 2,
		parent_folder_id: None,
		is_folder: false,
		last_modified,
		last_synced_at: 4_000,
		is_dirty: true,
		deleted_at: None,
	};

	let foreign = generate_etag("doc", "<p>other</p>", 6_000);
	assert!(detect_conflict(&record, &foreign));
	assert!(!detect_conflict(&record, &record.etag.clone()));

	let clean = FileRecord { is_dirty: false, ..record };
	assert!(!detect_conflict(&clean, &foreign));
}

#[test]
fn test_resolution_choices_cover_both_sides() {
	let conflict = conflict_over("L", "S");

	let local = resolve_conflict(&conflict, ResolutionStrategy::Local, None).unwrap();
	assert_eq!(local.content, "L");
	assert_eq!(local.version, 5);
	assert!(local.etag.is_none());

	let server = resolve_conflict(&conflict, ResolutionStrategy::Server, None).unwrap();
	assert_eq!(server.content, "S");
	assert_eq!(server.version, 4);
	assert_eq!(server.etag.as_deref(), Some(conflict.server.etag.as_str()));
	assert!(!server.is_dirty);
}

// vim: ts=4
