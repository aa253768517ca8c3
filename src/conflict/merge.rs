//! Three-way line merge with overlap detection
//!
//! The merge is deliberately conservative. No base revision is persisted by
//! the engine, so callers frequently pass an empty base; every line where
//! both sides then hold differing text counts as an overlap and the merge
//! declines. Overlapping merges return a line-level visual diff between the
//! two sides for the UI to render.

use std::collections::BTreeMap;

/// Kind of a visual diff entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
	Equal,
	Insert,
	Delete,
}

/// One line of the local/server visual diff
#[derive(Debug, Clone, PartialEq)]
pub struct DiffLine {
	pub kind: DiffKind,
	pub text: String,
}

/// Result of an auto-merge attempt
#[derive(Debug, Clone)]
pub struct MergeOutcome {
	pub success: bool,

	/// Combined content when the merge succeeded
	pub merged: Option<String>,

	/// Both sides changed the same line to different text
	pub has_overlaps: bool,

	/// Local-vs-server line diff, populated only on failure
	pub diffs: Vec<DiffLine>,
}

/// Per-line edits of one side relative to the base.
///
/// `Some(text)` sets the line, `None` deletes it (the side is shorter than
/// the base at that index). Indices past the shorter sequence are compared
/// against "no line", so appends and truncations register as changes too.
fn change_map(base: &[&str], side: &[&str]) -> BTreeMap<usize, Option<String>> {
	let mut changes = BTreeMap::new();
	let len = base.len().max(side.len());

	for i in 0..len {
		let base_line = base.get(i);
		let side_line = side.get(i);
		if base_line != side_line {
			changes.insert(i, side_line.map(|s| s.to_string()));
		}
	}

	changes
}

/// Line diff between the two sides for conflict display
fn line_diff(local: &[&str], server: &[&str]) -> Vec<DiffLine> {
	let mut diffs = Vec::new();
	let len = local.len().max(server.len());

	for i in 0..len {
		match (local.get(i), server.get(i)) {
			(Some(l), Some(s)) if l == s => {
				diffs.push(DiffLine { kind: DiffKind::Equal, text: l.to_string() });
			}
			(Some(l), Some(s)) => {
				diffs.push(DiffLine { kind: DiffKind::Delete, text: l.to_string() });
				diffs.push(DiffLine { kind: DiffKind::Insert, text: s.to_string() });
			}
			(Some(l), None) => {
				diffs.push(DiffLine { kind: DiffKind::Delete, text: l.to_string() });
			}
			(None, Some(s)) => {
				diffs.push(DiffLine { kind: DiffKind::Insert, text: s.to_string() });
			}
			(None, None) => unreachable!(),
		}
	}

	diffs
}

/// Attempt a three-way merge of `local` and `server` against `base`.
///
/// Both sides' change sets are computed line-by-line against the base. If
/// any line index was changed by both sides to different text, the merge
/// fails with `has_overlaps` and a visual diff. Otherwise both change sets
/// apply to the base in descending line order (so earlier indices stay
/// valid) and the combined content is returned.
pub fn attempt_auto_merge(base: &str, local: &str, server: &str) -> MergeOutcome {
	let base_lines: Vec<&str> = base.split('\n').collect();
	let local_lines: Vec<&str> = local.split('\n').collect();
	let server_lines: Vec<&str> = server.split('\n').collect();

	let local_changes = change_map(&base_lines, &local_lines);
	let server_changes = change_map(&base_lines, &server_lines);

	let has_overlaps = local_changes
		.iter()
		.any(|(i, change)| matches!(server_changes.get(i), Some(other) if other != change));

	if has_overlaps {
		return MergeOutcome {
			success: false,
			merged: None,
			has_overlaps: true,
			diffs: line_diff(&local_lines, &server_lines),
		};
	}

	let mut combined = local_changes;
	for (i, change) in server_changes {
		combined.entry(i).or_insert(change);
	}

	let mut merged: Vec<String> = base_lines.iter().map(|s| s.to_string()).collect();
	for (&i, change) in combined.iter().rev() {
		match change {
			Some(text) => {
				if i >= merged.len() {
					merged.resize(i + 1, String::new());
				}
				merged[i] = text.clone();
			}
			None => {
				if i < merged.len() {
					merged.remove(i);
				}
			}
		}
	}

	MergeOutcome {
		success: true,
		merged: Some(merged.join("\n")),
		has_overlaps: false,
		diffs: Vec::new(),
	}
}


// vim: ts=4
