//! Strong-ETag derivation and header handling
//!
//! The ETag is the cross-trust fingerprint the optimistic-concurrency
//! protocol relies on: the client and the server must derive byte-identical
//! tags from identical inputs. Everything here is a pure function.

use sha2::{Digest, Sha256};

use crate::util::iso_from_millis;

/// Length of a strong ETag in hex characters
pub const ETAG_LEN: usize = 32;

/// Derive the strong ETag for a file.
///
/// `lower(hex(SHA-256(id ∥ content ∥ updated_at_iso)))` truncated to 32
/// characters. `updated_at` is epoch ms and is formatted as RFC 3339 with
/// millisecond precision before hashing.
pub fn generate_etag(id: &str, content: &str, updated_at: i64) -> String {
	let mut hasher = Sha256::new();
	hasher.update(id.as_bytes());
	hasher.update(content.as_bytes());
	hasher.update(iso_from_millis(updated_at).as_bytes());

	let digest = hasher.finalize();
	let mut tag = hex::encode(digest);
	tag.truncate(ETAG_LEN);
	tag
}

/// Strip the weak-validator prefix and surrounding quotes from a header value
pub fn parse_etag_header(header: &str) -> String {
	let trimmed = header.trim();
	let without_weak = trimmed.strip_prefix("W/").unwrap_or(trimmed);
	without_weak.trim_matches('"').to_string()
}

/// Quote an ETag for use in an HTTP header
pub fn format_etag_header(etag: &str) -> String {
	format!("\"{}\"", etag)
}

/// Compare two ETags after normalization, case-insensitively
pub fn compare_etags(a: &str, b: &str) -> bool {
	parse_etag_header(a).eq_ignore_ascii_case(&parse_etag_header(b))
}

/// A valid strong ETag is exactly 32 hex characters
pub fn is_valid_etag(etag: &str) -> bool {
	etag.len() == ETAG_LEN && etag.bytes().all(|b| b.is_ascii_hexdigit())
}


// vim: ts=4
