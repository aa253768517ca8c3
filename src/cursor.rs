//! Pagination cursor for the pull endpoint
//!
//! The cursor is an opaque base64 token over JSON `{"updatedAt": "<ISO>",
//! "id": "<string>"}` naming the last row a page returned. The server
//! resumes strictly after that `(updated_at, id)` pair under the stable
//! `updated_at ASC, id ASC` ordering. Illegal cursors are ignored rather
//! than rejected, so a client with a stale token simply restarts its page.

use base64::engine::general_purpose::STANDARD;
use base64::engine::Engine;
use serde::{Deserialize, Serialize};

/// Decoded resume position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCursor {
	#[serde(rename = "updatedAt")]
	pub updated_at: String,
	pub id: String,
}

impl SyncCursor {
	pub fn new(updated_at: &str, id: &str) -> Self {
		SyncCursor { updated_at: updated_at.to_string(), id: id.to_string() }
	}

	/// Encode to the opaque wire token
	pub fn encode(&self) -> String {
		let json = serde_json::to_string(self).expect("cursor fields are serializable");
		STANDARD.encode(json.as_bytes())
	}

	/// Decode a wire token; None for any malformed input
	pub fn decode(token: &str) -> Option<Self> {
		let bytes = STANDARD.decode(token).ok()?;
		serde_json::from_slice(&bytes).ok()
	}
}


// vim: ts=4
