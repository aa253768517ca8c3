//! Request handlers for the sync endpoints

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::cursor::SyncCursor;
use crate::error::StoreError;
use crate::etag::{compare_etags, format_etag_header, generate_etag, parse_etag_header};
use crate::logging::debug;
use crate::types::{ConflictResponse, FileRecord, PutRequest, PutResponse, RemoteFile, ServerVersion, SyncPage};
use crate::util::{iso_from_millis, millis_from_iso, now_millis};

const DEFAULT_PAGE_LIMIT: u32 = 50;
const MAX_PAGE_LIMIT: u32 = 100;

/// Requesting user, from the auth layer upstream of this surface
fn user_id(headers: &HeaderMap) -> String {
	headers
		.get("X-User-Id")
		.and_then(|v| v.to_str().ok())
		.unwrap_or("default")
		.to_string()
}

fn storage_failure(e: StoreError) -> Response {
	(StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
}

fn wire_file(record: &FileRecord) -> RemoteFile {
	RemoteFile {
		id: record.id.clone(),
		title: record.title.clone(),
		content: record.content.clone(),
		etag: record.etag.clone(),
		version: record.version,
		parent_folder_id: record.parent_folder_id.clone(),
		is_folder: record.is_folder,
		updated_at: iso_from_millis(record.last_modified),
		deleted_at: record.deleted_at.map(iso_from_millis),
	}
}

//////////////////////
// GET /files/sync  //
//////////////////////

#[derive(Debug, Deserialize)]
pub struct PullParams {
	pub updated_after: Option<String>,
	pub cursor: Option<String>,
	pub limit: Option<u32>,
}

/// Cursor-paginated changed-file listing.
///
/// Ordering is `updated_at ASC, id ASC` (stable). Soft-deleted files are
/// returned while their deletion is newer than `updated_after` so clients
/// can propagate the delete, and excluded afterwards. Malformed cursors are
/// ignored, restarting pagination.
pub async fn pull_changes(
	State(state): State<Arc<AppState>>,
	headers: HeaderMap,
	Query(params): Query<PullParams>,
) -> Response {
	let user = user_id(&headers);
	if let Err(retry_after) = state.rate.check(&user) {
		return (
			StatusCode::TOO_MANY_REQUESTS,
			[("Retry-After", retry_after.to_string())],
			Json(json!({ "error": "rate limit exceeded" })),
		)
			.into_response();
	}

	let updated_after = params
		.updated_after
		.as_deref()
		.and_then(millis_from_iso)
		.unwrap_or(0);

	let mut files = match state.store.get_all_files() {
		Ok(files) => files,
		Err(e) => return storage_failure(e),
	};

	files.retain(|f| match f.deleted_at {
		Some(deleted_at) => deleted_at > updated_after,
		None => f.last_modified > updated_after,
	});
	files.sort_by(|a, b| {
		a.last_modified.cmp(&b.last_modified).then_with(|| a.id.cmp(&b.id))
	});

	// Resume strictly after the cursor row under the same ordering
	if let Some(cursor) = params.cursor.as_deref().and_then(SyncCursor::decode) {
		if let Some(cursor_ms) = millis_from_iso(&cursor.updated_at) {
			files.retain(|f| (f.last_modified, f.id.as_str()) > (cursor_ms, cursor.id.as_str()));
		}
	}

	let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT).max(1) as usize;
	let has_more = files.len() > limit;
	files.truncate(limit);

	let next_cursor = if has_more {
		files
			.last()
			.map(|f| SyncCursor::new(&iso_from_millis(f.last_modified), &f.id).encode())
	} else {
		None
	};

	debug!("pull: {} files for {}, has_more={}", files.len(), user, has_more);
	Json(SyncPage {
		files: files.iter().map(wire_file).collect(),
		has_more,
		next_cursor,
		sync_timestamp: iso_from_millis(now_millis()),
	})
	.into_response()
}

/////////////////////
// GET /files/{id} //
/////////////////////

/// Conditional single-file read honouring `If-None-Match`
pub async fn get_file(
	State(state): State<Arc<AppState>>,
	Path(id): Path<String>,
	headers: HeaderMap,
) -> Response {
	let record = match state.store.get_file(&id) {
		Ok(Some(record)) if record.deleted_at.is_none() => record,
		Ok(_) => {
			return (StatusCode::NOT_FOUND, Json(json!({ "error": "file not found" })))
				.into_response()
		}
		Err(e) => return storage_failure(e),
	};

	let etag_header = format_etag_header(&record.etag);

	if let Some(client_tag) = headers.get("If-None-Match").and_then(|v| v.to_str().ok()) {
		if compare_etags(&parse_etag_header(client_tag), &record.etag) {
			// Client copy is current: bare ETag, no body
			return (StatusCode::NOT_MODIFIED, [("ETag", etag_header)]).into_response();
		}
	}

	let last_modified = Utc
		.timestamp_millis_opt(record.last_modified)
		.single()
		.unwrap_or_else(Utc::now)
		.format("%a, %d %b %Y %H:%M:%S GMT")
		.to_string();

	(
		StatusCode::OK,
		[
			("ETag", etag_header),
			("Last-Modified", last_modified),
			("Cache-Control", "private, must-revalidate, max-age=0".to_string()),
			("Vary", "If-None-Match".to_string()),
		],
		Json(wire_file(&record)),
	)
		.into_response()
}

/////////////////////
// PUT /files/{id} //
/////////////////////

/// ETag-guarded write.
///
/// An `If-Match` that disagrees with the stored tag yields 412 with the
/// full server version and leaves storage untouched. On acceptance the
/// server recomputes the ETag under the shared hashing contract and bumps
/// the version by exactly 1; an unknown id is created as a first accepted
/// write over the client's initial local version.
pub async fn put_file(
	State(state): State<Arc<AppState>>,
	Path(id): Path<String>,
	headers: HeaderMap,
	Json(body): Json<PutRequest>,
) -> Response {
	let existing = match state.store.get_file(&id) {
		Ok(existing) => existing,
		Err(e) => return storage_failure(e),
	};

	if let (Some(existing), Some(client_tag)) = (
		existing.as_ref(),
		headers.get("If-Match").and_then(|v| v.to_str().ok()),
	) {
		if !compare_etags(&parse_etag_header(client_tag), &existing.etag) {
			debug!("412 for {}: stored {} vs presented {}", id, existing.etag, client_tag);
			return (
				StatusCode::PRECONDITION_FAILED,
				Json(ConflictResponse {
					error: "Precondition Failed".to_string(),
					server_version: ServerVersion {
						etag: existing.etag.clone(),
						version: existing.version,
						content: existing.content.clone(),
						updated_at: iso_from_millis(existing.last_modified),
					},
				}),
			)
				.into_response();
		}
	}

	let now = now_millis();
	let next_version = existing.as_ref().map(|f| f.version).unwrap_or(1) + 1;
	let new_etag = generate_etag(&id, &body.content, now);

	let record = FileRecord {
		id: id.clone(),
		title: body.title.clone(),
		content: body.content,
		etag: new_etag.clone(),
		version: next_version,
		parent_folder_id: existing.as_ref().and_then(|f| f.parent_folder_id.clone()),
		is_folder: existing.as_ref().map(|f| f.is_folder).unwrap_or(false),
		last_modified: now,
		last_synced_at: now,
		is_dirty: false,
		deleted_at: None,
	};

	if let Err(e) = state.store.save_file(&record) {
		return storage_failure(e);
	}

	(
		StatusCode::OK,
		[("ETag", format_etag_header(&new_etag))],
		Json(PutResponse {
			id,
			title: body.title,
			etag: new_etag,
			version: next_version,
			updated_at: iso_from_millis(now),
		}),
	)
		.into_response()
}

// vim: ts=4
