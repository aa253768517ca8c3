//! HTTP client for the sync wire protocol
//!
//! Thin typed wrapper over the three endpoints. Transport failures and
//! non-2xx statuses come back as classified [`SyncError`]s; the 412
//! precondition response is not an error but a first-class outcome carrying
//! the server's copy.

use reqwest::StatusCode;

use crate::error::SyncError;
use crate::etag::format_etag_header;
use crate::types::{ConflictResponse, PutRequest, PutResponse, RemoteFile, SyncPage};

/// Outcome of a push attempt
#[derive(Debug, Clone)]
pub enum PushOutcome {
	/// 2xx: the server accepted the write
	Accepted(PutResponse),

	/// 412: the stored ETag differs; here is the server's copy
	PreconditionFailed(crate::types::ServerVersion),
}

/// Typed client over the sync endpoints
pub struct SyncClient {
	http: reqwest::Client,
	base_url: String,
	user_id: String,
}

impl SyncClient {
	pub fn new(base_url: &str, user_id: &str) -> Self {
		SyncClient {
			http: reqwest::Client::new(),
			base_url: base_url.trim_end_matches('/').to_string(),
			user_id: user_id.to_string(),
		}
	}

	/// `PUT /files/{id}` with an optional `If-Match` precondition
	pub async fn push_file(
		&self,
		id: &str,
		title: &str,
		content: &str,
		etag: Option<&str>,
	) -> Result<PushOutcome, SyncError> {
		let url = format!("{}/files/{}", self.base_url, id);

		let mut request = self
			.http
			.put(&url)
			.header("X-User-Id", &self.user_id)
			.json(&PutRequest { content: content.to_string(), title: title.to_string() });
		if let Some(etag) = etag {
			request = request.header("If-Match", format_etag_header(etag));
		}

		let response = request.send().await.map_err(|e| SyncError::from_transport(&e))?;
		let status = response.status();

		if status.is_success() {
			let body: PutResponse =
				response.json().await.map_err(|e| SyncError::from_transport(&e))?;
			return Ok(PushOutcome::Accepted(body));
		}

		if status == StatusCode::PRECONDITION_FAILED {
			let body: ConflictResponse =
				response.json().await.map_err(|e| SyncError::from_transport(&e))?;
			return Ok(PushOutcome::PreconditionFailed(body.server_version));
		}

		Err(error_from_response(response).await)
	}

	/// One page of `GET /files/sync`
	pub async fn pull_page(
		&self,
		updated_after: &str,
		cursor: Option<&str>,
		limit: u32,
	) -> Result<SyncPage, SyncError> {
		let url = format!("{}/files/sync", self.base_url);
		let limit = limit.to_string();

		let mut request = self
			.http
			.get(&url)
			.header("X-User-Id", &self.user_id)
			.query(&[("updated_after", updated_after), ("limit", limit.as_str())]);
		if let Some(cursor) = cursor {
			request = request.query(&[("cursor", cursor)]);
		}

		let response = request.send().await.map_err(|e| SyncError::from_transport(&e))?;
		if !response.status().is_success() {
			return Err(error_from_response(response).await);
		}

		response.json().await.map_err(|e| SyncError::from_transport(&e))
	}

	/// `GET /files/{id}` with an optional `If-None-Match`; `Ok(None)` means
	/// 304, the caller's copy is current
	pub async fn fetch_file(
		&self,
		id: &str,
		if_none_match: Option<&str>,
	) -> Result<Option<RemoteFile>, SyncError> {
		let url = format!("{}/files/{}", self.base_url, id);

		let mut request = self.http.get(&url).header("X-User-Id", &self.user_id);
		if let Some(etag) = if_none_match {
			request = request.header("If-None-Match", format_etag_header(etag));
		}

		let response = request.send().await.map_err(|e| SyncError::from_transport(&e))?;
		match response.status() {
			StatusCode::NOT_MODIFIED => Ok(None),
			status if status.is_success() => {
				let body: RemoteFile =
					response.json().await.map_err(|e| SyncError::from_transport(&e))?;
				Ok(Some(body))
			}
			_ => Err(error_from_response(response).await),
		}
	}
}

/// Classify a non-2xx response, honouring `Retry-After`
async fn error_from_response(response: reqwest::Response) -> SyncError {
	let status = response.status().as_u16();
	let retry_after = response
		.headers()
		.get("Retry-After")
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.parse().ok());
	let body = response.text().await.unwrap_or_default();

	let message = if body.is_empty() {
		format!("request failed with status {}", status)
	} else {
		body
	};
	SyncError::from_status(status, message, retry_after)
}

// vim: ts=4
