/// End-to-end sync cycles against a live server instance
///
/// Spins the axum surface on an ephemeral port and drives the client
/// engine's full push/pull protocol over real HTTP: the offline-edit /
/// reconnect / clean-push path, the 412 accept-server path, pull of new
/// server files, and re-entry refusal.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use docsync::conflict::ResolutionStrategy;
use docsync::connectivity::{BackoffConfig, ConnectivityDetector};
use docsync::etag::generate_etag;
use docsync::server::{create_router, AppState, RateLimitConfig};
use docsync::store::Store;
use docsync::sync::{SyncConfig, SyncManager};
use docsync::types::{FileRecord, SyncStatus};
use docsync::util::now_millis;

struct Harness {
	_client_dir: TempDir,
	_server_dir: TempDir,
	client_store: Arc<Store>,
	server_store: Arc<Store>,
	detector: Arc<ConnectivityDetector>,
	manager: Arc<SyncManager>,
	server_task: tokio::task::JoinHandle<()>,
}

impl Drop for Harness {
	fn drop(&mut self) {
		self.manager.destroy();
		self.server_task.abort();
	}
}

async fn harness() -> Harness {
	let server_dir = TempDir::new().unwrap();
	let server_store = Arc::new(Store::open(&server_dir.path().join("server.db")).unwrap());

	let state = Arc::new(AppState::new(server_store.clone(), RateLimitConfig::default()));
	let app = create_router(state);
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr: SocketAddr = listener.local_addr().unwrap();
	let server_task = tokio::spawn(async move {
		axum::serve(listener, app).await.unwrap();
	});

	let client_dir = TempDir::new().unwrap();
	let client_store = Arc::new(Store::open(&client_dir.path().join("client.db")).unwrap());
	let detector = Arc::new(ConnectivityDetector::new());

	let config = SyncConfig {
		base_url: format!("http://{}", addr),
		user_id: "tester".to_string(),
		auto_sync_interval: None,
		push_attempts: 2,
		pull_page_size: 50,
		backoff: BackoffConfig {
			initial: Duration::from_millis(10),
			max: Duration::from_millis(50),
			multiplier: 2.0,
			jitter: false,
		},
	};
	let manager = SyncManager::new(client_store.clone(), detector.clone(), config);

	Harness {
		_client_dir: client_dir,
		_server_dir: server_dir,
		client_store,
		server_store,
		detector,
		manager,
		server_task,
	}
}

fn local_file(id: &str, content: &str) -> FileRecord {
	let last_modified = now_millis();
	FileRecord {
		id: id.to_string(),
		title: format!("doc {}", id),
		content: content.to_string(),
		etag: generate_etag(id, content, last_modified),
		version: 1,
		parent_folder_id: None,
		is_folder: false,
		last_modified,
		last_synced_at: 0,
		is_dirty: true,
		deleted_at: None,
	}
}

#[tokio::test]
async fn test_offline_edit_then_reconnect_pushes_clean() {
	let h = harness().await;

	// Edit while offline
	h.detector.set_offline();
	h.client_store.save_file(&local_file("a", "hello")).unwrap();

	let refused = h.manager.sync().await;
	assert!(!refused.success);
	assert_eq!(refused.message.as_deref(), Some("Offline"));
	assert_eq!(h.manager.status(), SyncStatus::Offline);

	// Reconnect: the first cycle pushes the dirty file
	h.detector.set_online();
	let result = h.manager.sync().await;

	assert!(result.success, "cycle failed: {:?}", result.message);
	assert_eq!(result.pushed, 1);
	assert!(result.conflicts.is_empty());
	assert_eq!(h.manager.status(), SyncStatus::Idle);

	let local = h.client_store.get_file("a").unwrap().unwrap();
	assert!(!local.is_dirty);
	assert_eq!(local.version, 2);
	assert!(local.last_synced_at > 0);

	// Client adopted the server-issued tag
	let remote = h.server_store.get_file("a").unwrap().unwrap();
	assert_eq!(local.etag, remote.etag);
	assert_eq!(remote.content, "hello");
	assert_eq!(remote.version, 2);
}

#[tokio::test]
async fn test_push_conflict_accept_server() {
	let h = harness().await;
	h.detector.set_online();

	// The server holds a newer copy the client never saw
	let server_ms = now_millis();
	let server_etag = generate_etag("doc", "S", server_ms);
	h.server_store
		.save_file(&FileRecord {
			id: "doc".to_string(),
			title: "doc doc".to_string(),
			content: "S".to_string(),
			etag: server_etag.clone(),
			version: 5,
			parent_folder_id: None,
			is_folder: false,
			last_modified: server_ms,
			last_synced_at: server_ms,
			is_dirty: false,
			deleted_at: None,
		})
		.unwrap();

	// The client has its own dirty copy with a stale tag
	h.client_store.save_file(&local_file("doc", "L")).unwrap();

	h.manager.set_conflict_callback(|_conflict| ResolutionStrategy::Server);
	let result = h.manager.sync().await;

	assert!(result.success);
	assert_eq!(result.conflicts, vec!["doc".to_string()]);
	assert_eq!(result.pushed, 0);

	let local = h.client_store.get_file("doc").unwrap().unwrap();
	assert_eq!(local.content, "S");
	assert_eq!(local.etag, server_etag);
	assert_eq!(local.version, 5);
	assert!(!local.is_dirty);
}

#[tokio::test]
async fn test_push_conflict_accept_local_repushes() {
	let h = harness().await;
	h.detector.set_online();

	let server_ms = now_millis();
	h.server_store
		.save_file(&FileRecord {
			id: "doc".to_string(),
			title: "doc".to_string(),
			content: "S".to_string(),
			etag: generate_etag("doc", "S", server_ms),
			version: 5,
			parent_folder_id: None,
			is_folder: false,
			last_modified: server_ms,
			last_synced_at: server_ms,
			is_dirty: false,
			deleted_at: None,
		})
		.unwrap();

	h.client_store.save_file(&local_file("doc", "L")).unwrap();

	h.manager.set_conflict_callback(|_conflict| ResolutionStrategy::Local);
	let result = h.manager.sync().await;

	assert!(result.success);
	// The 412 is recorded as a conflict even though the re-push landed
	assert_eq!(result.conflicts, vec!["doc".to_string()]);

	// Local content won and the server accepted the follow-up write
	let remote = h.server_store.get_file("doc").unwrap().unwrap();
	assert_eq!(remote.content, "L");
	assert_eq!(remote.version, 6);

	let local = h.client_store.get_file("doc").unwrap().unwrap();
	assert_eq!(local.content, "L");
	assert!(!local.is_dirty);
	assert_eq!(local.etag, remote.etag);
}

#[tokio::test]
async fn test_pull_inserts_new_server_files() {
	let h = harness().await;
	h.detector.set_online();

	let server_ms = now_millis();
	h.server_store
		.save_file(&FileRecord {
			id: "fresh".to_string(),
			title: "fresh".to_string(),
			content: "from server".to_string(),
			etag: generate_etag("fresh", "from server", server_ms),
			version: 3,
			parent_folder_id: None,
			is_folder: false,
			last_modified: server_ms,
			last_synced_at: server_ms,
			is_dirty: false,
			deleted_at: None,
		})
		.unwrap();

	let result = h.manager.sync().await;
	assert!(result.success);
	assert_eq!(result.pulled, 1);

	let local = h.client_store.get_file("fresh").unwrap().unwrap();
	assert_eq!(local.content, "from server");
	assert_eq!(local.version, 3);
	assert!(!local.is_dirty);

	// Metadata moved forward
	let meta = h.client_store.get_metadata("tester").unwrap().unwrap();
	assert!(meta.last_synced_at > 0);
	assert!(!meta.sync_in_progress);

	// A second cycle finds nothing new
	let again = h.manager.sync().await;
	assert!(again.success);
	assert_eq!(again.pulled, 0);
}

#[tokio::test]
async fn test_pull_skips_identical_copy_and_keeps_dirty_conflict() {
	let h = harness().await;
	h.detector.set_online();

	// Server file already known locally and clean
	let ms = now_millis();
	let etag = generate_etag("same", "shared", ms);
	let shared = FileRecord {
		id: "same".to_string(),
		title: "same".to_string(),
		content: "shared".to_string(),
		etag: etag.clone(),
		version: 2,
		parent_folder_id: None,
		is_folder: false,
		last_modified: ms,
		last_synced_at: ms,
		is_dirty: false,
		deleted_at: None,
	};
	h.server_store.save_file(&shared).unwrap();
	h.client_store.save_file(&shared).unwrap();

	let result = h.manager.sync().await;
	assert!(result.success);
	// Identical tags are a no-op, not a pull
	assert_eq!(result.pulled, 0);
	assert!(result.conflicts.is_empty());
}

#[tokio::test]
async fn test_sync_reentry_is_refused() {
	let h = harness().await;
	h.detector.set_online();

	// Fill the push queue with enough work that two cycles overlap
	for i in 0..10 {
		h.client_store.save_file(&local_file(&format!("f{}", i), "body")).unwrap();
	}

	let first = {
		let manager = h.manager.clone();
		tokio::spawn(async move { manager.sync().await })
	};
	// Let the first cycle enter before contending
	tokio::time::sleep(Duration::from_millis(1)).await;
	let second = h.manager.sync().await;
	let first = first.await.unwrap();

	let refused = if first.success { &second } else { &first };
	assert_eq!(refused.message.as_deref(), Some("Sync already in progress"));
}

#[tokio::test]
async fn test_unreachable_server_marks_engine_offline() {
	// Bind a port and immediately release it so nothing is listening
	let addr = {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		listener.local_addr().unwrap()
	};

	let client_dir = TempDir::new().unwrap();
	let client_store = Arc::new(Store::open(&client_dir.path().join("client.db")).unwrap());
	let detector = Arc::new(ConnectivityDetector::new());
	detector.set_online();

	let manager = SyncManager::new(
		client_store.clone(),
		detector,
		SyncConfig {
			base_url: format!("http://{}", addr),
			user_id: "tester".to_string(),
			auto_sync_interval: None,
			push_attempts: 2,
			pull_page_size: 50,
			backoff: BackoffConfig {
				initial: Duration::from_millis(5),
				max: Duration::from_millis(10),
				multiplier: 2.0,
				jitter: false,
			},
		},
	);

	client_store.save_file(&local_file("a", "hello")).unwrap();
	let result = manager.sync().await;

	assert!(!result.success);
	assert_eq!(manager.status(), SyncStatus::Offline);
	// The edit survives for the next cycle
	assert!(client_store.get_file("a").unwrap().unwrap().is_dirty);
	manager.destroy();
}

#[tokio::test]
async fn test_rate_limited_push_pauses_the_cycle() {
	use axum::http::StatusCode;
	use axum::response::IntoResponse;
	use axum::Json;
	use serde_json::json;
	use std::sync::atomic::{AtomicUsize, Ordering};

	// A server that 429s every write, counting the attempts it sees
	let hits = Arc::new(AtomicUsize::new(0));
	let hits_handler = hits.clone();
	let app = axum::Router::new().route(
		"/files/:id",
		axum::routing::put(move || {
			let hits = hits_handler.clone();
			async move {
				hits.fetch_add(1, Ordering::SeqCst);
				(
					StatusCode::TOO_MANY_REQUESTS,
					[("Retry-After", "1")],
					Json(json!({ "error": "rate limit exceeded" })),
				)
					.into_response()
			}
		}),
	);
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let server_task = tokio::spawn(async move {
		axum::serve(listener, app).await.unwrap();
	});

	let client_dir = TempDir::new().unwrap();
	let client_store = Arc::new(Store::open(&client_dir.path().join("client.db")).unwrap());
	let detector = Arc::new(ConnectivityDetector::new());
	detector.set_online();

	let manager = SyncManager::new(
		client_store.clone(),
		detector,
		SyncConfig {
			base_url: format!("http://{}", addr),
			user_id: "tester".to_string(),
			auto_sync_interval: None,
			push_attempts: 2,
			pull_page_size: 50,
			backoff: BackoffConfig {
				initial: Duration::from_millis(5),
				max: Duration::from_millis(10),
				multiplier: 2.0,
				jitter: false,
			},
		},
	);

	client_store.save_file(&local_file("a", "one")).unwrap();
	client_store.save_file(&local_file("b", "two")).unwrap();

	let result = manager.sync().await;

	// Rate limiting pauses the whole cycle rather than skipping the file
	assert!(!result.success);
	assert_eq!(manager.status(), SyncStatus::Error);
	assert!(result.message.unwrap().contains("429"));

	// Only the first file's retries ran; the second was never attempted
	assert_eq!(hits.load(Ordering::SeqCst), 2);
	// No file was skipped past: both stay dirty for the next cycle
	assert!(result.errors.is_empty());
	assert!(client_store.get_file("a").unwrap().unwrap().is_dirty);
	assert!(client_store.get_file("b").unwrap().unwrap().is_dirty);

	manager.destroy();
	server_task.abort();
}

#[tokio::test]
async fn test_sync_file_pushes_single_file() {
	let h = harness().await;
	h.detector.set_online();

	h.client_store.save_file(&local_file("solo", "one")).unwrap();
	h.client_store.save_file(&local_file("other", "two")).unwrap();

	let result = h.manager.sync_file("solo").await;
	assert!(result.success);
	assert_eq!(result.pushed, 1);

	// Only the requested file moved
	assert!(!h.client_store.get_file("solo").unwrap().unwrap().is_dirty);
	assert!(h.client_store.get_file("other").unwrap().unwrap().is_dirty);
	assert!(h.server_store.get_file("other").unwrap().is_none());
}

#[tokio::test]
async fn test_queue_sync_orders_push_phase() {
	let h = harness().await;
	h.detector.set_online();

	h.client_store.save_file(&local_file("low", "x")).unwrap();
	h.client_store.save_file(&local_file("high", "y")).unwrap();

	// Lower number syncs earlier
	h.manager.queue_sync("low", 10);
	h.manager.queue_sync("high", 1);

	let result = h.manager.sync().await;
	assert!(result.success);
	assert_eq!(result.pushed, 2);

	// The higher-priority file reached the server first
	let high = h.server_store.get_file("high").unwrap().unwrap();
	let low = h.server_store.get_file("low").unwrap().unwrap();
	assert!(high.last_modified <= low.last_modified);
}

#[tokio::test]
async fn test_status_listener_sees_transitions() {
	let h = harness().await;
	h.detector.set_online();

	let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
	let seen_cb = seen.clone();
	h.manager.on_status_change(Box::new(move |status| {
		seen_cb.lock().unwrap().push(status);
	}));

	h.client_store.save_file(&local_file("a", "x")).unwrap();
	let result = h.manager.sync().await;
	assert!(result.success);

	let seen = seen.lock().unwrap();
	assert_eq!(*seen, vec![SyncStatus::Syncing, SyncStatus::Idle]);
}

// vim: ts=4
