//! Durable local store for files, the operation log, and sync metadata
//!
//! Backed by a redb database with four tables:
//!
//! - `files`: file id → bincode [`FileRecord`]
//! - `operations`: operation id → bincode [`Operation`]
//! - `ops_by_file`: `fileId <US> opId` → operation id, a secondary index
//!   giving per-file operation scans as a single prefix range
//! - `sync_metadata`: user id → bincode [`SyncMetadata`]
//!
//! plus a `meta` table carrying the schema version. Every public method runs
//! in a single read or write transaction; no cross-call transactions are
//! exposed. Dirty-file filtering happens in memory over the `files` table
//! scan, which is a deliberate design decision (boolean keys index poorly).

use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::logging::debug;
use crate::types::{FileRecord, Operation, SyncMetadata};
use crate::util::now_millis;

const FILES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("files");
const OPERATIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("operations");
const OPS_BY_FILE_TABLE: TableDefinition<&str, &str> = TableDefinition::new("ops_by_file");
const SYNC_META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sync_metadata");
const META_TABLE: TableDefinition<&str, u32> = TableDefinition::new("meta");

/// Current schema version; upgrades are additive only
const SCHEMA_VERSION: u32 = 1;

/// Storage-pressure threshold for [`Store::is_storage_nearly_full`]
const NEARLY_FULL_THRESHOLD: f64 = 0.8;

/// Separator between file id and operation id in the `ops_by_file` index.
/// File ids are UUIDs and never contain control characters.
const INDEX_SEP: char = '\u{1f}';

/// Platform storage usage as reported to the GC and the UI
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StorageEstimate {
	/// Bytes used by the database file
	pub usage: u64,

	/// Capacity of the volume holding the database, 0 if undetectable
	pub quota: u64,

	/// usage / quota, in [0, 1]; 0 when the quota is unknown
	pub percentage: f64,
}

/// Durable store handle; cheap to share behind an `Arc`
pub struct Store {
	db: redb::Database,
	db_path: PathBuf,
}

impl Store {
	/// Open or create the store at `db_path` and verify the schema version
	pub fn open(db_path: &Path) -> Result<Self, StoreError> {
		let db = redb::Database::create(db_path)?;

		{
			let write_txn = db.begin_write()?;
			{
				let mut meta = write_txn.open_table(META_TABLE)?;
				let found = meta.get("schema_version")?.map(|v| v.value());
				match found {
					Some(found) => {
						if found > SCHEMA_VERSION {
							return Err(StoreError::SchemaTooNew {
								found,
								supported: SCHEMA_VERSION,
							});
						}
						if found < SCHEMA_VERSION {
							// Additive upgrade: new tables are created below
							meta.insert("schema_version", SCHEMA_VERSION)?;
						}
					}
					None => {
						meta.insert("schema_version", SCHEMA_VERSION)?;
					}
				}
			}
			// Ensure all tables exist
			let _ = write_txn.open_table(FILES_TABLE)?;
			let _ = write_txn.open_table(OPERATIONS_TABLE)?;
			let _ = write_txn.open_table(OPS_BY_FILE_TABLE)?;
			let _ = write_txn.open_table(SYNC_META_TABLE)?;
			write_txn.commit()?;
		}

		debug!("store opened at {}", db_path.display());
		Ok(Store { db, db_path: db_path.to_path_buf() })
	}

	///////////
	// Files //
	///////////

	pub fn get_file(&self, id: &str) -> Result<Option<FileRecord>, StoreError> {
		let read_txn = self.db.begin_read()?;
		let table = read_txn.open_table(FILES_TABLE)?;

		match table.get(id)? {
			Some(entry) => {
				let record: FileRecord = bincode::deserialize(entry.value())?;
				Ok(Some(record))
			}
			None => Ok(None),
		}
	}

	pub fn save_file(&self, record: &FileRecord) -> Result<(), StoreError> {
		let bytes = bincode::serialize(record)?;

		let write_txn = self.db.begin_write()?;
		{
			let mut table = write_txn.open_table(FILES_TABLE)?;
			table.insert(record.id.as_str(), bytes.as_slice())?;
		}
		write_txn.commit()?;

		Ok(())
	}

	/// Delete a file and its entire operation log; returns whether the
	/// file existed
	pub fn delete_file(&self, id: &str) -> Result<bool, StoreError> {
		let write_txn = self.db.begin_write()?;
		let existed;
		{
			let mut files = write_txn.open_table(FILES_TABLE)?;
			existed = files.remove(id)?.is_some();

			let mut ops = write_txn.open_table(OPERATIONS_TABLE)?;
			let mut index = write_txn.open_table(OPS_BY_FILE_TABLE)?;
			for op_id in index_scan(&index, id)? {
				ops.remove(op_id.as_str())?;
				index.remove(index_key(id, &op_id).as_str())?;
			}
		}
		write_txn.commit()?;

		Ok(existed)
	}

	pub fn get_all_files(&self) -> Result<Vec<FileRecord>, StoreError> {
		let read_txn = self.db.begin_read()?;
		let table = read_txn.open_table(FILES_TABLE)?;

		let mut files = Vec::new();
		let mut iter = table.iter()?;
		loop {
			match iter.next() {
				Some(Ok((_, value))) => {
					files.push(bincode::deserialize(value.value())?);
				}
				None => break,
				Some(Err(e)) => return Err(e.into()),
			}
		}

		Ok(files)
	}

	/// Files with unacknowledged local changes. Filtered in memory over the
	/// full file scan.
	pub fn get_dirty_files(&self) -> Result<Vec<FileRecord>, StoreError> {
		Ok(self.get_all_files()?.into_iter().filter(|f| f.is_dirty).collect())
	}

	/// Mark a file locally modified: sets the dirty flag and refreshes
	/// `last_modified`. Returns false if the file is unknown.
	pub fn mark_file_dirty(&self, id: &str) -> Result<bool, StoreError> {
		self.update_file(id, |record| {
			record.is_dirty = true;
			record.last_modified = now_millis();
		})
	}

	/// Mark a file acknowledged by the server: clears the dirty flag,
	/// installs the server-issued ETag, and stamps `last_synced_at`.
	pub fn mark_file_clean(&self, id: &str, new_etag: &str) -> Result<bool, StoreError> {
		self.update_file(id, |record| {
			record.is_dirty = false;
			record.etag = new_etag.to_string();
			record.last_synced_at = now_millis();
		})
	}

	fn update_file(
		&self,
		id: &str,
		mutate: impl FnOnce(&mut FileRecord),
	) -> Result<bool, StoreError> {
		let write_txn = self.db.begin_write()?;
		let found;
		{
			let mut table = write_txn.open_table(FILES_TABLE)?;
			let existing = match table.get(id)? {
				Some(entry) => {
					let record: FileRecord = bincode::deserialize(entry.value())?;
					Some(record)
				}
				None => None,
			};

			match existing {
				Some(mut record) => {
					mutate(&mut record);
					let bytes = bincode::serialize(&record)?;
					table.insert(id, bytes.as_slice())?;
					found = true;
				}
				None => found = false,
			}
		}
		write_txn.commit()?;

		Ok(found)
	}

	////////////////
	// Operations //
	////////////////

	pub fn add_operation(&self, op: &Operation) -> Result<(), StoreError> {
		let bytes = bincode::serialize(op)?;

		let write_txn = self.db.begin_write()?;
		{
			let mut ops = write_txn.open_table(OPERATIONS_TABLE)?;
			ops.insert(op.id.as_str(), bytes.as_slice())?;

			let mut index = write_txn.open_table(OPS_BY_FILE_TABLE)?;
			index.insert(index_key(&op.file_id, &op.id).as_str(), op.id.as_str())?;
		}
		write_txn.commit()?;

		Ok(())
	}

	/// All operations for a file, ordered by timestamp
	pub fn get_operations(&self, file_id: &str) -> Result<Vec<Operation>, StoreError> {
		let read_txn = self.db.begin_read()?;
		let ops = read_txn.open_table(OPERATIONS_TABLE)?;
		let index = read_txn.open_table(OPS_BY_FILE_TABLE)?;

		let mut result = Vec::new();
		for op_id in index_scan(&index, file_id)? {
			if let Some(entry) = ops.get(op_id.as_str())? {
				result.push(bincode::deserialize::<Operation>(entry.value())?);
			}
		}
		result.sort_by_key(|op| op.timestamp);

		Ok(result)
	}

	pub fn get_unsynced_operations(&self, file_id: &str) -> Result<Vec<Operation>, StoreError> {
		Ok(self.get_operations(file_id)?.into_iter().filter(|op| !op.synced).collect())
	}

	/// Flip the `synced` flag on the given operations after an
	/// acknowledged push
	pub fn mark_operations_synced(&self, ids: &[String]) -> Result<(), StoreError> {
		let write_txn = self.db.begin_write()?;
		{
			let mut ops = write_txn.open_table(OPERATIONS_TABLE)?;
			for id in ids {
				let existing = match ops.get(id.as_str())? {
					Some(entry) => {
						let op: Operation = bincode::deserialize(entry.value())?;
						Some(op)
					}
					None => None,
				};
				if let Some(mut op) = existing {
					op.synced = true;
					let bytes = bincode::serialize(&op)?;
					ops.insert(id.as_str(), bytes.as_slice())?;
				}
			}
		}
		write_txn.commit()?;

		Ok(())
	}

	/// Atomically replace the whole operation log of a file (GC compaction)
	pub fn replace_operations(
		&self,
		file_id: &str,
		operations: &[Operation],
	) -> Result<(), StoreError> {
		let write_txn = self.db.begin_write()?;
		{
			let mut ops = write_txn.open_table(OPERATIONS_TABLE)?;
			let mut index = write_txn.open_table(OPS_BY_FILE_TABLE)?;

			for op_id in index_scan(&index, file_id)? {
				ops.remove(op_id.as_str())?;
				index.remove(index_key(file_id, &op_id).as_str())?;
			}

			for op in operations {
				let bytes = bincode::serialize(op)?;
				ops.insert(op.id.as_str(), bytes.as_slice())?;
				index.insert(index_key(file_id, &op.id).as_str(), op.id.as_str())?;
			}
		}
		write_txn.commit()?;

		Ok(())
	}

	/// Delete synced operations older than `max_age_ms`; returns how many
	/// were removed
	pub fn delete_old_operations(&self, max_age_ms: i64) -> Result<usize, StoreError> {
		let cutoff = now_millis() - max_age_ms;

		let write_txn = self.db.begin_write()?;
		let mut deleted = 0;
		{
			let mut ops = write_txn.open_table(OPERATIONS_TABLE)?;
			let mut index = write_txn.open_table(OPS_BY_FILE_TABLE)?;

			let mut stale = Vec::new();
			let mut iter = ops.iter()?;
			loop {
				match iter.next() {
					Some(Ok((key, value))) => {
						let op: Operation = bincode::deserialize(value.value())?;
						if op.synced && op.timestamp < cutoff {
							stale.push((key.value().to_string(), op.file_id));
						}
					}
					None => break,
					Some(Err(e)) => return Err(e.into()),
				}
			}
			drop(iter);

			for (op_id, file_id) in stale {
				ops.remove(op_id.as_str())?;
				index.remove(index_key(&file_id, &op_id).as_str())?;
				deleted += 1;
			}
		}
		write_txn.commit()?;

		Ok(deleted)
	}

	/// Distinct file ids that currently have logged operations
	pub fn operation_file_ids(&self) -> Result<Vec<String>, StoreError> {
		let read_txn = self.db.begin_read()?;
		let index = read_txn.open_table(OPS_BY_FILE_TABLE)?;

		let mut ids = BTreeSet::new();
		let mut iter = index.iter()?;
		loop {
			match iter.next() {
				Some(Ok((key, _))) => {
					let composite = key.value().to_string();
					if let Some(pos) = composite.find(INDEX_SEP) {
						ids.insert(composite[..pos].to_string());
					}
				}
				None => break,
				Some(Err(e)) => return Err(e.into()),
			}
		}

		Ok(ids.into_iter().collect())
	}

	//////////////
	// Metadata //
	//////////////

	pub fn get_metadata(&self, user_id: &str) -> Result<Option<SyncMetadata>, StoreError> {
		let read_txn = self.db.begin_read()?;
		let table = read_txn.open_table(SYNC_META_TABLE)?;

		match table.get(user_id)? {
			Some(entry) => {
				let meta: SyncMetadata = bincode::deserialize(entry.value())?;
				Ok(Some(meta))
			}
			None => Ok(None),
		}
	}

	pub fn save_metadata(&self, meta: &SyncMetadata) -> Result<(), StoreError> {
		let bytes = bincode::serialize(meta)?;

		let write_txn = self.db.begin_write()?;
		{
			let mut table = write_txn.open_table(SYNC_META_TABLE)?;
			table.insert(meta.user_id.as_str(), bytes.as_slice())?;
		}
		write_txn.commit()?;

		Ok(())
	}

	/////////////
	// Storage //
	/////////////

	/// Report database usage against the capacity of its volume
	pub fn get_storage_estimate(&self) -> StorageEstimate {
		let usage = std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);

		let disks = sysinfo::Disks::new_with_refreshed_list();
		let mut quota = 0u64;
		let mut best_match = 0usize;
		for disk in disks.list() {
			let mount = disk.mount_point();
			if self.db_path.starts_with(mount) && mount.as_os_str().len() >= best_match {
				best_match = mount.as_os_str().len();
				quota = disk.total_space();
			}
		}

		let percentage = if quota > 0 { usage as f64 / quota as f64 } else { 0.0 };
		StorageEstimate { usage, quota, percentage }
	}

	pub fn is_storage_nearly_full(&self) -> bool {
		self.get_storage_estimate().percentage > NEARLY_FULL_THRESHOLD
	}

	/// Wipe every table (account reset). The schema version survives.
	pub fn clear_all(&self) -> Result<(), StoreError> {
		let write_txn = self.db.begin_write()?;
		{
			clear_table(&mut write_txn.open_table(FILES_TABLE)?)?;
			clear_table(&mut write_txn.open_table(SYNC_META_TABLE)?)?;
			clear_table(&mut write_txn.open_table(OPERATIONS_TABLE)?)?;

			let mut index = write_txn.open_table(OPS_BY_FILE_TABLE)?;
			let mut keys = Vec::new();
			let mut iter = index.iter()?;
			loop {
				match iter.next() {
					Some(Ok((key, _))) => keys.push(key.value().to_string()),
					None => break,
					Some(Err(e)) => return Err(e.into()),
				}
			}
			drop(iter);
			for key in keys {
				index.remove(key.as_str())?;
			}
		}
		write_txn.commit()?;

		Ok(())
	}
}

fn index_key(file_id: &str, op_id: &str) -> String {
	format!("{}{}{}", file_id, INDEX_SEP, op_id)
}

/// Operation ids for a file via a single prefix range over the index
fn index_scan(
	index: &impl ReadableTable<&'static str, &'static str>,
	file_id: &str,
) -> Result<Vec<String>, StoreError> {
	let start = format!("{}{}", file_id, INDEX_SEP);
	// US (0x1f) sorts immediately before 0x20, so this bounds the prefix
	let end = format!("{}\u{20}", file_id);

	let mut op_ids = Vec::new();
	let mut range = index.range(start.as_str()..end.as_str())?;
	loop {
		match range.next() {
			Some(Ok((_, value))) => op_ids.push(value.value().to_string()),
			None => break,
			Some(Err(e)) => return Err(e.into()),
		}
	}

	Ok(op_ids)
}

fn clear_table(
	table: &mut redb::Table<'_, &'static str, &'static [u8]>,
) -> Result<(), StoreError> {
	let mut keys = Vec::new();
	let mut iter = table.iter()?;
	loop {
		match iter.next() {
			Some(Ok((key, _))) => keys.push(key.value().to_string()),
			None => break,
			Some(Err(e)) => return Err(e.into()),
		}
	}
	drop(iter);

	for key in keys {
		table.remove(key.as_str())?;
	}

	Ok(())
}


// vim: ts=4
