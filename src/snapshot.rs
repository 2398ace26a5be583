use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::pathutil::resolve_within_root;
use crate::scan::{Scanner, hash_bytes};

/// Version snapshot collaborator: immutable recorded states of the working
/// tree, used to retrieve historical ("base") file content during merges.
#[async_trait]
pub trait SnapshotRepo: Send + Sync {
	/// Identifier of the most recent snapshot, if any exists.
	async fn head(&self) -> Result<Option<String>, SyncError>;

	/// Whether a snapshot with this identifier is known and reachable.
	async fn exists(&self, id: &str) -> Result<bool, SyncError>;

	/// Text content of `path` as recorded at snapshot `id`, or `None` when
	/// the snapshot does not contain the path.
	async fn content_at(&self, id: &str, path: &str) -> Result<Option<String>, SyncError>;

	/// Record the current working tree as a new snapshot. No-ops when the
	/// tree is unchanged since the current head.
	async fn snapshot(&self, message: &str) -> Result<(), SyncError>;
}

/// One recorded snapshot: a message, a parent link and the path → blob-hash
/// map of the tree at that point.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotRecord {
	id: String,
	parent: Option<String>,
	message: String,
	created_at: String,
	files: BTreeMap<String, String>,
}

/// Directory-backed snapshot store.
///
/// Blobs live content-addressed under `objects/<sha256>`, snapshot records
/// as JSON under `commits/<id>.json`, and `HEAD` holds the current
/// identifier. Snapshot identifiers are the SHA-256 of the parent id plus
/// the canonical file map, so an unchanged tree reproduces the head id.
pub struct DirSnapshotRepo {
	content_root: PathBuf,
	store_dir: PathBuf,
}

impl DirSnapshotRepo {
	pub fn new(content_root: impl Into<PathBuf>, store_dir: impl Into<PathBuf>) -> Self {
		Self {
			content_root: content_root.into(),
			store_dir: store_dir.into(),
		}
	}

	fn head_path(&self) -> PathBuf {
		self.store_dir.join("HEAD")
	}

	fn record_path(&self, id: &str) -> PathBuf {
		self.store_dir.join("commits").join(format!("{}.json", id))
	}

	fn object_path(&self, hash: &str) -> PathBuf {
		self.store_dir.join("objects").join(hash)
	}

	fn read_head(&self) -> Result<Option<String>, SyncError> {
		let path = self.head_path();
		if !path.exists() {
			return Ok(None);
		}
		let id = fs::read_to_string(&path)?.trim().to_string();
		Ok(if id.is_empty() { None } else { Some(id) })
	}

	fn read_record(&self, id: &str) -> Result<Option<SnapshotRecord>, SyncError> {
		// Identifiers come from clients; confine them like any other path.
		if id.is_empty() || id.contains('/') || id.contains('\\') || id.starts_with('.') {
			return Ok(None);
		}
		let path = self.record_path(id);
		if !path.exists() {
			return Ok(None);
		}
		let bytes = fs::read(&path)?;
		let record = serde_json::from_slice(&bytes)
			.map_err(|e| SyncError::Snapshot(format!("corrupt snapshot record {}: {}", id, e)))?;
		Ok(Some(record))
	}

	fn snapshot_id(parent: Option<&str>, files: &BTreeMap<String, String>) -> Result<String, SyncError> {
		let canonical = serde_json::to_string(files)
			.map_err(|e| SyncError::Snapshot(format!("failed to encode file map: {}", e)))?;
		let mut seed = String::new();
		if let Some(parent) = parent {
			seed.push_str(parent);
			seed.push('\n');
		}
		seed.push_str(&canonical);
		Ok(hash_bytes(seed.as_bytes()))
	}
}

#[async_trait]
impl SnapshotRepo for DirSnapshotRepo {
	async fn head(&self) -> Result<Option<String>, SyncError> {
		self.read_head()
	}

	async fn exists(&self, id: &str) -> Result<bool, SyncError> {
		Ok(self.read_record(id)?.is_some())
	}

	async fn content_at(&self, id: &str, path: &str) -> Result<Option<String>, SyncError> {
		let Some(record) = self.read_record(id)? else {
			return Ok(None);
		};
		let Some(hash) = record.files.get(path) else {
			return Ok(None);
		};
		let bytes = fs::read(self.object_path(hash))?;
		// Content is treated as text end to end; non-UTF-8 files surface
		// lossily and fall into the whole-file conflict policy.
		Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
	}

	async fn snapshot(&self, message: &str) -> Result<(), SyncError> {
		let manifest = Scanner::new(&self.content_root)
			.scan()
			.map_err(|e| SyncError::Snapshot(format!("scan before snapshot failed: {}", e)))?;

		let files: BTreeMap<String, String> = manifest
			.files
			.iter()
			.map(|(path, entry)| (path.clone(), entry.content_hash.clone()))
			.collect();

		let parent = self.read_head()?;
		if let Some(parent_id) = &parent {
			if let Some(head_record) = self.read_record(parent_id)? {
				if head_record.files == files {
					debug!("snapshot: tree unchanged since {}, nothing to record", parent_id);
					return Ok(());
				}
			}
		}

		fs::create_dir_all(self.store_dir.join("objects"))?;
		fs::create_dir_all(self.store_dir.join("commits"))?;

		for (path, hash) in &files {
			let object = self.object_path(hash);
			if object.exists() {
				continue;
			}
			let source = resolve_within_root(&self.content_root, path)?;
			let bytes = fs::read(&source)?;
			fs::write(&object, bytes)?;
		}

		let id = Self::snapshot_id(parent.as_deref(), &files)?;
		let record = SnapshotRecord {
			id: id.clone(),
			parent,
			message: message.to_string(),
			created_at: Utc::now().to_rfc3339(),
			files,
		};
		let encoded = serde_json::to_vec_pretty(&record)
			.map_err(|e| SyncError::Snapshot(format!("failed to encode snapshot record: {}", e)))?;
		fs::write(self.record_path(&id), encoded)?;
		fs::write(self.head_path(), &id)?;

		debug!("snapshot: recorded {} ({})", id, message);
		Ok(())
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	fn repo(dir: &TempDir) -> DirSnapshotRepo {
		DirSnapshotRepo::new(dir.path().join("content"), dir.path().join("state/snapshots"))
	}

	#[tokio::test]
	async fn empty_store_has_no_head() {
		let dir = TempDir::new().unwrap();
		fs::create_dir_all(dir.path().join("content")).unwrap();
		let repo = repo(&dir);

		assert_eq!(repo.head().await.unwrap(), None);
		assert!(!repo.exists("deadbeef").await.unwrap());
	}

	#[tokio::test]
	async fn snapshot_records_tree_and_serves_content() {
		let dir = TempDir::new().unwrap();
		fs::create_dir_all(dir.path().join("content")).unwrap();
		fs::write(dir.path().join("content/a.md"), "alpha\n").unwrap();
		let repo = repo(&dir);

		repo.snapshot("first").await.unwrap();
		let head = repo.head().await.unwrap().expect("head after snapshot");
		assert!(repo.exists(&head).await.unwrap());

		let content = repo.content_at(&head, "a.md").await.unwrap();
		assert_eq!(content.as_deref(), Some("alpha\n"));
		assert_eq!(repo.content_at(&head, "missing.md").await.unwrap(), None);
	}

	#[tokio::test]
	async fn unchanged_tree_does_not_advance_head() {
		let dir = TempDir::new().unwrap();
		fs::create_dir_all(dir.path().join("content")).unwrap();
		fs::write(dir.path().join("content/a.md"), "alpha\n").unwrap();
		let repo = repo(&dir);

		repo.snapshot("first").await.unwrap();
		let head = repo.head().await.unwrap();
		repo.snapshot("second, nothing changed").await.unwrap();
		assert_eq!(repo.head().await.unwrap(), head);
	}

	#[tokio::test]
	async fn changed_tree_advances_head_and_keeps_history() {
		let dir = TempDir::new().unwrap();
		fs::create_dir_all(dir.path().join("content")).unwrap();
		fs::write(dir.path().join("content/a.md"), "v1\n").unwrap();
		let repo = repo(&dir);

		repo.snapshot("v1").await.unwrap();
		let first = repo.head().await.unwrap().unwrap();

		fs::write(dir.path().join("content/a.md"), "v2\n").unwrap();
		repo.snapshot("v2").await.unwrap();
		let second = repo.head().await.unwrap().unwrap();

		assert_ne!(first, second);
		// Historical content remains retrievable at the old id.
		assert_eq!(
			repo.content_at(&first, "a.md").await.unwrap().as_deref(),
			Some("v1\n")
		);
		assert_eq!(
			repo.content_at(&second, "a.md").await.unwrap().as_deref(),
			Some("v2\n")
		);
	}

	#[tokio::test]
	async fn malformed_ids_are_treated_as_unknown() {
		let dir = TempDir::new().unwrap();
		fs::create_dir_all(dir.path().join("content")).unwrap();
		let repo = repo(&dir);

		assert!(!repo.exists("../../etc/passwd").await.unwrap());
		assert!(!repo.exists(".hidden").await.unwrap());
		assert_eq!(repo.content_at("..", "a.md").await.unwrap(), None);
	}
}
