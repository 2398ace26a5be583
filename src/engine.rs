use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::SyncError;
use crate::manifest::{Manifest, ManifestStore};
use crate::merge::{self, MergeResult, MergeStatus};
use crate::normalize::MetadataNormalizer;
use crate::observability::{SyncMetrics, global_sync_metrics};
use crate::pathutil::resolve_within_root;
use crate::planner::{self, SyncPlan};
use crate::scan::Scanner;
use crate::snapshot::SnapshotRepo;

/// Phases of one sync session, for log lines. Planning and transferring run
/// unguarded and may interleave across sessions; committing is serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
	Idle,
	Planning,
	Transferring,
	Committing,
}

/// Resolution instructions for one commit request. Ephemeral: fully consumed
/// within the request that carries it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitRequest {
	/// Per-path strategy instructions for conflicted files: `"client"` keeps
	/// the working-tree copy, `"server"` restores the snapshot copy,
	/// anything else runs the merge engine.
	#[serde(default)]
	pub resolutions: BTreeMap<String, String>,
	#[serde(default)]
	pub uploaded_files: Vec<String>,
	#[serde(default)]
	pub deleted_files: Vec<String>,
	#[serde(default)]
	pub conflict_files: Vec<String>,
	#[serde(default)]
	pub last_sync_commit: Option<String>,
}

/// Result of one commit sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitOutcome {
	pub merge_results: Vec<MergeResult>,
	/// Identifier of the snapshot head after the commit. Unchanged when the
	/// snapshot step found nothing to record.
	pub commit_id: Option<String>,
	pub files_synced: u64,
	pub warnings: Vec<String>,
}

/// The orchestration core of the sync subsystem.
///
/// Planning and file transfer are ordinary pipelined I/O; the commit
/// sequence (deletions, conflict resolution, normalization, snapshot,
/// rescan, manifest persistence) runs under a single process-wide mutex so
/// two sessions can never both compute against a stale server-last-known
/// manifest.
pub struct SyncEngine {
	root: PathBuf,
	store: ManifestStore,
	snapshots: Arc<dyn SnapshotRepo>,
	normalizer: Arc<dyn MetadataNormalizer>,
	default_context: String,
	max_upload_bytes: usize,
	commit_lock: Mutex<()>,
}

impl SyncEngine {
	pub fn new(
		root: impl Into<PathBuf>,
		store: ManifestStore,
		snapshots: Arc<dyn SnapshotRepo>,
		normalizer: Arc<dyn MetadataNormalizer>,
		default_context: String,
		max_upload_bytes: usize,
	) -> Self {
		Self {
			root: root.into(),
			store,
			snapshots,
			normalizer,
			default_context,
			max_upload_bytes,
			commit_lock: Mutex::new(()),
		}
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn max_upload_bytes(&self) -> usize {
		self.max_upload_bytes
	}

	/// Compute the sync plan for a client-declared manifest, together with
	/// the server's current snapshot head.
	pub async fn plan_session(
		&self,
		client_manifest: &Manifest,
	) -> Result<(SyncPlan, Option<String>), SyncError> {
		debug!("session phase: {:?} -> {:?}", SyncPhase::Idle, SyncPhase::Planning);

		let last_known = self.store.get()?;
		let current = self.scan_tree()?;
		let plan = planner::plan(client_manifest, &last_known, &current);

		let metrics = global_sync_metrics();
		SyncMetrics::inc(&metrics.plans_total);
		SyncMetrics::add(&metrics.conflicts_detected_total, plan.conflicts.len() as u64);

		info!(
			"planned session: {} up, {} down, {} delete-local, {} delete-remote, {} conflicts",
			plan.to_upload.len(),
			plan.to_download.len(),
			plan.to_delete_local.len(),
			plan.to_delete_remote.len(),
			plan.conflicts.len()
		);

		let head = self.snapshots.head().await?;
		Ok((plan, head))
	}

	/// Store one uploaded file under the content root. Rejects escaping
	/// paths and oversized bodies before any write.
	pub fn store_upload(&self, path: &str, bytes: &[u8]) -> Result<(), SyncError> {
		if bytes.len() > self.max_upload_bytes {
			return Err(SyncError::TooLarge {
				path: path.to_string(),
				size: bytes.len(),
				limit: self.max_upload_bytes,
			});
		}
		let full = resolve_within_root(&self.root, path)?;
		if let Some(parent) = full.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::write(&full, bytes)?;

		let metrics = global_sync_metrics();
		SyncMetrics::inc(&metrics.uploads_total);
		SyncMetrics::add(&metrics.bytes_uploaded_total, bytes.len() as u64);
		debug!("session phase: {:?}, stored {}", SyncPhase::Transferring, path);
		Ok(())
	}

	/// Read one file for download. Rejects escaping paths; missing files are
	/// a `NotFound`.
	pub fn read_download(&self, path: &str) -> Result<Vec<u8>, SyncError> {
		let full = resolve_within_root(&self.root, path)?;
		if !full.is_file() {
			return Err(SyncError::NotFound {
				path: path.to_string(),
			});
		}
		let bytes = fs::read(&full)?;

		let metrics = global_sync_metrics();
		SyncMetrics::inc(&metrics.downloads_total);
		SyncMetrics::add(&metrics.bytes_downloaded_total, bytes.len() as u64);
		debug!("session phase: {:?}, served {}", SyncPhase::Transferring, path);
		Ok(bytes)
	}

	/// Run the commit sequence. Only one commit executes at a time across
	/// all sessions; later commits wait on the serialization point rather
	/// than failing.
	pub async fn commit(&self, req: CommitRequest) -> Result<CommitOutcome, SyncError> {
		// Validate every client-supplied path before touching anything.
		for path in req
			.deleted_files
			.iter()
			.chain(req.conflict_files.iter())
			.chain(req.uploaded_files.iter())
		{
			resolve_within_root(&self.root, path)?;
		}

		let _guard = self.commit_lock.lock().await;
		debug!(
			"session phase: {:?} -> {:?}",
			SyncPhase::Transferring,
			SyncPhase::Committing
		);

		let metrics = global_sync_metrics();
		let result = self.commit_locked(&req).await;
		match &result {
			Ok(outcome) => {
				SyncMetrics::inc(&metrics.commits_total);
				info!(
					"commit complete: {} files, {} merge results, head {:?}",
					outcome.files_synced,
					outcome.merge_results.len(),
					outcome.commit_id
				);
			}
			Err(e) => {
				SyncMetrics::inc(&metrics.commit_failures_total);
				warn!("commit failed: {}", e);
			}
		}
		debug!("session phase: {:?} -> {:?}", SyncPhase::Committing, SyncPhase::Idle);
		result
	}

	async fn commit_locked(&self, req: &CommitRequest) -> Result<CommitOutcome, SyncError> {
		let mut warnings = Vec::new();
		let old_manifest = self.store.get()?;

		// 1. Deletions, idempotent: a missing target is not an error.
		for path in &req.deleted_files {
			let full = resolve_within_root(&self.root, path)?;
			match fs::remove_file(&full) {
				Ok(()) => debug!("deleted {}", path),
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
				Err(e) => return Err(SyncError::Io(e)),
			}
		}

		// 2. Capture the pre-session server content of every conflict path.
		// Uploads land directly in the working tree, so the server side of
		// each merge comes from the snapshot head, which still reflects the
		// state before this session.
		let head = self.snapshots.head().await?;
		let mut server_content: BTreeMap<String, Option<String>> = BTreeMap::new();
		for path in &req.conflict_files {
			let content = match &head {
				Some(id) => self.snapshots.content_at(id, path).await?,
				None => None,
			};
			server_content.insert(path.clone(), content);
		}

		// The merge base is only usable when the client's last-synced commit
		// is still known and reachable.
		let base_commit = match &req.last_sync_commit {
			Some(id) if self.snapshots.exists(id).await? => Some(id.clone()),
			_ => None,
		};

		// 3. Resolve each conflict.
		let mut merge_results = Vec::new();
		let mut cleanly_merged = Vec::new();
		for path in &req.conflict_files {
			let server = server_content
				.get(path)
				.cloned()
				.flatten();
			let result = self
				.resolve_conflict(path, server, base_commit.as_deref(), req)
				.await?;
			if result.status == MergeStatus::Merged {
				cleanly_merged.push(path.clone());
			}
			merge_results.push(result);
		}

		// 4. Metadata normalization on uploaded and cleanly-merged files.
		let mut normalize_paths: Vec<String> = req.uploaded_files.clone();
		normalize_paths.extend(cleanly_merged.iter().cloned());
		normalize_paths.sort();
		normalize_paths.dedup();
		warnings.extend(self.normalizer.normalize(
			&normalize_paths,
			&old_manifest,
			&self.root,
			&self.default_context,
		));

		// 5. Version snapshot; failure is logged, never fatal, since the
		// content state on disk is already correct.
		let message = format!("sync commit: {} files", normalize_paths.len());
		if let Err(e) = self.snapshots.snapshot(&message).await {
			SyncMetrics::inc(&global_sync_metrics().snapshot_failures_total);
			warn!("snapshot creation failed: {}", e);
			warnings.push(format!("snapshot creation failed: {}", e));
		}

		// 6. Rescan so the persisted manifest reflects reality, including
		// any partial state earlier steps produced.
		let new_manifest = self.scan_tree()?;
		self.store.put(&new_manifest)?;

		let files_synced = (req.uploaded_files.len()
			+ req.deleted_files.len()
			+ req.conflict_files.len()) as u64;

		Ok(CommitOutcome {
			merge_results,
			commit_id: self.snapshots.head().await?,
			files_synced,
			warnings,
		})
	}

	/// Resolve one conflicted path against the captured server content.
	///
	/// A conflicted outcome always restores the server's version on disk;
	/// marker text only travels back to the client.
	async fn resolve_conflict(
		&self,
		path: &str,
		server: Option<String>,
		base_commit: Option<&str>,
		req: &CommitRequest,
	) -> Result<MergeResult, SyncError> {
		let full = resolve_within_root(&self.root, path)?;
		let on_disk = match fs::read(&full) {
			Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
			Err(e) => return Err(SyncError::Io(e)),
		};

		let metrics = global_sync_metrics();

		// Explicit client instruction short-circuits the merge.
		match req.resolutions.get(path).map(String::as_str) {
			Some("client") => {
				debug!("conflict {}: resolved in favor of client", path);
				SyncMetrics::inc(&metrics.merges_clean_total);
				return Ok(merged(path));
			}
			Some("server") => {
				match &server {
					Some(text) => self.write_file(&full, text)?,
					// Server side had deleted it; remove the client copy.
					None => {
						let _ = fs::remove_file(&full);
					}
				}
				debug!("conflict {}: resolved in favor of server", path);
				SyncMetrics::inc(&metrics.merges_clean_total);
				return Ok(merged(path));
			}
			_ => {}
		}

		match (on_disk, server) {
			// Client deleted, server still has content: server wins.
			(None, Some(server_text)) => {
				self.write_file(&full, &server_text)?;
				SyncMetrics::inc(&metrics.merges_clean_total);
				Ok(merged(path))
			}
			// Server deleted, client's copy is already on disk: client wins.
			(Some(_), None) => {
				SyncMetrics::inc(&metrics.merges_clean_total);
				Ok(merged(path))
			}
			// Neither side has it any more; nothing to write.
			(None, None) => Ok(merged(path)),
			(Some(client_text), Some(server_text)) => {
				let base = match base_commit {
					Some(id) => self.snapshots.content_at(id, path).await?,
					None => None,
				};
				let (merged_text, has_conflict) =
					merge::merge(base.as_deref(), &server_text, &client_text);

				if has_conflict {
					// The durable server copy must never carry markers.
					self.write_file(&full, &server_text)?;
					SyncMetrics::inc(&metrics.merges_conflicted_total);
					Ok(MergeResult {
						path: path.to_string(),
						status: MergeStatus::Conflicted,
						content: Some(merged_text),
					})
				} else {
					self.write_file(&full, &merged_text)?;
					SyncMetrics::inc(&metrics.merges_clean_total);
					Ok(merged(path))
				}
			}
		}
	}

	fn write_file(&self, full: &Path, text: &str) -> Result<(), SyncError> {
		if let Some(parent) = full.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::write(full, text)?;
		Ok(())
	}

	fn scan_tree(&self) -> Result<Manifest, SyncError> {
		Scanner::new(&self.root)
			.scan()
			.map_err(|e| SyncError::Scan(e.to_string()))
	}
}

fn merged(path: &str) -> MergeResult {
	MergeResult {
		path: path.to_string(),
		status: MergeStatus::Merged,
		content: None,
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::normalize::FrontMatterNormalizer;
	use crate::snapshot::DirSnapshotRepo;
	use std::fs;
	use tempfile::TempDir;

	fn engine(dir: &TempDir) -> SyncEngine {
		let root = dir.path().join("content");
		let state = dir.path().join("content/.sync");
		fs::create_dir_all(&root).unwrap();
		SyncEngine::new(
			&root,
			ManifestStore::new(&state),
			Arc::new(DirSnapshotRepo::new(&root, state.join("snapshots"))),
			Arc::new(FrontMatterNormalizer),
			"notes".to_string(),
			1024 * 1024,
		)
	}

	#[tokio::test]
	async fn upload_then_commit_persists_manifest_and_snapshot() {
		let dir = TempDir::new().unwrap();
		let engine = engine(&dir);

		engine.store_upload("a.md", b"alpha\n").unwrap();
		let outcome = engine
			.commit(CommitRequest {
				uploaded_files: vec!["a.md".to_string()],
				..Default::default()
			})
			.await
			.unwrap();

		assert_eq!(outcome.files_synced, 1);
		assert!(outcome.commit_id.is_some());
		assert!(outcome.merge_results.is_empty());

		let (plan, _) = engine
			.plan_session(&{
				let mut m = Manifest::new();
				m.insert(crate::manifest::FileEntry {
					path: "a.md".to_string(),
					content_hash: crate::scan::hash_bytes(b"alpha\n"),
					size: 6,
					mtime: "2025-01-01T00:00:00+00:00".to_string(),
				});
				m
			})
			.await
			.unwrap();
		assert!(plan.is_empty(), "client and server converged: {:?}", plan);
	}

	#[tokio::test]
	async fn commit_is_idempotent() {
		let dir = TempDir::new().unwrap();
		let engine = engine(&dir);

		engine.store_upload("a.md", b"alpha\n").unwrap();
		let req = CommitRequest {
			uploaded_files: vec!["a.md".to_string()],
			..Default::default()
		};

		let first = engine.commit(req.clone()).await.unwrap();
		let manifest_after_first = engine.store.get().unwrap();

		let second = engine.commit(req).await.unwrap();
		let manifest_after_second = engine.store.get().unwrap();

		assert_eq!(manifest_after_first, manifest_after_second);
		assert_eq!(first.commit_id, second.commit_id);
	}

	#[tokio::test]
	async fn deletion_commit_is_idempotent_on_missing_targets() {
		let dir = TempDir::new().unwrap();
		let engine = engine(&dir);

		let outcome = engine
			.commit(CommitRequest {
				deleted_files: vec!["never-existed.md".to_string()],
				..Default::default()
			})
			.await
			.unwrap();
		assert_eq!(outcome.files_synced, 1);
	}

	#[tokio::test]
	async fn conflicting_edit_restores_server_copy_and_reports_markers() {
		let dir = TempDir::new().unwrap();
		let engine = engine(&dir);

		// Establish base state with a snapshot.
		engine.store_upload("note.md", b"x\n").unwrap();
		let base = engine
			.commit(CommitRequest {
				uploaded_files: vec!["note.md".to_string()],
				..Default::default()
			})
			.await
			.unwrap();
		let base_id = base.commit_id.clone().unwrap();

		// Server-side edit, snapshotted.
		fs::write(dir.path().join("content/note.md"), "y\n").unwrap();
		engine
			.commit(CommitRequest::default())
			.await
			.unwrap();

		// Client uploads its divergent edit and commits the conflict.
		engine.store_upload("note.md", b"z\n").unwrap();
		let outcome = engine
			.commit(CommitRequest {
				conflict_files: vec!["note.md".to_string()],
				last_sync_commit: Some(base_id),
				..Default::default()
			})
			.await
			.unwrap();

		assert_eq!(outcome.merge_results.len(), 1);
		let result = &outcome.merge_results[0];
		assert_eq!(result.status, MergeStatus::Conflicted);
		let markers = result.content.as_ref().unwrap();
		assert!(markers.contains("<<<<<<< client"));
		assert!(markers.contains("z\n"));
		assert!(markers.contains("y\n"));

		// The durable server copy is the server's version, never markers.
		let on_disk = fs::read_to_string(dir.path().join("content/note.md")).unwrap();
		assert_eq!(on_disk, "y\n");
	}

	#[tokio::test]
	async fn non_overlapping_conflict_merges_cleanly_onto_disk() {
		let dir = TempDir::new().unwrap();
		let engine = engine(&dir);

		engine.store_upload("note.md", b"line1\nline2\n").unwrap();
		let base = engine
			.commit(CommitRequest {
				uploaded_files: vec!["note.md".to_string()],
				..Default::default()
			})
			.await
			.unwrap();
		let base_id = base.commit_id.clone().unwrap();

		// Server rewrites line2.
		fs::write(dir.path().join("content/note.md"), "line1\nCHANGED\n").unwrap();
		engine.commit(CommitRequest::default()).await.unwrap();

		// Client appends line3.
		engine
			.store_upload("note.md", b"line1\nline2\nline3\n")
			.unwrap();
		let outcome = engine
			.commit(CommitRequest {
				conflict_files: vec!["note.md".to_string()],
				last_sync_commit: Some(base_id),
				..Default::default()
			})
			.await
			.unwrap();

		assert_eq!(outcome.merge_results[0].status, MergeStatus::Merged);
		let on_disk = fs::read_to_string(dir.path().join("content/note.md")).unwrap();
		assert_eq!(on_disk, "line1\nCHANGED\nline3\n");
	}

	#[tokio::test]
	async fn delete_modify_conflict_restores_server_content() {
		let dir = TempDir::new().unwrap();
		let engine = engine(&dir);

		engine.store_upload("note.md", b"server text\n").unwrap();
		engine
			.commit(CommitRequest {
				uploaded_files: vec!["note.md".to_string()],
				..Default::default()
			})
			.await
			.unwrap();

		// Client deleted the file; it is listed both as deleted and
		// conflicted, and the deletion lands first.
		let outcome = engine
			.commit(CommitRequest {
				deleted_files: vec!["note.md".to_string()],
				conflict_files: vec!["note.md".to_string()],
				..Default::default()
			})
			.await
			.unwrap();

		assert_eq!(outcome.merge_results[0].status, MergeStatus::Merged);
		let on_disk = fs::read_to_string(dir.path().join("content/note.md")).unwrap();
		assert_eq!(on_disk, "server text\n");
	}

	#[tokio::test]
	async fn explicit_client_resolution_keeps_working_tree_copy() {
		let dir = TempDir::new().unwrap();
		let engine = engine(&dir);

		engine.store_upload("note.md", b"server\n").unwrap();
		engine
			.commit(CommitRequest {
				uploaded_files: vec!["note.md".to_string()],
				..Default::default()
			})
			.await
			.unwrap();

		engine.store_upload("note.md", b"client\n").unwrap();
		let mut resolutions = BTreeMap::new();
		resolutions.insert("note.md".to_string(), "client".to_string());
		let outcome = engine
			.commit(CommitRequest {
				conflict_files: vec!["note.md".to_string()],
				resolutions,
				..Default::default()
			})
			.await
			.unwrap();

		assert_eq!(outcome.merge_results[0].status, MergeStatus::Merged);
		let on_disk = fs::read_to_string(dir.path().join("content/note.md")).unwrap();
		assert_eq!(on_disk, "client\n");
	}

	#[tokio::test]
	async fn commit_rejects_escaping_paths_before_any_mutation() {
		let dir = TempDir::new().unwrap();
		let engine = engine(&dir);

		engine.store_upload("keep.md", b"kept\n").unwrap();
		let err = engine
			.commit(CommitRequest {
				deleted_files: vec!["keep.md".to_string(), "../outside.md".to_string()],
				..Default::default()
			})
			.await
			.unwrap_err();

		assert!(matches!(err, SyncError::PathEscape { .. }));
		// The valid deletion in the same request must not have run.
		assert!(dir.path().join("content/keep.md").exists());
	}

	#[tokio::test]
	async fn upload_rejects_escape_and_oversize() {
		let dir = TempDir::new().unwrap();
		let engine = engine(&dir);

		assert!(matches!(
			engine.store_upload("../evil.md", b"x"),
			Err(SyncError::PathEscape { .. })
		));

		let big = vec![0u8; 1024 * 1024 + 1];
		assert!(matches!(
			engine.store_upload("big.md", &big),
			Err(SyncError::TooLarge { .. })
		));
		assert!(!dir.path().join("content/big.md").exists());
	}

	#[tokio::test]
	async fn download_distinguishes_missing_from_escaping() {
		let dir = TempDir::new().unwrap();
		let engine = engine(&dir);

		assert!(matches!(
			engine.read_download("absent.md"),
			Err(SyncError::NotFound { .. })
		));
		assert!(matches!(
			engine.read_download("../../etc/passwd"),
			Err(SyncError::PathEscape { .. })
		));
	}
}
