use std::sync::Arc;

use scriptorium_sync::engine::{CommitRequest, SyncEngine};
use scriptorium_sync::manifest::{FileEntry, Manifest, ManifestStore};
use scriptorium_sync::merge::MergeStatus;
use scriptorium_sync::normalize::FrontMatterNormalizer;
use scriptorium_sync::scan::hash_bytes;
use scriptorium_sync::snapshot::DirSnapshotRepo;
use tempfile::TempDir;

fn test_engine(dir: &TempDir) -> SyncEngine {
	let root = dir.path().join("content");
	let state = dir.path().join("content/.sync");
	std::fs::create_dir_all(&root).unwrap();
	SyncEngine::new(
		&root,
		ManifestStore::new(&state),
		Arc::new(DirSnapshotRepo::new(&root, state.join("snapshots"))),
		Arc::new(FrontMatterNormalizer),
		"notes".to_string(),
		4 * 1024 * 1024,
	)
}

fn entry(path: &str, content: &[u8]) -> FileEntry {
	FileEntry {
		path: path.to_string(),
		content_hash: hash_bytes(content),
		size: content.len() as u64,
		mtime: "2025-06-01T00:00:00+00:00".to_string(),
	}
}

/// A brand-new client file plans as an upload and round-trips through
/// commit into the persisted manifest.
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn first_sync_uploads_new_client_file() {
	let dir = TempDir::new().unwrap();
	let engine = test_engine(&dir);

	let client = Manifest::from_entries(vec![entry("a.md", b"alpha\n")]);
	let (plan, server_commit) = engine.plan_session(&client).await.unwrap();

	assert!(server_commit.is_none());
	assert!(plan.to_upload.contains("a.md"));
	assert_eq!(plan.total_operations(), 1);

	engine.store_upload("a.md", b"alpha\n").unwrap();
	let outcome = engine
		.commit(CommitRequest {
			uploaded_files: vec!["a.md".to_string()],
			..Default::default()
		})
		.await
		.unwrap();
	assert!(outcome.commit_id.is_some());

	// A replanned session against the same client manifest converges.
	let (plan, server_commit) = engine.plan_session(&client).await.unwrap();
	assert!(plan.is_empty(), "unexpected plan: {:?}", plan);
	assert_eq!(server_commit, outcome.commit_id);
}

/// A client deletion of an unchanged server file plans as a remote delete,
/// and committing it removes the file and advances the snapshot head.
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn client_deletion_flows_through_plan_and_commit() {
	let dir = TempDir::new().unwrap();
	let engine = test_engine(&dir);

	engine.store_upload("a.md", b"alpha\n").unwrap();
	let first = engine
		.commit(CommitRequest {
			uploaded_files: vec!["a.md".to_string()],
			..Default::default()
		})
		.await
		.unwrap();

	let client = Manifest::new();
	let (plan, _) = engine.plan_session(&client).await.unwrap();
	assert!(plan.to_delete_remote.contains("a.md"));

	let outcome = engine
		.commit(CommitRequest {
			deleted_files: vec!["a.md".to_string()],
			..Default::default()
		})
		.await
		.unwrap();

	assert!(!dir.path().join("content/a.md").exists());
	assert_ne!(outcome.commit_id, first.commit_id);

	let (plan, _) = engine.plan_session(&client).await.unwrap();
	assert!(plan.is_empty());
}

/// Divergent edits on both sides surface as an edit-edit conflict in the
/// plan, and committing the conflict preserves the server copy on disk
/// while returning marker text.
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn divergent_edits_conflict_end_to_end() {
	let dir = TempDir::new().unwrap();
	let engine = test_engine(&dir);

	// Common ancestor.
	engine.store_upload("note.md", b"shared line\n").unwrap();
	let base = engine
		.commit(CommitRequest {
			uploaded_files: vec!["note.md".to_string()],
			..Default::default()
		})
		.await
		.unwrap();
	let base_id = base.commit_id.clone().unwrap();

	// Server-side edit committed independently.
	std::fs::write(dir.path().join("content/note.md"), "server line\n").unwrap();
	engine.commit(CommitRequest::default()).await.unwrap();

	// The client, still at the ancestor, edited its copy too.
	let client = Manifest::from_entries(vec![entry("note.md", b"client line\n")]);
	let (plan, _) = engine.plan_session(&client).await.unwrap();
	assert_eq!(plan.conflicts.len(), 1);
	assert_eq!(plan.conflicts[0].path, "note.md");
	assert!(plan.to_upload.is_empty());
	assert!(plan.to_download.is_empty());

	// Client pushes its side and commits the conflict for merging.
	engine.store_upload("note.md", b"client line\n").unwrap();
	let outcome = engine
		.commit(CommitRequest {
			conflict_files: vec!["note.md".to_string()],
			last_sync_commit: Some(base_id),
			..Default::default()
		})
		.await
		.unwrap();

	let result = &outcome.merge_results[0];
	assert_eq!(result.status, MergeStatus::Conflicted);
	let markers = result.content.as_ref().unwrap();
	assert!(markers.contains("client line"));
	assert!(markers.contains("server line"));

	// The server's version is the durable copy, never marker text.
	let on_disk = std::fs::read_to_string(dir.path().join("content/note.md")).unwrap();
	assert_eq!(on_disk, "server line\n");
}

/// Running the same commit twice with no intervening change yields the same
/// manifest and snapshot head.
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn repeated_commit_is_stable() {
	let dir = TempDir::new().unwrap();
	let engine = test_engine(&dir);

	engine.store_upload("a.md", b"alpha\n").unwrap();
	engine.store_upload("b.md", b"beta\n").unwrap();
	let req = CommitRequest {
		uploaded_files: vec!["a.md".to_string(), "b.md".to_string()],
		..Default::default()
	};

	let first = engine.commit(req.clone()).await.unwrap();
	let second = engine.commit(req).await.unwrap();

	assert_eq!(first.commit_id, second.commit_id);
	assert_eq!(second.merge_results.len(), 0);
}

/// Concurrent commits serialize on the engine's critical section instead of
/// failing; both complete and the manifest stays consistent.
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn concurrent_commits_serialize() {
	let dir = TempDir::new().unwrap();
	let engine = Arc::new(test_engine(&dir));

	engine.store_upload("a.md", b"alpha\n").unwrap();
	engine.store_upload("b.md", b"beta\n").unwrap();

	let left = {
		let engine = Arc::clone(&engine);
		tokio::spawn(async move {
			engine
				.commit(CommitRequest {
					uploaded_files: vec!["a.md".to_string()],
					..Default::default()
				})
				.await
		})
	};
	let right = {
		let engine = Arc::clone(&engine);
		tokio::spawn(async move {
			engine
				.commit(CommitRequest {
					uploaded_files: vec!["b.md".to_string()],
					..Default::default()
				})
				.await
		})
	};

	left.await.unwrap().unwrap();
	right.await.unwrap().unwrap();

	// Both files present in the final manifest.
	let client = Manifest::from_entries(vec![
		entry("a.md", b"alpha\n"),
		entry("b.md", b"beta\n"),
	]);
	let (plan, _) = engine.plan_session(&client).await.unwrap();
	assert!(plan.is_empty(), "unexpected plan: {:?}", plan);
}

/// An unknown last-sync commit degrades to the whole-file merge policy
/// rather than failing the commit.
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn unknown_base_commit_degrades_to_whole_file_merge() {
	let dir = TempDir::new().unwrap();
	let engine = test_engine(&dir);

	engine.store_upload("note.md", b"server side\n").unwrap();
	engine
		.commit(CommitRequest {
			uploaded_files: vec!["note.md".to_string()],
			..Default::default()
		})
		.await
		.unwrap();

	engine.store_upload("note.md", b"client side\n").unwrap();
	let outcome = engine
		.commit(CommitRequest {
			conflict_files: vec!["note.md".to_string()],
			last_sync_commit: Some("0000000000000000".to_string()),
			..Default::default()
		})
		.await
		.unwrap();

	assert_eq!(outcome.merge_results[0].status, MergeStatus::Conflicted);
}
