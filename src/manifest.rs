use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// One file's observed state: relative slash-separated path, SHA-256 content
/// digest (lowercase hex), size in bytes and RFC 3339 modification time.
///
/// Entries are immutable once created; a fresh scan produces fresh entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
	pub path: String,
	pub content_hash: String,
	pub size: u64,
	pub mtime: String,
}

/// Snapshot mapping of file paths to observed content fingerprints.
///
/// Backed by a `BTreeMap` so iteration order and serialized form are
/// deterministic. Three manifests exist concurrently during a sync session:
/// client-declared, server-last-known and server-current.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
	pub files: BTreeMap<String, FileEntry>,
}

impl Manifest {
	pub fn new() -> Self {
		Self::default()
	}

	/// Build a manifest from a list of entries, keyed by path.
	pub fn from_entries(entries: Vec<FileEntry>) -> Self {
		let files = entries.into_iter().map(|e| (e.path.clone(), e)).collect();
		Self { files }
	}

	pub fn get(&self, path: &str) -> Option<&FileEntry> {
		self.files.get(path)
	}

	pub fn contains(&self, path: &str) -> bool {
		self.files.contains_key(path)
	}

	/// Content hash for a path, when present.
	pub fn hash_of(&self, path: &str) -> Option<&str> {
		self.files.get(path).map(|e| e.content_hash.as_str())
	}

	pub fn insert(&mut self, entry: FileEntry) {
		self.files.insert(entry.path.clone(), entry);
	}

	pub fn len(&self) -> usize {
		self.files.len()
	}

	pub fn is_empty(&self) -> bool {
		self.files.is_empty()
	}

	/// Ordered union of the keys of this manifest and any number of others.
	pub fn key_union<'a>(manifests: &[&'a Manifest]) -> BTreeSet<&'a str> {
		let mut union = BTreeSet::new();
		for m in manifests {
			for key in m.files.keys() {
				union.insert(key.as_str());
			}
		}
		union
	}
}

/// Persists the server-last-known manifest across sync sessions as a JSON
/// file under the state directory. Read and written only by the commit
/// coordinator.
pub struct ManifestStore {
	path: PathBuf,
}

impl ManifestStore {
	pub fn new(state_dir: &Path) -> Self {
		Self {
			path: state_dir.join("manifest.json"),
		}
	}

	/// Load the last-synchronized manifest. A missing file is an empty
	/// manifest (first sync against a fresh state directory).
	pub fn get(&self) -> Result<Manifest, SyncError> {
		if !self.path.exists() {
			return Ok(Manifest::new());
		}
		let bytes = fs::read(&self.path)?;
		serde_json::from_slice(&bytes)
			.map_err(|e| SyncError::Manifest(format!("failed to parse {}: {}", self.path.display(), e)))
	}

	pub fn put(&self, manifest: &Manifest) -> Result<(), SyncError> {
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent)?;
		}
		let bytes = serde_json::to_vec_pretty(manifest)
			.map_err(|e| SyncError::Manifest(format!("failed to serialize manifest: {}", e)))?;
		fs::write(&self.path, bytes)?;
		Ok(())
	}
}
