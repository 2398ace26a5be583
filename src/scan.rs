use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};

use crate::manifest::{FileEntry, Manifest};
use crate::pathutil::to_manifest_key;

/// Walks a content tree and produces a manifest snapshot.
///
/// Hidden entries (names starting with `.`) are skipped at any depth, which
/// also keeps a state directory nested under the root out of the manifest.
/// Symbolic links are never followed. The walk is iterative and the output
/// deterministic: identical tree state always yields an identical manifest.
pub struct Scanner {
	root: PathBuf,
}

impl Scanner {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	/// Scan the tree and return one entry per regular file, with paths
	/// relative to the root using forward slashes.
	pub fn scan(&self) -> Result<Manifest> {
		let mut manifest = Manifest::new();

		// hidden(true) is the dot-entry skip; all git-specific filtering is
		// off because the content tree is not a git working copy.
		let walker = WalkBuilder::new(&self.root)
			.hidden(true)
			.git_ignore(false)
			.git_global(false)
			.git_exclude(false)
			.require_git(false)
			.follow_links(false)
			.build();

		for result in walker {
			let entry = result?;
			let path = entry.path();

			match entry.file_type() {
				Some(ft) if ft.is_file() => {}
				_ => continue,
			}

			let metadata = entry
				.metadata()
				.with_context(|| format!("failed to stat {}", path.display()))?;
			let relative = path
				.strip_prefix(&self.root)
				.with_context(|| format!("path {} not under scan root", path.display()))?;

			let mtime: DateTime<Utc> = metadata
				.modified()
				.with_context(|| format!("no mtime for {}", path.display()))?
				.into();

			manifest.insert(FileEntry {
				path: to_manifest_key(relative),
				content_hash: hash_file(path)?,
				size: metadata.len(),
				mtime: mtime.to_rfc3339(),
			});
		}

		Ok(manifest)
	}
}

/// Streaming SHA-256 digest of a file, as lowercase hex.
pub fn hash_file(path: &Path) -> Result<String> {
	let mut file =
		File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
	let mut hasher = Sha256::new();
	let mut buffer = [0u8; 64 * 1024];

	loop {
		let n = file
			.read(&mut buffer)
			.with_context(|| format!("failed to read {}", path.display()))?;
		if n == 0 {
			break;
		}
		hasher.update(&buffer[..n]);
	}

	Ok(hex_digest(&hasher.finalize()))
}

/// SHA-256 digest of in-memory bytes, as lowercase hex.
pub fn hash_bytes(data: &[u8]) -> String {
	hex_digest(&Sha256::digest(data))
}

fn hex_digest(digest: &[u8]) -> String {
	digest.iter().map(|b| format!("{:02x}", b)).collect()
}
