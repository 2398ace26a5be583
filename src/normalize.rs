use std::fs;
use std::path::Path;

use chrono::Utc;
use log::debug;

use crate::manifest::Manifest;
use crate::pathutil::resolve_within_root;
use crate::scan::hash_file;

/// File-format-specific metadata pass run after content lands on disk. The
/// commit coordinator only sequences this; it never interprets the result
/// beyond collecting warnings.
pub trait MetadataNormalizer: Send + Sync {
	/// Normalize metadata on the given paths (relative to `root`), returning
	/// human-readable warnings for files that could not be processed.
	fn normalize(
		&self,
		paths: &[String],
		old_manifest: &Manifest,
		root: &Path,
		default_context: &str,
	) -> Vec<String>;
}

/// Front-matter normalizer for markdown notes.
///
/// Files carrying a `---` front-matter block get their `updated:` field
/// stamped with the normalization time and a `context:` field defaulted when
/// absent. Files without front matter, and non-markdown files, are left
/// untouched. Files whose content hash matches the previous manifest are
/// skipped entirely.
pub struct FrontMatterNormalizer;

impl MetadataNormalizer for FrontMatterNormalizer {
	fn normalize(
		&self,
		paths: &[String],
		old_manifest: &Manifest,
		root: &Path,
		default_context: &str,
	) -> Vec<String> {
		let mut warnings = Vec::new();

		for path in paths {
			if !path.ends_with(".md") {
				continue;
			}

			let full = match resolve_within_root(root, path) {
				Ok(p) => p,
				Err(e) => {
					warnings.push(format!("normalize skipped {}: {}", path, e));
					continue;
				}
			};
			if !full.exists() {
				continue;
			}

			// Unchanged since the previous manifest means nothing to stamp.
			if let Some(old_hash) = old_manifest.hash_of(path) {
				match hash_file(&full) {
					Ok(current) if current == old_hash => continue,
					Ok(_) => {}
					Err(e) => {
						warnings.push(format!("normalize failed to hash {}: {}", path, e));
						continue;
					}
				}
			}

			let text = match fs::read_to_string(&full) {
				Ok(t) => t,
				Err(e) => {
					warnings.push(format!("normalize failed to read {}: {}", path, e));
					continue;
				}
			};

			let Some(updated) = rewrite_front_matter(&text, default_context) else {
				continue;
			};
			if updated != text {
				if let Err(e) = fs::write(&full, updated) {
					warnings.push(format!("normalize failed to write {}: {}", path, e));
				} else {
					debug!("normalized front matter of {}", path);
				}
			}
		}

		warnings
	}
}

/// Rewrite the leading front-matter block, returning `None` when the file
/// has none.
fn rewrite_front_matter(text: &str, default_context: &str) -> Option<String> {
	let rest = text.strip_prefix("---\n")?;
	let end = rest.find("\n---")?;
	let block = &rest[..end];
	let tail = &rest[end..];

	let stamp = Utc::now().to_rfc3339();
	let mut lines: Vec<String> = Vec::new();
	let mut saw_updated = false;
	let mut saw_context = false;

	for line in block.lines() {
		if line.starts_with("updated:") {
			lines.push(format!("updated: {}", stamp));
			saw_updated = true;
		} else {
			if line.starts_with("context:") {
				saw_context = true;
			}
			lines.push(line.to_string());
		}
	}
	if !saw_updated {
		lines.push(format!("updated: {}", stamp));
	}
	if !saw_context && !default_context.is_empty() {
		lines.push(format!("context: {}", default_context));
	}

	Some(format!("---\n{}{}", lines.join("\n"), tail))
}
