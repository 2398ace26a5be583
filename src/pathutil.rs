use std::path::{Component, Path, PathBuf};

use crate::error::SyncError;

/// Resolve a client-supplied relative path against the content root,
/// rejecting anything that could escape it.
///
/// The check is purely component-wise: absolute paths, drive prefixes and
/// `..` segments are rejected without consulting the filesystem, so a path
/// for a not-yet-existing file can still be validated. Encoding tricks that
/// survive percent-decoding at the HTTP layer still arrive here as plain
/// components and are caught the same way.
pub fn resolve_within_root(root: &Path, candidate: &str) -> Result<PathBuf, SyncError> {
	let rel = Path::new(candidate);

	if candidate.is_empty() || rel.is_absolute() {
		return Err(SyncError::PathEscape {
			path: candidate.to_string(),
		});
	}

	let mut resolved = root.to_path_buf();
	for component in rel.components() {
		match component {
			Component::Normal(part) => resolved.push(part),
			// `.` segments are harmless but normalized away
			Component::CurDir => {}
			Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
				return Err(SyncError::PathEscape {
					path: candidate.to_string(),
				});
			}
		}
	}

	Ok(resolved)
}

/// Convert a path relative to `root` into the slash-separated manifest key.
pub fn to_manifest_key(rel: &Path) -> String {
	rel.components()
		.filter_map(|c| match c {
			Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
			_ => None,
		})
		.collect::<Vec<_>>()
		.join("/")
}

#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn accepts_nested_relative_paths() {
		let root = Path::new("/srv/content");
		let p = resolve_within_root(root, "notes/2024/plan.md").unwrap();
		assert_eq!(p, PathBuf::from("/srv/content/notes/2024/plan.md"));
	}

	#[test]
	fn rejects_parent_segments() {
		let root = Path::new("/srv/content");
		assert!(resolve_within_root(root, "../etc/passwd").is_err());
		assert!(resolve_within_root(root, "notes/../../etc/passwd").is_err());
		assert!(resolve_within_root(root, "notes/../../../x").is_err());
	}

	#[test]
	fn rejects_absolute_and_empty() {
		let root = Path::new("/srv/content");
		assert!(resolve_within_root(root, "/etc/passwd").is_err());
		assert!(resolve_within_root(root, "").is_err());
	}

	#[test]
	fn current_dir_segments_are_normalized() {
		let root = Path::new("/srv/content");
		let p = resolve_within_root(root, "./notes/./a.md").unwrap();
		assert_eq!(p, PathBuf::from("/srv/content/notes/a.md"));
	}

	#[test]
	fn manifest_keys_use_forward_slashes() {
		let rel = Path::new("notes").join("2024").join("plan.md");
		assert_eq!(to_manifest_key(&rel), "notes/2024/plan.md");
	}
}
