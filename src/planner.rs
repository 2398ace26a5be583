use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::manifest::Manifest;

/// How a concurrent edit pair disagrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictAction {
	/// Both sides edited the file since the last sync.
	EditEdit,
	/// The client deleted a file the server edited.
	DeleteModify,
	/// The client edited a file the server deleted.
	ModifyDelete,
}

/// An edit conflict the plan surfaces for explicit resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
	pub path: String,
	pub action: ConflictAction,
	/// Free-form descriptor of the change pair, for display to the client.
	pub change_type: String,
}

/// The disjoint-category plan computed for one sync session.
///
/// A path appears in at most one transfer category; a conflicting path
/// appears only in `conflicts` — conflicts take precedence and must be
/// resolved through the merge protocol, never silently overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
	pub to_upload: BTreeSet<String>,
	pub to_download: BTreeSet<String>,
	pub to_delete_local: BTreeSet<String>,
	pub to_delete_remote: BTreeSet<String>,
	pub conflicts: Vec<Conflict>,
}

impl SyncPlan {
	pub fn is_empty(&self) -> bool {
		self.to_upload.is_empty()
			&& self.to_download.is_empty()
			&& self.to_delete_local.is_empty()
			&& self.to_delete_remote.is_empty()
			&& self.conflicts.is_empty()
	}

	pub fn total_operations(&self) -> usize {
		self.to_upload.len()
			+ self.to_download.len()
			+ self.to_delete_local.len()
			+ self.to_delete_remote.len()
			+ self.conflicts.len()
	}
}

/// Classify every path in the key union of the three manifests.
///
/// Pure function: `client` is the manifest the client declared, `last_known`
/// is the server's record from the previous successful commit (the common
/// ancestor), `current` is the server's fresh scan. First matching rule wins;
/// each path lands in exactly one category, so the plan's disjointness
/// invariant holds by construction.
pub fn plan(client: &Manifest, last_known: &Manifest, current: &Manifest) -> SyncPlan {
	let mut out = SyncPlan::default();

	for path in Manifest::key_union(&[client, last_known, current]) {
		let client_hash = client.hash_of(path);
		let known_hash = last_known.hash_of(path);
		let current_hash = current.hash_of(path);

		match (client_hash, known_hash, current_hash) {
			// Already deleted on both sides since the last sync.
			(None, Some(_), None) => {}

			// New on the server only.
			(None, None, Some(_)) => {
				out.to_download.insert(path.to_string());
			}

			// New on the client only.
			(Some(_), None, None) => {
				out.to_upload.insert(path.to_string());
			}

			// Server deleted it; did the client change it meanwhile?
			(Some(c), Some(k), None) => {
				if c == k {
					out.to_delete_local.insert(path.to_string());
				} else {
					out.conflicts.push(Conflict {
						path: path.to_string(),
						action: ConflictAction::ModifyDelete,
						change_type: "client edited what server deleted".to_string(),
					});
				}
			}

			// Client deleted it; did the server change it meanwhile?
			(None, Some(k), Some(s)) => {
				if s == k {
					out.to_delete_remote.insert(path.to_string());
				} else {
					out.conflicts.push(Conflict {
						path: path.to_string(),
						action: ConflictAction::DeleteModify,
						change_type: "client deleted what server edited".to_string(),
					});
				}
			}

			// Present everywhere: compare both sides against the ancestor.
			(Some(c), Some(k), Some(s)) => {
				if c == s {
					// Identical content, including the convergent-edit case.
				} else if c != k && s == k {
					out.to_upload.insert(path.to_string());
				} else if s != k && c == k {
					out.to_download.insert(path.to_string());
				} else {
					out.conflicts.push(Conflict {
						path: path.to_string(),
						action: ConflictAction::EditEdit,
						change_type: "edited on both sides".to_string(),
					});
				}
			}

			// Created independently on both sides; no ancestor to consult.
			(Some(c), None, Some(s)) => {
				if c != s {
					out.conflicts.push(Conflict {
						path: path.to_string(),
						action: ConflictAction::EditEdit,
						change_type: "created on both sides".to_string(),
					});
				}
			}

			// The union only yields paths present somewhere.
			(None, None, None) => unreachable!("path not present in any manifest"),
		}
	}

	out
}

#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::manifest::FileEntry;

	fn manifest(entries: &[(&str, &str)]) -> Manifest {
		Manifest::from_entries(
			entries
				.iter()
				.map(|(path, hash)| FileEntry {
					path: path.to_string(),
					content_hash: hash.to_string(),
					size: 1,
					mtime: "2025-01-01T00:00:00+00:00".to_string(),
				})
				.collect(),
		)
	}

	#[test]
	fn new_client_file_is_uploaded() {
		let p = plan(&manifest(&[("a.md", "h1")]), &manifest(&[]), &manifest(&[]));
		assert!(p.to_upload.contains("a.md"));
		assert_eq!(p.total_operations(), 1);
	}

	#[test]
	fn new_server_file_is_downloaded() {
		let p = plan(&manifest(&[]), &manifest(&[]), &manifest(&[("a.md", "h1")]));
		assert!(p.to_download.contains("a.md"));
		assert_eq!(p.total_operations(), 1);
	}

	#[test]
	fn client_deletion_of_unchanged_server_file_deletes_remote() {
		let p = plan(
			&manifest(&[]),
			&manifest(&[("a.md", "h1")]),
			&manifest(&[("a.md", "h1")]),
		);
		assert!(p.to_delete_remote.contains("a.md"));
		assert!(p.conflicts.is_empty());
	}

	#[test]
	fn client_deletion_of_edited_server_file_conflicts() {
		let p = plan(
			&manifest(&[]),
			&manifest(&[("a.md", "h1")]),
			&manifest(&[("a.md", "h2")]),
		);
		assert_eq!(p.conflicts.len(), 1);
		assert_eq!(p.conflicts[0].action, ConflictAction::DeleteModify);
		assert!(p.to_delete_remote.is_empty());
	}

	#[test]
	fn server_deletion_of_edited_client_file_conflicts() {
		let p = plan(
			&manifest(&[("a.md", "h2")]),
			&manifest(&[("a.md", "h1")]),
			&manifest(&[]),
		);
		assert_eq!(p.conflicts.len(), 1);
		assert_eq!(p.conflicts[0].action, ConflictAction::ModifyDelete);
	}

	#[test]
	fn server_deletion_of_unchanged_client_file_deletes_local() {
		let p = plan(
			&manifest(&[("a.md", "h1")]),
			&manifest(&[("a.md", "h1")]),
			&manifest(&[]),
		);
		assert!(p.to_delete_local.contains("a.md"));
		assert!(p.conflicts.is_empty());
	}

	#[test]
	fn divergent_edits_conflict() {
		let p = plan(
			&manifest(&[("a.md", "h2")]),
			&manifest(&[("a.md", "h1")]),
			&manifest(&[("a.md", "h3")]),
		);
		assert_eq!(p.conflicts.len(), 1);
		assert_eq!(p.conflicts[0].action, ConflictAction::EditEdit);
		assert!(p.to_upload.is_empty());
		assert!(p.to_download.is_empty());
	}

	#[test]
	fn convergent_edits_are_a_no_op() {
		let p = plan(
			&manifest(&[("a.md", "h2")]),
			&manifest(&[("a.md", "h1")]),
			&manifest(&[("a.md", "h2")]),
		);
		assert!(p.is_empty());
	}

	#[test]
	fn one_sided_edit_routes_the_transfer() {
		let client_edit = plan(
			&manifest(&[("a.md", "h2")]),
			&manifest(&[("a.md", "h1")]),
			&manifest(&[("a.md", "h1")]),
		);
		assert!(client_edit.to_upload.contains("a.md"));

		let server_edit = plan(
			&manifest(&[("a.md", "h1")]),
			&manifest(&[("a.md", "h1")]),
			&manifest(&[("a.md", "h2")]),
		);
		assert!(server_edit.to_download.contains("a.md"));
	}

	#[test]
	fn deleted_on_both_sides_is_a_no_op() {
		let p = plan(&manifest(&[]), &manifest(&[("a.md", "h1")]), &manifest(&[]));
		assert!(p.is_empty());
	}

	#[test]
	fn independent_creation_with_same_content_is_a_no_op() {
		let p = plan(
			&manifest(&[("a.md", "h1")]),
			&manifest(&[]),
			&manifest(&[("a.md", "h1")]),
		);
		assert!(p.is_empty());
	}

	#[test]
	fn independent_creation_with_different_content_conflicts() {
		let p = plan(
			&manifest(&[("a.md", "h1")]),
			&manifest(&[]),
			&manifest(&[("a.md", "h2")]),
		);
		assert_eq!(p.conflicts.len(), 1);
		assert_eq!(p.conflicts[0].action, ConflictAction::EditEdit);
	}

	#[test]
	fn categories_are_pairwise_disjoint() {
		// One path per classification outcome, planned together.
		let client = manifest(&[
			("upload.md", "u2"),
			("conflict.md", "c2"),
			("delete_local.md", "k1"),
			("stable.md", "s1"),
		]);
		let last_known = manifest(&[
			("conflict.md", "c1"),
			("delete_local.md", "k1"),
			("delete_remote.md", "r1"),
			("stable.md", "s1"),
			("upload.md", "u1"),
		]);
		let current = manifest(&[
			("conflict.md", "c3"),
			("download.md", "d1"),
			("delete_remote.md", "r1"),
			("stable.md", "s1"),
			("upload.md", "u1"),
		]);

		let p = plan(&client, &last_known, &current);

		let mut seen = std::collections::BTreeSet::new();
		for set in [
			&p.to_upload,
			&p.to_download,
			&p.to_delete_local,
			&p.to_delete_remote,
		] {
			for path in set {
				assert!(seen.insert(path.clone()), "path {} in two categories", path);
			}
		}
		for conflict in &p.conflicts {
			assert!(
				seen.insert(conflict.path.clone()),
				"conflict path {} also in a transfer category",
				conflict.path
			);
		}
	}
}
