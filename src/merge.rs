use serde::{Deserialize, Serialize};

/// Conflict-marker delimiters, seven characters each, followed by a side
/// label on the opening and closing lines.
pub const CONFLICT_START: &str = "<<<<<<<";
pub const CONFLICT_SEP: &str = "=======";
pub const CONFLICT_END: &str = ">>>>>>>";

const CLIENT_LABEL: &str = "client";
const SERVER_LABEL: &str = "server";

/// Outcome of resolving one conflicted file during commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
	Merged,
	Conflicted,
}

/// Per-file merge report returned to the client.
///
/// `content` is populated only for `Conflicted` results and carries the
/// marker-annotated text for human resolution; the server's own copy on disk
/// is never left with markers in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
	pub path: String,
	pub status: MergeStatus,
	pub content: Option<String>,
}

/// One contiguous edit relative to the base: replaces base lines
/// `[base_start, base_end)` with `lines`. An insertion has
/// `base_start == base_end`.
#[derive(Debug, Clone)]
struct Hunk<'a> {
	base_start: usize,
	base_end: usize,
	lines: Vec<&'a str>,
}

/// Line-based three-way merge of one file.
///
/// Both sides are diffed against `base` with a longest-common-subsequence
/// alignment; edits whose base ranges do not overlap are combined, edits
/// that collide on the same base region produce a conflict region delimited
/// with the seven-character marker convention. Returns the merged text and
/// whether any conflict region was emitted.
///
/// Without a base the file cannot be aligned into hunks: the whole file is
/// treated as one hunk and conflicts unless both sides agree verbatim.
pub fn merge(base: Option<&str>, server: &str, client: &str) -> (String, bool) {
	// Agreement wins regardless of ancestry.
	if server == client {
		return (server.to_string(), false);
	}

	let Some(base) = base else {
		return (whole_file_conflict(server, client), true);
	};

	let base_lines: Vec<&str> = split_lines(base);
	let server_hunks = diff_hunks(&base_lines, &split_lines(server));
	let client_hunks = diff_hunks(&base_lines, &split_lines(client));

	combine(&base_lines, &server_hunks, &client_hunks)
}

fn split_lines(text: &str) -> Vec<&str> {
	text.split_inclusive('\n').collect()
}

/// Compute the edit script of `other` against `base` as a list of hunks in
/// ascending base order, from the LCS match list.
fn diff_hunks<'a>(base: &[&'a str], other: &[&'a str]) -> Vec<Hunk<'a>> {
	let matches = lcs_matches(base, other);
	let mut hunks = Vec::new();

	let mut prev_base = 0usize;
	let mut prev_other = 0usize;
	for &(b, o) in matches.iter().chain(std::iter::once(&(base.len(), other.len()))) {
		if b > prev_base || o > prev_other {
			hunks.push(Hunk {
				base_start: prev_base,
				base_end: b,
				lines: other[prev_other..o].to_vec(),
			});
		}
		prev_base = b + 1;
		prev_other = o + 1;
	}
	// The sentinel pair above is one past the end on both sides, so the
	// final region is emitted before the pointers run off the arrays.
	hunks
}

/// Longest-common-subsequence match pairs `(base_index, other_index)`.
fn lcs_matches(a: &[&str], b: &[&str]) -> Vec<(usize, usize)> {
	let n = a.len();
	let m = b.len();
	// dp[i][j] = LCS length of a[i..] and b[j..]
	let mut dp = vec![vec![0u32; m + 1]; n + 1];
	for i in (0..n).rev() {
		for j in (0..m).rev() {
			dp[i][j] = if a[i] == b[j] {
				dp[i + 1][j + 1] + 1
			} else {
				dp[i + 1][j].max(dp[i][j + 1])
			};
		}
	}

	let mut pairs = Vec::new();
	let (mut i, mut j) = (0, 0);
	while i < n && j < m {
		if a[i] == b[j] {
			pairs.push((i, j));
			i += 1;
			j += 1;
		} else if dp[i + 1][j] >= dp[i][j + 1] {
			i += 1;
		} else {
			j += 1;
		}
	}
	pairs
}

/// Walk both hunk lists in base order, copying unchanged base lines and
/// taking one-sided edits as-is. Hunks whose base ranges collide are merged
/// into a single region; if both sides produce the same region text they
/// agree, otherwise a conflict region is emitted.
fn combine(base: &[&str], server_hunks: &[Hunk], client_hunks: &[Hunk]) -> (String, bool) {
	let mut out = String::new();
	let mut has_conflict = false;

	let mut cursor = 0usize; // next base line to copy
	let mut si = 0usize;
	let mut ci = 0usize;

	loop {
		match (server_hunks.get(si), client_hunks.get(ci)) {
			(None, None) => {
				push_lines(&mut out, &base[cursor..]);
				break;
			}
			(Some(s), None) => {
				push_lines(&mut out, &base[cursor..s.base_start]);
				push_lines(&mut out, &s.lines);
				cursor = s.base_end;
				si += 1;
			}
			(None, Some(c)) => {
				push_lines(&mut out, &base[cursor..c.base_start]);
				push_lines(&mut out, &c.lines);
				cursor = c.base_end;
				ci += 1;
			}
			(Some(s), Some(c)) => {
				if hunks_collide(s, c) {
					// Grow the region until no remaining hunk on either side
					// still touches it.
					let start = s.base_start.min(c.base_start);
					let mut end = s.base_end.max(c.base_end);
					let s_from = si;
					let c_from = ci;
					si += 1;
					ci += 1;
					loop {
						let mut grew = false;
						if let Some(next) = server_hunks.get(si) {
							if next.base_start < end || (next.base_start == next.base_end && next.base_start == end) {
								end = end.max(next.base_end);
								si += 1;
								grew = true;
							}
						}
						if let Some(next) = client_hunks.get(ci) {
							if next.base_start < end || (next.base_start == next.base_end && next.base_start == end) {
								end = end.max(next.base_end);
								ci += 1;
								grew = true;
							}
						}
						if !grew {
							break;
						}
					}
					push_lines(&mut out, &base[cursor..start]);
					let server_region =
						apply_region(base, &server_hunks[s_from..si], start, end);
					let client_region =
						apply_region(base, &client_hunks[c_from..ci], start, end);

					if server_region == client_region {
						// Both sides changed the region identically.
						out.push_str(&server_region);
					} else {
						has_conflict = true;
						push_conflict_region(&mut out, &client_region, &server_region);
					}
					cursor = end;
				} else if s.base_start <= c.base_start {
					push_lines(&mut out, &base[cursor..s.base_start]);
					push_lines(&mut out, &s.lines);
					cursor = s.base_end;
					si += 1;
				} else {
					push_lines(&mut out, &base[cursor..c.base_start]);
					push_lines(&mut out, &c.lines);
					cursor = c.base_end;
					ci += 1;
				}
			}
		}
	}

	(out, has_conflict)
}

/// Two hunks collide when their base ranges intersect, or when both are
/// insertions at the same base point (there is no ordering between them).
fn hunks_collide(a: &Hunk, b: &Hunk) -> bool {
	let a_insertion = a.base_start == a.base_end;
	let b_insertion = b.base_start == b.base_end;
	if a_insertion && b_insertion {
		return a.base_start == b.base_start;
	}
	a.base_start < b.base_end && b.base_start < a.base_end
}

/// Replay one side's hunks over the base slice `[start, end)`.
fn apply_region(base: &[&str], hunks: &[Hunk], start: usize, end: usize) -> String {
	let mut out = String::new();
	let mut cursor = start;
	for hunk in hunks {
		for line in &base[cursor..hunk.base_start] {
			out.push_str(line);
		}
		for line in &hunk.lines {
			out.push_str(line);
		}
		cursor = hunk.base_end;
	}
	for line in &base[cursor..end] {
		out.push_str(line);
	}
	out
}

fn push_lines(out: &mut String, lines: &[&str]) {
	for line in lines {
		out.push_str(line);
	}
}

fn push_conflict_region(out: &mut String, client_text: &str, server_text: &str) {
	out.push_str(CONFLICT_START);
	out.push(' ');
	out.push_str(CLIENT_LABEL);
	out.push('\n');
	push_region_text(out, client_text);
	out.push_str(CONFLICT_SEP);
	out.push('\n');
	push_region_text(out, server_text);
	out.push_str(CONFLICT_END);
	out.push(' ');
	out.push_str(SERVER_LABEL);
	out.push('\n');
}

/// Region text inside markers must end with a newline so the following
/// marker sits on its own line.
fn push_region_text(out: &mut String, text: &str) {
	out.push_str(text);
	if !text.is_empty() && !text.ends_with('\n') {
		out.push('\n');
	}
}

fn whole_file_conflict(server: &str, client: &str) -> String {
	let mut out = String::new();
	push_conflict_region(&mut out, client, server);
	out
}

#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn identical_sides_merge_regardless_of_base() {
		let (merged, conflict) = merge(Some("base\n"), "same\n", "same\n");
		assert_eq!(merged, "same\n");
		assert!(!conflict);

		let (merged, conflict) = merge(None, "same\n", "same\n");
		assert_eq!(merged, "same\n");
		assert!(!conflict);
	}

	#[test]
	fn unchanged_side_yields_the_other() {
		let base = "a\nb\nc\n";
		let client = "a\nB\nc\n";

		let (merged, conflict) = merge(Some(base), base, client);
		assert_eq!(merged, client);
		assert!(!conflict);

		let (merged, conflict) = merge(Some(base), client, base);
		assert_eq!(merged, client);
		assert!(!conflict);
	}

	#[test]
	fn non_overlapping_edits_merge_cleanly() {
		// Server rewrites line2, client appends line3.
		let (merged, conflict) = merge(
			Some("line1\nline2\n"),
			"line1\nCHANGED\n",
			"line1\nline2\nline3\n",
		);
		assert_eq!(merged, "line1\nCHANGED\nline3\n");
		assert!(!conflict);
	}

	#[test]
	fn separated_edits_merge_cleanly() {
		let base = "one\ntwo\nthree\nfour\nfive\n";
		let server = "ONE\ntwo\nthree\nfour\nfive\n";
		let client = "one\ntwo\nthree\nfour\nFIVE\n";

		let (merged, conflict) = merge(Some(base), server, client);
		assert_eq!(merged, "ONE\ntwo\nthree\nfour\nFIVE\n");
		assert!(!conflict);
	}

	#[test]
	fn colliding_edits_emit_marker_region() {
		let (merged, conflict) = merge(Some("x\n"), "y\n", "z\n");
		assert!(conflict);

		let expected = "<<<<<<< client\nz\n=======\ny\n>>>>>>> server\n";
		assert_eq!(merged, expected);
	}

	#[test]
	fn marker_lines_use_seven_character_delimiters() {
		let (merged, conflict) = merge(Some("x\n"), "y\n", "z\n");
		assert!(conflict);
		assert!(merged.contains("<<<<<<< client"));
		assert!(merged.contains("======="));
		assert!(merged.contains(">>>>>>> server"));
	}

	#[test]
	fn conflict_region_is_local() {
		let base = "intro\nmiddle\noutro\n";
		let server = "intro\nserver middle\noutro\n";
		let client = "intro\nclient middle\noutro\n";

		let (merged, conflict) = merge(Some(base), server, client);
		assert!(conflict);
		// Shared context stays outside the markers.
		assert!(merged.starts_with("intro\n"));
		assert!(merged.ends_with("outro\n"));
		assert!(merged.contains("client middle\n=======\nserver middle\n"));
	}

	#[test]
	fn identical_changes_on_both_sides_collapse() {
		let (merged, conflict) = merge(Some("a\nb\n"), "a\nB\nc\n", "a\nB\nc\n");
		assert_eq!(merged, "a\nB\nc\n");
		assert!(!conflict);
	}

	#[test]
	fn insertions_at_same_point_conflict() {
		let base = "a\nz\n";
		let server = "a\nserver-insert\nz\n";
		let client = "a\nclient-insert\nz\n";

		let (merged, conflict) = merge(Some(base), server, client);
		assert!(conflict);
		assert!(merged.contains("client-insert"));
		assert!(merged.contains("server-insert"));
	}

	#[test]
	fn no_base_divergence_is_whole_file_conflict() {
		let (merged, conflict) = merge(None, "server text\n", "client text\n");
		assert!(conflict);
		assert_eq!(
			merged,
			"<<<<<<< client\nclient text\n=======\nserver text\n>>>>>>> server\n"
		);
	}

	#[test]
	fn deletion_on_one_side_merges() {
		let base = "a\nb\nc\n";
		let server = "a\nc\n";
		let client = "a\nb\nc\nd\n";

		let (merged, conflict) = merge(Some(base), server, client);
		assert_eq!(merged, "a\nc\nd\n");
		assert!(!conflict);
	}

	#[test]
	fn missing_trailing_newline_still_produces_valid_markers() {
		let (merged, conflict) = merge(Some("x"), "y", "z");
		assert!(conflict);
		for marker in [CONFLICT_SEP, CONFLICT_END] {
			let idx = merged.find(marker).unwrap();
			assert!(idx == 0 || merged.as_bytes()[idx - 1] == b'\n');
		}
	}

	#[test]
	fn empty_base_with_two_different_creations_conflicts() {
		let (merged, conflict) = merge(Some(""), "server\n", "client\n");
		assert!(conflict);
		assert!(merged.contains("client\n=======\nserver\n"));
	}
}
