pub mod logging;

pub use logging::init_logging;

use std::sync::atomic::{AtomicU64, Ordering};

/// Global sync metrics instance
static GLOBAL_SYNC_METRICS: once_cell::sync::Lazy<SyncMetrics> =
	once_cell::sync::Lazy::new(SyncMetrics::default);

/// Get a reference to the global sync metrics
pub fn global_sync_metrics() -> &'static SyncMetrics {
	&GLOBAL_SYNC_METRICS
}

/// Counters for sync engine operations
#[derive(Default)]
pub struct SyncMetrics {
	pub plans_total: AtomicU64,
	pub uploads_total: AtomicU64,
	pub downloads_total: AtomicU64,
	pub commits_total: AtomicU64,
	pub commit_failures_total: AtomicU64,
	pub conflicts_detected_total: AtomicU64,
	pub merges_clean_total: AtomicU64,
	pub merges_conflicted_total: AtomicU64,
	pub bytes_uploaded_total: AtomicU64,
	pub bytes_downloaded_total: AtomicU64,
	pub snapshot_failures_total: AtomicU64,
}

impl SyncMetrics {
	pub fn inc(counter: &AtomicU64) {
		counter.fetch_add(1, Ordering::Relaxed);
	}

	pub fn add(counter: &AtomicU64, delta: u64) {
		counter.fetch_add(delta, Ordering::Relaxed);
	}

	/// Generate Prometheus-compatible metrics text
	pub fn to_prometheus_text(&self) -> String {
		let mut out = String::new();

		let counters: [(&str, &str, &AtomicU64); 11] = [
			(
				"scriptorium_sync_plans_total",
				"Total sync plans computed",
				&self.plans_total,
			),
			(
				"scriptorium_sync_uploads_total",
				"Total files uploaded by clients",
				&self.uploads_total,
			),
			(
				"scriptorium_sync_downloads_total",
				"Total files downloaded by clients",
				&self.downloads_total,
			),
			(
				"scriptorium_sync_commits_total",
				"Total commit sequences completed",
				&self.commits_total,
			),
			(
				"scriptorium_sync_commit_failures_total",
				"Total commit sequences that failed",
				&self.commit_failures_total,
			),
			(
				"scriptorium_sync_conflicts_detected_total",
				"Total conflicts surfaced by the planner",
				&self.conflicts_detected_total,
			),
			(
				"scriptorium_sync_merges_clean_total",
				"Three-way merges that resolved cleanly",
				&self.merges_clean_total,
			),
			(
				"scriptorium_sync_merges_conflicted_total",
				"Three-way merges that required manual resolution",
				&self.merges_conflicted_total,
			),
			(
				"scriptorium_sync_bytes_uploaded_total",
				"Total bytes received via upload",
				&self.bytes_uploaded_total,
			),
			(
				"scriptorium_sync_bytes_downloaded_total",
				"Total bytes served via download",
				&self.bytes_downloaded_total,
			),
			(
				"scriptorium_sync_snapshot_failures_total",
				"Version snapshot creations that failed",
				&self.snapshot_failures_total,
			),
		];

		for (name, help, counter) in counters {
			out.push_str(&format!("# HELP {} {}\n", name, help));
			out.push_str(&format!("# TYPE {} counter\n", name));
			out.push_str(&format!("{} {}\n", name, counter.load(Ordering::Relaxed)));
		}

		out
	}
}

#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn prometheus_text_exposes_all_counters() {
		let metrics = SyncMetrics::default();
		SyncMetrics::add(&metrics.uploads_total, 5);
		SyncMetrics::inc(&metrics.commits_total);

		let text = metrics.to_prometheus_text();
		assert!(text.contains("scriptorium_sync_uploads_total 5"));
		assert!(text.contains("scriptorium_sync_commits_total 1"));
		assert!(text.contains("# TYPE scriptorium_sync_plans_total counter"));
	}

	#[test]
	fn global_metrics_are_shared() {
		let a = global_sync_metrics() as *const SyncMetrics;
		let b = global_sync_metrics() as *const SyncMetrics;
		assert_eq!(a, b);
	}
}
