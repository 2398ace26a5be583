use axum::http::StatusCode;
use thiserror::Error;

/// Canonical error taxonomy for sync operations.
///
/// Every fallible operation in the engine reports one of these kinds; the
/// HTTP layer maps them onto status codes with [`SyncError::status`].
#[derive(Debug, Error)]
pub enum SyncError {
	/// A client-supplied path resolves outside the content root. The
	/// operation is rejected before any filesystem mutation.
	#[error("path escapes content root: {path}")]
	PathEscape { path: String },

	/// An upload exceeds the configured size cap. Rejected before any write.
	#[error("upload too large for {path}: {size} bytes (limit {limit})")]
	TooLarge { path: String, size: usize, limit: usize },

	/// Requested file does not exist in the content tree.
	#[error("not found: {path}")]
	NotFound { path: String },

	/// Filesystem failure while applying a sync step. Steps that already
	/// succeeded in the same commit remain applied.
	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),

	/// Content scanner failure while producing a manifest.
	#[error("scan error: {0}")]
	Scan(String),

	/// Version snapshot collaborator failure.
	#[error("snapshot error: {0}")]
	Snapshot(String),

	/// Manifest store failure (corrupt or unwritable manifest file).
	#[error("manifest error: {0}")]
	Manifest(String),
}

impl SyncError {
	/// HTTP status the error maps to at the wire boundary.
	pub fn status(&self) -> StatusCode {
		match self {
			SyncError::PathEscape { .. } => StatusCode::BAD_REQUEST,
			SyncError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
			SyncError::NotFound { .. } => StatusCode::NOT_FOUND,
			SyncError::Io(_)
			| SyncError::Scan(_)
			| SyncError::Snapshot(_)
			| SyncError::Manifest(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn status_mapping() {
		let e = SyncError::PathEscape { path: "../x".into() };
		assert_eq!(e.status(), StatusCode::BAD_REQUEST);

		let e = SyncError::NotFound { path: "a.md".into() };
		assert_eq!(e.status(), StatusCode::NOT_FOUND);

		let e = SyncError::TooLarge { path: "big.md".into(), size: 10, limit: 1 };
		assert_eq!(e.status(), StatusCode::PAYLOAD_TOO_LARGE);
	}
}
