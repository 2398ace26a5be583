use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::engine::{CommitOutcome, CommitRequest};
use crate::error::SyncError;
use crate::manifest::{FileEntry, Manifest};
use crate::merge::MergeResult;
use crate::observability::global_sync_metrics;
use crate::planner::SyncPlan;
use crate::state::AppState;

/// Session opener: the client declares its manifest and learns the plan.
#[derive(Debug, Deserialize)]
pub struct InitRequest {
	pub client_manifest: Vec<FileEntry>,
	#[serde(default)]
	pub last_sync_commit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InitResponse {
	pub plan: SyncPlan,
	pub server_commit_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
	pub path: String,
}

#[derive(Debug, Serialize)]
pub struct CommitResponse {
	pub status: String,
	pub files_synced: u64,
	pub warnings: Vec<String>,
	pub commit_hash: Option<String>,
	pub merge_results: Vec<MergeResult>,
}

impl From<CommitOutcome> for CommitResponse {
	fn from(outcome: CommitOutcome) -> Self {
		Self {
			status: "ok".to_string(),
			files_synced: outcome.files_synced,
			warnings: outcome.warnings,
			commit_hash: outcome.commit_id,
			merge_results: outcome.merge_results,
		}
	}
}

fn error_response(e: &SyncError) -> axum::response::Response {
	(e.status(), e.to_string()).into_response()
}

/// `POST /sync/init`: compute the sync plan for a declared client manifest.
pub async fn init(
	State(state): State<AppState>,
	Json(req): Json<InitRequest>,
) -> impl IntoResponse {
	let client_manifest = Manifest::from_entries(req.client_manifest);

	match state.engine.plan_session(&client_manifest).await {
		Ok((plan, server_commit_id)) => Json(InitResponse {
			plan,
			server_commit_id,
		})
		.into_response(),
		Err(e) => error_response(&e),
	}
}

/// `POST /sync/upload?path=...`: store one file's raw bytes under the
/// content root. Escaping paths are rejected before any write.
pub async fn upload(
	State(state): State<AppState>,
	Query(query): Query<FileQuery>,
	body: Bytes,
) -> impl IntoResponse {
	match state.engine.store_upload(&query.path, &body) {
		Ok(()) => (StatusCode::OK, "ok").into_response(),
		Err(e) => error_response(&e),
	}
}

/// `GET /sync/download?path=...`: serve one file's raw bytes. 404 when the
/// file is absent, 400 when the path escapes the root.
pub async fn download(
	State(state): State<AppState>,
	Query(query): Query<FileQuery>,
) -> impl IntoResponse {
	match state.engine.read_download(&query.path) {
		Ok(bytes) => (StatusCode::OK, bytes).into_response(),
		Err(e) => error_response(&e),
	}
}

/// `POST /sync/commit`: run the serialized commit sequence and report merge
/// results. Concurrent commits queue; they never fail on contention.
pub async fn commit(
	State(state): State<AppState>,
	Json(req): Json<CommitRequest>,
) -> impl IntoResponse {
	match state.engine.commit(req).await {
		Ok(outcome) => Json(CommitResponse::from(outcome)).into_response(),
		Err(e) => error_response(&e),
	}
}

/// Liveness endpoint.
pub async fn health() -> impl IntoResponse {
	(StatusCode::OK, "OK").into_response()
}

/// Prometheus metrics endpoint: returns metrics in Prometheus text format
pub async fn metrics() -> impl IntoResponse {
	(StatusCode::OK, global_sync_metrics().to_prometheus_text()).into_response()
}
