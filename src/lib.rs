pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod merge;
pub mod normalize;
pub mod observability;
pub mod pathutil;
pub mod planner;
pub mod scan;
pub mod snapshot;
pub mod state;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::engine::SyncEngine;
use crate::manifest::ManifestStore;
use crate::normalize::FrontMatterNormalizer;
use crate::snapshot::DirSnapshotRepo;
use crate::state::AppState;

/// Wire up a sync engine from settings: manifest store and snapshot store
/// under the state directory, front-matter normalizer as the metadata pass.
pub fn build_engine(settings: &config::Settings) -> Arc<SyncEngine> {
	let state_dir = std::path::PathBuf::from(&settings.state_dir);
	Arc::new(SyncEngine::new(
		&settings.content_root,
		ManifestStore::new(&state_dir),
		Arc::new(DirSnapshotRepo::new(
			&settings.content_root,
			state_dir.join("snapshots"),
		)),
		Arc::new(FrontMatterNormalizer),
		settings.default_context.clone(),
		settings.max_upload_bytes,
	))
}

/// Assemble the sync router. Kept separate from [`run`] so integration
/// tests can drive the handlers without binding a socket.
pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
	Router::new()
		.route("/sync/init", post(api::init))
		.route("/sync/upload", post(api::upload))
		.route("/sync/download", get(api::download))
		.route("/sync/commit", post(api::commit))
		.route("/health", get(api::health))
		.route("/metrics", get(api::metrics))
		// Body cap with headroom for the JSON envelope around commit
		// requests; oversized uploads are additionally rejected per-file.
		.layer(DefaultBodyLimit::max(max_upload_bytes + 64 * 1024))
		.with_state(state)
}

pub async fn run() {
	let settings = match crate::config::load() {
		Ok(s) => s,
		Err(e) => {
			eprintln!("failed to load config, using defaults: {}", e);
			crate::config::Settings::default()
		}
	};

	if let Err(e) = observability::init_logging(settings.log_level) {
		eprintln!("failed to initialize logging: {}", e);
	}

	// The engine refuses to run without a usable content root; everything
	// else is created on demand.
	if let Err(e) = std::fs::create_dir_all(&settings.content_root) {
		eprintln!(
			"content root '{}' is not usable: {}. Refusing to start.",
			settings.content_root, e
		);
		std::process::exit(1);
	}

	let engine = build_engine(&settings);
	let app = build_router(AppState { engine }, settings.max_upload_bytes);

	let addr = format!("{}:{}", settings.host, settings.port);
	let listener = match tokio::net::TcpListener::bind(&addr).await {
		Ok(l) => l,
		Err(e) => {
			eprintln!("failed to bind {}: {}", addr, e);
			std::process::exit(1);
		}
	};

	log::info!(
		"scriptorium-sync listening on {} (content root: {})",
		addr,
		settings.content_root
	);

	if let Err(e) = axum::serve(listener, app).await {
		eprintln!("server error: {}", e);
		std::process::exit(1);
	}
}
