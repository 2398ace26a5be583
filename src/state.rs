use std::sync::Arc;

use crate::engine::SyncEngine;

/// Application state passed to handlers via Axum's `State` extractor.
///
/// Holds the shared sync engine; the engine itself carries the commit
/// serialization point, so handlers stay free of locking concerns.
#[derive(Clone)]
pub struct AppState {
	pub engine: Arc<SyncEngine>,
}
