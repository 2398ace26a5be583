use log::Level;
use serde::Deserialize;
use thiserror::Error;

/// Runtime configuration for the sync engine.
///
/// Values are loaded from (in order): `/etc/scriptorium/sync.json`, a
/// `scriptorium/sync.json` file in the user config folders (optional), and
/// environment variables prefixed with `SCR_` (e.g. `SCR_PORT`). This is a
/// small, intentionally conservative bootstrap for the project's
/// configuration system.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Settings {
	pub host: String,
	pub port: u16,
	/// Root of the server-held content tree.
	pub content_root: String,
	/// Directory for the persisted manifest and the snapshot store. Kept
	/// dot-prefixed by default so a state dir nested under the content root
	/// stays out of scans.
	pub state_dir: String,
	/// Default `context:` value the metadata normalizer applies to notes.
	pub default_context: String,
	/// Upload size cap in bytes; larger bodies are rejected before any write.
	pub max_upload_bytes: usize,
	pub log_level: Level,
}

impl Default for Settings {
	fn default() -> Self {
		let host = hostname::get()
			.ok()
			.and_then(|s| s.into_string().ok())
			.unwrap_or_else(|| "127.0.0.1".to_string());

		Self {
			host,
			port: 8137,
			content_root: "/var/lib/scriptorium/content".to_string(),
			state_dir: "/var/lib/scriptorium/content/.sync".to_string(),
			default_context: "notes".to_string(),
			// generous for notes, small enough to reject runaway uploads
			max_upload_bytes: 16 * 1024 * 1024,
			log_level: Level::Info,
		}
	}
}

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("configuration error: {0}")]
	Config(#[from] config::ConfigError),
}

pub fn load() -> Result<Settings, SettingsError> {
	let mut builder = config::Config::builder()
		.add_source(config::File::with_name("/etc/scriptorium/sync.json").required(false));

	if let Some(folder) = dirs::config_dir() {
		let user_config_path = folder.join("scriptorium").join("sync.json");
		builder = builder.add_source(config::File::from(user_config_path).required(false));
	}
	if let Some(folder) = dirs::config_local_dir() {
		let local_config_path = folder.join("scriptorium").join("sync.json");
		builder = builder.add_source(config::File::from(local_config_path).required(false));
	}

	builder = builder.add_source(config::Environment::with_prefix("SCR").separator("__"));

	let cfg = builder.build()?;

	let mut s: Settings = cfg.try_deserialize()?;

	// Explicitly prefer direct environment variables when present. Some
	// environments (CI, test harnesses) may set env vars in ways that the
	// `config` crate doesn't map as expected; read them directly to ensure
	// explicit overrides take effect.
	if let Ok(h) = std::env::var("SCR_HOST") {
		if !h.is_empty() {
			s.host = h;
		}
	}
	if let Ok(p) = std::env::var("SCR_PORT") {
		if let Ok(pn) = p.parse::<u16>() {
			s.port = pn;
		}
	}
	if let Ok(root) = std::env::var("SCR_CONTENT_ROOT") {
		if !root.is_empty() {
			s.content_root = root;
		}
	}
	if let Ok(dir) = std::env::var("SCR_STATE_DIR") {
		if !dir.is_empty() {
			s.state_dir = dir;
		}
	}
	if let Ok(ctx) = std::env::var("SCR_DEFAULT_CONTEXT") {
		if !ctx.is_empty() {
			s.default_context = ctx;
		}
	}
	if let Ok(cap) = std::env::var("SCR_MAX_UPLOAD_BYTES") {
		if !cap.is_empty() {
			if let Ok(parsed) = cap.parse::<usize>() {
				s.max_upload_bytes = parsed;
			}
		}
	}
	if let Ok(l) = std::env::var("SCR_LOG_LEVEL") {
		if !l.is_empty() {
			if let Ok(parsed) = l.parse::<Level>() {
				s.log_level = parsed;
			}
		}
	}

	Ok(s)
}
