use fern::colors::{Color, ColoredLevelConfig};
use log::Level;

/// Initialize the fern dispatcher: colored level tags, RFC 3339 timestamps,
/// target-qualified lines on stderr.
pub fn init_logging(level: Level) -> anyhow::Result<()> {
	let colors = ColoredLevelConfig::new()
		.error(Color::Red)
		.warn(Color::Yellow)
		.info(Color::Green)
		.debug(Color::BrightBlack)
		.trace(Color::BrightBlack);

	fern::Dispatch::new()
		.format(move |out, message, record| {
			out.finish(format_args!(
				"[{} {} {}] {}",
				chrono::Utc::now().to_rfc3339(),
				colors.color(record.level()),
				record.target(),
				message
			))
		})
		.level(level.to_level_filter())
		.chain(std::io::stderr())
		.apply()
		.map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

	Ok(())
}

#[cfg(feature = "unit-tests")]
mod tests {
	#[test]
	fn logging_initialization() {
		// The logger can only be installed once per process; this validates
		// the setup path without asserting on the global state.
		let _ = super::init_logging(log::Level::Info);
	}
}
