use std::fmt;
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDateTime;
use log::{Level, LevelFilter};

/// Timestamp layout shared by every log line.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render one log line: timestamp, level, target and message.
pub fn format_line(now: NaiveDateTime, level: Level, target: &str, message: &fmt::Arguments<'_>) -> String {
	format!("{} [{:<5}] {}: {}", now.format(TIMESTAMP_FORMAT), level, target, message)
}

/// Initialize timestamped line logging to stderr and, when `log_file` is set,
/// append the same lines to that file.
pub fn init_logging(level: Level, log_file: Option<&Path>) -> anyhow::Result<()> {
	let mut dispatch = fern::Dispatch::new()
		.format(|out, message, record| {
			let now = chrono::Local::now().naive_local();
			out.finish(format_args!(
				"{}",
				format_line(now, record.level(), record.target(), message)
			))
		})
		.level(level.to_level_filter())
		// sqlx logs every statement at info
		.level_for("sqlx", LevelFilter::Warn)
		.chain(std::io::stderr());

	if let Some(path) = log_file {
		let file = fern::log_file(path)
			.with_context(|| format!("failed to open log file {}", path.display()))?;
		dispatch = dispatch.chain(file);
	}

	dispatch
		.apply()
		.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

	Ok(())
}
