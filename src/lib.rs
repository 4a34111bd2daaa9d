pub mod catalog;
pub mod config;
pub mod observability;
pub mod store;
pub mod sync;

use std::sync::Arc;

use anyhow::Context;
use log::info;

use crate::config::Settings;
use crate::observability::SyncMetrics;
use crate::store::SqlConnector;
use crate::sync::{CycleSummary, SyncController};

/// Run the sync loop against the configured stores until Ctrl-C.
pub async fn run(settings: &Settings) -> anyhow::Result<()> {
	let metrics = Arc::new(SyncMetrics::new());
	let connector = SqlConnector::from_settings(settings);
	let mut controller = SyncController::new(settings, connector, metrics)?;

	info!(
		"Mirroring catalog from {}:{}/{} into {}",
		settings.source.host,
		settings.source.port,
		settings.source.database,
		settings.target.path.display()
	);

	tokio::select! {
		_ = controller.run() => {}
		res = tokio::signal::ctrl_c() => {
			res.context("failed to listen for shutdown signal")?;
			info!("Shutdown requested, stopping sync loop");
		}
	}
	Ok(())
}

/// Connect and run a single full reconciliation regardless of change markers.
pub async fn sync_once(settings: &Settings) -> anyhow::Result<CycleSummary> {
	let metrics = Arc::new(SyncMetrics::new());
	let connector = SqlConnector::from_settings(settings);
	let mut controller = SyncController::new(settings, connector, metrics)?;
	controller
		.sync_once()
		.await
		.context("failed to connect to the source and target stores")
}
