use chrono::NaiveDateTime;
use prometheus::{Gauge, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::catalog::EntityKind;

/// Prometheus metrics for the sync loop.
///
/// Each instance owns its registry so tests and embedded controllers never
/// collide on metric names.
pub struct SyncMetrics {
	registry: Registry,

	pub sync_cycles_total: IntCounter,
	pub connection_failures_total: IntCounter,
	pub rows_updated_total: IntCounterVec,
	pub rows_inserted_total: IntCounterVec,
	pub reconcile_failures_total: IntCounterVec,
	pub last_sync_marker_seconds: Gauge,
}

impl SyncMetrics {
	pub fn new() -> Self {
		let registry = Registry::new();

		let sync_cycles_total = IntCounter::with_opts(Opts::new(
			"pcs_sync_cycles_total",
			"Sync cycles started after a new change marker",
		))
		.unwrap();

		let connection_failures_total = IntCounter::with_opts(Opts::new(
			"pcs_connection_failures_total",
			"Failed attempts to connect to the source or target store",
		))
		.unwrap();

		let rows_updated_total = IntCounterVec::new(
			Opts::new("pcs_rows_updated_total", "Target rows updated"),
			&["entity"],
		)
		.unwrap();

		let rows_inserted_total = IntCounterVec::new(
			Opts::new("pcs_rows_inserted_total", "Target rows inserted"),
			&["entity"],
		)
		.unwrap();

		let reconcile_failures_total = IntCounterVec::new(
			Opts::new(
				"pcs_reconcile_failures_total",
				"Reconciliations rolled back after a store error",
			),
			&["entity"],
		)
		.unwrap();

		let last_sync_marker_seconds = Gauge::with_opts(Opts::new(
			"pcs_last_sync_marker_seconds",
			"Timestamp of the newest change marker that triggered a sync",
		))
		.unwrap();

		registry
			.register(Box::new(sync_cycles_total.clone()))
			.unwrap();
		registry
			.register(Box::new(connection_failures_total.clone()))
			.unwrap();
		registry
			.register(Box::new(rows_updated_total.clone()))
			.unwrap();
		registry
			.register(Box::new(rows_inserted_total.clone()))
			.unwrap();
		registry
			.register(Box::new(reconcile_failures_total.clone()))
			.unwrap();
		registry
			.register(Box::new(last_sync_marker_seconds.clone()))
			.unwrap();

		Self {
			registry,
			sync_cycles_total,
			connection_failures_total,
			rows_updated_total,
			rows_inserted_total,
			reconcile_failures_total,
			last_sync_marker_seconds,
		}
	}

	/// Record the outcome counts of one successful reconciliation.
	pub fn record_reconciled(&self, kind: EntityKind, updated: usize, inserted: usize) {
		self.rows_updated_total
			.with_label_values(&[kind.as_str()])
			.inc_by(updated as u64);
		self.rows_inserted_total
			.with_label_values(&[kind.as_str()])
			.inc_by(inserted as u64);
	}

	pub fn record_failure(&self, kind: EntityKind) {
		self.reconcile_failures_total
			.with_label_values(&[kind.as_str()])
			.inc();
	}

	pub fn record_marker(&self, marker: NaiveDateTime) {
		self.last_sync_marker_seconds
			.set(marker.and_utc().timestamp() as f64);
	}

	/// Encode metrics in Prometheus text format
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				log::warn!("Failed to encode metrics: {}", e);
				String::new()
			}
		}
	}
}

impl Default for SyncMetrics {
	fn default() -> Self {
		Self::new()
	}
}
