use std::sync::Arc;

use chrono::NaiveDate;
use log::Level;
use pos_catalog_sync::catalog::EntityKind;
use pos_catalog_sync::observability::SyncMetrics;
use pos_catalog_sync::observability::logging::format_line;

#[cfg(feature = "unit-tests")]
#[test]
fn test_metrics_registry_creation() {
	let metrics = SyncMetrics::new();
	let output = metrics.encode();

	assert!(output.contains("pcs_sync_cycles_total"));
	assert!(output.contains("pcs_connection_failures_total"));
	assert!(output.contains("pcs_last_sync_marker_seconds"));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_metrics_increment() {
	let metrics = SyncMetrics::new();

	metrics.sync_cycles_total.inc();
	metrics.connection_failures_total.inc_by(3);
	metrics.record_reconciled(EntityKind::Department, 0, 2);

	let output = metrics.encode();
	assert!(output.contains("pcs_sync_cycles_total 1"));
	assert!(output.contains("pcs_connection_failures_total 3"));
	assert!(output.contains("pcs_rows_inserted_total{entity=\"departments\"} 2"));
	assert!(output.contains("pcs_rows_updated_total{entity=\"departments\"} 0"));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_marker_gauge() {
	let metrics = SyncMetrics::new();
	let marker = NaiveDate::from_ymd_opt(2024, 1, 1)
		.and_then(|d| d.and_hms_opt(0, 0, 0))
		.expect("valid timestamp");

	metrics.record_marker(marker);
	assert_eq!(metrics.last_sync_marker_seconds.get(), 1_704_067_200.0);
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_instances_do_not_share_counters() {
	let a = Arc::new(SyncMetrics::new());
	let b = SyncMetrics::default();
	a.record_failure(EntityKind::Item);

	assert_eq!(a.reconcile_failures_total.with_label_values(&["items"]).get(), 1);
	assert_eq!(b.reconcile_failures_total.with_label_values(&["items"]).get(), 0);
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_log_line_pads_level() {
	let now = NaiveDate::from_ymd_opt(2024, 12, 31)
		.and_then(|d| d.and_hms_opt(23, 59, 59))
		.expect("valid timestamp");
	let line = format_line(now, Level::Info, "pos_catalog_sync", &format_args!("Updated {} groups", 4));
	assert_eq!(line, "2024-12-31 23:59:59 [INFO ] pos_catalog_sync: Updated 4 groups");
}
