// End-to-end runs of the sync loop over in-memory stores.
#![cfg(feature = "unit-tests")]

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use pos_catalog_sync::catalog::{ChangeMarker, EntityKind, Group, PluType, SourceGroup, SourceItem};
use pos_catalog_sync::config::Settings;
use pos_catalog_sync::observability::SyncMetrics;
use pos_catalog_sync::store::{MemoryConnector, MemorySource, MemoryTarget};
use pos_catalog_sync::sync::{ControllerState, SyncController};

const WEIGHT_UNIT: i64 = 5;

fn settings() -> Settings {
	let mut s = Settings::default();
	s.weight_unit_id = WEIGHT_UNIT;
	s.piece_unit_id = 6;
	s.divisor = 10.0;
	s
}

fn at(hour: u32) -> NaiveDateTime {
	NaiveDate::from_ymd_opt(2024, 6, 3)
		.and_then(|d| d.and_hms_opt(hour, 0, 0))
		.expect("valid timestamp")
}

fn active(hour: u32) -> ChangeMarker {
	ChangeMarker {
		timestamp: at(hour),
		status: 1,
	}
}

fn item(code: &str, unit: i64, price: f64) -> SourceItem {
	SourceItem {
		id: 1,
		code: code.to_string(),
		name: format!("Item {}", code),
		unit,
		group: 1,
		price,
	}
}

fn stores() -> (MemorySource, MemoryTarget) {
	let source = MemorySource::new();
	source.push_group(SourceGroup {
		id: 1,
		name: "Produce".to_string(),
		deleted: false,
	});
	source.push_item(1, item("100", WEIGHT_UNIT, 129.0));
	source.push_item(1, item("200", 6, 35.0));
	source.push_item(2, item("300", 6, 99.0));
	(source, MemoryTarget::new())
}

#[tokio::test(start_paused = true)]
async fn marker_triggers_full_mirror() {
	let s = settings();
	let (source, target) = stores();
	source.push_marker(active(8));
	let connector = MemoryConnector::new(source.clone(), target.clone());
	let mut controller = SyncController::new(&s, connector, Arc::new(SyncMetrics::new())).expect("controller");

	assert_eq!(controller.state(), ControllerState::Disconnected);
	assert_eq!(controller.step().await, ControllerState::ConnectedIdle);
	assert_eq!(controller.step().await, ControllerState::ConnectedSyncing);
	assert_eq!(controller.cursor().value(), at(8));
	assert_eq!(controller.step().await, ControllerState::ConnectedIdle);

	assert_eq!(
		target.groups_committed(),
		vec![Group {
			code: 1,
			name: "Produce".to_string()
		}]
	);
	let items = target.items_committed();
	assert_eq!(items.len(), 2);
	assert_eq!(items[0].kind, PluType::Weight);
	assert_eq!(items[0].unit_price, 12.9);
	assert_eq!(items[1].kind, PluType::Piece);
	assert_eq!(items[1].department, 2);
	assert!(target.item_stamp("100").is_some());

	let metrics = controller.metrics();
	assert_eq!(metrics.sync_cycles_total.get(), 1);
	assert_eq!(metrics.rows_inserted_total.with_label_values(&["items"]).get(), 2);
	assert_eq!(metrics.last_sync_marker_seconds.get(), at(8).and_utc().timestamp() as f64);
}

#[tokio::test(start_paused = true)]
async fn only_newer_active_markers_trigger() {
	let s = settings();
	let (source, target) = stores();
	source.push_marker(active(8));
	let connector = MemoryConnector::new(source.clone(), target.clone());
	let mut controller = SyncController::new(&s, connector, Arc::new(SyncMetrics::new())).expect("controller");

	controller.step().await;
	controller.step().await;
	controller.step().await;
	let commits = target.commits();

	// inactive and older markers leave the loop idle
	source.push_marker(ChangeMarker {
		timestamp: at(12),
		status: 0,
	});
	source.push_marker(active(7));
	assert_eq!(controller.step().await, ControllerState::ConnectedIdle);
	assert_eq!(target.commits(), commits);

	source.update_item("200", |i| i.price = 80.0);
	source.push_marker(active(9));
	assert_eq!(controller.step().await, ControllerState::ConnectedSyncing);
	assert_eq!(controller.step().await, ControllerState::ConnectedIdle);

	let piece = target
		.items_committed()
		.into_iter()
		.find(|i| i.code == "200")
		.expect("item 200 mirrored");
	assert_eq!(piece.unit_price, 8.0);
	assert_eq!(controller.metrics().sync_cycles_total.get(), 2);
}

#[tokio::test(start_paused = true)]
async fn reconnect_waits_for_poll_interval() {
	let mut s = settings();
	s.poll_interval_secs = 30;
	let (source, target) = stores();
	source.set_offline(true);
	let connector = MemoryConnector::new(source.clone(), target);
	let mut controller = SyncController::new(&s, connector, Arc::new(SyncMetrics::new())).expect("controller");

	let started = tokio::time::Instant::now();
	assert_eq!(controller.step().await, ControllerState::Disconnected);
	assert!(started.elapsed() >= Duration::from_secs(30));
	assert_eq!(controller.metrics().connection_failures_total.get(), 1);

	source.set_offline(false);
	assert_eq!(controller.step().await, ControllerState::ConnectedIdle);
}

#[tokio::test(start_paused = true)]
async fn failed_kind_is_retried_on_next_marker() {
	let s = settings();
	let (source, target) = stores();
	source.push_marker(active(8));
	target.fail_write(EntityKind::Item, true, true);
	let connector = MemoryConnector::new(source.clone(), target.clone());
	let mut controller = SyncController::new(&s, connector, Arc::new(SyncMetrics::new())).expect("controller");

	let summary = controller.sync_once().await.expect("connected");
	assert_eq!(summary.failures(), 1);
	assert!(target.items_committed().is_empty());
	assert_eq!(target.groups_committed().len(), 1);
	assert_eq!(controller.metrics().reconcile_failures_total.with_label_values(&["items"]).get(), 1);

	target.fail_write(EntityKind::Item, true, false);
	let summary = controller.sync_once().await.expect("connected");
	assert_eq!(summary.failures(), 0);
	assert_eq!(target.items_committed().len(), 2);
	assert!(!target.in_transaction());
}
