use std::sync::Arc;

use chrono::NaiveDateTime;
use log::{debug, error, info, warn};
use tokio::time::sleep;

use super::detector::{ChangeDetector, PollOutcome, SyncCursor};
use super::reconcile::{ReconcileReport, ReconciliationError, Reconciler};
use crate::catalog::EntityKind;
use crate::config::{Settings, SettingsError};
use crate::observability::SyncMetrics;
use crate::store::{SourceStore, StoreConnector, StoreError};

/// Where the control loop currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
	Disconnected,
	ConnectedIdle,
	ConnectedSyncing,
}

/// Outcome of each entity kind in one sync cycle, in the order they ran.
#[derive(Debug, Default)]
pub struct CycleSummary {
	pub outcomes: Vec<(EntityKind, Result<ReconcileReport, ReconciliationError>)>,
}

impl CycleSummary {
	pub fn failures(&self) -> usize {
		self.outcomes.iter().filter(|(_, r)| r.is_err()).count()
	}

	pub fn report(&self, kind: EntityKind) -> Option<ReconcileReport> {
		self.outcomes
			.iter()
			.find(|(k, _)| *k == kind)
			.and_then(|(_, r)| r.as_ref().ok().copied())
	}
}

/// Drives polling, reconnection and reconciliation on a single task.
///
/// The controller owns the store handles and the sync cursor. Each call to
/// [`SyncController::step`] performs exactly one state transition.
pub struct SyncController<'a, C: StoreConnector> {
	settings: &'a Settings,
	connector: C,
	reconciler: Reconciler<'a>,
	detector: ChangeDetector,
	source: Option<C::Source>,
	target: Option<C::Target>,
	state: ControllerState,
	last_marker: Option<NaiveDateTime>,
	metrics: Arc<SyncMetrics>,
}

impl<'a, C: StoreConnector> SyncController<'a, C> {
	pub fn new(settings: &'a Settings, connector: C, metrics: Arc<SyncMetrics>) -> Result<Self, SettingsError> {
		Ok(Self {
			settings,
			connector,
			reconciler: Reconciler::new(settings)?,
			detector: ChangeDetector::new(),
			source: None,
			target: None,
			state: ControllerState::Disconnected,
			last_marker: None,
			metrics,
		})
	}

	pub fn state(&self) -> ControllerState {
		self.state
	}

	pub fn cursor(&self) -> SyncCursor {
		self.detector.cursor()
	}

	pub fn metrics(&self) -> Arc<SyncMetrics> {
		Arc::clone(&self.metrics)
	}

	/// Open both stores. Either failing leaves the controller without handles.
	pub async fn connect(&mut self) -> Result<(), StoreError> {
		self.source = None;
		self.target = None;

		let source = self.connector.connect_source().await?;
		let target = self.connector.connect_target().await?;
		self.source = Some(source);
		self.target = Some(target);
		Ok(())
	}

	/// Perform one transition of the state machine and return the new state.
	pub async fn step(&mut self) -> ControllerState {
		let next = match self.state {
			ControllerState::Disconnected => match self.connect().await {
				Ok(()) => {
					info!("Connected to source and target stores");
					ControllerState::ConnectedIdle
				}
				Err(e) => {
					error!("Cannot connect to stores: {}", e);
					self.metrics.connection_failures_total.inc();
					sleep(self.settings.poll_interval()).await;
					ControllerState::Disconnected
				}
			},
			ControllerState::ConnectedIdle => {
				let source = self.source.as_ref().map(|s| s as &dyn SourceStore);
				match self.detector.poll(source).await {
					PollOutcome::NoConnection => {
						warn!("Lost connection to the source store");
						self.source = None;
						self.target = None;
						ControllerState::Disconnected
					}
					PollOutcome::NoChange => {
						sleep(self.settings.idle_poll()).await;
						ControllerState::ConnectedIdle
					}
					PollOutcome::SyncDue(marker) => {
						info!("Change marker {} observed, syncing", marker);
						self.last_marker = Some(marker);
						ControllerState::ConnectedSyncing
					}
				}
			}
			ControllerState::ConnectedSyncing => {
				let summary = self.run_cycle().await;
				self.metrics.sync_cycles_total.inc();
				if let Some(marker) = self.last_marker {
					self.metrics.record_marker(marker);
				}
				if summary.failures() > 0 {
					warn!("Sync cycle finished with {} failed entity kinds", summary.failures());
				}
				if log::log_enabled!(log::Level::Debug) {
					debug!("{}", self.metrics.encode());
				}
				ControllerState::ConnectedIdle
			}
		};
		self.state = next;
		next
	}

	/// Loop until the process is stopped.
	pub async fn run(&mut self) {
		loop {
			self.step().await;
		}
	}

	/// Reconcile departments, groups and items in that order. A failure is
	/// logged and the next kind still runs.
	pub async fn run_cycle(&mut self) -> CycleSummary {
		let mut summary = CycleSummary::default();
		let (Some(source), Some(target)) = (self.source.as_ref(), self.target.as_mut()) else {
			warn!("Sync cycle skipped: stores are not connected");
			return summary;
		};

		for kind in EntityKind::CYCLE_ORDER {
			let result = self.reconciler.reconcile(kind, source, &mut *target).await;
			match &result {
				Ok(report) => self.metrics.record_reconciled(kind, report.updated, report.inserted),
				Err(e) => {
					error!("{}", e);
					self.metrics.record_failure(kind);
				}
			}
			summary.outcomes.push((kind, result));
		}
		summary
	}

	/// Connect if needed and run one cycle without consulting change markers.
	pub async fn sync_once(&mut self) -> Result<CycleSummary, StoreError> {
		if self.source.is_none() || self.target.is_none() {
			self.connect().await?;
			self.state = ControllerState::ConnectedIdle;
		}
		let summary = self.run_cycle().await;
		self.metrics.sync_cycles_total.inc();
		Ok(summary)
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use chrono::NaiveDate;

	use super::*;
	use crate::catalog::{ChangeMarker, SourceGroup};
	use crate::store::{MemoryConnector, MemorySource, MemoryTarget};

	fn settings() -> Settings {
		let mut s = Settings::default();
		s.idle_poll_ms = 1;
		s
	}

	fn marker(hour: u32) -> ChangeMarker {
		ChangeMarker {
			timestamp: NaiveDate::from_ymd_opt(2024, 5, 1)
				.and_then(|d| d.and_hms_opt(hour, 0, 0))
				.expect("valid timestamp"),
			status: 1,
		}
	}

	#[tokio::test(start_paused = true)]
	async fn connect_failure_stays_disconnected() {
		let s = settings();
		let connector = MemoryConnector::default();
		connector.target.set_offline(true);
		let mut controller = SyncController::new(&s, connector.clone(), Arc::new(SyncMetrics::new())).expect("controller");

		assert_eq!(controller.step().await, ControllerState::Disconnected);
		assert_eq!(controller.metrics().connection_failures_total.get(), 1);

		connector.target.set_offline(false);
		assert_eq!(controller.step().await, ControllerState::ConnectedIdle);
	}

	#[tokio::test(start_paused = true)]
	async fn full_cycle_then_idle() {
		let s = settings();
		let source = MemorySource::new();
		let target = MemoryTarget::new();
		source.push_marker(marker(9));
		source.push_group(SourceGroup {
			id: 4,
			name: "Fruit".to_string(),
			deleted: false,
		});
		let connector = MemoryConnector::new(source.clone(), target.clone());
		let mut controller = SyncController::new(&s, connector, Arc::new(SyncMetrics::new())).expect("controller");

		assert_eq!(controller.step().await, ControllerState::ConnectedIdle);
		assert_eq!(controller.step().await, ControllerState::ConnectedSyncing);
		assert_eq!(controller.step().await, ControllerState::ConnectedIdle);
		assert_eq!(target.groups_committed().len(), 1);
		assert_eq!(target.departments_committed().len(), 2);

		// same marker: nothing to do
		assert_eq!(controller.step().await, ControllerState::ConnectedIdle);
		assert_eq!(controller.metrics().sync_cycles_total.get(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn lost_source_forces_reconnect() {
		let s = settings();
		let connector = MemoryConnector::default();
		let mut controller = SyncController::new(&s, connector.clone(), Arc::new(SyncMetrics::new())).expect("controller");

		assert_eq!(controller.step().await, ControllerState::ConnectedIdle);
		connector.source.set_offline(true);
		assert_eq!(controller.step().await, ControllerState::Disconnected);
		assert_eq!(controller.step().await, ControllerState::Disconnected);
		connector.source.set_offline(false);
		assert_eq!(controller.step().await, ControllerState::ConnectedIdle);
	}

	#[tokio::test(start_paused = true)]
	async fn failing_kind_does_not_stop_the_cycle() {
		let s = settings();
		let connector = MemoryConnector::default();
		connector.source.push_marker(marker(9));
		connector.source.fail_fetch(EntityKind::Group, true);
		let mut controller = SyncController::new(&s, connector.clone(), Arc::new(SyncMetrics::new())).expect("controller");

		let summary = controller.sync_once().await.expect("connected");
		let kinds: Vec<EntityKind> = summary.outcomes.iter().map(|(k, _)| *k).collect();
		assert_eq!(kinds, EntityKind::CYCLE_ORDER.to_vec());
		assert_eq!(summary.failures(), 1);
		assert_eq!(summary.report(EntityKind::Department), Some(ReconcileReport { updated: 0, inserted: 2 }));
		assert_eq!(summary.report(EntityKind::Item), Some(ReconcileReport::default()));
		assert_eq!(connector.target.departments_committed().len(), 2);
	}
}
