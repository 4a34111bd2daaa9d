pub mod controller;
pub mod detector;
pub mod reconcile;

pub use controller::{ControllerState, CycleSummary, SyncController};
pub use detector::{ChangeDetector, PollOutcome, SyncCursor};
pub use reconcile::{
	CatalogRecord, ItemRules, ReconcileReport, ReconciliationBatch, ReconciliationError, Reconciler, plan,
};
