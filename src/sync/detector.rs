use chrono::{DateTime, NaiveDateTime};
use log::{debug, warn};

use crate::catalog::ChangeMarker;
use crate::store::SourceStore;

/// Result of one change-marker poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
	/// No usable source connection; the caller must reconnect.
	NoConnection,
	/// A marker newer than the cursor exists; the cursor now holds it.
	SyncDue(NaiveDateTime),
	NoChange,
}

/// Timestamp of the newest change marker already acted on. Lives only in
/// memory, so every process start syncs at least once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SyncCursor(NaiveDateTime);

impl SyncCursor {
	pub fn value(&self) -> NaiveDateTime {
		self.0
	}
}

impl Default for SyncCursor {
	fn default() -> Self {
		Self(DateTime::UNIX_EPOCH.naive_utc())
	}
}

/// Newest timestamp among active markers, or the epoch when there is none.
pub fn latest_active(markers: &[ChangeMarker]) -> NaiveDateTime {
	markers
		.iter()
		.filter(|m| m.is_active())
		.map(|m| m.timestamp)
		.max()
		.unwrap_or_else(|| SyncCursor::default().value())
}

/// Decides whether a new sync cycle is due by comparing the newest active
/// change marker against the cursor.
#[derive(Debug, Default)]
pub struct ChangeDetector {
	cursor: SyncCursor,
}

impl ChangeDetector {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cursor(&self) -> SyncCursor {
		self.cursor
	}

	/// Query the active markers once. A failing query counts as a lost
	/// connection.
	pub async fn poll(&mut self, source: Option<&dyn SourceStore>) -> PollOutcome {
		let Some(source) = source else {
			return PollOutcome::NoConnection;
		};

		let markers = match source.change_markers().await {
			Ok(markers) => markers,
			Err(e) => {
				warn!("Change detection failed, reconnecting: {}", e);
				return PollOutcome::NoConnection;
			}
		};

		let latest = latest_active(&markers);
		if latest > self.cursor.0 {
			debug!("Change marker advanced from {} to {}", self.cursor.0, latest);
			self.cursor = SyncCursor(latest);
			PollOutcome::SyncDue(latest)
		} else {
			PollOutcome::NoChange
		}
	}
}
