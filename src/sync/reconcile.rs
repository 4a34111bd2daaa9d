//! Diff-and-upsert of one catalog table at a time.
//!
//! Every entity kind follows the same shape: read the eligible source rows and
//! all target rows, key both by natural key, collect rows to update and rows to
//! insert, write both batches and commit. Any store error rolls the whole
//! entity back. Rows missing from the source are left alone in the target.

use std::collections::HashMap;
use std::hash::Hash;

use log::{info, warn};
use thiserror::Error;

use crate::catalog::{
	Department, EntityKind, Group, Item, PRICE_TOLERANCE, PluType, SourceGroup, SourceItem, plu_key, truncate_name,
};
use crate::config::{PIECE_DEPARTMENT, Settings, SettingsError, WEIGHT_DEPARTMENT};
use crate::store::{BatchWrite, SourceStore, StoreError, TargetStore};

/// A row that can be matched to its target counterpart and compared with it.
pub trait CatalogRecord {
	type Key: Eq + Hash;

	fn key(&self) -> Self::Key;

	/// Whether `self` (derived from the source) must overwrite `current`.
	fn differs_from(&self, current: &Self) -> bool;
}

impl CatalogRecord for Department {
	type Key = i64;

	fn key(&self) -> i64 {
		self.code
	}

	fn differs_from(&self, current: &Self) -> bool {
		self.speed_key != current.speed_key || self.name != current.name
	}
}

impl CatalogRecord for Group {
	type Key = i64;

	fn key(&self) -> i64 {
		self.code
	}

	fn differs_from(&self, current: &Self) -> bool {
		self.name != current.name
	}
}

impl CatalogRecord for Item {
	type Key = String;

	fn key(&self) -> String {
		plu_key(&self.code)
	}

	fn differs_from(&self, current: &Self) -> bool {
		self.kind != current.kind
			|| self.name != current.name
			|| (self.unit_price - current.unit_price).abs() > PRICE_TOLERANCE
			|| self.group != current.group
			|| self.department != current.department
	}
}

/// Rows to write for one entity kind in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationBatch<T> {
	pub updates: Vec<T>,
	pub inserts: Vec<T>,
}

impl<T> ReconciliationBatch<T> {
	pub fn new() -> Self {
		Self {
			updates: Vec::new(),
			inserts: Vec::new(),
		}
	}
}

impl<T> Default for ReconciliationBatch<T> {
	fn default() -> Self {
		Self::new()
	}
}

/// Compare derived source rows against target rows.
///
/// Source rows keep their first-seen order; a repeated key keeps the last row
/// seen. Target rows with no source counterpart are ignored.
pub fn plan<T: CatalogRecord>(
	source: impl IntoIterator<Item = T>,
	target: impl IntoIterator<Item = T>,
) -> ReconciliationBatch<T> {
	let current: HashMap<T::Key, T> = target.into_iter().map(|row| (row.key(), row)).collect();

	let mut rows: Vec<T> = Vec::new();
	let mut position: HashMap<T::Key, usize> = HashMap::new();
	for row in source {
		match position.get(&row.key()) {
			Some(&i) => rows[i] = row,
			None => {
				position.insert(row.key(), rows.len());
				rows.push(row);
			}
		}
	}

	let mut batch = ReconciliationBatch::new();
	for row in rows {
		match current.get(&row.key()) {
			Some(existing) => {
				if row.differs_from(existing) {
					batch.updates.push(row);
				}
			}
			None => batch.inserts.push(row),
		}
	}
	batch
}

/// Rows written by one successful reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileReport {
	pub updated: usize,
	pub inserted: usize,
}

/// A reconciliation that was rolled back.
#[derive(Debug, Error)]
#[error("error updating {kind}: {source}")]
pub struct ReconciliationError {
	pub kind: EntityKind,
	#[source]
	pub source: StoreError,
}

/// How a back-office item becomes a PLU row.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRules {
	pub weight_unit_id: i64,
	pub divisor: f64,
	pub weight_department: i64,
	pub piece_department: i64,
}

impl ItemRules {
	pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
		let code = |key: &str| {
			settings
				.department(key)
				.map(|d| d.code)
				.ok_or_else(|| SettingsError::Invalid(format!("departments must define key '{}'", key)))
		};
		Ok(Self {
			weight_unit_id: settings.weight_unit_id,
			divisor: settings.divisor,
			weight_department: code(WEIGHT_DEPARTMENT)?,
			piece_department: code(PIECE_DEPARTMENT)?,
		})
	}

	pub fn kind_of(&self, unit: i64) -> PluType {
		if unit == self.weight_unit_id {
			PluType::Weight
		} else {
			PluType::Piece
		}
	}

	pub fn derive(&self, item: &SourceItem) -> Item {
		let kind = self.kind_of(item.unit);
		let department = match kind {
			PluType::Weight => self.weight_department,
			_ => self.piece_department,
		};
		Item {
			code: item.code.clone(),
			kind,
			name: truncate_name(&item.name),
			unit_price: item.price / self.divisor,
			group: item.group,
			department,
		}
	}
}

pub fn derive_group(group: &SourceGroup) -> Group {
	Group {
		code: group.id,
		name: truncate_name(&group.name),
	}
}

/// Departments as configured, in key order.
pub fn configured_departments(settings: &Settings) -> Vec<Department> {
	settings
		.departments
		.values()
		.map(|d| Department {
			code: d.code,
			speed_key: d.speed_key(),
			name: truncate_name(&d.name),
		})
		.collect()
}

/// Runs the per-entity reconciliations. Store handles are borrowed for the
/// duration of a single call and never retained.
pub struct Reconciler<'a> {
	settings: &'a Settings,
	items: ItemRules,
}

impl<'a> Reconciler<'a> {
	pub fn new(settings: &'a Settings) -> Result<Self, SettingsError> {
		Ok(Self {
			settings,
			items: ItemRules::from_settings(settings)?,
		})
	}

	pub fn item_rules(&self) -> &ItemRules {
		&self.items
	}

	/// Reconcile one entity kind. Departments come from configuration and
	/// ignore `source`.
	pub async fn reconcile(
		&self,
		kind: EntityKind,
		source: &dyn SourceStore,
		target: &mut dyn TargetStore,
	) -> Result<ReconcileReport, ReconciliationError> {
		match kind {
			EntityKind::Department => self.departments(target).await,
			EntityKind::Group => self.groups(source, target).await,
			EntityKind::Item => self.items(source, target).await,
		}
	}

	pub async fn departments(
		&self,
		target: &mut dyn TargetStore,
	) -> Result<ReconcileReport, ReconciliationError> {
		let outcome: Result<ReconcileReport, StoreError> = async {
			let current = target.departments().await?;
			let batch = plan(configured_departments(self.settings), current);
			apply(
				target,
				BatchWrite::UpdateDepartments(&batch.updates),
				BatchWrite::InsertDepartments(&batch.inserts),
			)
			.await
		}
		.await;
		finish(EntityKind::Department, target, outcome).await
	}

	pub async fn groups(
		&self,
		source: &dyn SourceStore,
		target: &mut dyn TargetStore,
	) -> Result<ReconcileReport, ReconciliationError> {
		let outcome: Result<ReconcileReport, StoreError> = async {
			let wanted: Vec<Group> = source
				.groups()
				.await?
				.iter()
				.filter(|g| !g.deleted)
				.map(derive_group)
				.collect();
			let current = target.groups().await?;
			let batch = plan(wanted, current);
			apply(
				target,
				BatchWrite::UpdateGroups(&batch.updates),
				BatchWrite::InsertGroups(&batch.inserts),
			)
			.await
		}
		.await;
		finish(EntityKind::Group, target, outcome).await
	}

	pub async fn items(
		&self,
		source: &dyn SourceStore,
		target: &mut dyn TargetStore,
	) -> Result<ReconcileReport, ReconciliationError> {
		let outcome: Result<ReconcileReport, StoreError> = async {
			let wanted: Vec<Item> = source
				.items(self.settings.price_type)
				.await?
				.iter()
				.map(|item| self.items.derive(item))
				.collect();
			let current = target.items().await?;
			let batch = plan(wanted, current);
			let stamp = chrono::Local::now().naive_local();
			apply(
				target,
				BatchWrite::UpdateItems(&batch.updates, stamp),
				BatchWrite::InsertItems(&batch.inserts, stamp),
			)
			.await
		}
		.await;
		finish(EntityKind::Item, target, outcome).await
	}
}

/// Write the non-empty batches, updates first.
async fn apply(
	target: &mut dyn TargetStore,
	updates: BatchWrite<'_>,
	inserts: BatchWrite<'_>,
) -> Result<ReconcileReport, StoreError> {
	if !updates.is_empty() {
		target.execute_batch(updates).await?;
	}
	if !inserts.is_empty() {
		target.execute_batch(inserts).await?;
	}
	Ok(ReconcileReport {
		updated: updates.len(),
		inserted: inserts.len(),
	})
}

/// Commit on success, roll back on any failure including a failed commit.
async fn finish(
	kind: EntityKind,
	target: &mut dyn TargetStore,
	outcome: Result<ReconcileReport, StoreError>,
) -> Result<ReconcileReport, ReconciliationError> {
	let outcome = match outcome {
		Ok(report) => target.commit().await.map(|()| report),
		Err(e) => Err(e),
	};

	match outcome {
		Ok(report) => {
			info!(
				"Updated {} {kind} and inserted {} new {kind}",
				report.updated, report.inserted
			);
			Ok(report)
		}
		Err(source) => {
			if let Err(e) = target.rollback().await {
				warn!("Rollback of {} failed: {}", kind, e);
			}
			Err(ReconciliationError { kind, source })
		}
	}
}
