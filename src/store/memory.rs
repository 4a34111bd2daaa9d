//! In-memory stores for tests and dry runs.
//!
//! `MemorySource` and `MemoryTarget` are cheap handles over shared state, so a
//! test can keep one clone to mutate or inspect while the controller owns
//! another. The target keeps committed tables apart from the tables staged by
//! the open transaction, which makes rollback observable.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDateTime;

use super::{BatchWrite, SourceStore, StoreConnector, StoreError, TargetStore};
use crate::catalog::{ChangeMarker, Department, EntityKind, Group, Item, SourceGroup, SourceItem};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
	m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct SourceState {
	markers: Vec<ChangeMarker>,
	groups: Vec<SourceGroup>,
	items: Vec<(i64, SourceItem)>,
	offline: bool,
	failing: HashSet<EntityKind>,
}

/// Back office held in memory.
#[derive(Clone, Default)]
pub struct MemorySource {
	state: Arc<Mutex<SourceState>>,
}

impl MemorySource {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push_marker(&self, marker: ChangeMarker) {
		lock(&self.state).markers.push(marker);
	}

	pub fn push_group(&self, group: SourceGroup) {
		lock(&self.state).groups.push(group);
	}

	/// Add `item` priced under `price_type`.
	pub fn push_item(&self, price_type: i64, item: SourceItem) {
		lock(&self.state).items.push((price_type, item));
	}

	/// Replace every stored item whose code matches.
	pub fn update_item(&self, code: &str, f: impl Fn(&mut SourceItem)) {
		for (_, item) in lock(&self.state).items.iter_mut() {
			if item.code == code {
				f(item);
			}
		}
	}

	/// While offline every query and connection attempt fails.
	pub fn set_offline(&self, offline: bool) {
		lock(&self.state).offline = offline;
	}

	pub fn is_offline(&self) -> bool {
		lock(&self.state).offline
	}

	/// Make fetches for `kind` fail without taking the store offline.
	pub fn fail_fetch(&self, kind: EntityKind, failing: bool) {
		let mut state = lock(&self.state);
		if failing {
			state.failing.insert(kind);
		} else {
			state.failing.remove(&kind);
		}
	}

	fn check(state: &SourceState, kind: Option<EntityKind>) -> Result<(), StoreError> {
		if state.offline {
			return Err(StoreError::Unavailable("source store offline".to_string()));
		}
		if let Some(kind) = kind {
			if state.failing.contains(&kind) {
				return Err(StoreError::Unavailable(format!("source query for {} failed", kind)));
			}
		}
		Ok(())
	}
}

#[async_trait]
impl SourceStore for MemorySource {
	async fn change_markers(&self) -> Result<Vec<ChangeMarker>, StoreError> {
		let state = lock(&self.state);
		Self::check(&state, None)?;
		Ok(state.markers.iter().filter(|m| m.is_active()).cloned().collect())
	}

	async fn groups(&self) -> Result<Vec<SourceGroup>, StoreError> {
		let state = lock(&self.state);
		Self::check(&state, Some(EntityKind::Group))?;
		Ok(state.groups.iter().filter(|g| !g.deleted).cloned().collect())
	}

	async fn items(&self, price_type: i64) -> Result<Vec<SourceItem>, StoreError> {
		let state = lock(&self.state);
		Self::check(&state, Some(EntityKind::Item))?;
		Ok(state
			.items
			.iter()
			.filter(|(pt, item)| *pt == price_type && item.price != 0.0)
			.map(|(_, item)| item.clone())
			.collect())
	}
}

#[derive(Clone, Default)]
struct Tables {
	departments: BTreeMap<i64, Department>,
	groups: BTreeMap<i64, Group>,
	items: BTreeMap<String, (Item, Option<NaiveDateTime>)>,
}

#[derive(Default)]
struct TargetState {
	committed: Tables,
	staged: Option<Tables>,
	offline: bool,
	failing_reads: HashSet<EntityKind>,
	failing_writes: HashSet<(EntityKind, bool)>,
	failing_commit: bool,
	commits: usize,
	rollbacks: usize,
	batches: Vec<(EntityKind, bool, usize)>,
}

impl TargetState {
	fn staged(&mut self) -> &mut Tables {
		let committed = &self.committed;
		self.staged.get_or_insert_with(|| committed.clone())
	}

	fn check_read(&self, kind: EntityKind) -> Result<(), StoreError> {
		if self.offline {
			return Err(StoreError::Unavailable("target store offline".to_string()));
		}
		if self.failing_reads.contains(&kind) {
			return Err(StoreError::Unavailable(format!("target read of {} failed", kind)));
		}
		Ok(())
	}
}

/// POS store held in memory, with an explicit staged transaction.
#[derive(Clone, Default)]
pub struct MemoryTarget {
	state: Arc<Mutex<TargetState>>,
}

impl MemoryTarget {
	pub fn new() -> Self {
		Self::default()
	}

	/// Put a row straight into the committed tables.
	pub fn seed_department(&self, department: Department) {
		lock(&self.state)
			.committed
			.departments
			.insert(department.code, department);
	}

	pub fn seed_group(&self, group: Group) {
		lock(&self.state).committed.groups.insert(group.code, group);
	}

	pub fn seed_item(&self, item: Item) {
		lock(&self.state)
			.committed
			.items
			.insert(item.code.clone(), (item, None));
	}

	pub fn departments_committed(&self) -> Vec<Department> {
		lock(&self.state).committed.departments.values().cloned().collect()
	}

	pub fn groups_committed(&self) -> Vec<Group> {
		lock(&self.state).committed.groups.values().cloned().collect()
	}

	pub fn items_committed(&self) -> Vec<Item> {
		lock(&self.state)
			.committed
			.items
			.values()
			.map(|(item, _)| item.clone())
			.collect()
	}

	/// `UpdateDate` last written for `code`, if any.
	pub fn item_stamp(&self, code: &str) -> Option<NaiveDateTime> {
		lock(&self.state)
			.committed
			.items
			.get(code)
			.and_then(|(_, stamp)| *stamp)
	}

	pub fn set_offline(&self, offline: bool) {
		lock(&self.state).offline = offline;
	}

	pub fn is_offline(&self) -> bool {
		lock(&self.state).offline
	}

	pub fn fail_read(&self, kind: EntityKind, failing: bool) {
		let mut state = lock(&self.state);
		if failing {
			state.failing_reads.insert(kind);
		} else {
			state.failing_reads.remove(&kind);
		}
	}

	/// Make the update (`insert == false`) or insert batch for `kind` fail.
	pub fn fail_write(&self, kind: EntityKind, insert: bool, failing: bool) {
		let mut state = lock(&self.state);
		if failing {
			state.failing_writes.insert((kind, insert));
		} else {
			state.failing_writes.remove(&(kind, insert));
		}
	}

	pub fn fail_commit(&self, failing: bool) {
		lock(&self.state).failing_commit = failing;
	}

	pub fn commits(&self) -> usize {
		lock(&self.state).commits
	}

	pub fn rollbacks(&self) -> usize {
		lock(&self.state).rollbacks
	}

	/// Batches executed so far as `(kind, is_insert, rows)`.
	pub fn batches(&self) -> Vec<(EntityKind, bool, usize)> {
		lock(&self.state).batches.clone()
	}

	pub fn in_transaction(&self) -> bool {
		lock(&self.state).staged.is_some()
	}
}

fn duplicate(kind: EntityKind, key: impl std::fmt::Display) -> StoreError {
	StoreError::Unavailable(format!("duplicate key {} in {}", key, kind))
}

#[async_trait]
impl TargetStore for MemoryTarget {
	async fn departments(&mut self) -> Result<Vec<Department>, StoreError> {
		let mut state = lock(&self.state);
		state.check_read(EntityKind::Department)?;
		Ok(state.staged().departments.values().cloned().collect())
	}

	async fn groups(&mut self) -> Result<Vec<Group>, StoreError> {
		let mut state = lock(&self.state);
		state.check_read(EntityKind::Group)?;
		Ok(state.staged().groups.values().cloned().collect())
	}

	async fn items(&mut self) -> Result<Vec<Item>, StoreError> {
		let mut state = lock(&self.state);
		state.check_read(EntityKind::Item)?;
		Ok(state
			.staged()
			.items
			.values()
			.map(|(item, _)| item.clone())
			.collect())
	}

	async fn execute_batch(&mut self, batch: BatchWrite<'_>) -> Result<(), StoreError> {
		let mut state = lock(&self.state);
		if state.offline {
			return Err(StoreError::Unavailable("target store offline".to_string()));
		}
		let kind = batch.kind();
		if state.failing_writes.contains(&(kind, batch.is_insert())) {
			return Err(StoreError::Unavailable(format!(
				"{} batch for {} rejected",
				if batch.is_insert() { "insert" } else { "update" },
				kind
			)));
		}
		state.batches.push((kind, batch.is_insert(), batch.len()));

		let tables = state.staged();
		match batch {
			BatchWrite::UpdateDepartments(rows) => {
				for d in rows {
					if let Some(existing) = tables.departments.get_mut(&d.code) {
						*existing = d.clone();
					}
				}
			}
			BatchWrite::InsertDepartments(rows) => {
				for d in rows {
					if tables.departments.contains_key(&d.code) {
						return Err(duplicate(kind, d.code));
					}
					tables.departments.insert(d.code, d.clone());
				}
			}
			BatchWrite::UpdateGroups(rows) => {
				for g in rows {
					if let Some(existing) = tables.groups.get_mut(&g.code) {
						*existing = g.clone();
					}
				}
			}
			BatchWrite::InsertGroups(rows) => {
				for g in rows {
					if tables.groups.contains_key(&g.code) {
						return Err(duplicate(kind, g.code));
					}
					tables.groups.insert(g.code, g.clone());
				}
			}
			BatchWrite::UpdateItems(rows, stamp) => {
				for i in rows {
					if let Some(existing) = tables.items.get_mut(&i.code) {
						*existing = (i.clone(), Some(stamp));
					}
				}
			}
			BatchWrite::InsertItems(rows, stamp) => {
				for i in rows {
					if tables.items.contains_key(&i.code) {
						return Err(duplicate(kind, &i.code));
					}
					tables.items.insert(i.code.clone(), (i.clone(), Some(stamp)));
				}
			}
		}
		Ok(())
	}

	async fn commit(&mut self) -> Result<(), StoreError> {
		let mut state = lock(&self.state);
		if state.offline {
			return Err(StoreError::Unavailable("target store offline".to_string()));
		}
		if state.failing_commit {
			return Err(StoreError::Unavailable("commit rejected".to_string()));
		}
		if let Some(staged) = state.staged.take() {
			state.committed = staged;
		}
		state.commits += 1;
		Ok(())
	}

	async fn rollback(&mut self) -> Result<(), StoreError> {
		let mut state = lock(&self.state);
		state.staged = None;
		state.rollbacks += 1;
		Ok(())
	}
}

/// Hands out handles to a fixed pair of memory stores. Connecting fails while
/// the corresponding store is offline.
#[derive(Clone, Default)]
pub struct MemoryConnector {
	pub source: MemorySource,
	pub target: MemoryTarget,
}

impl MemoryConnector {
	pub fn new(source: MemorySource, target: MemoryTarget) -> Self {
		Self { source, target }
	}
}

#[async_trait]
impl StoreConnector for MemoryConnector {
	type Source = MemorySource;
	type Target = MemoryTarget;

	async fn connect_source(&self) -> Result<MemorySource, StoreError> {
		if self.source.is_offline() {
			return Err(StoreError::Unavailable("source store offline".to_string()));
		}
		Ok(self.source.clone())
	}

	async fn connect_target(&self) -> Result<MemoryTarget, StoreError> {
		if self.target.is_offline() {
			return Err(StoreError::Unavailable("target store offline".to_string()));
		}
		Ok(self.target.clone())
	}
}
