//! Store access for the two databases the service talks to.
//!
//! The back office is read-only and needs no transaction. The POS store is
//! written inside an implicit transaction: it opens with the first call after
//! the previous `commit`/`rollback` and stays open until the next one.

pub mod connector;
pub mod memory;
pub mod source_pg;
pub mod target_sqlite;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;

use crate::catalog::{ChangeMarker, Department, EntityKind, Group, Item, SourceGroup, SourceItem};

pub use connector::SqlConnector;
pub use memory::{MemoryConnector, MemorySource, MemoryTarget};
pub use source_pg::PgSourceStore;
pub use target_sqlite::SqliteTargetStore;

/// Failure talking to either store.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("connection failed: {0}")]
	Connect(#[source] sqlx::Error),

	#[error("query failed: {0}")]
	Query(#[source] sqlx::Error),

	#[error("write failed: {0}")]
	Write(#[source] sqlx::Error),

	#[error("transaction failed: {0}")]
	Transaction(#[source] sqlx::Error),

	#[error("store unavailable: {0}")]
	Unavailable(String),
}

/// One batched write against the POS store.
///
/// Each variant names the statement; the rows carry exactly the values that
/// statement binds. Item writes also stamp `UpdateDate`.
#[derive(Debug, Clone, Copy)]
pub enum BatchWrite<'a> {
	UpdateDepartments(&'a [Department]),
	InsertDepartments(&'a [Department]),
	UpdateGroups(&'a [Group]),
	InsertGroups(&'a [Group]),
	UpdateItems(&'a [Item], NaiveDateTime),
	InsertItems(&'a [Item], NaiveDateTime),
}

impl BatchWrite<'_> {
	pub fn kind(&self) -> EntityKind {
		match self {
			BatchWrite::UpdateDepartments(_) | BatchWrite::InsertDepartments(_) => EntityKind::Department,
			BatchWrite::UpdateGroups(_) | BatchWrite::InsertGroups(_) => EntityKind::Group,
			BatchWrite::UpdateItems(..) | BatchWrite::InsertItems(..) => EntityKind::Item,
		}
	}

	pub fn is_insert(&self) -> bool {
		matches!(
			self,
			BatchWrite::InsertDepartments(_) | BatchWrite::InsertGroups(_) | BatchWrite::InsertItems(..)
		)
	}

	pub fn len(&self) -> usize {
		match self {
			BatchWrite::UpdateDepartments(rows) | BatchWrite::InsertDepartments(rows) => rows.len(),
			BatchWrite::UpdateGroups(rows) | BatchWrite::InsertGroups(rows) => rows.len(),
			BatchWrite::UpdateItems(rows, _) | BatchWrite::InsertItems(rows, _) => rows.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Read-only access to the back-office catalog and change-marker tables.
#[async_trait]
pub trait SourceStore: Send + Sync {
	/// Active change markers only.
	async fn change_markers(&self) -> Result<Vec<ChangeMarker>, StoreError>;

	/// Groups not flagged as deleted.
	async fn groups(&self) -> Result<Vec<SourceGroup>, StoreError>;

	/// Undeleted items with a non-zero price of `price_type`.
	async fn items(&self, price_type: i64) -> Result<Vec<SourceItem>, StoreError>;
}

/// Read/write access to the mirrored POS tables.
#[async_trait]
pub trait TargetStore: Send {
	async fn departments(&mut self) -> Result<Vec<Department>, StoreError>;

	async fn groups(&mut self) -> Result<Vec<Group>, StoreError>;

	async fn items(&mut self) -> Result<Vec<Item>, StoreError>;

	/// Execute every row of `batch` inside the open transaction.
	async fn execute_batch(&mut self, batch: BatchWrite<'_>) -> Result<(), StoreError>;

	async fn commit(&mut self) -> Result<(), StoreError>;

	async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Opens fresh handles to both stores.
#[async_trait]
pub trait StoreConnector: Send + Sync {
	type Source: SourceStore + 'static;
	type Target: TargetStore + 'static;

	async fn connect_source(&self) -> Result<Self::Source, StoreError>;

	async fn connect_target(&self) -> Result<Self::Target, StoreError>;
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::BatchWrite;
	use crate::catalog::{EntityKind, Group};

	#[test]
	fn batch_write_describes_itself() {
		let rows = vec![Group {
			code: 1,
			name: "Fruit".to_string(),
		}];
		let batch = BatchWrite::InsertGroups(&rows);
		assert_eq!(batch.kind(), EntityKind::Group);
		assert!(batch.is_insert());
		assert_eq!(batch.len(), 1);
		assert!(BatchWrite::UpdateDepartments(&[]).is_empty());
	}
}
