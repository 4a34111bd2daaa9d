use async_trait::async_trait;
use log::debug;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};

use super::{BatchWrite, StoreError, TargetStore};
use crate::catalog::{Department, Group, Item, PluType};
use crate::config::TargetSettings;

/// Tables the service expects in the POS store. The POS software normally
/// owns this schema; `create_schema` exists for fresh stores and tests.
pub const SCHEMA: [&str; 3] = [
	"CREATE TABLE IF NOT EXISTS TbDepartment (\
		Code INTEGER PRIMARY KEY, Speedkey INTEGER, DeptName TEXT)",
	"CREATE TABLE IF NOT EXISTS TbGroup (\
		Code INTEGER PRIMARY KEY, GroupName TEXT)",
	"CREATE TABLE IF NOT EXISTS TbPLU (\
		PluNo TEXT PRIMARY KEY, PluType INTEGER, ItemCode TEXT, Name1 TEXT, \
		UnitPrice REAL, UpdateDate TEXT, GroupNo INTEGER, DeptNo INTEGER)",
];

const SELECT_DEPARTMENTS: &str = "SELECT Code, Speedkey, DeptName FROM TbDepartment";
const UPDATE_DEPARTMENT: &str = "UPDATE TbDepartment SET DeptName = ?, Speedkey = ? WHERE Code = ?";
const INSERT_DEPARTMENT: &str = "INSERT INTO TbDepartment (Code, Speedkey, DeptName) VALUES (?, ?, ?)";

const SELECT_GROUPS: &str = "SELECT Code, GroupName FROM TbGroup";
const UPDATE_GROUP: &str = "UPDATE TbGroup SET GroupName = ? WHERE Code = ?";
const INSERT_GROUP: &str = "INSERT INTO TbGroup (Code, GroupName) VALUES (?, ?)";

const SELECT_ITEMS: &str = "SELECT CAST(PluNo AS TEXT), PluType, Name1, CAST(UnitPrice AS REAL), \
	GroupNo, DeptNo FROM TbPLU";
const UPDATE_ITEM: &str = "UPDATE TbPLU \
	SET PluType = ?, Name1 = ?, UnitPrice = ?, UpdateDate = ?, GroupNo = ?, DeptNo = ? \
	WHERE PluNo = ?";
const INSERT_ITEM: &str = "INSERT INTO TbPLU \
	(PluNo, PluType, ItemCode, Name1, UnitPrice, UpdateDate, GroupNo, DeptNo) \
	VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

/// POS store over a single-connection SQLite pool.
///
/// Holds at most one open transaction, begun lazily by the first read or
/// write and closed by `commit` or `rollback`. Dropping the store with a
/// transaction open rolls it back.
pub struct SqliteTargetStore {
	pool: SqlitePool,
	tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteTargetStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool, tx: None }
	}

	/// Open an existing POS database file.
	pub async fn open(settings: &TargetSettings) -> Result<Self, StoreError> {
		let options = SqliteConnectOptions::new()
			.filename(&settings.path)
			.create_if_missing(false);

		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(options)
			.await
			.map_err(StoreError::Connect)?;
		Ok(Self::new(pool))
	}

	/// Create the mirrored tables when they are missing.
	pub async fn create_schema(&self) -> Result<(), StoreError> {
		for ddl in SCHEMA {
			sqlx::query(ddl)
				.execute(&self.pool)
				.await
				.map_err(StoreError::Write)?;
		}
		Ok(())
	}

	async fn transaction(&mut self) -> Result<&mut Transaction<'static, Sqlite>, StoreError> {
		let tx = match self.tx.take() {
			Some(tx) => tx,
			None => {
				debug!("beginning POS store transaction");
				self.pool.begin().await.map_err(StoreError::Transaction)?
			}
		};
		Ok(self.tx.insert(tx))
	}
}

#[async_trait]
impl TargetStore for SqliteTargetStore {
	async fn departments(&mut self) -> Result<Vec<Department>, StoreError> {
		let tx = self.transaction().await?;
		let rows: Vec<(i64, Option<i64>, Option<String>)> = sqlx::query_as(SELECT_DEPARTMENTS)
			.fetch_all(&mut **tx)
			.await
			.map_err(StoreError::Query)?;

		Ok(rows
			.into_iter()
			.map(|(code, speed_key, name)| Department {
				code,
				speed_key: speed_key.unwrap_or_default(),
				name: name.unwrap_or_default(),
			})
			.collect())
	}

	async fn groups(&mut self) -> Result<Vec<Group>, StoreError> {
		let tx = self.transaction().await?;
		let rows: Vec<(i64, Option<String>)> = sqlx::query_as(SELECT_GROUPS)
			.fetch_all(&mut **tx)
			.await
			.map_err(StoreError::Query)?;

		Ok(rows
			.into_iter()
			.map(|(code, name)| Group {
				code,
				name: name.unwrap_or_default(),
			})
			.collect())
	}

	async fn items(&mut self) -> Result<Vec<Item>, StoreError> {
		type Row = (String, Option<i64>, Option<String>, Option<f64>, Option<i64>, Option<i64>);
		let tx = self.transaction().await?;
		let rows: Vec<Row> = sqlx::query_as(SELECT_ITEMS)
			.fetch_all(&mut **tx)
			.await
			.map_err(StoreError::Query)?;

		Ok(rows
			.into_iter()
			.map(|(code, kind, name, unit_price, group, department)| Item {
				code,
				kind: PluType::from(kind.unwrap_or_default()),
				name: name.unwrap_or_default(),
				unit_price: unit_price.unwrap_or_default(),
				group: group.unwrap_or_default(),
				department: department.unwrap_or_default(),
			})
			.collect())
	}

	async fn execute_batch(&mut self, batch: BatchWrite<'_>) -> Result<(), StoreError> {
		let tx = self.transaction().await?;
		match batch {
			BatchWrite::UpdateDepartments(rows) => {
				for d in rows {
					sqlx::query(UPDATE_DEPARTMENT)
						.bind(&d.name)
						.bind(d.speed_key)
						.bind(d.code)
						.execute(&mut **tx)
						.await
						.map_err(StoreError::Write)?;
				}
			}
			BatchWrite::InsertDepartments(rows) => {
				for d in rows {
					sqlx::query(INSERT_DEPARTMENT)
						.bind(d.code)
						.bind(d.speed_key)
						.bind(&d.name)
						.execute(&mut **tx)
						.await
						.map_err(StoreError::Write)?;
				}
			}
			BatchWrite::UpdateGroups(rows) => {
				for g in rows {
					sqlx::query(UPDATE_GROUP)
						.bind(&g.name)
						.bind(g.code)
						.execute(&mut **tx)
						.await
						.map_err(StoreError::Write)?;
				}
			}
			BatchWrite::InsertGroups(rows) => {
				for g in rows {
					sqlx::query(INSERT_GROUP)
						.bind(g.code)
						.bind(&g.name)
						.execute(&mut **tx)
						.await
						.map_err(StoreError::Write)?;
				}
			}
			BatchWrite::UpdateItems(rows, stamp) => {
				for i in rows {
					sqlx::query(UPDATE_ITEM)
						.bind(i.kind.code())
						.bind(&i.name)
						.bind(i.unit_price)
						.bind(stamp)
						.bind(i.group)
						.bind(i.department)
						.bind(&i.code)
						.execute(&mut **tx)
						.await
						.map_err(StoreError::Write)?;
				}
			}
			BatchWrite::InsertItems(rows, stamp) => {
				for i in rows {
					sqlx::query(INSERT_ITEM)
						.bind(&i.code)
						.bind(i.kind.code())
						.bind(&i.code)
						.bind(&i.name)
						.bind(i.unit_price)
						.bind(stamp)
						.bind(i.group)
						.bind(i.department)
						.execute(&mut **tx)
						.await
						.map_err(StoreError::Write)?;
				}
			}
		}
		Ok(())
	}

	async fn commit(&mut self) -> Result<(), StoreError> {
		if let Some(tx) = self.tx.take() {
			tx.commit().await.map_err(StoreError::Transaction)?;
		}
		Ok(())
	}

	async fn rollback(&mut self) -> Result<(), StoreError> {
		if let Some(tx) = self.tx.take() {
			tx.rollback().await.map_err(StoreError::Transaction)?;
		}
		Ok(())
	}
}
