use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use super::{SourceStore, StoreError};
use crate::catalog::{ChangeMarker, MARKER_ACTIVE, SourceGroup, SourceItem};
use crate::config::SourceSettings;

const CHANGE_MARKERS_SQL: &str = "SELECT SST_DATE, CAST(SST_STATUS AS INTEGER) \
	FROM SYS_SYNC_PROCCESS_REF \
	WHERE SST_STATUS = $1";

const GROUPS_SQL: &str = "SELECT CAST(ITMG_ID AS BIGINT), ITMG_NAME, CAST(ITMG_DELETED AS INTEGER) \
	FROM CTLG_ITM_GROUPS_REF \
	WHERE ITMG_DELETED = 0";

const ITEMS_SQL: &str = "SELECT CAST(f.ITM_ID AS BIGINT), CAST(f.ITM_CODE AS TEXT), f.ITM_NAME, \
	CAST(f.ITM_UNIT AS BIGINT), CAST(f.ITM_GROUP AS BIGINT), CAST(p.PRC_VALUE AS DOUBLE PRECISION) \
	FROM CTLG_ITM_ITEMS_REF f \
	JOIN CTLG_ITM_PRICES_REF p ON f.ITM_ID = p.PRC_ITEM \
	WHERE f.ITM_DELETED_MARK = 0 AND p.PRC_PRICE_TYPE = $1 AND p.PRC_VALUE <> 0";

/// Back-office catalog reader over a single-connection Postgres pool.
pub struct PgSourceStore {
	pool: PgPool,
}

impl PgSourceStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	/// Connect using the configured host, database and credentials.
	pub async fn connect(settings: &SourceSettings) -> Result<Self, StoreError> {
		let options = PgConnectOptions::new()
			.host(&settings.host)
			.port(settings.port)
			.database(&settings.database)
			.username(&settings.user)
			.password(&settings.password);

		let pool = PgPoolOptions::new()
			.max_connections(1)
			.connect_with(options)
			.await
			.map_err(StoreError::Connect)?;
		Ok(Self::new(pool))
	}
}

#[async_trait]
impl SourceStore for PgSourceStore {
	async fn change_markers(&self) -> Result<Vec<ChangeMarker>, StoreError> {
		let rows: Vec<(NaiveDateTime, i32)> = sqlx::query_as(CHANGE_MARKERS_SQL)
			.bind(MARKER_ACTIVE)
			.fetch_all(&self.pool)
			.await
			.map_err(StoreError::Query)?;

		Ok(rows
			.into_iter()
			.map(|(timestamp, status)| ChangeMarker { timestamp, status })
			.collect())
	}

	async fn groups(&self) -> Result<Vec<SourceGroup>, StoreError> {
		let rows: Vec<(i64, Option<String>, i32)> = sqlx::query_as(GROUPS_SQL)
			.fetch_all(&self.pool)
			.await
			.map_err(StoreError::Query)?;

		Ok(rows
			.into_iter()
			.map(|(id, name, deleted)| SourceGroup {
				id,
				name: name.unwrap_or_default(),
				deleted: deleted != 0,
			})
			.collect())
	}

	async fn items(&self, price_type: i64) -> Result<Vec<SourceItem>, StoreError> {
		type Row = (i64, String, Option<String>, Option<i64>, Option<i64>, f64);
		let rows: Vec<Row> = sqlx::query_as(ITEMS_SQL)
			.bind(price_type)
			.fetch_all(&self.pool)
			.await
			.map_err(StoreError::Query)?;

		Ok(rows
			.into_iter()
			.map(|(id, code, name, unit, group, price)| SourceItem {
				id,
				code,
				name: name.unwrap_or_default(),
				unit: unit.unwrap_or_default(),
				group: group.unwrap_or_default(),
				price,
			})
			.collect())
	}
}
