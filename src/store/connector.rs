use async_trait::async_trait;

use super::{PgSourceStore, SqliteTargetStore, StoreConnector, StoreError};
use crate::config::{Settings, SourceSettings, TargetSettings};

/// Connects to the configured Postgres back office and SQLite POS store.
#[derive(Debug, Clone)]
pub struct SqlConnector {
	source: SourceSettings,
	target: TargetSettings,
}

impl SqlConnector {
	pub fn new(source: SourceSettings, target: TargetSettings) -> Self {
		Self { source, target }
	}

	pub fn from_settings(settings: &Settings) -> Self {
		Self::new(settings.source.clone(), settings.target.clone())
	}
}

#[async_trait]
impl StoreConnector for SqlConnector {
	type Source = PgSourceStore;
	type Target = SqliteTargetStore;

	async fn connect_source(&self) -> Result<PgSourceStore, StoreError> {
		PgSourceStore::connect(&self.source).await
	}

	async fn connect_target(&self) -> Result<SqliteTargetStore, StoreError> {
		SqliteTargetStore::open(&self.target).await
	}
}
