/// Common test utilities and helpers for integration tests.
use std::env;
use std::path::Path;

use pos_catalog_sync::store::SqliteTargetStore;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::time::{Duration, sleep};

/// Check if Docker integration tests are enabled via environment variable.
/// Returns true if RUN_DOCKER_INTEGRATION_TESTS is set.
#[allow(dead_code)]
pub fn is_docker_test_enabled() -> bool {
	env::var("RUN_DOCKER_INTEGRATION_TESTS").is_ok()
}

/// Skip the test with a message if Docker integration tests are not enabled.
/// Returns true if the test should proceed, false if it should be skipped.
#[allow(dead_code)]
pub fn check_docker_enabled() -> bool {
	if !is_docker_test_enabled() {
		eprintln!("Skipping Docker integration test; set RUN_DOCKER_INTEGRATION_TESTS=1 to enable");
		return false;
	}
	true
}

/// Wait for Postgres to accept connections with a maximum retry count.
#[allow(dead_code)]
pub async fn wait_for_postgres(
	connection_string: &str,
	max_retries: u32,
) -> Result<sqlx::PgPool, String> {
	let mut attempts = 0;
	loop {
		match sqlx::PgPool::connect(connection_string).await {
			Ok(pool) => return Ok(pool),
			Err(e) => {
				attempts += 1;
				if attempts >= max_retries {
					return Err(format!(
						"Postgres did not become ready after {} attempts: {}",
						max_retries, e
					));
				}
				sleep(Duration::from_secs(1)).await;
			}
		}
	}
}

/// Create a POS database file with the mirrored tables and return the store
/// under test plus a second pool for seeding and inspecting committed rows.
#[allow(dead_code)]
pub async fn fresh_pos_store(path: &Path) -> (SqliteTargetStore, SqlitePool) {
	let options = SqliteConnectOptions::new()
		.filename(path)
		.create_if_missing(true);
	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.connect_with(options.clone())
		.await
		.expect("create POS database");

	let store = SqliteTargetStore::new(pool);
	store.create_schema().await.expect("create POS schema");

	let inspector = SqlitePoolOptions::new()
		.max_connections(1)
		.connect_with(options)
		.await
		.expect("open inspector pool");
	(store, inspector)
}
