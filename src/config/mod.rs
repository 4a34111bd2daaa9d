use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::Level;
use serde::Deserialize;
use thiserror::Error;

/// Department key whose code is assigned to weight-priced items.
pub const WEIGHT_DEPARTMENT: &str = "W";
/// Department key whose code is assigned to piece-priced items.
pub const PIECE_DEPARTMENT: &str = "P";

/// Runtime configuration for the catalog sync service.
///
/// Values are loaded from (in order): `/etc/pos-catalog-sync/config.json`,
/// `pos-catalog-sync/config.json` in the user config folder (both optional),
/// an explicit file passed on the command line, and environment variables
/// prefixed with `PCS_` (nested keys use `__`, e.g. `PCS_SOURCE__HOST`).
/// Settings are read once at startup and passed by reference afterwards.
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
	/// Back-office price type whose prices are mirrored.
	pub price_type: i64,
	/// Raw back-office prices are divided by this before comparison and write.
	pub divisor: f64,
	/// Unit id marking an item as sold by weight.
	pub weight_unit_id: i64,
	pub piece_unit_id: i64,
	pub use_piece: bool,
	/// Department key -> department; must contain `W` and `P`.
	pub departments: BTreeMap<String, DepartmentSettings>,
	/// Sleep between failed connection attempts.
	pub poll_interval_secs: u64,
	/// Sleep after a poll that found no new change marker.
	pub idle_poll_ms: u64,
	pub source: SourceSettings,
	pub target: TargetSettings,
	pub log_level: Level,
	/// Append-only log file; stderr only when unset.
	pub log_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct DepartmentSettings {
	pub code: i64,
	pub name: String,
	/// Defaults to the department code.
	#[serde(default)]
	pub speed_key: Option<i64>,
}

impl DepartmentSettings {
	pub fn speed_key(&self) -> i64 {
		self.speed_key.unwrap_or(self.code)
	}
}

/// Connection parameters for the back-office (PostgreSQL) store.
#[derive(Deserialize, PartialEq, Eq, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSettings {
	pub host: String,
	pub port: u16,
	pub database: String,
	pub user: String,
	pub password: String,
}

// Hand-written so the password never reaches a log line.
impl std::fmt::Debug for SourceSettings {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SourceSettings")
			.field("host", &self.host)
			.field("port", &self.port)
			.field("database", &self.database)
			.field("user", &self.user)
			.field("password", &"<redacted>")
			.finish()
	}
}

impl Default for SourceSettings {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".to_string(),
			port: 5432,
			database: "backoffice".to_string(),
			user: "sync".to_string(),
			password: String::new(),
		}
	}
}

/// Location of the POS (SQLite) store.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct TargetSettings {
	pub path: PathBuf,
}

impl Default for TargetSettings {
	fn default() -> Self {
		Self {
			path: PathBuf::from("pos.db"),
		}
	}
}

impl Default for Settings {
	fn default() -> Self {
		let mut departments = BTreeMap::new();
		departments.insert(
			WEIGHT_DEPARTMENT.to_string(),
			DepartmentSettings {
				code: 1,
				name: "Weight goods".to_string(),
				speed_key: None,
			},
		);
		departments.insert(
			PIECE_DEPARTMENT.to_string(),
			DepartmentSettings {
				code: 2,
				name: "Piece goods".to_string(),
				speed_key: None,
			},
		);

		Self {
			price_type: 1,
			divisor: 1.0,
			weight_unit_id: 1,
			piece_unit_id: 2,
			use_piece: true,
			departments,
			poll_interval_secs: 10,
			idle_poll_ms: 500,
			source: SourceSettings::default(),
			target: TargetSettings::default(),
			log_level: Level::Info,
			log_file: None,
		}
	}
}

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("configuration error: {0}")]
	Config(#[from] config::ConfigError),
	#[error("invalid configuration: {0}")]
	Invalid(String),
}

impl Settings {
	/// Look up a department by key, ignoring ASCII case.
	pub fn department(&self, key: &str) -> Option<&DepartmentSettings> {
		self.departments
			.iter()
			.find(|(k, _)| k.eq_ignore_ascii_case(key))
			.map(|(_, d)| d)
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_secs(self.poll_interval_secs)
	}

	pub fn idle_poll(&self) -> Duration {
		Duration::from_millis(self.idle_poll_ms)
	}

	/// Check the invariants serde cannot express.
	pub fn validate(&self) -> Result<(), SettingsError> {
		if !self.divisor.is_finite() || self.divisor <= 0.0 {
			return Err(SettingsError::Invalid(format!(
				"divisor must be a positive number, got {}",
				self.divisor
			)));
		}
		for key in [WEIGHT_DEPARTMENT, PIECE_DEPARTMENT] {
			if self.department(key).is_none() {
				return Err(SettingsError::Invalid(format!(
					"departments must define key '{}'",
					key
				)));
			}
		}
		let mut codes: Vec<i64> = self.departments.values().map(|d| d.code).collect();
		codes.sort_unstable();
		if codes.windows(2).any(|w| w[0] == w[1]) {
			return Err(SettingsError::Invalid(
				"department codes must be unique".to_string(),
			));
		}
		if self.use_piece && self.piece_unit_id == self.weight_unit_id {
			return Err(SettingsError::Invalid(format!(
				"piece_unit_id and weight_unit_id are both {}",
				self.weight_unit_id
			)));
		}
		if self.poll_interval_secs == 0 {
			return Err(SettingsError::Invalid(
				"poll_interval_secs must be greater than zero".to_string(),
			));
		}
		if self.idle_poll_ms == 0 {
			return Err(SettingsError::Invalid(
				"idle_poll_ms must be greater than zero".to_string(),
			));
		}
		Ok(())
	}
}

/// Load and validate settings. `explicit` is a file named on the command line;
/// unlike the well-known locations it must exist.
pub fn load(explicit: Option<&Path>) -> Result<Settings, SettingsError> {
	let mut builder = config::Config::builder().add_source(
		config::File::with_name("/etc/pos-catalog-sync/config.json").required(false),
	);

	if let Some(folder) = dirs::config_dir() {
		let user_config_path = folder.join("pos-catalog-sync").join("config.json");
		builder = builder.add_source(config::File::from(user_config_path).required(false));
	}
	if let Some(path) = explicit {
		builder = builder.add_source(config::File::from(path).required(true));
	}

	builder = builder.add_source(
		config::Environment::with_prefix("PCS")
			.prefix_separator("_")
			.separator("__")
			.try_parsing(true),
	);

	let cfg = builder.build()?;

	let mut s: Settings = cfg.try_deserialize()?;

	// Explicitly prefer direct environment variables when present; service
	// managers sometimes pass these in ways the layered source does not map.
	if let Ok(l) = std::env::var("PCS_LOG_LEVEL") {
		if !l.is_empty() {
			if let Ok(parsed) = l.parse::<Level>() {
				s.log_level = parsed;
			}
		}
	}
	if let Ok(p) = std::env::var("PCS_SOURCE__PASSWORD") {
		if !p.is_empty() {
			s.source.password = p;
		}
	}
	if let Ok(t) = std::env::var("PCS_TARGET__PATH") {
		if !t.is_empty() {
			s.target.path = PathBuf::from(t);
		}
	}

	s.validate()?;
	Ok(s)
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use std::env;
	use std::io::Write;

	use log::Level;
	use serde_json::json;

	use crate::config::{Settings, SettingsError, load};

	fn write_config(body: &str) -> tempfile::NamedTempFile {
		let mut file = tempfile::Builder::new()
			.suffix(".json")
			.tempfile()
			.expect("create temp config");
		file.write_all(body.as_bytes()).expect("write temp config");
		file
	}

	#[test]
	fn defaults_are_valid() {
		let s = Settings::default();
		s.validate().expect("defaults validate");
		assert_eq!(s.department("w").map(|d| d.code), Some(1));
		assert_eq!(s.department("P").map(|d| d.speed_key()), Some(2));
	}

	#[test]
	fn load_from_explicit_file() {
		let body = json!({
			"price_type": 4,
			"divisor": 100,
			"weight_unit_id": 7,
			"piece_unit_id": 8,
			"departments": {
				"W": { "code": 10, "name": "Scales" },
				"P": { "code": 20, "name": "Counter", "speed_key": 5 }
			},
			"source": { "host": "bo.local", "database": "/data/shop.fdb", "user": "u", "password": "p" },
			"target": { "path": "/data/pos.db" }
		});
		let file = write_config(&body.to_string());

		let s = load(Some(file.path())).expect("load explicit config");
		assert_eq!(s.price_type, 4);
		assert_eq!(s.divisor, 100.0);
		assert_eq!(s.weight_unit_id, 7);
		assert_eq!(s.department("W").map(|d| d.speed_key()), Some(10));
		assert_eq!(s.department("P").map(|d| d.speed_key()), Some(5));
		assert_eq!(s.source.host, "bo.local");
		assert_eq!(s.source.port, 5432);
		assert_eq!(s.idle_poll_ms, 500);
	}

	#[test]
	fn unknown_keys_are_rejected() {
		let file = write_config(r#"{ "divider": 100 }"#);
		assert!(matches!(load(Some(file.path())), Err(SettingsError::Config(_))));
	}

	#[test]
	fn missing_explicit_file_is_an_error() {
		let missing = std::path::Path::new("/nonexistent/pos-catalog-sync.json");
		assert!(load(Some(missing)).is_err());
	}

	#[test]
	fn validation_failures() {
		let mut s = Settings::default();
		s.divisor = 0.0;
		assert!(matches!(s.validate(), Err(SettingsError::Invalid(_))));

		let mut s = Settings::default();
		s.departments.remove("P");
		assert!(matches!(s.validate(), Err(SettingsError::Invalid(_))));

		let mut s = Settings::default();
		s.piece_unit_id = s.weight_unit_id;
		assert!(matches!(s.validate(), Err(SettingsError::Invalid(_))));
		s.use_piece = false;
		assert!(s.validate().is_ok());

		let mut s = Settings::default();
		if let Some(p) = s.departments.get_mut("P") {
			p.code = 1;
		}
		assert!(matches!(s.validate(), Err(SettingsError::Invalid(_))));

		let mut s = Settings::default();
		s.poll_interval_secs = 0;
		assert!(matches!(s.validate(), Err(SettingsError::Invalid(_))));

		let mut s = Settings::default();
		s.idle_poll_ms = 0;
		assert!(matches!(s.validate(), Err(SettingsError::Invalid(_))));
		s.idle_poll_ms = 1;
		assert!(s.validate().is_ok());
	}

	#[test]
	fn env_overlay() {
		let orig_level = env::var_os("PCS_LOG_LEVEL");
		let orig_password = env::var_os("PCS_SOURCE__PASSWORD");

		unsafe { env::set_var("PCS_LOG_LEVEL", "debug") };
		unsafe { env::set_var("PCS_SOURCE__PASSWORD", "s3cret") };

		let file = write_config(r#"{ "source": { "password": "from-file" } }"#);
		let s = load(Some(file.path())).expect("load with env");
		assert_eq!(s.log_level, Level::Debug);
		assert_eq!(s.source.password, "s3cret");
		assert!(!format!("{:?}", s.source).contains("s3cret"));

		match orig_level {
			Some(v) => unsafe { env::set_var("PCS_LOG_LEVEL", v) },
			None => unsafe { env::remove_var("PCS_LOG_LEVEL") },
		}
		match orig_password {
			Some(v) => unsafe { env::set_var("PCS_SOURCE__PASSWORD", v) },
			None => unsafe { env::remove_var("PCS_SOURCE__PASSWORD") },
		}
	}
}
