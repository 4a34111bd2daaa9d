//! Catalog entities mirrored from the back-office store into the POS store.
//!
//! Source-side rows (`SourceGroup`, `SourceItem`, `ChangeMarker`) are what the
//! back office returns. Target-side rows (`Department`, `Group`, `Item`) carry
//! exactly the columns the POS tables hold, so a derived source row and a row
//! read back from the POS store can be compared directly.

use std::fmt;

use chrono::NaiveDateTime;

/// Longest display name the POS tables accept.
pub const MAX_NAME_CHARS: usize = 64;

/// Two prices closer than this (in converted currency units) are equal.
pub const PRICE_TOLERANCE: f64 = 0.5;

/// Status value of a change marker that still requests a sync.
pub const MARKER_ACTIVE: i32 = 1;

/// Truncate a display name to [`MAX_NAME_CHARS`] characters.
pub fn truncate_name(name: &str) -> String {
	name.chars().take(MAX_NAME_CHARS).collect()
}

/// Key a PLU number compares under.
///
/// POS stores commonly declare `PluNo` INTEGER, so SQLite stores `"00123"` as
/// `123` and reads it back as `"123"`. Purely numeric codes are compared
/// without leading zeros; any other code is compared as written.
pub fn plu_key(code: &str) -> String {
	if code.is_empty() || !code.bytes().all(|b| b.is_ascii_digit()) {
		return code.to_string();
	}
	match code.trim_start_matches('0') {
		"" => "0".to_string(),
		digits => digits.to_string(),
	}
}

/// Which catalog table a reconciliation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
	Department,
	Group,
	Item,
}

impl EntityKind {
	/// All kinds in the order a sync cycle reconciles them.
	pub const CYCLE_ORDER: [EntityKind; 3] = [EntityKind::Department, EntityKind::Group, EntityKind::Item];

	pub fn as_str(&self) -> &'static str {
		match self {
			EntityKind::Department => "departments",
			EntityKind::Group => "groups",
			EntityKind::Item => "items",
		}
	}
}

impl fmt::Display for EntityKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Timestamped record the back office writes after a sync-relevant transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeMarker {
	pub timestamp: NaiveDateTime,
	pub status: i32,
}

impl ChangeMarker {
	pub fn is_active(&self) -> bool {
		self.status == MARKER_ACTIVE
	}
}

/// Item group as stored in the back office.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceGroup {
	pub id: i64,
	pub name: String,
	pub deleted: bool,
}

/// Priced item as stored in the back office, already joined with the price
/// of the configured price type.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceItem {
	pub id: i64,
	pub code: String,
	pub name: String,
	pub unit: i64,
	pub group: i64,
	pub price: f64,
}

/// PLU type code used by the POS store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluType {
	/// Sold by weight.
	Weight,
	/// Sold by piece.
	Piece,
	/// Code written by something other than this service.
	Other(i64),
}

impl PluType {
	pub fn code(&self) -> i64 {
		match self {
			PluType::Weight => 1,
			PluType::Piece => 3,
			PluType::Other(code) => *code,
		}
	}
}

impl From<i64> for PluType {
	fn from(code: i64) -> Self {
		match code {
			1 => PluType::Weight,
			3 => PluType::Piece,
			other => PluType::Other(other),
		}
	}
}

/// Row of `TbDepartment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Department {
	pub code: i64,
	pub speed_key: i64,
	pub name: String,
}

/// Row of `TbGroup`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
	pub code: i64,
	pub name: String,
}

/// Row of `TbPLU`, minus the update stamp which is written but never compared.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
	pub code: String,
	pub kind: PluType,
	pub name: String,
	pub unit_price: f64,
	pub group: i64,
	pub department: i64,
}
