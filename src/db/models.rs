//! Diesel model definitions for database tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)
//!
//! Field order of every Queryable struct follows its `table!` definition.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::diesel_schema::*;

// ============================================================================
// Timestamp Helpers (SQLite stores timestamps as TEXT)
// ============================================================================

/// Format a UTC instant the way every TEXT timestamp column stores it
pub fn format_timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Get current UTC timestamp as ISO 8601 string for SQLite TEXT columns
pub fn current_timestamp() -> String {
    format_timestamp(chrono::Utc::now())
}

// ============================================================================
// Tenancy Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = congregations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Congregation {
    pub id: String,
    pub name: String,
    /// Not-home retry ceiling
    pub max_tries: i32,
    /// Default assignment lifetime; `None` means 24 hours
    pub expiry_hours: Option<i32>,
    pub timezone: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = congregations)]
pub struct NewCongregation<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub max_tries: i32,
    pub expiry_hours: Option<i32>,
    pub timezone: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = territories)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Territory {
    pub id: String,
    pub congregation_id: String,
    pub code: String,
    pub description: Option<String>,
    pub progress: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = territories)]
pub struct NewTerritory<'a> {
    pub id: &'a str,
    pub congregation_id: &'a str,
    pub code: &'a str,
    pub description: Option<&'a str>,
    pub progress: i32,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

// ============================================================================
// Map Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = maps)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Map {
    pub id: String,
    pub congregation_id: String,
    pub territory_id: String,
    pub code: String,
    pub description: String,
    pub map_type: String,
    /// Floor count the map was created with, kept current by floor mutations
    pub floors: i32,
    /// JSON `{"lat": .., "lng": ..}`
    pub coordinates: Option<String>,
    /// JSON form of [`StatusCounts`]
    pub aggregates: Option<String>,
    pub progress: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = maps)]
pub struct NewMap<'a> {
    pub id: &'a str,
    pub congregation_id: &'a str,
    pub territory_id: &'a str,
    pub code: &'a str,
    pub description: &'a str,
    pub map_type: &'a str,
    pub floors: i32,
    pub coordinates: Option<&'a str>,
    pub aggregates: Option<&'a str>,
    pub progress: i32,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

// ============================================================================
// Address Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = addresses)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Address {
    pub id: String,
    pub congregation_id: String,
    pub territory_id: String,
    pub map_id: String,
    pub floor: i32,
    pub code: String,
    pub sequence: i32,
    pub status: String,
    pub not_home_tries: i32,
    pub notes: Option<String>,
    pub dnc_time: Option<String>,
    pub updated_by: Option<String>,
    pub last_notes_updated: Option<String>,
    pub last_notes_updated_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = addresses)]
pub struct NewAddress<'a> {
    pub id: String,
    pub congregation_id: &'a str,
    pub territory_id: &'a str,
    pub map_id: &'a str,
    pub floor: i32,
    pub code: &'a str,
    pub sequence: i32,
    pub status: &'a str,
    pub not_home_tries: i32,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = address_options)]
pub struct AddressOption {
    pub address_id: String,
    pub option_id: String,
}

// ============================================================================
// Option Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = options)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AddressType {
    pub id: String,
    pub congregation_id: String,
    pub code: String,
    pub description: Option<String>,
    pub sequence: i32,
    pub is_countable: i32,
    pub is_default: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = options)]
pub struct NewAddressType<'a> {
    pub id: &'a str,
    pub congregation_id: &'a str,
    pub code: &'a str,
    pub description: Option<&'a str>,
    pub sequence: i32,
    pub is_countable: i32,
    pub is_default: i32,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

// ============================================================================
// Assignment Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = assignments)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Assignment {
    pub id: String,
    pub congregation_id: String,
    pub map_id: String,
    pub user_id: Option<String>,
    pub publisher: String,
    pub assignment_type: String,
    pub expiry_date: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = assignments)]
pub struct NewAssignment<'a> {
    pub id: &'a str,
    pub congregation_id: &'a str,
    pub map_id: &'a str,
    pub user_id: Option<&'a str>,
    pub publisher: &'a str,
    pub assignment_type: &'a str,
    pub expiry_date: &'a str,
    pub created_at: &'a str,
}

// ============================================================================
// Value Types stored as JSON columns
// ============================================================================

/// Five-bucket status counts written onto a map.
///
/// `not_home` only holds not-home addresses that still have tries left;
/// exhausted ones are folded into completion and not stored separately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusCounts {
    pub done: i64,
    pub not_done: i64,
    pub not_home: i64,
    pub dnc: i64,
    pub invalid: i64,
}

impl StatusCounts {
    /// Parse the stored JSON, degrading to zeros on absent or malformed data
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        raw.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default()
    }
}

/// Geographic point in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Parse the stored JSON form. Absent fields read as 0, so `{}` is the
    /// origin; anything that is not a JSON object is an error.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Stored {
            #[serde(default)]
            lat: f64,
            #[serde(default)]
            lng: f64,
        }

        let stored: Stored = serde_json::from_str(raw)?;
        Ok(Self::new(stored.lat, stored.lng))
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

// ============================================================================
// Enum-like Constants
// ============================================================================

/// Address call outcome states
pub mod address_statuses {
    pub const NOT_DONE: &str = "not_done";
    pub const DONE: &str = "done";
    pub const NOT_HOME: &str = "not_home";
    pub const DO_NOT_CALL: &str = "do_not_call";
    pub const INVALID: &str = "invalid";

    pub const ALL: [&str; 5] = [NOT_DONE, DONE, NOT_HOME, DO_NOT_CALL, INVALID];

    /// States a map or territory reset sends back to not_done
    pub const RESETTABLE: [&str; 2] = [DONE, NOT_HOME];

    pub fn is_valid(status: &str) -> bool {
        ALL.contains(&status)
    }
}

pub mod map_types {
    pub const SINGLE: &str = "single";
    pub const MULTI: &str = "multi";

    pub const ALL: [&str; 2] = [SINGLE, MULTI];

    pub fn is_valid(map_type: &str) -> bool {
        ALL.contains(&map_type)
    }
}

pub mod assignment_types {
    /// Counts toward load balancing while unexpired
    pub const NORMAL: &str = "normal";
    pub const PERSONAL: &str = "personal";

    pub const ALL: [&str; 2] = [NORMAL, PERSONAL];

    pub fn is_valid(assignment_type: &str) -> bool {
        ALL.contains(&assignment_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_counts_json_shape() {
        let counts = StatusCounts {
            done: 2,
            not_done: 1,
            not_home: 1,
            dnc: 0,
            invalid: 3,
        };
        let json = serde_json::to_value(counts).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"done": 2, "notDone": 1, "notHome": 1, "dnc": 0, "invalid": 3})
        );
    }

    #[test]
    fn test_status_counts_degrades_to_zero() {
        assert_eq!(StatusCounts::parse_or_default(None), StatusCounts::default());
        assert_eq!(StatusCounts::parse_or_default(Some("not json")), StatusCounts::default());

        let partial = StatusCounts::parse_or_default(Some(r#"{"notDone": 4}"#));
        assert_eq!(partial.not_done, 4);
        assert_eq!(partial.done, 0);
    }

    #[test]
    fn test_coordinates_parse_defaults_absent_fields() {
        assert_eq!(
            Coordinates::parse(r#"{"lat": 1.5, "lng": 103.8}"#).unwrap(),
            Coordinates::new(1.5, 103.8)
        );
        assert_eq!(Coordinates::parse("{}").unwrap(), Coordinates::default());
        assert_eq!(Coordinates::parse(r#"{"lat": 2.0}"#).unwrap(), Coordinates::new(2.0, 0.0));
        assert!(Coordinates::parse("").is_err());
        assert!(Coordinates::parse("not json").is_err());
        assert!(Coordinates::parse(r#"{"lat": "north"}"#).is_err());
    }

    #[test]
    fn test_coordinates_request_form_requires_both_fields() {
        assert!(serde_json::from_str::<Coordinates>(r#"{"lat": 1.0}"#).is_err());
    }

    #[test]
    fn test_coordinates_range() {
        assert!(Coordinates::new(1.3, 103.8).is_valid());
        assert!(!Coordinates::new(91.0, 0.0).is_valid());
        assert!(!Coordinates::new(0.0, f64::NAN).is_valid());
    }

    #[test]
    fn test_status_constants() {
        assert!(address_statuses::is_valid("do_not_call"));
        assert!(!address_statuses::is_valid("dnc"));
        assert!(map_types::is_valid("multi"));
        assert!(assignment_types::is_valid("personal"));
    }
}
