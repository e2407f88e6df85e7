//! Address grid queries
//!
//! Floors and codes have no table of their own; a map's floors are the
//! distinct `floor` values of its addresses and its codes the distinct `code`
//! values. Every shape mutation goes through the helpers here.

use diesel::prelude::*;

use super::diesel_schema::{address_options, addresses, options};
use super::models::{address_statuses, current_timestamp, Address, AddressOption, NewAddress};
use crate::error::MapperError;

/// Which addresses a query covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressScope<'a> {
    Map(&'a str),
    Territory(&'a str),
}

impl AddressScope<'_> {
    fn boxed(self) -> addresses::BoxedQuery<'static, diesel::sqlite::Sqlite> {
        match self {
            AddressScope::Map(id) => addresses::table
                .filter(addresses::map_id.eq(id.to_string()))
                .into_boxed(),
            AddressScope::Territory(id) => addresses::table
                .filter(addresses::territory_id.eq(id.to_string()))
                .into_boxed(),
        }
    }
}

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_address(
    conn: &mut SqliteConnection,
    address_id: &str,
) -> Result<Option<Address>, MapperError> {
    Ok(addresses::table
        .filter(addresses::id.eq(address_id))
        .first(conn)
        .optional()?)
}

pub fn require_address(conn: &mut SqliteConnection, address_id: &str) -> Result<Address, MapperError> {
    get_address(conn, address_id)?
        .ok_or_else(|| MapperError::NotFound(format!("Address {} not found", address_id)))
}

/// Distinct floor numbers of a map, ascending
pub fn distinct_floors(conn: &mut SqliteConnection, map_id: &str) -> Result<Vec<i32>, MapperError> {
    Ok(addresses::table
        .filter(addresses::map_id.eq(map_id))
        .select(addresses::floor)
        .distinct()
        .order(addresses::floor.asc())
        .load(conn)?)
}

pub fn count_floors(conn: &mut SqliteConnection, map_id: &str) -> Result<i64, MapperError> {
    Ok(addresses::table
        .filter(addresses::map_id.eq(map_id))
        .select(diesel::dsl::count_distinct(addresses::floor))
        .first(conn)?)
}

pub fn count_codes(conn: &mut SqliteConnection, map_id: &str) -> Result<i64, MapperError> {
    Ok(addresses::table
        .filter(addresses::map_id.eq(map_id))
        .select(diesel::dsl::count_distinct(addresses::code))
        .first(conn)?)
}

/// Distinct codes of a map in `(sequence, code)` order
pub fn codes_in_order(conn: &mut SqliteConnection, map_id: &str) -> Result<Vec<String>, MapperError> {
    let rows: Vec<(i32, String)> = addresses::table
        .filter(addresses::map_id.eq(map_id))
        .select((addresses::sequence, addresses::code))
        .distinct()
        .order((addresses::sequence.asc(), addresses::code.asc()))
        .load(conn)?;

    let mut codes: Vec<String> = Vec::with_capacity(rows.len());
    for (_, code) in rows {
        if !codes.contains(&code) {
            codes.push(code);
        }
    }
    Ok(codes)
}

/// Highest sequence in use on a map, 0 for an empty map
pub fn max_sequence(conn: &mut SqliteConnection, map_id: &str) -> Result<i32, MapperError> {
    let max: Option<i32> = addresses::table
        .filter(addresses::map_id.eq(map_id))
        .select(diesel::dsl::max(addresses::sequence))
        .first(conn)?;
    Ok(max.unwrap_or(0))
}

pub fn addresses_on_floor(
    conn: &mut SqliteConnection,
    map_id: &str,
    floor: i32,
) -> Result<Vec<Address>, MapperError> {
    Ok(addresses::table
        .filter(addresses::map_id.eq(map_id))
        .filter(addresses::floor.eq(floor))
        .order((addresses::sequence.asc(), addresses::code.asc()))
        .load(conn)?)
}

pub fn address_ids_on_floor(
    conn: &mut SqliteConnection,
    map_id: &str,
    floor: i32,
) -> Result<Vec<String>, MapperError> {
    Ok(addresses::table
        .filter(addresses::map_id.eq(map_id))
        .filter(addresses::floor.eq(floor))
        .select(addresses::id)
        .load(conn)?)
}

pub fn address_ids_with_code(
    conn: &mut SqliteConnection,
    map_id: &str,
    code: &str,
) -> Result<Vec<String>, MapperError> {
    Ok(addresses::table
        .filter(addresses::map_id.eq(map_id))
        .filter(addresses::code.eq(code))
        .select(addresses::id)
        .load(conn)?)
}

/// Option ids attached to an address
pub fn address_type_ids(conn: &mut SqliteConnection, address_id: &str) -> Result<Vec<String>, MapperError> {
    Ok(address_options::table
        .filter(address_options::address_id.eq(address_id))
        .select(address_options::option_id)
        .load(conn)?)
}

/// `(status, not_home_tries)` of every address in scope whose type set holds
/// at least one countable option of the congregation
pub fn countable_status_rows(
    conn: &mut SqliteConnection,
    scope: AddressScope<'_>,
    congregation_id: &str,
) -> Result<Vec<(String, i32)>, MapperError> {
    let countable_options = options::table
        .filter(options::congregation_id.eq(congregation_id.to_string()))
        .filter(options::is_countable.eq(1))
        .select(options::id);
    let countable_addresses = address_options::table
        .filter(address_options::option_id.eq_any(countable_options))
        .select(address_options::address_id);

    Ok(scope
        .boxed()
        .filter(addresses::status.eq_any(address_statuses::ALL))
        .filter(addresses::id.eq_any(countable_addresses))
        .select((addresses::status, addresses::not_home_tries))
        .load(conn)?)
}

// ============================================================================
// Write Operations
// ============================================================================

/// Insert address rows and attach `option_id` as the type of each
pub fn insert_addresses(
    conn: &mut SqliteConnection,
    rows: &[NewAddress<'_>],
    option_id: &str,
) -> Result<usize, MapperError> {
    if rows.is_empty() {
        return Ok(0);
    }

    let inserted = diesel::insert_into(addresses::table)
        .values(rows)
        .execute(conn)?;

    let links: Vec<AddressOption> = rows
        .iter()
        .map(|row| AddressOption {
            address_id: row.id.clone(),
            option_id: option_id.to_string(),
        })
        .collect();
    diesel::insert_into(address_options::table)
        .values(&links)
        .execute(conn)?;

    Ok(inserted)
}

/// Delete addresses together with their type links
pub fn delete_addresses(conn: &mut SqliteConnection, ids: &[String]) -> Result<usize, MapperError> {
    if ids.is_empty() {
        return Ok(0);
    }

    diesel::delete(address_options::table.filter(address_options::address_id.eq_any(ids)))
        .execute(conn)?;
    Ok(diesel::delete(addresses::table.filter(addresses::id.eq_any(ids))).execute(conn)?)
}

/// Set the sequence of every row sharing `code` within a map
pub fn update_code_sequence(
    conn: &mut SqliteConnection,
    map_id: &str,
    code: &str,
    sequence: i32,
) -> Result<usize, MapperError> {
    Ok(diesel::update(
        addresses::table
            .filter(addresses::map_id.eq(map_id))
            .filter(addresses::code.eq(code)),
    )
    .set((
        addresses::sequence.eq(sequence),
        addresses::updated_at.eq(current_timestamp()),
    ))
    .execute(conn)?)
}

pub fn move_map_addresses(
    conn: &mut SqliteConnection,
    map_id: &str,
    territory_id: &str,
) -> Result<usize, MapperError> {
    Ok(diesel::update(addresses::table.filter(addresses::map_id.eq(map_id)))
        .set((
            addresses::territory_id.eq(territory_id),
            addresses::updated_at.eq(current_timestamp()),
        ))
        .execute(conn)?)
}

/// Send every done / not-home address in scope back to not_done
pub fn reset_statuses(
    conn: &mut SqliteConnection,
    scope: AddressScope<'_>,
    acting_user: &str,
) -> Result<usize, MapperError> {
    let ids: Vec<String> = scope
        .boxed()
        .filter(addresses::status.eq_any(address_statuses::RESETTABLE))
        .select(addresses::id)
        .load(conn)?;

    if ids.is_empty() {
        return Ok(0);
    }

    Ok(diesel::update(addresses::table.filter(addresses::id.eq_any(&ids)))
        .set((
            addresses::status.eq(address_statuses::NOT_DONE),
            addresses::not_home_tries.eq(0),
            addresses::updated_by.eq(Some(acting_user)),
            addresses::updated_at.eq(current_timestamp()),
        ))
        .execute(conn)?)
}

/// Persist one call outcome
pub fn update_call_outcome(
    conn: &mut SqliteConnection,
    address: &Address,
    acting_user: &str,
) -> Result<usize, MapperError> {
    Ok(diesel::update(addresses::table.filter(addresses::id.eq(&address.id)))
        .set((
            addresses::status.eq(&address.status),
            addresses::not_home_tries.eq(address.not_home_tries),
            addresses::dnc_time.eq(address.dnc_time.as_deref()),
            addresses::notes.eq(address.notes.as_deref()),
            addresses::last_notes_updated.eq(address.last_notes_updated.as_deref()),
            addresses::last_notes_updated_by.eq(address.last_notes_updated_by.as_deref()),
            addresses::updated_by.eq(Some(acting_user)),
            addresses::updated_at.eq(current_timestamp()),
        ))
        .execute(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::map_types;
    use crate::db::{admin, MapperDb};

    #[test]
    fn test_codes_follow_sequence_not_insertion() {
        let db = MapperDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            admin::insert_congregation(conn, "cong-1", "North", 3, None)?;
            let territory = admin::insert_territory(conn, "t-1", "cong-1", "T1")?;
            let map = admin::insert_map(conn, "m-1", &territory, "M1", map_types::MULTI, 2, None)?;

            assert_eq!(max_sequence(conn, "m-1")?, 0);
            assert!(codes_in_order(conn, "m-1")?.is_empty());

            for floor in [2, 1] {
                admin::insert_address_with_status(conn, &map, floor, "B", 1, "not_done", 0, &[])?;
                admin::insert_address_with_status(conn, &map, floor, "A", 4, "done", 0, &[])?;
            }

            assert_eq!(codes_in_order(conn, "m-1")?, vec!["B", "A"]);
            assert_eq!(distinct_floors(conn, "m-1")?, vec![1, 2]);
            assert_eq!(count_floors(conn, "m-1")?, 2);
            assert_eq!(count_codes(conn, "m-1")?, 2);
            assert_eq!(max_sequence(conn, "m-1")?, 4);
            assert_eq!(address_ids_with_code(conn, "m-1", "A")?.len(), 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_reset_scope_and_delete_links() {
        let db = MapperDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            admin::insert_congregation(conn, "cong-1", "North", 3, None)?;
            admin::insert_option(conn, "o-1", "cong-1", "HDB", 1, true, true)?;
            let territory = admin::insert_territory(conn, "t-1", "cong-1", "T1")?;
            let first = admin::insert_map(conn, "m-1", &territory, "M1", map_types::MULTI, 1, None)?;
            let second = admin::insert_map(conn, "m-2", &territory, "M2", map_types::MULTI, 1, None)?;

            let done = admin::insert_address_with_status(conn, &first, 1, "01", 1, "done", 0, &["o-1"])?;
            admin::insert_address_with_status(conn, &first, 1, "02", 2, "invalid", 0, &["o-1"])?;
            admin::insert_address_with_status(conn, &second, 1, "01", 1, "not_home", 2, &["o-1"])?;

            assert_eq!(reset_statuses(conn, AddressScope::Map("m-1"), "admin")?, 1);
            let reset = require_address(conn, &done)?;
            assert_eq!(reset.status, "not_done");
            assert_eq!(reset.updated_by.as_deref(), Some("admin"));

            assert_eq!(reset_statuses(conn, AddressScope::Territory("t-1"), "admin")?, 1);
            assert_eq!(reset_statuses(conn, AddressScope::Territory("t-1"), "admin")?, 0);

            assert_eq!(address_type_ids(conn, &done)?, vec!["o-1".to_string()]);
            assert_eq!(delete_addresses(conn, &[done.clone()])?, 1);
            assert!(address_type_ids(conn, &done)?.is_empty());
            assert!(get_address(conn, &done)?.is_none());
            Ok(())
        })
        .unwrap();
    }
}
