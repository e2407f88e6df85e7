//! Address type (option) queries

use std::collections::HashSet;

use diesel::prelude::*;

use super::diesel_schema::{address_options, addresses, options};
use super::models::{current_timestamp, AddressOption, AddressType, NewAddressType};
use crate::error::MapperError;

pub fn get_option(conn: &mut SqliteConnection, option_id: &str) -> Result<Option<AddressType>, MapperError> {
    Ok(options::table
        .filter(options::id.eq(option_id))
        .first(conn)
        .optional()?)
}

/// Options of a congregation in display order
pub fn list_options(
    conn: &mut SqliteConnection,
    congregation_id: &str,
) -> Result<Vec<AddressType>, MapperError> {
    Ok(options::table
        .filter(options::congregation_id.eq(congregation_id))
        .order((options::sequence.asc(), options::code.asc()))
        .load(conn)?)
}

pub fn get_default_option(
    conn: &mut SqliteConnection,
    congregation_id: &str,
) -> Result<Option<AddressType>, MapperError> {
    Ok(options::table
        .filter(options::congregation_id.eq(congregation_id))
        .filter(options::is_default.eq(1))
        .order(options::sequence.asc())
        .first(conn)
        .optional()?)
}

/// Default option new addresses are typed with
pub fn require_default_option(
    conn: &mut SqliteConnection,
    congregation_id: &str,
) -> Result<AddressType, MapperError> {
    get_default_option(conn, congregation_id)?.ok_or_else(|| {
        MapperError::Invariant(format!(
            "Congregation {} has no default address type",
            congregation_id
        ))
    })
}

pub fn count_defaults(conn: &mut SqliteConnection, congregation_id: &str) -> Result<i64, MapperError> {
    Ok(options::table
        .filter(options::congregation_id.eq(congregation_id))
        .filter(options::is_default.eq(1))
        .count()
        .get_result(conn)?)
}

/// Another option of the congregation already using `code`
pub fn find_by_code(
    conn: &mut SqliteConnection,
    congregation_id: &str,
    code: &str,
    exclude_id: Option<&str>,
) -> Result<Option<AddressType>, MapperError> {
    let mut query = options::table
        .filter(options::congregation_id.eq(congregation_id.to_string()))
        .filter(options::code.eq(code.to_string()))
        .into_boxed();
    if let Some(id) = exclude_id {
        query = query.filter(options::id.ne(id.to_string()));
    }
    Ok(query.first(conn).optional()?)
}

/// Another option of the congregation already using `sequence`
pub fn find_by_sequence(
    conn: &mut SqliteConnection,
    congregation_id: &str,
    sequence: i32,
    exclude_id: Option<&str>,
) -> Result<Option<AddressType>, MapperError> {
    let mut query = options::table
        .filter(options::congregation_id.eq(congregation_id.to_string()))
        .filter(options::sequence.eq(sequence))
        .into_boxed();
    if let Some(id) = exclude_id {
        query = query.filter(options::id.ne(id.to_string()));
    }
    Ok(query.first(conn).optional()?)
}

/// Clear the default flag on every option of the congregation except `keep_id`
pub fn clear_defaults(
    conn: &mut SqliteConnection,
    congregation_id: &str,
    keep_id: Option<&str>,
) -> Result<usize, MapperError> {
    let ids: Vec<String> = {
        let mut query = options::table
            .filter(options::congregation_id.eq(congregation_id.to_string()))
            .filter(options::is_default.eq(1))
            .select(options::id)
            .into_boxed();
        if let Some(id) = keep_id {
            query = query.filter(options::id.ne(id.to_string()));
        }
        query.load(conn)?
    };

    if ids.is_empty() {
        return Ok(0);
    }

    Ok(diesel::update(options::table.filter(options::id.eq_any(&ids)))
        .set((
            options::is_default.eq(0),
            options::updated_at.eq(current_timestamp()),
        ))
        .execute(conn)?)
}

pub fn insert_option(conn: &mut SqliteConnection, option: &NewAddressType<'_>) -> Result<(), MapperError> {
    diesel::insert_into(options::table).values(option).execute(conn)?;
    Ok(())
}

/// Overwrite the editable fields of an existing option
pub fn update_option(
    conn: &mut SqliteConnection,
    option_id: &str,
    code: &str,
    description: Option<&str>,
    sequence: i32,
    is_countable: bool,
    is_default: bool,
) -> Result<(), MapperError> {
    let updated = diesel::update(options::table.filter(options::id.eq(option_id)))
        .set((
            options::code.eq(code),
            options::description.eq(description),
            options::sequence.eq(sequence),
            options::is_countable.eq(i32::from(is_countable)),
            options::is_default.eq(i32::from(is_default)),
            options::updated_at.eq(current_timestamp()),
        ))
        .execute(conn)?;

    if updated == 0 {
        return Err(MapperError::NotFound(format!("Option {} not found", option_id)));
    }
    Ok(())
}

/// Give `replacement_id` to every address of the congregation typed with
/// `option_id` that does not already carry it. Returns the links added.
pub fn add_replacement_type(
    conn: &mut SqliteConnection,
    congregation_id: &str,
    option_id: &str,
    replacement_id: &str,
) -> Result<usize, MapperError> {
    let carrying: Vec<String> = address_options::table
        .inner_join(addresses::table)
        .filter(address_options::option_id.eq(option_id))
        .filter(addresses::congregation_id.eq(congregation_id))
        .select(address_options::address_id)
        .load(conn)?;

    if carrying.is_empty() {
        return Ok(0);
    }

    let already: HashSet<String> = address_options::table
        .filter(address_options::option_id.eq(replacement_id))
        .filter(address_options::address_id.eq_any(&carrying))
        .select(address_options::address_id)
        .load::<String>(conn)?
        .into_iter()
        .collect();

    let links: Vec<AddressOption> = carrying
        .into_iter()
        .filter(|id| !already.contains(id))
        .map(|address_id| AddressOption {
            address_id,
            option_id: replacement_id.to_string(),
        })
        .collect();

    if links.is_empty() {
        return Ok(0);
    }

    Ok(diesel::insert_into(address_options::table)
        .values(&links)
        .execute(conn)?)
}

/// Delete an option together with its address links
pub fn delete_option(conn: &mut SqliteConnection, option_id: &str) -> Result<(), MapperError> {
    diesel::delete(address_options::table.filter(address_options::option_id.eq(option_id)))
        .execute(conn)?;
    let deleted = diesel::delete(options::table.filter(options::id.eq(option_id))).execute(conn)?;

    if deleted == 0 {
        return Err(MapperError::NotFound(format!("Option {} not found", option_id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::map_types;
    use crate::db::{addresses as address_queries, admin, MapperDb};

    #[test]
    fn test_clear_defaults_keeps_one() {
        let db = MapperDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            admin::insert_congregation(conn, "cong-1", "North", 3, None)?;
            admin::insert_option(conn, "o-1", "cong-1", "HDB", 1, true, true)?;
            admin::insert_option(conn, "o-2", "cong-1", "BIZ", 2, false, true)?;
            assert_eq!(count_defaults(conn, "cong-1")?, 2);

            assert_eq!(clear_defaults(conn, "cong-1", Some("o-2"))?, 1);
            assert_eq!(count_defaults(conn, "cong-1")?, 1);
            assert_eq!(require_default_option(conn, "cong-1")?.id, "o-2");

            clear_defaults(conn, "cong-1", None)?;
            let err = require_default_option(conn, "cong-1").unwrap_err();
            assert!(matches!(err, MapperError::Invariant(_)));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_find_excludes_the_option_itself() {
        let db = MapperDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            admin::insert_congregation(conn, "cong-1", "North", 3, None)?;
            admin::insert_option(conn, "o-1", "cong-1", "HDB", 1, true, true)?;

            assert!(find_by_code(conn, "cong-1", "HDB", None)?.is_some());
            assert!(find_by_code(conn, "cong-1", "HDB", Some("o-1"))?.is_none());
            assert!(find_by_sequence(conn, "cong-1", 1, Some("o-1"))?.is_none());
            assert!(find_by_sequence(conn, "cong-2", 1, None)?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_replacement_skips_addresses_already_typed() {
        let db = MapperDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            admin::insert_congregation(conn, "cong-1", "North", 3, None)?;
            admin::insert_option(conn, "o-1", "cong-1", "HDB", 1, true, true)?;
            admin::insert_option(conn, "o-2", "cong-1", "BIZ", 2, false, false)?;
            let territory = admin::insert_territory(conn, "t-1", "cong-1", "T1")?;
            let map = admin::insert_map(conn, "m-1", &territory, "M1", map_types::MULTI, 1, None)?;

            let both = admin::insert_address_with_status(conn, &map, 1, "01", 1, "done", 0, &["o-1", "o-2"])?;
            let only = admin::insert_address_with_status(conn, &map, 1, "02", 2, "done", 0, &["o-2"])?;

            assert_eq!(add_replacement_type(conn, "cong-1", "o-2", "o-1")?, 1);
            delete_option(conn, "o-2")?;

            assert_eq!(address_queries::address_type_ids(conn, &both)?, vec!["o-1".to_string()]);
            assert_eq!(address_queries::address_type_ids(conn, &only)?, vec!["o-1".to_string()]);
            assert!(get_option(conn, "o-2")?.is_none());

            let err = delete_option(conn, "o-2").unwrap_err();
            assert!(matches!(err, MapperError::NotFound(_)));
            Ok(())
        })
        .unwrap();
    }
}
