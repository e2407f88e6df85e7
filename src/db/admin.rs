//! Record creation normally done by admin tooling
//!
//! The engine never creates congregations, territories or options during
//! normal operation; these helpers seed them for the binary's bootstrap and
//! for tests.

use diesel::prelude::*;
use uuid::Uuid;

use super::diesel_schema::{addresses, congregations, territories};
use super::models::{
    current_timestamp, AddressOption, AddressType, Congregation, Coordinates, Map, NewAddress,
    NewAddressType, NewCongregation, NewMap, NewTerritory, Territory,
};
use super::{maps, options, territories as territory_queries};
use crate::error::MapperError;

pub fn insert_congregation(
    conn: &mut SqliteConnection,
    id: &str,
    name: &str,
    max_tries: i32,
    expiry_hours: Option<i32>,
) -> Result<Congregation, MapperError> {
    let now = current_timestamp();
    diesel::insert_into(congregations::table)
        .values(&NewCongregation {
            id,
            name,
            max_tries,
            expiry_hours,
            timezone: "UTC",
            created_at: &now,
            updated_at: &now,
        })
        .execute(conn)?;
    territory_queries::require_congregation(conn, id)
}

pub fn insert_territory(
    conn: &mut SqliteConnection,
    id: &str,
    congregation_id: &str,
    code: &str,
) -> Result<Territory, MapperError> {
    let now = current_timestamp();
    diesel::insert_into(territories::table)
        .values(&NewTerritory {
            id,
            congregation_id,
            code,
            description: None,
            progress: 0,
            created_at: &now,
            updated_at: &now,
        })
        .execute(conn)?;
    territory_queries::require_territory(conn, id)
}

pub fn insert_option(
    conn: &mut SqliteConnection,
    id: &str,
    congregation_id: &str,
    code: &str,
    sequence: i32,
    is_countable: bool,
    is_default: bool,
) -> Result<AddressType, MapperError> {
    let now = current_timestamp();
    options::insert_option(
        conn,
        &NewAddressType {
            id,
            congregation_id,
            code,
            description: None,
            sequence,
            is_countable: i32::from(is_countable),
            is_default: i32::from(is_default),
            created_at: &now,
            updated_at: &now,
        },
    )?;
    options::get_option(conn, id)?
        .ok_or_else(|| MapperError::NotFound(format!("Option {} not found", id)))
}

/// Insert a bare map row with no addresses
pub fn insert_map(
    conn: &mut SqliteConnection,
    id: &str,
    territory: &Territory,
    code: &str,
    map_type: &str,
    floors: i32,
    coordinates: Option<Coordinates>,
) -> Result<Map, MapperError> {
    let now = current_timestamp();
    let coordinates = coordinates.map(|c| serde_json::to_string(&c)).transpose()?;
    maps::insert_map(
        conn,
        &NewMap {
            id,
            congregation_id: &territory.congregation_id,
            territory_id: &territory.id,
            code,
            description: code,
            map_type,
            floors,
            coordinates: coordinates.as_deref(),
            aggregates: None,
            progress: 0,
            created_at: &now,
            updated_at: &now,
        },
    )
}

/// Insert one address with an explicit status and type set, returning its id
#[allow(clippy::too_many_arguments)]
pub fn insert_address_with_status(
    conn: &mut SqliteConnection,
    map: &Map,
    floor: i32,
    code: &str,
    sequence: i32,
    status: &str,
    not_home_tries: i32,
    option_ids: &[&str],
) -> Result<String, MapperError> {
    let now = current_timestamp();
    let id = Uuid::new_v4().to_string();

    diesel::insert_into(addresses::table)
        .values(&NewAddress {
            id: id.clone(),
            congregation_id: &map.congregation_id,
            territory_id: &map.territory_id,
            map_id: &map.id,
            floor,
            code,
            sequence,
            status,
            not_home_tries,
            created_at: &now,
            updated_at: &now,
        })
        .execute(conn)?;

    let links: Vec<AddressOption> = option_ids
        .iter()
        .map(|option_id| AddressOption {
            address_id: id.clone(),
            option_id: option_id.to_string(),
        })
        .collect();
    if !links.is_empty() {
        diesel::insert_into(super::diesel_schema::address_options::table)
            .values(&links)
            .execute(conn)?;
    }

    Ok(id)
}
