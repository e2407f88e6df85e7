//! Map queries

use diesel::prelude::*;

use super::diesel_schema::maps;
use super::models::{current_timestamp, Map, NewMap, StatusCounts};
use crate::error::MapperError;

pub fn get_map(conn: &mut SqliteConnection, map_id: &str) -> Result<Option<Map>, MapperError> {
    Ok(maps::table
        .filter(maps::id.eq(map_id))
        .first(conn)
        .optional()?)
}

pub fn require_map(conn: &mut SqliteConnection, map_id: &str) -> Result<Map, MapperError> {
    get_map(conn, map_id)?
        .ok_or_else(|| MapperError::NotFound(format!("Map {} not found", map_id)))
}

/// All maps of a territory, ordered by code
pub fn list_maps_for_territory(
    conn: &mut SqliteConnection,
    territory_id: &str,
) -> Result<Vec<Map>, MapperError> {
    Ok(maps::table
        .filter(maps::territory_id.eq(territory_id))
        .order(maps::code.asc())
        .load(conn)?)
}

/// Ids of every map in a congregation
pub fn list_map_ids_for_congregation(
    conn: &mut SqliteConnection,
    congregation_id: &str,
) -> Result<Vec<String>, MapperError> {
    Ok(maps::table
        .filter(maps::congregation_id.eq(congregation_id))
        .select(maps::id)
        .load(conn)?)
}

pub fn insert_map(conn: &mut SqliteConnection, new_map: &NewMap<'_>) -> Result<Map, MapperError> {
    diesel::insert_into(maps::table).values(new_map).execute(conn)?;
    require_map(conn, new_map.id)
}

/// Overwrite the derived aggregate blob and progress of a map
pub fn update_map_aggregates(
    conn: &mut SqliteConnection,
    map_id: &str,
    counts: &StatusCounts,
    progress: i32,
) -> Result<(), MapperError> {
    let json = serde_json::to_string(counts)?;
    let updated = diesel::update(maps::table.filter(maps::id.eq(map_id)))
        .set((
            maps::aggregates.eq(Some(json)),
            maps::progress.eq(progress),
            maps::updated_at.eq(current_timestamp()),
        ))
        .execute(conn)?;

    if updated == 0 {
        return Err(MapperError::NotFound(format!("Map {} not found", map_id)));
    }
    Ok(())
}

pub fn update_map_territory(
    conn: &mut SqliteConnection,
    map_id: &str,
    territory_id: &str,
) -> Result<usize, MapperError> {
    Ok(diesel::update(maps::table.filter(maps::id.eq(map_id)))
        .set((
            maps::territory_id.eq(territory_id),
            maps::updated_at.eq(current_timestamp()),
        ))
        .execute(conn)?)
}

pub fn update_map_floor_count(
    conn: &mut SqliteConnection,
    map_id: &str,
    floors: i32,
) -> Result<usize, MapperError> {
    Ok(diesel::update(maps::table.filter(maps::id.eq(map_id)))
        .set((
            maps::floors.eq(floors),
            maps::updated_at.eq(current_timestamp()),
        ))
        .execute(conn)?)
}

/// Territories owning a map that changed after `since`
pub fn territories_with_maps_updated_since(
    conn: &mut SqliteConnection,
    since: &str,
) -> Result<Vec<String>, MapperError> {
    Ok(maps::table
        .filter(maps::updated_at.gt(since))
        .select(maps::territory_id)
        .distinct()
        .load(conn)?)
}
