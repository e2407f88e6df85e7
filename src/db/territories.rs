//! Congregation and territory queries

use diesel::prelude::*;

use super::diesel_schema::{congregations, territories};
use super::models::{current_timestamp, Congregation, Territory};
use crate::error::MapperError;

/// Assignment lifetime used when a congregation has none configured
pub const DEFAULT_EXPIRY_HOURS: i32 = 24;

pub fn get_congregation(
    conn: &mut SqliteConnection,
    congregation_id: &str,
) -> Result<Option<Congregation>, MapperError> {
    Ok(congregations::table
        .filter(congregations::id.eq(congregation_id))
        .first(conn)
        .optional()?)
}

pub fn require_congregation(
    conn: &mut SqliteConnection,
    congregation_id: &str,
) -> Result<Congregation, MapperError> {
    get_congregation(conn, congregation_id)?
        .ok_or_else(|| MapperError::NotFound(format!("Congregation {} not found", congregation_id)))
}

pub fn get_territory(
    conn: &mut SqliteConnection,
    territory_id: &str,
) -> Result<Option<Territory>, MapperError> {
    Ok(territories::table
        .filter(territories::id.eq(territory_id))
        .first(conn)
        .optional()?)
}

pub fn require_territory(
    conn: &mut SqliteConnection,
    territory_id: &str,
) -> Result<Territory, MapperError> {
    get_territory(conn, territory_id)?
        .ok_or_else(|| MapperError::NotFound(format!("Territory {} not found", territory_id)))
}

/// Write a recomputed progress percentage onto a territory
pub fn update_territory_progress(
    conn: &mut SqliteConnection,
    territory_id: &str,
    progress: i32,
) -> Result<(), MapperError> {
    let updated = diesel::update(territories::table.filter(territories::id.eq(territory_id)))
        .set((
            territories::progress.eq(progress),
            territories::updated_at.eq(current_timestamp()),
        ))
        .execute(conn)?;

    if updated == 0 {
        return Err(MapperError::NotFound(format!("Territory {} not found", territory_id)));
    }
    Ok(())
}
