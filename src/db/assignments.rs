//! Assignment queries
//!
//! Only `normal` assignments whose `expiry_date` is still in the future count
//! as active; personal and expired ones are ignored by load balancing.

use std::collections::HashMap;

use diesel::prelude::*;

use super::diesel_schema::{assignments, maps};
use super::models::{assignment_types, Assignment, Map, NewAssignment};
use crate::error::MapperError;

/// A map of a territory with its active assignment count
#[derive(Debug, Clone)]
pub struct MapCandidate {
    pub map: Map,
    pub active_assignments: i64,
}

/// Every map of a territory, least loaded first, then least progressed
pub fn map_candidates(
    conn: &mut SqliteConnection,
    territory_id: &str,
    now: &str,
) -> Result<Vec<MapCandidate>, MapperError> {
    let territory_maps: Vec<Map> = maps::table
        .filter(maps::territory_id.eq(territory_id))
        .order(maps::code.asc())
        .load(conn)?;

    if territory_maps.is_empty() {
        return Ok(Vec::new());
    }

    let map_ids: Vec<String> = territory_maps.iter().map(|m| m.id.clone()).collect();
    let counts: HashMap<String, i64> = assignments::table
        .filter(assignments::map_id.eq_any(&map_ids))
        .filter(assignments::assignment_type.eq(assignment_types::NORMAL))
        .filter(assignments::expiry_date.gt(now))
        .group_by(assignments::map_id)
        .select((assignments::map_id, diesel::dsl::count_star()))
        .load::<(String, i64)>(conn)?
        .into_iter()
        .collect();

    let mut candidates: Vec<MapCandidate> = territory_maps
        .into_iter()
        .map(|map| {
            let active_assignments = counts.get(&map.id).copied().unwrap_or(0);
            MapCandidate { map, active_assignments }
        })
        .collect();

    candidates.sort_by_key(|c| (c.active_assignments, c.map.progress));
    Ok(candidates)
}

pub fn insert_assignment(
    conn: &mut SqliteConnection,
    assignment: &NewAssignment<'_>,
) -> Result<(), MapperError> {
    diesel::insert_into(assignments::table)
        .values(assignment)
        .execute(conn)?;
    Ok(())
}

pub fn get_assignment(
    conn: &mut SqliteConnection,
    assignment_id: &str,
) -> Result<Option<Assignment>, MapperError> {
    Ok(assignments::table
        .filter(assignments::id.eq(assignment_id))
        .first(conn)
        .optional()?)
}

/// Publisher labels of the other active assignees of a map
pub fn other_active_publishers(
    conn: &mut SqliteConnection,
    map_id: &str,
    exclude_assignment_id: &str,
    now: &str,
) -> Result<Vec<String>, MapperError> {
    Ok(assignments::table
        .filter(assignments::map_id.eq(map_id))
        .filter(assignments::assignment_type.eq(assignment_types::NORMAL))
        .filter(assignments::id.ne(exclude_assignment_id))
        .filter(assignments::expiry_date.gt(now))
        .order(assignments::created_at.asc())
        .select(assignments::publisher)
        .load(conn)?)
}

/// Delete every assignment whose expiry is before `now`
pub fn delete_expired(conn: &mut SqliteConnection, now: &str) -> Result<usize, MapperError> {
    Ok(diesel::delete(assignments::table.filter(assignments::expiry_date.lt(now))).execute(conn)?)
}
