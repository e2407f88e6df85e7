//! Structure service - changes the shape of a map's address grid
//!
//! Every operation validates its input, runs all of its row writes in one
//! transaction, then executes the returned [`RefreshPlan`] after commit.
//! A map always keeps at least one floor and one code.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use diesel::SqliteConnection;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::addresses::{self, AddressScope};
use crate::db::models::{
    address_statuses, current_timestamp, map_types, Coordinates, Map, NewAddress, NewMap,
};
use crate::db::{maps, options, territories, MapperDb};
use crate::error::MapperError;

use super::aggregation::{AggregationService, RefreshPlan};
use super::events::{EngineEvent, EventBus};
use super::Committed;

/// Upper bound on floors per map
pub const MAX_FLOORS: i32 = 200;

/// Address codes: letters, digits and hyphens
pub fn code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("valid address code pattern"))
}

// ============================================================================
// Inputs and outputs
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FloorChange {
    pub map_id: String,
    pub floor: i32,
    pub addresses: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCodesOutcome {
    pub requested: usize,
    pub inserted: usize,
    pub skipped: usize,
    /// Address rows created across all floors
    pub created: usize,
    pub existing_codes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeRemoval {
    pub map_id: String,
    pub code: String,
    pub addresses: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSequence {
    pub code: String,
    pub sequence: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceUpdate {
    pub map_id: String,
    pub codes: usize,
    pub addresses: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reassignment {
    pub map_id: String,
    pub from_territory: String,
    pub to_territory: String,
    pub addresses: usize,
}

/// Request to create a map and its address grid
#[derive(Debug, Clone, Deserialize)]
pub struct NewMapInput {
    pub territory_id: String,
    pub congregation_id: String,
    pub code: String,
    #[serde(default)]
    pub name: String,
    pub map_type: String,
    pub floors: i32,
    /// Comma-separated address codes in sequence order
    pub sequence: String,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetOutcome {
    pub scope_id: String,
    pub reset: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOutcome {
    pub address_id: String,
    pub map_id: String,
    pub status: String,
    pub not_home_tries: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapCodes {
    pub map_id: String,
    #[serde(rename = "type")]
    pub map_type: String,
    pub codes: Vec<String>,
}

// ============================================================================
// Service
// ============================================================================

/// Structure service
pub struct StructureService {
    db: Arc<MapperDb>,
    events: Arc<EventBus>,
    aggregation: Arc<AggregationService>,
}

impl StructureService {
    pub fn new(db: Arc<MapperDb>, events: Arc<EventBus>, aggregation: Arc<AggregationService>) -> Self {
        Self {
            db,
            events,
            aggregation,
        }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Distinct codes of a map in sequence order
    pub fn map_codes(&self, map_id: &str) -> Result<MapCodes, MapperError> {
        require_id(map_id, "Map ID")?;
        self.db.with_conn(|conn| {
            let map = maps::require_map(conn, map_id)?;
            let codes = addresses::codes_in_order(conn, map_id)?;
            Ok(MapCodes {
                map_id: map.id,
                map_type: map.map_type,
                codes,
            })
        })
    }

    // =========================================================================
    // Floors
    // =========================================================================

    /// Copy the top (or bottom) floor onto a new floor above (or below) it
    pub fn add_floor(&self, map_id: &str, add_higher: bool) -> Result<Committed<FloorChange>, MapperError> {
        require_id(map_id, "Map ID")?;

        let change = self.db.transaction(|conn| add_floor(conn, map_id, add_higher))?;
        info!(map = %map_id, floor = change.floor, rows = change.addresses, "Floor added");
        self.events.emit(EngineEvent::MapShapeChanged {
            map_id: map_id.to_string(),
            change: "floor_added",
            rows: change.addresses,
        });

        Ok(self.commit(change, RefreshPlan::new().map(map_id)))
    }

    /// Delete every address on one floor; the last floor cannot go
    pub fn remove_floor(&self, map_id: &str, floor: i32) -> Result<Committed<FloorChange>, MapperError> {
        require_id(map_id, "Map ID")?;

        let change = self.db.transaction(|conn| {
            maps::require_map(conn, map_id)?;
            let floor_count = addresses::count_floors(conn, map_id)?;
            if floor_count <= 1 {
                return Err(MapperError::Invariant("Cannot delete the last floor".into()));
            }

            let ids = addresses::address_ids_on_floor(conn, map_id, floor)?;
            if ids.is_empty() {
                return Err(MapperError::NotFound(format!(
                    "Floor {} not found in map {}",
                    floor, map_id
                )));
            }

            let removed = addresses::delete_addresses(conn, &ids)?;
            maps::update_map_floor_count(conn, map_id, (floor_count - 1) as i32)?;
            Ok(FloorChange {
                map_id: map_id.to_string(),
                floor,
                addresses: removed,
            })
        })?;

        info!(map = %map_id, floor, rows = change.addresses, "Floor removed");
        self.events.emit(EngineEvent::MapShapeChanged {
            map_id: map_id.to_string(),
            change: "floor_removed",
            rows: change.addresses,
        });

        Ok(self.commit(change, RefreshPlan::new().map(map_id)))
    }

    // =========================================================================
    // Codes
    // =========================================================================

    /// Add codes on every floor. The request is validated strictly; codes
    /// already on the map are skipped and reported.
    pub fn add_address_codes(
        &self,
        map_id: &str,
        codes: &[String],
    ) -> Result<Committed<AddCodesOutcome>, MapperError> {
        require_id(map_id, "Map ID")?;
        validate_new_codes(codes)?;

        let outcome = self.db.transaction(|conn| add_address_codes(conn, map_id, codes))?;
        info!(
            map = %map_id,
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            rows = outcome.created,
            "Address codes added"
        );

        let plan = if outcome.created > 0 {
            self.events.emit(EngineEvent::MapShapeChanged {
                map_id: map_id.to_string(),
                change: "codes_added",
                rows: outcome.created,
            });
            RefreshPlan::new().map(map_id)
        } else {
            RefreshPlan::new()
        };

        Ok(self.commit(outcome, plan))
    }

    /// Delete every address carrying `code`; the last code cannot go
    pub fn delete_address_code(&self, map_id: &str, code: &str) -> Result<Committed<CodeRemoval>, MapperError> {
        require_id(map_id, "Map ID")?;
        require_id(code, "Code")?;

        let removal = self.db.transaction(|conn| {
            maps::require_map(conn, map_id)?;
            let ids = addresses::address_ids_with_code(conn, map_id, code)?;
            if ids.is_empty() {
                return Err(MapperError::NotFound(format!(
                    "Code {} not found in map {}",
                    code, map_id
                )));
            }
            if addresses::count_codes(conn, map_id)? <= 1 {
                return Err(MapperError::Invariant("Cannot delete the last address code".into()));
            }

            let removed = addresses::delete_addresses(conn, &ids)?;
            Ok(CodeRemoval {
                map_id: map_id.to_string(),
                code: code.to_string(),
                addresses: removed,
            })
        })?;

        info!(map = %map_id, code = %code, rows = removal.addresses, "Address code deleted");
        self.events.emit(EngineEvent::MapShapeChanged {
            map_id: map_id.to_string(),
            change: "code_deleted",
            rows: removal.addresses,
        });

        Ok(self.commit(removal, RefreshPlan::new().map(map_id)))
    }

    /// Renumber codes; one unknown code rolls the whole batch back
    pub fn update_sequence(
        &self,
        map_id: &str,
        updates: &[CodeSequence],
    ) -> Result<Committed<SequenceUpdate>, MapperError> {
        require_id(map_id, "Map ID")?;
        if updates.is_empty() {
            return Err(MapperError::InvalidInput("codes array is required".into()));
        }
        for (i, update) in updates.iter().enumerate() {
            if update.code.trim().is_empty() {
                return Err(MapperError::InvalidInput(format!(
                    "Invalid code at index {}: must be non-empty string",
                    i
                )));
            }
            if update.sequence < 0 {
                return Err(MapperError::InvalidInput(format!(
                    "Invalid sequence at index {}: cannot be negative",
                    i
                )));
            }
        }

        debug!(map = %map_id, codes = updates.len(), "Updating sequences");
        let result = self.db.transaction(|conn| {
            maps::require_map(conn, map_id)?;
            let mut touched = 0;
            for update in updates {
                let rows = addresses::update_code_sequence(conn, map_id, &update.code, update.sequence)?;
                if rows == 0 {
                    return Err(MapperError::NotFound(format!(
                        "Code {} not found in map {}",
                        update.code, map_id
                    )));
                }
                touched += rows;
            }
            Ok(SequenceUpdate {
                map_id: map_id.to_string(),
                codes: updates.len(),
                addresses: touched,
            })
        })?;

        self.events.emit(EngineEvent::MapShapeChanged {
            map_id: map_id.to_string(),
            change: "sequence_updated",
            rows: result.addresses,
        });

        // Ordering only; aggregates are unaffected
        Ok(self.commit(result, RefreshPlan::new()))
    }

    // =========================================================================
    // Maps
    // =========================================================================

    /// Move a map and all of its addresses to another territory
    pub fn reassign_territory(
        &self,
        map_id: &str,
        old_territory_id: &str,
        new_territory_id: &str,
    ) -> Result<Committed<Reassignment>, MapperError> {
        require_id(map_id, "Map ID")?;
        require_id(old_territory_id, "Old territory ID")?;
        require_id(new_territory_id, "New territory ID")?;
        if old_territory_id == new_territory_id {
            return Err(MapperError::InvalidInput(
                "Old and new territory must differ".into(),
            ));
        }

        let moved = self.db.transaction(|conn| {
            let map = maps::require_map(conn, map_id)?;
            if map.territory_id != old_territory_id {
                return Err(MapperError::InvalidInput(format!(
                    "Map {} does not belong to territory {}",
                    map_id, old_territory_id
                )));
            }

            let target = territories::require_territory(conn, new_territory_id)?;
            if target.congregation_id != map.congregation_id {
                return Err(MapperError::InvalidInput(format!(
                    "Territory {} belongs to another congregation",
                    new_territory_id
                )));
            }

            let moved = addresses::move_map_addresses(conn, map_id, new_territory_id)?;
            maps::update_map_territory(conn, map_id, new_territory_id)?;
            Ok(moved)
        })?;

        info!(map = %map_id, from = %old_territory_id, to = %new_territory_id, "Map territory updated");
        self.events.emit(EngineEvent::MapReassigned {
            map_id: map_id.to_string(),
            from_territory: old_territory_id.to_string(),
            to_territory: new_territory_id.to_string(),
        });

        let plan = RefreshPlan::new()
            .territory(old_territory_id)
            .territory(new_territory_id);
        Ok(self.commit(
            Reassignment {
                map_id: map_id.to_string(),
                from_territory: old_territory_id.to_string(),
                to_territory: new_territory_id.to_string(),
                addresses: moved,
            },
            plan,
        ))
    }

    /// Create a map with one address per floor and code
    pub fn create_map(&self, input: &NewMapInput) -> Result<Committed<Map>, MapperError> {
        let codes = validate_new_map(input)?;

        let (map, rows) = self.db.transaction(|conn| create_map(conn, input, &codes))?;
        info!(map = %map.id, territory = %map.territory_id, rows, "Map created");
        self.events.emit(EngineEvent::MapCreated {
            map_id: map.id.clone(),
            territory_id: map.territory_id.clone(),
            addresses: rows,
        });

        let plan = RefreshPlan::new().map(map.id.clone());
        let committed = self.commit((), plan);

        // Return the row as refreshed, falling back to the inserted one
        let map = self
            .db
            .with_conn(|conn| maps::get_map(conn, &map.id))
            .ok()
            .flatten()
            .unwrap_or(map);
        Ok(Committed {
            value: map,
            warnings: committed.warnings,
        })
    }

    // =========================================================================
    // Statuses
    // =========================================================================

    /// Send every done / not-home address of a map back to not_done
    pub fn reset_map(&self, map_id: &str, acting_user: &str) -> Result<Committed<ResetOutcome>, MapperError> {
        require_id(map_id, "Map ID")?;
        require_id(acting_user, "Acting user")?;

        let reset = self.db.transaction(|conn| {
            maps::require_map(conn, map_id)?;
            addresses::reset_statuses(conn, AddressScope::Map(map_id), acting_user)
        })?;

        info!(map = %map_id, reset, user = %acting_user, "Map reset");
        self.events.emit(EngineEvent::StatusesReset {
            scope_id: map_id.to_string(),
            count: reset,
        });

        Ok(self.commit(
            ResetOutcome {
                scope_id: map_id.to_string(),
                reset,
            },
            RefreshPlan::new().map(map_id),
        ))
    }

    /// Reset a whole territory, then refresh each map and the territory once
    pub fn reset_territory(
        &self,
        territory_id: &str,
        acting_user: &str,
    ) -> Result<Committed<ResetOutcome>, MapperError> {
        require_id(territory_id, "Territory ID")?;
        require_id(acting_user, "Acting user")?;

        let (reset, map_ids) = self.db.transaction(|conn| {
            territories::require_territory(conn, territory_id)?;
            let reset = addresses::reset_statuses(conn, AddressScope::Territory(territory_id), acting_user)?;
            let map_ids: Vec<String> = maps::list_maps_for_territory(conn, territory_id)?
                .into_iter()
                .map(|m| m.id)
                .collect();
            Ok((reset, map_ids))
        })?;

        info!(territory = %territory_id, reset, user = %acting_user, "Territory reset");
        self.events.emit(EngineEvent::StatusesReset {
            scope_id: territory_id.to_string(),
            count: reset,
        });

        let plan = map_ids
            .into_iter()
            .fold(RefreshPlan::new(), |plan, id| plan.map_only(id))
            .territory(territory_id);
        Ok(self.commit(
            ResetOutcome {
                scope_id: territory_id.to_string(),
                reset,
            },
            plan,
        ))
    }

    /// Record one call outcome on an address
    pub fn record_call(
        &self,
        address_id: &str,
        status: &str,
        acting_user: &str,
        notes: Option<&str>,
    ) -> Result<Committed<CallOutcome>, MapperError> {
        require_id(address_id, "Address ID")?;
        require_id(acting_user, "Acting user")?;
        if !address_statuses::is_valid(status) {
            return Err(MapperError::InvalidInput(format!("Invalid status: {}", status)));
        }

        let outcome = self.db.transaction(|conn| {
            let mut address = addresses::require_address(conn, address_id)?;
            apply_call(&mut address.status, &mut address.not_home_tries, &mut address.dnc_time, status);
            if let Some(notes) = notes {
                let notes = Some(notes.to_string()).filter(|n| !n.trim().is_empty());
                if notes != address.notes {
                    address.notes = notes;
                    address.last_notes_updated = Some(current_timestamp());
                    address.last_notes_updated_by = Some(acting_user.to_string());
                }
            }
            addresses::update_call_outcome(conn, &address, acting_user)?;

            Ok(CallOutcome {
                address_id: address.id,
                map_id: address.map_id,
                status: address.status,
                not_home_tries: address.not_home_tries,
            })
        })?;

        debug!(address = %address_id, status = %status, tries = outcome.not_home_tries, "Call recorded");
        self.events.emit(EngineEvent::CallRecorded {
            address_id: outcome.address_id.clone(),
            map_id: outcome.map_id.clone(),
            status: outcome.status.clone(),
        });

        let plan = RefreshPlan::new().map(outcome.map_id.clone());
        Ok(self.commit(outcome, plan))
    }

    fn commit<T>(&self, value: T, plan: RefreshPlan) -> Committed<T> {
        Committed {
            value,
            warnings: self.aggregation.refresh(plan),
        }
    }
}

// ============================================================================
// Transaction bodies
// ============================================================================

fn add_floor(conn: &mut SqliteConnection, map_id: &str, add_higher: bool) -> Result<FloorChange, MapperError> {
    let map = maps::require_map(conn, map_id)?;
    if map.map_type == map_types::SINGLE {
        return Err(MapperError::Invariant("A single map has exactly one floor".into()));
    }
    let floors = addresses::distinct_floors(conn, map_id)?;
    if floors.len() >= MAX_FLOORS as usize {
        return Err(MapperError::Invariant(format!(
            "A map cannot have more than {} floors",
            MAX_FLOORS
        )));
    }

    let (Some(&lowest), Some(&highest)) = (floors.first(), floors.last()) else {
        return Err(MapperError::Invariant(format!(
            "Map {} has no addresses to copy onto a new floor",
            map_id
        )));
    };

    let (reference, floor) = if add_higher {
        (highest, highest + 1)
    } else {
        // There is no floor 0
        let below = lowest - 1;
        (lowest, if below == 0 { -1 } else { below })
    };

    let default_type = options::require_default_option(conn, &map.congregation_id)?;
    let template = addresses::addresses_on_floor(conn, map_id, reference)?;
    let now = current_timestamp();

    let rows: Vec<NewAddress<'_>> = template
        .iter()
        .map(|address| NewAddress {
            id: Uuid::new_v4().to_string(),
            congregation_id: &map.congregation_id,
            territory_id: &map.territory_id,
            map_id: &map.id,
            floor,
            code: &address.code,
            sequence: address.sequence,
            status: address_statuses::NOT_DONE,
            not_home_tries: 0,
            created_at: &now,
            updated_at: &now,
        })
        .collect();

    let inserted = addresses::insert_addresses(conn, &rows, &default_type.id)?;
    maps::update_map_floor_count(conn, map_id, floors.len() as i32 + 1)?;

    Ok(FloorChange {
        map_id: map.id.clone(),
        floor,
        addresses: inserted,
    })
}

fn add_address_codes(
    conn: &mut SqliteConnection,
    map_id: &str,
    codes: &[String],
) -> Result<AddCodesOutcome, MapperError> {
    let map = maps::require_map(conn, map_id)?;
    let existing: HashSet<String> = addresses::codes_in_order(conn, map_id)?.into_iter().collect();

    let (existing_codes, new_codes): (Vec<String>, Vec<String>) =
        codes.iter().cloned().partition(|code| existing.contains(code));

    let mut outcome = AddCodesOutcome {
        requested: codes.len(),
        inserted: new_codes.len(),
        skipped: existing_codes.len(),
        created: 0,
        existing_codes,
    };
    if new_codes.is_empty() {
        return Ok(outcome);
    }

    let mut floors = addresses::distinct_floors(conn, map_id)?;
    if floors.is_empty() {
        floors = (1..=map.floors.max(1)).collect();
    }

    let start = addresses::max_sequence(conn, map_id)?;
    let default_type = options::require_default_option(conn, &map.congregation_id)?;
    let now = current_timestamp();

    let mut rows: Vec<NewAddress<'_>> = Vec::with_capacity(new_codes.len() * floors.len());
    for (offset, code) in new_codes.iter().enumerate() {
        let sequence = i32::try_from(offset)
            .ok()
            .and_then(|offset| start.checked_add(offset))
            .and_then(|sequence| sequence.checked_add(1))
            .ok_or_else(|| MapperError::InvalidInput("sequence space exhausted".into()))?;
        for &floor in &floors {
            rows.push(NewAddress {
                id: Uuid::new_v4().to_string(),
                congregation_id: &map.congregation_id,
                territory_id: &map.territory_id,
                map_id: &map.id,
                floor,
                code: code.as_str(),
                sequence,
                status: address_statuses::NOT_DONE,
                not_home_tries: 0,
                created_at: &now,
                updated_at: &now,
            });
        }
    }

    outcome.created = addresses::insert_addresses(conn, &rows, &default_type.id)?;
    Ok(outcome)
}

fn create_map(
    conn: &mut SqliteConnection,
    input: &NewMapInput,
    codes: &[&str],
) -> Result<(Map, usize), MapperError> {
    let territory = territories::require_territory(conn, &input.territory_id)?;
    if territory.congregation_id != input.congregation_id {
        return Err(MapperError::InvalidInput(format!(
            "Territory {} does not belong to congregation {}",
            input.territory_id, input.congregation_id
        )));
    }

    let default_type = options::require_default_option(conn, &input.congregation_id)?;
    let map_id = Uuid::new_v4().to_string();
    let now = current_timestamp();
    let coordinates = input.coordinates.map(|c| serde_json::to_string(&c)).transpose()?;
    let name = if input.name.trim().is_empty() {
        input.code.trim()
    } else {
        input.name.trim()
    };

    let map = maps::insert_map(
        conn,
        &NewMap {
            id: &map_id,
            congregation_id: &input.congregation_id,
            territory_id: &input.territory_id,
            code: input.code.trim(),
            description: name,
            map_type: &input.map_type,
            floors: input.floors,
            coordinates: coordinates.as_deref(),
            aggregates: None,
            progress: 0,
            created_at: &now,
            updated_at: &now,
        },
    )?;

    let mut rows: Vec<NewAddress<'_>> = Vec::with_capacity(codes.len() * input.floors as usize);
    for floor in 1..=input.floors {
        for (index, code) in codes.iter().enumerate() {
            rows.push(NewAddress {
                id: Uuid::new_v4().to_string(),
                congregation_id: &input.congregation_id,
                territory_id: &input.territory_id,
                map_id: &map_id,
                floor,
                code: *code,
                sequence: index as i32 + 1,
                status: address_statuses::NOT_DONE,
                not_home_tries: 0,
                created_at: &now,
                updated_at: &now,
            });
        }
    }

    let inserted = addresses::insert_addresses(conn, &rows, &default_type.id)?;
    Ok((map, inserted))
}

/// Move an address along the call state machine
fn apply_call(status: &mut String, tries: &mut i32, dnc_time: &mut Option<String>, next: &str) {
    match next {
        address_statuses::NOT_HOME => *tries += 1,
        address_statuses::DO_NOT_CALL if status.as_str() != address_statuses::DO_NOT_CALL => {
            *dnc_time = Some(current_timestamp());
        }
        _ => {}
    }
    *status = next.to_string();
}

// ============================================================================
// Validation
// ============================================================================

fn require_id(value: &str, what: &str) -> Result<(), MapperError> {
    if value.trim().is_empty() {
        return Err(MapperError::InvalidInput(format!("{} is required", what)));
    }
    Ok(())
}

fn validate_new_codes(codes: &[String]) -> Result<(), MapperError> {
    if codes.is_empty() {
        return Err(MapperError::InvalidInput(
            "codes array is required and cannot be empty".into(),
        ));
    }

    let mut seen = HashSet::new();
    for (i, code) in codes.iter().enumerate() {
        if code.is_empty() {
            return Err(MapperError::InvalidInput(format!(
                "Invalid code at index {}: must be non-empty string",
                i
            )));
        }
        if !code_pattern().is_match(code) {
            return Err(MapperError::InvalidInput(format!(
                "Invalid code at index {}: '{}' must contain only alphanumeric characters and hyphens",
                i, code
            )));
        }
        if !seen.insert(code.as_str()) {
            return Err(MapperError::InvalidInput(format!(
                "Duplicate code in request: '{}'",
                code
            )));
        }
    }
    Ok(())
}

/// Validate a new map request and split its code list
fn validate_new_map(input: &NewMapInput) -> Result<Vec<&str>, MapperError> {
    require_id(&input.territory_id, "Territory ID")?;
    require_id(&input.congregation_id, "Congregation ID")?;
    require_id(&input.code, "Map code")?;

    if !map_types::is_valid(&input.map_type) {
        return Err(MapperError::InvalidInput(format!("Invalid map type: {}", input.map_type)));
    }
    if input.floors < 1 {
        return Err(MapperError::InvalidInput("A map needs at least one floor".into()));
    }
    if input.floors > MAX_FLOORS {
        return Err(MapperError::InvalidInput(format!(
            "A map cannot have more than {} floors",
            MAX_FLOORS
        )));
    }
    if input.map_type == map_types::SINGLE && input.floors != 1 {
        return Err(MapperError::InvalidInput("Invalid floor for single map".into()));
    }
    if let Some(coordinates) = input.coordinates {
        if !coordinates.is_valid() {
            return Err(MapperError::InvalidInput("Invalid coordinates".into()));
        }
    }

    let codes: Vec<&str> = input.sequence.split(',').collect();
    let mut seen = HashSet::new();
    for code in &codes {
        if !code_pattern().is_match(code) {
            return Err(MapperError::InvalidInput("Invalid sequence format".into()));
        }
        if !seen.insert(*code) {
            return Err(MapperError::InvalidInput(format!("Duplicate code in sequence: '{}'", code)));
        }
    }
    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_map_input(map_type: &str, floors: i32, sequence: &str) -> NewMapInput {
        NewMapInput {
            territory_id: "t1".into(),
            congregation_id: "c1".into(),
            code: "M1".into(),
            name: "Block 1".into(),
            map_type: map_type.into(),
            floors,
            sequence: sequence.into(),
            coordinates: None,
        }
    }

    #[test]
    fn test_code_pattern() {
        assert!(code_pattern().is_match("A1"));
        assert!(code_pattern().is_match("12-B"));
        assert!(!code_pattern().is_match("A 1"));
        assert!(!code_pattern().is_match("A_1"));
        assert!(!code_pattern().is_match(""));
    }

    #[test]
    fn test_validate_new_codes_reports_index() {
        let codes = vec!["A1".to_string(), "B 2".to_string()];
        let err = validate_new_codes(&codes).unwrap_err();
        assert!(err.to_string().contains("index 1"));

        let dupes = vec!["A1".to_string(), "A1".to_string()];
        assert!(validate_new_codes(&dupes).unwrap_err().to_string().contains("Duplicate"));

        assert!(validate_new_codes(&[]).is_err());
    }

    #[test]
    fn test_validate_new_map() {
        assert_eq!(
            validate_new_map(&new_map_input("multi", 3, "1,2,3A")).unwrap(),
            vec!["1", "2", "3A"]
        );
        assert!(validate_new_map(&new_map_input("single", 2, "1")).is_err());
        assert!(validate_new_map(&new_map_input("multi", MAX_FLOORS, "1")).is_ok());
        assert!(matches!(
            validate_new_map(&new_map_input("multi", MAX_FLOORS + 1, "1")),
            Err(MapperError::InvalidInput(_))
        ));
        assert!(validate_new_map(&new_map_input("multi", i32::MAX, "1")).is_err());
        assert!(validate_new_map(&new_map_input("tower", 1, "1")).is_err());
        assert!(validate_new_map(&new_map_input("single", 1, "")).is_err());
        assert!(validate_new_map(&new_map_input("single", 1, "1,,2")).is_err());
        assert!(validate_new_map(&new_map_input("single", 1, "1,2,")).is_err());
        assert!(validate_new_map(&new_map_input("single", 1, "1,1")).is_err());
    }

    #[test]
    fn test_apply_call_transitions() {
        let mut status = address_statuses::NOT_DONE.to_string();
        let mut tries = 0;
        let mut dnc_time = None;

        apply_call(&mut status, &mut tries, &mut dnc_time, address_statuses::NOT_HOME);
        apply_call(&mut status, &mut tries, &mut dnc_time, address_statuses::NOT_HOME);
        assert_eq!(status, "not_home");
        assert_eq!(tries, 2);

        apply_call(&mut status, &mut tries, &mut dnc_time, address_statuses::DONE);
        assert_eq!(status, "done");
        assert_eq!(tries, 2);
        assert!(dnc_time.is_none());

        apply_call(&mut status, &mut tries, &mut dnc_time, address_statuses::DO_NOT_CALL);
        assert_eq!(status, "do_not_call");
        assert!(dnc_time.is_some());
    }
}
