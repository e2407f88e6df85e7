//! Option service - batch maintenance of a congregation's address types
//!
//! A congregation has exactly one default option at all times. The batch is
//! validated before any write and the invariant is checked again inside the
//! transaction, so a violating batch never commits.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use diesel::SqliteConnection;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::models::{current_timestamp, NewAddressType};
use crate::db::{maps, options, territories, MapperDb};
use crate::error::MapperError;

use super::aggregation::{AggregationService, RefreshPlan};
use super::events::{EngineEvent, EventBus};
use super::Committed;

pub const MAX_CODE_LEN: usize = 50;
pub const MAX_DESCRIPTION_LEN: usize = 200;

fn option_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid option code pattern"))
}

/// One entry of an options batch; no `id` means a new option
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptionInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sequence: i32,
    #[serde(default)]
    pub is_countable: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_deleted: bool,
}

impl OptionInput {
    fn existing_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsOutcome {
    pub congregation_id: String,
    pub upserted: usize,
    pub deleted: usize,
    pub default_option_id: String,
    /// Whether address countability may have changed
    pub aggregates_affected: bool,
}

/// Option service
pub struct OptionService {
    db: Arc<MapperDb>,
    events: Arc<EventBus>,
    aggregation: Arc<AggregationService>,
}

impl OptionService {
    pub fn new(db: Arc<MapperDb>, events: Arc<EventBus>, aggregation: Arc<AggregationService>) -> Self {
        Self {
            db,
            events,
            aggregation,
        }
    }

    /// Apply a batch of upserts and deletions to a congregation's options
    pub fn update_options(
        &self,
        congregation_id: &str,
        batch: &[OptionInput],
    ) -> Result<Committed<OptionsOutcome>, MapperError> {
        if congregation_id.trim().is_empty() {
            return Err(MapperError::InvalidInput("congregation cannot be empty".into()));
        }
        validate_batch(batch)?;

        info!(congregation = %congregation_id, options = batch.len(), "Processing options update");
        let (outcome, map_ids) = self.db.transaction(|conn| {
            let outcome = apply_batch(conn, congregation_id, batch)?;
            let map_ids = if outcome.aggregates_affected {
                maps::list_map_ids_for_congregation(conn, congregation_id)?
            } else {
                Vec::new()
            };
            Ok((outcome, map_ids))
        })?;

        self.events.emit(EngineEvent::OptionsUpdated {
            congregation_id: congregation_id.to_string(),
            upserted: outcome.upserted,
            deleted: outcome.deleted,
        });

        let plan = map_ids.into_iter().fold(RefreshPlan::new(), |plan, id| plan.map(id));
        Ok(Committed {
            warnings: self.aggregation.refresh(plan),
            value: outcome,
        })
    }
}

fn apply_batch(
    conn: &mut SqliteConnection,
    congregation_id: &str,
    batch: &[OptionInput],
) -> Result<OptionsOutcome, MapperError> {
    territories::require_congregation(conn, congregation_id)?;

    // Existing options kept by this batch may trade codes and sequences
    let batch_ids: HashSet<&str> = batch
        .iter()
        .filter(|o| !o.is_deleted)
        .filter_map(OptionInput::existing_id)
        .collect();

    let now = current_timestamp();
    let mut default_id: Option<String> = None;
    let mut upserted = 0;
    let mut aggregates_affected = false;

    for input in batch.iter().filter(|o| !o.is_deleted) {
        let code = input.code.trim();
        let description = input
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());
        let existing_id = input.existing_id();

        if let Some(id) = existing_id {
            let current = require_owned(conn, congregation_id, id)?;
            if (current.is_countable != 0) != input.is_countable {
                warn!(option = %id, code = %code, "Option countability changed, aggregates affected");
                aggregates_affected = true;
            }
        }

        if let Some(other) = options::find_by_code(conn, congregation_id, code, existing_id)? {
            if !batch_ids.contains(other.id.as_str()) {
                return Err(MapperError::InvalidInput(format!(
                    "code '{}' already exists for another option (id: {})",
                    code, other.id
                )));
            }
        }
        if let Some(other) = options::find_by_sequence(conn, congregation_id, input.sequence, existing_id)? {
            if !batch_ids.contains(other.id.as_str()) {
                return Err(MapperError::InvalidInput(format!(
                    "sequence {} already exists for another option (id: {})",
                    input.sequence, other.id
                )));
            }
        }

        let id = match existing_id {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };

        if input.is_default {
            options::clear_defaults(conn, congregation_id, Some(&id))?;
        }

        if existing_id.is_some() {
            options::update_option(
                conn,
                &id,
                code,
                description,
                input.sequence,
                input.is_countable,
                input.is_default,
            )?;
        } else {
            options::insert_option(
                conn,
                &NewAddressType {
                    id: &id,
                    congregation_id,
                    code,
                    description,
                    sequence: input.sequence,
                    is_countable: i32::from(input.is_countable),
                    is_default: i32::from(input.is_default),
                    created_at: &now,
                    updated_at: &now,
                },
            )?;
        }
        upserted += 1;

        if input.is_default {
            default_id = Some(id);
        }
    }

    let default_id =
        default_id.ok_or_else(|| MapperError::Invariant("no default option was set".into()))?;

    let mut deleted = 0;
    for id in batch
        .iter()
        .filter(|o| o.is_deleted)
        .filter_map(OptionInput::existing_id)
    {
        require_owned(conn, congregation_id, id)?;
        let relinked = options::add_replacement_type(conn, congregation_id, id, &default_id)?;
        options::delete_option(conn, id)?;
        info!(option = %id, relinked, "Option deleted, addresses moved to default");
        aggregates_affected = true;
        deleted += 1;
    }

    let defaults = options::count_defaults(conn, congregation_id)?;
    if defaults != 1 {
        return Err(MapperError::Invariant(format!(
            "Congregation {} must have exactly one default option, found {}",
            congregation_id, defaults
        )));
    }

    Ok(OptionsOutcome {
        congregation_id: congregation_id.to_string(),
        upserted,
        deleted,
        default_option_id: default_id,
        aggregates_affected,
    })
}

fn require_owned(
    conn: &mut SqliteConnection,
    congregation_id: &str,
    option_id: &str,
) -> Result<crate::db::models::AddressType, MapperError> {
    let option = options::get_option(conn, option_id)?
        .ok_or_else(|| MapperError::NotFound(format!("option not found: {}", option_id)))?;
    if option.congregation_id != congregation_id {
        return Err(MapperError::InvalidInput(format!(
            "option {} does not belong to congregation {}",
            option_id, congregation_id
        )));
    }
    Ok(option)
}

fn validate_option(input: &OptionInput) -> Result<(), String> {
    let code = input.code.trim();
    if code.is_empty() {
        return Err("code cannot be empty".into());
    }
    if code.chars().count() > MAX_CODE_LEN {
        return Err(format!("code cannot exceed {} characters", MAX_CODE_LEN));
    }
    if !option_code_pattern().is_match(code) {
        return Err("code can only contain letters, numbers, underscores, and hyphens".into());
    }
    if let Some(description) = &input.description {
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(format!(
                "description cannot exceed {} characters",
                MAX_DESCRIPTION_LEN
            ));
        }
    }
    if input.sequence < 0 {
        return Err("sequence cannot be negative".into());
    }
    Ok(())
}

/// Check the batch on its own before touching the store
fn validate_batch(batch: &[OptionInput]) -> Result<(), MapperError> {
    let mut codes = HashSet::new();
    let mut sequences = HashSet::new();
    let mut defaults = 0;

    for (i, input) in batch.iter().enumerate() {
        if input.is_deleted {
            continue;
        }
        validate_option(input)
            .map_err(|e| MapperError::InvalidInput(format!("option at index {}: {}", i, e)))?;

        let code = input.code.trim();
        if !codes.insert(code) {
            return Err(MapperError::InvalidInput(format!(
                "duplicate code in payload: {}",
                code
            )));
        }
        if !sequences.insert(input.sequence) {
            return Err(MapperError::InvalidInput(format!(
                "duplicate sequence in payload: {}",
                input.sequence
            )));
        }
        if input.is_default {
            defaults += 1;
        }
    }

    if defaults != 1 {
        return Err(MapperError::InvalidInput(
            "exactly one option must be marked as default".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(code: &str, sequence: i32, is_default: bool) -> OptionInput {
        OptionInput {
            code: code.into(),
            sequence,
            is_default,
            is_countable: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_batch_requires_one_default() {
        assert!(validate_batch(&[option("HDB", 1, true), option("BIZ", 2, false)]).is_ok());
        assert!(validate_batch(&[option("HDB", 1, false)]).is_err());
        assert!(validate_batch(&[option("HDB", 1, true), option("BIZ", 2, true)]).is_err());
    }

    #[test]
    fn test_validate_batch_rejects_duplicates() {
        let err = validate_batch(&[option("HDB", 1, true), option("HDB", 2, false)]).unwrap_err();
        assert!(err.to_string().contains("duplicate code"));

        let err = validate_batch(&[option("HDB", 1, true), option("BIZ", 1, false)]).unwrap_err();
        assert!(err.to_string().contains("duplicate sequence"));
    }

    #[test]
    fn test_validate_batch_ignores_deleted_entries() {
        let deleted = OptionInput {
            id: Some("o-old".into()),
            code: "bad code!".into(),
            is_deleted: true,
            ..Default::default()
        };
        assert!(validate_batch(&[option("HDB", 1, true), deleted]).is_ok());
    }

    #[test]
    fn test_validate_option_fields() {
        assert!(validate_option(&option("under_score-1", 0, false)).is_ok());
        assert!(validate_option(&option("  ", 0, false)).is_err());
        assert!(validate_option(&option("has space", 0, false)).is_err());
        assert!(validate_option(&option(&"X".repeat(51), 0, false)).is_err());
        assert!(validate_option(&option("OK", -1, false)).is_err());

        let long_description = OptionInput {
            description: Some("d".repeat(201)),
            ..option("OK", 0, false)
        };
        let err = validate_option(&long_description).unwrap_err();
        assert!(err.contains("description"));
    }
}
