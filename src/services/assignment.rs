//! Assignment service - picks the map a worker should canvass next
//!
//! Selection is a single pass over the territory's maps:
//! 1. fewer active assignments always wins
//! 2. on equal load, a map more than 50 m closer wins
//! 3. within 50 m of each other, lower progress wins
//!
//! Maps without coordinates count as sitting at (0, 0). Maps with malformed
//! stored coordinates are skipped.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::assignments::{self, MapCandidate};
use crate::db::models::{assignment_types, format_timestamp, Coordinates, NewAssignment, StatusCounts};
use crate::db::{territories, MapperDb};
use crate::error::MapperError;

use super::events::{EngineEvent, EventBus};

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Distance under which two maps count as equally close
pub const PROXIMITY_THRESHOLD_METERS: f64 = 50.0;

/// Great-circle distance in meters
pub fn haversine_distance(from: Coordinates, to: Coordinates) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lng = (to.lng - from.lng).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + from.lat.to_radians().cos() * to.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Best candidate for a worker at `origin`, or `None` when no map is
/// selectable. Maps without coordinates sit at (0, 0); maps whose stored
/// coordinates are malformed are skipped.
pub fn find_best_map(candidates: &[MapCandidate], origin: Coordinates) -> Option<&MapCandidate> {
    let mut best: Option<(&MapCandidate, f64)> = None;

    for candidate in candidates {
        let location = match candidate.map.coordinates.as_deref() {
            None => Coordinates::default(),
            Some(raw) => match Coordinates::parse(raw) {
                Ok(location) => location,
                Err(_) => continue,
            },
        };
        let distance = haversine_distance(origin, location);

        let is_better = match best {
            None => true,
            Some((current, best_distance)) => {
                if candidate.active_assignments != current.active_assignments {
                    candidate.active_assignments < current.active_assignments
                } else if distance < best_distance - PROXIMITY_THRESHOLD_METERS {
                    true
                } else if (distance - best_distance).abs() <= PROXIMITY_THRESHOLD_METERS {
                    candidate.map.progress < current.map.progress
                } else {
                    false
                }
            }
        };

        if is_better {
            best = Some((candidate, distance));
        }
    }

    best.map(|(candidate, _)| candidate)
}

/// What a worker receives after being assigned
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentResult {
    pub assignment_id: String,
    pub map_id: String,
    pub map_name: String,
    pub progress: i32,
    pub not_done: i64,
    pub not_home: i64,
    pub coordinates: Coordinates,
    pub other_assignees: Vec<String>,
}

/// Assignment service
pub struct AssignmentService {
    db: Arc<MapperDb>,
    events: Arc<EventBus>,
}

impl AssignmentService {
    pub fn new(db: Arc<MapperDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    /// Choose the best map of a territory and issue a normal assignment on it
    pub fn select_and_assign(
        &self,
        territory_id: &str,
        location: Coordinates,
        publisher: Option<&str>,
        worker_id: Option<&str>,
    ) -> Result<AssignmentResult, MapperError> {
        if territory_id.trim().is_empty() {
            return Err(MapperError::InvalidInput("Territory ID is required".into()));
        }
        if !location.is_valid() {
            return Err(MapperError::InvalidInput(format!(
                "Invalid coordinates: lat {}, lng {}",
                location.lat, location.lng
            )));
        }

        let now = Utc::now();
        let now_text = format_timestamp(now);

        let candidates = self
            .db
            .with_conn(|conn| assignments::map_candidates(conn, territory_id, &now_text))?;
        if candidates.is_empty() {
            return Err(MapperError::NotFound("No maps found for territory".into()));
        }

        let best = find_best_map(&candidates, location)
            .ok_or_else(|| MapperError::NotFound("No suitable map found".into()))?;
        debug!(
            territory = %territory_id,
            map = %best.map.id,
            active = best.active_assignments,
            "Selected map"
        );

        let publisher = publisher.map(str::trim).unwrap_or_default();
        let assignment_id = Uuid::new_v4().to_string();

        let other_assignees = self.db.transaction(|conn| {
            let territory = territories::require_territory(conn, territory_id)?;
            let congregation = territories::require_congregation(conn, &territory.congregation_id)?;
            let hours = congregation
                .expiry_hours
                .unwrap_or(territories::DEFAULT_EXPIRY_HOURS);
            let expiry = format_timestamp(expiry_after(now, hours));

            assignments::insert_assignment(
                conn,
                &NewAssignment {
                    id: &assignment_id,
                    congregation_id: &congregation.id,
                    map_id: &best.map.id,
                    user_id: worker_id,
                    publisher,
                    assignment_type: assignment_types::NORMAL,
                    expiry_date: &expiry,
                    created_at: &now_text,
                },
            )?;

            assignments::other_active_publishers(conn, &best.map.id, &assignment_id, &now_text)
        })?;

        info!(assignment = %assignment_id, map = %best.map.id, "Assignment created");
        self.events.emit(EngineEvent::AssignmentCreated {
            assignment_id: assignment_id.clone(),
            map_id: best.map.id.clone(),
            publisher: publisher.to_string(),
        });

        let aggregates = StatusCounts::parse_or_default(best.map.aggregates.as_deref());
        let coordinates = best
            .map
            .coordinates
            .as_deref()
            .and_then(|raw| Coordinates::parse(raw).ok())
            .unwrap_or_default();

        Ok(AssignmentResult {
            assignment_id,
            map_id: best.map.id.clone(),
            map_name: best.map.description.clone(),
            progress: best.map.progress,
            not_done: aggregates.not_done,
            not_home: aggregates.not_home,
            coordinates,
            other_assignees,
        })
    }

    /// Delete every assignment that expired before `now`
    pub fn expire_assignments(&self, now: DateTime<Utc>) -> Result<usize, MapperError> {
        let now_text = format_timestamp(now);
        let removed = self
            .db
            .transaction(|conn| assignments::delete_expired(conn, &now_text))?;

        if removed > 0 {
            info!(removed, "Expired assignments removed");
        }
        self.events.emit(EngineEvent::AssignmentsExpired { count: removed });
        Ok(removed)
    }
}

fn expiry_after(now: DateTime<Utc>, hours: i32) -> DateTime<Utc> {
    now + Duration::hours(i64::from(hours))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Map;

    fn candidate(id: &str, active: i64, progress: i32, coordinates: Option<&str>) -> MapCandidate {
        MapCandidate {
            map: Map {
                id: id.into(),
                congregation_id: "c".into(),
                territory_id: "t".into(),
                code: id.into(),
                description: id.into(),
                map_type: "single".into(),
                floors: 1,
                coordinates: coordinates.map(String::from),
                aggregates: None,
                progress,
                created_at: String::new(),
                updated_at: String::new(),
            },
            active_assignments: active,
        }
    }

    /// Point `meters` due north of `origin`
    fn north_of(origin: Coordinates, meters: f64) -> String {
        let lat = origin.lat + (meters / EARTH_RADIUS_METERS).to_degrees();
        serde_json::to_string(&Coordinates::new(lat, origin.lng)).unwrap()
    }

    const ORIGIN: Coordinates = Coordinates { lat: 1.3521, lng: 103.8198 };

    #[test]
    fn test_haversine_distance() {
        assert!(haversine_distance(ORIGIN, ORIGIN).abs() < 1e-9);

        let one_degree = haversine_distance(Coordinates::new(0.0, 0.0), Coordinates::new(1.0, 0.0));
        assert!((one_degree - 111_195.0).abs() < 1.0);

        let there = Coordinates::parse(&north_of(ORIGIN, 120.0)).unwrap();
        assert!((haversine_distance(ORIGIN, there) - 120.0).abs() < 0.01);
    }

    #[test]
    fn test_close_maps_tie_break_on_progress() {
        let near = north_of(ORIGIN, 5.0);
        let farther = north_of(ORIGIN, 10.0);
        let candidates = vec![
            candidate("m2", 0, 90, Some(&near)),
            candidate("m1", 0, 40, Some(&farther)),
        ];

        assert_eq!(find_best_map(&candidates, ORIGIN).unwrap().map.id, "m1");
    }

    #[test]
    fn test_distance_beyond_threshold_beats_progress() {
        let near = north_of(ORIGIN, 10.0);
        let far = north_of(ORIGIN, 500.0);
        let candidates = vec![
            candidate("far", 0, 0, Some(&far)),
            candidate("near", 0, 95, Some(&near)),
        ];

        assert_eq!(find_best_map(&candidates, ORIGIN).unwrap().map.id, "near");
    }

    #[test]
    fn test_fewer_assignments_always_wins() {
        let near = north_of(ORIGIN, 1.0);
        let far = north_of(ORIGIN, 5_000.0);
        let candidates = vec![
            candidate("busy", 2, 0, Some(&near)),
            candidate("idle", 0, 99, Some(&far)),
        ];

        assert_eq!(find_best_map(&candidates, ORIGIN).unwrap().map.id, "idle");
    }

    #[test]
    fn test_malformed_coordinates_are_skipped() {
        let ok = north_of(ORIGIN, 20.0);
        let candidates = vec![
            candidate("broken", 0, 0, Some("not json")),
            candidate("good", 1, 50, Some(&ok)),
        ];
        assert_eq!(find_best_map(&candidates, ORIGIN).unwrap().map.id, "good");

        let none = vec![candidate("broken", 0, 0, Some("not json"))];
        assert!(find_best_map(&none, ORIGIN).is_none());
    }

    #[test]
    fn test_missing_coordinates_sit_at_origin() {
        let near_zero = serde_json::to_string(&Coordinates::new(0.0001, 0.0)).unwrap();
        let far = north_of(ORIGIN, 20.0);

        // A map with no location still competes on load
        let candidates = vec![
            candidate("missing", 0, 40, None),
            candidate("busy", 1, 0, Some(&far)),
        ];
        assert_eq!(find_best_map(&candidates, ORIGIN).unwrap().map.id, "missing");

        // Null and {} both sit at (0, 0); within 50 m lower progress wins
        let zero = Coordinates::default();
        let candidates = vec![
            candidate("missing", 0, 40, None),
            candidate("empty", 0, 30, Some("{}")),
            candidate("placed", 0, 35, Some(&near_zero)),
        ];
        assert_eq!(find_best_map(&candidates, zero).unwrap().map.id, "empty");
    }

    #[test]
    fn test_expiry_after_hours() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, 24) - now, Duration::hours(24));
    }
}
