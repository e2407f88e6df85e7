//! Aggregation service - status counts and progress for maps and territories
//!
//! Both recomputes are read-then-overwrite and depend only on the current
//! address rows, so running one twice changes nothing.
//!
//! Mutations never recompute inside their own transaction. They hand back a
//! [`RefreshPlan`] that is executed here after commit; a target that fails is
//! logged, reported as a warning and parked in [`StaleViews`] until the
//! scheduled sweep retries it.

use std::fmt;
use std::sync::Arc;

use dashmap::DashSet;
use serde::Serialize;
use tracing::{debug, warn};

use crate::db::addresses::{self, AddressScope};
use crate::db::models::{address_statuses, StatusCounts};
use crate::db::{maps, territories, MapperDb};
use crate::error::MapperError;

use super::events::{EngineEvent, EventBus};

// ============================================================================
// Tally
// ============================================================================

/// Address counts bucketed for progress.
///
/// A not-home address whose tries reached the congregation's `max_tries` is
/// `exhausted` and counts toward completion; below the ceiling it is
/// `outstanding`. `dnc` and `invalid` are tracked but never part of `total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub done: i64,
    pub not_done: i64,
    pub outstanding: i64,
    pub exhausted: i64,
    pub dnc: i64,
    pub invalid: i64,
}

impl Tally {
    /// Bucket `(status, not_home_tries)` rows
    pub fn from_rows(rows: &[(String, i32)], max_tries: i32) -> Self {
        let mut tally = Tally::default();
        for (status, tries) in rows {
            match status.as_str() {
                address_statuses::DONE => tally.done += 1,
                address_statuses::NOT_DONE => tally.not_done += 1,
                address_statuses::NOT_HOME if *tries >= max_tries => tally.exhausted += 1,
                address_statuses::NOT_HOME => tally.outstanding += 1,
                address_statuses::DO_NOT_CALL => tally.dnc += 1,
                address_statuses::INVALID => tally.invalid += 1,
                _ => {}
            }
        }
        tally
    }

    pub fn total(&self) -> i64 {
        self.done + self.not_done + self.outstanding + self.exhausted
    }

    /// Completed share of `total` as a whole percentage, rounded down
    pub fn progress(&self) -> i32 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        ((self.done + self.exhausted) * 100 / total) as i32
    }

    /// The five-bucket form stored on a map
    pub fn counts(&self) -> StatusCounts {
        StatusCounts {
            done: self.done,
            not_done: self.not_done,
            not_home: self.outstanding,
            dnc: self.dnc,
            invalid: self.invalid,
        }
    }
}

// ============================================================================
// Refresh plans
// ============================================================================

/// A derived view that can be recomputed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RefreshTarget {
    Map(String),
    Territory(String),
}

impl fmt::Display for RefreshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshTarget::Map(id) => write!(f, "map {}", id),
            RefreshTarget::Territory(id) => write!(f, "territory {}", id),
        }
    }
}

/// Derived views a committed mutation invalidated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshPlan {
    /// Map ids and whether the owning territory follows
    maps: Vec<(String, bool)>,
    territories: Vec<String>,
}

impl RefreshPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute a map and then its territory
    pub fn map(mut self, map_id: impl Into<String>) -> Self {
        self.maps.push((map_id.into(), true));
        self
    }

    /// Recompute a map without touching its territory
    pub fn map_only(mut self, map_id: impl Into<String>) -> Self {
        self.maps.push((map_id.into(), false));
        self
    }

    pub fn territory(mut self, territory_id: impl Into<String>) -> Self {
        let territory_id = territory_id.into();
        if !self.territories.contains(&territory_id) {
            self.territories.push(territory_id);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty() && self.territories.is_empty()
    }

    /// Every target in execution order, map views first
    pub fn targets(&self) -> Vec<RefreshTarget> {
        self.maps
            .iter()
            .map(|(id, _)| RefreshTarget::Map(id.clone()))
            .chain(self.territories.iter().cloned().map(RefreshTarget::Territory))
            .collect()
    }
}

/// Refresh targets whose post-commit recompute failed
#[derive(Debug, Default)]
pub struct StaleViews {
    entries: DashSet<RefreshTarget>,
}

impl StaleViews {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, target: RefreshTarget) {
        self.entries.insert(target);
    }

    pub fn contains(&self, target: &RefreshTarget) -> bool {
        self.entries.contains(target)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return every entry
    pub fn drain(&self) -> Vec<RefreshTarget> {
        let targets: Vec<RefreshTarget> = self.entries.iter().map(|t| t.key().clone()).collect();
        for target in &targets {
            self.entries.remove(target);
        }
        targets
    }
}

// ============================================================================
// Service
// ============================================================================

/// Recomputed aggregates of one map
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapAggregates {
    pub map_id: String,
    pub territory_id: String,
    pub aggregates: StatusCounts,
    pub progress: i32,
}

/// Recomputed progress of one territory
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerritoryProgress {
    pub territory_id: String,
    pub progress: i32,
}

/// Outcome of retrying stale views
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub refreshed: usize,
    pub failed: usize,
}

/// Aggregation service
pub struct AggregationService {
    db: Arc<MapperDb>,
    events: Arc<EventBus>,
    stale: Arc<StaleViews>,
}

impl AggregationService {
    pub fn new(db: Arc<MapperDb>, events: Arc<EventBus>, stale: Arc<StaleViews>) -> Self {
        Self { db, events, stale }
    }

    pub fn stale(&self) -> &StaleViews {
        &self.stale
    }

    /// Recompute one map; with `cascade` the owning territory follows and its
    /// failure is returned to the caller
    pub fn recompute_map(&self, map_id: &str, cascade: bool) -> Result<MapAggregates, MapperError> {
        if map_id.trim().is_empty() {
            return Err(MapperError::InvalidInput("Map ID is required".into()));
        }

        let result = self.db.transaction(|conn| {
            let map = maps::require_map(conn, map_id)?;
            let congregation = territories::require_congregation(conn, &map.congregation_id)?;
            let rows =
                addresses::countable_status_rows(conn, AddressScope::Map(map_id), &congregation.id)?;

            let tally = Tally::from_rows(&rows, congregation.max_tries);
            let counts = tally.counts();
            let progress = tally.progress();
            maps::update_map_aggregates(conn, map_id, &counts, progress)?;

            Ok(MapAggregates {
                map_id: map.id,
                territory_id: map.territory_id,
                aggregates: counts,
                progress,
            })
        })?;

        debug!(map = %map_id, progress = result.progress, "Map aggregates updated");
        self.events.emit(EngineEvent::MapRecomputed {
            map_id: result.map_id.clone(),
            progress: result.progress,
        });

        if cascade {
            self.recompute_territory(&result.territory_id)?;
        }

        Ok(result)
    }

    /// Recompute a territory from its own addresses
    pub fn recompute_territory(&self, territory_id: &str) -> Result<TerritoryProgress, MapperError> {
        if territory_id.trim().is_empty() {
            return Err(MapperError::InvalidInput("Territory ID is required".into()));
        }

        let progress = self.db.transaction(|conn| {
            let territory = territories::require_territory(conn, territory_id)?;
            let congregation = territories::require_congregation(conn, &territory.congregation_id)?;
            let rows = addresses::countable_status_rows(
                conn,
                AddressScope::Territory(territory_id),
                &congregation.id,
            )?;

            let progress = Tally::from_rows(&rows, congregation.max_tries).progress();
            territories::update_territory_progress(conn, territory_id, progress)?;
            Ok(progress)
        })?;

        debug!(territory = %territory_id, progress, "Territory progress updated");
        self.events.emit(EngineEvent::TerritoryRecomputed {
            territory_id: territory_id.to_string(),
            progress,
        });

        Ok(TerritoryProgress {
            territory_id: territory_id.to_string(),
            progress,
        })
    }

    /// Execute a plan after commit. Never fails; each failed target becomes a
    /// warning and a stale view.
    pub fn refresh(&self, plan: RefreshPlan) -> Vec<String> {
        let mut warnings = Vec::new();
        let mut territory_ids: Vec<String> = Vec::new();

        for (map_id, cascade) in plan.maps {
            match self.recompute_map(&map_id, false) {
                Ok(result) => {
                    if cascade && !territory_ids.contains(&result.territory_id) {
                        territory_ids.push(result.territory_id);
                    }
                }
                Err(e) => warnings.push(self.mark_failed(RefreshTarget::Map(map_id), e)),
            }
        }

        for territory_id in plan.territories {
            if !territory_ids.contains(&territory_id) {
                territory_ids.push(territory_id);
            }
        }

        for territory_id in territory_ids {
            if let Err(e) = self.recompute_territory(&territory_id) {
                warnings.push(self.mark_failed(RefreshTarget::Territory(territory_id), e));
            }
        }

        warnings
    }

    /// Retry every stale view; failures are parked again
    pub fn retry_stale(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for target in self.stale.drain() {
            let result = match &target {
                RefreshTarget::Map(id) => self.recompute_map(id, false).map(|_| ()),
                RefreshTarget::Territory(id) => self.recompute_territory(id).map(|_| ()),
            };
            match result {
                Ok(()) => report.refreshed += 1,
                Err(MapperError::NotFound(msg)) => {
                    // Deleted since it went stale
                    debug!(target = %target, "Dropping stale view: {}", msg);
                }
                Err(e) => {
                    self.mark_failed(target, e);
                    report.failed += 1;
                }
            }
        }

        report
    }

    fn mark_failed(&self, target: RefreshTarget, error: MapperError) -> String {
        let message = format!("Failed to refresh {}: {}", target, error);
        warn!(target = %target, error = %error, "Aggregate refresh failed");
        self.events.emit(EngineEvent::RefreshFailed {
            target: target.to_string(),
            error: error.to_string(),
        });
        self.stale.mark(target);
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(items: &[(&str, i32)]) -> Vec<(String, i32)> {
        items.iter().map(|(s, t)| (s.to_string(), *t)).collect()
    }

    #[test]
    fn test_tally_mixed_statuses() {
        let tally = Tally::from_rows(
            &rows(&[
                ("done", 0),
                ("done", 0),
                ("not_done", 0),
                ("not_home", 1),
                ("not_home", 3),
            ]),
            3,
        );

        assert_eq!(tally.done, 2);
        assert_eq!(tally.not_done, 1);
        assert_eq!(tally.outstanding, 1);
        assert_eq!(tally.exhausted, 1);
        assert_eq!(tally.total(), 5);
        assert_eq!(tally.progress(), 60);
    }

    #[test]
    fn test_tally_excludes_dnc_and_invalid_from_total() {
        let tally = Tally::from_rows(&rows(&[("done", 0), ("do_not_call", 0), ("invalid", 0)]), 2);
        assert_eq!(tally.total(), 1);
        assert_eq!(tally.progress(), 100);

        let counts = tally.counts();
        assert_eq!(counts.dnc, 1);
        assert_eq!(counts.invalid, 1);
    }

    #[test]
    fn test_tally_progress_rounds_down() {
        let tally = Tally::from_rows(&rows(&[("done", 0), ("not_done", 0), ("not_done", 0)]), 1);
        assert_eq!(tally.progress(), 33);
    }

    #[test]
    fn test_tally_empty_is_zero() {
        let tally = Tally::from_rows(&[], 3);
        assert_eq!(tally.total(), 0);
        assert_eq!(tally.progress(), 0);
    }

    #[test]
    fn test_refresh_plan_dedupes_territories() {
        let plan = RefreshPlan::new()
            .map("m1")
            .territory("t1")
            .territory("t1");
        assert_eq!(
            plan.targets(),
            vec![
                RefreshTarget::Map("m1".into()),
                RefreshTarget::Territory("t1".into()),
            ]
        );
        assert!(RefreshPlan::new().is_empty());
    }

    #[test]
    fn test_stale_views_drain() {
        let stale = StaleViews::new();
        stale.mark(RefreshTarget::Map("m1".into()));
        stale.mark(RefreshTarget::Map("m1".into()));
        stale.mark(RefreshTarget::Territory("t1".into()));
        assert_eq!(stale.len(), 2);

        let drained = stale.drain();
        assert_eq!(drained.len(), 2);
        assert!(stale.is_empty());
    }
}
