//! Scheduled background jobs
//!
//! - Assignment cleanup: deletes expired assignments
//! - Territory aggregates: recomputes territories whose maps changed within
//!   the last interval, then retries every stale view
//!
//! Both loops run their work on the blocking pool. A failed or panicking run
//! is logged and the loop keeps ticking.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::JobsConfig;
use crate::db::maps;
use crate::db::models::format_timestamp;
use crate::error::MapperError;
use crate::services::Engine;

/// Outcome of one territory aggregate sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub territories: usize,
    pub territories_failed: usize,
    pub stale_refreshed: usize,
    pub stale_failed: usize,
}

/// Recompute territories with maps updated after `since`, then retry stale views
pub fn sweep_territories(engine: &Engine, since: DateTime<Utc>) -> Result<SweepSummary, MapperError> {
    let since_text = format_timestamp(since);
    let territory_ids = engine
        .db
        .with_conn(|conn| maps::territories_with_maps_updated_since(conn, &since_text))?;

    let mut summary = SweepSummary::default();
    for territory_id in territory_ids {
        match engine.aggregation.recompute_territory(&territory_id) {
            Ok(result) => {
                debug!(territory = %territory_id, progress = result.progress, "Territory refreshed");
                summary.territories += 1;
            }
            Err(e) => {
                error!(territory = %territory_id, "Error processing territory: {}", e);
                summary.territories_failed += 1;
            }
        }
    }

    let report = engine.aggregation.retry_stale();
    summary.stale_refreshed = report.refreshed;
    summary.stale_failed = report.failed;
    Ok(summary)
}

/// Start every enabled job, returning their handles
pub fn spawn_jobs(engine: Arc<Engine>, config: &JobsConfig) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    if config.enable_assignments_cleanup {
        handles.push(spawn_assignment_cleanup(
            engine.clone(),
            minutes(config.cleanup_interval_mins),
        ));
    } else {
        info!("Assignment cleanup job disabled");
    }

    if config.enable_territory_aggregations {
        handles.push(spawn_territory_aggregates(
            engine,
            minutes(config.aggregates_interval_mins),
        ));
    } else {
        info!("Territory aggregates job disabled");
    }

    handles
}

/// Spawn the expired-assignment cleanup loop
pub fn spawn_assignment_cleanup(engine: Arc<Engine>, interval: Duration) -> JoinHandle<()> {
    info!(interval_secs = interval.as_secs(), "Starting assignment cleanup job");
    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);
        loop {
            interval_timer.tick().await;

            let engine = engine.clone();
            let run = tokio::task::spawn_blocking(move || {
                engine.assignment.expire_assignments(Utc::now())
            })
            .await;

            match run {
                Ok(Ok(removed)) => debug!(removed, "Assignment cleanup finished"),
                Ok(Err(e)) => error!("Error cleaning up assignments: {}", e),
                Err(e) => error!("Assignment cleanup panicked: {}", e),
            }
        }
    })
}

/// Spawn the territory aggregate sweep loop
pub fn spawn_territory_aggregates(engine: Arc<Engine>, interval: Duration) -> JoinHandle<()> {
    info!(interval_secs = interval.as_secs(), "Starting territory aggregates job");
    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);
        let lookback = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::minutes(10));
        loop {
            interval_timer.tick().await;

            let engine = engine.clone();
            let since = Utc::now() - lookback;
            let run = tokio::task::spawn_blocking(move || sweep_territories(&engine, since)).await;

            match run {
                Ok(Ok(summary)) => {
                    if summary.territories_failed > 0 || summary.stale_failed > 0 {
                        warn!(
                            territories = summary.territories,
                            territories_failed = summary.territories_failed,
                            stale_failed = summary.stale_failed,
                            "Territory aggregate sweep finished with failures"
                        );
                    } else {
                        info!(
                            territories = summary.territories,
                            stale_refreshed = summary.stale_refreshed,
                            "Territory aggregate sweep finished"
                        );
                    }
                }
                Ok(Err(e)) => error!("Error finding territories to refresh: {}", e),
                Err(e) => error!("Territory aggregate sweep panicked: {}", e),
            }
        }
    })
}

fn minutes(mins: u64) -> Duration {
    // tokio::time::interval panics on a zero period
    Duration::from_secs(mins.max(1) * 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minutes_never_zero() {
        assert_eq!(minutes(0), Duration::from_secs(60));
        assert_eq!(minutes(5), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_disabled_jobs_spawn_nothing() {
        let db = Arc::new(crate::db::MapperDb::open_in_memory().unwrap());
        let engine = Arc::new(Engine::new(db));
        let config = JobsConfig {
            enable_assignments_cleanup: false,
            enable_territory_aggregations: false,
            cleanup_interval_mins: 5,
            aggregates_interval_mins: 10,
        };
        assert!(spawn_jobs(engine, &config).is_empty());
    }
}
