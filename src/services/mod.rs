//! Service layer for the mapper engine
//!
//! Services hold the business rules between HTTP handlers and the record
//! store. Each service wraps database operations with:
//! - Input validation
//! - Transaction boundaries
//! - Event emission for audit/notifications
//! - The post-commit aggregate refresh
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers / scheduled jobs
//!     ↓
//! Service Layer (assignment, structure, options)
//!     ↓ RefreshPlan after commit
//! Aggregation Service
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod aggregation;
pub mod assignment;
pub mod events;
pub mod options;
pub mod response;
pub mod structure;

// Re-exports
pub use aggregation::{AggregationService, RefreshPlan, RefreshTarget, StaleViews, Tally};
pub use assignment::{AssignmentResult, AssignmentService};
pub use events::{EngineEvent, EventBus, EventListener};
pub use options::{OptionInput, OptionService};
pub use structure::{CodeSequence, NewMapInput, StructureService};

use std::sync::Arc;

use serde::Serialize;

use crate::db::MapperDb;

/// A committed mutation and the refreshes that failed after it
#[derive(Debug, Clone, Serialize)]
pub struct Committed<T> {
    pub value: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl<T> Committed<T> {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Service container for dependency injection
///
/// Holds all services over one shared database, event bus and stale-view
/// set. Pass this to the HTTP server and the job runner.
pub struct Engine {
    pub db: Arc<MapperDb>,
    pub events: Arc<EventBus>,
    pub aggregation: Arc<AggregationService>,
    pub assignment: Arc<AssignmentService>,
    pub structure: Arc<StructureService>,
    pub options: Arc<OptionService>,
}

impl Engine {
    /// Create all services with shared database
    pub fn new(db: Arc<MapperDb>) -> Self {
        let events = Arc::new(EventBus::new());
        let stale = Arc::new(StaleViews::new());
        let aggregation = Arc::new(AggregationService::new(db.clone(), events.clone(), stale));

        Self {
            assignment: Arc::new(AssignmentService::new(db.clone(), events.clone())),
            structure: Arc::new(StructureService::new(
                db.clone(),
                events.clone(),
                aggregation.clone(),
            )),
            options: Arc::new(OptionService::new(
                db.clone(),
                events.clone(),
                aggregation.clone(),
            )),
            aggregation,
            events,
            db,
        }
    }
}
