//! Mapper Engine - territory assignment and aggregation for ministry mapping
//!
//! Keeps the derived progress of maps and territories consistent with their
//! addresses, hands out maps to field workers, and guards the structural
//! edits (floors, address codes, territory moves, address types) that change
//! what those aggregates count.
//!
//! ## Data Model
//!
//! ```text
//! Congregation
//! ├── AddressType (options; exactly one default)
//! └── Territory (progress)
//!     └── Map (aggregates, progress)
//!         ├── Address (floor × code, status, not_home_tries)
//!         └── Assignment (normal | personal, expiry)
//! ```
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/mapper-engine/
//! ├── mapper.db              # SQLite database (WAL mode)
//! └── config.toml            # Configuration
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod jobs;
pub mod services;

pub use config::{Config, JobsConfig};
pub use db::MapperDb;
pub use error::MapperError;
pub use http::HttpServer;
pub use services::{Committed, Engine};
