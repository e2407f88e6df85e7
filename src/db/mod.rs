//! SQLite record store for congregations, territories, maps and addresses
//!
//! ## Architecture
//!
//! - Every table is described once in `diesel_schema` and created by `schema`
//! - Per-entity modules hold the free query functions; they take a
//!   `&mut SqliteConnection` so a service can run several of them inside one
//!   transaction
//! - `MapperDb` owns the r2d2 pool and hands out connections and transactions
//!
//! ## Tables
//!
//! - `congregations`, `territories` - tenancy tree and territory progress
//! - `maps` - canvassing units with aggregates JSON and progress
//! - `addresses` / `address_options` - the address grid and its type set
//! - `options` - per-congregation address types
//! - `assignments` - time-limited worker claims on maps

pub mod diesel_schema;
pub mod models;
pub mod schema;

pub mod addresses;
pub mod admin;
pub mod assignments;
pub mod maps;
pub mod options;
pub mod territories;

use std::path::Path;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use tracing::{debug, info};

use crate::error::MapperError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Pragmas applied to every pooled connection
#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(
            "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; \
             PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;",
        )
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Pooled SQLite database
pub struct MapperDb {
    pool: DbPool,
}

impl MapperDb {
    /// Open or create the database file
    pub fn open(db_path: &Path, pool_size: u32) -> Result<Self, MapperError> {
        info!("Opening SQLite database at {:?}", db_path);

        let manager = ConnectionManager::<SqliteConnection>::new(db_path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(Duration::from_secs(10))
            .connection_customizer(Box::new(SqlitePragmas))
            .build(manager)?;

        let db = Self { pool };
        db.with_conn(schema::init_schema)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    ///
    /// The pool holds exactly one connection that never expires, since each
    /// new `:memory:` connection would be a separate empty database.
    pub fn open_in_memory() -> Result<Self, MapperError> {
        debug!("Opening in-memory SQLite database");

        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_customizer(Box::new(SqlitePragmas))
            .build(manager)?;

        let db = Self { pool };
        db.with_conn(schema::init_schema)?;
        Ok(db)
    }

    /// Check out a pooled connection
    pub fn conn(&self) -> Result<DbConn, MapperError> {
        Ok(self.pool.get()?)
    }

    /// Run read or single-statement work on a pooled connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, MapperError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, MapperError>,
    {
        let mut conn = self.conn()?;
        f(&mut conn)
    }

    /// Run multi-row writes atomically; any error rolls every row back
    pub fn transaction<F, T>(&self, f: F) -> Result<T, MapperError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, MapperError>,
    {
        let mut pooled = self.conn()?;
        let conn: &mut SqliteConnection = &mut pooled;
        conn.transaction(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_on_disk_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapper.db");

        {
            let db = MapperDb::open(&path, 2).unwrap();
            db.with_conn(|conn| {
                admin::insert_congregation(conn, "cong-1", "North", 3, None)?;
                Ok(())
            })
            .unwrap();
        }

        let reopened = MapperDb::open(&path, 2).unwrap();
        let congregation = reopened
            .with_conn(|conn| territories::get_congregation(conn, "cong-1"))
            .unwrap();
        assert_eq!(congregation.map(|c| c.max_tries), Some(3));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = MapperDb::open_in_memory().unwrap();

        let result: Result<(), MapperError> = db.transaction(|conn| {
            admin::insert_congregation(conn, "cong-1", "North", 3, None)?;
            Err(MapperError::Internal("abort".into()))
        });
        assert!(result.is_err());

        let found = db
            .with_conn(|conn| territories::get_congregation(conn, "cong-1"))
            .unwrap();
        assert!(found.is_none());
    }
}
