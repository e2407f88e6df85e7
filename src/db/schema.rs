//! Database schema definitions

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use tracing::info;

use crate::error::MapperError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 2;

#[derive(QueryableByName)]
struct VersionRow {
    #[diesel(sql_type = Integer)]
    version: i32,
}

/// Initialize the database schema
pub fn init_schema(conn: &mut SqliteConnection) -> Result<(), MapperError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        conn.batch_execute(TABLES_SCHEMA)?;
        conn.batch_execute(INDEXES_SCHEMA)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        if current_version < 2 {
            conn.batch_execute(MIGRATION_V2)?;
        }
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &mut SqliteConnection) -> Result<i32, MapperError> {
    conn.batch_execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")?;

    let row = diesel::sql_query("SELECT version FROM schema_version LIMIT 1")
        .get_result::<VersionRow>(conn)
        .optional()?;

    Ok(row.map(|r| r.version).unwrap_or(0))
}

fn set_schema_version(conn: &mut SqliteConnection, version: i32) -> Result<(), MapperError> {
    diesel::sql_query("DELETE FROM schema_version").execute(conn)?;
    diesel::sql_query("INSERT INTO schema_version (version) VALUES (?)")
        .bind::<Integer, _>(version)
        .execute(conn)?;
    Ok(())
}

const TABLES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS congregations (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    max_tries INTEGER NOT NULL DEFAULT 1,
    expiry_hours INTEGER,
    timezone TEXT NOT NULL DEFAULT 'UTC',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS territories (
    id TEXT PRIMARY KEY NOT NULL,
    congregation_id TEXT NOT NULL REFERENCES congregations(id),
    code TEXT NOT NULL,
    description TEXT,
    progress INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS maps (
    id TEXT PRIMARY KEY NOT NULL,
    congregation_id TEXT NOT NULL REFERENCES congregations(id),
    territory_id TEXT NOT NULL REFERENCES territories(id),
    code TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    map_type TEXT NOT NULL CHECK (map_type IN ('single', 'multi')),
    floors INTEGER NOT NULL DEFAULT 1,
    coordinates TEXT,
    aggregates TEXT,
    progress INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS options (
    id TEXT PRIMARY KEY NOT NULL,
    congregation_id TEXT NOT NULL REFERENCES congregations(id),
    code TEXT NOT NULL,
    description TEXT,
    sequence INTEGER NOT NULL DEFAULT 0,
    is_countable INTEGER NOT NULL DEFAULT 1,
    is_default INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS addresses (
    id TEXT PRIMARY KEY NOT NULL,
    congregation_id TEXT NOT NULL REFERENCES congregations(id),
    territory_id TEXT NOT NULL REFERENCES territories(id),
    map_id TEXT NOT NULL REFERENCES maps(id) ON DELETE CASCADE,
    floor INTEGER NOT NULL DEFAULT 1,
    code TEXT NOT NULL,
    sequence INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'not_done',
    not_home_tries INTEGER NOT NULL DEFAULT 0,
    notes TEXT,
    dnc_time TEXT,
    updated_by TEXT,
    last_notes_updated TEXT,
    last_notes_updated_by TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS address_options (
    address_id TEXT NOT NULL REFERENCES addresses(id) ON DELETE CASCADE,
    option_id TEXT NOT NULL REFERENCES options(id) ON DELETE CASCADE,
    PRIMARY KEY (address_id, option_id)
);

CREATE TABLE IF NOT EXISTS assignments (
    id TEXT PRIMARY KEY NOT NULL,
    congregation_id TEXT NOT NULL REFERENCES congregations(id),
    map_id TEXT NOT NULL REFERENCES maps(id) ON DELETE CASCADE,
    user_id TEXT,
    publisher TEXT NOT NULL DEFAULT '',
    assignment_type TEXT NOT NULL CHECK (assignment_type IN ('normal', 'personal')),
    expiry_date TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_territories_congregation ON territories(congregation_id);
CREATE INDEX IF NOT EXISTS idx_maps_territory ON maps(territory_id);
CREATE INDEX IF NOT EXISTS idx_maps_updated ON maps(updated_at);
CREATE INDEX IF NOT EXISTS idx_addresses_map_floor ON addresses(map_id, floor);
CREATE INDEX IF NOT EXISTS idx_addresses_map_code ON addresses(map_id, code);
CREATE INDEX IF NOT EXISTS idx_addresses_territory ON addresses(territory_id);
CREATE INDEX IF NOT EXISTS idx_address_options_option ON address_options(option_id);
CREATE INDEX IF NOT EXISTS idx_options_congregation ON options(congregation_id);
CREATE INDEX IF NOT EXISTS idx_assignments_map ON assignments(map_id, assignment_type, expiry_date);
CREATE INDEX IF NOT EXISTS idx_assignments_expiry ON assignments(expiry_date);
"#;

/// v1 -> v2: note audit columns on addresses
const MIGRATION_V2: &str = r#"
ALTER TABLE addresses ADD COLUMN last_notes_updated TEXT;
ALTER TABLE addresses ADD COLUMN last_notes_updated_by TEXT;
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        init_schema(&mut conn).unwrap();
        init_schema(&mut conn).unwrap();

        assert_eq!(get_schema_version(&mut conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_v1_database_gains_note_columns() {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        conn.batch_execute(
            "CREATE TABLE addresses (id TEXT PRIMARY KEY NOT NULL, notes TEXT);
             CREATE TABLE schema_version (version INTEGER NOT NULL);
             INSERT INTO schema_version (version) VALUES (1);",
        )
        .unwrap();

        init_schema(&mut conn).unwrap();
        assert_eq!(get_schema_version(&mut conn).unwrap(), SCHEMA_VERSION);
        conn.batch_execute("UPDATE addresses SET last_notes_updated = 'x', last_notes_updated_by = 'y'")
            .unwrap();
    }
}
