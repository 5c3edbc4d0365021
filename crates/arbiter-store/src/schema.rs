use anyhow::Result;
use rusqlite::Connection;

// Schema version (increment when changing table definitions)
pub const SCHEMA_VERSION: i32 = 1;

// NOTE: Storage Design Rationale
//
// Why JSON columns for entities/channeling/contests?
// - Resolved entity snapshots come from authoring tooling whose shape is
//   open-ended (attribute maps, wound maps, damage-type sets)
// - The session holds the typed working copy; rows are only read on hydrate
// - Keeps the schema stable while ruleset content evolves
//
// Why delete+insert on persist (not per-row diffing)?
// - An encounter is small (tens of rows); a transaction per handler is cheap
// - The alternative (dirty tracking in the engine) buys nothing at this size
//
// combat_log is the exception: append-only, written per broadcast event.

pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current_version != 0 && current_version != SCHEMA_VERSION {
        drop_all_tables(conn)?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS combat_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            combat_id TEXT NOT NULL,
            campaign_id TEXT NOT NULL,
            phase TEXT NOT NULL,
            round INTEGER NOT NULL,
            turn_index INTEGER NOT NULL,
            active_entity_id TEXT,
            version INTEGER NOT NULL,
            started_at TEXT,
            last_updated_at TEXT,
            rng_seed INTEGER NOT NULL,
            rng_counter INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS initiative (
            entity_id TEXT PRIMARY KEY,
            roll INTEGER NOT NULL,
            skill_value INTEGER NOT NULL,
            current_energy INTEGER NOT NULL,
            position INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS grid_positions (
            entity_id TEXT PRIMARY KEY,
            row INTEGER NOT NULL,
            col INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS map_config (
            kind TEXT PRIMARY KEY,
            data TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channeling (
            entity_id TEXT PRIMARY KEY,
            data TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS combat_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type TEXT NOT NULL,
            payload TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pending_actions (
            id TEXT PRIMARY KEY,
            entity_id TEXT NOT NULL,
            trigger TEXT NOT NULL,
            action_type TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS skill_contests (
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_initiative_position ON initiative(position);
        CREATE INDEX IF NOT EXISTS idx_log_created ON combat_log(created_at);
        "#,
    )?;

    conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;

    Ok(())
}

fn drop_all_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS skill_contests;
        DROP TABLE IF EXISTS pending_actions;
        DROP TABLE IF EXISTS combat_log;
        DROP TABLE IF EXISTS channeling;
        DROP TABLE IF EXISTS map_config;
        DROP TABLE IF EXISTS grid_positions;
        DROP TABLE IF EXISTS initiative;
        DROP TABLE IF EXISTS entities;
        DROP TABLE IF EXISTS combat_state;
        "#,
    )?;
    Ok(())
}
