use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use arbiter_types::enums::Phase;
use arbiter_types::ids::{CampaignId, CombatId, ContestId, EntityId};
use arbiter_types::rng::RngState;
use arbiter_types::state::{
    ChannelingState, EncounterState, Entity, GridConfig, GridPosition, InitiativeEntry,
    LogEntry, MapConfig, PendingAction, SkillContest,
};

use crate::schema::init_schema;

/// Per-session SQLite store. One file per `(campaignId, combatId)` pair,
/// owned exclusively by its session task.
pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open session store: {}", db_path.display()))?;
        let store = Self { conn };
        init_schema(&store.conn)?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        init_schema(&store.conn)?;
        Ok(store)
    }

    // =========================================================================
    // Persist
    // =========================================================================

    /// Write the full working state in one transaction. Child tables are
    /// replaced wholesale; the combat log is untouched (append-only).
    pub fn persist(&mut self, state: &EncounterState, rng: &RngState) -> Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO combat_state (id, combat_id, campaign_id, phase, round, turn_index,
                                      active_entity_id, version, started_at, last_updated_at,
                                      rng_seed, rng_counter)
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                combat_id = ?1,
                campaign_id = ?2,
                phase = ?3,
                round = ?4,
                turn_index = ?5,
                active_entity_id = ?6,
                version = ?7,
                started_at = ?8,
                last_updated_at = ?9,
                rng_seed = ?10,
                rng_counter = ?11
            "#,
            params![
                state.combat_id.as_str(),
                state.campaign_id.as_str(),
                phase_to_str(state.phase),
                state.round,
                state.turn_index,
                state.active_entity_id.as_ref().map(|id| id.as_str()),
                state.version as i64,
                state.started_at,
                state.last_updated_at,
                rng.seed,
                rng.counter,
            ],
        )?;

        tx.execute("DELETE FROM entities", [])?;
        for entity in state.entities.values() {
            tx.execute(
                "INSERT INTO entities (id, data) VALUES (?1, ?2)",
                params![entity.id.as_str(), serde_json::to_string(entity)?],
            )?;
        }

        tx.execute("DELETE FROM initiative", [])?;
        for entry in &state.initiative {
            tx.execute(
                r#"
                INSERT INTO initiative (entity_id, roll, skill_value, current_energy, position)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    entry.entity_id.as_str(),
                    entry.roll,
                    entry.skill_value,
                    entry.current_energy,
                    entry.position,
                ],
            )?;
        }

        tx.execute("DELETE FROM grid_positions", [])?;
        for (entity_id, pos) in &state.positions {
            tx.execute(
                "INSERT INTO grid_positions (entity_id, row, col) VALUES (?1, ?2, ?3)",
                params![entity_id.as_str(), pos.row, pos.col],
            )?;
        }

        tx.execute("DELETE FROM map_config", [])?;
        tx.execute(
            "INSERT INTO map_config (kind, data) VALUES ('map', ?1), ('grid', ?2)",
            params![
                serde_json::to_string(&state.map_config)?,
                serde_json::to_string(&state.grid_config)?,
            ],
        )?;

        tx.execute("DELETE FROM channeling", [])?;
        for (entity_id, channel) in &state.channeling {
            tx.execute(
                "INSERT INTO channeling (entity_id, data) VALUES (?1, ?2)",
                params![entity_id.as_str(), serde_json::to_string(channel)?],
            )?;
        }

        tx.execute("DELETE FROM pending_actions", [])?;
        for action in state.pending_actions.values() {
            tx.execute(
                r#"
                INSERT INTO pending_actions (id, entity_id, trigger, action_type, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    action.id,
                    action.entity_id.as_str(),
                    action.trigger,
                    action.action_type,
                    action.created_at,
                ],
            )?;
        }

        tx.execute("DELETE FROM skill_contests", [])?;
        for contest in state.contests.values() {
            tx.execute(
                "INSERT INTO skill_contests (id, data) VALUES (?1, ?2)",
                params![contest.id.as_str(), serde_json::to_string(contest)?],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    // =========================================================================
    // Hydrate
    // =========================================================================

    /// Rebuild the working state from rows. `None` when the store has never
    /// been persisted (a brand-new session).
    pub fn load(&self) -> Result<Option<(EncounterState, RngState)>> {
        let header = self
            .conn
            .query_row(
                r#"
                SELECT combat_id, campaign_id, phase, round, turn_index, active_entity_id,
                       version, started_at, last_updated_at, rng_seed, rng_counter
                FROM combat_state WHERE id = 1
                "#,
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, i32>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, i64>(6)? as u64,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, Option<String>>(8)?,
                        row.get::<_, u32>(9)?,
                        row.get::<_, u32>(10)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            combat_id,
            campaign_id,
            phase,
            round,
            turn_index,
            active_entity_id,
            version,
            started_at,
            last_updated_at,
            rng_seed,
            rng_counter,
        )) = header
        else {
            return Ok(None);
        };

        let mut state =
            EncounterState::new(CombatId::from(combat_id), CampaignId::from(campaign_id));
        state.phase = phase_from_str(&phase)?;
        state.round = round;
        state.turn_index = turn_index;
        state.active_entity_id = active_entity_id.map(EntityId::from);
        state.version = version;
        state.started_at = started_at;
        state.last_updated_at = last_updated_at;

        let mut stmt = self.conn.prepare("SELECT data FROM entities")?;
        let entities = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for data in entities {
            let entity: Entity =
                serde_json::from_str(&data).context("Corrupt entity row")?;
            state.entities.insert(entity.id.clone(), entity);
        }

        let mut stmt = self.conn.prepare(
            r#"
            SELECT entity_id, roll, skill_value, current_energy, position
            FROM initiative ORDER BY position
            "#,
        )?;
        state.initiative = stmt
            .query_map([], |row| {
                Ok(InitiativeEntry {
                    entity_id: EntityId::from(row.get::<_, String>(0)?),
                    roll: row.get(1)?,
                    skill_value: row.get(2)?,
                    current_energy: row.get(3)?,
                    position: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt =
            self.conn.prepare("SELECT entity_id, row, col FROM grid_positions")?;
        let positions = stmt
            .query_map([], |row| {
                Ok((
                    EntityId::from(row.get::<_, String>(0)?),
                    GridPosition { row: row.get(1)?, col: row.get(2)? },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        state.positions = positions.into_iter().collect();

        let mut stmt = self.conn.prepare("SELECT kind, data FROM map_config")?;
        let configs = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (kind, data) in configs {
            match kind.as_str() {
                "map" => {
                    state.map_config = serde_json::from_str::<MapConfig>(&data)
                        .context("Corrupt map config row")?;
                }
                "grid" => {
                    state.grid_config = serde_json::from_str::<GridConfig>(&data)
                        .context("Corrupt grid config row")?;
                }
                _ => {}
            }
        }

        let mut stmt = self.conn.prepare("SELECT entity_id, data FROM channeling")?;
        let channels = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (entity_id, data) in channels {
            let channel: ChannelingState =
                serde_json::from_str(&data).context("Corrupt channeling row")?;
            state.channeling.insert(EntityId::from(entity_id), channel);
        }

        let mut stmt = self.conn.prepare(
            "SELECT id, entity_id, trigger, action_type, created_at FROM pending_actions",
        )?;
        let actions = stmt
            .query_map([], |row| {
                Ok(PendingAction {
                    id: row.get(0)?,
                    entity_id: EntityId::from(row.get::<_, String>(1)?),
                    trigger: row.get(2)?,
                    action_type: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        state.pending_actions = actions.into_iter().map(|a| (a.id.clone(), a)).collect();

        let mut stmt = self.conn.prepare("SELECT data FROM skill_contests")?;
        let contests = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for data in contests {
            let contest: SkillContest =
                serde_json::from_str(&data).context("Corrupt contest row")?;
            state.contests.insert(ContestId::from(contest.id.as_str()), contest);
        }

        Ok(Some((state, RngState { seed: rng_seed, counter: rng_counter })))
    }

    // =========================================================================
    // Combat log
    // =========================================================================

    /// Append one log row; ids are assigned monotonically by the database.
    pub fn append_log(
        &self,
        entry_type: &str,
        payload: Option<&serde_json::Value>,
        created_at: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO combat_log (type, payload, created_at) VALUES (?1, ?2, ?3)",
            params![
                entry_type,
                payload.map(serde_json::Value::to_string),
                created_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// The most recent `limit` log rows, oldest first.
    pub fn recent_log(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, type, payload, created_at
            FROM combat_log ORDER BY id DESC LIMIT ?1
            "#,
        )?;
        let mut entries = stmt
            .query_map([limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(id, entry_type, payload, created_at)| LogEntry {
                id,
                entry_type,
                payload: payload.and_then(|p| serde_json::from_str(&p).ok()),
                created_at,
            })
            .collect::<Vec<_>>();
        entries.reverse();
        Ok(entries)
    }

    /// Truncate the log. Called alongside encounter teardown.
    pub fn clear_log(&self) -> Result<()> {
        self.conn.execute("DELETE FROM combat_log", [])?;
        Ok(())
    }
}

fn phase_to_str(phase: Phase) -> &'static str {
    match phase {
        Phase::Setup => "setup",
        Phase::Initiative => "initiative",
        Phase::Active => "active",
        Phase::ActiveTurn => "active-turn",
        Phase::Completed => "completed",
    }
}

fn phase_from_str(s: &str) -> Result<Phase> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .with_context(|| format!("Unknown phase in combat_state: {s}"))
}
