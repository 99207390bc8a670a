use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::{Deserialize, Serialize};

use crate::aggregate::TeamPrediction;
use crate::error::Result;
use crate::fixtures::CompetitionId;
use crate::params::ModelParams;
use crate::rating::TeamRating;

const DATA_DIR: &str = "season_forecast";
const DB_FILE: &str = "forecast.sqlite";
pub const DB_ENV: &str = "FORECAST_DB";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A finished aggregation, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSimulationRun {
    pub competition_id: CompetitionId,
    pub created_at: String,
    pub trial_count: u32,
    pub seed: u64,
    pub params_version: String,
    pub params: ModelParams,
    pub ratings: Vec<TeamRating>,
    pub predictions: Vec<TeamPrediction>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRun {
    pub simulation_id: i64,
    pub competition_id: CompetitionId,
    pub created_at: String,
    pub trial_count: u32,
    pub seed: u64,
    pub params_version: String,
    pub params: ModelParams,
    pub ratings: Vec<TeamRating>,
    pub predictions: Vec<TeamPrediction>,
    pub duration_ms: u64,
    pub is_latest: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHeader {
    pub simulation_id: i64,
    pub competition_id: CompetitionId,
    pub created_at: String,
    pub trial_count: u32,
    pub params_version: String,
    pub duration_ms: u64,
    pub is_latest: bool,
}

struct RawRun {
    simulation_id: i64,
    competition_id: i64,
    created_at: String,
    trial_count: i64,
    seed: i64,
    params_version: String,
    params_json: String,
    ratings_json: String,
    predictions_json: String,
    duration_ms: i64,
    is_latest: bool,
}

impl RawRun {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            simulation_id: row.get(0)?,
            competition_id: row.get(1)?,
            created_at: row.get(2)?,
            trial_count: row.get(3)?,
            seed: row.get(4)?,
            params_version: row.get(5)?,
            params_json: row.get(6)?,
            ratings_json: row.get(7)?,
            predictions_json: row.get(8)?,
            duration_ms: row.get(9)?,
            is_latest: row.get(10)?,
        })
    }

    fn decode(self) -> Result<SimulationRun> {
        Ok(SimulationRun {
            simulation_id: self.simulation_id,
            competition_id: self.competition_id as CompetitionId,
            created_at: self.created_at,
            trial_count: self.trial_count as u32,
            // Stored bit-for-bit in a signed column.
            seed: self.seed as u64,
            params_version: self.params_version,
            params: serde_json::from_str(&self.params_json)?,
            ratings: serde_json::from_str(&self.ratings_json)?,
            predictions: serde_json::from_str(&self.predictions_json)?,
            duration_ms: self.duration_ms.max(0) as u64,
            is_latest: self.is_latest,
        })
    }
}

const RUN_COLUMNS: &str = "simulation_id, competition_id, created_at, trial_count, seed, \
     params_version, params_json, ratings_json, predictions_json, duration_ms, is_latest";

/// Durable home of simulation runs with at most one latest run per competition.
pub struct ResultStore {
    conn: Connection,
}

impl ResultStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Stores `run` as the competition's latest run.
    ///
    /// Clearing the previous latest row and inserting the new one happen in one
    /// `BEGIN IMMEDIATE` transaction, so concurrent writers queue on the database write lock
    /// and whichever commits last owns the flag.
    pub fn save(&mut self, run: &NewSimulationRun) -> Result<i64> {
        let params_json = serde_json::to_string(&run.params)?;
        let ratings_json = serde_json::to_string(&run.ratings)?;
        let predictions_json = serde_json::to_string(&run.predictions)?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let cleared = tx.execute(
            "UPDATE simulation_runs SET is_latest = 0 WHERE competition_id = ?1 AND is_latest = 1",
            params![run.competition_id as i64],
        )?;
        tx.execute(
            r#"
            INSERT INTO simulation_runs (
                competition_id, created_at, trial_count, seed, params_version,
                params_json, ratings_json, predictions_json, duration_ms, is_latest
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1)
            "#,
            params![
                run.competition_id as i64,
                run.created_at,
                run.trial_count as i64,
                run.seed as i64,
                run.params_version,
                params_json,
                ratings_json,
                predictions_json,
                run.duration_ms as i64,
            ],
        )?;
        let simulation_id = tx.last_insert_rowid();
        tx.commit()?;

        info!(
            "stored simulation {simulation_id} as latest for competition {} (replaced {cleared})",
            run.competition_id
        );
        Ok(simulation_id)
    }

    pub fn get_latest(&self, competition_id: CompetitionId) -> Result<Option<SimulationRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM simulation_runs WHERE competition_id = ?1 AND is_latest = 1"
        );
        let raw = self
            .conn
            .query_row(&sql, params![competition_id as i64], RawRun::from_row)
            .optional()?;
        raw.map(RawRun::decode).transpose()
    }

    pub fn get_run(&self, simulation_id: i64) -> Result<Option<SimulationRun>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM simulation_runs WHERE simulation_id = ?1");
        let raw = self
            .conn
            .query_row(&sql, params![simulation_id], RawRun::from_row)
            .optional()?;
        raw.map(RawRun::decode).transpose()
    }

    /// Run headers for a competition, newest first.
    pub fn list_runs(&self, competition_id: CompetitionId) -> Result<Vec<RunHeader>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT simulation_id, competition_id, created_at, trial_count,
                   params_version, duration_ms, is_latest
            FROM simulation_runs
            WHERE competition_id = ?1
            ORDER BY simulation_id DESC
            "#,
        )?;
        let rows = stmt.query_map(params![competition_id as i64], |row| {
            Ok(RunHeader {
                simulation_id: row.get(0)?,
                competition_id: row.get::<_, i64>(1)? as CompetitionId,
                created_at: row.get(2)?,
                trial_count: row.get::<_, i64>(3)? as u32,
                params_version: row.get(4)?,
                duration_ms: row.get::<_, i64>(5)?.max(0) as u64,
                is_latest: row.get(6)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn latest_count(&self, competition_id: CompetitionId) -> Result<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM simulation_runs WHERE competition_id = ?1 AND is_latest = 1",
            params![competition_id as i64],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Deletes the oldest runs beyond the newest `keep`, never the latest one.
    pub fn prune(&mut self, competition_id: CompetitionId, keep: usize) -> Result<usize> {
        let deleted = self.conn.execute(
            r#"
            DELETE FROM simulation_runs
            WHERE competition_id = ?1
              AND is_latest = 0
              AND simulation_id NOT IN (
                  SELECT simulation_id FROM simulation_runs
                  WHERE competition_id = ?1
                  ORDER BY simulation_id DESC
                  LIMIT ?2
              )
            "#,
            params![competition_id as i64, keep as i64],
        )?;
        debug!("pruned {deleted} runs for competition {competition_id}");
        Ok(deleted)
    }
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS simulation_runs (
            simulation_id INTEGER PRIMARY KEY AUTOINCREMENT,
            competition_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            trial_count INTEGER NOT NULL,
            seed INTEGER NOT NULL,
            params_version TEXT NOT NULL,
            params_json TEXT NOT NULL,
            ratings_json TEXT NOT NULL,
            predictions_json TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            is_latest INTEGER NOT NULL DEFAULT 0 CHECK (is_latest IN (0, 1))
        );
        CREATE INDEX IF NOT EXISTS idx_runs_competition
            ON simulation_runs(competition_id, simulation_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_runs_one_latest
            ON simulation_runs(competition_id) WHERE is_latest = 1;
        "#,
    )?;
    Ok(())
}

/// `$FORECAST_DB`, else `$XDG_DATA_HOME/season_forecast/forecast.sqlite`, else `~/.local/share/...`.
pub fn default_db_path() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var(DB_ENV)
        && !raw.trim().is_empty()
    {
        return Some(PathBuf::from(raw.trim()));
    }
    if let Ok(base) = std::env::var("XDG_DATA_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join(DATA_DIR).join(DB_FILE));
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(DATA_DIR)
            .join(DB_FILE),
    )
}
