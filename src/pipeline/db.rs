//! Moment storage: monitoring sessions, detected moments, daily clip counters
//!
//! SQLite backend over rusqlite with the schema in `/sql/`, plus an in-memory
//! backend used by tests and dry runs.

use super::rate_limiter::DailyCount;
use super::types::{MomentRecord, TriggerKind};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Persistence for sessions, moments and daily counters
///
/// Tables written (see `/sql/` directory):
/// - `sessions` - INSERT on start, UPDATE `ended_at` on stop
/// - `moments` - INSERT (append-only, one row per dispatched clip)
/// - `daily_clip_counts` - UPSERT on streamer
#[async_trait]
pub trait MomentStore: Send + Sync {
    /// Open a monitoring session and return its id
    async fn start_session(&self, streamer: &str, started_at_ms: i64) -> Result<i64, StoreError>;

    /// Close a session. Unknown ids are an error.
    async fn end_session(&self, session_id: i64, ended_at_ms: i64) -> Result<(), StoreError>;

    /// Append a moment row and return its id
    ///
    /// SQL reference: `/sql/02_moments.sql`
    async fn log_moment(&self, record: &MomentRecord) -> Result<i64, StoreError>;

    /// Last persisted daily counter for a streamer, if any
    async fn load_daily_count(&self, streamer: &str) -> Result<Option<DailyCount>, StoreError>;

    /// Persist the counter after each accepted dispatch
    ///
    /// Operation: UPSERT (INSERT ... ON CONFLICT(streamer) DO UPDATE)
    async fn save_daily_count(&self, streamer: &str, daily: DailyCount) -> Result<(), StoreError>;
}

/// Run schema migrations from SQL files
///
/// Reads all .sql files from the specified directory, sorted by name, and
/// executes them. All SQL files must use "IF NOT EXISTS" clauses.
///
/// # Arguments
/// * `conn` - SQLite connection
/// * `schema_dir` - Path to directory containing .sql files
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: &str) -> Result<(), StoreError> {
    let schema_path = Path::new(schema_dir);

    if !schema_path.exists() {
        return Err(StoreError::SchemaDirMissing(schema_dir.to_string()));
    }

    conn.pragma_update(None, "journal_mode", "WAL")?;
    log::info!("📊 Enabled WAL mode for SQLite database");

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_dir);

    for entry in sql_files {
        let filename = entry.file_name().to_string_lossy().into_owned();
        log::info!("   ├─ Executing: {}", filename);

        let sql_content = fs::read_to_string(entry.path())?;
        conn.execute_batch(&sql_content)?;
    }

    log::info!("   └─ ✅ All schema migrations completed");

    Ok(())
}

const DATE_FORMAT: &str = "%Y-%m-%d";

fn parse_date(raw: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| StoreError::Corrupt(format!("daily_clip_counts.date {:?}: {}", raw, e)))
}

/// SQLite implementation of `MomentStore`
pub struct SqliteMomentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMomentStore {
    /// Open the database at `db_path`
    ///
    /// Does NOT create the schema. Call `run_schema_migrations` first, or use
    /// `open_with_schema`.
    pub fn new(db_path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open the database and apply every migration in `schema_dir`
    pub fn open_with_schema(db_path: &str, schema_dir: &str) -> Result<Self, StoreError> {
        let mut conn = Connection::open(db_path)?;
        run_schema_migrations(&mut conn, schema_dir)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Moments recorded for a session, oldest first
    pub fn moments_for_session(&self, session_id: i64) -> Result<Vec<MomentRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, stream_elapsed_seconds, trigger_type, trigger_data,
                    processed, clip_path, created_at
             FROM moments WHERE session_id = ? ORDER BY id",
        )?;

        let rows = stmt.query_map([session_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (session_id, elapsed, trigger_type, trigger_data, processed, clip_path, created_at) = row?;
            let trigger_type = TriggerKind::from_str(&trigger_type)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown trigger_type {:?}", trigger_type)))?;
            records.push(MomentRecord {
                session_id,
                stream_elapsed_seconds: elapsed,
                trigger_type,
                trigger_data: serde_json::from_str(&trigger_data)?,
                processed,
                clip_path,
                created_at,
            });
        }

        Ok(records)
    }
}

#[async_trait]
impl MomentStore for SqliteMomentStore {
    async fn start_session(&self, streamer: &str, started_at_ms: i64) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sessions (streamer, started_at) VALUES (?, ?)",
            rusqlite::params![streamer, started_at_ms],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn end_session(&self, session_id: i64, ended_at_ms: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE sessions SET ended_at = ? WHERE id = ?",
            rusqlite::params![ended_at_ms, session_id],
        )?;
        if updated == 0 {
            return Err(StoreError::SessionNotFound(session_id));
        }
        Ok(())
    }

    /// Insert a moment row
    ///
    /// `trigger_data` is serialized from a `serde_json::Value`, so it is
    /// always well-formed JSON.
    async fn log_moment(&self, record: &MomentRecord) -> Result<i64, StoreError> {
        let trigger_data = serde_json::to_string(&record.trigger_data)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO moments (
                session_id, stream_elapsed_seconds, trigger_type, trigger_data,
                processed, clip_path, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                record.session_id,
                record.stream_elapsed_seconds,
                record.trigger_type.as_str(),
                trigger_data,
                record.processed,
                record.clip_path,
                record.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn load_daily_count(&self, streamer: &str) -> Result<Option<DailyCount>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT date, count FROM daily_clip_counts WHERE streamer = ?",
                [streamer],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)),
            )
            .optional()?;

        match row {
            Some((date, count)) => Ok(Some(DailyCount {
                date: parse_date(&date)?,
                count,
            })),
            None => Ok(None),
        }
    }

    async fn save_daily_count(&self, streamer: &str, daily: DailyCount) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO daily_clip_counts (streamer, date, count, updated_at)
            VALUES (?, ?, ?, strftime('%s', 'now'))
            ON CONFLICT(streamer) DO UPDATE SET
                date = excluded.date,
                count = excluded.count,
                updated_at = excluded.updated_at
            "#,
            rusqlite::params![streamer, daily.date.format(DATE_FORMAT).to_string(), daily.count],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryTables {
    sessions: Vec<(String, i64, Option<i64>)>,
    moments: Vec<MomentRecord>,
    daily: HashMap<String, DailyCount>,
}

/// In-process `MomentStore` (tests, dry runs)
#[derive(Debug, Default, Clone)]
pub struct InMemoryMomentStore {
    tables: Arc<Mutex<MemoryTables>>,
}

impl InMemoryMomentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryTables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn moments(&self) -> Vec<MomentRecord> {
        self.lock().map(|t| t.moments.clone()).unwrap_or_default()
    }

    /// `(streamer, started_at, ended_at)` for session `id`
    pub fn session(&self, id: i64) -> Option<(String, i64, Option<i64>)> {
        let tables = self.lock().ok()?;
        let idx = usize::try_from(id).ok()?.checked_sub(1)?;
        tables.sessions.get(idx).cloned()
    }
}

#[async_trait]
impl MomentStore for InMemoryMomentStore {
    async fn start_session(&self, streamer: &str, started_at_ms: i64) -> Result<i64, StoreError> {
        let mut tables = self.lock()?;
        tables.sessions.push((streamer.to_string(), started_at_ms, None));
        Ok(tables.sessions.len() as i64)
    }

    async fn end_session(&self, session_id: i64, ended_at_ms: i64) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let session = usize::try_from(session_id)
            .ok()
            .and_then(|id| id.checked_sub(1))
            .and_then(|idx| tables.sessions.get_mut(idx))
            .ok_or(StoreError::SessionNotFound(session_id))?;
        session.2 = Some(ended_at_ms);
        Ok(())
    }

    async fn log_moment(&self, record: &MomentRecord) -> Result<i64, StoreError> {
        let mut tables = self.lock()?;
        tables.moments.push(record.clone());
        Ok(tables.moments.len() as i64)
    }

    async fn load_daily_count(&self, streamer: &str) -> Result<Option<DailyCount>, StoreError> {
        Ok(self.lock()?.daily.get(streamer).copied())
    }

    async fn save_daily_count(&self, streamer: &str, daily: DailyCount) -> Result<(), StoreError> {
        self.lock()?.daily.insert(streamer.to_string(), daily);
        Ok(())
    }
}
