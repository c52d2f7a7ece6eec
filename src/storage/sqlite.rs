//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::session::Credential;
use crate::state::{RunStatus, RunType};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{FavoriteRecord, InsertOutcome, RunFinalization, RunRecord};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;

const RUN_COLUMNS: &str = "id, run_type, start_time, end_time, status, items_count, \
     duration_seconds, log_ref, error_message, config_hash";

const FAVORITE_COLUMNS: &str = "id, created_at, collected_at, url, user_id, user_name, \
     text, text_html, is_long_text, links, source, mblogid";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let start_time: String = row.get(2)?;
    let end_time: Option<String> = row.get(3)?;
    let items_count: i64 = row.get(5)?;

    Ok(RunRecord {
        run_id: row.get(0)?,
        run_type: RunType::from_db_string(&row.get::<_, String>(1)?).unwrap_or(RunType::Manual),
        start_time: parse_timestamp(2, &start_time)?,
        end_time: end_time.map(|t| parse_timestamp(3, &t)).transpose()?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Failed),
        items_count: items_count.max(0) as u64,
        duration_seconds: row.get(6)?,
        log_ref: row.get(7)?,
        error_message: row.get(8)?,
        config_hash: row.get(9)?,
    })
}

fn row_to_favorite(row: &Row<'_>) -> rusqlite::Result<FavoriteRecord> {
    let collected_at: String = row.get(2)?;
    let links: String = row.get(9)?;

    Ok(FavoriteRecord {
        id: row.get(0)?,
        created_at: row.get(1)?,
        collected_at: parse_timestamp(2, &collected_at)?,
        url: row.get(3)?,
        user_id: row.get(4)?,
        user_name: row.get(5)?,
        text: row.get(6)?,
        text_html: row.get(7)?,
        is_long_text: row.get::<_, i64>(8)? != 0,
        links: serde_json::from_str(&links)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?,
        source: row.get(10)?,
        mblogid: row.get(11)?,
    })
}

impl Storage for SqliteStorage {
    // ===== Run History =====

    fn create_run(
        &mut self,
        run_type: RunType,
        start_time: DateTime<Utc>,
        config_hash: &str,
    ) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO runs (run_type, start_time, status, config_hash) VALUES (?1, ?2, ?3, ?4)",
            params![
                run_type.to_db_string(),
                start_time.to_rfc3339(),
                RunStatus::Running.to_db_string(),
                config_hash
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn set_run_log_ref(&mut self, run_id: i64, log_ref: &str) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE runs SET log_ref = ?1 WHERE id = ?2",
            params![log_ref, run_id],
        )?;
        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn update_run_items(&mut self, run_id: i64, items_count: u64) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE runs SET items_count = ?1 WHERE id = ?2 AND status = ?3",
            params![
                items_count as i64,
                run_id,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(())
    }

    fn finalize_run(
        &mut self,
        run_id: i64,
        finalization: &RunFinalization,
    ) -> StorageResult<()> {
        if !RunStatus::Running.can_transition_to(finalization.status) {
            return Err(StorageError::Database(format!(
                "cannot finalize run {} as {}",
                run_id, finalization.status
            )));
        }

        // The status guard makes finalization a one-shot transition
        let changed = self.conn.execute(
            "UPDATE runs
             SET status = ?1, items_count = ?2, end_time = ?3, duration_seconds = ?4,
                 error_message = ?5
             WHERE id = ?6 AND status = ?7",
            params![
                finalization.status.to_db_string(),
                finalization.items_count as i64,
                finalization.end_time.to_rfc3339(),
                finalization.duration_seconds,
                finalization.error_message,
                run_id,
                RunStatus::Running.to_db_string()
            ],
        )?;

        if changed == 0 {
            let existing = self.get_run(run_id)?;
            return Err(StorageError::RunAlreadyFinalized {
                run_id,
                status: existing.status,
            });
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
        self.conn
            .query_row(&sql, params![run_id], row_to_run)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn list_runs(&self, limit: Option<usize>) -> StorageResult<Vec<RunRecord>> {
        let sql = format!("SELECT {} FROM runs ORDER BY id DESC LIMIT ?1", RUN_COLUMNS);
        // SQLite treats a negative limit as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let mut stmt = self.conn.prepare(&sql)?;
        let runs = stmt
            .query_map(params![limit], row_to_run)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    fn get_runs_by_status(&self, status: RunStatus) -> StorageResult<Vec<RunRecord>> {
        let sql = format!("SELECT {} FROM runs WHERE status = ?1 ORDER BY id", RUN_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let runs = stmt
            .query_map(params![status.to_db_string()], row_to_run)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    fn count_runs_by_status(&self, status: RunStatus) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM runs WHERE status = ?1",
            params![status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Favorites =====

    fn insert_if_absent(&mut self, record: &FavoriteRecord) -> StorageResult<InsertOutcome> {
        let links = serde_json::to_string(&record.links)?;
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO favorites
             (id, created_at, collected_at, url, user_id, user_name, text, text_html,
              is_long_text, links, source, mblogid)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.id,
                record.created_at,
                record.collected_at.to_rfc3339(),
                record.url,
                record.user_id,
                record.user_name,
                record.text,
                record.text_html,
                record.is_long_text as i64,
                links,
                record.source,
                record.mblogid
            ],
        )?;

        Ok(if changed == 1 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Duplicate
        })
    }

    fn contains_favorite(&self, id: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM favorites WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    fn load_favorite_ids(&self) -> StorageResult<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM favorites")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    fn get_favorite(&self, id: &str) -> StorageResult<Option<FavoriteRecord>> {
        let sql = format!("SELECT {} FROM favorites WHERE id = ?1", FAVORITE_COLUMNS);
        let record = self
            .conn
            .query_row(&sql, params![id], row_to_favorite)
            .optional()?;
        Ok(record)
    }

    fn count_favorites(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM favorites", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Credential =====

    fn save_credential(&mut self, credential: &Credential) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO credential
             (id, cookie, user_id, user_name, last_validated, valid)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)",
            params![
                credential.cookie,
                credential.user_id,
                credential.user_name,
                credential.last_validated.map(|t| t.to_rfc3339()),
                credential.valid as i64
            ],
        )?;
        Ok(())
    }

    fn load_credential(&self) -> StorageResult<Option<Credential>> {
        let credential = self
            .conn
            .query_row(
                "SELECT cookie, user_id, user_name, last_validated, valid
                 FROM credential WHERE id = 1",
                [],
                |row| {
                    let last_validated: Option<String> = row.get(3)?;
                    Ok(Credential {
                        cookie: row.get(0)?,
                        user_id: row.get(1)?,
                        user_name: row.get(2)?,
                        last_validated: last_validated
                            .map(|t| parse_timestamp(3, &t))
                            .transpose()?,
                        valid: row.get::<_, i64>(4)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(credential)
    }
}
