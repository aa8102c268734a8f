use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use cburn_core::{ModelUsage, SessionStats};
use rusqlite::{Connection, Row, params};

const MIGRATION_0001: &str = include_str!("../migrations/0001_init.sql");

const MIGRATIONS: &[(&str, &str)] = &[("0001_init", MIGRATION_0001)];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cache dir error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Tracked identity of a parsed file: reparse when either field changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub mtime_ns: i64,
    pub size_bytes: i64,
}

/// SQLite-backed cache of parsed session metrics.
pub struct Cache {
    conn: Connection,
}

impl Cache {
    /// Opens or creates the cache database, applying pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(dir) = path.as_ref().parent() {
            fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let mut cache = Self { conn };
        cache.migrate()?;
        Ok(cache)
    }

    /// Opens an in-memory cache, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let mut cache = Self { conn };
        cache.migrate()?;
        Ok(cache)
    }

    fn migrate(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        for (_name, sql) in MIGRATIONS {
            tx.execute_batch(sql)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Returns file_path -> stamp for every tracked file.
    pub fn tracked_files(&self) -> Result<HashMap<String, FileStamp>> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_path, mtime_ns, size_bytes FROM file_tracker")?;
        let mut rows = stmt.query([])?;
        let mut tracked = HashMap::new();
        while let Some(row) = rows.next()? {
            let path: String = row.get(0)?;
            tracked.insert(
                path,
                FileStamp {
                    mtime_ns: row.get(1)?,
                    size_bytes: row.get(2)?,
                },
            );
        }
        Ok(tracked)
    }

    /// Stores a parsed session, its per-model rollups, and the file stamp in
    /// one transaction.
    pub fn save_session(&mut self, stats: &SessionStats, stamp: FileStamp) -> Result<()> {
        let tx = self.conn.transaction()?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        tx.execute(
            r#"
            INSERT OR REPLACE INTO sessions (
              session_id, project, project_path, file_path, is_subagent, parent_session,
              start_time, end_time, duration_secs, user_messages, api_calls,
              input_tokens, output_tokens, cache_creation_5m, cache_creation_1h,
              cache_read_tokens, estimated_cost, cache_hit_rate, file_mtime_ns, file_size, parsed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
            "#,
            params![
                stats.session_id,
                stats.project,
                stats.project_path,
                stats.file_path,
                stats.is_subagent as i64,
                stats.parent_session,
                time_to_column(stats.start_time),
                time_to_column(stats.end_time),
                stats.duration_secs,
                stats.user_messages as i64,
                stats.api_calls as i64,
                stats.input_tokens as i64,
                stats.output_tokens as i64,
                stats.cache_creation_5m_tokens as i64,
                stats.cache_creation_1h_tokens as i64,
                stats.cache_read_tokens as i64,
                stats.estimated_cost,
                stats.cache_hit_rate,
                stamp.mtime_ns,
                stamp.size_bytes,
                now,
            ],
        )?;

        tx.execute(
            "DELETE FROM session_models WHERE session_id = ?1",
            params![stats.session_id],
        )?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO session_models (
                  session_id, model, api_calls, input_tokens, output_tokens,
                  cache_creation_5m, cache_creation_1h, cache_read_tokens, estimated_cost
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for (model, usage) in &stats.models {
                stmt.execute(params![
                    stats.session_id,
                    model,
                    usage.api_calls as i64,
                    usage.input_tokens as i64,
                    usage.output_tokens as i64,
                    usage.cache_creation_5m_tokens as i64,
                    usage.cache_creation_1h_tokens as i64,
                    usage.cache_read_tokens as i64,
                    usage.estimated_cost,
                ])?;
            }
        }

        tx.execute(
            r#"
            INSERT OR REPLACE INTO file_tracker (file_path, mtime_ns, size_bytes)
            VALUES (?1, ?2, ?3)
            "#,
            params![stats.file_path, stamp.mtime_ns, stamp.size_bytes],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Reads every cached session, with model rollups batch-loaded and
    /// attached by session id. Sessions without rollups get an empty map.
    pub fn load_all_sessions(&self) -> Result<Vec<SessionStats>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT session_id, project, project_path, file_path, is_subagent, parent_session,
                   start_time, end_time, duration_secs, user_messages, api_calls,
                   input_tokens, output_tokens, cache_creation_5m, cache_creation_1h,
                   cache_read_tokens, estimated_cost, cache_hit_rate
            FROM sessions
            "#,
        )?;
        let mut sessions = stmt
            .query_map([], row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut index: HashMap<String, usize> = HashMap::with_capacity(sessions.len());
        for (i, s) in sessions.iter().enumerate() {
            index.insert(s.session_id.clone(), i);
        }

        let mut stmt = self.conn.prepare(
            r#"
            SELECT session_id, model, api_calls, input_tokens, output_tokens,
                   cache_creation_5m, cache_creation_1h, cache_read_tokens, estimated_cost
            FROM session_models
            "#,
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let session_id: String = row.get(0)?;
            let model: String = row.get(1)?;
            let usage = ModelUsage {
                api_calls: row.get::<_, i64>(2)? as u64,
                input_tokens: row.get::<_, i64>(3)? as u64,
                output_tokens: row.get::<_, i64>(4)? as u64,
                cache_creation_5m_tokens: row.get::<_, i64>(5)? as u64,
                cache_creation_1h_tokens: row.get::<_, i64>(6)? as u64,
                cache_read_tokens: row.get::<_, i64>(7)? as u64,
                estimated_cost: row.get(8)?,
            };
            if let Some(&idx) = index.get(&session_id) {
                sessions[idx].models.insert(model, usage);
            }
        }

        Ok(sessions)
    }

    /// Removes a session row; model rollups cascade.
    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM sessions WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(())
    }

    /// Removes a file tracking entry.
    pub fn delete_file_tracker(&self, file_path: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM file_tracker WHERE file_path = ?1",
            params![file_path],
        )?;
        Ok(())
    }

    pub fn session_count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
            .map_err(StoreError::from)
    }
}

fn time_to_column(value: Option<DateTime<Utc>>) -> String {
    match value {
        Some(t) => t.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => String::new(),
    }
}

fn column_to_time(value: Option<String>) -> Option<DateTime<Utc>> {
    let value = value?;
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(&value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn row_to_session(row: &Row<'_>) -> std::result::Result<SessionStats, rusqlite::Error> {
    Ok(SessionStats {
        session_id: row.get(0)?,
        project: row.get(1)?,
        project_path: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        file_path: row.get(3)?,
        is_subagent: row.get::<_, i64>(4)? != 0,
        parent_session: row
            .get::<_, Option<String>>(5)?
            .filter(|value| !value.is_empty()),
        start_time: column_to_time(row.get(6)?),
        end_time: column_to_time(row.get(7)?),
        duration_secs: row.get(8)?,
        user_messages: row.get::<_, i64>(9)? as u64,
        api_calls: row.get::<_, i64>(10)? as u64,
        input_tokens: row.get::<_, i64>(11)? as u64,
        output_tokens: row.get::<_, i64>(12)? as u64,
        cache_creation_5m_tokens: row.get::<_, i64>(13)? as u64,
        cache_creation_1h_tokens: row.get::<_, i64>(14)? as u64,
        cache_read_tokens: row.get::<_, i64>(15)? as u64,
        estimated_cost: row.get(16)?,
        cache_hit_rate: row.get(17)?,
        models: HashMap::new(),
    })
}
