//! `DuckDB` incident table.
//!
//! One table (default `cpd_incidents`) holds the current snapshot of the
//! police log, keyed by `id`. A `_meta` key/value table tracks sync state.
//! Every load runs inside a single transaction so a failed or timed-out
//! write leaves the previous contents untouched.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, SubsecRound};
use duckdb::{Connection, InterruptHandle};
use police_log_incident_models::StoredIncident;
use police_log_source::parsing::parse_socrata_timestamp;
use serde::{Deserialize, Serialize};

use crate::{DEFAULT_TABLE, DbError, LoadStrategy, TableWriter, WriteSummary, db};

/// Number of rows per INSERT chunk.
const CHUNK_SIZE: usize = 5_000;

/// Columns bound per row.
const COLUMNS_PER_ROW: usize = 13;

/// Timestamp format used when binding timestamps as text. `TIMESTAMP`
/// stores microseconds.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Default bound on a single load.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(120);

/// Meta key: RFC 3339 time of the last successful load.
pub const META_LAST_SYNCED_AT: &str = "last_synced_at";
/// Meta key: row count after the last successful load.
pub const META_RECORD_COUNT: &str = "record_count";
/// Meta key: display name of the source that produced the last load.
pub const META_SOURCE_NAME: &str = "source_name";

/// Where and how incidents are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Database file. `None` opens a transient in-memory database.
    pub path: Option<PathBuf>,
    /// Destination table name.
    pub table: String,
    /// Load strategy.
    pub strategy: LoadStrategy,
    /// Upper bound on a single load. A statement still running when it
    /// passes is interrupted.
    pub write_timeout: Duration,
    /// Recorded in `_meta` on each successful load.
    pub source_name: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: Some(crate::paths::default_db_path()),
            table: DEFAULT_TABLE.to_string(),
            strategy: LoadStrategy::default(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            source_name: None,
        }
    }
}

impl StoreConfig {
    /// In-memory store with default table and strategy.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            ..Self::default()
        }
    }
}

/// Summary of the stored snapshot, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStatus {
    /// Table name.
    pub table: String,
    /// Rows currently stored.
    pub record_count: u64,
    /// Latest stored `date_time`.
    pub latest_date_time: Option<NaiveDateTime>,
    /// Time of the last successful load.
    pub last_synced_at: Option<String>,
    /// Source that produced the last load.
    pub source_name: Option<String>,
}

/// The incidents table in a `DuckDB` database.
pub struct IncidentTable {
    conn: Mutex<Connection>,
    table: String,
    strategy: LoadStrategy,
    write_timeout: Duration,
    source_name: Option<String>,
}

impl std::fmt::Debug for IncidentTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncidentTable")
            .field("table", &self.table)
            .field("strategy", &self.strategy)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

impl IncidentTable {
    /// Opens the configured database and ensures the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the table name is invalid, or the connection or
    /// schema creation fails.
    pub fn open(config: &StoreConfig) -> Result<Self, DbError> {
        let table = db::validate_identifier(&config.table)?.to_string();

        let conn = match &config.path {
            Some(path) => db::open(path)?,
            None => db::open_in_memory()?,
        };

        create_schema(&conn, &table)?;

        Ok(Self {
            conn: Mutex::new(conn),
            table,
            strategy: config.strategy,
            write_timeout: config.write_timeout,
            source_name: config.source_name.clone(),
        })
    }

    /// Destination table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Configured load strategy.
    #[must_use]
    pub const fn strategy(&self) -> LoadStrategy {
        self.strategy
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// Returns the number of stored incidents.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn record_count(&self) -> Result<u64, DbError> {
        let conn = self.lock()?;
        count_rows(&conn, &self.table)
    }

    /// Returns the latest stored `date_time`, or `None` if the table is
    /// empty.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn max_date_time(&self) -> Result<Option<NaiveDateTime>, DbError> {
        let conn = self.lock()?;
        let result: Option<String> = conn.query_row(
            &format!("SELECT CAST(MAX(date_time) AS VARCHAR) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;

        Ok(result.and_then(|s| {
            let parsed = parse_socrata_timestamp(&s);
            if parsed.is_none() {
                log::warn!("Failed to parse stored timestamp: {s:?}");
            }
            parsed
        }))
    }

    /// Gets a value from the `_meta` table.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>, DbError> {
        let conn = self.lock()?;
        get_meta(&conn, key)
    }

    /// Collects the status shown by the CLI.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any query fails.
    pub fn status(&self) -> Result<TableStatus, DbError> {
        Ok(TableStatus {
            table: self.table.clone(),
            record_count: self.record_count()?,
            latest_date_time: self.max_date_time()?,
            last_synced_at: self.get_meta(META_LAST_SYNCED_AT)?,
            source_name: self.get_meta(META_SOURCE_NAME)?,
        })
    }

    /// Returns every stored incident ordered by `id`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or a stored timestamp cannot be
    /// read back.
    pub fn load_all(&self) -> Result<Vec<StoredIncident>, DbError> {
        self.select(&format!("{} ORDER BY id", select_sql(&self.table)), None)
    }

    /// Returns the `count` most recent incidents, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn recent(&self, count: u32) -> Result<Vec<StoredIncident>, DbError> {
        self.select(
            &format!(
                "{} ORDER BY date_time DESC, id DESC LIMIT ?",
                select_sql(&self.table)
            ),
            Some(i64::from(count)),
        )
    }

    fn select(&self, sql: &str, limit: Option<i64>) -> Result<Vec<StoredIncident>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;

        let rows = match limit {
            Some(limit) => stmt
                .query_map(duckdb::params![limit], StoredRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map([], StoredRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?,
        };

        rows.into_iter().map(StoredRow::into_incident).collect()
    }
}

impl TableWriter for IncidentTable {
    fn write(&self, incidents: &[StoredIncident]) -> Result<WriteSummary, DbError> {
        let mut conn = self.lock()?;
        let (rows_written, table_rows) = bounded(&mut conn, self.write_timeout, |conn| {
            self.load(conn, incidents, &Deadline::start(self.write_timeout))
        })?;

        log::info!(
            "Loaded {rows_written} incidents into {} ({} strategy, {table_rows} rows total)",
            self.table,
            self.strategy
        );

        Ok(WriteSummary {
            rows_written,
            table_rows,
            strategy: self.strategy,
        })
    }
}

impl IncidentTable {
    /// Runs one load in a transaction. Returns rows written and the table's
    /// row count after the load.
    fn load(
        &self,
        conn: &mut Connection,
        incidents: &[StoredIncident],
        deadline: &Deadline,
    ) -> Result<(u64, u64), DbError> {
        let tx = conn.transaction()?;

        match self.strategy {
            LoadStrategy::Replace => {
                tx.execute_batch(&format!("DROP TABLE IF EXISTS {};", self.table))?;
                create_schema(&tx, &self.table)?;
            }
            LoadStrategy::Upsert => create_schema(&tx, &self.table)?,
        }

        let rows_written = insert_incidents(&tx, &self.table, incidents, self.strategy, deadline)?;
        let table_rows = count_rows(&tx, &self.table)?;

        set_meta(&tx, META_RECORD_COUNT, &table_rows.to_string())?;
        set_meta(&tx, META_LAST_SYNCED_AT, &chrono::Utc::now().to_rfc3339())?;
        if let Some(name) = &self.source_name {
            set_meta(&tx, META_SOURCE_NAME, name)?;
        }

        deadline.check()?;
        tx.commit()?;

        Ok((rows_written, table_rows))
    }
}

/// Runs `f` on `conn`, interrupting whatever statement is executing once
/// `limit` has passed.
///
/// A `DuckDB` error raised after the interrupt fired is reported as
/// [`DbError::Timeout`].
fn bounded<T>(
    conn: &mut Connection,
    limit: Duration,
    f: impl FnOnce(&mut Connection) -> Result<T, DbError>,
) -> Result<T, DbError> {
    let watchdog = Watchdog::arm(conn.interrupt_handle(), limit);
    let result = f(conn);
    let fired = watchdog.disarm();

    if result.is_err()
        && !conn.is_autocommit()
        && let Err(e) = conn.execute_batch("ROLLBACK")
    {
        log::warn!("Rollback after failed write failed: {e}");
    }

    match result {
        Err(DbError::DuckDb(e)) if fired => {
            log::error!("Write exceeded {limit:?} and was interrupted ({e}); rolled back");
            Err(DbError::Timeout { limit })
        }
        other => other,
    }
}

/// Background timer that interrupts a connection when a limit passes.
struct Watchdog {
    cancel: mpsc::Sender<()>,
    fired: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Watchdog {
    fn arm(handle: Arc<InterruptHandle>, limit: Duration) -> Self {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let thread = std::thread::spawn(move || {
            if cancelled.recv_timeout(limit) == Err(RecvTimeoutError::Timeout) {
                flag.store(true, Ordering::SeqCst);
                handle.interrupt();
            }
        });

        Self {
            cancel,
            fired,
            thread,
        }
    }

    /// Stops the timer and waits for it. Returns `true` if it fired.
    fn disarm(self) -> bool {
        drop(self.cancel);
        if self.thread.join().is_err() {
            log::warn!("Write watchdog thread panicked");
        }
        self.fired.load(Ordering::SeqCst)
    }
}

/// Deadline checked between statements. Covers an interrupt that lands
/// while no statement is running.
struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    fn start(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    fn check(&self) -> Result<(), DbError> {
        if self.started.elapsed() >= self.limit {
            log::error!("Write exceeded {:?}; rolling back", self.limit);
            return Err(DbError::Timeout { limit: self.limit });
        }
        Ok(())
    }
}

/// Formats `ts` for a `TIMESTAMP` column, dropping sub-microsecond digits.
fn sql_timestamp(ts: NaiveDateTime) -> String {
    ts.trunc_subsecs(6).format(TIMESTAMP_FORMAT).to_string()
}

fn create_schema(conn: &Connection, table: &str) -> Result<(), DbError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            date_time TIMESTAMP NOT NULL,
            id BIGINT NOT NULL PRIMARY KEY,
            type TEXT NOT NULL,
            subtype TEXT,
            location TEXT NOT NULL,
            description TEXT,
            last_updated TIMESTAMP,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            day INTEGER NOT NULL,
            hour INTEGER NOT NULL,
            minute INTEGER NOT NULL,
            second INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS _meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );"
    ))?;

    Ok(())
}

/// Inserts `incidents` with chunked multi-row INSERTs, checking the
/// deadline after every chunk.
///
/// Returns the number of rows affected.
fn insert_incidents(
    conn: &Connection,
    table: &str,
    incidents: &[StoredIncident],
    strategy: LoadStrategy,
    deadline: &Deadline,
) -> Result<u64, DbError> {
    let mut total_inserted = 0u64;

    for chunk in incidents.chunks(CHUNK_SIZE) {
        let mut sql = format!(
            "INSERT INTO {table} (
                date_time, id, type, subtype, location, description,
                last_updated, year, month, day, hour, minute, second
            ) VALUES "
        );

        for i in 0..chunk.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str("(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)");
        }

        if strategy == LoadStrategy::Upsert {
            sql.push_str(
                " ON CONFLICT (id) DO UPDATE SET
                    date_time = EXCLUDED.date_time,
                    type = EXCLUDED.type,
                    subtype = EXCLUDED.subtype,
                    location = EXCLUDED.location,
                    description = EXCLUDED.description,
                    last_updated = EXCLUDED.last_updated,
                    year = EXCLUDED.year,
                    month = EXCLUDED.month,
                    day = EXCLUDED.day,
                    hour = EXCLUDED.hour,
                    minute = EXCLUDED.minute,
                    second = EXCLUDED.second",
            );
        }

        let mut stmt = conn.prepare(&sql)?;
        let mut param_idx = 1usize;

        for incident in chunk {
            let parts = incident.parts();

            stmt.raw_bind_parameter(
                param_idx,
                sql_timestamp(incident.date_time),
            )?;
            stmt.raw_bind_parameter(param_idx + 1, incident.id)?;
            stmt.raw_bind_parameter(param_idx + 2, &incident.incident_type)?;
            stmt.raw_bind_parameter(param_idx + 3, incident.subtype.as_deref())?;
            stmt.raw_bind_parameter(param_idx + 4, &incident.location)?;
            stmt.raw_bind_parameter(param_idx + 5, incident.description.as_deref())?;
            stmt.raw_bind_parameter(
                param_idx + 6,
                incident.last_updated.map(sql_timestamp),
            )?;
            stmt.raw_bind_parameter(param_idx + 7, parts.year)?;
            stmt.raw_bind_parameter(param_idx + 8, i64::from(parts.month))?;
            stmt.raw_bind_parameter(param_idx + 9, i64::from(parts.day))?;
            stmt.raw_bind_parameter(param_idx + 10, i64::from(parts.hour))?;
            stmt.raw_bind_parameter(param_idx + 11, i64::from(parts.minute))?;
            stmt.raw_bind_parameter(param_idx + 12, i64::from(parts.second))?;

            param_idx += COLUMNS_PER_ROW;
        }

        let rows = stmt.raw_execute()?;
        total_inserted += u64::try_from(rows).unwrap_or(0);
        log::debug!("Inserted chunk of {rows} rows into {table}");

        deadline.check()?;
    }

    Ok(total_inserted)
}

fn count_rows(conn: &Connection, table: &str) -> Result<u64, DbError> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    Ok(u64::try_from(count).unwrap_or(0))
}

fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>, DbError> {
    let mut stmt = conn.prepare("SELECT value FROM _meta WHERE key = ?")?;
    match stmt.query_row([key], |row| row.get(0)) {
        Ok(v) => Ok(Some(v)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DbError::DuckDb(e)),
    }
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO _meta (key, value) VALUES (?, ?)
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        duckdb::params![key, value],
    )?;
    Ok(())
}

fn select_sql(table: &str) -> String {
    format!(
        "SELECT id, CAST(date_time AS VARCHAR), type, subtype, location, description,
                CAST(last_updated AS VARCHAR)
         FROM {table}"
    )
}

/// A stored row with timestamps still in their text form.
struct StoredRow {
    id: i64,
    date_time: String,
    incident_type: String,
    subtype: Option<String>,
    location: String,
    description: Option<String>,
    last_updated: Option<String>,
}

impl StoredRow {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            date_time: row.get(1)?,
            incident_type: row.get(2)?,
            subtype: row.get(3)?,
            location: row.get(4)?,
            description: row.get(5)?,
            last_updated: row.get(6)?,
        })
    }

    fn into_incident(self) -> Result<StoredIncident, DbError> {
        let date_time =
            parse_socrata_timestamp(&self.date_time).ok_or_else(|| DbError::Conversion {
                message: format!("unreadable date_time {:?} for id {}", self.date_time, self.id),
            })?;

        Ok(StoredIncident {
            id: self.id,
            date_time,
            incident_type: self.incident_type,
            subtype: self.subtype,
            location: self.location,
            description: self.description,
            last_updated: self.last_updated.as_deref().and_then(parse_socrata_timestamp),
        })
    }
}
