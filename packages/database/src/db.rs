//! `DuckDB` connection utilities.

use std::path::Path;

use duckdb::Connection;

use crate::DbError;

/// Session settings applied to every connection.
const SESSION_SETTINGS: &str = "SET threads = 4;
     SET memory_limit = '512MB';";

/// Opens (or creates) a `DuckDB` database file, creating its parent
/// directory if needed.
///
/// # Errors
///
/// Returns [`DbError`] if the directory or connection cannot be created.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        crate::paths::ensure_dir(parent)?;
    }

    let conn = Connection::open(path)?;
    conn.execute_batch(SESSION_SETTINGS)?;

    Ok(conn)
}

/// Opens a transient in-memory database.
///
/// # Errors
///
/// Returns [`DbError`] if the connection cannot be created.
pub fn open_in_memory() -> Result<Connection, DbError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SESSION_SETTINGS)?;
    Ok(conn)
}

/// Returns `name` if it is a plain SQL identifier (ASCII letters, digits
/// and underscores, not starting with a digit).
///
/// Table names are interpolated into SQL, so anything else is rejected.
///
/// # Errors
///
/// Returns [`DbError::InvalidTableName`] otherwise.
pub fn validate_identifier(name: &str) -> Result<&str, DbError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(name)
    } else {
        Err(DbError::InvalidTableName {
            name: name.to_string(),
        })
    }
}
