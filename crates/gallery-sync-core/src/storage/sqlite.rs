use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::keys;

/// Schema version written by this build.
pub const CURRENT_VERSION: &str = "2.10";

const REQUIRED_TABLES: [&str; 3] = ["INFOS", "USERS", "SUBMISSIONS"];

pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open a store at the current version, initializing an empty file.
    ///
    /// Stores at an older version must go through the migration pipeline first.
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::ZERO)?;
        claim_writer(&conn).map_err(|e| locked_or(e.into(), path))?;
        configure_pragmas(&conn).map_err(|e| locked_or(e.into(), path))?;
        debug!("Holding the write lock on {}", path.display());
        let store = Store {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.ensure_current()?;
        Ok(store)
    }

    pub fn open_in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory()?;
        configure_pragmas(&conn)?;
        let store = Store { conn, path: None };
        store.ensure_current()?;
        Ok(store)
    }

    fn ensure_current(&self) -> crate::Result<()> {
        if !is_initialized(&self.conn)? {
            self.initialize()?;
            return Ok(());
        }
        let found = read_version(&self.conn)?.unwrap_or_default();
        if found != CURRENT_VERSION {
            return Err(crate::Error::VersionMismatch {
                found,
                expected: CURRENT_VERSION.to_string(),
            });
        }
        Ok(())
    }

    /// Create the current schema and its bookkeeping rows.
    pub fn initialize(&self) -> rusqlite::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(include_str!("schema.sql"))?;
        let name = self
            .path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        for (key, value) in [
            (keys::DBNAME, name.as_str()),
            (keys::VERSION, CURRENT_VERSION),
            (keys::USN, "0"),
            (keys::SUN, "0"),
            (keys::LASTUP, "0"),
            (keys::LASTUPT, "0"),
            (keys::LASTDL, "0"),
            (keys::LASTDLT, "0"),
            (keys::INDEX, "1"),
        ] {
            tx.execute(
                "INSERT OR IGNORE INTO INFOS (FIELD, VALUE) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }
        tx.commit()?;
        debug!("Store initialized at version {}", CURRENT_VERSION);
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn version(&self) -> rusqlite::Result<Option<String>> {
        read_version(&self.conn)
    }
}

/// Open a store file without any version handling.
///
/// Never waits on another writer: a held lock surfaces as `StoreLocked`.
pub(crate) fn open_connection(path: &Path) -> crate::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::ZERO)?;
    configure_pragmas(&conn).map_err(|e| locked_or(e.into(), path))?;
    Ok(conn)
}

/// Take the file's write lock and keep it until the connection closes.
fn claim_writer(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA locking_mode = EXCLUSIVE;
         BEGIN EXCLUSIVE;
         COMMIT;",
    )
}

/// Map `DatabaseBusy` on `path` to `StoreLocked`; other errors pass through.
pub(crate) fn locked_or(err: crate::Error, path: &Path) -> crate::Error {
    match err {
        crate::Error::Database(rusqlite::Error::SqliteFailure(e, _))
            if e.code == ErrorCode::DatabaseBusy =>
        {
            crate::Error::StoreLocked(path.display().to_string())
        }
        other => other,
    }
}

// Rollback journal keeps the store a single file, which migrations promote by rename.
fn configure_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = DELETE;
         PRAGMA synchronous = FULL;
         PRAGMA cache_size = -64000;",
    )?;
    debug!("SQLite pragmas configured (rollback journal, 64MB cache)");
    Ok(())
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// A store with none of the required tables has never been initialized.
pub fn is_initialized(conn: &Connection) -> rusqlite::Result<bool> {
    for table in REQUIRED_TABLES {
        if table_exists(conn, table)? {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn read_version(conn: &Connection) -> rusqlite::Result<Option<String>> {
    if !table_exists(conn, "INFOS")? {
        return Ok(None);
    }
    conn.query_row(
        "SELECT VALUE FROM INFOS WHERE FIELD = ?1",
        params![keys::VERSION],
        |row| row.get(0),
    )
    .optional()
}
