//! Upgrades an existing store file to [`CURRENT_VERSION`] one step at a time.
//!
//! Every step builds a staged copy next to the store, validates it against
//! the source and then swaps it in with two renames. Until that swap the
//! original file is never written to, so a step can be interrupted at any
//! point and resumed from its staged file on the next start.

mod steps;

use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::cancel::CancelGuard;
use crate::error::Error;
use crate::progress::ProgressReporter;
use crate::remote::RemoteSite;
use crate::storage::{
    is_initialized, keys, locked_or, open_connection, read_version, table_exists, CURRENT_VERSION,
};

pub use steps::UNRESOLVED;

/// Tables whose row counts must survive every step unchanged.
const COUNTED_TABLES: [&str; 2] = ["USERS", "SUBMISSIONS"];

/// Expected columns of one table in a staged store.
#[derive(Debug, Clone, Copy)]
pub struct TableShape {
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

/// Collaborators available to an upgrader while it resolves rows.
pub struct MigrationContext<'a> {
    /// `None` runs offline: rows needing the network fall back to local values.
    pub site: Option<&'a dyn RemoteSite>,
    pub cancel: &'a CancelGuard,
    pub reporter: &'a dyn ProgressReporter,
}

/// One transition between two consecutive store versions.
pub trait Upgrader {
    fn from_version(&self) -> &'static str;
    fn to_version(&self) -> &'static str;

    /// Tables of the target version, checked when resuming and after filling.
    fn shape(&self) -> &'static [TableShape];

    /// Create the target schema in `main` and copy rows from the attached `src`.
    ///
    /// Runs inside a single transaction.
    fn fill(&self, conn: &Connection) -> rusqlite::Result<()>;

    /// Keys of rows still carrying [`UNRESOLVED`].
    fn unresolved(&self, _conn: &Connection) -> rusqlite::Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Fetch and store the missing value of one row.
    fn resolve_row(&self, _conn: &Connection, _key: &str, _ctx: &MigrationContext) -> crate::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    pub steps: Vec<(String, String)>,
    pub backups: Vec<PathBuf>,
}

/// Registry of upgraders keyed by their source version.
pub struct MigrationPipeline {
    upgraders: Vec<Box<dyn Upgrader>>,
}

impl Default for MigrationPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationPipeline {
    pub fn new() -> Self {
        Self::with_upgraders(steps::registry())
    }

    pub fn with_upgraders(upgraders: Vec<Box<dyn Upgrader>>) -> Self {
        Self { upgraders }
    }

    fn find(&self, from: &str) -> Option<&dyn Upgrader> {
        self.upgraders
            .iter()
            .find(|up| up.from_version() == from)
            .map(|up| &**up)
    }

    /// Version of the store at `path` when it needs upgrading, else `None`.
    ///
    /// Missing files and stores without any tables are not migration targets.
    pub fn pending_version(&self, path: &Path) -> crate::Result<Option<String>> {
        self.recover_promotion(path)?;
        if !path.exists() {
            return Ok(None);
        }
        let conn = open_connection(path)?;
        if !is_initialized(&conn).map_err(|e| locked_or(e.into(), path))? {
            return Ok(None);
        }
        let version = stored_version(&conn).map_err(|e| locked_or(e, path))?;
        check_supported(&version)?;
        Ok((version != CURRENT_VERSION).then_some(version))
    }

    /// Run every step between the stored version and [`CURRENT_VERSION`].
    ///
    /// The version is re-read after each step. Returns `Err(Cancelled)` with
    /// the staged file of the current step left on disk when the guard fires.
    pub fn run(&self, path: &Path, ctx: &MigrationContext) -> crate::Result<MigrationReport> {
        let mut report = MigrationReport::default();
        loop {
            let Some(version) = self.pending_version(path)? else {
                if !report.steps.is_empty() {
                    info!("Store upgraded to {}", CURRENT_VERSION);
                }
                return Ok(report);
            };
            let upgrader = self
                .find(&version)
                .ok_or_else(|| Error::UnknownVersion(version.clone()))?;
            ctx.cancel.checkpoint()?;

            let backup = self.step(path, upgrader, ctx)?;
            report
                .steps
                .push((upgrader.from_version().to_string(), upgrader.to_version().to_string()));
            report.backups.push(backup);
        }
    }

    fn step(&self, path: &Path, up: &dyn Upgrader, ctx: &MigrationContext) -> crate::Result<PathBuf> {
        let (from, to) = (up.from_version(), up.to_version());
        info!("Upgrading store {} -> {}", from, to);
        ctx.reporter.on_migration_step(from, to);

        let staged = staged_path(path, to);
        let conn = self.open_staged(path, &staged, up)?;

        let pending = up.unresolved(&conn)?;
        let total = pending.len();
        if total > 0 {
            debug!("{} rows to resolve for {}", total, to);
        }
        for (done, key) in pending.iter().enumerate() {
            ctx.cancel.checkpoint()?;
            up.resolve_row(&conn, key, ctx)?;
            ctx.reporter.on_migration_row(done + 1, total);
        }

        if let Err(reason) = validate(&conn, up) {
            return Err(Error::MigrationCorrupt(format!(
                "{} -> {}: {}",
                from, to, reason
            )));
        }
        if !up.unresolved(&conn)?.is_empty() {
            return Err(Error::MigrationCorrupt(format!(
                "{} -> {}: rows still unresolved",
                from, to
            )));
        }

        conn.execute(
            "INSERT OR REPLACE INTO main.INFOS (FIELD, VALUE) VALUES (?1, ?2)",
            params![keys::VERSION, to],
        )?;
        conn.execute_batch("DETACH DATABASE src;")?;
        conn.close().map_err(|(_, e)| Error::Database(e))?;

        let backup = backup_path(path, from);
        promote(path, &staged, &backup)?;
        info!("Store is now at {} (backup {})", to, backup.display());
        Ok(backup)
    }

    /// Reuse a valid staged file from an interrupted attempt, or build a new one.
    fn open_staged(&self, source: &Path, staged: &Path, up: &dyn Upgrader) -> crate::Result<Connection> {
        if staged.exists() {
            let conn = open_with_source(staged, source)?;
            match validate(&conn, up) {
                Ok(()) => {
                    info!("Resuming from staged store {}", staged.display());
                    return Ok(conn);
                }
                Err(reason) => {
                    warn!("Discarding staged store {}: {}", staged.display(), reason);
                    drop(conn);
                    fs::remove_file(staged)?;
                }
            }
        }

        let conn = open_with_source(staged, source)?;
        let tx = conn.unchecked_transaction()?;
        up.fill(&tx)?;
        tx.commit()?;
        debug!("Staged store {} filled", staged.display());
        Ok(conn)
    }

    /// Finish a promotion that stopped between its two renames.
    fn recover_promotion(&self, path: &Path) -> crate::Result<()> {
        if path.exists() {
            return Ok(());
        }
        for up in &self.upgraders {
            let staged = staged_path(path, up.to_version());
            if staged.exists() && backup_path(path, up.from_version()).exists() {
                warn!("Completing interrupted upgrade to {}", up.to_version());
                fs::rename(&staged, path)?;
                return Ok(());
            }
        }
        Ok(())
    }
}

fn open_with_source(staged: &Path, source: &Path) -> crate::Result<Connection> {
    let conn = open_connection(staged)?;
    conn.execute(
        "ATTACH DATABASE ?1 AS src",
        params![source.to_string_lossy().into_owned()],
    )?;
    Ok(conn)
}

/// Shape of every target table plus row-count parity with `src`.
fn validate(conn: &Connection, up: &dyn Upgrader) -> Result<(), String> {
    for table in up.shape() {
        let columns = table_columns(conn, table.name).map_err(|e| e.to_string())?;
        if columns.is_empty() {
            return Err(format!("table {} is missing", table.name));
        }
        let expected: BTreeSet<String> = table.columns.iter().map(|c| c.to_string()).collect();
        if columns != expected {
            return Err(format!("table {} has columns {:?}", table.name, columns));
        }
    }
    for table in COUNTED_TABLES {
        let staged = count_rows(conn, "main", table).map_err(|e| e.to_string())?;
        let source = count_rows(conn, "src", table).map_err(|e| e.to_string())?;
        if staged != source {
            return Err(format!(
                "{} has {} rows, source has {}",
                table, staged, source
            ));
        }
    }
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<BTreeSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA main.table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(columns)
}

fn count_rows(conn: &Connection, schema: &str, table: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {}.{}", schema, table),
        [],
        |row| row.get(0),
    )
}

fn promote(path: &Path, staged: &Path, backup: &Path) -> std::io::Result<()> {
    if backup.exists() {
        fs::remove_file(backup)?;
    }
    fs::rename(path, backup)?;
    fs::rename(staged, path)
}

fn stored_version(conn: &Connection) -> crate::Result<String> {
    if !table_exists(conn, "INFOS")? {
        return Err(Error::UnknownVersion("no INFOS table".to_string()));
    }
    read_version(conn)?.ok_or_else(|| Error::UnknownVersion("no VERSION field".to_string()))
}

fn check_supported(version: &str) -> crate::Result<()> {
    let found = parse_version(version).ok_or_else(|| Error::UnknownVersion(version.to_string()))?;
    let supported = parse_version(CURRENT_VERSION)
        .ok_or_else(|| Error::UnknownVersion(CURRENT_VERSION.to_string()))?;
    if found > supported {
        return Err(Error::SchemaTooNew {
            found: version.to_string(),
            supported: CURRENT_VERSION.to_string(),
        });
    }
    Ok(())
}

/// `"2.10"` -> `(2, 10)`; minor parts compare numerically.
pub fn parse_version(version: &str) -> Option<(u32, u32)> {
    let (major, minor) = version.trim().split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    path.with_file_name(format!("{}.{}", stem, suffix))
}

/// `gallery.db` -> `gallery.v2.0.staged.db`
pub fn staged_path(path: &Path, to: &str) -> PathBuf {
    sibling(path, &format!("v{}.staged.db", to))
}

/// `gallery.db` -> `gallery.v1.0.bak.db`
pub fn backup_path(path: &Path, from: &str) -> PathBuf {
    sibling(path, &format!("v{}.bak.db", from))
}
