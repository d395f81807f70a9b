use rusqlite::{params, Connection};
use tracing::{debug, warn};

use super::{MigrationContext, TableShape, Upgrader};
use crate::remote::parse::normalize_tags;
use crate::remote::ProbeStatus;
use crate::storage::lists::{format_folders, normalize_list, parse_folders};
use crate::storage::{create_indices, keys};

/// Placeholder for values that must come from the network.
pub const UNRESOLVED: &str = "<unresolved>";

const INFOS: TableShape = TableShape {
    name: "INFOS",
    columns: &["FIELD", "VALUE"],
};

const USERS_2_0: TableShape = TableShape {
    name: "USERS",
    columns: &["USER", "USERFULL", "FOLDERS", "GALLERY", "SCRAPS", "FAVORITES", "EXTRAS"],
};

const SUBMISSIONS_1_0: TableShape = TableShape {
    name: "SUBMISSIONS",
    columns: &[
        "ID", "AUTHOR", "AUTHORURL", "TITLE", "UDATE", "DESCRIPTION", "TAGS", "CATEGORY",
        "SPECIES", "GENDER", "RATING", "FILELINK", "FILENAME", "LOCATION",
    ],
};

const SUBMISSIONS_2_3: TableShape = TableShape {
    name: "SUBMISSIONS",
    columns: &[
        "ID", "AUTHOR", "AUTHORURL", "TITLE", "UDATE", "DESCRIPTION", "TAGS", "CATEGORY",
        "SPECIES", "GENDER", "RATING", "FILELINK", "FILENAME", "LOCATION", "SERVER",
    ],
};

const SUBMISSIONS_2_7: TableShape = TableShape {
    name: "SUBMISSIONS",
    columns: &[
        "ID", "AUTHOR", "AUTHORURL", "TITLE", "UDATE", "DESCRIPTION", "TAGS", "CATEGORY",
        "SPECIES", "GENDER", "RATING", "FILELINK", "FILEEXT", "LOCATION", "SERVER",
    ],
};

const INFOS_SQL: &str = "CREATE TABLE IF NOT EXISTS INFOS (
    FIELD TEXT PRIMARY KEY NOT NULL,
    VALUE TEXT
);";

const USERS_2_0_SQL: &str = "CREATE TABLE IF NOT EXISTS USERS (
    USER TEXT PRIMARY KEY NOT NULL,
    USERFULL TEXT NOT NULL DEFAULT '',
    FOLDERS TEXT NOT NULL DEFAULT '',
    GALLERY TEXT NOT NULL DEFAULT '',
    SCRAPS TEXT NOT NULL DEFAULT '',
    FAVORITES TEXT NOT NULL DEFAULT '',
    EXTRAS TEXT NOT NULL DEFAULT ''
);";

const SUBMISSIONS_1_0_SQL: &str = "CREATE TABLE IF NOT EXISTS SUBMISSIONS (
    ID INTEGER PRIMARY KEY NOT NULL,
    AUTHOR TEXT NOT NULL DEFAULT '',
    AUTHORURL TEXT NOT NULL DEFAULT '',
    TITLE TEXT NOT NULL DEFAULT '',
    UDATE CHAR(10) NOT NULL DEFAULT '',
    DESCRIPTION TEXT NOT NULL DEFAULT '',
    TAGS TEXT NOT NULL DEFAULT '',
    CATEGORY TEXT NOT NULL DEFAULT '',
    SPECIES TEXT NOT NULL DEFAULT '',
    GENDER TEXT NOT NULL DEFAULT '',
    RATING TEXT NOT NULL DEFAULT '',
    FILELINK TEXT NOT NULL DEFAULT '',
    FILENAME TEXT NOT NULL DEFAULT '',
    LOCATION TEXT NOT NULL DEFAULT ''
);";

const SUBMISSIONS_2_3_SQL: &str = "CREATE TABLE IF NOT EXISTS SUBMISSIONS (
    ID INTEGER PRIMARY KEY NOT NULL,
    AUTHOR TEXT NOT NULL DEFAULT '',
    AUTHORURL TEXT NOT NULL DEFAULT '',
    TITLE TEXT NOT NULL DEFAULT '',
    UDATE CHAR(10) NOT NULL DEFAULT '',
    DESCRIPTION TEXT NOT NULL DEFAULT '',
    TAGS TEXT NOT NULL DEFAULT '',
    CATEGORY TEXT NOT NULL DEFAULT '',
    SPECIES TEXT NOT NULL DEFAULT '',
    GENDER TEXT NOT NULL DEFAULT '',
    RATING TEXT NOT NULL DEFAULT '',
    FILELINK TEXT NOT NULL DEFAULT '',
    FILENAME TEXT NOT NULL DEFAULT '',
    LOCATION TEXT NOT NULL DEFAULT '',
    SERVER INTEGER NOT NULL DEFAULT 1
);";

const COMMON_SUBMISSION_COLUMNS: &str = "ID, AUTHOR, AUTHORURL, TITLE, UDATE, DESCRIPTION, TAGS, \
     CATEGORY, SPECIES, GENDER, RATING, FILELINK, LOCATION";

const LIST_COLUMNS: [&str; 4] = ["GALLERY", "SCRAPS", "FAVORITES", "EXTRAS"];

/// Upgraders in version order.
pub(super) fn registry() -> Vec<Box<dyn Upgrader>> {
    vec![
        Box::new(DisplayNames),
        Box::new(ServerFlag),
        Box::new(NormalizedLists),
        Box::new(FileExtensions),
        Box::new(IndexFlag),
    ]
}

fn copy_infos(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(INFOS_SQL)?;
    conn.execute(
        "INSERT OR REPLACE INTO main.INFOS (FIELD, VALUE) SELECT FIELD, VALUE FROM src.INFOS",
        [],
    )?;
    Ok(())
}

fn copy_users(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(USERS_2_0_SQL)?;
    conn.execute(
        "INSERT INTO main.USERS (USER, USERFULL, FOLDERS, GALLERY, SCRAPS, FAVORITES, EXTRAS) \
         SELECT USER, USERFULL, FOLDERS, GALLERY, SCRAPS, FAVORITES, EXTRAS FROM src.USERS",
        [],
    )?;
    Ok(())
}

// ── 1.0 -> 2.0 ──────────────────────────────────────────────────

/// Adds `USERFULL`, resolved from each user's page.
struct DisplayNames;

impl Upgrader for DisplayNames {
    fn from_version(&self) -> &'static str {
        "1.0"
    }

    fn to_version(&self) -> &'static str {
        "2.0"
    }

    fn shape(&self) -> &'static [TableShape] {
        &[INFOS, USERS_2_0, SUBMISSIONS_1_0]
    }

    fn fill(&self, conn: &Connection) -> rusqlite::Result<()> {
        copy_infos(conn)?;
        conn.execute_batch(USERS_2_0_SQL)?;
        conn.execute(
            "INSERT INTO main.USERS (USER, USERFULL, FOLDERS, GALLERY, SCRAPS, FAVORITES, EXTRAS) \
             SELECT USER, ?1, FOLDERS, GALLERY, SCRAPS, FAVORITES, EXTRAS FROM src.USERS",
            params![UNRESOLVED],
        )?;
        conn.execute_batch(SUBMISSIONS_1_0_SQL)?;
        conn.execute(
            &format!(
                "INSERT INTO main.SUBMISSIONS ({cols}, FILENAME) SELECT {cols}, FILENAME FROM src.SUBMISSIONS",
                cols = COMMON_SUBMISSION_COLUMNS
            ),
            [],
        )?;
        Ok(())
    }

    fn unresolved(&self, conn: &Connection) -> rusqlite::Result<Vec<String>> {
        let mut stmt =
            conn.prepare("SELECT USER FROM main.USERS WHERE USERFULL = ?1 ORDER BY USER")?;
        let handles = stmt
            .query_map(params![UNRESOLVED], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(handles)
    }

    fn resolve_row(&self, conn: &Connection, handle: &str, ctx: &MigrationContext) -> crate::Result<()> {
        let display_name = match ctx.site {
            Some(site) => {
                let probe = site.probe_user(handle)?;
                match (probe.status, probe.display_name) {
                    (ProbeStatus::Ok, Some(name)) => name,
                    (status, _) => {
                        warn!("{} could not be resolved ({:?}), keeping handle", handle, status);
                        handle.to_string()
                    }
                }
            }
            None => handle.to_string(),
        };
        conn.execute(
            "UPDATE main.USERS SET USERFULL = ?1 WHERE USER = ?2",
            params![display_name, handle],
        )?;
        debug!("{} -> {}", handle, display_name);
        Ok(())
    }
}

// ── 2.0 -> 2.3 ──────────────────────────────────────────────────

/// Adds `SERVER`; every archived item existed remotely when fetched.
struct ServerFlag;

impl Upgrader for ServerFlag {
    fn from_version(&self) -> &'static str {
        "2.0"
    }

    fn to_version(&self) -> &'static str {
        "2.3"
    }

    fn shape(&self) -> &'static [TableShape] {
        &[INFOS, USERS_2_0, SUBMISSIONS_2_3]
    }

    fn fill(&self, conn: &Connection) -> rusqlite::Result<()> {
        copy_infos(conn)?;
        copy_users(conn)?;
        conn.execute_batch(SUBMISSIONS_2_3_SQL)?;
        conn.execute(
            &format!(
                "INSERT INTO main.SUBMISSIONS ({cols}, FILENAME, SERVER) \
                 SELECT {cols}, FILENAME, 1 FROM src.SUBMISSIONS",
                cols = COMMON_SUBMISSION_COLUMNS
            ),
            [],
        )?;
        Ok(())
    }
}

// ── 2.3 -> 2.6 ──────────────────────────────────────────────────

/// Re-sorts tags and membership lists written before their order was fixed.
struct NormalizedLists;

impl Upgrader for NormalizedLists {
    fn from_version(&self) -> &'static str {
        "2.3"
    }

    fn to_version(&self) -> &'static str {
        "2.6"
    }

    fn shape(&self) -> &'static [TableShape] {
        &[INFOS, USERS_2_0, SUBMISSIONS_2_3]
    }

    fn fill(&self, conn: &Connection) -> rusqlite::Result<()> {
        copy_infos(conn)?;
        copy_users(conn)?;
        conn.execute_batch(SUBMISSIONS_2_3_SQL)?;
        conn.execute(
            &format!(
                "INSERT INTO main.SUBMISSIONS ({cols}, FILENAME, SERVER) \
                 SELECT {cols}, FILENAME, SERVER FROM src.SUBMISSIONS",
                cols = COMMON_SUBMISSION_COLUMNS
            ),
            [],
        )?;

        let tags: Vec<(i64, String)> = {
            let mut stmt = conn.prepare("SELECT ID, TAGS FROM main.SUBMISSIONS")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        let mut update = conn.prepare("UPDATE main.SUBMISSIONS SET TAGS = ?1 WHERE ID = ?2")?;
        for (id, raw) in tags {
            let sorted = normalize_tags(raw.split_whitespace()).join(" ");
            if sorted != raw {
                update.execute(params![sorted, id])?;
            }
        }

        let users: Vec<Vec<String>> = {
            let mut stmt = conn.prepare(
                "SELECT USER, FOLDERS, GALLERY, SCRAPS, FAVORITES, EXTRAS FROM main.USERS",
            )?;
            let rows = stmt
                .query_map([], |row| (0..6).map(|i| row.get::<_, String>(i)).collect())?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        let mut update = conn.prepare(&format!(
            "UPDATE main.USERS SET FOLDERS = ?1, {} = ?2, {} = ?3, {} = ?4, {} = ?5 WHERE USER = ?6",
            LIST_COLUMNS[0], LIST_COLUMNS[1], LIST_COLUMNS[2], LIST_COLUMNS[3]
        ))?;
        for row in users {
            update.execute(params![
                format_folders(&parse_folders(&row[1])),
                normalize_list(&row[2]),
                normalize_list(&row[3]),
                normalize_list(&row[4]),
                normalize_list(&row[5]),
                row[0],
            ])?;
        }
        Ok(())
    }
}

// ── 2.6 -> 2.7 ──────────────────────────────────────────────────

/// Replaces the stored file name with its extension.
struct FileExtensions;

/// `"submission.png"` -> `"png"`, empty or extension-less -> `"0"`.
fn extension_of(file_name: &str) -> String {
    match file_name.trim().rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => crate::storage::models::NO_FILE.to_string(),
    }
}

impl Upgrader for FileExtensions {
    fn from_version(&self) -> &'static str {
        "2.6"
    }

    fn to_version(&self) -> &'static str {
        "2.7"
    }

    fn shape(&self) -> &'static [TableShape] {
        &[INFOS, USERS_2_0, SUBMISSIONS_2_7]
    }

    fn fill(&self, conn: &Connection) -> rusqlite::Result<()> {
        copy_infos(conn)?;
        copy_users(conn)?;
        conn.execute_batch(include_str!("../storage/schema.sql"))?;

        let mut select = conn.prepare(&format!(
            "SELECT {}, FILENAME, SERVER FROM src.SUBMISSIONS",
            COMMON_SUBMISSION_COLUMNS
        ))?;
        let mut insert = conn.prepare(&format!(
            "INSERT INTO main.SUBMISSIONS ({}, FILEEXT, SERVER) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            COMMON_SUBMISSION_COLUMNS
        ))?;
        let mut rows = select.query([])?;
        while let Some(row) = rows.next()? {
            let mut values: Vec<rusqlite::types::Value> = (0..13)
                .map(|i| row.get(i))
                .collect::<rusqlite::Result<_>>()?;
            let file_name: String = row.get(13)?;
            values.push(extension_of(&file_name).into());
            values.push(row.get(14)?);
            insert.execute(rusqlite::params_from_iter(values))?;
        }
        Ok(())
    }
}

// ── 2.7 -> 2.10 ─────────────────────────────────────────────────

/// Adds the `INDEX` flag and builds the indices.
struct IndexFlag;

impl Upgrader for IndexFlag {
    fn from_version(&self) -> &'static str {
        "2.7"
    }

    fn to_version(&self) -> &'static str {
        "2.10"
    }

    fn shape(&self) -> &'static [TableShape] {
        &[INFOS, USERS_2_0, SUBMISSIONS_2_7]
    }

    fn fill(&self, conn: &Connection) -> rusqlite::Result<()> {
        copy_infos(conn)?;
        copy_users(conn)?;
        conn.execute_batch(include_str!("../storage/schema.sql"))?;
        conn.execute(
            "INSERT INTO main.SUBMISSIONS SELECT * FROM src.SUBMISSIONS",
            [],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO main.INFOS (FIELD, VALUE) VALUES (?1, '0')",
            params![keys::INDEX],
        )?;
        create_indices(conn)?;
        conn.execute(
            "UPDATE main.INFOS SET VALUE = '1' WHERE FIELD = ?1",
            params![keys::INDEX],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_of_file_name() {
        assert_eq!(extension_of("submission.PNG"), "png");
        assert_eq!(extension_of(""), "0");
        assert_eq!(extension_of("submission"), "0");
    }

    #[test]
    fn test_shapes_match_current_schema() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(include_str!("../storage/schema.sql")).unwrap();
        for shape in IndexFlag.shape() {
            let mut stmt = conn
                .prepare(&format!("PRAGMA table_info({})", shape.name))
                .unwrap();
            let columns: Vec<String> = stmt
                .query_map([], |row| row.get(1))
                .unwrap()
                .collect::<rusqlite::Result<_>>()
                .unwrap();
            assert_eq!(columns, shape.columns, "table {}", shape.name);
        }
    }
}
