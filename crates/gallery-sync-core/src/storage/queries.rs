use super::keys;
use super::lists;
use super::models::*;
use super::sqlite::Store;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use tracing::debug;

/// Result of adding an id to a user's section set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    Added,
    AlreadyPresent,
}

const SUBMISSION_COLUMNS: &str = "ID, AUTHOR, AUTHORURL, TITLE, UDATE, DESCRIPTION, TAGS, \
     CATEGORY, SPECIES, GENDER, RATING, FILELINK, FILEEXT, LOCATION, SERVER";

const USER_COLUMNS: &str = "USER, USERFULL, FOLDERS, GALLERY, SCRAPS, FAVORITES, EXTRAS";

const INDEX_SQL: &str = "CREATE INDEX IF NOT EXISTS idx_submissions_authorurl ON SUBMISSIONS(AUTHORURL);
     CREATE INDEX IF NOT EXISTS idx_submissions_udate ON SUBMISSIONS(UDATE);
     CREATE INDEX IF NOT EXISTS idx_submissions_title ON SUBMISSIONS(TITLE);
     CREATE INDEX IF NOT EXISTS idx_users_userfull ON USERS(USERFULL);";

fn submission_from_row(row: &Row) -> Result<Submission> {
    Ok(Submission {
        id: row.get::<_, i64>(0)? as u64,
        author: row.get(1)?,
        author_url: row.get(2)?,
        title: row.get(3)?,
        upload_date: row.get(4)?,
        description: row.get(5)?,
        tags: row.get(6)?,
        category: row.get(7)?,
        species: row.get(8)?,
        gender: row.get(9)?,
        rating: row.get(10)?,
        file_link: row.get(11)?,
        file_ext: row.get(12)?,
        location: row.get(13)?,
        server: row.get::<_, i64>(14)? != 0,
    })
}

fn user_from_row(row: &Row) -> Result<User> {
    Ok(User {
        handle: row.get(0)?,
        display_name: row.get(1)?,
        folders: row.get(2)?,
        gallery: row.get(3)?,
        scraps: row.get(4)?,
        favorites: row.get(5)?,
        extras: row.get(6)?,
    })
}

fn mark_index_stale(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO INFOS (FIELD, VALUE) VALUES (?1, '0')",
        params![keys::INDEX],
    )?;
    Ok(())
}

pub(crate) fn create_indices(conn: &Connection) -> Result<()> {
    conn.execute_batch(INDEX_SQL)
}

fn insert_submission(conn: &Connection, sub: &Submission, replace: bool) -> Result<usize> {
    let verb = if replace { "INSERT OR REPLACE" } else { "INSERT OR IGNORE" };
    conn.execute(
        &format!(
            "{} INTO SUBMISSIONS ({}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            verb, SUBMISSION_COLUMNS
        ),
        params![
            sub.id as i64,
            sub.author,
            sub.author_url,
            sub.title,
            sub.upload_date,
            sub.description,
            sub.tags,
            sub.category,
            sub.species,
            sub.gender,
            sub.rating,
            sub.file_link,
            sub.file_ext,
            sub.location,
            sub.server as i64,
        ],
    )
}

impl Store {
    // ── Users ────────────────────────────────────────────────────

    /// Insert a user row. No-op (returns `false`) when the handle exists.
    pub fn user_insert(&self, handle: &str, display_name: &str) -> Result<bool> {
        let tx = self.connection().unchecked_transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO USERS (USER, USERFULL) VALUES (?1, ?2)",
            params![handle, display_name],
        )?;
        if inserted > 0 {
            mark_index_stale(&tx)?;
        }
        tx.commit()?;
        debug!("user_insert {} -> {}", handle, inserted > 0);
        Ok(inserted > 0)
    }

    pub fn user_get(&self, handle: &str) -> Result<Option<User>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM USERS WHERE USER = ?1", USER_COLUMNS),
                params![handle],
                user_from_row,
            )
            .optional()
    }

    pub fn user_list(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .connection()
            .prepare(&format!("SELECT {} FROM USERS ORDER BY USER", USER_COLUMNS))?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(users)
    }

    /// Idempotent set-add of `id_str` into the user's section list.
    ///
    /// Creates the user when missing and keeps the section code in `FOLDERS`.
    pub fn user_set_section_membership(
        &self,
        handle: &str,
        section: Section,
        id_str: &str,
    ) -> Result<MembershipChange> {
        let tx = self.connection().unchecked_transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO USERS (USER, USERFULL) VALUES (?1, ?1)",
            params![handle],
        )?;
        let (folders, list): (String, String) = tx.query_row(
            &format!("SELECT FOLDERS, {} FROM USERS WHERE USER = ?1", section.column()),
            params![handle],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let new_folders = lists::ensure_folder(&folders, section);

        let change = match lists::list_insert(&list, id_str) {
            Some(new_list) => {
                tx.execute(
                    &format!(
                        "UPDATE USERS SET FOLDERS = ?1, {} = ?2 WHERE USER = ?3",
                        section.column()
                    ),
                    params![new_folders, new_list, handle],
                )?;
                MembershipChange::Added
            }
            None => {
                if new_folders != folders {
                    tx.execute(
                        "UPDATE USERS SET FOLDERS = ?1 WHERE USER = ?2",
                        params![new_folders, handle],
                    )?;
                }
                MembershipChange::AlreadyPresent
            }
        };
        tx.commit()?;
        debug!("{} {} += {} ({:?})", handle, section, id_str, change);
        Ok(change)
    }

    pub fn user_is_member(&self, handle: &str, section: Section, id_str: &str) -> Result<bool> {
        let list: Option<String> = self
            .connection()
            .query_row(
                &format!("SELECT {} FROM USERS WHERE USER = ?1", section.column()),
                params![handle],
                |row| row.get(0),
            )
            .optional()?;
        Ok(list.is_some_and(|list| lists::list_contains(&list, id_str)))
    }

    /// Mark a section as disabled by the remote, adding its code if absent.
    pub fn user_mark_section_disabled(&self, handle: &str, section: Section) -> Result<bool> {
        self.update_folders(handle, |folders| lists::set_folder(folders, section, true))
    }

    pub fn user_clear_disabled(&self, handle: &str, section: Section) -> Result<bool> {
        self.update_folders(handle, |folders| lists::set_folder(folders, section, false))
    }

    /// Enable sections for crawling. Existing disabled markers are kept.
    pub fn user_enable_sections(&self, handle: &str, sections: &[Section]) -> Result<bool> {
        self.update_folders(handle, |folders| {
            sections
                .iter()
                .fold(folders.to_string(), |acc, section| lists::ensure_folder(&acc, *section))
        })
    }

    pub fn user_disable_sections(&self, handle: &str, sections: &[Section]) -> Result<bool> {
        self.update_folders(handle, |folders| {
            sections
                .iter()
                .fold(folders.to_string(), |acc, section| lists::remove_folder(&acc, *section))
        })
    }

    fn update_folders<F>(&self, handle: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&str) -> String,
    {
        let tx = self.connection().unchecked_transaction()?;
        let folders: Option<String> = tx
            .query_row(
                "SELECT FOLDERS FROM USERS WHERE USER = ?1",
                params![handle],
                |row| row.get(0),
            )
            .optional()?;
        let Some(folders) = folders else {
            return Ok(false);
        };
        let updated = f(&folders);
        if updated != folders {
            tx.execute(
                "UPDATE USERS SET FOLDERS = ?1 WHERE USER = ?2",
                params![updated, handle],
            )?;
        }
        tx.commit()?;
        debug!("{} folders: '{}' -> '{}'", handle, folders, updated);
        Ok(true)
    }

    pub fn user_delete(&self, handle: &str) -> Result<bool> {
        let deleted = self
            .connection()
            .execute("DELETE FROM USERS WHERE USER = ?1", params![handle])?;
        debug!("user_delete {} -> {}", handle, deleted > 0);
        Ok(deleted > 0)
    }

    /// True when the user exists and every attribute set is empty.
    pub fn user_is_empty(&self, handle: &str) -> Result<bool> {
        Ok(self.user_get(handle)?.is_some_and(|user| user.is_empty()))
    }

    // ── Submissions ──────────────────────────────────────────────

    pub fn item_exists(&self, id: u64) -> Result<bool> {
        let count: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM SUBMISSIONS WHERE ID = ?1",
            params![id as i64],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn item_read_field(&self, id: u64, field: ItemField) -> Result<Option<String>> {
        self.connection()
            .query_row(
                &format!(
                    "SELECT CAST({} AS TEXT) FROM SUBMISSIONS WHERE ID = ?1",
                    field.column()
                ),
                params![id as i64],
                |row| row.get(0),
            )
            .optional()
    }

    /// Insert a submission. A row with the same id is left untouched.
    pub fn item_insert(&self, sub: &Submission) -> Result<bool> {
        let tx = self.connection().unchecked_transaction()?;
        let inserted = insert_submission(&tx, sub, false)?;
        if inserted > 0 {
            mark_index_stale(&tx)?;
        }
        tx.commit()?;
        debug!("item_insert {} -> {}", sub.id, inserted > 0);
        Ok(inserted > 0)
    }

    /// Insert a submission and run `write_files` inside the same transaction.
    ///
    /// The row is committed only after `write_files` succeeds. When the row
    /// already exists and `replace` is false, nothing is written.
    pub fn item_insert_with<F>(
        &self,
        sub: &Submission,
        replace: bool,
        write_files: F,
    ) -> crate::Result<bool>
    where
        F: FnOnce() -> std::io::Result<()>,
    {
        let tx = self.connection().unchecked_transaction()?;
        let inserted = insert_submission(&tx, sub, replace)?;
        if inserted == 0 {
            return Ok(false);
        }
        mark_index_stale(&tx)?;
        write_files()?;
        tx.commit()?;
        debug!("Committed submission {} with files", sub.id);
        Ok(true)
    }

    pub fn item_get(&self, id: u64) -> Result<Option<Submission>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM SUBMISSIONS WHERE ID = ?1", SUBMISSION_COLUMNS),
                params![id as i64],
                submission_from_row,
            )
            .optional()
    }

    pub fn item_list(&self) -> Result<Vec<Submission>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM SUBMISSIONS ORDER BY ID",
            SUBMISSION_COLUMNS
        ))?;
        let subs = stmt
            .query_map([], submission_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(subs)
    }

    pub fn item_ids(&self) -> Result<Vec<u64>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT ID FROM SUBMISSIONS ORDER BY ID")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .map(|id| id.map(|id| id as u64))
            .collect::<Result<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn item_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM SUBMISSIONS", [], |row| row.get(0))
    }

    pub fn item_set_location(&self, id: u64, location: &str) -> Result<bool> {
        let updated = self.connection().execute(
            "UPDATE SUBMISSIONS SET LOCATION = ?1 WHERE ID = ?2",
            params![location, id as i64],
        )?;
        Ok(updated > 0)
    }

    pub fn item_set_file_ext(&self, id: u64, file_ext: &str) -> Result<bool> {
        let updated = self.connection().execute(
            "UPDATE SUBMISSIONS SET FILEEXT = ?1 WHERE ID = ?2",
            params![file_ext, id as i64],
        )?;
        Ok(updated > 0)
    }

    pub fn item_set_server(&self, id: u64, server: bool) -> Result<bool> {
        let updated = self.connection().execute(
            "UPDATE SUBMISSIONS SET SERVER = ?1 WHERE ID = ?2",
            params![server as i64, id as i64],
        )?;
        Ok(updated > 0)
    }

    pub fn item_delete(&self, id: u64) -> Result<bool> {
        let deleted = self
            .connection()
            .execute("DELETE FROM SUBMISSIONS WHERE ID = ?1", params![id as i64])?;
        Ok(deleted > 0)
    }

    // ── Metadata ─────────────────────────────────────────────────

    pub fn metadata_get(&self, key: &str) -> Result<Option<String>> {
        self.connection()
            .query_row(
                "SELECT VALUE FROM INFOS WHERE FIELD = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
    }

    pub fn metadata_set(&self, key: &str, value: &str) -> Result<()> {
        self.connection().execute(
            "INSERT OR REPLACE INTO INFOS (FIELD, VALUE) VALUES (?1, ?2)",
            params![key, value],
        )?;
        debug!("INFOS {} = {}", key, value);
        Ok(())
    }

    /// Recount users and submissions into `USN` / `SUN`.
    pub fn refresh_counts(&self) -> Result<(i64, i64)> {
        let users: i64 = self
            .connection()
            .query_row("SELECT COUNT(*) FROM USERS", [], |row| row.get(0))?;
        let items = self.item_count()?;
        let tx = self.connection().unchecked_transaction()?;
        for (key, value) in [(keys::USN, users), (keys::SUN, items)] {
            tx.execute(
                "INSERT OR REPLACE INTO INFOS (FIELD, VALUE) VALUES (?1, ?2)",
                params![key, value.to_string()],
            )?;
        }
        tx.commit()?;
        Ok((users, items))
    }

    pub fn index_is_fresh(&self) -> Result<bool> {
        Ok(self.metadata_get(keys::INDEX)?.as_deref() == Some("1"))
    }

    pub fn rebuild_indices(&self) -> Result<()> {
        let tx = self.connection().unchecked_transaction()?;
        create_indices(&tx)?;
        tx.execute_batch("REINDEX;")?;
        tx.execute(
            "INSERT OR REPLACE INTO INFOS (FIELD, VALUE) VALUES (?1, '1')",
            params![keys::INDEX],
        )?;
        tx.commit()?;
        debug!("Indices rebuilt");
        Ok(())
    }

    /// Reclaim free pages. Rewrites the whole file.
    pub fn compact(&self) -> Result<()> {
        self.connection().execute_batch("VACUUM;")?;
        debug!("Store compacted");
        Ok(())
    }
}
