mod common;

use rusqlite::{params, Connection};
use std::path::Path;
use tempfile::tempdir;

use common::{FakeSite, Request};
use gallery_sync_core::migrate::{backup_path, staged_path, UNRESOLVED};
use gallery_sync_core::remote::ProbeStatus;
use gallery_sync_core::storage::{keys, CURRENT_VERSION};
use gallery_sync_core::{
    CancelGuard, Error, MigrationContext, MigrationPipeline, SilentReporter, Store,
};

const V1_SCHEMA: &str = "
CREATE TABLE INFOS (FIELD TEXT PRIMARY KEY NOT NULL, VALUE TEXT);
CREATE TABLE USERS (
    USER TEXT PRIMARY KEY NOT NULL,
    FOLDERS TEXT NOT NULL DEFAULT '',
    GALLERY TEXT NOT NULL DEFAULT '',
    SCRAPS TEXT NOT NULL DEFAULT '',
    FAVORITES TEXT NOT NULL DEFAULT '',
    EXTRAS TEXT NOT NULL DEFAULT ''
);
CREATE TABLE SUBMISSIONS (
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
);
INSERT INTO INFOS VALUES ('DBNAME', 'gallery.db'), ('VERSION', '1.0'), ('USN', '3'), ('SUN', '2');
INSERT INTO USERS (USER, FOLDERS, GALLERY, FAVORITES) VALUES
    ('alpha', 'g,f', '3,1', '1'),
    ('beta', 'g', '1', ''),
    ('gamma', 'f', '', '3,3');
INSERT INTO SUBMISSIONS (ID, AUTHOR, AUTHORURL, TITLE, TAGS, FILENAME, LOCATION) VALUES
    (1, 'Alpha', 'alpha', 'First', 'fox Art art', 'submission.PNG', '0/0/000'),
    (3, 'Alpha', 'alpha', 'Third', 'b a', '', '0/0/000');
";

fn create_v1_store(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(V1_SCHEMA).unwrap();
}

fn stored_version(path: &Path) -> String {
    let conn = Connection::open(path).unwrap();
    conn.query_row(
        "SELECT VALUE FROM INFOS WHERE FIELD = 'VERSION'",
        [],
        |row| row.get(0),
    )
    .unwrap()
}

fn display_names(conn: &Connection) -> Vec<(String, String)> {
    let mut stmt = conn
        .prepare("SELECT USER, USERFULL FROM USERS ORDER BY USER")
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap()
}

fn probing_site() -> FakeSite {
    FakeSite::new()
        .with_probe("alpha", ProbeStatus::Ok, Some("Alpha"))
        .with_probe("beta", ProbeStatus::DisabledAccount, None)
        .with_probe("gamma", ProbeStatus::Ok, Some("Gamma!"))
}

fn migrate(path: &Path, site: Option<&FakeSite>, cancel: &CancelGuard) -> gallery_sync_core::Result<()> {
    let ctx = MigrationContext {
        site: site.map(|s| s as &dyn gallery_sync_core::RemoteSite),
        cancel,
        reporter: &SilentReporter,
    };
    MigrationPipeline::new().run(path, &ctx).map(|_| ())
}

#[test]
fn test_full_chain_upgrades_to_current() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gallery.db");
    create_v1_store(&path);
    let site = probing_site();
    let cancel = CancelGuard::new();

    let ctx = MigrationContext {
        site: Some(&site),
        cancel: &cancel,
        reporter: &SilentReporter,
    };
    let report = MigrationPipeline::new().run(&path, &ctx).unwrap();

    assert_eq!(report.steps.len(), 5);
    assert_eq!(report.steps[0], ("1.0".to_string(), "2.0".to_string()));
    assert_eq!(stored_version(&path), CURRENT_VERSION);
    assert_eq!(stored_version(&backup_path(&path, "1.0")), "1.0");
    assert!(!staged_path(&path, "2.0").exists());

    let store = Store::open(&path).unwrap();
    assert_eq!(
        display_names(store.connection()),
        vec![
            ("alpha".to_string(), "Alpha".to_string()),
            ("beta".to_string(), "beta".to_string()),
            ("gamma".to_string(), "Gamma!".to_string()),
        ]
    );
    let alpha = store.user_get("alpha").unwrap().unwrap();
    assert_eq!(alpha.gallery, "0000000001,0000000003");
    assert_eq!(store.user_get("gamma").unwrap().unwrap().favorites, "0000000003");

    let first = store.item_get(1).unwrap().unwrap();
    assert_eq!(first.tags, "Art fox");
    assert_eq!(first.file_ext, "png");
    assert!(first.server);
    assert_eq!(store.item_get(3).unwrap().unwrap().file_ext, "0");
    assert!(store.index_is_fresh().unwrap());
}

#[test]
fn test_interrupted_step_resumes_from_staged_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gallery.db");
    create_v1_store(&path);
    let cancel = CancelGuard::new();
    let site = probing_site();
    site.cancel_at(2, &cancel);

    let result = migrate(&path, Some(&site), &cancel);

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(stored_version(&path), "1.0");
    let staged = staged_path(&path, "2.0");
    assert!(staged.exists());
    {
        let conn = Connection::open(&staged).unwrap();
        assert_eq!(
            display_names(&conn),
            vec![
                ("alpha".to_string(), "Alpha".to_string()),
                ("beta".to_string(), "beta".to_string()),
                ("gamma".to_string(), UNRESOLVED.to_string()),
            ]
        );
    }

    cancel.reset();
    let site = probing_site();
    migrate(&path, Some(&site), &cancel).unwrap();

    assert_eq!(site.requests(), vec![Request::Probe("gamma".to_string())]);
    assert_eq!(stored_version(&path), CURRENT_VERSION);
    let store = Store::open(&path).unwrap();
    assert_eq!(store.user_list().unwrap().len(), 3);
    assert_eq!(store.item_count().unwrap(), 2);
    assert_eq!(
        display_names(store.connection()),
        vec![
            ("alpha".to_string(), "Alpha".to_string()),
            ("beta".to_string(), "beta".to_string()),
            ("gamma".to_string(), "Gamma!".to_string()),
        ]
    );
}

#[test]
fn test_invalid_staged_store_is_rebuilt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gallery.db");
    create_v1_store(&path);
    {
        let conn = Connection::open(staged_path(&path, "2.0")).unwrap();
        conn.execute_batch(
            "CREATE TABLE USERS (USER TEXT PRIMARY KEY, USERFULL TEXT, FOLDERS TEXT, \
             GALLERY TEXT, SCRAPS TEXT, FAVORITES TEXT, EXTRAS TEXT);
             INSERT INTO USERS (USER) VALUES ('alpha');",
        )
        .unwrap();
    }
    let cancel = CancelGuard::new();

    migrate(&path, None, &cancel).unwrap();

    let store = Store::open(&path).unwrap();
    assert_eq!(store.user_list().unwrap().len(), 3);
    assert_eq!(store.user_get("alpha").unwrap().unwrap().display_name, "alpha");
}

#[test]
fn test_newer_store_is_refused() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gallery.db");
    {
        let store = Store::open(&path).unwrap();
        store.metadata_set(keys::VERSION, "3.1").unwrap();
    }
    let cancel = CancelGuard::new();

    let result = migrate(&path, None, &cancel);

    assert!(matches!(result, Err(Error::SchemaTooNew { ref found, .. }) if found == "3.1"));
    assert!(result.unwrap_err().is_fatal());
    assert_eq!(stored_version(&path), "3.1");
}

#[test]
fn test_unregistered_old_version_is_refused() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gallery.db");
    {
        let store = Store::open(&path).unwrap();
        store.metadata_set(keys::VERSION, "1.5").unwrap();
    }
    let cancel = CancelGuard::new();

    assert!(matches!(
        migrate(&path, None, &cancel),
        Err(Error::UnknownVersion(ref v)) if v == "1.5"
    ));
}

#[test]
fn test_uninitialized_store_is_not_a_target() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gallery.db");
    Connection::open(&path).unwrap();
    let pipeline = MigrationPipeline::new();

    assert_eq!(pipeline.pending_version(&path).unwrap(), None);
    assert_eq!(pipeline.pending_version(&dir.path().join("absent.db")).unwrap(), None);

    let cancel = CancelGuard::new();
    migrate(&path, None, &cancel).unwrap();
    let store = Store::open(&path).unwrap();
    assert_eq!(store.version().unwrap().as_deref(), Some(CURRENT_VERSION));
}

#[test]
fn test_promotion_interrupted_between_renames_is_completed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gallery.db");
    {
        let store = Store::open(staged_path(&path, CURRENT_VERSION)).unwrap();
        store.user_insert("foo", "Foo").unwrap();
    }
    std::fs::write(backup_path(&path, "2.7"), b"old").unwrap();
    let pipeline = MigrationPipeline::new();

    assert_eq!(pipeline.pending_version(&path).unwrap(), None);

    let store = Store::open(&path).unwrap();
    assert!(store.user_get("foo").unwrap().is_some());
}

#[test]
fn test_index_flag_set_after_upgrade() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gallery.db");
    create_v1_store(&path);
    let cancel = CancelGuard::new();
    let site = probing_site();

    migrate(&path, Some(&site), &cancel).unwrap();

    let conn = Connection::open(&path).unwrap();
    let index: String = conn
        .query_row(
            "SELECT VALUE FROM INFOS WHERE FIELD = ?1",
            params![keys::INDEX],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(index, "1");
    assert_eq!(site.requests().len(), 3);
}

#[test]
fn test_version_check_refuses_a_held_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gallery.db");
    let held = Store::open(&path).unwrap();

    let result = MigrationPipeline::new().pending_version(&path);

    assert!(matches!(result, Err(Error::StoreLocked(_))));
    drop(held);
    assert_eq!(MigrationPipeline::new().pending_version(&path).unwrap(), None);
}
