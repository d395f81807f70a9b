mod common;

use rusqlite::params;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

use common::FakeSite;
use gallery_sync_core::remote::ProbeStatus;
use gallery_sync_core::repair::{self, BadLocation, MissingSection};
use gallery_sync_core::storage::models::{Submission, NO_FILE};
use gallery_sync_core::tiered::item_dir;
use gallery_sync_core::{tiered_path, CancelGuard, Section, Store};

fn archived(store: &Store, files_root: &Path, id: u64, with_file: bool) -> Submission {
    let sub = Submission {
        id,
        author: "Foo".to_string(),
        author_url: "foo".to_string(),
        title: format!("Item {}", id),
        upload_date: "2021-03-14".to_string(),
        description: String::new(),
        tags: "fox".to_string(),
        category: "Artwork (Digital)".to_string(),
        species: "Fox".to_string(),
        gender: "Any".to_string(),
        rating: "General".to_string(),
        file_link: format!("https://d.example.net/{}.png", id),
        file_ext: "png".to_string(),
        location: tiered_path(id),
        server: true,
    };
    store.item_insert(&sub).unwrap();
    let dir = item_dir(files_root, id);
    fs::create_dir_all(&dir).unwrap();
    if with_file {
        fs::write(dir.join("submission.png"), common::PNG_BYTES).unwrap();
    }
    sub
}

#[test]
fn test_consistent_archive_is_clean() {
    let dir = tempdir().unwrap();
    let store = Store::open_in_memory().unwrap();
    archived(&store, dir.path(), 12_345_678, true);
    store
        .user_set_section_membership("foo", Section::Gallery, "0012345678")
        .unwrap();

    let report = repair::check(&store, dir.path()).unwrap();

    assert!(report.is_clean());
    assert_eq!(report.fixable(), 0);
}

#[test]
fn test_check_reports_each_kind_of_problem() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let store = Store::open_in_memory().unwrap();
    archived(&store, root, 1, true);
    archived(&store, root, 2, false);
    archived(&store, root, 36_000_001, true);
    store.item_set_location(36_000_001, "9/9/999").unwrap();
    fs::create_dir_all(item_dir(root, 4_000_000)).unwrap();
    store.user_insert("idle", "Idle").unwrap();
    store.user_insert("foo", "Foo").unwrap();
    store
        .connection()
        .execute(
            "UPDATE USERS SET SCRAPS = ?1 WHERE USER = ?2",
            params!["0000000001", "foo"],
        )
        .unwrap();

    let report = repair::check(&store, root).unwrap();

    assert_eq!(
        report.bad_locations,
        vec![BadLocation {
            id: 36_000_001,
            stored: "9/9/999".to_string(),
            expected: "3/6/000".to_string(),
        }]
    );
    assert_eq!(report.missing_files, vec![2]);
    assert_eq!(report.orphan_dirs, vec![item_dir(root, 4_000_000)]);
    assert_eq!(report.empty_users, vec!["idle".to_string()]);
    assert_eq!(
        report.missing_sections,
        vec![MissingSection {
            handle: "foo".to_string(),
            section: Section::Scraps,
        }]
    );
    assert_eq!(report.fixable(), 4);
}

#[test]
fn test_repair_fixes_all_but_orphans() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let store = Store::open_in_memory().unwrap();
    archived(&store, root, 2, false);
    archived(&store, root, 36_000_001, true);
    store.item_set_location(36_000_001, "9/9/999").unwrap();
    let orphan = item_dir(root, 4_000_000);
    fs::create_dir_all(&orphan).unwrap();
    fs::write(orphan.join("submission.png"), common::PNG_BYTES).unwrap();
    store.user_insert("idle", "Idle").unwrap();
    store
        .user_set_section_membership("foo", Section::Gallery, "0000000002")
        .unwrap();
    store.user_disable_sections("foo", &[Section::Gallery]).unwrap();

    let report = repair::check(&store, root).unwrap();
    let fixed = repair::repair(&store, &report).unwrap();

    assert_eq!(fixed, 4);
    assert_eq!(store.item_get(36_000_001).unwrap().unwrap().location, "3/6/000");
    assert_eq!(store.item_get(2).unwrap().unwrap().file_ext, NO_FILE);
    assert!(store.user_get("idle").unwrap().is_none());
    assert_eq!(store.user_get("foo").unwrap().unwrap().folders, "g");
    assert!(orphan.join("submission.png").is_file());

    let after = repair::check(&store, root).unwrap();
    assert_eq!(after.fixable(), 0);
    assert_eq!(after.orphan_dirs, vec![orphan]);
}

#[test]
fn test_probe_users_sorts_by_status() {
    let store = Store::open_in_memory().unwrap();
    for handle in ["alpha", "beta", "gamma"] {
        store.user_insert(handle, handle).unwrap();
    }
    let site = FakeSite::new()
        .with_probe("alpha", ProbeStatus::Ok, Some("Alpha"))
        .with_probe("beta", ProbeStatus::DisabledAccount, None);
    let cancel = CancelGuard::new();

    let report = repair::probe_users(&store, &site, &cancel).unwrap();

    assert_eq!(report.checked, 3);
    assert_eq!(report.disabled, vec!["beta".to_string()]);
    assert_eq!(report.not_found, vec!["gamma".to_string()]);
    assert!(report.failed.is_empty());
    assert!(!report.interrupted);
}

#[test]
fn test_probe_users_stops_when_cancelled() {
    let store = Store::open_in_memory().unwrap();
    for handle in ["alpha", "beta", "gamma"] {
        store.user_insert(handle, handle).unwrap();
    }
    let site = FakeSite::new();
    let cancel = CancelGuard::new();
    site.cancel_at(1, &cancel);

    let report = repair::probe_users(&store, &site, &cancel).unwrap();

    assert!(report.interrupted);
    assert_eq!(report.checked, 1);
    assert_eq!(site.request_count(), 1);
}
