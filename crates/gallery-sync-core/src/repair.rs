//! Consistency checks between the store and the files on disk.

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cancel::CancelGuard;
use crate::remote::{ProbeStatus, RemoteSite};
use crate::storage::lists::split_list;
use crate::storage::models::{Section, NO_FILE};
use crate::storage::Store;
use crate::tiered::{item_dir, tiered_path, ID_WIDTH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BadLocation {
    pub id: u64,
    pub stored: String,
    pub expected: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingSection {
    pub handle: String,
    pub section: Section,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairReport {
    pub bad_locations: Vec<BadLocation>,
    /// Items whose `FILEEXT` names a payload that is not on disk.
    pub missing_files: Vec<u64>,
    /// Item directories with no row.
    pub orphan_dirs: Vec<PathBuf>,
    pub empty_users: Vec<String>,
    pub missing_sections: Vec<MissingSection>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.bad_locations.is_empty()
            && self.missing_files.is_empty()
            && self.orphan_dirs.is_empty()
            && self.empty_users.is_empty()
            && self.missing_sections.is_empty()
    }

    /// Problems `repair` can fix. Orphan directories are only reported.
    pub fn fixable(&self) -> usize {
        self.bad_locations.len()
            + self.missing_files.len()
            + self.empty_users.len()
            + self.missing_sections.len()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProbeReport {
    pub checked: usize,
    pub not_found: Vec<String>,
    pub disabled: Vec<String>,
    pub failed: Vec<String>,
    pub interrupted: bool,
}

pub fn check(store: &Store, files_root: &Path) -> crate::Result<RepairReport> {
    let mut report = RepairReport::default();
    let mut known: HashSet<u64> = HashSet::new();

    for sub in store.item_list()? {
        known.insert(sub.id);
        let expected = tiered_path(sub.id);
        if sub.location != expected {
            report.bad_locations.push(BadLocation {
                id: sub.id,
                stored: sub.location.clone(),
                expected,
            });
        }
        if sub.has_file() {
            let file = item_dir(files_root, sub.id).join(format!("submission.{}", sub.file_ext));
            if !file.is_file() {
                report.missing_files.push(sub.id);
            }
        }
    }

    if files_root.is_dir() {
        for entry in WalkDir::new(files_root)
            .min_depth(4)
            .max_depth(4)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
        {
            match item_id_of(entry.path()) {
                Some(id) if known.contains(&id) => {}
                _ => report.orphan_dirs.push(entry.path().to_path_buf()),
            }
        }
    }

    for user in store.user_list()? {
        if user.is_empty() {
            report.empty_users.push(user.handle.clone());
            continue;
        }
        let flags = user.folder_flags();
        for section in Section::ALL {
            let listed = split_list(user.membership(section)).next().is_some();
            if listed && !flags.iter().any(|flag| flag.section == section) {
                report.missing_sections.push(MissingSection {
                    handle: user.handle.clone(),
                    section,
                });
            }
        }
    }

    debug!(
        "Check found {} bad locations, {} missing files, {} orphans, {} empty users, {} missing sections",
        report.bad_locations.len(),
        report.missing_files.len(),
        report.orphan_dirs.len(),
        report.empty_users.len(),
        report.missing_sections.len()
    );
    Ok(report)
}

/// `<root>/1/2/345/0012345678` -> `12345678`, when it sits where its tiers say.
fn item_id_of(dir: &Path) -> Option<u64> {
    let name = dir.file_name()?.to_str()?;
    if name.len() != ID_WIDTH || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id: u64 = name.parse().ok()?;
    let tiers: Vec<&str> = dir
        .parent()?
        .iter()
        .rev()
        .take(3)
        .filter_map(|part| part.to_str())
        .collect();
    let expected_path = tiered_path(id);
    let expected: Vec<&str> = expected_path.rsplit('/').collect();
    (tiers == expected).then_some(id)
}

/// Fix everything in `report` except orphan directories.
pub fn repair(store: &Store, report: &RepairReport) -> crate::Result<usize> {
    let mut fixed = 0;
    for bad in &report.bad_locations {
        if store.item_set_location(bad.id, &bad.expected)? {
            fixed += 1;
        }
    }
    for id in &report.missing_files {
        if store.item_set_file_ext(*id, NO_FILE)? {
            fixed += 1;
        }
    }
    for missing in &report.missing_sections {
        if store.user_enable_sections(&missing.handle, &[missing.section])? {
            fixed += 1;
        }
    }
    for handle in &report.empty_users {
        if store.user_is_empty(handle)? && store.user_delete(handle)? {
            fixed += 1;
        }
    }
    for dir in &report.orphan_dirs {
        warn!("Orphan item directory left in place: {}", dir.display());
    }
    if fixed > 0 {
        store.refresh_counts()?;
    }
    info!("Repaired {} of {} problems", fixed, report.fixable());
    Ok(fixed)
}

/// Probe every stored user on the remote. The guard is polled before each request.
pub fn probe_users(store: &Store, site: &dyn RemoteSite, cancel: &CancelGuard) -> crate::Result<ProbeReport> {
    let mut report = ProbeReport::default();
    for user in store.user_list()? {
        if cancel.poll() {
            report.interrupted = true;
            break;
        }
        report.checked += 1;
        match site.probe_user(&user.handle) {
            Ok(probe) => match probe.status {
                ProbeStatus::Ok => {}
                ProbeStatus::NotFound => report.not_found.push(user.handle),
                ProbeStatus::DisabledAccount => report.disabled.push(user.handle),
            },
            Err(e) if e.is_transient() => {
                warn!("Could not probe {}: {}", user.handle, e);
                report.failed.push(user.handle);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(report)
}
