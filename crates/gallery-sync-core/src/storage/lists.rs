//! Comma-joined sets stored in `USERS`.
//!
//! Membership columns hold zero-padded ids, sorted, without duplicates.
//! `FOLDERS` holds section codes with an optional disabled marker.

use super::models::{FolderFlag, Section, DISABLED_MARK};
use crate::tiered::ID_WIDTH;

pub fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|entry| !entry.is_empty())
}

/// Normalize a membership entry to the fixed-width form.
pub fn pad_entry(entry: &str) -> String {
    let trimmed = entry.trim();
    if trimmed.bytes().all(|b| b.is_ascii_digit()) && trimmed.len() < ID_WIDTH {
        format!("{:0>width$}", trimmed, width = ID_WIDTH)
    } else {
        trimmed.to_string()
    }
}

pub fn list_contains(list: &str, entry: &str) -> bool {
    let entry = pad_entry(entry);
    split_list(list).any(|existing| existing == entry)
}

/// Add `entry` to a serialized set. Returns `None` when already present.
pub fn list_insert(list: &str, entry: &str) -> Option<String> {
    let entry = pad_entry(entry);
    let mut entries: Vec<&str> = split_list(list).collect();
    match entries.binary_search(&entry.as_str()) {
        Ok(_) => None,
        Err(pos) => {
            entries.insert(pos, entry.as_str());
            Some(entries.join(","))
        }
    }
}

/// Re-pad, sort and de-duplicate a list written by an older store.
pub fn normalize_list(list: &str) -> String {
    let mut entries: Vec<String> = split_list(list).map(pad_entry).collect();
    entries.sort();
    entries.dedup();
    entries.join(",")
}

pub fn parse_folders(folders: &str) -> Vec<FolderFlag> {
    split_list(folders)
        .filter_map(|entry| {
            let mut chars = entry.chars();
            let section = Section::from_code(chars.next()?)?;
            let disabled = chars.next() == Some(DISABLED_MARK);
            Some(FolderFlag { section, disabled })
        })
        .collect()
}

pub fn format_folders(flags: &[FolderFlag]) -> String {
    let mut sorted = flags.to_vec();
    sorted.sort_by_key(|flag| flag.section);
    sorted.dedup_by_key(|flag| flag.section);
    sorted
        .iter()
        .map(|flag| {
            if flag.disabled {
                format!("{}{}", flag.section.code(), DISABLED_MARK)
            } else {
                flag.section.code().to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Set the state of one section code, adding it when absent.
pub fn set_folder(folders: &str, section: Section, disabled: bool) -> String {
    let mut flags = parse_folders(folders);
    match flags.iter_mut().find(|flag| flag.section == section) {
        Some(flag) => flag.disabled = disabled,
        None => flags.push(FolderFlag { section, disabled }),
    }
    format_folders(&flags)
}

/// Add a section code as enabled, leaving an existing disabled marker alone.
pub fn ensure_folder(folders: &str, section: Section) -> String {
    let mut flags = parse_folders(folders);
    if !flags.iter().any(|flag| flag.section == section) {
        flags.push(FolderFlag {
            section,
            disabled: false,
        });
    }
    format_folders(&flags)
}

pub fn remove_folder(folders: &str, section: Section) -> String {
    let flags: Vec<FolderFlag> = parse_folders(folders)
        .into_iter()
        .filter(|flag| flag.section != section)
        .collect();
    format_folders(&flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_insert_keeps_sorted_and_padded() {
        let list = list_insert("", "3").unwrap();
        let list = list_insert(&list, "1").unwrap();
        let list = list_insert(&list, "0000000002").unwrap();
        assert_eq!(list, "0000000001,0000000002,0000000003");
        assert!(list_insert(&list, "2").is_none());
        assert!(list_contains(&list, "0000000003"));
        assert!(!list_contains(&list, "4"));
    }

    #[test]
    fn test_normalize_list() {
        assert_eq!(normalize_list("5,12,5,,3"), "0000000003,0000000005,0000000012");
    }

    #[test]
    fn test_folders_roundtrip_with_disabled_marker() {
        let folders = set_folder("s,g", Section::Favorites, true);
        assert_eq!(folders, "g,s,f!");
        let folders = set_folder(&folders, Section::Favorites, false);
        assert_eq!(folders, "g,s,f");
        assert_eq!(ensure_folder("g!", Section::Gallery), "g!");
        assert_eq!(remove_folder("g,s", Section::Gallery), "s");
    }

    #[test]
    fn test_parse_folders_skips_unknown_codes() {
        let flags = parse_folders("g,x,e!");
        assert_eq!(flags.len(), 2);
        assert!(flags[1].disabled);
        assert_eq!(flags[1].section, Section::Extras);
    }
}
