use std::path::{Path, PathBuf};

/// Width of the zero-padded id used for item directories and membership lists.
pub const ID_WIDTH: usize = 10;

/// Map an item id to its three-level storage path.
///
/// `1234567890` -> `"123/4/567"`. The same value is stored in the
/// `LOCATION` column, so the repair checker compares against this output.
pub fn tiered_path(id: u64) -> String {
    format!(
        "{}/{}/{:03}",
        id / 10_000_000,
        (id % 10_000_000) / 1_000_000,
        (id % 1_000_000) / 1_000
    )
}

pub fn padded_id(id: u64) -> String {
    format!("{:0width$}", id, width = ID_WIDTH)
}

/// Directory holding an item's payload, `description.html` and `info.txt`.
pub fn item_dir(files_root: &Path, id: u64) -> PathBuf {
    let mut dir = files_root.to_path_buf();
    for part in tiered_path(id).split('/') {
        dir.push(part);
    }
    dir.push(padded_id(id));
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches_shape(path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').collect();
        parts.len() == 3
            && parts.iter().all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
            && parts[2].len() == 3
    }

    #[test]
    fn test_tiered_path_known_values() {
        assert_eq!(tiered_path(0), "0/0/000");
        assert_eq!(tiered_path(1), "0/0/000");
        assert_eq!(tiered_path(12_345), "0/0/012");
        assert_eq!(tiered_path(1_234_567_890), "123/4/567");
        assert_eq!(tiered_path(9_999_999_999), "999/9/999");
    }

    #[test]
    fn test_tiered_path_shape_over_range() {
        let mut id = 0u64;
        while id < 10_000_000_000 {
            let path = tiered_path(id);
            assert!(matches_shape(&path), "bad path {} for {}", path, id);
            assert_eq!(path, tiered_path(id));
            id = id * 3 + 7;
        }
    }

    #[test]
    fn test_item_dir_layout() {
        let dir = item_dir(Path::new("files"), 36_123_456);
        assert_eq!(dir, Path::new("files/3/6/123/0036123456"));
    }

    #[test]
    fn test_padded_id() {
        assert_eq!(padded_id(42), "0000000042");
        assert_eq!(padded_id(1_234_567_890), "1234567890");
    }
}
