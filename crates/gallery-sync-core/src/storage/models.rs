use serde::Serialize;
use std::fmt;

/// Stored in `FILEEXT` when an item has no payload on disk.
pub const NO_FILE: &str = "0";

/// Suffix appended to a section code in `FOLDERS` once the remote disabled it.
pub const DISABLED_MARK: char = '!';

/// A named subset of a user's content, synced independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Gallery,
    Scraps,
    Favorites,
    Extras,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Gallery,
        Section::Scraps,
        Section::Favorites,
        Section::Extras,
    ];

    pub fn code(self) -> char {
        match self {
            Section::Gallery => 'g',
            Section::Scraps => 's',
            Section::Favorites => 'f',
            Section::Extras => 'e',
        }
    }

    pub fn from_code(code: char) -> Option<Section> {
        match code {
            'g' => Some(Section::Gallery),
            's' => Some(Section::Scraps),
            'f' => Some(Section::Favorites),
            'e' => Some(Section::Extras),
            _ => None,
        }
    }

    /// Membership column in `USERS`.
    pub fn column(self) -> &'static str {
        match self {
            Section::Gallery => "GALLERY",
            Section::Scraps => "SCRAPS",
            Section::Favorites => "FAVORITES",
            Section::Extras => "EXTRAS",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Section::Gallery => "gallery",
            Section::Scraps => "scraps",
            Section::Favorites => "favorites",
            Section::Extras => "extras",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Section {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Section::ALL
            .iter()
            .copied()
            .find(|section| section.as_str() == lower || lower == section.code().to_string())
            .ok_or_else(|| format!("unknown section '{}'", s))
    }
}

/// One archived submission row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub id: u64,
    /// Display name as rendered by the remote.
    pub author: String,
    /// Canonical lowercase handle.
    pub author_url: String,
    pub title: String,
    /// `YYYY-MM-DD`.
    pub upload_date: String,
    pub description: String,
    /// Space-separated, sorted case-insensitively.
    pub tags: String,
    pub category: String,
    pub species: String,
    pub gender: String,
    pub rating: String,
    pub file_link: String,
    /// Extension of the saved payload, or [`NO_FILE`].
    pub file_ext: String,
    pub location: String,
    pub server: bool,
}

impl Submission {
    pub fn has_file(&self) -> bool {
        self.file_ext != NO_FILE && !self.file_ext.is_empty()
    }
}

/// Single-column reads through `Store::item_read_field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemField {
    Author,
    AuthorUrl,
    Title,
    UploadDate,
    Description,
    Tags,
    Category,
    Species,
    Gender,
    Rating,
    FileLink,
    FileExt,
    Location,
    Server,
}

impl ItemField {
    pub fn column(self) -> &'static str {
        match self {
            ItemField::Author => "AUTHOR",
            ItemField::AuthorUrl => "AUTHORURL",
            ItemField::Title => "TITLE",
            ItemField::UploadDate => "UDATE",
            ItemField::Description => "DESCRIPTION",
            ItemField::Tags => "TAGS",
            ItemField::Category => "CATEGORY",
            ItemField::Species => "SPECIES",
            ItemField::Gender => "GENDER",
            ItemField::Rating => "RATING",
            ItemField::FileLink => "FILELINK",
            ItemField::FileExt => "FILEEXT",
            ItemField::Location => "LOCATION",
            ItemField::Server => "SERVER",
        }
    }
}

/// One `USERS` row with its serialized section sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct User {
    pub handle: String,
    pub display_name: String,
    pub folders: String,
    pub gallery: String,
    pub scraps: String,
    pub favorites: String,
    pub extras: String,
}

impl User {
    pub fn membership(&self, section: Section) -> &str {
        match section {
            Section::Gallery => &self.gallery,
            Section::Scraps => &self.scraps,
            Section::Favorites => &self.favorites,
            Section::Extras => &self.extras,
        }
    }

    pub fn folder_flags(&self) -> Vec<FolderFlag> {
        super::lists::parse_folders(&self.folders)
    }

    /// Sections that are enabled and not disabled by the remote.
    pub fn active_sections(&self) -> Vec<Section> {
        self.folder_flags()
            .into_iter()
            .filter(|flag| !flag.disabled)
            .map(|flag| flag.section)
            .collect()
    }

    pub fn is_disabled(&self, section: Section) -> bool {
        self.folder_flags()
            .iter()
            .any(|flag| flag.section == section && flag.disabled)
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
            && Section::ALL
                .iter()
                .all(|section| self.membership(*section).is_empty())
    }
}

/// A section code from `FOLDERS`, with its remote-disabled marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderFlag {
    pub section: Section,
    pub disabled: bool,
}

/// Lowercase a handle and strip characters the remote ignores in URLs.
pub fn canonical_handle(name: &str) -> String {
    name.trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '~'))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_handle() {
        assert_eq!(canonical_handle("Foo_Bar"), "foobar");
        assert_eq!(canonical_handle(" Some.User~ "), "some.user~");
        assert_eq!(canonical_handle("a-b c!"), "a-bc");
    }

    #[test]
    fn test_section_parse() {
        assert_eq!("gallery".parse::<Section>().unwrap(), Section::Gallery);
        assert_eq!("F".parse::<Section>().unwrap(), Section::Favorites);
        assert!("journals".parse::<Section>().is_err());
    }

    #[test]
    fn test_user_empty_and_sections() {
        let mut user = User {
            handle: "foo".to_string(),
            ..User::default()
        };
        assert!(user.is_empty());
        user.folders = "g,s!".to_string();
        assert!(!user.is_empty());
        assert_eq!(user.active_sections(), vec![Section::Gallery]);
        assert!(user.is_disabled(Section::Scraps));
    }
}
