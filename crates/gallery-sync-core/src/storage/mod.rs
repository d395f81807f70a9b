pub mod lists;
pub mod models;
mod queries;
mod sqlite;

pub use queries::MembershipChange;
pub(crate) use queries::create_indices;
pub use sqlite::{is_initialized, read_version, Store, CURRENT_VERSION};
pub(crate) use sqlite::{locked_or, open_connection, table_exists};

/// `INFOS` field names.
pub mod keys {
    pub const DBNAME: &str = "DBNAME";
    pub const VERSION: &str = "VERSION";
    /// Number of users.
    pub const USN: &str = "USN";
    /// Number of submissions.
    pub const SUN: &str = "SUN";
    pub const LASTUP: &str = "LASTUP";
    pub const LASTUPT: &str = "LASTUPT";
    pub const LASTDL: &str = "LASTDL";
    pub const LASTDLT: &str = "LASTDLT";
    /// "1" while the indices reflect the stored rows.
    pub const INDEX: &str = "INDEX";
}
