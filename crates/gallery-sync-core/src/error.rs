use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Session could not be established: {0}")]
    Session(String),

    #[error("Store version {found} is newer than the supported version {supported}")]
    SchemaTooNew { found: String, supported: String },

    #[error("No upgrader registered for store version {0}")]
    UnknownVersion(String),

    #[error("Staged store failed validation: {0}")]
    MigrationCorrupt(String),

    #[error("Store is at version {found}, expected {expected}; run the upgrade first")]
    VersionMismatch { found: String, expected: String },

    #[error("Store {0} is already open by another writer")]
    StoreLocked(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Network failures and server errors: reported per item, never abort a run.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Remote(_))
    }

    /// Errors that must stop everything instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SchemaTooNew { .. } | Error::UnknownVersion(_) | Error::MigrationCorrupt(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
