pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod migrate;
pub mod progress;
pub mod remote;
pub mod repair;
pub mod scheduler;
pub mod sniff;
pub mod storage;
pub mod tiered;

pub use cancel::CancelGuard;
pub use config::AppConfig;
pub use engine::{RunSummary, SyncEngine, UserSummary};
pub use error::{Error, Result};
pub use fetcher::{FetchOptions, FetchOutcome, ItemFetcher};
pub use migrate::{MigrationContext, MigrationPipeline};
pub use progress::{ProgressReporter, SilentReporter};
pub use remote::{HttpSite, RemoteSite};
pub use scheduler::{SectionOutcome, SectionReport, UpdateOptions};
pub use storage::models::Section;
pub use storage::Store;
pub use tiered::tiered_path;
