use crate::fetcher::FetchOutcome;
use crate::scheduler::SectionOutcome;
use crate::storage::models::Section;

/// Trait for reporting crawl, download and migration progress.
///
/// CLI implements with indicatif. All methods have default no-op implementations.
pub trait ProgressReporter {
    fn on_run_start(&self, _users: usize) {}
    fn on_user_start(&self, _handle: &str) {}
    fn on_section_start(&self, _handle: &str, _section: Section) {}
    fn on_page(&self, _handle: &str, _section: Section, _page: u32, _items: usize) {}
    fn on_section_complete(&self, _handle: &str, _section: Section, _outcome: SectionOutcome) {}
    fn on_item(&self, _id: u64, _title: &str, _outcome: FetchOutcome) {}
    fn on_download_start(&self, _id: u64, _total_bytes: Option<u64>) {}
    fn on_download_progress(&self, _bytes: u64) {}
    fn on_download_complete(&self, _bytes: u64) {}
    fn on_migration_step(&self, _from: &str, _to: &str) {}
    fn on_migration_row(&self, _done: usize, _total: usize) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
