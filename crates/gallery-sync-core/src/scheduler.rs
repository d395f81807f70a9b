//! Per-section pagination with the dedup-stop heuristic.
//!
//! Listings arrive newest first. A hit on the very first item of the first
//! page means nothing new was posted since the last run. A hit anywhere
//! else means the new items are behind us once the current page is done,
//! since items later on the same page may still be new.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancelGuard;
use crate::fetcher::{FetchOptions, FetchOutcome, ItemFetcher};
use crate::progress::ProgressReporter;
use crate::remote::RemoteSite;
use crate::storage::models::Section;
use crate::storage::Store;
use crate::tiered::padded_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionOutcome {
    /// First item of the first page was already archived.
    NoNew,
    /// Stopped after the page holding the first archived item.
    PartialNew,
    /// Walked until an empty page.
    Complete,
    /// Empty first page, or marked disabled by an earlier run.
    Disabled,
    Interrupted,
    /// A listing page could not be fetched.
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Per-chunk download delay step, see [`FetchOptions::speed`].
    pub speed: u32,
    /// Crawl sections marked disabled and clear the marker when they list items again.
    pub force: bool,
    /// Paginate and classify without fetching or writing.
    pub dry_run: bool,
    /// Stop the run after this many new downloads.
    pub stop_after: Option<usize>,
    /// Known remote page size. A shorter page ends the listing early.
    pub page_size: Option<usize>,
}

impl UpdateOptions {
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            quiet: false,
            check_dedup: true,
            speed: self.speed,
            overwrite: false,
        }
    }
}

/// Counts for one user/section pair.
#[derive(Debug, Clone, Serialize)]
pub struct SectionReport {
    pub section: Section,
    pub outcome: SectionOutcome,
    pub pages: u32,
    pub downloaded: usize,
    pub metadata_only: usize,
    pub already_archived: usize,
    /// Items the site no longer renders.
    pub page_errors: usize,
    /// Transient failures, left for the next run.
    pub failed: usize,
    /// New items seen during a dry run.
    pub would_fetch: usize,
}

impl SectionReport {
    pub(crate) fn new(section: Section) -> Self {
        Self {
            section,
            outcome: SectionOutcome::Complete,
            pages: 0,
            downloaded: 0,
            metadata_only: 0,
            already_archived: 0,
            page_errors: 0,
            failed: 0,
            would_fetch: 0,
        }
    }

    pub(crate) fn finish(mut self, outcome: SectionOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

enum ItemStep {
    Continue,
    /// Already a member of this section.
    Found,
    StopAfterReached,
}

pub struct CrawlScheduler<'a> {
    store: &'a Store,
    site: &'a dyn RemoteSite,
    fetcher: ItemFetcher<'a>,
    cancel: &'a CancelGuard,
    reporter: &'a dyn ProgressReporter,
    options: UpdateOptions,
    new_downloads: usize,
}

impl<'a> CrawlScheduler<'a> {
    pub fn new(
        store: &'a Store,
        site: &'a dyn RemoteSite,
        fetcher: ItemFetcher<'a>,
        cancel: &'a CancelGuard,
        reporter: &'a dyn ProgressReporter,
        options: UpdateOptions,
    ) -> Self {
        Self {
            store,
            site,
            fetcher,
            cancel,
            reporter,
            options,
            new_downloads: 0,
        }
    }

    /// True once `stop_after` new downloads were made in this run.
    pub fn stop_reached(&self) -> bool {
        self.options
            .stop_after
            .is_some_and(|limit| self.new_downloads >= limit)
    }

    pub fn new_downloads(&self) -> usize {
        self.new_downloads
    }

    /// Crawl one section of `handle`.
    ///
    /// Store failures and session failures come back as `Err`; everything
    /// item-level is folded into the report.
    pub fn crawl_section(&mut self, handle: &str, section: Section) -> crate::Result<SectionReport> {
        let mut report = SectionReport::new(section);
        let was_disabled = self
            .store
            .user_get(handle)?
            .is_some_and(|user| user.is_disabled(section));

        if was_disabled && !self.options.force {
            debug!("{} {} is marked disabled, skipping", handle, section);
            return Ok(report.finish(SectionOutcome::Disabled));
        }

        self.reporter.on_section_start(handle, section);
        let fetch_options = self.options.fetch_options();
        let mut page: u32 = 1;

        loop {
            if self.cancel.poll() {
                return Ok(report.finish(SectionOutcome::Interrupted));
            }

            let ids = match self.site.listing(handle, section, page) {
                Ok(ids) => ids,
                Err(e) if e.is_transient() => {
                    warn!("{} {} page {} could not be listed: {}", handle, section, page, e);
                    return Ok(report.finish(SectionOutcome::Failed));
                }
                Err(e) => return Err(e),
            };
            report.pages = page;
            self.reporter.on_page(handle, section, page, ids.len());
            debug!("{} {} page {}: {} items", handle, section, page, ids.len());

            if ids.is_empty() {
                if page > 1 {
                    return Ok(report.finish(SectionOutcome::Complete));
                }
                warn!("{} {} returned an empty first page, marking disabled", handle, section);
                if !self.options.dry_run {
                    self.store.user_mark_section_disabled(handle, section)?;
                }
                return Ok(report.finish(SectionOutcome::Disabled));
            }

            if page == 1 && was_disabled && !self.options.dry_run {
                info!("{} {} lists items again, clearing disabled marker", handle, section);
                self.store.user_clear_disabled(handle, section)?;
            }

            let mut found = false;
            for (index, id) in ids.iter().copied().enumerate() {
                if self.cancel.poll() {
                    return Ok(report.finish(SectionOutcome::Interrupted));
                }
                match self.process_item(handle, section, id, &fetch_options, &mut report)? {
                    ItemStep::Found if page == 1 && index == 0 => {
                        return Ok(report.finish(SectionOutcome::NoNew));
                    }
                    ItemStep::Found => found = true,
                    ItemStep::StopAfterReached => {
                        info!("Reached the limit of {} new items", self.new_downloads);
                        return Ok(report.finish(SectionOutcome::PartialNew));
                    }
                    ItemStep::Continue => {}
                }
            }

            if found {
                return Ok(report.finish(SectionOutcome::PartialNew));
            }
            if self
                .options
                .page_size
                .is_some_and(|size| ids.len() < size)
            {
                debug!("{} {} page {} is short, listing ends", handle, section, page);
                return Ok(report.finish(SectionOutcome::Complete));
            }
            page += 1;
        }
    }

    fn process_item(
        &mut self,
        handle: &str,
        section: Section,
        id: u64,
        fetch_options: &FetchOptions,
        report: &mut SectionReport,
    ) -> crate::Result<ItemStep> {
        let id_str = padded_id(id);
        if self.store.user_is_member(handle, section, &id_str)? {
            report.already_archived += 1;
            return Ok(ItemStep::Found);
        }

        if self.options.dry_run {
            report.would_fetch += 1;
            return Ok(ItemStep::Continue);
        }

        let outcome = match self.fetcher.fetch(id, fetch_options) {
            Ok(outcome) => outcome,
            Err(e) if e.is_transient() => {
                warn!("Submission {} failed, will retry next run: {}", id, e);
                report.failed += 1;
                return Ok(ItemStep::Continue);
            }
            Err(e) => return Err(e),
        };

        match outcome {
            FetchOutcome::Downloaded => report.downloaded += 1,
            FetchOutcome::MetadataOnly => report.metadata_only += 1,
            FetchOutcome::AlreadyArchived => report.already_archived += 1,
            FetchOutcome::PageError => {
                warn!("Submission {} is unavailable (deleted, private or renamed)", id);
                report.page_errors += 1;
                return Ok(ItemStep::Continue);
            }
        }
        self.store
            .user_set_section_membership(handle, section, &id_str)?;

        if outcome == FetchOutcome::Downloaded {
            self.new_downloads += 1;
            if self.stop_reached() {
                return Ok(ItemStep::StopAfterReached);
            }
        }
        Ok(ItemStep::Continue)
    }
}
