use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelGuard;
use crate::config::AppConfig;
use crate::error::Error;
use crate::fetcher::{FetchOptions, FetchOutcome, ItemFetcher};
use crate::progress::ProgressReporter;
use crate::remote::RemoteSite;
use crate::scheduler::{CrawlScheduler, SectionOutcome, SectionReport, UpdateOptions};
use crate::storage::models::{canonical_handle, Section};
use crate::storage::{keys, Store};

/// Entry points used by the command-line layer.
///
/// Owns nothing but references: the store, the site client and the cancel
/// guard are created by the caller and live for the whole invocation.
pub struct SyncEngine<'a> {
    store: &'a Store,
    site: &'a dyn RemoteSite,
    files_root: PathBuf,
    cancel: &'a CancelGuard,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub handle: String,
    pub sections: Vec<SectionReport>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub users: Vec<UserSummary>,
    pub downloaded: usize,
    pub metadata_only: usize,
    pub already_archived: usize,
    pub failed: usize,
    pub page_errors: usize,
    pub disabled: usize,
    pub would_fetch: usize,
    pub interrupted: bool,
    pub stopped_early: bool,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl RunSummary {
    fn add(&mut self, handle: &str, report: SectionReport) {
        self.downloaded += report.downloaded;
        self.metadata_only += report.metadata_only;
        self.already_archived += report.already_archived;
        self.failed += report.failed;
        self.page_errors += report.page_errors;
        self.would_fetch += report.would_fetch;
        match report.outcome {
            SectionOutcome::Disabled => self.disabled += 1,
            SectionOutcome::Interrupted => self.interrupted = true,
            _ => {}
        }
        match self.users.last_mut() {
            Some(user) if user.handle == handle => user.sections.push(report),
            _ => self.users.push(UserSummary {
                handle: handle.to_string(),
                sections: vec![report],
            }),
        }
    }

    pub fn outcome(&self, handle: &str, section: Section) -> Option<SectionOutcome> {
        self.users
            .iter()
            .filter(|user| user.handle == handle)
            .flat_map(|user| user.sections.iter())
            .find(|report| report.section == section)
            .map(|report| report.outcome)
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Other(e.to_string()))
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        store: &'a Store,
        site: &'a dyn RemoteSite,
        files_root: impl Into<PathBuf>,
        cancel: &'a CancelGuard,
    ) -> Self {
        Self {
            store,
            site,
            files_root: files_root.into(),
            cancel,
        }
    }

    pub fn from_config(
        store: &'a Store,
        site: &'a dyn RemoteSite,
        config: &AppConfig,
        cancel: &'a CancelGuard,
    ) -> Self {
        Self::new(store, site, config.files_root.clone(), cancel)
    }

    /// Crawl `sections` of every handle in `users`.
    ///
    /// Unknown handles are created with the requested sections enabled.
    /// Known handles only crawl the requested sections they have enabled.
    /// A session failure aborts before anything is written. Later errors
    /// still record the run duration and totals before they are returned.
    pub fn run_update(
        &self,
        users: &[String],
        sections: &[Section],
        options: &UpdateOptions,
        reporter: &dyn ProgressReporter,
    ) -> Result<RunSummary, Error> {
        self.site.check_session()?;

        let start = Instant::now();
        if !options.dry_run {
            self.store
                .metadata_set(keys::LASTUP, &Utc::now().timestamp().to_string())?;
        }
        info!(
            "Updating {} users, sections {:?}{}",
            users.len(),
            sections,
            if options.dry_run { " (dry run)" } else { "" }
        );
        reporter.on_run_start(users.len());

        let fetcher = ItemFetcher::new(self.store, self.site, self.files_root.clone(), reporter);
        let mut scheduler = CrawlScheduler::new(
            self.store,
            self.site,
            fetcher,
            self.cancel,
            reporter,
            options.clone(),
        );
        let mut summary = RunSummary::default();
        let mut failure = None;

        'users: for raw in users {
            let handle = canonical_handle(raw);
            if handle.is_empty() {
                warn!("Skipping invalid user name '{}'", raw);
                continue;
            }
            let crawl = match self.sections_to_crawl(&handle, sections, options.dry_run) {
                Ok(crawl) => crawl,
                Err(e) => {
                    failure = Some(e);
                    break 'users;
                }
            };
            if crawl.is_empty() {
                debug!("{} has none of {:?} enabled", handle, sections);
                continue;
            }
            reporter.on_user_start(&handle);

            for section in crawl {
                if self.cancel.poll() {
                    summary.add(
                        &handle,
                        SectionReport::new(section).finish(SectionOutcome::Interrupted),
                    );
                    break 'users;
                }
                let report = match scheduler.crawl_section(&handle, section) {
                    Ok(report) => report,
                    Err(e) => {
                        error!("{} {}: run aborted: {}", handle, section, e);
                        failure = Some(e);
                        break 'users;
                    }
                };
                let outcome = report.outcome;
                info!("{} {}: {:?}", handle, section, outcome);
                reporter.on_section_complete(&handle, section, outcome);
                summary.add(&handle, report);

                if outcome == SectionOutcome::Interrupted {
                    break 'users;
                }
                if scheduler.stop_reached() {
                    summary.stopped_early = true;
                    break 'users;
                }
            }
        }

        summary.duration = start.elapsed();
        if !options.dry_run {
            let finished = self.finish_run(summary.duration);
            match (failure, finished) {
                (Some(e), Err(bookkeeping)) => {
                    warn!("Run totals not recorded: {}", bookkeeping);
                    return Err(e);
                }
                (Some(e), Ok(())) => return Err(e),
                (None, finished) => finished?,
            }
        } else if let Some(e) = failure {
            return Err(e);
        }
        info!(
            "Run finished: {} downloaded, {} metadata only, {} already archived, {} failed, {} disabled{}",
            summary.downloaded,
            summary.metadata_only,
            summary.already_archived,
            summary.failed + summary.page_errors,
            summary.disabled,
            if summary.interrupted { " (interrupted)" } else { "" }
        );
        Ok(summary)
    }

    /// Record the run duration and refresh the cached user and item totals.
    fn finish_run(&self, duration: Duration) -> Result<(), Error> {
        self.store
            .metadata_set(keys::LASTUPT, &duration.as_secs().to_string())?;
        let (user_count, item_count) = self.store.refresh_counts()?;
        debug!("Store now holds {} users, {} items", user_count, item_count);
        Ok(())
    }

    /// Archive a single item outside of any section crawl.
    pub fn fetch_item(
        &self,
        id: u64,
        options: &FetchOptions,
        reporter: &dyn ProgressReporter,
    ) -> Result<FetchOutcome, Error> {
        self.cancel.checkpoint()?;
        let start = Instant::now();
        self.store
            .metadata_set(keys::LASTDL, &Utc::now().timestamp().to_string())?;

        let fetcher = ItemFetcher::new(self.store, self.site, self.files_root.clone(), reporter);
        let outcome = fetcher.fetch(id, options)?;

        self.store
            .metadata_set(keys::LASTDLT, &start.elapsed().as_secs().to_string())?;
        self.store.refresh_counts()?;
        info!("Submission {}: {:?}", id, outcome);
        Ok(outcome)
    }

    fn sections_to_crawl(
        &self,
        handle: &str,
        requested: &[Section],
        dry_run: bool,
    ) -> Result<Vec<Section>, Error> {
        let Some(user) = self.store.user_get(handle)? else {
            if !dry_run {
                self.store.user_insert(handle, handle)?;
                self.store.user_enable_sections(handle, requested)?;
            }
            return Ok(requested.to_vec());
        };
        let enabled: Vec<Section> = user.folder_flags().iter().map(|flag| flag.section).collect();
        Ok(requested
            .iter()
            .copied()
            .filter(|section| enabled.contains(section))
            .collect())
    }
}
