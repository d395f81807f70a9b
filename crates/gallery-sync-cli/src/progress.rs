use colored::*;
use gallery_sync_core::{FetchOutcome, ProgressReporter, RunSummary, Section, SectionOutcome};
use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressStyle};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Pagination: spinner per user/section
/// - Downloads: byte bar below the spinner (length known when the server sends it)
/// - Migration rows: counted bar
pub struct CliReporter {
    multi: MultiProgress,
    spinner: Mutex<Option<ProgressBar>>,
    download: Mutex<Option<ProgressBar>>,
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸─")
        .tick_chars(TICKS)
}

fn slot(bar: &Mutex<Option<ProgressBar>>) -> MutexGuard<'_, Option<ProgressBar>> {
    bar.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            spinner: Mutex::new(None),
            download: Mutex::new(None),
        }
    }

    fn replace(&self, bar: &Mutex<Option<ProgressBar>>, pb: ProgressBar) {
        let pb = self.multi.add(pb);
        let mut guard = slot(bar);
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish(&self, bar: &Mutex<Option<ProgressBar>>) {
        if let Some(pb) = slot(bar).take() {
            pb.finish_and_clear();
        }
    }

    fn line(&self, text: String) {
        if self.multi.println(&text).is_err() {
            eprintln!("{}", text);
        }
    }

    /// Clear any bars still on screen.
    pub fn clear(&self) {
        self.finish(&self.download);
        self.finish(&self.spinner);
    }
}

impl ProgressReporter for CliReporter {
    fn on_run_start(&self, users: usize) {
        self.line(format!("Updating {} user(s)", users.to_string().cyan()));
    }

    fn on_user_start(&self, handle: &str) {
        self.line(format!("{}", handle.bold()));
    }

    fn on_section_start(&self, handle: &str, section: Section) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(style("  {spinner:.cyan} {msg}"));
        pb.set_message(format!("{} {}: listing...", handle, section));
        pb.enable_steady_tick(Duration::from_millis(80));
        self.replace(&self.spinner, pb);
    }

    fn on_page(&self, handle: &str, section: Section, page: u32, items: usize) {
        if let Some(pb) = slot(&self.spinner).as_ref() {
            pb.set_message(format!("{} {}: page {} ({} items)", handle, section, page, items));
        }
    }

    fn on_section_complete(&self, _handle: &str, section: Section, outcome: SectionOutcome) {
        self.finish(&self.spinner);
        let label = match outcome {
            SectionOutcome::NoNew => "up to date".green(),
            SectionOutcome::PartialNew => "new items archived".green(),
            SectionOutcome::Complete => "fully walked".green(),
            SectionOutcome::Disabled => "disabled".yellow(),
            SectionOutcome::Interrupted => "interrupted".yellow(),
            SectionOutcome::Failed => "listing failed".red(),
        };
        self.line(format!("  {} {}", section, label));
    }

    fn on_item(&self, id: u64, title: &str, outcome: FetchOutcome) {
        let marker = match outcome {
            FetchOutcome::Downloaded => "+".green(),
            FetchOutcome::MetadataOnly => "~".yellow(),
            FetchOutcome::AlreadyArchived => "=".dimmed(),
            FetchOutcome::PageError => "!".red(),
        };
        self.line(format!("    {} {} {}", marker, id, title));
    }

    fn on_download_start(&self, id: u64, total_bytes: Option<u64>) {
        let pb = match total_bytes {
            Some(total) => {
                let pb = ProgressBar::new(total);
                pb.set_style(style(
                    "    [{bar:30.cyan/dim}] {bytes}/{total_bytes} {binary_bytes_per_sec} {msg}",
                ));
                pb
            }
            None => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(style("    {spinner:.cyan} {bytes} {binary_bytes_per_sec} {msg}"));
                pb
            }
        };
        pb.set_message(id.to_string());
        self.replace(&self.download, pb);
    }

    fn on_download_progress(&self, bytes: u64) {
        if let Some(pb) = slot(&self.download).as_ref() {
            pb.set_position(bytes);
        }
    }

    fn on_download_complete(&self, bytes: u64) {
        self.finish(&self.download);
        if bytes == 0 {
            self.line(format!("      {}", "empty payload".yellow()));
        } else {
            self.line(format!("      {}", HumanBytes(bytes).to_string().dimmed()));
        }
    }

    fn on_migration_step(&self, from: &str, to: &str) {
        self.finish(&self.download);
        self.line(format!("Upgrading store {} -> {}", from.yellow(), to.green()));
        let pb = ProgressBar::new(0);
        pb.set_style(style("  {spinner:.cyan} [{bar:30.cyan/dim}] {pos}/{len} rows"));
        self.replace(&self.spinner, pb);
    }

    fn on_migration_row(&self, done: usize, total: usize) {
        if let Some(pb) = slot(&self.spinner).as_ref() {
            if pb.length() != Some(total as u64) {
                pb.set_length(total as u64);
            }
            pb.set_position(done as u64);
        }
    }
}

pub fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "{} downloaded, {} metadata only, {} already archived in {}",
        summary.downloaded.to_string().green(),
        summary.metadata_only.to_string().yellow(),
        summary.already_archived.to_string().dimmed(),
        format!("{:.2}s", summary.duration.as_secs_f64()).green(),
    );
    if summary.failed + summary.page_errors > 0 {
        println!(
            "{} failed (retried next run), {} unavailable",
            summary.failed.to_string().red(),
            summary.page_errors.to_string().red(),
        );
    }
    if summary.would_fetch > 0 {
        println!("{} new item(s) would be fetched", summary.would_fetch.to_string().cyan());
    }
    if summary.disabled > 0 {
        println!("{} section(s) disabled", summary.disabled.to_string().yellow());
    }
    if summary.stopped_early {
        println!("{}", "Stopped after reaching the download limit".yellow());
    }
    if summary.interrupted {
        println!("{}", "Interrupted; the next run picks up where this one stopped".yellow());
    }
}
