use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::progress::ProgressReporter;
use crate::remote::{RemoteSite, SubmissionPage};
use crate::sniff::{self, SNIFF_LEN};
use crate::storage::models::{ItemField, Submission, NO_FILE};
use crate::storage::Store;
use crate::tiered::{item_dir, tiered_path};

const CHUNK_SIZE: usize = 64 * 1024;
const DELAY_PER_SPEED_STEP_MS: u64 = 25;
const PART_FILE: &str = "submission.part";

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub quiet: bool,
    pub check_dedup: bool,
    /// 0 downloads at full speed; each step adds a per-chunk delay.
    pub speed: u32,
    pub overwrite: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            quiet: false,
            check_dedup: true,
            speed: 0,
            overwrite: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    Downloaded,
    /// Metadata saved, payload missing or failed.
    MetadataOnly,
    AlreadyArchived,
    /// Item deleted, private or renamed. Nothing written.
    PageError,
}

impl FetchOutcome {
    pub fn is_archived(self) -> bool {
        !matches!(self, FetchOutcome::PageError)
    }
}

struct DownloadedFile {
    ext: String,
    bytes: u64,
}

/// Fetches one item page, its payload and persists both.
pub struct ItemFetcher<'a> {
    store: &'a Store,
    site: &'a dyn RemoteSite,
    files_root: PathBuf,
    reporter: &'a dyn ProgressReporter,
}

impl<'a> ItemFetcher<'a> {
    pub fn new(
        store: &'a Store,
        site: &'a dyn RemoteSite,
        files_root: impl Into<PathBuf>,
        reporter: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            store,
            site,
            files_root: files_root.into(),
            reporter,
        }
    }

    /// Archive item `id`.
    ///
    /// Transient remote failures come back as `Err` for the caller to
    /// classify; store and disk failures are also `Err`.
    pub fn fetch(&self, id: u64, options: &FetchOptions) -> crate::Result<FetchOutcome> {
        if options.check_dedup && !options.overwrite && self.store.item_exists(id)? {
            let title = self
                .store
                .item_read_field(id, ItemField::Title)?
                .unwrap_or_default();
            debug!("Submission {} already archived", id);
            self.report(options, id, &title, FetchOutcome::AlreadyArchived);
            return Ok(FetchOutcome::AlreadyArchived);
        }

        let Some(page) = self.site.submission(id)? else {
            self.report(options, id, "", FetchOutcome::PageError);
            return Ok(FetchOutcome::PageError);
        };

        let dir = item_dir(&self.files_root, id);
        fs::create_dir_all(&dir)?;
        let previous_ext = self.store.item_read_field(id, ItemField::FileExt)?;
        let existed = previous_ext.is_some();

        let download = match self.download(id, &page.file_link, &dir, options) {
            Ok(download) => download,
            Err(e) => {
                warn!("Payload of {} could not be downloaded: {}", id, e);
                remove_if_exists(&dir.join(PART_FILE))?;
                None
            }
        };

        let mut submission = build_submission(&page, download.as_ref());
        if download.is_none() {
            if let Some(ext) = previous_ext.as_deref().filter(|ext| payload_on_disk(&dir, ext)) {
                warn!("Keeping the archived payload of {} (submission.{})", id, ext);
                submission.file_ext = ext.to_string();
            }
        }
        let inserted = self.store.item_insert_with(&submission, options.overwrite, || {
            write_item_files(&dir, &submission, download.is_some())
        });

        let inserted = match inserted {
            Ok(inserted) => inserted,
            Err(e) => {
                if existed {
                    discard_new_payload(&dir, &submission, previous_ext.as_deref())?;
                } else {
                    cleanup_item_files(&dir, &submission)?;
                }
                return Err(e);
            }
        };

        if inserted && download.is_some() {
            if let Err(e) = remove_stale_payloads(&dir, &submission.file_ext) {
                warn!("Old payload of {} could not be removed: {}", id, e);
            }
        }

        if !inserted {
            remove_if_exists(&dir.join(PART_FILE))?;
            self.report(options, id, &page.title, FetchOutcome::AlreadyArchived);
            return Ok(FetchOutcome::AlreadyArchived);
        }

        let outcome = match &download {
            Some(file) => {
                info!("Saved {} '{}' ({} bytes, .{})", id, page.title, file.bytes, file.ext);
                FetchOutcome::Downloaded
            }
            None => FetchOutcome::MetadataOnly,
        };
        self.report(options, id, &page.title, outcome);
        Ok(outcome)
    }

    /// Stream the payload into the part file. `None` for an empty payload.
    fn download(
        &self,
        id: u64,
        url: &str,
        dir: &Path,
        options: &FetchOptions,
    ) -> crate::Result<Option<DownloadedFile>> {
        let mut payload = self.site.open_payload(url)?;
        if !options.quiet {
            self.reporter.on_download_start(id, payload.len);
        }

        let part_path = dir.join(PART_FILE);
        let mut part = File::create(&part_path)?;
        let mut head: Vec<u8> = Vec::with_capacity(SNIFF_LEN);
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total: u64 = 0;
        let delay = Duration::from_millis(u64::from(options.speed) * DELAY_PER_SPEED_STEP_MS);

        loop {
            let n = match payload.reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if head.len() < SNIFF_LEN {
                let take = (SNIFF_LEN - head.len()).min(n);
                head.extend_from_slice(&buf[..take]);
            }
            part.write_all(&buf[..n])?;
            total += n as u64;
            if !options.quiet {
                self.reporter.on_download_progress(total);
            }
            if options.speed > 0 {
                thread::sleep(delay);
            }
        }
        part.sync_all()?;
        drop(part);

        if !options.quiet {
            self.reporter.on_download_complete(total);
        }

        if total == 0 {
            debug!("Payload of {} is empty, storing without file", id);
            fs::remove_file(&part_path)?;
            return Ok(None);
        }

        Ok(Some(DownloadedFile {
            ext: sniff::choose_extension(&head, url),
            bytes: total,
        }))
    }

    fn report(&self, options: &FetchOptions, id: u64, title: &str, outcome: FetchOutcome) {
        if !options.quiet {
            self.reporter.on_item(id, title, outcome);
        }
    }
}

fn build_submission(page: &SubmissionPage, download: Option<&DownloadedFile>) -> Submission {
    Submission {
        id: page.id,
        author: page.author.clone(),
        author_url: page.author_url.clone(),
        title: page.title.clone(),
        upload_date: page.upload_date.clone(),
        description: page.description.clone(),
        tags: page.tags.join(" "),
        category: page.category.clone(),
        species: page.species.clone(),
        gender: page.gender.clone(),
        rating: page.rating.clone(),
        file_link: page.file_link.clone(),
        file_ext: download
            .map(|file| file.ext.clone())
            .unwrap_or_else(|| NO_FILE.to_string()),
        location: tiered_path(page.id),
        server: true,
    }
}

/// Move the part file into place and write the sibling text files.
///
/// Payloads with another extension stay until the row is committed.
fn write_item_files(dir: &Path, sub: &Submission, has_part: bool) -> io::Result<()> {
    if has_part {
        fs::rename(
            dir.join(PART_FILE),
            dir.join(format!("submission.{}", sub.file_ext)),
        )?;
    }
    fs::write(dir.join("description.html"), &sub.description)?;
    fs::write(dir.join("info.txt"), info_text(sub))?;
    Ok(())
}

fn payload_on_disk(dir: &Path, ext: &str) -> bool {
    ext != NO_FILE && dir.join(format!("submission.{}", ext)).is_file()
}

/// Remove every `submission.*` except the current payload and the part file.
fn remove_stale_payloads(dir: &Path, current_ext: &str) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let stale = path.file_stem().is_some_and(|stem| stem == "submission")
            && path
                .extension()
                .is_some_and(|ext| ext != "part" && ext != current_ext);
        if stale {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Undo a rolled-back overwrite: the stored row still names `previous_ext`.
fn discard_new_payload(dir: &Path, sub: &Submission, previous_ext: Option<&str>) -> io::Result<()> {
    remove_if_exists(&dir.join(PART_FILE))?;
    if sub.has_file() && previous_ext != Some(sub.file_ext.as_str()) {
        remove_if_exists(&dir.join(format!("submission.{}", sub.file_ext)))?;
    }
    Ok(())
}

fn cleanup_item_files(dir: &Path, sub: &Submission) -> io::Result<()> {
    remove_if_exists(&dir.join(PART_FILE))?;
    if sub.has_file() {
        remove_if_exists(&dir.join(format!("submission.{}", sub.file_ext)))?;
    }
    remove_if_exists(&dir.join("description.html"))?;
    remove_if_exists(&dir.join("info.txt"))?;
    // Only succeeds when nothing else lives there.
    fs::remove_dir(dir).ok();
    Ok(())
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn info_text(sub: &Submission) -> String {
    let file = if sub.has_file() {
        format!("submission.{}", sub.file_ext)
    } else {
        String::new()
    };
    [
        ("ID", sub.id.to_string()),
        ("Title", sub.title.clone()),
        ("Author", sub.author.clone()),
        ("Author URL", sub.author_url.clone()),
        ("Upload date", sub.upload_date.clone()),
        ("Category", sub.category.clone()),
        ("Species", sub.species.clone()),
        ("Gender", sub.gender.clone()),
        ("Rating", sub.rating.clone()),
        ("Tags", sub.tags.clone()),
        ("File link", sub.file_link.clone()),
        ("File", file),
    ]
    .iter()
    .map(|(key, value)| format!("{}: {}\n", key, value))
    .collect()
}
