#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::Path;

use gallery_sync_core::remote::{Payload, ProbeStatus, SubmissionPage, UserProbe};
use gallery_sync_core::{CancelGuard, Error, RemoteSite, Section, Store};

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR fake image body";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Session,
    Listing(String, Section, u32),
    Submission(u64),
    Payload(String),
    Probe(String),
}

/// Scripted remote site that records every request it serves.
#[derive(Default)]
pub struct FakeSite {
    listings: HashMap<(String, Section), Vec<Vec<u64>>>,
    pages: HashMap<u64, SubmissionPage>,
    payloads: HashMap<String, Vec<u8>>,
    failing_payloads: HashSet<String>,
    failing_items: HashSet<u64>,
    probes: HashMap<String, UserProbe>,
    session_down: bool,
    lost_listings: HashSet<(String, Section)>,
    requests: RefCell<Vec<Request>>,
    cancel_at: RefCell<Option<(usize, CancelGuard)>>,
    served: Cell<usize>,
}

pub fn file_link(id: u64) -> String {
    format!("https://d.example.net/art/foo/{}/file", id)
}

pub fn page(id: u64, author: &str) -> SubmissionPage {
    SubmissionPage {
        id,
        author: author.to_string(),
        author_url: author.to_lowercase(),
        title: format!("Item {}", id),
        upload_date: "2021-03-07".to_string(),
        description: format!("<b>description {}</b>", id),
        tags: vec!["art".to_string(), "fox".to_string()],
        category: "Artwork (Digital)".to_string(),
        species: "Fox".to_string(),
        gender: "Any".to_string(),
        rating: "General".to_string(),
        file_link: file_link(id),
    }
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    /// `pages` in listing order; pages past the end are empty.
    pub fn with_listing(mut self, user: &str, section: Section, pages: Vec<Vec<u64>>) -> Self {
        self.listings.insert((user.to_string(), section), pages);
        self
    }

    /// An item with a page and a PNG payload.
    pub fn with_item(self, id: u64) -> Self {
        self.with_item_payload(id, PNG_BYTES.to_vec())
    }

    pub fn with_items(self, ids: &[u64]) -> Self {
        ids.iter().fold(self, |site, id| site.with_item(*id))
    }

    pub fn with_item_payload(mut self, id: u64, payload: Vec<u8>) -> Self {
        self.pages.insert(id, page(id, "Foo"));
        self.payloads.insert(file_link(id), payload);
        self
    }

    /// Item page renders but the payload request fails.
    pub fn with_broken_payload(mut self, id: u64) -> Self {
        self.pages.insert(id, page(id, "Foo"));
        self.failing_payloads.insert(file_link(id));
        self
    }

    /// Item page request fails with a server error.
    pub fn with_failing_item(mut self, id: u64) -> Self {
        self.failing_items.insert(id);
        self
    }

    pub fn with_probe(mut self, handle: &str, status: ProbeStatus, name: Option<&str>) -> Self {
        self.probes.insert(
            handle.to_string(),
            UserProbe {
                status,
                display_name: name.map(str::to_string),
            },
        );
        self
    }

    pub fn with_session_down(mut self) -> Self {
        self.session_down = true;
        self
    }

    /// Listing requests for this user and section fail as if the login expired.
    pub fn with_session_lost(mut self, user: &str, section: Section) -> Self {
        self.lost_listings.insert((user.to_string(), section));
        self
    }

    /// Signal `guard` while serving the `nth` request (1-based).
    pub fn cancel_at(&self, nth: usize, guard: &CancelGuard) {
        *self.cancel_at.borrow_mut() = Some((nth, guard.clone()));
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.borrow().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn clear_requests(&self) {
        self.requests.borrow_mut().clear();
    }

    pub fn submission_requests(&self) -> Vec<u64> {
        self.requests
            .borrow()
            .iter()
            .filter_map(|r| match r {
                Request::Submission(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn listing_requests(&self, section: Section) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|r| matches!(r, Request::Listing(_, s, _) if *s == section))
            .count()
    }

    fn record(&self, request: Request) {
        self.requests.borrow_mut().push(request);
        let served = self.served.get() + 1;
        self.served.set(served);
        if let Some((nth, guard)) = self.cancel_at.borrow().as_ref() {
            if *nth == served {
                guard.signal();
            }
        }
    }
}

impl RemoteSite for FakeSite {
    fn check_session(&self) -> gallery_sync_core::Result<()> {
        self.record(Request::Session);
        if self.session_down {
            return Err(Error::Session("connection refused".to_string()));
        }
        Ok(())
    }

    fn listing(&self, user: &str, section: Section, page: u32) -> gallery_sync_core::Result<Vec<u64>> {
        self.record(Request::Listing(user.to_string(), section, page));
        if self.lost_listings.contains(&(user.to_string(), section)) {
            return Err(Error::Session("logged out".to_string()));
        }
        Ok(self
            .listings
            .get(&(user.to_string(), section))
            .and_then(|pages| pages.get(page as usize - 1))
            .cloned()
            .unwrap_or_default())
    }

    fn submission(&self, id: u64) -> gallery_sync_core::Result<Option<SubmissionPage>> {
        self.record(Request::Submission(id));
        if self.failing_items.contains(&id) {
            return Err(Error::Remote(format!("/view/{}/ returned 503", id)));
        }
        Ok(self.pages.get(&id).cloned())
    }

    fn open_payload(&self, url: &str) -> gallery_sync_core::Result<Payload> {
        self.record(Request::Payload(url.to_string()));
        if self.failing_payloads.contains(url) {
            return Err(Error::Remote(format!("{} returned 404", url)));
        }
        let bytes = self.payloads.get(url).cloned().unwrap_or_default();
        let len = Some(bytes.len() as u64);
        Ok(Payload {
            reader: Box::new(Cursor::new(bytes)),
            len,
        })
    }

    fn probe_user(&self, handle: &str) -> gallery_sync_core::Result<UserProbe> {
        self.record(Request::Probe(handle.to_string()));
        Ok(self.probes.get(handle).cloned().unwrap_or(UserProbe {
            status: ProbeStatus::NotFound,
            display_name: None,
        }))
    }
}

/// Every row's payload exists on disk and every item directory has a row.
pub fn assert_store_matches_disk(store: &Store, files_root: &Path) {
    let report = gallery_sync_core::repair::check(store, files_root).unwrap();
    assert!(report.missing_files.is_empty(), "missing files: {:?}", report.missing_files);
    assert!(report.orphan_dirs.is_empty(), "orphan dirs: {:?}", report.orphan_dirs);
}
