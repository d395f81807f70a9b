//! Boundary to the remote gallery site.
//!
//! The engine only talks to [`RemoteSite`]; [`HttpSite`] is the production
//! implementation and tests supply scripted fakes.

mod http;
pub mod parse;

pub use http::HttpSite;

use crate::storage::models::Section;
use serde::Serialize;
use std::io::Read;

/// Structured fields extracted from an item page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionPage {
    pub id: u64,
    pub author: String,
    pub author_url: String,
    pub title: String,
    pub upload_date: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category: String,
    pub species: String,
    pub gender: String,
    pub rating: String,
    pub file_link: String,
}

/// Byte stream of an item's payload.
pub struct Payload {
    pub reader: Box<dyn Read + Send>,
    pub len: Option<u64>,
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload").field("len", &self.len).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Ok,
    NotFound,
    DisabledAccount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProbe {
    pub status: ProbeStatus,
    pub display_name: Option<String>,
}

pub trait RemoteSite {
    /// Verify that requests can be made at all. Failure aborts a run.
    fn check_session(&self) -> crate::Result<()>;

    /// Item ids listed on one page of a section, newest first.
    fn listing(&self, user: &str, section: Section, page: u32) -> crate::Result<Vec<u64>>;

    /// `None` when the page lacks the elements of a rendered item.
    fn submission(&self, id: u64) -> crate::Result<Option<SubmissionPage>>;

    fn open_payload(&self, url: &str) -> crate::Result<Payload>;

    fn probe_user(&self, handle: &str) -> crate::Result<UserProbe>;
}
