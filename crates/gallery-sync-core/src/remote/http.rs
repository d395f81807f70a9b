use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE};
use std::time::Duration;
use tracing::{debug, warn};

use super::parse;
use super::{Payload, RemoteSite, SubmissionPage, UserProbe};
use crate::config::AppConfig;
use crate::storage::models::Section;
use crate::Error;

/// Blocking HTTP client for the gallery site.
///
/// Requests are strictly sequential; the engine never shares a client
/// across threads.
#[derive(Debug)]
pub struct HttpSite {
    client: Client,
    base_url: String,
    has_cookies: bool,
}

impl HttpSite {
    pub fn new(config: &AppConfig) -> crate::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,*/*;q=0.8"),
        );
        if !config.cookies.is_empty() {
            let cookie = config.cookies.join("; ");
            let value = HeaderValue::from_str(&cookie)
                .map_err(|e| Error::Other(format!("Invalid cookie value: {}", e)))?;
            headers.insert(COOKIE, value);
        }

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            has_cookies: !config.cookies.is_empty(),
        })
    }

    fn listing_url(&self, user: &str, section: Section, page: u32) -> String {
        match section {
            Section::Gallery => format!("{}/gallery/{}/{}/", self.base_url, user, page),
            Section::Scraps => format!("{}/scraps/{}/{}/", self.base_url, user, page),
            Section::Favorites => format!("{}/favorites/{}/{}/", self.base_url, user, page),
            Section::Extras => format!(
                "{}/search/?q=%40keywords+{}&page={}",
                self.base_url, user, page
            ),
        }
    }

    fn get_text(&self, url: &str) -> crate::Result<String> {
        debug!("GET {}", url);
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Remote(format!("{} returned {}", url, status)));
        }
        Ok(response.text()?)
    }
}

impl RemoteSite for HttpSite {
    fn check_session(&self) -> crate::Result<()> {
        let html = self
            .get_text(&format!("{}/", self.base_url))
            .map_err(|e| Error::Session(e.to_string()))?;
        if self.has_cookies && !parse::is_logged_in(&html) {
            return Err(Error::Session(
                "configured cookies were not accepted".to_string(),
            ));
        }
        Ok(())
    }

    fn listing(&self, user: &str, section: Section, page: u32) -> crate::Result<Vec<u64>> {
        let html = self.get_text(&self.listing_url(user, section, page))?;
        Ok(parse::parse_listing(&html))
    }

    fn submission(&self, id: u64) -> crate::Result<Option<SubmissionPage>> {
        let html = self.get_text(&format!("{}/view/{}/", self.base_url, id))?;
        let page = parse::parse_submission(id, &html);
        if page.is_none() {
            warn!("Submission {} did not render (deleted, private or renamed)", id);
        }
        Ok(page)
    }

    fn open_payload(&self, url: &str) -> crate::Result<Payload> {
        debug!("GET {}", url);
        let response = self.client.get(url).send()?.error_for_status()?;
        let len = response.content_length();
        Ok(Payload {
            reader: Box::new(response),
            len,
        })
    }

    fn probe_user(&self, handle: &str) -> crate::Result<UserProbe> {
        let html = self.get_text(&format!("{}/user/{}/", self.base_url, handle))?;
        Ok(parse::parse_user_page(&html))
    }
}
