use scraper::{ElementRef, Html, Selector};

use super::{ProbeStatus, SubmissionPage, UserProbe};
use crate::storage::models::canonical_handle;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("Invalid CSS selector")
}

fn element_text(element: ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(document: &Html, css: &str) -> Option<String> {
    document
        .select(&selector(css))
        .next()
        .map(element_text)
        .filter(|text| !text.is_empty())
}

/// Item ids from the `figure#sid-N` tiles of a listing page, in page order.
pub fn parse_listing(html: &str) -> Vec<u64> {
    let document = Html::parse_document(html);
    document
        .select(&selector("figure[id^=\"sid-\"]"))
        .filter_map(|figure| figure.value().id())
        .filter_map(|id| id.strip_prefix("sid-"))
        .filter_map(|id| id.parse::<u64>().ok())
        .collect()
}

/// `true` when the page was rendered for a logged-in session.
pub fn is_logged_in(html: &str) -> bool {
    let document = Html::parse_document(html);
    document.select(&selector("#my-username")).next().is_some()
        || document
            .select(&selector("img.loggedin_user_avatar"))
            .next()
            .is_some()
}

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// `"Jan 5, 2020 03:14 PM"` or `"January 5th, 2020"` -> `"2020-01-05"`.
pub fn parse_upload_date(raw: &str) -> Option<String> {
    let mut parts = raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|part| !part.is_empty());
    let month_name = parts.next()?.to_ascii_lowercase();
    let month = MONTHS
        .iter()
        .position(|m| month_name.starts_with(m))?
        + 1;
    let day: u32 = parts
        .next()?
        .trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .ok()?;
    let year: u32 = parts.next()?.parse().ok()?;
    if day == 0 || day > 31 {
        return None;
    }
    Some(format!("{:04}-{:02}-{:02}", year, month, day))
}

/// Sort case-insensitively and drop duplicates.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tags: Vec<String> = tags
        .into_iter()
        .map(|tag| tag.as_ref().trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();
    tags.sort_by_cached_key(|tag| tag.to_lowercase());
    tags.dedup_by(|a, b| a.to_lowercase() == b.to_lowercase());
    tags
}

fn absolute_link(href: &str) -> String {
    if let Some(rest) = href.strip_prefix("//") {
        format!("https://{}", rest)
    } else {
        href.to_string()
    }
}

/// Extract an item page. `None` when title, author or download link is missing.
pub fn parse_submission(id: u64, html: &str) -> Option<SubmissionPage> {
    let document = Html::parse_document(html);

    let title = first_text(&document, "div.submission-title h2 p")?;

    let author_link = document
        .select(&selector("div.submission-id-sub-container a[href^=\"/user/\"]"))
        .next()?;
    let author = element_text(author_link);
    let author_url = author_link
        .value()
        .attr("href")
        .map(|href| {
            href.trim_start_matches("/user/")
                .trim_end_matches('/')
                .to_string()
        })
        .map(|handle| canonical_handle(&handle))
        .filter(|handle| !handle.is_empty())?;

    let file_link = document
        .select(&selector("div.download a[href]"))
        .next()
        .and_then(|link| link.value().attr("href"))
        .map(absolute_link)?;

    let upload_date = document
        .select(&selector("span.popup_date"))
        .next()
        .and_then(|span| {
            span.value()
                .attr("title")
                .and_then(parse_upload_date)
                .or_else(|| parse_upload_date(&element_text(span)))
        })
        .unwrap_or_default();

    let tags = normalize_tags(
        document
            .select(&selector("section.tags-row span.tags a"))
            .map(element_text),
    );

    let mut category = String::new();
    let mut species = String::new();
    let mut gender = String::new();
    for row in document.select(&selector("section.info > div")) {
        let Some(label) = row.select(&selector("strong")).next().map(element_text) else {
            continue;
        };
        let value = row
            .select(&selector("span"))
            .map(element_text)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" / ");
        match label.to_ascii_lowercase().as_str() {
            "category" => category = value,
            "species" => species = value,
            "gender" => gender = value,
            _ => {}
        }
    }

    let rating = first_text(&document, "div.rating span.rating-box").unwrap_or_default();

    let description = document
        .select(&selector("div.submission-description"))
        .next()
        .map(|div| div.inner_html().trim().to_string())
        .unwrap_or_default();

    Some(SubmissionPage {
        id,
        author: if author.is_empty() {
            author_url.clone()
        } else {
            author
        },
        author_url,
        title,
        upload_date,
        description,
        tags,
        category,
        species,
        gender,
        rating,
        file_link,
    })
}

/// Classify a user page and pick up its display name.
pub fn parse_user_page(html: &str) -> UserProbe {
    let document = Html::parse_document(html);
    let notice = first_text(&document, "section.notice-message")
        .or_else(|| first_text(&document, "div.redirect-message"))
        .unwrap_or_default()
        .to_lowercase();

    if notice.contains("voluntarily disabled") || notice.contains("pending deletion") {
        return UserProbe {
            status: ProbeStatus::DisabledAccount,
            display_name: None,
        };
    }

    let display_name = first_text(&document, "h1 username")
        .map(|name| {
            name.trim_start_matches(|c: char| !c.is_alphanumeric())
                .to_string()
        })
        .filter(|name| !name.is_empty());

    match display_name {
        Some(name) if notice.is_empty() => UserProbe {
            status: ProbeStatus::Ok,
            display_name: Some(name),
        },
        _ => UserProbe {
            status: ProbeStatus::NotFound,
            display_name: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBMISSION_HTML: &str = r#"<html><body>
        <div class="submission-title"><h2><p>Sunset  Study</p></h2></div>
        <div class="submission-id-sub-container">
            by <a href="/user/foo_bar/"><strong>Foo_Bar</strong></a>
            <span class="popup_date" title="Mar 7, 2021 09:15 PM">2 years ago</span>
        </div>
        <div class="rating"><span class="rating-box">General</span></div>
        <section class="info text">
            <div><strong class="highlight">Category</strong> <span class="category-name">Artwork (Digital)</span> <span class="type-name">Landscape</span></div>
            <div><strong class="highlight">Species</strong> <span>Fox</span></div>
            <div><strong class="highlight">Gender</strong> <span>Any</span></div>
        </section>
        <section class="tags-row"><span class="tags"><a>sunset</a></span><span class="tags"><a>Beach</a></span><span class="tags"><a>art</a></span></section>
        <div class="submission-description"> <b>Hello</b> world </div>
        <div class="download"><a href="//d.example.net/art/foobar/1615151515/sunset.png">Download</a></div>
    </body></html>"#;

    #[test]
    fn test_parse_submission_fields() {
        let page = parse_submission(42, SUBMISSION_HTML).unwrap();
        assert_eq!(page.id, 42);
        assert_eq!(page.title, "Sunset Study");
        assert_eq!(page.author, "Foo_Bar");
        assert_eq!(page.author_url, "foobar");
        assert_eq!(page.upload_date, "2021-03-07");
        assert_eq!(page.tags, vec!["art", "Beach", "sunset"]);
        assert_eq!(page.category, "Artwork (Digital) / Landscape");
        assert_eq!(page.species, "Fox");
        assert_eq!(page.gender, "Any");
        assert_eq!(page.rating, "General");
        assert_eq!(page.description, "<b>Hello</b> world");
        assert_eq!(
            page.file_link,
            "https://d.example.net/art/foobar/1615151515/sunset.png"
        );
    }

    #[test]
    fn test_parse_submission_missing_elements_is_page_error() {
        let html = r#"<html><body><section class="notice-message">
            The submission you are trying to find is not in our database.
        </section></body></html>"#;
        assert!(parse_submission(7, html).is_none());
    }

    #[test]
    fn test_parse_listing_in_page_order() {
        let html = r#"<section class="gallery">
            <figure id="sid-30"><a href="/view/30/">x</a></figure>
            <figure id="sid-29"></figure>
            <figure id="other"></figure>
            <figure id="sid-7"></figure>
        </section>"#;
        assert_eq!(parse_listing(html), vec![30, 29, 7]);
        assert!(parse_listing("<html></html>").is_empty());
    }

    #[test]
    fn test_parse_upload_date() {
        assert_eq!(parse_upload_date("Jan 5, 2020 03:14 PM").as_deref(), Some("2020-01-05"));
        assert_eq!(parse_upload_date("December 31st, 2019").as_deref(), Some("2019-12-31"));
        assert!(parse_upload_date("yesterday").is_none());
    }

    #[test]
    fn test_parse_user_page_statuses() {
        let ok = parse_user_page(
            r#"<div class="userpage-nav-user-details"><h1><username>~FooBar</username></h1></div>"#,
        );
        assert_eq!(ok.status, ProbeStatus::Ok);
        assert_eq!(ok.display_name.as_deref(), Some("FooBar"));

        let disabled = parse_user_page(
            r#"<section class="notice-message">User "foo" has voluntarily disabled access to their account.</section>"#,
        );
        assert_eq!(disabled.status, ProbeStatus::DisabledAccount);

        let missing = parse_user_page(
            r#"<section class="notice-message">This user cannot be found.</section>"#,
        );
        assert_eq!(missing.status, ProbeStatus::NotFound);
    }

    #[test]
    fn test_logged_in_marker() {
        assert!(is_logged_in(r#"<a id="my-username" href="/user/me/">me</a>"#));
        assert!(!is_logged_in("<html><body>Log In</body></html>"));
    }

    #[test]
    fn test_normalize_tags_folds_non_ascii_case() {
        let tags = normalize_tags(["Äpfel", "zebra", "äpfel", "Apple"]);
        assert_eq!(tags, vec!["Apple", "zebra", "Äpfel"]);
    }
}
