//! Last-resort extraction from meta tags and free text.

use std::sync::LazyLock;

use folio_core::DeclineReason;
use regex::Regex;
use scraper::Html;

use super::dom::{all_texts, first_attr, first_text, meta_content, visible_text};
use super::draft::BookDraft;
use super::normalize::pattern;

static ISBN_IN_TEXT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    pattern(r"(?i)\bISBN(?:-1[03])?\s*:?\s*((?:97[89][\s-]?)?(?:\d[\s-]?){9}[\dX])\b")
});
static PAGES_IN_TEXT: LazyLock<Option<Regex>> =
    LazyLock::new(|| pattern(r"(?i)\b(\d[\d,]*)\s+pages\b"));
static PUBLISHED_IN_TEXT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    pattern(r"(?i)\b(?:first\s+)?published\s*(?:on|in)?\s*:?\s*([A-Za-z0-9 ,.]{4,30})")
});
static RATING_IN_TEXT: LazyLock<Option<Regex>> =
    LazyLock::new(|| pattern(r"(?i)\b([0-5](?:[.,]\d{1,2})?)\s*(?:out of 5|/\s*5\b)"));

/// Site suffixes such as "Dune | Goodreads" or "Dune - Amazon.com".
const TITLE_SEPARATORS: &[&str] = &[" | ", " - ", " – ", " — ", " :: "];

fn capture(re: &LazyLock<Option<Regex>>, text: &str) -> Option<String> {
    re.as_ref()?
        .captures(text)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

fn strip_site_suffix(title: &str) -> &str {
    TITLE_SEPARATORS
        .iter()
        .filter_map(|sep| title.find(sep).map(|i| &title[..i]))
        .filter(|head| !head.trim().is_empty())
        .min_by_key(|head| head.len())
        .unwrap_or(title)
}

pub fn extract(document: &Html) -> Result<BookDraft, DeclineReason> {
    let mut draft = BookDraft::default();

    let title = meta_content(document, "og:title")
        .or_else(|| meta_content(document, "title"))
        .or_else(|| first_text(document, &["h1"]))
        .or_else(|| first_text(document, &["title"]).map(|t| strip_site_suffix(&t).to_string()));
    if let Some(title) = title {
        draft.set_title(&title);
    }
    if draft.title.is_none() {
        return Err(DeclineReason::no_match("no title in meta tags or headings"));
    }

    for key in ["book:author", "author"] {
        if let Some(author) = meta_content(document, key)
            && !author.starts_with("http")
        {
            draft.add_author(&author);
        }
    }
    if draft.authors.is_empty() {
        for author in all_texts(document, &[r#"[class*="author"]"#, r#"[class*="Author"]"#]) {
            draft.add_author(&author);
        }
    }

    let text = visible_text(document);

    if let Some(isbn) = meta_content(document, "books:isbn")
        .or_else(|| meta_content(document, "book:isbn"))
        .or_else(|| capture(&ISBN_IN_TEXT, &text))
    {
        draft.set_isbn(&isbn);
    }
    if let Some(pages) = capture(&PAGES_IN_TEXT, &text) {
        draft.set_page_count(&pages);
    }
    if let Some(date) = meta_content(document, "book:release_date")
        .or_else(|| capture(&PUBLISHED_IN_TEXT, &text))
    {
        draft.set_publication_date(&date);
    }
    if let Some(rating) = capture(&RATING_IN_TEXT, &text) {
        draft.set_rating(&rating);
    }

    if let Some(description) =
        meta_content(document, "og:description").or_else(|| meta_content(document, "description"))
    {
        draft.set_raw("description", &description);
    }
    if let Some(cover) = meta_content(document, "og:image") {
        draft.set_raw("cover_image", &cover);
    }
    if let Some(site) = meta_content(document, "og:site_name") {
        draft.set_raw("site_name", &site);
    }
    if let Some(canonical) = first_attr(document, &[r#"link[rel="canonical"]"#], "href") {
        draft.set_raw("canonical_url", &canonical);
    }

    Ok(draft)
}
