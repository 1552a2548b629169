//! Hand-maintained CSS selectors for the supported sites, backed by a
//! generic set for anything the site-specific one misses.

use folio_core::{DeclineReason, Source};
use scraper::Html;

use super::dom::{all_texts, first_attr, first_text};
use super::draft::BookDraft;

/// Selectors per field, tried in order.
#[derive(Debug)]
struct SelectorSet {
    title: &'static [&'static str],
    authors: &'static [&'static str],
    isbn: &'static [&'static str],
    rating: &'static [&'static str],
    pages: &'static [&'static str],
    published: &'static [&'static str],
    publisher: &'static [&'static str],
    description: &'static [&'static str],
    cover: &'static [&'static str],
}

const GOODREADS: SelectorSet = SelectorSet {
    title: &[r#"h1[data-testid="bookTitle"]"#, "h1#bookTitle"],
    authors: &[
        ".ContributorLinksList span.ContributorLink__name",
        r#"a.authorName span[itemprop="name"]"#,
        "a.authorName",
    ],
    isbn: &[r#"div[itemprop="isbn"]"#, r#"span[itemprop="isbn"]"#],
    rating: &["div.RatingStatistics__rating", r#"span[itemprop="ratingValue"]"#],
    pages: &[r#"p[data-testid="pagesFormat"]"#, r#"span[itemprop="numberOfPages"]"#],
    published: &[r#"p[data-testid="publicationInfo"]"#, "#details .row"],
    publisher: &[],
    description: &[
        r#"div[data-testid="description"] span.Formatted"#,
        "#description span",
    ],
    cover: &["div.BookCover img.ResponsiveImage", "img#coverImage"],
};

const AMAZON: SelectorSet = SelectorSet {
    title: &["#productTitle", "#ebooksProductTitle"],
    authors: &[
        "#bylineInfo .author a",
        "#bylineInfo .author .contributorNameID",
    ],
    isbn: &[
        "#rpi-attribute-book_details-isbn13 .rpi-attribute-value span",
        "#rpi-attribute-book_details-isbn10 .rpi-attribute-value span",
    ],
    rating: &["#acrPopover .a-icon-alt", r#"span[data-hook="rating-out-of-text"]"#],
    pages: &[
        "#rpi-attribute-book_details-fiction_writing_length .rpi-attribute-value span",
        "#rpi-attribute-book_details-ebook_pages .rpi-attribute-value span",
    ],
    published: &["#rpi-attribute-book_details-publication_date .rpi-attribute-value span"],
    publisher: &["#rpi-attribute-book_details-publisher .rpi-attribute-value span"],
    description: &["#bookDescription_feature_div .a-expander-content"],
    cover: &["#landingImage", "#imgBlkFront", "#ebooksImgBlkFront"],
};

const GOOGLE_BOOKS: SelectorSet = SelectorSet {
    title: &["#bookinfo .booktitle", "h1.booktitle"],
    authors: &[r#"#bookinfo a[href*="inauthor"]"#, r#"a[href*="q=inauthor"]"#],
    isbn: &[],
    rating: &[".gb-star-rating-value"],
    pages: &[],
    published: &[],
    publisher: &[r#"a[href*="inpublisher"]"#],
    description: &["#synopsistext", "#synopsis"],
    cover: &["#summary-frontcover"],
};

const OPEN_LIBRARY: SelectorSet = SelectorSet {
    title: &["h1.work-title", "h1.edition-title"],
    authors: &[
        r#".edition-byline a[itemprop="author"]"#,
        ".edition-byline a",
    ],
    isbn: &[r#"dd[itemprop="isbn"]"#, ".edition-isbn"],
    rating: &[r#"span[itemprop="ratingValue"]"#],
    pages: &[r#"span[itemprop="numberOfPages"]"#, ".edition-pages"],
    published: &[r#"span[itemprop="datePublished"]"#],
    publisher: &[r#"a[itemprop="publisher"]"#],
    description: &[".book-description-content"],
    cover: &["img.cover", ".bookCover img"],
};

const GENERIC: SelectorSet = SelectorSet {
    title: &["h1.book-title", ".book-title", "#book-title", r#"h1[class*="title"]"#],
    authors: &[".book-author", ".author-name", ".author a", r#"a[rel="author"]"#],
    isbn: &[".isbn", r#"[class*="isbn"]"#],
    rating: &[".average-rating", ".rating-value", r#"[class*="rating-value"]"#],
    pages: &[".page-count", ".pages", r#"[class*="page-count"]"#],
    published: &[".publication-date", ".published", r#"[class*="pub-date"]"#],
    publisher: &[".publisher"],
    description: &[".book-description", ".description"],
    cover: &["img.book-cover", ".cover img", r#"img[class*="cover"]"#],
};

fn site_set(source: Source) -> Option<&'static SelectorSet> {
    match source {
        Source::Goodreads => Some(&GOODREADS),
        Source::Amazon => Some(&AMAZON),
        Source::GoogleBooks => Some(&GOOGLE_BOOKS),
        Source::OpenLibrary => Some(&OPEN_LIBRARY),
        Source::Unknown => None,
    }
}

pub fn extract(document: &Html, source: Source) -> Result<BookDraft, DeclineReason> {
    let sets: Vec<&SelectorSet> = site_set(source).into_iter().chain([&GENERIC]).collect();
    let text = |field: fn(&SelectorSet) -> &'static [&'static str]| {
        sets.iter().find_map(|set| first_text(document, field(set)))
    };

    let mut draft = BookDraft::default();
    if let Some(title) = text(|s| s.title) {
        draft.set_title(&title);
    }
    if draft.title.is_none() {
        return Err(DeclineReason::no_match(format!(
            "no title selector matched for {source}"
        )));
    }

    if let Some(authors) = sets
        .iter()
        .map(|set| all_texts(document, set.authors))
        .find(|found| !found.is_empty())
    {
        for author in authors {
            draft.add_author(&author);
        }
    }
    if let Some(isbn) = text(|s| s.isbn) {
        draft.set_isbn(&isbn);
    }
    if let Some(rating) = text(|s| s.rating) {
        draft.set_rating(&rating);
    }
    if let Some(pages) = text(|s| s.pages) {
        draft.set_page_count(&pages);
    }
    if let Some(published) = text(|s| s.published) {
        draft.set_publication_date(&published);
    }
    if let Some(publisher) = text(|s| s.publisher) {
        draft.set_raw("publisher", &publisher);
    }
    if let Some(description) = text(|s| s.description) {
        draft.set_raw("description", &description);
    }
    if let Some(cover) = sets.iter().find_map(|set| first_attr(document, set.cover, "src")) {
        draft.set_raw("cover_image", &cover);
    }

    Ok(draft)
}
