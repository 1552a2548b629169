//! schema.org `Book` objects embedded as `application/ld+json`.

use folio_core::DeclineReason;
use scraper::Html;
use serde_json::Value;

use super::dom::selector;
use super::draft::BookDraft;

const SCRIPT: &str = r#"script[type="application/ld+json"]"#;

pub fn extract(document: &Html) -> Result<BookDraft, DeclineReason> {
    let Some(sel) = selector(SCRIPT) else {
        return Err(DeclineReason::no_match("ld+json selector unavailable"));
    };

    let mut blocks = 0;
    for script in document.select(&sel) {
        let text: String = script.text().collect();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(text) {
            Ok(value) => {
                blocks += 1;
                if let Some(book) = find_book(&value) {
                    return Ok(draft_from(book));
                }
            }
            Err(e) => tracing::debug!(error = %e, "Skipping malformed ld+json block"),
        }
    }

    Err(DeclineReason::no_match(format!(
        "no Book object in {blocks} ld+json block(s)"
    )))
}

/// Depth-first search through arrays, `@graph` and `mainEntity`.
fn find_book(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_book),
        Value::Object(map) => {
            if map.get("@type").is_some_and(is_book_type) {
                return Some(value);
            }
            ["@graph", "mainEntity"]
                .iter()
                .filter_map(|key| map.get(*key))
                .find_map(find_book)
        }
        _ => None,
    }
}

fn is_book_type(ty: &Value) -> bool {
    match ty {
        Value::String(name) => {
            let name = name
                .trim_start_matches("http://schema.org/")
                .trim_start_matches("https://schema.org/")
                .trim_start_matches("schema:");
            name == "Book"
        }
        Value::Array(names) => names.iter().any(is_book_type),
        _ => false,
    }
}

/// Text of a scalar, of an object's `name`, or of an array's first usable entry.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("name").and_then(text_of),
        Value::Array(items) => items.iter().find_map(text_of),
        _ => None,
    }
}

fn image_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("url").and_then(image_of),
        Value::Array(items) => items.iter().find_map(image_of),
        _ => None,
    }
}

fn draft_from(book: &Value) -> BookDraft {
    let mut draft = BookDraft::default();
    let field = |key: &str| book.get(key).and_then(text_of);

    if let Some(title) = field("name").or_else(|| field("headline")) {
        draft.set_title(&title);
    }

    match book.get("author") {
        Some(Value::Array(authors)) => {
            for author in authors.iter().filter_map(text_of) {
                draft.add_author(&author);
            }
        }
        Some(author) => {
            if let Some(name) = text_of(author) {
                draft.add_author(&name);
            }
        }
        None => {}
    }

    for key in ["isbn", "isbn13", "isbn10"] {
        if let Some(isbn) = field(key) {
            draft.set_isbn(&isbn);
        }
    }

    if let Some(rating) = book.get("aggregateRating") {
        match rating.get("ratingValue") {
            Some(Value::Number(n)) => {
                if let Some(v) = n.as_f64() {
                    draft.set_rating_value(v);
                }
            }
            Some(other) => {
                if let Some(text) = text_of(other) {
                    draft.set_rating(&text);
                }
            }
            None => {}
        }
        if let Some(count) = rating
            .get("ratingCount")
            .or_else(|| rating.get("reviewCount"))
            .and_then(text_of)
        {
            draft.set_raw("rating_count", &count);
        }
    }

    if let Some(pages) = field("numberOfPages") {
        draft.set_page_count(&pages);
    }
    if let Some(date) = field("datePublished") {
        draft.set_publication_date(&date);
    }

    for (key, raw_key) in [
        ("publisher", "publisher"),
        ("description", "description"),
        ("inLanguage", "language"),
        ("bookFormat", "format"),
        ("bookEdition", "edition"),
        ("identifier", "source_id"),
    ] {
        if let Some(value) = field(key) {
            draft.set_raw(raw_key, &value);
        }
    }
    if let Some(image) = book.get("image").and_then(image_of) {
        draft.set_raw("cover_image", &image);
    }

    draft
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn page(json: &str) -> Html {
        Html::parse_document(&format!(
            r#"<html><head><script type="application/ld+json">{json}</script></head><body></body></html>"#
        ))
    }

    #[test]
    fn test_goodreads_style_book() {
        let doc = page(
            r#"{
                "@context": "https://schema.org",
                "@type": "Book",
                "name": "Harry Potter and the Sorcerer's Stone",
                "image": "https://images.example.com/hp1.jpg",
                "bookFormat": "Hardcover",
                "numberOfPages": 309,
                "inLanguage": "English",
                "isbn": "9780439554930",
                "author": [{"@type": "Person", "name": "J.K. Rowling", "url": "https://www.goodreads.com/author/show/1077326"}],
                "aggregateRating": {"@type": "AggregateRating", "ratingValue": 4.47, "ratingCount": 10123456, "reviewCount": 170000}
            }"#,
        );

        let draft = extract(&doc).unwrap();
        assert_eq!(draft.title.as_deref(), Some("Harry Potter and the Sorcerer's Stone"));
        assert_eq!(draft.authors, vec!["J.K. Rowling"]);
        assert_eq!(draft.isbn.as_deref(), Some("9780439554930"));
        assert_eq!(draft.rating, Some(4.47));
        assert_eq!(draft.page_count, Some(309));
        assert_eq!(draft.raw_fields["rating_count"], "10123456");
        assert_eq!(draft.raw_fields["format"], "Hardcover");
        assert_eq!(draft.raw_fields["language"], "English");
        assert_eq!(draft.raw_fields["cover_image"], "https://images.example.com/hp1.jpg");
    }

    #[test]
    fn test_book_inside_graph() {
        let doc = page(
            r#"{"@context": "https://schema.org", "@graph": [
                {"@type": "WebPage", "name": "Dune page"},
                {"@type": ["CreativeWork", "http://schema.org/Book"],
                 "name": "Dune",
                 "author": "Frank Herbert",
                 "datePublished": "1965-08-01",
                 "publisher": {"@type": "Organization", "name": "Chilton Books"},
                 "aggregateRating": {"ratingValue": "4.27"}}
            ]}"#,
        );

        let draft = extract(&doc).unwrap();
        assert_eq!(draft.title.as_deref(), Some("Dune"));
        assert_eq!(draft.authors, vec!["Frank Herbert"]);
        assert_eq!(draft.publication_date, NaiveDate::from_ymd_opt(1965, 8, 1));
        assert_eq!(draft.raw_fields["publisher"], "Chilton Books");
        assert_eq!(draft.rating, Some(4.27));
    }

    #[test]
    fn test_top_level_array_and_isbn_fallback() {
        let doc = page(
            r#"[{"@type": "Organization", "name": "Shop"},
                {"@type": "Book", "name": "Dune", "isbn13": "978-0-441-17271-9"}]"#,
        );
        let draft = extract(&doc).unwrap();
        assert_eq!(draft.isbn.as_deref(), Some("9780441172719"));
    }

    #[test]
    fn test_non_book_and_malformed_blocks_decline() {
        let doc = Html::parse_document(
            r#"<html><head>
            <script type="application/ld+json">{not json</script>
            <script type="application/ld+json">{"@type": "Product", "name": "Kindle"}</script>
            </head></html>"#,
        );
        let reason = extract(&doc).unwrap_err();
        assert_eq!(
            reason,
            DeclineReason::no_match("no Book object in 1 ld+json block(s)")
        );
    }

    #[test]
    fn test_no_scripts() {
        let doc = Html::parse_document("<html><body><h1>Dune</h1></body></html>");
        assert!(matches!(
            extract(&doc).unwrap_err(),
            DeclineReason::NoMatch { .. }
        ));
    }
}
