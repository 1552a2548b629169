//! schema.org microdata: an `itemscope` typed `…/Book` and its `itemprop`s.

use folio_core::DeclineReason;
use scraper::{ElementRef, Html};

use super::dom::{element_text, selector};
use super::draft::BookDraft;

pub fn extract(document: &Html) -> Result<BookDraft, DeclineReason> {
    let (Some(scopes), Some(props)) = (selector("[itemscope][itemtype]"), selector("[itemprop]"))
    else {
        return Err(DeclineReason::no_match("microdata selectors unavailable"));
    };

    let Some(book) = document
        .select(&scopes)
        .find(|scope| scope.value().attr("itemtype").is_some_and(is_book_type))
    else {
        return Err(DeclineReason::no_match("no schema.org/Book itemscope"));
    };

    let mut draft = BookDraft::default();
    for prop in book.select(&props) {
        if owning_scope(prop).map(|scope| scope.id()) != Some(book.id()) {
            continue;
        }
        let Some(names) = prop.value().attr("itemprop") else {
            continue;
        };
        for name in names.split_whitespace() {
            apply(&mut draft, name, prop, &props);
        }
    }
    Ok(draft)
}

fn is_book_type(itemtype: &str) -> bool {
    itemtype
        .split_whitespace()
        .any(|ty| ty == "Book" || ty.ends_with("schema.org/Book"))
}

/// Nearest ancestor that opens an item scope.
fn owning_scope(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|ancestor| ancestor.value().attr("itemscope").is_some())
}

/// Properties whose value is a URL rather than text.
const URL_PROPS: &[&str] = &["image", "url", "sameAs", "thumbnailUrl"];

/// Value of a property element: `content` wins, then the tag's value
/// attribute for URL and date properties, then the element text.
fn item_value(element: ElementRef<'_>, prop: &str) -> String {
    let el = element.value();
    if let Some(content) = el.attr("content") {
        return content.trim().to_string();
    }
    let url_attr = match el.name() {
        "a" | "link" | "area" => el.attr("href"),
        "img" | "audio" | "video" | "source" | "embed" | "iframe" => el.attr("src"),
        _ => None,
    };
    let value_attr = match el.name() {
        "time" => el.attr("datetime"),
        "data" | "meter" => el.attr("value"),
        _ => None,
    };
    if let Some(value) = value_attr {
        return value.trim().to_string();
    }
    if URL_PROPS.contains(&prop)
        && let Some(url) = url_attr
    {
        return url.trim().to_string();
    }
    let text = element_text(element);
    match url_attr {
        Some(url) if text.is_empty() => url.trim().to_string(),
        _ => text,
    }
}

/// Value of a nested item's own property, e.g. an author's `name`.
fn nested_value(item: ElementRef<'_>, prop: &str, props: &scraper::Selector) -> Option<String> {
    item.select(props)
        .filter(|el| owning_scope(*el).map(|scope| scope.id()) == Some(item.id()))
        .find(|el| {
            el.value()
                .attr("itemprop")
                .is_some_and(|names| names.split_whitespace().any(|n| n == prop))
        })
        .map(|el| item_value(el, prop))
}

/// Value of a property that may itself be an item with a `name`.
fn named_value(prop: ElementRef<'_>, props: &scraper::Selector) -> Option<String> {
    if prop.value().attr("itemscope").is_some() {
        nested_value(prop, "name", props)
    } else {
        Some(element_text(prop))
    }
}

fn apply(draft: &mut BookDraft, name: &str, prop: ElementRef<'_>, props: &scraper::Selector) {
    match name {
        "name" => draft.set_title(&item_value(prop, name)),
        "author" | "creator" => {
            if let Some(author) = named_value(prop, props) {
                draft.add_author(&author);
            }
        }
        "isbn" => draft.set_isbn(&item_value(prop, name)),
        "numberOfPages" => draft.set_page_count(&item_value(prop, name)),
        "datePublished" => draft.set_publication_date(&item_value(prop, name)),
        "ratingValue" => draft.set_rating(&item_value(prop, name)),
        "aggregateRating" => {
            if let Some(value) = nested_value(prop, "ratingValue", props) {
                draft.set_rating(&value);
            }
            if let Some(count) = nested_value(prop, "ratingCount", props)
                .or_else(|| nested_value(prop, "reviewCount", props))
            {
                draft.set_raw("rating_count", &count);
            }
        }
        "publisher" => {
            if let Some(publisher) = named_value(prop, props) {
                draft.set_raw("publisher", &publisher);
            }
        }
        "description" => draft.set_raw("description", &item_value(prop, name)),
        "inLanguage" => draft.set_raw("language", &item_value(prop, name)),
        "bookFormat" => draft.set_raw("format", &item_value(prop, name)),
        "bookEdition" => draft.set_raw("edition", &item_value(prop, name)),
        "image" => draft.set_raw("cover_image", &item_value(prop, name)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    const OPEN_LIBRARY: &str = r#"<html><body>
        <div itemscope itemtype="https://schema.org/Book">
          <h1 itemprop="name">The Left Hand of Darkness</h1>
          <div itemprop="author" itemscope itemtype="https://schema.org/Person">
            by <a href="/authors/OL1A" itemprop="name">Ursula K. Le Guin</a>
          </div>
          <span itemprop="author">Harold Bloom</span>
          <meta itemprop="isbn" content="0441478123">
          <span itemprop="numberOfPages">304</span>
          <time itemprop="datePublished" datetime="1969-03-01">March 1969</time>
          <div itemprop="publisher" itemscope itemtype="https://schema.org/Organization">
            <span itemprop="name">Ace Books</span>
          </div>
          <div itemprop="aggregateRating" itemscope itemtype="https://schema.org/AggregateRating">
            <span itemprop="ratingValue">4.08</span> from <span itemprop="ratingCount">1210</span> ratings
          </div>
          <img itemprop="image" src="https://covers.example.org/b/id/1.jpg">
        </div>
        </body></html>"#;

    #[test]
    fn test_scoped_properties() {
        let doc = Html::parse_document(OPEN_LIBRARY);
        let draft = extract(&doc).unwrap();

        // The author's own `name` must not become the title.
        assert_eq!(draft.title.as_deref(), Some("The Left Hand of Darkness"));
        assert_eq!(draft.authors, vec!["Ursula K. Le Guin", "Harold Bloom"]);
        assert_eq!(draft.isbn.as_deref(), Some("0441478123"));
        assert_eq!(draft.page_count, Some(304));
        assert_eq!(draft.publication_date, NaiveDate::from_ymd_opt(1969, 3, 1));
        assert_eq!(draft.rating, Some(4.08));
        assert_eq!(draft.raw_fields["rating_count"], "1210");
        assert_eq!(draft.raw_fields["publisher"], "Ace Books");
        assert_eq!(draft.raw_fields["cover_image"], "https://covers.example.org/b/id/1.jpg");
    }

    #[test]
    fn test_ignores_other_item_types() {
        let doc = Html::parse_document(
            r#"<div itemscope itemtype="https://schema.org/Product"><span itemprop="name">Kindle</span></div>"#,
        );
        assert_eq!(
            extract(&doc).unwrap_err(),
            DeclineReason::no_match("no schema.org/Book itemscope")
        );
    }

    #[test]
    fn test_book_type_matching() {
        assert!(is_book_type("http://schema.org/Book"));
        assert!(is_book_type("https://schema.org/CreativeWork https://schema.org/Book"));
        assert!(!is_book_type("https://schema.org/BookSeries"));
    }
}
