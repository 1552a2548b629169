//! Small DOM helpers over `scraper`.

use scraper::{ElementRef, Html, Selector};

use super::normalize::clean_text;

/// Compiles a built-in selector, logging (not panicking) if it is invalid.
pub fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css)
        .map_err(|e| tracing::error!(selector = css, error = ?e, "Invalid built-in selector"))
        .ok()
}

/// Whitespace-normalized text content of an element.
pub fn element_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

/// Text of the first non-empty match, trying selectors in order.
pub fn first_text(document: &Html, selectors: &[&str]) -> Option<String> {
    selectors.iter().filter_map(|css| selector(css)).find_map(|sel| {
        document
            .select(&sel)
            .map(element_text)
            .find(|text| !text.is_empty())
    })
}

/// Texts of every match of the first selector that matches anything.
pub fn all_texts(document: &Html, selectors: &[&str]) -> Vec<String> {
    selectors
        .iter()
        .filter_map(|css| selector(css))
        .map(|sel| {
            document
                .select(&sel)
                .map(element_text)
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
        })
        .find(|texts| !texts.is_empty())
        .unwrap_or_default()
}

/// Attribute of the first match carrying a non-empty value.
pub fn first_attr(document: &Html, selectors: &[&str], attr: &str) -> Option<String> {
    selectors.iter().filter_map(|css| selector(css)).find_map(|sel| {
        document
            .select(&sel)
            .filter_map(|el| el.value().attr(attr))
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_string)
    })
}

/// `content` of `<meta property=key>` or `<meta name=key>`.
pub fn meta_content(document: &Html, key: &str) -> Option<String> {
    let by_property = format!(r#"meta[property="{key}"]"#);
    let by_name = format!(r#"meta[name="{key}"]"#);
    first_attr(document, &[by_property.as_str(), by_name.as_str()], "content")
}

/// Text a reader would see: every text node outside scripts, styles and the
/// document title.
pub fn visible_text(document: &Html) -> String {
    let parts: Vec<&str> = document
        .root_element()
        .descendants()
        .filter_map(|node| node.value().as_text().map(|text| (node, text)))
        .filter(|(node, _)| {
            node.parent().and_then(ElementRef::wrap).is_none_or(|parent| {
                !matches!(
                    parent.value().name(),
                    "script" | "style" | "noscript" | "template" | "title"
                )
            })
        })
        .map(|(_, text)| &**text)
        .collect();
    clean_text(&parts.join(" "))
}
