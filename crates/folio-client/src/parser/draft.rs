use std::collections::BTreeMap;

use chrono::NaiveDate;
use folio_core::{BookRecord, ParseContext, StrategyKind};

use super::normalize::{
    clean_author, clean_text, normalize_isbn, parse_date, parse_page_count, parse_rating,
};

// Weights in thousandths. A title with authors clears the default
// threshold for every strategy; the remaining fields only refine the score.
const TITLE_WEIGHT: u32 = 600;
const AUTHORS_WEIGHT: u32 = 300;
const FIELD_WEIGHT: u32 = 25;

/// Fields gathered by one strategy before they are scored.
///
/// Setters normalize their input and keep the first usable value, so a
/// strategy can feed candidates in preference order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookDraft {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub isbn: Option<String>,
    pub rating: Option<f64>,
    pub page_count: Option<u32>,
    pub publication_date: Option<NaiveDate>,
    pub raw_fields: BTreeMap<String, String>,
}

impl BookDraft {
    pub fn set_title(&mut self, raw: &str) {
        if self.title.is_none() {
            let title = clean_text(raw);
            if !title.is_empty() {
                self.title = Some(title);
            }
        }
    }

    pub fn add_author(&mut self, raw: &str) {
        if let Some(author) = clean_author(raw)
            && !self.authors.contains(&author)
        {
            self.authors.push(author);
        }
    }

    pub fn set_isbn(&mut self, raw: &str) {
        if self.isbn.is_none() {
            self.isbn = normalize_isbn(raw);
        }
    }

    pub fn set_rating(&mut self, raw: &str) {
        if self.rating.is_none() {
            self.rating = parse_rating(raw);
        }
    }

    pub fn set_rating_value(&mut self, value: f64) {
        if self.rating.is_none() && (0.0..=5.0).contains(&value) {
            self.rating = Some(value);
        }
    }

    pub fn set_page_count(&mut self, raw: &str) {
        if self.page_count.is_none() {
            self.page_count = parse_page_count(raw);
        }
    }

    pub fn set_publication_date(&mut self, raw: &str) {
        if self.publication_date.is_none() {
            self.publication_date = parse_date(raw);
        }
    }

    /// Records an unnormalized field; the first non-empty value per key wins.
    pub fn set_raw(&mut self, key: &str, raw: &str) {
        let value = clean_text(raw);
        if !value.is_empty() && !self.raw_fields.contains_key(key) {
            self.raw_fields.insert(key.to_string(), value);
        }
    }

    /// Weighted share of the scored fields that are present, in `[0, 1]`.
    pub fn completeness(&self) -> f64 {
        let mut score = 0;
        if self.title.is_some() {
            score += TITLE_WEIGHT;
        }
        if !self.authors.is_empty() {
            score += AUTHORS_WEIGHT;
        }
        for present in [
            self.isbn.is_some(),
            self.rating.is_some(),
            self.page_count.is_some(),
            self.publication_date.is_some(),
        ] {
            if present {
                score += FIELD_WEIGHT;
            }
        }
        f64::from(score) / 1000.0
    }

    /// `base × completeness`, rounded to four decimals so equal drafts
    /// always compare equal.
    pub fn confidence(&self, strategy: StrategyKind) -> f64 {
        let raw = strategy.base_confidence() * self.completeness();
        (raw * 10_000.0).round() / 10_000.0
    }

    /// Builds the record; `None` when the draft has no title.
    pub fn into_record(
        self,
        ctx: &ParseContext<'_>,
        strategy: StrategyKind,
        confidence: f64,
    ) -> Option<BookRecord> {
        Some(BookRecord {
            title: self.title?,
            authors: self.authors,
            isbn: self.isbn,
            rating: self.rating,
            page_count: self.page_count,
            publication_date: self.publication_date,
            source: ctx.source,
            source_url: ctx.url.to_string(),
            confidence,
            strategy,
            raw_fields: self.raw_fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use folio_core::Source;

    use super::*;

    #[test]
    fn test_first_value_wins() {
        let mut draft = BookDraft::default();
        draft.set_title("  Dune ");
        draft.set_title("Dune Messiah");
        draft.add_author("by Frank Herbert");
        draft.add_author("Frank Herbert");
        draft.set_raw("publisher", "Ace");
        draft.set_raw("publisher", "Chilton");

        assert_eq!(draft.title.as_deref(), Some("Dune"));
        assert_eq!(draft.authors, vec!["Frank Herbert"]);
        assert_eq!(draft.raw_fields["publisher"], "Ace");
    }

    #[test]
    fn test_invalid_values_leave_field_open() {
        let mut draft = BookDraft::default();
        draft.set_isbn("not an isbn");
        draft.set_isbn("9780441172719");
        draft.set_rating_value(7.5);
        draft.set_rating("4.2");
        assert_eq!(draft.isbn.as_deref(), Some("9780441172719"));
        assert_eq!(draft.rating, Some(4.2));
    }

    #[test]
    fn test_completeness_weights() {
        let mut draft = BookDraft::default();
        assert_eq!(draft.completeness(), 0.0);
        draft.set_title("Dune");
        assert_eq!(draft.completeness(), 0.6);
        draft.add_author("Frank Herbert");
        assert_eq!(draft.completeness(), 0.9);
        assert_eq!(draft.confidence(StrategyKind::Lenient), 0.54);
        draft.set_isbn("9780441172719");
        draft.set_rating("4.27");
        draft.set_page_count("412 pages");
        draft.set_publication_date("1965");
        assert_eq!(draft.completeness(), 1.0);
        assert_eq!(draft.confidence(StrategyKind::Selectors), 0.85);
    }

    #[test]
    fn test_into_record_requires_title() {
        let ctx = ParseContext {
            source: Source::Goodreads,
            url: "https://www.goodreads.com/book/show/234225",
            strategies: &[],
            confidence_threshold: 0.5,
        };
        assert!(
            BookDraft::default()
                .into_record(&ctx, StrategyKind::JsonLd, 0.0)
                .is_none()
        );

        let mut draft = BookDraft::default();
        draft.set_title("Dune");
        let record = draft.into_record(&ctx, StrategyKind::JsonLd, 0.4).unwrap();
        assert_eq!(record.source, Source::Goodreads);
        assert_eq!(record.source_url, "https://www.goodreads.com/book/show/234225");
        assert_eq!(record.strategy, StrategyKind::JsonLd);
    }
}
