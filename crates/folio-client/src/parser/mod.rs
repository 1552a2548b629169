//! HTML → [`BookRecord`] parser chain.
//!
//! The document is parsed once; each strategy in the context's order then
//! builds a draft, which is scored and either accepted or declined with a
//! reason. The first accepted draft wins.

mod dom;
mod draft;
mod jsonld;
mod lenient;
mod microdata;
mod normalize;
mod selectors;

use folio_core::{BookRecord, DeclineReason, ParseContext, ParseFailure, Parser, StrategyKind};
use scraper::Html;

pub use draft::BookDraft;
pub use normalize::{normalize_isbn, parse_date};

/// Stateless strategy chain; cheap to clone and share between workers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParserChain;

impl ParserChain {
    pub fn new() -> Self {
        Self
    }

    /// Runs one strategy against an already-parsed document.
    pub fn extract(
        &self,
        document: &Html,
        strategy: StrategyKind,
        ctx: &ParseContext<'_>,
    ) -> Result<BookDraft, DeclineReason> {
        match strategy {
            StrategyKind::JsonLd => jsonld::extract(document),
            StrategyKind::Microdata => microdata::extract(document),
            StrategyKind::Selectors => selectors::extract(document, ctx.source),
            StrategyKind::Lenient => lenient::extract(document),
        }
    }

    fn accept(
        &self,
        draft: BookDraft,
        strategy: StrategyKind,
        ctx: &ParseContext<'_>,
    ) -> Result<BookRecord, DeclineReason> {
        if draft.title.is_none() {
            return Err(DeclineReason::no_match("no title"));
        }
        let confidence = draft.confidence(strategy);
        if confidence < ctx.confidence_threshold {
            return Err(DeclineReason::BelowThreshold {
                confidence,
                threshold: ctx.confidence_threshold,
            });
        }
        draft
            .into_record(ctx, strategy, confidence)
            .ok_or_else(|| DeclineReason::no_match("no title"))
    }
}

impl Parser for ParserChain {
    fn parse(&self, body: &str, ctx: &ParseContext<'_>) -> Result<BookRecord, ParseFailure> {
        let document = Html::parse_document(body);
        let mut failure = ParseFailure::default();

        for &strategy in ctx.strategies {
            let verdict = self
                .extract(&document, strategy, ctx)
                .and_then(|draft| self.accept(draft, strategy, ctx));
            match verdict {
                Ok(record) => {
                    tracing::debug!(
                        url = ctx.url,
                        strategy = %strategy,
                        confidence = record.confidence,
                        "Parsed book record"
                    );
                    return Ok(record);
                }
                Err(reason) => {
                    tracing::debug!(url = ctx.url, strategy = %strategy, %reason, "Strategy declined");
                    failure.push(strategy, reason);
                }
            }
        }

        Err(failure)
    }
}
