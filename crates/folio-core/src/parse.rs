//! Parsing vocabulary shared by the engine and the concrete parser chain.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::Source;

/// One extraction strategy. The order a source tries them in lives in its
/// [`SourceProfile`](crate::models::SourceProfile).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// `<script type="application/ld+json">` blocks.
    JsonLd,
    /// schema.org microdata (`itemscope` / `itemprop`).
    Microdata,
    /// Per-source CSS selector tables.
    Selectors,
    /// Meta tags and free-text heuristics.
    Lenient,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::JsonLd => "json_ld",
            StrategyKind::Microdata => "microdata",
            StrategyKind::Selectors => "selectors",
            StrategyKind::Lenient => "lenient",
        }
    }

    /// Upper bound on the confidence this strategy can report.
    pub fn base_confidence(&self) -> f64 {
        match self {
            StrategyKind::JsonLd => 1.0,
            StrategyKind::Microdata => 0.95,
            StrategyKind::Selectors => 0.85,
            StrategyKind::Lenient => 0.6,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a strategy produced no acceptable record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DeclineReason {
    /// Nothing usable was found.
    NoMatch { detail: String },
    /// A candidate was found but scored too low.
    BelowThreshold { confidence: f64, threshold: f64 },
}

impl DeclineReason {
    pub fn no_match(detail: impl Into<String>) -> Self {
        DeclineReason::NoMatch {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclineReason::NoMatch { detail } => write!(f, "no match ({detail})"),
            DeclineReason::BelowThreshold {
                confidence,
                threshold,
            } => write!(f, "confidence {confidence:.2} below threshold {threshold:.2}"),
        }
    }
}

/// A single strategy's verdict inside a failed chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy: StrategyKind,
    pub reason: DeclineReason,
}

/// Every strategy declined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub attempts: Vec<StrategyAttempt>,
}

impl ParseFailure {
    pub fn push(&mut self, strategy: StrategyKind, reason: DeclineReason) {
        self.attempts.push(StrategyAttempt { strategy, reason });
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts.is_empty() {
            return f.write_str("no strategies attempted");
        }
        for (i, attempt) in self.attempts.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", attempt.strategy, attempt.reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseFailure {}

/// Everything a parser needs besides the body.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub source: Source,
    /// Final URL after redirects.
    pub url: &'a str,
    pub strategies: &'a [StrategyKind],
    pub confidence_threshold: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_confidence_is_ordered() {
        let kinds = [
            StrategyKind::JsonLd,
            StrategyKind::Microdata,
            StrategyKind::Selectors,
            StrategyKind::Lenient,
        ];
        for pair in kinds.windows(2) {
            assert!(pair[0].base_confidence() > pair[1].base_confidence());
        }
    }

    #[test]
    fn test_parse_failure_display() {
        let mut failure = ParseFailure::default();
        failure.push(StrategyKind::JsonLd, DeclineReason::no_match("no ld+json"));
        failure.push(
            StrategyKind::Lenient,
            DeclineReason::BelowThreshold {
                confidence: 0.24,
                threshold: 0.5,
            },
        );
        assert_eq!(
            failure.to_string(),
            "json_ld: no match (no ld+json); lenient: confidence 0.24 below threshold 0.50"
        );
    }

    #[test]
    fn test_empty_parse_failure_display() {
        assert_eq!(
            ParseFailure::default().to_string(),
            "no strategies attempted"
        );
    }
}
