use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::parse::StrategyKind;
use crate::rate_limiter::RateLimitConfig;

/// Upstream book source. Drives strategy order and rate-limit defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Goodreads,
    Amazon,
    GoogleBooks,
    #[serde(rename = "openlibrary")]
    OpenLibrary,
    Unknown,
}

/// Static capability table entry for a [`Source`].
#[derive(Debug, Clone, Copy)]
pub struct SourceProfile {
    pub rate: RateLimitConfig,
    pub strategies: &'static [StrategyKind],
}

const FULL_CHAIN: &[StrategyKind] = &[
    StrategyKind::JsonLd,
    StrategyKind::Microdata,
    StrategyKind::Selectors,
    StrategyKind::Lenient,
];

const GENERIC_CHAIN: &[StrategyKind] = &[
    StrategyKind::JsonLd,
    StrategyKind::Microdata,
    StrategyKind::Lenient,
];

static GOODREADS: SourceProfile = SourceProfile {
    rate: RateLimitConfig::new(2.0, 3),
    strategies: FULL_CHAIN,
};
static AMAZON: SourceProfile = SourceProfile {
    rate: RateLimitConfig::new(1.0, 2),
    strategies: FULL_CHAIN,
};
static GOOGLE_BOOKS: SourceProfile = SourceProfile {
    rate: RateLimitConfig::new(5.0, 5),
    strategies: FULL_CHAIN,
};
static OPEN_LIBRARY: SourceProfile = SourceProfile {
    rate: RateLimitConfig::new(8.0, 10),
    strategies: FULL_CHAIN,
};
static UNKNOWN: SourceProfile = SourceProfile {
    rate: RateLimitConfig::new(1.0, 1),
    strategies: GENERIC_CHAIN,
};

impl Source {
    pub const ALL: [Source; 5] = [
        Source::Goodreads,
        Source::Amazon,
        Source::GoogleBooks,
        Source::OpenLibrary,
        Source::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Goodreads => "goodreads",
            Source::Amazon => "amazon",
            Source::GoogleBooks => "google_books",
            Source::OpenLibrary => "openlibrary",
            Source::Unknown => "unknown",
        }
    }

    pub fn profile(&self) -> &'static SourceProfile {
        match self {
            Source::Goodreads => &GOODREADS,
            Source::Amazon => &AMAZON,
            Source::GoogleBooks => &GOOGLE_BOOKS,
            Source::OpenLibrary => &OPEN_LIBRARY,
            Source::Unknown => &UNKNOWN,
        }
    }

    /// Infers the source from a lowercased URL host.
    pub fn detect(host: &str) -> Source {
        let host = host.trim_start_matches("www.");
        let labels: Vec<&str> = host.split('.').collect();

        if host == "goodreads.com" || host.ends_with(".goodreads.com") {
            Source::Goodreads
        } else if host == "openlibrary.org" || host.ends_with(".openlibrary.org") {
            Source::OpenLibrary
        } else if labels.windows(2).any(|w| w == ["books", "google"]) {
            Source::GoogleBooks
        } else if labels.len() >= 2 && labels[..labels.len() - 1].contains(&"amazon") {
            Source::Amazon
        } else {
            Source::Unknown
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "goodreads" => Ok(Source::Goodreads),
            "amazon" => Ok(Source::Amazon),
            "google_books" | "googlebooks" => Ok(Source::GoogleBooks),
            "openlibrary" | "open_library" => Ok(Source::OpenLibrary),
            "unknown" => Ok(Source::Unknown),
            _ => Err(format!("Unknown source: {s}")),
        }
    }
}

/// A request to scrape one or more URLs. Immutable once submitted; its id
/// doubles as the batch id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub id: Uuid,
    pub urls: Vec<String>,
    pub source: Source,
    pub priority: i32,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub submitted_at: DateTime<Utc>,
}

impl ScrapeRequest {
    pub const DEFAULT_PRIORITY: i32 = 5;

    pub fn single(url: impl Into<String>, source: Source) -> Self {
        Self::batch(vec![url.into()], source)
    }

    pub fn batch(urls: Vec<String>, source: Source) -> Self {
        Self {
            id: Uuid::new_v4(),
            urls,
            source,
            priority: Self::DEFAULT_PRIORITY,
            metadata: BTreeMap::new(),
            submitted_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Structured book data extracted from a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub title: String,
    pub authors: Vec<String>,
    /// Digits only (an ISBN-10 may end in `X`), checksum validated.
    pub isbn: Option<String>,
    pub rating: Option<f64>,
    pub page_count: Option<u32>,
    pub publication_date: Option<NaiveDate>,
    pub source: Source,
    pub source_url: String,
    pub confidence: f64,
    pub strategy: StrategyKind,
    /// Publisher, description, cover image and any other unnormalized fields.
    #[serde(default)]
    pub raw_fields: BTreeMap<String, String>,
}

/// A successful HTTP retrieval.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub final_url: String,
    pub body: Vec<u8>,
    pub elapsed: Duration,
    /// Filled in by the retrying wrapper; transports report 1.
    pub attempts: u32,
}

impl FetchResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Compute a SHA-256 hash of raw bytes, returned as 64-char hex.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
