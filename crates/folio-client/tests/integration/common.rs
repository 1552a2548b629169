use std::time::Duration;

use folio_client::{ParserChain, ReqwestFetcher};
use folio_core::{
    Engine, EngineConfig, LimiterTuning, MemoryResultStore, RateLimitConfig, RetryPolicy, Source,
};
use wiremock::MockServer;

pub type TestEngine = Engine<ReqwestFetcher, ParserChain, MemoryResultStore>;

pub const BOOK_PAGE: &str = r#"<!DOCTYPE html>
<html><head>
<title>Dune | Test Books</title>
<script type="application/ld+json">
{
  "@context": "https://schema.org",
  "@type": "Book",
  "name": "Dune",
  "author": [{"@type": "Person", "name": "Frank Herbert"}],
  "isbn": "9780441172719",
  "numberOfPages": 412,
  "datePublished": "1965-08-01",
  "aggregateRating": {"@type": "AggregateRating", "ratingValue": "4.27", "ratingCount": "1400000"}
}
</script>
</head><body><h1>Dune</h1></body></html>"#;

/// A fetcher allowed to talk to the local mock server.
pub fn local_fetcher() -> ReqwestFetcher {
    ReqwestFetcher::new()
        .expect("client should build")
        .allow_private_urls()
}

/// Fast retries, no jitter and a generous rate for the mock server's host.
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_concurrency(2)
        .with_attempt_timeout(Duration::from_secs(2))
        .with_job_timeout(Duration::from_secs(10))
        .with_retry(RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        })
        .with_limiter(LimiterTuning::default().without_jitter())
        .with_source_rate(Source::Unknown, RateLimitConfig::new(100.0, 100))
}

pub async fn start_engine() -> (MockServer, TestEngine) {
    let server = MockServer::start().await;
    let engine = Engine::new(
        test_config(),
        local_fetcher(),
        ParserChain::new(),
        MemoryResultStore::new(),
    )
    .expect("engine should build");
    engine.start().expect("engine should start");
    (server, engine)
}
