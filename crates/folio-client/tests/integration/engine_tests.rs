use folio_core::{
    FailureKind, JobStatus, Query, QueryResult, ResultFilter, ScrapeRequest, Source, StrategyKind,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::integration::common::{BOOK_PAGE, start_engine};

#[tokio::test]
async fn scrapes_structured_book_page() {
    let (server, engine) = start_engine().await;
    Mock::given(method("GET"))
        .and(path("/book/dune"))
        .respond_with(ResponseTemplate::new(200).set_body_string(BOOK_PAGE))
        .mount(&server)
        .await;

    let url = format!("{}/book/dune", server.uri());
    let ids = engine
        .submit(ScrapeRequest::single(url.clone(), Source::Unknown))
        .unwrap();
    engine.wait_idle().await;

    let QueryResult::Finished(record) = engine.query(Query::Job(ids[0])).await.unwrap() else {
        panic!("job should be finished");
    };
    assert_eq!(record.status(), JobStatus::Succeeded);
    assert!(record.content_hash.is_some());

    let book = record.record().unwrap();
    assert_eq!(book.title, "Dune");
    assert_eq!(book.authors, vec!["Frank Herbert"]);
    assert_eq!(book.isbn.as_deref(), Some("9780441172719"));
    assert_eq!(book.page_count, Some(412));
    assert_eq!(book.rating, Some(4.27));
    assert_eq!(book.strategy, StrategyKind::JsonLd);
    assert_eq!(book.source_url, url);
    assert_eq!(book.confidence, 1.0);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let (server, engine) = start_engine().await;
    Mock::given(method("GET"))
        .and(path("/book/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/book/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string(BOOK_PAGE))
        .mount(&server)
        .await;

    let ids = engine
        .submit(ScrapeRequest::single(
            format!("{}/book/flaky", server.uri()),
            Source::Unknown,
        ))
        .unwrap();
    engine.wait_idle().await;

    let QueryResult::Finished(record) = engine.query(Query::Job(ids[0])).await.unwrap() else {
        panic!("job should be finished");
    };
    assert_eq!(record.status(), JobStatus::Succeeded);
    assert_eq!(record.job.attempts, 3);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);

    let metrics = engine.metrics_snapshot();
    assert_eq!(metrics.fetch_attempts, 3);
    assert_eq!(metrics.retries, 2);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let (server, engine) = start_engine().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let ids = engine
        .submit(ScrapeRequest::single(
            format!("{}/book/gone", server.uri()),
            Source::Unknown,
        ))
        .unwrap();
    engine.wait_idle().await;

    let QueryResult::Finished(record) = engine.query(Query::Job(ids[0])).await.unwrap() else {
        panic!("job should be finished");
    };
    assert_eq!(record.status(), JobStatus::Failed);
    assert_eq!(record.outcome.failure_kind(), Some(FailureKind::FetchPermanent));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn unparseable_page_fails_with_parse_failure() {
    let (server, engine) = start_engine().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body><p>404-ish</p></body></html>"))
        .mount(&server)
        .await;

    let ids = engine
        .submit(ScrapeRequest::single(
            format!("{}/not-a-book", server.uri()),
            Source::Unknown,
        ))
        .unwrap();
    engine.wait_idle().await;

    let QueryResult::Finished(record) = engine.query(Query::Job(ids[0])).await.unwrap() else {
        panic!("job should be finished");
    };
    assert_eq!(record.outcome.failure_kind(), Some(FailureKind::ParseFailure));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn batch_query_and_stats() {
    let (server, engine) = start_engine().await;
    Mock::given(method("GET"))
        .and(path("/book/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(BOOK_PAGE))
        .mount(&server)
        .await;

    let urls = vec![
        format!("{}/book/1", server.uri()),
        format!("{}/book/2", server.uri()),
        format!("{}/book/missing", server.uri()),
    ];
    let request = ScrapeRequest::batch(urls, Source::Unknown);
    let request_id = request.id;
    engine.submit(request).unwrap();
    engine.wait_idle().await;

    let QueryResult::Batch(batch) = engine.query(Query::Batch(request_id)).await.unwrap() else {
        panic!("batch should be known");
    };
    assert_eq!(batch.total, 3);
    assert_eq!(batch.succeeded, 2);
    assert_eq!(batch.failed, 1);
    assert!(batch.done);

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.requests_submitted, 1);
    assert_eq!(stats.jobs_submitted, 3);
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 0);

    let filter = ResultFilter::all().with_status(JobStatus::Succeeded);
    let QueryResult::Records(records) = engine.query(Query::Filter(filter)).await.unwrap() else {
        panic!("filter query returns records");
    };
    assert_eq!(records.len(), 2);

    assert_eq!(engine.clear(&ResultFilter::all()).await.unwrap(), 3);
    assert_eq!(engine.stats().await.unwrap().succeeded, 0);

    engine.shutdown().await.unwrap();
}
