use std::time::Duration;

use folio_core::{FetchError, Fetcher};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::integration::common::{BOOK_PAGE, local_fetcher};

#[tokio::test]
async fn fetch_returns_body_and_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/book/1"))
        .and(header_exists("user-agent"))
        .respond_with(ResponseTemplate::new(200).set_body_string(BOOK_PAGE))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/book/1", server.uri());
    let response = local_fetcher()
        .fetch(&url, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.final_url, url);
    assert_eq!(response.attempts, 1);
    assert_eq!(response.text(), BOOK_PAGE);
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = format!("{}/missing", server.uri());
    let err = local_fetcher()
        .fetch(&url, Duration::from_secs(2))
        .await
        .unwrap_err();

    assert_eq!(err, FetchError::Status { status: 404, url });
    assert!(!err.is_transient());
}

#[tokio::test]
async fn server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = local_fetcher()
        .fetch(&format!("{}/busy", server.uri()), Duration::from_secs(2))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(503));
    assert!(err.is_transient());
    assert!(err.is_throttle_signal());
}

#[tokio::test]
async fn redirects_report_final_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("location", format!("{}/new", server.uri())),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
        .mount(&server)
        .await;

    let response = local_fetcher()
        .fetch(&format!("{}/old", server.uri()), Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(response.final_url, format!("{}/new", server.uri()));
    assert_eq!(response.text(), "moved");
}

#[tokio::test]
async fn redirect_loop_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", format!("{}/loop", server.uri())),
        )
        .mount(&server)
        .await;

    let err = local_fetcher()
        .fetch(&format!("{}/loop", server.uri()), Duration::from_secs(2))
        .await
        .unwrap_err();

    assert_eq!(err, FetchError::TooManyRedirects);
    assert!(!err.is_transient());
}

#[tokio::test]
async fn slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let timeout = Duration::from_millis(200);
    let err = local_fetcher()
        .fetch(&format!("{}/slow", server.uri()), timeout)
        .await
        .unwrap_err();

    assert_eq!(err, FetchError::Timeout(timeout));
    assert!(err.is_transient());
}

#[tokio::test]
async fn ssrf_protection_blocks_the_mock_server() {
    let server = MockServer::start().await;
    let fetcher = folio_client::ReqwestFetcher::new().unwrap();

    let err = fetcher
        .fetch(&format!("{}/book/1", server.uri()), Duration::from_secs(2))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::InvalidUrl(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}
