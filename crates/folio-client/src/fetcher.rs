use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use folio_core::config::DEFAULT_USER_AGENT;
use folio_core::error::{AppError, FetchError};
use folio_core::models::FetchResponse;
use folio_core::traits::Fetcher;
use folio_core::EngineConfig;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use reqwest::{Client, redirect};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use url::{Host, Url};

const MAX_REDIRECTS: usize = 10;
const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// One GET per call over a pooled reqwest client, following up to ten
/// redirects. Clones share a semaphore that caps open connections.
///
/// Reserved and private targets are refused unless
/// [`allow_private_urls`](Self::allow_private_urls) is set, which tests
/// against a local server need.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    permits: Arc<Semaphore>,
    ssrf_protection: bool,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::build(DEFAULT_USER_AGENT, DEFAULT_MAX_CONNECTIONS)
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, AppError> {
        Self::build(&config.user_agent, config.max_connections)
    }

    fn build(user_agent: &str, max_connections: usize) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.8"));

        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .pool_max_idle_per_host(max_connections)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(max_connections.max(1))),
            ssrf_protection: true,
        })
    }

    /// Lets requests reach loopback and private addresses.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse, FetchError> {
        if self.ssrf_protection {
            validate_url(url).await?;
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| FetchError::Network(format!("connection pool closed: {e}")))?;

        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            tracing::debug!(url, status = status.as_u16(), "Non-success response");
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = response.bytes().await.map_err(|e| classify(e, timeout))?;

        Ok(FetchResponse {
            status: status.as_u16(),
            final_url,
            body: body.to_vec(),
            elapsed: started.elapsed(),
            attempts: 1,
        })
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout(timeout)
    } else if error.is_redirect() {
        FetchError::TooManyRedirects
    } else if error.is_connect() {
        FetchError::Connect(error.to_string())
    } else if error.is_builder() {
        FetchError::InvalidUrl(error.to_string())
    } else {
        FetchError::Network(error.to_string())
    }
}

/// Refuses targets a public scraper has no business reaching: non-HTTP
/// schemes and hosts that are, or resolve to, reserved addresses.
async fn validate_url(url: &str) -> Result<(), FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl(format!(
            "{url}: scheme '{}' is not allowed",
            parsed.scheme()
        )));
    }

    let domain = match parsed.host() {
        None => return Err(FetchError::InvalidUrl(format!("{url}: missing host"))),
        Some(Host::Ipv4(v4)) => return check_address(url, IpAddr::V4(v4)),
        Some(Host::Ipv6(v6)) => return check_address(url, IpAddr::V6(v6)),
        Some(Host::Domain(domain)) => domain,
    };

    let port = parsed.port_or_known_default().unwrap_or(80);
    let mut resolved = tokio::net::lookup_host((domain, port))
        .await
        .map_err(|e| FetchError::Connect(format!("{domain}: lookup failed: {e}")))?
        .peekable();
    if resolved.peek().is_none() {
        return Err(FetchError::Connect(format!("{domain}: lookup returned nothing")));
    }
    resolved.try_for_each(|addr| check_address(url, addr.ip()))
}

fn check_address(url: &str, ip: IpAddr) -> Result<(), FetchError> {
    if is_reserved(ip) {
        Err(FetchError::InvalidUrl(format!(
            "{url}: SSRF blocked, {ip} is a reserved address"
        )))
    } else {
        Ok(())
    }
}

fn is_reserved(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || (a == 100 && (64..128).contains(&b))
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_reserved(IpAddr::V4(v4));
            }
            let head = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || head & 0xffc0 == 0xfe80
                || head & 0xfe00 == 0xfc00
        }
    }
}
