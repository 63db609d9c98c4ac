//! Network strategy: a plain GET with browser-like headers.
//!
//! Each request waits a short random politeness delay first, then retries
//! `429`/`5xx` responses and connection errors with exponential backoff:
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```
//!
//! Timeouts are not retried; the fetcher escalates them to the browser instead.

use super::{NetworkClient, NetworkFailure, NetworkPage};
use crate::config::NetworkOptions;
use crate::error::TeasyError;
use crate::utils::user_agent;
use rand::{Rng, rng};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_LANG: &str = "el-GR,el;q=0.9,en-US;q=0.8,en;q=0.7";

const RETRY_STATUSES: &[StatusCode] = &[
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// `reqwest`-backed [`NetworkClient`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    options: NetworkOptions,
}

impl HttpClient {
    pub fn new(options: NetworkOptions) -> Result<Self, TeasyError> {
        let client = Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client, options })
    }

    fn politeness_delay(&self) -> Duration {
        let min = self.options.politeness_min.as_millis() as u64;
        let max = self.options.politeness_max.as_millis() as u64;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rng().random_range(min..=max))
    }
}

/// Default headers for a listing request, with the template's headers applied last.
fn request_headers(overrides: &BTreeMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(ua) = HeaderValue::from_str(user_agent()) {
        headers.insert(USER_AGENT, ua);
    }
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANG));

    for (name, value) in overrides {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid template header"),
        }
    }
    headers
}

/// Backoff before retry number `attempt` (1-based), without jitter.
fn backoff(attempt: usize, base: Duration, max: Duration) -> Duration {
    let shift = (attempt.saturating_sub(1)).min(16) as u32;
    base.saturating_mul(1 << shift).min(max)
}

impl NetworkClient for HttpClient {
    #[instrument(level = "debug", skip_all, fields(url = %url))]
    async fn get(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<NetworkPage, NetworkFailure> {
        sleep(self.politeness_delay()).await;

        let total_t0 = Instant::now();
        let mut attempt = 0usize;
        loop {
            let result = self
                .client
                .get(url)
                .headers(request_headers(headers))
                .send()
                .await;

            let retry_reason = match result {
                Ok(resp) if RETRY_STATUSES.contains(&resp.status()) && attempt < self.options.retries => {
                    format!("HTTP {}", resp.status().as_u16())
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let final_url = resp.url().to_string();
                    let body = resp.text().await.map_err(|e| {
                        if e.is_timeout() {
                            NetworkFailure::Timeout(format!("reading body timed out: {e}"))
                        } else {
                            NetworkFailure::Transport(format!("reading body failed: {e}"))
                        }
                    })?;
                    debug!(
                        status,
                        attempt,
                        elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                        "GET complete"
                    );
                    return Ok(NetworkPage {
                        final_url,
                        status,
                        body,
                    });
                }
                Err(e) if e.is_timeout() => {
                    return Err(NetworkFailure::Timeout(format!(
                        "no response within {:?}",
                        self.options.timeout
                    )));
                }
                Err(e) if attempt < self.options.retries => e.to_string(),
                Err(e) => return Err(NetworkFailure::Transport(e.to_string())),
            };

            attempt += 1;
            let jitter_ms: u64 = rng().random_range(0..=250);
            let delay = backoff(attempt, self.options.retry_base_delay, self.options.retry_max_delay)
                + Duration::from_millis(jitter_ms);
            warn!(
                attempt,
                max = self.options.retries,
                reason = %retry_reason,
                ?delay,
                "GET attempt failed; backing off"
            );
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(timeout: Duration) -> HttpClient {
        HttpClient::new(NetworkOptions {
            timeout,
            retries: 2,
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(5),
            politeness_min: Duration::ZERO,
            politeness_max: Duration::ZERO,
        })
        .unwrap()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(8);
        assert_eq!(backoff(1, base, max), Duration::from_millis(500));
        assert_eq!(backoff(2, base, max), Duration::from_secs(1));
        assert_eq!(backoff(3, base, max), Duration::from_secs(2));
        assert_eq!(backoff(10, base, max), max);
    }

    #[test]
    fn test_template_headers_override_defaults() {
        let mut overrides = BTreeMap::new();
        overrides.insert("Accept-Language".to_string(), "en".to_string());
        overrides.insert("bad header".to_string(), "x".to_string());
        let headers = request_headers(&overrides);
        assert_eq!(headers[ACCEPT_LANGUAGE], "en");
        assert!(headers.contains_key(USER_AGENT));
        assert_eq!(headers.len(), 3);
    }

    #[tokio::test]
    async fn test_get_sends_browser_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .and(header_exists("accept-language"))
            .and(header_exists("user-agent"))
            .and(header("x-site", "dnews"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<ul></ul>"))
            .expect(1)
            .mount(&server)
            .await;

        let mut extra = BTreeMap::new();
        extra.insert("X-Site".to_string(), "dnews".to_string());
        let page = client(Duration::from_secs(5))
            .get(&format!("{}/latest", server.uri()), &extra)
            .await
            .unwrap();
        assert_eq!(page.status, 200);
        assert_eq!(page.body, "<ul></ul>");

        // `header()` splits on commas, so the full language list is checked here.
        let requests = server.received_requests().await.unwrap();
        let sent = requests[0].headers.get("accept-language").unwrap();
        assert_eq!(sent.to_str().unwrap(), ACCEPT_LANG);
        assert_eq!(requests[0].headers.get("accept").unwrap().to_str().unwrap(), ACCEPT_HTML);
    }

    #[tokio::test]
    async fn test_retries_on_503_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let page = client(Duration::from_secs(5))
            .get(&server.uri(), &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(page.status, 200);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries_with_last_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let page = client(Duration::from_secs(5))
            .get(&server.uri(), &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(page.status, 502);
    }

    #[tokio::test]
    async fn test_403_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let page = client(Duration::from_secs(5))
            .get(&server.uri(), &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(page.status, 403);
    }

    #[tokio::test]
    async fn test_slow_response_is_a_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let err = client(Duration::from_millis(200))
            .get(&server.uri(), &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkFailure::Timeout(_)));
    }
}
