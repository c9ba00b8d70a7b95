use crate::clock::Clock;
use crate::config::LookupConfig;
use crate::errors::PipelineError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

const ERROR_BODY_EXCERPT: usize = 200;

/// Request counters for one lookup client.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientStats {
    pub name: String,
    /// Requests that returned a 2xx JSON payload.
    pub requests_made: u64,
    /// Payloads successfully mapped into a domain value.
    pub items_fetched: u64,
    pub not_found: u64,
    pub errors: u64,
}

/// HTTP GET client for one named API, spacing its own requests by a minimum interval.
///
/// The limiter is per instance and holds no lock: the client is driven
/// through `&mut self`, one request at a time.
pub struct RateLimitedClient {
    client: reqwest::Client,
    config: LookupConfig,
    clock: Arc<dyn Clock>,
    last_request: Option<Instant>,
    stats: ClientStats,
}

impl RateLimitedClient {
    /// Creates a new `RateLimitedClient`.
    ///
    /// # Arguments
    ///
    /// * `config` - Base URL, timeout, spacing and headers of the service.
    /// * `clock` - Time source used to enforce the spacing.
    pub fn new(config: LookupConfig, clock: Arc<dyn Clock>) -> Result<Self, PipelineError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                PipelineError::Config(format!("Invalid header name '{}': {}", name, e))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| {
                PipelineError::Config(format!("Invalid value for header '{}': {}", name, e))
            })?;
            headers.insert(header_name, header_value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| {
                PipelineError::Config(format!(
                    "Failed to create HTTP client for {}: {}",
                    config.name, e
                ))
            })?;

        let stats = ClientStats {
            name: config.name.clone(),
            ..ClientStats::default()
        };

        Ok(Self {
            client,
            config,
            clock,
            last_request: None,
            stats,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn stats(&self) -> ClientStats {
        self.stats.clone()
    }

    /// Counts a payload the owning service turned into a domain value.
    pub fn record_item(&mut self) {
        self.stats.items_fetched += 1;
    }

    /// Counts a payload the owning service could not map.
    pub fn record_error(&mut self) {
        self.stats.errors += 1;
    }

    /// Issues `GET <base_url><endpoint>?<query>`.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(payload))` - 2xx answer with a JSON body.
    /// * `Ok(None)` - the service answered 404.
    /// * `Err(LookupError)` - timeout, connection failure, or any other non-2xx status.
    /// * `Err(MalformedResponse)` - 2xx answer whose body is not JSON.
    pub async fn fetch(
        &mut self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<Value>, PipelineError> {
        self.wait_for_slot().await;

        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        tracing::debug!("{}: GET {} {:?}", self.config.name, url, query);

        self.last_request = Some(self.clock.now());
        let response = match self.client.get(&url).query(query).send().await {
            Ok(response) => response,
            Err(e) => {
                self.stats.errors += 1;
                return Err(self.transport_error(e));
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!("{}: {} not found", self.config.name, endpoint);
            self.stats.not_found += 1;
            return Ok(None);
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            self.stats.errors += 1;
            return Err(PipelineError::lookup(
                &self.config.name,
                Some(status.as_u16()),
                error_text.chars().take(ERROR_BODY_EXCERPT).collect::<String>(),
            ));
        }

        let data: Value = match response.json().await {
            Ok(data) => data,
            Err(e) => {
                self.stats.errors += 1;
                if e.is_timeout() {
                    return Err(self.transport_error(e));
                }
                return Err(PipelineError::malformed(
                    &self.config.name,
                    format!("body is not valid JSON: {}", e),
                ));
            }
        };

        self.stats.requests_made += 1;
        Ok(Some(data))
    }

    /// Blocks until `min_request_interval` has elapsed since the previous request.
    async fn wait_for_slot(&self) {
        let Some(last) = self.last_request else {
            return;
        };

        let elapsed = self.clock.now().saturating_duration_since(last);
        if elapsed < self.config.min_request_interval {
            let wait = self.config.min_request_interval - elapsed;
            tracing::trace!("{}: rate limited, waiting {:?}", self.config.name, wait);
            self.clock.sleep(wait).await;
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> PipelineError {
        let cause = if err.is_timeout() {
            "timeout".to_string()
        } else if err.is_connect() {
            format!("connection failed: {}", err)
        } else {
            err.to_string()
        };
        PipelineError::lookup(&self.config.name, None, cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, clock: Arc<ManualClock>) -> RateLimitedClient {
        let mut config = LookupConfig::new("test-api", &server.uri());
        config.min_request_interval = Duration::from_millis(100);
        RateLimitedClient::new(config, clock).unwrap()
    }

    #[test]
    fn test_invalid_header_is_config_error() {
        let mut config = LookupConfig::new("test-api", "http://localhost");
        config
            .headers
            .insert("bad header".to_string(), "x".to_string());

        let result = RateLimitedClient::new(config, Arc::new(ManualClock::new()));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[tokio::test]
    async fn test_fetch_success_counts_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/"))
            .and(query_param("q", "rivoli"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let mut client = client_for(&server, Arc::new(ManualClock::new()));
        let data = client.fetch("/search/", &[("q", "rivoli")]).await.unwrap();

        assert_eq!(data, Some(serde_json::json!({"ok": true})));
        assert_eq!(client.stats().requests_made, 1);
        assert_eq!(client.stats().errors, 0);
    }

    #[tokio::test]
    async fn test_not_found_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut client = client_for(&server, Arc::new(ManualClock::new()));
        let data = client.fetch("/communes/00000", &[]).await.unwrap();

        assert!(data.is_none());
        assert_eq!(client.stats().not_found, 1);
        assert_eq!(client.stats().requests_made, 0);
    }

    #[tokio::test]
    async fn test_server_error_is_lookup_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let mut client = client_for(&server, Arc::new(ManualClock::new()));
        let err = client.fetch("/search/", &[]).await.unwrap_err();

        match err {
            PipelineError::LookupError { status, cause, .. } => {
                assert_eq!(status, Some(503));
                assert_eq!(cause, "maintenance");
            }
            other => panic!("expected LookupError, got {other:?}"),
        }
        assert_eq!(client.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_non_json_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let mut client = client_for(&server, Arc::new(ManualClock::new()));
        let err = client.fetch("/search/", &[]).await.unwrap_err();

        assert!(matches!(err, PipelineError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_consecutive_requests_are_spaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(3)
            .mount(&server)
            .await;

        let clock = Arc::new(ManualClock::new());
        let mut client = client_for(&server, clock.clone());

        client.fetch("/a", &[]).await.unwrap();
        client.fetch("/b", &[]).await.unwrap();
        clock.advance(Duration::from_millis(40));
        client.fetch("/c", &[]).await.unwrap();

        // First request never waits; the third one only waits for the remainder.
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(100), Duration::from_millis(60)]
        );
    }

    #[tokio::test]
    async fn test_no_wait_once_interval_elapsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let clock = Arc::new(ManualClock::new());
        let mut client = client_for(&server, clock.clone());

        client.fetch("/a", &[]).await.unwrap();
        clock.advance(Duration::from_millis(250));
        client.fetch("/b", &[]).await.unwrap();

        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_configured_headers_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = LookupConfig::new("test-api", &server.uri());
        config
            .headers
            .insert("x-api-key".to_string(), "secret".to_string());
        let mut client = RateLimitedClient::new(config, Arc::new(ManualClock::new())).unwrap();

        assert!(client.fetch("/", &[]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_connection_failure_is_transient() {
        // Nothing listens on this port once the listener is dropped.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = LookupConfig::new("test-api", &format!("http://127.0.0.1:{}", port));
        let mut client = RateLimitedClient::new(config, Arc::new(ManualClock::new())).unwrap();

        let err = client.fetch("/search/", &[]).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(client.stats().errors, 1);
    }
}
