//! The retrying HTTP client (§4.C): a `reqwest`-backed POST client with
//! exponential backoff + jitter, `Retry-After` handling, and a bounded
//! connection pool. Every outbound model-provider call in the pipeline goes
//! through this one client — no ad-hoc HTTP wrappers per provider.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

/// Errors from a single HTTP attempt or from the retrying client after
/// exhausting its attempts.
#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("non-retryable HTTP status {status}")]
    Status {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },
}

/// A successful HTTP response: status, headers, and body bytes.
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Configuration for [`RetryingHttpClient`]. Every field mirrors a §6
/// environment variable; construction clamps values to `safe_threshold`.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub retry_attempts: usize,
    pub retry_base: Duration,
    pub retry_max: Option<Duration>,
    pub max_sockets: usize,
    pub max_free_sockets: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
            retry_attempts: 2,
            retry_base: Duration::from_millis(100),
            retry_max: None,
            max_sockets: 50,
            max_free_sockets: 10,
        }
    }
}

impl HttpClientConfig {
    /// Clamps `max_sockets`/`max_free_sockets` to `safe_threshold`, logging
    /// once per process if a clamp occurred (mirrors the §8 boundary
    /// property "values above SAFE_THRESHOLD are clamped and logged exactly
    /// once per process").
    pub fn clamp(mut self, safe_threshold: usize) -> Self {
        if self.max_sockets > safe_threshold {
            self.max_sockets = safe_threshold;
            log_clamp_once("MAX_SOCKETS");
        }
        if self.max_free_sockets > safe_threshold {
            self.max_free_sockets = safe_threshold;
            log_clamp_once("MAX_FREE_SOCKETS");
        }
        self
    }
}

static CLAMP_LOGGED: std::sync::OnceLock<std::sync::Mutex<std::collections::HashSet<&'static str>>> =
    std::sync::OnceLock::new();

fn log_clamp_once(field: &'static str) {
    let set = CLAMP_LOGGED.get_or_init(|| std::sync::Mutex::new(std::collections::HashSet::new()));
    let mut set = set.lock().unwrap();
    if set.insert(field) {
        #[cfg(feature = "tracing")]
        tracing::warn!(field, "configuration value clamped to safe threshold");
    }
}

/// A retrying, connection-pooled POST client for the model provider.
///
/// Retry delay for attempt `i` (0-indexed) is `base * 2^i +
/// uniform[0, base)`, clamped to `retry_max` if set. On HTTP 429/503 with a
/// `Retry-After` header, that header wins: seconds if it parses as an
/// integer, `date - now` if it parses as an HTTP-date, otherwise `2 ×
/// computed`. Non-retryable 4xx statuses (other than 429) fail immediately.
/// Never returns an error to the caller by surprise — [`HttpClientError`] is
/// an explicit `Result`, never a panic.
pub struct RetryingHttpClient {
    client: reqwest::Client,
    config: HttpClientConfig,
}

impl RetryingHttpClient {
    pub fn new(config: HttpClientConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.max_free_sockets)
            .build()
            .expect("reqwest client builds with valid configuration");
        Self { client, config }
    }

    pub async fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpClientError> {
        let mut last_error = None;
        let total_attempts = self.config.retry_attempts + 1;

        for attempt in 0..total_attempts {
            if attempt > 0 {
                let delay = self.delay_for(attempt - 1, last_error.as_ref());
                tokio::time::sleep(delay).await;
            }

            match self.try_once(url, &body, headers).await {
                Ok(response) => return Ok(response),
                Err(Attempt::Retryable(err)) => last_error = Some(err),
                Err(Attempt::Fatal(err)) => return Err(err),
            }
        }

        Err(last_error.unwrap_or(HttpClientError::Transport("exhausted retries".to_string())))
    }

    async fn try_once(
        &self,
        url: &str,
        body: &[u8],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, Attempt> {
        let mut request = self.client.post(url).body(body.to_vec());
        for (k, v) in headers {
            request = request.header(*k, *v);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Attempt::Retryable(HttpClientError::Timeout(self.config.timeout))
            } else {
                Attempt::Retryable(HttpClientError::Transport(e.to_string()))
            }
        })?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string())))
            .collect();

        if status == 429 || status == 503 {
            let retry_after = headers
                .get("retry-after")
                .and_then(|v| parse_retry_after(v, std::time::SystemTime::now()));
            let body = response.bytes().await.unwrap_or_default().to_vec();
            return Err(Attempt::Retryable(HttpClientError::Status {
                status,
                body: String::from_utf8_lossy(&body).to_string(),
                retry_after,
            }));
        }

        if (400..500).contains(&status) {
            let body = response.bytes().await.unwrap_or_default().to_vec();
            return Err(Attempt::Fatal(HttpClientError::Status {
                status,
                body: String::from_utf8_lossy(&body).to_string(),
                retry_after: None,
            }));
        }

        if status >= 500 {
            let body = response.bytes().await.unwrap_or_default().to_vec();
            return Err(Attempt::Retryable(HttpClientError::Status {
                status,
                body: String::from_utf8_lossy(&body).to_string(),
                retry_after: None,
            }));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Attempt::Retryable(HttpClientError::Transport(e.to_string())))?
            .to_vec();

        Ok(HttpResponse { status, headers, body })
    }

    fn delay_for(&self, attempt: usize, last_error: Option<&HttpClientError>) -> Duration {
        let base = self.config.retry_base;
        let computed = {
            let exp = base.as_secs_f64() * 2f64.powi(attempt as i32);
            let jitter = rand::rng().random_range(0.0..base.as_secs_f64());
            Duration::from_secs_f64(exp + jitter)
        };

        let delay = match last_error {
            Some(HttpClientError::Status {
                retry_after: Some(retry_after),
                ..
            }) => *retry_after,
            Some(HttpClientError::Status { status, .. }) if *status == 429 || *status == 503 => {
                computed * 2
            }
            _ => computed,
        };

        match self.config.retry_max {
            Some(max) if delay > max => max,
            _ => delay,
        }
    }
}

enum Attempt {
    Retryable(HttpClientError),
    Fatal(HttpClientError),
}

/// Parses a `Retry-After` header value: an integer number of seconds, or an
/// HTTP-date (in which case the delay is `date - now`).
pub fn parse_retry_after(value: &str, now: std::time::SystemTime) -> Option<Duration> {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    httpdate::parse_http_date(value.trim())
        .ok()
        .map(|date| date.duration_since(now).unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_retry_after() {
        let now = std::time::SystemTime::now();
        assert_eq!(parse_retry_after("2", now), Some(Duration::from_secs(2)));
    }

    #[test]
    fn rejects_garbage_retry_after() {
        let now = std::time::SystemTime::now();
        assert_eq!(parse_retry_after("not-a-date", now), None);
    }

    #[test]
    fn config_clamps_socket_caps() {
        let config = HttpClientConfig {
            max_sockets: 5000,
            max_free_sockets: 5000,
            ..Default::default()
        }
        .clamp(1000);
        assert_eq!(config.max_sockets, 1000);
        assert_eq!(config.max_free_sockets, 1000);
    }
}
