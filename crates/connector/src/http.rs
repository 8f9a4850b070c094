//! Shared HTTP plumbing for adapters: credential placement, status
//! classification and `Retry-After` handling.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use skyfeed_core::IngestError;

const USER_AGENT: &str = concat!("skyfeed/", env!("CARGO_PKG_VERSION"));

/// How an API key is resolved for one adapter.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Key supplied through configuration.
    Configured(String),
    /// Public sandbox key used when nothing is configured (reduced quota).
    Fallback(String),
    /// No key at all; the API serves anonymous callers with a lower limit.
    Anonymous,
}

impl Credential {
    /// Prefer the configured key, then the public fallback, then anonymous.
    pub fn resolve(configured: Option<String>, fallback: Option<&str>) -> Self {
        match (configured, fallback) {
            (Some(key), _) => Self::Configured(key),
            (None, Some(demo)) => Self::Fallback(demo.to_string()),
            (None, None) => Self::Anonymous,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Configured(k) | Self::Fallback(k) => Some(k),
            Self::Anonymous => None,
        }
    }

    /// Mode label safe to log.
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Configured(_) => "configured",
            Self::Fallback(_) => "fallback",
            Self::Anonymous => "anonymous",
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential({})", self.mode())
    }
}

/// Where the credential goes on the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialPlacement {
    Header(String),
    Query(String),
}

/// JSON-over-HTTP GET client shared by the bundled adapters.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    credential: Credential,
    placement: CredentialPlacement,
}

impl HttpSource {
    pub fn new(credential: Credential, placement: CredentialPlacement, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            credential,
            placement,
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// GET `url` with `query` and the credential, returning the parsed JSON body.
    ///
    /// Network errors and timeouts are transient; non-2xx statuses are classified
    /// with [`IngestError::from_http_status`]; a body that is not JSON is permanent.
    pub async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, IngestError> {
        let mut request = self.client.get(url).query(query);
        if let Some(key) = self.credential.value() {
            request = match &self.placement {
                CredentialPlacement::Header(name) => request.header(name.as_str(), key),
                CredentialPlacement::Query(name) => request.query(&[(name.as_str(), key)]),
            };
        }

        debug!(url, credential = self.credential.mode(), "fetching");
        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::from_http_status(status.as_u16(), &body, retry_after));
        }

        let body = response.text().await.map_err(classify_transport)?;
        serde_json::from_str(&body).map_err(|e| {
            let snippet: String = body.chars().take(120).collect();
            IngestError::permanent(format!("malformed response body ({e}): {snippet}"))
        })
    }
}

fn classify_transport(e: reqwest::Error) -> IngestError {
    if e.is_builder() {
        IngestError::permanent(format!("invalid request: {e}"))
    } else {
        IngestError::transient(format!("request failed: {e}"))
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn credential_resolution_order() {
        assert_eq!(
            Credential::resolve(Some("k".into()), Some("DEMO_KEY")),
            Credential::Configured("k".into())
        );
        assert_eq!(
            Credential::resolve(None, Some("DEMO_KEY")),
            Credential::Fallback("DEMO_KEY".into())
        );
        assert_eq!(Credential::resolve(None, None), Credential::Anonymous);
        assert_eq!(Credential::Anonymous.value(), None);
    }

    #[test]
    fn debug_never_prints_the_key() {
        let printed = format!("{:?}", Credential::Configured("secret".into()));
        assert!(!printed.contains("secret"));
    }

    #[test]
    fn retry_after_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("120"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(120)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }
}
