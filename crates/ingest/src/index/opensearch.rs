//! OpenSearch-backed index using external versioning.
//!
//! Every write is `PUT /<index>/_doc/<id>?version=<ts_millis>&version_type=external`.
//! OpenSearch rejects a version that is not strictly greater than the stored
//! one with `409 Conflict`, which maps to [`IndexWrite::Stale`]. The staleness
//! rule is therefore enforced by the index itself, even across processes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use skyfeed_core::ItemKey;

use super::{IndexDocument, IndexError, IndexWrite, SearchIndex};

pub struct OpenSearchIndex {
    client: Client,
    base_url: String,
    index: String,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct GetResponse {
    #[serde(rename = "_source")]
    source: IndexDocument,
}

#[derive(Deserialize)]
struct CountResponse {
    count: usize,
}

impl OpenSearchIndex {
    pub fn new(
        base_url: &str,
        index: &str,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
            username,
            password,
        }
    }

    /// `<base>/<index>/<segments...>` with every segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, IndexError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| IndexError::Config(format!("invalid OpenSearch URL '{}': {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| IndexError::Config(format!("OpenSearch URL '{}' cannot be a base", self.base_url)))?
            .pop_if_empty()
            .push(&self.index)
            .extend(segments);
        Ok(url)
    }

    fn doc_url(&self, key: &ItemKey) -> Result<Url, IndexError> {
        self.url(&["_doc", &key.to_string()])
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }

    /// Create the index with a `knn_vector` mapping if it does not exist yet.
    pub async fn ensure_index(&self, dimensions: usize) -> Result<(), IndexError> {
        let body = json!({
            "settings": { "index": { "knn": true } },
            "mappings": {
                "properties": {
                    "source": { "type": "keyword" },
                    "sort_key": { "type": "keyword" },
                    "data_type": { "type": "keyword" },
                    "timestamp": { "type": "date" },
                    "indexed_at": { "type": "date" },
                    "text": { "type": "text" },
                    "payload": { "type": "object", "enabled": false },
                    "embedding": { "type": "knn_vector", "dimension": dimensions }
                }
            }
        });
        let response = self
            .authed(self.client.put(self.url(&[])?))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            info!(index = %self.index, dimensions, "created OpenSearch index");
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && text.contains("resource_already_exists_exception") {
            debug!(index = %self.index, "OpenSearch index already exists");
            return Ok(());
        }
        Err(IndexError::Api {
            status: status.as_u16(),
            body: text,
        })
    }
}

#[async_trait]
impl SearchIndex for OpenSearchIndex {
    async fn upsert(&self, doc: IndexDocument) -> Result<IndexWrite, IndexError> {
        let mut url = self.doc_url(&doc.key())?;
        url.query_pairs_mut()
            .append_pair("version", &doc.version().to_string())
            .append_pair("version_type", "external");

        let response = self.authed(self.client.put(url)).json(&doc).send().await?;
        match response.status() {
            s if s.is_success() => Ok(IndexWrite::Written),
            StatusCode::CONFLICT => {
                debug!(key = %doc.key(), version = doc.version(), "index holds same or newer version");
                Ok(IndexWrite::Stale)
            }
            s => Err(IndexError::Api {
                status: s.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn get(&self, source: &str, sort_key: &str) -> Result<Option<IndexDocument>, IndexError> {
        let url = self.doc_url(&ItemKey::new(source, sort_key))?;
        let response = self.authed(self.client.get(url)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let parsed: GetResponse = response
                    .json()
                    .await
                    .map_err(|e| IndexError::Malformed(e.to_string()))?;
                Ok(Some(parsed.source))
            }
            s => Err(IndexError::Api {
                status: s.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let response = self.authed(self.client.get(self.url(&["_count"])?)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IndexError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let parsed: CountResponse = response
            .json()
            .await
            .map_err(|e| IndexError::Malformed(e.to_string()))?;
        Ok(parsed.count)
    }
}
