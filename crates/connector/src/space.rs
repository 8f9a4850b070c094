//! CelesTrak general perturbations (orbital elements) for one satellite group.
//!
//! `GET https://celestrak.org/NORAD/elements/gp.php?GROUP=<group>&FORMAT=json`.
//! No credential. Element sets age quickly, so every item expires a fixed
//! time after its epoch.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use skyfeed_core::{IngestError, Item, ScheduleEntry};

use crate::adapter::{parse_timestamp, FetchPage, SourceAdapter};
use crate::http::{Credential, CredentialPlacement, HttpSource};

pub const DEFAULT_BASE_URL: &str = "https://celestrak.org/NORAD/elements/gp.php";
pub const DATA_TYPE: &str = "tle";
pub const DEFAULT_TTL: Duration = Duration::from_secs(14 * 24 * 3600);

pub struct CelestrakAdapter {
    source: String,
    base_url: String,
    group: String,
    ttl: Duration,
    http: HttpSource,
}

impl CelestrakAdapter {
    pub fn new(source: impl Into<String>, group: impl Into<String>, timeout: Duration) -> Self {
        Self {
            source: source.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            group: group.into(),
            ttl: DEFAULT_TTL,
            http: HttpSource::new(
                Credential::Anonymous,
                CredentialPlacement::Query("api_key".into()),
                timeout,
            ),
        }
    }

    pub fn from_entry(entry: &ScheduleEntry, timeout: Duration) -> Self {
        let mut adapter = Self::new(
            &entry.name,
            entry.option("group").unwrap_or("stations"),
            timeout,
        );
        if let Some(url) = entry.option("base_url") {
            adapter.base_url = url.to_string();
        }
        if let Some(days) = entry.option("ttl_days").and_then(|d| d.parse::<u64>().ok()) {
            adapter.ttl = Duration::from_secs(days * 24 * 3600);
        }
        adapter
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl SourceAdapter for CelestrakAdapter {
    fn name(&self) -> &str {
        &self.source
    }

    async fn fetch(&self, _cursor: Option<&str>) -> Result<FetchPage, IngestError> {
        let query = [("GROUP", self.group.clone()), ("FORMAT", "json".to_string())];
        let body = self.http.get_json(&self.base_url, &query).await?;
        Ok(FetchPage::last(normalize(&self.source, &body, self.ttl)?))
    }
}

/// Map a GP JSON array into items keyed by NORAD catalog number, timestamped
/// at the element-set epoch.
pub fn normalize(source: &str, body: &Value, ttl: Duration) -> Result<Vec<Item>, IngestError> {
    let records = body
        .as_array()
        .ok_or_else(|| IngestError::permanent("GP response is not an array"))?;

    records
        .iter()
        .map(|record| {
            let norad = match record.get("NORAD_CAT_ID") {
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
                _ => return Err(IngestError::permanent("GP record without NORAD_CAT_ID")),
            };
            let epoch_raw = record
                .get("EPOCH")
                .and_then(Value::as_str)
                .ok_or_else(|| IngestError::permanent(format!("GP record {norad} without EPOCH")))?;
            let epoch = parse_timestamp(epoch_raw).ok_or_else(|| {
                IngestError::permanent(format!("GP record {norad}: bad EPOCH '{epoch_raw}'"))
            })?;
            let expiry = epoch.timestamp() + ttl.as_secs() as i64;
            Ok(Item::new(source, norad, DATA_TYPE, epoch, record.clone()).with_expiry(expiry))
        })
        .collect()
}
