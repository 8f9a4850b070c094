//! NASA Astronomy Picture of the Day.
//!
//! `GET https://api.nasa.gov/planetary/apod?start_date=..&end_date=..&api_key=..`
//! returns one JSON object per day. Without a configured key the public
//! `DEMO_KEY` is used (30 requests/hour).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use serde_json::Value;

use skyfeed_core::{IngestError, Item, ScheduleEntry};

use crate::adapter::{parse_timestamp, FetchPage, SourceAdapter};
use crate::http::{Credential, CredentialPlacement, HttpSource};

pub const DEFAULT_BASE_URL: &str = "https://api.nasa.gov/planetary/apod";
pub const DEMO_KEY: &str = "DEMO_KEY";
pub const DATA_TYPE: &str = "apod";

pub struct ApodAdapter {
    source: String,
    base_url: String,
    /// Days looked back from today, inclusive of today.
    days: u64,
    http: HttpSource,
}

impl ApodAdapter {
    pub fn new(source: impl Into<String>, credential: Option<String>, timeout: Duration) -> Self {
        Self {
            source: source.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            days: 7,
            http: HttpSource::new(
                Credential::resolve(credential, Some(DEMO_KEY)),
                CredentialPlacement::Query("api_key".into()),
                timeout,
            ),
        }
    }

    pub fn from_entry(entry: &ScheduleEntry, timeout: Duration) -> Self {
        let mut adapter = Self::new(&entry.name, entry.credential(), timeout);
        if let Some(url) = entry.option("base_url") {
            adapter.base_url = url.to_string();
        }
        if let Some(days) = entry.option("days").and_then(|d| d.parse().ok()) {
            adapter.days = days;
        }
        adapter
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn credential(&self) -> &Credential {
        self.http.credential()
    }
}

#[async_trait]
impl SourceAdapter for ApodAdapter {
    fn name(&self) -> &str {
        &self.source
    }

    async fn fetch(&self, _cursor: Option<&str>) -> Result<FetchPage, IngestError> {
        let end = Utc::now().date_naive();
        let start = end
            .checked_sub_days(Days::new(self.days.saturating_sub(1)))
            .unwrap_or(end);
        let query = [
            ("start_date", start.format("%Y-%m-%d").to_string()),
            ("end_date", end.format("%Y-%m-%d").to_string()),
        ];
        let body = self.http.get_json(&self.base_url, &query).await?;
        Ok(FetchPage::last(normalize(&self.source, &body)?))
    }
}

/// Map an APOD response (single object or array) into items keyed `apod-<date>`.
pub fn normalize(source: &str, body: &Value) -> Result<Vec<Item>, IngestError> {
    let entries: Vec<&Value> = match body {
        Value::Array(entries) => entries.iter().collect(),
        Value::Object(_) => vec![body],
        _ => return Err(IngestError::permanent("APOD response is neither object nor array")),
    };

    entries
        .into_iter()
        .map(|entry| {
            let date = entry
                .get("date")
                .and_then(Value::as_str)
                .ok_or_else(|| IngestError::permanent("APOD entry without 'date'"))?;
            let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map_err(|e| IngestError::permanent(format!("APOD date '{date}': {e}")))?;
            let timestamp = parse_timestamp(date)
                .ok_or_else(|| IngestError::permanent(format!("APOD date '{date}' out of range")))?;
            Ok(Item::new(
                source,
                format!("apod-{}", day.format("%Y-%m-%d")),
                DATA_TYPE,
                timestamp,
                entry.clone(),
            ))
        })
        .collect()
}
