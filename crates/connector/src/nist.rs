//! NIST National Vulnerability Database, CVE API 2.0.
//!
//! Pages through CVEs modified within a look-back window using
//! `startIndex`/`resultsPerPage`. The window is fixed when the first page is
//! fetched and travels in the cursor, so every page of one walk indexes the
//! same result set. The key goes in the `apiKey` header; without one the API
//! is used anonymously at a lower rate limit.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use skyfeed_core::{IngestError, Item, ScheduleEntry};

use crate::adapter::{parse_timestamp, FetchPage, SourceAdapter};
use crate::http::{Credential, CredentialPlacement, HttpSource};

pub const DEFAULT_BASE_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";
pub const DATA_TYPE: &str = "cve";
/// Largest page the API accepts.
pub const MAX_PAGE_SIZE: u32 = 2000;

pub struct NvdAdapter {
    source: String,
    base_url: String,
    page_size: u32,
    lookback: chrono::Duration,
    http: HttpSource,
}

impl NvdAdapter {
    pub fn new(source: impl Into<String>, credential: Option<String>, timeout: Duration) -> Self {
        Self {
            source: source.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: 200,
            lookback: chrono::Duration::days(1),
            http: HttpSource::new(
                Credential::resolve(credential, None),
                CredentialPlacement::Header("apiKey".into()),
                timeout,
            ),
        }
    }

    pub fn from_entry(entry: &ScheduleEntry, timeout: Duration) -> Self {
        let mut adapter = Self::new(&entry.name, entry.credential(), timeout);
        if let Some(url) = entry.option("base_url") {
            adapter.base_url = url.to_string();
        }
        if let Some(size) = entry.option("page_size").and_then(|s| s.parse::<u32>().ok()) {
            adapter.page_size = size.clamp(1, MAX_PAGE_SIZE);
        }
        if let Some(hours) = entry.option("lookback_hours").and_then(|h| h.parse::<i64>().ok()) {
            adapter.lookback = chrono::Duration::hours(hours.max(1));
        }
        adapter
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn credential(&self) -> &Credential {
        self.http.credential()
    }

    /// First page of a walk over CVEs modified in the look-back window ending at `now`.
    fn first_page(&self, now: DateTime<Utc>) -> NvdCursor {
        let fmt = "%Y-%m-%dT%H:%M:%S%.3f+00:00";
        NvdCursor {
            start_index: 0,
            from: (now - self.lookback).format(fmt).to_string(),
            to: now.format(fmt).to_string(),
        }
    }
}

/// Position in one walk: `startIndex|lastModStartDate|lastModEndDate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvdCursor {
    pub start_index: u64,
    pub from: String,
    pub to: String,
}

impl NvdCursor {
    pub fn parse(raw: &str) -> Result<Self, IngestError> {
        let invalid = || IngestError::permanent(format!("invalid NVD cursor '{raw}'"));
        let mut parts = raw.splitn(3, '|');
        let start_index = parts
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(invalid)?;
        match (parts.next(), parts.next()) {
            (Some(from), Some(to)) if !from.is_empty() && !to.is_empty() => Ok(Self {
                start_index,
                from: from.to_string(),
                to: to.to_string(),
            }),
            _ => Err(invalid()),
        }
    }

    fn at(&self, start_index: u64) -> Self {
        Self {
            start_index,
            ..self.clone()
        }
    }
}

impl fmt::Display for NvdCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.start_index, self.from, self.to)
    }
}

#[async_trait]
impl SourceAdapter for NvdAdapter {
    fn name(&self) -> &str {
        &self.source
    }

    async fn fetch(&self, cursor: Option<&str>) -> Result<FetchPage, IngestError> {
        let position = match cursor {
            Some(c) => NvdCursor::parse(c)?,
            None => self.first_page(Utc::now()),
        };
        let query = [
            ("lastModStartDate", position.from.clone()),
            ("lastModEndDate", position.to.clone()),
            ("startIndex", position.start_index.to_string()),
            ("resultsPerPage", self.page_size.to_string()),
        ];
        let body = self.http.get_json(&self.base_url, &query).await?;
        normalize(&self.source, &body, &position)
    }
}

/// Map one CVE API page into items keyed by CVE id, timestamped at
/// `lastModified`. The next cursor keeps `position`'s window and moves to
/// the following `startIndex`, if any.
pub fn normalize(
    source: &str,
    body: &Value,
    position: &NvdCursor,
) -> Result<FetchPage, IngestError> {
    let vulnerabilities = body
        .get("vulnerabilities")
        .and_then(Value::as_array)
        .ok_or_else(|| IngestError::permanent("NVD response without 'vulnerabilities' array"))?;
    let total = body
        .get("totalResults")
        .and_then(Value::as_u64)
        .ok_or_else(|| IngestError::permanent("NVD response without 'totalResults'"))?;
    let start = body
        .get("startIndex")
        .and_then(Value::as_u64)
        .unwrap_or(position.start_index);

    let items = vulnerabilities
        .iter()
        .map(|entry| {
            let cve = entry
                .get("cve")
                .ok_or_else(|| IngestError::permanent("NVD entry without 'cve'"))?;
            let id = cve
                .get("id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| IngestError::permanent("NVD entry without 'cve.id'"))?;
            let modified = cve
                .get("lastModified")
                .or_else(|| cve.get("published"))
                .and_then(Value::as_str)
                .and_then(parse_timestamp)
                .ok_or_else(|| IngestError::permanent(format!("{id}: missing or bad lastModified")))?;
            Ok(Item::new(source, id, DATA_TYPE, modified, cve.clone()))
        })
        .collect::<Result<Vec<_>, IngestError>>()?;

    let next = start + vulnerabilities.len() as u64;
    let next_cursor =
        (!vulnerabilities.is_empty() && next < total).then(|| position.at(next).to_string());
    Ok(FetchPage { items, next_cursor })
}
