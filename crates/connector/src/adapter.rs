//! Source adapter capability interface.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use skyfeed_core::{IngestError, Item};

/// One page of normalized items plus the cursor for the next page.
#[derive(Debug, Clone, Default)]
pub struct FetchPage {
    pub items: Vec<Item>,
    pub next_cursor: Option<String>,
}

impl FetchPage {
    pub fn last(items: Vec<Item>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

/// Fetches one external API and maps its records into [`Item`]s.
///
/// Adapters never touch the store. Failures must be classified as
/// [`IngestError::Transient`], [`IngestError::RateLimited`] or
/// [`IngestError::Permanent`] so the retry policy can act on them.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Source name stamped on every item (the store partition).
    fn name(&self) -> &str;

    /// Fetch the page at `cursor`, or the first page when `None`.
    async fn fetch(&self, cursor: Option<&str>) -> Result<FetchPage, IngestError>;
}

/// Parse the timestamp shapes used by the upstream APIs: RFC 3339, naive
/// `YYYY-MM-DDTHH:MM:SS[.fff]` (taken as UTC) and plain dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_upstream_timestamp_shapes() {
        let rfc = parse_timestamp("2024-03-01T10:00:00+02:00").unwrap();
        assert_eq!(rfc.hour(), 8);

        let naive = parse_timestamp("2024-03-01T10:20:30.123456").unwrap();
        assert_eq!((naive.hour(), naive.minute(), naive.second()), (10, 20, 30));

        let date = parse_timestamp("2024-01-01").unwrap();
        assert_eq!((date.year(), date.hour()), (2024, 0));

        assert!(parse_timestamp("yesterday").is_none());
    }
}
