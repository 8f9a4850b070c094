//! JSONL snapshot of live items.
//!
//! Written atomically (temp file + rename) so a crash mid-write leaves the
//! previous snapshot intact. Malformed lines are skipped with a warning on load.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use tracing::{info, warn};

use skyfeed_core::Item;

use crate::error::StoreError;

/// Write `items` to `path`, one JSON object per line.
pub fn save(path: &Path, items: &[Item]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut file = std::io::BufWriter::new(std::fs::File::create(&tmp)?);
        for item in items {
            serde_json::to_writer(&mut file, item)?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    info!(path = %path.display(), items = items.len(), "store snapshot written");
    Ok(())
}

/// Read a snapshot. A missing file is an empty snapshot.
pub fn load(path: &Path) -> Result<Vec<Item>, StoreError> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut items = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Item>(&line) {
            Ok(item) => items.push(item),
            Err(e) => warn!(
                path = %path.display(),
                line = line_no + 1,
                error = %e,
                "skipping malformed snapshot line"
            ),
        }
    }
    info!(path = %path.display(), items = items.len(), "store snapshot loaded");
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store").join("items.jsonl");
        let items = vec![
            Item::new("nasa", "apod-1", "apod", Utc::now(), serde_json::json!({ "title": "a" })),
            Item::new("space", "25544", "tle", Utc::now(), serde_json::json!({})).with_expiry(42),
        ];
        save(&path, &items).unwrap();
        assert_eq!(load(&path).unwrap(), items);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("nope.jsonl")).unwrap().is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.jsonl");
        let good = serde_json::to_string(&Item::new(
            "nist",
            "CVE-2024-0001",
            "cve",
            Utc::now(),
            serde_json::json!({}),
        ))
        .unwrap();
        std::fs::write(&path, format!("{good}\nnot json\n\n")).unwrap();
        assert_eq!(load(&path).unwrap().len(), 1);
    }
}
