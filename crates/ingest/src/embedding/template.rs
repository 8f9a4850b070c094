use serde_json::Value;

use skyfeed_core::Item;

/// Longest free-text field carried into the embedding text.
const MAX_PROSE_CHARS: usize = 1_000;

/// Convert an item to its text representation for embedding.
pub fn item_to_text(item: &Item) -> String {
    match item.data_type.as_str() {
        "apod" => format_apod(item),
        "tle" => format_tle(item),
        "cve" => format_cve(item),
        _ => format_generic(item),
    }
}

fn field_str(item: &Item, key: &str) -> String {
    match item.payload.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_PROSE_CHARS).collect()
}

fn format_apod(item: &Item) -> String {
    format!(
        "APOD date:{} title:{} media:{} copyright:{} {}",
        field_str(item, "date"),
        field_str(item, "title"),
        field_str(item, "media_type"),
        field_str(item, "copyright").trim(),
        truncate(&field_str(item, "explanation")),
    )
}

fn format_tle(item: &Item) -> String {
    format!(
        "TLE object:{} norad:{} intl:{} epoch:{} inclination:{} eccentricity:{} mean_motion:{}",
        field_str(item, "OBJECT_NAME"),
        field_str(item, "NORAD_CAT_ID"),
        field_str(item, "OBJECT_ID"),
        field_str(item, "EPOCH"),
        field_str(item, "INCLINATION"),
        field_str(item, "ECCENTRICITY"),
        field_str(item, "MEAN_MOTION"),
    )
}

fn format_cve(item: &Item) -> String {
    let description = item
        .payload
        .get("descriptions")
        .and_then(Value::as_array)
        .and_then(|descs| {
            descs
                .iter()
                .find(|d| d.get("lang").and_then(Value::as_str) == Some("en"))
                .or_else(|| descs.first())
        })
        .and_then(|d| d.get("value"))
        .and_then(Value::as_str)
        .unwrap_or("");

    format!(
        "CVE {} status:{} published:{} modified:{} {}",
        field_str(item, "id"),
        field_str(item, "vulnStatus"),
        field_str(item, "published"),
        field_str(item, "lastModified"),
        truncate(description),
    )
}

fn format_generic(item: &Item) -> String {
    let payload = truncate(&item.payload.to_string());
    format!(
        "{} source:{} key:{} {}",
        item.data_type, item.source, item.sort_key, payload
    )
}
