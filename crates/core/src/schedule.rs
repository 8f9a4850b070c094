//! Per-source schedule definitions loaded from `sources.toml`.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::item::KEY_SEPARATOR;

/// Upper bound of the flexible trigger window.
pub const MAX_FLEXIBLE_WINDOW_SECS: u64 = 15 * 60;

/// Schedule of one source adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Source name; also the store partition key.
    pub name: String,
    /// Adapter implementation to bind. Defaults to `name`.
    #[serde(default)]
    pub adapter: Option<String>,
    /// `rate(<n> <unit>)` or a 5/6-field cron expression.
    pub cadence: String,
    /// Random delay window applied to each tick.
    #[serde(default = "default_window_secs")]
    pub flexible_window_secs: u64,
    /// Concurrent runs allowed for this source. Only 1 is accepted.
    #[serde(default = "default_reserved_concurrency")]
    pub reserved_concurrency: u32,
    /// Cursor pages followed in one run.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Environment variable holding the adapter credential.
    #[serde(default)]
    pub credential_env: Option<String>,
    /// Adapter-specific options (e.g. CelesTrak group, NVD page size).
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

fn default_window_secs() -> u64 {
    MAX_FLEXIBLE_WINDOW_SECS
}

fn default_reserved_concurrency() -> u32 {
    1
}

fn default_max_pages() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

impl ScheduleEntry {
    pub fn new(name: impl Into<String>, cadence: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            adapter: None,
            cadence: cadence.into(),
            flexible_window_secs: default_window_secs(),
            reserved_concurrency: default_reserved_concurrency(),
            max_pages: default_max_pages(),
            enabled: true,
            credential_env: None,
            options: BTreeMap::new(),
        }
    }

    pub fn adapter_name(&self) -> &str {
        self.adapter.as_deref().unwrap_or(&self.name)
    }

    /// Flexible window, clamped to the 15 minute maximum.
    pub fn flexible_window(&self) -> Duration {
        Duration::from_secs(self.flexible_window_secs.min(MAX_FLEXIBLE_WINDOW_SECS))
    }

    /// Resolve the credential from the configured environment variable.
    pub fn credential(&self) -> Option<String> {
        self.credential_env
            .as_deref()
            .and_then(|key| std::env::var(key).ok())
            .filter(|v| !v.is_empty())
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// Top-level shape of `sources.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesFile {
    #[serde(default, rename = "source")]
    pub sources: Vec<ScheduleEntry>,
}

impl SourcesFile {
    /// Parse from a TOML string, applying env overrides and validating.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut file: Self = toml::from_str(toml_str)?;
        file.apply_env_overrides();
        file.validate()?;
        Ok(file)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Load from `path` if it exists, otherwise fall back to [`SourcesFile::builtin`].
    pub fn load_or_builtin(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::info!(path = %path.display(), "sources file not found, using built-in schedule");
            let mut file = Self::builtin();
            file.apply_env_overrides();
            file.validate()?;
            Ok(file)
        }
    }

    /// Default schedule for the bundled adapters.
    pub fn builtin() -> Self {
        let mut nasa = ScheduleEntry::new("nasa", "rate(1 day)");
        nasa.credential_env = Some("NASA_API_KEY".into());
        nasa.max_pages = 1;

        let mut space = ScheduleEntry::new("space", "rate(6 hours)");
        space.options.insert("group".into(), "stations".into());
        space.max_pages = 1;

        let mut nist = ScheduleEntry::new("nist", "0 */2 * * *");
        nist.credential_env = Some("NVD_API_KEY".into());

        Self {
            sources: vec![nasa, space, nist],
        }
    }

    /// `SKYFEED_SOURCE_<NAME>_CADENCE` and `SKYFEED_SOURCE_<NAME>_ENABLED`
    /// override the file values.
    fn apply_env_overrides(&mut self) {
        for entry in &mut self.sources {
            let prefix = format!("SKYFEED_SOURCE_{}", entry.name.to_uppercase().replace('-', "_"));
            if let Ok(v) = std::env::var(format!("{prefix}_CADENCE")) {
                entry.cadence = v;
            }
            if let Ok(v) = std::env::var(format!("{prefix}_ENABLED")) {
                entry.enabled = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for entry in &self.sources {
            if entry.name.trim().is_empty() {
                return Err(ConfigError::Invalid("source name must not be empty".into()));
            }
            if entry.name.contains(KEY_SEPARATOR) {
                return Err(ConfigError::Invalid(format!(
                    "source '{}': name must not contain '{KEY_SEPARATOR}'",
                    entry.name
                )));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate source '{}'", entry.name)));
            }
            if entry.reserved_concurrency != 1 {
                return Err(ConfigError::Invalid(format!(
                    "source '{}': reserved_concurrency must be 1, got {}",
                    entry.name, entry.reserved_concurrency
                )));
            }
            if entry.cadence.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("source '{}': empty cadence", entry.name)));
            }
        }
        Ok(())
    }

    pub fn enabled(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn get(&self, name: &str) -> Option<&ScheduleEntry> {
        self.sources.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_defaults() {
        let file = SourcesFile::from_toml(
            r#"
            [[source]]
            name = "nasa-test-defaults"
            cadence = "rate(1 day)"
            "#,
        )
        .unwrap();
        let entry = &file.sources[0];
        assert_eq!(entry.adapter_name(), "nasa-test-defaults");
        assert_eq!(entry.flexible_window(), Duration::from_secs(900));
        assert_eq!(entry.reserved_concurrency, 1);
        assert_eq!(entry.max_pages, 10);
        assert!(entry.enabled);
    }

    #[test]
    fn window_is_clamped() {
        let mut entry = ScheduleEntry::new("x", "rate(1 hour)");
        entry.flexible_window_secs = 7_200;
        assert_eq!(entry.flexible_window(), Duration::from_secs(900));
    }

    #[test]
    fn options_and_adapter_override() {
        let file = SourcesFile::from_toml(
            r#"
            [[source]]
            name = "weather-sats"
            adapter = "space"
            cadence = "0 */6 * * *"
            flexible_window_secs = 60

            [source.options]
            group = "weather"
            "#,
        )
        .unwrap();
        let entry = file.get("weather-sats").unwrap();
        assert_eq!(entry.adapter_name(), "space");
        assert_eq!(entry.option("group"), Some("weather"));
        assert_eq!(entry.flexible_window(), Duration::from_secs(60));
    }

    #[test]
    fn rejects_duplicate_sources() {
        let result = SourcesFile::from_toml(
            r#"
            [[source]]
            name = "dup"
            cadence = "rate(1 hour)"
            [[source]]
            name = "dup"
            cadence = "rate(2 hours)"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_key_separator_in_name() {
        let result = SourcesFile::from_toml(
            r#"
            [[source]]
            name = "nasa#apod"
            cadence = "rate(1 hour)"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("must not contain '#'")));
    }

    #[test]
    fn rejects_concurrency_above_one() {
        let result = SourcesFile::from_toml(
            r#"
            [[source]]
            name = "greedy"
            cadence = "rate(1 hour)"
            reserved_concurrency = 2
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn builtin_covers_bundled_adapters() {
        let file = SourcesFile::builtin();
        file.validate().unwrap();
        let names: Vec<&str> = file.sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["nasa", "space", "nist"]);
    }

    #[test]
    fn load_or_builtin_falls_back_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let file = SourcesFile::load_or_builtin(dir.path().join("absent.toml")).unwrap();
        assert_eq!(file.sources.len(), 3);
    }
}
