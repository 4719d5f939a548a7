//! Settings source: JSON file + environment variable overrides (spec §6, §10.3).
//!
//! Re-read once per scheduler tick ("reload-per-tick settings source", spec
//! §4.13) so operators can retune thresholds without a restart.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Quality-enforcement mode (spec §4.3 step 5, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityEnforcement {
    Strict,
    Warn,
    #[default]
    Off,
}

impl std::str::FromStr for QualityEnforcement {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "warn" => Ok(Self::Warn),
            "off" => Ok(Self::Off),
            _ => Err(()),
        }
    }
}

/// All tunables named in spec §6, with their documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub auto_supersede_enabled: bool,
    pub auto_supersede_threshold: f32,
    pub auto_supersede_upper: f32,
    pub dedup_threshold: f32,
    pub purge_enabled: bool,
    pub purge_retention_days: i64,
    pub rerank_skip_threshold: f32,
    pub on_write_max_relationships: usize,
    pub follows_max_gap_minutes: i64,
    pub cache_threshold: f32,

    // Environment-sourced knobs (spec §6), folded into the same struct so
    // the rest of the crate reads one source of truth.
    pub scheduler_enabled: bool,
    pub consolidation_interval_hours: i64,
    pub consolidation_older_than_days: i64,
    pub memory_archive_threshold: f64,
    pub memory_purge_threshold: f64,
    pub memory_purge_enabled: bool,
    pub memory_quality_enforcement: QualityEnforcement,
    pub memory_min_quality_score: f64,
    pub use_learned_fusion: bool,
    pub use_query_understanding: bool,
    pub session_consolidation_delay_hours: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_supersede_enabled: true,
            auto_supersede_threshold: 0.85,
            auto_supersede_upper: 0.91,
            dedup_threshold: 0.92,
            purge_enabled: false,
            purge_retention_days: 90,
            rerank_skip_threshold: 0.95,
            on_write_max_relationships: 5,
            follows_max_gap_minutes: 30,
            cache_threshold: 0.85,

            scheduler_enabled: true,
            consolidation_interval_hours: 24,
            consolidation_older_than_days: 7,
            memory_archive_threshold: 0.15,
            memory_purge_threshold: 0.05,
            memory_purge_enabled: false,
            memory_quality_enforcement: QualityEnforcement::Off,
            memory_min_quality_score: 0.75,
            use_learned_fusion: true,
            use_query_understanding: true,
            session_consolidation_delay_hours: 24,
        }
    }
}

impl Settings {
    /// Load from the JSON settings file if present, then apply environment
    /// variable overrides. Missing file or keys fall back to defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let mut settings = path
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|raw| match serde_json::from_str::<Settings>(&raw) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!("failed to parse settings file, using defaults: {e}");
                    None
                }
            })
            .unwrap_or_default();

        settings.apply_env_overrides();
        settings
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SCHEDULER_ENABLED") {
            self.scheduler_enabled = parse_bool(&v, self.scheduler_enabled);
        }
        if let Ok(v) = std::env::var("CONSOLIDATION_INTERVAL_HOURS") {
            if let Ok(n) = v.parse() {
                self.consolidation_interval_hours = n;
            }
        }
        if let Ok(v) = std::env::var("CONSOLIDATION_OLDER_THAN_DAYS") {
            if let Ok(n) = v.parse() {
                self.consolidation_older_than_days = n;
            }
        }
        if let Ok(v) = std::env::var("MEMORY_ARCHIVE_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.memory_archive_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("MEMORY_PURGE_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.memory_purge_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("MEMORY_PURGE_ENABLED") {
            self.memory_purge_enabled = parse_bool(&v, self.memory_purge_enabled);
        }
        if let Ok(v) = std::env::var("MEMORY_QUALITY_ENFORCEMENT") {
            if let Ok(mode) = v.parse() {
                self.memory_quality_enforcement = mode;
            }
        }
        if let Ok(v) = std::env::var("MEMORY_MIN_QUALITY_SCORE") {
            if let Ok(n) = v.parse() {
                self.memory_min_quality_score = n;
            }
        }
        if let Ok(v) = std::env::var("USE_LEARNED_FUSION") {
            self.use_learned_fusion = parse_bool(&v, self.use_learned_fusion);
        }
        if let Ok(v) = std::env::var("USE_QUERY_UNDERSTANDING") {
            self.use_query_understanding = parse_bool(&v, self.use_query_understanding);
        }
    }

    /// Default on-disk location for the settings file, platform-appropriate.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "engram", "core")
            .map(|dirs| dirs.config_dir().join("settings.json"))
    }
}

fn parse_bool(v: &str, fallback: bool) -> bool {
    match v.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let s = Settings::default();
        assert_eq!(s.dedup_threshold, 0.92);
        assert_eq!(s.auto_supersede_threshold, 0.85);
        assert_eq!(s.auto_supersede_upper, 0.91);
        assert_eq!(s.purge_retention_days, 90);
        assert_eq!(s.on_write_max_relationships, 5);
        assert_eq!(s.follows_max_gap_minutes, 30);
        assert_eq!(s.cache_threshold, 0.85);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let s = Settings::load(Some(Path::new("/nonexistent/settings.json")));
        assert_eq!(s.dedup_threshold, Settings::default().dedup_threshold);
    }

    #[test]
    fn partial_json_fills_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"dedupThreshold": 0.8}"#).unwrap();
        let s = Settings::load(Some(&path));
        assert_eq!(s.dedup_threshold, 0.8);
        assert_eq!(s.purge_retention_days, 90);
    }
}
