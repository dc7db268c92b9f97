//! Timing constants of the synchronization engine.
//!
//! None of these are invariants; they are tuning parameters and every one of
//! them can be overridden from a TOML file.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    /// Quiescence window applied to edits before compute and autosave.
    pub debounce_ms: u64,
    /// How long a finished computation shows 100% before resetting to 0.
    pub settle_ms: u64,
    pub progress_tick_ms: u64,
    pub progress_step: u8,
    /// Ceiling for simulated progress while the call is still in flight.
    pub progress_cap: u8,
    pub poll_interval_ms: u64,
    /// Extra coalescing delay between a settled edit and the remote save.
    pub autosave_delay_ms: u64,
    /// Autosave blackout after a load or reset completes.
    pub suppression_ms: u64,
    pub bootstrap_timeout_ms: u64,
    /// Time the CLI keeps the runtime alive for fire-and-forget termination writes.
    pub termination_grace_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 400,
            settle_ms: 500,
            progress_tick_ms: 100,
            progress_step: 10,
            progress_cap: 90,
            poll_interval_ms: 100,
            autosave_delay_ms: 500,
            suppression_ms: 1000,
            bootstrap_timeout_ms: 10_000,
            termination_grace_ms: 300,
        }
    }
}

impl SyncSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn autosave_delay(&self) -> Duration {
        Duration::from_millis(self.autosave_delay_ms)
    }

    pub fn suppression(&self) -> Duration {
        Duration::from_millis(self.suppression_ms)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    pub fn from_toml_str(content: &str) -> SyncResult<Self> {
        toml::from_str(content).map_err(|e| SyncError::Settings(e.to_string()))
    }

    pub fn to_toml_string(&self) -> SyncResult<String> {
        toml::to_string_pretty(self).map_err(|e| SyncError::Settings(e.to_string()))
    }

    /// Load settings from a TOML file and repair out-of-range values.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Settings(format!("failed to read {}: {}", path.display(), e))
        })?;
        let mut settings = Self::from_toml_str(&content)?;
        for warning in settings.validate_and_fix() {
            log::warn!("SETTINGS: {}", warning);
        }
        Ok(settings)
    }

    /// Repair values that would stall or break the pipeline. Returns one
    /// warning per repaired field.
    pub fn validate_and_fix(&mut self) -> Vec<String> {
        let defaults = Self::default();
        let mut warnings = Vec::new();

        if self.progress_step == 0 {
            warnings.push(format!(
                "progress_step must be positive, using {}",
                defaults.progress_step
            ));
            self.progress_step = defaults.progress_step;
        }

        if self.progress_cap > 100 {
            warnings.push(format!("progress_cap {} exceeds 100, clamping", self.progress_cap));
            self.progress_cap = 100;
        }

        if self.progress_tick_ms == 0 {
            warnings.push(format!(
                "progress_tick_ms must be positive, using {}",
                defaults.progress_tick_ms
            ));
            self.progress_tick_ms = defaults.progress_tick_ms;
        }

        if self.poll_interval_ms == 0 {
            warnings.push(format!(
                "poll_interval_ms must be positive, using {}",
                defaults.poll_interval_ms
            ));
            self.poll_interval_ms = defaults.poll_interval_ms;
        }

        if self.bootstrap_timeout_ms == 0 {
            warnings.push(format!(
                "bootstrap_timeout_ms must be positive, using {}",
                defaults.bootstrap_timeout_ms
            ));
            self.bootstrap_timeout_ms = defaults.bootstrap_timeout_ms;
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_editor_constants() {
        let settings = SyncSettings::default();
        assert_eq!(settings.debounce(), Duration::from_millis(400));
        assert_eq!(settings.settle(), Duration::from_millis(500));
        assert_eq!(settings.poll_interval(), Duration::from_millis(100));
        assert_eq!(settings.suppression(), Duration::from_secs(1));
        assert_eq!(settings.bootstrap_timeout(), Duration::from_secs(10));
        assert_eq!((settings.progress_step, settings.progress_cap), (10, 90));
    }

    #[test]
    fn test_partial_toml_overrides_single_fields() {
        let settings = SyncSettings::from_toml_str("debounce_ms = 250\nsuppression_ms = 2000\n").unwrap();
        assert_eq!(settings.debounce_ms, 250);
        assert_eq!(settings.suppression_ms, 2000);
        assert_eq!(settings.settle_ms, 500);
    }

    #[test]
    fn test_invalid_toml_is_a_settings_error() {
        let error = SyncSettings::from_toml_str("debounce_ms = \"soon\"").unwrap_err();
        assert!(matches!(error, SyncError::Settings(_)));
    }

    #[test]
    fn test_validate_and_fix_repairs_values() {
        let mut settings = SyncSettings {
            progress_step: 0,
            progress_cap: 150,
            poll_interval_ms: 0,
            ..SyncSettings::default()
        };

        let warnings = settings.validate_and_fix();

        assert_eq!(warnings.len(), 3);
        assert_eq!(settings.progress_step, 10);
        assert_eq!(settings.progress_cap, 100);
        assert_eq!(settings.poll_interval_ms, 100);
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let text = SyncSettings::default().to_toml_string().unwrap();
        assert!(text.contains("debounce_ms = 400"));
        assert_eq!(SyncSettings::from_toml_str(&text).unwrap(), SyncSettings::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beamsync.toml");
        std::fs::write(&path, "progress_cap = 120\nautosave_delay_ms = 50\n").unwrap();

        let settings = SyncSettings::load(&path).unwrap();

        assert_eq!(settings.progress_cap, 100);
        assert_eq!(settings.autosave_delay_ms, 50);
    }
}
