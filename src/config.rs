use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::translate::TranslationSettings;

pub const CONFIG_FILE: &str = "wakfulogger.toml";

/// Runtime configuration, loaded from `wakfulogger.toml` next to the
/// binary (or the path in `WAKFULOGGER_CONFIG`). Every field has a
/// default so a missing file just runs with the stock setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the game log to tail. A CLI argument overrides this.
    pub log_file: Option<PathBuf>,
    /// Directory holding the static reference tables (JSON).
    pub data_dir: PathBuf,
    /// HTTP port for the rendering collaborator.
    pub port: u16,
    /// Log poll cadence.
    pub poll_interval_ms: u64,
    /// Dedup cache size for the line classifier.
    pub dedup_cache_size: usize,
    /// Reset the live meter after this much combat silence.
    pub auto_reset: bool,
    pub reset_delay_secs: u64,
    /// Translation endpoint and language toggles.
    pub translation_endpoint: String,
    pub translation: TranslationSettings,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_file: None,
            data_dir: PathBuf::from("data"),
            port: 3000,
            poll_interval_ms: 1000,
            dedup_cache_size: 200,
            auto_reset: true,
            reset_delay_secs: 120,
            translation_endpoint: crate::translate::DEFAULT_ENDPOINT.to_string(),
            translation: TranslationSettings::default(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let path = std::env::var_os("WAKFULOGGER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
        match std::fs::read_to_string(&path) {
            Ok(text) => match toml::from_str(&text) {
                Ok(config) => config,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "config invalid, using defaults");
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.dedup_cache_size, 200);
        assert!(config.auto_reset);
        assert!(config.translation.enabled);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str("port = 4000\n[translation]\nes = true\nenabled = true\npt = true\nfr = true\nothers = false\n").unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.poll_interval_ms, 1000);
        assert!(config.translation.es);
    }
}
