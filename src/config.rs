//! Layered configuration: built-in defaults, then an optional TOML file,
//! then environment variables.
//!
//! Grounded on the teacher's `etcetera::choose_base_strategy()` use in
//! `src/system.rs::System::new` for locating platform directories; the
//! file format itself follows the sibling pack's `toml_edit` convention
//! (`theturboturnip-turnip_music2`) rather than the teacher's (which has no
//! config file at all).

use camino::Utf8PathBuf;
use color_eyre::Result;
use color_eyre::eyre::Context;
use etcetera::BaseStrategy;
use serde::Deserialize;

const APP_NAME: &str = "mpdcol";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub cache_profile: String,
    pub collections_file: Option<Utf8PathBuf>,
    pub enable_command: bool,
    pub lastfm_api_key: Option<String>,
    pub min_similarity: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6600,
            password: None,
            cache_profile: "default".to_string(),
            collections_file: None,
            enable_command: false,
            lastfm_api_key: None,
            min_similarity: 0.30,
        }
    }
}

impl Config {
    /// Load defaults, overlay the TOML config file if present, overlay
    /// environment variables. Never fails outright: a missing or
    /// unreadable config file just falls back to defaults (with a
    /// warning), matching the cache's "I/O failure is a warning" policy.
    pub fn load() -> Result<Self> {
        let dirs = etcetera::choose_base_strategy().wrap_err("could not resolve base dirs")?;
        let mut config = Self::default();

        let config_path = dirs.config_dir().join(APP_NAME).join("config.toml");
        if config_path.is_file() {
            match std::fs::read_to_string(&config_path) {
                Ok(raw) => match toml_edit::de::from_str::<PartialConfig>(&raw) {
                    Ok(partial) => partial.apply(&mut config),
                    Err(e) => {
                        crate::warning!("could not parse config file {config_path:?}: {e}");
                    }
                },
                Err(e) => {
                    crate::warning!("could not read config file {config_path:?}: {e}");
                }
            }
        }

        config.apply_env();

        if config.collections_file.is_none() {
            let path = dirs.config_dir().join(APP_NAME).join("collections");
            config.collections_file = Some(Utf8PathBuf::from_path_buf(path).unwrap_or_else(
                |p| Utf8PathBuf::from(p.to_string_lossy().into_owned()),
            ));
        }

        Ok(config)
    }

    pub fn cache_dir(&self) -> Result<Utf8PathBuf> {
        let dirs = etcetera::choose_base_strategy().wrap_err("could not resolve base dirs")?;
        let path = dirs.cache_dir().join(APP_NAME);
        Ok(Utf8PathBuf::from_path_buf(path)
            .unwrap_or_else(|p| Utf8PathBuf::from(p.to_string_lossy().into_owned())))
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("MPDCOL_HOST") {
            self.host = v;
        }
        if let Ok(v) = std::env::var("MPDCOL_PORT") {
            if let Ok(port) = v.parse() {
                self.port = port;
            } else {
                crate::warning!("MPDCOL_PORT is not a valid port number: {v}");
            }
        }
        if let Ok(v) = std::env::var("MPDCOL_PASSWORD") {
            self.password = Some(v);
        }
        if let Ok(v) = std::env::var("MPDCOL_COLLECTIONS_FILE") {
            self.collections_file = Some(Utf8PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("MPDCOL_ENABLE_COMMAND") {
            self.enable_command = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("MPDCOL_LASTFM_API_KEY") {
            self.lastfm_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("MPDCOL_MIN_SIMILARITY") {
            if let Ok(min) = v.parse() {
                self.min_similarity = min;
            } else {
                crate::warning!("MPDCOL_MIN_SIMILARITY is not a valid number: {v}");
            }
        }
    }
}

/// Deserialize target for the config file: every field optional so a
/// partial file only overrides what it mentions.
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    host: Option<String>,
    port: Option<u16>,
    password: Option<String>,
    cache_profile: Option<String>,
    collections_file: Option<Utf8PathBuf>,
    enable_command: Option<bool>,
    lastfm_api_key: Option<String>,
    min_similarity: Option<f64>,
}

impl PartialConfig {
    fn apply(self, config: &mut Config) {
        if let Some(v) = self.host {
            config.host = v;
        }
        if let Some(v) = self.port {
            config.port = v;
        }
        if let Some(v) = self.password {
            config.password = Some(v);
        }
        if let Some(v) = self.cache_profile {
            config.cache_profile = v;
        }
        if let Some(v) = self.collections_file {
            config.collections_file = Some(v);
        }
        if let Some(v) = self.enable_command {
            config.enable_command = v;
        }
        if let Some(v) = self.lastfm_api_key {
            config.lastfm_api_key = Some(v);
        }
        if let Some(v) = self.min_similarity {
            config.min_similarity = v;
        }
    }
}
