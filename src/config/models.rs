use super::{
    MAX_AUDIO_POLL_INTERVAL_MS, MAX_PLAYBACK_RATE, MAX_PROGRESS_DEBOUNCE_MS, MAX_VOLUME,
    MIN_PLAYBACK_RATE, MIN_VOLUME, SUPPORTED_VOICES,
};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

/// High-level app configuration; deserializable from TOML.
#[derive(Debug, Clone, Deserialize, serde::Serialize, PartialEq)]
pub struct AppConfig {
    #[serde(default = "crate::config::defaults::default_log_level")]
    pub log_level: LogLevel,
    #[serde(default = "crate::config::defaults::default_voice")]
    pub voice: String,
    #[serde(default = "crate::config::defaults::default_playback_rate")]
    pub playback_rate: f32,
    #[serde(default = "crate::config::defaults::default_volume")]
    pub volume: f32,
    #[serde(default = "crate::config::defaults::default_prefetch")]
    pub prefetch: bool,
    #[serde(default = "crate::config::defaults::default_audio_poll_interval_ms")]
    pub audio_poll_interval_ms: u64,
    #[serde(default = "crate::config::defaults::default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "crate::config::defaults::default_progress_debounce_ms")]
    pub progress_debounce_ms: u64,
    #[serde(default = "crate::config::defaults::default_progress_store_dir")]
    pub progress_store_dir: String,
    #[serde(default = "crate::config::defaults::default_synthesis_endpoint")]
    pub synthesis_endpoint: String,
    #[serde(default = "crate::config::defaults::default_synthesis_model")]
    pub synthesis_model: String,
    #[serde(default = "crate::config::defaults::default_synthesis_api_key_env")]
    pub synthesis_api_key_env: String,
    #[serde(default = "crate::config::defaults::default_synthesis_audio_encoding")]
    pub synthesis_audio_encoding: String,
    #[serde(default = "crate::config::defaults::default_synthesis_timeout_secs")]
    pub synthesis_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            log_level: crate::config::defaults::default_log_level(),
            voice: crate::config::defaults::default_voice(),
            playback_rate: crate::config::defaults::default_playback_rate(),
            volume: crate::config::defaults::default_volume(),
            prefetch: crate::config::defaults::default_prefetch(),
            audio_poll_interval_ms: crate::config::defaults::default_audio_poll_interval_ms(),
            cache_capacity: crate::config::defaults::default_cache_capacity(),
            progress_debounce_ms: crate::config::defaults::default_progress_debounce_ms(),
            progress_store_dir: crate::config::defaults::default_progress_store_dir(),
            synthesis_endpoint: crate::config::defaults::default_synthesis_endpoint(),
            synthesis_model: crate::config::defaults::default_synthesis_model(),
            synthesis_api_key_env: crate::config::defaults::default_synthesis_api_key_env(),
            synthesis_audio_encoding: crate::config::defaults::default_synthesis_audio_encoding(),
            synthesis_timeout_secs: crate::config::defaults::default_synthesis_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Clamp out-of-range values and replace unknown voices, logging each fix.
    pub fn normalized(mut self) -> Self {
        let rate = self.playback_rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE);
        if rate != self.playback_rate {
            warn!(configured = self.playback_rate, used = rate, "Clamped playback rate");
            self.playback_rate = rate;
        }
        let volume = self.volume.clamp(MIN_VOLUME, MAX_VOLUME);
        if volume != self.volume {
            warn!(configured = self.volume, used = volume, "Clamped volume");
            self.volume = volume;
        }
        if self.cache_capacity == 0 {
            warn!("Cache capacity must be at least 1");
            self.cache_capacity = 1;
        }
        if self.audio_poll_interval_ms == 0 {
            self.audio_poll_interval_ms = crate::config::defaults::default_audio_poll_interval_ms();
        }
        if self.audio_poll_interval_ms > MAX_AUDIO_POLL_INTERVAL_MS {
            warn!(
                configured = self.audio_poll_interval_ms,
                used = MAX_AUDIO_POLL_INTERVAL_MS,
                "Clamped audio poll interval"
            );
            self.audio_poll_interval_ms = MAX_AUDIO_POLL_INTERVAL_MS;
        }
        if self.progress_debounce_ms > MAX_PROGRESS_DEBOUNCE_MS {
            warn!(
                configured = self.progress_debounce_ms,
                used = MAX_PROGRESS_DEBOUNCE_MS,
                "Clamped progress debounce"
            );
            self.progress_debounce_ms = MAX_PROGRESS_DEBOUNCE_MS;
        }
        if !SUPPORTED_VOICES.contains(&self.voice.as_str()) {
            warn!(voice = %self.voice, "Unknown voice; using default");
            self.voice = crate::config::defaults::default_voice();
        }
        self
    }

    pub fn progress_debounce(&self) -> Duration {
        Duration::from_millis(self.progress_debounce_ms)
    }

    pub fn audio_poll_interval(&self) -> Duration {
        Duration::from_millis(self.audio_poll_interval_ms)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }
}

/// Supported logging verbosity levels.
#[derive(Debug, Clone, Copy, Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter_str())
    }
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
