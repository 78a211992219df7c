use super::defaults;
use super::models::{AppConfig, LogLevel};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
pub(super) struct ConfigTables {
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    narration: NarrationConfig,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    progress: ProgressConfig,
    #[serde(default)]
    synthesis: SynthesisConfig,
}

impl From<ConfigTables> for AppConfig {
    fn from(tables: ConfigTables) -> Self {
        AppConfig {
            log_level: tables.logging.log_level,
            voice: tables.narration.voice,
            playback_rate: tables.narration.playback_rate,
            volume: tables.narration.volume,
            prefetch: tables.narration.prefetch,
            audio_poll_interval_ms: tables.narration.audio_poll_interval_ms,
            cache_capacity: tables.cache.capacity,
            progress_debounce_ms: tables.progress.debounce_ms,
            progress_store_dir: tables.progress.store_dir,
            synthesis_endpoint: tables.synthesis.endpoint,
            synthesis_model: tables.synthesis.model,
            synthesis_api_key_env: tables.synthesis.api_key_env,
            synthesis_audio_encoding: tables.synthesis.audio_encoding,
            synthesis_timeout_secs: tables.synthesis.timeout_secs,
        }
    }
}

impl From<&AppConfig> for ConfigTables {
    fn from(config: &AppConfig) -> Self {
        ConfigTables {
            logging: LoggingConfig {
                log_level: config.log_level,
            },
            narration: NarrationConfig {
                voice: config.voice.clone(),
                playback_rate: config.playback_rate,
                volume: config.volume,
                prefetch: config.prefetch,
                audio_poll_interval_ms: config.audio_poll_interval_ms,
            },
            cache: CacheConfig {
                capacity: config.cache_capacity,
            },
            progress: ProgressConfig {
                debounce_ms: config.progress_debounce_ms,
                store_dir: config.progress_store_dir.clone(),
            },
            synthesis: SynthesisConfig {
                endpoint: config.synthesis_endpoint.clone(),
                model: config.synthesis_model.clone(),
                api_key_env: config.synthesis_api_key_env.clone(),
                audio_encoding: config.synthesis_audio_encoding.clone(),
                timeout_secs: config.synthesis_timeout_secs,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct LoggingConfig {
    #[serde(default = "defaults::default_log_level")]
    log_level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: defaults::default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct NarrationConfig {
    #[serde(default = "defaults::default_voice")]
    voice: String,
    #[serde(default = "defaults::default_playback_rate")]
    playback_rate: f32,
    #[serde(default = "defaults::default_volume")]
    volume: f32,
    #[serde(default = "defaults::default_prefetch")]
    prefetch: bool,
    #[serde(default = "defaults::default_audio_poll_interval_ms")]
    audio_poll_interval_ms: u64,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        NarrationConfig {
            voice: defaults::default_voice(),
            playback_rate: defaults::default_playback_rate(),
            volume: defaults::default_volume(),
            prefetch: defaults::default_prefetch(),
            audio_poll_interval_ms: defaults::default_audio_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct CacheConfig {
    #[serde(default = "defaults::default_cache_capacity")]
    capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: defaults::default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct ProgressConfig {
    #[serde(default = "defaults::default_progress_debounce_ms")]
    debounce_ms: u64,
    #[serde(default = "defaults::default_progress_store_dir")]
    store_dir: String,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        ProgressConfig {
            debounce_ms: defaults::default_progress_debounce_ms(),
            store_dir: defaults::default_progress_store_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct SynthesisConfig {
    #[serde(default = "defaults::default_synthesis_endpoint")]
    endpoint: String,
    #[serde(default = "defaults::default_synthesis_model")]
    model: String,
    #[serde(default = "defaults::default_synthesis_api_key_env")]
    api_key_env: String,
    #[serde(default = "defaults::default_synthesis_audio_encoding")]
    audio_encoding: String,
    #[serde(default = "defaults::default_synthesis_timeout_secs")]
    timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        SynthesisConfig {
            endpoint: defaults::default_synthesis_endpoint(),
            model: defaults::default_synthesis_model(),
            api_key_env: defaults::default_synthesis_api_key_env(),
            audio_encoding: defaults::default_synthesis_audio_encoding(),
            timeout_secs: defaults::default_synthesis_timeout_secs(),
        }
    }
}
