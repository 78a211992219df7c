pub(crate) fn default_voice() -> String {
    "nova".to_string()
}

pub(crate) fn default_playback_rate() -> f32 {
    1.0
}

pub(crate) fn default_volume() -> f32 {
    1.0
}

pub(crate) fn default_prefetch() -> bool {
    true
}

pub(crate) fn default_audio_poll_interval_ms() -> u64 {
    50
}

pub(crate) fn default_cache_capacity() -> usize {
    crate::narration::DEFAULT_CACHE_CAPACITY
}

pub(crate) fn default_progress_debounce_ms() -> u64 {
    2000
}

pub(crate) fn default_progress_store_dir() -> String {
    ".cache".to_string()
}

pub(crate) fn default_synthesis_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1/models/text-to-speech:generateSpeech".to_string()
}

pub(crate) fn default_synthesis_model() -> String {
    "models/text-to-speech".to_string()
}

pub(crate) fn default_synthesis_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

pub(crate) fn default_synthesis_audio_encoding() -> String {
    "MP3".to_string()
}

pub(crate) fn default_synthesis_timeout_secs() -> u64 {
    30
}

pub(crate) fn default_log_level() -> crate::config::LogLevel {
    crate::config::LogLevel::Info
}
