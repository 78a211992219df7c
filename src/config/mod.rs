//! Configuration loading for the narrator.
//!
//! All user-tunable settings are centralized here and loaded from
//! `conf/config.toml` if present. Any missing or invalid entries fall back to
//! sensible defaults so narration can still start.

mod defaults;
mod io;
mod models;
mod tables;

pub use io::{load_config, parse_config, serialize_config};
pub use models::{AppConfig, LogLevel};

pub const MIN_PLAYBACK_RATE: f32 = 0.5;
pub const MAX_PLAYBACK_RATE: f32 = 3.0;
pub const MIN_VOLUME: f32 = 0.0;
pub const MAX_VOLUME: f32 = 2.0;
pub const MAX_PROGRESS_DEBOUNCE_MS: u64 = 60_000;
pub const MAX_AUDIO_POLL_INTERVAL_MS: u64 = 1_000;

/// Voices the synthesis service offers.
pub const SUPPORTED_VOICES: [&str; 6] = ["echo", "onyx", "shimmer", "alloy", "fable", "nova"];
