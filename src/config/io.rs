use super::models::AppConfig;
use super::tables::ConfigTables;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Load configuration from the given path, falling back to defaults on error.
pub fn load_config(path: &Path) -> AppConfig {
    let contents = match fs::read_to_string(path) {
        Ok(data) => {
            info!(path = %path.display(), "Loaded base config");
            data
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                "Falling back to default config: {err}"
            );
            return AppConfig::default();
        }
    };

    match parse_config(&contents) {
        Ok(cfg) => {
            debug!("Parsed configuration from disk");
            cfg
        }
        Err(err) => {
            warn!(path = %path.display(), "Invalid config TOML: {err}");
            AppConfig::default()
        }
    }
}

/// Parse the tabled TOML layout into a normalized [`AppConfig`].
pub fn parse_config(contents: &str) -> Result<AppConfig, toml::de::Error> {
    let tables: ConfigTables = toml::from_str(contents)?;
    Ok(AppConfig::from(tables).normalized())
}

pub fn serialize_config(config: &AppConfig) -> Result<String, toml::ser::Error> {
    toml::to_string(&ConfigTables::from(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn empty_file_yields_defaults() {
        assert_eq!(parse_config("").unwrap(), AppConfig::default());
    }

    #[test]
    fn tables_map_onto_flat_config() {
        let cfg = parse_config(
            r#"
[logging]
log_level = "debug"

[narration]
voice = "onyx"
playback_rate = 1.5

[cache]
capacity = 12

[progress]
debounce_ms = 500
"#,
        )
        .unwrap();
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert_eq!(cfg.voice, "onyx");
        assert_eq!(cfg.playback_rate, 1.5);
        assert_eq!(cfg.cache_capacity, 12);
        assert_eq!(cfg.progress_debounce_ms, 500);
        assert_eq!(cfg.volume, 1.0);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let cfg = parse_config(
            r#"
[narration]
voice = "robot"
playback_rate = 12.0
volume = -1.0

[cache]
capacity = 0
"#,
        )
        .unwrap();
        assert_eq!(cfg.voice, "nova");
        assert_eq!(cfg.playback_rate, crate::config::MAX_PLAYBACK_RATE);
        assert_eq!(cfg.volume, crate::config::MIN_VOLUME);
        assert_eq!(cfg.cache_capacity, 1);
    }

    #[test]
    fn oversized_durations_are_clamped() {
        let cfg = parse_config(
            r#"
[narration]
audio_poll_interval_ms = 9223372036854775807

[progress]
debounce_ms = 9223372036854775807
"#,
        )
        .unwrap();
        assert_eq!(
            cfg.audio_poll_interval_ms,
            crate::config::MAX_AUDIO_POLL_INTERVAL_MS
        );
        assert_eq!(
            cfg.progress_debounce_ms,
            crate::config::MAX_PROGRESS_DEBOUNCE_MS
        );
        let now = std::time::Instant::now();
        assert!(now.checked_add(cfg.progress_debounce()).is_some());
        assert!(now.checked_add(cfg.audio_poll_interval()).is_some());
    }

    #[test]
    fn serialized_config_parses_back() {
        let mut cfg = AppConfig::default();
        cfg.voice = "fable".into();
        cfg.progress_store_dir = "/tmp/narrator".into();
        let text = serialize_config(&cfg).unwrap();
        assert!(text.contains("[synthesis]"));
        assert_eq!(parse_config(&text).unwrap(), cfg);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("absent.toml"));
        assert_eq!(cfg, AppConfig::default());
    }
}
