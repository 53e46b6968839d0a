use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_ENV_VAR: &str = "ROUTINES_CONFIG_PATH";

pub const DEFAULT_MISSED_GRACE_DAYS: i64 = 2;
pub const DEFAULT_INTERVAL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Connection to the external task-tracking service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalConfig {
    pub base_url: String,
    pub api_token: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Offset from UTC used to anchor time-of-day preferences.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub external: Option<ExternalConfig>,
    #[serde(default = "default_missed_grace_days")]
    pub missed_grace_days: i64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            external: None,
            missed_grace_days: DEFAULT_MISSED_GRACE_DAYS,
            interval_secs: DEFAULT_INTERVAL_SECS,
            log_level: None,
        }
    }
}

impl Config {
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn external_timeout_secs(&self) -> u64 {
        self.external
            .as_ref()
            .map(|external| external.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
    }
}

fn default_missed_grace_days() -> i64 {
    DEFAULT_MISSED_GRACE_DAYS
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub error: Option<AppError>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub utc_offset_minutes: Option<i32>,
    pub missed_grace_days: Option<i64>,
    pub interval_secs: Option<u64>,
    pub log_level: Option<String>,
    pub external_base_url: Option<String>,
    pub external_api_token: Option<String>,
    pub external_project_id: Option<String>,
    pub external_timeout_secs: Option<u64>,
}

pub fn config_path() -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    if cfg!(windows) {
        let appdata =
            std::env::var("APPDATA").map_err(|_| AppError::invalid_data("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata)
            .join("routines")
            .join(CONFIG_FILE_NAME))
    } else {
        let home = std::env::var("HOME").map_err(|_| AppError::invalid_data("HOME is not set"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("routines")
            .join(CONFIG_FILE_NAME))
    }
}

pub fn load_config_with_fallback() -> ConfigLoad {
    match config_path() {
        Ok(path) => load_config_with_fallback_from_path(&path),
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_with_fallback_from_path(path: &Path) -> ConfigLoad {
    if !path.exists() {
        return ConfigLoad {
            config: Config::default(),
            error: None,
        };
    }

    match load_config_from_path(path) {
        Ok(config) => ConfigLoad {
            config,
            error: None,
        },
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_from_path(path: &Path) -> Result<Config, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| AppError::io(format!("{}: {}", path.display(), err)))?;
    let config: Config = serde_json::from_str(&content).map_err(|err| {
        AppError::invalid_data(format!("invalid JSON in {}: {}", path.display(), err))
    })?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), AppError> {
    if config.utc_offset_minutes.abs() > 14 * 60 {
        return Err(AppError::invalid_data(
            "utc_offset_minutes must be within +/- 14 hours",
        ));
    }
    if config.missed_grace_days < 0 {
        return Err(AppError::invalid_data("missed_grace_days cannot be negative"));
    }
    if config.interval_secs == 0 {
        return Err(AppError::invalid_data("interval_secs must be positive"));
    }
    if let Some(external) = config.external.as_ref() {
        if external.base_url.trim().is_empty() {
            return Err(AppError::invalid_data("external.base_url is required"));
        }
        if external.timeout_secs == 0 {
            return Err(AppError::invalid_data("external.timeout_secs must be positive"));
        }
    }
    Ok(())
}

/// Layers `overrides` over `base` and checks the result the same way a
/// config file is checked.
pub fn apply_overrides(base: &Config, overrides: &ConfigOverrides) -> Result<Config, AppError> {
    let merged = merge_overrides(base, overrides);
    validate(&merged)?;
    Ok(merged)
}

fn merge_overrides(base: &Config, overrides: &ConfigOverrides) -> Config {
    let mut merged = base.clone();
    if let Some(offset) = overrides.utc_offset_minutes {
        merged.utc_offset_minutes = offset;
    }
    if let Some(days) = overrides.missed_grace_days {
        merged.missed_grace_days = days;
    }
    if let Some(secs) = overrides.interval_secs {
        merged.interval_secs = secs;
    }
    if let Some(level) = overrides.log_level.as_ref() {
        merged.log_level = Some(level.clone());
    }

    let touches_external = overrides.external_base_url.is_some()
        || overrides.external_api_token.is_some()
        || overrides.external_project_id.is_some()
        || overrides.external_timeout_secs.is_some();
    if touches_external {
        let mut external = merged.external.take().unwrap_or(ExternalConfig {
            base_url: String::new(),
            api_token: String::new(),
            project_id: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        });
        if let Some(url) = overrides.external_base_url.as_ref() {
            external.base_url = url.clone();
        }
        if let Some(token) = overrides.external_api_token.as_ref() {
            external.api_token = token.clone();
        }
        if let Some(project) = overrides.external_project_id.as_ref() {
            external.project_id = Some(project.clone());
        }
        if let Some(secs) = overrides.external_timeout_secs {
            external.timeout_secs = secs;
        }
        merged.external = Some(external);
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::{
        Config, ConfigOverrides, DEFAULT_MISSED_GRACE_DAYS, apply_overrides,
        load_config_from_path, load_config_with_fallback_from_path, merge_overrides,
    };
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(file_name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("routines-{nanos}-{file_name}"))
    }

    #[test]
    fn load_config_missing_returns_defaults_without_error() {
        let path = temp_path("missing-config.json");
        let result = load_config_with_fallback_from_path(&path);

        assert_eq!(result.config, Config::default());
        assert_eq!(result.config.missed_grace_days, DEFAULT_MISSED_GRACE_DAYS);
        assert!(result.error.is_none());
    }

    #[test]
    fn load_config_invalid_returns_defaults_and_error() {
        let path = temp_path("invalid-config.json");
        fs::write(&path, "{ invalid json ").unwrap();

        let result = load_config_with_fallback_from_path(&path);
        fs::remove_file(&path).ok();

        assert_eq!(result.config, Config::default());
        assert!(result.error.is_some());
    }

    #[test]
    fn load_config_reads_valid_file() {
        let path = temp_path("valid-config.json");
        let content = serde_json::json!({
            "utc_offset_minutes": -480,
            "missed_grace_days": 3,
            "external": {
                "base_url": "https://tasks.example.com/api",
                "api_token": "secret"
            }
        });
        fs::write(&path, serde_json::to_string(&content).unwrap()).unwrap();

        let loaded = load_config_from_path(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(loaded.utc_offset_minutes, -480);
        assert_eq!(loaded.missed_grace_days, 3);
        let external = loaded.external.expect("external config");
        assert_eq!(external.base_url, "https://tasks.example.com/api");
        assert_eq!(external.timeout_secs, 30);
    }

    #[test]
    fn load_config_rejects_out_of_range_offset() {
        let path = temp_path("bad-offset.json");
        fs::write(&path, r#"{ "utc_offset_minutes": 1000 }"#).unwrap();

        let err = load_config_from_path(&path).unwrap_err();
        fs::remove_file(&path).ok();

        assert_eq!(err.code(), "invalid_data");
    }

    #[test]
    fn merge_overrides_preserves_base_config() {
        let base = Config::default();
        let overrides = ConfigOverrides {
            utc_offset_minutes: Some(60),
            external_base_url: Some("http://localhost:9000".into()),
            external_api_token: Some("token".into()),
            ..ConfigOverrides::default()
        };

        let merged = merge_overrides(&base, &overrides);

        assert_eq!(base.utc_offset_minutes, 0);
        assert!(base.external.is_none());
        assert_eq!(merged.utc_offset_minutes, 60);
        let external = merged.external.expect("external config");
        assert_eq!(external.base_url, "http://localhost:9000");
        assert_eq!(external.api_token, "token");
    }

    #[test]
    fn merge_overrides_with_empty_overrides_returns_clone() {
        let base = Config {
            missed_grace_days: 5,
            ..Config::default()
        };

        let merged = merge_overrides(&base, &ConfigOverrides::default());

        assert_eq!(merged, base);
    }

    #[test]
    fn apply_overrides_rejects_what_a_file_would() {
        let base = Config::default();
        let negative = ConfigOverrides {
            missed_grace_days: Some(-5),
            ..ConfigOverrides::default()
        };
        let err = apply_overrides(&base, &negative).unwrap_err();
        assert_eq!(err.code(), "invalid_data");
        assert!(err.message().contains("missed_grace_days cannot be negative"));

        let zero_timeout = ConfigOverrides {
            external_base_url: Some("http://localhost:9000".into()),
            external_timeout_secs: Some(0),
            ..ConfigOverrides::default()
        };
        assert_eq!(
            apply_overrides(&base, &zero_timeout).unwrap_err().code(),
            "invalid_data"
        );

        let fine = ConfigOverrides {
            missed_grace_days: Some(4),
            ..ConfigOverrides::default()
        };
        assert_eq!(apply_overrides(&base, &fine).unwrap().missed_grace_days, 4);
    }
}
