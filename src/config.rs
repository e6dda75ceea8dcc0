use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api;

const DEFAULT_ENV_PREFIX: &str = "FOTOLENTA";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub ui: UIConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Signed init payload issued by Telegram when the Mini App opens.
    /// Exported from the web client and pasted here; requests carry it
    /// verbatim.
    #[serde(default)]
    pub init_data: String,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            init_data: String::new(),
            user_id: None,
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    api::DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    "fotolenta-dev/0.1 (+https://github.com/vrkids/fotolenta)".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_theme")]
    pub theme: String,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
        }
    }
}

fn default_theme() -> String {
    "default".into()
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = merge_config(cfg, load_env(prefix)?);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.api.base_url.is_empty() && other.api.base_url != default_base_url() {
        base.api.base_url = other.api.base_url;
    }
    if !other.api.init_data.is_empty() {
        base.api.init_data = other.api.init_data;
    }
    if other.api.user_id.is_some() {
        base.api.user_id = other.api.user_id;
    }
    if !other.api.user_agent.is_empty() && other.api.user_agent != default_user_agent() {
        base.api.user_agent = other.api.user_agent;
    }
    if other.api.timeout != default_timeout() {
        base.api.timeout = other.api.timeout;
    }

    if !other.ui.theme.is_empty() && other.ui.theme != default_theme() {
        base.ui.theme = other.ui.theme;
    }

    base
}

fn load_env(prefix: &str) -> Result<Config> {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    if map.is_empty() {
        return Ok(Config::default());
    }

    let mut cfg = Config::default();

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.init_data" => cfg.api.init_data = value,
        "api.user_id" => {
            if let Ok(parsed) = value.parse::<i64>() {
                cfg.api.user_id = Some(parsed);
            }
        }
        "api.user_agent" => cfg.api.user_agent = value,
        "api.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.api.timeout = duration;
            }
        }
        "ui.theme" => cfg.ui.theme = value,
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("fotolenta").join("config.yaml"))
}

pub fn save_credentials(
    path: Option<PathBuf>,
    init_data: &str,
    user_id: Option<i64>,
) -> Result<PathBuf> {
    let init_data = init_data.trim();

    anyhow::ensure!(!init_data.is_empty(), "config: api.init_data is required");

    let path = if let Some(path) = path {
        path
    } else {
        default_config_path().context("config: unable to determine default config path")?
    };

    let mut cfg = if path.exists() {
        read_config_file(&path)?
    } else {
        Config::default()
    };

    cfg.api.init_data = init_data.to_string();
    if user_id.is_some() {
        cfg.api.user_id = user_id;
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }

    let contents = serde_yaml::to_string(&cfg).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_without_files() {
        let cfg = load(LoadOptions::default()).unwrap();
        assert_eq!(cfg.ui.theme, "default");
        assert_eq!(cfg.api.base_url, default_base_url());
        assert_eq!(cfg.api.timeout, Duration::from_secs(20));
        assert!(cfg.api.user_id.is_none());
    }

    #[test]
    fn save_credentials_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        save_credentials(Some(path.clone()), "query_id=abc&hash=def", Some(777)).unwrap();
        let saved = read_config_file(&path).unwrap();
        assert_eq!(saved.api.init_data, "query_id=abc&hash=def");
        assert_eq!(saved.api.user_id, Some(777));
    }

    #[test]
    fn save_credentials_rejects_empty_payload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        assert!(save_credentials(Some(path), "   ", None).is_err());
    }

    #[test]
    fn env_overrides() {
        env::set_var("FOTOLENTA_UI__THEME", "dracula");
        env::set_var("FOTOLENTA_API__USER_ID", "424242");
        let cfg = load(LoadOptions::default()).unwrap();
        assert_eq!(cfg.ui.theme, "dracula");
        assert_eq!(cfg.api.user_id, Some(424242));
        env::remove_var("FOTOLENTA_UI__THEME");
        env::remove_var("FOTOLENTA_API__USER_ID");
    }

    #[test]
    fn file_values_survive_empty_env_pass() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "api:\n  timeout: 5s\n").unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("FOTOLENTA_TEST_UNSET".into()),
        })
        .unwrap();
        assert_eq!(cfg.api.timeout, Duration::from_secs(5));
    }
}
