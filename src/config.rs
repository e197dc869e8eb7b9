use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

const APP_DIR: &str = "bestdori-mirror";
const ENV_PREFIX: &str = "BESTDORI_MIRROR_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Defaults to `<data_dir>/mirror.db`.
    pub db_path: Option<PathBuf>,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    pub proxy: Option<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Consecutive unresolved post ids tolerated before a crawl stops.
    #[serde(default = "default_post_gap_limit")]
    pub post_gap_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// A pass starts whenever the wall-clock minute is a multiple of this.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn default_base_url() -> String {
    "https://bestdori.com".to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_user_agent() -> String {
    format!("bestdori-mirror/{}", env!("CARGO_PKG_VERSION"))
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_delay_secs() -> u64 {
    3
}

fn default_post_gap_limit() -> u32 {
    100
}

fn default_interval_minutes() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            proxy: None,
            user_agent: default_user_agent(),
            retry_attempts: default_retry_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            post_gap_limit: default_post_gap_limit(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_path: None,
            api: ApiConfig::default(),
            sync: SyncConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default location, writing defaults there on first run.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            toml::from_str(&content)?
        } else {
            let config = Config::default();
            config.save_to(config_path)?;
            config
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("mirror.db"))
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.data_dir.join("assets")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    /// `BESTDORI_MIRROR_<SECTION>_<KEY>` variables take precedence over the file.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |key: &str| lookup(&format!("{}{}", ENV_PREFIX, key)).filter(|v| !v.is_empty());

        if let Some(v) = var("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = var("DB_PATH") {
            self.db_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("API_BASE_URL") {
            self.api.base_url = v;
        }
        if let Some(v) = var("API_PROXY") {
            self.api.proxy = Some(v);
        }
        if let Some(v) = var("API_TIMEOUT_SECS") {
            self.api.timeout_secs = parse_env("API_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("API_USER_AGENT") {
            self.api.user_agent = v;
        }
        if let Some(v) = var("API_RETRY_ATTEMPTS") {
            self.api.retry_attempts = parse_env("API_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = var("API_RETRY_DELAY_SECS") {
            self.api.retry_delay_secs = parse_env("API_RETRY_DELAY_SECS", &v)?;
        }
        if let Some(v) = var("API_POST_GAP_LIMIT") {
            self.api.post_gap_limit = parse_env("API_POST_GAP_LIMIT", &v)?;
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log.level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.timeout_secs == 0 {
            return Err(AppError::Config("api.timeout_secs must be positive".into()));
        }
        if self.api.post_gap_limit == 0 {
            return Err(AppError::Config("api.post_gap_limit must be positive".into()));
        }
        if !(1..=60).contains(&self.sync.interval_minutes) {
            return Err(AppError::Config(format!(
                "sync.interval_minutes must be within 1..=60, got {}",
                self.sync.interval_minutes
            )));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| AppError::Config(format!("{}{} has invalid value {:?}", ENV_PREFIX, key, value)))
}
