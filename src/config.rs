use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const API_KEY_ENV: &str = "PERSPECTIVE_API_KEY";
pub const MAX_INSPECTION_PERIOD_DAYS: i64 = 36_500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub moderation: ModerationSettings,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    pub logging: Option<LoggingConfig>,
}

/// Attribute model requested from the provider. Selected once when the
/// configuration is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeModel {
    #[serde(rename = "standard")]
    Standard,
    #[serde(rename = "severe toxicity", alias = "severe toxicity (experimental)")]
    SevereToxicity,
}

impl AttributeModel {
    /// Attribute key used in `requestedAttributes` and `attributeScores`.
    pub fn attribute_name(self) -> &'static str {
        match self {
            AttributeModel::Standard => "TOXICITY",
            AttributeModel::SevereToxicity => "SEVERE_TOXICITY",
        }
    }

    /// Custom field on a post that stores the last backfilled score.
    pub fn score_field_name(self) -> &'static str {
        match self {
            AttributeModel::Standard => "post_perspective_toxicity",
            AttributeModel::SevereToxicity => "post_perspective_severe_toxicity",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationSettings {
    pub enabled: bool,
    pub flag_post_min_toxicity_enable: bool,
    pub flag_post_min_toxicity: f64,
    pub notify_posting_min_toxicity_enable: bool,
    pub notify_posting_min_toxicity: f64,
    pub check_private_message: bool,
    pub check_secured_categories: bool,
    pub toxicity_model: AttributeModel,
    pub historical_inspection_period_days: i64,
    pub backfill_posts: bool,
    pub flag_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    pub endpoint: String,
    pub analyze_path: String,
    pub session_base: String,
    pub max_text_bytes: usize,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub connection_max_age_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    pub batch_size: usize,
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub authenticated_per_minute: u32,
    pub anonymous_per_minute: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database_path: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            flag_post_min_toxicity_enable: true,
            flag_post_min_toxicity: 0.85,
            notify_posting_min_toxicity_enable: true,
            notify_posting_min_toxicity: 0.8,
            check_private_message: false,
            check_secured_categories: false,
            toxicity_model: AttributeModel::Standard,
            historical_inspection_period_days: 30,
            backfill_posts: false,
            flag_message: "This post was automatically flagged as possibly uncivil (score {score})."
                .to_string(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "https://commentanalyzer.googleapis.com".to_string(),
            analyze_path: "/v1alpha1/comments:analyze".to_string(),
            session_base: "http://localhost".to_string(),
            max_text_bytes: 20_000,
            connect_timeout_ms: 1_000,
            read_timeout_ms: 3_000,
            write_timeout_ms: 3_000,
            connection_max_age_secs: 60,
            user_agent: format!("perspective-sidecar/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            interval_seconds: 600,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8787".to_string(),
            authenticated_per_minute: 8,
            anonymous_per_minute: 6,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: "/var/lib/perspective-sidecar/store.db".to_string(),
            namespace: "discourse-perspective".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            moderation: ModerationSettings::default(),
            provider: ProviderConfig::default(),
            backfill: BackfillConfig::default(),
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            logging: Some(LoggingConfig {
                level: "info".to_string(),
            }),
        }
    }
}

impl ProviderConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Whole-request budget once connected: one write followed by one read.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms + self.write_timeout_ms)
    }

    pub fn connection_max_age(&self) -> Duration {
        Duration::from_secs(self.connection_max_age_secs)
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {path}"))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        let config = config.with_env_api_key();
        config.validate()?;
        Ok(config)
    }

    /// Fill an empty provider key from `PERSPECTIVE_API_KEY`.
    pub fn with_env_api_key(mut self) -> Self {
        if self.provider.api_key.is_empty() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                self.provider.api_key = key;
            }
        }
        self
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let moderation = &self.moderation;
        for (name, value) in [
            ("flag_post_min_toxicity", moderation.flag_post_min_toxicity),
            ("notify_posting_min_toxicity", moderation.notify_posting_min_toxicity),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("moderation.{name} must be within [0, 1], got {value}");
            }
        }
        if !(0..=MAX_INSPECTION_PERIOD_DAYS).contains(&moderation.historical_inspection_period_days) {
            bail!(
                "moderation.historical_inspection_period_days must be between 0 and {MAX_INSPECTION_PERIOD_DAYS}, got {}",
                moderation.historical_inspection_period_days
            );
        }
        if self.provider.max_text_bytes == 0 {
            bail!("provider.max_text_bytes must be greater than zero");
        }
        for (name, value) in [
            ("connect_timeout_ms", self.provider.connect_timeout_ms),
            ("read_timeout_ms", self.provider.read_timeout_ms),
            ("write_timeout_ms", self.provider.write_timeout_ms),
        ] {
            if !(1..=10_000).contains(&value) {
                bail!("provider.{name} must be between 1 and 10000 ms, got {value}");
            }
        }
        if self.backfill.batch_size == 0 {
            bail!("backfill.batch_size must be greater than zero");
        }
        Ok(())
    }
}
