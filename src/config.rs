// src/config.rs

use chrono::{FixedOffset, NaiveTime};
use config::{ConfigError, Environment, File, builder::DefaultState};
use dotenvy::dotenv;
use serde::{Deserialize, Deserializer};

pub const ENV_PREFIX: &str = "SOCIALFEED";

/// Backing store implementation. Only the managed PostgREST store exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataProvider {
    Supabase,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub url: String,
    pub service_key: String,
    /// Maximum concurrent requests to the store.
    pub pool_size: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostsConfig {
    pub max_content_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub bucket: String,
    pub max_upload_bytes: usize,
    pub allowed_mime_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrendingConfig {
    /// Decay constant τ of the score, in hours.
    pub decay_hours: f64,
    pub window_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Offset of the scheduler's local wall clock from UTC.
    pub utc_offset_minutes: i32,
    #[serde(deserialize_with = "wall_clock")]
    pub cleanup_at: NaiveTime,
    #[serde(deserialize_with = "wall_clock")]
    pub trending_at: NaiveTime,
    #[serde(deserialize_with = "wall_clock")]
    pub digest_at: NaiveTime,
    pub notification_retention_days: i64,
}

impl SchedulerConfig {
    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            ConfigError::Message(format!(
                "scheduler.utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub data_provider: DataProvider,
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub posts: PostsConfig,
    pub storage: StorageConfig,
    pub trending: TrendingConfig,
    pub scheduler: SchedulerConfig,
}

fn wall_clock<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    NaiveTime::parse_from_str(&raw, "%H:%M").map_err(|_| {
        serde::de::Error::custom(format!("expected HH:MM wall-clock time, got '{}'", raw))
    })
}

impl Config {
    /// Loads `.env`, then `config/socialfeed.toml` (optional), then
    /// `SOCIALFEED__*` environment variables. Unknown keys are rejected.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv().ok();

        let builder = Self::defaults()?
            .add_source(File::with_name("config/socialfeed").required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("storage.allowed_mime_types")
                    .try_parsing(true),
            );
        Self::from_builder(builder)
    }

    pub fn defaults() -> Result<config::ConfigBuilder<DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("data_provider", "supabase")?
            .set_default("server.bind_addr", "0.0.0.0:3000")?
            .set_default("server.log_level", "info")?
            .set_default("store.pool_size", 10)?
            .set_default("store.timeout_secs", 10)?
            .set_default("posts.max_content_length", 5000)?
            .set_default("storage.bucket", "media")?
            .set_default("storage.max_upload_bytes", 10 * 1024 * 1024)?
            .set_default(
                "storage.allowed_mime_types",
                vec!["image/jpeg", "image/png", "image/gif", "image/webp", "video/mp4"],
            )?
            .set_default("trending.decay_hours", 24.0)?
            .set_default("trending.window_days", 7)?
            .set_default("scheduler.enabled", true)?
            .set_default("scheduler.utc_offset_minutes", 0)?
            .set_default("scheduler.cleanup_at", "02:00")?
            .set_default("scheduler.trending_at", "03:00")?
            .set_default("scheduler.digest_at", "09:00")?
            .set_default("scheduler.notification_retention_days", 30)
    }

    pub fn from_builder(builder: config::ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Config = builder.build()?.try_deserialize()?;
        config.scheduler.offset()?;
        if config.store.pool_size == 0 {
            return Err(ConfigError::Message("store.pool_size must be positive".into()));
        }
        if config.trending.decay_hours <= 0.0 {
            return Err(ConfigError::Message("trending.decay_hours must be positive".into()));
        }
        Ok(config)
    }
}

impl Default for Config {
    /// Same values as [`Config::defaults`], with a local store and a
    /// throwaway secret.
    fn default() -> Self {
        let at = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap_or_default();
        Self {
            data_provider: DataProvider::Supabase,
            server: ServerConfig {
                bind_addr: "0.0.0.0:3000".to_string(),
                log_level: "info".to_string(),
            },
            store: StoreConfig {
                url: "http://localhost:54321".to_string(),
                service_key: String::new(),
                pool_size: 10,
                timeout_secs: 10,
            },
            auth: AuthConfig {
                jwt_secret: "dev-secret".to_string(),
            },
            posts: PostsConfig {
                max_content_length: 5000,
            },
            storage: StorageConfig {
                bucket: "media".to_string(),
                max_upload_bytes: 10 * 1024 * 1024,
                allowed_mime_types: ["image/jpeg", "image/png", "image/gif", "image/webp", "video/mp4"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            },
            trending: TrendingConfig {
                decay_hours: 24.0,
                window_days: 7,
            },
            scheduler: SchedulerConfig {
                enabled: true,
                utc_offset_minutes: 0,
                cleanup_at: at(2),
                trending_at: at(3),
                digest_at: at(9),
                notification_retention_days: 30,
            },
        }
    }
}
