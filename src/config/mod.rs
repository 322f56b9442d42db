use std::env;
use std::time::Duration;

/// 默认会话有效期（小时）
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;
/// 记住我会话有效期（小时，30天）
pub const DEFAULT_REMEMBER_ME_TTL_HOURS: i64 = 720;
/// 重置令牌有效期（秒）
pub const DEFAULT_RESET_TOKEN_TTL_SECS: u64 = 3600;
/// 已使用的重置令牌保留时间（秒）
pub const DEFAULT_RESET_TOKEN_USED_TTL_SECS: u64 = 300;
/// bcrypt 默认成本因子
pub const DEFAULT_BCRYPT_COST: u32 = 12;
const MIN_BCRYPT_COST: u32 = 4;
const MAX_BCRYPT_COST: u32 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => AppEnv::Production,
            _ => AppEnv::Development,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub app_env: AppEnv,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub bcrypt_cost: u32,
    pub session_ttl_hours: i64,
    pub remember_me_ttl_hours: i64,
    pub reset_token_ttl_secs: u64,
    pub reset_token_used_ttl_secs: u64,
    pub session_cleanup_interval_secs: u64,
    pub store_timeout_secs: u64,
    pub store_hard_timeout_secs: u64,
    pub db_max_connections: u32,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub frontend_url: String,
    pub mail_api_url: Option<String>,
    pub mail_api_key: Option<String>,
    pub mail_from: String,
    pub use_in_memory_stores: bool,
}

/// 认证服务所需的配置子集
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub bcrypt_cost: u32,
    pub session_ttl_hours: i64,
    pub remember_me_ttl_hours: i64,
    pub reset_token_ttl_secs: u64,
    pub reset_token_used_ttl_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
            remember_me_ttl_hours: DEFAULT_REMEMBER_ME_TTL_HOURS,
            reset_token_ttl_secs: DEFAULT_RESET_TOKEN_TTL_SECS,
            reset_token_used_ttl_secs: DEFAULT_RESET_TOKEN_USED_TTL_SECS,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
            name,
            value: raw,
        }),
        None => Ok(default),
    }
}

/// 小时类配置的上限（十年）
pub const MAX_CONFIG_HOURS: i64 = 24 * 365 * 10;

/// 解析小时数，允许 "24h" 这样的写法，范围 1..=MAX_CONFIG_HOURS
fn parse_hours(raw: &str) -> Option<i64> {
    raw.trim()
        .trim_end_matches('h')
        .parse::<i64>()
        .ok()
        .filter(|h| (1..=MAX_CONFIG_HOURS).contains(h))
}

fn hours_to_secs(name: &'static str, hours: i64) -> Result<u64, ConfigError> {
    u64::try_from(hours)
        .ok()
        .and_then(|h| h.checked_mul(3600))
        .ok_or(ConfigError::Invalid {
            name,
            value: hours.to_string(),
        })
}

fn hours_or(name: &'static str, default: i64) -> Result<i64, ConfigError> {
    match optional(name) {
        Some(raw) => parse_hours(&raw).ok_or(ConfigError::Invalid { name, value: raw }),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let app_env = AppEnv::parse(&optional("APP_ENV").unwrap_or_default());
        let use_in_memory_stores = optional("USE_IN_MEMORY_STORES")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);
        if use_in_memory_stores && app_env == AppEnv::Production {
            return Err(ConfigError::Invalid {
                name: "USE_IN_MEMORY_STORES",
                value: "true (not allowed in production)".to_string(),
            });
        }

        let (database_url, redis_url) = if use_in_memory_stores {
            (optional("DATABASE_URL"), optional("REDIS_URL"))
        } else {
            (Some(required("DATABASE_URL")?), Some(required("REDIS_URL")?))
        };

        let default_max_connections = match app_env {
            AppEnv::Development => 10,
            AppEnv::Production => 50,
        };

        Ok(Config {
            app_env,
            database_url,
            redis_url,
            jwt_secret: required("JWT_SECRET")?,
            bcrypt_cost: parse_or("BCRYPT_COST", DEFAULT_BCRYPT_COST)?
                .clamp(MIN_BCRYPT_COST, MAX_BCRYPT_COST),
            session_ttl_hours: hours_or("SESSION_TTL", DEFAULT_SESSION_TTL_HOURS)?,
            remember_me_ttl_hours: hours_or("REMEMBER_ME_TTL", DEFAULT_REMEMBER_ME_TTL_HOURS)?,
            reset_token_ttl_secs: parse_or("RESET_TOKEN_TTL_SECS", DEFAULT_RESET_TOKEN_TTL_SECS)?,
            reset_token_used_ttl_secs: parse_or(
                "RESET_TOKEN_USED_TTL_SECS",
                DEFAULT_RESET_TOKEN_USED_TTL_SECS,
            )?,
            session_cleanup_interval_secs: hours_to_secs(
                "SESSION_CLEANUP_INTERVAL",
                hours_or("SESSION_CLEANUP_INTERVAL", 24)?,
            )?,
            store_timeout_secs: parse_or("STORE_TIMEOUT_SECS", 10)?,
            store_hard_timeout_secs: parse_or("STORE_HARD_TIMEOUT_SECS", 30)?,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", default_max_connections)?,
            server_host: optional("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: parse_or("SERVER_PORT", 3000)?,
            api_base_uri: optional("API_BASE_URI").unwrap_or_else(|| "/api".to_string()),
            frontend_url: optional("FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            mail_api_url: optional("MAIL_API_URL"),
            mail_api_key: optional("MAIL_API_KEY"),
            mail_from: optional("MAIL_FROM").unwrap_or_else(|| "no-reply@brickvault.local".into()),
            use_in_memory_stores,
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env == AppEnv::Production
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn store_hard_timeout(&self) -> Duration {
        Duration::from_secs(self.store_hard_timeout_secs)
    }

    pub fn session_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.session_cleanup_interval_secs)
    }

    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            jwt_secret: self.jwt_secret.clone(),
            bcrypt_cost: self.bcrypt_cost,
            session_ttl_hours: self.session_ttl_hours,
            remember_me_ttl_hours: self.remember_me_ttl_hours,
            reset_token_ttl_secs: self.reset_token_ttl_secs,
            reset_token_used_ttl_secs: self.reset_token_used_ttl_secs,
        }
    }
}
