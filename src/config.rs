use std::env;

use rust_decimal::Decimal;

use crate::model::PayoutMethod;

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Server
    pub host: String,
    pub port: u16,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Processor — also doubles as the webhook HMAC secret (spec §6).
    pub processor_secret_key: String,

    // Business rules
    pub platform_fee_rate: Decimal,
    pub payout_method_default: PayoutMethod,
    pub bank_main_account_id: String,

    // Reconciler
    pub reconciler_interval_secs: u64,
    pub webhook_replay_threshold_secs: i64,
    pub max_webhook_retries: i32,

    // Auth
    pub admin_tokens: Vec<String>,

    // CORS
    pub allowed_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = require_env("DATABASE_URL")?;

        let processor_secret_key = require_env("PROCESSOR_SECRET_KEY")?;

        let admin_tokens_raw = require_env("ADMIN_TOKENS")?;
        let admin_tokens: Vec<String> = admin_tokens_raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if admin_tokens.is_empty() {
            return Err(ConfigError::Missing("ADMIN_TOKENS (no valid tokens found)".into()));
        }

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        let database_max_connections: u32 = parse_env_or("DATABASE_MAX_CONNECTIONS", 10)?;
        if database_max_connections == 0 {
            return Err(ConfigError::Invalid(
                "DATABASE_MAX_CONNECTIONS".into(),
                "must be > 0".into(),
            ));
        }

        let platform_fee_rate: Decimal =
            parse_decimal_env_or("PLATFORM_FEE_RATE", Decimal::new(10, 2))?;
        if platform_fee_rate < Decimal::ZERO || platform_fee_rate > Decimal::ONE {
            return Err(ConfigError::Invalid(
                "PLATFORM_FEE_RATE".into(),
                "must be between 0 and 1".into(),
            ));
        }

        let payout_method_default_raw =
            env::var("PAYOUT_METHOD_DEFAULT").unwrap_or_else(|_| "AUTO".into());
        let payout_method_default = match payout_method_default_raw.as_str() {
            "AUTO" => PayoutMethod::Auto,
            "MANUAL" => PayoutMethod::Manual,
            _ => {
                return Err(ConfigError::Invalid(
                    "PAYOUT_METHOD_DEFAULT".into(),
                    "must be AUTO or MANUAL".into(),
                ))
            }
        };

        let bank_main_account_id = env::var("BANK_MAIN_ACCOUNT_ID")
            .unwrap_or_else(|_| crate::payout::BANK_MAIN.to_string());

        let reconciler_interval_secs: u64 = parse_env_or("RECONCILER_INTERVAL_SECONDS", 300)?;
        if reconciler_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "RECONCILER_INTERVAL_SECONDS".into(),
                "must be > 0".into(),
            ));
        }
        let webhook_replay_threshold_secs: i64 =
            parse_env_or("WEBHOOK_REPLAY_THRESHOLD_SECONDS", 30)?;
        let max_webhook_retries: i32 = parse_env_or("MAX_WEBHOOK_RETRIES", 5)?;
        if max_webhook_retries <= 0 {
            return Err(ConfigError::Invalid(
                "MAX_WEBHOOK_RETRIES".into(),
                "must be > 0".into(),
            ));
        }

        Ok(Self {
            host: env::var("HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("HTTP_PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .map_err(|_| {
                    ConfigError::Invalid("HTTP_PORT".into(), "must be a valid port number".into())
                })?,
            database_url,
            database_max_connections,
            processor_secret_key,
            platform_fee_rate,
            payout_method_default,
            bank_main_account_id,
            reconciler_interval_secs,
            webhook_replay_threshold_secs,
            max_webhook_retries,
            admin_tokens,
            allowed_origins,
        })
    }
}

fn require_env(name: &str) -> Result<String, ConfigError> {
    env::var(name)
        .map_err(|_| ConfigError::Missing(name.into()))
        .and_then(|v| {
            if v.is_empty() {
                Err(ConfigError::Missing(name.into()))
            } else {
                Ok(v)
            }
        })
}

fn parse_env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.is_empty() => v
            .parse()
            .map_err(|_| ConfigError::Invalid(name.into(), format!("could not parse '{v}'"))),
        _ => Ok(default),
    }
}

fn parse_decimal_env_or(name: &str, default: Decimal) -> Result<Decimal, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.is_empty() => v
            .parse::<Decimal>()
            .map_err(|_| ConfigError::Invalid(name.into(), format!("could not parse '{v}'"))),
        _ => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(String),
    Invalid(String, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(name) => write!(f, "missing required env var: {name}"),
            ConfigError::Invalid(name, reason) => {
                write!(f, "invalid env var {name}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
