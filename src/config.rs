use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::PricingStrategy;

/// Per-tenant engine behaviour. Shared by every tenant of one server.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub pricing: PricingStrategy,
    pub currency: String,
    /// Online provider used when a booking request names none.
    pub default_provider: String,
    /// Redirect URLs are `{payment_base_url}/{provider}/pay?...`.
    pub payment_base_url: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            pricing: PricingStrategy::RuleBased,
            currency: "VND".into(),
            default_provider: "VNPAY".into(),
            payment_base_url: "https://pay.example.com".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub completion_interval: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub engine: EngineSettings,
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Malformed numbers fall back to
    /// their defaults; an unknown pricing strategy is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = EngineSettings::default();

        let pricing = match lookup("FIELDBOOK_PRICING") {
            None => defaults.pricing,
            Some(value) => PricingStrategy::parse(&value).ok_or(ConfigError::Invalid {
                var: "FIELDBOOK_PRICING",
                value,
            })?,
        };

        Ok(Self {
            port: parsed(&lookup, "FIELDBOOK_PORT").unwrap_or(5433),
            bind: lookup("FIELDBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(lookup("FIELDBOOK_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: lookup("FIELDBOOK_PASSWORD").unwrap_or_else(|| "fieldbook".into()),
            max_connections: parsed(&lookup, "FIELDBOOK_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&lookup, "FIELDBOOK_COMPACT_THRESHOLD").unwrap_or(1000),
            completion_interval: Duration::from_secs(
                parsed(&lookup, "FIELDBOOK_COMPLETION_INTERVAL_SECS")
                    .filter(|secs: &u64| *secs > 0)
                    .unwrap_or(60),
            ),
            metrics_port: parsed(&lookup, "FIELDBOOK_METRICS_PORT"),
            tls_cert: lookup("FIELDBOOK_TLS_CERT"),
            tls_key: lookup("FIELDBOOK_TLS_KEY"),
            engine: EngineSettings {
                pricing,
                currency: lookup("FIELDBOOK_CURRENCY").unwrap_or(defaults.currency),
                default_provider: lookup("FIELDBOOK_DEFAULT_PROVIDER")
                    .map(|p| p.trim().to_uppercase())
                    .unwrap_or(defaults.default_provider),
                payment_base_url: lookup("FIELDBOOK_PAYMENT_BASE_URL")
                    .map(|u| u.trim_end_matches('/').to_string())
                    .unwrap_or(defaults.payment_base_url),
            },
        })
    }
}
