//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Environment variable prefix for overrides (`PRACC_UPSTREAM__DATA_API_URL`)
pub const ENV_PREFIX: &str = "PRACC_";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving `${VAR}` references.
    /// Paths support ~ expansion. Later files override earlier ones.
    pub env_files: Vec<String>,
    /// HTTP API server
    pub server: ServerConfig,
    /// Upstream providers
    pub upstream: UpstreamConfig,
    /// Market data options
    pub market: MarketConfig,
    /// Response snapshot cache
    pub cache: CacheConfig,
}

impl Config {
    /// Load configuration from defaults, an optional YAML file and the environment
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, cannot be parsed, or the
    /// resulting configuration fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    /// Check that every upstream URL parses and the metadata source is set
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.upstream.data_api_url.trim().is_empty() {
            return Err(Error::Config(
                "upstream.data_api_url is required (or set PRACC_UPSTREAM__DATA_API_URL)".into(),
            ));
        }
        for (key, value) in [
            ("upstream.data_api_url", &self.upstream.data_api_url),
            ("upstream.defillama_url", &self.upstream.defillama_url),
            ("upstream.coingecko_url", &self.upstream.coingecko_url),
        ] {
            Url::parse(value).map_err(|e| Error::Config(format!("{key}: {e}")))?;
        }
        if self.upstream.max_in_flight == 0 {
            return Err(Error::Config(
                "upstream.max_in_flight must be at least 1".into(),
            ));
        }
        if self.upstream.request_timeout.is_zero() {
            return Err(Error::Config(
                "upstream.request_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand `${VAR}` and `${VAR:-default}` in upstream URLs
    fn expand_env_vars(&mut self) {
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        for value in [
            &mut self.upstream.data_api_url,
            &mut self.upstream.defillama_url,
            &mut self.upstream.coingecko_url,
        ] {
            *value = Self::expand_string(&re, value);
        }
    }

    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39500,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Upstream provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Protocol metadata endpoint (returns the full dataset)
    pub data_api_url: String,
    /// DefiLlama API base
    pub defillama_url: String,
    /// CoinGecko API base
    pub coingecko_url: String,
    /// Timeout applied to every upstream call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Protocols whose series are fetched at once. Each one may have a TVL
    /// and a price-history request open, so up to twice this many upstream
    /// requests can be in flight.
    pub max_in_flight: usize,
    /// User-Agent sent upstream
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            data_api_url: String::new(),
            defillama_url: "https://api.llama.fi".to_string(),
            coingecko_url: "https://api.coingecko.com/api/v3".to_string(),
            request_timeout: Duration::from_secs(5),
            max_in_flight: 8,
            user_agent: concat!("pracc/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Market data configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Fetch per-coin price history for the FDV views
    pub history_enabled: bool,
    /// Days of price history to request
    pub history_days: u32,
    /// Number of 12-hour sparkline buckets used to backfill recent FDV
    pub sparkline_buckets: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            history_enabled: true,
            history_days: 365,
            sparkline_buckets: 14,
        }
    }
}

/// Cache configuration for HTTP response snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable response caching
    pub enabled: bool,
    /// How long a snapshot stays fresh
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Maximum number of entries before expired ones are swept
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(60),
            max_entries: 256,
        }
    }
}

/// Humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string (`"5s"`, `"250ms"`)
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize a duration string (`"30s"`, `"5m"`, `"100ms"`, bare seconds)
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();

        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
