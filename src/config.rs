//! Environment configuration.
//!
//! Every binary entry point loads `.env` (if present) and then builds the
//! section it needs. Missing credentials are fatal at startup.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Odds API / HTTP server configuration
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub odds_api_key: String,
    pub odds_base_url: String,
    pub sport_key: String,
    pub api_port: u16,
    pub props_markets: String,
    pub props_max_events: usize,
    pub requests_per_minute: u32,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        let odds_api_key = match env::var("THE_ODDS_API_KEY") {
            Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
            Ok(_) => return Err(anyhow!("THE_ODDS_API_KEY is set but empty")),
            Err(_) => return Err(anyhow!("THE_ODDS_API_KEY is not set")),
        };

        // Prevent accidental use of sample/placeholder keys
        let key_lower = odds_api_key.to_lowercase();
        if key_lower.contains("change_me")
            || key_lower.contains("your_")
            || key_lower.starts_with("sample")
        {
            return Err(anyhow!(
                "THE_ODDS_API_KEY appears to be a placeholder value; replace with your real key"
            ));
        }

        Ok(Self {
            odds_api_key,
            odds_base_url: env_or("ODDS_API_BASE_URL", "https://api.the-odds-api.com/v4"),
            sport_key: env_or("SPORT_KEY", "basketball_nba"),
            api_port: env_parse("API_PORT", 8000),
            props_markets: env_or(
                "PROPS_MARKETS",
                "player_points,player_rebounds,player_assists",
            ),
            props_max_events: env_parse("PROPS_MAX_EVENTS", 5),
            requests_per_minute: env_parse("ODDS_REQUESTS_PER_MINUTE", 45),
        })
    }
}

/// Database connection settings
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connect_attempts: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = match env::var("DATABASE_URL") {
            Ok(v) if !v.trim().is_empty() => v,
            Ok(_) => return Err(anyhow!("DATABASE_URL is set but empty")),
            Err(_) => {
                // Older deployments only exported the host
                let host = env::var("DB_HOST").context("DATABASE_URL not set")?;
                format!("postgresql://postgres:postgres@{}:5432/nba_betting", host)
            }
        };

        Ok(Self {
            database_url,
            max_connections: env_parse("DB_MAX_CONNECTIONS", 5),
            connect_attempts: env_parse("DB_CONNECT_ATTEMPTS", 5),
        })
    }

    /// Same settings with an explicit URL (CLI override).
    pub fn with_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.database_url = url;
        }
        self
    }
}

/// Historical stats ingestion settings
#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub stats_base_url: String,
    /// Number of most recent completed seasons to pull per player
    pub seasons: usize,
    /// Commit + persist the retry queue every K players
    pub checkpoint_every: usize,
    /// Retry-queue attempts before a (player, season) pair is dropped
    pub max_retries: u32,
    /// Cooldown base for the retry queue (base × 2^retries)
    pub retry_base_wait: Duration,
    pub requests_per_minute: u32,
    pub http_retry: RetryPolicy,
    pub cache_dir: PathBuf,
    pub retry_queue_path: PathBuf,
    pub player_limit: Option<usize>,
}

impl IngestConfig {
    pub fn from_env() -> Result<Self> {
        let seasons: usize = env_parse("INGEST_SEASONS", 5);
        if seasons == 0 {
            return Err(anyhow!("INGEST_SEASONS must be at least 1"));
        }

        let http_retry = RetryPolicy {
            max_attempts: env_parse("STATS_MAX_ATTEMPTS", 3),
            ..RetryPolicy::default()
        };

        Ok(Self {
            stats_base_url: env_or("STATS_BASE_URL", "https://stats.nba.com/stats"),
            seasons,
            checkpoint_every: env_parse::<usize>("INGEST_CHECKPOINT_EVERY", 10).max(1),
            max_retries: env_parse("INGEST_MAX_RETRIES", 3),
            retry_base_wait: Duration::from_secs(env_parse("INGEST_RETRY_BASE_SECS", 60)),
            requests_per_minute: env_parse("STATS_REQUESTS_PER_MINUTE", 30),
            http_retry,
            cache_dir: PathBuf::from(env_or("CACHE_DIR", ".cache/nba_stats")),
            retry_queue_path: PathBuf::from(env_or("RETRY_QUEUE_PATH", "retry_queue.json")),
            player_limit: env::var("INGEST_PLAYER_LIMIT")
                .ok()
                .and_then(|v| v.trim().parse().ok()),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default.to_string(),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
