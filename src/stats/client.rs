use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ORIGIN, REFERER, USER_AGENT};
use reqwest::StatusCode;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::{parse_result_set, roster_from_records, ProviderUsage, RosterPlayer, StatsProvider};
use crate::config::IngestConfig;
use crate::error::FetchError;
use crate::retry::RetryPolicy;

/// Browser identities rotated across requests; the provider throttles
/// obviously scripted clients.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

type DirectLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

/// stats.nba.com client: paced, retried, header-rotating
pub struct StatsClient {
    base_url: String,
    http_client: reqwest::Client,
    rate_limiter: DirectLimiter,
    retry: RetryPolicy,
    requests: AtomicU64,
    rate_limit_hits: AtomicU64,
}

impl StatsClient {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        // The provider is slow to answer under load; generous timeouts
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(2)
            .build()
            .context("Failed to create HTTP client")?;

        let per_minute = NonZeroU32::new(config.requests_per_minute.max(1))
            .context("requests per minute must be non-zero")?;

        Ok(Self {
            base_url: config.stats_base_url.trim_end_matches('/').to_string(),
            http_client,
            rate_limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            retry: config.http_retry.clone(),
            requests: AtomicU64::new(0),
            rate_limit_hits: AtomicU64::new(0),
        })
    }

    fn rotated_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        let agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        headers.insert(USER_AGENT, HeaderValue::from_static(agent));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(REFERER, HeaderValue::from_static("https://www.nba.com/"));
        headers.insert(ORIGIN, HeaderValue::from_static("https://www.nba.com"));
        headers.insert("x-nba-stats-origin", HeaderValue::from_static("stats"));
        headers.insert("x-nba-stats-token", HeaderValue::from_static("true"));
        headers
    }

    /// One paced GET without retries.
    async fn get_once(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<String, FetchError> {
        self.rate_limiter.until_ready().await;
        self.requests.fetch_add(1, Ordering::Relaxed);

        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .http_client
            .get(&url)
            .headers(Self::rotated_headers())
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            return Err(FetchError::RateLimited {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        Ok(body)
    }

    /// GET with the configured backoff policy.
    async fn get(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<String, FetchError> {
        let what = format!("stats {}", endpoint);
        self.retry
            .run(&what, || self.get_once(endpoint, query), |_| {})
            .await
    }
}

#[async_trait]
impl StatsProvider for StatsClient {
    async fn active_players(&self, season: &str) -> Result<Vec<RosterPlayer>, FetchError> {
        let body = self
            .get(
                "commonallplayers",
                &[
                    ("LeagueID", "00"),
                    ("Season", season),
                    ("IsOnlyCurrentSeason", "1"),
                ],
            )
            .await?;
        let roster = roster_from_records(&parse_result_set(&body)?);
        let active: Vec<RosterPlayer> = roster.into_iter().filter(|p| p.is_active).collect();
        debug!("roster {}: {} active players", season, active.len());
        Ok(active)
    }

    async fn game_log(&self, player_id: i64, season: &str) -> Result<String, FetchError> {
        let id = player_id.to_string();
        let result = self
            .get(
                "playergamelog",
                &[
                    ("PlayerID", id.as_str()),
                    ("Season", season),
                    ("SeasonType", "Regular Season"),
                ],
            )
            .await;
        if let Err(e) = &result {
            warn!("game log {} {} failed: {}", player_id, season, e);
        }
        result
    }

    fn usage(&self) -> ProviderUsage {
        ProviderUsage {
            requests: self.requests.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
        }
    }
}
