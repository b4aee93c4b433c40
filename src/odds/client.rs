use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use serde_json::Value;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{info, warn};

use super::{decode_events, OddsApiEvent};
use crate::config::ApiConfig;

/// Where the API handlers get odds from.
#[async_trait]
pub trait OddsSource: Send + Sync {
    /// Moneyline odds for every upcoming game.
    async fn game_odds(&self) -> Result<Vec<OddsApiEvent>>;

    /// Upcoming events, without odds.
    async fn events(&self) -> Result<Vec<OddsApiEvent>>;

    /// Player-prop odds for one event.
    async fn event_props(&self, event_id: &str) -> Result<OddsApiEvent>;

    /// How many events `props` should look at.
    fn props_event_limit(&self) -> usize {
        5
    }
}

/// The Odds API client
pub struct OddsClient {
    config: ApiConfig,
    http_client: reqwest::Client,
    rate_limiter: RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>,
}

impl OddsClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let per_minute = NonZeroU32::new(config.requests_per_minute.max(1))
            .context("requests per minute must be non-zero")?;

        // HTTP client with timeouts
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(5)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
            rate_limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        // Wait for rate limit
        self.rate_limiter.until_ready().await;

        let url = format!("{}/{}", self.config.odds_base_url.trim_end_matches('/'), path);
        let mut params: Vec<(&str, &str)> = vec![("apiKey", self.config.odds_api_key.as_str())];
        params.extend_from_slice(query);

        let response = self
            .http_client
            .get(&url)
            .query(&params)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", path))?;

        // Log API usage from headers
        if let Some(remaining) = response.headers().get("x-requests-remaining") {
            info!(
                "API requests remaining: {}",
                remaining.to_str().unwrap_or("?")
            );
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            return Err(anyhow!("Odds API error (status {}): {}", status, body));
        }

        serde_json::from_str(&body).with_context(|| format!("Failed to parse {}", path))
    }

    async fn get_event_list(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<OddsApiEvent>> {
        let value = self.get_json(path, query).await?;
        let Value::Array(items) = value else {
            return Err(anyhow!("Odds API returned a non-list payload for {}", path));
        };
        let total = items.len();
        let events = decode_events(items);
        if events.len() < total {
            warn!("Dropped {}/{} undecodable events", total - events.len(), total);
        }
        info!("Fetched {} events from The Odds API", events.len());
        Ok(events)
    }
}

#[async_trait]
impl OddsSource for OddsClient {
    async fn game_odds(&self) -> Result<Vec<OddsApiEvent>> {
        let path = format!("sports/{}/odds", self.config.sport_key);
        self.get_event_list(
            &path,
            &[
                ("regions", "us"),
                ("markets", "h2h"),
                ("oddsFormat", "american"),
            ],
        )
        .await
    }

    async fn events(&self) -> Result<Vec<OddsApiEvent>> {
        let path = format!("sports/{}/events", self.config.sport_key);
        self.get_event_list(&path, &[]).await
    }

    async fn event_props(&self, event_id: &str) -> Result<OddsApiEvent> {
        let path = format!("sports/{}/events/{}/odds", self.config.sport_key, event_id);
        let value = self
            .get_json(
                &path,
                &[
                    ("regions", "us"),
                    ("markets", self.config.props_markets.as_str()),
                    ("oddsFormat", "american"),
                ],
            )
            .await?;
        serde_json::from_value(value).context("Failed to parse event props")
    }

    fn props_event_limit(&self) -> usize {
        self.config.props_max_events
    }
}
