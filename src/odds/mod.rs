//! The Odds API: wire types, client, and the pick/prop ranking built on them.

pub mod client;
pub mod confidence;
pub mod picks;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

pub use client::{OddsClient, OddsSource};
pub use confidence::{confidence, confidence_from_value};
pub use picks::{build_picks, prop_candidates, rank_props, Pick, PropPick, TOP_PROPS};

/// The Odds API event structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct OddsApiEvent {
    pub id: String,
    pub sport_key: String,
    pub sport_title: String,
    pub commence_time: Option<DateTime<Utc>>,
    pub home_team: String,
    pub away_team: String,
    /// `None` when the field is absent, which is different from "no books yet"
    pub bookmakers: Option<Vec<Bookmaker>>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Bookmaker {
    pub key: String,
    pub title: String,
    pub last_update: Option<DateTime<Utc>>,
    pub markets: Vec<Market>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Market {
    pub key: String,
    pub last_update: Option<DateTime<Utc>>,
    pub outcomes: Vec<Outcome>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Outcome {
    pub name: String,
    /// Player name on prop markets
    pub description: Option<String>,
    /// Left untyped so one bad price only costs its own outcome
    pub price: Option<Value>,
    pub point: Option<f64>,
}

impl OddsApiEvent {
    /// Bookmakers that actually carry data.
    pub fn books(&self) -> &[Bookmaker] {
        self.bookmakers.as_deref().unwrap_or(&[])
    }
}

/// Decode a list response one event at a time; undecodable events are dropped.
pub fn decode_events(items: Vec<Value>) -> Vec<OddsApiEvent> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<OddsApiEvent>(item) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Skipping malformed odds event: {}", e);
                None
            }
        })
        .collect()
}
