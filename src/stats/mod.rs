//! NBA stats provider: result-set decoding, season labels and the provider seam.

pub mod client;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::FetchError;

pub use client::StatsClient;

/// One provider row, keyed by column header
pub type RawRecord = Map<String, Value>;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct StatsResponse {
    #[serde(rename = "resultSets")]
    result_sets: Vec<ResultSet>,
    /// A few endpoints answer with a single set under this key
    #[serde(rename = "resultSet")]
    result_set: Option<ResultSet>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ResultSet {
    name: String,
    headers: Vec<String>,
    #[serde(rename = "rowSet")]
    row_set: Vec<Vec<Value>>,
}

/// Decode the first result set of a stats response into header-keyed records.
///
/// A well-formed response with no rows yields an empty vector.
pub fn parse_result_set(body: &str) -> Result<Vec<RawRecord>, FetchError> {
    let response: StatsResponse = serde_json::from_str(body)?;
    let set = response
        .result_sets
        .into_iter()
        .next()
        .or(response.result_set)
        .ok_or_else(|| FetchError::Decode("response has no result sets".to_string()))?;

    let mut records = Vec::with_capacity(set.row_set.len());
    for row in set.row_set {
        if row.len() != set.headers.len() {
            return Err(FetchError::Decode(format!(
                "{}: row has {} values for {} headers",
                set.name,
                row.len(),
                set.headers.len()
            )));
        }
        let record: RawRecord = set.headers.iter().cloned().zip(row).collect();
        records.push(record);
    }
    Ok(records)
}

/// Roster entry from the player listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterPlayer {
    pub id: i64,
    pub full_name: String,
    pub is_active: bool,
}

/// Map `commonallplayers` records to roster entries, skipping unusable rows.
pub fn roster_from_records(records: &[RawRecord]) -> Vec<RosterPlayer> {
    records
        .iter()
        .filter_map(|r| {
            let id = r.get("PERSON_ID").and_then(value_as_i64)?;
            let full_name = r
                .get("DISPLAY_FIRST_LAST")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())?
                .to_string();
            let is_active = r
                .get("ROSTERSTATUS")
                .and_then(value_as_i64)
                .map(|s| s == 1)
                .unwrap_or(true);
            Some(RosterPlayer {
                id,
                full_name,
                is_active,
            })
        })
        .collect()
}

/// Integers sometimes arrive as floats or strings.
pub fn value_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `"2023-24"` style label for the season starting in `start_year`.
pub fn season_label(start_year: i32) -> String {
    format!("{}-{:02}", start_year, (start_year + 1).rem_euclid(100))
}

/// Label of the season in progress (or most recently started) on `today`.
pub fn current_season(today: NaiveDate) -> String {
    let start = if today.month() >= 10 {
        today.year()
    } else {
        today.year() - 1
    };
    season_label(start)
}

/// The `n` seasons starting in the years before `today`'s calendar year, oldest first.
pub fn recent_seasons(today: NaiveDate, n: usize) -> Vec<String> {
    let year = today.year();
    let n = n as i32;
    (year - n..year).map(season_label).collect()
}

/// Source of rosters and raw game logs.
#[async_trait]
pub trait StatsProvider: Send + Sync {
    /// Active players for the given season's roster listing.
    async fn active_players(&self, season: &str) -> Result<Vec<RosterPlayer>, FetchError>;

    /// Raw regular-season game log body for one player and season.
    async fn game_log(&self, player_id: i64, season: &str) -> Result<String, FetchError>;

    /// Requests sent and rate-limit responses seen so far.
    fn usage(&self) -> ProviderUsage {
        ProviderUsage::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderUsage {
    pub requests: u64,
    pub rate_limit_hits: u64,
}
