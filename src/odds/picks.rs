//! Turning raw odds into picks and ranked player props.
//!
//! Both views read the first bookmaker that carries the market in question.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{confidence_from_value, Bookmaker, Market, OddsApiEvent};

/// How many props `/api/props` returns.
pub const TOP_PROPS: usize = 10;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PickOdds {
    pub home_odds: Value,
    pub away_odds: Value,
}

/// Moneyline pick for one game. `team` is always the home side.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Pick {
    pub id: String,
    pub team: String,
    pub opponent: String,
    pub prediction: String,
    pub confidence: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub odds: PickOdds,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PropPick {
    pub id: String,
    pub game: String,
    pub start_time: Option<DateTime<Utc>>,
    /// Outcome label, usually "Over" or "Under"
    pub name: String,
    pub player: Option<String>,
    pub market: String,
    pub line: Option<f64>,
    pub odds: Value,
    pub confidence: f64,
}

fn first_market<'a>(books: &'a [Bookmaker], key: &str) -> Option<&'a Market> {
    books
        .iter()
        .flat_map(|b| b.markets.iter())
        .find(|m| m.key == key)
}

fn price_for<'a>(market: &'a Market, team: &str) -> Option<&'a Value> {
    market
        .outcomes
        .iter()
        .find(|o| o.name == team)
        .and_then(|o| o.price.as_ref())
}

/// Pick for one event, or `None` when the event cannot be scored.
pub fn pick_for(event: &OddsApiEvent) -> Option<Pick> {
    let Some(h2h) = first_market(event.books(), "h2h") else {
        debug!("Event {} has no h2h market", event.id);
        return None;
    };
    let home_odds = price_for(h2h, &event.home_team)?;
    let away_odds = price_for(h2h, &event.away_team)?;
    let home_conf = confidence_from_value(home_odds)?;
    let away_conf = confidence_from_value(away_odds)?;

    let (prediction, confidence) = if home_conf >= away_conf {
        (&event.home_team, home_conf)
    } else {
        (&event.away_team, away_conf)
    };

    Some(Pick {
        id: event.id.clone(),
        team: event.home_team.clone(),
        opponent: event.away_team.clone(),
        prediction: prediction.clone(),
        confidence,
        start_time: event.commence_time,
        odds: PickOdds {
            home_odds: home_odds.clone(),
            away_odds: away_odds.clone(),
        },
    })
}

/// Picks for every scorable event, in input order.
pub fn build_picks(events: &[OddsApiEvent]) -> Vec<Pick> {
    events.iter().filter_map(pick_for).collect()
}

/// Every priced prop outcome on an event, using its first bookmaker.
pub fn prop_candidates(event: &OddsApiEvent) -> Vec<PropPick> {
    let Some(book) = event.books().first() else {
        return Vec::new();
    };
    let game = format!("{} @ {}", event.away_team, event.home_team);

    let mut out = Vec::new();
    for market in &book.markets {
        for outcome in &market.outcomes {
            let Some(price) = outcome.price.as_ref() else {
                continue;
            };
            let Some(confidence) = confidence_from_value(price) else {
                continue;
            };
            let player = outcome.description.clone();
            out.push(PropPick {
                id: format!(
                    "{}:{}:{}:{}",
                    event.id,
                    market.key,
                    player.as_deref().unwrap_or("-"),
                    outcome.name
                ),
                game: game.clone(),
                start_time: event.commence_time,
                name: outcome.name.clone(),
                player,
                market: market.key.clone(),
                line: outcome.point,
                odds: price.clone(),
                confidence,
            });
        }
    }
    out
}

/// Highest confidence first; equal scores keep their input order.
pub fn rank_props(mut props: Vec<PropPick>, limit: usize) -> Vec<PropPick> {
    // sort_by is stable
    props.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    props.truncate(limit);
    props
}
