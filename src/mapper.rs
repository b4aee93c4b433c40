//! Raw game-log record → `PlayerGameStat`.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use thiserror::Error;

use crate::models::PlayerGameStat;
use crate::stats::{value_as_i64, RawRecord};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapError {
    #[error("missing field {0}")]
    Missing(&'static str),
    #[error("unparseable game date {0:?}")]
    BadDate(String),
}

/// Map one game-log record. `player_id` is the id the log was requested for
/// and is used when the record does not carry its own.
pub fn map_game_row(record: &RawRecord, player_id: i64, season: &str) -> Result<PlayerGameStat, MapError> {
    let game_id = record
        .get("Game_ID")
        .or_else(|| record.get("GAME_ID"))
        .and_then(text)
        .filter(|s| !s.is_empty())
        .ok_or(MapError::Missing("Game_ID"))?;

    let raw_date = record
        .get("GAME_DATE")
        .and_then(Value::as_str)
        .ok_or(MapError::Missing("GAME_DATE"))?;
    let game_date = parse_game_date(raw_date).ok_or_else(|| MapError::BadDate(raw_date.to_string()))?;

    let is_home_game = record
        .get("MATCHUP")
        .and_then(Value::as_str)
        .map(|m| m.contains("vs."))
        .unwrap_or(false);

    let player_id = record
        .get("Player_ID")
        .or_else(|| record.get("PLAYER_ID"))
        .and_then(value_as_i64)
        .unwrap_or(player_id);

    let int = |key: &str| record.get(key).and_then(value_as_i64).and_then(|v| i32::try_from(v).ok());

    Ok(PlayerGameStat {
        game_id,
        player_id,
        game_date,
        season: season.to_string(),
        is_home_game,
        minutes_played: record.get("MIN").and_then(text),
        points: int("PTS"),
        rebounds: int("REB"),
        assists: int("AST"),
        steals: int("STL"),
        blocks: int("BLK"),
        turnovers: int("TOV"),
        plus_minus: int("PLUS_MINUS"),
        fg_made: int("FGM"),
        fg_attempted: int("FGA"),
        fg3_made: int("FG3M"),
        fg3_attempted: int("FG3A"),
        ft_made: int("FTM"),
        ft_attempted: int("FTA"),
    })
}

/// Provider dates look like `"APR 09, 2024"`; some endpoints send ISO dates.
pub fn parse_game_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt);
    }
    let titled = title_case_month(raw);
    ["%b %d, %Y", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&titled, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn title_case_month(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_word = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphabetic() {
            if in_word {
                out.push(ch.to_ascii_lowercase());
            } else {
                out.push(ch.to_ascii_uppercase());
            }
            in_word = true;
        } else {
            out.push(ch);
            in_word = false;
        }
    }
    out
}

/// Text form of a scalar; whole floats lose their `.0` so minutes read `"34"`.
fn text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 => Some(format!("{}", f as i64)),
            _ => Some(n.to_string()),
        },
        _ => None,
    }
}
