use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Row in `players`, keyed by the provider's person id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub player_id: i64,
    pub full_name: String,
    pub is_active: bool,
}

/// Row in `player_stats`, keyed by (player_id, game_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerGameStat {
    pub game_id: String,
    pub player_id: i64,
    pub game_date: NaiveDateTime,
    pub season: String,
    pub is_home_game: bool,
    /// Kept as text, the way the provider reports it
    pub minutes_played: Option<String>,
    pub points: Option<i32>,
    pub rebounds: Option<i32>,
    pub assists: Option<i32>,
    pub steals: Option<i32>,
    pub blocks: Option<i32>,
    pub turnovers: Option<i32>,
    pub plus_minus: Option<i32>,
    pub fg_made: Option<i32>,
    pub fg_attempted: Option<i32>,
    pub fg3_made: Option<i32>,
    pub fg3_attempted: Option<i32>,
    pub ft_made: Option<i32>,
    pub ft_attempted: Option<i32>,
}

impl PlayerGameStat {
    pub fn key(&self) -> (i64, String) {
        (self.player_id, self.game_id.clone())
    }
}

/// Result of an upsert by natural key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}
