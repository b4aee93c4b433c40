//! Upserts by natural key: `players.player_id` and `player_stats (player_id, game_id)`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Acquire, PgConnection, PgPool, Postgres, Transaction};
use std::collections::BTreeMap;
use tracing::debug;

use crate::models::{Player, PlayerGameStat, UpsertOutcome};

/// Write side of the ingestion pipeline.
///
/// Writes accumulate until `commit`; a failed write leaves earlier
/// uncommitted writes intact.
#[async_trait]
pub trait StatStore: Send {
    async fn upsert_player(&mut self, player: &Player) -> Result<UpsertOutcome>;

    async fn upsert_game_stat(&mut self, stat: &PlayerGameStat) -> Result<UpsertOutcome>;

    async fn commit(&mut self) -> Result<()>;
}

/// PostgreSQL store. Holds one open transaction between commits; every row
/// runs inside its own savepoint so a bad row rolls back alone.
pub struct PgStatStore {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgStatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, tx: None }
    }

    async fn transaction(&mut self) -> Result<&mut Transaction<'static, Postgres>> {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => self.pool.begin().await.context("begin transaction")?,
        };
        Ok(self.tx.insert(tx))
    }
}

#[async_trait]
impl StatStore for PgStatStore {
    async fn upsert_player(&mut self, player: &Player) -> Result<UpsertOutcome> {
        let tx = self.transaction().await?;
        let mut savepoint = tx.begin().await?;
        match upsert_player_sql(&mut savepoint, player).await {
            Ok(outcome) => {
                savepoint.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                savepoint.rollback().await?;
                Err(e).with_context(|| format!("upsert player {}", player.player_id))
            }
        }
    }

    async fn upsert_game_stat(&mut self, stat: &PlayerGameStat) -> Result<UpsertOutcome> {
        let tx = self.transaction().await?;
        let mut savepoint = tx.begin().await?;
        match upsert_game_stat_sql(&mut savepoint, stat).await {
            Ok(outcome) => {
                savepoint.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                savepoint.rollback().await?;
                Err(e).with_context(|| {
                    format!("upsert stats player {} game {}", stat.player_id, stat.game_id)
                })
            }
        }
    }

    async fn commit(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await.context("commit ingestion batch")?;
            debug!("committed ingestion batch");
        }
        Ok(())
    }
}

async fn upsert_player_sql(conn: &mut PgConnection, player: &Player) -> Result<UpsertOutcome> {
    let inserted: bool = sqlx::query_scalar(
        r#"
        INSERT INTO players (player_id, full_name, is_active)
        VALUES ($1, $2, $3)
        ON CONFLICT (player_id) DO UPDATE SET
            full_name = EXCLUDED.full_name,
            is_active = EXCLUDED.is_active
        RETURNING (xmax = 0)
        "#,
    )
    .bind(player.player_id)
    .bind(&player.full_name)
    .bind(player.is_active)
    .fetch_one(conn)
    .await?;

    Ok(if inserted {
        UpsertOutcome::Inserted
    } else {
        UpsertOutcome::Updated
    })
}

async fn upsert_game_stat_sql(conn: &mut PgConnection, s: &PlayerGameStat) -> Result<UpsertOutcome> {
    let inserted: bool = sqlx::query_scalar(
        r#"
        INSERT INTO player_stats (
            game_id, player_id, game_date, season, is_home_game, minutes_played,
            points, rebounds, assists, steals, blocks, turnovers, plus_minus,
            fg_made, fg_attempted, fg3_made, fg3_attempted, ft_made, ft_attempted
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        ON CONFLICT (player_id, game_id) DO UPDATE SET
            game_date = EXCLUDED.game_date,
            season = EXCLUDED.season,
            is_home_game = EXCLUDED.is_home_game,
            minutes_played = EXCLUDED.minutes_played,
            points = EXCLUDED.points,
            rebounds = EXCLUDED.rebounds,
            assists = EXCLUDED.assists,
            steals = EXCLUDED.steals,
            blocks = EXCLUDED.blocks,
            turnovers = EXCLUDED.turnovers,
            plus_minus = EXCLUDED.plus_minus,
            fg_made = EXCLUDED.fg_made,
            fg_attempted = EXCLUDED.fg_attempted,
            fg3_made = EXCLUDED.fg3_made,
            fg3_attempted = EXCLUDED.fg3_attempted,
            ft_made = EXCLUDED.ft_made,
            ft_attempted = EXCLUDED.ft_attempted
        RETURNING (xmax = 0)
        "#,
    )
    .bind(&s.game_id)
    .bind(s.player_id)
    .bind(s.game_date)
    .bind(&s.season)
    .bind(s.is_home_game)
    .bind(&s.minutes_played)
    .bind(s.points)
    .bind(s.rebounds)
    .bind(s.assists)
    .bind(s.steals)
    .bind(s.blocks)
    .bind(s.turnovers)
    .bind(s.plus_minus)
    .bind(s.fg_made)
    .bind(s.fg_attempted)
    .bind(s.fg3_made)
    .bind(s.fg3_attempted)
    .bind(s.ft_made)
    .bind(s.ft_attempted)
    .fetch_one(conn)
    .await?;

    Ok(if inserted {
        UpsertOutcome::Inserted
    } else {
        UpsertOutcome::Updated
    })
}

/// In-process store with the same natural-key semantics. Backs `--dry-run`
/// ingests, where nothing should reach the database.
#[derive(Debug, Default)]
pub struct MemoryStatStore {
    pub players: BTreeMap<i64, Player>,
    pub stats: BTreeMap<(i64, String), PlayerGameStat>,
    pub commits: usize,
}

impl MemoryStatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored rows for one player and season.
    pub fn games_for(&self, player_id: i64, season: &str) -> usize {
        self.stats
            .values()
            .filter(|s| s.player_id == player_id && s.season == season)
            .count()
    }
}

#[async_trait]
impl StatStore for MemoryStatStore {
    async fn upsert_player(&mut self, player: &Player) -> Result<UpsertOutcome> {
        Ok(match self.players.insert(player.player_id, player.clone()) {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        })
    }

    async fn upsert_game_stat(&mut self, stat: &PlayerGameStat) -> Result<UpsertOutcome> {
        Ok(match self.stats.insert(stat.key(), stat.clone()) {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        })
    }

    async fn commit(&mut self) -> Result<()> {
        self.commits += 1;
        Ok(())
    }
}
