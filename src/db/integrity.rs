//! Post-ingestion diagnostics. Everything here reports; only `remove_duplicates`
//! changes data, and only when asked to from the CLI.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::store::MemoryStatStore;

/// Regular-season schedule length
pub const MAX_GAMES_PER_SEASON: i64 = 82;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct OverLimitSeason {
    pub player_id: i64,
    pub full_name: Option<String>,
    pub season: Option<String>,
    pub games: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct NullStatRow {
    pub player_id: i64,
    pub game_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct OrphanPlayer {
    pub player_id: i64,
    pub full_name: Option<String>,
}

/// Stat rows whose player has no `players` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct OrphanStats {
    pub player_id: i64,
    pub games: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct DuplicateGroup {
    pub player_id: i64,
    pub game_id: String,
    pub copies: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub over_limit: Vec<OverLimitSeason>,
    pub null_stats: Vec<NullStatRow>,
    pub players_without_stats: Vec<OrphanPlayer>,
    pub stats_without_player: Vec<OrphanStats>,
    pub duplicates: Vec<DuplicateGroup>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.over_limit.is_empty()
            && self.null_stats.is_empty()
            && self.players_without_stats.is_empty()
            && self.stats_without_player.is_empty()
            && self.duplicates.is_empty()
    }

    pub fn log(&self) {
        if self.over_limit.is_empty() {
            info!("All player-seasons have {} or fewer games", MAX_GAMES_PER_SEASON);
        } else {
            warn!(
                "Found {} player-seasons with more than {} games:",
                self.over_limit.len(),
                MAX_GAMES_PER_SEASON
            );
            for row in self.over_limit.iter().take(10) {
                warn!(
                    "  {} (ID: {}): {} games in {}",
                    row.full_name.as_deref().unwrap_or("?"),
                    row.player_id,
                    row.games,
                    row.season.as_deref().unwrap_or("?")
                );
            }
        }

        if !self.null_stats.is_empty() {
            warn!(
                "Found {} stat rows with null points/rebounds/assists",
                self.null_stats.len()
            );
            for row in self.null_stats.iter().take(10) {
                warn!("  player {} game {}", row.player_id, row.game_id);
            }
        }

        if !self.players_without_stats.is_empty() {
            warn!(
                "Found {} players with no stored games",
                self.players_without_stats.len()
            );
        }

        if !self.stats_without_player.is_empty() {
            warn!(
                "Found {} players with stored games but no player row",
                self.stats_without_player.len()
            );
            for row in self.stats_without_player.iter().take(10) {
                warn!("  player {}: {} games", row.player_id, row.games);
            }
        }

        if !self.duplicates.is_empty() {
            warn!(
                "Found {} duplicated (player, game) pairs",
                self.duplicates.len()
            );
        }
    }

    /// Same checks over an in-process store.
    pub fn from_memory(store: &MemoryStatStore) -> Self {
        let mut per_season: BTreeMap<(i64, String), i64> = BTreeMap::new();
        for stat in store.stats.values() {
            *per_season
                .entry((stat.player_id, stat.season.clone()))
                .or_default() += 1;
        }

        let over_limit = per_season
            .into_iter()
            .filter(|(_, games)| *games > MAX_GAMES_PER_SEASON)
            .map(|((player_id, season), games)| OverLimitSeason {
                player_id,
                full_name: store.players.get(&player_id).map(|p| p.full_name.clone()),
                season: Some(season),
                games,
            })
            .collect();

        let null_stats = store
            .stats
            .values()
            .filter(|s| s.points.is_none() || s.rebounds.is_none() || s.assists.is_none())
            .map(|s| NullStatRow {
                player_id: s.player_id,
                game_id: s.game_id.clone(),
            })
            .collect();

        let players_without_stats = store
            .players
            .values()
            .filter(|p| !store.stats.keys().any(|(pid, _)| *pid == p.player_id))
            .map(|p| OrphanPlayer {
                player_id: p.player_id,
                full_name: Some(p.full_name.clone()),
            })
            .collect();

        let mut orphan_games: BTreeMap<i64, i64> = BTreeMap::new();
        for (player_id, _) in store.stats.keys() {
            if !store.players.contains_key(player_id) {
                *orphan_games.entry(*player_id).or_default() += 1;
            }
        }
        let stats_without_player = orphan_games
            .into_iter()
            .map(|(player_id, games)| OrphanStats { player_id, games })
            .collect();

        // Keyed map: duplicates cannot exist in memory
        Self {
            over_limit,
            null_stats,
            players_without_stats,
            stats_without_player,
            duplicates: Vec::new(),
        }
    }
}

pub async fn run_checks(pool: &PgPool) -> Result<IntegrityReport> {
    let over_limit: Vec<OverLimitSeason> = sqlx::query_as(
        r#"
        SELECT ps.player_id::bigint AS player_id, p.full_name, ps.season, COUNT(*) AS games
        FROM player_stats ps
        LEFT JOIN players p ON p.player_id = ps.player_id
        GROUP BY ps.player_id, p.full_name, ps.season
        HAVING COUNT(*) > $1
        ORDER BY games DESC
        "#,
    )
    .bind(MAX_GAMES_PER_SEASON)
    .fetch_all(pool)
    .await
    .context("check games per season")?;

    let null_stats: Vec<NullStatRow> = sqlx::query_as(
        r#"
        SELECT player_id::bigint AS player_id, game_id
        FROM player_stats
        WHERE points IS NULL OR rebounds IS NULL OR assists IS NULL
        ORDER BY player_id, game_id
        "#,
    )
    .fetch_all(pool)
    .await
    .context("check null stat columns")?;

    let players_without_stats: Vec<OrphanPlayer> = sqlx::query_as(
        r#"
        SELECT p.player_id::bigint AS player_id, p.full_name
        FROM players p
        WHERE NOT EXISTS (SELECT 1 FROM player_stats ps WHERE ps.player_id = p.player_id)
        ORDER BY p.player_id
        "#,
    )
    .fetch_all(pool)
    .await
    .context("check players without stats")?;

    let stats_without_player: Vec<OrphanStats> = sqlx::query_as(
        r#"
        SELECT ps.player_id::bigint AS player_id, COUNT(*) AS games
        FROM player_stats ps
        WHERE NOT EXISTS (SELECT 1 FROM players p WHERE p.player_id = ps.player_id)
        GROUP BY ps.player_id
        ORDER BY ps.player_id
        "#,
    )
    .fetch_all(pool)
    .await
    .context("check stats without a player")?;

    let duplicates = find_duplicates(pool).await?;

    Ok(IntegrityReport {
        over_limit,
        null_stats,
        players_without_stats,
        stats_without_player,
        duplicates,
    })
}

pub async fn find_duplicates(pool: &PgPool) -> Result<Vec<DuplicateGroup>> {
    sqlx::query_as(
        r#"
        SELECT player_id::bigint AS player_id, game_id, COUNT(*) AS copies
        FROM player_stats
        GROUP BY player_id, game_id
        HAVING COUNT(*) > 1
        "#,
    )
    .fetch_all(pool)
    .await
    .context("find duplicate stat rows")
}

/// Keep the lowest `id` of every duplicated (player, game) pair and delete the
/// rest. Only matters for tables created before the unique constraint.
pub async fn remove_duplicates(pool: &PgPool) -> Result<u64> {
    let duplicates = find_duplicates(pool).await?;
    if duplicates.is_empty() {
        info!("No duplicates found. Database is clean.");
        return Ok(0);
    }
    info!("Found {} sets of duplicate entries", duplicates.len());

    let mut tx = pool.begin().await?;
    let deleted = sqlx::query(
        r#"
        DELETE FROM player_stats ps
        USING player_stats keep
        WHERE ps.player_id = keep.player_id
          AND ps.game_id = keep.game_id
          AND ps.id > keep.id
        "#,
    )
    .execute(&mut *tx)
    .await
    .context("delete duplicate stat rows")?
    .rows_affected();
    tx.commit().await?;

    info!("Successfully removed {} duplicate entries", deleted);

    let remaining = find_duplicates(pool).await?;
    if remaining.is_empty() {
        info!("All duplicates successfully removed");
    } else {
        warn!("There are still {} sets of duplicates remaining", remaining.len());
    }
    Ok(deleted)
}
