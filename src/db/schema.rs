//! Single definition of the two ingestion tables.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::{error, info};

pub const PLAYER_COLUMNS: &[&str] = &["id", "player_id", "full_name", "is_active"];

pub const PLAYER_STATS_COLUMNS: &[&str] = &[
    "id",
    "game_id",
    "player_id",
    "game_date",
    "season",
    "is_home_game",
    "minutes_played",
    "points",
    "assists",
    "rebounds",
    "steals",
    "blocks",
    "turnovers",
    "plus_minus",
    "fg_made",
    "fg_attempted",
    "fg3_made",
    "fg3_attempted",
    "ft_made",
    "ft_attempted",
];

const CREATE_PLAYERS: &str = r#"
    CREATE TABLE IF NOT EXISTS players (
        id SERIAL PRIMARY KEY,
        player_id INTEGER NOT NULL UNIQUE,
        full_name TEXT,
        is_active BOOLEAN DEFAULT TRUE
    )
"#;

// minutes_played stays TEXT: the provider reports it in more than one shape
const CREATE_PLAYER_STATS: &str = r#"
    CREATE TABLE IF NOT EXISTS player_stats (
        id SERIAL PRIMARY KEY,
        game_id TEXT NOT NULL,
        player_id INTEGER NOT NULL,
        game_date TIMESTAMP,
        season TEXT,
        is_home_game BOOLEAN,
        minutes_played TEXT,
        points INTEGER,
        assists INTEGER,
        rebounds INTEGER,
        steals INTEGER,
        blocks INTEGER,
        turnovers INTEGER,
        plus_minus INTEGER,
        fg_made INTEGER,
        fg_attempted INTEGER,
        fg3_made INTEGER,
        fg3_attempted INTEGER,
        ft_made INTEGER,
        ft_attempted INTEGER,
        CONSTRAINT uix_player_game UNIQUE (player_id, game_id)
    )
"#;

/// Create both tables if absent. With `reset`, drop them first.
pub async fn init(pool: &PgPool, reset: bool) -> Result<()> {
    let mut tx = pool.begin().await?;

    if reset {
        info!("Dropping existing tables...");
        sqlx::query("DROP TABLE IF EXISTS player_stats")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DROP TABLE IF EXISTS players")
            .execute(&mut *tx)
            .await?;
    }

    info!("Creating tables if they don't exist...");
    sqlx::query(CREATE_PLAYERS).execute(&mut *tx).await?;
    sqlx::query(CREATE_PLAYER_STATS).execute(&mut *tx).await?;
    tx.commit().await.context("commit schema")?;

    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .context("database check after init")?;

    info!("Database initialization completed");
    Ok(())
}

/// Tables (or columns) that are required but absent.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SchemaReport {
    pub missing_tables: Vec<String>,
    pub missing_columns: Vec<(String, Vec<String>)>,
}

impl SchemaReport {
    pub fn is_ok(&self) -> bool {
        self.missing_tables.is_empty() && self.missing_columns.is_empty()
    }
}

/// Compare the live columns of each table against what the pipeline needs.
pub fn compare_columns(
    table: &str,
    required: &[&str],
    present: &HashSet<String>,
    report: &mut SchemaReport,
) {
    if present.is_empty() {
        report.missing_tables.push(table.to_string());
        return;
    }
    let mut missing: Vec<String> = required
        .iter()
        .filter(|c| !present.contains(**c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        missing.sort();
        report.missing_columns.push((table.to_string(), missing));
    }
}

pub async fn verify(pool: &PgPool) -> Result<SchemaReport> {
    let mut report = SchemaReport::default();

    for (table, required) in [("players", PLAYER_COLUMNS), ("player_stats", PLAYER_STATS_COLUMNS)] {
        let present: HashSet<String> = sqlx::query_scalar(
            r#"
            SELECT column_name::text
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            "#,
        )
        .bind(table)
        .fetch_all(pool)
        .await
        .with_context(|| format!("inspect columns of {}", table))?
        .into_iter()
        .collect();

        compare_columns(table, required, &present, &mut report);
    }

    for table in &report.missing_tables {
        error!("Missing table: {}", table);
    }
    for (table, cols) in &report.missing_columns {
        error!("Table {} is missing columns: {}", table, cols.join(", "));
    }
    Ok(report)
}
