use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use nba_insights::config::IngestConfig;
use nba_insights::db::integrity::IntegrityReport;
use nba_insights::cache::{CacheKey, ResponseCache};
use nba_insights::db::{MemoryStatStore, StatStore};
use nba_insights::error::FetchError;
use nba_insights::models::{Player, PlayerGameStat, UpsertOutcome};
use nba_insights::ingest::{Ingestor, SeasonState};
use nba_insights::retry::RetryPolicy;
use nba_insights::retry_queue::RetryQueue;
use nba_insights::stats::{ProviderUsage, RosterPlayer, StatsProvider};

const TATUM: i64 = 1628369;
const BROWN: i64 = 1627759;
const HOLIDAY: i64 = 201950;
const SEASON: &str = "2023-24";

fn game_log_fixture() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/game_log_2023_24.json");
    std::fs::read_to_string(path).unwrap()
}

fn short_log(games: &[&str]) -> String {
    let rows: Vec<String> = games
        .iter()
        .map(|g| format!(r#"["{g}","APR 01, 2024","BOS vs. ATL",30,20,5,5]"#))
        .collect();
    format!(
        r#"{{"resultSets":[{{"name":"PlayerGameLog","headers":["Game_ID","GAME_DATE","MATCHUP","MIN","PTS","REB","AST"],"rowSet":[{}]}}]}}"#,
        rows.join(",")
    )
}

/// In-memory provider. Pairs in `failing` error on every call.
#[derive(Default)]
struct FakeProvider {
    roster: Vec<RosterPlayer>,
    logs: HashMap<(i64, String), String>,
    failing: HashSet<(i64, String)>,
    calls: Mutex<Vec<(i64, String)>>,
}

impl FakeProvider {
    fn with_logs() -> Self {
        let mut logs = HashMap::new();
        logs.insert((TATUM, SEASON.to_string()), game_log_fixture());
        logs.insert((BROWN, SEASON.to_string()), short_log(&["0022301195", "0022301180"]));
        logs.insert((BROWN, "2022-23".to_string()), short_log(&["0022201001"]));
        logs.insert((HOLIDAY, SEASON.to_string()), short_log(&["0022301195"]));
        Self {
            roster: roster(),
            logs,
            ..Self::default()
        }
    }

    fn fail(mut self, player_id: i64, season: &str) -> Self {
        self.failing.insert((player_id, season.to_string()));
        self
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl StatsProvider for FakeProvider {
    async fn active_players(&self, _season: &str) -> Result<Vec<RosterPlayer>, FetchError> {
        Ok(self.roster.clone())
    }

    async fn game_log(&self, player_id: i64, season: &str) -> Result<String, FetchError> {
        let key = (player_id, season.to_string());
        self.calls.lock().unwrap().push(key.clone());
        if self.failing.contains(&key) {
            return Err(FetchError::Status {
                status: 503,
                body: "Service Unavailable".into(),
            });
        }
        // No log at all: the player did not play that season
        Ok(self.logs.get(&key).cloned().unwrap_or_else(|| short_log(&[])))
    }

    fn usage(&self) -> ProviderUsage {
        ProviderUsage {
            requests: self.total_calls() as u64,
            rate_limit_hits: 0,
        }
    }
}

fn roster() -> Vec<RosterPlayer> {
    [(TATUM, "Jayson Tatum"), (BROWN, "Jaylen Brown"), (HOLIDAY, "Jrue Holiday")]
        .into_iter()
        .map(|(id, name)| RosterPlayer {
            id,
            full_name: name.to_string(),
            is_active: true,
        })
        .collect()
}

fn test_config(dir: &Path) -> IngestConfig {
    IngestConfig {
        stats_base_url: "http://127.0.0.1:9".to_string(),
        seasons: 1,
        checkpoint_every: 2,
        max_retries: 3,
        retry_base_wait: Duration::ZERO,
        requests_per_minute: 600,
        http_retry: RetryPolicy::immediate(1),
        cache_dir: dir.join("cache"),
        retry_queue_path: dir.join("retry_queue.json"),
        player_limit: None,
    }
}

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("nba-insights-test-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Memory store that refuses to write one player's row.
struct RejectingStore {
    inner: MemoryStatStore,
    rejected: i64,
}

impl RejectingStore {
    fn new(inner: MemoryStatStore, rejected: i64) -> Self {
        Self { inner, rejected }
    }
}

#[async_trait]
impl StatStore for RejectingStore {
    async fn upsert_player(&mut self, player: &Player) -> Result<UpsertOutcome> {
        if player.player_id == self.rejected {
            bail!("players_pkey violated for {}", player.player_id);
        }
        self.inner.upsert_player(player).await
    }

    async fn upsert_game_stat(&mut self, stat: &PlayerGameStat) -> Result<UpsertOutcome> {
        self.inner.upsert_game_stat(stat).await
    }

    async fn commit(&mut self) -> Result<()> {
        self.inner.commit().await
    }
}

fn seasons() -> Vec<String> {
    vec![SEASON.to_string()]
}

#[tokio::test]
async fn always_failing_pair_is_queued_then_dropped() {
    let dir = scratch_dir();
    let config = test_config(&dir);
    let provider = FakeProvider::with_logs().fail(BROWN, SEASON);
    let mut ingestor = Ingestor::new(provider, MemoryStatStore::new(), &config).await.unwrap();

    ingestor.ingest_players(&roster(), &seasons()).await.unwrap();

    let queued = ingestor.queue().entries();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].player_id, BROWN);
    assert_eq!(queued[0].season, SEASON);
    assert_eq!(queued[0].retries, 0);
    assert_eq!(ingestor.state_of(BROWN, SEASON), SeasonState::RetryQueued);
    assert_eq!(ingestor.state_of(TATUM, SEASON), SeasonState::Stored);

    // The end-of-pass checkpoint wrote the same snapshot to disk
    let on_disk = RetryQueue::load(&config.retry_queue_path).await.unwrap();
    assert_eq!(on_disk.entries(), queued);

    ingestor.drain_retry_queue().await.unwrap();

    assert!(ingestor.queue().is_empty());
    assert_eq!(ingestor.state_of(BROWN, SEASON), SeasonState::Failed);
    assert!(RetryQueue::load(&config.retry_queue_path).await.unwrap().is_empty());

    let summary = ingestor.summary();
    assert_eq!(summary.retries_queued, 1);
    assert_eq!(summary.retries_dropped, 1);
    assert_eq!(summary.retries_recovered, 0);

    let store = ingestor.into_store();
    assert_eq!(store.games_for(BROWN, SEASON), 0);
    assert_eq!(store.games_for(TATUM, SEASON), 3);

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn drain_gives_up_after_max_retries_attempts() {
    let dir = scratch_dir();
    let config = test_config(&dir);
    let provider = FakeProvider::with_logs().fail(BROWN, SEASON);
    let mut ingestor = Ingestor::new(provider, MemoryStatStore::new(), &config).await.unwrap();

    ingestor.ingest_players(&roster(), &seasons()).await.unwrap();
    ingestor.drain_retry_queue().await.unwrap();

    let store = ingestor.store();
    assert!(store.commits >= 2);
    // One call in the main pass, then one per drain attempt
    let summary = ingestor.summary();
    assert_eq!(summary.errors, 1 + config.max_retries as u64);

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn malformed_and_repeated_rows_are_skipped() {
    let dir = scratch_dir();
    let config = test_config(&dir);
    let mut ingestor = Ingestor::new(FakeProvider::with_logs(), MemoryStatStore::new(), &config).await.unwrap();

    ingestor.ingest_players(&roster()[..1], &seasons()).await.unwrap();

    let summary = ingestor.summary();
    assert_eq!(summary.rows_inserted, 3);
    assert_eq!(summary.rows_skipped, 1);
    assert_eq!(summary.rows_malformed, 1);

    let store = ingestor.store();
    let game = &store.stats[&(TATUM, "0022301165".to_string())];
    assert!(!game.is_home_game);
    assert_eq!(game.points, Some(30));
    assert_eq!(game.minutes_played.as_deref(), Some("37"));
    assert_eq!(
        game.game_date,
        NaiveDate::from_ymd_opt(2024, 4, 11).unwrap().and_hms_opt(0, 0, 0).unwrap()
    );
    assert!(store.stats[&(TATUM, "0022301195".to_string())].is_home_game);

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn second_run_updates_in_place_from_cache() {
    let dir = scratch_dir();
    let config = test_config(&dir);

    let mut first = Ingestor::new(FakeProvider::with_logs(), MemoryStatStore::new(), &config).await.unwrap();
    first.ingest_players(&roster(), &seasons()).await.unwrap();
    let first_summary = first.summary();
    let store = first.into_store();
    let rows_after_first = store.stats.len();
    let players_after_first = store.players.len();
    assert_eq!(rows_after_first, 6);
    assert_eq!(first_summary.rows_inserted, 6);
    assert_eq!(first_summary.requests_made, 3);

    let provider = FakeProvider::with_logs();
    let mut second = Ingestor::new(provider, store, &config).await.unwrap();
    second.ingest_players(&roster(), &seasons()).await.unwrap();

    let summary = second.summary();
    assert_eq!(summary.requests_made, 0);
    assert_eq!(summary.cache_hits, 3);
    assert_eq!(summary.rows_inserted, 0);
    assert_eq!(summary.rows_updated, 6);

    let store = second.into_store();
    assert_eq!(store.stats.len(), rows_after_first);
    assert_eq!(store.players.len(), players_after_first);
    assert!(IntegrityReport::from_memory(&store).duplicates.is_empty());

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn queued_pair_is_recovered_by_the_next_run() {
    let dir = scratch_dir();
    let config = test_config(&dir);

    let provider = FakeProvider::with_logs().fail(BROWN, SEASON);
    let mut first = Ingestor::new(provider, MemoryStatStore::new(), &config).await.unwrap();
    first.ingest_players(&roster(), &seasons()).await.unwrap();
    let store = first.into_store();
    assert_eq!(RetryQueue::load(&config.retry_queue_path).await.unwrap().len(), 1);

    // Provider is healthy again; the snapshot is picked up at construction
    let mut second = Ingestor::new(FakeProvider::with_logs(), store, &config).await.unwrap();
    assert_eq!(second.queue().len(), 1);
    assert_eq!(second.state_of(BROWN, SEASON), SeasonState::Pending);

    second.drain_retry_queue().await.unwrap();

    assert!(second.queue().is_empty());
    assert_eq!(second.state_of(BROWN, SEASON), SeasonState::Stored);
    assert_eq!(second.summary().retries_recovered, 1);
    assert!(second.store().players.contains_key(&BROWN));
    assert_eq!(second.store().games_for(BROWN, SEASON), 2);

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn full_run_walks_the_roster_for_each_season() {
    let dir = scratch_dir();
    let mut config = test_config(&dir);
    config.seasons = 2;
    let provider = FakeProvider::with_logs();
    let mut ingestor = Ingestor::new(provider, MemoryStatStore::new(), &config).await.unwrap();

    let today = NaiveDate::from_ymd_opt(2024, 11, 5).unwrap();
    let summary = ingestor.run(today, config.seasons, Some(2)).await.unwrap();

    assert_eq!(summary.players_seen, 2);
    assert_eq!(summary.seasons_stored, 4);
    assert_eq!(summary.requests_made, 4);

    let store = ingestor.store();
    assert_eq!(store.games_for(BROWN, "2022-23"), 1);
    assert_eq!(store.games_for(BROWN, SEASON), 2);
    assert!(store.players.contains_key(&TATUM));
    assert!(!store.players.contains_key(&HOLIDAY));

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn stored_pairs_are_not_refetched_in_the_same_run() {
    let dir = scratch_dir();
    let config = test_config(&dir);
    let provider = FakeProvider::with_logs();
    let mut ingestor = Ingestor::new(provider, MemoryStatStore::new(), &config).await.unwrap();

    ingestor.ingest_players(&roster(), &seasons()).await.unwrap();
    ingestor.ingest_players(&roster(), &seasons()).await.unwrap();

    // Pairs stored earlier in the same run are not fetched again
    let summary = ingestor.summary();
    assert_eq!(summary.requests_made, 3);
    assert_eq!(summary.pairs_skipped, 3);
    assert_eq!(ingestor.state_of(TATUM, SEASON), SeasonState::Skipped);

    // A third visit leaves the pair skipped
    ingestor.ingest_players(&roster()[..1], &seasons()).await.unwrap();
    assert_eq!(ingestor.summary().pairs_skipped, 4);
    assert_eq!(ingestor.state_of(TATUM, SEASON), SeasonState::Skipped);

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn games_are_not_stored_when_the_player_row_is_rejected() {
    let dir = scratch_dir();
    let config = test_config(&dir);
    let store = RejectingStore::new(MemoryStatStore::new(), BROWN);
    let mut ingestor = Ingestor::new(FakeProvider::with_logs(), store, &config).await.unwrap();

    ingestor.ingest_players(&roster(), &seasons()).await.unwrap();

    let summary = ingestor.summary();
    assert_eq!(summary.errors, 1);
    // BROWN's game log is never requested
    assert_eq!(summary.requests_made, 2);
    assert_eq!(ingestor.state_of(BROWN, SEASON), SeasonState::Pending);

    let store = ingestor.into_store().inner;
    assert!(!store.players.contains_key(&BROWN));
    assert_eq!(store.games_for(BROWN, SEASON), 0);
    assert!(store.stats.keys().all(|(player_id, _)| *player_id != BROWN));
    assert_eq!(store.games_for(TATUM, SEASON), 3);
    assert!(IntegrityReport::from_memory(&store).stats_without_player.is_empty());

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn drain_stores_no_games_when_the_player_row_is_rejected() {
    let dir = scratch_dir();
    let config = test_config(&dir);

    let provider = FakeProvider::with_logs().fail(BROWN, SEASON);
    let mut first = Ingestor::new(provider, MemoryStatStore::new(), &config).await.unwrap();
    first.ingest_players(&roster(), &seasons()).await.unwrap();
    let store = RejectingStore::new(first.into_store(), BROWN);

    let mut second = Ingestor::new(FakeProvider::with_logs(), store, &config).await.unwrap();
    second.drain_retry_queue().await.unwrap();

    let summary = second.summary();
    assert_eq!(summary.retries_recovered, 0);
    assert_eq!(summary.retries_dropped, 1);
    assert_eq!(second.state_of(BROWN, SEASON), SeasonState::Failed);
    assert_eq!(second.into_store().inner.games_for(BROWN, SEASON), 0);

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn read_only_run_leaves_queue_and_cache_on_disk() {
    let dir = scratch_dir();
    let config = test_config(&dir);

    let provider = FakeProvider::with_logs().fail(BROWN, SEASON);
    let mut first = Ingestor::new(provider, MemoryStatStore::new(), &config).await.unwrap();
    first.ingest_players(&roster(), &seasons()).await.unwrap();
    let snapshot = std::fs::read(&config.retry_queue_path).unwrap();

    let cache = ResponseCache::new(config.cache_dir.clone());
    let brown_log = cache.path_for(&CacheKey::game_log(BROWN, SEASON));
    assert!(!brown_log.exists());

    // A healthy provider would recover BROWN and empty the queue
    let mut dry = Ingestor::new(FakeProvider::with_logs(), MemoryStatStore::new(), &config)
        .await
        .unwrap()
        .read_only();
    dry.ingest_players(&roster()[..1], &seasons()).await.unwrap();
    dry.drain_retry_queue().await.unwrap();

    assert!(dry.queue().is_empty());
    assert_eq!(dry.summary().retries_recovered, 1);
    assert_eq!(dry.store().games_for(BROWN, SEASON), 2);

    assert_eq!(std::fs::read(&config.retry_queue_path).unwrap(), snapshot);
    assert_eq!(RetryQueue::load(&config.retry_queue_path).await.unwrap().len(), 1);
    assert!(!brown_log.exists());

    std::fs::remove_dir_all(dir).ok();
}
