//! Historical game-log ingestion.
//!
//! Sequential: one player, one season, one game at a time, paced by
//! the stats client's rate limiter. A run can be interrupted and resumed; the
//! cache and the retry-queue snapshot carry state across runs and every write
//! is an upsert by natural key.

pub mod state;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheKey, ResponseCache};
use crate::config::IngestConfig;
use crate::db::StatStore;
use crate::error::FetchError;
use crate::mapper::map_game_row;
use crate::models::{Player, UpsertOutcome};
use crate::retry_queue::{RetryEntry, RetryQueue, RetryVerdict};
use crate::stats::{self, parse_result_set, RawRecord, RosterPlayer, StatsProvider};

pub use state::{InvalidTransition, SeasonState};

/// Counters reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub players_seen: u64,
    pub seasons_stored: u64,
    pub requests_made: u64,
    pub cache_hits: u64,
    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub rows_skipped: u64,
    pub rows_malformed: u64,
    pub errors: u64,
    pub rate_limit_hits: u64,
    pub retries_queued: u64,
    pub retries_recovered: u64,
    pub retries_dropped: u64,
    pub pairs_skipped: u64,
}

impl IngestSummary {
    pub fn log(&self, elapsed: Duration) {
        info!(
            "Ingestion finished in {:.1}s: {} players, {} seasons stored",
            elapsed.as_secs_f64(),
            self.players_seen,
            self.seasons_stored
        );
        info!(
            "requests={} cache_hits={} rate_limit_hits={}",
            self.requests_made, self.cache_hits, self.rate_limit_hits
        );
        info!(
            "rows inserted={} updated={} skipped={} malformed={} errors={}",
            self.rows_inserted, self.rows_updated, self.rows_skipped, self.rows_malformed, self.errors
        );
        info!(
            "retry queue: queued={} recovered={} dropped={} already_stored={}",
            self.retries_queued, self.retries_recovered, self.retries_dropped, self.pairs_skipped
        );
    }
}

/// Orchestrates provider → cache → mapper → store for a roster.
pub struct Ingestor<P, S> {
    provider: P,
    store: S,
    cache: ResponseCache,
    queue: RetryQueue,
    queue_path: PathBuf,
    checkpoint_every: usize,
    max_retries: u32,
    retry_base_wait: Duration,
    states: HashMap<(i64, String), SeasonState>,
    processed: HashSet<(i64, String)>,
    summary: IngestSummary,
    /// When false, the queue snapshot and the cache are read but never written
    persist: bool,
}

impl<P: StatsProvider, S: StatStore> Ingestor<P, S> {
    /// Build an ingestor, picking up any retry queue left by an earlier run.
    pub async fn new(provider: P, store: S, config: &IngestConfig) -> Result<Self> {
        let queue = RetryQueue::load(&config.retry_queue_path).await?;
        Ok(Self {
            provider,
            store,
            cache: ResponseCache::new(config.cache_dir.clone()),
            queue,
            queue_path: config.retry_queue_path.clone(),
            checkpoint_every: config.checkpoint_every.max(1),
            max_retries: config.max_retries,
            retry_base_wait: config.retry_base_wait,
            states: HashMap::new(),
            processed: HashSet::new(),
            summary: IngestSummary::default(),
            persist: true,
        })
    }

    /// Leave the on-disk retry queue and cache exactly as found.
    pub fn read_only(mut self) -> Self {
        self.persist = false;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    pub fn state_of(&self, player_id: i64, season: &str) -> SeasonState {
        self.states
            .get(&(player_id, season.to_string()))
            .copied()
            .unwrap_or(SeasonState::Pending)
    }

    /// Counters so far, with provider usage folded in.
    pub fn summary(&self) -> IngestSummary {
        let usage = self.provider.usage();
        IngestSummary {
            requests_made: usage.requests,
            rate_limit_hits: usage.rate_limit_hits,
            ..self.summary.clone()
        }
    }

    /// Full run: roster, main pass, retry drain.
    pub async fn run(&mut self, today: NaiveDate, seasons: usize, player_limit: Option<usize>) -> Result<IngestSummary> {
        let started = Instant::now();
        let season_list = stats::recent_seasons(today, seasons);
        info!("Starting historical stats ingestion");
        info!("Will collect data for seasons: {}", season_list.join(", "));

        let roster_season = stats::current_season(today);
        let mut players = match self.provider.active_players(&roster_season).await {
            Ok(players) => {
                info!("Found {} active players", players.len());
                players
            }
            Err(e) => {
                error!("Error fetching active players: {}", e);
                self.summary.errors += 1;
                Vec::new()
            }
        };
        if let Some(limit) = player_limit {
            players.truncate(limit);
        }

        self.ingest_players(&players, &season_list).await?;
        self.drain_retry_queue().await?;

        let summary = self.summary();
        summary.log(started.elapsed());
        Ok(summary)
    }

    /// Main pass over `players` × `seasons`. Ends with a commit and a queue snapshot.
    pub async fn ingest_players(&mut self, players: &[RosterPlayer], seasons: &[String]) -> Result<()> {
        let started = Instant::now();
        let total = players.len();

        for (idx, roster) in players.iter().enumerate() {
            info!("Processing player {}/{}: {}", idx + 1, total, roster.full_name);
            self.summary.players_seen += 1;

            let player = Player {
                player_id: roster.id,
                full_name: roster.full_name.clone(),
                is_active: roster.is_active,
            };
            // Games are only written once their player row exists
            if let Err(e) = self.store.upsert_player(&player).await {
                error!("Error storing player {}: {:?}", roster.full_name, e);
                self.summary.errors += 1;
                continue;
            }

            for season in seasons {
                self.ingest_season(roster.id, &roster.full_name, season).await;
            }

            if (idx + 1) % self.checkpoint_every == 0 {
                self.checkpoint().await?;
                let done = idx + 1;
                let per_player = started.elapsed() / done as u32;
                let eta = per_player * (total - done) as u32;
                info!(
                    "Checkpoint {}/{} players; {} queued for retry; ETA {}s",
                    done,
                    total,
                    self.queue.len(),
                    eta.as_secs()
                );
            }
        }

        self.checkpoint().await
    }

    /// Commit outstanding writes and persist the retry queue.
    async fn checkpoint(&mut self) -> Result<()> {
        self.store.commit().await?;
        self.save_queue().await
    }

    async fn save_queue(&self) -> Result<()> {
        if self.persist {
            self.queue.save(&self.queue_path).await?;
        }
        Ok(())
    }

    async fn ingest_season(&mut self, player_id: i64, player_name: &str, season: &str) {
        let key = (player_id, season.to_string());
        let current = self.state_of(player_id, season);
        if matches!(current, SeasonState::Stored | SeasonState::Skipped) {
            debug!("{} {} already stored this run", player_id, season);
            self.summary.pairs_skipped += 1;
            if current == SeasonState::Stored {
                self.advance(&key, SeasonState::Skipped);
            }
            return;
        }
        if !self.advance(&key, SeasonState::FetchingGames) {
            return;
        }

        match self.load_game_log(player_id, season).await {
            Ok(records) => {
                info!(
                    "Fetched {} games for player {} in season {}",
                    records.len(),
                    player_id,
                    season
                );
                self.process_records(&key, &records).await;
            }
            Err(e) => {
                warn!(
                    "Queueing {} ({}) season {} for retry: {}",
                    player_name, player_id, season, e
                );
                self.summary.errors += 1;
                if self.queue.enqueue(player_id, player_name, season, Utc::now()) {
                    self.summary.retries_queued += 1;
                }
                self.advance(&key, SeasonState::RetryQueued);
            }
        }
    }

    /// Cached body if present, otherwise fetch through the provider and cache it.
    ///
    /// Only bodies that decode are cached, so a bad response is refetched next time.
    async fn load_game_log(&mut self, player_id: i64, season: &str) -> Result<Vec<RawRecord>, FetchError> {
        let cache_key = CacheKey::game_log(player_id, season);
        if let Some(body) = self.cache.get(&cache_key).await {
            match parse_result_set(&body) {
                Ok(records) => {
                    self.summary.cache_hits += 1;
                    return Ok(records);
                }
                Err(e) => {
                    warn!("Discarding corrupt cache entry for {} {}: {}", player_id, season, e);
                    if self.persist {
                        if let Err(e) = self.cache.remove(&cache_key).await {
                            warn!("{:?}", e);
                        }
                    }
                }
            }
        }

        let body = self.provider.game_log(player_id, season).await?;
        let records = parse_result_set(&body)?;
        if self.persist {
            if let Err(e) = self.cache.put(&cache_key, &body).await {
                warn!("Could not cache game log {} {}: {:?}", player_id, season, e);
            }
        }
        Ok(records)
    }

    async fn process_records(&mut self, key: &(i64, String), records: &[RawRecord]) {
        let (player_id, season) = key;
        self.advance(key, SeasonState::ProcessingGames);

        for record in records {
            let stat = match map_game_row(record, *player_id, season) {
                Ok(stat) => stat,
                Err(e) => {
                    warn!("Skipping malformed game row for player {}: {}", player_id, e);
                    self.summary.rows_malformed += 1;
                    continue;
                }
            };

            let game_key = stat.key();
            if self.processed.contains(&game_key) {
                self.summary.rows_skipped += 1;
                continue;
            }

            match self.store.upsert_game_stat(&stat).await {
                Ok(UpsertOutcome::Inserted) => self.summary.rows_inserted += 1,
                Ok(UpsertOutcome::Updated) => self.summary.rows_updated += 1,
                Err(e) => {
                    error!("Error storing stats data: {:?}", e);
                    self.summary.errors += 1;
                    continue;
                }
            }
            self.processed.insert(game_key);
        }

        self.advance(key, SeasonState::Stored);
        self.summary.seasons_stored += 1;
    }

    /// Retry every queued pair until it succeeds or runs out of retries.
    /// Waits `base × 2^retries` after each entry's last attempt.
    pub async fn drain_retry_queue(&mut self) -> Result<()> {
        self.store.commit().await?;
        if self.queue.is_empty() {
            return Ok(());
        }
        info!("Draining retry queue ({} entries)", self.queue.len());

        while let Some(entry) = self.queue.pop_front() {
            let key = (entry.player_id, entry.season.clone());
            let current = self.state_of(entry.player_id, &entry.season);
            if matches!(current, SeasonState::Stored | SeasonState::Skipped) {
                debug!("{} {} stored since it was queued", entry.player_id, entry.season);
                self.summary.pairs_skipped += 1;
                if current == SeasonState::Stored {
                    self.advance(&key, SeasonState::Skipped);
                }
                self.save_queue().await?;
                continue;
            }

            let wait = entry.remaining(self.retry_base_wait, Utc::now());
            if !wait.is_zero() {
                info!(
                    "Waiting {}s before retrying {} {} (attempt {})",
                    wait.as_secs(),
                    entry.player_name,
                    entry.season,
                    entry.retries + 1
                );
                tokio::time::sleep(wait).await;
            }

            // Entries from an earlier run start out pending here
            if self.state_of(entry.player_id, &entry.season) == SeasonState::Pending {
                self.advance(&key, SeasonState::FetchingGames);
                self.advance(&key, SeasonState::RetryQueued);
            }
            self.advance(&key, SeasonState::FetchingGames);

            match self.load_game_log(entry.player_id, &entry.season).await {
                Ok(records) => {
                    let player = Player {
                        player_id: entry.player_id,
                        full_name: entry.player_name.clone(),
                        is_active: true,
                    };
                    match self.store.upsert_player(&player).await {
                        Ok(_) => {
                            self.process_records(&key, &records).await;
                            self.summary.retries_recovered += 1;
                            info!("Recovered {} season {}", entry.player_name, entry.season);
                        }
                        Err(e) => {
                            error!("Error storing player {}: {:?}", entry.player_name, e);
                            self.summary.errors += 1;
                            self.fail_attempt(&key, entry);
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "Retry {} for {} {} failed: {}",
                        entry.retries + 1,
                        entry.player_name,
                        entry.season,
                        e
                    );
                    self.summary.errors += 1;
                    self.fail_attempt(&key, entry);
                }
            }

            self.store.commit().await?;
            self.save_queue().await?;
        }

        Ok(())
    }

    fn fail_attempt(&mut self, key: &(i64, String), entry: RetryEntry) {
        self.advance(key, SeasonState::RetryQueued);
        match self.queue.record_failure(entry, self.max_retries, Utc::now()) {
            RetryVerdict::Requeued { retries } => {
                debug!("{} {} requeued (retries={})", key.0, key.1, retries);
            }
            RetryVerdict::Exhausted => {
                self.advance(key, SeasonState::Failed);
                self.summary.retries_dropped += 1;
            }
        }
    }

    /// Move a pair to `next`; refuses (and logs) transitions the lifecycle forbids.
    fn advance(&mut self, key: &(i64, String), next: SeasonState) -> bool {
        let current = self.states.get(key).copied().unwrap_or(SeasonState::Pending);
        match current.transition(next) {
            Ok(state) => {
                self.states.insert(key.clone(), state);
                true
            }
            Err(e) => {
                error!("{} {}: {}", key.0, key.1, e);
                false
            }
        }
    }
}
