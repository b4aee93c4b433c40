//! Persisted queue of (player, season) pairs whose fetch failed.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryEntry {
    pub player_id: i64,
    pub player_name: String,
    pub season: String,
    pub retries: u32,
    pub last_attempt: DateTime<Utc>,
}

impl RetryEntry {
    /// Wait required after `last_attempt` before the next try: base × 2^retries.
    pub fn cooldown(&self, base: Duration) -> Duration {
        base.saturating_mul(2u32.saturating_pow(self.retries.min(16)))
    }

    pub fn due_at(&self, base: Duration) -> DateTime<Utc> {
        let cooldown = chrono::Duration::from_std(self.cooldown(base))
            .unwrap_or_else(|_| chrono::Duration::days(1));
        self.last_attempt + cooldown
    }

    /// Time left until the entry is due (zero when already due).
    pub fn remaining(&self, base: Duration, now: DateTime<Utc>) -> Duration {
        (self.due_at(base) - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// What happened to an entry after a failed drain attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    Requeued { retries: u32 },
    Exhausted,
}

/// Ordered retry queue. Insertion order is processing order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetryQueue {
    entries: Vec<RetryEntry>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot; a missing file is an empty queue.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        if raw.trim().is_empty() {
            return Ok(Self::new());
        }
        let queue: RetryQueue = serde_json::from_str(&raw)
            .with_context(|| format!("parse retry queue {}", path.display()))?;
        if !queue.is_empty() {
            info!("Loaded {} pending retries from {}", queue.len(), path.display());
        }
        Ok(queue)
    }

    /// Persist a snapshot (write-then-rename).
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create {}", dir.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self).context("serialize retry queue")?;
        fs::write(&tmp, json)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("swap {}", path.display()))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RetryEntry] {
        &self.entries
    }

    pub fn contains(&self, player_id: i64, season: &str) -> bool {
        self.position(player_id, season).is_some()
    }

    fn position(&self, player_id: i64, season: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.player_id == player_id && e.season == season)
    }

    /// Queue a first failure. A pair already queued keeps its counter.
    pub fn enqueue(&mut self, player_id: i64, player_name: &str, season: &str, now: DateTime<Utc>) -> bool {
        if self.contains(player_id, season) {
            return false;
        }
        self.entries.push(RetryEntry {
            player_id,
            player_name: player_name.to_string(),
            season: season.to_string(),
            retries: 0,
            last_attempt: now,
        });
        true
    }

    /// Take the front entry for processing.
    pub fn pop_front(&mut self) -> Option<RetryEntry> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    /// Account for a failed attempt on `entry` and put it back unless exhausted.
    pub fn record_failure(&mut self, mut entry: RetryEntry, max_retries: u32, now: DateTime<Utc>) -> RetryVerdict {
        entry.retries += 1;
        entry.last_attempt = now;
        if entry.retries >= max_retries {
            warn!(
                "Dropping {} ({}) season {} after {} retries",
                entry.player_name, entry.player_id, entry.season, entry.retries
            );
            return RetryVerdict::Exhausted;
        }
        let retries = entry.retries;
        self.entries.push(entry);
        RetryVerdict::Requeued { retries }
    }
}
