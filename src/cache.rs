//! On-disk cache of raw stats provider responses.
//!
//! One file per (entity kind, id, season). Bodies are stored verbatim so a
//! later run can re-map them without touching the network.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Cache key: what was fetched, for whom, for which season.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: &'static str,
    pub id: i64,
    pub season: String,
}

impl CacheKey {
    pub fn game_log(player_id: i64, season: &str) -> Self {
        Self {
            kind: "gamelog",
            id: player_id,
            season: season.to_string(),
        }
    }

    fn file_name(&self) -> String {
        let season: String = self
            .season
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!("{}_{}.json", self.id, season)
    }
}

#[derive(Debug, Clone)]
pub struct ResponseCache {
    root: PathBuf,
}

impl ResponseCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.kind).join(key.file_name())
    }

    /// Cached body, if one exists and is readable.
    pub async fn get(&self, key: &CacheKey) -> Option<String> {
        let path = self.path_for(key);
        match fs::read_to_string(&path).await {
            Ok(body) if !body.trim().is_empty() => {
                debug!("cache hit: {}", path.display());
                Some(body)
            }
            Ok(_) => None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("unreadable cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Store a successful raw response (write-then-rename).
    pub async fn put(&self, key: &CacheKey, body: &str) -> Result<()> {
        let path = self.path_for(key);
        let dir = path
            .parent()
            .context("cache path has no parent directory")?;
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("create cache dir {}", dir.display()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("swap {}", path.display()))?;
        Ok(())
    }

    pub async fn remove(&self, key: &CacheKey) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }
}
