//! Best-effort local cache of analysis results.
//!
//! A JSON file holding the most recent results, bounded by entry count
//! (oldest evicted first). Every operation is fallible and non-fatal:
//! a broken cache never fails a turn.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One cached result: generated id, timestamp, result tag, raw payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub result: serde_json::Value,
}

/// File-backed, bounded result cache.
#[derive(Debug, Clone)]
pub struct ResultCache {
    path: PathBuf,
    max_entries: usize,
}

impl ResultCache {
    pub fn new(path: PathBuf, max_entries: usize) -> Self {
        Self {
            path,
            // A zero bound would make every store a no-op that still truncates
            // the file; keep at least one entry.
            max_entries: max_entries.max(1),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// All entries, oldest first. Missing file => empty.
    pub fn load(&self) -> Result<Vec<CacheEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let s = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading result cache from {}", self.path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing result cache from {}", self.path.display()))
    }

    /// Append one result, evicting from the front past the bound.
    pub fn store(&self, kind: &str, result: &serde_json::Value) -> Result<()> {
        let mut entries = self.load().unwrap_or_else(|e| {
            log::warn!("result cache unreadable, starting fresh: {}", e);
            Vec::new()
        });
        entries.push(CacheEntry {
            id: format!("result-{}", uuid::Uuid::new_v4()),
            timestamp: Utc::now(),
            kind: kind.to_string(),
            result: result.clone(),
        });
        if entries.len() > self.max_entries {
            let excess = entries.len() - self.max_entries;
            entries.drain(..excess);
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating cache dir {}", parent.display()))?;
        }
        let s = serde_json::to_string_pretty(&entries).context("serializing result cache")?;
        std::fs::write(&self.path, s)
            .with_context(|| format!("writing result cache to {}", self.path.display()))
    }
}
