//! Chat-velocity baseline summaries saved across restarts
//!
//! One JSON file holds a map of streamer -> summary. Workers save on stop and
//! read on start; failures are logged by the caller and never stop monitoring.

use super::windows::BaselineStats;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSummary {
    /// Mean chat velocity (messages/sec)
    pub mean: f64,
    pub stdev: f64,
    pub sample_count: usize,
    pub saved_at: DateTime<Utc>,
}

impl BaselineSummary {
    pub fn from_stats(stats: &BaselineStats, saved_at: DateTime<Utc>) -> Self {
        Self {
            mean: stats.mean,
            stdev: stats.stdev,
            sample_count: stats.count,
            saved_at,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotFile {
    streamers: BTreeMap<String, BaselineSummary>,
}

/// Shared by every worker; saves are serialized through an internal lock
pub struct BaselineSnapshotStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl BaselineSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<SnapshotFile, StoreError> {
        if !self.path.exists() {
            return Ok(SnapshotFile::default());
        }
        let json = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn load(&self, streamer: &str) -> Result<Option<BaselineSummary>, StoreError> {
        Ok(self.read_file()?.streamers.remove(streamer))
    }

    /// Replace the streamer's entry, keeping every other streamer's
    pub fn save(&self, streamer: &str, summary: BaselineSummary) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;

        let mut file = self.read_file()?;
        file.streamers.insert(streamer.to_string(), summary);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // Write-then-rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&file)?)?;
        fs::rename(&tmp, &self.path)?;

        log::debug!("Saved baseline for {} to {}", streamer, self.path.display());
        Ok(())
    }
}
