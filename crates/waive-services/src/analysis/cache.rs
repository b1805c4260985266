//! Bounded LRU cache of per-file analysis results

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use tracing::debug;

use super::AnalysisSummary;

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Thresholds within this distance are treated as equal
const THRESHOLD_TOLERANCE: f32 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheKey {
    pub file: PathBuf,
    /// Size and modification time at key creation, so a rewritten source misses
    pub len: Option<u64>,
    pub modified: Option<SystemTime>,
    pub activity_threshold_gain: f32,
    pub transient_rise_threshold_gain: f32,
}

impl CacheKey {
    /// Build a key, canonicalising the path when it exists
    pub fn new(file: &Path, activity_threshold_gain: f32, transient_rise_threshold_gain: f32) -> Self {
        let metadata = fs::metadata(file).ok();
        Self {
            file: file.canonicalize().unwrap_or_else(|_| file.to_path_buf()),
            len: metadata.as_ref().map(|m| m.len()),
            modified: metadata.and_then(|m| m.modified().ok()),
            activity_threshold_gain,
            transient_rise_threshold_gain,
        }
    }

    fn matches(&self, other: &CacheKey) -> bool {
        self.file == other.file
            && self.len == other.len
            && self.modified == other.modified
            && (self.activity_threshold_gain - other.activity_threshold_gain).abs() <= THRESHOLD_TOLERANCE
            && (self.transient_rise_threshold_gain - other.transient_rise_threshold_gain).abs()
                <= THRESHOLD_TOLERANCE
    }
}

/// Most recently used entry at the front
pub struct AnalysisCache {
    entries: Mutex<VecDeque<(CacheKey, AnalysisSummary)>>,
    capacity: usize,
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl AnalysisCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &CacheKey) -> Option<AnalysisSummary> {
        let mut entries = self.entries.lock().ok()?;
        let index = entries.iter().position(|(k, _)| k.matches(key))?;
        let entry = entries.remove(index)?;
        let summary = entry.1.clone();
        entries.push_front(entry);
        debug!(file = %key.file.display(), "Analysis cache hit");
        Some(summary)
    }

    /// Insert at the MRU position. Invalid summaries are ignored.
    pub fn put(&self, key: CacheKey, summary: AnalysisSummary) {
        if !summary.valid {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else { return };

        if let Some(index) = entries.iter().position(|(k, _)| k.matches(&key)) {
            entries.remove(index);
        }
        while entries.len() >= self.capacity {
            if let Some((evicted, _)) = entries.pop_back() {
                debug!(file = %evicted.file.display(), "Analysis cache evicted entry");
            }
        }
        entries.push_front((key, summary));
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}
