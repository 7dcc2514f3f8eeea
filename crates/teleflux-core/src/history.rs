//! Per-owner trail of recent job outcomes shown under the dashboard.

use std::collections::VecDeque;
use tokio::time::Instant;

/// One line of history: what happened to which job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub name: String,
    pub status: String,
    pub note: Option<String>,
    pub at: Instant,
}

impl HistoryEntry {
    pub fn new(name: impl Into<String>, status: impl Into<String>, note: Option<String>) -> Self {
        Self {
            name: name.into(),
            status: status.into(),
            note,
            at: Instant::now(),
        }
    }
}

/// Bounded trail; the oldest entry is dropped once `limit` is reached.
#[derive(Debug, Clone)]
pub struct HistoryTrail {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl HistoryTrail {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(64)),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Up to `n` entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<HistoryEntry> {
        self.entries.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
