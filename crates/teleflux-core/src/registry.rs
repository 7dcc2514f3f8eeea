//! Live job set and per-owner history.
//!
//! Structural changes (insert, remove) are serialized by one lock. A job is
//! only removed by its own task, after its grace period.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::history::{HistoryEntry, HistoryTrail};
use crate::ids::{JobId, OwnerId};
use crate::job::{JobHandle, JobState, JobView};

#[derive(Default)]
struct RegistryState {
    jobs: HashMap<JobId, Arc<JobHandle>>,
    history: HashMap<OwnerId, HistoryTrail>,
}

/// Registry of live jobs and history trails.
pub struct JobRegistry {
    state: Mutex<RegistryState>,
    history_limit: usize,
}

impl JobRegistry {
    pub fn new(history_limit: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            history_limit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert unless a non-terminal job already writes to the same final path.
    pub fn try_insert(&self, job: Arc<JobHandle>) -> bool {
        let mut state = self.lock();
        let busy = state
            .jobs
            .values()
            .any(|j| j.final_path == job.final_path && !j.state().is_terminal());
        if busy {
            return false;
        }
        state.jobs.insert(job.id, job);
        true
    }

    pub fn get(&self, id: JobId) -> Option<Arc<JobHandle>> {
        self.lock().jobs.get(&id).cloned()
    }

    pub fn remove(&self, id: JobId) -> Option<Arc<JobHandle>> {
        self.lock().jobs.remove(&id)
    }

    /// Jobs of one owner in creation order.
    pub fn for_owner(&self, owner: OwnerId) -> Vec<Arc<JobHandle>> {
        let mut jobs: Vec<_> = self
            .lock()
            .jobs
            .values()
            .filter(|j| j.owner == owner)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    /// Views of one owner's jobs in creation order.
    pub fn views(&self, owner: OwnerId) -> Vec<JobView> {
        self.for_owner(owner).iter().map(|j| j.view()).collect()
    }

    pub fn all(&self) -> Vec<Arc<JobHandle>> {
        let mut jobs: Vec<_> = self.lock().jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    /// Count of live jobs per state; states without jobs are omitted.
    pub fn state_counts(&self) -> BTreeMap<JobState, usize> {
        let mut counts = BTreeMap::new();
        for job in self.all() {
            *counts.entry(job.state()).or_insert(0) += 1;
        }
        counts
    }

    pub fn push_history(&self, owner: OwnerId, entry: HistoryEntry) {
        let limit = self.history_limit;
        self.lock()
            .history
            .entry(owner)
            .or_insert_with(|| HistoryTrail::new(limit))
            .push(entry);
    }

    /// Up to `n` history entries for `owner`, newest first.
    pub fn recent_history(&self, owner: OwnerId, n: usize) -> Vec<HistoryEntry> {
        self.lock()
            .history
            .get(&owner)
            .map(|t| t.recent(n))
            .unwrap_or_default()
    }

    pub fn clear_history(&self, owner: OwnerId) -> bool {
        self.lock().history.remove(&owner).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TargetSpec;
    use std::path::PathBuf;

    fn job(owner: i64) -> Arc<JobHandle> {
        job_at(owner, "a.bin")
    }

    fn job_at(owner: i64, name: &str) -> Arc<JobHandle> {
        Arc::new(JobHandle::new(
            JobId::next(),
            OwnerId(owner),
            TargetSpec::new("s", "/tmp", name, 0),
            PathBuf::from("/tmp").join(name),
            0,
        ))
    }

    #[test]
    fn owner_views_are_in_creation_order() {
        let reg = JobRegistry::new(30);
        let a = job_at(1, "a.bin");
        let b = job_at(2, "b.bin");
        let c = job_at(1, "c.bin");
        assert!(reg.try_insert(c.clone()));
        assert!(reg.try_insert(b));
        assert!(reg.try_insert(a.clone()));
        let ids: Vec<_> = reg.views(OwnerId(1)).into_iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![a.id, c.id]);
        assert_eq!(reg.state_counts().get(&JobState::Queued), Some(&3));

        assert!(reg.remove(a.id).is_some());
        assert!(reg.get(a.id).is_none());
        assert_eq!(reg.all().len(), 2);
    }

    #[test]
    fn same_final_path_is_rejected_while_live() {
        let reg = JobRegistry::new(30);
        let a = job(1);
        assert!(reg.try_insert(a.clone()));
        assert!(!reg.try_insert(job(2)), "same path, still queued");
        a.finish(JobState::Cancelled, None);
        assert!(reg.try_insert(job(2)), "terminal job no longer blocks");
    }

    #[test]
    fn history_is_per_owner() {
        let reg = JobRegistry::new(2);
        reg.push_history(OwnerId(1), HistoryEntry::new("a", "ok", None));
        reg.push_history(OwnerId(1), HistoryEntry::new("b", "ok", None));
        reg.push_history(OwnerId(1), HistoryEntry::new("c", "ok", None));
        reg.push_history(OwnerId(2), HistoryEntry::new("z", "ok", None));
        let names: Vec<_> = reg
            .recent_history(OwnerId(1), 5)
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["c", "b"]);
        assert!(reg.clear_history(OwnerId(1)));
        assert!(reg.recent_history(OwnerId(1), 5).is_empty());
        assert_eq!(reg.recent_history(OwnerId(2), 5).len(), 1);
    }
}
