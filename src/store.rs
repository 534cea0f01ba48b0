use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::types::ScanJob;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("job id already present in store: {0}")]
    DuplicateJob(String),
}

/// In-memory registry of every job created by this process.
///
/// All access goes through one mutex held only for the map operation itself.
/// Readers get owned snapshots, so a record is never observed half-written.
/// Cloning the store shares the same map.
#[derive(Clone, Debug, Default)]
pub struct JobStore {
    inner: Arc<Mutex<HashMap<String, ScanJob>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly created job. Ids are generated internally, so a
    /// duplicate means a bug upstream.
    pub fn add(&self, job: ScanJob) -> Result<(), StoreError> {
        let mut jobs = self.lock();
        if jobs.contains_key(&job.job_id) {
            let id = job.job_id.clone();
            drop(jobs);
            tracing::error!(job_id = %id, "refusing to insert duplicate job id");
            return Err(StoreError::DuplicateJob(id));
        }
        jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Option<ScanJob> {
        self.lock().get(job_id).cloned()
    }

    /// Replace the whole record for `job.job_id`. Last writer wins.
    pub fn update(&self, job: ScanJob) {
        self.lock().insert(job.job_id.clone(), job);
    }

    /// Snapshot of every record. Each entry is complete; the collection as a
    /// whole is not a point-in-time view relative to concurrent writers.
    pub fn list_all(&self) -> Vec<ScanJob> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Records are swapped whole, so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, ScanJob>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobStatus, ScanRequest};
    use time::OffsetDateTime;

    fn job(targets: &str) -> ScanJob {
        ScanJob::new(ScanRequest {
            targets: targets.into(),
            ports: None,
            arguments: None,
        })
    }

    #[test]
    fn add_then_get_returns_snapshot() {
        let store = JobStore::new();
        let j = job("127.0.0.1");
        store.add(j.clone()).unwrap();
        assert_eq!(store.get(&j.job_id), Some(j));
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let store = JobStore::new();
        let j = job("127.0.0.1");
        store.add(j.clone()).unwrap();
        assert_eq!(
            store.add(j.clone()),
            Err(StoreError::DuplicateJob(j.job_id.clone()))
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_replaces_record_and_leaves_old_snapshots_alone() {
        let store = JobStore::new();
        let j = job("127.0.0.1");
        store.add(j.clone()).unwrap();
        let before = store.get(&j.job_id).unwrap();

        store.update(j.start(OffsetDateTime::now_utc()).unwrap());

        assert_eq!(before.status, JobStatus::Pending);
        assert_eq!(store.get(&j.job_id).unwrap().status, JobStatus::Running);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn list_all_returns_each_job_once() {
        let store = JobStore::new();
        assert!(store.is_empty());
        let ids: Vec<String> = (0..5)
            .map(|i| {
                let j = job(&format!("10.0.0.{i}"));
                let id = j.job_id.clone();
                store.add(j).unwrap();
                id
            })
            .collect();
        let mut listed: Vec<String> = store.list_all().into_iter().map(|j| j.job_id).collect();
        listed.sort();
        let mut expected = ids;
        expected.sort();
        assert_eq!(listed, expected);
    }

    #[test]
    fn concurrent_writers_on_different_keys() {
        let store = JobStore::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let j = job("192.168.0.1");
                        store.add(j.clone()).unwrap();
                        store.update(j.start(OffsetDateTime::now_utc()).unwrap());
                        let _ = store.list_all();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 400);
        assert!(store
            .list_all()
            .iter()
            .all(|j| j.status == JobStatus::Running));
    }
}
