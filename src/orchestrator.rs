use thiserror::Error;
use tracing::info;

use crate::scanner::ScanExecutor;
use crate::store::{JobStore, StoreError};
use crate::types::{ScanJob, ScanJobCreated, ScanJobSummary, ScanRequest};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("scan job not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Boundary between the HTTP layer and the job core: creates jobs, hands
/// them to the executor and renders job state into client views.
#[derive(Clone, Debug)]
pub struct ScanOrchestrator {
    store: JobStore,
    executor: ScanExecutor,
}

impl ScanOrchestrator {
    pub fn new(store: JobStore, executor: ScanExecutor) -> Self {
        Self { store, executor }
    }

    /// Create, store and dispatch a job. Returns before the scan starts, so
    /// the reported status is `pending`.
    pub fn create_scan(&self, request: ScanRequest) -> Result<ScanJobCreated, OrchestratorError> {
        let job = ScanJob::new(request);
        let created = job.created();
        self.store.add(job.clone())?;
        info!(job_id = %created.job_id, targets = %job.request.targets, "scan job created");
        self.executor.submit(job);
        Ok(created)
    }

    pub fn get_scan(&self, job_id: &str) -> Result<ScanJob, OrchestratorError> {
        self.store
            .get(job_id)
            .ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))
    }

    /// Every known job as `(job_id, status)`, oldest first.
    pub fn list_scans(&self) -> Vec<ScanJobSummary> {
        let mut jobs = self.store.list_all();
        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        jobs.iter().map(ScanJob::summary).collect()
    }
}
