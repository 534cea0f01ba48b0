use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Inbound scan submission. The strings are handed to the scan tool untouched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub targets: String,
    #[serde(default)]
    pub ports: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// One port entry of a scanned host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortResult {
    pub port: u16,
    pub protocol: String,
    pub state: String,
    #[serde(default)]
    pub service: String,
}

/// A host as reported by the scan, with its ports grouped by protocol.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HostResult {
    pub host: String,
    #[serde(default = "unknown_state")]
    pub state: String,
    #[serde(default)]
    pub ports: Vec<PortResult>,
}

/// Outcome of a successful scan.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    #[serde(default)]
    pub hosts: Vec<HostResult>,
    /// Literal invocation of the scan tool, empty when unavailable.
    #[serde(default)]
    pub command_line: String,
}

pub(crate) fn unknown_state() -> String {
    "unknown".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// `completed` and `failed` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("job {job_id}: cannot {action} a job that is {from}")]
pub struct TransitionError {
    pub job_id: String,
    pub action: &'static str,
    pub from: JobStatus,
}

/// A scan job and its current outcome. This is also the full detail view
/// returned by `GET /scans/{job_id}`.
///
/// `result` is only set once `completed`, `error` only once `failed`.
/// Both are written by the transition methods, which refuse to leave a
/// terminal state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanJob {
    pub job_id: String,
    pub status: JobStatus,
    pub request: ScanRequest,
    pub result: Option<ScanResult>,
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl ScanJob {
    /// Create a fresh `pending` job with a random id.
    pub fn new(request: ScanRequest) -> Self {
        Self {
            job_id: Uuid::new_v4().simple().to_string(),
            status: JobStatus::Pending,
            request,
            result: None,
            error: None,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            completed_at: None,
        }
    }

    /// `pending -> running`
    pub fn start(&self, at: OffsetDateTime) -> Result<ScanJob, TransitionError> {
        self.expect_status(JobStatus::Pending, "start")?;
        let mut next = self.clone();
        next.status = JobStatus::Running;
        next.started_at = Some(at.max(self.created_at));
        Ok(next)
    }

    /// `running -> completed`
    pub fn complete(
        &self,
        result: ScanResult,
        at: OffsetDateTime,
    ) -> Result<ScanJob, TransitionError> {
        self.expect_status(JobStatus::Running, "complete")?;
        let mut next = self.clone();
        next.status = JobStatus::Completed;
        next.result = Some(result);
        next.error = None;
        next.completed_at = Some(self.clamp_finish(at));
        Ok(next)
    }

    /// `running -> failed`
    pub fn fail(
        &self,
        message: impl Into<String>,
        at: OffsetDateTime,
    ) -> Result<ScanJob, TransitionError> {
        self.expect_status(JobStatus::Running, "fail")?;
        let mut next = self.clone();
        next.status = JobStatus::Failed;
        next.result = None;
        next.error = Some(non_empty_message(message.into()));
        next.completed_at = Some(self.clamp_finish(at));
        Ok(next)
    }

    pub fn summary(&self) -> ScanJobSummary {
        ScanJobSummary {
            job_id: self.job_id.clone(),
            status: self.status,
        }
    }

    pub fn created(&self) -> ScanJobCreated {
        ScanJobCreated {
            job_id: self.job_id.clone(),
            status: self.status,
            created_at: self.created_at,
        }
    }

    fn expect_status(&self, wanted: JobStatus, action: &'static str) -> Result<(), TransitionError> {
        if self.status == wanted {
            Ok(())
        } else {
            Err(TransitionError {
                job_id: self.job_id.clone(),
                action,
                from: self.status,
            })
        }
    }

    fn clamp_finish(&self, at: OffsetDateTime) -> OffsetDateTime {
        at.max(self.started_at.unwrap_or(self.created_at))
    }
}

fn non_empty_message(message: String) -> String {
    if message.trim().is_empty() {
        "scan failed".to_string()
    } else {
        message
    }
}

/// Response body of `POST /scans`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanJobCreated {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Listing entry of `GET /scans`; never carries request or result payloads.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanJobSummary {
    pub job_id: String,
    pub status: JobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn request() -> ScanRequest {
        ScanRequest {
            targets: "127.0.0.1".into(),
            ports: Some("22,80".into()),
            arguments: None,
        }
    }

    #[test]
    fn new_job_is_pending_with_hex_id() {
        let job = ScanJob::new(request());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.job_id.len(), 32);
        assert!(job.job_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(job.result.is_none() && job.error.is_none());
        assert!(job.started_at.is_none() && job.completed_at.is_none());
    }

    #[test]
    fn ids_are_unique() {
        let a = ScanJob::new(request());
        let b = ScanJob::new(request());
        assert_ne!(a.job_id, b.job_id);
    }

    #[test]
    fn happy_path_sets_result_and_timestamps() {
        let job = ScanJob::new(request());
        let running = job.start(OffsetDateTime::now_utc()).unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.started_at.is_some());

        let done = running
            .complete(ScanResult::default(), OffsetDateTime::now_utc())
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.result.is_some());
        assert!(done.error.is_none());
        assert!(done.created_at <= done.started_at.unwrap());
        assert!(done.started_at.unwrap() <= done.completed_at.unwrap());
        assert_eq!(done.request, job.request);
        assert_eq!(done.job_id, job.job_id);
    }

    #[test]
    fn failure_sets_error_only() {
        let running = ScanJob::new(request())
            .start(OffsetDateTime::now_utc())
            .unwrap();
        let failed = running.fail("boom", OffsetDateTime::now_utc()).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.result.is_none());
    }

    #[test]
    fn empty_failure_message_is_replaced() {
        let running = ScanJob::new(request())
            .start(OffsetDateTime::now_utc())
            .unwrap();
        let failed = running.fail("  ", OffsetDateTime::now_utc()).unwrap();
        assert_eq!(failed.error.as_deref(), Some("scan failed"));
    }

    #[test]
    fn cannot_skip_running_or_leave_terminal() {
        let job = ScanJob::new(request());
        assert!(job.complete(ScanResult::default(), OffsetDateTime::now_utc()).is_err());
        assert!(job.fail("x", OffsetDateTime::now_utc()).is_err());

        let done = job
            .start(OffsetDateTime::now_utc())
            .unwrap()
            .complete(ScanResult::default(), OffsetDateTime::now_utc())
            .unwrap();
        let err = done.start(OffsetDateTime::now_utc()).unwrap_err();
        assert_eq!(err.from, JobStatus::Completed);
        assert!(done.fail("late", OffsetDateTime::now_utc()).is_err());
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let job = ScanJob::new(request());
        let earlier = job.created_at - Duration::seconds(10);
        let running = job.start(earlier).unwrap();
        assert_eq!(running.started_at, Some(job.created_at));
        let done = running.fail("x", earlier).unwrap();
        assert_eq!(done.completed_at, running.started_at);
    }

    #[test]
    fn request_deserializes_with_optional_fields() {
        let req: ScanRequest = serde_json::from_str(r#"{"targets":"10.0.0.0/24"}"#).unwrap();
        assert_eq!(req.targets, "10.0.0.0/24");
        assert!(req.ports.is_none() && req.arguments.is_none());

        let missing: Result<ScanRequest, _> = serde_json::from_str(r#"{"ports":"22"}"#);
        assert!(missing.is_err());
    }

    #[test]
    fn job_serializes_status_and_nulls() {
        let job = ScanJob::new(request());
        let v = serde_json::to_value(&job).unwrap();
        assert_eq!(v["status"], "pending");
        assert!(v["result"].is_null());
        assert!(v["error"].is_null());
        assert!(v["started_at"].is_null());
        assert!(v["created_at"].as_str().unwrap().ends_with('Z'));
    }
}
