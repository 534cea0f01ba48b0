use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ports::normalize_ports;
use crate::store::JobStore;
use crate::tool::{RawScan, ScanError, ScanTool};
use crate::types::{HostResult, ScanJob, ScanRequest, ScanResult};

const SHUTDOWN_MESSAGE: &str = "scan service shut down before the scan could run";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Upper bound on concurrently running scans.
    pub max_workers: usize,
    /// Wall-clock limit for a single scan invocation.
    pub scan_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_workers: 4,
            scan_timeout: Duration::from_secs(300),
        }
    }
}

/// Bounded background runner for scan jobs.
///
/// `submit` only enqueues. A dispatcher task pulls jobs off the queue and runs
/// each one once it holds one of `max_workers` semaphore permits, so excess
/// jobs wait in the queue instead of starting more scans. Results are only
/// ever observable through the `JobStore`.
#[derive(Clone, Debug)]
pub struct ScanExecutor {
    queue: mpsc::UnboundedSender<ScanJob>,
    store: JobStore,
    shutdown: CancellationToken,
    dispatcher: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ScanExecutor {
    /// Spawn the dispatcher on the current tokio runtime.
    pub fn start(store: JobStore, tool: Arc<dyn ScanTool>, settings: ExecutorSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let worker = Arc::new(Worker {
            store: store.clone(),
            tool,
            timeout: settings.scan_timeout,
        });
        let handle = tokio::spawn(dispatch(
            rx,
            worker,
            settings.max_workers.max(1),
            shutdown.clone(),
        ));
        Self {
            queue: tx,
            store,
            shutdown,
            dispatcher: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Queue a job for execution and return immediately.
    ///
    /// After `shutdown` the job is recorded as failed instead of being queued.
    pub fn submit(&self, job: ScanJob) {
        if self.shutdown.is_cancelled() {
            abandon(&self.store, job, SHUTDOWN_MESSAGE);
            return;
        }
        let job_id = job.job_id.clone();
        match self.queue.send(job) {
            Ok(()) => debug!(job_id = %job_id, "scan job queued"),
            Err(mpsc::error::SendError(job)) => abandon(&self.store, job, SHUTDOWN_MESSAGE),
        }
    }

    /// Stop taking work, fail whatever is still queued and wait for running
    /// scans to finish. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.dispatcher.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "scan dispatcher terminated abnormally");
            }
        }
    }

    /// `shutdown`, but stop waiting for running scans once `give_up`
    /// resolves. Returns `false` if it gave up.
    pub async fn shutdown_until(&self, give_up: impl std::future::Future<Output = ()>) -> bool {
        tokio::select! {
            _ = self.shutdown() => true,
            _ = give_up => false,
        }
    }
}

async fn dispatch(
    mut queue: mpsc::UnboundedReceiver<ScanJob>,
    worker: Arc<Worker>,
    max_workers: usize,
    shutdown: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(max_workers));
    let mut running = JoinSet::new();
    info!(max_workers, timeout_s = worker.timeout.as_secs(), "scan executor started");

    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Some(job) => job,
                None => break,
            },
        };

        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                abandon(&worker.store, job, SHUTDOWN_MESSAGE);
                break;
            }
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    abandon(&worker.store, job, SHUTDOWN_MESSAGE);
                    break;
                }
            },
        };

        let worker = worker.clone();
        running.spawn(async move {
            let _permit = permit; // held until the scan is recorded
            worker.run(job).await;
        });

        while let Some(res) = running.try_join_next() {
            log_join(res);
        }
    }

    queue.close();
    while let Some(job) = queue.recv().await {
        abandon(&worker.store, job, SHUTDOWN_MESSAGE);
    }
    while let Some(res) = running.join_next().await {
        log_join(res);
    }
    info!("scan executor stopped");
}

fn log_join(res: Result<(), JoinError>) {
    if let Err(e) = res {
        error!(error = %e, "scan worker task ended abnormally");
    }
}

/// Record a job that will never run: `pending -> running -> failed`.
fn abandon(store: &JobStore, job: ScanJob, message: &str) {
    let now = OffsetDateTime::now_utc();
    let job_id = job.job_id.clone();
    match job.start(now).and_then(|running| {
        store.update(running.clone());
        running.fail(message, now)
    }) {
        Ok(failed) => {
            warn!(job_id = %job_id, "{message}");
            store.update(failed);
        }
        Err(e) => error!(error = %e, "could not record abandoned job"),
    }
}

struct Worker {
    store: JobStore,
    tool: Arc<dyn ScanTool>,
    timeout: Duration,
}

impl Worker {
    /// Run one job to a terminal state. Never panics and never returns an
    /// error: every failure ends up in the job record.
    async fn run(&self, job: ScanJob) {
        let current = self.store.get(&job.job_id).unwrap_or(job);
        let running = match current.start(OffsetDateTime::now_utc()) {
            Ok(running) => running,
            Err(e) => {
                error!(error = %e, "skipping job that is not pending");
                return;
            }
        };
        self.store.update(running.clone());
        info!(job_id = %running.job_id, targets = %running.request.targets, "scan started");

        let finished = match self.execute(&running.request).await {
            Ok(result) => {
                info!(job_id = %running.job_id, hosts = result.hosts.len(), "scan completed");
                running.complete(result, OffsetDateTime::now_utc())
            }
            Err(err) => {
                warn!(job_id = %running.job_id, error = %err, "scan failed");
                running.fail(err.to_string(), OffsetDateTime::now_utc())
            }
        };
        match finished {
            Ok(job) => self.store.update(job),
            Err(e) => error!(error = %e, "could not record scan outcome"),
        }
    }

    async fn execute(&self, request: &ScanRequest) -> Result<ScanResult, ScanError> {
        let tool = self.tool.clone();
        let request = request.clone();
        // Own task, so a panicking tool surfaces as a JoinError.
        let mut task = tokio::spawn(async move { tool.scan(&request).await });

        let raw = match tokio::time::timeout(self.timeout, &mut task).await {
            Err(_) => {
                task.abort();
                return Err(ScanError::Timeout(self.timeout));
            }
            Ok(Err(join_err)) => return Err(ScanError::Panicked(panic_message(join_err))),
            Ok(Ok(outcome)) => outcome?,
        };
        Ok(build_result(raw))
    }
}

fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "scan task was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Turn the tool's report into the stored result shape.
pub fn build_result(raw: RawScan) -> ScanResult {
    ScanResult {
        hosts: raw
            .hosts
            .into_iter()
            .map(|h| HostResult {
                host: h.host,
                state: h.state.unwrap_or_else(crate::types::unknown_state),
                ports: normalize_ports(h.ports),
            })
            .collect(),
        command_line: raw.command_line.unwrap_or_default(),
    }
}
