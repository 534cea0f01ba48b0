use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::ScanRequest;

/// Port entry exactly as the scan tool reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPort {
    pub port: u16,
    pub protocol: String,
    pub state: Option<String>,
    pub service: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHost {
    pub host: String,
    pub state: Option<String>,
    /// In report order; the executor sorts them.
    pub ports: Vec<RawPort>,
}

/// Unnormalized report of one scan invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawScan {
    pub hosts: Vec<RawHost>,
    pub command_line: Option<String>,
}

/// Why a scan invocation produced no result. The `Display` text is what ends
/// up in the job's `error` field.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid scan arguments: {0}")]
    InvalidArguments(String),
    #[error("failed to launch scanner `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("scanner exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
    #[error("scanner reported an error: {0}")]
    Reported(String),
    #[error("malformed scanner output: {0}")]
    Parse(String),
    #[error("scan timed out after {0:?}")]
    Timeout(Duration),
    #[error("scan worker crashed: {0}")]
    Panicked(String),
}

/// The external collaborator that performs the actual probing.
///
/// Implementations may take as long as they like; the executor bounds every
/// call with the configured timeout and drops the future when it expires.
#[async_trait]
pub trait ScanTool: Send + Sync + 'static {
    async fn scan(&self, request: &ScanRequest) -> Result<RawScan, ScanError>;
}
