use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::scanner::ExecutorSettings;

/// scanpod — asynchronous nmap scan job API.
///
/// Every option can also be set through its `SCANPOD_*` environment variable.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "scanpod",
    version,
    about = "Asynchronous nmap scan job API: submit a scan, get a job id, poll for the result.",
    long_about = None
)]
pub struct Config {
    /// Shared secret expected in the `X-API-Key` header on `/scans` routes.
    #[arg(long, env = "SCANPOD_API_KEY", default_value = "changeme", hide_env_values = true)]
    pub api_key: String,

    /// Wall-clock limit for a single scan, in seconds.
    #[arg(
        long,
        env = "SCANPOD_SCAN_TIMEOUT",
        default_value_t = 300,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub scan_timeout: u64,

    /// Maximum number of scans running at the same time.
    #[arg(
        long,
        env = "SCANPOD_MAX_SCAN_WORKERS",
        default_value_t = 4,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub max_scan_workers: u64,

    /// Log filter, e.g. `info` or `scanpod=debug,tower_http=info`.
    #[arg(long, env = "SCANPOD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Also append logs to this file.
    #[arg(long, env = "SCANPOD_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Listen address of the HTTP API.
    #[arg(long, env = "SCANPOD_BIND", default_value = "127.0.0.1:8080")]
    pub bind: String,

    /// nmap executable to run for each scan.
    #[arg(long, env = "SCANPOD_NMAP_PATH", default_value = "nmap")]
    pub nmap_path: String,
}

impl Config {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout)
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            max_workers: usize::try_from(self.max_scan_workers).unwrap_or(usize::MAX),
            scan_timeout: self.scan_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_flags_override_defaults() {
        let cfg = Config::try_parse_from([
            "scanpod",
            "--api-key",
            "s3cret",
            "--scan-timeout",
            "60",
            "--max-scan-workers",
            "8",
            "--log-file",
            "/tmp/scanpod.log",
        ])
        .unwrap();
        assert_eq!(cfg.api_key, "s3cret");
        assert_eq!(cfg.scan_timeout(), Duration::from_secs(60));
        let settings = cfg.executor_settings();
        assert_eq!(settings.max_workers, 8);
        assert_eq!(settings.scan_timeout, Duration::from_secs(60));
        assert_eq!(cfg.log_file, Some(PathBuf::from("/tmp/scanpod.log")));
    }

    #[test]
    fn zero_workers_or_timeout_rejected() {
        assert!(Config::try_parse_from(["scanpod", "--max-scan-workers", "0"]).is_err());
        assert!(Config::try_parse_from(["scanpod", "--scan-timeout", "0"]).is_err());
    }

    #[test]
    fn command_definition_is_valid() {
        use clap::CommandFactory;
        Config::command().debug_assert();
    }
}
