use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Dependencies that are chatty at `info`/`debug`.
const QUIET_TARGETS: &[(&str, &str)] = &[("hyper", "warn"), ("tower_http", "warn")];

/// Build the filter from `RUST_LOG` if set, else from the configured level.
pub fn build_env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let mut directives = vec![level.to_string()];
    for (target, lvl) in QUIET_TARGETS {
        if !level.contains(target) {
            directives.push(format!("{target}={lvl}"));
        }
    }
    let joined = directives.join(",");
    EnvFilter::try_new(&joined).with_context(|| format!("invalid log filter '{joined}'"))
}

/// Install the global subscriber: console always, plain-text file when
/// `file` is given (opened in append mode).
pub fn init_logging(level: &str, file: Option<&Path>) -> Result<()> {
    let console = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_filter(build_env_filter(level)?);

    let file_layer = match file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create log directory {}", parent.display()))?;
            }
            let handle = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(handle))
                    .with_filter(build_env_filter(level)?),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    tracing::debug!(level = %level, file = ?file, "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_level_gets_quiet_overrides() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let filter = build_env_filter("debug").unwrap().to_string();
        assert!(filter.contains("hyper=warn"));
        assert!(filter.contains("tower_http=warn"));
    }

    #[test]
    fn explicit_target_level_wins() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let filter = build_env_filter("info,tower_http=debug").unwrap().to_string();
        assert!(filter.contains("tower_http=debug"));
        assert!(!filter.contains("tower_http=warn"));
    }

    #[test]
    fn bad_filter_is_an_error() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(build_env_filter("info,scanpod=notalevel").is_err());
    }
}
