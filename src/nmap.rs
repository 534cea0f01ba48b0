//! `ScanTool` backed by the `nmap` binary.
//!
//! nmap is run with `-oX -` and its XML report is read from stdout. Only the
//! parts of the report that end up in a `ScanResult` are modelled.
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::tool::{RawHost, RawPort, RawScan, ScanError, ScanTool};
use crate::types::ScanRequest;

/// Options that would send the report somewhere other than stdout.
const OUTPUT_FLAGS: &[&str] = &["-oX", "-oN", "-oG", "-oA", "-oS"];

#[derive(Debug, Clone)]
pub struct NmapTool {
    program: String,
}

impl NmapTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for NmapTool {
    fn default() -> Self {
        Self::new("nmap")
    }
}

#[async_trait]
impl ScanTool for NmapTool {
    async fn scan(&self, request: &ScanRequest) -> Result<RawScan, ScanError> {
        let args = build_args(request)?;
        let invocation = command_line(&self.program, &args);
        tracing::debug!(command = %invocation, "launching nmap");

        // Dropping this future (executor timeout) kills the child.
        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ScanError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            let status = match output.status.code() {
                Some(code) => format!("exit code {code}"),
                None => "termination by signal".to_string(),
            };
            return Err(ScanError::Exit {
                status,
                stderr: if stderr.is_empty() {
                    "no error output".to_string()
                } else {
                    stderr
                },
            });
        }
        if !stderr.is_empty() {
            tracing::warn!(stderr = %stderr, "nmap wrote to stderr");
        }

        let mut scan = parse_report(&String::from_utf8_lossy(&output.stdout))?;
        if scan.command_line.is_none() {
            scan.command_line = Some(invocation);
        }
        Ok(scan)
    }
}

/// Build the nmap argument vector: `-oX - <targets..> [-p <ports>] <arguments..>`.
///
/// Targets and arguments are split with POSIX shell rules.
pub fn build_args(request: &ScanRequest) -> Result<Vec<String>, ScanError> {
    let targets = shlex::split(&request.targets).ok_or_else(|| {
        ScanError::InvalidArguments(format!("unbalanced quoting in targets: {}", request.targets))
    })?;
    if targets.is_empty() {
        return Err(ScanError::InvalidArguments("no targets given".to_string()));
    }

    let extra = match request.arguments.as_deref() {
        Some(raw) => shlex::split(raw).ok_or_else(|| {
            ScanError::InvalidArguments(format!("unbalanced quoting in arguments: {raw}"))
        })?,
        None => Vec::new(),
    };
    if let Some(flag) = extra
        .iter()
        .find(|a| OUTPUT_FLAGS.iter().any(|f| a.starts_with(f)))
    {
        return Err(ScanError::InvalidArguments(format!(
            "output option {flag} is not allowed, the report is read from stdout"
        )));
    }

    let mut args = vec!["-oX".to_string(), "-".to_string()];
    args.extend(targets);
    if let Some(ports) = request.ports.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        args.push("-p".to_string());
        args.push(ports.to_string());
    }
    args.extend(extra);
    Ok(args)
}

fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(|a| shlex::try_quote(a).map_or_else(|_| a.to_string(), |q| q.into_owned()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Deserialize)]
struct NmapRun {
    #[serde(rename = "@args", default)]
    args: Option<String>,
    #[serde(rename = "host", default)]
    hosts: Vec<Host>,
    #[serde(default)]
    runstats: Option<RunStats>,
}

#[derive(Debug, Deserialize)]
struct Host {
    #[serde(rename = "address", default)]
    addresses: Vec<Address>,
    #[serde(default)]
    status: Option<Status>,
    #[serde(default)]
    ports: Option<Ports>,
}

#[derive(Debug, Deserialize)]
struct Address {
    #[serde(rename = "@addr")]
    addr: String,
    #[serde(rename = "@addrtype", default)]
    addr_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(rename = "@state", default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Ports {
    #[serde(rename = "port", default)]
    ports: Vec<Port>,
}

#[derive(Debug, Deserialize)]
struct Port {
    #[serde(rename = "@protocol")]
    protocol: String,
    #[serde(rename = "@portid")]
    portid: u16,
    #[serde(default)]
    state: Option<PortState>,
    #[serde(default)]
    service: Option<Service>,
}

#[derive(Debug, Deserialize)]
struct PortState {
    #[serde(rename = "@state", default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Service {
    #[serde(rename = "@name", default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunStats {
    #[serde(default)]
    finished: Option<Finished>,
}

#[derive(Debug, Deserialize)]
struct Finished {
    #[serde(rename = "@exit", default)]
    exit: Option<String>,
    #[serde(rename = "@errormsg", default)]
    errormsg: Option<String>,
}

/// Parse an nmap XML report into a `RawScan`.
pub fn parse_report(xml: &str) -> Result<RawScan, ScanError> {
    let run: NmapRun =
        quick_xml::de::from_str(xml).map_err(|e| ScanError::Parse(e.to_string()))?;

    if let Some(finished) = run.runstats.as_ref().and_then(|r| r.finished.as_ref()) {
        if finished.exit.as_deref() == Some("error") {
            let msg = finished
                .errormsg
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "unknown nmap error".to_string());
            return Err(ScanError::Reported(msg));
        }
    }

    let hosts = run
        .hosts
        .into_iter()
        .filter_map(|h| {
            let Some(host) = host_address(&h.addresses) else {
                tracing::warn!("skipping nmap host entry without an address");
                return None;
            };
            let ports = h
                .ports
                .map(|p| p.ports)
                .unwrap_or_default()
                .into_iter()
                .map(|p| RawPort {
                    port: p.portid,
                    protocol: p.protocol,
                    state: p.state.and_then(|s| s.state),
                    service: p.service.and_then(|s| s.name),
                })
                .collect();
            Some(RawHost {
                host,
                state: h.status.and_then(|s| s.state),
                ports,
            })
        })
        .collect();

    Ok(RawScan {
        hosts,
        command_line: run.args.filter(|a| !a.is_empty()),
    })
}

/// Prefer the IP address; a MAC entry only identifies the host if nothing else does.
fn host_address(addresses: &[Address]) -> Option<String> {
    addresses
        .iter()
        .find(|a| matches!(a.addr_type.as_deref(), Some("ipv4") | Some("ipv6")))
        .or_else(|| addresses.first())
        .map(|a| a.addr.clone())
}
