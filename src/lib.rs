//! Library crate for scanpod: an asynchronous scan job API.
//!
//! Clients submit a scan, receive a job id immediately and poll the job until
//! it is `completed` or `failed`. Scans run on a bounded background pool.
pub mod config;
pub mod error;
pub mod logging;
pub mod nmap;
pub mod orchestrator;
pub mod ports;
pub mod scanner;
pub mod server;
pub mod store;
pub mod tool;
pub mod types;
