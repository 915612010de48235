//! execution-agent library
//!
//! An agent that runs inside a test container. It heartbeats to an
//! orchestrator, runs the test tool when handed a job, and uploads the
//! parsed results and raw logs to the backend:
//! - Configuration from a JSON file or environment variable
//! - Lifecycle state machine reported on every heartbeat
//! - Subprocess execution with output captured to a log file
//! - Upload with exponential-backoff retry

pub mod backend;
pub mod config;
pub mod controller;
pub mod heartbeat;
pub mod report;
pub mod retry;
pub mod runner;
pub mod state;
pub mod transport;
