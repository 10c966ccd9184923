/// Server runtime module for MCP Supervisor.
///
/// This module turns registry definitions into OS processes and keeps the two
/// in agreement. All public components are instrumented with `tracing` spans.
///
/// # Components
///
/// * `process` - Statuses, process handles, and the launcher that spawns workers
/// * `logs` - Per-launch log files, their rotation, and in-memory capture
/// * `lifecycle` - Status change notifications and history
/// * `reconcile` - Matching definitions against the OS process table
/// * `monitor` - Periodic reconciliation
///
/// # Examples
///
/// Rotating logs by hand:
///
/// ```no_run
/// use mcp_supervisor::server::LogRotator;
///
/// let rotator = LogRotator::new("/var/log/mcp-supervisor", 10, 100);
/// let report = rotator.rotate("fetch-server");
/// println!("removed {} old logs", report.removed.len());
/// ```
///
/// Watching status changes:
///
/// ```no_run
/// use mcp_supervisor::server::EventBus;
///
/// # async fn run() {
/// let bus = EventBus::new();
/// let mut changes = bus.subscribe_status();
/// while let Ok(change) = changes.recv().await {
///     println!("{}: {} -> {}", change.name, change.previous, change.current);
/// }
/// # }
/// ```
pub mod lifecycle;
mod logs;
pub mod monitor;
mod process;
mod reconcile;
pub(crate) mod slots;

pub use lifecycle::{EventBus, StatusChange};
pub use logs::{
    LogBuffer, LogFileEntry, LogLine, LogRotator, LogSink, RotationReport, log_file_name,
    server_of_log_file,
};
pub use monitor::ReconcileMonitor;
pub use process::{
    HandleOrigin, LaunchId, LaunchOrigin, ProcessHandle, ProcessLauncher, ResolvedLaunch,
    ServerStatus, classify_exit, describe_exit,
};
pub(crate) use process::LaunchedProcess;
pub use reconcile::{Liveness, StatusReconciler, find_duplicates};
