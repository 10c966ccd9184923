/// Error handling module for MCP Supervisor.
///
/// This module defines the error types used throughout the library.
/// Registry and lifecycle operations return these errors to the caller;
/// background work (launching, stopping, reconciliation, log rotation)
/// logs them and records the last one per server instead.
///
/// # Example
///
/// ```
/// use mcp_supervisor::error::{Error, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Operation succeeded"),
///         Err(Error::NotFound(name)) => println!("Server '{}' is not registered", name),
///         Err(Error::AlreadyRunning(name)) => println!("Server '{}' is already running", name),
///         Err(Error::Timeout(msg)) => println!("Operation timed out: {}", msg),
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the mcp-supervisor library.
#[derive(Error, Debug)]
pub enum Error {
    /// A server definition with this name already exists.
    ///
    /// This error occurs when:
    /// - Registering a new server under a taken name
    /// - Renaming a server to a taken name
    #[error("A server named '{0}' already exists")]
    DuplicateName(String),

    /// No server definition with this name is registered.
    #[error("Server not found: {0}")]
    NotFound(String),

    /// The entry-point script of a server does not exist on disk.
    #[error("Script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),

    /// The server is already running or starting.
    ///
    /// This error occurs when:
    /// - Attempting to start a server that's running or starting
    /// - Attempting to remove a server that still has a live process
    #[error("Server '{0}' is already running")]
    AlreadyRunning(String),

    /// The server is not running.
    ///
    /// This error occurs when:
    /// - Attempting to stop a server that's stopped or failed
    #[error("Server '{0}' is not running")]
    NotRunning(String),

    /// A stop is in flight for this server; start is refused until it completes.
    #[error("Server '{0}' is stopping")]
    StopInProgress(String),

    /// The OS refused to spawn the worker process.
    #[error("Failed to spawn server process: {0}")]
    SpawnFailure(String),

    /// The OS refused to deliver a signal to a process.
    #[error("Permission denied signalling process {pid}")]
    PermissionDenied {
        /// Target process id
        pid: u32,
    },

    /// A graceful stop did not converge.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Log rotation could not delete a file. Never fatal to a launch.
    #[error("Log rotation failed: {0}")]
    RotationFailure(String),

    /// Failed to parse configuration from a file or string.
    ///
    /// This error occurs when:
    /// - The configuration JSON or YAML is malformed
    /// - Field types are incorrect
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parsed but contains invalid values.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Reading or writing the registry file failed.
    #[error("Registry persistence error: {0}")]
    Persistence(String),

    /// Error in serializing or deserializing data.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Querying or signalling an OS process failed for a reason other than permissions.
    #[error("Process error: {0}")]
    Process(String),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for mcp-supervisor operations.
pub type Result<T> = std::result::Result<T, Error>;
