use crate::config::{Config, SupervisorConfig};
use crate::error::{Error, Result};
use crate::process::ProcessNode;
use crate::registry::{LaunchSpec, ServerDefinition};
use crate::server::{EventBus, LogBuffer, LogRotator, LogSink};
use async_process::{Child, Command, Stdio};
use chrono::{DateTime, Local, TimeZone};
use futures_lite::io::{AsyncBufReadExt, AsyncRead, BufReader};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Identifies one launch, so a late exit of an old process can't clobber a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LaunchId(Uuid);

impl LaunchId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LaunchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a server definition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// No process is known to run the server
    #[default]
    Stopped,
    /// A launch has been accepted and is in flight
    Starting,
    /// A process is running the server
    Running,
    /// A stop has been accepted and is in flight
    Stopping,
    /// The last launch or stop failed, or the process crashed
    Error,
}

impl ServerStatus {
    /// Starting, Running or Stopping.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    /// Starting or Stopping.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// How the supervisor came to know a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleOrigin {
    /// Spawned by this supervisor
    Spawned,
    /// Found running by reconciliation
    Adopted,
}

/// The live process currently bound to a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessHandle {
    pub launch_id: LaunchId,
    pub pid: u32,
    pub started_at: DateTime<Local>,
    /// Log file receiving the process's output, when the supervisor spawned it.
    pub log_file: Option<PathBuf>,
    pub origin: HandleOrigin,
}

impl ProcessHandle {
    pub(crate) fn spawned(pid: u32, log_file: Option<PathBuf>) -> Self {
        Self {
            launch_id: LaunchId::new(),
            pid,
            started_at: Local::now(),
            log_file,
            origin: HandleOrigin::Spawned,
        }
    }

    pub(crate) fn adopted(node: &ProcessNode) -> Self {
        let started_at = i64::try_from(node.start_time)
            .ok()
            .and_then(|secs| Local.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Local::now);
        Self {
            launch_id: LaunchId::new(),
            pid: node.pid,
            started_at,
            log_file: None,
            origin: HandleOrigin::Adopted,
        }
    }
}

/// Where a resolved launch command came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOrigin {
    /// The launch spec stored on the definition
    Recorded,
    /// A declaration source naming the server at launch time
    Declared(String),
    /// The configured default launcher
    Default,
}

/// A fully resolved command line for one launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLaunch {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_directory: PathBuf,
    pub origin: LaunchOrigin,
}

impl ResolvedLaunch {
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A freshly spawned worker.
pub(crate) struct LaunchedProcess {
    pub handle: ProcessHandle,
    pub child: Child,
    pub sink: Arc<LogSink>,
    /// Copies stdout and stderr into the sink until both close.
    pub pumps: JoinHandle<()>,
}

/// Turns a definition into a running OS process with captured output.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: Arc<SupervisorConfig>,
    rotator: LogRotator,
}

impl ProcessLauncher {
    pub fn new(config: Arc<SupervisorConfig>) -> Self {
        let rotator = LogRotator::from_config(&config);
        Self { config, rotator }
    }

    pub fn rotator(&self) -> &LogRotator {
        &self.rotator
    }

    /// Whether a server in `status` may be started.
    pub fn admit(name: &str, status: ServerStatus) -> Result<()> {
        match status {
            ServerStatus::Stopped | ServerStatus::Error => Ok(()),
            ServerStatus::Starting | ServerStatus::Running => Err(Error::AlreadyRunning(name.to_string())),
            ServerStatus::Stopping => Err(Error::StopInProgress(name.to_string())),
        }
    }

    pub fn verify_script(def: &ServerDefinition) -> Result<()> {
        if def.script_path.is_file() {
            Ok(())
        } else {
            Err(Error::ScriptNotFound(def.script_path.clone()))
        }
    }

    /// Pick the command for `def`.
    ///
    /// The recorded launch spec wins, then a declaration source that names
    /// the server, then the default launcher.
    pub fn resolve(&self, def: &ServerDefinition) -> ResolvedLaunch {
        if let Some(spec) = &def.original_launch_spec {
            return from_spec(def, spec, LaunchOrigin::Recorded);
        }

        if let Some(spec) = self.find_declaration(&def.name) {
            let origin = LaunchOrigin::Declared(spec.source.clone().unwrap_or_default());
            return from_spec(def, &spec, origin);
        }

        let working_directory = working_directory_for(def, None);
        let launcher = &self.config.default_launcher;
        let (program, args) = match &launcher.interpreter {
            Some(interpreter) => (
                interpreter.clone(),
                vec![def.script_path.to_string_lossy().into_owned()],
            ),
            None => (
                launcher.program.clone(),
                vec![
                    "--directory".to_string(),
                    working_directory.to_string_lossy().into_owned(),
                    "run".to_string(),
                    def.script_file_name().unwrap_or_default(),
                ],
            ),
        };

        ResolvedLaunch {
            program,
            args,
            env: HashMap::new(),
            working_directory,
            origin: LaunchOrigin::Default,
        }
    }

    fn find_declaration(&self, name: &str) -> Option<LaunchSpec> {
        self.config
            .declaration_sources
            .iter()
            .filter(|source| source.path.is_file())
            .find_map(|source| match Config::from_file(&source.path) {
                Ok(declared) => declared
                    .mcp_servers
                    .get(name)
                    .map(|entry| LaunchSpec::declared(entry.clone(), &source.label)),
                Err(e) => {
                    tracing::debug!(source = %source.label, error = %e, "Ignoring unreadable declaration source");
                    None
                }
            })
    }

    /// Open a fresh log, rotate old ones, and spawn the worker.
    ///
    /// The new log file exists before rotation runs, so it is never the one
    /// deleted.
    #[tracing::instrument(skip(self, def, buffer, events), fields(server = %def.name))]
    pub(crate) async fn launch(
        &self,
        def: &ServerDefinition,
        buffer: Arc<LogBuffer>,
        events: &EventBus,
    ) -> Result<LaunchedProcess> {
        let log_path = self.rotator.log_path(&def.name, Local::now());
        let sink = Arc::new(
            LogSink::create(
                &def.name,
                &log_path,
                buffer,
                events.clone(),
                self.config.timestamp_log_lines,
            )
            .await,
        );

        let report = self.rotator.rotate(&def.name);
        if !report.is_clean() {
            tracing::warn!(failures = report.failures.len(), "Old logs could not all be removed");
        }

        let resolved = self.resolve(def);
        sink.emit(&format!("Starting server {}", def.name)).await;
        sink.emit(&format!("Command: {}", resolved.display_line())).await;
        sink.emit(&format!("Working directory: {}", resolved.working_directory.display())).await;

        let mut command = Command::new(&resolved.program);
        command
            .args(&resolved.args)
            .envs(&resolved.env)
            .current_dir(&resolved.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if !resolved.env.contains_key("PYTHONUNBUFFERED") {
            command.env("PYTHONUNBUFFERED", "1");
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                sink.emit(&format!("Failed to start: {}", e)).await;
                return Err(Error::SpawnFailure(format!("{}: {}", resolved.program, e)));
            }
        };

        let pid = child.id();
        tracing::info!(pid, command = %resolved.display_line(), "Spawned server process");
        sink.emit(&format!("Process started with PID {}", pid)).await;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let pumps = tokio::spawn({
            let sink = Arc::clone(&sink);
            async move {
                let out = async {
                    if let Some(stdout) = stdout {
                        pump(&sink, stdout).await;
                    }
                };
                let err = async {
                    if let Some(stderr) = stderr {
                        pump(&sink, stderr).await;
                    }
                };
                futures::join!(out, err);
            }
        });

        Ok(LaunchedProcess {
            handle: ProcessHandle::spawned(pid, sink.path().map(Path::to_path_buf)),
            child,
            sink,
            pumps,
        })
    }
}

fn from_spec(def: &ServerDefinition, spec: &LaunchSpec, origin: LaunchOrigin) -> ResolvedLaunch {
    ResolvedLaunch {
        program: spec.command().to_string(),
        args: spec.args().to_vec(),
        env: spec.env().clone(),
        working_directory: working_directory_for(def, Some(spec)),
        origin,
    }
}

/// `--directory` of the launch spec, else the definition's directory, else the
/// script's directory; the first that exists wins.
fn working_directory_for(def: &ServerDefinition, spec: Option<&LaunchSpec>) -> PathBuf {
    let script_dir = def
        .script_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf);

    spec.and_then(LaunchSpec::directory)
        .into_iter()
        .chain(std::iter::once(def.working_directory.clone()))
        .chain(script_dir)
        .find(|dir| dir.is_dir())
        .unwrap_or_else(|| def.working_directory.clone())
}

/// Copy lines from `reader` into `sink` until EOF. Invalid UTF-8 is replaced.
async fn pump<R: AsyncRead + Unpin>(sink: &LogSink, reader: R) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                sink.emit(line.trim_end_matches(['\r', '\n'])).await;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Output stream closed");
                break;
            }
        }
    }
}

/// Map a process exit to the status it leaves the definition in.
///
/// Any exit while a stop was requested is a clean stop, whatever the code
/// or signal. Otherwise only a zero exit is clean.
pub fn classify_exit(status: &ExitStatus, stop_requested: bool) -> ServerStatus {
    if stop_requested || status.success() {
        ServerStatus::Stopped
    } else {
        ServerStatus::Error
    }
}

/// Human-readable exit description.
pub fn describe_exit(status: &ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {}", signal);
        }
    }
    match status.code() {
        Some(code) => format!("exited with code {}", code),
        None => "exited".to_string(),
    }
}
