/*!
 # MCP Supervisor

 A Rust library for launching, monitoring and tearing down long-running local
 MCP server processes.

 ## Overview

 MCP Supervisor keeps a durable registry of server definitions (name, entry
 script, working directory) and makes the OS agree with it:
 - Start servers as background processes, capturing their output into
   rotated per-launch log files and an in-memory ring buffer
 - Stop servers with a graceful terminate, escalating to a forced kill
 - Reconcile recorded statuses against the live process table, adopting
   instances started elsewhere and noticing ones that died
 - Detect duplicate instances of the same server
 - Import servers declared for other MCP clients (Cursor, Claude Desktop)

 ## Basic Usage

 ```no_run
 use mcp_supervisor::{Result, ServerDefinition, ServerStatus, Supervisor};
 use mcp_supervisor::config::SupervisorConfig;
 use std::time::Duration;

 #[tokio::main]
 async fn main() -> Result<()> {
     let supervisor = Supervisor::new(SupervisorConfig::default())?;

     // Bring recorded statuses in line with what is actually running
     supervisor.reconcile_now().await?;

     supervisor.add(ServerDefinition::new("fetch", "/srv/fetch/server.py"))?;

     // Start returns once the launch is accepted; the spawn happens in the background
     supervisor.start("fetch")?;
     supervisor
         .wait_for_status("fetch", ServerStatus::Running, Duration::from_secs(10))
         .await?;

     for line in supervisor.recent_logs("fetch", Some(20)) {
         println!("{}", line);
     }

     supervisor.stop("fetch")?;
     Ok(())
 }
 ```

 ## Features

 - **Registry**: JSON-persisted definitions, rewritten atomically on every change
 - **Lifecycle**: Non-blocking start, stop and restart with per-server serialization
 - **Logs**: Timestamped per-launch files with per-server and global retention caps
 - **Reconciliation**: One-shot or periodic, with parent/child instance grouping
 - **Events**: Broadcast status changes and captured output lines
*/

pub mod config;
pub mod error;
pub mod process;
pub mod registry;
pub mod server;

pub use config::SupervisorConfig;
pub use error::{Error, Result};
pub use registry::{DefinitionPatch, LaunchSpec, Registry, ServerDefinition};
pub use server::{ProcessHandle, ReconcileMonitor, ServerStatus, StatusChange};

use crate::process::{
    ProcessGroup, ProcessGroupAnalyzer, ProcessSnapshot, ProcessTable, ScriptMatcher,
    SnapshotFilter, StopSignal, SystemProcessTable,
};
use crate::server::slots::{ServerSlot, SlotTable};
use crate::server::{
    EventBus, LaunchedProcess, LogFileEntry, LogLine, LogSink, ProcessLauncher, StatusReconciler,
    classify_exit, describe_exit,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// How long an exited process's output pumps may keep draining.
const DRAIN_GRACE: Duration = Duration::from_millis(500);
const STATUS_WAIT_POLL: Duration = Duration::from_millis(25);

/// Entry point: owns the registry and the runtime state of every server.
///
/// Cheap to clone; clones share state. `start`, `stop` and `restart` return
/// as soon as the request is accepted and finish on the Tokio runtime, so
/// they must be called from within one.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<SupervisorConfig>,
    registry: Registry,
    slots: SlotTable,
    events: EventBus,
    launcher: ProcessLauncher,
    reconciler: StatusReconciler,
    table: Arc<dyn ProcessTable>,
}

impl Supervisor {
    /// Create a supervisor using the OS process table.
    ///
    /// Creates the config and log directories, loads the registry and imports
    /// servers from the configured declaration sources.
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        Self::with_process_table(config, Arc::new(SystemProcessTable::new()))
    }

    /// Create a supervisor from a settings file.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(SupervisorConfig::from_file(path)?)
    }

    /// Create a supervisor over a custom process table.
    #[tracing::instrument(skip_all, fields(config_dir = %config.config_dir.display()))]
    pub fn with_process_table(config: SupervisorConfig, table: Arc<dyn ProcessTable>) -> Result<Self> {
        config::validate_config(&config)?;

        for dir in [&config.config_dir, &config.log_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::Persistence(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        let registry = Registry::open(config.registry_file())?;
        if !config.declaration_sources.is_empty() {
            let imported = registry.import_declarations(&config.declaration_sources)?;
            if !imported.is_empty() {
                tracing::info!(num_imported = imported.len(), "Imported declared servers");
            }
        }

        // Starting/Stopping belong to operations of a previous run.
        for def in registry.list() {
            if def.status.is_transient() {
                registry.set_status(&def.name, ServerStatus::Stopped)?;
            }
        }

        let config = Arc::new(config);
        let inner = Inner {
            slots: SlotTable::new(config.log_buffer_capacity),
            events: EventBus::new(),
            launcher: ProcessLauncher::new(Arc::clone(&config)),
            reconciler: StatusReconciler::new(SnapshotFilter::workers(&config.worker_process_names)),
            registry,
            table,
            config,
        };

        tracing::info!(num_servers = inner.registry.list().len(), "Supervisor ready");
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn list(&self) -> Vec<ServerDefinition> {
        self.inner.registry.list()
    }

    pub fn get(&self, name: &str) -> Option<ServerDefinition> {
        self.inner.registry.get(name)
    }

    pub fn status(&self, name: &str) -> Result<ServerStatus> {
        self.inner.registry.status(name)
    }

    /// The live process bound to `name`, if any.
    pub fn handle(&self, name: &str) -> Option<ProcessHandle> {
        self.inner.slots.get(name).and_then(|slot| slot.handle())
    }

    /// Register a new, stopped definition.
    pub fn add(&self, mut def: ServerDefinition) -> Result<()> {
        def.status = ServerStatus::Stopped;
        self.inner.registry.add(def)
    }

    /// Remove a definition that is not active.
    pub fn remove(&self, name: &str) -> Result<ServerDefinition> {
        let removed = self.inner.registry.remove(name)?;
        self.inner.slots.remove(name);
        Ok(removed)
    }

    /// Patch a definition. A rename carries the captured output along.
    pub fn update(&self, name: &str, patch: DefinitionPatch) -> Result<ServerDefinition> {
        let updated = self.inner.registry.update(name, patch)?;
        if updated.name != name {
            self.inner.slots.rename(name, &updated.name);
        }
        Ok(updated)
    }

    /// Request a start.
    ///
    /// Moves the definition to Starting and returns; the process is spawned
    /// in the background and the definition becomes Running or Error.
    ///
    /// # Errors
    ///
    /// `NotFound`, `AlreadyRunning` when Starting or Running, `StopInProgress`
    /// when Stopping, `ScriptNotFound` (the definition moves to Error).
    pub fn start(&self, name: &str) -> Result<()> {
        self.inner.request_start(name)
    }

    /// Request a stop.
    ///
    /// Moves the definition to Stopping and returns; termination runs in the
    /// background and the definition becomes Stopped. A process that survives
    /// the forced kill is recorded as the last error.
    ///
    /// # Errors
    ///
    /// `NotFound`, `NotRunning` when Stopped or Error, `StopInProgress` when
    /// already Stopping.
    pub fn stop(&self, name: &str) -> Result<()> {
        self.inner.request_stop(name)
    }

    /// Request a stop followed by a start, in the background.
    pub fn restart(&self, name: &str) -> Result<()> {
        if self.inner.registry.get(name).is_none() {
            return Err(Error::NotFound(name.to_string()));
        }
        let inner = Arc::clone(&self.inner);
        let name = name.to_string();
        tokio::spawn(async move { inner.run_restart(name).await });
        Ok(())
    }

    /// Run one reconciliation pass and publish the changes it made.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_now(&self) -> Result<Vec<StatusChange>> {
        let inner = Arc::clone(&self.inner);
        let changes = tokio::task::spawn_blocking(move || {
            inner
                .reconciler
                .reconcile(&inner.registry, &inner.slots, inner.table.as_ref())
        })
        .await
        .map_err(|e| Error::Other(format!("Reconciliation task failed: {}", e)))?;

        for change in &changes {
            self.inner.events.publish(change.clone());
        }
        Ok(changes)
    }

    /// Definitions with more than one running instance.
    #[tracing::instrument(skip(self))]
    pub async fn find_duplicates(&self) -> Result<BTreeMap<String, Vec<ProcessGroup>>> {
        let filter = self.inner.reconciler.filter().clone();
        let snapshot = self.inner.blocking(move |table| table.snapshot(&filter)).await??;
        Ok(server::find_duplicates(&self.list(), &snapshot))
    }

    /// Poll until `name` reaches `wanted`.
    ///
    /// # Errors
    ///
    /// `Timeout` if it does not get there within `timeout`.
    pub async fn wait_for_status(&self, name: &str, wanted: ServerStatus, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let current = self.status(name)?;
            if current == wanted {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "'{}' is {} after {:?}, expected {}",
                    name, current, timeout, wanted
                )));
            }
            tokio::time::sleep(STATUS_WAIT_POLL).await;
        }
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusChange> {
        self.inner.events.subscribe_status()
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogLine> {
        self.inner.events.subscribe_logs()
    }

    /// Recent status changes of `name`, newest first.
    pub fn status_history(&self, name: &str, limit: Option<usize>) -> Result<Vec<StatusChange>> {
        self.inner.events.recent_changes(Some(name), limit)
    }

    /// The last `max` captured output lines of `name` (all when `None`), oldest first.
    pub fn recent_logs(&self, name: &str, max: Option<usize>) -> Vec<String> {
        self.inner
            .slots
            .get(name)
            .map(|slot| slot.buffer().recent(max))
            .unwrap_or_default()
    }

    /// Log files of `name` on disk, oldest first.
    pub fn log_files(&self, name: &str) -> Vec<LogFileEntry> {
        self.inner.launcher.rotator().list(Some(name))
    }

    /// The most recent launch or stop failure of `name`.
    pub fn last_error(&self, name: &str) -> Option<String> {
        self.inner.slots.get(name).and_then(|slot| slot.last_error())
    }

    /// A periodic reconciler at the configured interval. Call `start` on it.
    pub fn monitor(&self) -> ReconcileMonitor {
        ReconcileMonitor::new(self.clone(), self.inner.config.reconcile_interval())
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("registry", &self.inner.registry)
            .field("events", &self.inner.events)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn publish(&self, change: Option<StatusChange>) {
        if let Some(change) = change {
            self.events.publish(change);
        }
    }

    /// Run a process-table call off the async threads.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn ProcessTable) -> T + Send + 'static,
        T: Send + 'static,
    {
        let table = Arc::clone(&self.table);
        tokio::task::spawn_blocking(move || f(table.as_ref()))
            .await
            .map_err(|e| Error::Other(format!("Process table task failed: {}", e)))
    }

    #[tracing::instrument(skip(self))]
    fn request_start(self: &Arc<Self>, name: &str) -> Result<()> {
        let def = self
            .registry
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        let script = ProcessLauncher::verify_script(&def);

        let change = self.registry.transition(name, |status| {
            ProcessLauncher::admit(name, status)?;
            Ok(if script.is_ok() {
                ServerStatus::Starting
            } else {
                ServerStatus::Error
            })
        })?;
        self.publish(change);

        if let Err(e) = script {
            tracing::warn!(error = %e, "Refusing to start");
            self.slots.get_or_create(name).record_error(e.to_string());
            return Err(e);
        }

        tracing::info!("Start requested");
        let inner = Arc::clone(self);
        let name = name.to_string();
        tokio::spawn(async move { inner.run_launch(name).await });
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn request_stop(self: &Arc<Self>, name: &str) -> Result<()> {
        let change = self.registry.transition(name, |status| match status {
            ServerStatus::Running | ServerStatus::Starting => Ok(ServerStatus::Stopping),
            ServerStatus::Stopping => Err(Error::StopInProgress(name.to_string())),
            ServerStatus::Stopped | ServerStatus::Error => Err(Error::NotRunning(name.to_string())),
        })?;
        self.publish(change);

        tracing::info!("Stop requested");
        let inner = Arc::clone(self);
        let name = name.to_string();
        tokio::spawn(async move { inner.run_stop(name).await });
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn run_launch(self: Arc<Self>, name: String) {
        let slot = self.slots.get_or_create(&name);
        let _ops = slot.lock_ops().await;

        let Some(def) = self.registry.get(&name) else {
            return;
        };
        if def.status != ServerStatus::Starting {
            tracing::debug!(status = %def.status, "Launch superseded");
            return;
        }

        match self.launcher.launch(&def, slot.buffer(), &self.events).await {
            Ok(launched) => {
                let LaunchedProcess {
                    handle,
                    child,
                    sink,
                    pumps,
                } = launched;
                let launch_id = handle.launch_id;
                slot.set_handle(Some(handle));
                slot.set_sink(Some(Arc::clone(&sink)));
                slot.clear_error();

                // A stop requested mid-launch keeps Stopping and kills this process next.
                match self.registry.transition(&name, |current| {
                    Ok(if current == ServerStatus::Starting {
                        ServerStatus::Running
                    } else {
                        current
                    })
                }) {
                    Ok(change) => self.publish(change),
                    Err(e) => tracing::warn!(error = %e, "Failed to record running status"),
                }

                let watcher = Arc::clone(&self).watch_exit(
                    name.clone(),
                    Arc::clone(&slot),
                    launch_id,
                    child,
                    sink,
                    pumps,
                );
                tokio::spawn(watcher);
            }
            Err(e) => {
                tracing::error!(error = %e, "Launch failed");
                slot.record_error(e.to_string());
                match self.registry.transition(&name, |current| {
                    Ok(if current == ServerStatus::Starting {
                        ServerStatus::Error
                    } else {
                        current
                    })
                }) {
                    Ok(change) => self.publish(change),
                    Err(e) => tracing::warn!(error = %e, "Failed to record launch failure"),
                }
            }
        }
    }

    /// Own the child until it exits, then record how it ended.
    async fn watch_exit(
        self: Arc<Self>,
        name: String,
        slot: Arc<ServerSlot>,
        launch_id: server::LaunchId,
        mut child: async_process::Child,
        sink: Arc<LogSink>,
        pumps: tokio::task::JoinHandle<()>,
    ) {
        let exit = child.status().await;
        if tokio::time::timeout(DRAIN_GRACE, pumps).await.is_err() {
            tracing::debug!(server = %name, "Output still open after exit, detaching");
        }

        let _ops = slot.lock_ops().await;
        let description = match &exit {
            Ok(status) => describe_exit(status),
            Err(e) => format!("could not be awaited: {}", e),
        };
        sink.emit(&format!("Process {}", description)).await;

        // A stop already handled this launch, or a newer one replaced it.
        if !slot.release_handle(launch_id) {
            return;
        }
        slot.set_sink(None);

        let classify = |current: ServerStatus, exit: &std::io::Result<ExitStatus>| {
            let stop_requested = current == ServerStatus::Stopping;
            match exit {
                Ok(status) => classify_exit(status, stop_requested),
                Err(_) if stop_requested => ServerStatus::Stopped,
                Err(_) => ServerStatus::Error,
            }
        };

        match self.registry.transition(&name, |current| {
            Ok(if current.is_active() {
                classify(current, &exit)
            } else {
                current
            })
        }) {
            Ok(Some(change)) => {
                if change.current == ServerStatus::Error {
                    tracing::warn!(server = %name, exit = %description, "Server exited unexpectedly");
                    slot.record_error(format!("Process {}", description));
                } else {
                    tracing::info!(server = %name, exit = %description, "Server exited");
                }
                self.events.publish(change);
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(server = %name, error = %e, "Exited server no longer registered"),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn run_stop(self: Arc<Self>, name: String) {
        let slot = self.slots.get_or_create(&name);
        let _ops = slot.lock_ops().await;

        let Some(def) = self.registry.get(&name) else {
            return;
        };
        if def.status != ServerStatus::Stopping {
            tracing::debug!(status = %def.status, "Stop superseded");
            return;
        }

        let sink = slot.sink().unwrap_or_else(|| {
            Arc::new(LogSink::detached(
                &name,
                slot.buffer(),
                self.events.clone(),
                self.config.timestamp_log_lines,
            ))
        });
        sink.emit("Stopping server").await;

        let handle = slot.handle();
        let outcome = self.terminate(&def, handle.as_ref().map(|h| h.pid), &sink).await;
        slot.set_handle(None);
        slot.set_sink(None);

        // A survivor is left for reconciliation to pick up again.
        match outcome {
            Ok(()) => {
                sink.emit("Server stopped").await;
                tracing::info!("Server stopped");
            }
            Err(e) => {
                sink.emit(&format!("Stop incomplete: {}", e)).await;
                tracing::error!(error = %e, "Process survived stop");
                slot.record_error(e.to_string());
            }
        }

        match self.registry.transition(&name, |current| {
            Ok(if current == ServerStatus::Stopping {
                ServerStatus::Stopped
            } else {
                current
            })
        }) {
            Ok(change) => self.publish(change),
            Err(e) => tracing::warn!(error = %e, "Failed to record stop outcome"),
        }
    }

    /// Terminate the tracked tree and, when sweeping, every other process
    /// running the script. Fails only if the tracked root outlives the kill.
    async fn terminate(&self, def: &ServerDefinition, root: Option<u32>, sink: &LogSink) -> Result<()> {
        let snapshot = match self
            .blocking(|table| table.snapshot(&SnapshotFilter::everything()))
            .await?
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Process snapshot failed, signalling tracked pid only");
                ProcessSnapshot::default()
            }
        };

        let mut targets = BTreeSet::new();
        if let Some(pid) = root {
            targets.insert(pid);
            targets.extend(ProcessGroupAnalyzer::subtree(pid, snapshot.nodes()).iter().map(|n| n.pid));
        }
        if self.config.sweep_matching_on_stop {
            if let Some(matcher) = ScriptMatcher::for_definition(def) {
                for node in snapshot.matching(&matcher) {
                    targets.extend(
                        ProcessGroupAnalyzer::subtree(node.pid, snapshot.nodes())
                            .iter()
                            .map(|n| n.pid),
                    );
                }
            }
        }

        if targets.is_empty() {
            sink.emit("No live process found").await;
            return Ok(());
        }
        tracing::debug!(pids = ?targets, "Terminating");

        let mut denied = self.signal_all(&targets, StopSignal::Terminate).await;
        let survivors = self.wait_gone(targets, self.config.stop_timeout()).await;
        if survivors.is_empty() {
            return Ok(());
        }

        tracing::warn!(pids = ?survivors, "Processes ignored terminate, killing");
        sink.emit(&format!("{} process(es) did not exit, forcing kill", survivors.len()))
            .await;
        denied.extend(self.signal_all(&survivors, StopSignal::Kill).await);
        let survivors = self.wait_gone(survivors, self.config.kill_grace()).await;
        if survivors.is_empty() {
            return Ok(());
        }

        match root.filter(|pid| survivors.contains(pid)) {
            Some(pid) if denied.contains(&pid) => Err(Error::PermissionDenied { pid }),
            Some(pid) => Err(Error::Timeout(format!("Process {} survived a forced kill", pid))),
            None => {
                tracing::warn!(pids = ?survivors, "Untracked processes survived a forced kill");
                Ok(())
            }
        }
    }

    /// Signal every pid; returns the pids the OS refused.
    async fn signal_all(&self, pids: &BTreeSet<u32>, signal: StopSignal) -> BTreeSet<u32> {
        let pids: Vec<u32> = pids.iter().copied().collect();
        let refused = self
            .blocking(move |table| {
                let mut refused = BTreeSet::new();
                for pid in pids {
                    match table.signal(pid, signal) {
                        Ok(()) => {}
                        Err(Error::PermissionDenied { pid }) => {
                            refused.insert(pid);
                        }
                        Err(e) => tracing::warn!(pid, error = %e, "Failed to signal process"),
                    }
                }
                refused
            })
            .await;

        refused.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Signalling failed");
            BTreeSet::new()
        })
    }

    /// Poll until every pid is gone or `limit` passes; returns the survivors.
    async fn wait_gone(&self, pids: BTreeSet<u32>, limit: Duration) -> BTreeSet<u32> {
        let deadline = Instant::now() + limit;
        let mut alive = pids;
        loop {
            let check: Vec<u32> = alive.iter().copied().collect();
            match self
                .blocking(move |table| {
                    check
                        .into_iter()
                        .filter(|pid| table.is_alive(*pid))
                        .collect::<BTreeSet<u32>>()
                })
                .await
            {
                Ok(still) => alive = still,
                Err(e) => tracing::warn!(error = %e, "Liveness check failed"),
            }

            if alive.is_empty() || Instant::now() >= deadline {
                return alive;
            }
            tokio::time::sleep(self.config.stop_poll_interval()).await;
        }
    }

    /// Wait out an in-flight stop. The stop task holds the slot's ops lock
    /// until it has recorded its outcome. Returns false if `name` vanished.
    async fn await_stop(&self, name: &str) -> bool {
        let slot = self.slots.get_or_create(name);
        loop {
            drop(slot.lock_ops().await);
            match self.registry.status(name) {
                Ok(ServerStatus::Stopping) => {
                    tokio::time::sleep(self.config.restart_poll_interval()).await
                }
                Ok(_) => return true,
                Err(_) => return false,
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn run_restart(self: Arc<Self>, name: String) {
        match self.request_stop(&name) {
            Ok(()) | Err(Error::NotRunning(_)) | Err(Error::StopInProgress(_)) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Restart could not stop the server");
                return;
            }
        }

        let mut settled = false;
        for _ in 0..self.config.restart_poll_attempts {
            match self.registry.status(&name) {
                Ok(status) if !status.is_active() => {
                    settled = true;
                    break;
                }
                Ok(_) => {}
                Err(_) => return,
            }
            tokio::time::sleep(self.config.restart_poll_interval()).await;
        }
        if !settled {
            tracing::warn!("Stop did not settle in time, starting once it finishes");
            if !self.await_stop(&name).await {
                return;
            }
        }

        if let Err(e) = self.request_start(&name) {
            tracing::warn!(error = %e, "Restart could not start the server");
            if let Some(slot) = self.slots.get(&name) {
                slot.record_error(e.to_string());
            }
        }
    }
}
