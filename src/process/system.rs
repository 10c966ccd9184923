use crate::error::{Error, Result};
use crate::process::{ProcessNode, ProcessSnapshot, SnapshotFilter};
use std::sync::{Mutex, MutexGuard};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

/// Signal used to stop a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Graceful termination (SIGTERM).
    Terminate,
    /// Forced kill (SIGKILL).
    Kill,
}

/// Read and signal the OS process table.
///
/// Everything the lifecycle and reconciliation code knows about OS processes
/// goes through this trait, so tests can substitute a scripted table.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessTable: Send + Sync {
    /// Take a snapshot of the processes `filter` accepts.
    fn snapshot(&self, filter: &SnapshotFilter) -> Result<ProcessSnapshot>;

    /// Whether `pid` exists and is not a zombie.
    fn is_alive(&self, pid: u32) -> bool;

    /// Deliver `signal` to `pid`. A process that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` when the OS refuses, `Process` for anything else.
    fn signal(&self, pid: u32, signal: StopSignal) -> Result<()>;
}

/// [`ProcessTable`] backed by `sysinfo` for queries and `nix` for signals.
pub struct SystemProcessTable {
    system: Mutex<System>,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn system(&self) -> Result<MutexGuard<'_, System>> {
        self.system
            .lock()
            .map_err(|_| Error::Other("Failed to lock process table".to_string()))
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemProcessTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemProcessTable").finish_non_exhaustive()
    }
}

impl ProcessTable for SystemProcessTable {
    fn snapshot(&self, filter: &SnapshotFilter) -> Result<ProcessSnapshot> {
        let mut system = self.system()?;
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );

        let nodes = system
            .processes()
            .iter()
            // Linux lists threads as tasks of their process.
            .filter(|(_, process)| process.thread_kind().is_none())
            .filter(|(_, process)| !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
            .map(|(pid, process)| ProcessNode {
                pid: pid.as_u32(),
                ppid: process.parent().map(|p| p.as_u32()),
                name: process.name().to_string_lossy().into_owned(),
                argv: process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned())
                    .collect(),
                start_time: process.start_time(),
            });

        let snapshot = ProcessSnapshot::from_nodes(nodes, filter);
        tracing::trace!(num_processes = snapshot.len(), "Took process snapshot");
        Ok(snapshot)
    }

    fn is_alive(&self, pid: u32) -> bool {
        let Ok(mut system) = self.system() else {
            return false;
        };
        let sys_pid = Pid::from_u32(pid);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::nothing(),
        );
        system
            .process(sys_pid)
            .is_some_and(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
    }

    #[cfg(unix)]
    fn signal(&self, pid: u32, signal: StopSignal) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid as UnixPid;

        // pid 0 and negative pids address process groups.
        let raw = i32::try_from(pid)
            .ok()
            .filter(|raw| *raw > 0)
            .ok_or_else(|| Error::Process(format!("Refusing to signal pid {}", pid)))?;

        let sig = match signal {
            StopSignal::Terminate => Signal::SIGTERM,
            StopSignal::Kill => Signal::SIGKILL,
        };

        match signal::kill(UnixPid::from_raw(raw), sig) {
            Ok(()) => {
                tracing::debug!(pid, signal = ?sig, "Signalled process");
                Ok(())
            }
            Err(Errno::ESRCH) => Ok(()),
            Err(Errno::EPERM) => Err(Error::PermissionDenied { pid }),
            Err(e) => Err(Error::Process(format!("Failed to signal {}: {}", pid, e))),
        }
    }

    #[cfg(not(unix))]
    fn signal(&self, pid: u32, signal: StopSignal) -> Result<()> {
        let mut system = self.system()?;
        let sys_pid = Pid::from_u32(pid);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::nothing(),
        );
        let Some(process) = system.process(sys_pid) else {
            return Ok(());
        };

        let delivered = match signal {
            StopSignal::Terminate => process.kill_with(sysinfo::Signal::Term).unwrap_or_else(|| process.kill()),
            StopSignal::Kill => process.kill(),
        };
        if delivered {
            Ok(())
        } else {
            Err(Error::Process(format!("Failed to signal {}", pid)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_never_contains_self() {
        let table = SystemProcessTable::new();
        let snapshot = table.snapshot(&SnapshotFilter::everything()).unwrap();
        assert!(snapshot.get(std::process::id()).is_none());
    }

    #[test]
    fn test_self_is_alive() {
        let table = SystemProcessTable::new();
        assert!(table.is_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn test_refuses_pid_zero() {
        let table = SystemProcessTable::new();
        assert!(matches!(table.signal(0, StopSignal::Terminate), Err(Error::Process(_))));
    }
}
