use crate::process::{
    ProcessGroup, ProcessGroupAnalyzer, ProcessNode, ProcessSnapshot, ProcessTable, ScriptMatcher,
    SnapshotFilter,
};
use crate::registry::{Registry, ServerDefinition};
use crate::server::slots::SlotTable;
use crate::server::{ProcessHandle, ServerStatus, StatusChange};
use std::collections::BTreeMap;

/// What a reconciliation pass concluded about one definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    /// The tracked process is still alive.
    Tracked,
    /// The tracked process is gone (or there was none) but another process
    /// runs the script; this node is the root of the chosen instance.
    Rebound(ProcessNode),
    /// Nothing runs the script.
    Gone,
    /// The snapshot failed and the tracked process is not alive; nothing can
    /// be concluded.
    Unknown,
}

/// Brings registry statuses in line with the OS process table.
#[derive(Debug, Clone)]
pub struct StatusReconciler {
    filter: SnapshotFilter,
}

impl StatusReconciler {
    pub fn new(filter: SnapshotFilter) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> &SnapshotFilter {
        &self.filter
    }

    /// Decide whether `def` has a live process.
    ///
    /// When several instances match, the one containing the previously
    /// tracked pid wins, otherwise the one whose root has the lowest pid.
    pub fn assess(
        &self,
        def: &ServerDefinition,
        handle: Option<&ProcessHandle>,
        snapshot: Option<&ProcessSnapshot>,
        table: &dyn ProcessTable,
    ) -> Liveness {
        if let Some(handle) = handle {
            if table.is_alive(handle.pid) {
                return Liveness::Tracked;
            }
        }

        let Some(snapshot) = snapshot else {
            return Liveness::Unknown;
        };
        let Some(matcher) = ScriptMatcher::for_definition(def) else {
            return Liveness::Gone;
        };

        let groups = ProcessGroupAnalyzer::group(&snapshot.matching(&matcher));
        let previous = handle.map(|h| h.pid);
        groups
            .iter()
            .find(|g| previous.is_some_and(|pid| g.contains(pid)))
            .or_else(|| groups.first())
            .map(|g| Liveness::Rebound(g.root().clone()))
            .unwrap_or(Liveness::Gone)
    }

    /// One full pass over the registry. Returns only statuses that moved.
    ///
    /// Definitions in Starting or Stopping, and definitions whose slot is busy
    /// with a start, stop or exit, are left to the operation in flight. Any
    /// other definition with no live process ends up Stopped.
    #[tracing::instrument(skip_all)]
    pub(crate) fn reconcile(
        &self,
        registry: &Registry,
        slots: &SlotTable,
        table: &dyn ProcessTable,
    ) -> Vec<StatusChange> {
        let snapshot = match table.snapshot(&self.filter) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(error = %e, "Process snapshot failed, only tracked pids are checked");
                None
            }
        };

        let mut changes = Vec::new();
        for def in registry.list() {
            if def.status.is_transient() {
                continue;
            }

            let slot = slots.get_or_create(&def.name);
            let Some(_ops) = slot.try_lock_ops() else {
                tracing::trace!(server = %def.name, "Operation in flight, skipping");
                continue;
            };

            let handle = slot.handle();
            let target = match self.assess(&def, handle.as_ref(), snapshot.as_ref(), table) {
                Liveness::Tracked => ServerStatus::Running,
                Liveness::Rebound(node) => {
                    tracing::info!(server = %def.name, pid = node.pid, "Bound to running process");
                    slot.set_handle(Some(ProcessHandle::adopted(&node)));
                    slot.set_sink(None);
                    ServerStatus::Running
                }
                Liveness::Gone => {
                    if handle.is_some() {
                        slot.set_handle(None);
                        slot.set_sink(None);
                    }
                    // An Error definition keeps its failure in `last_error`.
                    ServerStatus::Stopped
                }
                Liveness::Unknown => continue,
            };

            let moved = registry.transition(&def.name, |current| {
                Ok(if current.is_transient() { current } else { target })
            });
            match moved {
                Ok(Some(change)) => {
                    tracing::info!(server = %change.name, previous = %change.previous, current = %change.current, "Reconciled status");
                    changes.push(change);
                }
                Ok(None) => {}
                Err(e) => tracing::debug!(server = %def.name, error = %e, "Definition vanished during reconciliation"),
            }
        }

        changes
    }
}

/// Definitions with more than one instance running, with those instances.
pub fn find_duplicates(
    defs: &[ServerDefinition],
    snapshot: &ProcessSnapshot,
) -> BTreeMap<String, Vec<ProcessGroup>> {
    defs.iter()
        .filter_map(|def| {
            let matcher = ScriptMatcher::for_definition(def)?;
            let groups = ProcessGroupAnalyzer::group(&snapshot.matching(&matcher));
            (groups.len() > 1).then(|| (def.name.clone(), groups))
        })
        .collect()
}
