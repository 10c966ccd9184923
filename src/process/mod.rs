//! OS process snapshots and the analysis built on them.
//!
//! A [`ProcessSnapshot`] is a point-in-time list of [`ProcessNode`]s (pid,
//! parent pid, argv) taken through a [`ProcessTable`]. Worker identification
//! is centralised in two explicit predicates: [`SnapshotFilter`] decides which
//! processes enter a snapshot at all (and always drops the supervisor's own
//! pid), and [`ScriptMatcher`] decides whether a process runs a given
//! definition's script. [`ProcessGroupAnalyzer`] then collapses parent/child
//! chains into single logical instances.
//!
//! Script matching is heuristic: an unrelated process whose argv carries a
//! script with the same file name is indistinguishable from the worker.
mod group;
mod system;

pub use group::{ProcessGroup, ProcessGroupAnalyzer};
pub use system::{ProcessTable, StopSignal, SystemProcessTable};

#[cfg(test)]
pub use system::MockProcessTable;

use crate::registry::ServerDefinition;

/// One OS process as seen in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessNode {
    pub pid: u32,
    /// Parent pid, if the OS reports one.
    pub ppid: Option<u32>,
    /// Executable name as reported by the OS.
    pub name: String,
    /// Full command line.
    pub argv: Vec<String>,
    /// Start time in seconds since the Unix epoch.
    pub start_time: u64,
}

impl ProcessNode {
    pub fn new(pid: u32, ppid: Option<u32>, name: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            pid,
            ppid,
            name: name.into(),
            argv,
            start_time: 0,
        }
    }

    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// Which processes a snapshot keeps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotFilter {
    /// Never include this pid (the supervisor itself).
    pub exclude_pid: Option<u32>,
    /// Case-insensitive fragments of the process name; empty accepts any name.
    pub names: Vec<String>,
}

impl SnapshotFilter {
    /// Every process with a command line, except the current one.
    pub fn everything() -> Self {
        Self {
            exclude_pid: Some(std::process::id()),
            names: Vec::new(),
        }
    }

    /// Worker processes by name fragment, except the current one.
    pub fn workers(names: &[String]) -> Self {
        Self {
            exclude_pid: Some(std::process::id()),
            names: names.iter().map(|n| n.to_lowercase()).collect(),
        }
    }

    pub fn accepts(&self, node: &ProcessNode) -> bool {
        if Some(node.pid) == self.exclude_pid || node.argv.is_empty() {
            return false;
        }
        if self.names.is_empty() {
            return true;
        }
        let name = node.name.to_lowercase();
        self.names.iter().any(|fragment| name.contains(fragment.as_str()))
    }
}

/// A filtered, point-in-time list of processes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSnapshot {
    nodes: Vec<ProcessNode>,
}

impl ProcessSnapshot {
    /// Build a snapshot, keeping only the nodes `filter` accepts.
    pub fn from_nodes(nodes: impl IntoIterator<Item = ProcessNode>, filter: &SnapshotFilter) -> Self {
        let mut nodes: Vec<ProcessNode> = nodes.into_iter().filter(|n| filter.accepts(n)).collect();
        nodes.sort_by_key(|n| n.pid);
        Self { nodes }
    }

    pub fn nodes(&self) -> &[ProcessNode] {
        &self.nodes
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessNode> {
        self.nodes
            .binary_search_by_key(&pid, |n| n.pid)
            .ok()
            .map(|i| &self.nodes[i])
    }

    /// Nodes whose command line runs the matcher's script.
    pub fn matching(&self, matcher: &ScriptMatcher) -> Vec<ProcessNode> {
        self.nodes.iter().filter(|n| matcher.matches(n)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Decides whether a process runs a particular script.
///
/// A process matches when any argv token is the script's file name or ends
/// with `/<file name>` or `\<file name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptMatcher {
    file_name: String,
    unix_suffix: String,
    windows_suffix: String,
}

impl ScriptMatcher {
    pub fn new(file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        Self {
            unix_suffix: format!("/{}", file_name),
            windows_suffix: format!("\\{}", file_name),
            file_name,
        }
    }

    /// Matcher for a definition's script, if it has a file name.
    pub fn for_definition(def: &ServerDefinition) -> Option<Self> {
        def.script_file_name().filter(|n| !n.is_empty()).map(Self::new)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn matches(&self, node: &ProcessNode) -> bool {
        node.argv.iter().any(|arg| {
            arg == &self.file_name
                || arg.ends_with(&self.unix_suffix)
                || arg.ends_with(&self.windows_suffix)
        })
    }
}
