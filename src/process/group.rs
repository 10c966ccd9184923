use crate::process::ProcessNode;
use std::collections::{BTreeMap, BTreeSet};

/// One logical worker instance: a root process and its descendants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessGroup {
    /// The root comes first, the rest in discovery order.
    members: Vec<ProcessNode>,
}

impl ProcessGroup {
    pub fn root(&self) -> &ProcessNode {
        &self.members[0]
    }

    pub fn members(&self) -> &[ProcessNode] {
        &self.members
    }

    pub fn pids(&self) -> Vec<u32> {
        self.members.iter().map(|n| n.pid).collect()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.members.iter().any(|n| n.pid == pid)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Partitions processes into parent/child trees.
///
/// A launcher that execs an interpreter as a child (`uv run` forking
/// `python`) yields two processes matching the same script; grouping makes
/// them count as one instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessGroupAnalyzer;

impl ProcessGroupAnalyzer {
    /// Partition `nodes` into disjoint groups.
    ///
    /// Only parent edges inside `nodes` count. A node whose parent is absent
    /// (or is itself) roots a group. Members of a parent cycle, which have no
    /// root, seed their own group. Groups come back ordered by root pid and
    /// every input pid appears in exactly one group.
    pub fn group(nodes: &[ProcessNode]) -> Vec<ProcessGroup> {
        let by_pid: BTreeMap<u32, &ProcessNode> = nodes.iter().map(|n| (n.pid, n)).collect();
        let children = children_of(&by_pid);

        let mut visited = BTreeSet::new();
        let mut groups = Vec::new();

        let roots = by_pid
            .values()
            .filter(|n| parent_in_set(n, &by_pid).is_none())
            .map(|n| n.pid);
        for root in roots {
            if let Some(group) = collect(root, &by_pid, &children, &mut visited) {
                groups.push(group);
            }
        }

        let leftover: Vec<u32> = by_pid.keys().copied().filter(|p| !visited.contains(p)).collect();
        for pid in leftover {
            if let Some(group) = collect(pid, &by_pid, &children, &mut visited) {
                groups.push(group);
            }
        }

        groups.sort_by_key(|g| g.root().pid);
        groups
    }

    /// `root` and all its descendants in `nodes`, root first.
    ///
    /// Empty when `root` is not in `nodes`.
    pub fn subtree(root: u32, nodes: &[ProcessNode]) -> Vec<ProcessNode> {
        let by_pid: BTreeMap<u32, &ProcessNode> = nodes.iter().map(|n| (n.pid, n)).collect();
        let children = children_of(&by_pid);
        let mut visited = BTreeSet::new();
        collect(root, &by_pid, &children, &mut visited)
            .map(|g| g.members)
            .unwrap_or_default()
    }
}

fn parent_in_set(node: &ProcessNode, by_pid: &BTreeMap<u32, &ProcessNode>) -> Option<u32> {
    node.ppid
        .filter(|ppid| *ppid != node.pid && by_pid.contains_key(ppid))
}

fn children_of(by_pid: &BTreeMap<u32, &ProcessNode>) -> BTreeMap<u32, Vec<u32>> {
    let mut children: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for node in by_pid.values() {
        if let Some(ppid) = parent_in_set(node, by_pid) {
            children.entry(ppid).or_default().push(node.pid);
        }
    }
    children
}

/// Iterative depth-first walk from `start`, skipping visited pids.
fn collect(
    start: u32,
    by_pid: &BTreeMap<u32, &ProcessNode>,
    children: &BTreeMap<u32, Vec<u32>>,
    visited: &mut BTreeSet<u32>,
) -> Option<ProcessGroup> {
    if !by_pid.contains_key(&start) || !visited.insert(start) {
        return None;
    }

    let mut members = Vec::new();
    let mut stack = vec![start];
    while let Some(pid) = stack.pop() {
        if let Some(node) = by_pid.get(&pid) {
            members.push((*node).clone());
        }
        if let Some(kids) = children.get(&pid) {
            for kid in kids.iter().rev() {
                if visited.insert(*kid) {
                    stack.push(*kid);
                }
            }
        }
    }

    Some(ProcessGroup { members })
}
