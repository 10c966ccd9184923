//! Property-based tests for process grouping.
//!
//! - Every input pid lands in exactly one group, whatever the parent links
//! - An acyclic forest yields one group per root
//! - A single tree is one group; two disjoint trees are two

use mcp_supervisor::process::{ProcessGroupAnalyzer, ProcessNode};
use proptest::prelude::*;
use std::collections::BTreeSet;

const BASE_PID: u32 = 1000;
const OUTSIDE_PID: u32 = 1;

fn node(pid: u32, ppid: u32) -> ProcessNode {
    ProcessNode::new(pid, Some(ppid), "python", vec!["python".into(), "server.py".into()])
}

/// Strategy for an acyclic forest: node `i` points at an earlier node or outside.
fn forest_strategy() -> impl Strategy<Value = Vec<ProcessNode>> {
    (1usize..40).prop_flat_map(|n| {
        prop::collection::vec(any::<prop::sample::Index>(), n).prop_map(|choices| {
            choices
                .iter()
                .enumerate()
                .map(|(i, choice)| {
                    let pid = BASE_PID + i as u32;
                    // Index over i + 1 slots: slot 0 is "outside", slot k is node k - 1.
                    let slot = choice.index(i + 1);
                    let ppid = if slot == 0 { OUTSIDE_PID } else { BASE_PID + slot as u32 - 1 };
                    node(pid, ppid)
                })
                .collect()
        })
    })
}

/// Strategy for arbitrary parent links among a small pid range, cycles included.
fn tangled_strategy() -> impl Strategy<Value = Vec<ProcessNode>> {
    prop::collection::btree_map(0u32..30, 0u32..35, 1..30).prop_map(|links| {
        links
            .into_iter()
            .map(|(pid, ppid)| node(BASE_PID + pid, BASE_PID + ppid))
            .collect()
    })
}

proptest! {
    #[test]
    fn groups_partition_the_input(nodes in tangled_strategy()) {
        let groups = ProcessGroupAnalyzer::group(&nodes);

        let mut seen = BTreeSet::new();
        for group in &groups {
            prop_assert!(!group.is_empty());
            for pid in group.pids() {
                prop_assert!(seen.insert(pid), "pid {} in two groups", pid);
            }
        }
        let input: BTreeSet<u32> = nodes.iter().map(|n| n.pid).collect();
        prop_assert_eq!(seen, input);
    }

    #[test]
    fn forest_has_one_group_per_root(nodes in forest_strategy()) {
        let groups = ProcessGroupAnalyzer::group(&nodes);
        let roots: BTreeSet<u32> = nodes
            .iter()
            .filter(|n| n.ppid == Some(OUTSIDE_PID))
            .map(|n| n.pid)
            .collect();

        prop_assert_eq!(groups.len(), roots.len());
        for group in &groups {
            prop_assert!(roots.contains(&group.root().pid));
            let members: BTreeSet<u32> = group.pids().into_iter().collect();
            for member in &group.members()[1..] {
                let parent = member.ppid.unwrap_or(OUTSIDE_PID);
                prop_assert!(members.contains(&parent));
            }
        }
    }

    #[test]
    fn single_tree_is_one_group(depth in 1u32..20) {
        let mut nodes = vec![node(BASE_PID, OUTSIDE_PID)];
        for i in 1..depth {
            nodes.push(node(BASE_PID + i, BASE_PID + i - 1));
        }
        let groups = ProcessGroupAnalyzer::group(&nodes);
        prop_assert_eq!(groups.len(), 1);
        prop_assert_eq!(groups[0].root().pid, BASE_PID);
        prop_assert_eq!(groups[0].len(), depth as usize);
    }

    #[test]
    fn disjoint_trees_are_two_groups(left in 1u32..10, right in 1u32..10) {
        let mut nodes = vec![node(BASE_PID, OUTSIDE_PID), node(2 * BASE_PID, OUTSIDE_PID)];
        for i in 1..left {
            nodes.push(node(BASE_PID + i, BASE_PID));
        }
        for i in 1..right {
            nodes.push(node(2 * BASE_PID + i, 2 * BASE_PID));
        }
        let groups = ProcessGroupAnalyzer::group(&nodes);
        prop_assert_eq!(groups.len(), 2);
        prop_assert_eq!(groups[0].len(), left as usize);
        prop_assert_eq!(groups[1].len(), right as usize);
    }
}

#[test]
fn test_subtree_excludes_siblings() {
    let nodes = vec![
        node(BASE_PID, OUTSIDE_PID),
        node(BASE_PID + 1, BASE_PID),
        node(BASE_PID + 2, BASE_PID + 1),
        node(BASE_PID + 3, BASE_PID),
    ];
    let pids: BTreeSet<u32> = ProcessGroupAnalyzer::subtree(BASE_PID + 1, &nodes)
        .iter()
        .map(|n| n.pid)
        .collect();
    assert_eq!(pids, BTreeSet::from([BASE_PID + 1, BASE_PID + 2]));
}
