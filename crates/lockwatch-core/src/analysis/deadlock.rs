//! Deadlock detector: cycle search over the waits-for graph and
//! deterministic victim selection.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::storage::model::{
    BlockingEdge, DeadlockEvent, DeadlockStatus, LockSnapshot,
};

// ============================================================
// Cycle detection
// ============================================================

/// Traversal state per session node.
#[derive(Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Unvisited,
    InProgress,
    Done,
}

/// A cycle in the waits-for graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    /// Sessions in traversal order, starting at the smallest id.
    pub order: Vec<i32>,
    /// Sorted session ids; the cycle's stable identity across passes.
    pub key: Vec<i32>,
}

/// Finds every distinct cycle in the waits-for graph.
///
/// Depth-first traversal with an explicit stack; reaching a node that is
/// already in progress on the current path closes the path segment from
/// that node onward into a cycle. Adjacency and start order are sorted so
/// the result is reproducible for any input ordering.
pub fn detect_cycles(edges: &[BlockingEdge]) -> Vec<Cycle> {
    let mut adjacency: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
    for edge in edges {
        adjacency
            .entry(edge.waiter_session_id)
            .or_default()
            .push(edge.holder_session_id);
    }
    for holders in adjacency.values_mut() {
        holders.sort_unstable();
        holders.dedup();
    }

    let nodes: Vec<i32> = adjacency.keys().copied().collect();
    let mut states: HashMap<i32, NodeState> = HashMap::new();
    let mut seen_keys: BTreeSet<Vec<i32>> = BTreeSet::new();
    let mut cycles: Vec<Cycle> = Vec::new();

    for &start in &nodes {
        if states.get(&start).copied().unwrap_or(NodeState::Unvisited) != NodeState::Unvisited {
            continue;
        }

        // (node, index of next neighbor to try)
        let mut stack: Vec<(i32, usize)> = vec![(start, 0)];
        let mut path: Vec<i32> = vec![start];
        states.insert(start, NodeState::InProgress);

        while let Some(top) = stack.last_mut() {
            let node = top.0;
            let next = top.1;
            top.1 += 1;

            let neighbors = adjacency.get(&node).map(Vec::as_slice).unwrap_or(&[]);
            if next < neighbors.len() {
                let child = neighbors[next];

                match states.get(&child).copied().unwrap_or(NodeState::Unvisited) {
                    NodeState::Unvisited => {
                        states.insert(child, NodeState::InProgress);
                        stack.push((child, 0));
                        path.push(child);
                    }
                    NodeState::InProgress => {
                        // The path segment from `child` onward is a cycle.
                        let pos = path
                            .iter()
                            .position(|&n| n == child)
                            .expect("in-progress node is on the current path");
                        let segment = &path[pos..];
                        let mut key: Vec<i32> = segment.to_vec();
                        key.sort_unstable();
                        if seen_keys.insert(key.clone()) {
                            cycles.push(Cycle {
                                order: rotate_to_smallest(segment),
                                key,
                            });
                        }
                    }
                    NodeState::Done => {}
                }
            } else {
                states.insert(node, NodeState::Done);
                stack.pop();
                path.pop();
            }
        }
    }

    cycles
}

/// Rotates the cycle order so it starts at the smallest session id.
fn rotate_to_smallest(segment: &[i32]) -> Vec<i32> {
    let min_pos = segment
        .iter()
        .enumerate()
        .min_by_key(|&(_, &id)| id)
        .map(|(pos, _)| pos)
        .unwrap_or(0);
    let mut order = Vec::with_capacity(segment.len());
    order.extend_from_slice(&segment[min_pos..]);
    order.extend_from_slice(&segment[..min_pos]);
    order
}

// ============================================================
// Victim selection
// ============================================================

/// Chooses the session to recommend as the deadlock victim.
///
/// Policy: fewest granted locks first (cheapest to roll back), then the
/// most recently started transaction, then the lowest session id — the
/// final tie-break guarantees a fully symmetric cycle still resolves the
/// same way on every run.
pub fn select_victim(cycle: &[i32], snapshot: &LockSnapshot) -> i32 {
    let held = |session_id: i32| -> usize {
        snapshot
            .locks
            .iter()
            .filter(|l| l.granted && l.session_id == session_id)
            .count()
    };
    let xact_start = |session_id: i32| -> i64 {
        snapshot
            .session(session_id)
            .map(|s| s.xact_start)
            .unwrap_or(0)
    };

    cycle
        .iter()
        .copied()
        .min_by(|&a, &b| {
            held(a)
                .cmp(&held(b))
                .then(xact_start(b).cmp(&xact_start(a)))
                .then(a.cmp(&b))
        })
        .expect("cycle is never empty")
}

// ============================================================
// Event construction & cross-pass reconciliation
// ============================================================

/// Builds a `DeadlockEvent` for a freshly observed cycle.
pub fn build_event(cycle: &Cycle, snapshot: &LockSnapshot, edges: &[BlockingEdge]) -> DeadlockEvent {
    // Collect the edges along the cycle, in traversal order.
    let mut cycle_edges = Vec::with_capacity(cycle.order.len());
    for (i, &waiter) in cycle.order.iter().enumerate() {
        let holder = cycle.order[(i + 1) % cycle.order.len()];
        if let Some(edge) = edges
            .iter()
            .find(|e| e.waiter_session_id == waiter && e.holder_session_id == holder)
        {
            cycle_edges.push(edge.clone());
        }
    }

    DeadlockEvent {
        tenant_hash: snapshot.tenant_hash,
        session_ids: cycle.key.clone(),
        edges: cycle_edges,
        detected_at: snapshot.timestamp,
        victim_session_id: select_victim(&cycle.order, snapshot),
        status: DeadlockStatus::Detected,
        resolution: None,
    }
}

/// Splits the current pass's cycles against the set of still-open events.
///
/// Returns (new cycles to record, open cycle keys no longer observed —
/// their events resolve as inferred). Both sides tolerate the other being
/// empty; the first pass has no open events.
pub fn reconcile<'a>(
    current: &'a [Cycle],
    open_keys: &[Vec<i32>],
) -> (Vec<&'a Cycle>, Vec<Vec<i32>>) {
    let open: BTreeSet<&[i32]> = open_keys.iter().map(Vec::as_slice).collect();
    let now_present: BTreeSet<&[i32]> = current.iter().map(|c| c.key.as_slice()).collect();

    let fresh = current
        .iter()
        .filter(|c| !open.contains(c.key.as_slice()))
        .collect();
    let gone = open_keys
        .iter()
        .filter(|k| !now_present.contains(k.as_slice()))
        .cloned()
        .collect();
    (fresh, gone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::collector::{MockLockSource, Sampler};
    use crate::analysis::resolver::resolve_blocking;
    use crate::storage::interner::StringInterner;
    use crate::storage::model::LockMode;
    use crate::tenant::TenantScope;

    const NOW: i64 = 1_700_000_000;

    fn edge(waiter: i32, holder: i32) -> BlockingEdge {
        BlockingEdge {
            waiter_session_id: waiter,
            holder_session_id: holder,
            lock_type_hash: 1,
            target_hash: 2,
            requested_mode: LockMode::Share,
            held_mode: LockMode::RowExclusive,
        }
    }

    #[test]
    fn acyclic_graph_has_no_cycles() {
        // Chain: 1 waits on 2 waits on 3; plus fan-out from 2.
        let edges = vec![edge(1, 2), edge(2, 3), edge(4, 2)];
        assert!(detect_cycles(&edges).is_empty());
    }

    #[test]
    fn two_session_cycle_is_found_once() {
        let edges = vec![edge(1, 2), edge(2, 1)];
        let cycles = detect_cycles(&edges);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].key, vec![1, 2]);
        assert_eq!(cycles[0].order, vec![1, 2]);
    }

    #[test]
    fn three_session_cycle_with_tail() {
        let edges = vec![edge(5, 7), edge(7, 9), edge(9, 5), edge(3, 5)];
        let cycles = detect_cycles(&edges);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].key, vec![5, 7, 9]);
    }

    #[test]
    fn independent_cycles_are_all_reported() {
        let edges = vec![edge(1, 2), edge(2, 1), edge(10, 20), edge(20, 10)];
        let cycles = detect_cycles(&edges);
        assert_eq!(cycles.len(), 2);
        let keys: Vec<_> = cycles.iter().map(|c| c.key.clone()).collect();
        assert!(keys.contains(&vec![1, 2]));
        assert!(keys.contains(&vec![10, 20]));
    }

    #[test]
    fn detection_is_order_independent() {
        let forward = vec![edge(1, 2), edge(2, 3), edge(3, 1)];
        let mut reversed = forward.clone();
        reversed.reverse();
        assert_eq!(detect_cycles(&forward), detect_cycles(&reversed));
    }

    #[test]
    fn deadlock_pair_scenario_end_to_end() {
        let mut source = MockLockSource::deadlock_pair(NOW);
        let mut sampler = Sampler::new();
        let mut interner = StringInterner::new();
        let snapshot = sampler
            .collect(
                &mut source,
                &TenantScope::SystemWide,
                &FixedClock(NOW),
                &mut interner,
            )
            .unwrap();

        let edges = resolve_blocking(&snapshot.locks);
        let cycles = detect_cycles(&edges);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].key, vec![301, 302]);

        let event = build_event(&cycles[0], &snapshot, &edges);
        assert_eq!(event.session_ids, vec![301, 302]);
        assert_eq!(event.edges.len(), 2);
        assert_eq!(event.status, DeadlockStatus::Detected);
        // Both hold one lock; 302's transaction started later.
        assert_eq!(event.victim_session_id, 302);
    }

    #[test]
    fn fully_symmetric_cycle_picks_lowest_session_id() {
        let mut source = MockLockSource::deadlock_pair(NOW);
        let mut sampler = Sampler::new();
        let mut interner = StringInterner::new();
        let mut snapshot = sampler
            .collect(
                &mut source,
                &TenantScope::SystemWide,
                &FixedClock(NOW),
                &mut interner,
            )
            .unwrap();
        // Equalize transaction starts to exhaust the tie-break ladder.
        for session in &mut snapshot.sessions {
            session.xact_start = NOW - 60;
        }

        let edges = resolve_blocking(&snapshot.locks);
        let cycles = detect_cycles(&edges);
        assert_eq!(select_victim(&cycles[0].order, &snapshot), 301);
    }

    #[test]
    fn reconcile_splits_new_and_gone() {
        let current = vec![
            Cycle {
                order: vec![1, 2],
                key: vec![1, 2],
            },
            Cycle {
                order: vec![5, 9],
                key: vec![5, 9],
            },
        ];
        let open = vec![vec![1, 2], vec![3, 4]];

        let (fresh, gone) = reconcile(&current, &open);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].key, vec![5, 9]);
        assert_eq!(gone, vec![vec![3, 4]]);
    }

    #[test]
    fn reconcile_tolerates_first_pass() {
        let current = vec![Cycle {
            order: vec![1, 2],
            key: vec![1, 2],
        }];
        let (fresh, gone) = reconcile(&current, &[]);
        assert_eq!(fresh.len(), 1);
        assert!(gone.is_empty());
    }
}
