//! Hash-indexed DAG over decoded changes.
//!
//! The [`ChangeDag`] indexes a document's log by content hash for frontier
//! computation, bounded backward reachability, and deterministic topological
//! iteration. Changes can be inserted in any order; parent/child links are
//! resolved as changes arrive, and duplicate hashes are silently skipped
//! (inherent to content-addressed logs — a union merge can present both
//! sides of a fork).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use super::Change;

/// A node in the change DAG: the change plus resolved child links.
#[derive(Debug, Clone)]
pub struct DagNode {
    pub change: Change,
    /// Hashes of changes that list this one as a parent.
    pub children: Vec<String>,
}

/// An in-memory DAG of changes, keyed by change hash.
#[derive(Debug, Clone, Default)]
pub struct ChangeDag {
    nodes: HashMap<String, DagNode>,
}

impl ChangeDag {
    /// Create an empty DAG.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a DAG from a slice of decoded changes.
    #[must_use]
    pub fn from_changes(changes: &[Change]) -> Self {
        let mut dag = Self {
            nodes: HashMap::with_capacity(changes.len()),
        };
        for change in changes {
            dag.insert(change.clone());
        }
        dag
    }

    /// Insert a change. Duplicates (same hash) are skipped.
    pub fn insert(&mut self, change: Change) {
        let hash = change.hash.clone();
        if self.nodes.contains_key(&hash) {
            return;
        }

        let deps = change.deps.clone();
        self.nodes.insert(
            hash.clone(),
            DagNode {
                change,
                children: Vec::new(),
            },
        );

        // Link already-present parents to this child.
        for dep in &deps {
            if let Some(parent) = self.nodes.get_mut(dep) {
                parent.children.push(hash.clone());
            }
        }

        // Out-of-order insertion: changes inserted earlier may list this
        // hash as a parent; link them as children now.
        let late_children: Vec<String> = self
            .nodes
            .iter()
            .filter(|(k, node)| *k != &hash && node.change.deps.contains(&hash))
            .map(|(k, _)| k.clone())
            .collect();
        if let Some(node) = self.nodes.get_mut(&hash) {
            for child in late_children {
                if !node.children.contains(&child) {
                    node.children.push(child);
                }
            }
        }
    }

    /// Number of changes in the DAG.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the DAG holds no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by hash.
    #[must_use]
    pub fn get(&self, hash: &str) -> Option<&DagNode> {
        self.nodes.get(hash)
    }

    /// Look up a change by hash.
    #[must_use]
    pub fn get_change(&self, hash: &str) -> Option<&Change> {
        self.nodes.get(hash).map(|n| &n.change)
    }

    /// Returns `true` if a change with the given hash is present.
    #[must_use]
    pub fn contains(&self, hash: &str) -> bool {
        self.nodes.contains_key(hash)
    }

    /// The causal frontier: hashes with no children, sorted.
    ///
    /// These are the document's current heads — changes no other change
    /// has yet referenced as a parent.
    #[must_use]
    pub fn frontier(&self) -> Vec<String> {
        let mut heads: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.children.is_empty())
            .map(|(hash, _)| hash.clone())
            .collect();
        heads.sort();
        heads
    }

    /// All transitive ancestors of `hash` (excluding `hash` itself).
    #[must_use]
    pub fn ancestors(&self, hash: &str) -> HashSet<String> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        if let Some(node) = self.nodes.get(hash) {
            for dep in &node.change.deps {
                if visited.insert(dep.clone()) {
                    queue.push_back(dep.clone());
                }
            }
        }
        while let Some(current) = queue.pop_front() {
            if let Some(node) = self.nodes.get(&current) {
                for dep in &node.change.deps {
                    if visited.insert(dep.clone()) {
                        queue.push_back(dep.clone());
                    }
                }
            }
        }
        visited
    }

    /// Every change reachable from the given heads, heads included.
    ///
    /// Hashes absent from the DAG are ignored.
    #[must_use]
    pub fn reachable(&self, heads: &[String]) -> HashSet<String> {
        self.reachable_with_stop(heads, &HashSet::new())
    }

    /// Backward reachability bounded by a stop set.
    ///
    /// Walks parent links from `starts`; a hash in `stop` is neither
    /// emitted nor expanded, even when it is one of the start hashes.
    /// Cost is proportional to the changes actually visited, not the
    /// full history.
    #[must_use]
    pub fn reachable_with_stop(
        &self,
        starts: &[String],
        stop: &HashSet<String>,
    ) -> HashSet<String> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        for start in starts {
            if !stop.contains(start) && self.nodes.contains_key(start) && visited.insert(start.clone())
            {
                queue.push_back(start.clone());
            }
        }
        while let Some(current) = queue.pop_front() {
            if let Some(node) = self.nodes.get(&current) {
                for dep in &node.change.deps {
                    if stop.contains(dep) || !self.nodes.contains_key(dep) {
                        continue;
                    }
                    if visited.insert(dep.clone()) {
                        queue.push_back(dep.clone());
                    }
                }
            }
        }
        visited
    }

    /// Deterministic topological order over the whole DAG.
    ///
    /// Kahn's algorithm; when several changes are ready at once they are
    /// emitted in `(time, actor, hash)` order, so every replica derives
    /// the same sequence from the same set of changes.
    #[must_use]
    pub fn topo_order(&self) -> Vec<&Change> {
        self.topo_order_of(&self.nodes.keys().cloned().collect::<HashSet<_>>())
    }

    /// Deterministic topological order restricted to a subset of hashes.
    ///
    /// Parents outside `subset` are treated as already applied.
    #[must_use]
    pub fn topo_order_of(&self, subset: &HashSet<String>) -> Vec<&Change> {
        let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(subset.len());
        for hash in subset {
            let Some(node) = self.nodes.get(hash) else {
                continue;
            };
            let deps_in = node
                .change
                .deps
                .iter()
                .filter(|d| subset.contains(*d) && self.nodes.contains_key(*d))
                .count();
            in_degree.insert(hash.as_str(), deps_in);
        }

        // Ready set keyed by (time, actor, hash); min-heap via Reverse.
        let mut ready: BinaryHeap<Reverse<(i64, String, String)>> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .filter_map(|(hash, _)| self.nodes.get(*hash))
            .map(|node| {
                Reverse((
                    node.change.time,
                    node.change.actor.clone(),
                    node.change.hash.clone(),
                ))
            })
            .collect();

        let mut result = Vec::with_capacity(in_degree.len());
        while let Some(Reverse((_, _, hash))) = ready.pop() {
            let Some(node) = self.nodes.get(&hash) else {
                continue;
            };
            result.push(&node.change);
            for child in &node.children {
                if let Some(deg) = in_degree.get_mut(child.as_str()) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        if let Some(child_node) = self.nodes.get(child) {
                            ready.push(Reverse((
                                child_node.change.time,
                                child_node.change.actor.clone(),
                                child_node.change.hash.clone(),
                            )));
                        }
                    }
                }
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{compute_change_hash, Op};

    // -------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------

    fn make_change(time: i64, actor: &str, deps: &[&str], insert: &str) -> Change {
        let deps: Vec<String> = deps.iter().map(|s| (*s).to_string()).collect();
        let ops = vec![Op::Splice {
            prop: "content".into(),
            index: 0,
            delete: 0,
            insert: insert.into(),
        }];
        let hash =
            compute_change_hash(time, actor, None, &deps, None, &ops).expect("hash");
        Change {
            hash,
            actor: actor.into(),
            author: None,
            deps,
            time,
            message: None,
            ops,
        }
    }

    #[test]
    fn empty_dag() {
        let dag = ChangeDag::new();
        assert_eq!(dag.len(), 0);
        assert!(dag.is_empty());
        assert!(dag.frontier().is_empty());
        assert!(dag.topo_order().is_empty());
    }

    #[test]
    fn linear_chain_frontier_and_order() {
        let root = make_change(1_000, "a", &[], "r");
        let child = make_change(2_000, "a", &[&root.hash], "c");
        let grand = make_change(3_000, "a", &[&child.hash], "g");
        let dag = ChangeDag::from_changes(&[root.clone(), child.clone(), grand.clone()]);

        assert_eq!(dag.len(), 3);
        assert_eq!(dag.frontier(), vec![grand.hash.clone()]);

        let order: Vec<&str> = dag.topo_order().iter().map(|c| c.hash.as_str()).collect();
        assert_eq!(order, vec![&root.hash, &child.hash, &grand.hash]);
    }

    #[test]
    fn fork_has_two_heads() {
        let root = make_change(1_000, "a", &[], "r");
        let left = make_change(2_000, "a", &[&root.hash], "l");
        let right = make_change(2_100, "b", &[&root.hash], "r2");
        let dag = ChangeDag::from_changes(&[root.clone(), left.clone(), right.clone()]);

        let mut expected = vec![left.hash.clone(), right.hash.clone()];
        expected.sort();
        assert_eq!(dag.frontier(), expected);
    }

    #[test]
    fn duplicate_insert_is_noop() {
        let root = make_change(1_000, "a", &[], "r");
        let mut dag = ChangeDag::new();
        dag.insert(root.clone());
        dag.insert(root);
        assert_eq!(dag.len(), 1);
    }

    #[test]
    fn out_of_order_insertion_links_parents() {
        let root = make_change(1_000, "a", &[], "r");
        let child = make_change(2_000, "a", &[&root.hash], "c");
        let dag = ChangeDag::from_changes(&[child.clone(), root.clone()]);

        let root_node = dag.get(&root.hash).expect("root");
        assert!(root_node.children.contains(&child.hash));
        assert_eq!(dag.frontier(), vec![child.hash]);
    }

    #[test]
    fn ancestors_of_merge_point() {
        let root = make_change(1_000, "a", &[], "r");
        let left = make_change(2_000, "a", &[&root.hash], "l");
        let right = make_change(2_100, "b", &[&root.hash], "r2");
        let merge = make_change(3_000, "a", &[&left.hash, &right.hash], "m");
        let dag = ChangeDag::from_changes(&[
            root.clone(),
            left.clone(),
            right.clone(),
            merge.clone(),
        ]);

        let anc = dag.ancestors(&merge.hash);
        assert_eq!(anc.len(), 3);
        assert!(anc.contains(&root.hash));
        assert!(anc.contains(&left.hash));
        assert!(anc.contains(&right.hash));
    }

    #[test]
    fn reachable_includes_heads() {
        let root = make_change(1_000, "a", &[], "r");
        let child = make_change(2_000, "a", &[&root.hash], "c");
        let dag = ChangeDag::from_changes(&[root.clone(), child.clone()]);

        let reach = dag.reachable(&[child.hash.clone()]);
        assert_eq!(reach.len(), 2);
        assert!(reach.contains(&root.hash));
        assert!(reach.contains(&child.hash));
    }

    #[test]
    fn stop_set_halts_traversal() {
        //  root → mid → tip
        let root = make_change(1_000, "a", &[], "r");
        let mid = make_change(2_000, "a", &[&root.hash], "m");
        let tip = make_change(3_000, "a", &[&mid.hash], "t");
        let dag = ChangeDag::from_changes(&[root.clone(), mid.clone(), tip.clone()]);

        let stop: HashSet<String> = [mid.hash.clone()].into_iter().collect();
        let reach = dag.reachable_with_stop(&[tip.hash.clone()], &stop);
        // mid is neither emitted nor expanded, so root is unreachable too.
        assert_eq!(reach.len(), 1);
        assert!(reach.contains(&tip.hash));
    }

    #[test]
    fn stop_set_applies_to_start_hashes() {
        let root = make_change(1_000, "a", &[], "r");
        let dag = ChangeDag::from_changes(&[root.clone()]);

        let stop: HashSet<String> = [root.hash.clone()].into_iter().collect();
        assert!(dag.reachable_with_stop(&[root.hash.clone()], &stop).is_empty());
    }

    #[test]
    fn topo_order_respects_causality_and_time() {
        let root = make_change(1_000, "a", &[], "r");
        let left = make_change(2_500, "a", &[&root.hash], "l");
        let right = make_change(2_000, "b", &[&root.hash], "r2");
        let merge = make_change(3_000, "a", &[&left.hash, &right.hash], "m");
        let dag = ChangeDag::from_changes(&[
            root.clone(),
            left.clone(),
            right.clone(),
            merge.clone(),
        ]);

        let order: Vec<&str> = dag.topo_order().iter().map(|c| c.hash.as_str()).collect();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], root.hash);
        // right is earlier by wall clock, so it comes before left.
        assert_eq!(order[1], right.hash);
        assert_eq!(order[2], left.hash);
        assert_eq!(order[3], merge.hash);
    }

    #[test]
    fn topo_order_of_subset_ignores_outside_parents() {
        let root = make_change(1_000, "a", &[], "r");
        let child = make_change(2_000, "a", &[&root.hash], "c");
        let grand = make_change(3_000, "a", &[&child.hash], "g");
        let dag = ChangeDag::from_changes(&[root.clone(), child.clone(), grand.clone()]);

        let subset: HashSet<String> =
            [child.hash.clone(), grand.hash.clone()].into_iter().collect();
        let order: Vec<&str> = dag
            .topo_order_of(&subset)
            .iter()
            .map(|c| c.hash.as_str())
            .collect();
        assert_eq!(order, vec![&child.hash, &grand.hash]);
    }

    #[test]
    fn topo_order_is_deterministic() {
        let root = make_change(1_000, "a", &[], "r");
        let left = make_change(2_000, "a", &[&root.hash], "l");
        let right = make_change(2_000, "b", &[&root.hash], "r2");
        let dag = ChangeDag::from_changes(&[root, left, right]);

        let one: Vec<String> = dag.topo_order().iter().map(|c| c.hash.clone()).collect();
        let two: Vec<String> = dag.topo_order().iter().map(|c| c.hash.clone()).collect();
        assert_eq!(one, two);
    }
}
