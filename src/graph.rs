//! The grounded-predicate dependency graph and its cycle analysis.
//!
//! Every accepted rule contributes edges from each grounded head to the
//! grounded body atoms that entail it; body-free rules point at a
//! synthetic axiom node instead. After mining, Tarjan extracts the
//! strongly connected components that contain at least one edge (two or
//! more nodes, or a single node with a self-loop — the inclusion rule
//! is deliberate and must not change), and a minimum-feedback-vertex-set
//! heuristic picks the records that must stay in the compressed KB to
//! break the cyclic derivations.
//!
//! Nodes live in an arena and are addressed by dense indices; the
//! algorithms run on plain adjacency lists.

use std::collections::{HashMap, HashSet};

use crate::atom::{Predicate, AXIOM_SYMBOL};

/// Directed graph over grounded predicates, `head → body` edges.
pub struct DependencyGraph {
    nodes: Vec<Predicate>,
    node_ids: HashMap<Predicate, usize>,
    successors: Vec<HashSet<usize>>,
    axiom: usize,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        let mut graph = DependencyGraph {
            nodes: Vec::new(),
            node_ids: HashMap::new(),
            successors: Vec::new(),
            axiom: 0,
        };
        graph.axiom = graph.intern(Predicate::empty(AXIOM_SYMBOL, 1));
        graph
    }

    fn intern(&mut self, predicate: Predicate) -> usize {
        if let Some(&id) = self.node_ids.get(&predicate) {
            return id;
        }
        let id = self.nodes.len();
        self.node_ids.insert(predicate.clone(), id);
        self.nodes.push(predicate);
        self.successors.push(HashSet::new());
        id
    }

    /// The synthetic node absorbing edges of body-free rules.
    #[inline]
    pub fn axiom(&self) -> usize {
        self.axiom
    }

    #[inline]
    pub fn node(&self, id: usize) -> &Predicate {
        &self.nodes[id]
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.successors.iter().map(HashSet::len).sum()
    }

    /// Record one grounding: the head depends on its body atoms, or on
    /// the axiom node when the body is empty.
    pub fn add_grounding(&mut self, head: Predicate, bodies: &[Predicate]) {
        let head_id = self.intern(head);
        if bodies.is_empty() {
            let axiom = self.axiom;
            self.successors[head_id].insert(axiom);
        } else {
            for body in bodies {
                let body_id = self.intern(body.clone());
                self.successors[head_id].insert(body_id);
            }
        }
    }

    /// Adjacency lists with deterministically ordered successors.
    pub fn adjacency(&self) -> Vec<Vec<usize>> {
        self.successors
            .iter()
            .map(|set| {
                let mut succs: Vec<usize> = set.iter().copied().collect();
                succs.sort_unstable();
                succs
            })
            .collect()
    }
}

/// Tarjan's algorithm over an adjacency list.
///
/// Returns only the components that contain an edge: components of two
/// or more nodes, and single nodes with a self-loop. Runs with an
/// explicit work stack so derivation chains of any depth cannot
/// overflow the call stack.
pub fn strongly_connected_components(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;

    let n = adjacency.len();
    let mut indices = vec![UNVISITED; n];
    let mut low_links = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut result: Vec<Vec<usize>> = Vec::new();

    for root in 0..n {
        if indices[root] != UNVISITED {
            continue;
        }
        /* (node, next successor offset) */
        let mut work: Vec<(usize, usize)> = vec![(root, 0)];
        while let Some(&mut (node, ref mut child_offset)) = work.last_mut() {
            if *child_offset == 0 {
                indices[node] = next_index;
                low_links[node] = next_index;
                next_index += 1;
                on_stack[node] = true;
                stack.push(node);
            }
            if let Some(&neighbour) = adjacency[node].get(*child_offset) {
                *child_offset += 1;
                if indices[neighbour] == UNVISITED {
                    work.push((neighbour, 0));
                } else if on_stack[neighbour] {
                    low_links[node] = low_links[node].min(indices[neighbour]);
                }
                continue;
            }

            /* All successors handled: close the node */
            work.pop();
            if let Some(&(parent, _)) = work.last() {
                low_links[parent] = low_links[parent].min(low_links[node]);
            }
            if low_links[node] == indices[node] {
                let mut scc = Vec::new();
                loop {
                    let top = stack.pop().unwrap_or_else(|| unreachable!("scc root on stack"));
                    on_stack[top] = false;
                    scc.push(top);
                    if top == node {
                        break;
                    }
                }
                if scc.len() > 1 || adjacency[node].contains(&node) {
                    result.push(scc);
                }
            }
        }
    }
    result
}

/// Greedy minimum-feedback-vertex-set heuristic over one SCC.
///
/// Repeatedly removes the node with the largest `in-degree × out-degree`
/// product inside the induced subgraph, cascading away nodes whose
/// in- or out-degree drops to zero, until no edge remains.
pub fn minimum_feedback_vertex_set(adjacency: &[Vec<usize>], scc: &[usize]) -> Vec<usize> {
    let size = scc.len();
    let local_idx: HashMap<usize, usize> = scc
        .iter()
        .enumerate()
        .map(|(local, &node)| (node, local))
        .collect();

    /* Connection matrix with degree sums in the extra row/column */
    let mut matrix = vec![vec![0i32; size + 1]; size + 1];
    for (local, &node) in scc.iter().enumerate() {
        for successor in &adjacency[node] {
            if let Some(&succ_local) = local_idx.get(successor) {
                matrix[local][succ_local] = 1;
                matrix[local][size] += 1;
                matrix[size][succ_local] += 1;
            }
        }
    }

    let mut remove_node = |matrix: &mut Vec<Vec<i32>>, idx: usize| -> i32 {
        let removed = matrix[idx][size] + matrix[size][idx] - matrix[idx][idx];
        for i in 0..size {
            if matrix[idx][i] == 1 {
                matrix[idx][i] = 0;
                matrix[size][i] -= 1;
            }
            if matrix[i][idx] == 1 {
                matrix[i][idx] = 0;
                matrix[i][size] -= 1;
            }
        }
        matrix[idx][size] = 0;
        matrix[size][idx] = 0;
        removed
    };

    let mut edges: i32 = (0..size).map(|i| matrix[size][i]).sum();
    let mut cover = Vec::new();
    while edges > 0 {
        /* The node touching the most cycles */
        let mut max_score = 0;
        let mut max_idx = None;
        for i in 0..size {
            let score = matrix[i][size] * matrix[size][i];
            if score > max_score {
                max_score = score;
                max_idx = Some(i);
            }
        }
        let Some(idx) = max_idx else {
            break;
        };
        cover.push(scc[idx]);
        edges -= remove_node(&mut matrix, idx);

        /* Nodes that can no longer lie on a cycle drop out */
        let mut updated = true;
        while updated {
            updated = false;
            for i in 0..size {
                if (matrix[i][size] == 0) != (matrix[size][i] == 0) {
                    edges -= remove_node(&mut matrix, i);
                    updated = true;
                }
            }
        }
    }
    cover
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Predicate;

    fn assert_scc_sets(mut actual: Vec<Vec<usize>>, mut expected: Vec<Vec<usize>>) {
        for scc in &mut actual {
            scc.sort_unstable();
        }
        for scc in &mut expected {
            scc.sort_unstable();
        }
        actual.sort();
        expected.sort();
        assert_eq!(expected, actual);
    }

    #[test]
    fn tarjan_finds_cycles_only() {
        /* 0 -> 1 -> 2 -> 0 forms a cycle; 3 hangs off it; 4 is isolated */
        let adjacency = vec![vec![1], vec![2], vec![0, 3], vec![], vec![]];
        let sccs = strongly_connected_components(&adjacency);
        assert_scc_sets(sccs, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn tarjan_keeps_self_looping_singletons() {
        let adjacency = vec![vec![0], vec![2], vec![]];
        let sccs = strongly_connected_components(&adjacency);
        assert_scc_sets(sccs, vec![vec![0]]);
    }

    #[test]
    fn tarjan_separates_independent_cycles() {
        let adjacency = vec![vec![1], vec![0], vec![3], vec![2], vec![0, 2]];
        let sccs = strongly_connected_components(&adjacency);
        assert_scc_sets(sccs, vec![vec![0, 1], vec![2, 3]]);
    }

    #[test]
    fn tarjan_handles_long_chains_iteratively() {
        /* A chain of 100_000 nodes closing into one big cycle */
        let n = 100_000;
        let adjacency: Vec<Vec<usize>> = (0..n).map(|i| vec![(i + 1) % n]).collect();
        let sccs = strongly_connected_components(&adjacency);
        assert_eq!(1, sccs.len());
        assert_eq!(n, sccs[0].len());
    }

    #[test]
    fn fvs_breaks_a_simple_cycle() {
        let adjacency = vec![vec![1], vec![2], vec![0]];
        let scc = vec![0, 1, 2];
        let cover = minimum_feedback_vertex_set(&adjacency, &scc);
        assert_eq!(1, cover.len());
    }

    #[test]
    fn fvs_covers_interlocking_cycles() {
        /* 0 <-> 1 and 1 <-> 2: node 1 breaks both */
        let adjacency = vec![vec![1], vec![0, 2], vec![1]];
        let cover = minimum_feedback_vertex_set(&adjacency, &[0, 1, 2]);
        assert_eq!(vec![1], cover);
    }

    #[test]
    fn dependency_graph_interns_grounded_predicates() {
        let mut graph = DependencyGraph::new();
        let head = Predicate::grounded(0, &[1, 2]);
        let body = Predicate::grounded(1, &[2, 1]);
        graph.add_grounding(head.clone(), &[body.clone()]);
        graph.add_grounding(head.clone(), &[body.clone()]);
        /* axiom + head + body */
        assert_eq!(3, graph.num_nodes());
        assert_eq!(1, graph.num_edges());

        /* a body-free grounding points at the axiom */
        graph.add_grounding(Predicate::grounded(2, &[5]), &[]);
        assert_eq!(4, graph.num_nodes());
        assert_eq!(2, graph.num_edges());
    }

    #[test]
    fn inverse_pair_dependencies_need_one_fvs_record_per_cycle() {
        let mut graph = DependencyGraph::new();
        for k in 0..3 {
            let p = Predicate::grounded(0, &[2 * k + 1, 2 * k + 2]);
            let q = Predicate::grounded(1, &[2 * k + 2, 2 * k + 1]);
            graph.add_grounding(p.clone(), std::slice::from_ref(&q));
            graph.add_grounding(q, &[p]);
        }
        let adjacency = graph.adjacency();
        let sccs = strongly_connected_components(&adjacency);
        assert_eq!(3, sccs.len());
        for scc in &sccs {
            assert_eq!(2, scc.len());
            let cover = minimum_feedback_vertex_set(&adjacency, scc);
            assert_eq!(1, cover.len());
        }
    }
}
