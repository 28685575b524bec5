//! Dependency cycle detection.
//!
//! Finding out *whether* there is a cycle is done by eliminating nodes one at
//! a time: node i is removed by connecting each of its predecessors directly
//! to each of its successors.  A cycle shows up as a node that reaches itself.
//! Once such a node is known, a breadth-first search over the original edges
//! recovers the shortest cycle through it.

use crate::error::{Error, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::fmt::Display;
use std::hash::Hash;

type EdgeList = Vec<Vec<usize>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle<N> {
    /// Nodes along the cycle; the last one points back at the first.
    pub path: Vec<N>,
}

pub struct CycleDetector<N> {
    ids: FxHashMap<N, usize>,
    nodes: Vec<N>,
    /// Outgoing edges per node, in insertion order.
    edges: EdgeList,
}

impl<N> Default for CycleDetector<N> {
    fn default() -> Self {
        CycleDetector {
            ids: FxHashMap::default(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }
}

impl<N: Clone + Eq + Hash + Display> CycleDetector<N> {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_node(&mut self, node: N) -> usize {
        if let Some(&id) = self.ids.get(&node) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(node.clone());
        self.edges.push(Vec::new());
        self.ids.insert(node, id);
        id
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Record that `from` depends on `to`.  Nodes are created on first use
    /// and repeated edges are ignored.
    pub fn add_edge(&mut self, from: N, to: N) {
        let from = self.add_node(from);
        let to = self.add_node(to);
        if !self.edges[from].contains(&to) {
            self.edges[from].push(to);
        }
    }

    /// Returns the shortest cycle through the first node found on a cycle,
    /// or None if the graph is acyclic.
    pub fn find_cycle(&self) -> Result<Option<Cycle<N>>> {
        let node = match eliminate(&self.edges) {
            None => return Ok(None),
            Some(node) => node,
        };

        match shortest_cycle_through(&self.edges, node) {
            Some(ids) => Ok(Some(Cycle {
                path: ids.into_iter().map(|id| self.nodes[id].clone()).collect(),
            })),
            None => Err(Error::CycleReconstruction {
                node: self.nodes[node].to_string(),
            }),
        }
    }
}

/// Node elimination.  Returns the first node that ends up reaching itself.
fn eliminate(edges: &EdgeList) -> Option<usize> {
    let mut reach: Vec<FxHashSet<usize>> = edges
        .iter()
        .map(|tos| tos.iter().copied().collect())
        .collect();
    let mut back_reach: Vec<FxHashSet<usize>> = vec![FxHashSet::default(); edges.len()];
    for (from, tos) in edges.iter().enumerate() {
        for &to in tos {
            back_reach[to].insert(from);
        }
    }

    for i in 0..reach.len() {
        if reach[i].contains(&i) {
            return Some(i);
        }

        let tos: Vec<usize> = reach[i].iter().copied().collect();
        let froms: Vec<usize> = back_reach[i].iter().copied().collect();

        for &to in &tos {
            for &from in &froms {
                reach[from].insert(to);
                back_reach[to].insert(from);
            }
        }

        for &from in &froms {
            reach[from].remove(&i);
        }
        for &to in &tos {
            back_reach[to].remove(&i);
        }
        reach[i].clear();
        back_reach[i].clear();
    }

    None
}

/// Breadth-first search from `node`'s successors back to `node`.
fn shortest_cycle_through(edges: &EdgeList, node: usize) -> Option<Vec<usize>> {
    let mut pred: Vec<Option<usize>> = vec![None; edges.len()];
    let mut queue: VecDeque<usize> = VecDeque::new();
    for &first in &edges[node] {
        if pred[first].is_none() {
            pred[first] = Some(node);
            queue.push_back(first);
        }
    }

    let mut found = false;
    while let Some(current) = queue.pop_front() {
        if current == node {
            found = true;
            break;
        }
        for &next in &edges[current] {
            if pred[next].is_some() {
                continue;
            }
            pred[next] = Some(current);
            queue.push_back(next);
        }
    }
    if !found {
        return None;
    }

    let mut path = VecDeque::new();
    let mut dest = node;
    loop {
        dest = pred[dest]?;
        path.push_front(dest);
        if dest == node {
            break;
        }
    }
    Some(path.into())
}
