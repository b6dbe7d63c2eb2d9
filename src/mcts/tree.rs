//! The shared search tree: a grow-only node arena plus the current root
//! and a snapshot of the root game state.
//!
//! Structural mutations (allocating nodes, rerooting, resetting) take the
//! arena write lock; selection and backup walk the arena under the read
//! lock and touch only per-node atomics.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;
use rand::Rng;
use rand_distr::{Dirichlet, Distribution};

use crate::game::GameState;
use crate::mcts::node::{Node, NIL};

pub(crate) struct Arena<G: GameState> {
    pub nodes: Vec<Node<G::Action>>,
    pub root: usize,
    /// Game position the root node corresponds to. `None` for the empty
    /// tree that exists between games.
    pub root_state: Option<G>,
}

pub(crate) struct Tree<G: GameState> {
    arena: RwLock<Arena<G>>,
}

/// Per-edge view used for result assembly.
pub(crate) struct EdgeSnapshot<A> {
    pub action: A,
    pub visits: u32,
    pub q: f32,
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl<G: GameState> Tree<G> {
    pub fn new() -> Self {
        Tree {
            arena: RwLock::new(Arena {
                nodes: vec![Node::new()],
                root: 0,
                root_state: None,
            }),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Arena<G>> {
        read_lock(&self.arena)
    }

    /// Drops everything and recreates the empty-root state.
    pub fn clear(&self) {
        let mut arena = write_lock(&self.arena);
        arena.nodes = vec![Node::new()];
        arena.root = 0;
        arena.root_state = None;
    }

    /// Drops everything and recreates an unexpanded root for `state`.
    pub fn reset_to(&self, state: G) {
        let mut arena = write_lock(&self.arena);
        arena.nodes = vec![Node::new()];
        arena.root = 0;
        arena.root_state = Some(state);
    }

    pub fn root_matches(&self, state: &G) -> bool {
        let arena = read_lock(&self.arena);
        arena
            .root_state
            .as_ref()
            .map(|s| s.equals(state))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        let arena = read_lock(&self.arena);
        arena.root_state.is_none() && arena.nodes.len() == 1 && !arena.nodes[0].expanded()
    }

    /// Reroots at the child reached by `action`, discarding every sibling
    /// subtree. Returns `false` when the move is not tracked by the tree
    /// (unexpanded root, missing edge, unallocated child) — the caller must
    /// reset instead.
    pub fn advance(&self, action: G::Action) -> bool {
        let mut arena = write_lock(&self.arena);

        let Some(root_state) = arena.root_state.clone() else {
            return false;
        };
        let mut next_state = root_state;
        if next_state.forward(action).is_err() {
            return false;
        }

        let root = arena.root;
        let Some(edges) = arena.nodes[root].edges.get() else {
            return false;
        };
        let new_root = edges
            .iter()
            .find(|e| e.action == action)
            .map(|e| e.child.load(std::sync::atomic::Ordering::Relaxed));
        let Some(new_root) = new_root else {
            return false;
        };
        if new_root == NIL {
            return false;
        }

        // Compact the arena to the reachable subtree.
        let before = arena.nodes.len();
        let mut keep = Vec::new();
        let mut remap = vec![NIL; arena.nodes.len()];
        remap[new_root] = 0;
        keep.push(new_root);
        let mut head = 0;
        while head < keep.len() {
            let old_id = keep[head];
            head += 1;
            if let Some(edges) = arena.nodes[old_id].edges.get() {
                for edge in edges {
                    let child = edge.child.load(std::sync::atomic::Ordering::Relaxed);
                    if child != NIL && remap[child] == NIL {
                        remap[child] = keep.len();
                        keep.push(child);
                    }
                }
            }
        }
        let mut new_nodes = Vec::with_capacity(keep.len());
        for &old_id in &keep {
            let copy = arena.nodes[old_id].duplicate();
            if let Some(edges) = arena.nodes[old_id].edges.get() {
                let remapped = edges
                    .iter()
                    .map(|e| {
                        let child = e.child.load(std::sync::atomic::Ordering::Relaxed);
                        let new_child = if child == NIL { NIL } else { remap[child] };
                        e.duplicate_with_child(new_child)
                    })
                    .collect();
                let _ = copy.edges.set(remapped);
            }
            new_nodes.push(copy);
        }

        arena.nodes = new_nodes;
        arena.root = 0;
        arena.root_state = Some(next_state);
        debug!(
            "tree advance: kept {} of {} nodes after {:?}",
            arena.nodes.len(),
            before,
            action
        );
        true
    }

    /// Allocates the child of `(node, edge_idx)` if nobody has yet.
    pub fn alloc_child(&self, node: usize, edge_idx: usize) -> usize {
        let mut arena = write_lock(&self.arena);
        let existing = arena.nodes[node].edges.get().map(|edges| {
            edges[edge_idx]
                .child
                .load(std::sync::atomic::Ordering::Relaxed)
        });
        match existing {
            Some(NIL) => {
                let id = arena.nodes.len();
                arena.nodes.push(Node::new());
                if let Some(edges) = arena.nodes[node].edges.get() {
                    edges[edge_idx]
                        .child
                        .store(id, std::sync::atomic::Ordering::Relaxed);
                }
                id
            }
            Some(id) => id,
            // Unreachable in practice: the caller saw the edge under the
            // read lock and edges are write-once.
            None => node,
        }
    }

    /// Mixes Dirichlet noise into the root priors:
    /// `p' = (1 - eps) * p + eps * d`.
    pub fn apply_root_noise<R: Rng>(&self, alpha: f32, epsilon: f32, rng: &mut R) {
        let arena = read_lock(&self.arena);
        let Some(edges) = arena.nodes[arena.root].edges.get() else {
            return;
        };
        if edges.len() < 2 {
            return;
        }
        let dirichlet = match Dirichlet::new_with_size(alpha as f64, edges.len()) {
            Ok(d) => d,
            Err(_) => return,
        };
        let noise = dirichlet.sample(rng);
        for (edge, d) in edges.iter().zip(noise) {
            let mixed = (1.0 - epsilon) * edge.prior() + epsilon * d as f32;
            edge.set_prior(mixed);
        }
    }

    pub fn root_state(&self) -> Option<G> {
        read_lock(&self.arena).root_state.clone()
    }

    pub fn root_edge_snapshots(&self) -> Vec<EdgeSnapshot<G::Action>> {
        let arena = read_lock(&self.arena);
        arena.nodes[arena.root]
            .edges
            .get()
            .map(|edges| {
                edges
                    .iter()
                    .map(|e| EdgeSnapshot {
                        action: e.action,
                        visits: e.n(),
                        q: e.q(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn root_visits(&self) -> u32 {
        let arena = read_lock(&self.arena);
        arena.nodes[arena.root].n()
    }

    pub fn root_value(&self) -> f32 {
        let arena = read_lock(&self.arena);
        arena.nodes[arena.root].value()
    }
}
