//! Aggregation: folding a structured CFG into a tree of structured
//! constructs.
//!
//! The tree is built by graph reduction. Every basic block starts out as one
//! vertex of a reduction graph; three rules are applied until a single vertex
//! remains:
//!
//! * a vertex with an edge to itself folds into a `Loop`;
//! * a branch vertex whose arms are private and reconverge on one vertex
//!   folds into `Linear(head, Branch(arms...))`;
//! * a vertex whose sole successor has it as sole predecessor folds into a
//!   `Linear`.
//!
//! The in-order leaves of the result enumerate the original blocks. A CFG
//! the rules get stuck on was not properly restructured and is reported as
//! malformed input.

use cranelift_entity::{entity_impl, PrimaryMap};

use crate::fx::FxHashMap;
use crate::ir::{Cfg, Tac, Variable};
use crate::result::{MidendError, MidendResult};

/// An opaque reference to a node of an [`AggTree`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggId(u32);
entity_impl!(AggId, "agg");

/// The constructs of the aggregation tree.
#[derive(Clone, Debug)]
pub enum AggKind {
    /// Function entry, carrying the argument variables. A leaf.
    Entry(Vec<Variable>),
    /// Function exit, carrying the result variables. A leaf.
    Exit(Vec<Variable>),
    /// A basic block body. A leaf.
    Block(Vec<Tac>),
    /// Sequential composition of one or more children.
    Linear,
    /// One child per predicate arm, at least two.
    Branch,
    /// A tail-controlled loop around exactly one child.
    Loop,
}

/// One node of the aggregation tree.
#[derive(Clone)]
pub struct AggNodeData {
    /// The construct.
    pub kind: AggKind,
    /// Children, in control order.
    pub children: Vec<AggId>,
}

/// The aggregation tree of one function.
pub struct AggTree {
    nodes: PrimaryMap<AggId, AggNodeData>,
    root: AggId,
}

impl AggTree {
    /// The root node.
    pub fn root(&self) -> AggId {
        self.root
    }

    /// The data of `id`.
    pub fn node(&self, id: AggId) -> &AggNodeData {
        &self.nodes[id]
    }

    /// The construct of `id`.
    pub fn kind(&self, id: AggId) -> &AggKind {
        &self.nodes[id].kind
    }

    /// The children of `id`.
    pub fn children(&self, id: AggId) -> &[AggId] {
        &self.nodes[id].children
    }

    /// Number of nodes reachable from the root.
    pub fn nnodes(&self) -> usize {
        fn count(tree: &AggTree, id: AggId) -> usize {
            1 + tree
                .children(id)
                .iter()
                .map(|&child| count(tree, child))
                .sum::<usize>()
        }
        count(self, self.root)
    }

    /// Descend along last children to the rightmost `Block` leaf under `id`.
    pub fn rightmost_block(&self, id: AggId) -> Option<AggId> {
        let mut cursor = id;
        loop {
            match self.kind(cursor) {
                AggKind::Block(_) => return Some(cursor),
                _ => match self.children(cursor).last() {
                    Some(&last) => cursor = last,
                    None => return None,
                },
            }
        }
    }

    /// Flatten nested `Linear` nodes and drop single-child `Linear` wrappers.
    pub fn normalize(&mut self) {
        self.root = self.normalize_node(self.root);
    }

    fn normalize_node(&mut self, id: AggId) -> AggId {
        let children = std::mem::take(&mut self.nodes[id].children);
        let mut normalized: Vec<AggId> = children
            .into_iter()
            .map(|child| self.normalize_node(child))
            .collect();

        if let AggKind::Linear = self.nodes[id].kind {
            let mut flat = Vec::with_capacity(normalized.len());
            for child in normalized {
                if let AggKind::Linear = self.nodes[child].kind {
                    flat.append(&mut self.nodes[child].children);
                } else {
                    flat.push(child);
                }
            }
            if flat.len() == 1 {
                return flat[0];
            }
            normalized = flat;
        }
        self.nodes[id].children = normalized;
        id
    }
}

/// Build the aggregation tree of a structured CFG.
pub fn aggregate(cfg: &Cfg) -> MidendResult<AggTree> {
    let mut nodes: PrimaryMap<AggId, AggNodeData> = PrimaryMap::new();
    let mut make = |kind: AggKind, children: Vec<AggId>| nodes.push(AggNodeData { kind, children });

    // One reduction vertex per block. The entry and exit blocks compose
    // their TAC payload with the entry/exit leaf.
    let mut vertex: FxHashMap<crate::ir::Block, AggId> = FxHashMap::default();
    for block in cfg.blocks() {
        let id = if block == cfg.entry() {
            let entry = make(AggKind::Entry(cfg.arguments().to_vec()), vec![]);
            if cfg.tacs(block).is_empty() {
                entry
            } else {
                let body = make(AggKind::Block(cfg.tacs(block).to_vec()), vec![]);
                make(AggKind::Linear, vec![entry, body])
            }
        } else if block == cfg.exit() {
            let exit = make(AggKind::Exit(cfg.results().to_vec()), vec![]);
            if cfg.tacs(block).is_empty() {
                exit
            } else {
                let body = make(AggKind::Block(cfg.tacs(block).to_vec()), vec![]);
                make(AggKind::Linear, vec![body, exit])
            }
        } else {
            make(AggKind::Block(cfg.tacs(block).to_vec()), vec![])
        };
        vertex.insert(block, id);
    }

    let mut graph = ReductionGraph::default();
    for block in cfg.blocks() {
        let from = vertex[&block];
        for &succ in cfg.succs(block) {
            graph.add_edge(from, vertex[&succ]);
        }
        graph.ensure(from);
    }

    let mut tree = AggTree {
        nodes,
        root: vertex[&cfg.entry()],
    };
    let root = graph.reduce(&mut tree)?;
    tree.root = root;
    tree.normalize();
    Ok(tree)
}

/// Adjacency bookkeeping for the reduction.
#[derive(Default)]
struct ReductionGraph {
    succs: FxHashMap<AggId, Vec<AggId>>,
    preds: FxHashMap<AggId, Vec<AggId>>,
}

impl ReductionGraph {
    fn ensure(&mut self, v: AggId) {
        self.succs.entry(v).or_default();
        self.preds.entry(v).or_default();
    }

    fn add_edge(&mut self, from: AggId, to: AggId) {
        self.succs.entry(from).or_default().push(to);
        self.preds.entry(to).or_default().push(from);
        self.succs.entry(to).or_default();
        self.preds.entry(from).or_default();
    }

    /// Splice the vertices `group` (head first) into the fresh vertex `new`.
    /// Edges into the head move to `new`, edges out of `tail` move out of
    /// `new`, and edges between group members and `new` collapse into self
    /// edges.
    fn replace(&mut self, group: &[AggId], head: AggId, tail: AggId, new: AggId) {
        let in_group = |v: AggId| group.contains(&v) || v == new;

        let preds: Vec<AggId> = self.preds.remove(&head).unwrap_or_default();
        let succs: Vec<AggId> = self.succs.remove(&tail).unwrap_or_default();
        for &member in group {
            self.preds.remove(&member);
            self.succs.remove(&member);
        }

        let new_preds: Vec<AggId> = preds
            .iter()
            .map(|&p| if in_group(p) { new } else { p })
            .collect();
        let new_succs: Vec<AggId> = succs
            .iter()
            .map(|&s| if in_group(s) { new } else { s })
            .collect();

        for &p in &new_preds {
            if p == new {
                continue;
            }
            for slot in self.succs.get_mut(&p).expect("dangling predecessor") {
                if in_group(*slot) {
                    *slot = new;
                }
            }
        }
        for &s in &new_succs {
            if s == new {
                continue;
            }
            for slot in self.preds.get_mut(&s).expect("dangling successor") {
                if in_group(*slot) {
                    *slot = new;
                }
            }
        }

        self.succs.insert(new, new_succs);
        self.preds.insert(new, new_preds);
    }

    fn reduce(&mut self, tree: &mut AggTree) -> MidendResult<AggId> {
        loop {
            let mut changed = false;
            let mut vertices: Vec<AggId> = self.succs.keys().copied().collect();
            vertices.sort();

            for v in vertices {
                if !self.succs.contains_key(&v) {
                    continue;
                }

                // Self edge: fold into a loop.
                if self.succs[&v].contains(&v) {
                    let next = tree.nodes.push(AggNodeData {
                        kind: AggKind::Loop,
                        children: vec![v],
                    });
                    self.replace(&[v], v, v, next);
                    // Drop the consumed self edge.
                    self.succs.get_mut(&next).unwrap().retain(|&s| s != next);
                    self.preds.get_mut(&next).unwrap().retain(|&p| p != next);
                    changed = true;
                    continue;
                }

                // Branch arms reconverging on a single vertex.
                let succs = self.succs[&v].clone();
                if succs.len() >= 2 {
                    let distinct = succs
                        .iter()
                        .all(|s| succs.iter().filter(|t| *t == s).count() == 1);
                    let mut join = None;
                    let reducible = distinct
                        && succs.iter().all(|&arm| {
                            let private = self.preds[&arm] == [v];
                            let arm_succs = &self.succs[&arm];
                            let converges = arm_succs.len() == 1
                                && arm_succs[0] != arm
                                && arm_succs[0] != v
                                && !succs.contains(&arm_succs[0])
                                && match join {
                                    None => {
                                        join = Some(arm_succs[0]);
                                        true
                                    }
                                    Some(j) => arm_succs[0] == j,
                                };
                            private && converges
                        });
                    if reducible {
                        let branch = tree.nodes.push(AggNodeData {
                            kind: AggKind::Branch,
                            children: succs.clone(),
                        });
                        let next = tree.nodes.push(AggNodeData {
                            kind: AggKind::Linear,
                            children: vec![v, branch],
                        });
                        let mut group = vec![v];
                        group.extend(&succs);
                        // All arm edges leave towards the join; head edges
                        // enter at `v`.
                        self.replace(&group, v, succs[0], next);
                        let join = join.unwrap();
                        self.succs.insert(next, vec![join]);
                        let jp = self.preds.get_mut(&join).unwrap();
                        jp.retain(|p| !succs.contains(p) && *p != next);
                        jp.push(next);
                        changed = true;
                        continue;
                    }
                }

                // Straight line.
                if self.succs[&v].len() == 1 {
                    let w = self.succs[&v][0];
                    if w != v && self.preds[&w] == [v] {
                        let next = tree.nodes.push(AggNodeData {
                            kind: AggKind::Linear,
                            children: vec![v, w],
                        });
                        self.replace(&[v, w], v, w, next);
                        changed = true;
                        continue;
                    }
                }
            }

            if !changed {
                break;
            }
        }

        let remaining: Vec<AggId> = self.succs.keys().copied().collect();
        if remaining.len() != 1 {
            return Err(MidendError::MalformedInput(format!(
                "aggregation got stuck with {} vertices; was the CFG restructured?",
                remaining.len()
            )));
        }
        Ok(remaining[0])
    }
}
