//! The points-to graph: the distilled result of the unification analysis.
//!
//! Nodes abstract either a register (one per pointer-typed value output of
//! the region graph), an allocator (one per memory-allocating node: alloca,
//! lambda, delta), or the singleton *unknown* standing for any memory not
//! otherwise tracked. An edge `n -> m` means values at `n` may point into
//! `m`; targets are always memory nodes.

use std::collections::BTreeSet;
use std::fmt::Write;

use cranelift_entity::{entity_impl, PrimaryMap};

use crate::fx::FxHashMap;
use crate::result::{MidendError, MidendResult};
use crate::rvsdg::{Graph, Node, Output};

/// An opaque reference to a points-to graph node.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PtgNode(u32);
entity_impl!(PtgNode, "ptg");

/// What a points-to graph node abstracts.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PtgNodeKind {
    /// The pointer value of a register output.
    Reg(Output),
    /// The memory allocated at a site.
    Alloc(Node),
    /// Any memory not otherwise tracked.
    Unknown,
}

struct PtgNodeData {
    kind: PtgNodeKind,
    targets: BTreeSet<PtgNode>,
}

/// The points-to graph.
pub struct PointsToGraph {
    nodes: PrimaryMap<PtgNode, PtgNodeData>,
    regs: FxHashMap<Output, PtgNode>,
    mems: FxHashMap<Node, PtgNode>,
    unknown: PtgNode,
}

impl PointsToGraph {
    /// Create an empty graph holding only the unknown node.
    pub fn new() -> Self {
        let mut nodes = PrimaryMap::new();
        let unknown = nodes.push(PtgNodeData {
            kind: PtgNodeKind::Unknown,
            targets: BTreeSet::new(),
        });
        Self {
            nodes,
            regs: FxHashMap::default(),
            mems: FxHashMap::default(),
            unknown,
        }
    }

    /// The singleton unknown node.
    pub fn unknown(&self) -> PtgNode {
        self.unknown
    }

    /// What `node` abstracts.
    pub fn kind(&self, node: PtgNode) -> PtgNodeKind {
        self.nodes[node].kind
    }

    /// Number of register nodes.
    pub fn nregnodes(&self) -> usize {
        self.regs.len()
    }

    /// Number of allocator nodes.
    pub fn nmemnodes(&self) -> usize {
        self.mems.len()
    }

    /// All nodes, unknown included.
    pub fn iter(&self) -> impl Iterator<Item = PtgNode> + '_ {
        self.nodes.keys()
    }

    pub(crate) fn add_reg(&mut self, output: Output) -> MidendResult<PtgNode> {
        if self.regs.contains_key(&output) {
            return Err(MidendError::InvariantViolation(format!(
                "{} already has a points-to graph node",
                output
            )));
        }
        let node = self.nodes.push(PtgNodeData {
            kind: PtgNodeKind::Reg(output),
            targets: BTreeSet::new(),
        });
        self.regs.insert(output, node);
        Ok(node)
    }

    pub(crate) fn add_mem(&mut self, site: Node) -> MidendResult<PtgNode> {
        if self.mems.contains_key(&site) {
            return Err(MidendError::InvariantViolation(format!(
                "{} already has a points-to graph node",
                site
            )));
        }
        let node = self.nodes.push(PtgNodeData {
            kind: PtgNodeKind::Alloc(site),
            targets: BTreeSet::new(),
        });
        self.mems.insert(site, node);
        Ok(node)
    }

    pub(crate) fn add_edge(&mut self, from: PtgNode, to: PtgNode) {
        debug_assert!(
            matches!(
                self.nodes[to].kind,
                PtgNodeKind::Alloc(_) | PtgNodeKind::Unknown
            ),
            "points-to edges target memory nodes"
        );
        self.nodes[from].targets.insert(to);
    }

    /// The node of a register output.
    pub fn find_reg(&self, output: Output) -> MidendResult<PtgNode> {
        self.regs.get(&output).copied().ok_or_else(|| {
            MidendError::InvariantViolation(format!("{} is not in the points-to graph", output))
        })
    }

    /// The node of an allocation site.
    pub fn find_mem(&self, site: Node) -> MidendResult<PtgNode> {
        self.mems.get(&site).copied().ok_or_else(|| {
            MidendError::InvariantViolation(format!("{} is not in the points-to graph", site))
        })
    }

    /// The targets of `node`, in id order.
    pub fn targets(&self, node: PtgNode) -> impl Iterator<Item = PtgNode> + '_ {
        self.nodes[node].targets.iter().copied()
    }

    /// Number of targets of `node`.
    pub fn ntargets(&self, node: PtgNode) -> usize {
        self.nodes[node].targets.len()
    }

    /// The allocator targets of `node`, in id order.
    pub fn allocators(&self, node: PtgNode) -> Vec<PtgNode> {
        self.targets(node)
            .filter(|&t| matches!(self.nodes[t].kind, PtgNodeKind::Alloc(_)))
            .collect()
    }

    /// Render the graph as a `digraph`: memory and unknown nodes are boxes,
    /// register nodes ovals.
    pub fn to_dot(&self, graph: &Graph) -> String {
        let mut dot = String::from("digraph ptg {\n");
        for node in self.iter() {
            let (label, shape) = match self.nodes[node].kind {
                PtgNodeKind::Reg(output) => (super::output_label(graph, output), "oval"),
                PtgNodeKind::Alloc(site) => (super::node_label(graph, site), "box"),
                PtgNodeKind::Unknown => ("Unknown".into(), "box"),
            };
            let _ = writeln!(
                dot,
                "    {} [label = \"{}\", shape = \"{}\"]",
                node, label, shape
            );
            for target in self.targets(node) {
                let _ = writeln!(dot, "    {} -> {}", node, target);
            }
        }
        dot.push_str("}\n");
        dot
    }
}

impl Default for PointsToGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Operation, Type};

    #[test]
    fn edges_and_lookup() {
        let mut graph = Graph::new();
        let root = graph.root();
        let size = graph.add_simple(
            root,
            Operation::BitConstant {
                width: 32,
                value: 4,
            },
            &[],
        );
        let alloca = graph.add_simple(
            root,
            Operation::Alloca {
                allocated: Type::Bits(32),
            },
            &[graph.output(size, 0)],
        );

        let mut ptg = PointsToGraph::new();
        let reg = ptg.add_reg(graph.output(alloca, 0)).unwrap();
        let mem = ptg.add_mem(alloca).unwrap();
        ptg.add_edge(reg, mem);
        ptg.add_edge(reg, ptg.unknown());

        assert_eq!(ptg.find_reg(graph.output(alloca, 0)).unwrap(), reg);
        assert_eq!(ptg.find_mem(alloca).unwrap(), mem);
        assert_eq!(ptg.ntargets(reg), 2);
        assert_eq!(ptg.allocators(reg), vec![mem]);
        assert!(ptg.add_reg(graph.output(alloca, 0)).is_err());

        let dot = ptg.to_dot(&graph);
        assert!(dot.starts_with("digraph ptg {"));
        assert!(dot.contains("shape = \"oval\""));
        assert!(dot.contains("shape = \"box\""));
    }
}
