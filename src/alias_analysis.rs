//! Alias analysis over the region graph.
//!
//! The analysis is Steensgaard-style: flow-insensitive and unification
//! based, running in near-linear time. It walks the region graph once,
//! maintaining a union-find [`LocationSet`] whose equivalence classes each
//! carry at most one points-to pointer, and distills the final classes into
//! a [`PointsToGraph`]. The companion [`encode`] pass rewrites the region
//! graph so that the single pervasive memory state threading a function is
//! split into one state per allocation site wherever the points-to graph
//! proves that sound.

mod encoding;
mod location_set;
mod points_to_graph;
mod steensgaard;

pub use self::encoding::encode;
pub use self::location_set::{Loc, LocKind, LocationSet};
pub use self::points_to_graph::{PointsToGraph, PtgNode, PtgNodeKind};
pub use self::steensgaard::Steensgaard;

use crate::rvsdg::{ArgKind, Graph, Node, NodeKind, Output, OutputData};

/// Follow context and recursion variables back to the lambda a function
/// value originates from. `None` means the callee cannot be resolved and the
/// call must be treated as indirect.
pub(crate) fn trace_callee(graph: &Graph, output: Output) -> Option<Node> {
    let mut cursor = output;
    let fuel = graph.nnodes(graph.root()) + 1;
    // A cycle of recursion variables cannot resolve; the fuel bound keeps us
    // from spinning on one.
    for _ in 0..fuel {
        match graph.output_data(cursor) {
            OutputData::NodeResult { node, index, .. } => match graph.kind(*node) {
                NodeKind::Lambda { .. } => return Some(*node),
                NodeKind::Phi => {
                    let sub = graph.subregion(*node, 0);
                    cursor = graph.results(sub)[*index];
                }
                _ => return None,
            },
            OutputData::RegionArg {
                kind,
                region,
                index,
                ..
            } => match kind {
                ArgKind::Context => cursor = graph.argument_origin(cursor)?,
                ArgKind::Recursion => cursor = graph.results(*region)[*index],
                _ => return None,
            },
        }
    }
    None
}

/// A short diagnostic label for a node, used by the dot serializers.
pub(crate) fn node_label(graph: &Graph, node: Node) -> String {
    match graph.kind(node) {
        NodeKind::Simple(op) => op.debug_string(),
        NodeKind::Gamma => "gamma".into(),
        NodeKind::Theta => "theta".into(),
        NodeKind::Lambda { name, .. } => format!("lambda[{}]", name),
        NodeKind::Delta { name, .. } => format!("delta[{}]", name),
        NodeKind::Phi => "phi".into(),
    }
}

/// A short diagnostic label for an output, used by the dot serializers.
pub(crate) fn output_label(graph: &Graph, output: Output) -> String {
    match graph.output_data(output) {
        OutputData::NodeResult { node, index, .. } => {
            format!("{}:o{}", node_label(graph, *node), index)
        }
        OutputData::RegionArg {
            region,
            index,
            kind,
            ..
        } => match kind {
            ArgKind::Import { name } => format!("imp:{}", name),
            _ => match graph.region_owner(*region) {
                Some(owner) => format!("{}:a{}", node_label(graph, owner), index),
                None => format!("root:a{}", index),
            },
        },
    }
}
