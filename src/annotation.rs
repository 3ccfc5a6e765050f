//! Demand annotation: per-aggregation-node live-variable sets.
//!
//! Every node of the aggregation tree is annotated with a *top* set (the
//! variables live when control enters the node) and a *bottom* set (the
//! variables live when control leaves it). The region-graph builder reads
//! these sets to decide which variables become gamma entry variables, theta
//! loop variables, and lambda context variables.
//!
//! The analysis is a single post-order pass. Blocks run the usual backward
//! scan over their TACs; a branch demands the union of its arms; a loop
//! iterates its child to a fixed point, since anything the body reads must
//! also survive around the back edge. The entry node's top records what the
//! function body demands beyond its arguments, i.e. what has to be imported
//! into the lambda or synthesized as an undefined value.

use std::collections::BTreeSet;

use cranelift_entity::SecondaryMap;

use crate::aggregation::{AggId, AggKind, AggTree};
use crate::ir::Variable;

/// An ordered set of variables. Ordering keeps everything downstream
/// deterministic: gamma and theta variables are created in set order.
pub type VarSet = BTreeSet<Variable>;

/// The demand annotation of one aggregation node.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct DemandSet {
    /// Variables live at entry to the node.
    pub top: VarSet,
    /// Variables live at exit from the node.
    pub bottom: VarSet,
}

/// The demand annotations of a whole aggregation tree.
pub type DemandMap = SecondaryMap<AggId, DemandSet>;

/// Annotate every node of `tree` with its demand sets.
pub fn annotate(tree: &AggTree) -> DemandMap {
    let mut dm = DemandMap::new();
    annotate_node(tree, tree.root(), VarSet::new(), &mut dm);
    dm
}

fn annotate_node(tree: &AggTree, id: AggId, bottom: VarSet, dm: &mut DemandMap) -> VarSet {
    let top = match tree.kind(id) {
        AggKind::Block(tacs) => {
            let mut live = bottom.clone();
            for tac in tacs.iter().rev() {
                for result in &tac.results {
                    live.remove(result);
                }
                for operand in &tac.operands {
                    live.insert(*operand);
                }
            }
            live
        }

        AggKind::Linear => {
            let mut live = bottom.clone();
            for &child in tree.children(id).iter().rev() {
                live = annotate_node(tree, child, live, dm);
            }
            live
        }

        AggKind::Branch => {
            let mut union = VarSet::new();
            for &child in tree.children(id) {
                let top = annotate_node(tree, child, bottom.clone(), dm);
                union.extend(top);
            }
            union
        }

        AggKind::Loop => {
            // Anything live after the loop or read by the body must survive
            // the back edge; iterate until the body's demand stabilizes.
            let child = tree.children(id)[0];
            let mut demand = bottom.clone();
            loop {
                let top = annotate_node(tree, child, demand.clone(), dm);
                if top.is_subset(&demand) {
                    break;
                }
                demand.extend(top);
            }
            dm[id] = DemandSet {
                top: demand.clone(),
                bottom: demand.clone(),
            };
            return demand;
        }

        AggKind::Entry(args) => {
            let mut top = bottom.clone();
            for arg in args {
                top.remove(arg);
            }
            top
        }

        AggKind::Exit(results) => results.iter().copied().collect(),
    };

    dm[id] = DemandSet {
        top: top.clone(),
        bottom,
    };
    top
}
