//! Re-encoding the points-to results as per-allocator memory states.
//!
//! Each function enters with a single combined memory state. Where the
//! points-to graph proves that a memory operation can only touch a known set
//! of allocation sites, the pass splits that state into one token per site,
//! threads each memory operation through the tokens of exactly the sites it
//! may touch, and merges the live tokens back into the single state the
//! function returns. The observable effect: operations whose target sets
//! are disjoint no longer constrain each other's order.
//!
//! Functions the pass cannot handle are skipped whole before anything is
//! mutated: a lambda with an indirect call, or with memory operations nested
//! inside a gamma or theta, keeps its original single-state form. After the
//! rewrite, dead-node elimination sweeps out the superseded state chain.

use crate::dne::dead_node_elimination;
use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::{Operation, Type};
use crate::result::{MidendError, MidendResult};
use crate::rvsdg::{Graph, Node, NodeKind, Output, Region, RvsdgModule};

use super::points_to_graph::{PointsToGraph, PtgNode};
use super::trace_callee;

/// Rewrite `module` in place according to `ptg`, then run dead-node
/// elimination.
pub fn encode(ptg: &PointsToGraph, module: &mut RvsdgModule) -> MidendResult<()> {
    let graph = &mut module.graph;
    let top: Vec<Node> = graph.region_nodes(graph.root()).to_vec();
    for node in top {
        match graph.kind(node) {
            NodeKind::Lambda { name, .. } => {
                if encodable(graph, graph.subregion(node, 0)) {
                    Encoder::new(graph, ptg).encode_lambda(node)?;
                } else {
                    log::warn!("state encoding skips function {}", name);
                }
            }
            NodeKind::Phi => {
                log::warn!("state encoding skips recursive environment {}", node);
            }
            _ => {}
        }
    }
    dead_node_elimination(graph);
    Ok(())
}

/// Can this lambda body be encoded? Indirect calls have no per-allocator
/// story yet, and memory operations inside nested structural nodes would
/// need their states routed through the nested interfaces.
fn encodable(graph: &Graph, region: Region) -> bool {
    for &node in graph.region_nodes(region) {
        match graph.kind(node) {
            NodeKind::Simple(Operation::Call { .. }) => {
                if trace_callee(graph, graph.inputs(node)[0]).is_none() {
                    return false;
                }
            }
            NodeKind::Simple(_) => {}
            _ => {
                if graph
                    .subregions(node)
                    .iter()
                    .any(|&sub| touches_memory(graph, sub))
                {
                    return false;
                }
            }
        }
    }
    true
}

fn touches_memory(graph: &Graph, region: Region) -> bool {
    for &node in graph.region_nodes(region) {
        match graph.kind(node) {
            NodeKind::Simple(op) => match op {
                Operation::Load { .. }
                | Operation::Store { .. }
                | Operation::Call { .. }
                | Operation::Alloca { .. } => return true,
                _ => {}
            },
            _ => {
                if graph
                    .subregions(node)
                    .iter()
                    .any(|&sub| touches_memory(graph, sub))
                {
                    return true;
                }
            }
        }
    }
    false
}

/// The per-region allocator-state map: which value currently represents the
/// memory state of each allocator. Insertion-ordered so the exit merge is
/// deterministic.
#[derive(Default)]
struct AllocatorStateMap {
    order: Vec<PtgNode>,
    states: FxHashMap<PtgNode, Output>,
}

impl AllocatorStateMap {
    fn state(&self, allocator: PtgNode) -> Option<Output> {
        self.states.get(&allocator).copied()
    }

    fn insert(&mut self, allocator: PtgNode, state: Output) {
        if self.states.insert(allocator, state).is_none() {
            self.order.push(allocator);
        }
    }

    fn states_in_order(&self) -> Vec<Output> {
        self.order.iter().map(|a| self.states[a]).collect()
    }
}

struct Encoder<'a> {
    graph: &'a mut Graph,
    ptg: &'a PointsToGraph,
    /// Replacement outputs mapped back to the output the analysis knew, so
    /// points-to lookups keep working on rewritten chains.
    original: FxHashMap<Output, Output>,
    amap: AllocatorStateMap,
}

impl<'a> Encoder<'a> {
    fn new(graph: &'a mut Graph, ptg: &'a PointsToGraph) -> Self {
        Self {
            graph,
            ptg,
            original: FxHashMap::default(),
            amap: AllocatorStateMap::default(),
        }
    }

    fn resolve(&self, output: Output) -> Output {
        self.original.get(&output).copied().unwrap_or(output)
    }

    /// The allocators a pointer value may target, in points-to graph order.
    fn targets_of(&self, output: Output) -> MidendResult<Vec<PtgNode>> {
        let reg = self.ptg.find_reg(self.resolve(output))?;
        Ok(self.ptg.allocators(reg))
    }

    /// The current state of `allocator`, or a fresh undefined state when the
    /// allocator was never routed into this function.
    fn state_or_undef(&mut self, region: Region, allocator: PtgNode) -> Output {
        if let Some(state) = self.amap.state(allocator) {
            return state;
        }
        log::trace!("no state for {}; supplying undef", allocator);
        let undef = self
            .graph
            .add_simple(region, Operation::Undef { ty: Type::Memory }, &[]);
        let state = self.graph.output(undef, 0);
        self.amap.insert(allocator, state);
        state
    }

    fn encode_lambda(mut self, lambda: Node) -> MidendResult<()> {
        let sub = self.graph.subregion(lambda, 0);
        let state_argument = self.graph.lambda_memstate_argument(lambda)?;
        let state_result = self.graph.lambda_memstate_result_index(lambda)?;

        // Split the incoming state into the allocators reachable through the
        // body's pointer arguments (parameters and context variables alike).
        let reachable = argument_allocators(self.graph, self.ptg, lambda)?;
        if !reachable.is_empty() {
            let split = self.graph.add_simple(
                sub,
                Operation::mem_split(reachable.len()),
                &[state_argument],
            );
            for (n, &allocator) in reachable.iter().enumerate() {
                let state = self.graph.output(split, n);
                self.amap.insert(allocator, state);
            }
        }

        for node in self.graph.topological_order(sub) {
            let op = match self.graph.kind(node) {
                NodeKind::Simple(op) => op.clone(),
                _ => continue,
            };
            match op {
                Operation::Alloca { .. } => {
                    let allocator = self.ptg.find_mem(node)?;
                    let state = self.graph.output(node, 1);
                    self.amap.insert(allocator, state);
                }
                Operation::Load { ty, .. } => self.encode_load(sub, node, ty)?,
                Operation::Store { ty, .. } => self.encode_store(sub, node, ty)?,
                Operation::Call { .. } => self.encode_call(sub, node)?,
                _ => {}
            }
        }

        let states = self.amap.states_in_order();
        if !states.is_empty() {
            let merge = self
                .graph
                .add_simple(sub, Operation::mem_merge(states.len()), &states);
            let state = self.graph.output(merge, 0);
            self.graph.divert_result(sub, state_result, state);
        }
        Ok(())
    }

    /// Rewrite a load to consume and produce one state per allocator its
    /// address may target.
    fn encode_load(&mut self, region: Region, node: Node, ty: Type) -> MidendResult<()> {
        let address = self.graph.inputs(node)[0];
        let targets = self.targets_of(address)?;
        let mut operands = vec![address];
        for &allocator in &targets {
            operands.push(self.state_or_undef(region, allocator));
        }

        let replacement = self.graph.add_simple(
            region,
            Operation::Load {
                ty,
                nstates: targets.len() as u32,
            },
            &operands,
        );
        log::trace!(
            "load {} -> {} over {} states",
            node,
            replacement,
            targets.len()
        );

        let old_value = self.graph.output(node, 0);
        let new_value = self.graph.output(replacement, 0);
        self.graph.divert_users(old_value, new_value);
        self.original.insert(new_value, self.resolve(old_value));

        for (n, &allocator) in targets.iter().enumerate() {
            let state = self.graph.output(replacement, 1 + n);
            self.amap.insert(allocator, state);
        }
        Ok(())
    }

    /// Rewrite a store symmetrically to a load.
    fn encode_store(&mut self, region: Region, node: Node, ty: Type) -> MidendResult<()> {
        let address = self.graph.inputs(node)[0];
        let value = self.graph.inputs(node)[1];
        let targets = self.targets_of(address)?;
        let mut operands = vec![address, value];
        for &allocator in &targets {
            operands.push(self.state_or_undef(region, allocator));
        }

        let replacement = self.graph.add_simple(
            region,
            Operation::Store {
                ty,
                nstates: targets.len() as u32,
            },
            &operands,
        );
        log::trace!(
            "store {} -> {} over {} states",
            node,
            replacement,
            targets.len()
        );

        for (n, &allocator) in targets.iter().enumerate() {
            let state = self.graph.output(replacement, n);
            self.amap.insert(allocator, state);
        }
        Ok(())
    }

    /// Feed a call exactly the states of the allocators its callee can
    /// reach; allocators the caller does not pass are filled with undefined
    /// states and their results discarded.
    fn encode_call(&mut self, region: Region, node: Node) -> MidendResult<()> {
        let callee = trace_callee(self.graph, self.graph.inputs(node)[0]).ok_or_else(|| {
            MidendError::Unsupported("indirect call during state encoding".into())
        })?;
        let callee_reachable = argument_allocators(self.graph, self.ptg, callee)?;

        let mut passed: FxHashSet<PtgNode> = FxHashSet::default();
        let inputs = self.graph.inputs(node).to_vec();
        for &input in &inputs[1..] {
            if self.graph.output_type(input).is_pointer() {
                passed.extend(self.targets_of(input)?);
            }
        }

        let state_input = inputs
            .iter()
            .position(|&i| self.graph.output_type(i).is_memory())
            .ok_or_else(|| {
                MidendError::InvariantViolation("call without a memory state operand".into())
            })?;

        if callee_reachable.is_empty() {
            // The callee touches no argument memory; cut the call loose from
            // the state chain.
            let undef = self
                .graph
                .add_simple(region, Operation::Undef { ty: Type::Memory }, &[]);
            let state = self.graph.output(undef, 0);
            self.graph.divert_input(node, state_input, state);
            return Ok(());
        }

        let mut instates = Vec::with_capacity(callee_reachable.len());
        for &allocator in &callee_reachable {
            if passed.contains(&allocator) {
                instates.push(self.state_or_undef(region, allocator));
            } else {
                let undef = self
                    .graph
                    .add_simple(region, Operation::Undef { ty: Type::Memory }, &[]);
                instates.push(self.graph.output(undef, 0));
            }
        }
        let merge = self
            .graph
            .add_simple(region, Operation::mem_merge(instates.len()), &instates);
        let merged = self.graph.output(merge, 0);
        self.graph.divert_input(node, state_input, merged);

        let state_output = self
            .graph
            .outputs(node)
            .iter()
            .copied()
            .find(|&o| self.graph.output_type(o).is_memory())
            .ok_or_else(|| {
                MidendError::InvariantViolation("call without a memory state result".into())
            })?;
        let split = self.graph.add_simple(
            region,
            Operation::mem_split(callee_reachable.len()),
            &[state_output],
        );
        for (n, &allocator) in callee_reachable.iter().enumerate() {
            if passed.contains(&allocator) {
                let state = self.graph.output(split, n);
                self.amap.insert(allocator, state);
            }
        }
        Ok(())
    }
}

/// The allocators reachable through the pointer-typed arguments of a lambda
/// body, parameters and context variables alike, in argument order.
fn argument_allocators(
    graph: &Graph,
    ptg: &PointsToGraph,
    lambda: Node,
) -> MidendResult<Vec<PtgNode>> {
    let sub = graph.subregion(lambda, 0);
    let mut seen = FxHashSet::default();
    let mut allocators = Vec::new();
    for &argument in graph.arguments(sub) {
        if !graph.output_type(argument).is_pointer() {
            continue;
        }
        let reg = ptg.find_reg(argument)?;
        for allocator in ptg.allocators(reg) {
            if seen.insert(allocator) {
                allocators.push(allocator);
            }
        }
    }
    Ok(allocators)
}
