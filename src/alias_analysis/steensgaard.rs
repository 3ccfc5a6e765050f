//! The unification-based points-to analysis.
//!
//! The analyzer walks the region graph once, top-down: structural parents
//! before their subregion contents, and simple nodes of a region in
//! topological order. Each rule unifies locations in the [`LocationSet`];
//! `join` is a recursive union, so a points-to relation established through
//! one chain of assignments collapses into the same class as any other
//! chain. When the walk is done, the final equivalence classes are distilled
//! into a [`PointsToGraph`].
//!
//! The analysis never fails on imprecision: when it cannot resolve a
//! construct (an indirect call, an integer-to-pointer cast) it widens to the
//! `any`/unknown side instead. Failure is reserved for pointer-producing
//! operators with no rule at all.

use crate::ir::{Linkage, Operation};
use crate::result::{MidendError, MidendResult};
use crate::rvsdg::{Graph, Node, NodeKind, Region, RvsdgModule};

use super::location_set::{Loc, LocKind, LocationSet};
use super::points_to_graph::PointsToGraph;
use super::trace_callee;

/// The Steensgaard analyzer. Create one, then [`run`](Self::run) it over a
/// module; the location store is rebuilt from scratch on every run.
pub struct Steensgaard {
    lset: LocationSet,
}

impl Steensgaard {
    /// Create an analyzer.
    pub fn new() -> Self {
        Self {
            lset: LocationSet::new(),
        }
    }

    /// The location store of the last run, for debugging.
    pub fn location_set(&self) -> &LocationSet {
        &self.lset
    }

    /// Analyze `module` and produce its points-to graph. The module is not
    /// mutated.
    pub fn run(&mut self, module: &RvsdgModule) -> MidendResult<PointsToGraph> {
        self.lset = LocationSet::new();
        let graph = &module.graph;

        // Imported pointers may point anywhere the environment put them.
        for &argument in graph.arguments(graph.root()) {
            if graph.output_type(argument).is_pointer() {
                self.lset.insert_reg(argument, true)?;
            }
        }

        self.analyze_region(graph, graph.root())?;
        log::debug!(
            "steensgaard: {} locations for {}",
            self.lset.len(),
            module.name
        );
        self.build_ptg(graph)
    }

    fn join(&mut self, a: Loc, b: Loc) -> Loc {
        self.lset.merge(a, b)
    }

    /// Establish `points-to(l) = target`, joining with an existing target.
    fn point_to(&mut self, l: Loc, target: Loc) {
        match self.lset.points_to(l) {
            None => self.lset.set_points_to(l, target),
            Some(existing) => {
                self.join(existing, target);
            }
        }
    }

    fn analyze_region(&mut self, graph: &Graph, region: Region) -> MidendResult<()> {
        for node in graph.topological_order(region) {
            match graph.kind(node) {
                NodeKind::Simple(_) => self.analyze_simple(graph, node)?,
                NodeKind::Gamma => self.analyze_gamma(graph, node)?,
                NodeKind::Theta => self.analyze_theta(graph, node)?,
                NodeKind::Lambda { .. } => self.analyze_lambda(graph, node)?,
                NodeKind::Delta { .. } => self.analyze_delta(graph, node)?,
                NodeKind::Phi => self.analyze_phi(graph, node)?,
            }
        }
        Ok(())
    }

    fn analyze_simple(&mut self, graph: &Graph, node: Node) -> MidendResult<()> {
        let op = match graph.kind(node) {
            NodeKind::Simple(op) => op,
            _ => unreachable!(),
        };
        match op {
            Operation::Alloca { .. } => {
                let ptr = self.lset.locate(graph.output(node, 0));
                let mem = self.lset.insert_mem(node);
                self.point_to(ptr, mem);
            }

            Operation::Load { .. } => {
                let result = graph.output(node, 0);
                if !graph.output_type(result).is_pointer() {
                    return Ok(());
                }
                let address = self.lset.locate(graph.inputs(node)[0]);
                let result = self.lset.locate(result);
                match self.lset.points_to(address) {
                    None => self.lset.set_points_to(address, result),
                    Some(target) => {
                        self.join(result, target);
                    }
                }
            }

            Operation::Store { .. } => {
                let value = graph.inputs(node)[1];
                if !graph.output_type(value).is_pointer() {
                    return Ok(());
                }
                let address = self.lset.locate(graph.inputs(node)[0]);
                let value = self.lset.locate(value);
                match self.lset.points_to(address) {
                    None => self.lset.set_points_to(address, value),
                    Some(target) => {
                        self.join(target, value);
                    }
                }
            }

            Operation::Call { .. } => self.analyze_call(graph, node)?,

            Operation::GetElementPtr { .. } => {
                let base = self.lset.locate(graph.inputs(node)[0]);
                let result = self.lset.locate(graph.output(node, 0));
                self.join(base, result);
            }

            Operation::Bitcast { from, to } => {
                if from.is_pointer() && to.is_pointer() {
                    let operand = self.lset.locate(graph.inputs(node)[0]);
                    let result = self.lset.locate(graph.output(node, 0));
                    self.join(operand, result);
                } else if to.is_pointer() {
                    // A pointer out of non-pointer bits; same treatment as
                    // bits2ptr.
                    let result = self.lset.locate(graph.output(node, 0));
                    self.lset.mark_unknown(result);
                }
            }

            Operation::Bits2Ptr { .. } => {
                let result = self.lset.locate(graph.output(node, 0));
                self.lset.mark_unknown(result);
            }

            Operation::PtrNull { .. } => {
                self.lset.locate(graph.output(node, 0));
            }

            Operation::Undef { ty } => {
                if ty.is_pointer() {
                    self.lset.locate(graph.output(node, 0));
                }
            }

            _ => {
                // Every pointer-producing operator must have a rule.
                for &output in graph.outputs(node) {
                    if graph.output_type(output).is_pointer() {
                        return Err(MidendError::Unsupported(format!(
                            "no points-to rule for operator {}",
                            op.debug_string()
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn analyze_call(&mut self, graph: &Graph, node: Node) -> MidendResult<()> {
        let inputs = graph.inputs(node);

        if let Some(callee) = trace_callee(graph, inputs[0]) {
            // Direct call: unify actuals with formals and results with the
            // callee's body results.
            let params = graph.lambda_params(callee);
            debug_assert_eq!(params.len(), inputs.len() - 1);
            for (&actual, &formal) in inputs[1..].iter().zip(&params) {
                if !graph.output_type(actual).is_pointer() {
                    continue;
                }
                let actual = self.lset.locate(actual);
                let formal = self.lset.locate(formal);
                self.join(actual, formal);
            }

            let sub = graph.subregion(callee, 0);
            let outputs = graph.outputs(node).to_vec();
            for (n, &output) in outputs.iter().enumerate() {
                if !graph.output_type(output).is_pointer() {
                    continue;
                }
                let result = self.lset.locate(graph.results(sub)[n]);
                let output = self.lset.locate(output);
                self.join(output, result);
            }
            return Ok(());
        }

        // Indirect call: everything passed or returned may point anywhere.
        log::trace!("indirect call at {}; widening to any", node);
        let any = self.lset.any();
        for &actual in &inputs[1..] {
            if graph.output_type(actual).is_pointer() {
                let l = self.lset.locate(actual);
                self.point_to(l, any);
            }
        }
        let outputs = graph.outputs(node).to_vec();
        for output in outputs {
            if graph.output_type(output).is_pointer() {
                let l = self.lset.locate(output);
                self.point_to(l, any);
            }
        }
        Ok(())
    }

    fn analyze_gamma(&mut self, graph: &Graph, node: Node) -> MidendResult<()> {
        for n in 0..graph.gamma_nentry_vars(node) {
            let origin = graph.gamma_entry_origin(node, n);
            if !graph.output_type(origin).is_pointer() {
                continue;
            }
            let origin = self.lset.locate(origin);
            for &sub in graph.subregions(node) {
                let argument = self.lset.locate(graph.arguments(sub)[n]);
                self.join(argument, origin);
            }
        }

        for &sub in graph.subregions(node) {
            self.analyze_region(graph, sub)?;
        }

        let outputs = graph.outputs(node).to_vec();
        for (n, &output) in outputs.iter().enumerate() {
            if !graph.output_type(output).is_pointer() {
                continue;
            }
            let output = self.lset.locate(output);
            for &sub in graph.subregions(node) {
                let result = self.lset.locate(graph.results(sub)[n]);
                self.join(output, result);
            }
        }
        Ok(())
    }

    fn analyze_theta(&mut self, graph: &Graph, node: Node) -> MidendResult<()> {
        let nvars = graph.theta_nloop_vars(node);
        let pointer_var = |graph: &Graph, n: usize| {
            graph
                .output_type(graph.theta_loop_arg(node, n))
                .is_pointer()
        };

        for n in 0..nvars {
            if !pointer_var(graph, n) {
                continue;
            }
            let origin = self.lset.locate(graph.inputs(node)[n]);
            let argument = self.lset.locate(graph.theta_loop_arg(node, n));
            self.join(argument, origin);
        }

        let sub = graph.subregion(node, 0);
        self.analyze_region(graph, sub)?;

        for n in 0..nvars {
            if !pointer_var(graph, n) {
                continue;
            }
            let result = self.lset.locate(graph.results(sub)[1 + n]);
            let argument = self.lset.locate(graph.theta_loop_arg(node, n));
            let output = self.lset.locate(graph.output(node, n));
            self.join(result, argument);
            self.join(result, output);
        }
        Ok(())
    }

    fn analyze_lambda(&mut self, graph: &Graph, node: Node) -> MidendResult<()> {
        let sub = graph.subregion(node, 0);
        let params = graph.lambda_params(node);
        let exported = matches!(
            graph.kind(node),
            NodeKind::Lambda {
                linkage: Linkage::Export,
                ..
            }
        );

        // Context variables map their origin into the body.
        let arguments = graph.arguments(sub).to_vec();
        for &argument in arguments.iter().skip(params.len()) {
            if !graph.output_type(argument).is_pointer() {
                continue;
            }
            let origin = graph.argument_origin(argument).ok_or_else(|| {
                MidendError::InvariantViolation("context variable without an origin".into())
            })?;
            let origin = self.lset.locate(origin);
            let argument = self.lset.locate(argument);
            self.join(origin, argument);
        }

        // Arguments of an exported function alias whatever the outside
        // world passes in.
        for &param in &params {
            if !graph.output_type(param).is_pointer() {
                continue;
            }
            let l = self.lset.locate(param);
            if exported {
                self.lset.mark_unknown(l);
            }
        }

        self.analyze_region(graph, sub)?;

        // The function value itself is a memory object.
        let ptr = self.lset.locate(graph.lambda_output(node));
        let mem = self.lset.insert_mem(node);
        self.point_to(ptr, mem);
        Ok(())
    }

    fn analyze_delta(&mut self, graph: &Graph, node: Node) -> MidendResult<()> {
        let sub = graph.subregion(node, 0);
        let arguments = graph.arguments(sub).to_vec();
        for &argument in &arguments {
            if !graph.output_type(argument).is_pointer() {
                continue;
            }
            let origin = graph.argument_origin(argument).ok_or_else(|| {
                MidendError::InvariantViolation("delta dependency without an origin".into())
            })?;
            let origin = self.lset.locate(origin);
            let argument = self.lset.locate(argument);
            self.join(origin, argument);
        }

        self.analyze_region(graph, sub)?;

        let mem = self.lset.insert_mem(node);
        let address = self.lset.locate(graph.delta_output(node));
        self.point_to(address, mem);
        let init = graph.results(sub)[0];
        if graph.output_type(init).is_pointer() {
            let init = self.lset.locate(init);
            self.point_to(init, mem);
        }
        Ok(())
    }

    /// Recursion environments mirror theta: every recursion variable is
    /// unified with its definition and its output.
    fn analyze_phi(&mut self, graph: &Graph, node: Node) -> MidendResult<()> {
        let sub = graph.subregion(node, 0);
        let nrec = graph.outputs(node).len();
        let arguments = graph.arguments(sub).to_vec();

        for &argument in arguments.iter().skip(nrec) {
            if !graph.output_type(argument).is_pointer() {
                continue;
            }
            let origin = graph.argument_origin(argument).ok_or_else(|| {
                MidendError::InvariantViolation("phi context variable without an origin".into())
            })?;
            let origin = self.lset.locate(origin);
            let argument = self.lset.locate(argument);
            self.join(origin, argument);
        }

        self.analyze_region(graph, sub)?;

        for n in 0..nrec {
            let definition = graph.results(sub)[n];
            if !graph.output_type(definition).is_pointer() {
                continue;
            }
            let definition = self.lset.locate(definition);
            let argument = self.lset.locate(arguments[n]);
            let output = self.lset.locate(graph.output(node, n));
            self.join(definition, argument);
            self.join(definition, output);
        }
        Ok(())
    }

    /// Distill the final location classes into the points-to graph.
    fn build_ptg(&mut self, _graph: &Graph) -> MidendResult<PointsToGraph> {
        use crate::fx::{FxHashMap, FxHashSet};

        let mut ptg = PointsToGraph::new();
        let classes = self.lset.classes();

        let mut loc_node: FxHashMap<Loc, super::PtgNode> = FxHashMap::default();
        let mut class_allocators: FxHashMap<Loc, Vec<super::PtgNode>> = FxHashMap::default();
        let mut class_has_any: FxHashSet<Loc> = FxHashSet::default();

        for (root, members) in &classes {
            for &member in members {
                match self.lset.kind(member) {
                    LocKind::Reg(output) => {
                        loc_node.insert(member, ptg.add_reg(output)?);
                    }
                    LocKind::Mem(site) => {
                        let node = ptg.add_mem(site)?;
                        class_allocators.entry(*root).or_default().push(node);
                        loc_node.insert(member, node);
                    }
                    LocKind::Any => {
                        class_has_any.insert(*root);
                    }
                }
            }
        }

        for (root, members) in &classes {
            // A class joined with `any`, or flagged unknown, may point into
            // memory we do not track.
            let escapes = self.lset.is_unknown(*root) || class_has_any.contains(root);
            let target = self.lset.points_to(*root);
            for &member in members {
                let Some(&node) = loc_node.get(&member) else {
                    continue;
                };
                if escapes {
                    ptg.add_edge(node, ptg.unknown());
                }
                if let Some(target) = target {
                    if let Some(allocators) = class_allocators.get(&target) {
                        for &allocator in allocators {
                            ptg.add_edge(node, allocator);
                        }
                    }
                    if class_has_any.contains(&target) {
                        ptg.add_edge(node, ptg.unknown());
                    }
                }
            }
        }

        Ok(ptg)
    }
}

impl Default for Steensgaard {
    fn default() -> Self {
        Self::new()
    }
}
