//! Region-graph construction: lowering an inter-procedural module of
//! CFG-of-TAC functions into an RVSDG.
//!
//! The module-level driver processes the reference graph's strongly
//! connected components bottom-up. A non-recursive component lowers to a
//! lambda or delta in the root region (or to an import when the module has
//! no body for it); a recursive component lowers inside a phi environment
//! whose recursion variables let the members call each other.
//!
//! Per function the CFG runs through SSA destruction, straightening,
//! purging, restructuring, aggregation, and demand annotation; the
//! aggregation tree is then folded into a lambda, with a scoped variable map
//! connecting TAC variables to value outputs. Every variable referenced
//! inside a nested subregion enters that subregion as an explicit argument
//! (entry, loop, or context variable); there is no implicit capture.

use cranelift_entity::PrimaryMap;

use crate::aggregation::{aggregate, AggId, AggKind, AggTree};
use crate::annotation::{annotate, DemandMap};
use crate::fx::FxHashMap;
use crate::ir::ssa::destruct_ssa;
use crate::ir::{
    Cfg, DataInit, FunctionType, IpModule, IpNode, IpNodeKind, Linkage, Operation, Tac, Type,
    VarKind, Variable, VariableData,
};
use crate::restructure::restructure;
use crate::result::{MidendError, MidendResult};
use crate::rvsdg::{Graph, Node, Output, Region, RvsdgModule};

/// Convert `module` into a region-graph module.
pub fn construct_region_graph(mut module: IpModule) -> MidendResult<RvsdgModule> {
    // Pull the bodies out so the module itself can stay shared.
    let mut cfgs: FxHashMap<IpNode, Cfg> = FxHashMap::default();
    let mut inits: FxHashMap<IpNode, DataInit> = FxHashMap::default();
    let nodes: Vec<IpNode> = module.nodes().collect();
    for node in nodes {
        match &mut module.node_mut(node).kind {
            IpNodeKind::Function { cfg, .. } => {
                if let Some(cfg) = cfg.take() {
                    cfgs.insert(node, cfg);
                }
            }
            IpNodeKind::Data { init, .. } => {
                if let Some(init) = init.take() {
                    inits.insert(node, init);
                }
            }
        }
    }

    let mut lowerer = Lowerer {
        module: &module,
        cfgs,
        inits,
        graph: Graph::new(),
        scopes: Vec::new(),
    };
    let root = lowerer.graph.root();
    lowerer.push_scope(root);

    for scc in module.sccs() {
        lowerer.handle_scc(&scc)?;
    }

    log::debug!(
        "constructed region graph for {}: {} nodes",
        module.name,
        lowerer.graph.nnodes(root)
    );

    Ok(RvsdgModule {
        name: module.name.clone(),
        triple: module.triple.clone(),
        data_layout: module.data_layout.clone(),
        graph: lowerer.graph,
    })
}

/// One level of the scoped variable map: TAC variables and module symbols
/// bound to value outputs of `region`.
struct Scope {
    region: Region,
    vars: FxHashMap<Variable, Output>,
    symbols: FxHashMap<IpNode, Output>,
}

/// Per-function lowering context.
struct FnCtx<'f> {
    tree: &'f AggTree,
    dm: &'f DemandMap,
    vars: &'f PrimaryMap<Variable, VariableData>,
    lambda: Node,
}

struct Lowerer<'m> {
    module: &'m IpModule,
    cfgs: FxHashMap<IpNode, Cfg>,
    inits: FxHashMap<IpNode, DataInit>,
    graph: Graph,
    scopes: Vec<Scope>,
}

impl<'m> Lowerer<'m> {
    /* scope bookkeeping */

    fn push_scope(&mut self, region: Region) {
        self.scopes.push(Scope {
            region,
            vars: FxHashMap::default(),
            symbols: FxHashMap::default(),
        });
    }

    fn pop_scope(&mut self) {
        self.scopes.pop().expect("scope underflow");
    }

    fn region(&self) -> Region {
        self.scopes.last().expect("no scope").region
    }

    fn lookup(&self, var: Variable) -> MidendResult<Output> {
        self.scopes
            .last()
            .expect("no scope")
            .vars
            .get(&var)
            .copied()
            .ok_or_else(|| {
                MidendError::InvariantViolation(format!("{} is unbound in the current scope", var))
            })
    }

    fn bind(&mut self, var: Variable, output: Output) {
        self.scopes
            .last_mut()
            .expect("no scope")
            .vars
            .insert(var, output);
    }

    fn parent_lookup(&self, var: Variable) -> Option<Output> {
        let n = self.scopes.len();
        self.scopes[n - 2].vars.get(&var).copied()
    }

    fn parent_bind(&mut self, var: Variable, output: Output) {
        let n = self.scopes.len();
        self.scopes[n - 2].vars.insert(var, output);
    }

    fn parent_symbol(&self, node: IpNode) -> Option<Output> {
        let n = self.scopes.len();
        self.scopes[n - 2].symbols.get(&node).copied()
    }

    fn bind_symbol(&mut self, node: IpNode, output: Output) {
        self.scopes
            .last_mut()
            .expect("no scope")
            .symbols
            .insert(node, output);
    }

    /// An undefined value of `ty` in `region`. Control types have no
    /// undefined constant; a zero control constant stands in.
    fn make_undef(&mut self, region: Region, ty: &Type) -> Output {
        let node = match ty {
            Type::Control(n) => self.graph.add_simple(
                region,
                Operation::ControlConstant {
                    value: 0,
                    nalternatives: *n,
                },
                &[],
            ),
            _ => self
                .graph
                .add_simple(region, Operation::Undef { ty: ty.clone() }, &[]),
        };
        self.graph.output(node, 0)
    }

    /* module level */

    fn handle_scc(&mut self, scc: &[IpNode]) -> MidendResult<()> {
        let recursive =
            scc.len() > 1 || self.module.node(scc[0]).deps.contains(&scc[0]);

        if !recursive {
            let node = scc[0];
            let output = self.convert_ip_node(node)?;
            self.bind_symbol(node, output);
            if self.module.node(node).linkage == Linkage::Export {
                let name = self.module.node(node).name.clone();
                self.graph.add_export(output, &name);
            }
            return Ok(());
        }

        log::trace!("recursive component of {} members", scc.len());
        let phi = self.graph.create_phi(self.region());
        let sub = self.graph.subregion(phi, 0);
        self.push_scope(sub);

        // Recursion variables let the members reference each other.
        for &member in scc {
            let ty = self.module.node(member).value_type();
            let arg = self.graph.phi_add_rec_var(phi, ty);
            self.bind_symbol(member, arg);
        }

        // External dependencies enter as context variables.
        for &member in scc {
            let deps: Vec<IpNode> = self.module.node(member).deps.clone();
            for dep in deps {
                if scc.contains(&dep) || self.scopes.last().unwrap().symbols.contains_key(&dep) {
                    continue;
                }
                let origin = self.parent_symbol(dep).ok_or_else(|| {
                    MidendError::InvariantViolation(format!(
                        "dependency {} lowered out of order",
                        self.module.node(dep).name
                    ))
                })?;
                let arg = self.graph.phi_add_ctxvar(phi, origin);
                self.bind_symbol(dep, arg);
            }
        }

        let mut definitions = Vec::with_capacity(scc.len());
        for &member in scc {
            definitions.push(self.convert_ip_node(member)?);
        }
        self.pop_scope();
        self.graph.phi_finalize(phi, &definitions);

        for (n, &member) in scc.iter().enumerate() {
            let output = self.graph.output(phi, n);
            self.bind_symbol(member, output);
            if self.module.node(member).linkage == Linkage::Export {
                let name = self.module.node(member).name.clone();
                self.graph.add_export(output, &name);
            }
        }
        Ok(())
    }

    fn convert_ip_node(&mut self, node: IpNode) -> MidendResult<Output> {
        let data = self.module.node(node);
        match &data.kind {
            IpNodeKind::Function { sig, .. } => match self.cfgs.remove(&node) {
                Some(cfg) => self.convert_function(node, sig.clone(), cfg),
                None => Ok(self.graph.add_import(data.value_type(), &data.name)),
            },
            IpNodeKind::Data { ty, constant, .. } => match self.inits.remove(&node) {
                Some(init) => self.convert_data(node, ty.clone(), *constant, init),
                None => Ok(self.graph.add_import(data.value_type(), &data.name)),
            },
        }
    }

    /* functions */

    fn convert_function(
        &mut self,
        node: IpNode,
        sig: FunctionType,
        mut cfg: Cfg,
    ) -> MidendResult<Output> {
        let data = self.module.node(node);
        log::debug!("converting function {}", data.name);

        cfg.validate()?;
        destruct_ssa(&mut cfg);
        cfg.straighten();
        cfg.purge();
        restructure(&mut cfg);
        cfg.straighten();

        let tree = aggregate(&cfg)?;
        let dm = annotate(&tree);

        if cfg.arguments().len() != sig.params.len() {
            return Err(MidendError::MalformedInput(format!(
                "function {} has {} CFG arguments but {} signature parameters",
                data.name,
                cfg.arguments().len(),
                sig.params.len()
            )));
        }

        let lambda = self
            .graph
            .create_lambda(self.region(), &data.name, sig, data.linkage);
        let ctx = FnCtx {
            tree: &tree,
            dm: &dm,
            vars: cfg.variables(),
            lambda,
        };
        self.convert_agg_node(&ctx, tree.root())?;

        Ok(self.graph.lambda_output(lambda))
    }

    fn convert_agg_node(&mut self, ctx: &FnCtx, id: AggId) -> MidendResult<()> {
        match ctx.tree.kind(id) {
            AggKind::Entry(args) => self.convert_entry(ctx, id, args),
            AggKind::Exit(results) => self.convert_exit(ctx, results),
            AggKind::Block(tacs) => {
                for tac in tacs {
                    self.convert_tac(ctx.vars, tac)?;
                }
                Ok(())
            }
            AggKind::Linear => self.convert_linear(ctx, id),
            AggKind::Branch => Err(MidendError::MalformedInput(
                "branch construct without a preceding split block".into(),
            )),
            AggKind::Loop => self.convert_loop(ctx, id),
        }
    }

    fn convert_entry(&mut self, ctx: &FnCtx, id: AggId, args: &[Variable]) -> MidendResult<()> {
        let lambda = ctx.lambda;
        let params = self.graph.lambda_params(lambda);
        if params.len() != args.len() {
            return Err(MidendError::InvariantViolation(
                "entry arguments do not match the lambda parameters".into(),
            ));
        }

        let sub = self.graph.subregion(lambda, 0);
        self.push_scope(sub);
        for (&arg, &param) in args.iter().zip(&params) {
            self.bind(arg, param);
        }

        // Everything demanded beyond the arguments is either a module symbol
        // captured from the enclosing scope or has no binding at all and
        // becomes an undefined value.
        let demand = ctx.dm[id].top.clone();
        for var in demand {
            let data = &ctx.vars[var];
            match data.kind {
                VarKind::Symbol(node) => match self.parent_symbol(node) {
                    Some(origin) => {
                        let arg = self.graph.lambda_add_ctxvar(lambda, origin);
                        self.bind(var, arg);
                    }
                    None => {
                        return Err(MidendError::InvariantViolation(format!(
                            "symbol {} demanded before it was lowered",
                            self.module.node(node).name
                        )))
                    }
                },
                VarKind::Local => {
                    let ty = data.ty.clone();
                    let value = self.make_undef(sub, &ty);
                    self.bind(var, value);
                }
            }
        }
        Ok(())
    }

    fn convert_exit(&mut self, ctx: &FnCtx, results: &[Variable]) -> MidendResult<()> {
        let mut outputs = Vec::with_capacity(results.len());
        for &var in results {
            outputs.push(self.lookup(var)?);
        }
        self.pop_scope();
        self.graph.lambda_finalize(ctx.lambda, &outputs);
        Ok(())
    }

    fn convert_linear(&mut self, ctx: &FnCtx, id: AggId) -> MidendResult<()> {
        let children = ctx.tree.children(id).to_vec();
        for (n, &child) in children.iter().enumerate() {
            if let AggKind::Branch = ctx.tree.kind(child) {
                if n == 0 {
                    return Err(MidendError::MalformedInput(
                        "branch construct without a preceding split block".into(),
                    ));
                }
                let predicate = self.split_predicate(ctx, children[n - 1])?;
                self.convert_branch(ctx, child, predicate)?;
            } else {
                self.convert_agg_node(ctx, child)?;
            }
        }
        Ok(())
    }

    /// The predicate variable of the branch TAC that terminates the split
    /// block preceding a branch or closing a loop body.
    fn split_predicate(&self, ctx: &FnCtx, split: AggId) -> MidendResult<Variable> {
        let block = ctx.tree.rightmost_block(split).ok_or_else(|| {
            MidendError::MalformedInput("split construct contains no block".into())
        })?;
        let tacs = match ctx.tree.kind(block) {
            AggKind::Block(tacs) => tacs,
            _ => unreachable!(),
        };
        match tacs.last() {
            Some(tac) if tac.op.is_branch() => Ok(tac.operand(0)),
            _ => Err(MidendError::MalformedInput(
                "split block does not end in a branch".into(),
            )),
        }
    }

    fn convert_branch(&mut self, ctx: &FnCtx, id: AggId, predicate: Variable) -> MidendResult<()> {
        let pred = self.lookup(predicate)?;
        let children = ctx.tree.children(id).to_vec();
        let gamma = self.graph.create_gamma(pred, children.len());
        let ds = &ctx.dm[id];

        // Route the demanded variables into every arm.
        let mut entry_vars: Vec<(Variable, Vec<Output>)> = Vec::new();
        for &var in &ds.top {
            let origin = self.lookup(var)?;
            entry_vars.push((var, self.graph.gamma_add_entry_var(gamma, origin)));
        }

        let mut exits: Vec<Vec<Output>> = vec![Vec::new(); ds.bottom.len()];
        for (n, &child) in children.iter().enumerate() {
            let sub = self.graph.subregion(gamma, n);
            self.push_scope(sub);
            for (var, args) in &entry_vars {
                self.bind(*var, args[n]);
            }
            self.convert_agg_node(ctx, child)?;
            for (slot, &var) in ds.bottom.iter().enumerate() {
                exits[slot].push(self.lookup(var)?);
            }
            self.pop_scope();
        }

        for (slot, &var) in ds.bottom.iter().enumerate() {
            let output = self.graph.gamma_add_exit_var(gamma, &exits[slot]);
            self.bind(var, output);
        }
        Ok(())
    }

    fn convert_loop(&mut self, ctx: &FnCtx, id: AggId) -> MidendResult<()> {
        let theta = self.graph.create_theta(self.region());
        let sub = self.graph.subregion(theta, 0);
        let ds = ctx.dm[id].clone();
        debug_assert_eq!(ds.top, ds.bottom);

        self.push_scope(sub);
        for &var in &ds.top {
            let init = match self.parent_lookup(var) {
                Some(init) => init,
                None => {
                    // Not yet live on entry: the loop may assign it on a
                    // later iteration, so seed it undefined.
                    let region = self.scopes[self.scopes.len() - 2].region;
                    let ty = ctx.vars[var].ty.clone();
                    let value = self.make_undef(region, &ty);
                    self.parent_bind(var, value);
                    value
                }
            };
            let arg = self.graph.theta_add_loop_var(theta, init);
            self.bind(var, arg);
        }

        let body = ctx.tree.children(id)[0];
        self.convert_agg_node(ctx, body)?;

        let mut finals = Vec::with_capacity(ds.top.len());
        for &var in &ds.top {
            finals.push(self.lookup(var)?);
        }
        let predicate_var = self.split_predicate(ctx, body)?;
        let predicate = self.lookup(predicate_var)?;
        let outputs = self.graph.theta_finalize(theta, predicate, &finals);
        self.pop_scope();

        for (&var, &output) in ds.bottom.iter().zip(&outputs) {
            self.bind(var, output);
        }
        Ok(())
    }

    /* TAC folding */

    fn convert_tac(
        &mut self,
        vars: &PrimaryMap<Variable, VariableData>,
        tac: &Tac,
    ) -> MidendResult<()> {
        match &tac.op {
            Operation::Assign { .. } => {
                let value = self.lookup(tac.operand(0))?;
                self.bind(tac.result(0), value);
                Ok(())
            }
            Operation::Select { .. } => self.convert_select(tac),
            Operation::Branch { .. } => Ok(()),
            Operation::Phi { .. } => Err(MidendError::InvariantViolation(
                "phi TAC survived SSA destruction".into(),
            )),
            _ => {
                let region = self.region();
                let mut operands = Vec::with_capacity(tac.operands.len());
                for &operand in &tac.operands {
                    operands.push(self.lookup(operand)?);
                }
                let node = self.graph.add_simple(region, tac.op.clone(), &operands);
                for (n, &result) in tac.results.iter().enumerate() {
                    debug_assert_eq!(*self.graph.output_type(self.graph.output(node, n)), vars[result].ty);
                    self.bind(result, self.graph.output(node, n));
                }
                Ok(())
            }
        }
    }

    /// `select` lowers to a 1-of-2 match feeding a two-way gamma: arm 0
    /// yields the false value, arm 1 the true value.
    fn convert_select(&mut self, tac: &Tac) -> MidendResult<()> {
        let region = self.region();
        let chooser = self.lookup(tac.operand(0))?;
        let on_true = self.lookup(tac.operand(1))?;
        let on_false = self.lookup(tac.operand(2))?;

        let matcher = self.graph.add_simple(
            region,
            Operation::Match {
                nbits: 1,
                mapping: vec![(1, 1)],
                default_alternative: 0,
                nalternatives: 2,
            },
            &[chooser],
        );
        let predicate = self.graph.output(matcher, 0);
        let gamma = self.graph.create_gamma(predicate, 2);
        let false_args = self.graph.gamma_add_entry_var(gamma, on_false);
        let true_args = self.graph.gamma_add_entry_var(gamma, on_true);
        let output = self
            .graph
            .gamma_add_exit_var(gamma, &[false_args[0], true_args[1]]);
        self.bind(tac.result(0), output);
        Ok(())
    }

    /* data */

    fn convert_data(
        &mut self,
        node: IpNode,
        ty: Type,
        constant: bool,
        init: DataInit,
    ) -> MidendResult<Output> {
        let data = self.module.node(node);
        log::debug!("converting datum {}", data.name);

        let delta = self
            .graph
            .create_delta(self.region(), &data.name, ty, constant, data.linkage);
        self.push_scope(self.graph.subregion(delta, 0));

        // Dependencies enter the initializer as context variables.
        let mut dep_args: FxHashMap<IpNode, Output> = FxHashMap::default();
        for &dep in &data.deps {
            let origin = self.parent_symbol(dep).ok_or_else(|| {
                MidendError::InvariantViolation(format!(
                    "dependency {} lowered out of order",
                    self.module.node(dep).name
                ))
            })?;
            let arg = self.graph.delta_add_dep(delta, origin);
            dep_args.insert(dep, arg);
        }
        for (var, vdata) in init.vars.iter() {
            if let VarKind::Symbol(dep) = vdata.kind {
                let arg = dep_args.get(&dep).copied().ok_or_else(|| {
                    MidendError::MalformedInput(format!(
                        "initializer references {} without a dependency edge",
                        self.module.node(dep).name
                    ))
                })?;
                self.bind(var, arg);
            }
        }

        for tac in &init.tacs {
            self.convert_tac(&init.vars, tac)?;
        }
        let value = self.lookup(init.value)?;
        self.pop_scope();
        self.graph.delta_finalize(delta, value);
        Ok(self.graph.delta_output(delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rvsdg::{ArgKind, NodeKind, OutputData};
    use target_lexicon::Triple;

    fn new_module() -> IpModule {
        IpModule::new("test.ll", Triple::unknown(), "e-m:e-i64:64")
    }

    fn unary_sig() -> FunctionType {
        FunctionType::new(
            vec![Type::Bits(32), Type::Memory],
            vec![Type::Bits(32), Type::Memory],
        )
    }

    fn opaque(name: &str, params: Vec<Type>, results: Vec<Type>) -> Operation {
        Operation::Opaque(crate::ir::OpaqueOp {
            name: name.into(),
            params,
            results,
        })
    }

    /// f(x, m) = (x + x, m), straight-line.
    #[test]
    fn straight_line_function() {
        let mut module = new_module();
        let mut cfg = Cfg::new();
        let x = cfg.make_var(Some("x"), Type::Bits(32));
        let m = cfg.make_var(Some("m"), Type::Memory);
        let y = cfg.make_var(Some("y"), Type::Bits(32));
        cfg.add_argument(x);
        cfg.add_argument(m);
        cfg.set_results(vec![y, m]);
        let body = cfg.make_block();
        cfg.set_succs(cfg.entry(), &[body]);
        cfg.set_succs(body, &[cfg.exit()]);
        cfg.push_tac(
            body,
            Tac::new(
                opaque("add", vec![Type::Bits(32), Type::Bits(32)], vec![Type::Bits(32)]),
                &[x, x],
                &[y],
            ),
        );
        module.add_function("f", Linkage::Export, unary_sig(), Some(cfg));

        let rm = construct_region_graph(module).unwrap();
        let graph = &rm.graph;
        assert!(graph.nnodes(graph.root()) > 0);
        assert_eq!(graph.exports().len(), 1);

        let lambda = graph.region_nodes(graph.root())[0];
        assert!(matches!(graph.kind(lambda), NodeKind::Lambda { .. }));
        graph.lambda_memstate_argument(lambda).unwrap();
        graph.lambda_memstate_result_index(lambda).unwrap();

        // The add node feeds result 0 of the body.
        let sub = graph.subregion(lambda, 0);
        let result = graph.results(sub)[0];
        let producer = graph.producer(result).unwrap();
        assert!(matches!(graph.kind(producer), NodeKind::Simple(_)));
    }

    /// A diamond over the result becomes a gamma with entry and exit
    /// variables.
    #[test]
    fn branch_becomes_gamma() {
        let mut module = new_module();
        let mut cfg = Cfg::new();
        let x = cfg.make_var(Some("x"), Type::Bits(32));
        let m = cfg.make_var(Some("m"), Type::Memory);
        let p = cfg.make_var(Some("p"), Type::Control(2));
        let y = cfg.make_var(Some("y"), Type::Bits(32));
        cfg.add_argument(x);
        cfg.add_argument(m);
        cfg.set_results(vec![y, m]);

        let head = cfg.make_block();
        let left = cfg.make_block();
        let right = cfg.make_block();
        let join = cfg.make_block();
        cfg.set_succs(cfg.entry(), &[head]);
        cfg.set_succs(head, &[left, right]);
        cfg.set_succs(left, &[join]);
        cfg.set_succs(right, &[join]);
        cfg.set_succs(join, &[cfg.exit()]);

        cfg.push_tac(
            head,
            Tac::new(
                Operation::Match {
                    nbits: 32,
                    mapping: vec![(0, 0)],
                    default_alternative: 1,
                    nalternatives: 2,
                },
                &[x],
                &[p],
            ),
        );
        cfg.push_tac(
            head,
            Tac::new(Operation::Branch { nalternatives: 2 }, &[p], &[]),
        );
        cfg.push_tac(
            left,
            Tac::new(opaque("one", vec![], vec![Type::Bits(32)]), &[], &[y]),
        );
        cfg.push_tac(
            right,
            Tac::new(
                opaque("neg", vec![Type::Bits(32)], vec![Type::Bits(32)]),
                &[x],
                &[y],
            ),
        );
        module.add_function("f", Linkage::Export, unary_sig(), Some(cfg));

        let rm = construct_region_graph(module).unwrap();
        let graph = &rm.graph;
        let lambda = graph.region_nodes(graph.root())[0];
        let sub = graph.subregion(lambda, 0);
        let gamma = graph
            .region_nodes(sub)
            .iter()
            .copied()
            .find(|&n| matches!(graph.kind(n), NodeKind::Gamma))
            .expect("no gamma");
        assert_eq!(graph.subregions(gamma).len(), 2);
        // Both y and the memory state flow out of the gamma: each arm
        // contributes one result per exit variable.
        assert_eq!(graph.results(graph.subregion(gamma, 0)).len(), 2);
        assert_eq!(graph.results(graph.subregion(gamma, 1)).len(), 2);
        assert_eq!(graph.outputs(gamma).len(), 2);
    }

    /// `select` lowers to a 1-of-2 match feeding a two-way gamma.
    #[test]
    fn select_becomes_match_and_gamma() {
        let mut module = new_module();
        let mut cfg = Cfg::new();
        let p = cfg.make_var(Some("p"), Type::Bits(1));
        let a = cfg.make_var(Some("a"), Type::Bits(32));
        let b = cfg.make_var(Some("b"), Type::Bits(32));
        let m = cfg.make_var(Some("m"), Type::Memory);
        let y = cfg.make_var(Some("y"), Type::Bits(32));
        cfg.add_argument(p);
        cfg.add_argument(a);
        cfg.add_argument(b);
        cfg.add_argument(m);
        cfg.set_results(vec![y, m]);
        let body = cfg.make_block();
        cfg.set_succs(cfg.entry(), &[body]);
        cfg.set_succs(body, &[cfg.exit()]);
        cfg.push_tac(
            body,
            Tac::new(
                Operation::Select { ty: Type::Bits(32) },
                &[p, a, b],
                &[y],
            ),
        );
        let sig = FunctionType::new(
            vec![Type::Bits(1), Type::Bits(32), Type::Bits(32), Type::Memory],
            vec![Type::Bits(32), Type::Memory],
        );
        module.add_function("f", Linkage::Export, sig, Some(cfg));

        let rm = construct_region_graph(module).unwrap();
        let graph = &rm.graph;
        let lambda = graph.region_nodes(graph.root())[0];
        let sub = graph.subregion(lambda, 0);
        let gamma = graph
            .region_nodes(sub)
            .iter()
            .copied()
            .find(|&n| matches!(graph.kind(n), NodeKind::Gamma))
            .expect("no gamma");
        let matcher = graph.producer(graph.gamma_predicate(gamma)).unwrap();
        assert!(matches!(
            graph.kind(matcher),
            NodeKind::Simple(Operation::Match { .. })
        ));
        assert_eq!(graph.gamma_nentry_vars(gamma), 2);
        // The function result comes out of the gamma.
        let result = graph.results(sub)[0];
        assert_eq!(graph.producer(result), Some(gamma));
    }

    /// A counting loop becomes a theta whose predicate is body result 0.
    #[test]
    fn loop_becomes_theta() {
        let mut module = new_module();
        let mut cfg = Cfg::new();
        let i = cfg.make_var(Some("i"), Type::Bits(32));
        let m = cfg.make_var(Some("m"), Type::Memory);
        let r = cfg.make_var(Some("r"), Type::Control(2));
        cfg.add_argument(i);
        cfg.add_argument(m);
        cfg.set_results(vec![i, m]);

        let body = cfg.make_block();
        let after = cfg.make_block();
        cfg.set_succs(cfg.entry(), &[body]);
        cfg.set_succs(body, &[after, body]);
        cfg.set_succs(after, &[cfg.exit()]);
        cfg.push_tac(
            body,
            Tac::new(
                opaque("dec", vec![Type::Bits(32)], vec![Type::Bits(32)]),
                &[i],
                &[i],
            ),
        );
        cfg.push_tac(
            body,
            Tac::new(
                Operation::Match {
                    nbits: 32,
                    mapping: vec![(0, 0)],
                    default_alternative: 1,
                    nalternatives: 2,
                },
                &[i],
                &[r],
            ),
        );
        cfg.push_tac(
            body,
            Tac::new(Operation::Branch { nalternatives: 2 }, &[r], &[]),
        );
        module.add_function("f", Linkage::Export, unary_sig(), Some(cfg));

        let rm = construct_region_graph(module).unwrap();
        let graph = &rm.graph;
        let lambda = graph.region_nodes(graph.root())[0];
        let sub = graph.subregion(lambda, 0);
        let theta = graph
            .region_nodes(sub)
            .iter()
            .copied()
            .find(|&n| matches!(graph.kind(n), NodeKind::Theta))
            .expect("no theta");
        let body_region = graph.subregion(theta, 0);
        // Result 0 is the control predicate.
        let predicate = graph.results(body_region)[0];
        assert_eq!(*graph.output_type(predicate), Type::Control(2));
        // i is a loop variable.
        assert!(graph.theta_nloop_vars(theta) >= 1);
    }

    /// Calling a previously lowered function pulls it in as a context
    /// variable; a recursive function lowers inside a phi.
    #[test]
    fn calls_and_recursion() {
        let mut module = new_module();
        let sig = unary_sig();
        let fn_ptr_ty = Type::pointer(Type::Function(sig.clone()));

        // callee(x, m) = (x, m)
        let mut callee_cfg = Cfg::new();
        {
            let x = callee_cfg.make_var(Some("x"), Type::Bits(32));
            let m = callee_cfg.make_var(Some("m"), Type::Memory);
            callee_cfg.add_argument(x);
            callee_cfg.add_argument(m);
            callee_cfg.set_results(vec![x, m]);
            cfg_linear_noop(&mut callee_cfg);
        }
        let callee = module.add_function("callee", Linkage::Internal, sig.clone(), Some(callee_cfg));

        // caller(x, m) = callee(x, m)
        let mut caller_cfg = Cfg::new();
        {
            let x = caller_cfg.make_var(Some("x"), Type::Bits(32));
            let m = caller_cfg.make_var(Some("m"), Type::Memory);
            let y = caller_cfg.make_var(Some("y"), Type::Bits(32));
            let f = caller_cfg.make_symbol_var(callee, "callee", fn_ptr_ty.clone());
            caller_cfg.add_argument(x);
            caller_cfg.add_argument(m);
            caller_cfg.set_results(vec![y, m]);
            let body = caller_cfg.make_block();
            caller_cfg.set_succs(caller_cfg.entry(), &[body]);
            caller_cfg.set_succs(body, &[caller_cfg.exit()]);
            caller_cfg.push_tac(
                body,
                Tac::new(Operation::Call { sig: sig.clone() }, &[f, x, m], &[y, m]),
            );
        }
        let caller = module.add_function("caller", Linkage::Export, sig.clone(), Some(caller_cfg));
        module.add_dep(caller, callee);

        // rec(x, m) = rec(x, m), self-recursive.
        let mut rec_cfg = Cfg::new();
        let rec = {
            let x = rec_cfg.make_var(Some("x"), Type::Bits(32));
            let m = rec_cfg.make_var(Some("m"), Type::Memory);
            let y = rec_cfg.make_var(Some("y"), Type::Bits(32));
            rec_cfg.add_argument(x);
            rec_cfg.add_argument(m);
            rec_cfg.set_results(vec![y, m]);
            let rec = module.add_function("rec", Linkage::Export, sig.clone(), None);
            let f = rec_cfg.make_symbol_var(rec, "rec", fn_ptr_ty.clone());
            let body = rec_cfg.make_block();
            rec_cfg.set_succs(rec_cfg.entry(), &[body]);
            rec_cfg.set_succs(body, &[rec_cfg.exit()]);
            rec_cfg.push_tac(
                body,
                Tac::new(Operation::Call { sig: sig.clone() }, &[f, x, m], &[y, m]),
            );
            rec
        };
        match &mut module.node_mut(rec).kind {
            IpNodeKind::Function { cfg, .. } => *cfg = Some(rec_cfg),
            _ => unreachable!(),
        }
        module.add_dep(rec, rec);

        let rm = construct_region_graph(module).unwrap();
        let graph = &rm.graph;

        // The caller captures the callee through a context variable.
        let caller_lambda = graph
            .region_nodes(graph.root())
            .iter()
            .copied()
            .find(|&n| matches!(graph.kind(n), NodeKind::Lambda { name, .. } if name == "caller"))
            .expect("no caller");
        assert_eq!(graph.inputs(caller_lambda).len(), 1);
        let ctx_origin = graph.inputs(caller_lambda)[0];
        let callee_lambda = graph.producer(ctx_origin).expect("context origin");
        assert!(matches!(graph.kind(callee_lambda), NodeKind::Lambda { name, .. } if name == "callee"));

        // The recursive function sits inside a phi; its body calls through
        // the recursion argument.
        let phi = graph
            .region_nodes(graph.root())
            .iter()
            .copied()
            .find(|&n| matches!(graph.kind(n), NodeKind::Phi))
            .expect("no phi");
        let phi_sub = graph.subregion(phi, 0);
        assert_eq!(graph.arguments(phi_sub).len(), 1);
        let rec_lambda = graph
            .region_nodes(phi_sub)
            .iter()
            .copied()
            .find(|&n| matches!(graph.kind(n), NodeKind::Lambda { .. }))
            .expect("no recursive lambda");
        let rec_ctx = graph.inputs(rec_lambda)[0];
        match graph.output_data(rec_ctx) {
            OutputData::RegionArg { kind, .. } => assert_eq!(*kind, ArgKind::Recursion),
            _ => panic!("recursion must be captured from the phi argument"),
        }
        // The phi output is exported under the function's name.
        assert!(rm
            .graph
            .exports()
            .iter()
            .any(|(output, name)| name == "rec" && rm.graph.producer(*output) == Some(phi)));
    }

    /// An initialized global lowers to a delta; an external function to an
    /// import.
    #[test]
    fn data_and_imports() {
        let mut module = new_module();

        let mut init_vars: PrimaryMap<Variable, VariableData> = PrimaryMap::new();
        let value = init_vars.push(VariableData {
            name: None,
            ty: Type::Bits(32),
            kind: VarKind::Local,
        });
        let init = DataInit {
            vars: init_vars,
            tacs: vec![Tac::new(
                Operation::BitConstant {
                    width: 32,
                    value: 7,
                },
                &[],
                &[value],
            )],
            value,
        };
        module.add_data("g", Linkage::Export, Type::Bits(32), false, Some(init));
        module.add_function("ext", Linkage::Internal, unary_sig(), None);

        let rm = construct_region_graph(module).unwrap();
        let graph = &rm.graph;
        let delta = graph
            .region_nodes(graph.root())
            .iter()
            .copied()
            .find(|&n| matches!(graph.kind(n), NodeKind::Delta { .. }))
            .expect("no delta");
        assert_eq!(
            *graph.output_type(graph.delta_output(delta)),
            Type::pointer(Type::Bits(32))
        );
        let sub = graph.subregion(delta, 0);
        assert_eq!(graph.results(sub).len(), 1);

        // The external function became a root import.
        assert!(graph.arguments(graph.root()).iter().any(|&arg| matches!(
            graph.output_data(arg),
            OutputData::RegionArg {
                kind: ArgKind::Import { name },
                ..
            } if name == "ext"
        )));
    }

    fn cfg_linear_noop(cfg: &mut Cfg) {
        let body = cfg.make_block();
        cfg.set_succs(cfg.entry(), &[body]);
        cfg.set_succs(body, &[cfg.exit()]);
    }
}
