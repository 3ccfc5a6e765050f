//! The region graph: a regionalized value-state dependence graph (RVSDG).
//!
//! Control flow is encoded as dataflow through *structural* nodes, each
//! owning one or more nested regions:
//!
//! * `Lambda`: a function; its region computes the function results from
//!   the function parameters and captured context variables.
//! * `Gamma`: an n-way conditional driven by a control predicate; entry
//!   variables route values in, every subregion produces one result per exit
//!   variable.
//! * `Theta`: a tail-controlled loop; loop variables flow from argument to
//!   result and back, and result 0 of the body is the two-way control
//!   predicate deciding repetition.
//! * `Phi`: a mutually recursive binding group; recursion variables let the
//!   member definitions refer to each other.
//! * `Delta`: a global datum with an initializer region.
//!
//! Everything else is a `Simple` node applying one [`Operation`] to value
//! inputs.
//!
//! The graph owns regions, nodes, and value outputs as arena entities;
//! cross-references are `u32` handles, so back edges (theta and phi) need no
//! reference counting. Edges are stored forward only: a consumer (node input
//! or region result) names its origin output. The users of an output are
//! recovered by scanning its region, which keeps rewrites like
//! [`Graph::divert_users`] a single-source-of-truth affair.

use cranelift_entity::{entity_impl, PrimaryMap};

use crate::fx::FxHashSet;
use crate::ir::{FunctionType, Linkage, Operation, Type};
use crate::result::{MidendError, MidendResult};

/// An opaque reference to a node of a [`Graph`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node(u32);
entity_impl!(Node, "node");

/// An opaque reference to a region of a [`Graph`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Region(u32);
entity_impl!(Region, "region");

/// An opaque reference to a value output: a node result or a region
/// argument.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Output(u32);
entity_impl!(Output, "o");

/// What kind of region argument an output is.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ArgKind {
    /// A function parameter of a lambda subregion.
    Param,
    /// A context variable of a lambda, delta, or phi, mapped through from an
    /// input of the structural node.
    Context,
    /// A gamma entry variable.
    Entry,
    /// A theta loop variable.
    Loop,
    /// A phi recursion variable.
    Recursion,
    /// An import at the root region.
    Import {
        /// Symbol name of the import.
        name: String,
    },
}

/// The defining site and type of an output.
#[derive(Clone, Debug)]
pub enum OutputData {
    /// Result `index` of `node`.
    NodeResult {
        /// The producing node.
        node: Node,
        /// Result position.
        index: usize,
        /// Value type.
        ty: Type,
    },
    /// Argument `index` of `region`.
    RegionArg {
        /// The region owning the argument.
        region: Region,
        /// Argument position.
        index: usize,
        /// Value type.
        ty: Type,
        /// What the argument stands for.
        kind: ArgKind,
    },
}

/// The payload of a node.
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// A primitive operation on value inputs.
    Simple(Operation),
    /// An n-way conditional. Input 0 is the predicate; the remaining inputs
    /// are entry variable origins.
    Gamma,
    /// A tail-controlled loop. Inputs are loop variable initializers.
    Theta,
    /// A function.
    Lambda {
        /// Symbol name.
        name: String,
        /// The signature, memory state included.
        sig: FunctionType,
        /// Symbol linkage.
        linkage: Linkage,
    },
    /// A global datum.
    Delta {
        /// Symbol name.
        name: String,
        /// Type of the datum.
        ty: Type,
        /// Whether the datum is read-only.
        constant: bool,
        /// Symbol linkage.
        linkage: Linkage,
    },
    /// A mutually recursive binding group.
    Phi,
}

/// A node: its kind, parent region, input origins, outputs, and subregions.
#[derive(Clone)]
pub struct NodeData {
    /// The payload.
    pub kind: NodeKind,
    region: Region,
    inputs: Vec<Output>,
    outputs: Vec<Output>,
    subregions: Vec<Region>,
}

/// A region: ordered arguments, nodes, and results.
#[derive(Clone, Default)]
pub struct RegionData {
    owner: Option<Node>,
    arguments: Vec<Output>,
    nodes: Vec<Node>,
    results: Vec<Output>,
}

/// The region graph.
pub struct Graph {
    nodes: PrimaryMap<Node, NodeData>,
    regions: PrimaryMap<Region, RegionData>,
    outputs: PrimaryMap<Output, OutputData>,
    root: Region,
    exports: Vec<(Output, String)>,
}

/// A region-graph module: the graph plus the translation-unit facts echoed
/// through from the input module.
pub struct RvsdgModule {
    /// Name of the translation unit.
    pub name: String,
    /// Target triple.
    pub triple: target_lexicon::Triple,
    /// Data layout string.
    pub data_layout: String,
    /// The graph.
    pub graph: Graph,
}

impl Graph {
    /// Create an empty graph with a root region.
    pub fn new() -> Self {
        let mut regions = PrimaryMap::new();
        let root = regions.push(RegionData::default());
        Self {
            nodes: PrimaryMap::new(),
            regions,
            outputs: PrimaryMap::new(),
            root,
            exports: Vec::new(),
        }
    }

    /// The root region.
    pub fn root(&self) -> Region {
        self.root
    }

    /// The data of `node`.
    pub fn node(&self, node: Node) -> &NodeData {
        &self.nodes[node]
    }

    /// The kind of `node`.
    pub fn kind(&self, node: Node) -> &NodeKind {
        &self.nodes[node].kind
    }

    /// The region containing `node`.
    pub fn node_region(&self, node: Node) -> Region {
        self.nodes[node].region
    }

    /// The input origins of `node`.
    pub fn inputs(&self, node: Node) -> &[Output] {
        &self.nodes[node].inputs
    }

    /// The outputs of `node`.
    pub fn outputs(&self, node: Node) -> &[Output] {
        &self.nodes[node].outputs
    }

    /// Output `index` of `node`.
    pub fn output(&self, node: Node, index: usize) -> Output {
        self.nodes[node].outputs[index]
    }

    /// The subregions of `node`.
    pub fn subregions(&self, node: Node) -> &[Region] {
        &self.nodes[node].subregions
    }

    /// Subregion `index` of `node`.
    pub fn subregion(&self, node: Node, index: usize) -> Region {
        self.nodes[node].subregions[index]
    }

    /// The structural node owning `region`, or `None` for the root.
    pub fn region_owner(&self, region: Region) -> Option<Node> {
        self.regions[region].owner
    }

    /// The arguments of `region`.
    pub fn arguments(&self, region: Region) -> &[Output] {
        &self.regions[region].arguments
    }

    /// The nodes of `region`, in creation order.
    pub fn region_nodes(&self, region: Region) -> &[Node] {
        &self.regions[region].nodes
    }

    /// The result origins of `region`.
    pub fn results(&self, region: Region) -> &[Output] {
        &self.regions[region].results
    }

    /// The defining site of `output`.
    pub fn output_data(&self, output: Output) -> &OutputData {
        &self.outputs[output]
    }

    /// The type of `output`.
    pub fn output_type(&self, output: Output) -> &Type {
        match &self.outputs[output] {
            OutputData::NodeResult { ty, .. } | OutputData::RegionArg { ty, .. } => ty,
        }
    }

    /// The region an `output` is usable in: the region of its producing node
    /// or the region it is an argument of.
    pub fn output_region(&self, output: Output) -> Region {
        match &self.outputs[output] {
            OutputData::NodeResult { node, .. } => self.nodes[*node].region,
            OutputData::RegionArg { region, .. } => *region,
        }
    }

    /// The node producing `output`, if it is a node result.
    pub fn producer(&self, output: Output) -> Option<Node> {
        match &self.outputs[output] {
            OutputData::NodeResult { node, .. } => Some(*node),
            OutputData::RegionArg { .. } => None,
        }
    }

    /// For a context, entry, or loop argument, the origin feeding it from
    /// the outer region.
    pub fn argument_origin(&self, output: Output) -> Option<Output> {
        let (region, index, kind) = match &self.outputs[output] {
            OutputData::RegionArg {
                region,
                index,
                kind,
                ..
            } => (*region, *index, kind),
            OutputData::NodeResult { .. } => return None,
        };
        let owner = self.regions[region].owner?;
        let data = &self.nodes[owner];
        match (kind, &data.kind) {
            (ArgKind::Entry, NodeKind::Gamma) => Some(data.inputs[1 + index]),
            (ArgKind::Loop, NodeKind::Theta) => Some(data.inputs[index]),
            (ArgKind::Context, NodeKind::Lambda { sig, .. }) => {
                Some(data.inputs[index - sig.params.len()])
            }
            (ArgKind::Context, NodeKind::Delta { .. }) => Some(data.inputs[index]),
            (ArgKind::Context, NodeKind::Phi) => {
                let nrec = data.outputs.len();
                Some(data.inputs[index - nrec])
            }
            _ => None,
        }
    }

    fn new_region(&mut self, owner: Node) -> Region {
        let region = self.regions.push(RegionData::default());
        self.regions[region].owner = Some(owner);
        region
    }

    fn new_argument(&mut self, region: Region, ty: Type, kind: ArgKind) -> Output {
        let index = self.regions[region].arguments.len();
        let output = self.outputs.push(OutputData::RegionArg {
            region,
            index,
            ty,
            kind,
        });
        self.regions[region].arguments.push(output);
        output
    }

    fn new_node(&mut self, region: Region, kind: NodeKind, inputs: Vec<Output>) -> Node {
        if cfg!(debug_assertions) {
            for &input in &inputs {
                debug_assert_eq!(self.output_region(input), region, "input crosses regions");
            }
        }
        let node = self.nodes.push(NodeData {
            kind,
            region,
            inputs,
            outputs: Vec::new(),
            subregions: Vec::new(),
        });
        self.regions[region].nodes.push(node);
        node
    }

    fn new_result(&mut self, node: Node, ty: Type) -> Output {
        let index = self.nodes[node].outputs.len();
        let output = self.outputs.push(OutputData::NodeResult { node, index, ty });
        self.nodes[node].outputs.push(output);
        output
    }

    /// Add an import of `ty` to the root region.
    pub fn add_import(&mut self, ty: Type, name: &str) -> Output {
        let root = self.root;
        self.new_argument(
            root,
            ty,
            ArgKind::Import {
                name: name.to_owned(),
            },
        )
    }

    /// Export `output` under `name`.
    pub fn add_export(&mut self, output: Output, name: &str) {
        debug_assert_eq!(self.output_region(output), self.root);
        self.exports.push((output, name.to_owned()));
    }

    /// The graph exports.
    pub fn exports(&self) -> &[(Output, String)] {
        &self.exports
    }

    /// Create a simple node applying `op` to `operands`.
    pub fn add_simple(&mut self, region: Region, op: Operation, operands: &[Output]) -> Node {
        debug_assert_eq!(operands.len(), op.noperands());
        if cfg!(debug_assertions) {
            for (n, &operand) in operands.iter().enumerate() {
                debug_assert_eq!(
                    *self.output_type(operand),
                    op.operand_type(n),
                    "operand {} of {} has the wrong type",
                    n,
                    op.debug_string()
                );
            }
        }
        let nresults = op.nresults();
        let node = self.new_node(region, NodeKind::Simple(op), operands.to_vec());
        for n in 0..nresults {
            let ty = match &self.nodes[node].kind {
                NodeKind::Simple(op) => op.result_type(n),
                _ => unreachable!(),
            };
            self.new_result(node, ty);
        }
        node
    }

    /* gamma */

    /// Create an n-way conditional driven by `predicate`.
    pub fn create_gamma(&mut self, predicate: Output, nsubregions: usize) -> Node {
        debug_assert!(nsubregions >= 2);
        debug_assert!(self.output_type(predicate).is_control());
        let region = self.output_region(predicate);
        let node = self.new_node(region, NodeKind::Gamma, vec![predicate]);
        for _ in 0..nsubregions {
            let sub = self.new_region(node);
            self.nodes[node].subregions.push(sub);
        }
        node
    }

    /// The predicate origin of a gamma.
    pub fn gamma_predicate(&self, gamma: Node) -> Output {
        self.nodes[gamma].inputs[0]
    }

    /// Route `origin` into every subregion of `gamma`; returns the per-arm
    /// arguments.
    pub fn gamma_add_entry_var(&mut self, gamma: Node, origin: Output) -> Vec<Output> {
        let ty = self.output_type(origin).clone();
        self.nodes[gamma].inputs.push(origin);
        let subregions = self.nodes[gamma].subregions.clone();
        subregions
            .into_iter()
            .map(|sub| self.new_argument(sub, ty.clone(), ArgKind::Entry))
            .collect()
    }

    /// Combine one result per arm into a gamma output.
    pub fn gamma_add_exit_var(&mut self, gamma: Node, origins: &[Output]) -> Output {
        let subregions = self.nodes[gamma].subregions.clone();
        debug_assert_eq!(origins.len(), subregions.len());
        let ty = self.output_type(origins[0]).clone();
        for (sub, &origin) in subregions.iter().zip(origins) {
            debug_assert_eq!(self.output_region(origin), *sub);
            debug_assert_eq!(*self.output_type(origin), ty);
            self.regions[*sub].results.push(origin);
        }
        self.new_result(gamma, ty)
    }

    /// Number of entry variables of a gamma.
    pub fn gamma_nentry_vars(&self, gamma: Node) -> usize {
        self.nodes[gamma].inputs.len() - 1
    }

    /// The outer origin of entry variable `n`.
    pub fn gamma_entry_origin(&self, gamma: Node, n: usize) -> Output {
        self.nodes[gamma].inputs[1 + n]
    }

    /* theta */

    /// Create a tail-controlled loop in `region`.
    pub fn create_theta(&mut self, region: Region) -> Node {
        let node = self.new_node(region, NodeKind::Theta, vec![]);
        let sub = self.new_region(node);
        self.nodes[node].subregions.push(sub);
        node
    }

    /// Add a loop variable initialized with `init`; returns the body
    /// argument.
    pub fn theta_add_loop_var(&mut self, theta: Node, init: Output) -> Output {
        let ty = self.output_type(init).clone();
        self.nodes[theta].inputs.push(init);
        let sub = self.nodes[theta].subregions[0];
        self.new_argument(sub, ty, ArgKind::Loop)
    }

    /// Close the loop: `predicate` becomes body result 0 (repeat on
    /// alternative 1), `finals` the per-loop-variable results. Returns the
    /// loop variable outputs.
    pub fn theta_finalize(
        &mut self,
        theta: Node,
        predicate: Output,
        finals: &[Output],
    ) -> Vec<Output> {
        let sub = self.nodes[theta].subregions[0];
        debug_assert_eq!(self.output_region(predicate), sub);
        debug_assert_eq!(*self.output_type(predicate), Type::Control(2));
        debug_assert_eq!(finals.len(), self.nodes[theta].inputs.len());
        debug_assert!(self.regions[sub].results.is_empty());
        self.regions[sub].results.push(predicate);
        self.regions[sub].results.extend_from_slice(finals);
        let types: Vec<Type> = finals.iter().map(|&o| self.output_type(o).clone()).collect();
        types
            .into_iter()
            .map(|ty| self.new_result(theta, ty))
            .collect()
    }

    /// The body argument of loop variable `n`.
    pub fn theta_loop_arg(&self, theta: Node, n: usize) -> Output {
        let sub = self.nodes[theta].subregions[0];
        self.regions[sub].arguments[n]
    }

    /// Number of loop variables.
    pub fn theta_nloop_vars(&self, theta: Node) -> usize {
        self.nodes[theta].inputs.len()
    }

    /* lambda */

    /// Create a function node; its subregion gets one parameter argument per
    /// signature parameter.
    pub fn create_lambda(
        &mut self,
        region: Region,
        name: &str,
        sig: FunctionType,
        linkage: Linkage,
    ) -> Node {
        let output_ty = Type::pointer(Type::Function(sig.clone()));
        let node = self.new_node(
            region,
            NodeKind::Lambda {
                name: name.to_owned(),
                sig: sig.clone(),
                linkage,
            },
            vec![],
        );
        let sub = self.new_region(node);
        self.nodes[node].subregions.push(sub);
        for ty in sig.params {
            self.new_argument(sub, ty, ArgKind::Param);
        }
        self.new_result(node, output_ty);
        node
    }

    /// The parameter arguments of `lambda`.
    pub fn lambda_params(&self, lambda: Node) -> Vec<Output> {
        let sub = self.nodes[lambda].subregions[0];
        self.regions[sub]
            .arguments
            .iter()
            .copied()
            .filter(|&arg| {
                matches!(
                    self.outputs[arg],
                    OutputData::RegionArg {
                        kind: ArgKind::Param,
                        ..
                    }
                )
            })
            .collect()
    }

    /// Capture `origin` as a context variable; returns the body argument.
    pub fn lambda_add_ctxvar(&mut self, lambda: Node, origin: Output) -> Output {
        let ty = self.output_type(origin).clone();
        self.nodes[lambda].inputs.push(origin);
        let sub = self.nodes[lambda].subregions[0];
        self.new_argument(sub, ty, ArgKind::Context)
    }

    /// Close the function body with its results.
    pub fn lambda_finalize(&mut self, lambda: Node, results: &[Output]) {
        let sub = self.nodes[lambda].subregions[0];
        debug_assert!(self.regions[sub].results.is_empty());
        if let NodeKind::Lambda { sig, .. } = &self.nodes[lambda].kind {
            debug_assert_eq!(results.len(), sig.results.len());
        }
        for &result in results {
            debug_assert_eq!(self.output_region(result), sub);
        }
        self.regions[sub].results.extend_from_slice(results);
    }

    /// The function value of `lambda`.
    pub fn lambda_output(&self, lambda: Node) -> Output {
        self.nodes[lambda].outputs[0]
    }

    /// The unique memory-state argument of the lambda body.
    pub fn lambda_memstate_argument(&self, lambda: Node) -> MidendResult<Output> {
        let sub = self.nodes[lambda].subregions[0];
        let mut states = self.regions[sub]
            .arguments
            .iter()
            .copied()
            .filter(|&arg| self.output_type(arg).is_memory());
        match (states.next(), states.next()) {
            (Some(state), None) => Ok(state),
            _ => Err(MidendError::InvariantViolation(
                "lambda must thread exactly one memory state argument".into(),
            )),
        }
    }

    /// The index of the unique memory-state result of the lambda body.
    pub fn lambda_memstate_result_index(&self, lambda: Node) -> MidendResult<usize> {
        let sub = self.nodes[lambda].subregions[0];
        let mut indices = self.regions[sub]
            .results
            .iter()
            .enumerate()
            .filter(|(_, &o)| self.output_type(o).is_memory())
            .map(|(n, _)| n);
        match (indices.next(), indices.next()) {
            (Some(index), None) => Ok(index),
            _ => Err(MidendError::InvariantViolation(
                "lambda must thread exactly one memory state result".into(),
            )),
        }
    }

    /* delta */

    /// Create a global datum node.
    pub fn create_delta(
        &mut self,
        region: Region,
        name: &str,
        ty: Type,
        constant: bool,
        linkage: Linkage,
    ) -> Node {
        let output_ty = Type::pointer(ty.clone());
        let node = self.new_node(
            region,
            NodeKind::Delta {
                name: name.to_owned(),
                ty,
                constant,
                linkage,
            },
            vec![],
        );
        let sub = self.new_region(node);
        self.nodes[node].subregions.push(sub);
        self.new_result(node, output_ty);
        node
    }

    /// Capture `origin` as a dependency of the initializer.
    pub fn delta_add_dep(&mut self, delta: Node, origin: Output) -> Output {
        let ty = self.output_type(origin).clone();
        self.nodes[delta].inputs.push(origin);
        let sub = self.nodes[delta].subregions[0];
        self.new_argument(sub, ty, ArgKind::Context)
    }

    /// Close the initializer with the initial value.
    pub fn delta_finalize(&mut self, delta: Node, value: Output) {
        let sub = self.nodes[delta].subregions[0];
        debug_assert!(self.regions[sub].results.is_empty());
        self.regions[sub].results.push(value);
    }

    /// The address value of `delta`.
    pub fn delta_output(&self, delta: Node) -> Output {
        self.nodes[delta].outputs[0]
    }

    /* phi */

    /// Create a recursion environment in `region`.
    pub fn create_phi(&mut self, region: Region) -> Node {
        let node = self.new_node(region, NodeKind::Phi, vec![]);
        let sub = self.new_region(node);
        self.nodes[node].subregions.push(sub);
        node
    }

    /// Add a recursion variable of type `ty`; returns the body argument the
    /// members reference each other through.
    pub fn phi_add_rec_var(&mut self, phi: Node, ty: Type) -> Output {
        let sub = self.nodes[phi].subregions[0];
        let arg = self.new_argument(sub, ty.clone(), ArgKind::Recursion);
        self.new_result(phi, ty);
        arg
    }

    /// Capture `origin` as a context variable of the environment.
    pub fn phi_add_ctxvar(&mut self, phi: Node, origin: Output) -> Output {
        let ty = self.output_type(origin).clone();
        self.nodes[phi].inputs.push(origin);
        let sub = self.nodes[phi].subregions[0];
        self.new_argument(sub, ty, ArgKind::Context)
    }

    /// Close the environment with one definition per recursion variable.
    pub fn phi_finalize(&mut self, phi: Node, definitions: &[Output]) {
        let sub = self.nodes[phi].subregions[0];
        debug_assert_eq!(definitions.len(), self.nodes[phi].outputs.len());
        debug_assert!(self.regions[sub].results.is_empty());
        self.regions[sub].results.extend_from_slice(definitions);
    }

    /* rewriting */

    /// Replace `origin` of input `index` of `node`.
    pub fn divert_input(&mut self, node: Node, index: usize, new_origin: Output) {
        debug_assert_eq!(
            self.output_region(new_origin),
            self.nodes[node].region
        );
        self.nodes[node].inputs[index] = new_origin;
    }

    /// Replace result `index` of `region`.
    pub fn divert_result(&mut self, region: Region, index: usize, new_origin: Output) {
        debug_assert_eq!(self.output_region(new_origin), region);
        self.regions[region].results[index] = new_origin;
    }

    /// Redirect every user of `old` to `new`. Both must live in the same
    /// region.
    pub fn divert_users(&mut self, old: Output, new: Output) {
        if old == new {
            return;
        }
        let region = self.output_region(old);
        debug_assert_eq!(self.output_region(new), region);
        let nodes = self.regions[region].nodes.clone();
        for node in nodes {
            for input in &mut self.nodes[node].inputs {
                if *input == old {
                    *input = new;
                }
            }
        }
        for result in &mut self.regions[region].results {
            if *result == old {
                *result = new;
            }
        }
        if region == self.root {
            for (output, _) in &mut self.exports {
                if *output == old {
                    *output = new;
                }
            }
        }
    }

    /// Remove `node` from its region. The caller must have made sure nothing
    /// uses its outputs.
    pub fn remove_node(&mut self, node: Node) {
        let region = self.nodes[node].region;
        self.regions[region].nodes.retain(|&n| n != node);
    }

    /// Remove output `index` of `node`, renumbering the later outputs.
    pub(crate) fn remove_node_output(&mut self, node: Node, index: usize) {
        self.nodes[node].outputs.remove(index);
        let outputs = self.nodes[node].outputs.clone();
        for (n, &output) in outputs.iter().enumerate().skip(index) {
            if let OutputData::NodeResult { index, .. } = &mut self.outputs[output] {
                *index = n;
            }
        }
    }

    /// Remove input `index` of `node`.
    pub(crate) fn remove_node_input(&mut self, node: Node, index: usize) {
        self.nodes[node].inputs.remove(index);
    }

    /// Remove result `index` of `region`.
    pub(crate) fn remove_region_result(&mut self, region: Region, index: usize) {
        self.regions[region].results.remove(index);
    }

    /// Remove argument `index` of `region`, renumbering the later arguments.
    pub(crate) fn remove_region_argument(&mut self, region: Region, index: usize) {
        self.regions[region].arguments.remove(index);
        let arguments = self.regions[region].arguments.clone();
        for (n, &argument) in arguments.iter().enumerate().skip(index) {
            if let OutputData::RegionArg { index, .. } = &mut self.outputs[argument] {
                *index = n;
            }
        }
    }

    /// A topological order over the nodes of `region`: every node appears
    /// after the producers of its inputs. Deterministic in node creation
    /// order.
    pub fn topological_order(&self, region: Region) -> Vec<Node> {
        let mut order = Vec::with_capacity(self.regions[region].nodes.len());
        let mut seen = FxHashSet::default();
        for &node in &self.regions[region].nodes {
            self.topo_visit(region, node, &mut seen, &mut order);
        }
        order
    }

    fn topo_visit(
        &self,
        region: Region,
        node: Node,
        seen: &mut FxHashSet<Node>,
        order: &mut Vec<Node>,
    ) {
        if !seen.insert(node) {
            return;
        }
        for &input in &self.nodes[node].inputs {
            if let Some(producer) = self.producer(input) {
                if self.nodes[producer].region == region {
                    self.topo_visit(region, producer, seen, order);
                }
            }
        }
        order.push(node);
    }

    /// Count the nodes of `region`, subregions included.
    pub fn nnodes(&self, region: Region) -> usize {
        let mut count = 0;
        for &node in &self.regions[region].nodes {
            count += 1;
            for &sub in &self.nodes[node].subregions {
                count += self.nnodes(sub);
            }
        }
        count
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
