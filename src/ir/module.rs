//! The inter-procedural module: the set of functions and data a translation
//! unit defines or imports, together with their reference graph.
//!
//! The reference graph drives region-graph construction: strongly connected
//! components are lowered bottom-up, and a non-trivial component becomes a
//! recursion (phi) construct.

use cranelift_entity::PrimaryMap;
use target_lexicon::Triple;

use crate::fx::{FxHashMap, FxHashSet};

use super::cfg::Cfg;
use super::tac::Tac;
use super::types::{FunctionType, Type};
use super::{IpNode, Variable, VariableData};

/// Linkage of a module-level symbol.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Linkage {
    /// Visible outside the module; becomes a graph export.
    Export,
    /// Module-internal.
    Internal,
}

/// The initializer of a datum: a TAC list evaluating to the initial value.
pub struct DataInit {
    /// Variable table for the initializer TACs.
    pub vars: PrimaryMap<Variable, VariableData>,
    /// The initializer computation.
    pub tacs: Vec<Tac>,
    /// The variable holding the initial value.
    pub value: Variable,
}

/// What an [`IpNode`] defines.
pub enum IpNodeKind {
    /// A function. `cfg` is `None` for functions imported from elsewhere.
    Function {
        /// The signature, memory state included.
        sig: FunctionType,
        /// The body, if the module defines one.
        cfg: Option<Cfg>,
    },
    /// A global datum. `init` is `None` for imported data.
    Data {
        /// Type of the datum.
        ty: Type,
        /// Whether the datum is read-only.
        constant: bool,
        /// The initializer, if the module defines one.
        init: Option<DataInit>,
    },
}

/// One function or datum of the module.
pub struct IpNodeData {
    /// Symbol name.
    pub name: String,
    /// Symbol linkage.
    pub linkage: Linkage,
    /// Module-level nodes this node refers to (callees, referenced globals).
    pub deps: Vec<IpNode>,
    /// The definition.
    pub kind: IpNodeKind,
}

impl IpNodeData {
    /// The type of the value that names this node: a pointer to the function
    /// or to the datum.
    pub fn value_type(&self) -> Type {
        match &self.kind {
            IpNodeKind::Function { sig, .. } => Type::pointer(Type::Function(sig.clone())),
            IpNodeKind::Data { ty, .. } => Type::pointer(ty.clone()),
        }
    }
}

/// An inter-procedural module of functions and data.
pub struct IpModule {
    /// Name of the translation unit, used for diagnostics.
    pub name: String,
    /// Target triple, echoed into the region-graph module.
    pub triple: Triple,
    /// Data layout string, echoed into the region-graph module.
    pub data_layout: String,
    nodes: PrimaryMap<IpNode, IpNodeData>,
}

impl IpModule {
    /// Create an empty module.
    pub fn new(name: &str, triple: Triple, data_layout: &str) -> Self {
        Self {
            name: name.to_owned(),
            triple,
            data_layout: data_layout.to_owned(),
            nodes: PrimaryMap::new(),
        }
    }

    /// Add a function node.
    pub fn add_function(
        &mut self,
        name: &str,
        linkage: Linkage,
        sig: FunctionType,
        cfg: Option<Cfg>,
    ) -> IpNode {
        self.nodes.push(IpNodeData {
            name: name.to_owned(),
            linkage,
            deps: Vec::new(),
            kind: IpNodeKind::Function { sig, cfg },
        })
    }

    /// Add a data node.
    pub fn add_data(
        &mut self,
        name: &str,
        linkage: Linkage,
        ty: Type,
        constant: bool,
        init: Option<DataInit>,
    ) -> IpNode {
        self.nodes.push(IpNodeData {
            name: name.to_owned(),
            linkage,
            deps: Vec::new(),
            kind: IpNodeKind::Data { ty, constant, init },
        })
    }

    /// Record that `node` refers to `dep`.
    pub fn add_dep(&mut self, node: IpNode, dep: IpNode) {
        if !self.nodes[node].deps.contains(&dep) {
            self.nodes[node].deps.push(dep);
        }
    }

    /// The data of `node`.
    pub fn node(&self, node: IpNode) -> &IpNodeData {
        &self.nodes[node]
    }

    /// Mutable access to the data of `node`.
    pub fn node_mut(&mut self, node: IpNode) -> &mut IpNodeData {
        &mut self.nodes[node]
    }

    /// Iterate over all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = IpNode> + '_ {
        self.nodes.keys()
    }

    /// Strongly connected components of the reference graph, dependencies
    /// first: a component is emitted after every component it refers to.
    pub fn sccs(&self) -> Vec<Vec<IpNode>> {
        Tarjan::new(self).run()
    }
}

/// Iterative Tarjan SCC computation over the reference graph.
struct Tarjan<'a> {
    module: &'a IpModule,
    index: FxHashMap<IpNode, u32>,
    lowlink: FxHashMap<IpNode, u32>,
    on_stack: FxHashSet<IpNode>,
    stack: Vec<IpNode>,
    next_index: u32,
    sccs: Vec<Vec<IpNode>>,
}

impl<'a> Tarjan<'a> {
    fn new(module: &'a IpModule) -> Self {
        Self {
            module,
            index: FxHashMap::default(),
            lowlink: FxHashMap::default(),
            on_stack: FxHashSet::default(),
            stack: Vec::new(),
            next_index: 0,
            sccs: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Vec<IpNode>> {
        let nodes: Vec<IpNode> = self.module.nodes().collect();
        for node in nodes {
            if !self.index.contains_key(&node) {
                self.visit(node);
            }
        }
        self.sccs
    }

    fn visit(&mut self, root: IpNode) {
        let module = self.module;
        // Work list of (node, next dependency index).
        let mut work = vec![(root, 0usize)];
        while let Some(&mut (node, ref mut dep_idx)) = work.last_mut() {
            if !self.index.contains_key(&node) {
                self.index.insert(node, self.next_index);
                self.lowlink.insert(node, self.next_index);
                self.next_index += 1;
                self.stack.push(node);
                self.on_stack.insert(node);
            }

            let deps = &module.node(node).deps;
            if *dep_idx < deps.len() {
                let dep = deps[*dep_idx];
                *dep_idx += 1;
                match self.index.get(&dep) {
                    None => work.push((dep, 0)),
                    Some(&dep_index) => {
                        if self.on_stack.contains(&dep) {
                            let low = self.lowlink[&node].min(dep_index);
                            self.lowlink.insert(node, low);
                        }
                    }
                }
            } else {
                work.pop();
                let node_low = self.lowlink[&node];
                if let Some(&(parent, _)) = work.last() {
                    let low = self.lowlink[&parent].min(node_low);
                    self.lowlink.insert(parent, low);
                }
                if node_low == self.index[&node] {
                    let mut scc = Vec::new();
                    loop {
                        let member = self.stack.pop().expect("tarjan stack underflow");
                        self.on_stack.remove(&member);
                        scc.push(member);
                        if member == node {
                            break;
                        }
                    }
                    self.sccs.push(scc);
                }
            }
        }
    }
}
