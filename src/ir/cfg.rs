//! The control-flow graph: basic blocks owning ordered TAC lists, connected
//! by ordered successor edges.
//!
//! A block may have more than one outgoing edge only if its last TAC is a
//! `Branch` whose control predicate selects among them; the predicate value
//! `k` takes edge `k`. The graph has a distinguished entry block carrying the
//! function arguments and a distinguished exit block carrying the function
//! results.
//!
//! Passes that shrink the graph (straightening, purging) mark blocks dead
//! rather than removing them from the table, so block handles stay stable.

use cranelift_entity::{PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

use crate::fx::FxHashSet;
use crate::result::{MidendError, MidendResult};

use super::tac::Tac;
use super::types::Type;
use super::{Block, IpNode, VarKind, Variable, VariableData};

/// The contents of a basic block.
#[derive(Clone, Default)]
pub struct BlockData {
    /// The ordered TAC list.
    pub tacs: Vec<Tac>,
    succs: SmallVec<[Block; 2]>,
    dead: bool,
}

/// A control-flow graph of one function.
pub struct Cfg {
    vars: PrimaryMap<Variable, VariableData>,
    blocks: PrimaryMap<Block, BlockData>,
    entry: Block,
    exit: Block,
    arguments: Vec<Variable>,
    results: Vec<Variable>,
}

impl Cfg {
    /// Create an empty graph with fresh entry and exit blocks.
    pub fn new() -> Self {
        let mut blocks = PrimaryMap::new();
        let entry = blocks.push(BlockData::default());
        let exit = blocks.push(BlockData::default());
        Self {
            vars: PrimaryMap::new(),
            blocks,
            entry,
            exit,
            arguments: Vec::new(),
            results: Vec::new(),
        }
    }

    /// The entry block. It has no predecessors.
    pub fn entry(&self) -> Block {
        self.entry
    }

    /// The exit block. It has no successors.
    pub fn exit(&self) -> Block {
        self.exit
    }

    /// Create a local variable.
    pub fn make_var(&mut self, name: Option<&str>, ty: Type) -> Variable {
        self.vars.push(VariableData {
            name: name.map(str::to_owned),
            ty,
            kind: VarKind::Local,
        })
    }

    /// Create a variable naming a module-level symbol.
    pub fn make_symbol_var(&mut self, node: IpNode, name: &str, ty: Type) -> Variable {
        self.vars.push(VariableData {
            name: Some(name.to_owned()),
            ty,
            kind: VarKind::Symbol(node),
        })
    }

    /// The data of `var`.
    pub fn var(&self, var: Variable) -> &VariableData {
        &self.vars[var]
    }

    /// The type of `var`.
    pub fn var_type(&self, var: Variable) -> &Type {
        &self.vars[var].ty
    }

    /// The whole variable table.
    pub fn variables(&self) -> &PrimaryMap<Variable, VariableData> {
        &self.vars
    }

    /// Append a function argument. Arguments are bound in the entry block.
    pub fn add_argument(&mut self, var: Variable) {
        self.arguments.push(var);
    }

    /// The function arguments, in order.
    pub fn arguments(&self) -> &[Variable] {
        &self.arguments
    }

    /// Set the function results, read in the exit block.
    pub fn set_results(&mut self, results: Vec<Variable>) {
        self.results = results;
    }

    /// The function results, in order.
    pub fn results(&self) -> &[Variable] {
        &self.results
    }

    /// Create an empty block.
    pub fn make_block(&mut self) -> Block {
        self.blocks.push(BlockData::default())
    }

    /// Append a TAC to `block`.
    pub fn push_tac(&mut self, block: Block, tac: Tac) {
        debug_assert!(!self.blocks[block].dead);
        self.blocks[block].tacs.push(tac);
    }

    /// The TAC list of `block`.
    pub fn tacs(&self, block: Block) -> &[Tac] {
        &self.blocks[block].tacs
    }

    /// Mutable access to the TAC list of `block`.
    pub fn tacs_mut(&mut self, block: Block) -> &mut Vec<Tac> {
        &mut self.blocks[block].tacs
    }

    /// The ordered successors of `block`.
    pub fn succs(&self, block: Block) -> &[Block] {
        &self.blocks[block].succs
    }

    /// Replace the successor list of `block`.
    pub fn set_succs(&mut self, block: Block, succs: &[Block]) {
        self.blocks[block].succs = SmallVec::from_slice(succs);
    }

    /// Redirect outgoing edge `index` of `from` to `new_to`.
    pub fn redirect_edge(&mut self, from: Block, index: usize, new_to: Block) {
        self.blocks[from].succs[index] = new_to;
    }

    /// Redirect every edge `from -> old_to` to `new_to`.
    pub fn redirect_succ(&mut self, from: Block, old_to: Block, new_to: Block) {
        for succ in &mut self.blocks[from].succs {
            if *succ == old_to {
                *succ = new_to;
            }
        }
    }

    /// Is `block` still part of the graph?
    pub fn is_live(&self, block: Block) -> bool {
        !self.blocks[block].dead
    }

    /// Iterate over the live blocks in creation order.
    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.blocks
            .keys()
            .filter(move |block| !self.blocks[*block].dead)
    }

    /// Number of live blocks.
    pub fn nblocks(&self) -> usize {
        self.blocks().count()
    }

    /// Compute the predecessor lists of every live block.
    pub fn predecessors(&self) -> SecondaryMap<Block, Vec<Block>> {
        let mut preds: SecondaryMap<Block, Vec<Block>> = SecondaryMap::new();
        for block in self.blocks() {
            for &succ in self.succs(block) {
                preds[succ].push(block);
            }
        }
        preds
    }

    /// Compute a reverse post-order over the blocks reachable from entry.
    pub fn reverse_postorder(&self) -> Vec<Block> {
        let mut postorder = Vec::with_capacity(self.nblocks());
        let mut seen = FxHashSet::default();
        // Stack of (block, next successor index to visit).
        let mut stack = vec![(self.entry, 0)];
        seen.insert(self.entry);
        while let Some(&mut (block, ref mut next)) = stack.last_mut() {
            let succs = self.succs(block);
            if *next < succs.len() {
                let succ = succs[*next];
                *next += 1;
                if seen.insert(succ) {
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(block);
                stack.pop();
            }
        }
        postorder.reverse();
        postorder
    }

    /// Fuse every block whose sole successor has it as sole predecessor.
    pub fn straighten(&mut self) {
        let mut preds = self.predecessors();
        let blocks: Vec<Block> = self.blocks().collect();
        for block in blocks {
            if self.blocks[block].dead {
                continue;
            }
            // Keep absorbing the unique successor while possible.
            loop {
                let succs = &self.blocks[block].succs;
                if succs.len() != 1 {
                    break;
                }
                let succ = succs[0];
                if succ == self.exit || succ == block || preds[succ].len() != 1 {
                    break;
                }
                log::trace!("straighten: fusing {} into {}", succ, block);
                let mut absorbed = std::mem::take(&mut self.blocks[succ]);
                self.blocks[succ].dead = true;
                self.blocks[block].tacs.append(&mut absorbed.tacs);
                self.blocks[block].succs = absorbed.succs;
                for &next in &self.blocks[block].succs {
                    for pred in &mut preds[next] {
                        if *pred == succ {
                            *pred = block;
                        }
                    }
                }
            }
        }
    }

    /// Drop unreachable blocks and empty forwarding blocks.
    pub fn purge(&mut self) {
        // Unreachable blocks first.
        let mut reachable = FxHashSet::default();
        for block in self.reverse_postorder() {
            reachable.insert(block);
        }
        let blocks: Vec<Block> = self.blocks().collect();
        for block in blocks {
            if !reachable.contains(&block) {
                log::trace!("purge: unreachable {}", block);
                self.blocks[block].dead = true;
                self.blocks[block].tacs.clear();
                self.blocks[block].succs.clear();
            }
        }

        // Empty forwarding blocks.
        let mut changed = true;
        while changed {
            changed = false;
            let preds = self.predecessors();
            let blocks: Vec<Block> = self.blocks().collect();
            for block in blocks {
                if block == self.entry || block == self.exit {
                    continue;
                }
                if !self.blocks[block].tacs.is_empty() || self.blocks[block].succs.len() != 1 {
                    continue;
                }
                let target = self.blocks[block].succs[0];
                if target == block {
                    continue;
                }
                for &pred in &preds[block] {
                    if !self.blocks[pred].dead {
                        self.redirect_succ(pred, block, target);
                    }
                }
                log::trace!("purge: forwarding {} to {}", block, target);
                self.blocks[block].dead = true;
                self.blocks[block].succs.clear();
                changed = true;
            }
        }
    }

    /// Check the graph invariants: the entry has no predecessors, the exit no
    /// successors, every block is reachable from the entry, the exit is
    /// reachable from every block, and multi-way blocks end in a matching
    /// `Branch`.
    pub fn validate(&self) -> MidendResult<()> {
        let preds = self.predecessors();
        if !preds[self.entry].is_empty() {
            return Err(MidendError::MalformedInput(
                "entry block has predecessors".into(),
            ));
        }
        if !self.succs(self.exit).is_empty() {
            return Err(MidendError::MalformedInput(
                "exit block has successors".into(),
            ));
        }

        let reachable: FxHashSet<Block> = self.reverse_postorder().into_iter().collect();
        for block in self.blocks() {
            if !reachable.contains(&block) {
                return Err(MidendError::MalformedInput(format!(
                    "{} is unreachable from the entry",
                    block
                )));
            }
        }

        // Exit must be reachable from every block: walk the reversed edges.
        let mut coreachable = FxHashSet::default();
        let mut stack = vec![self.exit];
        coreachable.insert(self.exit);
        while let Some(block) = stack.pop() {
            for &pred in &preds[block] {
                if coreachable.insert(pred) {
                    stack.push(pred);
                }
            }
        }
        for block in self.blocks() {
            if !coreachable.contains(&block) {
                return Err(MidendError::MalformedInput(format!(
                    "the exit is unreachable from {}",
                    block
                )));
            }
        }

        for block in self.blocks() {
            let nsuccs = self.succs(block).len();
            if nsuccs > 1 {
                let is_matching_branch = match self.tacs(block).last() {
                    Some(tac) => {
                        matches!(tac.op,
                            super::Operation::Branch { nalternatives } if nalternatives as usize == nsuccs)
                    }
                    None => false,
                };
                if !is_matching_branch {
                    return Err(MidendError::MalformedInput(format!(
                        "{} has {} successors but no matching branch",
                        block, nsuccs
                    )));
                }
            }
            if nsuccs == 0 && block != self.exit {
                return Err(MidendError::MalformedInput(format!(
                    "{} has no successors but is not the exit",
                    block
                )));
            }
        }
        Ok(())
    }
}

impl Default for Cfg {
    fn default() -> Self {
        Self::new()
    }
}
