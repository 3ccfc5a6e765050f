//! The operator vocabulary.
//!
//! Operators are shared between the two IRs: a TAC applies an operator to
//! variables, a simple region-graph node applies one to value outputs. The
//! vocabulary is a closed enum; operators the mid-end has no special
//! knowledge of (the bitwise, float, and comparison libraries of the front
//! end) enter as [`Operation::Opaque`] with an explicit signature.
//!
//! Every operator can report its operand and result arities and types, has
//! structural equality, can be cloned into another graph, and renders a short
//! mnemonic for diagnostics.

use super::types::{FunctionType, Type};
use super::Block;

/// An operation applied by a TAC or a simple region-graph node.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Operation {
    /// `r := a`. Lowering aliases the result to the operand; no node is
    /// materialized.
    Assign {
        /// Type of the copied value.
        ty: Type,
    },

    /// `r := p ? a : b` with a 1-bit predicate.
    Select {
        /// Type of the two alternatives and the result.
        ty: Type,
    },

    /// Terminator selecting among the block's ordered successors.
    Branch {
        /// Number of outgoing edges the predicate selects among.
        nalternatives: u32,
    },

    /// SSA phi; destroyed before restructuring.
    Phi {
        /// Type of the merged value.
        ty: Type,
        /// Predecessor block for each operand, in operand order.
        incoming: Vec<Block>,
    },

    /// Stack allocation. Produces the address and a fresh memory state for
    /// the new object.
    Alloca {
        /// Type of the allocated object.
        allocated: Type,
    },

    /// Load through a pointer, threading `nstates` memory states.
    Load {
        /// Type of the loaded value.
        ty: Type,
        /// Number of memory-state operands and results.
        nstates: u32,
    },

    /// Store through a pointer, threading `nstates` memory states.
    Store {
        /// Type of the stored value.
        ty: Type,
        /// Number of memory-state operands and results.
        nstates: u32,
    },

    /// Address arithmetic relative to a base pointer.
    GetElementPtr {
        /// Pointee type of the base pointer.
        base: Type,
        /// Pointee type of the computed address.
        pointee: Type,
        /// Number of index operands.
        noffsets: u32,
    },

    /// Value-preserving pointer cast.
    Bitcast {
        /// Operand type.
        from: Type,
        /// Result type.
        to: Type,
    },

    /// Integer-to-pointer cast.
    Bits2Ptr {
        /// Width of the integer operand.
        nbits: u32,
        /// Pointee type of the result.
        pointee: Type,
    },

    /// The null pointer constant.
    PtrNull {
        /// Pointee type of the result.
        pointee: Type,
    },

    /// An undefined value of a value type.
    Undef {
        /// Type of the undefined value.
        ty: Type,
    },

    /// Function call through a function pointer. The signature's parameters
    /// and results both include the threaded memory state.
    Call {
        /// Signature of the callee.
        sig: FunctionType,
    },

    /// Splits one memory state into many, or merges many into one, preserving
    /// the ordering of the operations it separates.
    MemStateMux {
        /// Number of memory-state operands.
        noperands: u32,
        /// Number of memory-state results.
        nresults: u32,
    },

    /// Maps a bit value to a control alternative.
    Match {
        /// Width of the matched bit value.
        nbits: u32,
        /// `(value, alternative)` pairs.
        mapping: Vec<(u64, u64)>,
        /// Alternative taken when no pair applies.
        default_alternative: u64,
        /// Number of alternatives of the control result.
        nalternatives: u32,
    },

    /// A control constant. Also serves as the undefined value of control
    /// types, which have no `Undef`.
    ControlConstant {
        /// The selected alternative.
        value: u32,
        /// Number of alternatives.
        nalternatives: u32,
    },

    /// A bit-vector constant.
    BitConstant {
        /// Width of the constant.
        width: u32,
        /// Value, sign-extended.
        value: i64,
    },

    /// An operation from the external operator library, with an explicit
    /// signature.
    Opaque(OpaqueOp),
}

/// An externally defined operation: a name plus operand and result types.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OpaqueOp {
    /// Mnemonic of the operation.
    pub name: String,
    /// Operand types, in order.
    pub params: Vec<Type>,
    /// Result types, in order.
    pub results: Vec<Type>,
}

impl Operation {
    /// A `MemStateMux` splitting one state into `n`.
    pub fn mem_split(n: usize) -> Self {
        Self::MemStateMux {
            noperands: 1,
            nresults: n as u32,
        }
    }

    /// A `MemStateMux` merging `n` states into one.
    pub fn mem_merge(n: usize) -> Self {
        Self::MemStateMux {
            noperands: n as u32,
            nresults: 1,
        }
    }

    /// Number of operands.
    pub fn noperands(&self) -> usize {
        match self {
            Self::Assign { .. } => 1,
            Self::Select { .. } => 3,
            Self::Branch { .. } => 1,
            Self::Phi { incoming, .. } => incoming.len(),
            Self::Alloca { .. } => 1,
            Self::Load { nstates, .. } => 1 + *nstates as usize,
            Self::Store { nstates, .. } => 2 + *nstates as usize,
            Self::GetElementPtr { noffsets, .. } => 1 + *noffsets as usize,
            Self::Bitcast { .. } | Self::Bits2Ptr { .. } => 1,
            Self::PtrNull { .. } | Self::Undef { .. } => 0,
            Self::Call { sig } => 1 + sig.params.len(),
            Self::MemStateMux { noperands, .. } => *noperands as usize,
            Self::Match { .. } => 1,
            Self::ControlConstant { .. } | Self::BitConstant { .. } => 0,
            Self::Opaque(op) => op.params.len(),
        }
    }

    /// Type of operand `n`.
    pub fn operand_type(&self, n: usize) -> Type {
        debug_assert!(n < self.noperands());
        match self {
            Self::Assign { ty } => ty.clone(),
            Self::Select { ty } => {
                if n == 0 {
                    Type::Bits(1)
                } else {
                    ty.clone()
                }
            }
            Self::Branch { nalternatives } => Type::Control(*nalternatives),
            Self::Phi { ty, .. } => ty.clone(),
            Self::Alloca { .. } => Type::Bits(32),
            Self::Load { ty, .. } => {
                if n == 0 {
                    Type::pointer(ty.clone())
                } else {
                    Type::Memory
                }
            }
            Self::Store { ty, .. } => match n {
                0 => Type::pointer(ty.clone()),
                1 => ty.clone(),
                _ => Type::Memory,
            },
            Self::GetElementPtr { base, .. } => {
                if n == 0 {
                    Type::pointer(base.clone())
                } else {
                    Type::Bits(32)
                }
            }
            Self::Bitcast { from, .. } => from.clone(),
            Self::Bits2Ptr { nbits, .. } => Type::Bits(*nbits),
            Self::PtrNull { .. } | Self::Undef { .. } => unreachable!(),
            Self::Call { sig } => {
                if n == 0 {
                    Type::pointer(Type::Function(sig.clone()))
                } else {
                    sig.params[n - 1].clone()
                }
            }
            Self::MemStateMux { .. } => Type::Memory,
            Self::Match { nbits, .. } => Type::Bits(*nbits),
            Self::ControlConstant { .. } | Self::BitConstant { .. } => unreachable!(),
            Self::Opaque(op) => op.params[n].clone(),
        }
    }

    /// Number of results.
    pub fn nresults(&self) -> usize {
        match self {
            Self::Assign { .. } | Self::Select { .. } | Self::Phi { .. } => 1,
            Self::Branch { .. } => 0,
            Self::Alloca { .. } => 2,
            Self::Load { nstates, .. } => 1 + *nstates as usize,
            Self::Store { nstates, .. } => *nstates as usize,
            Self::GetElementPtr { .. }
            | Self::Bitcast { .. }
            | Self::Bits2Ptr { .. }
            | Self::PtrNull { .. }
            | Self::Undef { .. } => 1,
            Self::Call { sig } => sig.results.len(),
            Self::MemStateMux { nresults, .. } => *nresults as usize,
            Self::Match { .. } | Self::ControlConstant { .. } | Self::BitConstant { .. } => 1,
            Self::Opaque(op) => op.results.len(),
        }
    }

    /// Type of result `n`.
    pub fn result_type(&self, n: usize) -> Type {
        debug_assert!(n < self.nresults());
        match self {
            Self::Assign { ty } | Self::Select { ty } | Self::Phi { ty, .. } => ty.clone(),
            Self::Branch { .. } => unreachable!(),
            Self::Alloca { allocated } => {
                if n == 0 {
                    Type::pointer(allocated.clone())
                } else {
                    Type::Memory
                }
            }
            Self::Load { ty, .. } => {
                if n == 0 {
                    ty.clone()
                } else {
                    Type::Memory
                }
            }
            Self::Store { .. } => Type::Memory,
            Self::GetElementPtr { pointee, .. } => Type::pointer(pointee.clone()),
            Self::Bitcast { to, .. } => to.clone(),
            Self::Bits2Ptr { pointee, .. } => Type::pointer(pointee.clone()),
            Self::PtrNull { pointee } => Type::pointer(pointee.clone()),
            Self::Undef { ty } => ty.clone(),
            Self::Call { sig } => sig.results[n].clone(),
            Self::MemStateMux { .. } => Type::Memory,
            Self::Match { nalternatives, .. } | Self::ControlConstant { nalternatives, .. } => {
                Type::Control(*nalternatives)
            }
            Self::BitConstant { width, .. } => Type::Bits(*width),
            Self::Opaque(op) => op.results[n].clone(),
        }
    }

    /// A short mnemonic for diagnostics and dot output.
    pub fn debug_string(&self) -> String {
        match self {
            Self::Assign { .. } => "assign".into(),
            Self::Select { .. } => "select".into(),
            Self::Branch { .. } => "branch".into(),
            Self::Phi { .. } => "phi".into(),
            Self::Alloca { allocated } => format!("alloca[{}]", allocated),
            Self::Load { .. } => "load".into(),
            Self::Store { .. } => "store".into(),
            Self::GetElementPtr { .. } => "gep".into(),
            Self::Bitcast { .. } => "bitcast".into(),
            Self::Bits2Ptr { .. } => "bits2ptr".into(),
            Self::PtrNull { .. } => "nullptr".into(),
            Self::Undef { .. } => "undef".into(),
            Self::Call { .. } => "call".into(),
            Self::MemStateMux { .. } => "memstatemux".into(),
            Self::Match { .. } => "match".into(),
            Self::ControlConstant { value, .. } => format!("ctl({})", value),
            Self::BitConstant { value, .. } => format!("bits({})", value),
            Self::Opaque(op) => op.name.clone(),
        }
    }

    /// Is this a `Branch`?
    pub fn is_branch(&self) -> bool {
        matches!(self, Self::Branch { .. })
    }
}
