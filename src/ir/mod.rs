//! The input intermediate representation: three-address code grouped into
//! basic blocks, grouped into control-flow graphs, grouped into an
//! inter-procedural module.
//!
//! Entities in this IR reference each other through `u32`-index handles into
//! `PrimaryMap` tables rather than through Rust references; there is a
//! separate index type for each entity so we don't lose type safety.

use crate::entity::entity_impl;
use core::fmt;

pub mod cfg;
pub mod module;
pub mod operators;
pub mod ssa;
pub mod tac;
pub mod types;

pub use self::cfg::{BlockData, Cfg};
pub use self::module::{DataInit, IpModule, IpNodeData, IpNodeKind, Linkage};
pub use self::operators::{OpaqueOp, Operation};
pub use self::tac::Tac;
pub use self::types::{FunctionType, Type};

/// An opaque reference to a basic block in a [`Cfg`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An opaque reference to a variable of a function.
///
/// A variable is a named or anonymous value with an immutable type. Three
/// address code reads and writes variables; the demand analysis computes sets
/// of them.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(u32);
entity_impl!(Variable, "var");

/// An opaque reference to a function or datum of an [`IpModule`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IpNode(u32);
entity_impl!(IpNode, "ip");

/// The contents of a [`Variable`] table slot.
#[derive(Clone, Debug)]
pub struct VariableData {
    /// Source-level name, if the variable has one.
    pub name: Option<String>,
    /// The immutable type of the variable.
    pub ty: Type,
    /// Whether the variable is function-local or names a module-level symbol.
    pub kind: VarKind,
}

/// Distinguishes ordinary variables from variables that name module symbols.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum VarKind {
    /// A function-local value.
    Local,
    /// The address of a module-level function or datum. Lowering binds these
    /// through the enclosing scope rather than through dataflow inside the
    /// function.
    Symbol(IpNode),
}

impl fmt::Display for VariableData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "_"),
        }
    }
}
