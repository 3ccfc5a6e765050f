//! A regionalizing compiler mid-end.
//!
//! This library takes an inter-procedural module of functions and data, each
//! function carrying a control-flow graph of three-address code, and converts
//! it into a regionalized value-state dependence graph (RVSDG): a hierarchical
//! graph in which control flow is expressed as value and state dataflow
//! through structural constructs (lambda, gamma, theta, phi, delta). On the
//! resulting graph it can run a Steensgaard-style unification points-to
//! analysis and re-encode the analysis results as per-allocation-site
//! memory-state edges, so that later passes can tell non-aliasing memory
//! operations apart.
//!
//! The pipeline runs strictly left to right:
//!
//! ```text
//! CFG -> restructured CFG -> aggregation tree + demand map -> region graph
//!     -> points-to graph -> re-encoded region graph
//! ```
//!
//! The three entry points are [`construct_region_graph`], [`Steensgaard`],
//! and [`encode`].

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub use cranelift_entity as entity;
pub use cranelift_entity::packed_option;

pub mod aggregation;
pub mod annotation;
pub mod ir;
pub mod restructure;
pub mod rvsdg;

mod alias_analysis;
mod construct;
mod dne;
mod fx;
mod result;
#[cfg(test)]
mod test_util;

pub use crate::alias_analysis::{
    encode, Loc, LocKind, LocationSet, PointsToGraph, PtgNode, PtgNodeKind, Steensgaard,
};
pub use crate::construct::construct_region_graph;
pub use crate::dne::dead_node_elimination;
pub use crate::result::{MidendError, MidendResult};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
