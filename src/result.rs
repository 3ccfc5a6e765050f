//! Result and error types surfaced by the mid-end entry points.

use thiserror::Error;

/// An error reported by one of the mid-end passes.
///
/// Internal helpers do not attempt partial recovery; errors bubble up to the
/// pass entry points. Conservative widening inside the alias analysis is not
/// an error: when disjointness cannot be proven, the analysis silently
/// pessimizes instead.
#[derive(Error, Debug)]
pub enum MidendError {
    /// A structural assumption about the region graph or the points-to graph
    /// was broken, e.g. a lookup of a node that should exist but does not.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A TAC operator with no lowering rule, or a region-graph construct the
    /// analysis or the encoder does not handle. The caller may choose to skip
    /// the enclosing function.
    #[error("unsupported construct: {0}")]
    Unsupported(String),

    /// The input violates the invariants of the pass, e.g. a CFG whose exit
    /// is unreachable or an aggregation tree that cannot be built.
    #[error("malformed input: {0}")]
    MalformedInput(String),
}

/// A convenient alias for a `Result` that uses `MidendError` as the error.
pub type MidendResult<T> = Result<T, MidendError>;
