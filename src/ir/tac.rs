//! Three-address code: one operation applied to an ordered list of operand
//! variables, producing an ordered list of result variables.

use smallvec::SmallVec;

use super::operators::Operation;
use super::Variable;

/// A single three-address-code instruction.
#[derive(Clone, Debug)]
pub struct Tac {
    /// The applied operation.
    pub op: Operation,
    /// Operand variables, one per operation operand.
    pub operands: SmallVec<[Variable; 4]>,
    /// Result variables, one per operation result.
    pub results: SmallVec<[Variable; 2]>,
}

impl Tac {
    /// Create a TAC, checking the arities against the operation.
    pub fn new(op: Operation, operands: &[Variable], results: &[Variable]) -> Self {
        debug_assert_eq!(operands.len(), op.noperands());
        debug_assert_eq!(results.len(), op.nresults());
        Self {
            op,
            operands: SmallVec::from_slice(operands),
            results: SmallVec::from_slice(results),
        }
    }

    /// Operand `n`.
    pub fn operand(&self, n: usize) -> Variable {
        self.operands[n]
    }

    /// Result `n`.
    pub fn result(&self, n: usize) -> Variable {
        self.results[n]
    }
}
