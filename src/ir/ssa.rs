//! SSA destruction.
//!
//! The aggregation and demand passes work on ordinary variables, so phi
//! instructions are rewritten into assignments in the predecessor blocks
//! before the CFG is restructured: each phi gets a fresh staging variable
//! that every predecessor assigns its incoming value to, and the phi itself
//! becomes an assignment from the staging variable.

use crate::ir::{Cfg, Operation, Tac};

/// Rewrite all phi instructions of `cfg` into predecessor assignments.
pub fn destruct_ssa(cfg: &mut Cfg) {
    let blocks: Vec<_> = cfg.blocks().collect();
    for block in blocks {
        // Phis only appear as a prefix of the block.
        let nphis = cfg
            .tacs(block)
            .iter()
            .take_while(|tac| matches!(tac.op, Operation::Phi { .. }))
            .count();
        if nphis == 0 {
            continue;
        }
        log::trace!("ssa destruction: {} phis in {}", nphis, block);

        for n in 0..nphis {
            let tac = cfg.tacs(block)[n].clone();
            let (ty, incoming) = match &tac.op {
                Operation::Phi { ty, incoming } => (ty.clone(), incoming.clone()),
                _ => unreachable!(),
            };
            let staging = cfg.make_var(None, ty.clone());

            for (operand, pred) in tac.operands.iter().zip(incoming) {
                let copy = Tac::new(Operation::Assign { ty: ty.clone() }, &[*operand], &[staging]);
                // Insert ahead of the predecessor's terminating branch.
                let tacs = cfg.tacs_mut(pred);
                let at = if tacs.last().is_some_and(|t| t.op.is_branch()) {
                    tacs.len() - 1
                } else {
                    tacs.len()
                };
                tacs.insert(at, copy);
            }

            cfg.tacs_mut(block)[n] =
                Tac::new(Operation::Assign { ty }, &[staging], &[tac.result(0)]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Block, Type, Variable};

    fn constant(cfg: &mut Cfg, block: Block, value: i64) -> Variable {
        let v = cfg.make_var(None, Type::Bits(32));
        cfg.push_tac(
            block,
            Tac::new(Operation::BitConstant { width: 32, value }, &[], &[v]),
        );
        v
    }

    #[test]
    fn phi_becomes_assignments() {
        let mut cfg = Cfg::new();
        let head = cfg.make_block();
        let left = cfg.make_block();
        let right = cfg.make_block();
        let join = cfg.make_block();
        let p = cfg.make_var(Some("p"), Type::Control(2));
        cfg.push_tac(head, Tac::new(Operation::Branch { nalternatives: 2 }, &[p], &[]));
        cfg.set_succs(cfg.entry(), &[head]);
        cfg.set_succs(head, &[left, right]);
        cfg.set_succs(left, &[join]);
        cfg.set_succs(right, &[join]);
        cfg.set_succs(join, &[cfg.exit()]);

        let a = constant(&mut cfg, left, 1);
        let b = constant(&mut cfg, right, 2);
        let merged = cfg.make_var(Some("m"), Type::Bits(32));
        cfg.push_tac(
            join,
            Tac::new(
                Operation::Phi {
                    ty: Type::Bits(32),
                    incoming: vec![left, right],
                },
                &[a, b],
                &[merged],
            ),
        );

        destruct_ssa(&mut cfg);

        // The phi is gone; each predecessor copies into the staging variable.
        assert!(matches!(cfg.tacs(join)[0].op, Operation::Assign { .. }));
        assert_eq!(cfg.tacs(join)[0].result(0), merged);
        let left_copy = cfg.tacs(left).last().unwrap();
        let right_copy = cfg.tacs(right).last().unwrap();
        assert!(matches!(left_copy.op, Operation::Assign { .. }));
        assert_eq!(left_copy.operand(0), a);
        assert_eq!(right_copy.operand(0), b);
        assert_eq!(left_copy.result(0), right_copy.result(0));
    }
}
