//! CFG restructuring.
//!
//! Converts an arbitrary CFG (irreducible regions, multi-entry loops,
//! head-controlled loops, branches that reconverge in more than one place)
//! into the shape the aggregator can consume:
//!
//! * every cycle is a single-entry loop with a single back edge whose latch
//!   ends in a two-way branch, edge 1 repeating and edge 0 leaving;
//! * every branch reconverges at exactly one continuation block, and no arm
//!   falls through to the continuation directly.
//!
//! Loops are normalized first. Every non-trivial strongly connected
//! component gets fresh continuation variables: a repetition flag `r`, and
//! where the component has several entries or several exit targets, control
//! selectors `q_in`/`q_out`. Edges into the component assign `q_in` and run
//! to a dispatch header that switches on it; edges that repeat or leave
//! assign the selectors and run to a fresh latch that branches on `r` into
//! either the header or an exit dispatch. The transformation is applied
//! recursively to the loop body with the back edge taken out of the picture.
//!
//! Branches are then normalized on the now-acyclic view of the graph (back
//! edges ignored): for every branch point we compute the blocks reachable
//! from more than one arm; the frontier of that shared region is the set of
//! continuation points. A single continuation point is the reconvergence
//! block, and arms jumping straight to it get an empty block inserted;
//! several continuation points are funneled through a fresh dispatch block
//! switching on another continuation variable.
//!
//! Inputs violating the CFG invariants are a programming error; the pass
//! asserts rather than reports.

use smallvec::SmallVec;

use crate::fx::FxHashSet;
use crate::ir::{Block, Cfg, Operation, Tac, Type, Variable};

/// An edge, identified by its source block and successor index.
type Edge = (Block, usize);

/// Restructure `cfg` in place. Afterwards the graph aggregates cleanly into
/// entry/exit/block/linear/branch/loop constructs.
pub fn restructure(cfg: &mut Cfg) {
    let mut back_edges = FxHashSet::default();
    let region: FxHashSet<Block> = cfg.blocks().collect();
    restructure_loops(cfg, &region, &mut back_edges);
    log::trace!("restructure: {} back edges", back_edges.len());
    let entry = cfg.entry();
    restructure_branches(cfg, entry, None, &back_edges);
}

fn effective_succs(
    cfg: &Cfg,
    block: Block,
    back_edges: &FxHashSet<(Block, Block)>,
) -> SmallVec<[(usize, Block); 2]> {
    cfg.succs(block)
        .iter()
        .enumerate()
        .filter(|(_, succ)| !back_edges.contains(&(block, **succ)))
        .map(|(index, succ)| (index, *succ))
        .collect()
}

/* loop restructuring */

fn restructure_loops(
    cfg: &mut Cfg,
    region: &FxHashSet<Block>,
    back_edges: &mut FxHashSet<(Block, Block)>,
) {
    let sccs = strongly_connected(cfg, region, back_edges);
    // Tarjan emits components dependencies-first; walk them in reverse
    // post-order of the condensation instead.
    for scc in sccs.into_iter().rev() {
        let nontrivial = scc.len() > 1 || {
            let block = scc[0];
            cfg.succs(block).contains(&block) && !back_edges.contains(&(block, block))
        };
        if !nontrivial {
            continue;
        }
        let members: FxHashSet<Block> = scc.iter().copied().collect();
        let body = restructure_scc(cfg, &members, back_edges);
        restructure_loops(cfg, &body, back_edges);
    }
}

/// Normalize one strongly connected component to a single-entry loop with a
/// single back edge, returning the set of blocks forming the loop body.
fn restructure_scc(
    cfg: &mut Cfg,
    scc: &FxHashSet<Block>,
    back_edges: &mut FxHashSet<(Block, Block)>,
) -> FxHashSet<Block> {
    let mut entry_edges: Vec<(Edge, Block)> = Vec::new();
    let mut repeat_edges: Vec<(Edge, Block)> = Vec::new();
    let mut exit_edges: Vec<(Edge, Block)> = Vec::new();

    let blocks: Vec<Block> = cfg.blocks().collect();
    let mut entries: Vec<Block> = Vec::new();
    for &block in &blocks {
        if scc.contains(&block) {
            continue;
        }
        for (index, succ) in effective_succs(cfg, block, back_edges) {
            if scc.contains(&succ) {
                entry_edges.push(((block, index), succ));
                if !entries.contains(&succ) {
                    entries.push(succ);
                }
            }
        }
    }
    for &block in &blocks {
        if !scc.contains(&block) {
            continue;
        }
        for (index, succ) in effective_succs(cfg, block, back_edges) {
            if scc.contains(&succ) {
                if entries.contains(&succ) {
                    repeat_edges.push(((block, index), succ));
                }
            } else {
                exit_edges.push(((block, index), succ));
            }
        }
    }

    // Retain the entry with the most predecessors as the natural header.
    let preds = cfg.predecessors();
    entries.sort_by_key(|entry| (std::cmp::Reverse(preds[*entry].len()), *entry));
    let mut exit_targets: Vec<Block> = Vec::new();
    for &(_, target) in &exit_edges {
        if !exit_targets.contains(&target) {
            exit_targets.push(target);
        }
    }
    exit_targets.sort();

    // Already a tail-controlled single-entry loop with one back edge?
    if entries.len() == 1 && repeat_edges.len() == 1 && exit_edges.len() == 1 {
        let ((latch, repeat_index), header) = repeat_edges[0];
        let ((exit_block, exit_index), _) = exit_edges[0];
        if exit_block == latch && cfg.succs(latch).len() == 2 && repeat_index == 1 && exit_index == 0
        {
            log::trace!("restructure: loop at {} already structured", header);
            back_edges.insert((latch, header));
            return scc.clone();
        }
    }

    log::trace!(
        "restructure: rebuilding loop with {} entries, {} exit targets",
        entries.len(),
        exit_targets.len()
    );

    let mut body = scc.clone();

    // The repetition flag and the dispatch selectors.
    let r = cfg.make_var(Some("r"), Type::Control(2));
    let q_in = (entries.len() > 1)
        .then(|| cfg.make_var(Some("q_in"), Type::Control(entries.len() as u32)));
    let q_out = (exit_targets.len() > 1)
        .then(|| cfg.make_var(Some("q_out"), Type::Control(exit_targets.len() as u32)));

    // Header: dispatches on `q_in` if there are several entries.
    let header = match q_in {
        Some(q_in) => {
            let header = cfg.make_block();
            cfg.push_tac(
                header,
                Tac::new(
                    Operation::Branch {
                        nalternatives: entries.len() as u32,
                    },
                    &[q_in],
                    &[],
                ),
            );
            cfg.set_succs(header, &entries);
            body.insert(header);
            header
        }
        None => entries[0],
    };

    // Exit: dispatches on `q_out` if there are several exit targets.
    let exit = match q_out {
        Some(q_out) => {
            let exit = cfg.make_block();
            cfg.push_tac(
                exit,
                Tac::new(
                    Operation::Branch {
                        nalternatives: exit_targets.len() as u32,
                    },
                    &[q_out],
                    &[],
                ),
            );
            cfg.set_succs(exit, &exit_targets);
            exit
        }
        None => exit_targets[0],
    };

    // Latch: repeat on `r` = 1, leave on `r` = 0.
    let latch = cfg.make_block();
    cfg.push_tac(
        latch,
        Tac::new(Operation::Branch { nalternatives: 2 }, &[r], &[]),
    );
    cfg.set_succs(latch, &[exit, header]);
    body.insert(latch);

    let assign_ctl = |cfg: &mut Cfg, assignments: &[(Variable, u32, u32)], to: Block| {
        let block = cfg.make_block();
        for &(var, value, nalternatives) in assignments {
            cfg.push_tac(
                block,
                Tac::new(
                    Operation::ControlConstant {
                        value,
                        nalternatives,
                    },
                    &[],
                    &[var],
                ),
            );
        }
        cfg.set_succs(block, &[to]);
        block
    };

    // Entry edges select their entry and run to the header.
    if let Some(q_in) = q_in {
        for &((from, index), target) in &entry_edges {
            let alt = entries.iter().position(|e| *e == target).unwrap() as u32;
            let stub = assign_ctl(cfg, &[(q_in, alt, entries.len() as u32)], header);
            cfg.redirect_edge(from, index, stub);
        }
    }

    // Repeat edges flag a repetition and run to the latch.
    for &((from, index), target) in &repeat_edges {
        let mut assignments: SmallVec<[(Variable, u32, u32); 2]> = SmallVec::new();
        if let Some(q_in) = q_in {
            let alt = entries.iter().position(|e| *e == target).unwrap() as u32;
            assignments.push((q_in, alt, entries.len() as u32));
        }
        assignments.push((r, 1, 2));
        let stub = assign_ctl(cfg, &assignments, latch);
        cfg.redirect_edge(from, index, stub);
        body.insert(stub);
    }

    // Exit edges clear the flag, select their target, and run to the latch.
    for &((from, index), target) in &exit_edges {
        let mut assignments: SmallVec<[(Variable, u32, u32); 2]> = SmallVec::new();
        if let Some(q_out) = q_out {
            let alt = exit_targets.iter().position(|x| *x == target).unwrap() as u32;
            assignments.push((q_out, alt, exit_targets.len() as u32));
        }
        assignments.push((r, 0, 2));
        let stub = assign_ctl(cfg, &assignments, latch);
        cfg.redirect_edge(from, index, stub);
        body.insert(stub);
    }

    back_edges.insert((latch, header));
    body
}

/// Iterative Tarjan over the subgraph induced by `region`, ignoring the
/// already-discovered back edges.
fn strongly_connected(
    cfg: &Cfg,
    region: &FxHashSet<Block>,
    back_edges: &FxHashSet<(Block, Block)>,
) -> Vec<Vec<Block>> {
    struct State {
        index: u32,
        lowlink: u32,
        on_stack: bool,
    }

    let mut states: crate::fx::FxHashMap<Block, State> = Default::default();
    let mut stack: Vec<Block> = Vec::new();
    let mut next_index = 0;
    let mut sccs: Vec<Vec<Block>> = Vec::new();

    let mut roots: Vec<Block> = region.iter().copied().collect();
    roots.sort();

    for root in roots {
        if states.contains_key(&root) {
            continue;
        }
        let mut work: Vec<(Block, usize)> = vec![(root, 0)];
        while let Some(&(block, next0)) = work.last() {
            let mut next = next0;
            if !states.contains_key(&block) {
                states.insert(
                    block,
                    State {
                        index: next_index,
                        lowlink: next_index,
                        on_stack: true,
                    },
                );
                next_index += 1;
                stack.push(block);
            }

            let succs = effective_succs(cfg, block, back_edges);
            let mut pushed = false;
            while next < succs.len() {
                let (_, succ) = succs[next];
                next += 1;
                if !region.contains(&succ) {
                    continue;
                }
                match states.get(&succ) {
                    None => {
                        work.last_mut().unwrap().1 = next;
                        work.push((succ, 0));
                        pushed = true;
                        break;
                    }
                    Some(state) => {
                        if state.on_stack {
                            let succ_index = state.index;
                            let entry = states.get_mut(&block).unwrap();
                            entry.lowlink = entry.lowlink.min(succ_index);
                        }
                    }
                }
            }
            if pushed {
                continue;
            }
            work.last_mut().unwrap().1 = next;
            if next >= succs.len() {
                work.pop();
                let low = states[&block].lowlink;
                if let Some(&(parent, _)) = work.last() {
                    let entry = states.get_mut(&parent).unwrap();
                    entry.lowlink = entry.lowlink.min(low);
                }
                if low == states[&block].index {
                    let mut scc = Vec::new();
                    loop {
                        let member = stack.pop().expect("tarjan stack underflow");
                        states.get_mut(&member).unwrap().on_stack = false;
                        scc.push(member);
                        if member == block {
                            break;
                        }
                    }
                    scc.sort();
                    sccs.push(scc);
                }
            }
        }
    }
    sccs
}

/* branch restructuring */

fn restructure_branches(
    cfg: &mut Cfg,
    start: Block,
    stop: Option<Block>,
    back_edges: &FxHashSet<(Block, Block)>,
) {
    let mut head = start;
    loop {
        if Some(head) == stop {
            return;
        }
        let succs = effective_succs(cfg, head, back_edges);
        match succs.len() {
            0 => return,
            1 => {
                head = succs[0].1;
                continue;
            }
            _ => {}
        }

        // Blocks reachable from each arm, stopping at the enclosing join.
        let arms: Vec<(usize, Block)> = succs.into_iter().collect();
        let reach: Vec<FxHashSet<Block>> = arms
            .iter()
            .map(|&(_, target)| reachable(cfg, target, stop, back_edges))
            .collect();

        let mut shared: FxHashSet<Block> = FxHashSet::default();
        for (n, set) in reach.iter().enumerate() {
            for &block in set {
                if reach
                    .iter()
                    .enumerate()
                    .any(|(m, other)| m != n && other.contains(&block))
                {
                    shared.insert(block);
                }
            }
        }

        // The continuation points are the frontier of the shared region:
        // shared blocks entered from an arm-private block or from the head.
        let mut continuations: Vec<Block> = Vec::new();
        {
            let mut sources: Vec<Block> = vec![head];
            for set in &reach {
                for &block in set {
                    if !shared.contains(&block) {
                        sources.push(block);
                    }
                }
            }
            for &source in &sources {
                for (_, succ) in effective_succs(cfg, source, back_edges) {
                    if shared.contains(&succ) && !continuations.contains(&succ) {
                        continuations.push(succ);
                    }
                }
            }
            continuations.sort();
        }

        if continuations.is_empty() {
            // The arms never reconverge below this head (they all run into
            // the enclosing join); nothing to normalize across arms.
            for &(_, target) in &arms {
                if Some(target) != stop {
                    restructure_branches(cfg, target, stop, back_edges);
                }
            }
            return;
        }

        if continuations.len() == 1 {
            let join = continuations[0];
            for &(index, target) in &arms {
                if target == join {
                    // Keep the arm materialized as its own (empty) block.
                    let stub = cfg.make_block();
                    cfg.set_succs(stub, &[join]);
                    cfg.redirect_edge(head, index, stub);
                } else {
                    restructure_branches(cfg, target, Some(join), back_edges);
                }
            }
            head = join;
            continue;
        }

        log::trace!(
            "restructure: funneling {} continuation points below {}",
            continuations.len(),
            head
        );

        let p = cfg.make_var(Some("p"), Type::Control(continuations.len() as u32));
        let dispatch = cfg.make_block();
        cfg.push_tac(
            dispatch,
            Tac::new(
                Operation::Branch {
                    nalternatives: continuations.len() as u32,
                },
                &[p],
                &[],
            ),
        );
        cfg.set_succs(dispatch, &continuations);

        // Reroute every edge from the head or an arm-private block into a
        // continuation point through a stub selecting that point.
        let mut sources: Vec<Block> = vec![head];
        for set in &reach {
            for &block in set {
                if !shared.contains(&block) {
                    sources.push(block);
                }
            }
        }
        sources.sort();
        sources.dedup();
        for source in sources {
            for (index, succ) in effective_succs(cfg, source, back_edges) {
                if let Some(alt) = continuations.iter().position(|c| *c == succ) {
                    let stub = cfg.make_block();
                    cfg.push_tac(
                        stub,
                        Tac::new(
                            Operation::ControlConstant {
                                value: alt as u32,
                                nalternatives: continuations.len() as u32,
                            },
                            &[],
                            &[p],
                        ),
                    );
                    cfg.set_succs(stub, &[dispatch]);
                    cfg.redirect_edge(source, index, stub);
                }
            }
        }

        for &(_, target) in &arms {
            if !continuations.contains(&target) {
                restructure_branches(cfg, target, Some(dispatch), back_edges);
            }
        }
        head = dispatch;
    }
}

/// Blocks reachable from `start` along non-back edges, `stop` included but
/// not traversed through.
fn reachable(
    cfg: &Cfg,
    start: Block,
    stop: Option<Block>,
    back_edges: &FxHashSet<(Block, Block)>,
) -> FxHashSet<Block> {
    let mut seen = FxHashSet::default();
    let mut stack = vec![start];
    seen.insert(start);
    while let Some(block) = stack.pop() {
        if Some(block) == stop {
            continue;
        }
        for (_, succ) in effective_succs(cfg, block, back_edges) {
            if seen.insert(succ) {
                stack.push(succ);
            }
        }
    }
    seen
}
