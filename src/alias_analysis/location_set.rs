//! The disjoint-set location store.
//!
//! Locations are the currency of the unification analysis: one per pointer
//! value output (`reg`), one per memory-allocating node (`mem`), and a
//! singleton `any` standing for arbitrary memory. The store is a union-find
//! with path compression and union by rank. The representative of each class
//! carries the class state: an `unknown` flag (the class may point into
//! externally provided memory) and at most one points-to pointer to another
//! location.
//!
//! Merging two classes ORs their `unknown` flags and recursively unifies
//! their points-to targets, which is what makes the whole analysis almost
//! linear: every recursive step merges two classes that stay merged.

use core::fmt::Write;

use cranelift_entity::{entity_impl, PrimaryMap};

use crate::fx::FxHashMap;
use crate::result::{MidendError, MidendResult};
use crate::rvsdg::{Graph, Node, Output};

/// An opaque reference to a location.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Loc(u32);
entity_impl!(Loc, "loc");

/// What a location abstracts.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LocKind {
    /// The value of a register output.
    Reg(Output),
    /// The memory allocated by a node.
    Mem(Node),
    /// Any memory whatsoever.
    Any,
}

struct LocData {
    kind: LocKind,
    parent: Loc,
    rank: u8,
    unknown: bool,
    points_to: Option<Loc>,
}

/// The disjoint-set store of abstract locations.
pub struct LocationSet {
    locations: PrimaryMap<Loc, LocData>,
    regs: FxHashMap<Output, Loc>,
    any: Loc,
}

impl LocationSet {
    /// Create a store holding only the `any` location.
    pub fn new() -> Self {
        let mut locations = PrimaryMap::new();
        let any = locations.push(LocData {
            kind: LocKind::Any,
            parent: Loc::from_u32(0),
            rank: 0,
            unknown: false,
            points_to: None,
        });
        debug_assert_eq!(any, Loc::from_u32(0));
        Self {
            locations,
            regs: FxHashMap::default(),
            any,
        }
    }

    /// The singleton `any` location.
    pub fn any(&self) -> Loc {
        self.any
    }

    /// Number of locations, `any` included.
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// Is the store empty apart from `any`?
    pub fn is_empty(&self) -> bool {
        self.locations.len() == 1
    }

    /// What `loc` abstracts.
    pub fn kind(&self, loc: Loc) -> LocKind {
        self.locations[loc].kind
    }

    fn push(&mut self, kind: LocKind, unknown: bool) -> Loc {
        let next = Loc::from_u32(self.locations.len() as u32);
        self.locations.push(LocData {
            kind,
            parent: next,
            rank: 0,
            unknown,
            points_to: None,
        })
    }

    /// Insert a register location for `output`. Fails if `output` already
    /// has one.
    pub fn insert_reg(&mut self, output: Output, unknown: bool) -> MidendResult<Loc> {
        if self.regs.contains_key(&output) {
            return Err(MidendError::InvariantViolation(format!(
                "{} already has a location",
                output
            )));
        }
        let loc = self.push(LocKind::Reg(output), unknown);
        self.regs.insert(output, loc);
        Ok(loc)
    }

    /// Insert a memory location for the allocation site `node`.
    pub fn insert_mem(&mut self, node: Node) -> Loc {
        self.push(LocKind::Mem(node), false)
    }

    /// The location of `output`, if one was inserted.
    pub fn lookup(&self, output: Output) -> Option<Loc> {
        self.regs.get(&output).copied()
    }

    /// The representative of `output`'s class, inserting a fresh location if
    /// the output has none yet. `find` is infallible only after this.
    pub fn locate(&mut self, output: Output) -> Loc {
        match self.lookup(output) {
            Some(loc) => self.find(loc),
            None => self
                .insert_reg(output, false)
                .expect("lookup said the output was absent"),
        }
    }

    /// The representative of `output`'s class.
    pub fn find_output(&mut self, output: Output) -> MidendResult<Loc> {
        match self.lookup(output) {
            Some(loc) => Ok(self.find(loc)),
            None => Err(MidendError::InvariantViolation(format!(
                "{} has no location",
                output
            ))),
        }
    }

    /// The representative of `loc`'s class, with path compression.
    pub fn find(&mut self, loc: Loc) -> Loc {
        let root = self.root_of(loc);
        let mut cursor = loc;
        while cursor != root {
            let next = self.locations[cursor].parent;
            self.locations[cursor].parent = root;
            cursor = next;
        }
        root
    }

    /// The representative of `loc`'s class, without compressing. Usable from
    /// read-only contexts such as the dot serializer.
    pub fn root_of(&self, loc: Loc) -> Loc {
        let mut cursor = loc;
        while self.locations[cursor].parent != cursor {
            cursor = self.locations[cursor].parent;
        }
        cursor
    }

    /// Does the class of `loc` carry the unknown flag?
    pub fn is_unknown(&self, loc: Loc) -> bool {
        self.locations[self.root_of(loc)].unknown
    }

    /// Flag the class of `loc` as possibly pointing into external memory.
    pub fn mark_unknown(&mut self, loc: Loc) {
        let root = self.find(loc);
        self.locations[root].unknown = true;
    }

    /// The points-to target of `loc`'s class, normalized to a
    /// representative.
    pub fn points_to(&mut self, loc: Loc) -> Option<Loc> {
        let root = self.find(loc);
        let target = self.locations[root].points_to?;
        let target = self.find(target);
        self.locations[root].points_to = Some(target);
        Some(target)
    }

    /// Point the class of `loc` at the class of `target`. The target class
    /// inherits the source's unknown flag.
    pub fn set_points_to(&mut self, loc: Loc, target: Loc) {
        let root = self.find(loc);
        let target = self.find(target);
        debug_assert!(self.locations[root].points_to.is_none());
        self.locations[root].points_to = Some(target);
        if self.locations[root].unknown {
            self.locations[target].unknown = true;
        }
    }

    /// Merge the classes of `a` and `b`, recursively unifying their
    /// points-to targets, and return the new representative.
    pub fn merge(&mut self, a: Loc, b: Loc) -> Loc {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return ra;
        }

        let (root, child) = if self.locations[ra].rank >= self.locations[rb].rank {
            (ra, rb)
        } else {
            (rb, ra)
        };
        if self.locations[root].rank == self.locations[child].rank {
            self.locations[root].rank += 1;
        }

        let child_pt = self.locations[child].points_to.take();
        let root_pt = self.locations[root].points_to;
        self.locations[child].parent = root;
        self.locations[root].unknown |= self.locations[child].unknown;

        match (root_pt, child_pt) {
            (None, None) => {}
            (None, Some(p)) => {
                self.locations[root].points_to = Some(p);
                if self.locations[root].unknown {
                    let p = self.find(p);
                    self.locations[p].unknown = true;
                }
            }
            (Some(_), None) => {}
            (Some(p1), Some(p2)) => {
                let merged = self.merge(p1, p2);
                let root = self.find(root);
                self.locations[root].points_to = Some(merged);
            }
        }
        self.find(root)
    }

    /// The equivalence classes: each entry is `(representative, members)`,
    /// members in insertion order, classes ordered by their first member.
    pub fn classes(&self) -> Vec<(Loc, Vec<Loc>)> {
        let mut order: Vec<Loc> = Vec::new();
        let mut members: FxHashMap<Loc, Vec<Loc>> = FxHashMap::default();
        for loc in self.locations.keys() {
            let root = self.root_of(loc);
            let entry = members.entry(root).or_insert_with(|| {
                order.push(root);
                Vec::new()
            });
            entry.push(loc);
        }
        order
            .into_iter()
            .map(|root| {
                let list = members.remove(&root).unwrap();
                (root, list)
            })
            .collect()
    }

    /// Render the store as a `digraph`: one box per class listing its
    /// members, an edge per points-to pointer.
    pub fn to_dot(&self, graph: &Graph) -> String {
        let label = |loc: Loc| -> String {
            match self.locations[loc].kind {
                LocKind::Reg(output) => super::output_label(graph, output),
                LocKind::Mem(node) => super::node_label(graph, node),
                LocKind::Any => "ANY".into(),
            }
        };

        let mut dot = String::from("digraph locationset {\n");
        for (root, members) in self.classes() {
            let mut text = String::new();
            for member in members {
                let marker = if member == root { "*" } else { "" };
                let _ = write!(text, "{}{}: {}\\n", member, marker, label(member));
            }
            if self.locations[root].unknown {
                text.push_str("{U}\\n");
            }
            let _ = writeln!(dot, "    {} [shape = \"box\", label = \"{}\"]", root, text);
            if let Some(target) = self.locations[root].points_to {
                let _ = writeln!(dot, "    {} -> {}", root, self.root_of(target));
            }
        }
        dot.push_str("}\n");
        dot
    }
}

impl Default for LocationSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Operation, Type};

    fn outputs(n: usize) -> (Graph, Vec<Output>) {
        let mut graph = Graph::new();
        let root = graph.root();
        let outs = (0..n)
            .map(|_| {
                let node = graph.add_simple(
                    root,
                    Operation::PtrNull {
                        pointee: Type::Bits(32),
                    },
                    &[],
                );
                graph.output(node, 0)
            })
            .collect();
        (graph, outs)
    }

    #[test]
    fn insert_and_find() {
        let (_graph, outs) = outputs(2);
        let mut lset = LocationSet::new();
        let a = lset.insert_reg(outs[0], false).unwrap();
        assert!(lset.insert_reg(outs[0], false).is_err());
        assert_eq!(lset.locate(outs[0]), a);
        let b = lset.locate(outs[1]);
        assert_ne!(lset.find(a), lset.find(b));
    }

    #[test]
    fn merge_unions_flags() {
        let (_graph, outs) = outputs(2);
        let mut lset = LocationSet::new();
        let a = lset.insert_reg(outs[0], true).unwrap();
        let b = lset.insert_reg(outs[1], false).unwrap();
        let root = lset.merge(a, b);
        assert_eq!(lset.find(a), root);
        assert_eq!(lset.find(b), root);
        assert!(lset.is_unknown(root));
    }

    #[test]
    fn merge_unifies_points_to_recursively() {
        let (_graph, outs) = outputs(6);
        let mut lset = LocationSet::new();
        // a -> c -> e and b -> d -> f; merging a and b must merge c with d
        // and, through the recursion, e with f.
        let locs: Vec<Loc> = outs.iter().map(|&o| lset.locate(o)).collect();
        let (a, b, c, d, e, f) = (locs[0], locs[1], locs[2], locs[3], locs[4], locs[5]);
        lset.set_points_to(a, c);
        lset.set_points_to(b, d);
        lset.set_points_to(c, e);
        lset.set_points_to(d, f);
        lset.merge(a, b);
        assert_eq!(lset.find(c), lset.find(d));
        assert_eq!(lset.find(e), lset.find(f));
        assert_ne!(lset.find(a), lset.find(c));
    }

    #[test]
    fn set_points_to_propagates_unknown() {
        let (_graph, outs) = outputs(2);
        let mut lset = LocationSet::new();
        let p = lset.insert_reg(outs[0], true).unwrap();
        let x = lset.locate(outs[1]);
        lset.set_points_to(p, x);
        assert!(lset.is_unknown(x));
    }

    #[test]
    fn dot_output_lists_classes_and_pointers() {
        let (graph, outs) = outputs(2);
        let mut lset = LocationSet::new();
        let p = lset.insert_reg(outs[0], true).unwrap();
        let x = lset.locate(outs[1]);
        lset.set_points_to(p, x);

        let dot = lset.to_dot(&graph);
        assert!(dot.starts_with("digraph locationset {"));
        assert!(dot.contains("{U}"));
        assert!(dot.contains(" -> "));
    }

    #[test]
    fn classes_are_deterministic() {
        let (_graph, outs) = outputs(3);
        let mut lset = LocationSet::new();
        let a = lset.locate(outs[0]);
        let b = lset.locate(outs[1]);
        let c = lset.locate(outs[2]);
        lset.merge(a, c);
        let classes = lset.classes();
        // any, {a, c}, {b}.
        assert_eq!(classes.len(), 3);
        assert_eq!(classes[0].1, vec![lset.any()]);
        assert_eq!(classes[1].1, vec![a, c]);
        assert_eq!(classes[2].1, vec![b]);
    }
}
