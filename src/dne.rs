//! Dead-node elimination over the region graph.
//!
//! A node is dead when none of its outputs has a user; users are region
//! results, graph exports, and the inputs of live nodes. Regions are swept
//! in reverse topological order so that a dead consumer never keeps its
//! producers alive. Structural nodes are pruned from the inside out: unused
//! gamma exit and entry variables, theta loop variables that only feed
//! themselves, and unused context variables of lambdas, deltas, and phis are
//! dropped along with their interface slots.

use crate::fx::FxHashSet;
use crate::rvsdg::{Graph, Node, NodeKind, Output, Region};

/// Remove every node without users from `graph`, recursively.
pub fn dead_node_elimination(graph: &mut Graph) {
    let root = graph.root();
    sweep_region(graph, root);
}

fn sweep_region(graph: &mut Graph, region: Region) {
    let mut used: FxHashSet<Output> = graph.results(region).iter().copied().collect();
    if region == graph.root() {
        for (output, _) in graph.exports() {
            used.insert(*output);
        }
    }

    let order = graph.topological_order(region);
    for &node in order.iter().rev() {
        let live = graph.outputs(node).iter().any(|o| used.contains(o));
        if !live {
            log::trace!("dne: removing {}", node);
            graph.remove_node(node);
            continue;
        }

        match graph.kind(node) {
            NodeKind::Simple(_) => {}
            NodeKind::Gamma => prune_gamma(graph, node, &used),
            NodeKind::Theta => prune_theta(graph, node, &used),
            NodeKind::Lambda { sig, .. } => {
                let first_context = sig.params.len();
                let sub = graph.subregion(node, 0);
                sweep_region(graph, sub);
                prune_context_vars(graph, node, first_context);
            }
            NodeKind::Delta { .. } => {
                let sub = graph.subregion(node, 0);
                sweep_region(graph, sub);
                prune_context_vars(graph, node, 0);
            }
            NodeKind::Phi => {
                let first_context = graph.outputs(node).len();
                let sub = graph.subregion(node, 0);
                sweep_region(graph, sub);
                prune_context_vars(graph, node, first_context);
            }
        }

        for &input in graph.inputs(node) {
            used.insert(input);
        }
    }
}

/// Number of uses of `output` inside `region`: node inputs plus results.
fn use_count(graph: &Graph, region: Region, output: Output) -> usize {
    let mut count = 0;
    for &node in graph.region_nodes(region) {
        count += graph.inputs(node).iter().filter(|&&i| i == output).count();
    }
    count += graph.results(region).iter().filter(|&&r| r == output).count();
    count
}

fn prune_gamma(graph: &mut Graph, gamma: Node, used: &FxHashSet<Output>) {
    // Unused exit variables go first so their per-arm results die with them.
    let outputs = graph.outputs(gamma).to_vec();
    for (n, &output) in outputs.iter().enumerate().rev() {
        if !used.contains(&output) {
            log::trace!("dne: dropping exit variable {} of {}", n, gamma);
            graph.remove_node_output(gamma, n);
            for sub in graph.subregions(gamma).to_vec() {
                graph.remove_region_result(sub, n);
            }
        }
    }

    for sub in graph.subregions(gamma).to_vec() {
        sweep_region(graph, sub);
    }

    // Entry variables no arm reads anymore.
    for n in (0..graph.gamma_nentry_vars(gamma)).rev() {
        let subregions = graph.subregions(gamma).to_vec();
        let unused = subregions.iter().all(|&sub| {
            let argument = graph.arguments(sub)[n];
            use_count(graph, sub, argument) == 0
        });
        if unused {
            log::trace!("dne: dropping entry variable {} of {}", n, gamma);
            graph.remove_node_input(gamma, 1 + n);
            for sub in subregions {
                graph.remove_region_argument(sub, n);
            }
        }
    }
}

fn prune_theta(graph: &mut Graph, theta: Node, used: &FxHashSet<Output>) {
    let sub = graph.subregion(theta, 0);
    sweep_region(graph, sub);

    // A loop variable is dead when its output is unused and its body
    // argument feeds nothing but its own back edge.
    let mut pruned = false;
    for n in (0..graph.theta_nloop_vars(theta)).rev() {
        let output = graph.output(theta, n);
        if used.contains(&output) {
            continue;
        }
        let argument = graph.theta_loop_arg(theta, n);
        let uses = use_count(graph, sub, argument);
        let self_fed = graph.results(sub)[1 + n] == argument;
        let removable = uses == 0 || (uses == 1 && self_fed);
        if removable {
            log::trace!("dne: dropping loop variable {} of {}", n, theta);
            graph.remove_region_result(sub, 1 + n);
            graph.remove_region_argument(sub, n);
            graph.remove_node_output(theta, n);
            graph.remove_node_input(theta, n);
            pruned = true;
        }
    }
    if pruned {
        // Dropping back edges may have freed body nodes.
        sweep_region(graph, sub);
    }
}

fn prune_context_vars(graph: &mut Graph, node: Node, first_context: usize) {
    let sub = graph.subregion(node, 0);
    let arguments = graph.arguments(sub).to_vec();
    for n in (first_context..arguments.len()).rev() {
        if use_count(graph, sub, arguments[n]) == 0 {
            log::trace!("dne: dropping context variable {} of {}", n, node);
            graph.remove_node_input(node, n - first_context);
            graph.remove_region_argument(sub, n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionType, Linkage, OpaqueOp, Operation, Type};

    fn bitconst(graph: &mut Graph, region: Region, value: i64) -> Output {
        let node = graph.add_simple(region, Operation::BitConstant { width: 32, value }, &[]);
        graph.output(node, 0)
    }

    fn neg(graph: &mut Graph, region: Region, value: Output) -> Output {
        let node = graph.add_simple(
            region,
            Operation::Opaque(OpaqueOp {
                name: "neg".into(),
                params: vec![Type::Bits(32)],
                results: vec![Type::Bits(32)],
            }),
            &[value],
        );
        graph.output(node, 0)
    }

    #[test]
    fn unused_chain_is_removed() {
        let mut graph = Graph::new();
        let sig = FunctionType::new(vec![Type::Bits(32)], vec![Type::Bits(32)]);
        let lambda = graph.create_lambda(graph.root(), "f", sig, Linkage::Export);
        let sub = graph.subregion(lambda, 0);
        let param = graph.lambda_params(lambda)[0];

        // A dead chain: the constant feeds a negation nothing consumes.
        let dead = bitconst(&mut graph, sub, 1);
        let _dead2 = neg(&mut graph, sub, dead);
        let live = neg(&mut graph, sub, param);
        graph.lambda_finalize(lambda, &[live]);
        let output = graph.lambda_output(lambda);
        graph.add_export(output, "f");

        dead_node_elimination(&mut graph);
        // Only the live negation remains.
        assert_eq!(graph.region_nodes(sub).len(), 1);
    }

    #[test]
    fn gamma_interface_is_pruned() {
        let mut graph = Graph::new();
        let sig = FunctionType::new(vec![Type::Bits(32)], vec![Type::Bits(32)]);
        let lambda = graph.create_lambda(graph.root(), "f", sig, Linkage::Export);
        let sub = graph.subregion(lambda, 0);
        let param = graph.lambda_params(lambda)[0];

        let pred_node = graph.add_simple(
            sub,
            Operation::ControlConstant {
                value: 0,
                nalternatives: 2,
            },
            &[],
        );
        let pred = graph.output(pred_node, 0);
        let gamma = graph.create_gamma(pred, 2);
        let used_args = graph.gamma_add_entry_var(gamma, param);
        let unused_origin = bitconst(&mut graph, sub, 9);
        let unused_args = graph.gamma_add_entry_var(gamma, unused_origin);
        let live = graph.gamma_add_exit_var(gamma, &used_args);
        let _dead = graph.gamma_add_exit_var(gamma, &unused_args);

        graph.lambda_finalize(lambda, &[live]);
        let output = graph.lambda_output(lambda);
        graph.add_export(output, "f");

        dead_node_elimination(&mut graph);

        // The dead exit variable went away, and with it the second entry
        // variable and its origin.
        assert_eq!(graph.outputs(gamma).len(), 1);
        assert_eq!(graph.gamma_nentry_vars(gamma), 1);
        for arm in graph.subregions(gamma) {
            assert_eq!(graph.results(*arm).len(), 1);
            assert_eq!(graph.arguments(*arm).len(), 1);
        }
        // The unused constant died too.
        assert!(!graph
            .region_nodes(sub)
            .iter()
            .any(|&n| matches!(graph.kind(n), NodeKind::Simple(Operation::BitConstant { .. }))));
    }

    #[test]
    fn theta_loop_var_is_pruned() {
        let mut graph = Graph::new();
        let sig = FunctionType::new(vec![Type::Bits(32)], vec![Type::Bits(32)]);
        let lambda = graph.create_lambda(graph.root(), "f", sig, Linkage::Export);
        let sub = graph.subregion(lambda, 0);
        let param = graph.lambda_params(lambda)[0];

        let dead_init = bitconst(&mut graph, sub, 0);
        let theta = graph.create_theta(sub);
        let live_arg = graph.theta_add_loop_var(theta, param);
        let dead_arg = graph.theta_add_loop_var(theta, dead_init);
        let body = graph.subregion(theta, 0);
        let next = neg(&mut graph, body, live_arg);
        let pred_node = graph.add_simple(
            body,
            Operation::ControlConstant {
                value: 0,
                nalternatives: 2,
            },
            &[],
        );
        let pred = graph.output(pred_node, 0);
        let outs = graph.theta_finalize(theta, pred, &[next, dead_arg]);

        graph.lambda_finalize(lambda, &[outs[0]]);
        let output = graph.lambda_output(lambda);
        graph.add_export(output, "f");

        dead_node_elimination(&mut graph);

        assert_eq!(graph.theta_nloop_vars(theta), 1);
        assert_eq!(graph.arguments(body).len(), 1);
        assert_eq!(graph.results(body).len(), 2);
    }

    #[test]
    fn lambda_context_var_is_pruned() {
        let mut graph = Graph::new();
        let root = graph.root();
        let import = graph.add_import(Type::pointer(Type::Bits(32)), "g");
        let sig = FunctionType::new(vec![Type::Bits(32)], vec![Type::Bits(32)]);
        let lambda = graph.create_lambda(root, "f", sig, Linkage::Export);
        let _unused = graph.lambda_add_ctxvar(lambda, import);
        let param = graph.lambda_params(lambda)[0];
        graph.lambda_finalize(lambda, &[param]);
        let output = graph.lambda_output(lambda);
        graph.add_export(output, "f");

        dead_node_elimination(&mut graph);
        assert!(graph.inputs(lambda).is_empty());
        assert_eq!(graph.arguments(graph.subregion(lambda, 0)).len(), 1);
    }
}
