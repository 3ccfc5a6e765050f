//! Shared fixtures for the alias-analysis tests: hand-built region graphs,
//! each a lambda threading a single memory state.

use target_lexicon::Triple;

use crate::ir::{FunctionType, Linkage, OpaqueOp, Operation, Type};
use crate::rvsdg::{Graph, Node, Output, Region, RvsdgModule};

fn module_with(graph: Graph) -> RvsdgModule {
    RvsdgModule {
        name: "aa-test".into(),
        triple: Triple::unknown(),
        data_layout: String::new(),
        graph,
    }
}

fn bit32() -> Type {
    Type::Bits(32)
}

fn ptr(ty: Type) -> Type {
    Type::pointer(ty)
}

fn bitconst(graph: &mut Graph, region: Region, value: i64) -> Output {
    let node = graph.add_simple(region, Operation::BitConstant { width: 32, value }, &[]);
    graph.output(node, 0)
}

fn alloca(graph: &mut Graph, region: Region, allocated: Type, size: Output) -> (Output, Output, Node) {
    let node = graph.add_simple(region, Operation::Alloca { allocated }, &[size]);
    (graph.output(node, 0), graph.output(node, 1), node)
}

fn merge2(graph: &mut Graph, region: Region, a: Output, b: Output) -> Output {
    let node = graph.add_simple(region, Operation::mem_merge(2), &[a, b]);
    graph.output(node, 0)
}

/// A one-state store; returns its output state and the node.
fn store1(
    graph: &mut Graph,
    region: Region,
    address: Output,
    value: Output,
    state: Output,
    ty: Type,
) -> (Output, Node) {
    let node = graph.add_simple(
        region,
        Operation::Store { ty, nstates: 1 },
        &[address, value, state],
    );
    (graph.output(node, 0), node)
}

/// A one-state load; returns its value, its output state, and the node.
fn load1(
    graph: &mut Graph,
    region: Region,
    address: Output,
    state: Output,
    ty: Type,
) -> (Output, Output, Node) {
    let node = graph.add_simple(region, Operation::Load { ty, nstates: 1 }, &[address, state]);
    (graph.output(node, 0), graph.output(node, 1), node)
}

fn binop32(graph: &mut Graph, region: Region, name: &str, a: Output, b: Output) -> Output {
    let node = graph.add_simple(
        region,
        Operation::Opaque(OpaqueOp {
            name: name.into(),
            params: vec![bit32(), bit32()],
            results: vec![bit32()],
        }),
        &[a, b],
    );
    graph.output(node, 0)
}

/// `f() { ***a = &b; **b = &c; *c = &d; }` over four allocas forming a
/// points-to chain.
pub struct StoreChainTest {
    pub module: RvsdgModule,
    pub lambda: Node,
    /// a, b, c, d.
    pub allocas: [Node; 4],
    /// The three stores, outermost first.
    pub stores: [Node; 3],
}

pub fn store_chain_graph() -> StoreChainTest {
    let mut graph = Graph::new();
    let sig = FunctionType::new(vec![Type::Memory], vec![Type::Memory]);
    let lambda = graph.create_lambda(graph.root(), "f", sig, Linkage::Export);
    let sub = graph.subregion(lambda, 0);
    let state = graph.lambda_params(lambda)[0];

    let size = bitconst(&mut graph, sub, 4);
    let (pd, sd, d) = alloca(&mut graph, sub, bit32(), size);
    let (pc, sc, c) = alloca(&mut graph, sub, ptr(bit32()), size);
    let (pb, sb, b) = alloca(&mut graph, sub, ptr(ptr(bit32())), size);
    let (pa, sa, a) = alloca(&mut graph, sub, ptr(ptr(ptr(bit32()))), size);

    let mux_d = merge2(&mut graph, sub, sd, state);
    let mux_c = merge2(&mut graph, sub, sc, mux_d);
    let mux_b = merge2(&mut graph, sub, sb, mux_c);
    let mux_a = merge2(&mut graph, sub, sa, mux_b);

    let (st1, store_b) = store1(&mut graph, sub, pa, pb, mux_a, ptr(ptr(ptr(bit32()))));
    let (st2, store_c) = store1(&mut graph, sub, pb, pc, st1, ptr(ptr(bit32())));
    let (st3, store_d) = store1(&mut graph, sub, pc, pd, st2, ptr(bit32()));

    graph.lambda_finalize(lambda, &[st3]);
    let output = graph.lambda_output(lambda);
    graph.add_export(output, "f");

    StoreChainTest {
        module: module_with(graph),
        lambda,
        allocas: [a, b, c, d],
        stores: [store_b, store_c, store_d],
    }
}

/// `f() { *x = &a; *y = &b; *p = &x; *p = &y; }`: x and y alias, p may
/// point to either.
pub struct StoreAliasTest {
    pub module: RvsdgModule,
    pub lambda: Node,
    /// a, b, x, y, p.
    pub allocas: [Node; 5],
}

pub fn store_alias_graph() -> StoreAliasTest {
    let mut graph = Graph::new();
    let sig = FunctionType::new(vec![Type::Memory], vec![Type::Memory]);
    let lambda = graph.create_lambda(graph.root(), "f", sig, Linkage::Export);
    let sub = graph.subregion(lambda, 0);
    let state = graph.lambda_params(lambda)[0];

    let size = bitconst(&mut graph, sub, 4);
    let (pa, sa, a) = alloca(&mut graph, sub, bit32(), size);
    let (pb, sb, b) = alloca(&mut graph, sub, bit32(), size);
    let (px, sx, x) = alloca(&mut graph, sub, ptr(bit32()), size);
    let (py, sy, y) = alloca(&mut graph, sub, ptr(bit32()), size);
    let (pp, sp, p) = alloca(&mut graph, sub, ptr(ptr(bit32())), size);

    let mut chain = state;
    for alloca_state in [sa, sb, sx, sy, sp] {
        chain = merge2(&mut graph, sub, alloca_state, chain);
    }

    let (c1, _) = store1(&mut graph, sub, px, pa, chain, ptr(bit32()));
    let (c2, _) = store1(&mut graph, sub, py, pb, c1, ptr(bit32()));
    let (c3, _) = store1(&mut graph, sub, pp, px, c2, ptr(ptr(bit32())));
    let (c4, _) = store1(&mut graph, sub, pp, py, c3, ptr(ptr(bit32())));

    graph.lambda_finalize(lambda, &[c4]);
    let output = graph.lambda_output(lambda);
    graph.add_export(output, "f");

    StoreAliasTest {
        module: module_with(graph),
        lambda,
        allocas: [a, b, x, y, p],
    }
}

/// `f(p) { x = *p; return *x; }`: loads through a pointer to pointer.
pub struct LoadPptTest {
    pub module: RvsdgModule,
    pub lambda: Node,
    pub load_p: Node,
}

pub fn load_ppt_graph() -> LoadPptTest {
    let mut graph = Graph::new();
    let sig = FunctionType::new(
        vec![ptr(ptr(bit32())), Type::Memory],
        vec![bit32(), Type::Memory],
    );
    let lambda = graph.create_lambda(graph.root(), "f", sig, Linkage::Export);
    let sub = graph.subregion(lambda, 0);
    let params = graph.lambda_params(lambda);
    let (p, state) = (params[0], params[1]);

    let (x, s1, load_p) = load1(&mut graph, sub, p, state, ptr(bit32()));
    let (value, s2, _load_x) = load1(&mut graph, sub, x, s1, bit32());

    graph.lambda_finalize(lambda, &[value, s2]);
    let output = graph.lambda_output(lambda);
    graph.add_export(output, "f");

    LoadPptTest {
        module: module_with(graph),
        lambda,
        load_p,
    }
}

/// `f(x,y) = *x + *y`, `g(x,y) = *x - *y`, and `h` allocating x, y, z and
/// computing `f(&x,&y) + g(&z,&z)`.
pub struct CallSumTest {
    pub module: RvsdgModule,
    pub lambda_f: Node,
    pub lambda_g: Node,
    pub lambda_h: Node,
    pub alloca_x: Node,
    pub alloca_y: Node,
    pub alloca_z: Node,
    pub call_f: Node,
    pub call_g: Node,
}

pub fn call_sum_graph() -> CallSumTest {
    let mut graph = Graph::new();
    let callee_sig = FunctionType::new(
        vec![ptr(bit32()), ptr(bit32()), Type::Memory],
        vec![bit32(), Type::Memory],
    );

    fn make_callee(graph: &mut Graph, sig: &FunctionType, name: &str, op: &str) -> Node {
        let lambda = graph.create_lambda(graph.root(), name, sig.clone(), Linkage::Internal);
        let sub = graph.subregion(lambda, 0);
        let params = graph.lambda_params(lambda);
        let (x, y, state) = (params[0], params[1], params[2]);
        let (vx, s1, _) = load1(graph, sub, x, state, bit32());
        let (vy, s2, _) = load1(graph, sub, y, s1, bit32());
        let result = binop32(graph, sub, op, vx, vy);
        graph.lambda_finalize(lambda, &[result, s2]);
        lambda
    }

    let lambda_f = make_callee(&mut graph, &callee_sig, "f", "add");
    let lambda_g = make_callee(&mut graph, &callee_sig, "g", "sub");

    let h_sig = FunctionType::new(vec![Type::Memory], vec![bit32(), Type::Memory]);
    let lambda_h = graph.create_lambda(graph.root(), "h", h_sig, Linkage::Export);
    let f_value = graph.lambda_output(lambda_f);
    let g_value = graph.lambda_output(lambda_g);
    let ctx_f = graph.lambda_add_ctxvar(lambda_h, f_value);
    let ctx_g = graph.lambda_add_ctxvar(lambda_h, g_value);
    let sub = graph.subregion(lambda_h, 0);
    let state = graph.lambda_params(lambda_h)[0];

    let size = bitconst(&mut graph, sub, 4);
    let (px, sx, alloca_x) = alloca(&mut graph, sub, bit32(), size);
    let (py, sy, alloca_y) = alloca(&mut graph, sub, bit32(), size);
    let (pz, sz, alloca_z) = alloca(&mut graph, sub, bit32(), size);

    let mut chain = state;
    for alloca_state in [sx, sy, sz] {
        chain = merge2(&mut graph, sub, alloca_state, chain);
    }

    let c1 = bitconst(&mut graph, sub, 1);
    let c2 = bitconst(&mut graph, sub, 2);
    let c3 = bitconst(&mut graph, sub, 3);
    let (chain, _) = store1(&mut graph, sub, px, c1, chain, bit32());
    let (chain, _) = store1(&mut graph, sub, py, c2, chain, bit32());
    let (chain, _) = store1(&mut graph, sub, pz, c3, chain, bit32());

    let call_f = graph.add_simple(
        sub,
        Operation::Call {
            sig: callee_sig.clone(),
        },
        &[ctx_f, px, py, chain],
    );
    let f_result = graph.output(call_f, 0);
    let f_state = graph.output(call_f, 1);
    let call_g = graph.add_simple(
        sub,
        Operation::Call { sig: callee_sig },
        &[ctx_g, pz, pz, f_state],
    );
    let g_result = graph.output(call_g, 0);
    let g_state = graph.output(call_g, 1);

    let sum = binop32(&mut graph, sub, "add", f_result, g_result);
    graph.lambda_finalize(lambda_h, &[sum, g_state]);
    let output = graph.lambda_output(lambda_h);
    graph.add_export(output, "h");

    CallSumTest {
        module: module_with(graph),
        lambda_f,
        lambda_g,
        lambda_h,
        alloca_x,
        alloca_y,
        alloca_z,
        call_f,
        call_g,
    }
}

/// `f(p) = p->x + p->y` over a two-field record.
pub struct GepStructTest {
    pub module: RvsdgModule,
    pub lambda: Node,
    pub gep0: Node,
    pub gep1: Node,
}

pub fn gep_struct_graph() -> GepStructTest {
    let mut graph = Graph::new();
    let record = Type::Record(vec![bit32(), bit32()]);
    let sig = FunctionType::new(
        vec![ptr(record.clone()), Type::Memory],
        vec![bit32(), Type::Memory],
    );
    let lambda = graph.create_lambda(graph.root(), "f", sig, Linkage::Export);
    let sub = graph.subregion(lambda, 0);
    let params = graph.lambda_params(lambda);
    let (p, state) = (params[0], params[1]);

    let zero = bitconst(&mut graph, sub, 0);
    let one = bitconst(&mut graph, sub, 1);
    let gep0 = graph.add_simple(
        sub,
        Operation::GetElementPtr {
            base: record.clone(),
            pointee: bit32(),
            noffsets: 1,
        },
        &[p, zero],
    );
    let gep1 = graph.add_simple(
        sub,
        Operation::GetElementPtr {
            base: record,
            pointee: bit32(),
            noffsets: 1,
        },
        &[p, one],
    );

    let field0 = graph.output(gep0, 0);
    let field1 = graph.output(gep1, 0);
    let (v0, s1, _) = load1(&mut graph, sub, field0, state, bit32());
    let (v1, s2, _) = load1(&mut graph, sub, field1, s1, bit32());
    let sum = binop32(&mut graph, sub, "add", v0, v1);
    graph.lambda_finalize(lambda, &[sum, s2]);
    let output = graph.lambda_output(lambda);
    graph.add_export(output, "f");

    GepStructTest {
        module: module_with(graph),
        lambda,
        gep0,
        gep1,
    }
}

/// `f(a, c, l) { for (i = 0; i < l; i++) a[i] = c; }` as a theta.
pub struct LoopArrayInitTest {
    pub module: RvsdgModule,
    pub lambda: Node,
    pub theta: Node,
    pub gep: Node,
    pub store: Node,
}

pub fn loop_array_init_graph() -> LoopArrayInitTest {
    let mut graph = Graph::new();
    let sig = FunctionType::new(
        vec![ptr(bit32()), bit32(), bit32(), Type::Memory],
        vec![Type::Memory],
    );
    let lambda = graph.create_lambda(graph.root(), "f", sig, Linkage::Export);
    let sub = graph.subregion(lambda, 0);
    let params = graph.lambda_params(lambda);
    let (a, c, l, state) = (params[0], params[1], params[2], params[3]);

    let zero = bitconst(&mut graph, sub, 0);
    let theta = graph.create_theta(sub);
    let lv_i = graph.theta_add_loop_var(theta, zero);
    let lv_a = graph.theta_add_loop_var(theta, a);
    let lv_c = graph.theta_add_loop_var(theta, c);
    let lv_l = graph.theta_add_loop_var(theta, l);
    let lv_s = graph.theta_add_loop_var(theta, state);

    let body = graph.subregion(theta, 0);
    let gep = graph.add_simple(
        body,
        Operation::GetElementPtr {
            base: bit32(),
            pointee: bit32(),
            noffsets: 1,
        },
        &[lv_a, lv_i],
    );
    let address = graph.output(gep, 0);
    let (next_state, store) = store1(&mut graph, body, address, lv_c, lv_s, bit32());

    let one = bitconst(&mut graph, body, 1);
    let next_i = binop32(&mut graph, body, "add", lv_i, one);
    let below = graph.add_simple(
        body,
        Operation::Opaque(OpaqueOp {
            name: "ult".into(),
            params: vec![bit32(), bit32()],
            results: vec![Type::Bits(1)],
        }),
        &[next_i, lv_l],
    );
    let below_value = graph.output(below, 0);
    let predicate = graph.add_simple(
        body,
        Operation::Match {
            nbits: 1,
            mapping: vec![(1, 1)],
            default_alternative: 0,
            nalternatives: 2,
        },
        &[below_value],
    );
    let predicate_value = graph.output(predicate, 0);

    let outs = graph.theta_finalize(theta, predicate_value, &[next_i, lv_a, lv_c, lv_l, next_state]);
    graph.lambda_finalize(lambda, &[outs[4]]);
    let output = graph.lambda_output(lambda);
    graph.add_export(output, "f");

    LoopArrayInitTest {
        module: module_with(graph),
        lambda,
        theta,
        gep,
        store,
    }
}
