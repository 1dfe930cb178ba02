//! Test fixtures for the tensor-core rewrite.
//!
//! [`GemmConfig`] assembles the canonical post-scheduling GEMM pattern: the
//! thread-extent annotations, local realizes and scopes, the pragma region,
//! and the five store groups (accumulator init, two fragment copy-ins, the
//! multiply-accumulate, and the copy-out), together with the matching
//! compute definition and extern buffer map.

use std::sync::Arc;

use zmora_device::registry::{CpuDeviceApi, register_api};
use zmora_device::{DeviceSpec, Target, with_target};
use zmora_dtype::DType;
use zmora_ir::{
    AttrKey, AttrNode, Buffer, BufferMap, Builtin, ComputeOp, Expr, ExprKind, ForKind, IterVar,
    Range, Region, ReduceOp, Schedule, Stmt, StmtKind, StmtVisitor, Tensor, TensorKey, Var,
    walk_expr, walk_stmt,
};

/// Register a stub CUDA device and run `f` under a CUDA target, the
/// environment the rewrite expects.
pub fn with_cuda<R>(f: impl FnOnce() -> R) -> R {
    register_api(DeviceSpec::Cuda { device_id: 0 }, Arc::new(CpuDeviceApi));
    with_target(Target::cuda(), f)
}

pub struct GemmConfig {
    pub input_dtype: DType,
    pub acc_dtype: DType,
    pub tx: i64,
    pub ty: i64,
    pub thread_m: i64,
    pub thread_n: i64,
    pub thread_k: i64,
    /// Classify A as `matrix_b` and B as `matrix_a`, forcing operand
    /// canonicalization to swap them.
    pub swapped: bool,
    pub with_pragma: bool,
    /// Realize scope of the A fragment; anything but `"local"` defeats the
    /// matcher.
    pub a_scope: &'static str,
    pub a_global_shape: (i64, i64),
    pub b_global_shape: (i64, i64),
    pub c_global_shape: (i64, i64),
    /// Override the B fragment's realize shape, e.g. to force inconsistent
    /// thread-tile observations.
    pub b_frag_shape: Option<(i64, i64)>,
}

impl Default for GemmConfig {
    fn default() -> Self {
        Self {
            input_dtype: DType::Float16,
            acc_dtype: DType::Float32,
            tx: 16,
            ty: 2,
            thread_m: 1,
            thread_n: 8,
            thread_k: 16,
            swapped: false,
            with_pragma: true,
            a_scope: "local",
            a_global_shape: (16, 16),
            b_global_shape: (16, 16),
            c_global_shape: (16, 16),
            b_frag_shape: None,
        }
    }
}

impl GemmConfig {
    /// One-bit inputs, `(8, 8, 128)` warp tile.
    pub fn int1() -> Self {
        Self {
            input_dtype: DType::Int1,
            acc_dtype: DType::Int32,
            tx: 8,
            ty: 4,
            thread_m: 1,
            thread_n: 2,
            thread_k: 128,
            a_global_shape: (16, 128),
            b_global_shape: (128, 16),
            c_global_shape: (16, 16),
            ..Self::default()
        }
    }

    pub fn build(self) -> GemmFixture {
        let a_global = Tensor::new("A", self.input_dtype);
        let b_global = Tensor::new("B", self.input_dtype);
        let c_global = Tensor::new("C", self.acc_dtype);
        let a_frag = Tensor::new("A.local", self.input_dtype);
        let b_frag = Tensor::new("B.local", self.input_dtype);
        let c_frag = Tensor::new("C.local", self.acc_dtype);

        let tx_var = Var::index("threadIdx.x");
        let ty_var = Var::index("threadIdx.y");

        let (a_shape, b_shape) = if self.swapped {
            ((self.thread_n, self.thread_k), (self.thread_k, self.thread_m))
        } else {
            ((self.thread_m, self.thread_k), (self.thread_k, self.thread_n))
        };
        let b_shape = self.b_frag_shape.unwrap_or(b_shape);
        let c_shape = (self.thread_n, self.thread_m);

        // Accumulator init: C.local[n, m] = 0
        let n_c = Var::index("n_c");
        let m_c = Var::index("m_c");
        let init = loop_nest(
            &[(&n_c, c_shape.0), (&m_c, c_shape.1)],
            Stmt::store(
                c_frag.clone(),
                imm_zero(self.acc_dtype),
                [Expr::var(&n_c), Expr::var(&m_c)],
            ),
        );

        // Fragment copy-ins from the global operands.
        let p_a = Var::index("p_a");
        let q_a = Var::index("q_a");
        let copy_a = loop_nest(
            &[(&p_a, a_shape.0), (&q_a, a_shape.1)],
            Stmt::store(
                a_frag.clone(),
                Expr::producer_load(a_global.clone(), [Expr::var(&p_a), Expr::var(&q_a)]),
                [Expr::var(&p_a), Expr::var(&q_a)],
            ),
        );
        let p_b = Var::index("p_b");
        let q_b = Var::index("q_b");
        let copy_b = loop_nest(
            &[(&p_b, b_shape.0), (&q_b, b_shape.1)],
            Stmt::store(
                b_frag.clone(),
                Expr::producer_load(b_global.clone(), [Expr::var(&p_b), Expr::var(&q_b)]),
                [Expr::var(&p_b), Expr::var(&q_b)],
            ),
        );

        // The accumulation itself.
        let n_o = Var::index("n_o");
        let m_o = Var::index("m_o");
        let k_o = Var::index("k_o");
        let (a_idx, b_idx) = if self.swapped {
            ([&n_o, &k_o], [&k_o, &m_o])
        } else {
            ([&m_o, &k_o], [&k_o, &n_o])
        };
        let load_a = Expr::producer_load(a_frag.clone(), a_idx.map(Expr::var));
        let load_b = Expr::producer_load(b_frag.clone(), b_idx.map(Expr::var));
        let load_c = Expr::producer_load(c_frag.clone(), [Expr::var(&n_o), Expr::var(&m_o)]);
        let product =
            Expr::cast(self.acc_dtype, load_a).mul(&Expr::cast(self.acc_dtype, load_b));
        let mma_value = load_c.add(&Expr::cast(self.acc_dtype, product));
        let mma = loop_nest(
            &[(&n_o, c_shape.0), (&m_o, c_shape.1), (&k_o, self.thread_k)],
            Stmt::store(c_frag.clone(), mma_value, [Expr::var(&n_o), Expr::var(&m_o)]),
        );

        // Copy-out to the global result; the destination address carries
        // thread indices for the warp-canonicalization to rewrite.
        let n_s = Var::index("n_s");
        let m_s = Var::index("m_s");
        let copy_out = loop_nest(
            &[(&n_s, c_shape.0), (&m_s, c_shape.1)],
            Stmt::store(
                c_global.clone(),
                Expr::producer_load(c_frag.clone(), [Expr::var(&n_s), Expr::var(&m_s)]),
                [
                    Expr::var(&ty_var).mul(&Expr::int32(self.thread_n)).add(&Expr::var(&n_s)),
                    Expr::var(&tx_var).add(&Expr::var(&m_s)),
                ],
            ),
        );

        let x_outer = Var::index("x_outer");
        let body = Stmt::for_loop(
            x_outer.clone(),
            Expr::int32(0),
            Expr::int32(4),
            ForKind::Serial,
            Stmt::seq(vec![init, copy_a, copy_b, mma, copy_out]),
        );

        let body = if self.with_pragma {
            Stmt::attr(
                AttrNode::Tensor(c_frag.clone()),
                AttrKey::PragmaTensorCore,
                Expr::int32(1),
                body,
            )
        } else {
            body
        };

        let body = scoped_realize(&b_frag, b_shape, "local", body);
        let body = scoped_realize(&a_frag, a_shape, self.a_scope, body);
        let body = scoped_realize(&c_frag, c_shape, "local", body);

        let body = Stmt::attr(
            AttrNode::IterVar(IterVar::thread(tx_var.clone(), "threadIdx.x")),
            AttrKey::ThreadExtent,
            Expr::int32(self.tx),
            body,
        );
        let stmt = Stmt::attr(
            AttrNode::IterVar(IterVar::thread(ty_var.clone(), "threadIdx.y")),
            AttrKey::ThreadExtent,
            Expr::int32(self.ty),
            body,
        );

        let schedule = gemm_schedule(&a_global, &b_global, self.acc_dtype, self.swapped);

        let mut extern_buffer = BufferMap::new();
        for (tensor, shape) in [
            (&a_global, self.a_global_shape),
            (&b_global, self.b_global_shape),
            (&c_global, self.c_global_shape),
        ] {
            let buffer = Buffer::builder()
                .data(Var::new(tensor.name.clone(), DType::Handle))
                .name(tensor.name.clone())
                .dtype(tensor.dtype)
                .shape(vec![Expr::int32(shape.0), Expr::int32(shape.1)])
                .build();
            extern_buffer.insert(TensorKey(tensor.clone()), Arc::new(buffer));
        }

        GemmFixture {
            stmt,
            schedule,
            extern_buffer,
            a_global,
            b_global,
            c_global,
            a_frag,
            b_frag,
            c_frag,
            tx_var,
            ty_var,
            k_loop: k_o,
            n_loop: n_o,
            outer_loop: x_outer,
        }
    }
}

pub struct GemmFixture {
    pub stmt: Arc<Stmt>,
    pub schedule: Schedule,
    pub extern_buffer: BufferMap,
    pub a_global: Arc<Tensor>,
    pub b_global: Arc<Tensor>,
    pub c_global: Arc<Tensor>,
    pub a_frag: Arc<Tensor>,
    pub b_frag: Arc<Tensor>,
    pub c_frag: Arc<Tensor>,
    pub tx_var: Arc<Var>,
    pub ty_var: Arc<Var>,
    pub k_loop: Arc<Var>,
    pub n_loop: Arc<Var>,
    pub outer_loop: Arc<Var>,
}

fn imm_zero(dtype: DType) -> Arc<Expr> {
    if dtype.is_float() { Expr::float(dtype, 0.0) } else { Expr::int(dtype, 0) }
}

fn loop_nest(vars: &[(&Arc<Var>, i64)], body: Arc<Stmt>) -> Arc<Stmt> {
    vars.iter().rev().fold(body, |body, (var, extent)| {
        Stmt::for_loop((*var).clone(), Expr::int32(0), Expr::int32(*extent), ForKind::Serial, body)
    })
}

fn scoped_realize(tensor: &Arc<Tensor>, shape: (i64, i64), scope: &str, body: Arc<Stmt>) -> Arc<Stmt> {
    let bounds: Region = [shape.0, shape.1]
        .into_iter()
        .map(|extent| Range::from_min_extent(Expr::int32(0), Expr::int32(extent)))
        .collect();
    let realize =
        Stmt::realize(tensor.clone(), bounds, Expr::int(DType::Bool, 1), body);
    Stmt::attr(AttrNode::Tensor(tensor.clone()), AttrKey::RealizeScope, Expr::string(scope), realize)
}

/// The compute definition scheduling started from: `C[x, y]` accumulating a
/// cast multiply over the single reduction axis.
fn gemm_schedule(a: &Arc<Tensor>, b: &Arc<Tensor>, acc_dtype: DType, swapped: bool) -> Schedule {
    let x = Var::index("x");
    let y = Var::index("y");
    let rk = Var::index("rk");

    let (a_idx, b_idx) = if swapped { ([&x, &rk], [&rk, &y]) } else { ([&y, &rk], [&rk, &x]) };
    let load_a = Expr::producer_load(a.clone(), a_idx.map(Expr::var));
    let load_b = Expr::producer_load(b.clone(), b_idx.map(Expr::var));
    let product = Expr::cast(acc_dtype, load_a).mul(&Expr::cast(acc_dtype, load_b));

    let rk_iv = IterVar::new(rk);
    let source = Expr::cast(acc_dtype, product);
    let reduce = Expr::reduce([ReduceOp::Add], vec![source], vec![rk_iv.clone()], None)
        .expect("reduce construction");

    let compute =
        ComputeOp::new("C", vec![IterVar::new(x), IterVar::new(y)], vec![rk_iv], vec![reduce]);
    Schedule::new(vec![compute])
}

// ---- result scanners -----------------------------------------------------

/// Every `Evaluate(Call)` in the tree, outermost first.
pub fn collect_calls(stmt: &Arc<Stmt>) -> Vec<(Builtin, Vec<Arc<Expr>>)> {
    struct Collector(Vec<(Builtin, Vec<Arc<Expr>>)>);
    impl StmtVisitor for Collector {
        fn visit_stmt(&mut self, stmt: &Arc<Stmt>) {
            if let StmtKind::Evaluate { value } = stmt.kind()
                && let ExprKind::Call { op, args, .. } = value.kind()
            {
                self.0.push((*op, args.clone()));
            }
            walk_stmt(self, stmt);
        }
    }
    let mut collector = Collector(Vec::new());
    collector.visit_stmt(stmt);
    collector.0
}

/// `(buffer scope, tensor name)` of every `buffer_bind_scope` annotation.
pub fn collect_bind_scopes(stmt: &Arc<Stmt>) -> Vec<(String, String)> {
    struct Collector(Vec<(String, String)>);
    impl StmtVisitor for Collector {
        fn visit_stmt(&mut self, stmt: &Arc<Stmt>) {
            if let StmtKind::AttrStmt { key: AttrKey::BufferBindScope, node, .. } = stmt.kind()
                && let AttrNode::BufferBind { buffer, tensor } = node
            {
                self.0.push((buffer.scope.clone(), tensor.name.clone()));
            }
            walk_stmt(self, stmt);
        }
    }
    let mut collector = Collector(Vec::new());
    collector.visit_stmt(stmt);
    collector.0
}

/// Realize bounds of the tensor with the given id.
pub fn realize_bounds(stmt: &Arc<Stmt>, tensor_id: u64) -> Option<Region> {
    struct Finder {
        tensor_id: u64,
        found: Option<Region>,
    }
    impl StmtVisitor for Finder {
        fn visit_stmt(&mut self, stmt: &Arc<Stmt>) {
            if let StmtKind::ProducerRealize { producer, bounds, .. } = stmt.kind()
                && producer.id == self.tensor_id
            {
                self.found = Some(bounds.clone());
            }
            walk_stmt(self, stmt);
        }
    }
    let mut finder = Finder { tensor_id, found: None };
    finder.visit_stmt(stmt);
    finder.found
}

/// Value of the `realize_scope` annotation on the tensor with the given id.
pub fn realize_scope_value(stmt: &Arc<Stmt>, tensor_id: u64) -> Option<String> {
    struct Finder {
        tensor_id: u64,
        found: Option<String>,
    }
    impl StmtVisitor for Finder {
        fn visit_stmt(&mut self, stmt: &Arc<Stmt>) {
            if let StmtKind::AttrStmt { key: AttrKey::RealizeScope, node, value, .. } = stmt.kind()
                && node.as_tensor().is_some_and(|t| t.id == self.tensor_id)
            {
                self.found = value.as_string().map(str::to_string);
            }
            walk_stmt(self, stmt);
        }
    }
    let mut finder = Finder { tensor_id, found: None };
    finder.visit_stmt(stmt);
    finder.found
}

/// Extent expression of the loop over the var with the given id.
pub fn loop_extent(stmt: &Arc<Stmt>, var_id: u64) -> Option<Arc<Expr>> {
    struct Finder {
        var_id: u64,
        found: Option<Arc<Expr>>,
    }
    impl StmtVisitor for Finder {
        fn visit_stmt(&mut self, stmt: &Arc<Stmt>) {
            if let StmtKind::For { var, extent, .. } = stmt.kind()
                && var.id == self.var_id
            {
                self.found = Some(extent.clone());
            }
            walk_stmt(self, stmt);
        }
    }
    let mut finder = Finder { var_id, found: None };
    finder.visit_stmt(stmt);
    finder.found
}

/// Whether any var named `name` occurs in the expression.
pub fn expr_mentions_var(expr: &Arc<Expr>, name: &str) -> bool {
    struct Finder<'a> {
        name: &'a str,
        found: bool,
    }
    impl StmtVisitor for Finder<'_> {
        fn visit_expr(&mut self, expr: &Arc<Expr>) {
            if expr.as_var().is_some_and(|v| v.name == self.name) {
                self.found = true;
            }
            walk_expr(self, expr);
        }
    }
    let mut finder = Finder { name, found: false };
    finder.visit_expr(expr);
    finder.found
}
