//! Stage 4: produce the rewritten tree.
//!
//! Realize bounds of fragment tensors shrink to tile size, their
//! `realize_scope` values become `wmma.<role>`, matched stores turn into
//! fragment intrinsic calls under `buffer_bind_scope` annotations, and loops
//! that used to step over fragment elements shrink by their recorded scaling
//! factor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use zmora_dtype::DType;
use zmora_ir::{
    Analyzer, AttrKey, AttrNode, Buffer, Builtin, Expr, Range, Region, Stmt, StmtKind, StmtMutator,
    Tensor, Var, walk_expr_mut, walk_stmt_mut,
};

use super::buffer_analysis::BufferFacts;
use super::matcher::{MatchFacts, MmaOperands};
use super::schedule_analysis::RoleFacts;
use super::{FragmentRole, MatrixLayout, Tile, simplify_name};

/// One synthesized fragment view: the opaque buffer record, the tensor it
/// binds, and the `tvm_tuple` describing the bound region.
struct FragmentBind {
    buffer: Arc<Buffer>,
    tensor: Arc<Tensor>,
    tuple: Arc<Expr>,
}

/// Stage 4 mutator. Run with [`StmtMutator::mutate_stmt`].
pub struct TensorCoreMutator<'a> {
    roles: &'a HashMap<String, FragmentRole>,
    layouts: &'a HashMap<String, MatrixLayout>,
    mma_sync: &'a IndexMap<u64, MmaOperands>,
    strides: &'a HashMap<String, Vec<Arc<Expr>>>,
    frag_reg: &'a HashSet<String>,
    loop_scaling: &'a HashMap<u64, i64>,
    frag_load: &'a IndexMap<u64, Arc<Expr>>,
    frag_store: &'a IndexMap<u64, Arc<Expr>>,
    storage_scope: &'a HashMap<u64, String>,
    /// Original realize bounds, recorded on the way down so element offsets
    /// can be computed against the pre-rewrite region.
    bounds: HashMap<u64, Region>,
    warp_tile: Tile,
    warp_threads_y: i64,
    analyzer: Analyzer,
}

impl<'a> TensorCoreMutator<'a> {
    pub fn new(match_facts: &'a MatchFacts, role_facts: &'a RoleFacts, buffer_facts: &'a BufferFacts) -> Self {
        Self {
            roles: &role_facts.roles,
            layouts: &role_facts.layouts,
            mma_sync: &role_facts.mma_sync,
            strides: &buffer_facts.strides,
            frag_reg: &match_facts.frag_reg,
            loop_scaling: &buffer_facts.loop_scaling,
            frag_load: &buffer_facts.frag_load,
            frag_store: &buffer_facts.frag_store,
            storage_scope: &buffer_facts.storage_scope,
            bounds: HashMap::new(),
            warp_tile: buffer_facts.warp_tile,
            warp_threads_y: buffer_facts.warp_threads_y,
            analyzer: Analyzer::new(),
        }
    }

    fn role_of(&self, name: &str) -> FragmentRole {
        *self
            .roles
            .get(simplify_name(name))
            .unwrap_or_else(|| panic!("cannot find matrix info for {name}"))
    }

    /// Tile extents for the innermost two dims of a fragment's realize and
    /// bind shape, `(second-innermost, innermost)`.
    fn tile_size(&self, name: &str) -> (Arc<Expr>, Arc<Expr>) {
        let role = self.role_of(name);
        let layout = self
            .layouts
            .get(simplify_name(name))
            .unwrap_or_else(|| panic!("cannot find matrix info for {name}"));
        let Tile { m, n, k } = self.warp_tile;
        let (size0, size1) = match (role, layout) {
            (FragmentRole::MatrixA, MatrixLayout::ColMajor) => (k, m),
            (FragmentRole::MatrixA, MatrixLayout::RowMajor) => (m, k),
            (FragmentRole::MatrixB, MatrixLayout::RowMajor) => (k, n),
            (FragmentRole::MatrixB, MatrixLayout::ColMajor) => (n, k),
            (FragmentRole::Accumulator, _) => (n, m),
        };
        (Expr::int32(size0), Expr::int32(size1))
    }

    /// Second-innermost stride of a buffer, the leading dimension argument
    /// of the matrix load/store intrinsics.
    fn leading_stride(&self, name: &str) -> Arc<Expr> {
        let strides = self.strides.get(name).unwrap_or_else(|| panic!("cannot find stride for {name}"));
        assert!(strides.len() >= 2, "buffer {name} has fewer than 2 strides");
        strides[strides.len() - 2].clone()
    }

    /// Canonicalize a per-thread address to the first thread of its warp
    /// row, so each warp issues a single fragment instruction.
    fn unify_thread_index(&self, expr: &Arc<Expr>) -> Arc<Expr> {
        let mut thread_idx = ThreadIdxMutator { warp_y: self.warp_threads_y };
        thread_idx.mutate_expr(expr)
    }

    /// Build the opaque buffer record viewing `load`'s fragment region.
    fn fragment_bind(&self, load: &Arc<Expr>) -> FragmentBind {
        let (tensor, indices) =
            load.as_producer_load().unwrap_or_else(|| panic!("fragment bind target must be a load"));
        let bounds = self
            .bounds
            .get(&tensor.id)
            .unwrap_or_else(|| panic!("missing realize bounds for {}", tensor.name));
        assert!(bounds.len() >= 2, "fragment {} has fewer than 2 dimensions", tensor.name);
        assert_eq!(
            indices.len(),
            bounds.len(),
            "fragment {} indexed with rank {} against bounds of rank {}",
            tensor.name,
            indices.len(),
            bounds.len()
        );

        let mut shape: Vec<Arc<Expr>> =
            bounds[..bounds.len() - 2].iter().map(|range| range.extent.clone()).collect();
        let (tile0, tile1) = self.tile_size(&tensor.name);
        shape.push(tile0);
        shape.push(tile1);

        let mut strides = Vec::with_capacity(shape.len());
        for i in 1..shape.len() {
            let mut stride = Expr::int32(1);
            for dim in shape[i..].iter().rev() {
                stride = stride.mul(dim);
            }
            strides.push(stride);
        }
        strides.push(Expr::int32(1));

        let mut elem_offset = Expr::int32(0);
        for ((stride, index), range) in strides.iter().zip(indices).zip(bounds) {
            elem_offset = elem_offset.add(&stride.mul(&index.sub(&range.min)));
        }

        let role = self.role_of(&tensor.name);
        let buffer = Arc::new(
            Buffer::builder()
                .data(Var::new(tensor.name.clone(), DType::Handle))
                .name(tensor.name.clone())
                .scope(format!("wmma.{}", role.as_ref()))
                .dtype(tensor.dtype)
                .strides(strides)
                .shape(shape.clone())
                .elem_offset(self.analyzer.simplify(&elem_offset))
                .data_alignment(1)
                .offset_factor(1)
                .build(),
        );

        let mut args = Vec::with_capacity(indices.len() * 2);
        for (index, dim) in indices.iter().zip(&shape) {
            args.push(index.clone());
            args.push(dim.clone());
        }
        let tuple = Expr::call(DType::Handle, Builtin::TvmTuple, args);

        FragmentBind { buffer, tensor: tensor.clone(), tuple }
    }

    /// Fold binds around `innermost`, first bind outermost.
    fn wrap_binds(binds: impl IntoIterator<Item = FragmentBind>, innermost: Arc<Stmt>) -> Arc<Stmt> {
        let binds: Vec<_> = binds.into_iter().collect();
        binds.into_iter().rev().fold(innermost, |body, bind| {
            Stmt::attr(
                AttrNode::BufferBind { buffer: bind.buffer, tensor: bind.tensor },
                AttrKey::BufferBindScope,
                bind.tuple,
                body,
            )
        })
    }

    fn warp_tile_args(&self) -> [Arc<Expr>; 3] {
        [Expr::int32(self.warp_tile.m), Expr::int32(self.warp_tile.n), Expr::int32(self.warp_tile.k)]
    }

    fn emit_mma_sync(&self, operands: &MmaOperands) -> Arc<Stmt> {
        let (tensor_a, _) =
            operands.a.as_producer_load().unwrap_or_else(|| panic!("mma operand A must be a load"));
        let (tensor_b, _) =
            operands.b.as_producer_load().unwrap_or_else(|| panic!("mma operand B must be a load"));
        let builtin = if tensor_a.dtype == DType::Int1 && tensor_b.dtype == DType::Int1 {
            Builtin::TvmBmmaSync
        } else {
            Builtin::TvmMmaSync
        };

        let bind_a = self.fragment_bind(&operands.a);
        let bind_b = self.fragment_bind(&operands.b);
        let bind_c = self.fragment_bind(&operands.c);

        // The accumulator is both destination and addend.
        let args = vec![
            Expr::var(&bind_c.buffer.data),
            bind_c.buffer.elem_offset.clone(),
            Expr::var(&bind_a.buffer.data),
            bind_a.buffer.elem_offset.clone(),
            Expr::var(&bind_b.buffer.data),
            bind_b.buffer.elem_offset.clone(),
            Expr::var(&bind_c.buffer.data),
            bind_c.buffer.elem_offset.clone(),
        ];
        let call = Expr::call(DType::Handle, builtin, args);
        Self::wrap_binds([bind_a, bind_b, bind_c], Stmt::evaluate(call))
    }

    fn emit_frag_load(&self, dst: &Arc<Expr>, store_value: &Arc<Expr>) -> Arc<Stmt> {
        let [m, n, k] = self.warp_tile_args();

        if store_value.is_imm() {
            let bind = self.fragment_bind(dst);
            let args = vec![
                Expr::var(&bind.buffer.data),
                m,
                n,
                k,
                bind.buffer.elem_offset.clone(),
                store_value.clone(),
            ];
            let call = Expr::call(DType::Handle, Builtin::TvmFillFragment, args);
            return Self::wrap_binds([bind], Stmt::evaluate(call));
        }

        let (src_tensor, _) = store_value
            .as_producer_load()
            .unwrap_or_else(|| panic!("can only load a fragment from a buffer"));
        let stride = self.leading_stride(&src_tensor.name);

        let src_addr = self.unify_thread_index(store_value);
        let src = Expr::call(store_value.dtype(), Builtin::CallExtern, vec![Expr::string("&"), src_addr]);

        let (dst_tensor, _) =
            dst.as_producer_load().unwrap_or_else(|| panic!("fragment load target must be a load"));
        let layout = self
            .layouts
            .get(simplify_name(&dst_tensor.name))
            .unwrap_or_else(|| panic!("cannot determine matrix major for {}", dst_tensor.name));

        let bind = self.fragment_bind(dst);
        let args = vec![
            Expr::var(&bind.buffer.data),
            m,
            n,
            k,
            bind.buffer.elem_offset.clone(),
            src,
            stride,
            Expr::string(layout.as_ref()),
        ];
        let call = Expr::call(DType::Handle, Builtin::TvmLoadMatrixSync, args);
        Self::wrap_binds([bind], Stmt::evaluate(call))
    }

    fn emit_frag_store(&self, producer: &Arc<Tensor>, dst: &Arc<Expr>, store_value: &Arc<Expr>) -> Arc<Stmt> {
        let stride = self.leading_stride(&producer.name);

        let dst_addr = self.unify_thread_index(dst);
        let addr = Expr::call(DType::Handle, Builtin::CallExtern, vec![Expr::string("&"), dst_addr]);

        let [m, n, k] = self.warp_tile_args();
        let bind = self.fragment_bind(store_value);
        let args = vec![
            Expr::var(&bind.buffer.data),
            m,
            n,
            k,
            bind.buffer.elem_offset.clone(),
            addr,
            stride,
            Expr::string(MatrixLayout::ColMajor.as_ref()),
        ];
        let call = Expr::call(DType::Handle, Builtin::TvmStoreMatrixSync, args);
        Self::wrap_binds([bind], Stmt::evaluate(call))
    }
}

impl StmtMutator for TensorCoreMutator<'_> {
    fn mutate_stmt(&mut self, stmt: &Arc<Stmt>) -> Arc<Stmt> {
        match stmt.kind() {
            StmtKind::ProducerRealize { producer, bounds, .. } => {
                self.bounds.insert(producer.id, bounds.clone());
                let mutated = walk_stmt_mut(self, stmt);
                if !self.frag_reg.contains(&producer.name) {
                    return mutated;
                }

                let StmtKind::ProducerRealize { producer, bounds, condition, body } = mutated.kind()
                else {
                    unreachable!("realize mutation changed statement kind");
                };
                assert!(bounds.len() >= 2, "fragment {} has fewer than 2 dimensions", producer.name);

                let (tile0, tile1) = self.tile_size(&producer.name);
                let mut new_bounds: Region = bounds[..bounds.len() - 2].iter().cloned().collect();
                new_bounds.push(Range::from_min_extent(bounds[bounds.len() - 2].min.clone(), tile0));
                new_bounds.push(Range::from_min_extent(bounds[bounds.len() - 1].min.clone(), tile1));
                Stmt::realize(producer.clone(), new_bounds, condition.clone(), body.clone())
            }
            StmtKind::AttrStmt { key: AttrKey::RealizeScope, node, value: _, body }
                if node.as_tensor().is_some_and(|t| self.frag_reg.contains(&t.name)) =>
            {
                let tensor = node.as_tensor().expect("guard checked tensor node");
                if let Some(scope) = self.storage_scope.get(&tensor.id) {
                    assert_eq!(scope, "local", "fragment {} must live in local scope", tensor.name);
                }
                let role = self.role_of(&tensor.name);
                let value = Expr::string(format!("wmma.{}", role.as_ref()));
                let body = self.mutate_stmt(body);
                Stmt::attr(node.clone(), AttrKey::RealizeScope, value, body)
            }
            StmtKind::ProducerStore { producer, value, .. } => {
                if let Some(operands) = self.mma_sync.get(&stmt.id) {
                    return self.emit_mma_sync(operands);
                }
                if let Some(dst) = self.frag_load.get(&stmt.id) {
                    return self.emit_frag_load(dst, value);
                }
                if let Some(dst) = self.frag_store.get(&stmt.id) {
                    return self.emit_frag_store(producer, dst, value);
                }
                walk_stmt_mut(self, stmt)
            }
            StmtKind::For { var, extent, .. } => {
                let mutated = walk_stmt_mut(self, stmt);
                let Some(factor) = self.loop_scaling.get(&var.id) else {
                    return mutated;
                };
                let Some(original_extent) = extent.as_int() else {
                    return mutated;
                };

                let StmtKind::For { var, min, kind, body, thread_binding, .. } = mutated.kind() else {
                    unreachable!("loop mutation changed statement kind");
                };
                let scaled = Expr::int(extent.dtype(), original_extent / factor);
                match thread_binding {
                    Some(binding) => {
                        Stmt::for_thread(var.clone(), min.clone(), scaled, binding.clone(), body.clone())
                    }
                    None => Stmt::for_loop(var.clone(), min.clone(), scaled, *kind, body.clone()),
                }
            }
            _ => walk_stmt_mut(self, stmt),
        }
    }
}

/// Rewrites `threadIdx.x` to 0 and `threadIdx.y` to the first lane of its
/// warp row, `(y / warp_y) * warp_y`.
struct ThreadIdxMutator {
    warp_y: i64,
}

impl StmtMutator for ThreadIdxMutator {
    fn mutate_expr(&mut self, expr: &Arc<Expr>) -> Arc<Expr> {
        if let Some(var) = expr.as_var() {
            if var.name == "threadIdx.x" {
                return Expr::int(var.dtype, 0);
            }
            if var.name == "threadIdx.y" {
                let warp_y = Expr::int(var.dtype, self.warp_y);
                return expr.div(&warp_y).mul(&warp_y);
            }
        }
        walk_expr_mut(self, expr)
    }
}
