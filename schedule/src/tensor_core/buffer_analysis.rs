//! Stage 3: buffer geometry, thread extents and tile derivation.
//!
//! One walk over the IR collects, per buffer, the strides and realize bounds
//! needed by the rewrite, and per fragment the thread-tile components read
//! off the innermost two shape dimensions. The warp tile is the thread tile
//! scaled by the thread extents; anything outside the supported set
//! disqualifies the whole invocation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use zmora_ir::{
    Analyzer, AttrKey, Builtin, Expr, ExprKind, Region, Stmt, StmtKind, StmtVisitor, Tensor,
    TensorKey, walk_expr, walk_stmt,
};

use super::matcher::MatchFacts;
use super::schedule_analysis::RoleFacts;
use super::{FragmentRole, MatrixLayout, Tile, assign_or_check, simplify_name};

/// Warp tiles the wmma intrinsics support.
const SUPPORTED_WARP_TILES: [(i64, i64, i64); 5] =
    [(16, 16, 16), (8, 32, 16), (32, 8, 16), (8, 8, 32), (8, 8, 128)];

/// Facts published by buffer analysis.
#[derive(Debug)]
pub struct BufferFacts {
    /// Buffer name -> outermost-first strides.
    pub strides: HashMap<String, Vec<Arc<Expr>>>,
    /// Store node id -> load expression of the stored-to fragment element.
    pub frag_load: IndexMap<u64, Arc<Expr>>,
    /// Store node id -> load expression of the destination element.
    pub frag_store: IndexMap<u64, Arc<Expr>>,
    /// Loop var id -> factor its extent shrinks by after the rewrite.
    pub loop_scaling: HashMap<u64, i64>,
    /// Tensor id -> last observed realize scope, for mutator cross-checks.
    pub storage_scope: HashMap<u64, String>,
    pub warp_tile: Tile,
    pub warp_threads_y: i64,
}

#[derive(Debug, Clone, Copy, Default)]
struct DimAlignInfo {
    align_factor: i64,
    align_offset: i64,
}

#[derive(Debug, Clone)]
struct BufferInfo {
    name: String,
    strides: Vec<Arc<Expr>>,
    shape: Vec<Arc<Expr>>,
    bounds: Region,
    external: bool,
    released: bool,
}

impl BufferInfo {
    /// Indices relative to the realize origin. External buffers carry no
    /// bounds and index from zero already.
    fn rel_index(&self, indices: &[Arc<Expr>]) -> Vec<Arc<Expr>> {
        if self.bounds.is_empty() {
            return indices.to_vec();
        }
        assert_eq!(
            self.bounds.len(),
            indices.len(),
            "buffer {} indexed with rank {} against bounds of rank {}",
            self.name,
            indices.len(),
            self.bounds.len()
        );
        indices.iter().zip(&self.bounds).map(|(index, range)| index.sub(&range.min)).collect()
    }
}

/// Stage 3 visitor. Run with [`StmtVisitor::visit_stmt`], then validate and
/// take the result via [`BufferAnalyser::into_facts`].
pub struct BufferAnalyser<'a> {
    roles: &'a HashMap<String, FragmentRole>,
    layouts: &'a HashMap<String, MatrixLayout>,
    frag_reg: &'a HashSet<String>,
    buf_map: HashMap<TensorKey, BufferInfo>,
    dim_align: HashMap<u64, Vec<DimAlignInfo>>,
    storage_scope: HashMap<u64, String>,
    strides: HashMap<String, Vec<Arc<Expr>>>,
    frag_load: IndexMap<u64, Arc<Expr>>,
    frag_store: IndexMap<u64, Arc<Expr>>,
    loop_scaling: HashMap<u64, i64>,
    thread_extent: HashMap<String, i64>,
    thread_tile: Tile,
    warp_tile: Tile,
    warp_threads_y: i64,
    invalid: bool,
    analyzer: Analyzer,
}

impl<'a> BufferAnalyser<'a> {
    pub fn new(
        extern_buffer: &zmora_ir::BufferMap,
        role_facts: &'a RoleFacts,
        match_facts: &'a MatchFacts,
    ) -> Self {
        let buf_map = extern_buffer
            .iter()
            .map(|(key, buffer)| {
                let info = BufferInfo {
                    name: buffer.name.clone(),
                    strides: buffer.strides.clone(),
                    shape: buffer.shape.clone(),
                    bounds: Region::new(),
                    external: true,
                    released: false,
                };
                (key.clone(), info)
            })
            .collect();
        Self {
            roles: &role_facts.roles,
            layouts: &role_facts.layouts,
            frag_reg: &match_facts.frag_reg,
            buf_map,
            dim_align: HashMap::new(),
            storage_scope: HashMap::new(),
            strides: HashMap::new(),
            frag_load: IndexMap::new(),
            frag_store: IndexMap::new(),
            loop_scaling: HashMap::new(),
            thread_extent: HashMap::new(),
            thread_tile: Tile::default(),
            warp_tile: Tile::default(),
            warp_threads_y: -1,
            invalid: false,
            analyzer: Analyzer::new(),
        }
    }

    /// Derive the warp tile from the thread tile and thread extents; `None`
    /// on any disqualifying observation.
    pub fn into_facts(mut self) -> Option<BufferFacts> {
        if self.invalid {
            return None;
        }
        let tx = *self.thread_extent.get("threadIdx.x")?;
        if tx <= 0 || tx > 32 {
            return None;
        }
        self.warp_tile.m = tx * self.thread_tile.m;
        let warp_y = 32 / tx;
        self.warp_threads_y = warp_y;
        let ty = *self.thread_extent.get("threadIdx.y")?;
        if ty < warp_y || ty % warp_y != 0 {
            return None;
        }
        self.warp_tile.n = warp_y * self.thread_tile.n;
        self.warp_tile.k = self.thread_tile.k;
        if !SUPPORTED_WARP_TILES.contains(&(self.warp_tile.m, self.warp_tile.n, self.warp_tile.k)) {
            return None;
        }
        Some(BufferFacts {
            strides: self.strides,
            frag_load: self.frag_load,
            frag_store: self.frag_store,
            loop_scaling: self.loop_scaling,
            storage_scope: self.storage_scope,
            warp_tile: self.warp_tile,
            warp_threads_y: self.warp_threads_y,
        })
    }

    fn lookup(&self, tensor: &Arc<Tensor>) -> BufferInfo {
        let info = self
            .buf_map
            .get(&TensorKey(tensor.clone()))
            .unwrap_or_else(|| panic!("cannot find allocated buffer for {}", tensor.name));
        assert!(!info.released, "buffer {} accessed after its realize scope closed", tensor.name);
        info.clone()
    }

    /// Innermost-two dims of any tensor named in the role map must be
    /// integer multiples of 16.
    fn check_role_shape(&mut self, name: &str, info: &BufferInfo) -> bool {
        if !self.roles.contains_key(name) {
            return true;
        }
        if info.shape.len() < 2 {
            self.invalid = true;
            return false;
        }
        for dim in info.shape.iter().rev().take(2) {
            match dim.as_int() {
                Some(extent) if extent % 16 == 0 => {}
                _ => {
                    self.invalid = true;
                    return false;
                }
            }
        }
        true
    }

    fn publish_strides(&mut self, info: &BufferInfo) {
        let strides = if info.strides.is_empty() {
            strides_from_shape(&self.analyzer, &info.shape)
        } else {
            info.strides.clone()
        };
        self.strides.entry(info.name.clone()).or_insert(strides);
    }

    /// Record scaling factors for every loop var in the innermost-two
    /// relative indices; on stores also return the tile sizes, innermost
    /// first, or `None` when a shape dim is not a literal.
    fn scan_fragment_indices(
        &mut self,
        info: &BufferInfo,
        indices: &[Arc<Expr>],
        literal_required: bool,
    ) -> Option<[i64; 2]> {
        let rel_index = info.rel_index(indices);
        let rank = indices.len();
        let mut tile_size = [0i64; 2];
        for (slot, i) in [rank - 1, rank - 2].into_iter().enumerate() {
            let mut scaling_factor = 16;
            match info.shape.get(i).and_then(|dim| dim.as_int()) {
                Some(extent) => {
                    tile_size[slot] = extent;
                    scaling_factor = extent;
                }
                None if literal_required => {
                    self.invalid = true;
                    return None;
                }
                None => {}
            }
            let simplified = self.analyzer.simplify(&rel_index[i]);
            let mut index_visitor =
                IndexVisitor { loop_scaling: &mut self.loop_scaling, scaling_factor };
            index_visitor.visit_expr(&simplified);
        }
        Some(tile_size)
    }

    /// Feed one fragment observation into the thread tile.
    fn assign_thread_tile(&mut self, name: &str, tile_size: [i64; 2]) {
        let (Some(role), Some(layout)) = (self.roles.get(name), self.layouts.get(name)) else {
            return;
        };
        // tile_size[0] is the innermost dim.
        let ok = match (role, layout) {
            (FragmentRole::MatrixA, MatrixLayout::ColMajor) => {
                assign_or_check(&mut self.thread_tile.m, tile_size[0])
                    && assign_or_check(&mut self.thread_tile.k, tile_size[1])
            }
            (FragmentRole::MatrixA, MatrixLayout::RowMajor) => {
                assign_or_check(&mut self.thread_tile.k, tile_size[0])
                    && assign_or_check(&mut self.thread_tile.m, tile_size[1])
            }
            (FragmentRole::MatrixB, MatrixLayout::ColMajor) => {
                assign_or_check(&mut self.thread_tile.k, tile_size[0])
                    && assign_or_check(&mut self.thread_tile.n, tile_size[1])
            }
            (FragmentRole::MatrixB, MatrixLayout::RowMajor) => {
                assign_or_check(&mut self.thread_tile.n, tile_size[0])
                    && assign_or_check(&mut self.thread_tile.k, tile_size[1])
            }
            (FragmentRole::Accumulator, _) => {
                assign_or_check(&mut self.thread_tile.m, tile_size[0])
                    && assign_or_check(&mut self.thread_tile.n, tile_size[1])
            }
        };
        if !ok {
            self.invalid = true;
        }
    }
}

fn strides_from_shape(analyzer: &Analyzer, shape: &[Arc<Expr>]) -> Vec<Arc<Expr>> {
    let mut strides = Vec::with_capacity(shape.len().max(1));
    for i in 1..shape.len() {
        let mut stride = Expr::int32(1);
        for dim in shape[i..].iter().rev() {
            stride = stride.mul(dim);
        }
        strides.push(analyzer.simplify(&stride));
    }
    strides.push(Expr::int32(1));
    strides
}

/// Records every loop var appearing in a fragment index expression.
struct IndexVisitor<'m> {
    loop_scaling: &'m mut HashMap<u64, i64>,
    scaling_factor: i64,
}

impl StmtVisitor for IndexVisitor<'_> {
    fn visit_expr(&mut self, expr: &Arc<Expr>) {
        if let Some(var) = expr.as_var() {
            self.loop_scaling.entry(var.id).or_insert(self.scaling_factor);
        }
        walk_expr(self, expr);
    }
}

impl StmtVisitor for BufferAnalyser<'_> {
    fn visit_stmt(&mut self, stmt: &Arc<Stmt>) {
        match stmt.kind() {
            StmtKind::AttrStmt { key: AttrKey::ThreadExtent, node, value, .. } => {
                if let Some(iter_var) = node.as_iter_var()
                    && let Some(extent) = value.as_int()
                {
                    self.thread_extent.insert(iter_var.var.name.clone(), extent);
                }
                walk_stmt(self, stmt);
            }
            StmtKind::AttrStmt { key: AttrKey::RealizeScope, node, value, body } => {
                if let Some(tensor) = node.as_tensor()
                    && let Some(scope) = value.as_string()
                {
                    self.storage_scope.insert(tensor.id, scope.to_string());
                }
                self.visit_stmt(body);
            }
            StmtKind::AttrStmt { key: AttrKey::BufferDimAlign, node, value, body } => {
                let tensor = node
                    .as_tensor()
                    .unwrap_or_else(|| panic!("buffer_dim_align must annotate a tensor"));
                let ExprKind::Call { op: Builtin::TvmTuple, args, .. } = value.kind() else {
                    panic!("buffer_dim_align value must be a tvm_tuple")
                };
                let [dim, factor, offset]: [i64; 3] = args
                    .iter()
                    .map(|arg| arg.as_int().unwrap_or_else(|| panic!("buffer_dim_align expects literals")))
                    .collect::<Vec<_>>()
                    .try_into()
                    .unwrap_or_else(|_| panic!("buffer_dim_align expects (dim, factor, offset)"));
                let vinfo = self.dim_align.entry(tensor.id).or_default();
                let dim = dim as usize;
                if dim >= vinfo.len() {
                    vinfo.resize(dim + 1, DimAlignInfo::default());
                }
                vinfo[dim] = DimAlignInfo { align_factor: factor, align_offset: offset };
                self.visit_stmt(body);
            }
            StmtKind::ProducerStore { producer, value, indices } => {
                walk_stmt(self, stmt);
                let info = self.lookup(producer);

                if !self.check_role_shape(&producer.name, &info) {
                    return;
                }
                self.publish_strides(&info);

                if self.frag_reg.contains(&info.name) {
                    let dst = Expr::producer_load(producer.clone(), indices.iter().cloned());
                    self.frag_load.insert(stmt.id, dst);

                    if indices.len() < 2 {
                        self.invalid = true;
                        return;
                    }
                    let Some(tile_size) = self.scan_fragment_indices(&info, indices, true) else {
                        return;
                    };
                    self.assign_thread_tile(simplify_name(&info.name), tile_size);
                    if self.invalid {
                        return;
                    }
                }

                if let Some((value_tensor, _)) = value.as_producer_load()
                    && self.frag_reg.contains(&value_tensor.name)
                {
                    let dst = Expr::producer_load(producer.clone(), indices.iter().cloned());
                    self.frag_store.insert(stmt.id, dst);
                }
            }
            StmtKind::ProducerRealize { producer, bounds, body, .. } => {
                let key = TensorKey(producer.clone());
                if let Some(info) = self.buf_map.get(&key) {
                    assert!(
                        info.external,
                        "tensor {} realized twice without an external buffer",
                        producer.name
                    );
                    self.visit_stmt(body);
                    return;
                }

                let shape: Vec<Arc<Expr>> = bounds.iter().map(|range| range.extent.clone()).collect();
                let strides = match self.dim_align.get(&producer.id) {
                    Some(avec) if !shape.is_empty() => aligned_strides(&self.analyzer, &shape, avec),
                    _ => Vec::new(),
                };
                let info = BufferInfo {
                    name: producer.name.clone(),
                    strides,
                    shape,
                    bounds: bounds.clone(),
                    external: false,
                    released: false,
                };
                self.buf_map.insert(key.clone(), info);
                self.visit_stmt(body);
                if let Some(info) = self.buf_map.get_mut(&key) {
                    info.released = true;
                }
            }
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: &Arc<Expr>) {
        walk_expr(self, expr);
        let ExprKind::ProducerLoad { producer, indices } = expr.kind() else {
            return;
        };
        let info = self.lookup(producer);

        if !self.check_role_shape(&producer.name, &info) {
            return;
        }
        self.publish_strides(&info);

        if !self.frag_reg.contains(&info.name) {
            return;
        }
        if indices.len() < 2 {
            self.invalid = true;
            return;
        }
        self.scan_fragment_indices(&info, indices, false);
    }
}

/// Strides with per-dimension alignment padding, outermost first.
///
/// Walking dims innermost-out, a dimension with `align_factor != 0` inflates
/// the running stride by `(factor + offset - stride % factor) % factor`
/// before it is multiplied into the next-outer dim.
fn aligned_strides(analyzer: &Analyzer, shape: &[Arc<Expr>], avec: &[DimAlignInfo]) -> Vec<Arc<Expr>> {
    let mut rstrides = Vec::with_capacity(shape.len());
    let mut stride: Arc<Expr> = Expr::int32(1);
    for dim in (0..shape.len()).rev() {
        if let Some(info) = avec.get(dim)
            && info.align_factor != 0
        {
            let factor = Expr::int32(info.align_factor);
            let offset = Expr::int32(info.align_offset);
            let pad = factor.add(&offset).sub(&stride.rem(&factor)).rem(&factor);
            stride = analyzer.simplify(&stride.add(&pad));
        }
        rstrides.push(stride.clone());
        stride = stride.mul(&shape[dim]);
    }
    rstrides.reverse();
    rstrides
}
