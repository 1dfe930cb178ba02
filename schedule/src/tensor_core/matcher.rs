//! Stage 1: find candidate MMA accumulation stores.
//!
//! Matches `C = C + cast(A) * cast(B)` where A and B are local buffers of an
//! admissible input dtype and C is a local `float32`/`int32` buffer. Only
//! stores under a `pragma_tensor_core` region are considered.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use zmora_dtype::DType;
use zmora_ir::{
    AttrKey, BinaryOp, Expr, ExprKind, Stmt, StmtKind, StmtVisitor, Tensor, TensorKey, walk_stmt,
};

use super::unpack_type_cast;

/// The three operand load expressions of one matched store, in the order
/// they were discovered: `(a, b, c)` with `c` the accumulator load.
#[derive(Debug, Clone)]
pub struct MmaOperands {
    pub a: Arc<Expr>,
    pub b: Arc<Expr>,
    pub c: Arc<Expr>,
}

/// Facts published by the matcher.
#[derive(Debug)]
pub struct MatchFacts {
    /// Matched store node id -> operand loads in discovery order.
    pub mma_sync: IndexMap<u64, MmaOperands>,
    /// Operand load expression id -> buffer name.
    pub buf_name: HashMap<u64, String>,
    /// Names of local buffers participating in an MMA.
    pub frag_reg: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct BufferInfo {
    name: String,
    dtype: DType,
    external: bool,
    released: bool,
}

/// Stage 1 visitor. Run with [`StmtVisitor::visit_stmt`], then take the
/// result via [`MmaMatcher::into_facts`].
pub struct MmaMatcher {
    buf_map: HashMap<TensorKey, BufferInfo>,
    storage_scope: HashMap<u64, String>,
    mma_sync: IndexMap<u64, MmaOperands>,
    buf_name: HashMap<u64, String>,
    frag_reg: HashSet<String>,
    matched: bool,
    tensor_core_on: bool,
}

impl MmaMatcher {
    pub fn new(extern_buffer: &zmora_ir::BufferMap) -> Self {
        let buf_map = extern_buffer
            .iter()
            .map(|(key, buffer)| {
                let info = BufferInfo {
                    name: buffer.name.clone(),
                    dtype: buffer.dtype,
                    external: true,
                    released: false,
                };
                (key.clone(), info)
            })
            .collect();
        Self {
            buf_map,
            storage_scope: HashMap::new(),
            mma_sync: IndexMap::new(),
            buf_name: HashMap::new(),
            frag_reg: HashSet::new(),
            matched: false,
            tensor_core_on: false,
        }
    }

    /// `Some` iff at least one candidate store was found.
    pub fn into_facts(self) -> Option<MatchFacts> {
        self.matched.then_some(MatchFacts {
            mma_sync: self.mma_sync,
            buf_name: self.buf_name,
            frag_reg: self.frag_reg,
        })
    }

    fn check_local_buffer(&self, tensor: &Arc<Tensor>) -> Option<BufferInfo> {
        let scope = self.storage_scope.get(&tensor.id)?;
        if scope != "local" {
            return None;
        }
        let info = self.buf_map.get(&TensorKey(tensor.clone()))?;
        (!info.released).then(|| info.clone())
    }

    fn match_mma_sync(&mut self, store_id: u64, value: &Arc<Expr>, store_buffer: &BufferInfo) -> bool {
        let ExprKind::Binary(BinaryOp::Add, load_c, rhs) = value.kind() else {
            return false;
        };

        let Some((tensor_c, _)) = load_c.as_producer_load() else {
            return false;
        };
        let Some(buffer_c) = self.check_local_buffer(tensor_c) else {
            return false;
        };
        if buffer_c != *store_buffer || !matches!(buffer_c.dtype, DType::Float32 | DType::Int32) {
            return false;
        }

        let Some(mul) = unpack_type_cast(rhs, buffer_c.dtype) else {
            return false;
        };
        let ExprKind::Binary(BinaryOp::Mul, mul_a, mul_b) = mul.kind() else {
            return false;
        };

        let Some(load_a) = unpack_type_cast(mul_a, buffer_c.dtype) else {
            return false;
        };
        let Some((tensor_a, _)) = load_a.as_producer_load() else {
            return false;
        };
        let Some(buffer_a) = self.check_local_buffer(tensor_a) else {
            return false;
        };
        if !is_mma_input_dtype(buffer_a.dtype) {
            return false;
        }

        let Some(load_b) = unpack_type_cast(mul_b, buffer_c.dtype) else {
            return false;
        };
        let Some((tensor_b, _)) = load_b.as_producer_load() else {
            return false;
        };
        let Some(buffer_b) = self.check_local_buffer(tensor_b) else {
            return false;
        };
        if !is_mma_input_dtype(buffer_b.dtype) {
            return false;
        }

        self.frag_reg.insert(buffer_c.name.clone());
        self.frag_reg.insert(buffer_a.name.clone());
        self.frag_reg.insert(buffer_b.name.clone());
        self.buf_name.insert(load_a.id, buffer_a.name);
        self.buf_name.insert(load_b.id, buffer_b.name);
        self.mma_sync.insert(store_id, MmaOperands { a: load_a, b: load_b, c: load_c.clone() });
        true
    }
}

fn is_mma_input_dtype(dtype: DType) -> bool {
    matches!(
        dtype,
        DType::Float16 | DType::Int8 | DType::UInt8 | DType::Int4 | DType::UInt4 | DType::Int1
    )
}

impl StmtVisitor for MmaMatcher {
    fn visit_stmt(&mut self, stmt: &Arc<Stmt>) {
        match stmt.kind() {
            StmtKind::AttrStmt { key: AttrKey::PragmaTensorCore, .. } => {
                self.tensor_core_on = true;
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
            StmtKind::ProducerStore { producer, value, .. } => {
                let Some(info) = self.buf_map.get(&TensorKey(producer.clone())).cloned() else {
                    return;
                };
                if info.released {
                    return;
                }
                if self.tensor_core_on && self.match_mma_sync(stmt.id, value, &info) {
                    self.matched = true;
                }
            }
            StmtKind::ProducerRealize { producer, body, .. } => {
                let key = TensorKey(producer.clone());
                if let Some(info) = self.buf_map.get(&key) {
                    if info.external {
                        self.visit_stmt(body);
                    }
                    return;
                }
                let info = BufferInfo {
                    name: producer.name.clone(),
                    dtype: producer.dtype,
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
}
