//! Variables, tensors, and the original compute definitions.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use zmora_dtype::DType;

use crate::expr::Expr;
use crate::next_node_id;

/// Scalar variable. Identity is the `id`; two vars with the same name are
/// still distinct.
#[derive(Debug)]
pub struct Var {
    pub id: u64,
    pub name: String,
    pub dtype: DType,
}

impl Var {
    pub fn new(name: impl Into<String>, dtype: DType) -> Arc<Self> {
        Arc::new(Self { id: next_node_id(), name: name.into(), dtype })
    }

    /// Index variable (`Int32`), the common case for loop vars and axes.
    pub fn index(name: impl Into<String>) -> Arc<Self> {
        Self::new(name, DType::Int32)
    }
}

/// Iteration variable: a var plus an optional thread-axis binding such as
/// `threadIdx.x`.
#[derive(Debug)]
pub struct IterVar {
    pub var: Arc<Var>,
    pub thread_tag: Option<String>,
}

impl IterVar {
    pub fn new(var: Arc<Var>) -> Arc<Self> {
        Arc::new(Self { var, thread_tag: None })
    }

    pub fn thread(var: Arc<Var>, tag: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { var, thread_tag: Some(tag.into()) })
    }
}

/// Logical tensor produced by some stage of the schedule.
#[derive(Debug)]
pub struct Tensor {
    pub id: u64,
    pub name: String,
    pub dtype: DType,
}

impl Tensor {
    pub fn new(name: impl Into<String>, dtype: DType) -> Arc<Self> {
        Arc::new(Self { id: next_node_id(), name: name.into(), dtype })
    }
}

/// Wrapper for `Arc<Tensor>` hashing and comparing by stable id, for use as
/// a map key.
#[derive(Clone)]
pub struct TensorKey(pub Arc<Tensor>);

impl std::fmt::Debug for TensorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TensorKey({}#{})", self.0.name, self.0.id)
    }
}

impl PartialEq for TensorKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for TensorKey {}

impl Hash for TensorKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

/// Original compute definition, as written before scheduling: spatial axes,
/// reduction axes, and the body expressions.
#[derive(Debug)]
pub struct ComputeOp {
    pub name: String,
    pub axis: Vec<Arc<IterVar>>,
    pub reduce_axis: Vec<Arc<IterVar>>,
    pub body: Vec<Arc<Expr>>,
}

impl ComputeOp {
    pub fn new(
        name: impl Into<String>,
        axis: Vec<Arc<IterVar>>,
        reduce_axis: Vec<Arc<IterVar>>,
        body: Vec<Arc<Expr>>,
    ) -> Arc<Self> {
        Arc::new(Self { name: name.into(), axis, reduce_axis, body })
    }
}

/// Schedule summary consumed by post-processing passes: the output compute
/// definitions in scheduling order.
#[derive(Debug, Default)]
pub struct Schedule {
    pub outputs: Vec<Arc<ComputeOp>>,
}

impl Schedule {
    pub fn new(outputs: Vec<Arc<ComputeOp>>) -> Self {
        Self { outputs }
    }
}
