//! Expression nodes and constructors.

use std::sync::Arc;

use smallvec::SmallVec;
use zmora_dtype::DType;

use crate::attrs::Builtin;
use crate::error::{BinaryDTypeMismatchSnafu, EmptyReduceSnafu, NonArithmeticDTypeSnafu, Result};
use crate::next_node_id;
use crate::tensor::{IterVar, Tensor, Var};

/// Binary arithmetic operators. Division and modulo are the truncating
/// integer forms used for index math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Reduction combiners. A combiner list of length one is the common case;
/// multi-result combiners (argmax-style) carry several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Add,
    Mul,
    Max,
    Min,
}

/// Expression node. Immutable; constructors hand out `Arc<Expr>`.
#[derive(Debug)]
pub struct Expr {
    pub id: u64,
    kind: ExprKind,
}

#[derive(Debug)]
pub enum ExprKind {
    IntImm {
        dtype: DType,
        value: i64,
    },
    FloatImm {
        dtype: DType,
        value: f64,
    },
    StringImm(String),
    Var(Arc<Var>),
    Cast {
        dtype: DType,
        value: Arc<Expr>,
    },
    Binary(BinaryOp, Arc<Expr>, Arc<Expr>),
    ProducerLoad {
        producer: Arc<Tensor>,
        indices: SmallVec<[Arc<Expr>; 4]>,
    },
    Reduce {
        combiner: SmallVec<[ReduceOp; 1]>,
        source: Vec<Arc<Expr>>,
        axis: Vec<Arc<IterVar>>,
        condition: Option<Arc<Expr>>,
    },
    Call {
        dtype: DType,
        op: Builtin,
        args: Vec<Arc<Expr>>,
    },
}

impl Expr {
    fn make(kind: ExprKind) -> Arc<Self> {
        Arc::new(Self { id: next_node_id(), kind })
    }

    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    pub fn dtype(&self) -> DType {
        match &self.kind {
            ExprKind::IntImm { dtype, .. } | ExprKind::FloatImm { dtype, .. } => *dtype,
            ExprKind::StringImm(_) => DType::Handle,
            ExprKind::Var(var) => var.dtype,
            ExprKind::Cast { dtype, .. } => *dtype,
            ExprKind::Binary(_, a, _) => a.dtype(),
            ExprKind::ProducerLoad { producer, .. } => producer.dtype,
            ExprKind::Reduce { source, .. } => source[0].dtype(),
            ExprKind::Call { dtype, .. } => *dtype,
        }
    }

    // ---- constructors ----------------------------------------------------

    pub fn int(dtype: DType, value: i64) -> Arc<Self> {
        Self::make(ExprKind::IntImm { dtype, value })
    }

    pub fn int32(value: i64) -> Arc<Self> {
        Self::int(DType::Int32, value)
    }

    pub fn float(dtype: DType, value: f64) -> Arc<Self> {
        Self::make(ExprKind::FloatImm { dtype, value })
    }

    pub fn string(value: impl Into<String>) -> Arc<Self> {
        Self::make(ExprKind::StringImm(value.into()))
    }

    pub fn var(var: &Arc<Var>) -> Arc<Self> {
        Self::make(ExprKind::Var(var.clone()))
    }

    pub fn cast(dtype: DType, value: Arc<Expr>) -> Arc<Self> {
        Self::make(ExprKind::Cast { dtype, value })
    }

    pub fn producer_load(producer: Arc<Tensor>, indices: impl IntoIterator<Item = Arc<Expr>>) -> Arc<Self> {
        Self::make(ExprKind::ProducerLoad { producer, indices: indices.into_iter().collect() })
    }

    pub fn reduce(
        combiner: impl IntoIterator<Item = ReduceOp>,
        source: Vec<Arc<Expr>>,
        axis: Vec<Arc<IterVar>>,
        condition: Option<Arc<Expr>>,
    ) -> Result<Arc<Self>> {
        snafu::ensure!(!source.is_empty(), EmptyReduceSnafu);
        Ok(Self::make(ExprKind::Reduce { combiner: combiner.into_iter().collect(), source, axis, condition }))
    }

    pub fn call(dtype: DType, op: Builtin, args: Vec<Arc<Expr>>) -> Arc<Self> {
        Self::make(ExprKind::Call { dtype, op, args })
    }

    pub fn try_binary(op: BinaryOp, a: &Arc<Expr>, b: &Arc<Expr>) -> Result<Arc<Self>> {
        let (lhs, rhs) = (a.dtype(), b.dtype());
        snafu::ensure!(lhs == rhs, BinaryDTypeMismatchSnafu { op, lhs, rhs });
        snafu::ensure!(!matches!(lhs, DType::Void | DType::Handle), NonArithmeticDTypeSnafu { dtype: lhs });
        Ok(Self::make(ExprKind::Binary(op, a.clone(), b.clone())))
    }

    fn binary(op: BinaryOp, a: &Arc<Expr>, b: &Arc<Expr>) -> Arc<Self> {
        Self::try_binary(op, a, b).unwrap_or_else(|e| panic!("binary construction failed: {e}"))
    }

    // Panicking wrappers for call sites where operand dtypes are already
    // established (index math on Int32).

    pub fn add(self: &Arc<Self>, other: &Arc<Expr>) -> Arc<Expr> {
        Self::binary(BinaryOp::Add, self, other)
    }

    pub fn sub(self: &Arc<Self>, other: &Arc<Expr>) -> Arc<Expr> {
        Self::binary(BinaryOp::Sub, self, other)
    }

    pub fn mul(self: &Arc<Self>, other: &Arc<Expr>) -> Arc<Expr> {
        Self::binary(BinaryOp::Mul, self, other)
    }

    pub fn div(self: &Arc<Self>, other: &Arc<Expr>) -> Arc<Expr> {
        Self::binary(BinaryOp::Div, self, other)
    }

    pub fn rem(self: &Arc<Self>, other: &Arc<Expr>) -> Arc<Expr> {
        Self::binary(BinaryOp::Mod, self, other)
    }

    // ---- downcasts -------------------------------------------------------

    pub fn as_int(&self) -> Option<i64> {
        match self.kind {
            ExprKind::IntImm { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<&Arc<Var>> {
        match &self.kind {
            ExprKind::Var(var) => Some(var),
            _ => None,
        }
    }

    pub fn as_producer_load(&self) -> Option<(&Arc<Tensor>, &[Arc<Expr>])> {
        match &self.kind {
            ExprKind::ProducerLoad { producer, indices } => Some((producer, indices)),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::StringImm(s) => Some(s),
            _ => None,
        }
    }

    /// True for integer and float immediates.
    pub fn is_imm(&self) -> bool {
        matches!(self.kind, ExprKind::IntImm { .. } | ExprKind::FloatImm { .. })
    }
}
