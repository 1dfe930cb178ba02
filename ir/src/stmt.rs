//! Statement nodes and constructors.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::attrs::{AttrKey, AttrNode};
use crate::expr::Expr;
use crate::next_node_id;
use crate::tensor::{IterVar, Tensor, Var};

/// Half-open per-dimension extent of a realized tensor.
#[derive(Debug, Clone)]
pub struct Range {
    pub min: Arc<Expr>,
    pub extent: Arc<Expr>,
}

impl Range {
    pub fn from_min_extent(min: Arc<Expr>, extent: Arc<Expr>) -> Self {
        Self { min, extent }
    }
}

pub type Region = SmallVec<[Range; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForKind {
    Serial,
    Parallel,
    Unrolled,
    Vectorized,
    ThreadBinding,
}

/// Statement node. Immutable; constructors hand out `Arc<Stmt>`.
#[derive(Debug)]
pub struct Stmt {
    pub id: u64,
    kind: StmtKind,
}

#[derive(Debug)]
pub enum StmtKind {
    AttrStmt {
        node: AttrNode,
        key: AttrKey,
        value: Arc<Expr>,
        body: Arc<Stmt>,
    },
    ProducerRealize {
        producer: Arc<Tensor>,
        bounds: Region,
        condition: Arc<Expr>,
        body: Arc<Stmt>,
    },
    ProducerStore {
        producer: Arc<Tensor>,
        value: Arc<Expr>,
        indices: SmallVec<[Arc<Expr>; 4]>,
    },
    For {
        var: Arc<Var>,
        min: Arc<Expr>,
        extent: Arc<Expr>,
        kind: ForKind,
        body: Arc<Stmt>,
        thread_binding: Option<Arc<IterVar>>,
    },
    Seq {
        stmts: Vec<Arc<Stmt>>,
    },
    Evaluate {
        value: Arc<Expr>,
    },
}

impl Stmt {
    fn make(kind: StmtKind) -> Arc<Self> {
        Arc::new(Self { id: next_node_id(), kind })
    }

    pub fn kind(&self) -> &StmtKind {
        &self.kind
    }

    pub fn attr(node: AttrNode, key: AttrKey, value: Arc<Expr>, body: Arc<Stmt>) -> Arc<Self> {
        Self::make(StmtKind::AttrStmt { node, key, value, body })
    }

    pub fn realize(producer: Arc<Tensor>, bounds: Region, condition: Arc<Expr>, body: Arc<Stmt>) -> Arc<Self> {
        Self::make(StmtKind::ProducerRealize { producer, bounds, condition, body })
    }

    pub fn store(
        producer: Arc<Tensor>,
        value: Arc<Expr>,
        indices: impl IntoIterator<Item = Arc<Expr>>,
    ) -> Arc<Self> {
        Self::make(StmtKind::ProducerStore { producer, value, indices: indices.into_iter().collect() })
    }

    pub fn for_loop(var: Arc<Var>, min: Arc<Expr>, extent: Arc<Expr>, kind: ForKind, body: Arc<Stmt>) -> Arc<Self> {
        Self::make(StmtKind::For { var, min, extent, kind, body, thread_binding: None })
    }

    pub fn for_thread(
        var: Arc<Var>,
        min: Arc<Expr>,
        extent: Arc<Expr>,
        binding: Arc<IterVar>,
        body: Arc<Stmt>,
    ) -> Arc<Self> {
        Self::make(StmtKind::For {
            var,
            min,
            extent,
            kind: ForKind::ThreadBinding,
            body,
            thread_binding: Some(binding),
        })
    }

    pub fn seq(stmts: Vec<Arc<Stmt>>) -> Arc<Self> {
        Self::make(StmtKind::Seq { stmts })
    }

    pub fn evaluate(value: Arc<Expr>) -> Arc<Self> {
        Self::make(StmtKind::Evaluate { value })
    }
}
