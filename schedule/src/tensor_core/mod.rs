//! Tensor-core rewrite: replace scalar multiply-add accumulation with wmma
//! fragment intrinsics.
//!
//! The pass recognizes stores of the form `C = C + cast(A) * cast(B)` on
//! local buffers, classifies each operand's fragment role and layout from
//! the original compute definition, derives the warp tile from buffer shapes
//! and thread extents, and rewrites the matched region to `load_matrix_sync`
//! / `mma_sync` / `fill_fragment` / `store_matrix_sync` calls operating on
//! tiles instead of scalars.
//!
//! # Pipeline
//!
//! Four stages, each publishing an immutable facts record the next stage
//! borrows:
//!
//! 1. [`matcher`] - find candidate accumulation stores
//! 2. [`schedule_analysis`] - label operands `matrix_a`/`matrix_b` and
//!    `row_major`/`col_major`, canonicalize operand order
//! 3. [`buffer_analysis`] - collect strides, thread extents and tile
//!    geometry; validate against the supported warp tiles
//! 4. [`mutator`] - produce the rewritten tree
//!
//! Any stage that fails demotes the invocation to a no-op: the input
//! statement is returned unchanged.

use std::sync::Arc;

use zmora_device::{DeviceSpec, Target, TargetKind, registry::device_api};
use zmora_dtype::DType;
use zmora_ir::{Expr, ExprKind, Schedule, Stmt, StmtMutator, StmtVisitor};

pub mod buffer_analysis;
pub mod matcher;
pub mod mutator;
pub mod schedule_analysis;

pub use buffer_analysis::{BufferAnalyser, BufferFacts};
pub use matcher::{MatchFacts, MmaMatcher, MmaOperands};
pub use mutator::TensorCoreMutator;
pub use schedule_analysis::{RoleFacts, identify_matrices};

/// Fragment role of a buffer participating in an MMA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::AsRefStr)]
pub enum FragmentRole {
    #[strum(serialize = "matrix_a")]
    MatrixA,
    #[strum(serialize = "matrix_b")]
    MatrixB,
    #[strum(serialize = "accumulator")]
    Accumulator,
}

/// Memory-order interpretation of a fragment's backing buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::AsRefStr)]
pub enum MatrixLayout {
    #[strum(serialize = "row_major")]
    RowMajor,
    #[strum(serialize = "col_major")]
    ColMajor,
}

/// `(m, n, k)` tile geometry. `-1` marks a slot not assigned yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub m: i64,
    pub n: i64,
    pub k: i64,
}

impl Default for Tile {
    fn default() -> Self {
        Self { m: -1, n: -1, k: -1 }
    }
}

/// First observation sets the slot; later observations must agree.
pub(crate) fn assign_or_check(slot: &mut i64, value: i64) -> bool {
    if *slot <= 0 {
        *slot = value;
        return true;
    }
    *slot == value
}

/// Unqualified buffer name: everything before the first `.`.
///
/// Stage caches (`A.shared.local`) inherit the name of the tensor they
/// cache, so truncation recovers the original operand name. The convention
/// is load-bearing; every lookup that needs it goes through this helper so
/// the scheme can be replaced in one place.
pub(crate) fn simplify_name(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// Strip one cast layer iff it targets `dtype`.
///
/// Returns the input itself when it is not a cast, the operand when the cast
/// targets `dtype`, and `None` (match failure) for a cast to any other type.
pub(crate) fn unpack_type_cast(input: &Arc<Expr>, dtype: DType) -> Option<Arc<Expr>> {
    match input.kind() {
        ExprKind::Cast { dtype: cast_dtype, value } if *cast_dtype == dtype => Some(value.clone()),
        ExprKind::Cast { .. } => None,
        _ => Some(input.clone()),
    }
}

/// Rewrite `stmt` to use tensor-core intrinsics where the accumulation
/// pattern, operand classification and tile geometry all line up; return the
/// input unchanged otherwise.
///
/// `extern_buffer` maps caller-provided tensors to their buffer descriptors.
pub fn rewrite(stmt: &Arc<Stmt>, schedule: &Schedule, extern_buffer: &zmora_ir::BufferMap) -> Arc<Stmt> {
    if let Some(target) = Target::current()
        && target.kind != TargetKind::Cuda
    {
        tracing::debug!(kind = target.kind.name(), "tensor core rewrite only applies to cuda targets");
        return stmt.clone();
    }

    if device_api(&DeviceSpec::Cuda { device_id: 0 }).is_none() {
        tracing::debug!("no cuda device reachable, skipping tensor core rewrite");
        return stmt.clone();
    }

    let mut mma_matcher = MmaMatcher::new(extern_buffer);
    mma_matcher.visit_stmt(stmt);
    let Some(match_facts) = mma_matcher.into_facts() else {
        tracing::debug!("no mma accumulation pattern matched");
        return stmt.clone();
    };

    let Some(role_facts) = identify_matrices(schedule, &match_facts) else {
        tracing::debug!("operand classification incomplete, skipping tensor core rewrite");
        return stmt.clone();
    };

    let mut analyser = BufferAnalyser::new(extern_buffer, &role_facts, &match_facts);
    analyser.visit_stmt(stmt);
    let Some(buffer_facts) = analyser.into_facts() else {
        tracing::debug!("buffer geometry not qualified for tensor cores");
        return stmt.clone();
    };

    tracing::debug!(
        warp_m = buffer_facts.warp_tile.m,
        warp_n = buffer_facts.warp_tile.n,
        warp_k = buffer_facts.warp_tile.k,
        "rewriting for tensor cores"
    );
    let mut mutator = TensorCoreMutator::new(&match_facts, &role_facts, &buffer_facts);
    mutator.mutate_stmt(stmt)
}
