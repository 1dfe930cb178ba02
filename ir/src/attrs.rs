//! Interned attribute keys and builtin call identities.
//!
//! Downstream code generators match on these exact strings; keep the
//! serializations bit-stable.

use std::sync::Arc;

use crate::buffer::Buffer;
use crate::tensor::{IterVar, Tensor};

/// Well-known `AttrStmt` keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::AsRefStr)]
pub enum AttrKey {
    #[strum(serialize = "pragma_tensor_core")]
    PragmaTensorCore,
    #[strum(serialize = "realize_scope")]
    RealizeScope,
    #[strum(serialize = "thread_extent")]
    ThreadExtent,
    #[strum(serialize = "buffer_dim_align")]
    BufferDimAlign,
    #[strum(serialize = "buffer_bind_scope")]
    BufferBindScope,
}

/// Builtin call identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::AsRefStr)]
pub enum Builtin {
    #[strum(serialize = "tvm_tuple")]
    TvmTuple,
    #[strum(serialize = "call_extern")]
    CallExtern,
    #[strum(serialize = "tvm_mma_sync")]
    TvmMmaSync,
    #[strum(serialize = "tvm_bmma_sync")]
    TvmBmmaSync,
    #[strum(serialize = "tvm_fill_fragment")]
    TvmFillFragment,
    #[strum(serialize = "tvm_load_matrix_sync")]
    TvmLoadMatrixSync,
    #[strum(serialize = "tvm_store_matrix_sync")]
    TvmStoreMatrixSync,
}

/// The object an `AttrStmt` annotates.
#[derive(Debug, Clone)]
pub enum AttrNode {
    Tensor(Arc<Tensor>),
    IterVar(Arc<IterVar>),
    /// `buffer_bind_scope`: the synthesized buffer and the tensor it views.
    BufferBind { buffer: Arc<Buffer>, tensor: Arc<Tensor> },
}

impl AttrNode {
    pub fn as_tensor(&self) -> Option<&Arc<Tensor>> {
        match self {
            Self::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    pub fn as_iter_var(&self) -> Option<&Arc<IterVar>> {
        match self {
            Self::IterVar(iv) => Some(iv),
            _ => None,
        }
    }
}
