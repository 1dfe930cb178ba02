//! Buffer descriptors bound to tensors.

use std::collections::HashMap;
use std::sync::Arc;

use zmora_dtype::DType;

use crate::expr::Expr;
use crate::tensor::{TensorKey, Var};

/// Flat-memory view of a tensor: a data handle plus addressing metadata.
///
/// Externally supplied buffers describe caller-owned memory; passes also
/// synthesize fresh ones to stand for opaque regions such as wmma fragments.
#[derive(Debug, bon::Builder)]
#[builder(on(String, into))]
pub struct Buffer {
    /// Handle variable naming the underlying allocation.
    pub data: Arc<Var>,
    pub name: String,
    pub dtype: DType,
    #[builder(default)]
    pub shape: Vec<Arc<Expr>>,
    #[builder(default)]
    pub strides: Vec<Arc<Expr>>,
    #[builder(default = Expr::int32(0))]
    pub elem_offset: Arc<Expr>,
    #[builder(default = String::from("global"))]
    pub scope: String,
    #[builder(default = 1)]
    pub data_alignment: i64,
    #[builder(default = 1)]
    pub offset_factor: i64,
}

/// Externally supplied buffers, keyed by tensor identity.
pub type BufferMap = HashMap<TensorKey, Arc<Buffer>>;
