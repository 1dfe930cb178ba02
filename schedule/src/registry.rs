//! Named-pass registry.
//!
//! Host compilers look passes up by their published global name instead of
//! linking against this crate's symbols directly. The map is pre-seeded with
//! the built-in passes; embedders may add their own.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use zmora_ir::{BufferMap, Schedule, Stmt};

/// Signature shared by schedule post-processing passes.
pub type PassFn = fn(&Arc<Stmt>, &Schedule, &BufferMap) -> Arc<Stmt>;

/// Global name of the tensor-core rewrite pass.
pub const SCHEDULE_POSTPROC_REWRITE_FOR_TENSOR_CORE: &str =
    "schedule.SchedulePostProcRewriteForTensorCore";

static REGISTRY: Lazy<RwLock<HashMap<&'static str, PassFn>>> = Lazy::new(|| {
    let mut passes: HashMap<&'static str, PassFn> = HashMap::new();
    passes.insert(SCHEDULE_POSTPROC_REWRITE_FOR_TENSOR_CORE, crate::tensor_core::rewrite as PassFn);
    RwLock::new(passes)
});

/// Look up a pass by its published name.
pub fn lookup(name: &str) -> Option<PassFn> {
    REGISTRY.read().get(name).copied()
}

/// Publish a pass under a global name, replacing any previous entry.
pub fn register(name: &'static str, pass: PassFn) {
    REGISTRY.write().insert(name, pass);
}
