//! Imperative tensor-program IR.
//!
//! The IR a scheduler lowers a tensor program into: loops, attribute-scoped
//! regions, realize/store/load nodes and arithmetic expressions. Every node
//! is an immutable `Arc`-shared record with a stable `id`; rewrites build new
//! trees and identity is tracked through ids, never through addresses.
//!
//! # Module Organization
//!
//! - [`expr`] / [`stmt`] - node definitions and constructors
//! - [`attrs`] - interned attribute keys and builtin call identities
//! - [`tensor`] - variables, tensors and original compute definitions
//! - [`buffer`] - buffer descriptors bound to tensors
//! - [`visit`] - the recursive walker with typed callbacks
//! - [`simplify`] - the expression analyzer

use std::cell::Cell;

pub mod attrs;
pub mod buffer;
pub mod error;
pub mod expr;
pub mod simplify;
pub mod stmt;
pub mod tensor;
pub mod visit;

pub use attrs::{AttrKey, AttrNode, Builtin};
pub use buffer::{Buffer, BufferMap};
pub use error::{Error, Result};
pub use expr::{BinaryOp, Expr, ExprKind, ReduceOp};
pub use simplify::Analyzer;
pub use stmt::{ForKind, Range, Region, Stmt, StmtKind};
pub use tensor::{ComputeOp, IterVar, Schedule, Tensor, TensorKey, Var};
pub use visit::{StmtMutator, StmtVisitor, walk_expr, walk_expr_mut, walk_stmt, walk_stmt_mut};

// Thread-local counter for stable node IDs.
//
// Node identity survives rewriting: maps built before a mutation key on these
// ids and stay valid while the original tree is alive. Cell keeps this
// single-threaded and free of memory barriers, matching the one-pass,
// one-thread execution model.
thread_local! {
    static NODE_ID_COUNTER: Cell<u64> = const { Cell::new(0) };
}

pub(crate) fn next_node_id() -> u64 {
    NODE_ID_COUNTER.with(|counter| {
        let id = counter.get();
        counter.set(id + 1);
        id
    })
}
