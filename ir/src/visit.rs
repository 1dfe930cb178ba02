//! Recursive walkers with typed callbacks.
//!
//! A visitor overrides the node kinds it cares about and calls the matching
//! `walk_*` function (or the default trait method) to descend; a mutator
//! does the same but returns rebuilt nodes. The mutating walkers rebuild a
//! node only when a child actually changed, so untouched subtrees keep their
//! node identity.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::expr::{Expr, ExprKind};
use crate::stmt::{Range, Stmt, StmtKind};

/// Read-only traversal over statements and the expressions they contain.
pub trait StmtVisitor {
    fn visit_stmt(&mut self, stmt: &Arc<Stmt>) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Arc<Expr>) {
        walk_expr(self, expr);
    }
}

pub fn walk_stmt<V: StmtVisitor + ?Sized>(v: &mut V, stmt: &Arc<Stmt>) {
    match stmt.kind() {
        StmtKind::AttrStmt { value, body, .. } => {
            v.visit_expr(value);
            v.visit_stmt(body);
        }
        StmtKind::ProducerRealize { bounds, condition, body, .. } => {
            for range in bounds {
                v.visit_expr(&range.min);
                v.visit_expr(&range.extent);
            }
            v.visit_expr(condition);
            v.visit_stmt(body);
        }
        StmtKind::ProducerStore { value, indices, .. } => {
            v.visit_expr(value);
            for index in indices {
                v.visit_expr(index);
            }
        }
        StmtKind::For { min, extent, body, .. } => {
            v.visit_expr(min);
            v.visit_expr(extent);
            v.visit_stmt(body);
        }
        StmtKind::Seq { stmts } => {
            for s in stmts {
                v.visit_stmt(s);
            }
        }
        StmtKind::Evaluate { value } => v.visit_expr(value),
    }
}

pub fn walk_expr<V: StmtVisitor + ?Sized>(v: &mut V, expr: &Arc<Expr>) {
    match expr.kind() {
        ExprKind::IntImm { .. } | ExprKind::FloatImm { .. } | ExprKind::StringImm(_) | ExprKind::Var(_) => {}
        ExprKind::Cast { value, .. } => v.visit_expr(value),
        ExprKind::Binary(_, a, b) => {
            v.visit_expr(a);
            v.visit_expr(b);
        }
        ExprKind::ProducerLoad { indices, .. } => {
            for index in indices {
                v.visit_expr(index);
            }
        }
        ExprKind::Reduce { source, condition, .. } => {
            for s in source {
                v.visit_expr(s);
            }
            if let Some(c) = condition {
                v.visit_expr(c);
            }
        }
        ExprKind::Call { args, .. } => {
            for arg in args {
                v.visit_expr(arg);
            }
        }
    }
}

/// Rebuilding traversal. Overrides return the replacement node; the default
/// walkers reconstruct parents only around changed children.
pub trait StmtMutator {
    fn mutate_stmt(&mut self, stmt: &Arc<Stmt>) -> Arc<Stmt> {
        walk_stmt_mut(self, stmt)
    }

    fn mutate_expr(&mut self, expr: &Arc<Expr>) -> Arc<Expr> {
        walk_expr_mut(self, expr)
    }
}

pub fn walk_stmt_mut<M: StmtMutator + ?Sized>(m: &mut M, stmt: &Arc<Stmt>) -> Arc<Stmt> {
    match stmt.kind() {
        StmtKind::AttrStmt { node, key, value, body } => {
            let new_value = m.mutate_expr(value);
            let new_body = m.mutate_stmt(body);
            if new_value.id == value.id && new_body.id == body.id {
                stmt.clone()
            } else {
                Stmt::attr(node.clone(), *key, new_value, new_body)
            }
        }
        StmtKind::ProducerRealize { producer, bounds, condition, body } => {
            let mut changed = false;
            let new_bounds = bounds
                .iter()
                .map(|range| {
                    let min = m.mutate_expr(&range.min);
                    let extent = m.mutate_expr(&range.extent);
                    changed |= min.id != range.min.id || extent.id != range.extent.id;
                    Range { min, extent }
                })
                .collect();
            let new_condition = m.mutate_expr(condition);
            let new_body = m.mutate_stmt(body);
            if !changed && new_condition.id == condition.id && new_body.id == body.id {
                stmt.clone()
            } else {
                Stmt::realize(producer.clone(), new_bounds, new_condition, new_body)
            }
        }
        StmtKind::ProducerStore { producer, value, indices } => {
            let new_value = m.mutate_expr(value);
            let mut changed = new_value.id != value.id;
            let new_indices: SmallVec<[Arc<Expr>; 4]> = indices
                .iter()
                .map(|index| {
                    let new_index = m.mutate_expr(index);
                    changed |= new_index.id != index.id;
                    new_index
                })
                .collect();
            if changed { Stmt::store(producer.clone(), new_value, new_indices) } else { stmt.clone() }
        }
        StmtKind::For { var, min, extent, kind, body, thread_binding } => {
            let new_min = m.mutate_expr(min);
            let new_extent = m.mutate_expr(extent);
            let new_body = m.mutate_stmt(body);
            if new_min.id == min.id && new_extent.id == extent.id && new_body.id == body.id {
                stmt.clone()
            } else {
                match thread_binding {
                    Some(binding) => Stmt::for_thread(var.clone(), new_min, new_extent, binding.clone(), new_body),
                    None => Stmt::for_loop(var.clone(), new_min, new_extent, *kind, new_body),
                }
            }
        }
        StmtKind::Seq { stmts } => {
            let mut changed = false;
            let new_stmts: Vec<_> = stmts
                .iter()
                .map(|s| {
                    let new = m.mutate_stmt(s);
                    changed |= new.id != s.id;
                    new
                })
                .collect();
            if changed { Stmt::seq(new_stmts) } else { stmt.clone() }
        }
        StmtKind::Evaluate { value } => {
            let new_value = m.mutate_expr(value);
            if new_value.id == value.id { stmt.clone() } else { Stmt::evaluate(new_value) }
        }
    }
}

pub fn walk_expr_mut<M: StmtMutator + ?Sized>(m: &mut M, expr: &Arc<Expr>) -> Arc<Expr> {
    match expr.kind() {
        ExprKind::IntImm { .. } | ExprKind::FloatImm { .. } | ExprKind::StringImm(_) | ExprKind::Var(_) => {
            expr.clone()
        }
        ExprKind::Cast { dtype, value } => {
            let new_value = m.mutate_expr(value);
            if new_value.id == value.id { expr.clone() } else { Expr::cast(*dtype, new_value) }
        }
        ExprKind::Binary(op, a, b) => {
            let new_a = m.mutate_expr(a);
            let new_b = m.mutate_expr(b);
            if new_a.id == a.id && new_b.id == b.id {
                expr.clone()
            } else {
                Expr::try_binary(*op, &new_a, &new_b)
                    .unwrap_or_else(|e| panic!("rebuild of {op:?} changed operand dtypes: {e}"))
            }
        }
        ExprKind::ProducerLoad { producer, indices } => {
            let mut changed = false;
            let new_indices: Vec<_> = indices
                .iter()
                .map(|index| {
                    let new_index = m.mutate_expr(index);
                    changed |= new_index.id != index.id;
                    new_index
                })
                .collect();
            if changed { Expr::producer_load(producer.clone(), new_indices) } else { expr.clone() }
        }
        ExprKind::Reduce { .. } => {
            // Reduce only appears in original compute bodies, which rewrites
            // never touch.
            expr.clone()
        }
        ExprKind::Call { dtype, op, args } => {
            let mut changed = false;
            let new_args: Vec<_> = args
                .iter()
                .map(|arg| {
                    let new_arg = m.mutate_expr(arg);
                    changed |= new_arg.id != arg.id;
                    new_arg
                })
                .collect();
            if changed { Expr::call(*dtype, *op, new_args) } else { expr.clone() }
        }
    }
}
