//! Stage 2: operand classification from the original compute definitions.
//!
//! The imperative IR no longer says which operand of `A * B` was the
//! left-hand matrix or how each buffer is laid out; the original compute
//! definition still does. For every output compute shaped like a single-axis
//! reduction over a multiply, the innermost two index variables of each
//! loaded tensor determine its fragment role and layout.

use std::collections::HashMap;
use std::sync::Arc;

use zmora_dtype::DType;
use zmora_ir::{Expr, ExprKind, ReduceOp, Schedule, StmtVisitor, walk_expr};

use super::matcher::MatchFacts;
use super::{FragmentRole, MatrixLayout, MmaOperands, simplify_name, unpack_type_cast};

/// Facts published by classification: role and layout per unqualified buffer
/// name, plus the canonicalized operand triples (A before B).
#[derive(Debug)]
pub struct RoleFacts {
    pub roles: HashMap<String, FragmentRole>,
    pub layouts: HashMap<String, MatrixLayout>,
    pub mma_sync: indexmap::IndexMap<u64, MmaOperands>,
}

/// Scans a compute body for the inner-product shape and records the index
/// expressions of every loaded tensor.
#[derive(Default)]
struct BodyVisitor {
    args: HashMap<String, Vec<Arc<Expr>>>,
    tensorcore_candidate: bool,
}

impl StmtVisitor for BodyVisitor {
    fn visit_expr(&mut self, expr: &Arc<Expr>) {
        match expr.kind() {
            ExprKind::Reduce { combiner, source, .. } => {
                if combiner.len() != 1 || combiner[0] != ReduceOp::Add {
                    return;
                }
                for src in source {
                    let mul_f32 = unpack_type_cast(src, DType::Float32).filter(|e| is_mul(e));
                    let mul_i32 = unpack_type_cast(src, DType::Int32).filter(|e| is_mul(e));
                    if mul_f32.is_none() && mul_i32.is_none() {
                        continue;
                    }
                    self.tensorcore_candidate = true;
                    self.visit_expr(src);
                }
            }
            ExprKind::ProducerLoad { producer, indices } => {
                self.args.entry(producer.name.clone()).or_insert_with(|| indices.to_vec());
                walk_expr(self, expr);
            }
            _ => walk_expr(self, expr),
        }
    }
}

fn is_mul(expr: &Arc<Expr>) -> bool {
    matches!(expr.kind(), ExprKind::Binary(zmora_ir::BinaryOp::Mul, ..))
}

/// Classify every buffer the candidate computes touch, then normalize each
/// matched operand triple so `matrix_a` comes first.
///
/// Returns `None` when any matched operand is unclassified or the pair is
/// not one `matrix_a` plus one `matrix_b`; the caller demotes to a no-op.
pub fn identify_matrices(schedule: &Schedule, match_facts: &MatchFacts) -> Option<RoleFacts> {
    let mut roles: HashMap<String, FragmentRole> = HashMap::new();
    let mut layouts: HashMap<String, MatrixLayout> = HashMap::new();

    for compute in &schedule.outputs {
        if compute.axis.len() < 2 || compute.reduce_axis.len() != 1 {
            continue;
        }
        let outer = &compute.axis[compute.axis.len() - 2].var;
        let inner = &compute.axis[compute.axis.len() - 1].var;
        let reduce = &compute.reduce_axis[0].var;

        let mut body_visitor = BodyVisitor::default();
        for expr in &compute.body {
            body_visitor.visit_expr(expr);
        }
        if !body_visitor.tensorcore_candidate {
            continue;
        }

        for (name, args) in &body_visitor.args {
            if args.len() < 2 {
                continue;
            }
            let (Some(var0), Some(var1)) =
                (args[args.len() - 2].as_var(), args[args.len() - 1].as_var())
            else {
                continue;
            };

            let classified = if var0.id == reduce.id && var1.id == inner.id {
                Some((FragmentRole::MatrixA, MatrixLayout::ColMajor))
            } else if var0.id == reduce.id && var1.id == outer.id {
                Some((FragmentRole::MatrixB, MatrixLayout::RowMajor))
            } else if var0.id == inner.id && var1.id == reduce.id {
                Some((FragmentRole::MatrixA, MatrixLayout::RowMajor))
            } else if var0.id == outer.id && var1.id == reduce.id {
                Some((FragmentRole::MatrixB, MatrixLayout::ColMajor))
            } else {
                None
            };

            if let Some((role, layout)) = classified {
                roles.entry(name.clone()).or_insert(role);
                layouts.entry(name.clone()).or_insert(layout);
            }
        }

        roles.entry(compute.name.clone()).or_insert(FragmentRole::Accumulator);
        // The accumulator's layout is never consulted; col_major is the
        // conventional filler.
        layouts.entry(compute.name.clone()).or_insert(MatrixLayout::ColMajor);
    }

    let mut mma_sync = match_facts.mma_sync.clone();
    for operands in mma_sync.values_mut() {
        let name_a = match_facts
            .buf_name
            .get(&operands.a.id)
            .unwrap_or_else(|| panic!("matched operand load {} has no recorded buffer name", operands.a.id));
        let name_b = match_facts
            .buf_name
            .get(&operands.b.id)
            .unwrap_or_else(|| panic!("matched operand load {} has no recorded buffer name", operands.b.id));

        let role_a = roles.get(simplify_name(name_a))?;
        let role_b = roles.get(simplify_name(name_b))?;
        match (role_a, role_b) {
            (FragmentRole::MatrixA, FragmentRole::MatrixB) => {}
            (FragmentRole::MatrixB, FragmentRole::MatrixA) => {
                std::mem::swap(&mut operands.a, &mut operands.b);
            }
            _ => return None,
        }
    }

    Some(RoleFacts { roles, layouts, mma_sync })
}
