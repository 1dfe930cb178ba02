//! Expression analyzer: bottom-up algebraic simplification.
//!
//! Enough to canonicalize the index arithmetic the rewrite passes generate:
//! integer constant folding, additive/multiplicative identities, and
//! same-dtype cast collapse. Pure and stateless.

use std::sync::Arc;

use crate::expr::{BinaryOp, Expr, ExprKind};

#[derive(Debug, Default)]
pub struct Analyzer;

impl Analyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn simplify(&self, expr: &Arc<Expr>) -> Arc<Expr> {
        match expr.kind() {
            ExprKind::Cast { dtype, value } => {
                let value = self.simplify(value);
                if value.dtype() == *dtype {
                    return value;
                }
                if let ExprKind::IntImm { value: v, .. } = value.kind()
                    && dtype.is_integer()
                {
                    return Expr::int(*dtype, *v);
                }
                Expr::cast(*dtype, value)
            }
            ExprKind::Binary(op, a, b) => {
                let a = self.simplify(a);
                let b = self.simplify(b);
                self.fold_binary(*op, a, b)
            }
            _ => expr.clone(),
        }
    }

    fn fold_binary(&self, op: BinaryOp, a: Arc<Expr>, b: Arc<Expr>) -> Arc<Expr> {
        let dtype = a.dtype();
        if let (Some(lhs), Some(rhs)) = (a.as_int(), b.as_int())
            && let Some(value) = eval(op, lhs, rhs)
        {
            return Expr::int(dtype, value);
        }

        match op {
            BinaryOp::Add => {
                if is_zero(&a) {
                    return b;
                }
                if is_zero(&b) {
                    return a;
                }
            }
            BinaryOp::Sub => {
                if is_zero(&b) {
                    return a;
                }
            }
            BinaryOp::Mul => {
                if is_zero(&a) || is_one(&b) {
                    return a;
                }
                if is_zero(&b) || is_one(&a) {
                    return b;
                }
            }
            BinaryOp::Div => {
                if is_one(&b) {
                    return a;
                }
            }
            BinaryOp::Mod => {
                if is_one(&b) && dtype.is_integer() {
                    return Expr::int(dtype, 0);
                }
            }
        }

        Expr::try_binary(op, &a, &b).unwrap_or_else(|e| panic!("simplify rebuilt {op:?} with bad operands: {e}"))
    }
}

fn eval(op: BinaryOp, lhs: i64, rhs: i64) -> Option<i64> {
    match op {
        BinaryOp::Add => lhs.checked_add(rhs),
        BinaryOp::Sub => lhs.checked_sub(rhs),
        BinaryOp::Mul => lhs.checked_mul(rhs),
        BinaryOp::Div => lhs.checked_div(rhs),
        BinaryOp::Mod => lhs.checked_rem(rhs),
    }
}

fn is_zero(expr: &Arc<Expr>) -> bool {
    matches!(expr.kind(), ExprKind::IntImm { value: 0, .. })
}

fn is_one(expr: &Arc<Expr>) -> bool {
    matches!(expr.kind(), ExprKind::IntImm { value: 1, .. })
}
