//! Compile-time constant evaluation.
//!
//! `fold` reduces an expression to an `i32` using only constant bindings.
//! Anything touching a memory cell or a function call is not foldable.
//! Unlike the emitted code, folding short-circuits `&&`/`||`: a decided
//! left operand makes the right operand's foldability irrelevant.

use crate::ast::{BinOp, Expr, UnaryOp};
use crate::span::Spanned;
use crate::Diagnostic;

use super::{Binding, ScopeStack};

/// Fold `expr` to an integer, or fail with a non-constant-context error.
pub fn fold(scopes: &ScopeStack, expr: &Spanned<Expr>) -> Result<i32, Diagnostic> {
    match &expr.node {
        Expr::Literal(v) => Ok(*v),

        Expr::LVal(lval) => {
            if !lval.indices.is_empty() {
                return Err(non_constant(
                    &format!("array element '{}' is not a constant", lval.name.node),
                    expr,
                ));
            }
            match scopes.resolve_or_err(&lval.name.node, lval.name.span)? {
                Binding::Const(v) => Ok(*v),
                Binding::Slot(slot) => Err(non_constant(
                    &format!("'{}' is a variable, not a constant", lval.name.node),
                    expr,
                )
                .with_note(format!("'{}' is backed by cell {}", lval.name.node, slot.symbol))),
            }
        }

        Expr::Unary { op, operand } => {
            let v = fold(scopes, operand)?;
            Ok(match op {
                UnaryOp::Pos => v,
                UnaryOp::Neg => v.wrapping_neg(),
                UnaryOp::Not => (v == 0) as i32,
            })
        }

        Expr::Binary { op, lhs, rhs } => fold_binary(scopes, *op, lhs, rhs, expr),

        Expr::Call { callee, .. } => Err(non_constant(
            &format!("call to '{}' cannot be evaluated at compile time", callee.node),
            expr,
        )),
    }
}

fn fold_binary(
    scopes: &ScopeStack,
    op: BinOp,
    lhs: &Spanned<Expr>,
    rhs: &Spanned<Expr>,
    whole: &Spanned<Expr>,
) -> Result<i32, Diagnostic> {
    // Short-circuit forms decide on the left operand alone when they can.
    match op {
        BinOp::LAnd => {
            let l = fold(scopes, lhs)?;
            if l == 0 {
                return Ok(0);
            }
            return Ok((fold(scopes, rhs)? != 0) as i32);
        }
        BinOp::LOr => {
            let l = fold(scopes, lhs)?;
            if l != 0 {
                return Ok(1);
            }
            return Ok((fold(scopes, rhs)? != 0) as i32);
        }
        _ => {}
    }

    let l = fold(scopes, lhs)?;
    let r = fold(scopes, rhs)?;
    Ok(match op {
        BinOp::Add => l.wrapping_add(r),
        BinOp::Sub => l.wrapping_sub(r),
        BinOp::Mul => l.wrapping_mul(r),
        BinOp::Div => {
            if r == 0 {
                return Err(non_constant("division by zero in constant expression", whole));
            }
            l.wrapping_div(r)
        }
        BinOp::Mod => {
            if r == 0 {
                return Err(non_constant("remainder by zero in constant expression", whole));
            }
            l.wrapping_rem(r)
        }
        BinOp::Lt => (l < r) as i32,
        BinOp::Gt => (l > r) as i32,
        BinOp::Le => (l <= r) as i32,
        BinOp::Ge => (l >= r) as i32,
        BinOp::Eq => (l == r) as i32,
        BinOp::Ne => (l != r) as i32,
        BinOp::LAnd | BinOp::LOr => unreachable!("handled above"),
    })
}

fn non_constant(detail: &str, expr: &Spanned<Expr>) -> Diagnostic {
    Diagnostic::error(
        format!("non-constant expression in constant context: {}", detail),
        expr.span,
    )
}
