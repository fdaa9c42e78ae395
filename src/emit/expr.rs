//! Expression emission.

use crate::ast::{BinOp, Expr, LVal, UnaryOp};
use crate::sema::Binding;
use crate::span::Spanned;
use crate::Diagnostic;

use super::{Emitter, Value};

impl Emitter {
    /// Emit `expr`, returning the operand that names its result.
    pub(crate) fn emit_expr(&mut self, expr: &Spanned<Expr>) -> Result<Value, Diagnostic> {
        match &expr.node {
            Expr::Literal(v) => Ok(Value::Const(*v)),

            Expr::LVal(lval) => self.emit_lval_read(lval),

            Expr::Unary { op, operand } => {
                let v = self.emit_expr(operand)?;
                match op {
                    UnaryOp::Pos => Ok(v),
                    UnaryOp::Neg => {
                        let out = self.fresh_value();
                        self.inst(format!("{} = sub 0, {}", out, v));
                        Ok(out)
                    }
                    UnaryOp::Not => {
                        let out = self.fresh_value();
                        self.inst(format!("{} = eq {}, 0", out, v));
                        Ok(out)
                    }
                }
            }

            Expr::Binary { op, lhs, rhs } => self.emit_binary(*op, lhs, rhs),

            Expr::Call { callee, args } => {
                match self.emit_call(callee, args)? {
                    Some(v) => Ok(v),
                    None => Err(Diagnostic::error(
                        format!("void function '{}' used as a value", callee.node),
                        expr.span,
                    )),
                }
            }
        }
    }

    /// Operands left-then-right, then one combining instruction. The
    /// logical forms normalize each operand to 0/1 with `ne …, 0` and
    /// combine bitwise: the emitted code evaluates BOTH operands (eager),
    /// unlike constant folding, which short-circuits.
    fn emit_binary(
        &mut self,
        op: BinOp,
        lhs: &Spanned<Expr>,
        rhs: &Spanned<Expr>,
    ) -> Result<Value, Diagnostic> {
        if matches!(op, BinOp::LAnd | BinOp::LOr) {
            let combine = if op == BinOp::LAnd { "and" } else { "or" };

            let l = self.emit_expr(lhs)?;
            let lb = self.fresh_value();
            self.inst(format!("{} = ne {}, 0", lb, l));

            let r = self.emit_expr(rhs)?;
            let rb = self.fresh_value();
            self.inst(format!("{} = ne {}, 0", rb, r));

            let out = self.fresh_value();
            self.inst(format!("{} = {} {}, {}", out, combine, lb, rb));
            return Ok(out);
        }

        let mnemonic = match op {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Mod => "mod",
            BinOp::Lt => "lt",
            BinOp::Gt => "gt",
            BinOp::Le => "le",
            BinOp::Ge => "ge",
            BinOp::Eq => "eq",
            BinOp::Ne => "ne",
            BinOp::LAnd | BinOp::LOr => unreachable!("handled above"),
        };

        let l = self.emit_expr(lhs)?;
        let r = self.emit_expr(rhs)?;
        let out = self.fresh_value();
        self.inst(format!("{} = {} {}, {}", out, mnemonic, l, r));
        Ok(out)
    }

    /// Read through an lvalue: constants re-derive their value, cells load.
    fn emit_lval_read(&mut self, lval: &LVal) -> Result<Value, Diagnostic> {
        let binding = self
            .scopes
            .resolve_or_err(&lval.name.node, lval.name.span)?
            .clone();
        match binding {
            Binding::Const(v) => {
                if !lval.indices.is_empty() {
                    return Err(Diagnostic::error(
                        format!("constant '{}' cannot be indexed", lval.name.node),
                        lval.name.span,
                    ));
                }
                Ok(Value::Const(v))
            }
            Binding::Slot(slot) => {
                let addr = self.emit_element_addr(lval, &slot.symbol, slot.dims.len())?;
                let out = self.fresh_value();
                self.inst(format!("{} = load {}", out, addr));
                Ok(out)
            }
        }
    }

    /// Address of the scalar an lvalue denotes: the cell symbol itself for
    /// scalars, or a `getelemptr` chain (one step per index) for elements.
    /// The index count must match the declared shape exactly.
    pub(crate) fn emit_element_addr(
        &mut self,
        lval: &LVal,
        symbol: &str,
        rank: usize,
    ) -> Result<String, Diagnostic> {
        if lval.indices.len() != rank {
            return Err(Diagnostic::error(
                format!(
                    "'{}' expects {} {}, got {}",
                    lval.name.node,
                    rank,
                    if rank == 1 { "index" } else { "indices" },
                    lval.indices.len()
                ),
                lval.name.span,
            )
            .with_note("whole-array values cannot be used directly".to_string()));
        }

        let mut addr = symbol.to_string();
        for index in &lval.indices {
            let idx = self.emit_expr(index)?;
            let step = self.fresh_value();
            self.inst(format!("{} = getelemptr {}, {}", step, addr, idx));
            addr = step.to_string();
        }
        Ok(addr)
    }

    /// Emit a call. Returns the result value, or `None` for void callees.
    pub(crate) fn emit_call(
        &mut self,
        callee: &Spanned<String>,
        args: &[Spanned<Expr>],
    ) -> Result<Option<Value>, Diagnostic> {
        let sig = self.functions.lookup_or_err(&callee.node, callee.span)?;
        let symbol = sig.symbol.clone();
        let returns_value = sig.returns_value;
        let arity = sig.params.len();

        if args.len() != arity {
            return Err(Diagnostic::error(
                format!(
                    "'{}' expects {} argument{}, got {}",
                    callee.node,
                    arity,
                    if arity == 1 { "" } else { "s" },
                    args.len()
                ),
                callee.span,
            )
            .with_note(format!("declared as {}", signature_note(&callee.node, arity))));
        }

        let mut operands = Vec::with_capacity(args.len());
        for arg in args {
            operands.push(self.emit_expr(arg)?.to_string());
        }
        let operands = operands.join(", ");

        if returns_value {
            let out = self.fresh_value();
            self.inst(format!("{} = call {}({})", out, symbol, operands));
            Ok(Some(out))
        } else {
            self.inst(format!("call {}({})", symbol, operands));
            Ok(None)
        }
    }
}

fn signature_note(name: &str, arity: usize) -> String {
    let params = (0..arity).map(|_| "i32").collect::<Vec<_>>().join(", ");
    format!("{}({})", name, params)
}
