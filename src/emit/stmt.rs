//! Statement emission and control-flow lowering.

use crate::ast::{Block, Decl, Expr, Stmt, VarDef};
use crate::ir::Ty;
use crate::sema::{fold, Binding, Place, SlotBinding};
use crate::span::Spanned;
use crate::Diagnostic;

use super::{Emitter, LoopLabels};

/// Whether control can fall through a statement. A statement terminates
/// when it is a return/break/continue, or a block/if-chain whose every
/// live path terminates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    Falls,
    Terminates,
}

impl Flow {
    pub(crate) fn terminates(self) -> bool {
        self == Flow::Terminates
    }
}

impl Emitter {
    /// Emit a block. Opens a scope on entry and closes it on every exit
    /// path, including error propagation — a leaked scope would make later
    /// siblings resolve against stale bindings.
    pub(crate) fn emit_block(&mut self, block: &Block) -> Result<Flow, Diagnostic> {
        self.scopes.push_scope();

        let mut flow = Flow::Falls;
        let mut error = None;
        for stmt in &block.stmts {
            if flow.terminates() {
                // Everything after a terminating statement is dead; the
                // basic block already ended.
                break;
            }
            match self.emit_stmt(stmt) {
                Ok(f) => flow = f,
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }

        self.scopes.pop_scope();
        match error {
            Some(e) => Err(e),
            None => Ok(flow),
        }
    }

    pub(crate) fn emit_stmt(&mut self, stmt: &Spanned<Stmt>) -> Result<Flow, Diagnostic> {
        match &stmt.node {
            Stmt::Decl(Decl::Const(def)) => {
                self.define_const(def)?;
                Ok(Flow::Falls)
            }

            Stmt::Decl(Decl::Var(def)) => {
                self.emit_local_var(def)?;
                Ok(Flow::Falls)
            }

            Stmt::Assign { target, value } => {
                let binding = self
                    .scopes
                    .resolve_or_err(&target.node.name.node, target.node.name.span)?
                    .clone();
                let slot = match binding {
                    Binding::Const(_) => {
                        return Err(Diagnostic::error(
                            format!("cannot assign to constant '{}'", target.node.name.node),
                            target.node.name.span,
                        ))
                    }
                    Binding::Slot(slot) => slot,
                };
                // Value first, then the destination address.
                let v = self.emit_expr(value)?;
                let addr = self.emit_element_addr(&target.node, &slot.symbol, slot.dims.len())?;
                self.inst(format!("store {}, {}", v, addr));
                Ok(Flow::Falls)
            }

            Stmt::Expr(None) => Ok(Flow::Falls),

            Stmt::Expr(Some(expr)) => {
                match &expr.node {
                    // Calls in statement position may be void.
                    Expr::Call { callee, args } => {
                        self.emit_call(callee, args)?;
                    }
                    _ => {
                        self.emit_expr(expr)?;
                    }
                }
                Ok(Flow::Falls)
            }

            Stmt::Block(block) => self.emit_block(&block.node),

            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => self.emit_if(cond, then_branch, else_branch.as_deref()),

            Stmt::While { cond, body } => self.emit_while(cond, body),

            Stmt::Break => {
                let exit = match self.loops.last() {
                    Some(labels) => labels.exit.clone(),
                    None => {
                        return Err(Diagnostic::error(
                            "break outside of a loop".to_string(),
                            stmt.span,
                        ))
                    }
                };
                self.inst(format!("jump %{}", exit));
                Ok(Flow::Terminates)
            }

            Stmt::Continue => {
                let entry = match self.loops.last() {
                    Some(labels) => labels.entry.clone(),
                    None => {
                        return Err(Diagnostic::error(
                            "continue outside of a loop".to_string(),
                            stmt.span,
                        ))
                    }
                };
                self.inst(format!("jump %{}", entry));
                Ok(Flow::Terminates)
            }

            Stmt::Return(value) => {
                let returns_value = self
                    .current_fn
                    .as_ref()
                    .map(|f| f.returns_value)
                    .unwrap_or(false);
                match (value, returns_value) {
                    (Some(expr), true) => {
                        let v = self.emit_expr(expr)?;
                        self.inst(format!("ret {}", v));
                    }
                    (Some(_), false) => {
                        return Err(Diagnostic::error(
                            "void function cannot return a value".to_string(),
                            stmt.span,
                        ))
                    }
                    // A bare return in a value-returning function yields 0,
                    // matching the implicit fallthrough return.
                    (None, true) => self.inst("ret 0".to_string()),
                    (None, false) => self.inst("ret".to_string()),
                }
                Ok(Flow::Terminates)
            }
        }
    }

    /// Local declaration: always a backing cell, even for scalars that
    /// never change — assignment and addressing stay uniform.
    fn emit_local_var(&mut self, def: &VarDef) -> Result<(), Diagnostic> {
        let dims = self.fold_dims(def)?;
        let ty = Ty::from_dims(&dims);
        let symbol = format!("@{}.{}", def.name.node, self.scopes.current_id());
        self.inst(format!("{} = alloc {}", symbol, ty));

        let mut known = None;
        if let Some(init) = &def.init {
            if !dims.is_empty() {
                return Err(Diagnostic::error(
                    format!("array initializers are not supported for '{}'", def.name.node),
                    def.name.span,
                ));
            }
            // The initializer resolves against the enclosing bindings; the
            // new name only enters scope below.
            let v = self.emit_expr(init)?;
            self.inst(format!("store {}, {}", v, symbol));
            known = fold::fold(&self.scopes, init).ok();
        }

        self.scopes.define(
            &def.name.node,
            Binding::Slot(SlotBinding {
                symbol,
                place: Place::Local,
                dims,
                known,
            }),
            def.name.span,
        )
    }

    fn emit_if(
        &mut self,
        cond: &Spanned<Expr>,
        then_branch: &Spanned<Stmt>,
        else_branch: Option<&Spanned<Stmt>>,
    ) -> Result<Flow, Diagnostic> {
        let c = self.emit_expr(cond)?;
        let id = self.fresh_construct();

        match else_branch {
            None => {
                let then_label = format!("then_{}", id);
                let end_label = format!("end_{}", id);

                self.inst(format!("br {}, %{}, %{}", c, then_label, end_label));
                self.raw(&format!("%{}:", then_label));
                let flow = self.emit_stmt(then_branch)?;
                if !flow.terminates() {
                    self.inst(format!("jump %{}", end_label));
                }
                self.raw(&format!("%{}:", end_label));
                // The false edge always falls through.
                Ok(Flow::Falls)
            }
            Some(else_stmt) => {
                let then_label = format!("then_{}", id);
                let else_label = format!("else_{}", id);
                let end_label = format!("end_{}", id);

                self.inst(format!("br {}, %{}, %{}", c, then_label, else_label));
                self.raw(&format!("%{}:", then_label));
                let then_flow = self.emit_stmt(then_branch)?;
                if !then_flow.terminates() {
                    self.inst(format!("jump %{}", end_label));
                }
                self.raw(&format!("%{}:", else_label));
                let else_flow = self.emit_stmt(else_stmt)?;
                if !else_flow.terminates() {
                    self.inst(format!("jump %{}", end_label));
                }

                // Dead-label avoidance: when neither arm can fall through,
                // the join label would be unreachable and is elided.
                if then_flow.terminates() && else_flow.terminates() {
                    Ok(Flow::Terminates)
                } else {
                    self.raw(&format!("%{}:", end_label));
                    Ok(Flow::Falls)
                }
            }
        }
    }

    fn emit_while(
        &mut self,
        cond: &Spanned<Expr>,
        body: &Spanned<Stmt>,
    ) -> Result<Flow, Diagnostic> {
        let id = self.fresh_construct();
        let entry_label = format!("while_entry_{}", id);
        let body_label = format!("while_body_{}", id);
        let exit_label = format!("while_exit_{}", id);

        self.inst(format!("jump %{}", entry_label));
        self.raw(&format!("%{}:", entry_label));
        let c = self.emit_expr(cond)?;
        self.inst(format!("br {}, %{}, %{}", c, body_label, exit_label));
        self.raw(&format!("%{}:", body_label));

        self.loops.push(LoopLabels {
            entry: entry_label.clone(),
            exit: exit_label.clone(),
        });
        let body_flow = self.emit_stmt(body);
        // The loop context pops even when the body failed.
        self.loops.pop();
        let body_flow = body_flow?;

        if !body_flow.terminates() {
            self.inst(format!("jump %{}", entry_label));
        }
        self.raw(&format!("%{}:", exit_label));
        Ok(Flow::Falls)
    }
}
