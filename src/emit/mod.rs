//! IR emission (pass A): syntax tree → IR text.
//!
//! The emitter walks the tree once, appending lines to its output buffer.
//! All compilation state — the virtual-value counter, the label counter,
//! the scope stack, the function table, and the loop context stack — lives
//! on the `Emitter` itself, so independent units can be compiled from one
//! process by constructing fresh emitters.
//!
//! Every expression visit returns the operand naming its result; statement
//! visits return whether control can fall through them.

mod expr;
mod stmt;

use std::fmt;

use crate::ast::{ConstDef, FnDef, Item, Unit, VarDef};
use crate::ir::Ty;
use crate::sema::{fold, Binding, FnSig, FnTable, Place, ScopeStack, SlotBinding};
use crate::span::Span;
use crate::Diagnostic;

/// Result operand of an emitted expression: an inline integer (no
/// instruction was needed) or a numbered virtual value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Value {
    Const(i32),
    Temp(u32),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Const(v) => write!(f, "{}", v),
            Value::Temp(n) => write!(f, "%{}", n),
        }
    }
}

/// Labels of the innermost enclosing loop: `continue` goes to `entry`,
/// `break` to `exit`.
#[derive(Clone, Debug)]
pub(crate) struct LoopLabels {
    pub entry: String,
    pub exit: String,
}

pub(crate) struct FnInfo {
    pub returns_value: bool,
}

/// The pass-A context object.
pub struct Emitter {
    output: Vec<String>,
    /// Virtual-value counter: monotonic per compilation, never reused.
    value_counter: u32,
    /// Control-flow construct counter, shared by if and while labels.
    label_counter: u32,
    pub(crate) scopes: ScopeStack,
    pub(crate) functions: FnTable,
    pub(crate) loops: Vec<LoopLabels>,
    pub(crate) current_fn: Option<FnInfo>,
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Emitter {
    pub fn new() -> Self {
        Self {
            output: Vec::new(),
            value_counter: 0,
            label_counter: 0,
            scopes: ScopeStack::new(),
            functions: FnTable::new(),
            loops: Vec::new(),
            current_fn: None,
        }
    }

    /// Emit a whole unit; consumes the emitter (one unit per context).
    pub fn emit_unit(mut self, unit: &Unit) -> Result<String, Diagnostic> {
        for item in &unit.items {
            match &item.node {
                Item::Const(def) => self.define_const(def)?,
                Item::Var(def) => self.emit_global_var(def, item.span)?,
                Item::Fn(def) => self.emit_fn(def)?,
            }
        }
        Ok(self.output.join("\n"))
    }

    // ── Output helpers ────────────────────────────────────────────

    /// Append an instruction line (indented).
    pub(crate) fn inst(&mut self, text: String) {
        self.output.push(format!("  {}", text));
    }

    /// Append a line verbatim (headers, labels, braces).
    pub(crate) fn raw(&mut self, text: &str) {
        self.output.push(text.to_string());
    }

    /// Allocate the next virtual value.
    pub(crate) fn fresh_value(&mut self) -> Value {
        let v = Value::Temp(self.value_counter);
        self.value_counter += 1;
        v
    }

    /// Allocate a control-flow construct id (labels derive from it).
    pub(crate) fn fresh_construct(&mut self) -> u32 {
        let id = self.label_counter;
        self.label_counter += 1;
        id
    }

    // ── Declarations ──────────────────────────────────────────────

    /// `const NAME = EXPR;` — folds and binds; no instructions, no storage.
    pub(crate) fn define_const(&mut self, def: &ConstDef) -> Result<(), Diagnostic> {
        let value = fold::fold(&self.scopes, &def.value)?;
        self.scopes
            .define(&def.name.node, Binding::Const(value), def.name.span)
    }

    /// Fold declaration dimensions to concrete extents.
    pub(crate) fn fold_dims(&mut self, def: &VarDef) -> Result<Vec<u32>, Diagnostic> {
        let mut dims = Vec::with_capacity(def.dims.len());
        for dim in &def.dims {
            let v = fold::fold(&self.scopes, dim)?;
            if v <= 0 {
                return Err(Diagnostic::error(
                    format!("array dimension of '{}' must be positive, got {}", def.name.node, v),
                    dim.span,
                ));
            }
            dims.push(v as u32);
        }
        Ok(dims)
    }

    fn emit_global_var(&mut self, def: &VarDef, span: Span) -> Result<(), Diagnostic> {
        let dims = self.fold_dims(def)?;
        let ty = Ty::from_dims(&dims);
        let symbol = format!("@{}", def.name.node);

        let init = match (&def.init, dims.is_empty()) {
            (None, _) => None,
            (Some(expr), true) => Some(fold::fold(&self.scopes, expr)?),
            (Some(_), false) => {
                return Err(Diagnostic::error(
                    format!("array initializers are not supported for '{}'", def.name.node),
                    span,
                ))
            }
        };

        match init {
            Some(v) => self.raw(&format!("global {} = alloc {}, {}", symbol, ty, v)),
            None => self.raw(&format!("global {} = alloc {}, zeroinit", symbol, ty)),
        }

        self.scopes.define(
            &def.name.node,
            Binding::Slot(SlotBinding {
                symbol,
                place: Place::Global,
                dims,
                known: init,
            }),
            def.name.span,
        )
    }

    // ── Functions ─────────────────────────────────────────────────

    fn emit_fn(&mut self, def: &FnDef) -> Result<(), Diagnostic> {
        let name = &def.name.node;
        // Register the descriptor before the body so recursive calls resolve.
        self.functions.define(
            name,
            FnSig {
                symbol: format!("@{}", name),
                returns_value: def.returns_value,
                params: def.params.iter().map(|p| p.name.node.clone()).collect(),
            },
            def.name.span,
        )?;
        self.current_fn = Some(FnInfo {
            returns_value: def.returns_value,
        });

        if !self.output.is_empty() {
            self.raw("");
        }
        let params = def
            .params
            .iter()
            .map(|p| format!("@{}: i32", p.name.node))
            .collect::<Vec<_>>()
            .join(", ");
        let ret = if def.returns_value { ": i32" } else { "" };
        self.raw(&format!("fun @{}({}){} {{", name, params, ret));
        self.raw("%entry:");

        // Parameters are copied into ordinary local cells at entry; the
        // function scope holds their bindings, the body block shadows it.
        let fn_scope = self.scopes.push_scope();
        let mut result = Ok(stmt::Flow::Falls);
        for param in &def.params {
            let symbol = format!("@{}.{}", param.name.node, fn_scope);
            self.inst(format!("{} = alloc i32", symbol));
            self.inst(format!("store @{}, {}", param.name.node, symbol));
            if let Err(e) = self.scopes.define(
                &param.name.node,
                Binding::Slot(SlotBinding {
                    symbol,
                    place: Place::Local,
                    dims: Vec::new(),
                    known: None,
                }),
                param.name.span,
            ) {
                result = Err(e);
                break;
            }
        }

        if result.is_ok() {
            result = self.emit_block(&def.body.node);
        }
        // The function scope pops even when the body failed.
        self.scopes.pop_scope();
        let flow = result?;

        if flow == stmt::Flow::Falls {
            // Fallthrough off the end of the body: implicit return.
            if def.returns_value {
                self.inst("ret 0".to_string());
            } else {
                self.inst("ret".to_string());
            }
        }
        self.raw("}");

        self.current_fn = None;
        Ok(())
    }
}
