//! Scope store and function table.
//!
//! Scopes form a strict LIFO stack driven by block recursion in the emitter:
//! pushed on block entry, popped on block exit, innermost-first resolution
//! with shadowing. Each pushed scope gets a unit-unique instance id; local
//! cell symbols are suffixed with it so shadowed names map to distinct cells.

pub mod fold;

use std::collections::HashMap;

use crate::span::Span;
use crate::Diagnostic;

/// What an identifier means in the current scope chain.
#[derive(Clone, Debug)]
pub enum Binding {
    /// A compile-time alias. Uses re-derive the value; no runtime storage.
    Const(i32),
    /// A mutable memory cell.
    Slot(SlotBinding),
}

#[derive(Clone, Debug)]
pub struct SlotBinding {
    /// IR cell symbol, e.g. `@x.3` (local) or `@x` (global).
    pub symbol: String,
    pub place: Place,
    /// Array dimensions, outermost first; empty for scalars.
    pub dims: Vec<u32>,
    /// Folded initializer, when the initializer was foldable. A shadow copy
    /// for debugging and a future constant-propagation pass; codegen never
    /// reads it.
    pub known: Option<i32>,
}

/// Where a cell lives — globals and locals take different addressing forms
/// in the machine-code pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Place {
    Global,
    Local,
}

#[derive(Debug)]
struct Scope {
    id: u32,
    bindings: HashMap<String, Binding>,
}

/// The lexical scope stack.
#[derive(Debug)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
    next_id: u32,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    /// A fresh stack with the unit (global) scope already open.
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                id: 0,
                bindings: HashMap::new(),
            }],
            next_id: 1,
        }
    }

    /// Open a scope; returns its unit-unique instance id.
    pub fn push_scope(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.scopes.push(Scope {
            id,
            bindings: HashMap::new(),
        });
        id
    }

    /// Close the innermost scope. Must mirror a prior `push_scope` — the
    /// emitter brackets every push with a pop even on the error path.
    pub fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "popping the unit scope");
        self.scopes.pop();
    }

    /// Instance id of the innermost scope.
    pub fn current_id(&self) -> u32 {
        self.scopes.last().map(|s| s.id).unwrap_or(0)
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Insert into the innermost scope, shadowing (not mutating) any outer
    /// binding of the same name. Redefinition within one scope is an error.
    pub fn define(&mut self, name: &str, binding: Binding, span: Span) -> Result<(), Diagnostic> {
        let scope = self.scopes.last_mut().expect("scope stack never empty");
        if scope.bindings.contains_key(name) {
            return Err(Diagnostic::error(
                format!("redefinition of '{}' in the same scope", name),
                span,
            ));
        }
        scope.bindings.insert(name.to_string(), binding);
        Ok(())
    }

    /// Innermost-to-outermost search; first match wins.
    pub fn resolve(&self, name: &str) -> Option<&Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.bindings.get(name))
    }

    /// `resolve` that fails with an unbound-identifier diagnostic.
    pub fn resolve_or_err(&self, name: &str, span: Span) -> Result<&Binding, Diagnostic> {
        self.resolve(name).ok_or_else(|| {
            Diagnostic::error(format!("unbound identifier '{}'", name), span)
                .with_note(format!("no declaration of '{}' in any enclosing scope", name))
        })
    }
}

/// Signature of a declared function.
#[derive(Clone, Debug)]
pub struct FnSig {
    /// IR symbol, e.g. `@max`.
    pub symbol: String,
    pub returns_value: bool,
    /// Parameter names in declaration order.
    pub params: Vec<String>,
}

/// Descriptors for every function seen so far. Built incrementally as
/// definitions are visited, so recursive calls resolve while the body of
/// the callee is still being emitted.
#[derive(Debug, Default)]
pub struct FnTable {
    map: HashMap<String, FnSig>,
}

impl FnTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: &str, sig: FnSig, span: Span) -> Result<(), Diagnostic> {
        if self.map.contains_key(name) {
            return Err(Diagnostic::error(
                format!("redefinition of function '{}'", name),
                span,
            ));
        }
        self.map.insert(name.to_string(), sig);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&FnSig> {
        self.map.get(name)
    }

    /// `lookup` that fails with an unbound-identifier diagnostic.
    pub fn lookup_or_err(&self, name: &str, span: Span) -> Result<&FnSig, Diagnostic> {
        self.map.get(name).ok_or_else(|| {
            Diagnostic::error(format!("call to unknown function '{}'", name), span)
        })
    }
}
