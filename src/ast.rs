//! Syntax tree for a rill compilation unit.
//!
//! The tree is produced by the host parser and consumed by the IR emitter.
//! Nodes are a closed set of tagged variants; the emitter and the constant
//! evaluator both dispatch by exhaustive matching. Every node owns its
//! children exclusively — the unit is a tree, never a graph.

use crate::span::Spanned;

/// A parsed compilation unit: global declarations and function definitions.
#[derive(Clone, Debug)]
pub struct Unit {
    pub items: Vec<Spanned<Item>>,
}

/// Top-level items.
#[derive(Clone, Debug)]
pub enum Item {
    Const(ConstDef),
    Var(VarDef),
    Fn(FnDef),
}

/// `const NAME = EXPR;` — a compile-time alias, no runtime storage.
#[derive(Clone, Debug)]
pub struct ConstDef {
    pub name: Spanned<String>,
    pub value: Spanned<Expr>,
}

/// `int NAME;`, `int NAME = EXPR;`, or `int NAME[D0][D1]…;`.
///
/// Dimensions are expressions that must fold to constants at the point of
/// declaration. An empty `dims` means a scalar.
#[derive(Clone, Debug)]
pub struct VarDef {
    pub name: Spanned<String>,
    pub dims: Vec<Spanned<Expr>>,
    pub init: Option<Spanned<Expr>>,
}

/// A function definition.
#[derive(Clone, Debug)]
pub struct FnDef {
    pub name: Spanned<String>,
    pub params: Vec<Param>,
    /// `int f(…)` produces a value; `void f(…)` does not.
    pub returns_value: bool,
    pub body: Spanned<Block>,
}

/// A function parameter. All parameters are `int`.
#[derive(Clone, Debug)]
pub struct Param {
    pub name: Spanned<String>,
}

/// A brace-delimited statement list. Entering a block opens a scope.
#[derive(Clone, Debug)]
pub struct Block {
    pub stmts: Vec<Spanned<Stmt>>,
}

/// Statements.
#[derive(Clone, Debug)]
pub enum Stmt {
    Decl(Decl),
    Assign {
        target: Spanned<LVal>,
        value: Spanned<Expr>,
    },
    /// Expression statement; `None` is the empty statement `;`.
    Expr(Option<Spanned<Expr>>),
    Block(Spanned<Block>),
    If {
        cond: Spanned<Expr>,
        then_branch: Box<Spanned<Stmt>>,
        else_branch: Option<Box<Spanned<Stmt>>>,
    },
    While {
        cond: Spanned<Expr>,
        body: Box<Spanned<Stmt>>,
    },
    Break,
    Continue,
    Return(Option<Spanned<Expr>>),
}

/// Local declarations.
#[derive(Clone, Debug)]
pub enum Decl {
    Const(ConstDef),
    Var(VarDef),
}

/// A storage reference: `name` or `name[i]…[k]`.
#[derive(Clone, Debug)]
pub struct LVal {
    pub name: Spanned<String>,
    pub indices: Vec<Spanned<Expr>>,
}

/// Expressions. The parser's precedence chain (logical-or down to primary)
/// collapses into `Binary` with an operator tag.
#[derive(Clone, Debug)]
pub enum Expr {
    Literal(i32),
    LVal(LVal),
    Unary {
        op: UnaryOp,
        operand: Box<Spanned<Expr>>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Spanned<Expr>>,
        rhs: Box<Spanned<Expr>>,
    },
    Call {
        callee: Spanned<String>,
        args: Vec<Spanned<Expr>>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    /// `+x` — no effect.
    Pos,
    /// `-x`
    Neg,
    /// `!x` — 1 when x is zero, else 0.
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    /// `&&` — eager in emitted code, short-circuit when folded.
    LAnd,
    /// `||` — eager in emitted code, short-circuit when folded.
    LOr,
}

impl LVal {
    /// A bare identifier reference.
    pub fn name(name: Spanned<String>) -> Self {
        Self {
            name,
            indices: Vec::new(),
        }
    }
}
