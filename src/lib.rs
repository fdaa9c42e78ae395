//! rill — compiler backend for a small C-like language.
//!
//! The crate is two passes joined by a textual IR:
//!
//! 1. **Pass A** (`emit`): walks the syntax tree a host parser produced,
//!    resolving scopes, folding constants, and lowering control flow into
//!    a linear virtual-register IR text.
//! 2. **Pass B** (`codegen`): consumes the structural form of that text
//!    (loaded by `ir::parse`) and emits RV32 assembly, allocating machine
//!    registers with spill-to-stack and laying out stack frames.
//!
//! Compilation is fail-fast: the first `Diagnostic` aborts the unit and no
//! partial output escapes.

pub mod ast;
pub mod codegen;
pub mod diagnostic;
pub mod emit;
pub mod ir;
pub mod sema;
pub mod span;
pub mod target;

pub use diagnostic::{render_diagnostics, Diagnostic, Severity};
pub use emit::Emitter;
pub use target::TargetConfig;

/// Pass A: syntax tree → IR text.
pub fn emit_ir(unit: &ast::Unit) -> Result<String, Diagnostic> {
    Emitter::new().emit_unit(unit)
}

/// Full pipeline: syntax tree → IR text → structural IR → assembly.
pub fn compile(unit: &ast::Unit, config: &TargetConfig) -> Result<String, Diagnostic> {
    let text = emit_ir(unit)?;
    let program = ir::parse(&text)?;
    codegen::lower_program(&program, config)
}
