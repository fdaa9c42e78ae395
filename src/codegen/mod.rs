//! Machine-code generation (pass B): structural IR → assembly text.
//!
//! One `FuncLowering` per function — register statuses, the value→location
//! map, and the frame cursor all reset at function entry, so no register or
//! slot assignment ever crosses a function boundary.

mod regfile;
mod riscv;

pub use regfile::{Acquire, RegFile, RegStatus};

use crate::ir::{Program, Ty};
use crate::target::TargetConfig;
use crate::Diagnostic;

use riscv::FuncLowering;

/// Lower a whole program to assembly text.
pub fn lower_program(program: &Program, config: &TargetConfig) -> Result<String, Diagnostic> {
    let mut out: Vec<String> = Vec::new();

    if !program.globals.is_empty() {
        out.push("    .data".to_string());
        for global in &program.globals {
            out.push(format!("    .globl {}", global.name));
            out.push(format!("{}:", global.name));
            match &global.ty {
                Ty::I32 => out.push(format!("    .word {}", global.init)),
                ty => out.push(format!("    .zero {}", ty.units() * config.word_size)),
            }
        }
    }

    for function in &program.functions {
        if !out.is_empty() {
            out.push(String::new());
        }
        out.extend(FuncLowering::new(config, function).lower()?);
    }

    Ok(out.join("\n"))
}
