use std::path::Path;

use crate::diagnostic::Diagnostic;
use crate::span::Span;

/// Machine description for the code-generation pass.
///
/// Every numeric constant that would otherwise be hardcoded for RV32
/// (register names, the signed-immediate window, frame alignment) lives
/// here, so the emitter is written against a description, not a target.
#[derive(Clone, Debug)]
pub struct TargetConfig {
    /// Short identifier used in file paths (e.g. "riscv32").
    pub name: String,
    /// Human-readable name (e.g. "RV32IM").
    pub display_name: String,
    /// Allocatable registers, in allocation scan order. All are treated
    /// as caller-saved.
    pub allocatable: Vec<String>,
    /// Hardwired-zero register; reads as 0, never allocated.
    pub zero: String,
    /// Scratch register reserved outside the allocatable set for address
    /// materialization. Never holds a value across instructions.
    pub scratch: String,
    /// Argument registers in ABI order; the first also carries results.
    /// Each must be a member of `allocatable`.
    pub arg_regs: Vec<String>,
    /// Bytes per storage unit (one i32 cell).
    pub word_size: u32,
    /// Frame sizes round up to a multiple of this.
    pub frame_align: u32,
    /// Inclusive signed-immediate range of load/store/addi offsets.
    pub imm_min: i32,
    pub imm_max: i32,
}

impl TargetConfig {
    /// Built-in RV32IM configuration (hardcoded fallback).
    pub fn riscv32() -> Self {
        Self {
            name: "riscv32".to_string(),
            display_name: "RV32IM".to_string(),
            allocatable: [
                "t0", "t1", "t2", "t3", "t4", "t5", "t6", "a0", "a1", "a2", "a3", "a4", "a5",
                "a6", "a7",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            zero: "x0".to_string(),
            scratch: "s11".to_string(),
            arg_regs: ["a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            word_size: 4,
            frame_align: 16,
            imm_min: -2048,
            imm_max: 2047,
        }
    }

    /// Index of a register name within the allocatable set.
    pub fn reg_index(&self, name: &str) -> Option<usize> {
        self.allocatable.iter().position(|r| r == name)
    }

    /// Whether `offset` fits the direct load/store immediate window.
    pub fn fits_imm(&self, offset: i32) -> bool {
        offset >= self.imm_min && offset <= self.imm_max
    }

    /// Load a target configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Diagnostic> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::error(
                format!("cannot read target config '{}': {}", path.display(), e),
                Span::dummy(),
            )
        })?;
        Self::parse_toml(&content, path)
    }

    /// Resolve a target by name: look for `targets/{name}.toml` relative to
    /// the host binary or working directory, falling back to built-in configs.
    pub fn resolve(name: &str) -> Result<Self, Diagnostic> {
        // Reject path traversal
        if name.contains('/') || name.contains('\\') || name.contains("..") || name.starts_with('.')
        {
            return Err(Diagnostic::error(
                format!("invalid target name '{}'", name),
                Span::dummy(),
            ));
        }

        // Built-in target
        if name == "riscv32" {
            return Ok(Self::riscv32());
        }

        // Search for targets/{name}.toml
        let filename = format!("targets/{}.toml", name);

        // 1. Relative to the host binary
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let path = dir.join(&filename);
                if path.exists() {
                    return Self::load(&path);
                }
                // One level up (target/debug/../targets/)
                if let Some(parent) = dir.parent() {
                    let path = parent.join(&filename);
                    if path.exists() {
                        return Self::load(&path);
                    }
                    if let Some(grandparent) = parent.parent() {
                        let path = grandparent.join(&filename);
                        if path.exists() {
                            return Self::load(&path);
                        }
                    }
                }
            }
        }

        // 2. Current working directory
        let cwd_path = std::path::PathBuf::from(&filename);
        if cwd_path.exists() {
            return Self::load(&cwd_path);
        }

        Err(Diagnostic::error(
            format!("unknown target '{}' (looked for '{}')", name, filename),
            Span::dummy(),
        )
        .with_help("available built-in targets: riscv32".to_string()))
    }

    fn parse_toml(content: &str, path: &Path) -> Result<Self, Diagnostic> {
        let err =
            |msg: String| Diagnostic::error(format!("{}: {}", path.display(), msg), Span::dummy());

        let mut name = String::new();
        let mut display_name = String::new();
        let mut allocatable: Vec<String> = Vec::new();
        let mut zero = String::new();
        let mut scratch = String::new();
        let mut arg_regs: Vec<String> = Vec::new();
        let mut word_size: u32 = 0;
        let mut frame_align: u32 = 0;
        let mut imm_min: i32 = 0;
        let mut imm_max: i32 = 0;

        let mut section = String::new();

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                section = trimmed[1..trimmed.len() - 1].trim().to_string();
                continue;
            }
            if let Some((key, value)) = trimmed.split_once('=') {
                let key = key.trim();
                let value = value.trim();
                let unquoted = value.trim_matches('"');

                match (section.as_str(), key) {
                    ("target", "name") => name = unquoted.to_string(),
                    ("target", "display_name") => display_name = unquoted.to_string(),
                    ("registers", "allocatable") => allocatable = parse_string_array(value),
                    ("registers", "zero") => zero = unquoted.to_string(),
                    ("registers", "scratch") => scratch = unquoted.to_string(),
                    ("registers", "args") => arg_regs = parse_string_array(value),
                    ("frame", "word_size") => {
                        word_size = value
                            .parse()
                            .map_err(|_| err(format!("invalid frame.word_size: {}", value)))?;
                    }
                    ("frame", "align") => {
                        frame_align = value
                            .parse()
                            .map_err(|_| err(format!("invalid frame.align: {}", value)))?;
                    }
                    ("immediates", "min") => {
                        imm_min = value
                            .parse()
                            .map_err(|_| err(format!("invalid immediates.min: {}", value)))?;
                    }
                    ("immediates", "max") => {
                        imm_max = value
                            .parse()
                            .map_err(|_| err(format!("invalid immediates.max: {}", value)))?;
                    }
                    _ => {} // ignore unknown keys
                }
            }
        }

        if name.is_empty() {
            return Err(err("missing target.name".to_string()));
        }
        if allocatable.is_empty() {
            return Err(err("registers.allocatable must not be empty".to_string()));
        }
        if zero.is_empty() {
            return Err(err("missing registers.zero".to_string()));
        }
        if scratch.is_empty() {
            return Err(err("missing registers.scratch".to_string()));
        }
        if word_size == 0 {
            return Err(err("frame.word_size must be > 0".to_string()));
        }
        if frame_align == 0 {
            return Err(err("frame.align must be > 0".to_string()));
        }
        if imm_min >= imm_max {
            return Err(err("immediates.min must be below immediates.max".to_string()));
        }
        for reg in &arg_regs {
            if !allocatable.contains(reg) {
                return Err(err(format!(
                    "argument register '{}' is not in registers.allocatable",
                    reg
                )));
            }
        }

        Ok(Self {
            name,
            display_name,
            allocatable,
            zero,
            scratch,
            arg_regs,
            word_size,
            frame_align,
            imm_min,
            imm_max,
        })
    }
}

/// Parse a minimal TOML string array: `["a", "b", "c"]` → `vec!["a", "b", "c"]`.
fn parse_string_array(s: &str) -> Vec<String> {
    let s = s.trim();
    if !s.starts_with('[') || !s.ends_with(']') {
        return Vec::new();
    }
    let inner = &s[1..s.len() - 1];
    inner
        .split(',')
        .map(|part| part.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
