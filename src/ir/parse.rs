//! Line-oriented loader: IR text → `Program`.
//!
//! The grammar is exactly what the emitter produces; anything else is
//! rejected with a malformed-IR diagnostic naming the offending line.
//! `@` symbols resolve local cells first, then parameters, then globals,
//! mirroring source-language shadowing.

use std::collections::HashMap;

use crate::span::Span;
use crate::Diagnostic;

use super::{BasicBlock, BinOp, Function, Global, Inst, InstId, InstKind, Operand, Program, Ty};

/// Parse a full IR unit.
pub fn parse(text: &str) -> Result<Program, Diagnostic> {
    let mut program = Program::default();
    let mut global_tys: HashMap<String, Ty> = HashMap::new();
    let mut current: Option<FnCtx> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if current.is_some() {
            if line == "}" {
                let mut ctx = current.take().expect("function context in scope");
                ctx.finish_block(line_no)?;
                program.functions.push(ctx.into_function(line_no)?);
            } else {
                let ctx = current.as_mut().expect("function context in scope");
                if let Some(label) = line.strip_prefix('%').and_then(|l| l.strip_suffix(':')) {
                    ctx.start_block(label, line_no)?;
                } else {
                    let inst = ctx.parse_inst(line, &global_tys, line_no)?;
                    match ctx.blocks.last_mut() {
                        Some(block) => block.insts.push(inst),
                        None => {
                            return Err(err(line_no, "instruction outside a basic block".into()))
                        }
                    }
                }
            }
        } else if let Some(rest) = line.strip_prefix("global ") {
            let global = parse_global(rest, line_no)?;
            if global_tys.contains_key(&global.name) {
                return Err(err(line_no, format!("duplicate global '@{}'", global.name)));
            }
            global_tys.insert(global.name.clone(), global.ty.clone());
            program.globals.push(global);
        } else if let Some(rest) = line.strip_prefix("fun @") {
            let ctx = parse_fn_header(rest, line_no)?;
            if program.functions.iter().any(|f| f.name == ctx.name) {
                return Err(err(line_no, format!("duplicate function '@{}'", ctx.name)));
            }
            current = Some(ctx);
        } else {
            return Err(err(line_no, format!("unexpected top-level line '{}'", line)));
        }
    }

    if let Some(ctx) = current {
        return Err(err(
            0,
            format!("function '@{}' is missing its closing brace", ctx.name),
        ));
    }

    Ok(program)
}

fn err(line_no: usize, msg: String) -> Diagnostic {
    let prefix = if line_no == 0 {
        "malformed IR".to_string()
    } else {
        format!("malformed IR (line {})", line_no)
    };
    Diagnostic::error(format!("{}: {}", prefix, msg), Span::dummy())
}

// ─── Globals and function headers ─────────────────────────────────

/// `@name = alloc TYPE, INIT` (after the `global ` keyword).
fn parse_global(rest: &str, line_no: usize) -> Result<Global, Diagnostic> {
    let (name, tail) = rest
        .strip_prefix('@')
        .and_then(|r| r.split_once(" = alloc "))
        .ok_or_else(|| err(line_no, "expected 'global @NAME = alloc TYPE, INIT'".into()))?;
    let (ty_text, init_text) = tail
        .rsplit_once(',')
        .ok_or_else(|| err(line_no, "global is missing its initializer".into()))?;
    let ty = parse_ty(ty_text.trim(), line_no)?;
    let init = match init_text.trim() {
        "zeroinit" => 0,
        text => {
            if ty != Ty::I32 {
                return Err(err(line_no, "array globals take 'zeroinit'".into()));
            }
            parse_int(text, line_no)?
        }
    };
    Ok(Global {
        name: name.trim().to_string(),
        ty,
        init,
    })
}

/// `NAME(@p: i32, …)[: i32] {` (after the `fun @` prefix).
fn parse_fn_header(rest: &str, line_no: usize) -> Result<FnCtx, Diagnostic> {
    let (name, tail) = rest
        .split_once('(')
        .ok_or_else(|| err(line_no, "function header is missing '('".into()))?;
    let (param_text, tail) = tail
        .split_once(')')
        .ok_or_else(|| err(line_no, "function header is missing ')'".into()))?;

    let returns_value = match tail.trim() {
        "{" => false,
        ": i32 {" => true,
        other => {
            return Err(err(
                line_no,
                format!("unexpected function header suffix '{}'", other),
            ))
        }
    };

    let mut params = Vec::new();
    for part in param_text.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let name = part
            .strip_prefix('@')
            .and_then(|p| p.split_once(':'))
            .map(|(n, _)| n.trim().to_string())
            .ok_or_else(|| err(line_no, format!("bad parameter '{}'", part)))?;
        params.push(name);
    }

    Ok(FnCtx {
        name: name.trim().to_string(),
        params,
        returns_value,
        blocks: Vec::new(),
        values: HashMap::new(),
        locals: HashMap::new(),
        types: HashMap::new(),
        next_id: 0,
    })
}

// ─── Per-function loader state ────────────────────────────────────

struct FnCtx {
    name: String,
    params: Vec<String>,
    returns_value: bool,
    blocks: Vec<BasicBlock>,
    /// `%N` → instruction id.
    values: HashMap<String, InstId>,
    /// Local cell symbol (without `@`) → alloc id.
    locals: HashMap<String, InstId>,
    /// Pointee type of every address-valued instruction (alloc, getelemptr).
    types: HashMap<InstId, Ty>,
    next_id: u32,
}

impl FnCtx {
    fn fresh_id(&mut self) -> InstId {
        let id = InstId(self.next_id);
        self.next_id += 1;
        id
    }

    fn start_block(&mut self, label: &str, line_no: usize) -> Result<(), Diagnostic> {
        self.finish_block(line_no)?;
        if self.blocks.iter().any(|b| b.label == label) {
            return Err(err(line_no, format!("duplicate block label '%{}'", label)));
        }
        self.blocks.push(BasicBlock {
            label: label.to_string(),
            insts: Vec::new(),
        });
        Ok(())
    }

    /// Every block must close on a terminator before the next one opens.
    fn finish_block(&mut self, line_no: usize) -> Result<(), Diagnostic> {
        if let Some(block) = self.blocks.last() {
            match block.insts.last() {
                Some(inst) if inst.is_terminator() => {}
                _ => {
                    return Err(err(
                        line_no,
                        format!("block '%{}' does not end with a terminator", block.label),
                    ))
                }
            }
        }
        Ok(())
    }

    fn into_function(self, line_no: usize) -> Result<Function, Diagnostic> {
        if self.blocks.is_empty() {
            return Err(err(line_no, format!("function '@{}' has no blocks", self.name)));
        }
        // Branch targets must name blocks of this function.
        let labels: std::collections::HashSet<&str> =
            self.blocks.iter().map(|b| b.label.as_str()).collect();
        for block in &self.blocks {
            for inst in &block.insts {
                let targets: Vec<&String> = match &inst.kind {
                    InstKind::Branch {
                        then_label,
                        else_label,
                        ..
                    } => vec![then_label, else_label],
                    InstKind::Jump { label } => vec![label],
                    _ => Vec::new(),
                };
                for target in targets {
                    if !labels.contains(target.as_str()) {
                        return Err(err(
                            line_no,
                            format!("branch to unknown label '%{}'", target),
                        ));
                    }
                }
            }
        }
        Ok(Function {
            name: self.name,
            params: self.params,
            returns_value: self.returns_value,
            blocks: self.blocks,
        })
    }

    fn parse_inst(
        &mut self,
        line: &str,
        globals: &HashMap<String, Ty>,
        line_no: usize,
    ) -> Result<Inst, Diagnostic> {
        if let Some((lhs, rhs)) = line.split_once(" = ") {
            let lhs = lhs.trim();
            let rhs = rhs.trim();
            if let Some(cell) = lhs.strip_prefix('@') {
                // `@sym = alloc TYPE`
                let ty_text = rhs
                    .strip_prefix("alloc ")
                    .ok_or_else(|| err(line_no, format!("expected alloc after '{}'", lhs)))?;
                let ty = parse_ty(ty_text, line_no)?;
                if self.locals.contains_key(cell) {
                    return Err(err(line_no, format!("duplicate cell '@{}'", cell)));
                }
                let id = self.fresh_id();
                self.locals.insert(cell.to_string(), id);
                self.types.insert(id, ty.clone());
                return Ok(Inst {
                    id,
                    kind: InstKind::Alloc {
                        symbol: cell.to_string(),
                        ty,
                    },
                });
            }
            if !lhs.starts_with('%') {
                return Err(err(line_no, format!("bad instruction result '{}'", lhs)));
            }

            let kind = if let Some(addr_text) = rhs.strip_prefix("load ") {
                let addr = self.operand(addr_text, globals, line_no)?;
                self.check_scalar_cell(&addr, globals, "load", line_no)?;
                InstKind::Load { addr }
            } else if let Some(args) = rhs.strip_prefix("getelemptr ") {
                let (base_text, index_text) = split_two(args, line_no)?;
                let base = self.operand(&base_text, globals, line_no)?;
                let index = self.operand(&index_text, globals, line_no)?;
                let elem_ty = match self.pointee(&base, globals) {
                    Some(Ty::Array(elem, _)) => *elem,
                    Some(Ty::I32) => {
                        return Err(err(line_no, "getelemptr into a scalar cell".into()))
                    }
                    None => {
                        return Err(err(
                            line_no,
                            format!("getelemptr base '{}' is not an address", base_text),
                        ))
                    }
                };
                InstKind::GetElemPtr {
                    base,
                    index,
                    elem_ty,
                }
            } else if rhs.starts_with("call @") {
                let (callee, args) = self.parse_call(rhs, globals, line_no)?;
                InstKind::Call {
                    callee,
                    args,
                    produces: true,
                }
            } else if let Some((mnemonic, operands)) = rhs.split_once(' ') {
                let op = BinOp::from_mnemonic(mnemonic)
                    .ok_or_else(|| err(line_no, format!("unknown operation '{}'", mnemonic)))?;
                let (lhs_text, rhs_text) = split_two(operands, line_no)?;
                InstKind::Binary {
                    op,
                    lhs: self.operand(&lhs_text, globals, line_no)?,
                    rhs: self.operand(&rhs_text, globals, line_no)?,
                }
            } else {
                return Err(err(line_no, format!("unparseable instruction '{}'", rhs)));
            };

            let id = self.fresh_id();
            if let InstKind::GetElemPtr { elem_ty, .. } = &kind {
                self.types.insert(id, elem_ty.clone());
            }
            self.values.insert(lhs.to_string(), id);
            return Ok(Inst { id, kind });
        }

        // Effect instructions.
        let kind = if let Some(operands) = line.strip_prefix("store ") {
            let (value_text, addr_text) = split_two(operands, line_no)?;
            let value = self.operand(&value_text, globals, line_no)?;
            let addr = self.operand(&addr_text, globals, line_no)?;
            self.check_scalar_cell(&addr, globals, "store", line_no)?;
            InstKind::Store { value, addr }
        } else if let Some(operands) = line.strip_prefix("br ") {
            let parts: Vec<&str> = operands.split(',').map(str::trim).collect();
            if parts.len() != 3 {
                return Err(err(line_no, "br takes a condition and two labels".into()));
            }
            InstKind::Branch {
                cond: self.operand(parts[0], globals, line_no)?,
                then_label: parse_label(parts[1], line_no)?,
                else_label: parse_label(parts[2], line_no)?,
            }
        } else if let Some(label) = line.strip_prefix("jump ") {
            InstKind::Jump {
                label: parse_label(label.trim(), line_no)?,
            }
        } else if line == "ret" {
            InstKind::Return { value: None }
        } else if let Some(value_text) = line.strip_prefix("ret ") {
            InstKind::Return {
                value: Some(self.operand(value_text, globals, line_no)?),
            }
        } else if line.starts_with("call @") {
            let (callee, args) = self.parse_call(line, globals, line_no)?;
            InstKind::Call {
                callee,
                args,
                produces: false,
            }
        } else {
            return Err(err(line_no, format!("unparseable instruction '{}'", line)));
        };

        Ok(Inst {
            id: self.fresh_id(),
            kind,
        })
    }

    /// `call @f(a, b, …)` → callee and argument operands.
    fn parse_call(
        &mut self,
        text: &str,
        globals: &HashMap<String, Ty>,
        line_no: usize,
    ) -> Result<(String, Vec<Operand>), Diagnostic> {
        let rest = text.strip_prefix("call @").expect("checked by caller");
        let (callee, tail) = rest
            .split_once('(')
            .ok_or_else(|| err(line_no, "call is missing '('".into()))?;
        let arg_text = tail
            .strip_suffix(')')
            .ok_or_else(|| err(line_no, "call is missing ')'".into()))?;
        let mut args = Vec::new();
        for part in arg_text.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            args.push(self.operand(part, globals, line_no)?);
        }
        Ok((callee.trim().to_string(), args))
    }

    fn operand(
        &self,
        text: &str,
        globals: &HashMap<String, Ty>,
        line_no: usize,
    ) -> Result<Operand, Diagnostic> {
        let text = text.trim();
        if text.starts_with('%') {
            return self
                .values
                .get(text)
                .map(|id| Operand::Value(*id))
                .ok_or_else(|| err(line_no, format!("unknown value '{}'", text)));
        }
        if let Some(sym) = text.strip_prefix('@') {
            if let Some(id) = self.locals.get(sym) {
                return Ok(Operand::Value(*id));
            }
            if let Some(pos) = self.params.iter().position(|p| p == sym) {
                return Ok(Operand::Arg(pos as u32));
            }
            if globals.contains_key(sym) {
                return Ok(Operand::Global(sym.to_string()));
            }
            return Err(err(line_no, format!("unknown symbol '@{}'", sym)));
        }
        Ok(Operand::Const(parse_int(text, line_no)?))
    }

    /// Pointee type of an address operand, when it is one.
    fn pointee(&self, operand: &Operand, globals: &HashMap<String, Ty>) -> Option<Ty> {
        match operand {
            Operand::Value(id) => self.types.get(id).cloned(),
            Operand::Global(name) => globals.get(name).cloned(),
            Operand::Const(_) | Operand::Arg(_) => None,
        }
    }

    fn check_scalar_cell(
        &self,
        addr: &Operand,
        globals: &HashMap<String, Ty>,
        what: &str,
        line_no: usize,
    ) -> Result<(), Diagnostic> {
        match self.pointee(addr, globals) {
            Some(Ty::I32) => Ok(()),
            Some(Ty::Array(..)) => Err(err(
                line_no,
                format!("{} of a whole aggregate is not supported", what),
            )),
            None => Err(err(line_no, format!("{} target is not an address", what))),
        }
    }
}

// ─── Token helpers ────────────────────────────────────────────────

fn split_two(text: &str, line_no: usize) -> Result<(String, String), Diagnostic> {
    // The first operand never contains a comma; types never appear here.
    let (a, b) = text
        .split_once(',')
        .ok_or_else(|| err(line_no, format!("expected two operands in '{}'", text)))?;
    Ok((a.trim().to_string(), b.trim().to_string()))
}

fn parse_label(text: &str, line_no: usize) -> Result<String, Diagnostic> {
    text.strip_prefix('%')
        .map(str::to_string)
        .ok_or_else(|| err(line_no, format!("expected a %label, found '{}'", text)))
}

fn parse_int(text: &str, line_no: usize) -> Result<i32, Diagnostic> {
    text.parse::<i32>()
        .map_err(|_| err(line_no, format!("expected an integer, found '{}'", text)))
}

fn parse_ty(text: &str, line_no: usize) -> Result<Ty, Diagnostic> {
    let text = text.trim();
    if text == "i32" {
        return Ok(Ty::I32);
    }
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| err(line_no, format!("unknown type '{}'", text)))?;
    // The length is the last comma-separated field; the element type may
    // itself contain commas.
    let (elem_text, len_text) = inner
        .rsplit_once(',')
        .ok_or_else(|| err(line_no, format!("unknown type '{}'", text)))?;
    let len = len_text
        .trim()
        .parse::<u32>()
        .map_err(|_| err(line_no, format!("bad array length in '{}'", text)))?;
    Ok(Ty::Array(Box::new(parse_ty(elem_text, line_no)?), len))
}
