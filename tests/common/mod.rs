//! Shared test support: syntax-tree builders (standing in for the host
//! parser), an interpreter for the structural IR, and a small RV32
//! simulator that executes the emitted assembly subset.

#![allow(dead_code)]

use std::collections::HashMap;

use rill::ast::*;
use rill::ir::{self, InstId, InstKind, Operand, Program, Ty};
use rill::span::Spanned;

// ─── Syntax-tree builders ─────────────────────────────────────────

pub fn sp<T>(node: T) -> Spanned<T> {
    Spanned::dummy(node)
}

pub fn lit(v: i32) -> Spanned<Expr> {
    sp(Expr::Literal(v))
}

pub fn var(name: &str) -> Spanned<Expr> {
    sp(Expr::LVal(LVal::name(sp(name.to_string()))))
}

pub fn at(name: &str, indices: Vec<Spanned<Expr>>) -> Spanned<Expr> {
    sp(Expr::LVal(LVal {
        name: sp(name.to_string()),
        indices,
    }))
}

pub fn bin(op: BinOp, lhs: Spanned<Expr>, rhs: Spanned<Expr>) -> Spanned<Expr> {
    sp(Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

pub fn un(op: UnaryOp, operand: Spanned<Expr>) -> Spanned<Expr> {
    sp(Expr::Unary {
        op,
        operand: Box::new(operand),
    })
}

pub fn call(name: &str, args: Vec<Spanned<Expr>>) -> Spanned<Expr> {
    sp(Expr::Call {
        callee: sp(name.to_string()),
        args,
    })
}

pub fn decl_var(name: &str, init: Option<Spanned<Expr>>) -> Spanned<Stmt> {
    sp(Stmt::Decl(Decl::Var(VarDef {
        name: sp(name.to_string()),
        dims: vec![],
        init,
    })))
}

pub fn decl_array(name: &str, dims: Vec<i32>) -> Spanned<Stmt> {
    sp(Stmt::Decl(Decl::Var(VarDef {
        name: sp(name.to_string()),
        dims: dims.into_iter().map(lit).collect(),
        init: None,
    })))
}

pub fn decl_const(name: &str, value: Spanned<Expr>) -> Spanned<Stmt> {
    sp(Stmt::Decl(Decl::Const(ConstDef {
        name: sp(name.to_string()),
        value,
    })))
}

pub fn assign(name: &str, value: Spanned<Expr>) -> Spanned<Stmt> {
    sp(Stmt::Assign {
        target: sp(LVal::name(sp(name.to_string()))),
        value,
    })
}

pub fn assign_at(name: &str, indices: Vec<Spanned<Expr>>, value: Spanned<Expr>) -> Spanned<Stmt> {
    sp(Stmt::Assign {
        target: sp(LVal {
            name: sp(name.to_string()),
            indices,
        }),
        value,
    })
}

pub fn expr_stmt(expr: Spanned<Expr>) -> Spanned<Stmt> {
    sp(Stmt::Expr(Some(expr)))
}

pub fn ret(value: Option<Spanned<Expr>>) -> Spanned<Stmt> {
    sp(Stmt::Return(value))
}

pub fn block(stmts: Vec<Spanned<Stmt>>) -> Spanned<Stmt> {
    sp(Stmt::Block(sp(Block { stmts })))
}

pub fn if_then(cond: Spanned<Expr>, then_branch: Spanned<Stmt>) -> Spanned<Stmt> {
    sp(Stmt::If {
        cond,
        then_branch: Box::new(then_branch),
        else_branch: None,
    })
}

pub fn if_else(
    cond: Spanned<Expr>,
    then_branch: Spanned<Stmt>,
    else_branch: Spanned<Stmt>,
) -> Spanned<Stmt> {
    sp(Stmt::If {
        cond,
        then_branch: Box::new(then_branch),
        else_branch: Some(Box::new(else_branch)),
    })
}

pub fn while_loop(cond: Spanned<Expr>, body: Spanned<Stmt>) -> Spanned<Stmt> {
    sp(Stmt::While {
        cond,
        body: Box::new(body),
    })
}

pub fn fn_def(name: &str, params: &[&str], returns_value: bool, stmts: Vec<Spanned<Stmt>>) -> Spanned<Item> {
    sp(Item::Fn(FnDef {
        name: sp(name.to_string()),
        params: params
            .iter()
            .map(|p| Param {
                name: sp(p.to_string()),
            })
            .collect(),
        returns_value,
        body: sp(Block { stmts }),
    }))
}

pub fn global_var(name: &str, init: Option<Spanned<Expr>>) -> Spanned<Item> {
    sp(Item::Var(VarDef {
        name: sp(name.to_string()),
        dims: vec![],
        init,
    }))
}

pub fn unit(items: Vec<Spanned<Item>>) -> Unit {
    Unit { items }
}

pub fn main_unit(stmts: Vec<Spanned<Stmt>>) -> Unit {
    unit(vec![fn_def("main", &[], true, stmts)])
}

// ─── Structural-IR interpreter ────────────────────────────────────

/// Execute `@main` of a structural program and return its result.
///
/// Division follows the target's rules: quotient -1 and remainder equal to
/// the dividend when the divisor is zero, so eager logical operands behave
/// exactly as the generated machine code would.
pub fn run_ir(program: &Program) -> i32 {
    let mut interp = IrInterp {
        program,
        mem: Vec::new(),
        globals: HashMap::new(),
    };
    for global in &program.globals {
        let base = interp.mem.len();
        let units = global.ty.units() as usize;
        interp.mem.resize(base + units, 0);
        if global.ty == Ty::I32 {
            interp.mem[base] = global.init;
        }
        interp.globals.insert(global.name.clone(), base);
    }
    interp
        .call("main", &[])
        .expect("main must produce a value")
}

struct IrInterp<'a> {
    program: &'a Program,
    /// Word-addressed storage shared by globals and every frame.
    mem: Vec<i32>,
    globals: HashMap<String, usize>,
}

impl<'a> IrInterp<'a> {
    fn call(&mut self, name: &str, args: &[i32]) -> Option<i32> {
        let func = self
            .program
            .functions
            .iter()
            .find(|f| f.name == name)
            .unwrap_or_else(|| panic!("call to unknown function @{}", name));

        let labels: HashMap<&str, usize> = func
            .blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.label.as_str(), i))
            .collect();

        let mut values: HashMap<InstId, i32> = HashMap::new();
        let mut block = 0usize;

        'blocks: loop {
            for inst in &func.blocks[block].insts {
                match &inst.kind {
                    InstKind::Alloc { ty, .. } => {
                        let base = self.mem.len();
                        self.mem.resize(base + ty.units() as usize, 0);
                        values.insert(inst.id, base as i32);
                    }
                    InstKind::Load { addr } => {
                        let a = self.addr_of(addr, &values);
                        values.insert(inst.id, self.mem[a]);
                    }
                    InstKind::Store { value, addr } => {
                        let v = self.value_of(value, &values, args);
                        let a = self.addr_of(addr, &values);
                        self.mem[a] = v;
                    }
                    InstKind::Binary { op, lhs, rhs } => {
                        let l = self.value_of(lhs, &values, args);
                        let r = self.value_of(rhs, &values, args);
                        values.insert(inst.id, apply_binop(*op, l, r));
                    }
                    InstKind::GetElemPtr {
                        base,
                        index,
                        elem_ty,
                    } => {
                        let b = self.addr_of(base, &values) as i32;
                        let i = self.value_of(index, &values, args);
                        values.insert(inst.id, b + i * elem_ty.units() as i32);
                    }
                    InstKind::Branch {
                        cond,
                        then_label,
                        else_label,
                    } => {
                        let c = self.value_of(cond, &values, args);
                        let target = if c != 0 { then_label } else { else_label };
                        block = labels[target.as_str()];
                        continue 'blocks;
                    }
                    InstKind::Jump { label } => {
                        block = labels[label.as_str()];
                        continue 'blocks;
                    }
                    InstKind::Return { value } => {
                        return value.as_ref().map(|v| self.value_of(v, &values, args));
                    }
                    InstKind::Call {
                        callee,
                        args: call_args,
                        produces,
                    } => {
                        let evaluated: Vec<i32> = call_args
                            .iter()
                            .map(|a| self.value_of(a, &values, args))
                            .collect();
                        let result = self.call(callee, &evaluated);
                        if *produces {
                            values.insert(inst.id, result.expect("value-producing call"));
                        }
                    }
                }
            }
            panic!("block %{} fell through without a terminator", func.blocks[block].label);
        }
    }

    fn value_of(&self, operand: &Operand, values: &HashMap<InstId, i32>, args: &[i32]) -> i32 {
        match operand {
            Operand::Const(v) => *v,
            Operand::Value(id) => values[id],
            Operand::Arg(i) => args[*i as usize],
            Operand::Global(name) => panic!("global @{} used as a scalar", name),
        }
    }

    fn addr_of(&self, operand: &Operand, values: &HashMap<InstId, i32>) -> usize {
        match operand {
            Operand::Value(id) => values[id] as usize,
            Operand::Global(name) => self.globals[name],
            other => panic!("{:?} is not an address", other),
        }
    }
}

fn apply_binop(op: ir::BinOp, l: i32, r: i32) -> i32 {
    use ir::BinOp;
    match op {
        BinOp::Add => l.wrapping_add(r),
        BinOp::Sub => l.wrapping_sub(r),
        BinOp::Mul => l.wrapping_mul(r),
        BinOp::Div => {
            if r == 0 {
                -1
            } else {
                l.wrapping_div(r)
            }
        }
        BinOp::Mod => {
            if r == 0 {
                l
            } else {
                l.wrapping_rem(r)
            }
        }
        BinOp::Lt => (l < r) as i32,
        BinOp::Gt => (l > r) as i32,
        BinOp::Le => (l <= r) as i32,
        BinOp::Ge => (l >= r) as i32,
        BinOp::Eq => (l == r) as i32,
        BinOp::Ne => (l != r) as i32,
        BinOp::And => l & r,
        BinOp::Or => l | r,
    }
}

// ─── RV32 simulator ───────────────────────────────────────────────

const DATA_BASE: i32 = 0x10000;
const STACK_BASE: i32 = 1 << 20;
const STEP_LIMIT: usize = 2_000_000;

/// Execute the emitted assembly subset starting at `main`; returns `a0`.
pub fn run_asm(asm: &str) -> i32 {
    Machine::load(asm).run()
}

struct Machine {
    /// (mnemonic, operands) in program order.
    text: Vec<(String, Vec<String>)>,
    text_labels: HashMap<String, usize>,
    data_labels: HashMap<String, i32>,
    mem: HashMap<i32, i32>,
    regs: HashMap<String, i32>,
}

impl Machine {
    fn load(asm: &str) -> Self {
        let mut machine = Machine {
            text: Vec::new(),
            text_labels: HashMap::new(),
            data_labels: HashMap::new(),
            mem: HashMap::new(),
            regs: HashMap::new(),
        };

        let mut in_data = false;
        let mut data_cursor = DATA_BASE;

        for raw in asm.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(label) = line.strip_suffix(':') {
                if in_data {
                    machine.data_labels.insert(label.to_string(), data_cursor);
                } else {
                    machine
                        .text_labels
                        .insert(label.to_string(), machine.text.len());
                }
                continue;
            }
            match line {
                ".data" => {
                    in_data = true;
                    continue;
                }
                ".text" => {
                    in_data = false;
                    continue;
                }
                _ => {}
            }
            if let Some(value) = line.strip_prefix(".word ") {
                let v: i32 = value.trim().parse().expect("bad .word");
                machine.mem.insert(data_cursor, v);
                data_cursor += 4;
                continue;
            }
            if let Some(size) = line.strip_prefix(".zero ") {
                let bytes: i32 = size.trim().parse().expect("bad .zero");
                data_cursor += bytes;
                continue;
            }
            if line.starts_with(".globl") {
                continue;
            }

            let (mnemonic, rest) = line.split_once(' ').unwrap_or((line, ""));
            let operands: Vec<String> = rest
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            machine.text.push((mnemonic.to_string(), operands));
        }

        machine
    }

    fn reg(&self, name: &str) -> i32 {
        if name == "x0" {
            return 0;
        }
        *self.regs.get(name).unwrap_or(&0)
    }

    fn set_reg(&mut self, name: &str, value: i32) {
        if name != "x0" {
            self.regs.insert(name.to_string(), value);
        }
    }

    /// Parse `off(reg)` into an absolute address.
    fn mem_addr(&self, operand: &str) -> i32 {
        let (off, reg) = operand
            .split_once('(')
            .expect("memory operand must be off(reg)");
        let reg = reg.strip_suffix(')').expect("memory operand must close");
        let offset: i32 = off.trim().parse().expect("bad memory offset");
        self.reg(reg.trim()).wrapping_add(offset)
    }

    fn run(&mut self) -> i32 {
        // `ra` is modeled for real: `call` writes it, `ret` jumps through
        // it, so generated code that fails to save it around nested calls
        // fails here the way it would on hardware.
        const RETURN_SENTINEL: i32 = -1;
        self.set_reg("sp", STACK_BASE);
        self.set_reg("ra", RETURN_SENTINEL);
        let mut pc = *self
            .text_labels
            .get("main")
            .expect("assembly must define main");

        for _ in 0..STEP_LIMIT {
            let (mnemonic, ops) = self.text[pc].clone();
            pc += 1;
            match mnemonic.as_str() {
                "li" => {
                    let v: i32 = ops[1].parse().expect("bad li immediate");
                    self.set_reg(&ops[0], v);
                }
                "la" => {
                    let addr = *self
                        .data_labels
                        .get(&ops[1])
                        .unwrap_or_else(|| panic!("unknown data symbol {}", ops[1]));
                    self.set_reg(&ops[0], addr);
                }
                "mv" => {
                    let v = self.reg(&ops[1]);
                    self.set_reg(&ops[0], v);
                }
                "add" | "sub" | "mul" | "div" | "rem" | "and" | "or" | "xor" | "slt" | "sgt" => {
                    let a = self.reg(&ops[1]);
                    let b = self.reg(&ops[2]);
                    let v = match mnemonic.as_str() {
                        "add" => a.wrapping_add(b),
                        "sub" => a.wrapping_sub(b),
                        "mul" => a.wrapping_mul(b),
                        // Division by zero does not trap on the target.
                        "div" => {
                            if b == 0 {
                                -1
                            } else {
                                a.wrapping_div(b)
                            }
                        }
                        "rem" => {
                            if b == 0 {
                                a
                            } else {
                                a.wrapping_rem(b)
                            }
                        }
                        "and" => a & b,
                        "or" => a | b,
                        "xor" => a ^ b,
                        "slt" => (a < b) as i32,
                        "sgt" => (a > b) as i32,
                        _ => unreachable!(),
                    };
                    self.set_reg(&ops[0], v);
                }
                "addi" | "xori" => {
                    let a = self.reg(&ops[1]);
                    let imm: i32 = ops[2].parse().expect("bad immediate");
                    let v = match mnemonic.as_str() {
                        "addi" => a.wrapping_add(imm),
                        "xori" => a ^ imm,
                        _ => unreachable!(),
                    };
                    self.set_reg(&ops[0], v);
                }
                "seqz" => {
                    let v = (self.reg(&ops[1]) == 0) as i32;
                    self.set_reg(&ops[0], v);
                }
                "snez" => {
                    let v = (self.reg(&ops[1]) != 0) as i32;
                    self.set_reg(&ops[0], v);
                }
                "lw" => {
                    let addr = self.mem_addr(&ops[1]);
                    let v = *self.mem.get(&addr).unwrap_or(&0);
                    self.set_reg(&ops[0], v);
                }
                "sw" => {
                    let addr = self.mem_addr(&ops[1]);
                    let v = self.reg(&ops[0]);
                    self.mem.insert(addr, v);
                }
                "j" => {
                    pc = self.text_labels[&ops[0]];
                }
                "bnez" => {
                    if self.reg(&ops[0]) != 0 {
                        pc = self.text_labels[&ops[1]];
                    }
                }
                "call" => {
                    self.set_reg("ra", pc as i32);
                    pc = *self
                        .text_labels
                        .get(&ops[0])
                        .unwrap_or_else(|| panic!("call to unknown symbol {}", ops[0]));
                }
                "ret" => {
                    let back = self.reg("ra");
                    if back == RETURN_SENTINEL {
                        return self.reg("a0");
                    }
                    pc = back as usize;
                }
                other => panic!("simulator does not know '{}'", other),
            }
        }
        panic!("step limit exceeded — runaway loop in generated code");
    }
}
