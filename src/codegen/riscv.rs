//! RV32 lowering of one function: register allocation, frame layout, and
//! instruction emission in a single pass over the structural IR.
//!
//! Allocation has no liveness analysis. A value's register stays claimed
//! until something evicts it; eviction spills to a lazily assigned frame
//! slot and later uses reload. Binary operations pin the left operand while
//! the right is brought in, then keep the right pinned while the result
//! register is chosen, exactly mirroring the eviction-order guarantees the
//! tests assert.
//!
//! The frame is sized up front: one word per value-producing instruction,
//! whole extents for allocs, a return-address slot when the function makes
//! calls, and the outgoing-argument overflow area, rounded to the alignment
//! unit. The slot cursor hands out offsets bottom-up and resets with every
//! function — no state crosses function boundaries.

use std::collections::HashMap;

use crate::ir::{BinOp, Function, Inst, InstId, InstKind, Operand, Ty};
use crate::span::Span;
use crate::target::TargetConfig;
use crate::Diagnostic;

use super::regfile::{Acquire, RegFile, RegStatus};

/// Where a temporary currently lives. `reg` is authoritative while set; a
/// value that has ever spilled keeps its `slot` so reloads and re-spills
/// reuse one home.
#[derive(Clone, Copy, Debug, Default)]
struct ValueLoc {
    reg: Option<usize>,
    slot: Option<i32>,
}

/// A source operand register: an allocatable slot or the zero register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Src {
    Reg(usize),
    Zero,
}

pub(crate) struct FuncLowering<'a> {
    cfg: &'a TargetConfig,
    func: &'a Function,
    out: Vec<String>,
    regs: RegFile,
    /// Temporaries (loads, binaries, geps, call results).
    temps: HashMap<InstId, ValueLoc>,
    /// Allocs: frame offset of the reserved cell.
    cells: HashMap<InstId, i32>,
    frame_size: i32,
    /// Next unassigned frame offset (starts above the outgoing-arg area).
    stack_top: i32,
    saves_ra: bool,
}

impl<'a> FuncLowering<'a> {
    pub fn new(cfg: &'a TargetConfig, func: &'a Function) -> Self {
        let word = cfg.word_size as i32;

        let mut value_words: i32 = 0;
        let mut saves_ra = false;
        let mut overflow_words: i32 = 0;
        for block in &func.blocks {
            for inst in &block.insts {
                if let InstKind::Alloc { ty, .. } = &inst.kind {
                    value_words += ty.units() as i32;
                } else if inst.produces_value() {
                    value_words += 1;
                }
                if let InstKind::Call { args, .. } = &inst.kind {
                    saves_ra = true;
                    let spilled_args = args.len() as i32 - cfg.arg_regs.len() as i32;
                    overflow_words = overflow_words.max(spilled_args.max(0));
                }
            }
        }

        let ra_words = if saves_ra { 1 } else { 0 };
        let raw = (overflow_words + value_words + ra_words) * word;
        let align = cfg.frame_align as i32;
        let frame_size = (raw + align - 1) / align * align;

        Self {
            cfg,
            func,
            out: Vec::new(),
            regs: RegFile::new(cfg.allocatable.len()),
            temps: HashMap::new(),
            cells: HashMap::new(),
            frame_size,
            stack_top: overflow_words * word,
            saves_ra,
        }
    }

    pub fn lower(mut self) -> Result<Vec<String>, Diagnostic> {
        self.out.push("    .text".to_string());
        self.out.push(format!("    .globl {}", self.func.name));
        self.out.push(format!("{}:", self.func.name));

        // Prologue: one stack-pointer adjustment before any block.
        if self.frame_size > 0 {
            if self.cfg.fits_imm(-self.frame_size) {
                self.asm(format!("addi sp, sp, -{}", self.frame_size));
            } else {
                let scratch = self.cfg.scratch.clone();
                self.asm(format!("li {}, {}", scratch, self.frame_size));
                self.asm(format!("sub sp, sp, {}", scratch));
            }
        }
        if self.saves_ra {
            let offset = self.frame_size - self.cfg.word_size as i32;
            self.mem_access("sw", "ra", offset);
        }

        let func = self.func;
        for block in &func.blocks {
            let label = self.block_label(&block.label);
            self.out.push(format!("{}:", label));
            for inst in &block.insts {
                self.lower_inst(inst)?;
            }
        }

        Ok(self.out)
    }

    // ── Output helpers ────────────────────────────────────────────

    fn asm(&mut self, text: String) {
        self.out.push(format!("    {}", text));
    }

    /// Block labels are assembler-local and function-qualified, so two
    /// functions can both have an `entry` block.
    fn block_label(&self, label: &str) -> String {
        format!(".L{}_{}", self.func.name, label)
    }

    fn reg_name(&self, index: usize) -> &str {
        &self.cfg.allocatable[index]
    }

    fn src_name(&self, src: Src) -> &str {
        match src {
            Src::Reg(i) => self.reg_name(i),
            Src::Zero => &self.cfg.zero,
        }
    }

    /// Load or store `reg` at `sp + offset`, going through the scratch
    /// register when the offset leaves the immediate window.
    fn mem_access(&mut self, op: &str, reg: &str, offset: i32) {
        if self.cfg.fits_imm(offset) {
            self.asm(format!("{} {}, {}(sp)", op, reg, offset));
        } else {
            let scratch = self.cfg.scratch.clone();
            self.asm(format!("li {}, {}", scratch, offset));
            self.asm(format!("add {}, {}, sp", scratch, scratch));
            self.asm(format!("{} {}, 0({})", op, reg, scratch));
        }
    }

    // ── Frame slots ───────────────────────────────────────────────

    fn alloc_slot(&mut self, bytes: i32) -> i32 {
        let offset = self.stack_top;
        self.stack_top += bytes;
        debug_assert!(
            self.stack_top <= self.frame_size,
            "slot cursor ran past the reserved frame"
        );
        offset
    }

    // ── Register acquisition ──────────────────────────────────────

    fn acquire(&mut self, holder: Option<InstId>, status: RegStatus) -> Result<usize, Diagnostic> {
        match self.regs.pick() {
            Some(Acquire::Free(index)) => {
                self.regs.claim(index, holder, status);
                Ok(index)
            }
            Some(Acquire::Evict { index, victim }) => {
                self.spill(index, victim);
                self.regs.claim(index, holder, status);
                Ok(index)
            }
            None => Err(Diagnostic::error(
                "register allocation exhausted: every register is pinned".to_string(),
                Span::dummy(),
            )
            .with_note("this is an allocator invariant violation, not a program error".to_string())),
        }
    }

    /// Move `victim` out of `index` into its frame slot (assigned lazily on
    /// first spill) and free the register.
    fn spill(&mut self, index: usize, victim: InstId) {
        let word = self.cfg.word_size as i32;
        let slot = match self.temps.get(&victim).and_then(|loc| loc.slot) {
            Some(slot) => slot,
            None => self.alloc_slot(word),
        };
        let loc = self.temps.entry(victim).or_default();
        loc.slot = Some(slot);
        loc.reg = None;
        let reg = self.reg_name(index).to_string();
        self.mem_access("sw", &reg, slot);
        self.regs.claim(index, None, RegStatus::Free);
    }

    /// Register currently holding `id`, reloading from its spill slot when
    /// evicted earlier. The slot assignment survives the reload.
    fn ensure_reg(&mut self, id: InstId) -> Result<usize, Diagnostic> {
        let loc = self.temps.get(&id).copied().unwrap_or_default();
        if let Some(reg) = loc.reg {
            return Ok(reg);
        }
        let slot = loc.slot.ok_or_else(|| {
            Diagnostic::error(
                "codegen invariant violated: value has no register and no spill slot".to_string(),
                Span::dummy(),
            )
        })?;
        let reg = self.acquire(Some(id), RegStatus::Live)?;
        let name = self.reg_name(reg).to_string();
        self.mem_access("lw", &name, slot);
        self.temps.get_mut(&id).expect("checked above").reg = Some(reg);
        Ok(reg)
    }

    /// Materialize an operand into a readable register. Constants other
    /// than zero land in a free-status register: nothing will read it after
    /// the consuming instruction, so it is immediately reusable.
    fn operand_src(&mut self, operand: &Operand) -> Result<Src, Diagnostic> {
        match operand {
            Operand::Const(0) => Ok(Src::Zero),
            Operand::Const(v) => {
                let reg = self.acquire(None, RegStatus::Free)?;
                let name = self.reg_name(reg).to_string();
                self.asm(format!("li {}, {}", name, v));
                Ok(Src::Reg(reg))
            }
            Operand::Value(id) => {
                if self.cells.contains_key(id) {
                    return Err(Diagnostic::error(
                        "codegen invariant violated: cell address used as a scalar".to_string(),
                        Span::dummy(),
                    ));
                }
                Ok(Src::Reg(self.ensure_reg(*id)?))
            }
            Operand::Arg(i) => {
                let i = *i as usize;
                if i < self.cfg.arg_regs.len() {
                    let name = self.cfg.arg_regs[i].clone();
                    let index = self.cfg.reg_index(&name).expect("arg regs are allocatable");
                    Ok(Src::Reg(index))
                } else {
                    // Overflow parameters sit above the caller's frame.
                    let word = self.cfg.word_size as i32;
                    let offset =
                        self.frame_size + (i - self.cfg.arg_regs.len()) as i32 * word;
                    let reg = self.acquire(None, RegStatus::Free)?;
                    let name = self.reg_name(reg).to_string();
                    self.mem_access("lw", &name, offset);
                    Ok(Src::Reg(reg))
                }
            }
            Operand::Global(_) => Err(Diagnostic::error(
                "codegen invariant violated: global address used as a scalar".to_string(),
                Span::dummy(),
            )),
        }
    }

    /// Pin a register for the duration of an in-flight operand, returning
    /// the status to restore. The zero register needs no protection.
    fn pin(&mut self, src: Src) -> RegStatus {
        match src {
            Src::Reg(i) => {
                let old = self.regs.status(i);
                self.regs.set_status(i, RegStatus::Pinned);
                old
            }
            Src::Zero => RegStatus::Free,
        }
    }

    fn unpin(&mut self, src: Src, old: RegStatus) {
        if let Src::Reg(i) = src {
            self.regs.set_status(i, old);
        }
    }

    // ── Instruction lowering ──────────────────────────────────────

    fn lower_inst(&mut self, inst: &Inst) -> Result<(), Diagnostic> {
        match &inst.kind {
            InstKind::Alloc { ty, .. } => {
                let word = self.cfg.word_size as i32;
                let offset = self.alloc_slot(ty.units() as i32 * word);
                self.cells.insert(inst.id, offset);
            }

            InstKind::Load { addr } => self.lower_load(inst.id, addr)?,

            InstKind::Store { value, addr } => self.lower_store(value, addr)?,

            InstKind::Binary { op, lhs, rhs } => self.lower_binary(inst.id, *op, lhs, rhs)?,

            InstKind::GetElemPtr {
                base,
                index,
                elem_ty,
            } => self.lower_getelemptr(inst.id, base, index, elem_ty)?,

            InstKind::Branch {
                cond,
                then_label,
                else_label,
            } => {
                let c = self.operand_src(cond)?;
                let cname = self.src_name(c).to_string();
                let then_l = self.block_label(then_label);
                let else_l = self.block_label(else_label);
                self.asm(format!("bnez {}, {}", cname, then_l));
                self.asm(format!("j {}", else_l));
            }

            InstKind::Jump { label } => {
                let l = self.block_label(label);
                self.asm(format!("j {}", l));
            }

            InstKind::Return { value } => {
                if let Some(operand) = value {
                    let src = self.operand_src(operand)?;
                    let result_reg = self.cfg.arg_regs[0].clone();
                    let name = self.src_name(src).to_string();
                    if name != result_reg {
                        self.asm(format!("mv {}, {}", result_reg, name));
                    }
                }
                self.emit_epilogue();
            }

            InstKind::Call {
                callee,
                args,
                produces,
            } => self.lower_call(inst.id, callee, args, *produces)?,
        }
        Ok(())
    }

    fn lower_load(&mut self, id: InstId, addr: &Operand) -> Result<(), Diagnostic> {
        match addr {
            Operand::Value(cell) if self.cells.contains_key(cell) => {
                let offset = self.cells[cell];
                let reg = self.acquire(Some(id), RegStatus::Live)?;
                let name = self.reg_name(reg).to_string();
                self.mem_access("lw", &name, offset);
                self.temps.insert(id, ValueLoc { reg: Some(reg), slot: None });
            }
            Operand::Global(symbol) => {
                // Acquire first: eviction may itself need the scratch register.
                let reg = self.acquire(Some(id), RegStatus::Live)?;
                let name = self.reg_name(reg).to_string();
                let scratch = self.cfg.scratch.clone();
                self.asm(format!("la {}, {}", scratch, symbol));
                self.asm(format!("lw {}, 0({})", name, scratch));
                self.temps.insert(id, ValueLoc { reg: Some(reg), slot: None });
            }
            Operand::Value(gep) => {
                let addr_reg = self.ensure_reg(*gep)?;
                let old = self.pin(Src::Reg(addr_reg));
                let reg = self.acquire(Some(id), RegStatus::Live)?;
                self.unpin(Src::Reg(addr_reg), old);
                let name = self.reg_name(reg).to_string();
                let addr_name = self.reg_name(addr_reg).to_string();
                self.asm(format!("lw {}, 0({})", name, addr_name));
                self.temps.insert(id, ValueLoc { reg: Some(reg), slot: None });
            }
            Operand::Const(_) | Operand::Arg(_) => {
                return Err(Diagnostic::error(
                    "codegen invariant violated: load from a non-address".to_string(),
                    Span::dummy(),
                ))
            }
        }
        Ok(())
    }

    fn lower_store(&mut self, value: &Operand, addr: &Operand) -> Result<(), Diagnostic> {
        let src = self.operand_src(value)?;
        // The source stays pinned while the destination address is formed:
        // address materialization may allocate.
        let old = self.pin(src);
        let src_name = self.src_name(src).to_string();

        match addr {
            Operand::Value(cell) if self.cells.contains_key(cell) => {
                let offset = self.cells[cell];
                self.mem_access("sw", &src_name, offset);
            }
            Operand::Global(symbol) => {
                let scratch = self.cfg.scratch.clone();
                self.asm(format!("la {}, {}", scratch, symbol));
                self.asm(format!("sw {}, 0({})", src_name, scratch));
            }
            Operand::Value(gep) => {
                let addr_reg = self.ensure_reg(*gep)?;
                let addr_name = self.reg_name(addr_reg).to_string();
                self.asm(format!("sw {}, 0({})", src_name, addr_name));
            }
            Operand::Const(_) | Operand::Arg(_) => {
                self.unpin(src, old);
                return Err(Diagnostic::error(
                    "codegen invariant violated: store to a non-address".to_string(),
                    Span::dummy(),
                ));
            }
        }

        self.unpin(src, old);
        Ok(())
    }

    fn lower_binary(
        &mut self,
        id: InstId,
        op: BinOp,
        lhs: &Operand,
        rhs: &Operand,
    ) -> Result<(), Diagnostic> {
        let l = self.operand_src(lhs)?;
        // Left pinned while the right operand comes in, released before the
        // result register is chosen; the right stays protected during the
        // choice. The result may therefore reuse the left register — its
        // value is preserved by the eviction spill and the combining
        // instruction reads sources before writing the destination.
        let old_l = self.pin(l);
        let r = self.operand_src(rhs)?;
        self.unpin(l, old_l);
        let old_r = self.pin(r);
        let dst = self.acquire(Some(id), RegStatus::Live)?;
        self.unpin(r, old_r);

        let ln = self.src_name(l).to_string();
        let rn = self.src_name(r).to_string();
        let dn = self.reg_name(dst).to_string();

        match op {
            BinOp::Add => self.asm(format!("add {}, {}, {}", dn, ln, rn)),
            BinOp::Sub => self.asm(format!("sub {}, {}, {}", dn, ln, rn)),
            BinOp::Mul => self.asm(format!("mul {}, {}, {}", dn, ln, rn)),
            BinOp::Div => self.asm(format!("div {}, {}, {}", dn, ln, rn)),
            BinOp::Mod => self.asm(format!("rem {}, {}, {}", dn, ln, rn)),
            BinOp::Lt => self.asm(format!("slt {}, {}, {}", dn, ln, rn)),
            BinOp::Gt => self.asm(format!("sgt {}, {}, {}", dn, ln, rn)),
            BinOp::Le => {
                self.asm(format!("sgt {}, {}, {}", dn, ln, rn));
                self.asm(format!("xori {}, {}, 1", dn, dn));
            }
            BinOp::Ge => {
                self.asm(format!("slt {}, {}, {}", dn, ln, rn));
                self.asm(format!("xori {}, {}, 1", dn, dn));
            }
            BinOp::Eq => {
                self.asm(format!("xor {}, {}, {}", dn, ln, rn));
                self.asm(format!("seqz {}, {}", dn, dn));
            }
            BinOp::Ne => {
                self.asm(format!("xor {}, {}, {}", dn, ln, rn));
                self.asm(format!("snez {}, {}", dn, dn));
            }
            BinOp::And => self.asm(format!("and {}, {}, {}", dn, ln, rn)),
            BinOp::Or => self.asm(format!("or {}, {}, {}", dn, ln, rn)),
        }

        self.temps.insert(id, ValueLoc { reg: Some(dst), slot: None });
        Ok(())
    }

    fn lower_getelemptr(
        &mut self,
        id: InstId,
        base: &Operand,
        index: &Operand,
        elem_ty: &Ty,
    ) -> Result<(), Diagnostic> {
        let stride = elem_ty.units() as i32 * self.cfg.word_size as i32;

        let idx = self.operand_src(index)?;
        let old_idx = self.pin(idx);

        // Nested geps need their base in a register before the result slot
        // is chosen; direct cells and globals are addressed structurally.
        let base_reg = match base {
            Operand::Value(cell) if self.cells.contains_key(cell) => None,
            Operand::Global(_) => None,
            Operand::Value(gep) => {
                let reg = self.ensure_reg(*gep)?;
                Some(reg)
            }
            Operand::Const(_) | Operand::Arg(_) => {
                self.unpin(idx, old_idx);
                return Err(Diagnostic::error(
                    "codegen invariant violated: getelemptr base is not an address".to_string(),
                    Span::dummy(),
                ));
            }
        };
        let old_base = base_reg.map(|reg| self.pin(Src::Reg(reg)));

        let dst = self.acquire(Some(id), RegStatus::Live)?;
        if let (Some(reg), Some(old)) = (base_reg, old_base) {
            self.unpin(Src::Reg(reg), old);
        }
        self.unpin(idx, old_idx);

        let dn = self.reg_name(dst).to_string();
        let idx_name = self.src_name(idx).to_string();
        self.asm(format!("li {}, {}", dn, stride));
        self.asm(format!("mul {}, {}, {}", dn, idx_name, dn));

        match base {
            Operand::Value(cell) if self.cells.contains_key(cell) => {
                let offset = self.cells[cell];
                self.asm(format!("add {}, {}, sp", dn, dn));
                if offset != 0 {
                    if self.cfg.fits_imm(offset) {
                        self.asm(format!("addi {}, {}, {}", dn, dn, offset));
                    } else {
                        let scratch = self.cfg.scratch.clone();
                        self.asm(format!("li {}, {}", scratch, offset));
                        self.asm(format!("add {}, {}, {}", dn, dn, scratch));
                    }
                }
            }
            Operand::Global(symbol) => {
                let scratch = self.cfg.scratch.clone();
                self.asm(format!("la {}, {}", scratch, symbol));
                self.asm(format!("add {}, {}, {}", dn, dn, scratch));
            }
            Operand::Value(_) => {
                let base_name = self.reg_name(base_reg.expect("resolved above")).to_string();
                self.asm(format!("add {}, {}, {}", dn, dn, base_name));
            }
            Operand::Const(_) | Operand::Arg(_) => unreachable!("rejected above"),
        }

        self.temps.insert(id, ValueLoc { reg: Some(dst), slot: None });
        Ok(())
    }

    fn lower_call(
        &mut self,
        id: InstId,
        callee: &str,
        args: &[Operand],
        produces: bool,
    ) -> Result<(), Diagnostic> {
        // Every allocatable register is caller-saved: spill all live values
        // so later uses reload them after the call.
        for (index, victim) in self.regs.live_slots() {
            self.spill(index, victim);
        }
        self.regs.release_all();

        let word = self.cfg.word_size as i32;
        let nreg = self.cfg.arg_regs.len();
        for (i, arg) in args.iter().enumerate() {
            if i < nreg {
                let dst = self.cfg.arg_regs[i].clone();
                self.materialize_arg(arg, &dst)?;
            } else {
                // Overflow arguments go to the outgoing area at the frame
                // bottom. Every register is free at this point; the first
                // allocatable register carries the value, leaving the
                // scratch register to address materialization.
                let carrier = self.cfg.allocatable[0].clone();
                self.materialize_arg(arg, &carrier)?;
                let offset = (i - nreg) as i32 * word;
                self.mem_access("sw", &carrier, offset);
            }
        }

        self.asm(format!("call {}", callee));

        // The callee clobbered every allocatable register.
        self.regs.release_all();
        for loc in self.temps.values_mut() {
            loc.reg = None;
        }

        if produces {
            let result = self.cfg.arg_regs[0].clone();
            let index = self.cfg.reg_index(&result).expect("arg regs are allocatable");
            self.regs.claim(index, Some(id), RegStatus::Live);
            self.temps.insert(
                id,
                ValueLoc {
                    reg: Some(index),
                    slot: None,
                },
            );
        }
        Ok(())
    }

    /// Put `arg` into the named register (an argument register or the
    /// scratch register). Spilled values come from their slots; constants
    /// are immediate.
    fn materialize_arg(&mut self, arg: &Operand, dst: &str) -> Result<(), Diagnostic> {
        match arg {
            Operand::Const(v) => {
                self.asm(format!("li {}, {}", dst, v));
                Ok(())
            }
            Operand::Value(id) => {
                let loc = self.temps.get(id).copied().unwrap_or_default();
                if let Some(slot) = loc.slot {
                    let dst = dst.to_string();
                    self.mem_access("lw", &dst, slot);
                    Ok(())
                } else if let Some(reg) = loc.reg {
                    let name = self.reg_name(reg).to_string();
                    self.asm(format!("mv {}, {}", dst, name));
                    Ok(())
                } else {
                    Err(Diagnostic::error(
                        "codegen invariant violated: call argument has no location".to_string(),
                        Span::dummy(),
                    ))
                }
            }
            Operand::Arg(j) => {
                let j = *j as usize;
                if j < self.cfg.arg_regs.len() {
                    let name = self.cfg.arg_regs[j].clone();
                    self.asm(format!("mv {}, {}", dst, name));
                } else {
                    let word = self.cfg.word_size as i32;
                    let offset = self.frame_size + (j - self.cfg.arg_regs.len()) as i32 * word;
                    let dst = dst.to_string();
                    self.mem_access("lw", &dst, offset);
                }
                Ok(())
            }
            Operand::Global(_) => Err(Diagnostic::error(
                "codegen invariant violated: global address passed as argument".to_string(),
                Span::dummy(),
            )),
        }
    }

    fn emit_epilogue(&mut self) {
        if self.saves_ra {
            let offset = self.frame_size - self.cfg.word_size as i32;
            self.mem_access("lw", "ra", offset);
        }
        if self.frame_size > 0 {
            if self.cfg.fits_imm(self.frame_size) {
                self.asm(format!("addi sp, sp, {}", self.frame_size));
            } else {
                let scratch = self.cfg.scratch.clone();
                self.asm(format!("li {}, {}", scratch, self.frame_size));
                self.asm(format!("add sp, sp, {}", scratch));
            }
        }
        self.asm("ret".to_string());
    }
}
