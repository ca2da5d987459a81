//! The RISC-V 32I backend.
//!
//! There is no register allocator: every IR value lives in a stack slot and
//! temporaries t0/t1/t2 never span more than one IR instruction (t6 is kept
//! as scratch for offsets outside the 12-bit immediate range).  Arguments
//! follow the 8-register-then-stack convention; `ra` is caller-saved at the
//! top of the frame whenever a function makes calls.
//!
//! The distinction the backend must not lose is value versus address: a
//! `getelemptr`/`getptr` result is a slot *containing* an address, while an
//! `alloc` result *is* the address of its slot.

use std::fmt::Write;

use derive_more::Display;

use super::frame::{plan, Frame};
use crate::common::WORD_SIZE;
use crate::middle::ir::*;

use Register::*;
use Storage::*;

/// Registers the generated code touches.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Register {
    #[display("ra")]
    Ra,
    #[display("sp")]
    Sp,
    #[display("t0")]
    T0,
    #[display("t1")]
    T1,
    #[display("t2")]
    T2,
    #[display("t6")]
    T6,
    #[display("a0")]
    A0,
    #[display("a1")]
    A1,
    #[display("a2")]
    A2,
    #[display("a3")]
    A3,
    #[display("a4")]
    A4,
    #[display("a5")]
    A5,
    #[display("a6")]
    A6,
    #[display("a7")]
    A7,
}

// Argument registers in the RISC-V ABI order.
static ARG_REGISTERS: [Register; 8] = [A0, A1, A2, A3, A4, A5, A6, A7];

/// Where an IR value lives at run time.
#[derive(Clone, Debug)]
enum Storage {
    /// An integer literal.
    Imm(i32),
    /// An sp-relative slot holding the value (for an alloc, the pointee).
    Slot(i32),
    /// One of the argument registers, for in-register parameter refs.
    Reg(Register),
    /// A named label in `.data`.
    GlobalVar(String),
    /// An sp-relative slot holding an *address*, the result of
    /// `getelemptr`/`getptr`.
    PtrSlot(i32),
}

/// Emit RISC-V assembly for a whole program.
pub fn code_gen(prog: &Program) -> String {
    let mut out = String::new();
    for global in &prog.globals {
        writeln!(out, "  .data").unwrap();
        writeln!(out, "  .global {}", global.name).unwrap();
        writeln!(out, "{}:", global.name).unwrap();
        emit_init(&mut out, &global.init, &global.ty);
    }
    for func in &prog.funcs {
        FuncEmitter {
            prog,
            func,
            frame: plan(func),
            out: &mut out,
        }
        .emit();
    }
    out
}

/// Global initializer bytes: `.word` per integer, `.zero` per zero-filled
/// subtree, concatenation for aggregates.
fn emit_init(out: &mut String, init: &GlobalInit, ty: &Type) {
    match init {
        GlobalInit::Zero => writeln!(out, "  .zero {}", ty.size()).unwrap(),
        GlobalInit::Int(v) => writeln!(out, "  .word {v}").unwrap(),
        GlobalInit::Aggregate(items) => {
            let Type::Array(elem, _) = ty else {
                unreachable!("internal error: aggregate initializer for a scalar")
            };
            for item in items {
                emit_init(out, item, elem);
            }
        }
    }
}

struct FuncEmitter<'a> {
    prog: &'a Program,
    func: &'a Function,
    frame: Frame,
    out: &'a mut String,
}

impl FuncEmitter<'_> {
    fn emit(&mut self) {
        writeln!(self.out, "  .text").unwrap();
        writeln!(self.out, "  .global {}", self.func.name).unwrap();
        writeln!(self.out, "{}:", self.func.name).unwrap();

        if self.frame.size > 0 {
            self.line(format!("li t0, {}", self.frame.size));
            self.line("sub sp, sp, t0");
        }
        if self.frame.save_ra {
            self.sw(Ra, Sp, self.frame.size - WORD_SIZE);
        }

        for (i, block) in self.func.blocks.iter().enumerate() {
            if i > 0 {
                let label = self.block_label(i);
                writeln!(self.out, "{label}:").unwrap();
            }
            for &id in &block.insts {
                self.inst(id);
            }
        }
    }

    /// Block labels are mangled with the function name so `%entry` never
    /// collides across functions.
    fn block_label(&self, index: usize) -> String {
        format!(".L{}_{}", self.func.name, self.func.blocks[index].label)
    }

    fn inst(&mut self, id: ValueId) {
        let value = self.func.value(id);
        match &value.kind {
            // The offset was recorded by the planner; no code.
            ValueKind::Alloc => {}
            ValueKind::Load { src } => {
                self.load_to(&self.storage(*src), T0);
                self.assign_from(&self.storage(id), T0, T1);
            }
            ValueKind::Store { val, dst } => {
                self.load_to(&self.storage(*val), T0);
                self.assign_from(&self.storage(*dst), T0, T1);
            }
            ValueKind::Binary { op, lhs, rhs } => {
                self.load_to(&self.storage(*lhs), T0);
                self.load_to(&self.storage(*rhs), T1);
                self.binary(*op);
                self.assign_from(&self.storage(id), T0, T1);
            }
            ValueKind::Branch {
                cond,
                then_bb,
                else_bb,
            } => {
                self.load_to(&self.storage(*cond), T0);
                self.line(format!("bnez t0, {}", self.block_label(*then_bb)));
                self.line(format!("j {}", self.block_label(*else_bb)));
            }
            ValueKind::Jump { target } => {
                self.line(format!("j {}", self.block_label(*target)));
            }
            ValueKind::Call { callee, args } => {
                for (i, &arg) in args.iter().enumerate() {
                    self.load_real_to(&self.storage(arg), T0);
                    if i < 8 {
                        self.line(format!("mv {}, t0", ARG_REGISTERS[i]));
                    } else {
                        self.sw(T0, Sp, (i as i32 - 8) * WORD_SIZE);
                    }
                }
                self.line(format!("call {callee}"));
                if value.has_result() {
                    self.assign_from(&self.storage(id), A0, T1);
                }
            }
            ValueKind::GetElemPtr { src, index } => {
                let stride = self.stride(&value.ty);
                self.load_addr_to(&self.storage(*src), T0);
                self.address_step(*index, stride);
                self.assign_addr_from(&self.storage(id), T0);
            }
            ValueKind::GetPtr { src, index } => {
                let stride = self.stride(&value.ty);
                // The source is already a pointer value, not a slot holding
                // an aggregate.
                self.load_to(&self.storage(*src), T0);
                self.address_step(*index, stride);
                self.assign_addr_from(&self.storage(id), T0);
            }
            ValueKind::Return { val } => {
                if let Some(val) = val {
                    self.load_to(&self.storage(*val), A0);
                }
                if self.frame.save_ra {
                    self.lw(Ra, Sp, self.frame.size - WORD_SIZE);
                }
                if self.frame.size > 0 {
                    self.line(format!("li t0, {}", self.frame.size));
                    self.line("add sp, sp, t0");
                }
                self.line("ret");
            }
            ValueKind::Integer(_) | ValueKind::Arg(_) | ValueKind::Global(_) => {
                unreachable!("internal error: operand value scheduled as an instruction")
            }
        }
    }

    /// The arithmetic between t0 and t1, result in t0.  The inverted
    /// comparisons go through their negation plus `seqz`/`snez`.
    fn binary(&mut self, op: BinaryOp) {
        match op {
            BinaryOp::Add => self.line("add t0, t0, t1"),
            BinaryOp::Sub => self.line("sub t0, t0, t1"),
            BinaryOp::Mul => self.line("mul t0, t0, t1"),
            BinaryOp::Div => self.line("div t0, t0, t1"),
            BinaryOp::Mod => self.line("rem t0, t0, t1"),
            BinaryOp::And => self.line("and t0, t0, t1"),
            BinaryOp::Or => self.line("or t0, t0, t1"),
            BinaryOp::Lt => self.line("slt t0, t0, t1"),
            BinaryOp::Gt => self.line("sgt t0, t0, t1"),
            BinaryOp::Eq => {
                self.line("xor t0, t0, t1");
                self.line("seqz t0, t0");
            }
            BinaryOp::Ne => {
                self.line("xor t0, t0, t1");
                self.line("snez t0, t0");
            }
            BinaryOp::Le => {
                self.line("sgt t0, t0, t1");
                self.line("seqz t0, t0");
            }
            BinaryOp::Ge => {
                self.line("slt t0, t0, t1");
                self.line("seqz t0, t0");
            }
        }
    }

    /// Element stride of a pointer-producing instruction's result type.
    fn stride(&self, ty: &Type) -> i32 {
        match ty.pointee() {
            Some(elem) => elem.size(),
            None => unreachable!("internal error: pointer arithmetic on a non-pointer"),
        }
    }

    /// t0 += index * stride, clobbering t1/t2.
    fn address_step(&mut self, index: ValueId, stride: i32) {
        self.load_to(&self.storage(index), T1);
        self.line(format!("li t2, {stride}"));
        self.line("mul t1, t1, t2");
        self.line("add t0, t0, t1");
    }

    fn storage(&self, id: ValueId) -> Storage {
        let value = self.func.value(id);
        match &value.kind {
            ValueKind::Integer(v) => Imm(*v),
            ValueKind::Arg(i) if *i < 8 => Reg(ARG_REGISTERS[*i]),
            // Stack arguments were pushed by the caller just above our frame.
            ValueKind::Arg(i) => Slot(self.frame.size + (*i as i32 - 8) * WORD_SIZE),
            ValueKind::Global(g) => GlobalVar(self.prog.globals[*g].name.clone()),
            ValueKind::GetElemPtr { .. } | ValueKind::GetPtr { .. } => {
                PtrSlot(self.frame.offsets[&id])
            }
            _ => Slot(self.frame.offsets[&id]),
        }
    }

    // ------------------------------------------------------------------
    // Abstract storage operations

    /// Read a storage's value into `dst`.
    fn load_to(&mut self, s: &Storage, dst: Register) {
        match s {
            Imm(v) => self.line(format!("li {dst}, {v}")),
            Slot(off) => self.lw(dst, Sp, *off),
            Reg(src) => self.line(format!("mv {dst}, {src}")),
            GlobalVar(name) => {
                self.line(format!("la {dst}, {name}"));
                self.line(format!("lw {dst}, 0({dst})"));
            }
            PtrSlot(off) => {
                self.lw(dst, Sp, *off);
                self.line(format!("lw {dst}, 0({dst})"));
            }
        }
    }

    /// Read a storage's *address* into `dst`.  Immediates and registers have
    /// no address.
    fn load_addr_to(&mut self, s: &Storage, dst: Register) {
        match s {
            Slot(off) => self.addi(dst, Sp, *off),
            GlobalVar(name) => self.line(format!("la {dst}, {name}")),
            PtrSlot(off) => self.lw(dst, Sp, *off),
            Imm(_) | Reg(_) => {
                unreachable!("internal error: address of an immediate or register")
            }
        }
    }

    /// Like `load_to`, except a pointer slot yields the address it holds
    /// rather than the pointee.  Used for passing aggregate pointers as call
    /// arguments.
    fn load_real_to(&mut self, s: &Storage, dst: Register) {
        match s {
            PtrSlot(off) => self.lw(dst, Sp, *off),
            _ => self.load_to(s, dst),
        }
    }

    /// Write `src` into a storage's value, going through the held address
    /// for pointer slots.  `scratch` must differ from `src`.
    fn assign_from(&mut self, s: &Storage, src: Register, scratch: Register) {
        match s {
            Slot(off) => self.sw(src, Sp, *off),
            Reg(dst) => self.line(format!("mv {dst}, {src}")),
            GlobalVar(name) => {
                self.line(format!("la {scratch}, {name}"));
                self.line(format!("sw {src}, 0({scratch})"));
            }
            PtrSlot(off) => {
                self.lw(scratch, Sp, *off);
                self.line(format!("sw {src}, 0({scratch})"));
            }
            Imm(_) => unreachable!("internal error: assignment to an immediate"),
        }
    }

    /// Write the address field of a pointer slot.
    fn assign_addr_from(&mut self, s: &Storage, src: Register) {
        match s {
            PtrSlot(off) => self.sw(src, Sp, *off),
            _ => unreachable!("internal error: address assignment to a value storage"),
        }
    }

    // ------------------------------------------------------------------
    // Raw emission, with t6 as scratch for offsets beyond 12-bit immediates.

    fn line(&mut self, text: impl AsRef<str>) {
        writeln!(self.out, "  {}", text.as_ref()).unwrap();
    }

    fn lw(&mut self, dst: Register, base: Register, off: i32) {
        if fits_imm12(off) {
            self.line(format!("lw {dst}, {off}({base})"));
        } else {
            self.line(format!("li t6, {off}"));
            self.line(format!("add t6, t6, {base}"));
            self.line(format!("lw {dst}, 0(t6)"));
        }
    }

    fn sw(&mut self, src: Register, base: Register, off: i32) {
        if fits_imm12(off) {
            self.line(format!("sw {src}, {off}({base})"));
        } else {
            self.line(format!("li t6, {off}"));
            self.line(format!("add t6, t6, {base}"));
            self.line(format!("sw {src}, 0(t6)"));
        }
    }

    fn addi(&mut self, dst: Register, base: Register, off: i32) {
        if fits_imm12(off) {
            self.line(format!("addi {dst}, {base}, {off}"));
        } else {
            self.line(format!("li {dst}, {off}"));
            self.line(format!("add {dst}, {dst}, {base}"));
        }
    }
}

fn fits_imm12(off: i32) -> bool {
    (-2048..=2047).contains(&off)
}
