//! Maps one guest opcode to a sequence of emitted host instructions, per §4.4.
//!
//! Most categories route through [`crate::helpers::step_trampoline`], which already
//! implements every opcode's full semantics in the reference interpreter; OE-suffixed
//! arithmetic, CR-logicals, floating point, and cold SPR access are all call-threaded
//! this way, generalized uniformly rather than special-cased per category. Two
//! categories are genuinely inlined, the "fast inline host sequence" half of §4.4:
//!
//! - the per-instruction cycle-check decrement and exhaustion test (§4.7: "for every
//!   compiled instruction, the translator first decrements the shared cycle counter by
//!   one" and "emit a compare of `icount` against zero and a conditional jump to the
//!   exit stub"), and
//! - the hot SPR moves `mfspr`/`mtspr` for LR and CTR (§4.4: "inline direct loads/stores
//!   for the hot SPRs (LR, CTR, XER); call helpers for the cold ones").
//!
//! Every other opcode, including the cold SPR path, compiles to a call through
//! [`crate::helpers::step_trampoline`]. Because that helper already re-evaluates the
//! branch/exception/fallthrough outcome of the instruction it ran, the translator does
//! not need per-category control-flow analysis at all: after every such call it checks
//! the outcome code the helper left in `eax` and, on anything other than "fell through
//! to PC+4", returns immediately to the caller (a single compiled block never chains
//! into the next one natively; [`crate::scheduler::NativeBlockRunner`] re-resolves the
//! dispatch table in Rust and calls back in, which also gives block compilation-on-demand
//! a natural place to happen without generated code ever needing to call back into the
//! block compiler itself).

use powerpc_603e_codegen::{Emitter, GenOp, JumpTarget, Reg};
use powerpc_603e_interp::decode::{ext_opcode, opcode, rd, spr};
use powerpc_603e_state::spr as spr_numbers;
use powerpc_603e_state::ArchState;

use crate::helpers::{self, OUTCOME_EXHAUSTED, OUTCOME_NORMAL};

fn offset_pc() -> i32 {
    std::mem::offset_of!(ArchState, pc) as i32
}

fn offset_lr() -> i32 {
    std::mem::offset_of!(ArchState, lr) as i32
}

fn offset_ctr() -> i32 {
    std::mem::offset_of!(ArchState, ctr) as i32
}

fn offset_gpr(n: usize) -> i32 {
    (std::mem::offset_of!(ArchState, gpr) + n * 4) as i32
}

/// `true` for opcodes the block compiler must stop after: unconditional branches,
/// `bclr`/`bcctr` (whose target is only known at run time), and the two instructions
/// that always hand control to an exception vector (`sc`, `rfi`).
#[must_use]
pub fn is_block_end(op: u32) -> bool {
    match opcode(op) {
        18 => true,  // b / ba / bl / bla: always taken
        17 => true,  // sc
        19 => matches!(ext_opcode(op), 16 | 528 | 50), // bclr, bcctr, rfi
        _ => false,
    }
}

/// Emits the host code for one guest instruction into `emitter`. `state_reg` is the
/// register [`crate::block::BlockCompiler::compile`] loads from the block's incoming
/// `ArchState` pointer argument once, at block entry, and which stays resident for the
/// rest of the block; `bus_data`/`bus_vtable` are the absolute addresses baked into
/// helper calls (the guest bus is a single embedder-owned object for the lifetime of a
/// `Drc`, so every block compiled against a given `Translator` can bake the same split
/// pointer rather than re-deriving it from its own incoming arguments); `icount_addr` is
/// the scheduler's resident cycle-counter cell, a plain `i32` since a single quantum's
/// budget always fits (the scheduler's own cross-quantum totals stay `i64`, see
/// [`crate::scheduler::Scheduler`]).
pub struct Translator {
    pub state_reg: Reg,
    pub bus_data: usize,
    pub bus_vtable: usize,
    pub icount_addr: usize,
    pub step_trampoline_addr: usize,
}

impl Translator {
    /// Translates the instruction `op` (fetched from `pc`) into `emitter`. Every
    /// instruction pays the cycle-check cost first; if it finds `icount` exhausted, the
    /// block returns `OUTCOME_EXHAUSTED` to its caller right there instead of emitting
    /// this instruction's body at all.
    pub fn translate(&self, emitter: &mut Emitter, op: u32, pc: u32) {
        emitter.gen(GenOp::SubIm, self.icount_addr as i32, 1);
        emitter.gen(GenOp::CmpIm, self.icount_addr as i32, 0);
        let mut not_exhausted = JumpTarget::new();
        // `Jns`, not `Jg`: the decremented counter reaching exactly zero still means this
        // instruction was inside budget (a quantum of N must run N instructions, not N-1).
        emitter.gen_jmp(GenOp::Jns, &mut not_exhausted);
        emitter.gen(GenOp::MovI, Reg::Eax.code() as i32, OUTCOME_EXHAUSTED as i32);
        emitter.gen(GenOp::Ret, 0, 0);
        emitter.bind(&mut not_exhausted);

        if let Some((spr_num, is_write)) = hot_spr_move(op) {
            self.emit_hot_spr_move(emitter, op, spr_num, is_write);
            return;
        }

        self.emit_call_through(emitter, pc);
    }

    fn emit_hot_spr_move(&self, emitter: &mut Emitter, op: u32, spr_num: u32, is_write: bool) {
        let field_offset = if spr_num == spr_numbers::SPR_LR { offset_lr() } else { offset_ctr() };
        let scratch = Reg::Eax;
        if is_write {
            emitter.gen_mov_dpr_to_reg(scratch, offset_gpr(rd(op)), self.state_reg);
            emitter.gen_mov_reg_to_dpr(scratch, field_offset, self.state_reg);
        } else {
            emitter.gen_mov_dpr_to_reg(scratch, field_offset, self.state_reg);
            emitter.gen_mov_reg_to_dpr(scratch, offset_gpr(rd(op)), self.state_reg);
        }
        // pc += 4 inline; no redispatch is possible for this category.
        emitter.gen_mov_dpr_to_reg(scratch, offset_pc(), self.state_reg);
        emitter.gen(GenOp::AddI, scratch.code() as i32, 4);
        emitter.gen_mov_reg_to_dpr(scratch, offset_pc(), self.state_reg);
    }

    fn emit_call_through(&self, emitter: &mut Emitter, pc: u32) {
        emitter.gen(GenOp::PushI, self.bus_vtable as i32, 0);
        emitter.gen(GenOp::PushI, self.bus_data as i32, 0);
        emitter.gen(GenOp::Push, self.state_reg.code() as i32, 0);
        emitter.gen_call_abs(self.step_trampoline_addr);
        emitter.gen(GenOp::AddI, Reg::Esp.code() as i32, 12);

        // eax now holds OUTCOME_NORMAL or OUTCOME_REDISPATCH (see helpers::step_trampoline).
        // On anything but OUTCOME_NORMAL the block returns immediately with that code
        // still sitting in eax; the caller resolves the new PC in Rust rather than this
        // block jumping anywhere else natively.
        emitter.gen(GenOp::CmpI, Reg::Eax.code() as i32, OUTCOME_NORMAL as i32);
        let mut fallthrough = JumpTarget::new();
        emitter.gen_jmp(GenOp::Jz, &mut fallthrough);
        emitter.gen(GenOp::Ret, 0, 0);
        emitter.bind(&mut fallthrough);
        let _ = pc;
    }
}

/// `Some((spr_number, is_write))` for an `mfspr`/`mtspr` targeting LR or CTR, the two
/// hot SPRs the translator inlines directly.
fn hot_spr_move(op: u32) -> Option<(u32, bool)> {
    if opcode(op) != 31 {
        return None;
    }
    let ext = ext_opcode(op);
    let is_write = match ext {
        339 => false, // mfspr
        467 => true,  // mtspr
        _ => return None,
    };
    let number = spr(op);
    if number == spr_numbers::SPR_LR || number == spr_numbers::SPR_CTR {
        Some((number, is_write))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_translator() -> Translator {
        Translator {
            state_reg: Reg::Esi,
            bus_data: 0x2000,
            bus_vtable: 0x2008,
            icount_addr: 0x3000,
            step_trampoline_addr: helpers::step_trampoline as usize,
        }
    }

    /// Encodes an SPR number into its split bits11-15/bits16-20 instruction-word field,
    /// the same half-swap [`spr`] decodes.
    fn encode_spr_field(number: u32) -> u32 {
        ((number & 0x1f) << 16) | ((number >> 5) << 11)
    }

    #[test]
    fn unconditional_branch_is_block_end() {
        assert!(is_block_end(0x4800_0102)); // b +0x100
    }

    #[test]
    fn conditional_branch_does_not_end_block() {
        assert!(!is_block_end(0x4182_0008)); // bc 12,2,+8
    }

    #[test]
    fn bclr_and_bcctr_end_block() {
        assert!(is_block_end(0x4E80_0020)); // bclr
        assert!(is_block_end(0x4E80_0420)); // bcctr
    }

    #[test]
    fn sc_and_rfi_end_block() {
        assert!(is_block_end(0x4400_0002)); // sc
        assert!(is_block_end(0x4C00_0064)); // rfi
    }

    #[test]
    fn mfspr_lr_is_recognized_as_hot_spr_move() {
        let op = (31u32 << 26) | (5u32 << 21) | encode_spr_field(spr_numbers::SPR_LR) | (339 << 1);
        assert_eq!(hot_spr_move(op), Some((spr_numbers::SPR_LR, false)));
    }

    #[test]
    fn mfspr_cold_spr_is_not_inlined() {
        let op = (31u32 << 26) | (5u32 << 21) | encode_spr_field(spr_numbers::SPR_HID0) | (339 << 1);
        assert_eq!(hot_spr_move(op), None);
    }

    #[test]
    fn translate_emits_cycle_check_for_every_instruction() {
        let translator = test_translator();
        let mut emitter = Emitter::new();
        let op = (31u32 << 26) | (5u32 << 21) | encode_spr_field(spr_numbers::SPR_LR) | (339 << 1); // mflr r5
        translator.translate(&mut emitter, op, 0);
        let code = emitter.code();
        assert_eq!(code[0], 0x81); // SubIm opcode byte
        assert_eq!(code[1], 0x2D); // mod=00, reg=/5 (sub), rm=101 (disp32)
    }

    #[test]
    fn translate_emits_exhaustion_check_after_the_decrement() {
        let translator = test_translator();
        let mut emitter = Emitter::new();
        let op = (31u32 << 26) | (5u32 << 21) | encode_spr_field(spr_numbers::SPR_LR) | (339 << 1); // mflr r5
        translator.translate(&mut emitter, op, 0);
        let code = emitter.code();
        // SubIm is 10 bytes (opcode + modrm + disp32 + imm32); CmpIm follows immediately.
        assert_eq!(code[10], 0x81);
        assert_eq!(code[11], 0x3D); // mod=00, reg=/7 (cmp), rm=101 (disp32)
    }
}
