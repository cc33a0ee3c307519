//! Byte-level x86-32 assembler. Mirrors `genx86.c`'s `gen`/`gen_jmp`/`gen_mov_*` family:
//! one entry point per addressing-mode shape (register/register, register/immediate,
//! register/displacement), rather than a general operand-encoding abstraction, because
//! that is how the translator in `powerpc-603e-jit` calls into this crate.

use crate::opcode::GenOp;
use crate::reg::Reg;

/// A forward- or backward-referenced branch target, matching `JUMP_TARGET`/`JUMP_TYPE`.
/// `bind` resolves every jump emitted against this target before it was known.
#[derive(Debug, Default)]
pub struct JumpTarget {
    resolved_pos: Option<usize>,
    pending: Vec<PendingPatch>,
}

#[derive(Debug)]
struct PendingPatch {
    /// Byte offset of the relative-displacement field itself.
    patch_at: usize,
    /// Byte offset of the first byte after the jump instruction (the rel8/rel32 base).
    instr_end: usize,
    /// 1 for a short (`rel8`) jump, 4 for a near (`rel32`) jump.
    size: u8,
}

impl JumpTarget {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved_pos.is_some()
    }
}

/// Accumulates emitted host instructions into a growable buffer. The JIT's block compiler
/// owns one `Emitter` per translated block and copies its buffer into the shared
/// executable code cache once translation of the block completes.
#[derive(Debug, Default)]
pub struct Emitter {
    buf: Vec<u8>,
    instruction_count: u32,
    /// `(patch_at, absolute_target)` pairs left by [`Emitter::gen_call_abs`], resolved by
    /// [`Emitter::relocate_calls`] once the block's final address in the code cache is
    /// known.
    call_fixups: Vec<(usize, usize)>,
}

impl Emitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn instruction_amount(&self) -> u32 {
        self.instruction_count
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.instruction_count = 0;
        self.call_fixups.clear();
    }

    fn emit_u8(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    fn emit_u32_le(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn modrm(&mut self, modrm_mod: u8, reg: u8, rm: u8) {
        self.emit_u8((modrm_mod << 6) | ((reg & 0x7) << 3) | (rm & 0x7));
    }

    /// Register/register or register/immediate form, matching `gen(opcode, dst, src)`.
    /// `dst_param`/`src_param` are x86 register numbers for the register-pair opcodes, or
    /// (for the `*I`/`*Im` immediate forms) `dst_param` is the register/memory operand and
    /// `src_param` is the immediate value itself.
    pub fn gen(&mut self, opcode: GenOp, dst_param: i32, src_param: i32) {
        self.instruction_count += 1;
        match opcode {
            GenOp::Mov if opcode.is_register_pair() => {
                self.emit_u8(0x89);
                self.modrm(0b11, src_param as u8, dst_param as u8);
            }
            GenOp::MovI => {
                self.emit_u8(0xB8 + (dst_param as u8 & 0x7));
                self.emit_u32_le(src_param as u32);
            }
            GenOp::Add if opcode.is_register_pair() => {
                self.emit_u8(0x01);
                self.modrm(0b11, src_param as u8, dst_param as u8);
            }
            GenOp::AddI => {
                self.emit_u8(0x81);
                self.modrm(0b11, 0, dst_param as u8);
                self.emit_u32_le(src_param as u32);
            }
            GenOp::Sub if opcode.is_register_pair() => {
                self.emit_u8(0x29);
                self.modrm(0b11, src_param as u8, dst_param as u8);
            }
            GenOp::SubI => {
                self.emit_u8(0x81);
                self.modrm(0b11, 5, dst_param as u8);
                self.emit_u32_le(src_param as u32);
            }
            GenOp::And if opcode.is_register_pair() => {
                self.emit_u8(0x21);
                self.modrm(0b11, src_param as u8, dst_param as u8);
            }
            GenOp::AndI => {
                self.emit_u8(0x81);
                self.modrm(0b11, 4, dst_param as u8);
                self.emit_u32_le(src_param as u32);
            }
            GenOp::Or if opcode.is_register_pair() => {
                self.emit_u8(0x09);
                self.modrm(0b11, src_param as u8, dst_param as u8);
            }
            GenOp::OrI => {
                self.emit_u8(0x81);
                self.modrm(0b11, 1, dst_param as u8);
                self.emit_u32_le(src_param as u32);
            }
            GenOp::Xor if opcode.is_register_pair() => {
                self.emit_u8(0x31);
                self.modrm(0b11, src_param as u8, dst_param as u8);
            }
            GenOp::XorI => {
                self.emit_u8(0x81);
                self.modrm(0b11, 6, dst_param as u8);
                self.emit_u32_le(src_param as u32);
            }
            GenOp::Cmp if opcode.is_register_pair() => {
                self.emit_u8(0x39);
                self.modrm(0b11, src_param as u8, dst_param as u8);
            }
            GenOp::CmpI => {
                self.emit_u8(0x81);
                self.modrm(0b11, 7, dst_param as u8);
                self.emit_u32_le(src_param as u32);
            }
            GenOp::Push => self.emit_u8(0x50 + (dst_param as u8 & 0x7)),
            GenOp::Pop => self.emit_u8(0x58 + (dst_param as u8 & 0x7)),
            GenOp::PushI => {
                self.emit_u8(0x68);
                self.emit_u32_le(dst_param as u32);
            }
            GenOp::Pushad => self.emit_u8(0x60),
            GenOp::Popad => self.emit_u8(0x61),
            GenOp::Ret => self.emit_u8(0xC3),
            GenOp::Neg => {
                self.emit_u8(0xF7);
                self.modrm(0b11, 3, dst_param as u8);
            }
            GenOp::Not => {
                self.emit_u8(0xF7);
                self.modrm(0b11, 2, dst_param as u8);
            }
            GenOp::JmpR => {
                self.emit_u8(0xFF);
                self.modrm(0b11, 4, dst_param as u8);
            }
            GenOp::CallI => {
                self.emit_u8(0xE8);
                self.emit_u32_le(dst_param as u32);
            }
            // Absolute-memory forms: `dst_param` names a fixed host address (e.g. the
            // scheduler's resident `icount` cell) rather than a register, addressed via
            // the disp32-only ModRM/SIB encoding (mod=00, rm=101).
            GenOp::SubIm => {
                self.emit_u8(0x81);
                self.abs_modrm(5, dst_param);
                self.emit_u32_le(src_param as u32);
            }
            GenOp::AddIm => {
                self.emit_u8(0x81);
                self.abs_modrm(0, dst_param);
                self.emit_u32_le(src_param as u32);
            }
            GenOp::CmpIm => {
                self.emit_u8(0x81);
                self.abs_modrm(7, dst_param);
                self.emit_u32_le(src_param as u32);
            }
            GenOp::MovIm => {
                self.emit_u8(0xC7);
                self.abs_modrm(0, dst_param);
                self.emit_u32_le(src_param as u32);
            }
            // `mov [dst_param], src_param_reg`
            GenOp::MovMr => {
                self.emit_u8(0x89);
                self.abs_modrm(src_param as u8, dst_param);
            }
            // `mov dst_param_reg, [src_param]`
            GenOp::MovRm => {
                self.emit_u8(0x8B);
                self.abs_modrm(dst_param as u8, src_param);
            }
            other => unimplemented!(
                "host opcode {other:?} is not yet reachable from the translator this workspace builds"
            ),
        }
    }

    fn abs_modrm(&mut self, reg: u8, addr: i32) {
        self.modrm(0b00, reg, 0b101);
        self.emit_u32_le(addr as u32);
    }

    /// `gen_mov_dpr_to_reg`: `mov dst_reg, [disp_reg + disp]`, the load half of every
    /// register-state access (`state_ptr + field_offset`).
    pub fn gen_mov_dpr_to_reg(&mut self, dst_reg: Reg, disp: i32, disp_reg: Reg) {
        self.instruction_count += 1;
        self.emit_u8(0x8B);
        self.disp_modrm(dst_reg.code(), disp, disp_reg);
    }

    /// `gen_mov_reg_to_dpr`: `mov [disp_reg + disp], src_reg`.
    pub fn gen_mov_reg_to_dpr(&mut self, src_reg: Reg, disp: i32, disp_reg: Reg) {
        self.instruction_count += 1;
        self.emit_u8(0x89);
        self.disp_modrm(src_reg.code(), disp, disp_reg);
    }

    fn disp_modrm(&mut self, reg: u8, disp: i32, base: Reg) {
        if base.code() == Reg::Esp.code() {
            // ESP as a base requires a SIB byte with no index (scale/index = 100/100).
            if disp == 0 {
                self.modrm(0b00, reg, 0b100);
                self.emit_u8(0x24);
            } else if let Ok(disp8) = i8::try_from(disp) {
                self.modrm(0b01, reg, 0b100);
                self.emit_u8(0x24);
                self.emit_u8(disp8 as u8);
            } else {
                self.modrm(0b10, reg, 0b100);
                self.emit_u8(0x24);
                self.emit_u32_le(disp as u32);
            }
        } else if disp == 0 && base.code() != Reg::Ebp.code() {
            self.modrm(0b00, reg, base.code());
        } else if let Ok(disp8) = i8::try_from(disp) {
            self.modrm(0b01, reg, base.code());
            self.emit_u8(disp8 as u8);
        } else {
            self.modrm(0b10, reg, base.code());
            self.emit_u32_le(disp as u32);
        }
    }

    /// Marks `target` as resolved at the current position, patching every earlier forward
    /// reference to it (the `JUMP_TYPE_FORWARD` case of the original's `gen_jmp_target`).
    pub fn bind(&mut self, target: &mut JumpTarget) {
        let here = self.buf.len();
        target.resolved_pos = Some(here);
        for patch in target.pending.drain(..) {
            let rel = (here as i64) - (patch.instr_end as i64);
            self.patch_rel(patch.patch_at, patch.size, rel);
        }
    }

    fn patch_rel(&mut self, at: usize, size: u8, rel: i64) {
        if size == 1 {
            self.buf[at] = rel as i8 as u8;
        } else {
            let bytes = (rel as i32).to_le_bytes();
            self.buf[at..at + 4].copy_from_slice(&bytes);
        }
    }

    /// Emits a near (`rel32`) conditional or unconditional jump to `target`. If `target` is
    /// already resolved (a backward branch) the displacement is computed and emitted
    /// immediately; otherwise a zeroed placeholder is emitted and patched by the later
    /// [`Emitter::bind`] call.
    pub fn gen_jmp(&mut self, opcode: GenOp, target: &mut JumpTarget) {
        self.instruction_count += 1;
        let opcode_bytes: &[u8] = match opcode {
            GenOp::Jmp => &[0xE9],
            GenOp::Jz => &[0x0F, 0x84],
            GenOp::Jnz => &[0x0F, 0x85],
            GenOp::Ja => &[0x0F, 0x87],
            GenOp::Jae => &[0x0F, 0x83],
            GenOp::Jb => &[0x0F, 0x82],
            GenOp::Jg => &[0x0F, 0x8F],
            GenOp::Jl => &[0x0F, 0x8C],
            GenOp::Jns => &[0x0F, 0x89],
            other => unimplemented!("{other:?} is not a conditional/unconditional jump opcode"),
        };
        self.buf.extend_from_slice(opcode_bytes);
        let patch_at = self.buf.len();
        self.emit_u32_le(0);
        let instr_end = self.buf.len();
        if let Some(resolved) = target.resolved_pos {
            let rel = (resolved as i64) - (instr_end as i64);
            self.patch_rel(patch_at, 4, rel);
        } else {
            target.pending.push(PendingPatch { patch_at, instr_end, size: 4 });
        }
    }

    /// `gen_jmp_rpr`: indirect jump through a register pair, used by the dispatch-table
    /// lookup at the end of every translated block (`jmp [reg1 + reg2*4]`).
    pub fn gen_jmp_rpr(&mut self, reg1: Reg, reg2: Reg) {
        self.instruction_count += 1;
        self.emit_u8(0xFF);
        self.emit_u8((0b00 << 6) | (4 << 3) | 0b100); // ModRM: mod=00, reg=/4 (jmp), rm=100 (SIB)
        self.emit_u8((0b10 << 6) | ((reg2.code() & 0x7) << 3) | (reg1.code() & 0x7)); // scale=4
    }

    /// `call rel32` to a helper whose final absolute address is `target_addr`. The
    /// displacement can't be computed yet — this `Emitter`'s buffer hasn't been placed in
    /// the code cache — so a zeroed placeholder is emitted and the fixup recorded for
    /// [`Emitter::relocate_calls`] once the block's base address in the cache is known.
    pub fn gen_call_abs(&mut self, target_addr: usize) {
        self.instruction_count += 1;
        self.emit_u8(0xE8);
        let patch_at = self.buf.len();
        self.emit_u32_le(0);
        self.call_fixups.push((patch_at, target_addr));
    }

    /// Patches every [`Emitter::gen_call_abs`] placeholder now that the block is about to
    /// be (or has just been) copied to `block_base_addr` in the executable code cache.
    pub fn relocate_calls(&mut self, block_base_addr: usize) {
        for (patch_at, target) in std::mem::take(&mut self.call_fixups) {
            let call_site_next = block_base_addr + patch_at + 4;
            let rel = target as i64 - call_site_next as i64;
            let bytes = (rel as i32).to_le_bytes();
            self.buf[patch_at..patch_at + 4].copy_from_slice(&bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mov_reg_reg_encodes_as_89_modrm() {
        let mut emitter = Emitter::new();
        emitter.gen(GenOp::Mov, Reg::Eax.code() as i32, Reg::Ecx.code() as i32);
        assert_eq!(emitter.code(), &[0x89, 0xC8]);
    }

    #[test]
    fn backward_jump_computes_negative_displacement_immediately() {
        let mut emitter = Emitter::new();
        let mut target = JumpTarget::new();
        emitter.bind(&mut target);
        emitter.gen(GenOp::MovI, Reg::Eax.code() as i32, 0);
        emitter.gen_jmp(GenOp::Jmp, &mut target);
        let code = emitter.code();
        let rel = i32::from_le_bytes(code[code.len() - 4..].try_into().unwrap());
        assert_eq!(rel, -10);
    }

    #[test]
    fn forward_jump_is_patched_on_bind() {
        let mut emitter = Emitter::new();
        let mut target = JumpTarget::new();
        emitter.gen_jmp(GenOp::Jz, &mut target);
        let before_bind_len = emitter.code().len();
        emitter.gen(GenOp::MovI, Reg::Eax.code() as i32, 0);
        emitter.bind(&mut target);
        let code = emitter.code();
        let patch_at = before_bind_len - 4;
        let rel = i32::from_le_bytes(code[patch_at..patch_at + 4].try_into().unwrap());
        assert_eq!(rel, 5); // the MovI instruction emitted in between is 5 bytes
    }

    #[test]
    fn sub_im_decrements_absolute_address() {
        let mut emitter = Emitter::new();
        emitter.gen(GenOp::SubIm, 0x1000, 1);
        let code = emitter.code();
        assert_eq!(code[0], 0x81);
        assert_eq!(code[1], 0x05); // mod=00, reg=/5 (sub), rm=101 (disp32)
        let addr = u32::from_le_bytes(code[2..6].try_into().unwrap());
        assert_eq!(addr, 0x1000);
        let imm = u32::from_le_bytes(code[6..10].try_into().unwrap());
        assert_eq!(imm, 1);
    }

    #[test]
    fn call_abs_is_relocated_against_block_base() {
        let mut emitter = Emitter::new();
        emitter.gen(GenOp::MovI, Reg::Eax.code() as i32, 0); // 5 bytes, pushes call site to offset 5
        emitter.gen_call_abs(0x2000);
        emitter.relocate_calls(0x1000);
        let code = emitter.code();
        let rel = i32::from_le_bytes(code[6..10].try_into().unwrap());
        // call site's next-instruction address is 0x1000 + 5 (MovI) + 5 (call opcode+disp) = 0x100A
        assert_eq!(rel, 0x2000 - 0x100A);
    }
}
