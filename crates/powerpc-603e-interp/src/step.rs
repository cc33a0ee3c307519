//! Top-level instruction dispatch: decodes one 32-bit word and executes its full
//! architectural effect against an [`ArchState`] and [`MemoryBus`].
//!
//! This mirrors `init_ppc_drc`'s five dispatch tables (the primary opcode table plus the
//! extended tables hanging off opcodes 19/31/59/63) exactly, entry for entry, except that
//! each entry here runs the operation directly instead of emitting host code for it. The
//! JIT's translator consults the same opcode layout when deciding which operations it
//! inlines itself versus calls back into this crate for.

use powerpc_603e_bus::MemoryBus;
use powerpc_603e_state::ArchState;

use crate::control::{self, BranchDecision};
use crate::decode::*;
use crate::float;
use crate::integer;
use crate::memory;
use crate::system::{self, Exception};

/// What happened after executing one instruction. The caller (reference-interpreter loop
/// or a DRC helper call) is responsible for cycle accounting; this only reports control
/// flow and exception delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Ordinary instruction; `pc` has already been advanced (either by 4, or to a taken
    /// branch target).
    Normal,
    /// An exception was delivered; `pc` now points at the vector.
    Exception(Exception),
}

/// Executes the instruction at `st.pc`, updating `st.pc` and all other affected state.
///
/// Unmapped fetches and invalid/unimplemented opcodes are architectural-grade failures:
/// by the time a fetch fails or an opcode is unrecognized the surrounding translated code
/// is already committed to having executed this instruction, so there is no sane `Result`
/// to return. Both this interpreter and the DRC's exception prologues funnel these into
/// [`powerpc_603e_state::fatal`].
pub fn step(st: &mut ArchState, bus: &mut dyn MemoryBus) -> StepOutcome {
    let pc = st.pc;
    let op = bus.read32(pc);
    let opcode = opcode(op);

    match opcode {
        3 => {
            if control::twi(op, st) {
                return deliver_program(pc, st);
            }
        }
        7 => integer::mulli(op, st),
        8 => integer::subfic(op, st),
        10 => integer::cmpli(op, st),
        11 => integer::cmpi(op, st),
        12 => integer::addic(op, st),
        13 => integer::addic_rc(op, st),
        14 => integer::addi(op, st),
        15 => integer::addis(op, st),
        16 => return branch_conditional(op, pc, st),
        17 => {
            system::sc(pc, st);
            return StepOutcome::Exception(Exception::SystemCall);
        }
        18 => {
            st.pc = control::branch_target(op, pc);
            return StepOutcome::Normal;
        }
        20 => integer::rlwimi(op, st),
        21 => integer::rlwinm(op, st),
        23 => integer::rlwnm(op, st),
        24 => integer::ori(op, st),
        25 => integer::oris(op, st),
        26 => integer::xori(op, st),
        27 => integer::xoris(op, st),
        28 => integer::andi_rc(op, st),
        29 => integer::andis_rc(op, st),
        32 => memory::lwz(op, st, bus),
        33 => memory::lwzu(op, st, bus),
        34 => memory::lbz(op, st, bus),
        35 => memory::lbzu(op, st, bus),
        36 => memory::stw(op, st, bus),
        37 => memory::stwu(op, st, bus),
        38 => memory::stb(op, st, bus),
        39 => memory::stbu(op, st, bus),
        40 => memory::lhz(op, st, bus),
        41 => memory::lhzu(op, st, bus),
        42 => memory::lha(op, st, bus),
        43 => memory::lhau(op, st, bus),
        44 => memory::sth(op, st, bus),
        45 => memory::sthu(op, st, bus),
        46 => memory::lmw(op, st, bus),
        47 => memory::stmw(op, st, bus),
        48 => memory::lfs(op, st, bus),
        49 => memory::lfsu(op, st, bus),
        50 => memory::lfd(op, st, bus),
        51 => memory::lfdu(op, st, bus),
        52 => memory::stfs(op, st, bus),
        53 => memory::stfsu(op, st, bus),
        54 => memory::stfd(op, st, bus),
        55 => memory::stfdu(op, st, bus),
        19 => return dispatch_table19(op, pc, st),
        31 => {
            if let Some(outcome) = dispatch_table31(op, pc, st, bus) {
                return outcome;
            }
        }
        59 => dispatch_table59(op, st),
        63 => dispatch_table63(op, st),
        _ => powerpc_603e_state::fatal!("invalid primary opcode {opcode} at pc={pc:#010x}"),
    }

    st.pc = pc.wrapping_add(4);
    StepOutcome::Normal
}

fn deliver_program(pc: u32, st: &mut ArchState) -> StepOutcome {
    system::deliver(Exception::Program, pc.wrapping_add(4), st);
    StepOutcome::Exception(Exception::Program)
}

fn branch_conditional(op: u32, pc: u32, st: &mut ArchState) -> StepOutcome {
    let BranchDecision { taken } = control::evaluate_bo(op, st);
    if lkbit(op) {
        st.lr = pc.wrapping_add(4);
    }
    st.pc = if taken { control::conditional_branch_target(op, pc) } else { pc.wrapping_add(4) };
    StepOutcome::Normal
}

fn dispatch_table19(op: u32, pc: u32, st: &mut ArchState) -> StepOutcome {
    match ext_opcode(op) {
        0 => control::mcrf(op, st),
        16 => {
            let BranchDecision { taken } = control::evaluate_bo(op, st);
            if lkbit(op) {
                st.lr = pc.wrapping_add(4);
            }
            st.pc = if taken { st.lr & !0x3 } else { pc.wrapping_add(4) };
            return StepOutcome::Normal;
        }
        33 => control::crnor(op, st),
        50 => {
            system::rfi(st);
            return StepOutcome::Normal;
        }
        129 => control::crandc(op, st),
        150 => {} // isync: no-op for this workspace's single in-order core
        193 => control::crxor(op, st),
        225 => control::crnand(op, st),
        257 => control::crand(op, st),
        289 => control::creqv(op, st),
        417 => control::crorc(op, st),
        449 => control::cror(op, st),
        528 => {
            let BranchDecision { taken } = control::evaluate_bo(op, st);
            if lkbit(op) {
                st.lr = pc.wrapping_add(4);
            }
            st.pc = if taken { st.ctr & !0x3 } else { pc.wrapping_add(4) };
            return StepOutcome::Normal;
        }
        ext => powerpc_603e_state::fatal!("invalid extended opcode 19/{ext} at pc={pc:#010x}"),
    }
    st.pc = pc.wrapping_add(4);
    StepOutcome::Normal
}

/// Returns `Some` only for the entries (`tw`, `mtmsr`, `mtspr`, `mfspr`) that can signal an
/// exception or a failed SPR access; everything else falls through to the caller's generic
/// `pc += 4`.
fn dispatch_table31(op: u32, pc: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) -> Option<StepOutcome> {
    // Arithmetic ops that set OE (bit 0x200 of the extended opcode, recording summary
    // overflow into XER) are listed twice in the original table, once per OE setting; the
    // two entries only ever differ in that bit, so both map to the same handler here.
    match ext_opcode(op) {
        0x000 => integer::cmp(op, st),
        0x004 => {
            if control::tw(op, st) {
                return Some(deliver_program(pc, st));
            }
        }
        0x008 | 0x208 => integer::subfc(op, st),
        0x00a | 0x20a => integer::addc(op, st),
        0x00b => integer::mulhwu(op, st),
        0x013 => system::mfcr(op, st),
        0x014 => memory::lwarx(op, st, bus),
        0x017 => memory::lwzx(op, st, bus),
        0x018 => integer::slw(op, st),
        0x01a => integer::cntlzw(op, st),
        0x01c => integer::and(op, st),
        0x020 => integer::cmpl(op, st),
        0x028 | 0x228 => integer::subf(op, st),
        0x036 => {} // dcbst: no host cache model
        0x037 => memory::lwzux(op, st, bus),
        0x03c => integer::andc(op, st),
        0x04b => integer::mulhw(op, st),
        0x053 => system::mfmsr(op, st),
        0x056 => {} // dcbf
        0x057 => memory::lbzx(op, st, bus),
        0x068 | 0x268 => integer::neg(op, st),
        0x077 => memory::lbzux(op, st, bus),
        0x07c => integer::nor(op, st),
        0x088 | 0x288 => integer::subfe(op, st),
        0x08a | 0x28a => integer::adde(op, st),
        0x090 => system::mtcrf(op, st),
        0x092 => {
            if system::mtmsr(op, st) {
                st.pc = pc.wrapping_add(4);
                return Some(StepOutcome::Normal);
            }
        }
        0x096 => memory::stwcx_rc(op, st, bus),
        0x097 => memory::stwx(op, st, bus),
        0x0b7 => memory::stwux(op, st, bus),
        0x0c8 | 0x2c8 => integer::subfze(op, st),
        0x0ca | 0x2ca => integer::addze(op, st),
        0x0d2 => system::mtsr(op, st),
        0x0d7 => memory::stbx(op, st, bus),
        0x0e8 | 0x2e8 => integer::subfme(op, st),
        0x0ea | 0x2ea => integer::addme(op, st),
        0x0eb | 0x2eb => integer::mullw(op, st),
        0x0f2 => system::mtsrin(op, st),
        0x0f6 => {} // dcbtst
        0x0f7 => memory::stbux(op, st, bus),
        0x10a | 0x30a => integer::add(op, st),
        0x116 => {} // dcbt
        0x117 => memory::lhzx(op, st, bus),
        0x11c => integer::eqv(op, st),
        0x132 => {} // tlbie: no MMU model
        0x136 => {} // eciwx: external control, unused on this board
        0x137 => memory::lhzux(op, st, bus),
        0x13c => integer::xor(op, st),
        0x153 => {
            if system::mfspr(op, st).is_none() {
                powerpc_603e_state::fatal!("mfspr of unknown spr {} at pc={pc:#010x}", spr(op));
            }
        }
        0x157 => memory::lhax(op, st, bus),
        0x172 => {} // tlbia
        0x173 => {
            let value = system::mftb(op, st);
            st.gpr[rd(op)] = value;
        }
        0x177 => memory::lhaux(op, st, bus),
        0x197 => memory::sthx(op, st, bus),
        0x19c => integer::orc(op, st),
        0x1b6 => {} // ecowx
        0x1b7 => memory::sthux(op, st, bus),
        0x1bc => integer::or(op, st),
        0x1cb | 0x3cb => integer::divwu(op, st),
        0x1d3 => {
            if !system::mtspr(op, st) {
                powerpc_603e_state::fatal!("mtspr of unknown spr {} at pc={pc:#010x}", spr(op));
            }
        }
        0x1d6 => {} // dcbi
        0x1dc => integer::nand(op, st),
        0x1eb | 0x3eb => integer::divw(op, st),
        0x200 => control::mcrxr(op, st),
        0x215 => {} // lswx: string load, unused on this board
        0x216 => memory::lwbrx(op, st, bus),
        0x217 => memory::lfsx(op, st, bus),
        0x218 => integer::srw(op, st),
        0x236 => {} // tlbsync
        0x237 => memory::lfsux(op, st, bus),
        0x253 => system::mfsr(op, st),
        0x255 => {} // lswi
        0x256 => {} // sync
        0x257 => memory::lfdx(op, st, bus),
        0x277 => memory::lfdux(op, st, bus),
        0x293 => system::mfsrin(op, st),
        0x295 => {} // stswx
        0x296 => memory::stwbrx(op, st, bus),
        0x297 => memory::stfsx(op, st, bus),
        0x2b7 => memory::stfsux(op, st, bus),
        0x2d5 => {} // stswi
        0x2d7 => memory::stfdx(op, st, bus),
        0x2f6 => {} // dcba
        0x2f7 => memory::stfdux(op, st, bus),
        0x316 => memory::lhbrx(op, st, bus),
        0x318 => integer::sraw(op, st),
        0x338 => integer::srawi(op, st),
        0x356 => {} // eieio
        0x396 => memory::sthbrx(op, st, bus),
        0x39a => integer::extsh(op, st),
        0x3ba => integer::extsb(op, st),
        0x3d6 => {} // icbi
        0x3d7 => memory::stfiwx(op, st, bus),
        0x3f6 => {} // dcbz
        ext => powerpc_603e_state::fatal!("invalid extended opcode 31/{ext:#05x} at pc={pc:#010x}"),
    }
    None
}

fn dispatch_table59(op: u32, st: &mut ArchState) {
    match ext_opcode(op) & 0x3ff {
        0x012 => float::fdivs(op, st),
        0x014 => float::fsubs(op, st),
        0x015 => float::fadds(op, st),
        0x016 => float::fsqrts(op, st),
        0x018 => float::fres(op, st),
        ext if ext & 0x1f == 0x019 => float::fmuls(op, st),
        ext if ext & 0x1f == 0x01c => float::fmsubs(op, st),
        ext if ext & 0x1f == 0x01d => float::fmadds(op, st),
        ext if ext & 0x1f == 0x01e => float::fnmsubs(op, st),
        ext if ext & 0x1f == 0x01f => float::fnmadds(op, st),
        ext => powerpc_603e_state::fatal!("invalid extended opcode 59/{ext:#05x}"),
    }
}

fn dispatch_table63(op: u32, st: &mut ArchState) {
    match ext_opcode(op) & 0x3ff {
        0x000 => float::fcmpu(op, st),
        0x00c => float::frsp(op, st),
        0x00e => float::fctiw(op, st),
        0x00f => float::fctiwz(op, st),
        0x012 => float::fdiv(op, st),
        0x014 => float::fsub(op, st),
        0x015 => float::fadd(op, st),
        0x016 => float::fsqrt(op, st),
        0x01a => float::frsqrte(op, st),
        0x020 => float::fcmpo(op, st),
        0x026 => float::mtfsb1(op, st),
        0x028 => float::fneg(op, st),
        0x040 => float::mcrfs(op, st),
        0x046 => float::mtfsb0(op, st),
        0x048 => float::fmr(op, st),
        0x086 => float::mtfsfi(op, st),
        0x088 => float::fnabs(op, st),
        0x108 => float::fabs(op, st),
        0x247 => float::mffs(op, st),
        0x2c7 => float::mtfsf(op, st),
        ext if ext & 0x1f == 0x017 => float::fsel(op, st),
        ext if ext & 0x1f == 0x019 => float::fmul(op, st),
        ext if ext & 0x1f == 0x01c => float::fmsub(op, st),
        ext if ext & 0x1f == 0x01d => float::fmadd(op, st),
        ext if ext & 0x1f == 0x01e => float::fnmsub(op, st),
        ext if ext & 0x1f == 0x01f => float::fnmadd(op, st),
        ext => powerpc_603e_state::fatal!("invalid extended opcode 63/{ext:#05x}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeBus {
        mem: HashMap<u32, u8>,
    }

    impl MemoryBus for FakeBus {
        fn read8(&mut self, address: u32) -> u8 {
            *self.mem.get(&address).unwrap_or(&0)
        }
        fn write8(&mut self, address: u32, value: u8) {
            self.mem.insert(address, value);
        }
        fn read16(&mut self, address: u32) -> u16 {
            (u16::from(self.read8(address)) << 8) | u16::from(self.read8(address + 1))
        }
        fn write16(&mut self, address: u32, value: u16) {
            self.write8(address, (value >> 8) as u8);
            self.write8(address + 1, value as u8);
        }
        fn read32(&mut self, address: u32) -> u32 {
            (u32::from(self.read16(address)) << 16) | u32::from(self.read16(address + 2))
        }
        fn write32(&mut self, address: u32, value: u32) {
            self.write16(address, (value >> 16) as u16);
            self.write16(address + 2, value as u16);
        }
        fn read64(&mut self, address: u32) -> u64 {
            (u64::from(self.read32(address)) << 32) | u64::from(self.read32(address + 4))
        }
        fn write64(&mut self, address: u32, value: u64) {
            self.write32(address, (value >> 32) as u32);
            self.write32(address + 4, value as u32);
        }
    }

    #[test]
    fn addi_advances_pc_and_writes_gpr() {
        let mut st = ArchState::new();
        let mut bus = FakeBus { mem: HashMap::new() };
        st.pc = 0x1000;
        bus.write32(0x1000, (14u32 << 26) | (3u32 << 21) | (0u32 << 16) | 5);
        let outcome = step(&mut st, &mut bus);
        assert_eq!(outcome, StepOutcome::Normal);
        assert_eq!(st.gpr[3], 5);
        assert_eq!(st.pc, 0x1004);
    }

    #[test]
    fn unconditional_branch_sets_pc_directly() {
        let mut st = ArchState::new();
        let mut bus = FakeBus { mem: HashMap::new() };
        st.pc = 0x2000;
        bus.write32(0x2000, (18u32 << 26) | 0x100);
        step(&mut st, &mut bus);
        assert_eq!(st.pc, 0x2100);
    }

    #[test]
    fn sc_delivers_system_call_exception() {
        let mut st = ArchState::new();
        let mut bus = FakeBus { mem: HashMap::new() };
        st.pc = 0x3000;
        bus.write32(0x3000, 17u32 << 26);
        let outcome = step(&mut st, &mut bus);
        assert_eq!(outcome, StepOutcome::Exception(Exception::SystemCall));
        assert_eq!(st.pc, 0x0000_0C00);
        assert_eq!(st.srr0, 0x3004);
    }
}
