//! The `extern "C"` functions emitted code calls into. Each one is an ordinary Rust
//! function; what makes it a "helper" in the translator's sense is only that its address
//! (taken with `as usize`) is baked into a block's machine code by
//! [`crate::translator::Translator`] via [`powerpc_603e_codegen::Emitter::gen_call_abs`].
//!
//! Every helper takes its `ArchState` pointer plus, where it needs the bus, the guest
//! bus split into its two fat-pointer halves on the stack. Splitting the bus this way
//! (rather than passing a boxed wrapper) matches the calling convention described in the
//! design notes: "all arguments on the stack... raw `*mut ArchState` (and, for memory
//! ops, a raw bus vtable pointer)". [`step_trampoline`] never needs a separate opcode
//! argument: it re-fetches the opcode at the current PC itself, the same way
//! `powerpc_603e_interp::step` already does.

use powerpc_603e_bus::MemoryBus;
use powerpc_603e_interp::{step, StepOutcome};
use powerpc_603e_state::ArchState;

/// The two words a `*mut dyn MemoryBus` fat pointer decomposes into on every target this
/// workspace builds for (data pointer, vtable pointer). This layout is not part of Rust's
/// stability guarantees, but is stable in practice across the compiler versions this
/// workspace has been built with; `aero-x86`-lineage FFI shims in this codebase rely on
/// the same assumption to pass trait objects across a raw calling convention.
#[repr(C)]
#[derive(Clone, Copy)]
struct FatPtrParts {
    data: *mut (),
    vtable: *mut (),
}

/// Splits a bus pointer into the two words emitted code pushes as call arguments.
#[must_use]
pub fn split_bus_ptr(bus: *mut dyn MemoryBus) -> (usize, usize) {
    let parts: FatPtrParts = unsafe { std::mem::transmute(bus) };
    (parts.data as usize, parts.vtable as usize)
}

/// Reassembles a bus pointer from the two words a helper receives.
///
/// # Safety
/// `data`/`vtable` must be the exact pair [`split_bus_ptr`] produced for a
/// still-live `dyn MemoryBus`.
unsafe fn join_bus_ptr(data: usize, vtable: usize) -> *mut dyn MemoryBus {
    let parts = FatPtrParts { data: data as *mut (), vtable: vtable as *mut () };
    unsafe { std::mem::transmute(parts) }
}

/// Outcome code a helper returns in `eax`, matching [`StepOutcome`]'s two cases so the
/// translator's post-call check can tell "fell through to PC+4" from "PC now points
/// somewhere a redispatch is required" without the interpreter crate's enum itself
/// needing a stable repr.
pub const OUTCOME_NORMAL: u32 = 0;
pub const OUTCOME_REDISPATCH: u32 = 1;
/// Returned by a compiled block's own exported entry point (never by a per-instruction
/// helper call) when the cycle-check at the top of [`crate::translator::Translator::translate`]
/// finds the shared `icount` cell has reached zero: the block returns to its caller
/// immediately instead of translating the rest of the instruction it was about to emit.
pub const OUTCOME_EXHAUSTED: u32 = 2;

/// The one helper every translated instruction slot calls: decodes and executes `op`
/// against `state` exactly as [`powerpc_603e_interp::step`] would, since `step` already
/// re-reads the opcode from the fetch region itself. Present as a distinct symbol (rather
/// than calling `step` directly from generated code) so its address is `extern "C"` and
/// stable for [`powerpc_603e_codegen::Emitter::gen_call_abs`] to bake in.
///
/// # Safety
/// `state` must point at a live `ArchState` and `(bus_data, bus_vtable)` must be a pair
/// [`split_bus_ptr`] produced for a still-live `dyn MemoryBus`, both valid for the
/// duration of the call. This is guaranteed by construction: the translator bakes in
/// the addresses of the same `Drc`-owned `ArchState`/bus for every call site in a block.
pub extern "C" fn step_trampoline(state: *mut ArchState, bus_data: usize, bus_vtable: usize) -> u32 {
    let st = unsafe { &mut *state };
    let bus = unsafe { &mut *join_bus_ptr(bus_data, bus_vtable) };
    let expected_fallthrough = st.pc.wrapping_add(4);
    match step(st, bus) {
        StepOutcome::Normal if st.pc == expected_fallthrough => OUTCOME_NORMAL,
        _ => OUTCOME_REDISPATCH,
    }
}

/// Delivers an exception between quanta (scheduler-sourced) or from a pre-compiled
/// prologue stub (trap/program, system call), per §4.8. `exception_code` is the same
/// numbering [`crate::prologue::ExceptionPrologues`] bakes into each stub's call site:
/// 0 = external interrupt, 1 = decrementer, 2 = system call, 3 = program.
///
/// # Safety
/// Same contract as [`step_trampoline`] for `state`.
pub extern "C" fn deliver_exception_trampoline(state: *mut ArchState, exception_code: u32, return_pc: u32) {
    use powerpc_603e_interp::Exception;
    let st = unsafe { &mut *state };
    let exception = match exception_code {
        0 => Exception::ExternalInterrupt,
        1 => Exception::Decrementer,
        2 => Exception::SystemCall,
        _ => Exception::Program,
    };
    powerpc_603e_interp::system::deliver(exception, return_pc, st);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullBus;
    impl MemoryBus for NullBus {
        fn read8(&mut self, _addr: u32) -> u8 {
            0
        }
        fn read16(&mut self, _addr: u32) -> u16 {
            0
        }
        fn read32(&mut self, _addr: u32) -> u32 {
            0
        }
        fn read64(&mut self, _addr: u32) -> u64 {
            0
        }
        fn write8(&mut self, _addr: u32, _value: u8) {}
        fn write16(&mut self, _addr: u32, _value: u16) {}
        fn write32(&mut self, _addr: u32, _value: u32) {}
        fn write64(&mut self, _addr: u32, _value: u64) {}
    }

    #[test]
    fn bus_pointer_round_trips_through_split_and_join() {
        let mut bus = NullBus;
        let ptr: *mut dyn MemoryBus = &mut bus;
        let (data, vtable) = split_bus_ptr(ptr);
        let rejoined = unsafe { join_bus_ptr(data, vtable) };
        assert_eq!(unsafe { (*rejoined).read32(0) }, 0);
    }

    struct RomBus(Vec<u8>);
    impl MemoryBus for RomBus {
        fn read8(&mut self, addr: u32) -> u8 {
            self.0[addr as usize]
        }
        fn read16(&mut self, addr: u32) -> u16 {
            u16::from_be_bytes([self.0[addr as usize], self.0[addr as usize + 1]])
        }
        fn read32(&mut self, addr: u32) -> u32 {
            u32::from_be_bytes(self.0[addr as usize..addr as usize + 4].try_into().unwrap())
        }
        fn read64(&mut self, addr: u32) -> u64 {
            u64::from(self.read32(addr)) << 32 | u64::from(self.read32(addr + 4))
        }
        fn write8(&mut self, addr: u32, value: u8) {
            self.0[addr as usize] = value;
        }
        fn write16(&mut self, _addr: u32, _value: u16) {}
        fn write32(&mut self, _addr: u32, _value: u32) {}
        fn write64(&mut self, _addr: u32, _value: u64) {}
    }

    #[test]
    fn step_trampoline_reports_normal_for_sequential_instruction() {
        let mut st = ArchState::new();
        // `addi r3, r0, 0x1234` at pc=0: normal fallthrough, no redispatch needed.
        let rom = RomBus(vec![0x38, 0x60, 0x12, 0x34]);
        let mut rom_bus = rom;
        let bus_ptr: *mut dyn MemoryBus = &mut rom_bus;
        let (data, vtable) = split_bus_ptr(bus_ptr);
        let outcome = step_trampoline(&mut st, data, vtable);
        assert_eq!(outcome, OUTCOME_NORMAL);
        assert_eq!(st.gpr[3], 0x1234);
    }

    #[test]
    fn step_trampoline_reports_redispatch_on_branch() {
        let mut st = ArchState::new();
        // `b 0xFF800100` (unconditional, AA=1): pc jumps away from pc+4.
        let rom = RomBus(vec![0x48, 0x00, 0x01, 0x02]); // b +0x100, AA=0, LK=0
        let mut rom_bus = rom;
        let bus_ptr: *mut dyn MemoryBus = &mut rom_bus;
        let (data, vtable) = split_bus_ptr(bus_ptr);
        let outcome = step_trampoline(&mut st, data, vtable);
        assert_eq!(outcome, OUTCOME_REDISPATCH);
        assert_eq!(st.pc, 0x100);
    }
}
