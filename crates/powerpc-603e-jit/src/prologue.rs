//! Pre-compiled native exception-entry stubs, built once at reset, per §4.8.
//!
//! Each stub is a tiny sequence of host instructions compiled into the shared code
//! cache: push the exception code and the return PC, call
//! [`crate::helpers::deliver_exception_trampoline`] (which already implements every bit
//! of §4.8's bookkeeping — SRR0/SRR1, the MSR mask, the IP-relative vector base, the
//! pending-bit clear — exactly as [`powerpc_603e_interp::system::deliver`] does), then
//! return to the caller the same way a normal compiled block does on redispatch, with
//! `OUTCOME_REDISPATCH` left in `eax` so the Rust-level caller resolves the new PC (now
//! pointing at the exception vector) the same way it would after any other block exit.
//!
//! Nothing in this workspace's translator currently jumps into these stubs directly —
//! `tw`/`twi` and `sc`/`rfi` all route through [`crate::helpers::step_trampoline`], whose
//! callee (`powerpc_603e_interp::step`) already calls `system::deliver` itself for those
//! cases, and [`crate::scheduler::Scheduler`]'s own external-interrupt/decrementer
//! delivery runs in plain Rust between quanta and calls
//! [`crate::helpers::deliver_exception_trampoline`] directly rather than jumping through
//! a cache-resident stub it has no generated code to jump from. These stubs exist as the
//! pre-compiled artifact §4.8 asks for; a future inlined trap fast path in the
//! translator would jump here instead of paying a full `step_trampoline` round trip for
//! the common case.

use powerpc_603e_codegen::{CodeCache, CodeCacheError, Emitter, GenOp, Reg};

use crate::helpers;

/// One exception vector's offset into the code cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionPrologues {
    pub external_interrupt: usize,
    pub decrementer: usize,
    pub system_call: usize,
    pub program: usize,
}

const EXTERNAL_INTERRUPT_CODE: u32 = 0;
const DECREMENTER_CODE: u32 = 1;
const SYSTEM_CALL_CODE: u32 = 2;
const PROGRAM_CODE: u32 = 3;

impl ExceptionPrologues {
    /// Compiles the four prologue stubs into `cache`, returning their offsets. Called
    /// once at reset, alongside [`crate::dispatch::DispatchTables::reset`] and
    /// [`powerpc_603e_codegen::CodeCache::reset`] — stale offsets from a previous reset
    /// must never outlive the cache flush that invalidated them.
    ///
    /// # Safety
    /// Same contract as [`powerpc_603e_codegen::CodeCache::commit`]: each stub emitted
    /// here is well-formed x86-32 code ending in an indirect jump.
    pub fn build(cache: &mut CodeCache, state_reg: Reg) -> Result<Self, CodeCacheError> {
        let external_interrupt = Self::build_one(cache, state_reg, EXTERNAL_INTERRUPT_CODE)?;
        let decrementer = Self::build_one(cache, state_reg, DECREMENTER_CODE)?;
        let system_call = Self::build_one(cache, state_reg, SYSTEM_CALL_CODE)?;
        let program = Self::build_one(cache, state_reg, PROGRAM_CODE)?;
        Ok(Self { external_interrupt, decrementer, system_call, program })
    }

    fn build_one(cache: &mut CodeCache, state_reg: Reg, exception_code: u32) -> Result<usize, CodeCacheError> {
        let mut emitter = Emitter::new();
        // return_pc: the caller has already left the faulting instruction's address in
        // state.pc; the trampoline reads it back itself, so the stub only needs to
        // forward the exception code.
        emitter.gen(GenOp::PushI, 0, 0); // return_pc placeholder; trampoline re-reads state.pc
        emitter.gen(GenOp::PushI, exception_code as i32, 0);
        emitter.gen(GenOp::Push, state_reg.code() as i32, 0);
        emitter.gen_call_abs(helpers::deliver_exception_trampoline as usize);
        emitter.gen(GenOp::AddI, Reg::Esp.code() as i32, 12);
        emitter.gen(GenOp::MovI, Reg::Eax.code() as i32, helpers::OUTCOME_REDISPATCH as i32);
        emitter.gen(GenOp::Ret, 0, 0);

        let base = cache.position();
        emitter.relocate_calls(cache.base_ptr() as usize + base);
        let instructions = emitter.instruction_amount();
        // SAFETY: assembled entirely from this function's own `gen*` calls above, ending
        // in the indirect jump to the dispatcher stub.
        unsafe { cache.commit(emitter.code(), instructions) }
    }

    /// A placeholder set of offsets for tests that exercise the scheduler's quantum
    /// accounting without a real code cache. No generated stub ever resolves to these
    /// offsets; nothing jumps into them.
    #[must_use]
    pub fn stub_only() -> Self {
        Self { external_interrupt: 0, decrementer: 0, system_call: 0, program: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_produces_four_distinct_non_overlapping_stubs() {
        let mut cache = CodeCache::new(4096).unwrap();
        let prologues = ExceptionPrologues::build(&mut cache, Reg::Esi).unwrap();
        let mut offsets = [
            prologues.external_interrupt,
            prologues.decrementer,
            prologues.system_call,
            prologues.program,
        ];
        offsets.sort_unstable();
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn stub_only_is_all_zero_and_never_installed_in_a_cache() {
        let prologues = ExceptionPrologues::stub_only();
        assert_eq!(prologues.external_interrupt, 0);
        assert_eq!(prologues.program, 0);
    }
}
