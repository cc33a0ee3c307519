//! Owns the cycle counter and pre-scheduled decrementer bookkeeping described in §4.7,
//! and implements the quantum loop exactly.
//!
//! Running a quantum's worth of translated blocks is abstracted behind [`BlockRunner`]
//! so the accounting in [`Scheduler::execute`] can be tested without actually jumping
//! into JIT-emitted machine code: [`NativeBlockRunner`] is the real implementation used
//! by the facade crate, and tests substitute a fake that drives `icount` down directly,
//! the same way a real translated block's cycle-check stub would.

use powerpc_603e_bus::{FetchTable, MemoryBus};
use powerpc_603e_codegen::CodeCache;
use powerpc_603e_interp::Exception;
use powerpc_603e_state::ArchState;

use crate::block::BlockCompiler;
use crate::dispatch::{DispatchTables, Slot};
use crate::helpers::{self, OUTCOME_EXHAUSTED};
use crate::prologue::ExceptionPrologues;
use crate::translator::Translator;

/// What happened when [`BlockRunner::run_quantum`] returned control to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantumOutcome {
    /// `icount` reached zero; the quantum ran to completion.
    Exhausted,
    /// The guest hit an address the dispatch tables report as unmapped mid-quantum,
    /// the §7 fatal-fetch category, already raised by the caller via
    /// [`powerpc_603e_state::fatal`] before this is ever returned in practice.
    UnmappedFetch,
}

/// Runs translated blocks, chaining through as many as fit in the remaining `icount`,
/// until `icount` reaches zero. A single compiled block never jumps to another block
/// natively: it always returns to its caller after one redispatch-worthy event (cycle
/// exhaustion, or a guest instruction that changed PC away from the statically known
/// fallthrough), so implementations of this trait own the "look the new PC up, compile
/// it if needed, call back in" loop in Rust.
pub trait BlockRunner {
    fn run_quantum(
        &mut self,
        state: &mut ArchState,
        bus: &mut dyn MemoryBus,
        tables: &mut DispatchTables,
        icount: &mut i32,
    ) -> QuantumOutcome;
}

/// The real runner. Owns the pieces needed to compile a block on first use
/// ([`FetchTable`], [`CodeCache`], [`Translator`]) and, once compiled, to call straight
/// into the cache: the block's exported entry point is transmuted from the cache's base
/// address plus the dispatch table's recorded offset.
pub struct NativeBlockRunner<'a> {
    pub fetch: &'a mut FetchTable,
    pub cache: &'a mut CodeCache,
    pub translator: &'a Translator,
}

impl BlockRunner for NativeBlockRunner<'_> {
    fn run_quantum(
        &mut self,
        state: &mut ArchState,
        bus: &mut dyn MemoryBus,
        tables: &mut DispatchTables,
        icount: &mut i32,
    ) -> QuantumOutcome {
        type BlockEntry = extern "C" fn(*mut ArchState, usize, usize) -> u32;

        while *icount > 0 {
            let offset = match tables.lookup(state.pc) {
                Slot::Block(offset) => offset,
                Slot::CompileStub => {
                    let mut compiler = BlockCompiler {
                        fetch: &mut *self.fetch,
                        tables: &mut *tables,
                        cache: &mut *self.cache,
                        translator: self.translator,
                    };
                    match compiler.compile(state.pc) {
                        Ok(block) => block.host_entry,
                        Err(err) => {
                            powerpc_603e_state::fatal!("block compilation failed at pc={:#010x}: {err:?}", state.pc);
                        }
                    }
                }
                Slot::Invalid => {
                    powerpc_603e_state::fatal!("fetch from unmapped region at pc={:#010x}", state.pc);
                }
            };

            let (bus_data, bus_vtable) = helpers::split_bus_ptr(&mut *bus);
            // SAFETY: `offset` came from either a prior `DispatchTables::install` call or
            // the `BlockCompiler::compile` call just above, both of which only record
            // offsets `CodeCache::commit` returned for well-formed x86-32 blocks in this
            // exact cache; `icount` is the same cell `self.translator` baked in as
            // `icount_addr`, so the block's internal decrements land here.
            let entry_ptr = unsafe { self.cache.base_ptr().add(offset) };
            let block_fn: BlockEntry = unsafe { std::mem::transmute::<*const u8, BlockEntry>(entry_ptr) };
            let outcome = block_fn(&mut *state, bus_data, bus_vtable);
            if outcome == OUTCOME_EXHAUSTED {
                break;
            }
            // OUTCOME_REDISPATCH: state.pc has moved; loop around and resolve it.
        }
        QuantumOutcome::Exhausted
    }
}

/// `icount`/`stolen_cycles`/pre-scheduled decrementer bookkeeping (§4.7). `icount` lives
/// at a stable address (`self.icount_addr()`) so translated code's cycle-check stubs,
/// baked with that address at compile time, decrement the same cell this struct reads
/// back after each quantum.
pub struct Scheduler {
    pub icount: i32,
    pub stolen_cycles: i64,
    pub dec_divider: u32,
}

impl Scheduler {
    #[must_use]
    pub fn new(dec_divider: u32) -> Self {
        Self { icount: 0, stolen_cycles: 0, dec_divider }
    }

    /// The absolute address [`crate::translator::Translator::icount_addr`] must be
    /// constructed with, so every compiled block's cycle-check stub decrements this
    /// exact cell.
    #[must_use]
    pub fn icount_addr(&mut self) -> usize {
        std::ptr::from_mut(&mut self.icount) as usize
    }

    /// Implements the §4.7 quantum loop for a `requested` cycle budget. Returns the
    /// number of cycles actually consumed, which may be less than `requested` on
    /// preemption. `runner` executes compiled blocks for each quantum; `prologues` is
    /// currently unused by this Rust-level delivery path (kept for symmetry with the
    /// cache-resident stubs it also builds) but is threaded through so callers that add
    /// an inlined trap fast path later have it in scope without a signature change.
    pub fn execute<R: BlockRunner>(
        &mut self,
        requested: i64,
        state: &mut ArchState,
        bus: &mut dyn MemoryBus,
        tables: &mut DispatchTables,
        runner: &mut R,
        prologues: &ExceptionPrologues,
    ) -> i64 {
        let _ = prologues;
        let mut consumed: i64 = 0;
        while consumed < requested {
            let remaining = requested - consumed;
            let dec_cycles_left = i64::from(state.dec) * i64::from(self.dec_divider.max(1));
            let (quantum, dec_fires) = if dec_cycles_left >= 0 && dec_cycles_left < remaining {
                // `.max(1)` guarantees forward progress: a decrementer already due right now
                // (`dec_cycles_left == 0`, e.g. a freshly reset core) must still run at least
                // one cycle instead of handing back a zero-length quantum forever, which would
                // stall `execute` whenever MSR.EE is clear and nothing ever delivers it.
                (dec_cycles_left.max(1), true)
            } else {
                (remaining.min(i64::from(i32::MAX)), false)
            };

            if state.msr & powerpc_603e_state::spr::msr::EE != 0 {
                if state.interrupt_pending.is_set(powerpc_603e_state::state::PendingInterrupts::EXTERNAL) {
                    self.deliver_scheduler_exception(Exception::ExternalInterrupt, state);
                    state.interrupt_pending.clear(powerpc_603e_state::state::PendingInterrupts::EXTERNAL);
                } else if state.interrupt_pending.is_set(powerpc_603e_state::state::PendingInterrupts::DECREMENTER) {
                    self.deliver_scheduler_exception(Exception::Decrementer, state);
                    state.interrupt_pending.clear(powerpc_603e_state::state::PendingInterrupts::DECREMENTER);
                }
            }

            self.icount = quantum.max(0) as i32;
            runner.run_quantum(state, bus, tables, &mut self.icount);

            let ran = i64::from(quantum.max(0) as i32 - self.icount.max(0));
            consumed += ran;
            self.stolen_cycles += i64::from(self.icount.max(0));

            advance_timebase(state, ran, self.dec_divider.max(1));

            if dec_fires && ran >= quantum {
                state.interrupt_pending.set(powerpc_603e_state::state::PendingInterrupts::DECREMENTER);
            }

            if ran == 0 {
                break;
            }
        }
        consumed
    }

    fn deliver_scheduler_exception(&self, exception: Exception, state: &mut ArchState) {
        let code = match exception {
            Exception::ExternalInterrupt => 0,
            Exception::Decrementer => 1,
            _ => unreachable!("scheduler only delivers external/decrementer exceptions"),
        };
        helpers::deliver_exception_trampoline(std::ptr::from_mut(state), code, state.pc);
    }
}

fn advance_timebase(state: &mut ArchState, cycles: i64, divider: u32) {
    let ticks = cycles / i64::from(divider);
    state.timebase = state.timebase.wrapping_add(ticks as u64);
    state.dec = state.dec.wrapping_sub(ticks as u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingRunner {
        decrement_per_call: i32,
    }
    impl BlockRunner for CountingRunner {
        fn run_quantum(
            &mut self,
            _state: &mut ArchState,
            _bus: &mut dyn MemoryBus,
            _tables: &mut DispatchTables,
            icount: &mut i32,
        ) -> QuantumOutcome {
            *icount -= self.decrement_per_call.min(*icount);
            QuantumOutcome::Exhausted
        }
    }

    struct NullBus;
    impl MemoryBus for NullBus {
        fn read8(&mut self, _a: u32) -> u8 {
            0
        }
        fn read16(&mut self, _a: u32) -> u16 {
            0
        }
        fn read32(&mut self, _a: u32) -> u32 {
            0
        }
        fn read64(&mut self, _a: u32) -> u64 {
            0
        }
        fn write8(&mut self, _a: u32, _v: u8) {}
        fn write16(&mut self, _a: u32, _v: u16) {}
        fn write32(&mut self, _a: u32, _v: u32) {}
        fn write64(&mut self, _a: u32, _v: u64) {}
    }

    #[test]
    fn full_quantum_consumes_exactly_requested_cycles() {
        let mut scheduler = Scheduler::new(4);
        let mut state = ArchState::new();
        state.dec = u32::MAX; // far from firing
        let mut bus = NullBus;
        let mut tables = DispatchTables::new();
        let prologues = ExceptionPrologues::stub_only();
        let mut runner = CountingRunner { decrement_per_call: i32::MAX };

        let consumed = scheduler.execute(100, &mut state, &mut bus, &mut tables, &mut runner, &prologues);
        assert_eq!(consumed, 100);
    }

    #[test]
    fn timebase_advances_by_consumed_over_four() {
        let mut scheduler = Scheduler::new(4);
        let mut state = ArchState::new();
        state.dec = u32::MAX;
        let mut bus = NullBus;
        let mut tables = DispatchTables::new();
        let prologues = ExceptionPrologues::stub_only();
        let mut runner = CountingRunner { decrement_per_call: i32::MAX };

        scheduler.execute(40, &mut state, &mut bus, &mut tables, &mut runner, &prologues);
        assert_eq!(state.timebase, 10);
    }

    #[test]
    fn decrementer_expiry_shortens_the_quantum_and_sets_the_pending_bit() {
        let mut scheduler = Scheduler::new(4);
        let mut state = ArchState::new();
        state.dec = 3; // fires after 3*4 = 12 cycles
        state.msr = powerpc_603e_state::spr::msr::EE;
        let mut bus = NullBus;
        let mut tables = DispatchTables::new();
        let prologues = ExceptionPrologues::stub_only();
        let mut runner = CountingRunner { decrement_per_call: i32::MAX };

        scheduler.execute(20, &mut state, &mut bus, &mut tables, &mut runner, &prologues);
        assert!(state.interrupt_pending.is_set(powerpc_603e_state::state::PendingInterrupts::DECREMENTER));
    }
}
