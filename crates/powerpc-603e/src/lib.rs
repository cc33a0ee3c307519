//! `Drc`: the embeddable PowerPC 603e dynamic recompiler, and the single public surface of
//! this workspace.
//!
//! Everything else in the workspace (`powerpc-603e-state`, `-bus`, `-interp`, `-codegen`,
//! `-jit`) is an implementation detail a host application never touches directly; this
//! crate wires them together into the `init`/`reset`/`execute`/debug-accessor contract §6
//! describes and owns the one piece of unsafe plumbing none of the component crates can
//! do on their own: fixing up the absolute addresses the translator bakes into every
//! compiled block once its interior has reached its final heap address (§9, "Global
//! mutable state").

use std::io;

use powerpc_603e_bus::{FetchRegion, FetchTable, MemoryBus};
use powerpc_603e_codegen::{CodeCache, Reg};
use powerpc_603e_jit::dispatch::DispatchTables;
use powerpc_603e_jit::helpers;
use powerpc_603e_jit::prologue::ExceptionPrologues;
use powerpc_603e_jit::scheduler::{NativeBlockRunner, Scheduler};
use powerpc_603e_jit::translator::Translator;
use powerpc_603e_state::model::{decrementer_divider, resolve_pll_config};
use powerpc_603e_state::spr;
use powerpc_603e_state::state::PendingInterrupts;
use powerpc_603e_state::ArchState;

pub use powerpc_603e_state::{CpuModel, DrcConfig, DrcError, Pvr};

/// The register the translator keeps the `ArchState` pointer resident in across a block.
/// Fixed for the lifetime of a `Drc`: every block its `Translator` ever compiles agrees on
/// this register, and `BlockCompiler::compile` loads it from the block's incoming stack
/// argument at entry (§4.4).
const STATE_REG: Reg = Reg::Esi;

/// Everything a `Drc` owns, heap-boxed so the absolute addresses emitted code bakes in
/// (the state pointer, the bus's split fat-pointer halves, `icount`'s address) stay valid
/// even if the `Drc` handle itself is later moved. None of those addresses are taken until
/// `inner` has already reached its final heap allocation inside [`Drc::init`].
struct DrcInner {
    state: ArchState,
    fetch: FetchTable,
    cache: CodeCache,
    tables: DispatchTables,
    scheduler: Scheduler,
    prologues: ExceptionPrologues,
    translator: Translator,
    bus: Box<dyn MemoryBus>,
}

/// The embeddable PowerPC 603e dynamic recompiler.
///
/// `Drc` is `Send` (the embedder may hand it to whichever thread owns the rest of the
/// emulated machine) but not `Sync`: its architectural state, code cache, and dispatch
/// tables are never shared by reference across threads, and the memory bus it owns is the
/// only interface that must do its own locking if other cores run on other threads (§5).
pub struct Drc {
    inner: Box<DrcInner>,
}

impl Drc {
    /// Validates `config`'s processor model and bus/multiplier combination against the PLL
    /// compatibility table, maps the code cache, and compiles the exception prologues.
    /// `bus` is the embedder's memory-mapped device bus; the `Drc` owns it for the rest of
    /// its lifetime so every compiled block can bake in a single fixed pointer to it rather
    /// than re-deriving one on every call (§9).
    ///
    /// "Unsupported PLL configuration" is the only failure this surfaces as a `Result`
    /// (§7a): every other error category can only be detected once compiled code is
    /// already running and goes through [`powerpc_603e_state::fatal`] instead.
    pub fn init(config: DrcConfig, bus: Box<dyn MemoryBus>) -> Result<Self, DrcError> {
        let pll = resolve_pll_config(config.model, config.bus_frequency, config.bus_multiplier).ok_or(
            DrcError::UnsupportedPllConfiguration {
                model: config.model,
                bus_frequency: config.bus_frequency,
                bus_multiplier: config.bus_multiplier,
            },
        )?;
        let dec_divider = decrementer_divider(config.bus_multiplier).max(1);

        let mut state = ArchState::new();
        state.pvr = config.model.pvr().0;
        state.hid1 = u32::from(pll);
        state.reset();

        let mut cache = CodeCache::new(config.code_cache_bytes)
            .map_err(|err| DrcError::CodeCacheAllocation(io::Error::other(err)))?;
        let prologues = ExceptionPrologues::build(&mut cache, STATE_REG)
            .map_err(|err| DrcError::CodeCacheAllocation(io::Error::other(err)))?;

        // Placeholder addresses: fixed up below, once `inner` is boxed and therefore at its
        // final, stable heap location.
        let translator = Translator {
            state_reg: STATE_REG,
            bus_data: 0,
            bus_vtable: 0,
            icount_addr: 0,
            step_trampoline_addr: helpers::step_trampoline as usize,
        };

        let mut inner = Box::new(DrcInner {
            state,
            fetch: FetchTable::new(),
            cache,
            tables: DispatchTables::new(),
            scheduler: Scheduler::new(dec_divider),
            prologues,
            translator,
            bus,
        });

        let icount_addr = inner.scheduler.icount_addr();
        let bus_ptr: *mut dyn MemoryBus = &mut *inner.bus;
        let (bus_data, bus_vtable) = helpers::split_bus_ptr(bus_ptr);
        inner.translator.icount_addr = icount_addr;
        inner.translator.bus_data = bus_data;
        inner.translator.bus_vtable = bus_vtable;

        tracing::info!(
            model = ?config.model,
            bus_frequency = config.bus_frequency,
            bus_multiplier = config.bus_multiplier,
            "drc initialized"
        );
        Ok(Self { inner })
    }

    /// Installs a fetch region backing guest instruction fetch over
    /// `[guest_start, guest_end]` with host memory at `host_ptr`. Typically called once for
    /// ROM and once for RAM right after [`Drc::init`], before the first [`Drc::execute`].
    ///
    /// # Safety
    /// Same contract as [`powerpc_603e_bus::FetchRegion::new`]: `host_ptr` must point at
    /// `guest_end - guest_start + 1` readable bytes, valid for as long as this `Drc` exists.
    pub unsafe fn map_fetch_region(&mut self, guest_start: u32, guest_end: u32, host_ptr: *const u8) {
        let region = unsafe { FetchRegion::new(guest_start, guest_end, host_ptr) };
        self.inner.fetch.install(region);
    }

    /// Architectural reset: clears the code cache and dispatch tables, rebuilds the
    /// exception prologues against the freshly emptied cache, and resets `ArchState` to
    /// `pc = 0xFFF00100`, `msr = 0x40`, `hid0 = 1`. `PVR`/`HID1` (the PLL configuration
    /// `init` validated) are hardware-strapped values and are not touched by a software
    /// reset. Installed fetch regions are untouched; they describe host memory the
    /// embedder owns, not anything this reset is responsible for.
    pub fn reset(&mut self) {
        self.inner.state.reset();
        self.inner.cache.reset();
        self.inner.tables.reset();
        self.inner.prologues = ExceptionPrologues::build(&mut self.inner.cache, STATE_REG)
            .unwrap_or_else(|err| powerpc_603e_state::fatal!("failed to rebuild exception prologues on reset: {err}"));
        self.inner.scheduler.stolen_cycles = 0;
        tracing::info!("drc reset");
    }

    /// Runs up to `cycles` worth of guest instructions, returning the number actually
    /// consumed. May return less than requested when a decrementer or external-interrupt
    /// preemption shortens the quantum (§6's step contract).
    pub fn execute(&mut self, cycles: i64) -> i64 {
        let inner = &mut *self.inner;
        let mut runner =
            NativeBlockRunner { fetch: &mut inner.fetch, cache: &mut inner.cache, translator: &inner.translator };
        inner.scheduler.execute(
            cycles,
            &mut inner.state,
            &mut *inner.bus,
            &mut inner.tables,
            &mut runner,
            &inner.prologues,
        )
    }

    /// External code calls this to assert or deassert the external-interrupt line. When
    /// asserting while `MSR.EE` is set, the remaining quantum is preempted immediately by
    /// zeroing the scheduler's cycle counter, the same cell every compiled block's
    /// cycle-check stub reads, so the next check, wherever it falls, reports the quantum
    /// exhausted (§6).
    pub fn set_irq_line(&mut self, asserted: bool) {
        if asserted {
            self.inner.state.interrupt_pending.set(PendingInterrupts::EXTERNAL);
            if self.inner.state.msr & spr::msr::EE != 0 {
                self.inner.scheduler.icount = 0;
            }
        } else {
            self.inner.state.interrupt_pending.clear(PendingInterrupts::EXTERNAL);
        }
    }

    #[must_use]
    pub fn get_pc(&self) -> u32 {
        self.inner.state.pc
    }

    pub fn set_pc(&mut self, new_pc: u32) {
        self.inner.state.pc = new_pc;
    }

    #[must_use]
    pub fn get_gpr(&self, n: usize) -> u32 {
        self.inner.state.gpr[n]
    }

    pub fn set_gpr(&mut self, n: usize, value: u32) {
        self.inner.state.gpr[n] = value;
    }

    #[must_use]
    pub fn get_fpr(&self, n: usize) -> f64 {
        self.inner.state.fpr[n]
    }

    pub fn set_fpr(&mut self, n: usize, value: f64) {
        self.inner.state.fpr[n] = value;
    }

    #[must_use]
    pub fn get_msr(&self) -> u32 {
        self.inner.state.msr
    }

    /// Applies the same preemption rule `set_irq_line` does: enabling `MSR.EE` while an
    /// interrupt is already pending zeroes the remaining quantum (`ArchState::set_msr`).
    pub fn set_msr(&mut self, value: u32) {
        if self.inner.state.set_msr(value) {
            self.inner.scheduler.icount = 0;
        }
    }

    #[must_use]
    pub fn get_cr(&self) -> u32 {
        self.inner.state.cr_packed()
    }

    pub fn set_cr(&mut self, value: u32) {
        self.inner.state.set_cr_packed(value);
    }

    #[must_use]
    pub fn get_timebase(&self) -> u64 {
        self.inner.state.timebase
    }

    /// Reads a special-purpose register by its architectural number. Aborts on a number
    /// this DRC does not back, the same "unknown SPR access" fatal category a guest
    /// `mfspr` to an unbacked register hits (§7).
    #[must_use]
    pub fn get_spr(&self, number: u32) -> u32 {
        let state = &self.inner.state;
        match number {
            spr::SPR_XER => state.xer,
            spr::SPR_LR => state.lr,
            spr::SPR_CTR => state.ctr,
            spr::SPR_DEC => state.dec,
            spr::SPR_SDR1 => state.sdr1,
            spr::SPR_SRR0 => state.srr0,
            spr::SPR_SRR1 => state.srr1,
            spr::SPR_SPRG0 => state.sprg[0],
            spr::SPR_SPRG1 => state.sprg[1],
            spr::SPR_SPRG2 => state.sprg[2],
            spr::SPR_SPRG3 => state.sprg[3],
            spr::SPR_TBL_R => state.timebase as u32,
            spr::SPR_TBU_R => (state.timebase >> 32) as u32,
            spr::SPR_PVR => state.pvr,
            spr::SPR_HID0 => state.hid0,
            spr::SPR_HID1 => state.hid1,
            spr::SPR_HID2 => state.hid2,
            n => powerpc_603e_state::fatal!("debug read of unknown SPR {n}"),
        }
    }

    pub fn set_spr(&mut self, number: u32, value: u32) {
        let state = &mut self.inner.state;
        match number {
            spr::SPR_XER => state.xer = value,
            spr::SPR_LR => state.lr = value,
            spr::SPR_CTR => state.ctr = value,
            spr::SPR_DEC => state.dec = value,
            spr::SPR_SDR1 => state.sdr1 = value,
            spr::SPR_SRR0 => state.srr0 = value,
            spr::SPR_SRR1 => state.srr1 = value,
            spr::SPR_SPRG0 => state.sprg[0] = value,
            spr::SPR_SPRG1 => state.sprg[1] = value,
            spr::SPR_SPRG2 => state.sprg[2] = value,
            spr::SPR_SPRG3 => state.sprg[3] = value,
            spr::SPR_TBL_W => state.timebase = (state.timebase & 0xFFFF_FFFF_0000_0000) | u64::from(value),
            spr::SPR_TBU_W => state.timebase = (state.timebase & 0x0000_0000_FFFF_FFFF) | (u64::from(value) << 32),
            spr::SPR_HID0 => state.hid0 = value,
            spr::SPR_HID1 => state.hid1 = value,
            spr::SPR_HID2 => state.hid2 = value,
            n => powerpc_603e_state::fatal!("debug write of unknown SPR {n}"),
        }
    }
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

    fn valid_config() -> DrcConfig {
        // bus_frequency=1, bus_multiplier=0x10 (1.0x) resolves per model::resolve_pll_config.
        DrcConfig::new(CpuModel::Mpc603E, 1, 0x10)
    }

    #[test]
    fn init_rejects_unsupported_pll_combination() {
        let config = DrcConfig::new(CpuModel::Mpc603E, 0, 0x05);
        let err = Drc::init(config, Box::new(NullBus)).unwrap_err();
        assert!(matches!(err, DrcError::UnsupportedPllConfiguration { .. }));
    }

    #[test]
    fn init_succeeds_and_reaches_reset_state() {
        let drc = Drc::init(valid_config(), Box::new(NullBus)).unwrap();
        assert_eq!(drc.get_pc(), 0xFFF0_0100);
        assert_eq!(drc.get_msr(), 0x40);
        assert_eq!(drc.get_spr(spr::SPR_HID0), 1);
        assert_eq!(drc.get_spr(spr::SPR_PVR), CpuModel::Mpc603E.pvr().0);
    }

    #[test]
    fn reset_restores_pc_msr_hid0_but_preserves_pvr_and_hid1() {
        let mut drc = Drc::init(valid_config(), Box::new(NullBus)).unwrap();
        let hid1_before = drc.get_spr(spr::SPR_HID1);
        drc.set_pc(0x1234);
        drc.set_msr(0);
        drc.reset();
        assert_eq!(drc.get_pc(), 0xFFF0_0100);
        assert_eq!(drc.get_msr(), 0x40);
        assert_eq!(drc.get_spr(spr::SPR_HID1), hid1_before);
    }

    #[test]
    fn scenario_addi_then_addis_then_branch_to_self() {
        // addi r3,0,0x1234 ; addis r3,r3,0x0001 ; b . (spec §8 scenario 1)
        let rom: Vec<u8> = vec![0x38, 0x60, 0x12, 0x34, 0x3C, 0x63, 0x00, 0x01, 0x48, 0x00, 0x00, 0x00];
        let mut drc = Drc::init(valid_config(), Box::new(NullBus)).unwrap();
        unsafe {
            drc.map_fetch_region(0xFFF0_0100, 0xFFF0_0100 + rom.len() as u32 - 1, rom.as_ptr());
        }
        let consumed = drc.execute(3);
        assert_eq!(drc.get_gpr(3), 0x0001_1234);
        assert_eq!(drc.get_pc(), 0xFFF0_0100 + 8); // the unreached "b ." instruction's address
        assert_eq!(consumed, 3);
    }

    #[test]
    fn scenario_mflr_then_branch_to_self() {
        // mflr r5 ; b . (spec §8 scenario 2)
        let rom: Vec<u8> = vec![0x7C, 0xA8, 0x02, 0xA6, 0x48, 0x00, 0x00, 0x00];
        let mut drc = Drc::init(valid_config(), Box::new(NullBus)).unwrap();
        unsafe {
            drc.map_fetch_region(0xFFF0_0200, 0xFFF0_0200 + rom.len() as u32 - 1, rom.as_ptr());
        }
        drc.set_pc(0xFFF0_0200);
        drc.set_spr(spr::SPR_LR, 0xDEAD_BEEF);
        let consumed = drc.execute(2);
        assert_eq!(drc.get_gpr(5), 0xDEAD_BEEF);
        assert_eq!(drc.get_spr(spr::SPR_LR), 0xDEAD_BEEF);
        assert_eq!(consumed, 2);
    }

    #[test]
    fn set_irq_line_preempts_and_delivers_before_any_instruction_runs() {
        let mut drc = Drc::init(valid_config(), Box::new(NullBus)).unwrap();
        let vector = 0xFFF0_0000 + spr::vector::EXTERNAL_INTERRUPT;
        // b . at the vector itself, so the quantum the delivery runs into has somewhere
        // mapped to fetch from.
        let rom: Vec<u8> = vec![0x48, 0x00, 0x00, 0x00];
        unsafe {
            drc.map_fetch_region(vector, vector + rom.len() as u32 - 1, rom.as_ptr());
        }
        drc.set_msr(spr::msr::EE | spr::msr::IP);
        drc.set_irq_line(true);
        drc.execute(1);
        assert_eq!(drc.get_pc(), vector);
    }
}
