//! Walks the guest instruction stream from a starting PC, translating one instruction at
//! a time until a control-flow boundary, then commits the assembled block to the code
//! cache and registers its entry point in the dispatch tables. Matches §4.5 exactly.

use powerpc_603e_bus::FetchTable;
use powerpc_603e_codegen::{CodeCache, CodeCacheError, Emitter, Reg};

use crate::dispatch::{DispatchTables, Slot};
use crate::translator::{is_block_end, Translator};

/// A compiled block's bookkeeping, returned to the caller after [`BlockCompiler::compile`]
/// for diagnostics (`tracing` events) and testing; the dispatch-table slot is the only
/// copy anything downstream actually needs.
#[derive(Debug, Clone, Copy)]
pub struct CompiledBlock {
    pub guest_start: u32,
    pub host_entry: usize,
    pub instruction_count: u32,
}

#[derive(Debug)]
pub enum CompileError {
    /// The block compiler tried to fetch from an address with no installed
    /// [`powerpc_603e_bus::FetchRegion`], the "fetch from unmapped region" category of §7.
    UnmappedFetch(u32),
    Cache(CodeCacheError),
}

pub struct BlockCompiler<'a> {
    pub fetch: &'a mut FetchTable,
    pub tables: &'a mut DispatchTables,
    pub cache: &'a mut CodeCache,
    pub translator: &'a Translator,
}

impl BlockCompiler<'_> {
    /// Compiles the block starting at `guest_start`. Installs the dispatch-table slot for
    /// `guest_start` to the returned block's entry before translating a single
    /// instruction (§4.5 step 1: "install the current cache write pointer into the
    /// dispatch slot for the current PC"), though here the install happens once the
    /// whole block's bytes are known, since this crate relocates `CALLI` fixups against
    /// the block's final cache offset rather than writing through a live pointer mid-emit.
    pub fn compile(&mut self, guest_start: u32) -> Result<CompiledBlock, CompileError> {
        let mut emitter = Emitter::new();
        // Every block is an `extern "C" fn(*mut ArchState, usize, usize) -> u32` under the
        // cdecl convention `NativeBlockRunner` calls through, so the incoming state pointer
        // sits at [esp+4] at entry. Load it into the register the translator's per-instruction
        // sequences assume stays resident for the rest of the block.
        emitter.gen_mov_dpr_to_reg(self.translator.state_reg, 4, Reg::Esp);
        let mut pc = guest_start;
        loop {
            let host_ptr = self.fetch.resolve(pc).ok_or(CompileError::UnmappedFetch(pc))?;
            let op = u32::from_be_bytes(unsafe { *host_ptr.cast::<[u8; 4]>() });
            self.translator.translate(&mut emitter, op, pc);
            let ends_block = is_block_end(op);
            pc = pc.wrapping_add(4);
            if ends_block {
                break;
            }
        }

        let block_base = self.cache.position();
        emitter.relocate_calls(self.cache.base_ptr() as usize + block_base);
        let instructions = emitter.instruction_amount();
        // SAFETY: `emitter`'s buffer was assembled entirely from this translator's own
        // `gen*` calls, each of which emits a complete, well-formed x86-32 instruction,
        // and the block always ends in a control-transfer sequence (the cycle check's
        // conditional jump plus the final redispatch jump emitted for the block-ending
        // instruction).
        let offset = unsafe { self.cache.commit(emitter.code(), instructions) }.map_err(CompileError::Cache)?;

        self.tables.install(guest_start, Slot::Block(offset));
        Ok(CompiledBlock { guest_start, host_entry: offset, instruction_count: instructions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use powerpc_603e_bus::FetchRegion;
    use powerpc_603e_codegen::Reg;

    fn translator_for() -> Translator {
        Translator {
            state_reg: Reg::Esi,
            bus_data: 0x2000,
            bus_vtable: 0x2008,
            icount_addr: 0x3000,
            step_trampoline_addr: crate::helpers::step_trampoline as usize,
        }
    }

    #[test]
    fn compile_stops_at_unconditional_branch() {
        // addi r3,0,0x1234 ; b . (branch to itself, AA=0 so LI = 0 means same address)
        let rom: Vec<u8> = vec![0x38, 0x60, 0x12, 0x34, 0x48, 0x00, 0x00, 0x00];
        let mut fetch = FetchTable::new();
        let region = unsafe { FetchRegion::new(0x1000, 0x1007, rom.as_ptr()) };
        fetch.install(region);
        let mut tables = DispatchTables::new();
        let mut cache = CodeCache::new(4096).unwrap();
        let translator = translator_for();

        let mut compiler =
            BlockCompiler { fetch: &mut fetch, tables: &mut tables, cache: &mut cache, translator: &translator };
        let block = compiler.compile(0x1000).unwrap();
        assert_eq!(block.guest_start, 0x1000);
        // block-entry prologue plus two guest instructions: addi (cycle check + call-through)
        // and b (cycle check + redispatch jump)
        assert!(block.instruction_count >= 2);
        assert!(matches!(tables.lookup(0x1000), Slot::Block(_)));
    }

    #[test]
    fn compile_reports_unmapped_fetch() {
        let mut fetch = FetchTable::new();
        let mut tables = DispatchTables::new();
        let mut cache = CodeCache::new(4096).unwrap();
        let translator = translator_for();
        let mut compiler =
            BlockCompiler { fetch: &mut fetch, tables: &mut tables, cache: &mut cache, translator: &translator };
        assert!(matches!(compiler.compile(0x1000), Err(CompileError::UnmappedFetch(0x1000))));
    }
}
