//! Two-level address-indexed lookup from guest PC to translated native entry point,
//! matching §4.6: a 512-entry top table striping the 32-bit guest address space into
//! 8 MiB spans, with the RAM and ROM spans backed by dedicated 2 Mi-entry sub-tables
//! (one slot per four-byte instruction) and every other span sharing a read-only
//! "invalid" sub-table whose slots never resolve to a translated block.

/// Number of 8 MiB strides covering the full 32-bit guest address space.
pub const TOP_TABLE_ENTRIES: usize = 512;
/// Size in bytes of one top-level stride.
pub const STRIDE_BYTES: u32 = 1 << 23;
/// Entries in a real (RAM/ROM) sub-table: one per four-byte instruction in an 8 MiB stride.
pub const SUB_TABLE_ENTRIES: usize = 1 << 21;

pub const RAM_BASE: u32 = 0x0000_0000;
pub const RAM_SIZE: u32 = 8 * 1024 * 1024;
pub const ROM_BASE: u32 = 0xFF80_0000;
pub const ROM_SIZE: u32 = 8 * 1024 * 1024;

const RAM_STRIDE: u32 = RAM_BASE / STRIDE_BYTES;
const ROM_STRIDE: u32 = ROM_BASE / STRIDE_BYTES;

/// What a dispatch-table slot resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// No block has been compiled at this address yet; the block compiler must run.
    CompileStub,
    /// This address does not fall in the RAM or ROM execute windows; fetching here is
    /// fatal (§7's "fetch from unmapped region").
    Invalid,
    /// A translated block begins at this address; the value is its offset into the
    /// shared code cache.
    Block(usize),
}

fn region_of(addr: u32) -> Option<(u32, usize)> {
    let stride = addr / STRIDE_BYTES;
    if stride == RAM_STRIDE {
        Some((RAM_BASE, ((addr - RAM_BASE) >> 2) as usize))
    } else if stride == ROM_STRIDE {
        Some((ROM_BASE, ((addr - ROM_BASE) >> 2) as usize))
    } else {
        None
    }
}

/// Owns the RAM and ROM sub-tables. A third, conceptually all-invalid sub-table needs no
/// storage here: any address outside the RAM/ROM windows simply resolves to
/// [`Slot::Invalid`] without an array lookup at all, since every one of its conceptual
/// slots holds the same value.
#[derive(Debug)]
pub struct DispatchTables {
    ram: Vec<Slot>,
    rom: Vec<Slot>,
}

impl Default for DispatchTables {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchTables {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ram: vec![Slot::CompileStub; SUB_TABLE_ENTRIES],
            rom: vec![Slot::CompileStub; SUB_TABLE_ENTRIES],
        }
    }

    /// Resolves `addr` to its current slot. Addresses outside the RAM/ROM execute
    /// windows, or misaligned to a four-byte instruction boundary, are always
    /// [`Slot::Invalid`].
    #[must_use]
    pub fn lookup(&self, addr: u32) -> Slot {
        if addr % 4 != 0 {
            return Slot::Invalid;
        }
        match region_of(addr) {
            Some((RAM_BASE, index)) => self.ram[index],
            Some((_, index)) => self.rom[index],
            None => Slot::Invalid,
        }
    }

    /// Installs `slot` at `addr`. Panics if `addr` does not fall in the RAM or ROM
    /// execute windows; the block compiler never attempts to register a block outside
    /// them (blocks never span a region boundary, per §4.5).
    pub fn install(&mut self, addr: u32, slot: Slot) {
        match region_of(addr) {
            Some((RAM_BASE, index)) => self.ram[index] = slot,
            Some((_, index)) => self.rom[index] = slot,
            None => panic!("attempted to install a dispatch slot at unmapped address {addr:#010x}"),
        }
    }

    /// Resets both sub-tables to [`Slot::CompileStub`], matching reset's "dispatch
    /// tables reinitialized wholesale" behavior. The code cache itself is reset
    /// separately by the owning `Drc`.
    pub fn reset(&mut self) {
        self.ram.fill(Slot::CompileStub);
        self.rom.fill(Slot::CompileStub);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tables_start_at_compile_stub() {
        let tables = DispatchTables::new();
        assert_eq!(tables.lookup(RAM_BASE), Slot::CompileStub);
        assert_eq!(tables.lookup(ROM_BASE + 0x100), Slot::CompileStub);
    }

    #[test]
    fn addresses_outside_ram_and_rom_are_invalid() {
        let tables = DispatchTables::new();
        assert_eq!(tables.lookup(0x1000_0000), Slot::Invalid);
        assert_eq!(tables.lookup(0xF000_0000), Slot::Invalid);
    }

    #[test]
    fn misaligned_address_is_invalid() {
        let tables = DispatchTables::new();
        assert_eq!(tables.lookup(RAM_BASE + 1), Slot::Invalid);
    }

    #[test]
    fn install_and_lookup_round_trip() {
        let mut tables = DispatchTables::new();
        tables.install(RAM_BASE + 0x40, Slot::Block(0x1234));
        assert_eq!(tables.lookup(RAM_BASE + 0x40), Slot::Block(0x1234));
        assert_eq!(tables.lookup(RAM_BASE + 0x44), Slot::CompileStub);
    }

    #[test]
    fn reset_restores_compile_stub_everywhere() {
        let mut tables = DispatchTables::new();
        tables.install(ROM_BASE, Slot::Block(7));
        tables.reset();
        assert_eq!(tables.lookup(ROM_BASE), Slot::CompileStub);
    }

    #[test]
    #[should_panic(expected = "unmapped address")]
    fn install_outside_ram_rom_panics() {
        let mut tables = DispatchTables::new();
        tables.install(0x5000_0000, Slot::Block(0));
    }
}
