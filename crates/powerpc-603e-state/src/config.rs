use crate::model::CpuModel;

/// Default size of the JIT code cache: a single contiguous executable mapping, sized to
/// comfortably hold the compiled translation of a full Model 3 boot-to-attract-mode run.
pub const DEFAULT_CODE_CACHE_BYTES: usize = 8 * 1024 * 1024;

/// Typed argument to the DRC's init contract.
///
/// `bus_frequency` indexes the processor's PLL compatibility table; `bus_multiplier` is
/// the packed BCD-like byte (`high nibble . low nibble` as whole-part/tenths) the original
/// `PPC_CONFIG::bus_frequency_multiplier` field used, e.g. `0x40` means a 4.0x multiplier.
#[derive(Debug, Clone, Copy)]
pub struct DrcConfig {
    pub model: CpuModel,
    pub bus_frequency: u8,
    pub bus_multiplier: u8,
    pub code_cache_bytes: usize,
}

impl DrcConfig {
    #[must_use]
    pub fn new(model: CpuModel, bus_frequency: u8, bus_multiplier: u8) -> Self {
        Self {
            model,
            bus_frequency,
            bus_multiplier,
            code_cache_bytes: DEFAULT_CODE_CACHE_BYTES,
        }
    }

    #[must_use]
    pub fn with_code_cache_bytes(mut self, bytes: usize) -> Self {
        self.code_cache_bytes = bytes;
        self
    }
}
