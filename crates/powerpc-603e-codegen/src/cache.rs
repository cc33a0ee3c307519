//! Executable code cache backing the translated-block output. Mirrors
//! `gen_reset_cache`/`gen_get_cache_pos`/`gen_get_instruction_amount`: one big
//! read/write/exec region the block compiler appends into, reset wholesale when it fills
//! (the original recompiler has no per-block eviction, only a full-cache flush).

use std::io;

use mmap_rs::{MmapFlags, MmapMut, MmapOptions};

/// A full-cache-flush error: the configured cache size was too small for even one
/// translated block, or the host failed to map executable memory at all.
#[derive(Debug)]
pub enum CodeCacheError {
    Io(io::Error),
    BlockTooLarge { block_bytes: usize, cache_bytes: usize },
}

impl std::fmt::Display for CodeCacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to map executable code cache: {err}"),
            Self::BlockTooLarge { block_bytes, cache_bytes } => write!(
                f,
                "translated block ({block_bytes} bytes) does not fit in the {cache_bytes}-byte code cache"
            ),
        }
    }
}

impl std::error::Error for CodeCacheError {}

/// Owns the mapped executable memory and the write cursor into it. Code is assembled in
/// an [`crate::Emitter`]'s plain `Vec<u8>` first and copied in wholesale once a block is
/// complete.
///
/// The region is mapped read+write+exec in a single call, the same way the original
/// recompiler's `gen_init` allocates its code cache in one shot rather than flipping
/// page protections per commit; this workspace carries that same simplification forward.
pub struct CodeCache {
    mem: MmapMut,
    capacity: usize,
    used: usize,
    instruction_count: u32,
}

impl CodeCache {
    pub fn new(capacity_bytes: usize) -> Result<Self, CodeCacheError> {
        let mem = MmapOptions::new(capacity_bytes)
            .map_err(|e| CodeCacheError::Io(io::Error::other(e)))?
            .with_flags(MmapFlags::EXEC)
            .map_mut()
            .map_err(|e| CodeCacheError::Io(io::Error::other(e)))?;
        Ok(Self { mem, capacity: capacity_bytes, used: 0, instruction_count: 0 })
    }

    #[must_use]
    pub fn base_ptr(&self) -> *const u8 {
        self.mem.as_ptr()
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.used
    }

    #[must_use]
    pub fn instruction_amount(&self) -> u32 {
        self.instruction_count
    }

    /// Copies `block` in at the current write cursor and returns its start offset. The
    /// memory is executable but not writable on most platforms, so patching an
    /// already-committed block in place is not supported; the translator must finish
    /// assembling a block in its [`crate::Emitter`] buffer before calling this.
    ///
    /// # Safety
    /// `block` must be valid x86-32 machine code ending in a control-flow instruction
    /// (the translator never falls off the end of a translated block); writing
    /// non-instruction bytes into executable memory and later jumping into it is
    /// undefined behavior.
    pub unsafe fn commit(&mut self, block: &[u8], instructions: u32) -> Result<usize, CodeCacheError> {
        if self.used + block.len() > self.capacity {
            return Err(CodeCacheError::BlockTooLarge {
                block_bytes: block.len(),
                cache_bytes: self.capacity,
            });
        }
        let start = self.used;
        let dst = self.mem.as_ptr().cast_mut().add(start);
        std::ptr::copy_nonoverlapping(block.as_ptr(), dst, block.len());
        self.used += block.len();
        self.instruction_count += instructions;
        Ok(start)
    }

    /// `gen_reset_cache`: drops every translated block and dispatch-table entry pointing
    /// into this cache. The JIT's dispatch tables must be reset to "untranslated" in the
    /// same call, since this does not zero the underlying bytes, only the write cursor.
    pub fn reset(&mut self) {
        self.used = 0;
        self.instruction_count = 0;
    }
}
