/// A contiguous span of guest address space backed directly by host memory, usable for
/// instruction fetch. `host_ptr` must remain valid for as long as the region is installed
/// in a [`FetchTable`]; this is the same contract the original recompiler's
/// `PPC_FETCH_REGION` array carried (a `NULL`-backed pointer there, an always-valid
/// pointer and an explicit lifetime obligation here).
#[derive(Debug, Clone, Copy)]
pub struct FetchRegion {
    pub guest_start: u32,
    pub guest_end: u32,
    host_ptr: *const u8,
}

impl FetchRegion {
    /// # Safety
    /// `host_ptr` must point to at least `guest_end - guest_start + 1` readable bytes,
    /// valid for the entire time this region remains installed in a [`FetchTable`].
    #[must_use]
    pub const unsafe fn new(guest_start: u32, guest_end: u32, host_ptr: *const u8) -> Self {
        Self { guest_start, guest_end, host_ptr }
    }

    #[must_use]
    pub fn contains(&self, address: u32) -> bool {
        self.guest_start <= address && address <= self.guest_end
    }

    /// Host byte address instruction fetch should read four bytes from for `address`.
    ///
    /// # Safety
    /// Caller must have already checked [`FetchRegion::contains`] for `address`.
    #[must_use]
    pub unsafe fn translate(&self, address: u32) -> *const u8 {
        unsafe { self.host_ptr.add((address - self.guest_start) as usize) }
    }
}

/// The table of fetch regions the embedder installs (typically one covering ROM, one
/// covering RAM). Caches the most recently hit region the way `ppc.cur_fetch` did, since
/// instruction fetch overwhelmingly stays within the same region from one instruction to
/// the next.
#[derive(Debug, Default)]
pub struct FetchTable {
    regions: Vec<FetchRegion>,
    cached: Option<FetchRegion>,
}

impl FetchTable {
    #[must_use]
    pub fn new() -> Self {
        Self { regions: Vec::new(), cached: None }
    }

    pub fn install(&mut self, region: FetchRegion) {
        self.regions.push(region);
    }

    /// Resolves `address` to a host pointer, or `None` if no installed region backs it
    /// (the caller then routes to the fatal "fetch from unmapped region" path).
    pub fn resolve(&mut self, address: u32) -> Option<*const u8> {
        if let Some(region) = self.cached {
            if region.contains(address) {
                return Some(unsafe { region.translate(address) });
            }
        }
        for region in &self.regions {
            if region.contains(address) {
                self.cached = Some(*region);
                return Some(unsafe { region.translate(address) });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{FetchRegion, FetchTable};

    #[test]
    fn resolves_within_installed_region() {
        let backing = [0u8; 16];
        let region = unsafe { FetchRegion::new(0x1000, 0x100F, backing.as_ptr()) };
        let mut table = FetchTable::new();
        table.install(region);
        assert!(table.resolve(0x1004).is_some());
        assert!(table.resolve(0x2000).is_none());
    }

    #[test]
    fn caches_most_recent_hit() {
        let a = [0u8; 4];
        let b = [0u8; 4];
        let region_a = unsafe { FetchRegion::new(0, 3, a.as_ptr()) };
        let region_b = unsafe { FetchRegion::new(0x1000, 0x1003, b.as_ptr()) };
        let mut table = FetchTable::new();
        table.install(region_a);
        table.install(region_b);
        assert!(table.resolve(1).is_some());
        assert!(table.resolve(0x1001).is_some());
    }
}
