//! Load and store instructions. Effective-address computation follows the PowerPC rule
//! that `RA == 0` means "no base register" (literal zero) for the non-indexed, non-update
//! forms; update forms (`...u`) always use a real base register and write the computed
//! address back to it after a successful access.

use powerpc_603e_bus::MemoryBus;
use powerpc_603e_state::ArchState;

use crate::decode::*;

fn ea_disp(op: u32, st: &ArchState) -> u32 {
    let base = if ra(op) == 0 { 0 } else { st.gpr[ra(op)] };
    base.wrapping_add(simm16(op) as u32)
}

fn ea_disp_update(op: u32, st: &ArchState) -> u32 {
    st.gpr[ra(op)].wrapping_add(simm16(op) as u32)
}

fn ea_indexed(op: u32, st: &ArchState) -> u32 {
    let base = if ra(op) == 0 { 0 } else { st.gpr[ra(op)] };
    base.wrapping_add(st.gpr[rb(op)])
}

pub fn lbz(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp(op, st);
    st.gpr[rd(op)] = u32::from(bus.read8(addr));
}

pub fn lbzu(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp_update(op, st);
    st.gpr[rd(op)] = u32::from(bus.read8(addr));
    st.gpr[ra(op)] = addr;
}

pub fn lbzx(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    st.gpr[rd(op)] = u32::from(bus.read8(addr));
}

pub fn lbzux(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    st.gpr[rd(op)] = u32::from(bus.read8(addr));
    st.gpr[ra(op)] = addr;
}

pub fn lhz(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp(op, st);
    st.gpr[rd(op)] = u32::from(bus.read16(addr));
}

pub fn lhzu(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp_update(op, st);
    st.gpr[rd(op)] = u32::from(bus.read16(addr));
    st.gpr[ra(op)] = addr;
}

pub fn lhzx(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    st.gpr[rd(op)] = u32::from(bus.read16(addr));
}

pub fn lhzux(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    st.gpr[rd(op)] = u32::from(bus.read16(addr));
    st.gpr[ra(op)] = addr;
}

pub fn lha(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp(op, st);
    st.gpr[rd(op)] = (bus.read16(addr) as i16) as i32 as u32;
}

pub fn lhau(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp_update(op, st);
    st.gpr[rd(op)] = (bus.read16(addr) as i16) as i32 as u32;
    st.gpr[ra(op)] = addr;
}

pub fn lhax(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    st.gpr[rd(op)] = (bus.read16(addr) as i16) as i32 as u32;
}

pub fn lhaux(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    st.gpr[rd(op)] = (bus.read16(addr) as i16) as i32 as u32;
    st.gpr[ra(op)] = addr;
}

pub fn lhbrx(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    st.gpr[rd(op)] = u32::from(bus.read16(addr).swap_bytes());
}

pub fn lwz(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp(op, st);
    st.gpr[rd(op)] = bus.read32(addr);
}

pub fn lwzu(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp_update(op, st);
    st.gpr[rd(op)] = bus.read32(addr);
    st.gpr[ra(op)] = addr;
}

pub fn lwzx(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    st.gpr[rd(op)] = bus.read32(addr);
}

pub fn lwzux(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    st.gpr[rd(op)] = bus.read32(addr);
    st.gpr[ra(op)] = addr;
}

pub fn lwbrx(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    st.gpr[rd(op)] = bus.read32(addr).swap_bytes();
}

/// `lwarx`: the DRC does not model multiprocessor reservations (the Model 3's PowerPC is
/// the sole bus master in the configurations this crate targets), so it behaves as a plain
/// indexed load; the matching `stwcx.` always reports success.
pub fn lwarx(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    st.gpr[rd(op)] = bus.read32(addr);
}

pub fn stwcx_rc(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    bus.write32(addr, st.gpr[rs(op)]);
    st.cr[0] = 0x2 | u8::from(st.xer_so());
}

pub fn stb(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp(op, st);
    bus.write8(addr, st.gpr[rs(op)] as u8);
}

pub fn stbu(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp_update(op, st);
    bus.write8(addr, st.gpr[rs(op)] as u8);
    st.gpr[ra(op)] = addr;
}

pub fn stbx(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    bus.write8(addr, st.gpr[rs(op)] as u8);
}

pub fn stbux(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    bus.write8(addr, st.gpr[rs(op)] as u8);
    st.gpr[ra(op)] = addr;
}

pub fn sth(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp(op, st);
    bus.write16(addr, st.gpr[rs(op)] as u16);
}

pub fn sthu(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp_update(op, st);
    bus.write16(addr, st.gpr[rs(op)] as u16);
    st.gpr[ra(op)] = addr;
}

pub fn sthx(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    bus.write16(addr, st.gpr[rs(op)] as u16);
}

pub fn sthux(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    bus.write16(addr, st.gpr[rs(op)] as u16);
    st.gpr[ra(op)] = addr;
}

pub fn sthbrx(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    bus.write16(addr, (st.gpr[rs(op)] as u16).swap_bytes());
}

pub fn stw(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp(op, st);
    bus.write32(addr, st.gpr[rs(op)]);
}

pub fn stwu(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp_update(op, st);
    bus.write32(addr, st.gpr[rs(op)]);
    st.gpr[ra(op)] = addr;
}

pub fn stwx(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    bus.write32(addr, st.gpr[rs(op)]);
}

pub fn stwux(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    bus.write32(addr, st.gpr[rs(op)]);
    st.gpr[ra(op)] = addr;
}

pub fn stwbrx(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    bus.write32(addr, st.gpr[rs(op)].swap_bytes());
}

pub fn lmw(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let mut addr = ea_disp(op, st);
    for reg in rd(op)..32 {
        st.gpr[reg] = bus.read32(addr);
        addr = addr.wrapping_add(4);
    }
}

pub fn stmw(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let mut addr = ea_disp(op, st);
    for reg in rs(op)..32 {
        bus.write32(addr, st.gpr[reg]);
        addr = addr.wrapping_add(4);
    }
}

/// `lfs`/`lfsu`/`lfsx`/`lfsux`: single precision load, widened to the architectural
/// binary64 FPR representation.
pub fn lfs(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp(op, st);
    st.fpr[rd(op)] = f64::from(f32::from_bits(bus.read32(addr)));
}

pub fn lfsu(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp_update(op, st);
    st.fpr[rd(op)] = f64::from(f32::from_bits(bus.read32(addr)));
    st.gpr[ra(op)] = addr;
}

pub fn lfsx(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    st.fpr[rd(op)] = f64::from(f32::from_bits(bus.read32(addr)));
}

pub fn lfsux(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    st.fpr[rd(op)] = f64::from(f32::from_bits(bus.read32(addr)));
    st.gpr[ra(op)] = addr;
}

pub fn lfd(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp(op, st);
    st.fpr[rd(op)] = f64::from_bits(bus.read64(addr));
}

pub fn lfdu(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp_update(op, st);
    st.fpr[rd(op)] = f64::from_bits(bus.read64(addr));
    st.gpr[ra(op)] = addr;
}

pub fn lfdx(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    st.fpr[rd(op)] = f64::from_bits(bus.read64(addr));
}

pub fn lfdux(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    st.fpr[rd(op)] = f64::from_bits(bus.read64(addr));
    st.gpr[ra(op)] = addr;
}

pub fn stfs(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp(op, st);
    bus.write32(addr, (st.fpr[rs(op)] as f32).to_bits());
}

pub fn stfsu(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp_update(op, st);
    bus.write32(addr, (st.fpr[rs(op)] as f32).to_bits());
    st.gpr[ra(op)] = addr;
}

pub fn stfsx(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    bus.write32(addr, (st.fpr[rs(op)] as f32).to_bits());
}

pub fn stfsux(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    bus.write32(addr, (st.fpr[rs(op)] as f32).to_bits());
    st.gpr[ra(op)] = addr;
}

pub fn stfd(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp(op, st);
    bus.write64(addr, st.fpr[rs(op)].to_bits());
}

pub fn stfdu(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_disp_update(op, st);
    bus.write64(addr, st.fpr[rs(op)].to_bits());
    st.gpr[ra(op)] = addr;
}

pub fn stfdx(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    bus.write64(addr, st.fpr[rs(op)].to_bits());
}

pub fn stfdux(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    bus.write64(addr, st.fpr[rs(op)].to_bits());
    st.gpr[ra(op)] = addr;
}

/// `stfiwx`: stores the low 32 bits of the FPR's bit pattern verbatim (no conversion).
pub fn stfiwx(op: u32, st: &mut ArchState, bus: &mut dyn MemoryBus) {
    let addr = ea_indexed(op, st);
    bus.write32(addr, st.fpr[rs(op)].to_bits() as u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeBus {
        memory: std::collections::HashMap<u32, u8>,
    }

    impl FakeBus {
        fn new() -> Self {
            Self { memory: std::collections::HashMap::new() }
        }
    }

    impl MemoryBus for FakeBus {
        fn read8(&mut self, address: u32) -> u8 {
            *self.memory.get(&address).unwrap_or(&0)
        }
        fn read16(&mut self, address: u32) -> u16 {
            (u16::from(self.read8(address)) << 8) | u16::from(self.read8(address + 1))
        }
        fn read32(&mut self, address: u32) -> u32 {
            (u32::from(self.read16(address)) << 16) | u32::from(self.read16(address + 2))
        }
        fn read64(&mut self, address: u32) -> u64 {
            (u64::from(self.read32(address)) << 32) | u64::from(self.read32(address + 4))
        }
        fn write8(&mut self, address: u32, value: u8) {
            self.memory.insert(address, value);
        }
        fn write16(&mut self, address: u32, value: u16) {
            self.write8(address, (value >> 8) as u8);
            self.write8(address + 1, value as u8);
        }
        fn write32(&mut self, address: u32, value: u32) {
            self.write16(address, (value >> 16) as u16);
            self.write16(address + 2, value as u16);
        }
        fn write64(&mut self, address: u32, value: u64) {
            self.write32(address, (value >> 32) as u32);
            self.write32(address + 4, value as u32);
        }
    }

    #[test]
    fn stw_then_lwz_round_trips() {
        let mut st = ArchState::new();
        let mut bus = FakeBus::new();
        st.gpr[3] = 0x1000;
        st.gpr[4] = 0xCAFEBABE;
        let store_op = (4u32 << 21) | (3u32 << 16) | 0;
        stw(store_op, &mut st, &mut bus);
        let load_op = (5u32 << 21) | (3u32 << 16) | 0;
        lwz(load_op, &mut st, &mut bus);
        assert_eq!(st.gpr[5], 0xCAFEBABE);
    }

    #[test]
    fn update_form_writes_back_effective_address() {
        let mut st = ArchState::new();
        let mut bus = FakeBus::new();
        st.gpr[3] = 0x2000;
        let op = (4u32 << 21) | (3u32 << 16) | 8;
        lwzu(op, &mut st, &mut bus);
        assert_eq!(st.gpr[3], 0x2008);
    }
}
