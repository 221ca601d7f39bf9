//! Ring-bus access layer.
//!
//! Every DMC, PHY, CSW, MCB and IOB register is reached through the paged
//! ring-bus window described in [xgene::pcp]. This module owns the logical
//! `(agent, offset)` to system-address translation and the [RingBus] trait
//! that the rest of the library programs against. Production code uses
//! [MmioRingBus]; tests substitute a simulated register file.

use embedded_hal::delay::DelayNs;
use xgene::pcp;

use crate::DdrError;

/// Raw 32-bit register access on the ring bus.
///
/// Implementations must perform each access exactly once and in order;
/// several sequences below (UPDATE commits, training polls) rely on
/// read/write ordering being preserved.
pub trait RingBus {
    fn read(&mut self, addr: u64) -> u32;
    fn write(&mut self, addr: u64, val: u32);
}

/// Direct MMIO implementation of [RingBus].
///
/// The ring-bus window is mapped device-memory; plain volatile accesses are
/// sufficient, ordering is provided by the device memory type.
pub struct MmioRingBus;

impl RingBus for MmioRingBus {
    #[inline]
    fn read(&mut self, addr: u64) -> u32 {
        // Safety: addresses are produced by the translators below and stay
        // inside the ring-bus window.
        unsafe { core::ptr::read_volatile(addr as usize as *const u32) }
    }

    #[inline]
    fn write(&mut self, addr: u64, val: u32) {
        // Safety: see read().
        unsafe { core::ptr::write_volatile(addr as usize as *mut u32, val) }
    }
}

/// System address of a DMC register, resolving the low/high page split.
#[inline]
pub const fn dmc_addr(mcu: usize, reg: u16) -> u64 {
    if reg < pcp::RB_HIGH_PAGE_SPLIT {
        pcp::rb_addr(pcp::dmc_page_low(mcu), reg)
    } else {
        pcp::rb_addr(pcp::dmc_page_high(mcu), reg - pcp::RB_HIGH_PAGE_SPLIT)
    }
}

/// System address of a per-slice PHY register.
#[inline]
pub const fn phy_addr(mcu: usize, slice: usize, reg: u16) -> u64 {
    pcp::rb_addr(pcp::phy_page_low(mcu), xgene::phy::slice_reg(slice, reg))
}

/// System address of a global PHY register.
#[inline]
pub const fn phy_global_addr(mcu: usize, reg: u16) -> u64 {
    pcp::rb_addr(pcp::phy_page_high(mcu), reg)
}

#[inline]
pub const fn csw_addr(reg: u16) -> u64 {
    pcp::rb_addr(pcp::CSW_PAGE, reg)
}

#[inline]
pub const fn iob_addr(reg: u16) -> u64 {
    pcp::rb_addr(pcp::IOB_PAGE, reg)
}

#[inline]
pub const fn mcb_addr(mcb: usize, reg: u16) -> u64 {
    pcp::rb_addr(pcp::MCB_PAGE[mcb], reg)
}

#[inline]
pub fn dmc_read<B: RingBus>(bus: &mut B, mcu: usize, reg: u16) -> u32 {
    bus.read(dmc_addr(mcu, reg))
}

#[inline]
pub fn dmc_write<B: RingBus>(bus: &mut B, mcu: usize, reg: u16, val: u32) {
    bus.write(dmc_addr(mcu, reg), val)
}

#[inline]
pub fn phy_read<B: RingBus>(bus: &mut B, mcu: usize, slice: usize, reg: u16) -> u32 {
    bus.read(phy_addr(mcu, slice, reg))
}

#[inline]
pub fn phy_write<B: RingBus>(bus: &mut B, mcu: usize, slice: usize, reg: u16, val: u32) {
    bus.write(phy_addr(mcu, slice, reg), val)
}

#[inline]
pub fn phy_global_read<B: RingBus>(bus: &mut B, mcu: usize, reg: u16) -> u32 {
    bus.read(phy_global_addr(mcu, reg))
}

#[inline]
pub fn phy_global_write<B: RingBus>(bus: &mut B, mcu: usize, reg: u16, val: u32) {
    bus.write(phy_global_addr(mcu, reg), val)
}

#[inline]
pub fn csw_read<B: RingBus>(bus: &mut B, reg: u16) -> u32 {
    bus.read(csw_addr(reg))
}

#[inline]
pub fn csw_write<B: RingBus>(bus: &mut B, reg: u16, val: u32) {
    bus.write(csw_addr(reg), val)
}

#[inline]
pub fn iob_write<B: RingBus>(bus: &mut B, reg: u16, val: u32) {
    bus.write(iob_addr(reg), val)
}

#[inline]
pub fn mcb_read<B: RingBus>(bus: &mut B, mcb: usize, reg: u16) -> u32 {
    bus.read(mcb_addr(mcb, reg))
}

#[inline]
pub fn mcb_write<B: RingBus>(bus: &mut B, mcb: usize, reg: u16, val: u32) {
    bus.write(mcb_addr(mcb, reg), val)
}

/// Poll interval used by every bounded register poll.
pub const POLL_INTERVAL_US: u32 = 10;

/// Poll `reg` of MCU `mcu` until `(value & mask) == expected`.
///
/// Retries `retries` times with a 10 us delay per iteration; the retry count
/// is the per-operation budget chosen by each caller.
pub fn dmc_poll<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: usize,
    reg: u16,
    mask: u32,
    expected: u32,
    retries: u32,
) -> Result<(), DdrError> {
    poll(bus, delay, dmc_addr(mcu, reg), mask, expected, retries)
}

/// Poll an arbitrary ring-bus address until `(value & mask) == expected`.
pub fn poll<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    addr: u64,
    mask: u32,
    expected: u32,
    retries: u32,
) -> Result<(), DdrError> {
    for _ in 0..retries {
        if bus.read(addr) & mask == expected {
            return Ok(());
        }
        delay.delay_us(POLL_INTERVAL_US);
    }
    Err(DdrError::PollTimeout { addr, mask, expected })
}
