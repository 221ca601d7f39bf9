//! Processor-complex (PCP) ring-bus geometry and the CSW/MCB/IOB/PLL
//! registers the DDR bring-up sequence touches.
//!
//! Every memory-subsystem register is reached through a paged window:
//!
//! ```text
//! sys_addr = RB_BASE + (page << 16) + (word_offset << 2)
//! ```
//!
//! Each agent (DMC, PHY, CSW, MCB, IOB) owns one or more 64 KiB pages. The
//! page assignments below are the fixed wiring of the ring bus and are not
//! configurable.

use arbitrary_int::{u3, u9};

/// Ring-bus window base address in the system memory map.
pub const RB_BASE: u64 = 0x7E00_0000;

/// Register offsets `>=` this value live in the agent's high page.
pub const RB_HIGH_PAGE_SPLIT: u16 = 0x1000;

/// CSW (coherent switch) page.
pub const CSW_PAGE: u16 = 0x00;
/// IOB (I/O bridge) page.
pub const IOB_PAGE: u16 = 0x01;
/// MCB pages, one per bridge.
pub const MCB_PAGE: [u16; crate::MAX_MCB] = [0x02, 0x03];

const DMC_PAGE_BASE: u16 = 0x10;
const PHY_PAGE_BASE: u16 = 0x30;

/// Low (config/status) page of the DMC serving MCU `mcu`.
#[inline]
pub const fn dmc_page_low(mcu: usize) -> u16 {
    DMC_PAGE_BASE + (mcu as u16) * 2
}

/// High (BIST/ECC) page of the DMC serving MCU `mcu`.
#[inline]
pub const fn dmc_page_high(mcu: usize) -> u16 {
    DMC_PAGE_BASE + (mcu as u16) * 2 + 1
}

/// Low (data-slice) page of the PHY serving MCU `mcu`.
#[inline]
pub const fn phy_page_low(mcu: usize) -> u16 {
    PHY_PAGE_BASE + (mcu as u16) * 2
}

/// High (global control) page of the PHY serving MCU `mcu`.
#[inline]
pub const fn phy_page_high(mcu: usize) -> u16 {
    PHY_PAGE_BASE + (mcu as u16) * 2 + 1
}

/// Translate a `(page, word offset)` pair to a system address.
#[inline]
pub const fn rb_addr(page: u16, word_offset: u16) -> u64 {
    RB_BASE + ((page as u64) << 16) + ((word_offset as u64) << 2)
}

// CSW registers (word offsets in the CSW page).

/// One ready bit per MCU, set once its bus interface is out of reset.
pub const CSW_DDR_BUS_READY: u16 = 0x020;
/// Per-MCU APB/interface/PHY reset control, see [McuResetControl].
pub const fn csw_mcu_reset(mcu: usize) -> u16 {
    0x040 + mcu as u16
}
/// Per-MCU PLL control, see [McuPllControl].
pub const fn csw_mcu_pll_ctrl(mcu: usize) -> u16 {
    0x060 + mcu as u16
}
/// Per-MCU PLL status, see [McuPllStatus].
pub const fn csw_mcu_pll_status(mcu: usize) -> u16 {
    0x068 + mcu as u16
}
/// Per-MCU agent-macro clock control, see [McuClockControl].
pub const fn csw_mcu_clk_ctrl(mcu: usize) -> u16 {
    0x070 + mcu as u16
}

// IOB registers.

/// DRAM region base/size pairs presented to the interconnect, four regions.
pub const fn iob_dram_region_base(region: usize) -> u16 {
    0x100 + (region as u16) * 2
}
pub const fn iob_dram_region_size(region: usize) -> u16 {
    0x101 + (region as u16) * 2
}

// MCB registers (word offsets in an MCB page).

/// Bank-hash / channel-interleave configuration.
pub const MCB_ROUTING_CONFIG: u16 = 0x010;
/// Bitmask of MCUs routed through this bridge.
pub const MCB_MCU_ENABLE: u16 = 0x011;

/// Per-MCU reset bits in the CSW.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct McuResetControl {
    #[bit(0, rw)]
    apb_reset: bool,
    #[bit(1, rw)]
    interface_reset: bool,
    #[bit(2, rw)]
    phy_reset: bool,
}

/// MCU PLL control register.
///
/// New divider values are consumed when `reset` is pulsed.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct McuPllControl {
    #[bit(31, rw)]
    pwrdn: bool,
    #[bit(30, rw)]
    reset: bool,
    #[bit(29, rw)]
    bypass: bool,
    #[bit(28, rw)]
    clken: bool,
    /// Feedback divider.
    #[bits(8..=16, rw)]
    fbdivc: u9,
    #[bits(4..=6, rw)]
    outdiv2: u3,
    #[bits(0..=2, rw)]
    outdiv3: u3,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct McuPllStatus {
    /// Set by hardware once the PLL has locked to the programmed ratio.
    #[bit(0, r)]
    lock: bool,
}

/// Agent-macro clock gating and reset for one MCU.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct McuClockControl {
    #[bit(0, rw)]
    macro_clk_pwrdn: bool,
    #[bit(1, rw)]
    macro_clk_reset: bool,
    #[bit(2, rw)]
    agent_clk_en: bool,
}

// SMpro management-processor interface.
//
// These are not MMIO registers: they are reached over the management I2C
// bus with a register-id/value protocol. Only the registers the DDR path
// needs are listed.

/// I2C bus number of the SMpro management link.
pub const SMPRO_I2C_BUS: u8 = 14;
/// I2C chip address of the SMpro register file.
pub const SMPRO_I2C_CHIP: u8 = 0x4F;

/// SoC-level asynchronous reset register inside the SMpro.
pub const SMPRO_MCU_ASYNC_RESET: u32 = 0x0000_1054;

/// Per-MCU deassert bit inside [SMPRO_MCU_ASYNC_RESET].
#[inline]
pub const fn smpro_async_reset_bit(mcu: usize) -> u32 {
    1 << mcu
}
