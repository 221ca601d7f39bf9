//! # Register definitions for the X-Gene memory subsystem
//!
//! This crate contains the register-level contract for the DDR memory
//! controllers (DMC), the DDR PHYs and the processor-complex (PCP) ring bus
//! they are attached to. It carries no driver logic; the companion
//! `xgene-ddr` crate implements discovery, configuration and training on top
//! of these definitions.
//!
//! All multi-field registers are modeled as [`bitbybit`] bitfields so that
//! field packing is checked by the type system instead of hand-written
//! shift/mask constants.
#![no_std]

pub mod dmc;
pub mod phy;
pub mod pcp;

/// Maximum number of memory controllers (DDR channels) in the complex.
pub const MAX_MCU: usize = 8;
/// Maximum number of chip-select ranks per memory controller.
pub const MAX_RANKS: usize = 8;
/// Number of PHY data slices per controller: eight byte lanes plus ECC.
pub const NUM_PHY_SLICES: usize = 9;
/// Maximum number of DIMM slots per channel.
pub const MAX_SLOTS_PER_MCU: usize = 2;
/// Maximum number of memory-controller bridges.
pub const MAX_MCB: usize = 2;
/// Maximum number of x4/x8 DRAM components addressable per channel (PDA).
pub const MAX_DRAM_COMPONENTS: usize = 18;

// The paged window layout is a wiring contract; keep the register maps
// inside their pages.
static_assertions::const_assert!(
    phy::slice_reg(NUM_PHY_SLICES - 1, 0x3F) < pcp::RB_HIGH_PAGE_SPLIT
);
static_assertions::const_assert!(dmc::TRAINING_RDLVL_OBS < pcp::RB_HIGH_PAGE_SPLIT);
static_assertions::const_assert!(dmc::BIST_ADDR_MIN >= pcp::RB_HIGH_PAGE_SPLIT);
