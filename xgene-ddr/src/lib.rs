//! # DDR bring-up library for the X-Gene memory subsystem
//!
//! This crate takes a cold memory complex (up to eight DMC+PHY channel
//! pairs behind the PCP ring bus) to a timing-closed, ECC-initialized READY
//! state: SPD discovery, parameter resolution, PLL/reset sequencing, DMC and
//! PHY configuration, the JEDEC DRAM power-up sequence, hardware-assisted
//! leveling and the software delay/voltage calibration searches layered on
//! the controller BIST.
//!
//! The library is strictly single-threaded and runs before any OS or
//! secondary core; suspension is busy-waiting through the injected
//! [embedded_hal::delay::DelayNs] implementation. All hardware access goes
//! through the [bus::RingBus] trait so that the whole engine can be driven
//! against a simulated register file in host tests.
#![no_std]

use embedded_hal::delay::DelayNs;

pub mod bist;
pub mod bus;
pub mod calib;
pub mod clocks;
pub mod dmc_config;
pub mod init;
pub mod params;
pub mod phy_config;
pub mod post;
pub mod spd;
pub mod time;
pub mod training;

#[cfg(test)]
pub(crate) mod sim;

pub use xgene::{MAX_MCU, MAX_RANKS, MAX_SLOTS_PER_MCU, NUM_PHY_SLICES};

use params::{SystemParams, UserParams};
use spd::{PackageType, SpdInfo};
use training::TrainingResults;

/// Memory generation, selected at runtime from the discovered DIMMs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryGeneration {
    Ddr3,
    Ddr4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DdrError {
    #[error("register poll timed out (addr {addr:#x}, mask {mask:#x}, want {expected:#x})")]
    PollTimeout { addr: u64, mask: u32, expected: u32 },
    #[error("MCU {mcu} PLL failed to lock")]
    PllLock { mcu: u8 },
    #[error("MCU {mcu} slot {slot}: SPD read failed")]
    SpdRead { mcu: u8, slot: u8 },
    #[error("MCU {mcu} slot {slot}: SPD CRC mismatch")]
    SpdCrc { mcu: u8, slot: u8 },
    #[error("MCU {mcu}: DIMMs in the two slots are incompatible")]
    SpdMismatch { mcu: u8 },
    #[error("no DIMM populated on any memory controller")]
    NoDimm,
    #[error("no supported CAS latency >= {required} at tCK {t_ck_ps} ps")]
    CasLatency { required: u8, t_ck_ps: u32 },
    #[error("MCU {mcu}: write leveling failed on rank {rank}")]
    WriteLeveling { mcu: u8, rank: u8 },
    #[error("MCU {mcu}: training failed, rank error mask {rank_err_mask:#04x}")]
    Training { mcu: u8, rank_err_mask: u8 },
    #[error("MCU {mcu}: BIST did not complete within its budget")]
    BistIncomplete { mcu: u8 },
    #[error("MCU {mcu}: Vref training verify failed on rank {rank}")]
    VrefTraining { mcu: u8, rank: u8 },
    #[error("SMpro access failed (register {reg:#x})")]
    Smpro { reg: u32 },
    #[error("MCU {mcu}: controller refused state transition")]
    MemcState { mcu: u8 },
    #[error("discovered more DRAM regions than the address map supports")]
    RegionOverflow,
    #[error("ECC initialization spot check found {count} corrupted words")]
    EccSpotCheck { count: u32 },
    #[error("board hook reported failure")]
    Board,
}

/// Per-channel configuration derived from SPD discovery and user
/// parameters; owned by [Mcu] and read by every later phase.
#[derive(Debug, Clone)]
pub struct DdrInfo {
    pub ddr_type: MemoryGeneration,
    pub package_type: PackageType,
    pub stack_height: u8,
    /// DRAM device width in bits.
    pub device_width: u8,
    /// One bit per logical rank in use.
    pub active_rank_mask: u8,
    /// One bit per physical chip select wired on the channel.
    pub physical_rank_mask: u8,
    pub odd_rank_mask: u8,
    pub max_ranks: u8,
    pub two_dpc_enable: bool,
    pub ecc_en: bool,
    pub crc_en: bool,
    pub wr_dbi_en: bool,
    pub rd_dbi_en: bool,
    pub registered: bool,
    pub load_reduced: bool,
    /// Operating clock period, picoseconds.
    pub t_ck_ps: u32,
    pub cas_latency: u8,
    pub cw_latency: u8,
    /// Write preamble in tCK (DDR4: 1 or 2).
    pub wr_preamble: u8,
    pub rd_preamble: u8,
    /// Command/address parity latency, zero when parity is off.
    pub parity_latency: u8,
    pub addr_mirror: bool,
    pub addr_map_mode: u8,
    pub row_bits: u8,
    pub col_bits: u8,
    pub bank_bits: u8,
    pub bank_group_bits: u8,
    /// Bytes per logical rank.
    pub rank_capacity: u64,
}

impl Default for DdrInfo {
    fn default() -> Self {
        Self {
            ddr_type: MemoryGeneration::Ddr4,
            package_type: PackageType::Monolithic,
            stack_height: 1,
            device_width: 8,
            active_rank_mask: 0,
            physical_rank_mask: 0,
            odd_rank_mask: 0,
            max_ranks: 0,
            two_dpc_enable: false,
            ecc_en: false,
            crc_en: false,
            wr_dbi_en: false,
            rd_dbi_en: false,
            registered: false,
            load_reduced: false,
            t_ck_ps: 833,
            cas_latency: 0,
            cw_latency: 0,
            wr_preamble: 1,
            rd_preamble: 1,
            parity_latency: 0,
            addr_mirror: false,
            addr_map_mode: 0,
            row_bits: 0,
            col_bits: 0,
            bank_bits: 0,
            bank_group_bits: 0,
            rank_capacity: 0,
        }
    }
}

/// One memory controller (DMC + PHY pair serving one DDR channel).
#[derive(Clone)]
pub struct Mcu {
    pub id: u8,
    pub enabled: bool,
    pub info: DdrInfo,
    pub params: UserParams,
    pub spd: [Option<SpdInfo>; MAX_SLOTS_PER_MCU],
    pub training: TrainingResults,
}

impl Mcu {
    fn new(id: u8) -> Self {
        Self {
            id,
            enabled: false,
            info: DdrInfo::default(),
            params: UserParams::default(),
            spd: [None, None],
            training: TrainingResults::default(),
        }
    }

    /// Iterate over the logical ranks present on this channel.
    pub fn present_ranks(&self) -> impl Iterator<Item = u8> + '_ {
        (0..MAX_RANKS as u8).filter(|r| self.info.active_rank_mask & (1 << r) != 0)
    }
}

/// One memory-controller bridge aggregating up to four MCUs toward the
/// system interconnect.
#[derive(Debug, Clone, Copy)]
pub struct Mcb {
    pub id: u8,
    /// MCUs routed through this bridge, in complex-wide numbering.
    pub mcu_mask: u8,
}

/// One discovered contiguous DRAM region in the system address map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRegion {
    pub base: u64,
    pub size: u64,
}

/// Discovered physical memory layout, at most four contiguous regions.
pub type MemSpace = heapless::Vec<MemRegion, 4>;

/// The top-level aggregate: every MCU, the bridge configuration, the global
/// parameters and the discovered memory space.
pub struct MemoryComplex {
    pub mcus: [Mcu; MAX_MCU],
    pub mcbs: [Mcb; xgene::MAX_MCB],
    pub sys_params: SystemParams,
    pub mem_space: MemSpace,
    /// Authoritative record of which MCUs passed SPD discovery.
    pub mcu_mask: u8,
}

impl Default for MemoryComplex {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryComplex {
    pub fn new() -> Self {
        Self {
            mcus: core::array::from_fn(|i| Mcu::new(i as u8)),
            mcbs: core::array::from_fn(|i| Mcb {
                id: i as u8,
                mcu_mask: 0,
            }),
            sys_params: SystemParams::default(),
            mem_space: MemSpace::new(),
            mcu_mask: 0,
        }
    }

    /// Iterate over the enabled MCU indices.
    pub fn enabled_mcus(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_MCU).filter(|&i| self.mcu_mask & (1 << i) != 0)
    }
}

/// Board collaborator hooks: everything the engine needs from outside the
/// memory subsystem. The NV-param store is a supertrait because parameter
/// resolution is the first consumer of board data.
pub trait DdrHooks: params::NvParamStore {
    /// Board-specific setup before any discovery (regulator enables etc).
    fn board_setup(&mut self) -> Result<(), DdrError> {
        Ok(())
    }

    /// Fill `buf` with the SPD image of the given slot. An `Err` return
    /// means the slot is unpopulated.
    fn spd_read(&mut self, mcu: usize, slot: usize, buf: &mut [u8]) -> Result<(), DdrError>;

    /// Read a management-processor register over the I2C link.
    fn smpro_read(&mut self, reg: u32) -> Result<u32, DdrError>;

    /// Write a management-processor register over the I2C link.
    fn smpro_write(&mut self, reg: u32, val: u32) -> Result<(), DdrError>;

    /// Progress indication, 0..=100. Fire and forget.
    fn progress(&mut self, _percent: u8) {}

    /// Clean and invalidate the data cache over a just-initialized region.
    fn flush_cache(&mut self, _base: u64, _size: u64) {}

    /// Install one discovered DRAM region into the boot page tables.
    fn map_dram_region(&mut self, region: MemRegion) -> Result<(), DdrError>;

    /// Last-resort fatal handler; the default implementation only logs, the
    /// caller is expected to halt the boot on the propagated error.
    fn handle_fatal(&mut self, err: &DdrError) {
        log::error!("fatal DDR bring-up error: {err}");
    }
}

/// The complete bring-up engine: bus, delay and board hooks plus the
/// memory-complex state.
pub struct DdrSystem<B: bus::RingBus, D: DelayNs, H: DdrHooks> {
    pub bus: B,
    pub delay: D,
    pub hooks: H,
    pub memc: MemoryComplex,
}

impl<B: bus::RingBus, D: DelayNs, H: DdrHooks> DdrSystem<B, D, H> {
    pub fn new(bus: B, delay: D, hooks: H) -> Self {
        Self {
            bus,
            delay,
            hooks,
            memc: MemoryComplex::new(),
        }
    }

    /// Run the full bring-up sequence.
    ///
    /// Any error return is fatal for the boot stage; the fatal hook has
    /// already been invoked when this returns `Err`.
    pub fn init(&mut self) -> Result<(), DdrError> {
        let result = self.init_inner();
        if let Err(ref err) = result {
            self.hooks.handle_fatal(err);
        }
        result
    }

    fn init_inner(&mut self) -> Result<(), DdrError> {
        self.hooks.board_setup()?;
        self.memc.sys_params = SystemParams::resolve(&mut self.hooks);

        spd::spd_init(&mut self.memc, &mut self.hooks)?;
        log::info!("DDR: MCU mask after discovery {:#04x}", self.memc.mcu_mask);

        clocks::mcu_unreset(
            &mut self.bus,
            &mut self.delay,
            &mut self.hooks,
            &self.memc,
        )?;

        for mcu_idx in 0..MAX_MCU {
            if self.memc.mcu_mask & (1 << mcu_idx) == 0 {
                continue;
            }
            let mcu = &self.memc.mcus[mcu_idx];
            dmc_config::configure_dmc(&mut self.bus, &mut self.delay, mcu)?;
            phy_config::configure_phy(&mut self.bus, mcu);
            calib::phy_sw_rx_calibration(&mut self.bus, &mut self.delay, mcu)?;
            init::dram_init(&mut self.bus, &mut self.delay, mcu)?;
        }

        let mut first_err = None;
        for mcu_idx in 0..MAX_MCU {
            if self.memc.mcu_mask & (1 << mcu_idx) == 0 {
                continue;
            }
            let mcu = &mut self.memc.mcus[mcu_idx];
            if let Err(err) =
                training::phy_training_mode(&mut self.bus, &mut self.delay, mcu)
            {
                log::error!("MCU {mcu_idx}: training failed: {err}");
                first_err.get_or_insert(err);
            }
        }
        if let Some(err) = first_err {
            return Err(err);
        }

        post::ddr_post_training(
            &mut self.bus,
            &mut self.delay,
            &mut self.hooks,
            &mut self.memc,
        )
    }
}

/// Top-level entry point: run the complete DDR subsystem initialization on
/// a freshly constructed [DdrSystem].
pub fn ddr_sys_init<B: bus::RingBus, D: DelayNs, H: DdrHooks>(
    system: &mut DdrSystem<B, D, H>,
) -> Result<(), DdrError> {
    system.init()
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use crate::params::NvParamKey;
    use crate::sim::{NopDelay, SimBus, TestHooks};

    #[test]
    fn full_bring_up_reaches_ready() {
        let mut bus = SimBus::new();
        // Live capacity for the READY-time address map: 2 x 8 GiB ranks.
        for rank in 0..2 {
            bus.regs.insert(
                bus::dmc_addr(0, xgene::dmc::rank_capacity(rank)),
                (1 << 31) | 32,
            );
        }
        let mut hooks = TestHooks::single_dimm();
        // ECC off keeps the zero-fill sweep away from host memory; the
        // slow searches have their own focused tests.
        for (key, val) in [
            (NvParamKey::EccMode, 0),
            (NvParamKey::WriteDeskew, 0),
            (NvParamKey::ReadDeskew, 0),
            (NvParamKey::DramVrefTrain, 0),
            (NvParamKey::PhyVrefTrain, 0),
        ] {
            hooks.nvparams.insert(key.for_mcu(0), val);
        }

        let mut sys = DdrSystem::new(bus, NopDelay, hooks);
        sys.init().unwrap();

        assert_eq!(sys.memc.mcu_mask, 0b1);
        let status = sys.bus.regs[&bus::dmc_addr(0, xgene::dmc::MEMC_STATUS)];
        assert_eq!(status & 0x7, xgene::dmc::MemcState::Ready as u32);
        assert!(!sys.hooks.mapped_regions.is_empty());
        assert_eq!(*sys.hooks.progress_calls.last().unwrap(), 100);
    }

    #[test]
    fn fatal_hook_fires_on_error() {
        // Empty complex: discovery fails and the error propagates after
        // the fatal hook ran.
        let sys_err = DdrSystem::new(SimBus::new(), NopDelay, TestHooks::empty())
            .init()
            .unwrap_err();
        assert_eq!(sys_err, DdrError::NoDimm);
    }
}
