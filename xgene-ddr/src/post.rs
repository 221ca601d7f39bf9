//! Post-training finalization.
//!
//! Reads the live capacity registers to discover the populated address
//! space, publishes it to the interconnect and the boot page tables,
//! zero-fills ECC-protected memory to seed the syndromes, spot-checks the
//! result and finally moves every controller to READY.

use embedded_hal::delay::DelayNs;
use xgene::dmc::{self, MemcState, RankCapacity};
use xgene::pcp;

use crate::bus::{self, RingBus};
use crate::dmc_config::memc_set_state;
use crate::{DdrError, DdrHooks, MemRegion, MemoryComplex};

/// System-map windows DRAM can occupy, in placement order. The low window
/// is capped by the 32-bit MMIO hole.
const REGION_WINDOWS: [(u64, u64); 4] = [
    (0x0000_4000_0000, 0x0000_8000_0000 - 0x4000_0000),
    (0x0001_0000_0000, 0x0007_0000_0000),
    (0x0010_0000_0000, 0x0070_0000_0000),
    (0x0100_0000_0000, 0x0700_0000_0000),
];

/// Spot-check stride: one readback per 64 KiB of swept memory.
const SPOT_CHECK_STRIDE: usize = 0x1_0000;

/// Sum the live per-rank capacities of one controller.
fn mcu_live_capacity<B: RingBus>(bus: &mut B, mcu: usize) -> u64 {
    let mut total = 0u64;
    for rank in 0..crate::MAX_RANKS {
        let cap = RankCapacity::new_with_raw_value(bus::dmc_read(
            bus,
            mcu,
            dmc::rank_capacity(rank),
        ));
        if cap.valid() {
            total += u64::from(cap.size_256mb().value()) << 28;
        }
    }
    total
}

/// Build the memory space from live hardware capacity and program the
/// interconnect windows.
pub fn ddr_address_map<B: RingBus>(
    bus: &mut B,
    memc: &mut MemoryComplex,
) -> Result<(), DdrError> {
    let mut remaining: u64 = memc
        .enabled_mcus()
        .map(|idx| mcu_live_capacity(bus, idx))
        .sum();
    log::info!("DDR: {} MiB populated", remaining >> 20);

    memc.mem_space.clear();
    for (window_base, window_size) in REGION_WINDOWS {
        if remaining == 0 {
            break;
        }
        let size = remaining.min(window_size);
        memc.mem_space
            .push(MemRegion {
                base: window_base,
                size,
            })
            .map_err(|_| DdrError::RegionOverflow)?;
        remaining -= size;
    }
    if remaining != 0 {
        return Err(DdrError::RegionOverflow);
    }

    // Publish the regions to the I/O bridge, 16 MiB granule.
    for (i, region) in memc.mem_space.iter().enumerate() {
        bus::iob_write(bus, pcp::iob_dram_region_base(i), (region.base >> 24) as u32);
        bus::iob_write(bus, pcp::iob_dram_region_size(i), (region.size >> 24) as u32);
    }
    // Bridges route their MCU subset with the configured interleave.
    for mcb in &memc.mcbs {
        let id = mcb.id as usize;
        bus::mcb_write(bus, id, pcp::MCB_MCU_ENABLE, mcb.mcu_mask as u32);
        bus::mcb_write(
            bus,
            id,
            pcp::MCB_ROUTING_CONFIG,
            (memc.sys_params.interleave_mode as u32)
                | ((memc.sys_params.bank_hash_enable as u32) << 4),
        );
    }
    Ok(())
}

/// Zero-fill a region with 64-bit stores, reporting progress on
/// power-of-two boundaries.
///
/// # Safety
///
/// `base..base + size` must be mapped, writable memory owned by the caller.
pub unsafe fn ecc_zero_fill<H: DdrHooks>(hooks: &mut H, base: u64, size: u64) {
    let words = (size / 8) as usize;
    let ptr = base as usize as *mut u64;
    let mut next_report: u64 = 0x10_0000;
    for i in 0..words {
        // Safety: caller guarantees the range.
        unsafe { core::ptr::write_volatile(ptr.add(i), 0) };
        let offset = (i as u64 + 1) * 8;
        if offset == next_report || offset == size {
            hooks.progress(((offset * 100) / size) as u8);
            next_report <<= 1;
        }
    }
}

/// Strided readback of a just-zeroed region; returns the count of non-zero
/// words found.
///
/// # Safety
///
/// `base..base + size` must be mapped, readable memory.
pub unsafe fn ecc_spot_check(base: u64, size: u64) -> u32 {
    let mut errors = 0;
    let mut offset = 0usize;
    while (offset as u64) < size {
        let ptr = (base as usize + offset) as *const u64;
        // Safety: caller guarantees the range.
        let val = unsafe { core::ptr::read_volatile(ptr) };
        if val != 0 {
            log::error!("ECC init: non-zero word {val:#018x} at {:#x}", base + offset as u64);
            errors += 1;
        }
        offset += SPOT_CHECK_STRIDE;
    }
    errors
}

fn set_poison_reporting<B: RingBus>(bus: &mut B, memc: &MemoryComplex, enable: bool) {
    for idx in memc.enabled_mcus() {
        if !memc.mcus[idx].info.ecc_en {
            continue;
        }
        let cfg = dmc::PoisonConfig::DEFAULT.with_report_enable(enable);
        bus::dmc_write(bus, idx, dmc::POISON_CONFIG, cfg.raw_value());
    }
}

fn clear_ecc_counters<B: RingBus>(bus: &mut B, memc: &MemoryComplex) {
    for idx in memc.enabled_mcus() {
        if !memc.mcus[idx].info.ecc_en {
            continue;
        }
        bus::dmc_write(bus, idx, dmc::ECC_ERR_INT_CLR, 0xFFFF_FFFF);
        bus::dmc_write(bus, idx, dmc::ECC_ERRC_COUNT, 0);
        bus::dmc_write(bus, idx, dmc::ECC_ERRD_COUNT, 0);
    }
}

/// Finalize the bring-up: address map, page tables, ECC initialization and
/// the READY transition. Every step here is fatal on error.
pub fn ddr_post_training<B: RingBus, D: DelayNs, H: DdrHooks>(
    bus: &mut B,
    delay: &mut D,
    hooks: &mut H,
    memc: &mut MemoryComplex,
) -> Result<(), DdrError> {
    ddr_address_map(bus, memc)?;

    let regions = memc.mem_space.clone();
    for region in &regions {
        hooks.map_dram_region(*region)?;
    }

    let ecc_active = memc
        .enabled_mcus()
        .any(|idx| memc.mcus[idx].info.ecc_en);
    if ecc_active {
        set_poison_reporting(bus, memc, false);
        let mut spot_errors = 0u32;
        for region in &regions {
            // Safety: the region was just discovered from live capacity
            // registers and mapped by the hook above.
            unsafe {
                ecc_zero_fill(hooks, region.base, region.size);
            }
            hooks.flush_cache(region.base, region.size);
            // Safety: same region as the fill.
            spot_errors += unsafe { ecc_spot_check(region.base, region.size) };
        }
        clear_ecc_counters(bus, memc);
        set_poison_reporting(bus, memc, true);
        if spot_errors != 0 {
            return Err(DdrError::EccSpotCheck { count: spot_errors });
        }
    }

    for idx in memc.enabled_mcus() {
        memc_set_state(bus, delay, idx, MemcState::Ready)?;
        log::info!("MCU {idx}: READY");
    }
    hooks.progress(100);
    Ok(())
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use crate::sim::{SimBus, TestHooks};
    use std::vec;

    fn set_rank_capacity(bus: &mut SimBus, mcu: usize, rank: usize, units_256mb: u32) {
        bus.regs.insert(
            crate::bus::dmc_addr(mcu, dmc::rank_capacity(rank)),
            (1 << 31) | units_256mb,
        );
    }

    #[test]
    fn address_map_single_region() {
        let mut bus = SimBus::new();
        // MCU 0: two ranks of 512 MiB -> 1 GiB total, fits the low window.
        set_rank_capacity(&mut bus, 0, 0, 2);
        set_rank_capacity(&mut bus, 0, 1, 2);
        let mut memc = MemoryComplex::new();
        memc.mcu_mask = 0b1;
        ddr_address_map(&mut bus, &mut memc).unwrap();
        assert_eq!(
            memc.mem_space.as_slice(),
            &[MemRegion {
                base: 0x4000_0000,
                size: 0x4000_0000
            }]
        );
    }

    #[test]
    fn address_map_spills_into_high_windows() {
        let mut bus = SimBus::new();
        // 8 GiB on each of two MCUs: 1 GiB low window, rest above 4 GiB.
        for mcu in 0..2 {
            set_rank_capacity(&mut bus, mcu, 0, 32);
        }
        let mut memc = MemoryComplex::new();
        memc.mcu_mask = 0b11;
        ddr_address_map(&mut bus, &mut memc).unwrap();
        assert_eq!(memc.mem_space.len(), 2);
        assert_eq!(memc.mem_space[0].base, 0x4000_0000);
        assert_eq!(memc.mem_space[0].size, 0x4000_0000);
        assert_eq!(memc.mem_space[1].base, 0x1_0000_0000);
        assert_eq!(memc.mem_space[1].size, 16 * (1u64 << 30) - 0x4000_0000);
    }

    #[test]
    fn zero_fill_then_spot_check_is_clean() {
        let mut hooks = TestHooks::empty();
        let size = 2 * SPOT_CHECK_STRIDE as u64;
        let mut buf = vec![0xFFu8; size as usize + 8];
        let base = buf.as_mut_ptr() as u64;
        let base = (base + 7) & !7;
        unsafe {
            ecc_zero_fill(&mut hooks, base, size);
            assert_eq!(ecc_spot_check(base, size), 0);
        }
        assert!(!hooks.progress_calls.is_empty());
        assert_eq!(*hooks.progress_calls.last().unwrap(), 100);
    }

    #[test]
    fn spot_check_counts_injected_word_once() {
        let mut hooks = TestHooks::empty();
        let size = 4 * SPOT_CHECK_STRIDE as u64;
        let mut buf = vec![0xFFu8; size as usize + 8];
        let base = buf.as_mut_ptr() as u64;
        let base = (base + 7) & !7;
        unsafe {
            ecc_zero_fill(&mut hooks, base, size);
            // Corrupt exactly one checked word (stride-aligned).
            let victim = (base as usize + SPOT_CHECK_STRIDE) as *mut u64;
            core::ptr::write_volatile(victim, 0xDEAD_BEEF);
            assert_eq!(ecc_spot_check(base, size), 1);
        }
    }

    #[test]
    fn ready_transition_for_every_enabled_mcu() {
        let mut bus = SimBus::new();
        set_rank_capacity(&mut bus, 0, 0, 2);
        set_rank_capacity(&mut bus, 2, 0, 2);
        let mut memc = MemoryComplex::new();
        memc.mcu_mask = 0b101;
        // ECC off keeps the sweep out of a host-side test.
        memc.mcus[0].info.ecc_en = false;
        memc.mcus[2].info.ecc_en = false;
        let mut hooks = TestHooks::empty();
        let mut delay = crate::sim::NopDelay;
        ddr_post_training(&mut bus, &mut delay, &mut hooks, &mut memc).unwrap();

        for mcu in [0usize, 2] {
            let status = bus.regs[&crate::bus::dmc_addr(mcu, dmc::MEMC_STATUS)];
            assert_eq!(status & 0x7, MemcState::Ready as u32);
        }
        assert_eq!(hooks.mapped_regions.len(), memc.mem_space.len());
        assert_eq!(*hooks.progress_calls.last().unwrap(), 100);
    }
}
