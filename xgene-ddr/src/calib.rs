//! Software delay and voltage calibration.
//!
//! Four searches share one shape: bisect an analog control code against the
//! BIST pass/fail oracle. A BIST miscompare is a normal search outcome that
//! narrows the window; a BIST that never completes is a hard error and
//! aborts the whole calibration.

use embedded_hal::delay::DelayNs;
use xgene::dmc::DirectOp;
use xgene::phy;

use crate::bist::{self, BistAddressSetup, BistConfig};
use crate::bus::{self, RingBus};
use crate::{DdrError, Mcu, NUM_PHY_SLICES};

/// Write-calibration coarse search range, whole write-path cycles.
const WRCAL_MAX_CYCLES: u8 = 6;

/// Deskew sweep step sizes.
const DESKEW_COARSE_STEP: u16 = 8;
const DESKEW_FINE_STEP: u16 = 2;

/// Midpoint sanity clamps: a computed center farther than this from the
/// hardware-trained default is discarded. BIST false passes near the delay
/// line extremes produce nonsensical midpoints otherwise.
const WR_DESKEW_CLAMP: u16 = 0x100;
const RD_DESKEW_CLAMP: u16 = 0xC0;

/// DRAM Vref DAC range (MR6 bits 0..5) and coarse step.
const DRAM_VREF_MAX: u8 = 0x3F;
const DRAM_VREF_COARSE_STEP: u8 = 4;
/// PHY pad Vref range and coarse step.
const PHY_VREF_COARSE_STEP: u8 = 8;

/// Slices carrying data on this channel: eight byte lanes, plus the ECC
/// lane when enabled.
fn active_slices(mcu: &Mcu) -> usize {
    if mcu.info.ecc_en { NUM_PHY_SLICES } else { NUM_PHY_SLICES - 1 }
}

fn rank_cfg(mcu: &Mcu, rank: u8) -> (BistConfig, BistAddressSetup) {
    (
        BistConfig::for_mcu(mcu, rank),
        BistAddressSetup::calibration_window(),
    )
}

/// Write calibration: find the whole-cycle write-path latency per slice.
///
/// Linear search from zero to [WRCAL_MAX_CYCLES]; each lane locks in at the
/// first cycle count where it passes every pattern, and the search keeps
/// going for the lanes still failing. Global success requires every lane to
/// lock.
pub fn mcu_bist_phy_wrcal<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: &mut Mcu,
    rank: u8,
) -> Result<bool, DdrError> {
    let id = mcu.id as usize;
    let slices = active_slices(mcu);
    let (cfg, addr) = rank_cfg(mcu, rank);
    let mut pending: u16 = (1u16 << slices) - 1;

    for cycles in 0..=WRCAL_MAX_CYCLES {
        if pending == 0 {
            break;
        }
        for slice in 0..slices {
            if pending & (1 << slice) == 0 {
                continue;
            }
            let lat = phy::WritePathLat::DEFAULT
                .with_cycles(arbitrary_int::u3::new(cycles))
                .raw_value();
            bus::phy_write(bus, id, slice, phy::WRITE_PATH_LAT, lat);
        }
        let fail_mask = bist::run_bist(bus, delay, id, &cfg, &addr)?;
        for slice in 0..slices {
            let bit = 1u16 << slice;
            if pending & bit != 0 && fail_mask & (1 << slice) == 0 {
                mcu.training.wrcal_cycles[rank as usize][slice] = cycles;
                pending &= !bit;
            }
        }
    }

    if pending != 0 {
        log::error!("MCU {id}: write calibration left lanes unlocked: {pending:#05x}");
        return Ok(false);
    }
    Ok(true)
}

/// Find the passing window around `start` against a boolean oracle.
///
/// Leading edge: sweep down from `start` in coarse steps until a pass is
/// seen, then refine downward in fine steps while still passing. Trailing
/// edge: the mirror sweep upward. Returns `None` when no passing code
/// exists in either direction.
fn find_window<F>(
    mut test: F,
    start: u16,
    floor: u16,
    ceil: u16,
) -> Result<Option<(u16, u16)>, DdrError>
where
    F: FnMut(u16) -> Result<bool, DdrError>,
{
    // Leading edge: coarse sweep down from the start until a pass is seen,
    // coarse-extend inside the passing region, then a fine refine onto the
    // edge itself.
    let mut d = start;
    let leading = loop {
        if test(d)? {
            while d >= floor + DESKEW_COARSE_STEP {
                let cand = d - DESKEW_COARSE_STEP;
                if test(cand)? {
                    d = cand;
                } else {
                    break;
                }
            }
            while d >= floor + DESKEW_FINE_STEP {
                let cand = d - DESKEW_FINE_STEP;
                if test(cand)? {
                    d = cand;
                } else {
                    break;
                }
            }
            break Some(d);
        }
        if d < floor + DESKEW_COARSE_STEP {
            break None;
        }
        d -= DESKEW_COARSE_STEP;
    };

    // Trailing edge: the mirror sweep upward toward the ceiling.
    let mut d = start;
    let trailing = loop {
        if test(d)? {
            while d + DESKEW_COARSE_STEP <= ceil {
                let cand = d + DESKEW_COARSE_STEP;
                if test(cand)? {
                    d = cand;
                } else {
                    break;
                }
            }
            while d + DESKEW_FINE_STEP <= ceil {
                let cand = d + DESKEW_FINE_STEP;
                if test(cand)? {
                    d = cand;
                } else {
                    break;
                }
            }
            break Some(d);
        }
        if d + DESKEW_COARSE_STEP > ceil {
            break None;
        }
        d += DESKEW_COARSE_STEP;
    };

    match (leading, trailing) {
        (Some(l), Some(t)) if l <= t => Ok(Some((l, t))),
        _ => Ok(None),
    }
}

/// Center one bit's delay line inside its passing window.
///
/// The programmed value is the exact `(leading + trailing) / 2` midpoint.
/// With no window, or a midpoint farther than `clamp` from the
/// hardware-trained default, the default is restored untouched.
fn deskew_bit<F>(
    mut test: F,
    start: u16,
    default: u16,
    floor: u16,
    ceil: u16,
    clamp: u16,
) -> Result<(u16, bool), DdrError>
where
    F: FnMut(u16) -> Result<bool, DdrError>,
{
    match find_window(&mut test, start, floor, ceil)? {
        Some((leading, trailing)) => {
            let mid = (leading + trailing) / 2;
            if mid.abs_diff(default) > clamp {
                log::warn!(
                    "deskew midpoint {mid:#x} deviates from default {default:#x} beyond {clamp:#x}, keeping default"
                );
                Ok((default, false))
            } else {
                Ok((mid, true))
            }
        }
        None => Ok((default, false)),
    }
}

fn program_delay<B: RingBus>(bus: &mut B, mcu: usize, slice: usize, reg: u16, taps: u16) {
    let val = phy::SlaveDelay::DEFAULT
        .with_taps(arbitrary_int::u11::new(taps & phy::DELAY_MAX))
        .with_override_enable(true)
        .raw_value();
    bus::phy_write(bus, mcu, slice, reg, val);
}

/// One BIST pass judged at single-bit granularity. Data slices use the
/// bit-exact capture recompare; the ECC slice only resolves to its byte
/// lane.
fn bit_passes<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: usize,
    cfg: &BistConfig,
    addr: &BistAddressSetup,
    slice: usize,
    bit: usize,
) -> Result<bool, DdrError> {
    let byte_mask = bist::run_bist(bus, delay, mcu, cfg, addr)?;
    if slice >= 8 {
        return Ok(byte_mask & (1 << 8) == 0);
    }
    if byte_mask & (1 << slice) == 0 {
        return Ok(true);
    }
    // The data-mask bit has no capture lane; the byte verdict stands for it.
    if bit >= 8 {
        return Ok(false);
    }
    let dq = (slice * 8 + bit) as u64;
    Ok(bist::mcu_bist_datacmp(bus, mcu, 1 << dq) == 0)
}

fn deskew_pass<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: &mut Mcu,
    rank: u8,
    is_write: bool,
) -> Result<bool, DdrError> {
    let id = mcu.id as usize;
    let slices = active_slices(mcu);
    let (cfg, addr) = rank_cfg(mcu, rank);
    let clamp = if is_write { WR_DESKEW_CLAMP } else { RD_DESKEW_CLAMP };

    for slice in 0..slices {
        for bit in 0..phy::BITS_PER_SLICE {
            let reg = if is_write {
                phy::wrdq_bit_delay(bit)
            } else {
                phy::rddq_bit_delay(bit)
            };
            let default =
                (bus::phy_read(bus, id, slice, reg) & phy::DELAY_MAX as u32) as u16;
            // The read search is seeded from the read-eye center found by
            // hardware leveling; writes start from the trained default.
            let start = if is_write {
                default
            } else {
                match mcu.training.rdlvl_delay[rank as usize][slice] {
                    0 => default,
                    seeded => seeded,
                }
            };

            let (value, centered) = deskew_bit(
                |taps| {
                    program_delay(bus, id, slice, reg, taps);
                    bit_passes(bus, delay, id, &cfg, &addr, slice, bit)
                },
                start,
                default,
                0,
                phy::DELAY_MAX,
                clamp,
            )?;
            program_delay(bus, id, slice, reg, value);
            if !centered {
                log::debug!(
                    "MCU {id}: rank {rank} slice {slice} bit {bit}: kept default {value:#x}"
                );
            }
        }
    }

    // Final verification at the programmed centers.
    Ok(bist::run_bist(bus, delay, id, &cfg, &addr)? == 0)
}

/// Per-bit write deskew for one rank.
pub fn mcu_bist_phy_wrdeskew<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: &mut Mcu,
    rank: u8,
) -> Result<bool, DdrError> {
    deskew_pass(bus, delay, mcu, rank, true)
}

/// Per-bit read deskew for one rank.
pub fn mcu_bist_phy_rddeskew<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: &mut Mcu,
    rank: u8,
) -> Result<bool, DdrError> {
    deskew_pass(bus, delay, mcu, rank, false)
}

/// Phases of the three-phase Vref search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VrefPhase {
    FindStart,
    SearchLow,
    SearchHigh,
    Verify,
}

/// Three-phase reference-voltage search against a boolean oracle.
///
/// 1. Step down from the top code until two consecutive coarse steps pass.
/// 2. From that start, sweep down then up one code at a time to find the
///    failing bounds.
/// 3. Program the candidate between the bounds (midpoint minus `margin`)
///    and verify it still passes; a failing verify is reported, never
///    silently replaced with a fallback code.
fn vref_search<F>(
    mut test: F,
    max_code: u8,
    coarse_step: u8,
    margin: u8,
) -> Result<Option<u8>, DdrError>
where
    F: FnMut(u8) -> Result<bool, DdrError>,
{
    let mut phase = VrefPhase::FindStart;
    let mut code = max_code;
    let mut prev_pass = false;
    let mut start = 0u8;
    let mut low = 0u8;
    let mut high = 0u8;

    loop {
        match phase {
            VrefPhase::FindStart => {
                let pass = test(code)?;
                if pass && prev_pass {
                    start = code;
                    low = code;
                    high = code;
                    phase = VrefPhase::SearchLow;
                    continue;
                }
                prev_pass = pass;
                if code < coarse_step {
                    return Ok(None);
                }
                code -= coarse_step;
            }
            VrefPhase::SearchLow => {
                if low == 0 || !test(low - 1)? {
                    code = start;
                    phase = VrefPhase::SearchHigh;
                    continue;
                }
                low -= 1;
            }
            VrefPhase::SearchHigh => {
                if high == max_code || !test(high + 1)? {
                    phase = VrefPhase::Verify;
                    continue;
                }
                high += 1;
            }
            VrefPhase::Verify => {
                let mid = ((low as u16 + high as u16) / 2) as u8;
                let candidate = mid.saturating_sub(margin);
                log::debug!(
                    "vref window [{low:#x}, {high:#x}], candidate {candidate:#x}"
                );
                return if test(candidate)? {
                    Ok(Some(candidate))
                } else {
                    Ok(None)
                };
            }
        }
    }
}

/// Apply a DRAM Vref code through the MR6 enter/adjust/exit handshake,
/// optionally steered at a single component in PDA mode.
fn set_dram_vref<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: &Mcu,
    rank: u8,
    code: u8,
    component: Option<u8>,
) -> Result<(), DdrError> {
    let id = mcu.id as usize;
    let rank_mask = 1u8 << rank;
    for (training, value) in [
        (true, code),
        (true, code),
        (false, code),
    ] {
        let opcode = crate::init::mr6_value(&mcu.info, value, training, false);
        let addr = xgene::dmc::MrsDirectAddr::DEFAULT
            .with_opcode(arbitrary_int::u18::new(opcode & 0x3FFFF))
            .with_mr_select(arbitrary_int::u3::new(6))
            .raw_value();
        bus::dmc_write(bus, id, xgene::dmc::DIRECT_ADDR, addr);
        let mut cmd = xgene::dmc::DirectCmd::DEFAULT
            .with_op(DirectOp::Mrs)
            .with_rank_mask(rank_mask);
        if let Some(c) = component {
            cmd = cmd
                .with_per_dram_addressability(true)
                .with_pda_component(arbitrary_int::u5::new(c));
        }
        bus::dmc_write(bus, id, xgene::dmc::DIRECT_CMD, cmd.raw_value());
        bus::dmc_poll(bus, delay, id, xgene::dmc::MGR_ACTIVE, 0x1, 0x0, 10_000)?;
    }
    Ok(())
}

/// DRAM-side Vref training for one rank, with the optional per-component
/// (PDA) fine-tune pass.
pub fn mcu_dram_vref_training<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: &mut Mcu,
    rank: u8,
) -> Result<bool, DdrError> {
    let id = mcu.id as usize;
    let (cfg, addr) = rank_cfg(mcu, rank);
    let margin = mcu.params.dram_vref_margin;

    let mcu_ref = &*mcu;
    let result = vref_search(
        |code| {
            set_dram_vref(bus, delay, mcu_ref, rank, code, None)?;
            Ok(bist::run_bist(bus, delay, id, &cfg, &addr)? == 0)
        },
        DRAM_VREF_MAX,
        DRAM_VREF_COARSE_STEP,
        margin,
    )?;

    let Some(code) = result else {
        log::error!("MCU {id}: rank {rank} DRAM Vref search failed");
        return Ok(false);
    };
    set_dram_vref(bus, delay, mcu, rank, code, None)?;
    log::info!("MCU {id}: rank {rank} DRAM Vref {code:#x}");

    if !mcu.params.pda_mode_enable {
        return Ok(true);
    }

    // PDA fine-tune: repeat the search per DRAM component, judged only on
    // that component's data bits.
    let components = (64 / mcu.info.device_width).min(xgene::MAX_DRAM_COMPONENTS as u8);
    for component in 0..components {
        let bits_per_dev = mcu.info.device_width as u64;
        let dev_mask = ((1u64 << bits_per_dev) - 1) << (component as u64 * bits_per_dev);
        let mcu_ref = &*mcu;
        let fine = vref_search(
            |code| {
                set_dram_vref(bus, delay, mcu_ref, rank, code, Some(component))?;
                if bist::run_bist(bus, delay, id, &cfg, &addr)? == 0 {
                    return Ok(true);
                }
                Ok(bist::mcu_bist_datacmp(bus, id, dev_mask) == 0)
            },
            DRAM_VREF_MAX,
            DRAM_VREF_COARSE_STEP,
            margin,
        )?;
        match fine {
            Some(code) => set_dram_vref(bus, delay, mcu, rank, code, Some(component))?,
            None => {
                log::error!("MCU {id}: rank {rank} component {component} PDA Vref failed");
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// PHY-side pad Vref training, once for all surviving ranks.
///
/// Returns the mask of ranks to blame on a verify failure: the pad
/// reference is shared, so an uncloseable eye taints every trained rank.
pub fn mcu_phy_vref_training<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: &mut Mcu,
    ranks: &[u8],
) -> Result<u8, DdrError> {
    let id = mcu.id as usize;
    let slices = active_slices(mcu);
    let margin = mcu.params.phy_vref_margin;
    let addr = BistAddressSetup::calibration_window();
    let mut rank_mask = 0u8;
    for &r in ranks {
        if mcu.training.rank_err_mask & (1 << r) == 0 {
            rank_mask |= 1 << r;
        }
    }
    if rank_mask == 0 {
        return Ok(0);
    }
    let mut cfg = BistConfig::for_mcu(mcu, 0);
    cfg.rank_mask = rank_mask;

    for slice in 0..slices {
        let result = vref_search(
            |code| {
                let val = phy::VrefCtrl::DEFAULT
                    .with_code(arbitrary_int::u7::new(code & phy::VREF_MAX))
                    .with_enable(true)
                    .with_range(arbitrary_int::u2::new(0))
                    .raw_value();
                bus::phy_write(bus, id, slice, phy::VREF_CTRL, val);
                Ok(bist::run_bist(bus, delay, id, &cfg, &addr)? & (1 << slice) == 0)
            },
            phy::VREF_MAX,
            PHY_VREF_COARSE_STEP,
            margin,
        )?;
        match result {
            Some(code) => {
                log::info!("MCU {id}: slice {slice} PHY Vref {code:#x}");
            }
            None => {
                log::error!("MCU {id}: slice {slice} PHY Vref search failed");
                return Ok(rank_mask);
            }
        }
    }
    Ok(0)
}

/// Software receiver offset calibration, per slice.
///
/// Sweeps the offset DAC until the sampling comparator flips, then
/// programs the midpoint of the flip region.
pub fn phy_sw_rx_calibration<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: &Mcu,
) -> Result<(), DdrError> {
    let id = mcu.id as usize;
    let slices = active_slices(mcu);

    for slice in 0..slices {
        let mut first_high: Option<u8> = None;
        let mut last_low: u8 = 0;
        for code in 0..=phy::VREF_MAX {
            let ctrl = phy::RxCalCtrl::DEFAULT
                .with_software_mode(true)
                .with_start(true)
                .with_offset_code(arbitrary_int::u7::new(code))
                .raw_value();
            bus::phy_write(bus, id, slice, phy::RX_CAL_CTRL, ctrl);
            delay.delay_us(1);
            let obs =
                phy::RxCalObs::new_with_raw_value(bus::phy_read(bus, id, slice, phy::RX_CAL_OBS));
            if obs.comparator_high() {
                first_high.get_or_insert(code);
            } else {
                last_low = code;
            }
        }
        let offset = match first_high {
            Some(high) => ((high as u16 + last_low as u16) / 2) as u8,
            None => phy::VREF_MAX / 2,
        };
        let ctrl = phy::RxCalCtrl::DEFAULT
            .with_software_mode(true)
            .with_offset_code(arbitrary_int::u7::new(offset))
            .raw_value();
        bus::phy_write(bus, id, slice, phy::RX_CAL_CTRL, ctrl);
    }

    // Consistency pass over the calibrated slices. The bounds below make
    // this loop a no-op; the observed behavior is preserved as-is rather
    // than widening the range.
    #[allow(clippy::reversed_empty_ranges)]
    for slice in NUM_PHY_SLICES..NUM_PHY_SLICES {
        let _ = bus::phy_read(bus, id, slice, phy::RX_CAL_CTRL);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use crate::params::UserParams;
    use crate::sim::{BistVerdict, NopDelay, SimBus};
    use crate::spd::SpdInfo;
    use std::boxed::Box;

    fn test_mcu() -> Mcu {
        let mut mcu = Mcu {
            id: 0,
            enabled: true,
            info: crate::DdrInfo::default(),
            params: UserParams::default(),
            spd: [Some(SpdInfo::new(0, 0, crate::sim::fake_ddr4_spd())), None],
            training: Default::default(),
        };
        crate::spd::populate_ddr_info(&mut mcu).unwrap();
        mcu
    }

    #[test]
    fn deskew_midpoint_is_window_center() {
        // Oracle passes in [100, 200].
        let mut probes = std::vec::Vec::new();
        let (value, centered) = deskew_bit(
            |t| {
                probes.push(t);
                Ok((100..=200).contains(&t))
            },
            150,
            150,
            0,
            phy::DELAY_MAX,
            WR_DESKEW_CLAMP,
        )
        .unwrap();
        assert!(centered);
        assert_eq!(value, 150);
        assert!(!probes.is_empty());
    }

    #[test]
    fn deskew_midpoint_truncates_toward_leading_edge() {
        // Window [100, 201]: fine stepping lands on even codes from an even
        // start, so the found edges are 100 and 200.
        let (value, _) = deskew_bit(
            |t| Ok((100..=201).contains(&t)),
            160,
            160,
            0,
            phy::DELAY_MAX,
            WR_DESKEW_CLAMP,
        )
        .unwrap();
        assert_eq!(value, 150);
    }

    #[test]
    fn deskew_no_window_keeps_default() {
        let (value, centered) = deskew_bit(
            |_| Ok(false),
            0x80,
            0x77,
            0,
            phy::DELAY_MAX,
            WR_DESKEW_CLAMP,
        )
        .unwrap();
        assert!(!centered);
        assert_eq!(value, 0x77);
    }

    #[test]
    fn deskew_clamp_rejects_wild_midpoint() {
        // Window far from the default: midpoint deviates beyond the clamp.
        let (value, centered) = deskew_bit(
            |t| Ok((0x500..=0x600).contains(&t)),
            0x550,
            0x10,
            0,
            phy::DELAY_MAX,
            RD_DESKEW_CLAMP,
        )
        .unwrap();
        assert!(!centered);
        assert_eq!(value, 0x10);
    }

    #[test]
    fn deskew_incomplete_propagates() {
        let err = deskew_bit(
            |_| Err(DdrError::BistIncomplete { mcu: 0 }),
            100,
            100,
            0,
            phy::DELAY_MAX,
            WR_DESKEW_CLAMP,
        )
        .unwrap_err();
        assert_eq!(err, DdrError::BistIncomplete { mcu: 0 });
    }

    #[test]
    fn vref_three_phase_finds_window_center() {
        // Passing band [0x14, 0x28].
        let code = vref_search(|c| Ok((0x14..=0x28).contains(&c)), 0x3F, 4, 0)
            .unwrap()
            .unwrap();
        assert_eq!(code, 0x1E);
    }

    #[test]
    fn vref_requires_two_consecutive_coarse_passes() {
        // A lone passing island exactly one coarse step wide never yields
        // two consecutive passes.
        let hits = core::cell::Cell::new(0u32);
        let result = vref_search(
            |c| {
                hits.set(hits.get() + 1);
                Ok(c == 0x20)
            },
            0x3F,
            4,
            0,
        )
        .unwrap();
        assert_eq!(result, None);
        assert!(hits.get() >= 16);
    }

    #[test]
    fn vref_margin_shifts_candidate_down() {
        let code = vref_search(|c| Ok((0x14..=0x28).contains(&c)), 0x3F, 4, 2)
            .unwrap()
            .unwrap();
        assert_eq!(code, 0x1C);
    }

    #[test]
    fn vref_verify_failure_is_reported_not_replaced() {
        // Window [28, 44] with an oversized margin: the candidate lands
        // below the passing band, so the final verify must fail and the
        // search reports that instead of falling back.
        let result = vref_search(|c| Ok((28..=44).contains(&c)), 0x3F, 4, 10).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn wrcal_locks_each_lane_at_its_cycle() {
        let mut bus = SimBus::new();
        // Slice 2 needs three extra cycles, everything else passes at zero.
        bus.bist_oracle = Some(Box::new(|regs| {
            let lat_addr = crate::bus::phy_addr(0, 2, phy::WRITE_PATH_LAT);
            let lat = regs.get(&lat_addr).copied().unwrap_or(0) & 0x7;
            if lat == 3 {
                BistVerdict::Pass
            } else {
                BistVerdict::Fail(1 << 2)
            }
        }));
        let mut delay = NopDelay;
        let mut mcu = test_mcu();
        let ok = mcu_bist_phy_wrcal(&mut bus, &mut delay, &mut mcu, 0).unwrap();
        assert!(ok);
        assert_eq!(mcu.training.wrcal_cycles[0][2], 3);
        assert_eq!(mcu.training.wrcal_cycles[0][0], 0);
    }

    #[test]
    fn wrcal_fails_when_a_lane_never_locks() {
        let mut bus = SimBus::new();
        bus.bist_oracle = Some(Box::new(|_| BistVerdict::Fail(1 << 5)));
        let mut delay = NopDelay;
        let mut mcu = test_mcu();
        let ok = mcu_bist_phy_wrcal(&mut bus, &mut delay, &mut mcu, 0).unwrap();
        assert!(!ok);
    }

    #[test]
    fn dram_vref_programs_winner_over_mr6() {
        let mut bus = SimBus::new();
        // Pass when the last MR6 write carried a code in [0x10, 0x20].
        bus.bist_oracle = Some(Box::new(|regs| {
            let addr_reg = crate::bus::dmc_addr(0, xgene::dmc::DIRECT_ADDR);
            let code = regs.get(&addr_reg).copied().unwrap_or(0) & 0x3F;
            if (0x10..=0x20).contains(&code) {
                BistVerdict::Pass
            } else {
                BistVerdict::Fail(0x1)
            }
        }));
        let mut delay = NopDelay;
        let mut mcu = test_mcu();
        let ok = mcu_dram_vref_training(&mut bus, &mut delay, &mut mcu, 0).unwrap();
        assert!(ok);
    }

    #[test]
    fn rx_calibration_consistency_loop_is_a_noop() {
        let mut bus = SimBus::new();
        let mut delay = NopDelay;
        let mcu = test_mcu();
        phy_sw_rx_calibration(&mut bus, &mut delay, &mcu).unwrap();
        // No slice index beyond the replicated blocks was ever touched.
        let beyond = crate::bus::phy_addr(0, NUM_PHY_SLICES, 0);
        assert!(bus.writes.iter().all(|&(a, _)| a < beyond));
    }
}
