//! Controller built-in self-test.
//!
//! The BIST engine is the pass/fail oracle behind every software
//! calibration search: configure an address window and pattern set, start,
//! poll with a budget proportional to the configured run length, and read
//! back miscompare masks at line, byte or bit granularity.

use embedded_hal::delay::DelayNs;
use xgene::dmc::{self, BistControl, BistStatus};

use crate::bus::{self, RingBus};
use crate::DdrError;

/// Controller cycles one BIST iteration is budgeted to take; the poll
/// budget scales with the configured loop/iteration counts rather than
/// being a constant.
const BIST_CYCLE_BUDGET_PER_ITER: u32 = 512;

/// March patterns used when PRBS mode is off: solid, checkerboard and the
/// two walking variants the march element cycles through.
pub const DEFAULT_PATTERNS: [u32; dmc::BIST_PATTERN_WORDS] =
    [0x0000_0000, 0xFFFF_FFFF, 0xAAAA_5555, 0x5555_AAAA];

/// Per-invocation BIST parameters; created fresh before each run.
#[derive(Debug, Clone)]
pub struct BistConfig {
    pub rank_mask: u8,
    pub loop_count: u32,
    pub iter_count: u32,
    pub prbs: bool,
    pub patterns: [u32; dmc::BIST_PATTERN_WORDS],
}

impl BistConfig {
    pub fn for_mcu(mcu: &crate::Mcu, rank: u8) -> Self {
        Self {
            rank_mask: 1 << rank,
            loop_count: mcu.params.bist_loop_count,
            iter_count: mcu.params.bist_iter_count,
            prbs: false,
            patterns: DEFAULT_PATTERNS,
        }
    }
}

/// Address window the engine sweeps.
#[derive(Debug, Clone, Copy)]
pub struct BistAddressSetup {
    pub min: u32,
    pub max: u32,
    pub mask: u32,
}

impl BistAddressSetup {
    /// A small window at the bottom of the rank, enough to exercise every
    /// bank and both bus halves.
    pub fn calibration_window() -> Self {
        Self {
            min: 0,
            max: 0xFFFF,
            mask: 0xFFFF_FFFF,
        }
    }
}

pub fn mcu_bist_config<B: RingBus>(
    bus: &mut B,
    mcu: usize,
    cfg: &BistConfig,
    addr: &BistAddressSetup,
) {
    bus::dmc_write(bus, mcu, dmc::BIST_ADDR_MIN, addr.min);
    bus::dmc_write(bus, mcu, dmc::BIST_ADDR_MAX, addr.max);
    bus::dmc_write(bus, mcu, dmc::BIST_ADDR_MASK, addr.mask);
    bus::dmc_write(bus, mcu, dmc::BIST_LOOP_COUNT, cfg.loop_count);
    bus::dmc_write(bus, mcu, dmc::BIST_ITER_COUNT, cfg.iter_count);
    for (i, pattern) in cfg.patterns.iter().enumerate() {
        bus::dmc_write(bus, mcu, dmc::bist_data_pattern(i), *pattern);
    }
}

pub fn mcu_bist_start<B: RingBus>(bus: &mut B, mcu: usize, cfg: &BistConfig) {
    let ctrl = BistControl::DEFAULT
        .with_start(true)
        .with_prbs_mode(cfg.prbs)
        .with_rank_mask(cfg.rank_mask);
    bus::dmc_write(bus, mcu, dmc::BIST_CONTROL, ctrl.raw_value());
}

pub fn mcu_bist_stop<B: RingBus>(bus: &mut B, mcu: usize) {
    let ctrl = BistControl::DEFAULT.with_stop(true);
    bus::dmc_write(bus, mcu, dmc::BIST_CONTROL, ctrl.raw_value());
}

/// Wait for completion. The retry budget is derived from the configured
/// run length; a longer test earns a proportionally longer budget. On
/// timeout the engine is stopped before the error is returned, so a
/// wedged run cannot keep the data bus busy.
pub fn mcu_bist_poll<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: usize,
    cfg: &BistConfig,
) -> Result<(), DdrError> {
    let budget_cycles = cfg
        .loop_count
        .saturating_mul(cfg.iter_count)
        .saturating_mul(BIST_CYCLE_BUDGET_PER_ITER);
    let retries = (budget_cycles / bus::POLL_INTERVAL_US).max(64);
    // Done bit of [BistStatus].
    let done = 0b010;
    match bus::dmc_poll(bus, delay, mcu, dmc::BIST_STATUS, done, done, retries) {
        Ok(()) => Ok(()),
        Err(_) => {
            mcu_bist_stop(bus, mcu);
            Err(DdrError::BistIncomplete { mcu: mcu as u8 })
        }
    }
}

/// Sticky pass/fail summary; zero means the whole run compared clean.
pub fn mcu_bist_status<B: RingBus>(bus: &mut B, mcu: usize) -> u32 {
    let status = BistStatus::new_with_raw_value(bus::dmc_read(bus, mcu, dmc::BIST_STATUS));
    status.fail() as u32
}

/// Per-line miscompare mask.
pub fn mcu_bist_err_status<B: RingBus>(bus: &mut B, mcu: usize) -> u32 {
    bus::dmc_read(bus, mcu, dmc::BIST_ERR_STATUS)
}

/// Per-byte miscompare mask for data line 0 (bit n = byte lane n).
pub fn mcu_bist_byte_status_line0<B: RingBus>(bus: &mut B, mcu: usize) -> u32 {
    bus::dmc_read(bus, mcu, dmc::BIST_BYTE_STATUS_LINE0)
}

/// Bit-exact recompare of the captured write/read beats, masked to the
/// caller's bits of interest. Bit `n` of the result is DQ bit `n`.
pub fn mcu_bist_datacmp<B: RingBus>(bus: &mut B, mcu: usize, bit_mask: u64) -> u64 {
    let mut fail = 0u64;
    for i in 0..dmc::BIST_CAPTURE_WORDS {
        let wr = bus::dmc_read(bus, mcu, dmc::bist_wrdata_capture(i));
        let rd = bus::dmc_read(bus, mcu, dmc::bist_rddata_capture(i));
        let diff = (wr ^ rd) as u64;
        // Even words carry the low bus half of a beat, odd words the high
        // half; beats fold together per DQ line.
        fail |= if i % 2 == 0 { diff } else { diff << 32 };
    }
    fail & bit_mask
}

/// The composite every calibration loop uses: configure, run, poll and
/// return the per-byte fail mask (zero is a clean pass). An incomplete run
/// is an error, distinct from a miscompare.
pub fn run_bist<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: usize,
    cfg: &BistConfig,
    addr: &BistAddressSetup,
) -> Result<u32, DdrError> {
    mcu_bist_config(bus, mcu, cfg, addr);
    mcu_bist_start(bus, mcu, cfg);
    mcu_bist_poll(bus, delay, mcu, cfg)?;
    if mcu_bist_status(bus, mcu) == 0 {
        Ok(0)
    } else {
        let mask = mcu_bist_byte_status_line0(bus, mcu);
        // A sticky fail with a clean byte mask still has to count.
        Ok(if mask == 0 { 1 } else { mask })
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use crate::sim::{BistVerdict, NopDelay, SimBus};

    fn cfg() -> BistConfig {
        BistConfig {
            rank_mask: 0x1,
            loop_count: 4,
            iter_count: 64,
            prbs: false,
            patterns: DEFAULT_PATTERNS,
        }
    }

    #[test]
    fn clean_run_returns_zero() {
        let mut bus = SimBus::new();
        let mut delay = NopDelay;
        let mask = run_bist(
            &mut bus,
            &mut delay,
            0,
            &cfg(),
            &BistAddressSetup::calibration_window(),
        )
        .unwrap();
        assert_eq!(mask, 0);
    }

    #[test]
    fn miscompare_reports_byte_mask() {
        let mut bus = SimBus::new();
        bus.bist_oracle = Some(std::boxed::Box::new(|_| BistVerdict::Fail(0b0000_0101)));
        let mut delay = NopDelay;
        let mask = run_bist(
            &mut bus,
            &mut delay,
            0,
            &cfg(),
            &BistAddressSetup::calibration_window(),
        )
        .unwrap();
        assert_eq!(mask, 0b0000_0101);
    }

    #[test]
    fn hang_is_incomplete_not_fail() {
        let mut bus = SimBus::new();
        bus.bist_oracle = Some(std::boxed::Box::new(|_| BistVerdict::Hang));
        let mut delay = NopDelay;
        let err = run_bist(
            &mut bus,
            &mut delay,
            0,
            &cfg(),
            &BistAddressSetup::calibration_window(),
        )
        .unwrap_err();
        assert_eq!(err, DdrError::BistIncomplete { mcu: 0 });
        // The engine was stopped after the timeout.
        let stop_issued = bus
            .writes
            .iter()
            .any(|&(a, v)| a == crate::bus::dmc_addr(0, xgene::dmc::BIST_CONTROL) && v & 0x2 != 0);
        assert!(stop_issued);
    }

    #[test]
    fn datacmp_folds_capture_words() {
        let mut bus = SimBus::new();
        // Beat 0: bit 3 differs in the low half, bit 33 in the high half.
        bus.regs
            .insert(crate::bus::dmc_addr(0, xgene::dmc::bist_wrdata_capture(0)), 0x8);
        bus.regs
            .insert(crate::bus::dmc_addr(0, xgene::dmc::bist_rddata_capture(0)), 0x0);
        bus.regs
            .insert(crate::bus::dmc_addr(0, xgene::dmc::bist_wrdata_capture(1)), 0x2);
        bus.regs
            .insert(crate::bus::dmc_addr(0, xgene::dmc::bist_rddata_capture(1)), 0x0);
        let fail = mcu_bist_datacmp(&mut bus, 0, u64::MAX);
        assert_eq!(fail, (1 << 3) | (1 << 33));
        // The input mask filters unrelated bits.
        assert_eq!(mcu_bist_datacmp(&mut bus, 0, 1 << 3), 1 << 3);
    }
}
