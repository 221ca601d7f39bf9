//! DDR PHY register map.
//!
//! The PHY replicates one register block per data slice (eight byte lanes
//! plus the ECC lane) at a fixed 512-byte stride in its low ring-bus page;
//! the global control block lives in the high page. Delay-line codes are
//! 11-bit tap counts, voltage-reference codes are 7-bit DAC steps.

use arbitrary_int::{u2, u3, u4, u5, u6, u7, u11};

/// Byte stride between consecutive slice register blocks.
pub const SLICE_STRIDE: u32 = 512;

/// Full-scale delay-line tap code.
pub const DELAY_MAX: u16 = 0x7FF;
/// Full-scale PHY pad Vref DAC code.
pub const VREF_MAX: u8 = 0x7F;

// Per-slice registers (word offsets inside one slice block).

pub const DQ_TIMING: u16 = 0x00;
pub const DQS_TIMING: u16 = 0x01;
pub const GATE_LPBK_CTRL: u16 = 0x02;
pub const READ_CTRL: u16 = 0x03;
pub const WRITE_PATH_LAT: u16 = 0x04;
pub const DRIVE_CTRL: u16 = 0x05;
pub const TERM_CTRL: u16 = 0x06;
pub const CAL_MODE: u16 = 0x07;
/// Write-leveling DQS slave delay, programmed by hardware leveling.
pub const WRLVL_DELAY: u16 = 0x08;
pub const WRLVL_RESULT: u16 = 0x09;
/// Read-gate slave delay.
pub const GATE_SLAVE_DELAY: u16 = 0x0A;
pub const GATE_RESULT: u16 = 0x0B;
/// Read-eye center delay found by hardware read leveling.
pub const RDLVL_DELAY: u16 = 0x0C;
pub const RDLVL_RESULT: u16 = 0x0D;
/// Whole-cycle write-path latency adjust used by write calibration.
pub const WRDQS_EXTRA_CYCLE: u16 = 0x0E;
/// Per-pad receive reference voltage.
pub const VREF_CTRL: u16 = 0x0F;
pub const RX_CAL_CTRL: u16 = 0x12;
pub const RX_CAL_OBS: u16 = 0x13;

/// Per-bit write deskew delay; bits 0..7 are DQ, bit 8 is DM.
pub const fn wrdq_bit_delay(bit: usize) -> u16 {
    0x20 + bit as u16
}
/// Per-bit read deskew delay.
pub const fn rddq_bit_delay(bit: usize) -> u16 {
    0x30 + bit as u16
}
/// Deskewable bits per slice: eight data bits plus the data-mask bit.
pub const BITS_PER_SLICE: usize = 9;

/// Word offset of a per-slice register on the PHY low page.
#[inline]
pub const fn slice_reg(slice: usize, reg: u16) -> u16 {
    (slice as u16) * (SLICE_STRIDE / 4) as u16 + reg
}

// Global registers (word offsets in the PHY high page).

pub const PHY_CTRL: u16 = 0x000;
pub const PHY_CAL_START: u16 = 0x001;
pub const PHY_CAL_STATUS: u16 = 0x002;
pub const PHY_LVL_CTRL: u16 = 0x003;
pub const PHY_LVL_STATUS: u16 = 0x004;
/// Frequency-set selector and DLL range control.
pub const PHY_FREQ_SEL: u16 = 0x005;
pub const PHY_LP_CTRL: u16 = 0x006;

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct DqTiming {
    /// Output-enable lead, in half cycles before the first data beat.
    #[bits(0..=3, rw)]
    oe_start: u4,
    /// Output-enable lag after the last beat.
    #[bits(4..=7, rw)]
    oe_end: u4,
    /// Input-enable lead for reads.
    #[bits(8..=11, rw)]
    ie_start: u4,
    #[bits(12..=15, rw)]
    ie_end: u4,
    /// Data-mask pad follows DQ timing when set.
    #[bit(16, rw)]
    dm_follow_dq: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct DqsTiming {
    #[bits(0..=3, rw)]
    oe_start: u4,
    #[bits(4..=7, rw)]
    oe_end: u4,
    /// Preamble length in half cycles (DDR4: 1 or 2 tCK).
    #[bits(8..=9, rw)]
    preamble: u2,
    /// Differential DQS receiver enable.
    #[bit(12, rw)]
    diff_rx_enable: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct GateLpbkCtrl {
    /// Gate-training loopback mode select.
    #[bits(0..=1, rw)]
    mode: u2,
    /// Coarse gate open delay in half cycles.
    #[bits(4..=9, rw)]
    gate_open: u6,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct ReadCtrl {
    /// Read-data FIFO pointer separation.
    #[bits(0..=2, rw)]
    fifo_ptr_gap: u3,
    #[bit(4, rw)]
    dfi_aligned: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct DriveCtrl {
    /// Output driver impedance code.
    #[bits(0..=4, rw)]
    drive_p: u5,
    #[bits(8..=12, rw)]
    drive_n: u5,
    /// Pad slew-rate trim.
    #[bits(16..=18, rw)]
    slew: u3,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct TermCtrl {
    /// Receiver termination impedance code.
    #[bits(0..=4, rw)]
    term_code: u5,
    #[bit(8, rw)]
    term_enable: bool,
    /// Dynamic ODT tracking of the controller's steering outputs.
    #[bit(9, rw)]
    dynamic_odt: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct CalMode {
    /// Periodic impedance recalibration enable.
    #[bit(0, rw)]
    periodic_enable: bool,
    /// Recalibration interval, log2 cycles.
    #[bits(4..=7, rw)]
    interval_log2: u4,
    #[bit(8, rw)]
    on_srx_exit: bool,
}

/// One delay-line register; all slave-delay registers share this layout.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct SlaveDelay {
    #[bits(0..=10, rw)]
    taps: u11,
    /// Force the delay line to load `taps` instead of the trained value.
    #[bit(16, rw)]
    override_enable: bool,
}

/// Per-slice leveling observation; layout shared by WRLVL/GATE/RDLVL result
/// registers.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct LevelingResult {
    /// Trained tap code latched by the last hardware pass.
    #[bits(0..=10, r)]
    taps: u11,
    /// Hardware found no transition inside the search window.
    #[bit(16, r)]
    no_window: bool,
    #[bit(31, r)]
    error: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct VrefCtrl {
    /// Receiver reference-voltage DAC code.
    #[bits(0..=6, rw)]
    code: u7,
    #[bit(8, rw)]
    enable: bool,
    /// Select the single-ended DQ receiver range.
    #[bits(12..=13, rw)]
    range: u2,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct WritePathLat {
    /// Whole-cycle latency added to the write datapath of this slice.
    #[bits(0..=2, rw)]
    cycles: u3,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct RxCalCtrl {
    #[bit(0, rw)]
    start: bool,
    /// Offset-cancellation DAC code under software control.
    #[bits(4..=10, rw)]
    offset_code: u7,
    #[bit(12, rw)]
    software_mode: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct RxCalObs {
    /// Comparator output for the currently applied offset code.
    #[bit(0, r)]
    comparator_high: bool,
    #[bit(4, r)]
    done: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct PhyCtrl {
    #[bit(0, rw)]
    reset: bool,
    #[bit(1, rw)]
    cal_clk_enable: bool,
    /// Per-rank independent delay sets.
    #[bit(4, rw)]
    multi_rank_mode: bool,
    #[bits(8..=10, rw)]
    cs_map_sel: u3,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct PhyCalStatus {
    #[bit(0, r)]
    done: bool,
    #[bit(1, r)]
    error: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct PhyLvlCtrl {
    /// Route hardware-leveling requests from the controller when set.
    #[bit(0, rw)]
    dfi_leveling_enable: bool,
    /// Rank addressed by the next leveling pass.
    #[bits(4..=6, rw)]
    rank_sel: u3,
}
