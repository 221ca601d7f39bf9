//! DMC register map.
//!
//! The controller exposes a "now/next" register scheme: configuration
//! registers are staged by writing their `*_NEXT` image and are latched into
//! the live register set by an UPDATE direct command. Offsets below are word
//! offsets inside the DMC's ring-bus pages; offsets `>= 0x1000` live in the
//! high page (BIST and ECC blocks).

use arbitrary_int::{u2, u3, u4, u5, u6, u7, u9, u10, u12, u18};

// Status / command block.

pub const MEMC_STATUS: u16 = 0x000;
pub const MEMC_CONFIG: u16 = 0x001;
pub const MEMC_CMD: u16 = 0x002;
pub const DIRECT_ADDR: u16 = 0x004;
pub const DIRECT_CMD: u16 = 0x005;
/// Training-manager activity status, see [MgrActive].
pub const MGR_ACTIVE: u16 = 0x006;
/// Per-channel idle status, see [ChannelStatus].
pub const CHANNEL_STATUS: u16 = 0x007;
pub const RANK_STATUS: u16 = 0x008;

// Staged configuration block.

pub const ADDRESS_CONTROL_NEXT: u16 = 0x010;
pub const DECODE_CONTROL_NEXT: u16 = 0x011;
pub const FORMAT_CONTROL_NEXT: u16 = 0x012;
pub const ADDRESS_MAP_NEXT: u16 = 0x013;
pub const LOW_POWER_CONTROL_NEXT: u16 = 0x014;
pub const TURNAROUND_CONTROL_NEXT: u16 = 0x015;
pub const HIT_TURNAROUND_CONTROL_NEXT: u16 = 0x016;
pub const QOS_CONTROL_NEXT: u16 = 0x017;
pub const TIMEOUT_CONTROL_NEXT: u16 = 0x018;
pub const CREDIT_CONTROL_NEXT: u16 = 0x019;
pub const WRITE_PRIORITY_CONTROL_NEXT: u16 = 0x01A;
pub const QUEUE_THRESHOLD_CONTROL_NEXT: u16 = 0x01B;
pub const MEMORY_TYPE_NEXT: u16 = 0x01C;
pub const FEATURE_CONFIG_NEXT: u16 = 0x01D;
pub const NIBBLE_SELECT_NEXT: u16 = 0x01E;
pub const EVEN_RANK_CONTROL_NEXT: u16 = 0x01F;
pub const ODD_RANK_CONTROL_NEXT: u16 = 0x020;

/// Logical-to-physical rank remap, one nibble per logical rank.
pub const RANK_REMAP_NEXT: u16 = 0x021;

/// DQ-bit mapping control words; 72 data bits, 16 bits mapped per word.
pub const fn dq_map_control_next(idx: usize) -> u16 {
    0x022 + idx as u16
}
pub const DQ_MAP_CONTROL_WORDS: usize = 5;

pub const ODT_TIMING_NEXT: u16 = 0x028;
pub const ODT_WR_CONTROL_NEXT: u16 = 0x029;
pub const ODT_RD_CONTROL_NEXT: u16 = 0x02A;
pub const DFI_TIMING_NEXT: u16 = 0x02B;
pub const DFI_PHY_CONTROL_NEXT: u16 = 0x02C;
pub const MEMORY_ADDRESS_MAX_NEXT: u16 = 0x02D;

// Timing block. Values are in memory-clock cycles unless noted.

pub const T_REFI_NEXT: u16 = 0x040;
pub const T_RFC_NEXT: u16 = 0x041;
pub const T_MRR_NEXT: u16 = 0x042;
pub const T_MRW_NEXT: u16 = 0x043;
pub const T_RDPDEN_NEXT: u16 = 0x044;
pub const T_RCD_NEXT: u16 = 0x045;
pub const T_RAS_NEXT: u16 = 0x046;
pub const T_RP_NEXT: u16 = 0x047;
pub const T_RPALL_NEXT: u16 = 0x048;
pub const T_RRD_NEXT: u16 = 0x049;
pub const T_ACT_WINDOW_NEXT: u16 = 0x04A;
pub const T_RTR_NEXT: u16 = 0x04B;
pub const T_RTW_NEXT: u16 = 0x04C;
pub const T_RTP_NEXT: u16 = 0x04D;
pub const T_WR_NEXT: u16 = 0x04E;
pub const T_WTR_NEXT: u16 = 0x04F;
pub const T_WTW_NEXT: u16 = 0x050;
pub const T_XMPD_NEXT: u16 = 0x051;
pub const T_EP_NEXT: u16 = 0x052;
pub const T_XP_NEXT: u16 = 0x053;
pub const T_ESR_NEXT: u16 = 0x054;
pub const T_XSR_NEXT: u16 = 0x055;
pub const T_ESRCK_NEXT: u16 = 0x056;
pub const T_CKXSR_NEXT: u16 = 0x057;
pub const T_CMD_NEXT: u16 = 0x058;
pub const T_PARITY_NEXT: u16 = 0x059;
pub const T_ZQCS_NEXT: u16 = 0x05A;
pub const T_RW_ODT_CLR_NEXT: u16 = 0x05B;
pub const T_RDDATA_EN_NEXT: u16 = 0x05C;
pub const T_PHYRDLAT_NEXT: u16 = 0x05D;
pub const T_PHYWRLAT_NEXT: u16 = 0x05E;

// Hardware-training block.

pub const WRLVL_CONTROL_NEXT: u16 = 0x060;
pub const WRLVL_MRS_NEXT: u16 = 0x061;
pub const T_WRLVL_EN_NEXT: u16 = 0x062;
pub const T_WRLVL_WW_NEXT: u16 = 0x063;
pub const RDLVL_CONTROL_NEXT: u16 = 0x064;
pub const RDLVL_MRS_NEXT: u16 = 0x065;
pub const T_RDLVL_EN_NEXT: u16 = 0x066;
pub const T_RDLVL_RR_NEXT: u16 = 0x067;
/// Per-phase observation registers, non-zero error field means the last
/// hardware-assist pass failed. See [TrainingObs].
pub const TRAINING_WRLVL_OBS: u16 = 0x068;
pub const TRAINING_RDGATE_OBS: u16 = 0x069;
pub const TRAINING_RDLVL_OBS: u16 = 0x06A;

// High-page: BIST block.

pub const BIST_ADDR_MIN: u16 = 0x1000;
pub const BIST_ADDR_MAX: u16 = 0x1001;
pub const BIST_ADDR_MASK: u16 = 0x1002;
pub const BIST_CONTROL: u16 = 0x1003;
pub const BIST_LOOP_COUNT: u16 = 0x1004;
pub const BIST_ITER_COUNT: u16 = 0x1005;
pub const fn bist_data_pattern(idx: usize) -> u16 {
    0x1006 + idx as u16
}
pub const BIST_PATTERN_WORDS: usize = 4;
pub const BIST_STATUS: u16 = 0x100A;
pub const BIST_ERR_STATUS: u16 = 0x100B;
pub const BIST_BYTE_STATUS_LINE0: u16 = 0x100C;
pub const BIST_BYTE_STATUS_LINE1: u16 = 0x100D;
/// Captured write/read beats for bit-exact compare, 8 words each.
pub const fn bist_wrdata_capture(idx: usize) -> u16 {
    0x1010 + idx as u16
}
pub const fn bist_rddata_capture(idx: usize) -> u16 {
    0x1018 + idx as u16
}
pub const BIST_CAPTURE_WORDS: usize = 8;

// High-page: ECC block.

pub const ECC_CONFIG: u16 = 0x1030;
pub const ECC_ERRC_COUNT: u16 = 0x1031;
pub const ECC_ERRD_COUNT: u16 = 0x1032;
pub const ECC_ERR_INT_CLR: u16 = 0x1033;
pub const POISON_CONFIG: u16 = 0x1034;
/// Live rank capacity, one register per rank. See [RankCapacity].
pub const fn rank_capacity(rank: usize) -> u16 {
    0x1040 + rank as u16
}

/// Controller state as reported in [MemcStatus] / requested via [MemcCmd].
#[bitbybit::bitenum(u3, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum MemcState {
    Config = 0b000,
    LowPower = 0b001,
    Paused = 0b010,
    Ready = 0b011,
    Reserved4 = 0b100,
    Reserved5 = 0b101,
    Reserved6 = 0b110,
    Reserved7 = 0b111,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct MemcStatus {
    #[bits(0..=2, r)]
    state: MemcState,
    /// Set while a state transition is still draining.
    #[bit(3, r)]
    transition_pending: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct MemcCmd {
    #[bits(0..=2, rw)]
    target_state: MemcState,
}

/// Direct-command opcodes accepted through [DirectCmd].
#[bitbybit::bitenum(u4, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum DirectOp {
    /// Issues NOP/DES on the command bus; asserts CKE to the selected ranks.
    Nop = 0x0,
    /// Busy-waits the cycle count held in DIRECT_ADDR on the DRAM clock.
    Wait = 0x1,
    PowerDownEntry = 0x2,
    PowerDownExit = 0x3,
    SelfRefreshEntry = 0x4,
    SelfRefreshExit = 0x5,
    AutoRefresh = 0x6,
    /// Mode-register write; DIRECT_ADDR holds the MR select and opcode.
    Mrs = 0x7,
    /// ZQ calibration; DIRECT_ADDR bit 0 selects long (1) or short (0).
    Zqc = 0x8,
    /// Hardware training pass; DIRECT_ADDR selects the mode, see [TrainMode].
    Train = 0x9,
    /// Latch every `*_NEXT` register into the live configuration.
    Update = 0xA,
    PrechargeAll = 0xB,
    /// DRAM reset-signal control; DIRECT_ADDR bit 0 is the RESET_n level.
    ResetControl = 0xC,
    /// RCD control-word write on registered DIMMs.
    RcdWrite = 0xD,
    ReservedE = 0xE,
    ReservedF = 0xF,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct DirectCmd {
    #[bits(0..=3, rw)]
    op: DirectOp,
    /// One bit per chip-select rank the command is steered to.
    #[bits(16..=23, rw)]
    rank_mask: u8,
    /// Set to address a single DRAM component in PDA mode.
    #[bit(24, rw)]
    per_dram_addressability: bool,
    /// Component select when `per_dram_addressability` is set.
    #[bits(25..=29, rw)]
    pda_component: u5,
}

/// Hardware-assist training modes written to DIRECT_ADDR with
/// [DirectOp::Train].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u32)]
pub enum TrainMode {
    WriteLevel = 0x1,
    ReadGate = 0x2,
    ReadLevel = 0x4,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct MgrActive {
    /// Set while the training/command manager is executing a sequence.
    #[bit(0, r)]
    active: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct ChannelStatus {
    /// Channel 0 datapath idle.
    #[bit(0, r)]
    m0_idle: bool,
    #[bit(1, r)]
    m1_idle: bool,
}

/// Per-phase training observation: per-slice fail bits plus a sticky error
/// summary for the addressed rank.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct TrainingObs {
    /// One fail bit per PHY slice (bit 8 is the ECC slice).
    #[bits(0..=8, r)]
    slice_fail: u9,
    #[bit(31, r)]
    error: bool,
}

#[bitbybit::bitenum(u2, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum MemoryWidth {
    X4 = 0b00,
    X8 = 0b01,
    X16 = 0b10,
    Reserved = 0b11,
}

#[bitbybit::bitenum(u2, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum MemoryGenerationBits {
    Ddr3 = 0b00,
    Ddr4 = 0b01,
    Reserved2 = 0b10,
    Reserved3 = 0b11,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct MemoryType {
    #[bits(0..=1, rw)]
    generation: MemoryGenerationBits,
    #[bits(4..=5, rw)]
    device_width: MemoryWidth,
    /// 3DS logical-rank count encoding, log2.
    #[bits(8..=9, rw)]
    stack_height_log2: u2,
    #[bit(12, rw)]
    registered_dimm: bool,
    #[bit(13, rw)]
    load_reduced_dimm: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct AddressControl {
    #[bits(0..=3, rw)]
    column_bits: u4,
    #[bits(8..=12, rw)]
    row_bits: u5,
    #[bits(16..=18, rw)]
    bank_bits: u3,
    /// Bank-group address width, DDR4 only.
    #[bits(20..=21, rw)]
    bank_group_bits: u2,
    #[bits(24..=26, rw)]
    rank_bits: u3,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct DecodeControl {
    /// Address-map mode selecting the row/column/bank interleave recipe.
    #[bits(0..=3, rw)]
    addr_map_mode: u4,
    #[bit(8, rw)]
    bank_hash_enable: bool,
    #[bits(12..=14, rw)]
    stripe_decode: u3,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct FormatControl {
    /// Burst length as log2 (3 = BL8).
    #[bits(0..=2, rw)]
    burst_len_log2: u3,
    #[bit(8, rw)]
    crc_enable: bool,
    #[bit(9, rw)]
    write_dbi_enable: bool,
    #[bit(10, rw)]
    read_dbi_enable: bool,
    #[bit(12, rw)]
    addr_mirror_odd_ranks: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct FeatureConfig {
    #[bit(0, rw)]
    ecc_enable: bool,
    #[bit(1, rw)]
    rmw_enable: bool,
    #[bit(4, rw)]
    two_dimms_per_channel: bool,
    #[bit(8, rw)]
    parity_enable: bool,
    /// Gear-down command rate, DDR4 high-speed option.
    #[bit(12, rw)]
    geardown_enable: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct LowPowerControl {
    #[bit(0, rw)]
    auto_power_down_enable: bool,
    #[bits(8..=17, rw)]
    power_down_delay_x16: u10,
    #[bit(20, rw)]
    clock_stop_enable: bool,
}

/// Inter-command turnaround pad cycles, added on top of the JEDEC minimums.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct TurnaroundControl {
    #[bits(0..=3, rw)]
    w2r_extra: u4,
    #[bits(4..=7, rw)]
    r2w_extra: u4,
    #[bits(8..=11, rw)]
    r2r_cs_extra: u4,
    #[bits(12..=15, rw)]
    w2w_cs_extra: u4,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct OdtTiming {
    #[bits(0..=4, rw)]
    odt_wr_on: u5,
    #[bits(8..=12, rw)]
    odt_wr_off: u5,
    #[bits(16..=20, rw)]
    odt_rd_on: u5,
    #[bits(24..=28, rw)]
    odt_rd_off: u5,
}

/// ODT steering: for each commanding rank (nibble index), the mask of ranks
/// whose termination is switched on.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct OdtSteering {
    #[bits(0..=3, rw)]
    rank0: u4,
    #[bits(4..=7, rw)]
    rank1: u4,
    #[bits(8..=11, rw)]
    rank2: u4,
    #[bits(12..=15, rw)]
    rank3: u4,
    #[bits(16..=19, rw)]
    rank4: u4,
    #[bits(20..=23, rw)]
    rank5: u4,
    #[bits(24..=27, rw)]
    rank6: u4,
    #[bits(28..=31, rw)]
    rank7: u4,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct DfiTiming {
    /// Cycles from DFI write command to write data (derived from CWL).
    #[bits(0..=5, rw)]
    tphy_wrlat: u6,
    /// Cycles from DFI read command to rddata_en assertion.
    #[bits(8..=13, rw)]
    trddata_en: u6,
    /// PHY-specific read-data capture latency.
    #[bits(16..=21, rw)]
    tphy_rdlat: u6,
    #[bits(24..=27, rw)]
    tctrl_delay: u4,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct TRefi {
    /// Average refresh interval in units of 32 clocks.
    #[bits(0..=11, rw)]
    t_refi_x32: u12,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct TRfc {
    /// tRFC1, full-array refresh.
    #[bits(0..=9, rw)]
    t_rfc: u10,
    /// tRFC2.
    #[bits(10..=19, rw)]
    t_rfc2: u10,
    /// tRFC4, fine-granularity refresh.
    #[bits(20..=29, rw)]
    t_rfc4: u10,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct TRrd {
    /// tRRD_S, different bank group.
    #[bits(0..=3, rw)]
    t_rrd_s: u4,
    /// tRRD_L, same bank group.
    #[bits(8..=11, rw)]
    t_rrd_l: u4,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct TRtr {
    /// Read-to-read, same rank same bank group (tCCD_L).
    #[bits(0..=4, rw)]
    t_rtr_l: u5,
    /// Read-to-read, same rank different bank group (tCCD_S).
    #[bits(8..=12, rw)]
    t_rtr_s: u5,
    /// Read-to-read, rank-to-rank turnaround.
    #[bits(16..=20, rw)]
    t_rtr_cs: u5,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct TRtw {
    /// Read-to-write, same rank.
    #[bits(0..=5, rw)]
    t_rtw: u6,
    /// Read-to-write, rank-to-rank.
    #[bits(8..=13, rw)]
    t_rtw_cs: u6,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct TWtr {
    /// tWTR_S, different bank group.
    #[bits(0..=5, rw)]
    t_wtr_s: u6,
    /// tWTR_L, same bank group.
    #[bits(8..=13, rw)]
    t_wtr_l: u6,
    /// Write-to-read, rank-to-rank.
    #[bits(16..=21, rw)]
    t_wtr_cs: u6,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct TWtw {
    /// Write-to-write, same rank same bank group (tCCD_L).
    #[bits(0..=4, rw)]
    t_wtw_l: u5,
    /// Write-to-write, same rank different bank group (tCCD_S).
    #[bits(8..=12, rw)]
    t_wtw_s: u5,
    /// Write-to-write, rank-to-rank.
    #[bits(16..=20, rw)]
    t_wtw_cs: u5,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct TActWindow {
    /// tFAW, four-activate window.
    #[bits(0..=6, rw)]
    t_faw: u7,
    /// Max activates inside the window.
    #[bits(8..=10, rw)]
    faw_count: u3,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct WrlvlControl {
    #[bit(0, rw)]
    enable: bool,
    /// First PHY slice to level.
    #[bits(4..=7, rw)]
    start_slice: u4,
    /// Strobe-to-sample settle cycles.
    #[bits(8..=15, rw)]
    settle_cycles: u8,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct RdlvlControl {
    #[bit(0, rw)]
    enable: bool,
    /// 0 trains the read gate, 1 trains the read eye.
    #[bit(1, rw)]
    eye_mode: bool,
    #[bits(8..=15, rw)]
    settle_cycles: u8,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct BistControl {
    #[bit(0, rw)]
    start: bool,
    #[bit(1, rw)]
    stop: bool,
    /// 0: march pattern from the pattern registers, 1: PRBS.
    #[bit(4, rw)]
    prbs_mode: bool,
    #[bits(16..=23, rw)]
    rank_mask: u8,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct BistStatus {
    #[bit(0, r)]
    running: bool,
    #[bit(1, r)]
    done: bool,
    /// Sticky compare-miscompare summary.
    #[bit(4, r)]
    fail: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct EccConfig {
    #[bit(0, rw)]
    enable: bool,
    #[bit(1, rw)]
    correction_enable: bool,
    #[bit(4, rw)]
    scrub_enable: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct PoisonConfig {
    /// Report uncorrectable errors as bus poison when set.
    #[bit(0, rw)]
    report_enable: bool,
}

/// Live per-rank capacity read-back, valid once the controller is out of
/// CONFIG for the first time.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct RankCapacity {
    /// Rank capacity in 256 MiB units.
    #[bits(0..=11, r)]
    size_256mb: u12,
    #[bit(31, r)]
    valid: bool,
}

/// MRS payload staged in DIRECT_ADDR for [DirectOp::Mrs].
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct MrsDirectAddr {
    /// Mode-register opcode (A0..A17).
    #[bits(0..=17, rw)]
    opcode: u18,
    /// BA0..BA1 plus BG0 select the mode register number.
    #[bits(20..=22, rw)]
    mr_select: u3,
}
