//! DMC configuration builder.
//!
//! [DmcParam] mirrors the controller's staged (`*_NEXT`) register file. The
//! builders below fill it field by field as pure computation; nothing
//! touches hardware until [commit_dmc_config] writes the whole set and
//! latches it with an UPDATE direct command.
//!
//! Build order is significant: feature, DFI and ODT parameters must be
//! computed before the general timing set, because the rank-to-rank
//! turnaround terms read the already-staged ODT windows and write latency
//! back out of the parameter block.

use arbitrary_int::{u2, u3, u4, u5, u6, u7, u10, u12};
use embedded_hal::delay::DelayNs;
use xgene::dmc::*;

use crate::bus::{self, RingBus};
use crate::{DdrError, MemoryGeneration, Mcu};

/// Ceiling division; every JEDEC cycle conversion rounds up, a computed
/// minimum must never fall below the mandated time.
#[inline]
pub const fn cdiv(a: u32, b: u32) -> u32 {
    a.div_ceil(b)
}

/// Poll budget for UPDATE/state-change completion.
const DMC_CMD_RETRIES: u32 = 10_000;

/// Staged image of the DMC configuration register file.
#[derive(Debug, Clone)]
pub struct DmcParam {
    pub address_control: AddressControl,
    pub decode_control: DecodeControl,
    pub format_control: FormatControl,
    pub address_map: u32,
    pub low_power_control: LowPowerControl,
    pub turnaround_control: TurnaroundControl,
    pub hit_turnaround_control: u32,
    pub qos_control: u32,
    pub timeout_control: u32,
    pub credit_control: u32,
    pub write_priority_control: u32,
    pub queue_threshold_control: u32,
    pub memory_type: MemoryType,
    pub feature_config: FeatureConfig,
    pub nibble_select: u32,
    pub even_rank_control: u32,
    pub odd_rank_control: u32,
    pub rank_remap: u32,
    pub dq_map: [u32; DQ_MAP_CONTROL_WORDS],
    pub odt_timing: OdtTiming,
    pub odt_wr_control: OdtSteering,
    pub odt_rd_control: OdtSteering,
    pub dfi_timing: DfiTiming,
    pub dfi_phy_control: u32,
    pub memory_address_max: u32,
    pub t_refi: TRefi,
    pub t_rfc: TRfc,
    pub t_mrr: u32,
    pub t_mrw: u32,
    pub t_rdpden: u32,
    pub t_rcd: u32,
    pub t_ras: u32,
    pub t_rp: u32,
    pub t_rpall: u32,
    pub t_rrd: TRrd,
    pub t_act_window: TActWindow,
    pub t_rtr: TRtr,
    pub t_rtw: TRtw,
    pub t_rtp: u32,
    pub t_wr: u32,
    pub t_wtr: TWtr,
    pub t_wtw: TWtw,
    pub t_xmpd: u32,
    pub t_ep: u32,
    pub t_xp: u32,
    pub t_esr: u32,
    pub t_xsr: u32,
    pub t_esrck: u32,
    pub t_ckxsr: u32,
    pub t_cmd: u32,
    pub t_parity: u32,
    pub t_zqcs: u32,
    pub t_rw_odt_clr: u32,
    pub t_rddata_en: u32,
    pub t_phyrdlat: u32,
    pub t_phywrlat: u32,
    pub wrlvl_control: WrlvlControl,
    pub wrlvl_mrs: u32,
    pub t_wrlvl_en: u32,
    pub t_wrlvl_ww: u32,
    pub rdlvl_control: RdlvlControl,
    pub rdlvl_mrs: u32,
    pub t_rdlvl_en: u32,
    pub t_rdlvl_rr: u32,
}

impl Default for DmcParam {
    fn default() -> Self {
        Self {
            address_control: AddressControl::DEFAULT,
            decode_control: DecodeControl::DEFAULT,
            format_control: FormatControl::DEFAULT,
            address_map: 0,
            low_power_control: LowPowerControl::DEFAULT,
            turnaround_control: TurnaroundControl::DEFAULT,
            hit_turnaround_control: 0,
            qos_control: 0,
            timeout_control: 0,
            credit_control: 0,
            write_priority_control: 0,
            queue_threshold_control: 0,
            memory_type: MemoryType::DEFAULT,
            feature_config: FeatureConfig::DEFAULT,
            nibble_select: 0,
            even_rank_control: 0,
            odd_rank_control: 0,
            rank_remap: 0,
            dq_map: [0; DQ_MAP_CONTROL_WORDS],
            odt_timing: OdtTiming::DEFAULT,
            odt_wr_control: OdtSteering::DEFAULT,
            odt_rd_control: OdtSteering::DEFAULT,
            dfi_timing: DfiTiming::DEFAULT,
            dfi_phy_control: 0,
            memory_address_max: 0,
            t_refi: TRefi::DEFAULT,
            t_rfc: TRfc::DEFAULT,
            t_mrr: 0,
            t_mrw: 0,
            t_rdpden: 0,
            t_rcd: 0,
            t_ras: 0,
            t_rp: 0,
            t_rpall: 0,
            t_rrd: TRrd::DEFAULT,
            t_act_window: TActWindow::DEFAULT,
            t_rtr: TRtr::DEFAULT,
            t_rtw: TRtw::DEFAULT,
            t_rtp: 0,
            t_wr: 0,
            t_wtr: TWtr::DEFAULT,
            t_wtw: TWtw::DEFAULT,
            t_xmpd: 0,
            t_ep: 0,
            t_xp: 0,
            t_esr: 0,
            t_xsr: 0,
            t_esrck: 0,
            t_ckxsr: 0,
            t_cmd: 0,
            t_parity: 0,
            t_zqcs: 0,
            t_rw_odt_clr: 0,
            t_rddata_en: 0,
            t_phyrdlat: 0,
            t_phywrlat: 0,
            wrlvl_control: WrlvlControl::DEFAULT,
            wrlvl_mrs: 0,
            t_wrlvl_en: 0,
            t_wrlvl_ww: 0,
            rdlvl_control: RdlvlControl::DEFAULT,
            rdlvl_mrs: 0,
            t_rdlvl_en: 0,
            t_rdlvl_rr: 0,
        }
    }
}

/// Chip-select address bits needed to reach every rank in the mask (slot 1
/// starts at chip select 4, so a sparse mask still widens the field).
fn rank_bits_for_mask(mask: u8) -> u8 {
    let used = match mask {
        0 => 0,
        m => 8 - m.leading_zeros() as u8,
    };
    match used {
        0 | 1 => 0,
        2 => 1,
        3 | 4 => 2,
        _ => 3,
    }
}

/// Addressing: geometry, decode recipe and the live address ceiling.
pub fn config_dmc_addressing(p: &mut DmcParam, mcu: &Mcu) {
    let info = &mcu.info;
    p.address_control = AddressControl::builder()
        .with_column_bits(u4::new(info.col_bits - 9))
        .with_row_bits(u5::new(info.row_bits - 12))
        .with_bank_bits(u3::new(info.bank_bits))
        .with_bank_group_bits(u2::new(info.bank_group_bits))
        .with_rank_bits(u3::new(rank_bits_for_mask(info.active_rank_mask)))
        .build();
    p.decode_control = DecodeControl::builder()
        .with_addr_map_mode(u4::new(info.addr_map_mode))
        .with_bank_hash_enable(false)
        .with_stripe_decode(u3::new(0))
        .build();
    p.address_map = u32::from(info.addr_map_mode);

    let total_bytes = info.rank_capacity * info.active_rank_mask.count_ones() as u64;
    // Ceiling in 256 MiB units, minus one per the register definition.
    p.memory_address_max = ((total_bytes >> 28) as u32).saturating_sub(1);

    // Identity logical-to-physical rank map; nibble n holds physical rank n.
    p.rank_remap = 0x7654_3210;
    p.even_rank_control = (info.active_rank_mask & 0x55) as u32;
    p.odd_rank_control = (info.odd_rank_mask) as u32;
    p.nibble_select = if info.device_width == 4 { 0x3FFFF } else { 0 };
}

/// Feature block: generation, widths, ECC/CRC/DBI/parity enables, the DQ
/// map and the arbitration defaults.
pub fn config_dmc_features(p: &mut DmcParam, mcu: &Mcu) {
    let info = &mcu.info;
    p.memory_type = MemoryType::builder()
        .with_generation(match info.ddr_type {
            MemoryGeneration::Ddr3 => MemoryGenerationBits::Ddr3,
            MemoryGeneration::Ddr4 => MemoryGenerationBits::Ddr4,
        })
        .with_device_width(match info.device_width {
            4 => MemoryWidth::X4,
            8 => MemoryWidth::X8,
            _ => MemoryWidth::X16,
        })
        .with_stack_height_log2(u2::new(match info.stack_height {
            1 => 0,
            2 => 1,
            4 => 2,
            _ => 3,
        }))
        .with_registered_dimm(info.registered)
        .with_load_reduced_dimm(info.load_reduced)
        .build();
    p.feature_config = FeatureConfig::builder()
        .with_ecc_enable(info.ecc_en)
        .with_rmw_enable(info.ecc_en)
        .with_two_dimms_per_channel(info.two_dpc_enable)
        .with_parity_enable(mcu.params.parity_enable)
        .with_geardown_enable(false)
        .build();
    p.format_control = FormatControl::builder()
        .with_burst_len_log2(u3::new(3))
        .with_crc_enable(info.crc_en)
        .with_write_dbi_enable(info.wr_dbi_en)
        .with_read_dbi_enable(info.rd_dbi_en)
        .with_addr_mirror_odd_ranks(info.addr_mirror)
        .build();
    // Straight-through board routing; byte n carries DQ byte n.
    p.dq_map = [0; DQ_MAP_CONTROL_WORDS];

    p.low_power_control = LowPowerControl::builder()
        .with_auto_power_down_enable(false)
        .with_power_down_delay_x16(u10::new(0x40))
        .with_clock_stop_enable(false)
        .build();
    p.qos_control = 0x0000_FF00;
    p.timeout_control = 0x0000_0FFF;
    p.credit_control = 0x0002_0402;
    p.write_priority_control = 0x0444_4444;
    p.queue_threshold_control = 0x0008_0808;
    p.hit_turnaround_control = 0x0808_0808;
}

/// ODT window for one command class given its latency.
fn odt_window(latency: u8) -> (u5, u5) {
    let on = latency.saturating_sub(2);
    // Burst of eight plus two cycles of tail.
    let off = latency + 4 + 2;
    (u5::new(on.min(31)), u5::new(off.min(31)))
}

/// Termination steering for one commanding rank: terminate on the opposite
/// slot when it exists, on the commanding rank itself otherwise (reads
/// never terminate on the target).
fn odt_steer_for_rank(info: &crate::DdrInfo, rank: u8, is_write: bool) -> u4 {
    let same_slot = if rank < 4 { 0x0F } else { 0xF0 };
    let other_slot_ranks = info.active_rank_mask & !same_slot;
    let steer = if info.two_dpc_enable {
        // Map the opposite slot's ranks into the 4-bit steering nibble.
        if rank < 4 {
            other_slot_ranks >> 4
        } else {
            other_slot_ranks & 0x0F
        }
    } else if is_write {
        1 << (rank & 0x3)
    } else {
        0
    };
    u4::new(steer & 0xF)
}

/// ODT and DFI parameters. Must run before [config_dmc_timing].
pub fn config_dmc_odt(p: &mut DmcParam, mcu: &Mcu) {
    let info = &mcu.info;
    let wl = info.cw_latency + info.parity_latency;
    let rl = info.cas_latency + info.parity_latency;

    let (wr_on, wr_off) = odt_window(wl);
    let (rd_on, rd_off) = odt_window(rl);
    p.odt_timing = OdtTiming::builder()
        .with_odt_wr_on(wr_on)
        .with_odt_wr_off(wr_off)
        .with_odt_rd_on(rd_on)
        .with_odt_rd_off(rd_off)
        .build();

    let mut wr = OdtSteering::DEFAULT;
    let mut rd = OdtSteering::DEFAULT;
    for rank in 0..8 {
        if info.active_rank_mask & (1 << rank) == 0 {
            continue;
        }
        let w = odt_steer_for_rank(info, rank, true);
        let r = odt_steer_for_rank(info, rank, false);
        wr = match rank {
            0 => wr.with_rank0(w),
            1 => wr.with_rank1(w),
            2 => wr.with_rank2(w),
            3 => wr.with_rank3(w),
            4 => wr.with_rank4(w),
            5 => wr.with_rank5(w),
            6 => wr.with_rank6(w),
            _ => wr.with_rank7(w),
        };
        rd = match rank {
            0 => rd.with_rank0(r),
            1 => rd.with_rank1(r),
            2 => rd.with_rank2(r),
            3 => rd.with_rank3(r),
            4 => rd.with_rank4(r),
            5 => rd.with_rank5(r),
            6 => rd.with_rank6(r),
            _ => rd.with_rank7(r),
        };
    }
    p.odt_wr_control = wr;
    p.odt_rd_control = rd;

    p.dfi_timing = DfiTiming::builder()
        .with_tphy_wrlat(u6::new(wl.saturating_sub(2).min(63)))
        .with_trddata_en(u6::new(rl.saturating_sub(2).min(63)))
        .with_tphy_rdlat(u6::new(16))
        .with_tctrl_delay(u4::new(2))
        .build();
    p.dfi_phy_control = 0x1;
    p.t_phywrlat = u32::from(p.dfi_timing.tphy_wrlat().value());
    p.t_rddata_en = u32::from(p.dfi_timing.trddata_en().value());
    p.t_phyrdlat = u32::from(p.dfi_timing.tphy_rdlat().value());
}

/// General timing set. Reads the staged ODT/DFI values for the
/// rank-to-rank turnaround terms, which is why it must run last.
pub fn config_dmc_timing(p: &mut DmcParam, mcu: &Mcu) {
    let info = &mcu.info;
    let tck = info.t_ck_ps;
    let primary = mcu.spd.iter().flatten().next();

    // SPD minimums; conservative JEDEC defaults when a slot decode is
    // unavailable (only reachable in unit tests).
    let (t_rcd_ps, t_ras_ps, t_rp_ps, t_rfc1, t_rfc2, t_rfc4, t_faw, t_rrd_s, t_rrd_l, t_ccd_l) =
        match primary {
            Some(spd) => (
                spd.t_rcd_min_ps(),
                spd.t_ras_min_ps(),
                spd.t_rp_min_ps(),
                spd.t_rfc1_ps(),
                spd.t_rfc2_ps(),
                spd.t_rfc4_ps(),
                spd.t_faw_ps(),
                spd.t_rrd_s_ps(),
                spd.t_rrd_l_ps(),
                spd.t_ccd_l_ps(),
            ),
            None => (
                13_750, 32_000, 13_750, 350_000, 260_000, 160_000, 21_000, 3_300, 4_900, 5_000,
            ),
        };

    // Refresh interval, halved per fine-granularity step.
    let refi_ps = 7_800_000u32 >> mcu.params.refresh_granularity;
    p.t_refi = TRefi::builder()
        .with_t_refi_x32(u12::new(cdiv(refi_ps, tck * 32).min(0xFFF) as u16))
        .build();
    p.t_rfc = TRfc::builder()
        .with_t_rfc(u10::new(cdiv(t_rfc1, tck).min(0x3FF) as u16))
        .with_t_rfc2(u10::new(cdiv(t_rfc2, tck).min(0x3FF) as u16))
        .with_t_rfc4(u10::new(cdiv(t_rfc4, tck).min(0x3FF) as u16))
        .build();

    p.t_mrr = 8;
    p.t_mrw = cdiv(15_000, tck).max(10);
    p.t_rcd = cdiv(t_rcd_ps, tck);
    p.t_ras = cdiv(t_ras_ps, tck);
    p.t_rp = cdiv(t_rp_ps, tck);
    p.t_rpall = p.t_rp + 1;
    p.t_rdpden = info.cas_latency as u32 + 4 + 1;

    p.t_rrd = TRrd::builder()
        .with_t_rrd_s(u4::new(cdiv(t_rrd_s, tck).max(4).min(15) as u8))
        .with_t_rrd_l(u4::new(cdiv(t_rrd_l, tck).max(4).min(15) as u8))
        .build();
    p.t_act_window = TActWindow::builder()
        .with_t_faw(u7::new(cdiv(t_faw, tck).min(127) as u8))
        .with_faw_count(u3::new(4))
        .build();

    let t_ccd_l_ck = cdiv(t_ccd_l, tck).max(4);
    let rl = info.cas_latency as u32 + info.parity_latency as u32;
    let wl = info.cw_latency as u32 + info.parity_latency as u32;
    let pad = &p.turnaround_control;

    // Rank-to-rank gaps derive from the staged ODT windows: the outgoing
    // termination must be off before the next rank's window opens.
    let odt_rd_tail = u32::from(p.odt_timing.odt_rd_off().value())
        - u32::from(p.odt_timing.odt_rd_on().value());
    let odt_wr_tail = u32::from(p.odt_timing.odt_wr_off().value())
        - u32::from(p.odt_timing.odt_wr_on().value());

    p.t_rtr = TRtr::builder()
        .with_t_rtr_l(u5::new(t_ccd_l_ck.min(31) as u8))
        .with_t_rtr_s(u5::new(4))
        .with_t_rtr_cs(u5::new(
            (4 + info.rd_preamble as u32 + u32::from(pad.r2r_cs_extra().value())).min(31) as u8,
        ))
        .build();
    // Read-to-write: RL + BL/2 + 2 - WL, padded by the configured gap.
    let rtw = (rl + 4 + 2).saturating_sub(wl) + u32::from(pad.r2w_extra().value());
    p.t_rtw = TRtw::builder()
        .with_t_rtw(u6::new(rtw.min(63) as u8))
        .with_t_rtw_cs(u6::new((rtw + odt_rd_tail.min(8)).min(63) as u8))
        .build();

    p.t_rtp = cdiv(7_500, tck).max(4);
    p.t_wr = cdiv(15_000, tck);

    let t_wtr_s = cdiv(2_500, tck).max(2);
    // Hard floor of four cycles regardless of the clock rate.
    let t_wtr_l = cdiv(7_500, tck).max(4);
    // Write-to-read across ranks needs the full write latency readback
    // plus the burst before the bus can turn.
    let wtr_cs = u32::from(p.dfi_timing.tphy_wrlat().value())
        + 4
        + 2
        + u32::from(pad.w2r_extra().value());
    p.t_wtr = TWtr::builder()
        .with_t_wtr_s(u6::new(t_wtr_s.min(63) as u8))
        .with_t_wtr_l(u6::new(t_wtr_l.min(63) as u8))
        .with_t_wtr_cs(u6::new(wtr_cs.min(63) as u8))
        .build();
    p.t_wtw = TWtw::builder()
        .with_t_wtw_l(u5::new(t_ccd_l_ck.min(31) as u8))
        .with_t_wtw_s(u5::new(4))
        .with_t_wtw_cs(u5::new(
            (4 + info.wr_preamble as u32
                + odt_wr_tail.min(8)
                + u32::from(pad.w2w_cs_extra().value()))
            .min(31) as u8,
        ))
        .build();

    p.t_xmpd = cdiv(10_000, tck) + 10;
    p.t_ep = cdiv(5_000, tck).max(3);
    p.t_xp = cdiv(6_000, tck).max(4);
    p.t_esr = cdiv(5_000 + tck, tck).max(4);
    p.t_xsr = cdiv(t_rfc1 + 10_000, tck);
    p.t_esrck = cdiv(10_000, tck).max(5);
    p.t_ckxsr = p.t_esrck;
    p.t_cmd = 0;
    p.t_parity = if mcu.params.parity_enable {
        info.parity_latency as u32 + 2
    } else {
        0
    };
    p.t_zqcs = 128;
    p.t_rw_odt_clr = odt_rd_tail + 2;
}

/// Hardware-leveling defaults: strobe windows and the MRS images the
/// controller drives autonomously during training.
pub fn config_dmc_training(p: &mut DmcParam, mcu: &Mcu) {
    let info = &mcu.info;
    p.wrlvl_control = WrlvlControl::builder()
        .with_enable(true)
        .with_start_slice(u4::new(0))
        .with_settle_cycles(16)
        .build();
    p.wrlvl_mrs = crate::init::mr1_value(info, &mcu.params, true);
    p.t_wrlvl_en = cdiv(40_000, info.t_ck_ps).max(16);
    p.t_wrlvl_ww = cdiv(25_000, info.t_ck_ps).max(8);
    p.rdlvl_control = RdlvlControl::builder()
        .with_enable(true)
        .with_eye_mode(false)
        .with_settle_cycles(16)
        .build();
    p.rdlvl_mrs = crate::init::mr3_value(info, true);
    p.t_rdlvl_en = cdiv(40_000, info.t_ck_ps).max(16);
    p.t_rdlvl_rr = cdiv(25_000, info.t_ck_ps).max(8);
}

/// Build the complete staged parameter block in dependency order.
pub fn build_dmc_param(mcu: &Mcu) -> DmcParam {
    let mut p = DmcParam::default();
    config_dmc_addressing(&mut p, mcu);
    config_dmc_features(&mut p, mcu);
    config_dmc_odt(&mut p, mcu);
    config_dmc_timing(&mut p, mcu);
    config_dmc_training(&mut p, mcu);
    p
}

/// Write the full staged set to the `*_NEXT` registers.
pub fn write_dmc_param<B: RingBus>(bus: &mut B, mcu: usize, p: &DmcParam) {
    use bus::dmc_write as w;
    w(bus, mcu, ADDRESS_CONTROL_NEXT, p.address_control.raw_value());
    w(bus, mcu, DECODE_CONTROL_NEXT, p.decode_control.raw_value());
    w(bus, mcu, FORMAT_CONTROL_NEXT, p.format_control.raw_value());
    w(bus, mcu, ADDRESS_MAP_NEXT, p.address_map);
    w(bus, mcu, LOW_POWER_CONTROL_NEXT, p.low_power_control.raw_value());
    w(bus, mcu, TURNAROUND_CONTROL_NEXT, p.turnaround_control.raw_value());
    w(bus, mcu, HIT_TURNAROUND_CONTROL_NEXT, p.hit_turnaround_control);
    w(bus, mcu, QOS_CONTROL_NEXT, p.qos_control);
    w(bus, mcu, TIMEOUT_CONTROL_NEXT, p.timeout_control);
    w(bus, mcu, CREDIT_CONTROL_NEXT, p.credit_control);
    w(bus, mcu, WRITE_PRIORITY_CONTROL_NEXT, p.write_priority_control);
    w(bus, mcu, QUEUE_THRESHOLD_CONTROL_NEXT, p.queue_threshold_control);
    w(bus, mcu, MEMORY_TYPE_NEXT, p.memory_type.raw_value());
    w(bus, mcu, FEATURE_CONFIG_NEXT, p.feature_config.raw_value());
    w(bus, mcu, NIBBLE_SELECT_NEXT, p.nibble_select);
    w(bus, mcu, EVEN_RANK_CONTROL_NEXT, p.even_rank_control);
    w(bus, mcu, ODD_RANK_CONTROL_NEXT, p.odd_rank_control);
    w(bus, mcu, RANK_REMAP_NEXT, p.rank_remap);
    for (i, val) in p.dq_map.iter().enumerate() {
        w(bus, mcu, dq_map_control_next(i), *val);
    }
    w(bus, mcu, ODT_TIMING_NEXT, p.odt_timing.raw_value());
    w(bus, mcu, ODT_WR_CONTROL_NEXT, p.odt_wr_control.raw_value());
    w(bus, mcu, ODT_RD_CONTROL_NEXT, p.odt_rd_control.raw_value());
    w(bus, mcu, DFI_TIMING_NEXT, p.dfi_timing.raw_value());
    w(bus, mcu, DFI_PHY_CONTROL_NEXT, p.dfi_phy_control);
    w(bus, mcu, MEMORY_ADDRESS_MAX_NEXT, p.memory_address_max);
    w(bus, mcu, T_REFI_NEXT, p.t_refi.raw_value());
    w(bus, mcu, T_RFC_NEXT, p.t_rfc.raw_value());
    w(bus, mcu, T_MRR_NEXT, p.t_mrr);
    w(bus, mcu, T_MRW_NEXT, p.t_mrw);
    w(bus, mcu, T_RDPDEN_NEXT, p.t_rdpden);
    w(bus, mcu, T_RCD_NEXT, p.t_rcd);
    w(bus, mcu, T_RAS_NEXT, p.t_ras);
    w(bus, mcu, T_RP_NEXT, p.t_rp);
    w(bus, mcu, T_RPALL_NEXT, p.t_rpall);
    w(bus, mcu, T_RRD_NEXT, p.t_rrd.raw_value());
    w(bus, mcu, T_ACT_WINDOW_NEXT, p.t_act_window.raw_value());
    w(bus, mcu, T_RTR_NEXT, p.t_rtr.raw_value());
    w(bus, mcu, T_RTW_NEXT, p.t_rtw.raw_value());
    w(bus, mcu, T_RTP_NEXT, p.t_rtp);
    w(bus, mcu, T_WR_NEXT, p.t_wr);
    w(bus, mcu, T_WTR_NEXT, p.t_wtr.raw_value());
    w(bus, mcu, T_WTW_NEXT, p.t_wtw.raw_value());
    w(bus, mcu, T_XMPD_NEXT, p.t_xmpd);
    w(bus, mcu, T_EP_NEXT, p.t_ep);
    w(bus, mcu, T_XP_NEXT, p.t_xp);
    w(bus, mcu, T_ESR_NEXT, p.t_esr);
    w(bus, mcu, T_XSR_NEXT, p.t_xsr);
    w(bus, mcu, T_ESRCK_NEXT, p.t_esrck);
    w(bus, mcu, T_CKXSR_NEXT, p.t_ckxsr);
    w(bus, mcu, T_CMD_NEXT, p.t_cmd);
    w(bus, mcu, T_PARITY_NEXT, p.t_parity);
    w(bus, mcu, T_ZQCS_NEXT, p.t_zqcs);
    w(bus, mcu, T_RW_ODT_CLR_NEXT, p.t_rw_odt_clr);
    w(bus, mcu, T_RDDATA_EN_NEXT, p.t_rddata_en);
    w(bus, mcu, T_PHYRDLAT_NEXT, p.t_phyrdlat);
    w(bus, mcu, T_PHYWRLAT_NEXT, p.t_phywrlat);
    w(bus, mcu, WRLVL_CONTROL_NEXT, p.wrlvl_control.raw_value());
    w(bus, mcu, WRLVL_MRS_NEXT, p.wrlvl_mrs);
    w(bus, mcu, T_WRLVL_EN_NEXT, p.t_wrlvl_en);
    w(bus, mcu, T_WRLVL_WW_NEXT, p.t_wrlvl_ww);
    w(bus, mcu, RDLVL_CONTROL_NEXT, p.rdlvl_control.raw_value());
    w(bus, mcu, RDLVL_MRS_NEXT, p.rdlvl_mrs);
    w(bus, mcu, T_RDLVL_EN_NEXT, p.t_rdlvl_en);
    w(bus, mcu, T_RDLVL_RR_NEXT, p.t_rdlvl_rr);
}

/// Latch the staged configuration with an UPDATE direct command.
pub fn update_dmc_config<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: usize,
) -> Result<(), DdrError> {
    crate::init::direct_cmd(bus, delay, mcu, DirectOp::Update, 0, 0)
}

/// Request a controller state and wait for the transition to drain.
pub fn memc_set_state<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: usize,
    state: MemcState,
) -> Result<(), DdrError> {
    bus::dmc_write(
        bus,
        mcu,
        MEMC_CMD,
        MemcCmd::DEFAULT.with_target_state(state).raw_value(),
    );
    // Mask covers the state field and the transition-pending bit.
    bus::dmc_poll(bus, delay, mcu, MEMC_STATUS, 0xF, state as u32, DMC_CMD_RETRIES)
        .map_err(|_| DdrError::MemcState { mcu: mcu as u8 })
}

/// Full configuration entry point: build, stage, commit.
pub fn configure_dmc<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: &Mcu,
) -> Result<(), DdrError> {
    let id = mcu.id as usize;
    memc_set_state(bus, delay, id, MemcState::Config)?;
    let param = build_dmc_param(mcu);
    write_dmc_param(bus, id, &param);
    update_dmc_config(bus, delay, id)
}
