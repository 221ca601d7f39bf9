//! JEDEC DRAM initialization.
//!
//! Direct-command plumbing, mode-register encoding for both generations,
//! RCD control words for registered modules and the fixed power-up
//! choreography: reset hold, CKE assert, MR3/MR6/MR5/MR4/MR2/MR1/MR0 in
//! that order, then ZQ long calibration.

use embedded_hal::delay::DelayNs;
use xgene::dmc::{self, DirectCmd, DirectOp};

use crate::bus::{self, RingBus};
use crate::params::UserParams;
use crate::{DdrError, DdrInfo, Mcu, MemoryGeneration};

/// Poll budget for command-manager drain after a direct command.
const DIRECT_CMD_RETRIES: u32 = 10_000;

/// Largest cycle count one WAIT direct command can carry.
const WAIT_CHUNK_CYCLES: u32 = 0xFFFF;

/// DRAM reset low time: 200 us on power-up.
const RESET_HOLD_PS: u64 = 200_000_000;
/// CKE low time after reset deassert: 500 us.
const RESET_TO_CKE_PS: u64 = 500_000_000;
/// Register clock stabilization on RDIMM/LRDIMM, tSTAB.
const RCD_STAB_PS: u64 = 5_000_000;
/// DLL lock time in cycles after clock start.
const T_DLLK_CYCLES: u32 = 767;

/// Issue one direct command and wait for the command manager to drain.
pub fn direct_cmd<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: usize,
    op: DirectOp,
    addr_value: u32,
    rank_mask: u8,
) -> Result<(), DdrError> {
    bus::dmc_write(bus, mcu, dmc::DIRECT_ADDR, addr_value);
    let cmd = DirectCmd::DEFAULT
        .with_op(op)
        .with_rank_mask(rank_mask);
    bus::dmc_write(bus, mcu, dmc::DIRECT_CMD, cmd.raw_value());
    bus::dmc_poll(
        bus,
        delay,
        mcu,
        dmc::MGR_ACTIVE,
        0x1,
        0x0,
        DIRECT_CMD_RETRIES,
    )
}

/// Busy-wait on the DRAM clock via repeated WAIT commands. The hold time is
/// counted in memory cycles, not CPU time, so a clock-rate change scales it
/// automatically.
pub fn wait_dram_cycles<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: usize,
    mut cycles: u32,
) -> Result<(), DdrError> {
    while cycles > 0 {
        let chunk = cycles.min(WAIT_CHUNK_CYCLES);
        direct_cmd(bus, delay, mcu, DirectOp::Wait, chunk, 0)?;
        cycles -= chunk;
    }
    Ok(())
}

fn ps_to_cycles(ps: u64, t_ck_ps: u32) -> u32 {
    ps.div_ceil(t_ck_ps as u64) as u32
}

// DDR4 mode-register encoders. Returned values are the DIRECT_ADDR opcode
// field (A0..A17); the MR select travels in the upper field.

/// MR0: burst length, CAS latency, write recovery, DLL reset.
pub fn mr0_value(info: &DdrInfo) -> u32 {
    match info.ddr_type {
        MemoryGeneration::Ddr4 => {
            let cl_enc: u32 = match info.cas_latency {
                9 => 0b00000,
                10 => 0b00001,
                11 => 0b00010,
                12 => 0b00011,
                13 => 0b00100,
                14 => 0b00101,
                15 => 0b00110,
                16 => 0b00111,
                18 => 0b01000,
                20 => 0b01001,
                22 => 0b01010,
                24 => 0b01011,
                17 => 0b01101,
                19 => 0b01110,
                21 => 0b01111,
                other => 0b00111.max(other as u32 & 0x1F),
            };
            let wr_cycles = crate::dmc_config::cdiv(15_000, info.t_ck_ps);
            let wr_enc: u32 = match wr_cycles {
                0..=10 => 0,
                11..=12 => 1,
                13..=14 => 2,
                15..=16 => 3,
                17..=18 => 4,
                19..=20 => 5,
                21..=24 => 6,
                _ => 7,
            };
            // CL spreads over A2 and A4..A6 plus A12; WR over A9..A11;
            // A8 requests a DLL reset.
            ((cl_enc & 0x1) << 2)
                | (((cl_enc >> 1) & 0x7) << 4)
                | (((cl_enc >> 4) & 0x1) << 12)
                | (wr_enc << 9)
                | (1 << 8)
        }
        MemoryGeneration::Ddr3 => {
            let cl = info.cas_latency as u32;
            let cl_enc = cl.saturating_sub(4);
            let wr_cycles = crate::dmc_config::cdiv(15_000, info.t_ck_ps);
            let wr_enc: u32 = match wr_cycles {
                0..=5 => 1,
                6 => 2,
                7 => 3,
                8 => 4,
                9..=10 => 5,
                11..=12 => 6,
                13..=14 => 7,
                _ => 0,
            };
            ((cl_enc & 0x1) << 2) | (((cl_enc >> 1) & 0x7) << 4) | (wr_enc << 9) | (1 << 8)
        }
    }
}

/// MR1: DLL enable, drive strength, RTT_NOM and optionally the
/// write-leveling entry bit.
pub fn mr1_value(info: &DdrInfo, params: &UserParams, write_leveling: bool) -> u32 {
    let rtt_nom = params.rtt_nom as u32;
    let drive = params.drive_strength as u32;
    let wrlvl = write_leveling as u32;
    match info.ddr_type {
        MemoryGeneration::Ddr4 => {
            0x1 | ((drive & 0x3) << 1) | (wrlvl << 7) | ((rtt_nom & 0x7) << 8)
        }
        MemoryGeneration::Ddr3 => {
            // RTT_NOM is split over A2/A6/A9 on DDR3.
            ((drive & 0x1) << 1)
                | ((rtt_nom & 0x1) << 2)
                | (((rtt_nom >> 1) & 0x1) << 6)
                | (((rtt_nom >> 2) & 0x1) << 9)
                | (wrlvl << 7)
        }
    }
}

/// MR2: CAS write latency and dynamic write termination.
pub fn mr2_value(info: &DdrInfo, params: &UserParams) -> u32 {
    match info.ddr_type {
        MemoryGeneration::Ddr4 => {
            let cwl_enc: u32 = match info.cw_latency {
                9 => 0,
                10 => 1,
                11 => 2,
                12 => 3,
                14 => 4,
                16 => 5,
                18 => 6,
                _ => 7,
            };
            let crc = info.crc_en as u32;
            (cwl_enc << 3) | ((params.rtt_wr as u32 & 0x3) << 9) | (crc << 12)
        }
        MemoryGeneration::Ddr3 => {
            let cwl_enc = (info.cw_latency as u32).saturating_sub(5);
            (cwl_enc << 3) | ((params.rtt_wr as u32 & 0x3) << 9)
        }
    }
}

/// MR3: MPR / read-training access and fine-granularity refresh.
pub fn mr3_value(info: &DdrInfo, mpr_access: bool) -> u32 {
    match info.ddr_type {
        MemoryGeneration::Ddr4 => (mpr_access as u32) << 2,
        MemoryGeneration::Ddr3 => (mpr_access as u32) << 2,
    }
}

/// MR4: preamble configuration (DDR4 only; reserved zero on DDR3).
pub fn mr4_value(info: &DdrInfo) -> u32 {
    match info.ddr_type {
        MemoryGeneration::Ddr4 => {
            let rd = (info.rd_preamble.saturating_sub(1) as u32) << 11;
            let wr = (info.wr_preamble.saturating_sub(1) as u32) << 12;
            rd | wr
        }
        MemoryGeneration::Ddr3 => 0,
    }
}

/// MR5: parity latency, RTT_PARK and data-bus inversion.
pub fn mr5_value(info: &DdrInfo, params: &UserParams) -> u32 {
    match info.ddr_type {
        MemoryGeneration::Ddr4 => {
            let pl_enc: u32 = match info.parity_latency {
                0 => 0,
                4 => 1,
                5 => 2,
                _ => 3,
            };
            pl_enc
                | ((params.rtt_park as u32 & 0x7) << 6)
                | ((info.wr_dbi_en as u32) << 11)
                | ((info.rd_dbi_en as u32) << 12)
        }
        MemoryGeneration::Ddr3 => 0,
    }
}

/// MR6: tCCD_L and the DRAM Vref training window.
pub fn mr6_value(info: &DdrInfo, vref_code: u8, vref_training: bool, range2: bool) -> u32 {
    match info.ddr_type {
        MemoryGeneration::Ddr4 => {
            let t_ccd_l = crate::dmc_config::cdiv(5_000, info.t_ck_ps).max(4);
            (vref_code as u32 & 0x3F)
                | ((range2 as u32) << 6)
                | ((vref_training as u32) << 7)
                | ((t_ccd_l.saturating_sub(4) & 0x7) << 10)
        }
        MemoryGeneration::Ddr3 => 0,
    }
}

fn mrs<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: usize,
    mr: u8,
    value: u32,
    rank_mask: u8,
) -> Result<(), DdrError> {
    let addr = dmc::MrsDirectAddr::DEFAULT
        .with_opcode(arbitrary_int::u18::new(value & 0x3FFFF))
        .with_mr_select(arbitrary_int::u3::new(mr))
        .raw_value();
    direct_cmd(bus, delay, mcu, DirectOp::Mrs, addr, rank_mask)
}

/// Program every mode register in the fixed order. The MR6 pair enters and
/// leaves Vref-training mode so the DRAM latches the initial reference.
pub fn dram_mrs_program<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: &Mcu,
) -> Result<(), DdrError> {
    let id = mcu.id as usize;
    let info = &mcu.info;
    let params = &mcu.params;
    let ranks = info.active_rank_mask;
    match info.ddr_type {
        MemoryGeneration::Ddr4 => {
            let vref = initial_vref_code(info);
            mrs(bus, delay, id, 3, mr3_value(info, false), ranks)?;
            mrs(bus, delay, id, 6, mr6_value(info, vref, true, false), ranks)?;
            mrs(bus, delay, id, 6, mr6_value(info, vref, false, false), ranks)?;
            mrs(bus, delay, id, 5, mr5_value(info, params), ranks)?;
            mrs(bus, delay, id, 4, mr4_value(info), ranks)?;
            mrs(bus, delay, id, 2, mr2_value(info, params), ranks)?;
            mrs(bus, delay, id, 1, mr1_value(info, params, false), ranks)?;
            mrs(bus, delay, id, 0, mr0_value(info), ranks)?;
        }
        MemoryGeneration::Ddr3 => {
            mrs(bus, delay, id, 2, mr2_value(info, params), ranks)?;
            mrs(bus, delay, id, 3, mr3_value(info, false), ranks)?;
            mrs(bus, delay, id, 1, mr1_value(info, params, false), ranks)?;
            mrs(bus, delay, id, 0, mr0_value(info), ranks)?;
        }
    }
    Ok(())
}

/// Power-up DRAM Vref starting code: mid-range until training moves it.
pub fn initial_vref_code(_info: &DdrInfo) -> u8 {
    0x20
}

/// ZQ long calibration. The settle time depends on the generation and on
/// whether this is the first calibration after reset.
pub fn dram_zqcl<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: &Mcu,
    first: bool,
) -> Result<(), DdrError> {
    let id = mcu.id as usize;
    let wait_cycles = match (mcu.info.ddr_type, first) {
        (MemoryGeneration::Ddr4, true) => 1024,
        (MemoryGeneration::Ddr4, false) => 512,
        (MemoryGeneration::Ddr3, true) => 512,
        (MemoryGeneration::Ddr3, false) => 256,
    };
    direct_cmd(bus, delay, id, DirectOp::Zqc, 1, mcu.info.active_rank_mask)?;
    wait_dram_cycles(bus, delay, id, wait_cycles)
}

/// RCD control words for registered and load-reduced modules.
///
/// Word layout on the command bus: control-word index in bits 4..8, data
/// nibble in bits 0..4.
pub fn config_rcd_buffer<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: &Mcu,
) -> Result<(), DdrError> {
    let id = mcu.id as usize;
    let info = &mcu.info;
    // Frequency band nibble for RC0A/RC3X.
    let freq_nibble: u32 = match info.t_ck_ps {
        0..=749 => 5,
        750..=832 => 4,
        833..=937 => 3,
        938..=1070 => 2,
        1071..=1249 => 1,
        _ => 0,
    };
    let words: [(u32, u32); 8] = [
        (0x0, 0x0),             // RC00: global features default
        (0x2, 0x0),             // RC02: timing/performance default
        (0x3, 0x5),             // RC03: CA bus drive
        (0x4, 0x5),             // RC04: ODT/CKE drive
        (0x5, 0x5),             // RC05: clock drive
        (0xA, freq_nibble),     // RC0A: operating band
        (0xD, if info.addr_mirror { 0x8 } else { 0x0 } | 0x4), // RC0D: CS mode, mirroring
        (0xE, mcu.params.parity_enable as u32), // RC0E: parity
    ];
    for (index, nibble) in words {
        let payload = (index << 4) | nibble;
        direct_cmd(bus, delay, id, DirectOp::RcdWrite, payload, info.active_rank_mask)?;
    }
    // Register output clocks need tSTAB before the DRAM sees stable CA.
    wait_dram_cycles(bus, delay, id, ps_to_cycles(RCD_STAB_PS, info.t_ck_ps))
}

/// Full JEDEC power-up sequence for one controller.
pub fn dram_init<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: &Mcu,
) -> Result<(), DdrError> {
    let id = mcu.id as usize;
    let info = &mcu.info;
    let t_ck = info.t_ck_ps;

    direct_cmd(bus, delay, id, DirectOp::PowerDownEntry, 0, info.active_rank_mask)?;

    // Hold RESET_n low for the power-up time, counted on the DRAM clock.
    direct_cmd(bus, delay, id, DirectOp::ResetControl, 0, 0)?;
    wait_dram_cycles(bus, delay, id, ps_to_cycles(RESET_HOLD_PS, t_ck))?;
    direct_cmd(bus, delay, id, DirectOp::ResetControl, 1, 0)?;
    wait_dram_cycles(bus, delay, id, ps_to_cycles(RESET_TO_CKE_PS, t_ck))?;

    if info.registered {
        wait_dram_cycles(bus, delay, id, ps_to_cycles(RCD_STAB_PS, t_ck))?;
        wait_dram_cycles(bus, delay, id, T_DLLK_CYCLES)?;
    }

    // NOP asserts CKE to every initialized rank.
    direct_cmd(bus, delay, id, DirectOp::Nop, 0, info.active_rank_mask)?;

    if info.registered {
        config_rcd_buffer(bus, delay, mcu)?;
    }

    dram_mrs_program(bus, delay, mcu)?;
    dram_zqcl(bus, delay, mcu, true)?;
    log::debug!("MCU {id}: DRAM init complete");
    Ok(())
}
