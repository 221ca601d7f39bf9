//! SPD EEPROM decoding.
//!
//! Raw SPD images are fetched over the management I2C bus by the board
//! hooks; this module validates them (JEDEC CRC16), decodes geometry and
//! timing into picoseconds using the medium/fine-timebase scheme, selects
//! CAS and CAS-write latencies for the requested speed bin, and performs the
//! slot-compatibility check for two-DIMM channels.

use crate::{DdrError, MemoryGeneration};

/// DDR4 SPD image length.
pub const SPD_DDR4_LEN: usize = 512;
/// DDR3 SPD image length.
pub const SPD_DDR3_LEN: usize = 128;

/// Number of leading bytes covered by the base-configuration CRC.
pub const SPD_CRC_COVERAGE: usize = 126;

/// JEDEC byte 2 device-type codes.
const DEVICE_TYPE_DDR3: u8 = 0x0B;
const DEVICE_TYPE_DDR4: u8 = 0x0C;

/// Medium timebase, picoseconds.
const MTB_PS: i32 = 125;

/// CAS latency cap: `CL * tCK` must not exceed this (DDR4).
const CAS_CAP_DDR4_PS: u32 = 18_000;
/// Same cap for DDR3.
const CAS_CAP_DDR3_PS: u32 = 20_000;

/// Module types from SPD byte 3 (DDR4 encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleType {
    Rdimm,
    Udimm,
    Sodimm,
    Lrdimm,
    Other(u8),
}

/// DRAM package classes decoded from SPD byte 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageType {
    Monolithic,
    DualDie,
    ThreeDs,
}

/// One validated-or-rejected SPD slot image.
#[derive(Clone)]
pub struct SpdInfo {
    pub mcu: u8,
    pub slot: u8,
    data: [u8; SPD_DDR4_LEN],
}

/// CRC-16 over the base configuration section, CCITT polynomial, zero init,
/// as specified by JEDEC for SPD.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Decode a medium/fine timebase pair into picoseconds.
///
/// The fine-timebase byte is an offset in signed two's complement; values
/// above 127 count down.
pub fn compute_spd_timing(mtb_units: u8, ftb_units: u8) -> u32 {
    let ftb_signed = if ftb_units > 127 {
        ftb_units as i32 - 256
    } else {
        ftb_units as i32
    };
    (mtb_units as i32 * MTB_PS + ftb_signed) as u32
}

/// 16-bit medium-timebase variant used by tRFC and friends (no fine adjust).
fn timing16(lsb: u8, msb: u8) -> u32 {
    (((msb as u32) << 8) | lsb as u32) * MTB_PS as u32
}

impl SpdInfo {
    pub fn new(mcu: u8, slot: u8, data: [u8; SPD_DDR4_LEN]) -> Self {
        Self { mcu, slot, data }
    }

    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    fn byte(&self, idx: usize) -> u8 {
        self.data[idx]
    }

    /// Validate the base-section CRC. A failure means the slot is treated
    /// as unpopulated, not that the boot halts.
    pub fn check(&self) -> Result<(), DdrError> {
        let computed = crc16(&self.data[..SPD_CRC_COVERAGE]);
        let stored =
            (self.byte(SPD_CRC_COVERAGE) as u16) | ((self.byte(SPD_CRC_COVERAGE + 1) as u16) << 8);
        if computed != stored {
            return Err(DdrError::SpdCrc {
                mcu: self.mcu,
                slot: self.slot,
            });
        }
        Ok(())
    }

    pub fn generation(&self) -> Option<MemoryGeneration> {
        match self.byte(2) {
            DEVICE_TYPE_DDR3 => Some(MemoryGeneration::Ddr3),
            DEVICE_TYPE_DDR4 => Some(MemoryGeneration::Ddr4),
            _ => None,
        }
    }

    pub fn module_type(&self) -> ModuleType {
        let code = self.byte(3) & 0x0F;
        match (self.generation(), code) {
            (_, 1) => ModuleType::Rdimm,
            (_, 2) => ModuleType::Udimm,
            (_, 3) => ModuleType::Sodimm,
            (Some(MemoryGeneration::Ddr4), 4) => ModuleType::Lrdimm,
            (Some(MemoryGeneration::Ddr3), 11) => ModuleType::Lrdimm,
            (_, other) => ModuleType::Other(other),
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self.module_type(), ModuleType::Rdimm | ModuleType::Lrdimm)
    }

    pub fn package_type(&self) -> PackageType {
        // DDR3 has no stacked-package descriptor; everything is monolithic.
        if self.generation() == Some(MemoryGeneration::Ddr3) || self.byte(6) & 0x80 == 0 {
            return PackageType::Monolithic;
        }
        match self.byte(6) & 0x03 {
            2 => PackageType::ThreeDs,
            _ => PackageType::DualDie,
        }
    }

    /// Die count inside the DRAM package.
    pub fn die_count(&self) -> u8 {
        match self.generation() {
            Some(MemoryGeneration::Ddr3) => 1,
            _ => ((self.byte(6) >> 4) & 0x7) + 1,
        }
    }

    /// Module-organization byte: 12 on DDR4, 7 on DDR3.
    fn organization(&self) -> u8 {
        match self.generation() {
            Some(MemoryGeneration::Ddr3) => self.byte(7),
            _ => self.byte(12),
        }
    }

    /// Bus-width byte: 13 on DDR4, 8 on DDR3.
    fn bus_width_byte(&self) -> u8 {
        match self.generation() {
            Some(MemoryGeneration::Ddr3) => self.byte(8),
            _ => self.byte(13),
        }
    }

    /// Chip-select ranks driven by the module edge connector.
    pub fn package_ranks(&self) -> u8 {
        ((self.organization() >> 3) & 0x7) + 1
    }

    /// Logical ranks: package ranks multiplied by the 3DS stack height.
    pub fn logical_ranks(&self) -> u8 {
        match self.package_type() {
            PackageType::ThreeDs => self.package_ranks() * self.die_count(),
            _ => self.package_ranks(),
        }
    }

    /// DRAM device data width in bits (4, 8 or 16).
    pub fn device_width(&self) -> u8 {
        4 << (self.organization() & 0x7)
    }

    /// Primary bus width in bits, not counting ECC extension.
    pub fn primary_bus_width(&self) -> u8 {
        8 << (self.bus_width_byte() & 0x7)
    }

    pub fn has_ecc(&self) -> bool {
        (self.bus_width_byte() >> 3) & 0x3 == 1
    }

    /// Single-die SDRAM capacity in megabits.
    pub fn sdram_capacity_mbit(&self) -> u32 {
        256 << (self.byte(4) & 0x0F)
    }

    pub fn bank_bits(&self) -> u8 {
        match self.generation() {
            Some(MemoryGeneration::Ddr4) => 2 + ((self.byte(4) >> 4) & 0x3),
            _ => 3 + ((self.byte(4) >> 4) & 0x7),
        }
    }

    /// Bank-group address bits, zero on DDR3.
    pub fn bank_group_bits(&self) -> u8 {
        match self.generation() {
            Some(MemoryGeneration::Ddr4) => (self.byte(4) >> 6) & 0x3,
            _ => 0,
        }
    }

    pub fn column_bits(&self) -> u8 {
        9 + (self.byte(5) & 0x7)
    }

    pub fn row_bits(&self) -> u8 {
        12 + ((self.byte(5) >> 3) & 0x7)
    }

    /// Capacity of one rank in bytes.
    pub fn rank_capacity(&self) -> u64 {
        let devices = (self.primary_bus_width() / self.device_width()) as u64;
        (self.sdram_capacity_mbit() as u64 * 1024 * 1024 / 8) * devices
    }

    fn is_ddr3(&self) -> bool {
        self.generation() == Some(MemoryGeneration::Ddr3)
    }

    /// Odd ranks use a mirrored address layout on this module.
    pub fn address_mirrored(&self) -> bool {
        let map_byte = if self.is_ddr3() {
            63
        } else if self.is_registered() {
            136
        } else {
            131
        };
        self.byte(map_byte) & 0x1 != 0
    }

    /// Minimum clock period tCKAVGmin in picoseconds.
    pub fn t_ck_min_ps(&self) -> u32 {
        if self.is_ddr3() {
            compute_spd_timing(self.byte(12), self.byte(34))
        } else {
            compute_spd_timing(self.byte(18), self.byte(125))
        }
    }

    pub fn t_aa_min_ps(&self) -> u32 {
        if self.is_ddr3() {
            compute_spd_timing(self.byte(16), self.byte(35))
        } else {
            compute_spd_timing(self.byte(24), self.byte(123))
        }
    }

    pub fn t_rcd_min_ps(&self) -> u32 {
        if self.is_ddr3() {
            compute_spd_timing(self.byte(18), self.byte(36))
        } else {
            compute_spd_timing(self.byte(25), self.byte(122))
        }
    }

    pub fn t_rp_min_ps(&self) -> u32 {
        if self.is_ddr3() {
            compute_spd_timing(self.byte(20), self.byte(37))
        } else {
            compute_spd_timing(self.byte(26), self.byte(121))
        }
    }

    pub fn t_ras_min_ps(&self) -> u32 {
        let (nibble, lsb) = if self.is_ddr3() {
            (self.byte(21) & 0x0F, self.byte(22))
        } else {
            (self.byte(27) & 0x0F, self.byte(28))
        };
        (((nibble as u32) << 8) | lsb as u32) * MTB_PS as u32
    }

    pub fn t_rc_min_ps(&self) -> u32 {
        let (mtb, ftb) = if self.is_ddr3() {
            (
                ((self.byte(21) as u32 & 0xF0) << 4) | self.byte(23) as u32,
                self.byte(38),
            )
        } else {
            (
                ((self.byte(27) as u32 & 0xF0) << 4) | self.byte(29) as u32,
                self.byte(120),
            )
        };
        let ftb_signed = if ftb > 127 { ftb as i32 - 256 } else { ftb as i32 };
        (mtb as i32 * MTB_PS + ftb_signed) as u32
    }

    pub fn t_rfc1_ps(&self) -> u32 {
        if self.is_ddr3() {
            timing16(self.byte(24), self.byte(25))
        } else {
            timing16(self.byte(30), self.byte(31))
        }
    }

    /// tRFC2; DDR3 has no fine-granularity refresh, the full value applies.
    pub fn t_rfc2_ps(&self) -> u32 {
        if self.is_ddr3() {
            self.t_rfc1_ps()
        } else {
            timing16(self.byte(32), self.byte(33))
        }
    }

    pub fn t_rfc4_ps(&self) -> u32 {
        if self.is_ddr3() {
            self.t_rfc1_ps()
        } else {
            timing16(self.byte(34), self.byte(35))
        }
    }

    pub fn t_faw_ps(&self) -> u32 {
        let (nibble, lsb) = if self.is_ddr3() {
            (self.byte(28) & 0x0F, self.byte(29))
        } else {
            (self.byte(36) & 0x0F, self.byte(37))
        };
        (((nibble as u32) << 8) | lsb as u32) * MTB_PS as u32
    }

    pub fn t_rrd_s_ps(&self) -> u32 {
        if self.is_ddr3() {
            compute_spd_timing(self.byte(19), 0)
        } else {
            compute_spd_timing(self.byte(38), self.byte(119))
        }
    }

    pub fn t_rrd_l_ps(&self) -> u32 {
        if self.is_ddr3() {
            // One activate-to-activate class only.
            self.t_rrd_s_ps()
        } else {
            compute_spd_timing(self.byte(39), self.byte(118))
        }
    }

    pub fn t_ccd_l_ps(&self) -> u32 {
        if self.is_ddr3() {
            // Fixed 4-clock tCCD, no long variant.
            4 * self.t_ck_min_ps()
        } else {
            compute_spd_timing(self.byte(40), self.byte(117))
        }
    }

    /// Supported CAS latencies as a bitmap indexed by the latency value
    /// itself (bit `n` set means CL `n` is supported).
    pub fn cas_bitmap(&self) -> u64 {
        match self.generation() {
            Some(MemoryGeneration::Ddr4) => {
                let raw = u32::from_le_bytes([
                    self.byte(20),
                    self.byte(21),
                    self.byte(22),
                    self.byte(23) & 0x7F,
                ]);
                // First CL range: bit i encodes CL 7 + i.
                (raw as u64) << 7
            }
            _ => {
                let raw = (self.byte(14) as u32) | ((self.byte(15) as u32) << 8);
                // DDR3: bit i encodes CL 4 + i.
                (raw as u64) << 4
            }
        }
    }

    /// Module manufacturer id (JEP-106 code), used only for slot matching.
    pub fn manufacturer_id(&self) -> u16 {
        if self.is_ddr3() {
            (self.byte(117) as u16) | ((self.byte(118) as u16) << 8)
        } else {
            (self.byte(320) as u16) | ((self.byte(321) as u16) << 8)
        }
    }
}

/// Select the lowest supported CAS latency that meets `t_aa_min_ps` at the
/// operating clock.
///
/// Starting at `ceil(tAA / tCK)`, walks upward through the support bitmap
/// for at most 16 steps, then rejects the result if the absolute latency
/// cap for the generation is exceeded.
pub fn select_cas_latency(
    bitmap: u64,
    t_aa_min_ps: u32,
    t_ck_ps: u32,
    generation: MemoryGeneration,
) -> Result<u8, DdrError> {
    let min_cl = crate::dmc_config::cdiv(t_aa_min_ps, t_ck_ps);
    let cap_ps = match generation {
        MemoryGeneration::Ddr4 => CAS_CAP_DDR4_PS,
        MemoryGeneration::Ddr3 => CAS_CAP_DDR3_PS,
    };
    for step in 0..16 {
        let cl = min_cl + step;
        if cl < 64 && bitmap & (1u64 << cl) != 0 {
            if cl * t_ck_ps > cap_ps {
                return Err(DdrError::CasLatency {
                    required: cl as u8,
                    t_ck_ps,
                });
            }
            return Ok(cl as u8);
        }
    }
    Err(DdrError::CasLatency {
        required: min_cl as u8,
        t_ck_ps,
    })
}

/// CAS write latency for the operating clock, JEDEC first set.
pub fn cas_write_latency(t_ck_ps: u32, generation: MemoryGeneration) -> u8 {
    match generation {
        MemoryGeneration::Ddr4 => match t_ck_ps {
            0..=749 => 16,
            750..=832 => 14,
            833..=937 => 12,
            938..=1070 => 11,
            1071..=1249 => 10,
            _ => 9,
        },
        MemoryGeneration::Ddr3 => match t_ck_ps {
            0..=1070 => 9,
            1071..=1249 => 8,
            1250..=1499 => 7,
            1500..=1874 => 6,
            _ => 5,
        },
    }
}

/// Geometry/identity bytes that must match between the two slots of one
/// channel. Layout bytes first, then the minimum-timing bytes, then the
/// module manufacturer id.
const COMPARE_BYTES_DDR4: &[usize] = &[
    2, 3, 4, 5, 6, 12, 13, 18, 24, 25, 26, 27, 28, 29, 320, 321,
];
const COMPARE_BYTES_DDR3: &[usize] = &[
    2, 3, 4, 5, 7, 8, 12, 16, 18, 20, 21, 22, 23, 117, 118,
];

/// Field-by-field comparison of two SPD images on the same channel.
///
/// Returns the number of mismatching fields; any non-zero count makes the
/// pair unusable as a two-DIMM channel.
pub fn spd_compare(a: &SpdInfo, b: &SpdInfo) -> u32 {
    let compare_bytes = match a.generation() {
        Some(MemoryGeneration::Ddr3) => COMPARE_BYTES_DDR3,
        _ => COMPARE_BYTES_DDR4,
    };
    let mut mismatches = 0;
    for &idx in compare_bytes {
        if a.raw()[idx] != b.raw()[idx] {
            log::error!(
                "MCU {}: SPD byte {} differs between slots ({:#04x} vs {:#04x})",
                a.mcu,
                idx,
                a.raw()[idx],
                b.raw()[idx]
            );
            mismatches += 1;
        }
    }
    mismatches
}

/// Chip-select offset of the second DIMM slot in the rank map.
const SLOT1_RANK_SHIFT: u8 = 4;

/// Discover the DIMMs behind every MCU and derive each channel's
/// [crate::DdrInfo].
///
/// A slot whose SPD read fails or whose CRC does not match is treated as
/// unpopulated. Two populated slots with mismatching geometry disable the
/// whole MCU; other MCUs are unaffected. Only an entirely empty complex is
/// an error.
pub fn spd_init<H: crate::DdrHooks>(
    memc: &mut crate::MemoryComplex,
    hooks: &mut H,
) -> Result<(), DdrError> {
    memc.mcu_mask = 0;
    for mcu_idx in 0..crate::MAX_MCU {
        let params = crate::params::UserParams::resolve(mcu_idx, hooks);
        let mcu = &mut memc.mcus[mcu_idx];
        mcu.params = params;
        mcu.enabled = false;

        for slot in 0..crate::MAX_SLOTS_PER_MCU {
            let mut buf = [0u8; SPD_DDR4_LEN];
            mcu.spd[slot] = None;
            if hooks.spd_read(mcu_idx, slot, &mut buf).is_err() {
                continue;
            }
            let info = SpdInfo::new(mcu_idx as u8, slot as u8, buf);
            match info.check() {
                Ok(()) => mcu.spd[slot] = Some(info),
                Err(err) => {
                    log::warn!("MCU {mcu_idx} slot {slot}: {err}, treating as empty");
                }
            }
        }

        if let (Some(a), Some(b)) = (&mcu.spd[0], &mcu.spd[1]) {
            if spd_compare(a, b) != 0 {
                log::error!("MCU {mcu_idx}: disabling channel, slots are incompatible");
                mcu.spd = [None, None];
                continue;
            }
        }

        if mcu.spd.iter().all(Option::is_none) {
            continue;
        }

        match populate_ddr_info(mcu) {
            Ok(()) => {
                mcu.enabled = true;
                memc.mcu_mask |= 1 << mcu_idx;
            }
            Err(err) => {
                log::error!("MCU {mcu_idx}: disabling channel: {err}");
            }
        }
    }

    if memc.mcu_mask == 0 {
        return Err(DdrError::NoDimm);
    }
    // Bridge routing: the lower four channels hang off bridge 0.
    memc.mcbs[0].mcu_mask = memc.mcu_mask & 0x0F;
    memc.mcbs[1].mcu_mask = memc.mcu_mask >> 4;
    Ok(())
}

/// Derive the channel configuration from the populated slots and the user
/// parameters.
pub fn populate_ddr_info(mcu: &mut crate::Mcu) -> Result<(), DdrError> {
    let primary = mcu.spd.iter().flatten().next().ok_or(DdrError::NoDimm)?;
    let generation = primary.generation().ok_or(DdrError::SpdMismatch { mcu: mcu.id })?;

    // The operating clock is the slowest of the user target and every
    // module's tCKmin.
    let mut t_ck_ps = mcu.params.t_ck_ps();
    let mut cas_bitmap = u64::MAX;
    let mut active_mask = 0u8;
    let mut physical_mask = 0u8;
    for spd in mcu.spd.iter().flatten() {
        t_ck_ps = t_ck_ps.max(spd.t_ck_min_ps());
        cas_bitmap &= spd.cas_bitmap();
        let shift = if spd.slot == 0 { 0 } else { SLOT1_RANK_SHIFT };
        active_mask |= ((((1u16 << spd.logical_ranks()) - 1) << shift) & 0xFF) as u8;
        physical_mask |= ((((1u16 << spd.package_ranks()) - 1) << shift) & 0xFF) as u8;
    }

    let cas_latency = select_cas_latency(cas_bitmap, primary.t_aa_min_ps(), t_ck_ps, generation)?;
    let cw_latency = cas_write_latency(t_ck_ps, generation);

    let info = &mut mcu.info;
    info.ddr_type = generation;
    info.package_type = primary.package_type();
    info.stack_height = match primary.package_type() {
        PackageType::ThreeDs => primary.die_count(),
        _ => 1,
    };
    info.device_width = primary.device_width();
    info.active_rank_mask = active_mask;
    info.physical_rank_mask = physical_mask;
    info.odd_rank_mask = active_mask & 0xAA;
    info.max_ranks = active_mask.count_ones() as u8;
    info.two_dpc_enable = mcu.spd.iter().flatten().count() == 2;
    info.ecc_en = primary.has_ecc() && mcu.params.ecc_enable;
    info.crc_en = mcu.params.crc_enable;
    info.wr_dbi_en = mcu.params.write_dbi_enable;
    info.rd_dbi_en = mcu.params.read_dbi_enable;
    info.registered = primary.is_registered();
    info.load_reduced = primary.module_type() == ModuleType::Lrdimm;
    info.t_ck_ps = t_ck_ps;
    info.cas_latency = cas_latency;
    info.cw_latency = cw_latency;
    info.wr_preamble = if t_ck_ps <= 833 { 2 } else { 1 };
    info.rd_preamble = 1;
    info.parity_latency = if mcu.params.parity_enable { 4 } else { 0 };
    info.addr_mirror = primary.address_mirrored();
    info.row_bits = primary.row_bits();
    info.col_bits = primary.column_bits();
    info.bank_bits = primary.bank_bits();
    info.bank_group_bits = primary.bank_group_bits();
    // Per logical rank; the stack height is already reflected in the
    // logical-rank count of the active mask.
    info.rank_capacity = primary.rank_capacity();
    // Interleave recipe indexed by total device address bits above the
    // fixed 27-bit floor of the smallest supported device.
    let total_bits =
        info.row_bits + info.col_bits + info.bank_bits + info.bank_group_bits;
    info.addr_map_mode = total_bits.saturating_sub(27).min(7);

    log::info!(
        "MCU {}: {:?} tCK {} ps CL {} CWL {} ranks {:#04x}",
        mcu.id,
        generation,
        t_ck_ps,
        cas_latency,
        cw_latency,
        active_mask
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use crate::sim::fake_ddr4_spd;

    #[test]
    fn crc_accepts_valid_image() {
        let spd = SpdInfo::new(0, 0, fake_ddr4_spd());
        assert!(spd.check().is_ok());
    }

    #[test]
    fn crc_rejects_any_covered_byte_flip() {
        for idx in [0usize, 5, 17, 63, 125] {
            let mut raw = fake_ddr4_spd();
            raw[idx] ^= 0x01;
            let spd = SpdInfo::new(0, 0, raw);
            assert!(spd.check().is_err(), "flip at byte {idx} went undetected");
        }
    }

    #[test]
    fn crc_ignores_uncovered_bytes() {
        let mut raw = fake_ddr4_spd();
        raw[200] ^= 0xFF;
        let spd = SpdInfo::new(0, 0, raw);
        assert!(spd.check().is_ok());
    }

    #[test]
    fn timing_treats_high_ftb_as_negative() {
        // 10 * 125 - 2 = 1248.
        assert_eq!(compute_spd_timing(10, 0xFE), 1248);
        assert_eq!(compute_spd_timing(10, 2), 1252);
        // Monotonic in mtb for fixed ftb.
        assert!(compute_spd_timing(11, 0xFE) > compute_spd_timing(10, 0xFE));
    }

    #[test]
    fn timing_round_trip_within_one_ps() {
        // Encode 13750 ps as (110, 0) and every +-5 ps neighbour via ftb.
        for off in -5i32..=5 {
            let ftb = if off < 0 { (256 + off) as u8 } else { off as u8 };
            let decoded = compute_spd_timing(110, ftb) as i32;
            assert!((decoded - (13750 + off)).abs() <= 1);
        }
    }

    #[test]
    fn geometry_decode() {
        let spd = SpdInfo::new(0, 0, fake_ddr4_spd());
        assert_eq!(spd.generation(), Some(MemoryGeneration::Ddr4));
        assert_eq!(spd.module_type(), ModuleType::Udimm);
        assert_eq!(spd.package_ranks(), 2);
        assert_eq!(spd.logical_ranks(), 2);
        assert_eq!(spd.device_width(), 8);
        assert_eq!(spd.primary_bus_width(), 64);
        assert!(spd.has_ecc());
        assert_eq!(spd.sdram_capacity_mbit(), 8192);
        assert_eq!(spd.column_bits(), 10);
        assert_eq!(spd.row_bits(), 16);
        // 8 Gb x8 devices, 8 per rank: 8 GiB per rank.
        assert_eq!(spd.rank_capacity(), 8 * 1024 * 1024 * 1024);
    }

    #[test]
    fn ddr3_geometry_and_timing_decode() {
        let spd = SpdInfo::new(0, 0, crate::sim::fake_ddr3_spd());
        assert!(spd.check().is_ok());
        assert_eq!(spd.generation(), Some(MemoryGeneration::Ddr3));
        assert_eq!(spd.module_type(), ModuleType::Udimm);
        assert_eq!(spd.package_ranks(), 2);
        assert_eq!(spd.device_width(), 8);
        assert_eq!(spd.primary_bus_width(), 64);
        assert!(spd.has_ecc());
        assert_eq!(spd.bank_bits(), 3);
        assert_eq!(spd.bank_group_bits(), 0);
        assert_eq!(spd.column_bits(), 10);
        assert_eq!(spd.row_bits(), 14);
        assert_eq!(spd.t_ck_min_ps(), 1500);
        assert_eq!(spd.t_aa_min_ps(), 13_500);
        assert_eq!(spd.t_ras_min_ps(), 36_000);
        assert_eq!(spd.t_rfc1_ps(), 142_000);
        // tRFC2/4 collapse onto tRFC1 without fine-granularity refresh.
        assert_eq!(spd.t_rfc2_ps(), spd.t_rfc1_ps());
        // CL bitmap is indexed from 4 on DDR3.
        assert_eq!(spd.cas_bitmap(), 0xF8u64 << 4);
        let cl = select_cas_latency(spd.cas_bitmap(), 13_500, 1500, MemoryGeneration::Ddr3)
            .unwrap();
        assert_eq!(cl, 9);
    }

    #[test]
    fn cas_selection_walks_up_to_supported() {
        // Only CL 12 supported, computed minimum 10 at 1250 ps.
        let bitmap = 1u64 << 12;
        let cl = select_cas_latency(bitmap, 12_500, 1250, MemoryGeneration::Ddr4).unwrap();
        assert_eq!(cl, 12);
    }

    #[test]
    fn cas_selection_rejects_over_cap() {
        // CL 12 at 1600 ps is 19.2 ns > 18 ns cap.
        let bitmap = 1u64 << 12;
        let res = select_cas_latency(bitmap, 16_000, 1600, MemoryGeneration::Ddr4);
        assert!(res.is_err());
        // Same point passes under the DDR3 20 ns cap.
        assert_eq!(
            select_cas_latency(bitmap, 16_000, 1600, MemoryGeneration::Ddr3).unwrap(),
            12
        );
    }

    #[test]
    fn cas_selection_gives_up_after_sixteen_steps() {
        // Support only CL 30 with a computed minimum of 10: out of reach.
        let bitmap = 1u64 << 30;
        assert!(select_cas_latency(bitmap, 12_500, 1250, MemoryGeneration::Ddr4).is_err());
    }

    #[test]
    fn cwl_table() {
        assert_eq!(cas_write_latency(1250, MemoryGeneration::Ddr4), 9);
        assert_eq!(cas_write_latency(938, MemoryGeneration::Ddr4), 11);
        assert_eq!(cas_write_latency(750, MemoryGeneration::Ddr4), 14);
        assert_eq!(cas_write_latency(1250, MemoryGeneration::Ddr3), 7);
    }

    #[test]
    fn compare_flags_manufacturer_mismatch() {
        let a = SpdInfo::new(0, 0, fake_ddr4_spd());
        let mut raw = fake_ddr4_spd();
        raw[320] = 0xAD; // different manufacturer, same geometry
        let b = SpdInfo::new(0, 1, raw);
        assert!(spd_compare(&a, &b) >= 1);
    }

    #[test]
    fn compare_accepts_identical_images() {
        let a = SpdInfo::new(0, 0, fake_ddr4_spd());
        let b = SpdInfo::new(0, 1, fake_ddr4_spd());
        assert_eq!(spd_compare(&a, &b), 0);
    }

    #[test]
    fn discovery_mismatch_disables_only_that_mcu() {
        let mut hooks = crate::sim::TestHooks::empty();
        hooks.spd[0][0] = Some(fake_ddr4_spd());
        // Same geometry, different manufacturer id (outside CRC coverage).
        let mut other = fake_ddr4_spd();
        other[320] = 0xAD;
        hooks.spd[0][1] = Some(other);
        hooks.spd[1][0] = Some(fake_ddr4_spd());

        let mut memc = crate::MemoryComplex::new();
        spd_init(&mut memc, &mut hooks).unwrap();
        assert_eq!(memc.mcu_mask, 0b10);
        assert!(!memc.mcus[0].enabled);
        assert!(memc.mcus[1].enabled);
    }

    #[test]
    fn discovery_bad_crc_slot_counts_as_empty() {
        let mut hooks = crate::sim::TestHooks::empty();
        let mut corrupted = fake_ddr4_spd();
        corrupted[24] ^= 0xFF;
        hooks.spd[0][0] = Some(corrupted);
        hooks.spd[0][1] = Some(fake_ddr4_spd());

        let mut memc = crate::MemoryComplex::new();
        spd_init(&mut memc, &mut hooks).unwrap();
        assert_eq!(memc.mcu_mask, 0b01);
        assert!(memc.mcus[0].spd[0].is_none());
        assert!(memc.mcus[0].spd[1].is_some());
        // Only the second slot's ranks are active.
        assert_eq!(memc.mcus[0].info.active_rank_mask, 0x30);
    }

    #[test]
    fn discovery_empty_complex_is_fatal() {
        let mut hooks = crate::sim::TestHooks::empty();
        let mut memc = crate::MemoryComplex::new();
        assert_eq!(spd_init(&mut memc, &mut hooks), Err(DdrError::NoDimm));
    }

    #[test]
    fn populated_info_reflects_speed_cap() {
        let mut hooks = crate::sim::TestHooks::single_dimm();
        let mut memc = crate::MemoryComplex::new();
        spd_init(&mut memc, &mut hooks).unwrap();
        let info = &memc.mcus[0].info;
        // User default 2400 MT/s (833 ps) is slower than the module's
        // 750 ps floor, so the user target wins.
        assert_eq!(info.t_ck_ps, 833);
        assert!(info.ecc_en);
        assert_eq!(info.active_rank_mask, 0x03);
        assert_eq!(info.odd_rank_mask, 0x02);
    }
}
