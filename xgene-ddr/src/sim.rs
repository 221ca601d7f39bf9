//! Test doubles: a behavioral register-file simulation of one memory
//! complex, a virtual clock and canned board hooks. Only compiled for host
//! tests.

extern crate std;

use std::boxed::Box;
use std::collections::BTreeMap;
use std::vec::Vec;

use xgene::dmc;

use crate::bus::{self, RingBus};
use crate::spd::{SPD_CRC_COVERAGE, SPD_DDR4_LEN, crc16};
use crate::{DdrError, MemRegion};

/// Builds a minimal self-consistent DDR4 SPD image with a valid CRC.
pub(crate) fn fake_ddr4_spd() -> [u8; SPD_DDR4_LEN] {
    let mut spd = [0u8; SPD_DDR4_LEN];
    spd[2] = 0x0C; // DDR4
    spd[3] = 0x02; // UDIMM
    spd[4] = 0x45; // 8 Gb dies, 4 banks, 1 bank-group bit
    spd[5] = 0x21; // row 16, col 10
    spd[6] = 0x00; // monolithic
    spd[12] = 0x09; // 2 ranks, x8
    spd[13] = 0x0B; // 64-bit primary + ECC
    spd[18] = 0x06; // tCK 750 ps
    // CL bitmap: support CL 14..22 (first range, bit i = CL 7+i).
    let bitmap: u32 = ((1 << 9) - 1) << 7;
    spd[20..24].copy_from_slice(&bitmap.to_le_bytes());
    spd[24] = 0x6E; // tAA 13.75 ns
    spd[25] = 0x6E; // tRCD
    spd[26] = 0x6E; // tRP
    spd[27] = 0x11;
    spd[28] = 0xF8; // tRAS 63 ns
    spd[29] = 0x72; // tRC
    spd[30] = 0xC0;
    spd[31] = 0x0A; // tRFC1 350 ns
    spd[32] = 0x08;
    spd[33] = 0x08; // tRFC2
    spd[34] = 0xC0;
    spd[35] = 0x04; // tRFC4
    spd[36] = 0x00;
    spd[37] = 0xA8; // tFAW 21 ns
    spd[38] = 0x1B; // tRRD_S
    spd[39] = 0x28; // tRRD_L
    spd[40] = 0x28; // tCCD_L
    spd[320] = 0x2C;
    spd[321] = 0x80; // manufacturer
    let crc = crc16(&spd[..SPD_CRC_COVERAGE]);
    spd[126] = crc as u8;
    spd[127] = (crc >> 8) as u8;
    spd
}

/// Builds a minimal DDR3 UDIMM SPD image with a valid CRC.
pub(crate) fn fake_ddr3_spd() -> [u8; SPD_DDR4_LEN] {
    let mut spd = [0u8; SPD_DDR4_LEN];
    spd[0] = 0x92; // 128 bytes used
    spd[2] = 0x0B; // DDR3
    spd[3] = 0x02; // UDIMM
    spd[4] = 0x03; // 2 Gb dies, 8 banks
    spd[5] = 0x11; // row 14, col 10
    spd[7] = 0x09; // 2 ranks, x8
    spd[8] = 0x0B; // 64-bit primary + ECC
    spd[10] = 1;
    spd[11] = 8; // medium timebase 1/8 ns
    spd[12] = 0x0C; // tCK 1500 ps
    spd[14] = 0xF8; // CL 7..11
    spd[16] = 0x6C; // tAA 13.5 ns
    spd[17] = 0x78; // tWR
    spd[18] = 0x6C; // tRCD
    spd[19] = 0x30; // tRRD 6 ns
    spd[20] = 0x6C; // tRP
    spd[21] = 0x11;
    spd[22] = 0x20; // tRAS 36 ns
    spd[23] = 0x8C; // tRC 49.5 ns
    spd[24] = 0x70;
    spd[25] = 0x04; // tRFC 142 ns
    spd[28] = 0x01;
    spd[29] = 0x40; // tFAW 40 ns
    spd[117] = 0x2C;
    spd[118] = 0x80; // manufacturer
    let crc = crc16(&spd[..SPD_CRC_COVERAGE]);
    spd[126] = crc as u8;
    spd[127] = (crc >> 8) as u8;
    spd
}

/// BIST verdict produced by a [SimBus] oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BistVerdict {
    Pass,
    /// Per-byte fail mask (bit n = byte lane n miscompared).
    Fail(u32),
    /// Engine never reaches done; exercises the incomplete path.
    Hang,
}

type BistOracle = Box<dyn FnMut(&BTreeMap<u64, u32>) -> BistVerdict>;

/// Behavioral register file covering the DMC/PHY/CSW pages the engine
/// touches. Unprogrammed addresses read as zero, which conveniently
/// reports "idle" for every status register.
pub struct SimBus {
    pub regs: BTreeMap<u64, u32>,
    /// Every write in order, for sequence assertions.
    pub writes: Vec<(u64, u32)>,
    /// Training failure plan: (train mode, rank) -> raw observation value.
    pub train_fail: BTreeMap<(u32, u8), u32>,
    /// Pass/fail oracle consulted on BIST start.
    pub bist_oracle: Option<BistOracle>,
    /// Log of issued direct commands (op, rank_mask).
    pub direct_cmds: Vec<(u32, u8)>,
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            regs: BTreeMap::new(),
            writes: Vec::new(),
            train_fail: BTreeMap::new(),
            bist_oracle: None,
            direct_cmds: Vec::new(),
        }
    }

    fn raw(&self, addr: u64) -> u32 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    /// Decode which MCU (if any) a DMC-page address belongs to.
    fn dmc_reg_of(addr: u64) -> Option<(usize, u16)> {
        for mcu in 0..crate::MAX_MCU {
            for reg_base in [0u16, 0x1000] {
                let page_base = bus::dmc_addr(mcu, reg_base);
                if (page_base..page_base + 0x1_0000).contains(&addr) {
                    return Some((mcu, reg_base + ((addr - page_base) >> 2) as u16));
                }
            }
        }
        None
    }

    fn handle_direct_cmd(&mut self, mcu: usize, val: u32) {
        let cmd = dmc::DirectCmd::new_with_raw_value(val);
        let op = cmd.op() as u32;
        let rank_mask = cmd.rank_mask();
        self.direct_cmds.push((op, rank_mask));
        if cmd.op() == dmc::DirectOp::Train {
            let mode = self.raw(bus::dmc_addr(mcu, dmc::DIRECT_ADDR));
            let obs_reg = match mode {
                m if m == dmc::TrainMode::WriteLevel as u32 => dmc::TRAINING_WRLVL_OBS,
                m if m == dmc::TrainMode::ReadGate as u32 => dmc::TRAINING_RDGATE_OBS,
                _ => dmc::TRAINING_RDLVL_OBS,
            };
            let rank = rank_mask.trailing_zeros() as u8;
            let obs = self
                .train_fail
                .get(&(mode, rank))
                .copied()
                .unwrap_or(0);
            self.regs.insert(bus::dmc_addr(mcu, obs_reg), obs);
        }
    }

    fn handle_bist_control(&mut self, mcu: usize, val: u32) {
        let ctrl = dmc::BistControl::new_with_raw_value(val);
        if !ctrl.start() {
            if ctrl.stop() {
                self.regs.insert(bus::dmc_addr(mcu, dmc::BIST_STATUS), 0);
            }
            return;
        }
        let verdict = match self.bist_oracle.as_mut() {
            Some(oracle) => oracle(&self.regs),
            None => BistVerdict::Pass,
        };
        let (status, err_mask) = match verdict {
            BistVerdict::Pass => (0b010, 0),
            BistVerdict::Fail(mask) => (0b010 | 0x10, mask),
            BistVerdict::Hang => (0b001, 0),
        };
        self.regs
            .insert(bus::dmc_addr(mcu, dmc::BIST_STATUS), status);
        self.regs
            .insert(bus::dmc_addr(mcu, dmc::BIST_ERR_STATUS), err_mask);
        self.regs.insert(
            bus::dmc_addr(mcu, dmc::BIST_BYTE_STATUS_LINE0),
            err_mask,
        );
    }
}

impl RingBus for SimBus {
    fn read(&mut self, addr: u64) -> u32 {
        if let Some(value) = self.regs.get(&addr) {
            return *value;
        }
        // Unprogrammed status registers report an idle datapath.
        if let Some((_, reg)) = Self::dmc_reg_of(addr) {
            if reg == dmc::CHANNEL_STATUS {
                return 0x3;
            }
        }
        0
    }

    fn write(&mut self, addr: u64, val: u32) {
        self.writes.push((addr, val));
        if let Some((mcu, reg)) = Self::dmc_reg_of(addr) {
            match reg {
                dmc::MEMC_CMD => {
                    // State transitions complete immediately.
                    let state = val & 0x7;
                    self.regs
                        .insert(bus::dmc_addr(mcu, dmc::MEMC_STATUS), state);
                }
                dmc::DIRECT_CMD => {
                    self.regs.insert(addr, val);
                    self.handle_direct_cmd(mcu, val);
                    return;
                }
                dmc::BIST_CONTROL => {
                    self.regs.insert(addr, val);
                    self.handle_bist_control(mcu, val);
                    return;
                }
                _ => {}
            }
        }
        self.regs.insert(addr, val);
    }
}

/// Virtual clock: every delay is a no-op.
pub struct NopDelay;

impl embedded_hal::delay::DelayNs for NopDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

/// Canned board hooks: two SPD images, an SMpro register file and a region
/// recorder.
pub struct TestHooks {
    /// `spd[mcu][slot]`.
    pub spd: [[Option<[u8; SPD_DDR4_LEN]>; 2]; crate::MAX_MCU],
    pub smpro: BTreeMap<u32, u32>,
    pub nvparams: BTreeMap<u32, u32>,
    pub mapped_regions: Vec<MemRegion>,
    pub progress_calls: Vec<u8>,
}

impl TestHooks {
    /// One dual-rank DIMM in slot 0 of MCU 0.
    pub fn single_dimm() -> Self {
        let mut hooks = Self::empty();
        hooks.spd[0][0] = Some(fake_ddr4_spd());
        hooks
    }

    pub fn empty() -> Self {
        Self {
            spd: Default::default(),
            smpro: BTreeMap::new(),
            nvparams: BTreeMap::new(),
            mapped_regions: Vec::new(),
            progress_calls: Vec::new(),
        }
    }
}

impl crate::params::NvParamStore for TestHooks {
    fn get(&mut self, addr: u32) -> Option<u32> {
        self.nvparams.get(&addr).copied()
    }
}

impl crate::DdrHooks for TestHooks {
    fn spd_read(&mut self, mcu: usize, slot: usize, buf: &mut [u8]) -> Result<(), DdrError> {
        match self.spd[mcu][slot] {
            Some(image) => {
                buf.copy_from_slice(&image);
                Ok(())
            }
            None => Err(DdrError::SpdRead {
                mcu: mcu as u8,
                slot: slot as u8,
            }),
        }
    }

    fn smpro_read(&mut self, reg: u32) -> Result<u32, DdrError> {
        Ok(self.smpro.get(&reg).copied().unwrap_or(0))
    }

    fn smpro_write(&mut self, reg: u32, val: u32) -> Result<(), DdrError> {
        self.smpro.insert(reg, val);
        Ok(())
    }

    fn progress(&mut self, percent: u8) {
        self.progress_calls.push(percent);
    }

    fn map_dram_region(&mut self, region: MemRegion) -> Result<(), DdrError> {
        self.mapped_regions.push(region);
        Ok(())
    }
}
