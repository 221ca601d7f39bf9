//! Board/user parameter resolution.
//!
//! Every training and timing tunable resolves as: non-volatile parameter
//! store override if present and plausible, otherwise the compile-time
//! default. Parameters are fully independent per MCU; nothing here touches
//! hardware.

use num_enum::TryFromPrimitive;

/// Keys into the persistent parameter store. Values are the fixed addresses
/// of the parameter namespace; per-MCU parameters add
/// [NvParamKey::MCU_STRIDE] times the controller id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum NvParamKey {
    SpeedGrade = 0x0000,
    EccMode = 0x0008,
    CrcMode = 0x0010,
    WriteDbi = 0x0018,
    ReadDbi = 0x0020,
    Parity = 0x0028,
    PerCsTraining = 0x0030,
    WriteDeskew = 0x0038,
    ReadDeskew = 0x0040,
    DramVrefTrain = 0x0048,
    PhyVrefTrain = 0x0050,
    PdaMode = 0x0058,
    DramVrefMargin = 0x0060,
    PhyVrefMargin = 0x0068,
    PllFbdivc = 0x0070,
    PllOutdiv2 = 0x0078,
    PllOutdiv3 = 0x0080,
    PllForce = 0x0088,
    RttNom = 0x0090,
    RttWr = 0x0098,
    RttPark = 0x00A0,
    DriveStrength = 0x00A8,
    BistLoopCount = 0x00B0,
    BistIterCount = 0x00B8,
    RefreshGranularity = 0x00C0,
    BankHash = 0x00C8,
    InterleaveMode = 0x00D0,
}

impl NvParamKey {
    /// Address distance between the parameter blocks of adjacent MCUs.
    pub const MCU_STRIDE: u32 = 0x400;

    /// Store address of this key for the given MCU.
    pub const fn for_mcu(self, mcu: usize) -> u32 {
        self as u32 + Self::MCU_STRIDE * mcu as u32
    }
}

/// Read-only view of the persistent parameter store.
///
/// `None` means "not provisioned"; the compile-time default is used.
pub trait NvParamStore {
    fn get(&mut self, addr: u32) -> Option<u32>;
}

/// A store with nothing provisioned.
pub struct EmptyNvParamStore;

impl NvParamStore for EmptyNvParamStore {
    fn get(&mut self, _addr: u32) -> Option<u32> {
        None
    }
}

/// PLL divider triple, either from the speed-bin table or forced by the
/// user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllDividers {
    pub fbdivc: u16,
    pub outdiv2: u8,
    pub outdiv3: u8,
}

/// Per-MCU tunables. Field defaults are the values shipped for the
/// reference board.
#[derive(Debug, Clone)]
pub struct UserParams {
    /// Target data rate in MT/s.
    pub speed_grade: u32,
    pub ecc_enable: bool,
    pub crc_enable: bool,
    pub write_dbi_enable: bool,
    pub read_dbi_enable: bool,
    pub parity_enable: bool,
    /// Train every chip-select rank instead of rank 0 only.
    pub per_cs_training: bool,
    pub write_deskew_enable: bool,
    pub read_deskew_enable: bool,
    pub dram_vref_train_enable: bool,
    pub phy_vref_train_enable: bool,
    /// Per-DRAM-component Vref fine tune after the rank-level pass.
    pub pda_mode_enable: bool,
    /// Margin subtracted from the DRAM Vref window midpoint, DAC steps.
    pub dram_vref_margin: u8,
    /// Margin subtracted from the PHY Vref window midpoint, DAC steps.
    pub phy_vref_margin: u8,
    /// Divider override; `None` selects from the speed-bin table.
    pub pll_force: Option<PllDividers>,
    pub rtt_nom: u8,
    pub rtt_wr: u8,
    pub rtt_park: u8,
    pub drive_strength: u8,
    pub bist_loop_count: u32,
    pub bist_iter_count: u32,
    /// Fine-granularity refresh mode (0 = 1x, 1 = 2x, 2 = 4x).
    pub refresh_granularity: u8,
}

impl Default for UserParams {
    fn default() -> Self {
        Self {
            speed_grade: 2400,
            ecc_enable: true,
            crc_enable: false,
            write_dbi_enable: false,
            read_dbi_enable: false,
            parity_enable: false,
            per_cs_training: false,
            write_deskew_enable: true,
            read_deskew_enable: true,
            dram_vref_train_enable: true,
            phy_vref_train_enable: true,
            pda_mode_enable: false,
            dram_vref_margin: 0,
            phy_vref_margin: 2,
            pll_force: None,
            rtt_nom: 0x3, // RZQ/6
            rtt_wr: 0x2,  // RZQ/2
            rtt_park: 0x0,
            drive_strength: 0x1, // RZQ/7
            bist_loop_count: 4,
            bist_iter_count: 64,
            refresh_granularity: 0,
        }
    }
}

/// Global (cross-MCU) tunables: interleave and hashing.
#[derive(Debug, Clone)]
pub struct SystemParams {
    pub bank_hash_enable: bool,
    /// Channel-interleave mode programmed into the bridges.
    pub interleave_mode: u8,
}

impl Default for SystemParams {
    fn default() -> Self {
        Self {
            bank_hash_enable: true,
            interleave_mode: 1,
        }
    }
}

fn get_bool<S: NvParamStore>(store: &mut S, key: NvParamKey, mcu: usize, out: &mut bool) {
    if let Some(v) = store.get(key.for_mcu(mcu)) {
        *out = v != 0;
    }
}

fn get_u8_capped<S: NvParamStore>(
    store: &mut S,
    key: NvParamKey,
    mcu: usize,
    cap: u8,
    out: &mut u8,
) {
    if let Some(v) = store.get(key.for_mcu(mcu)) {
        if v <= cap as u32 {
            *out = v as u8;
        } else {
            log::warn!("nvparam {:?} value {v:#x} out of range, keeping default", key);
        }
    }
}

impl UserParams {
    /// Resolve one MCU's parameters against the store.
    pub fn resolve<S: NvParamStore>(mcu: usize, store: &mut S) -> Self {
        let mut p = Self::default();
        if let Some(v) = store.get(NvParamKey::SpeedGrade.for_mcu(mcu)) {
            if matches!(v, 1333 | 1466 | 1600 | 1866 | 2133 | 2400 | 2667) {
                p.speed_grade = v;
            } else {
                log::warn!("nvparam speed grade {v} is not a known bin, keeping default");
            }
        }
        get_bool(store, NvParamKey::EccMode, mcu, &mut p.ecc_enable);
        get_bool(store, NvParamKey::CrcMode, mcu, &mut p.crc_enable);
        get_bool(store, NvParamKey::WriteDbi, mcu, &mut p.write_dbi_enable);
        get_bool(store, NvParamKey::ReadDbi, mcu, &mut p.read_dbi_enable);
        get_bool(store, NvParamKey::Parity, mcu, &mut p.parity_enable);
        get_bool(store, NvParamKey::PerCsTraining, mcu, &mut p.per_cs_training);
        get_bool(store, NvParamKey::WriteDeskew, mcu, &mut p.write_deskew_enable);
        get_bool(store, NvParamKey::ReadDeskew, mcu, &mut p.read_deskew_enable);
        get_bool(
            store,
            NvParamKey::DramVrefTrain,
            mcu,
            &mut p.dram_vref_train_enable,
        );
        get_bool(
            store,
            NvParamKey::PhyVrefTrain,
            mcu,
            &mut p.phy_vref_train_enable,
        );
        get_bool(store, NvParamKey::PdaMode, mcu, &mut p.pda_mode_enable);
        get_u8_capped(
            store,
            NvParamKey::DramVrefMargin,
            mcu,
            0x20,
            &mut p.dram_vref_margin,
        );
        get_u8_capped(
            store,
            NvParamKey::PhyVrefMargin,
            mcu,
            0x20,
            &mut p.phy_vref_margin,
        );
        get_u8_capped(store, NvParamKey::RttNom, mcu, 0x7, &mut p.rtt_nom);
        get_u8_capped(store, NvParamKey::RttWr, mcu, 0x7, &mut p.rtt_wr);
        get_u8_capped(store, NvParamKey::RttPark, mcu, 0x7, &mut p.rtt_park);
        get_u8_capped(
            store,
            NvParamKey::DriveStrength,
            mcu,
            0x3,
            &mut p.drive_strength,
        );
        if let Some(v) = store.get(NvParamKey::BistLoopCount.for_mcu(mcu)) {
            if v > 0 {
                p.bist_loop_count = v;
            }
        }
        if let Some(v) = store.get(NvParamKey::BistIterCount.for_mcu(mcu)) {
            if v > 0 {
                p.bist_iter_count = v;
            }
        }
        get_u8_capped(
            store,
            NvParamKey::RefreshGranularity,
            mcu,
            2,
            &mut p.refresh_granularity,
        );
        // A forced PLL setting is only taken when the force flag and all
        // three dividers are provisioned.
        if store.get(NvParamKey::PllForce.for_mcu(mcu)).unwrap_or(0) != 0 {
            let fb = store.get(NvParamKey::PllFbdivc.for_mcu(mcu));
            let d2 = store.get(NvParamKey::PllOutdiv2.for_mcu(mcu));
            let d3 = store.get(NvParamKey::PllOutdiv3.for_mcu(mcu));
            if let (Some(fb), Some(d2), Some(d3)) = (fb, d2, d3) {
                p.pll_force = Some(PllDividers {
                    fbdivc: fb as u16,
                    outdiv2: d2 as u8,
                    outdiv3: d3 as u8,
                });
            } else {
                log::warn!("MCU {mcu}: PLL force set but dividers incomplete, using table");
            }
        }
        p
    }

    /// Memory-clock period for the configured data rate, picoseconds.
    pub const fn t_ck_ps(&self) -> u32 {
        2_000_000 / self.speed_grade
    }
}

impl SystemParams {
    pub fn resolve<S: NvParamStore>(store: &mut S) -> Self {
        let mut p = Self::default();
        if let Some(v) = store.get(NvParamKey::BankHash as u32) {
            p.bank_hash_enable = v != 0;
        }
        if let Some(v) = store.get(NvParamKey::InterleaveMode as u32) {
            if v <= 3 {
                p.interleave_mode = v as u8;
            }
        }
        p
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use std::collections::BTreeMap;

    struct MapStore(BTreeMap<u32, u32>);

    impl NvParamStore for MapStore {
        fn get(&mut self, addr: u32) -> Option<u32> {
            self.0.get(&addr).copied()
        }
    }

    #[test]
    fn defaults_without_store_entries() {
        let p = UserParams::resolve(0, &mut EmptyNvParamStore);
        assert_eq!(p.speed_grade, 2400);
        assert!(p.ecc_enable);
        assert!(p.pll_force.is_none());
    }

    #[test]
    fn per_mcu_overrides_are_independent() {
        let mut map = BTreeMap::new();
        map.insert(NvParamKey::SpeedGrade.for_mcu(2), 1600);
        map.insert(NvParamKey::EccMode.for_mcu(2), 0);
        let mut store = MapStore(map);
        let p2 = UserParams::resolve(2, &mut store);
        let p3 = UserParams::resolve(3, &mut store);
        assert_eq!(p2.speed_grade, 1600);
        assert!(!p2.ecc_enable);
        assert_eq!(p3.speed_grade, 2400);
        assert!(p3.ecc_enable);
    }

    #[test]
    fn implausible_override_keeps_default() {
        let mut map = BTreeMap::new();
        map.insert(NvParamKey::SpeedGrade.for_mcu(0), 9999);
        map.insert(NvParamKey::DramVrefMargin.for_mcu(0), 0x100);
        let mut store = MapStore(map);
        let p = UserParams::resolve(0, &mut store);
        assert_eq!(p.speed_grade, 2400);
        assert_eq!(p.dram_vref_margin, 0);
    }

    #[test]
    fn pll_force_requires_all_dividers() {
        let mut map = BTreeMap::new();
        map.insert(NvParamKey::PllForce.for_mcu(0), 1);
        map.insert(NvParamKey::PllFbdivc.for_mcu(0), 40);
        let mut store = MapStore(map);
        assert!(UserParams::resolve(0, &mut store).pll_force.is_none());

        map_insert_full(&mut store.0);
        let p = UserParams::resolve(0, &mut store);
        assert_eq!(
            p.pll_force,
            Some(PllDividers {
                fbdivc: 40,
                outdiv2: 0,
                outdiv3: 1
            })
        );
    }

    fn map_insert_full(map: &mut BTreeMap<u32, u32>) {
        map.insert(NvParamKey::PllOutdiv2.for_mcu(0), 0);
        map.insert(NvParamKey::PllOutdiv3.for_mcu(0), 1);
    }

    #[test]
    fn nvparam_keys_convert_from_raw_store_addresses() {
        assert_eq!(
            NvParamKey::try_from(0x0048u32).unwrap(),
            NvParamKey::DramVrefTrain
        );
        assert!(NvParamKey::try_from(0xDEAD_0000u32).is_err());
    }

    #[test]
    fn clock_period_from_speed_grade() {
        let mut p = UserParams::default();
        p.speed_grade = 2667;
        assert_eq!(p.t_ck_ps(), 750);
        p.speed_grade = 1600;
        assert_eq!(p.t_ck_ps(), 1250);
    }
}
