//! Hardware-assisted training and the per-rank phase sequencer.
//!
//! Per rank: write leveling, read gate, read-eye leveling (controller
//! hardware assists), then software write calibration and DRAM Vref
//! training on top of BIST. PHY Vref training runs once for all ranks, and
//! per-bit deskew closes the sequence. Every phase for a rank is gated on
//! that rank having survived all earlier phases; failures other than write
//! leveling are absorbed into a rank error mask and only escalate when the
//! whole sequence is done.

use embedded_hal::delay::DelayNs;
use xgene::dmc::{self, DirectOp, TrainMode, TrainingObs};
use xgene::phy;

use crate::bus::{self, RingBus};
use crate::{DdrError, MAX_RANKS, Mcu, NUM_PHY_SLICES};

/// Poll budget for channel drain after a training pass.
const CHANNEL_IDLE_RETRIES: u32 = 10_000;

/// Per-rank, per-slice snapshots of the trained delay lines and the raw
/// observation words, read back after each hardware pass. The read-eye
/// results later seed the read-deskew search window.
#[derive(Debug, Clone)]
pub struct TrainingResults {
    pub wrlvl_delay: [[u16; NUM_PHY_SLICES]; MAX_RANKS],
    pub gate_delay: [[u16; NUM_PHY_SLICES]; MAX_RANKS],
    pub rdlvl_delay: [[u16; NUM_PHY_SLICES]; MAX_RANKS],
    pub wrcal_cycles: [[u8; NUM_PHY_SLICES]; MAX_RANKS],
    pub wrlvl_obs: [u32; MAX_RANKS],
    pub rdgate_obs: [u32; MAX_RANKS],
    pub rdlvl_obs: [u32; MAX_RANKS],
    /// One bit per rank that failed any phase.
    pub rank_err_mask: u8,
}

impl Default for TrainingResults {
    fn default() -> Self {
        Self {
            wrlvl_delay: [[0; NUM_PHY_SLICES]; MAX_RANKS],
            gate_delay: [[0; NUM_PHY_SLICES]; MAX_RANKS],
            rdlvl_delay: [[0; NUM_PHY_SLICES]; MAX_RANKS],
            wrcal_cycles: [[0; NUM_PHY_SLICES]; MAX_RANKS],
            wrlvl_obs: [0; MAX_RANKS],
            rdgate_obs: [0; MAX_RANKS],
            rdlvl_obs: [0; MAX_RANKS],
            rank_err_mask: 0,
        }
    }
}

/// Issue one hardware-assist pass for `rank` and interpret the observation
/// register. `Ok(obs)` with a zero error field is a pass.
fn hw_train_pass<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: usize,
    rank: u8,
    mode: TrainMode,
) -> Result<TrainingObs, DdrError> {
    let rank_mask = 1u8 << rank;
    // NOP first so CKE/termination are in a known state, then the
    // mode-selecting TRAIN command.
    crate::init::direct_cmd(bus, delay, mcu, DirectOp::Nop, 0, rank_mask)?;
    crate::init::direct_cmd(bus, delay, mcu, DirectOp::Train, mode as u32, rank_mask)?;
    // The manager going idle is not enough; the datapath must drain too.
    bus::dmc_poll(
        bus,
        delay,
        mcu,
        dmc::CHANNEL_STATUS,
        0x1,
        0x1,
        CHANNEL_IDLE_RETRIES,
    )?;
    let obs_reg = match mode {
        TrainMode::WriteLevel => dmc::TRAINING_WRLVL_OBS,
        TrainMode::ReadGate => dmc::TRAINING_RDGATE_OBS,
        TrainMode::ReadLevel => dmc::TRAINING_RDLVL_OBS,
    };
    Ok(TrainingObs::new_with_raw_value(bus::dmc_read(
        bus, mcu, obs_reg,
    )))
}

fn obs_failed(obs: &TrainingObs) -> bool {
    obs.error() || obs.slice_fail().value() != 0
}

fn capture_slice_delays<B: RingBus>(
    bus: &mut B,
    mcu: usize,
    result_reg: u16,
    out: &mut [u16; NUM_PHY_SLICES],
) {
    for slice in 0..NUM_PHY_SLICES {
        let res =
            phy::LevelingResult::new_with_raw_value(bus::phy_read(bus, mcu, slice, result_reg));
        out[slice] = res.taps().value();
    }
}

/// Write-leveling hardware assist for one rank.
pub fn dmc_wrlvl_routine<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: &mut Mcu,
    rank: u8,
) -> Result<bool, DdrError> {
    let id = mcu.id as usize;
    let obs = hw_train_pass(bus, delay, id, rank, TrainMode::WriteLevel)?;
    mcu.training.wrlvl_obs[rank as usize] = obs.raw_value();
    if obs_failed(&obs) {
        return Ok(false);
    }
    capture_slice_delays(
        bus,
        id,
        phy::WRLVL_RESULT,
        &mut mcu.training.wrlvl_delay[rank as usize],
    );
    Ok(true)
}

/// Read-gate hardware assist for one rank.
pub fn dmc_rdgate_routine<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: &mut Mcu,
    rank: u8,
) -> Result<bool, DdrError> {
    let id = mcu.id as usize;
    let obs = hw_train_pass(bus, delay, id, rank, TrainMode::ReadGate)?;
    mcu.training.rdgate_obs[rank as usize] = obs.raw_value();
    if obs_failed(&obs) {
        return Ok(false);
    }
    capture_slice_delays(
        bus,
        id,
        phy::GATE_RESULT,
        &mut mcu.training.gate_delay[rank as usize],
    );
    Ok(true)
}

/// Read-eye leveling hardware assist for one rank.
pub fn dmc_rdlvl_routine<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: &mut Mcu,
    rank: u8,
) -> Result<bool, DdrError> {
    let id = mcu.id as usize;
    let obs = hw_train_pass(bus, delay, id, rank, TrainMode::ReadLevel)?;
    mcu.training.rdlvl_obs[rank as usize] = obs.raw_value();
    if obs_failed(&obs) {
        return Ok(false);
    }
    capture_slice_delays(
        bus,
        id,
        phy::RDLVL_RESULT,
        &mut mcu.training.rdlvl_delay[rank as usize],
    );
    Ok(true)
}

/// Ranks the sequencer visits: every present rank with per-CS training,
/// only the first present rank otherwise.
fn training_ranks(mcu: &Mcu) -> impl Iterator<Item = u8> + '_ {
    let per_cs = mcu.params.per_cs_training;
    let mut first_seen = false;
    (0..MAX_RANKS as u8).filter(move |r| {
        if mcu.info.active_rank_mask & (1 << r) == 0 {
            return false;
        }
        if per_cs {
            return true;
        }
        if first_seen {
            return false;
        }
        first_seen = true;
        true
    })
}

/// Run the complete training sequence for one controller.
///
/// Write-leveling failure aborts the controller immediately. Later phases
/// record per-rank error bits and keep going; the final result is an error
/// if any rank accumulated a failure.
pub fn phy_training_mode<B: RingBus, D: DelayNs>(
    bus: &mut B,
    delay: &mut D,
    mcu: &mut Mcu,
) -> Result<(), DdrError> {
    let id = mcu.id as usize;
    mcu.training.rank_err_mask = 0;

    let ranks: heapless::Vec<u8, { MAX_RANKS }> = training_ranks(mcu).collect();

    for &rank in &ranks {
        let bit = 1u8 << rank;

        if !dmc_wrlvl_routine(bus, delay, mcu, rank)? {
            mcu.training.rank_err_mask |= bit;
            log::error!("MCU {id}: write leveling failed on rank {rank}");
            return Err(DdrError::WriteLeveling {
                mcu: mcu.id,
                rank,
            });
        }

        if mcu.training.rank_err_mask & bit == 0 && !dmc_rdgate_routine(bus, delay, mcu, rank)? {
            mcu.training.rank_err_mask |= bit;
            log::error!("MCU {id}: read gate training failed on rank {rank}");
        }

        if mcu.training.rank_err_mask & bit == 0 && !dmc_rdlvl_routine(bus, delay, mcu, rank)? {
            mcu.training.rank_err_mask |= bit;
            log::error!("MCU {id}: read leveling failed on rank {rank}");
        }

        if mcu.training.rank_err_mask & bit == 0
            && !crate::calib::mcu_bist_phy_wrcal(bus, delay, mcu, rank)?
        {
            mcu.training.rank_err_mask |= bit;
            log::error!("MCU {id}: write calibration failed on rank {rank}");
        }

        if mcu.training.rank_err_mask & bit == 0
            && mcu.params.dram_vref_train_enable
            && !crate::calib::mcu_dram_vref_training(bus, delay, mcu, rank)?
        {
            mcu.training.rank_err_mask |= bit;
            log::error!("MCU {id}: DRAM Vref training failed on rank {rank}");
        }
    }

    // PHY-side Vref is shared per pad, so it trains once against every
    // surviving rank.
    if mcu.params.phy_vref_train_enable {
        let failed = crate::calib::mcu_phy_vref_training(bus, delay, mcu, &ranks)?;
        mcu.training.rank_err_mask |= failed;
    }

    for &rank in &ranks {
        let bit = 1u8 << rank;
        if mcu.training.rank_err_mask & bit != 0 {
            continue;
        }
        if mcu.params.write_deskew_enable
            && !crate::calib::mcu_bist_phy_wrdeskew(bus, delay, mcu, rank)?
        {
            mcu.training.rank_err_mask |= bit;
            log::error!("MCU {id}: write deskew failed on rank {rank}");
        }
        if mcu.training.rank_err_mask & bit == 0
            && mcu.params.read_deskew_enable
            && !crate::calib::mcu_bist_phy_rddeskew(bus, delay, mcu, rank)?
        {
            mcu.training.rank_err_mask |= bit;
            log::error!("MCU {id}: read deskew failed on rank {rank}");
        }
    }

    if mcu.training.rank_err_mask != 0 {
        return Err(DdrError::Training {
            mcu: mcu.id,
            rank_err_mask: mcu.training.rank_err_mask,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use crate::params::UserParams;
    use crate::sim::{NopDelay, SimBus};
    use crate::spd::SpdInfo;

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
        mcu.params.per_cs_training = true;
        // Keep the sequencer tests focused on the hardware phases.
        mcu.params.write_deskew_enable = false;
        mcu.params.read_deskew_enable = false;
        mcu.params.dram_vref_train_enable = false;
        mcu.params.phy_vref_train_enable = false;
        mcu
    }

    #[test]
    fn all_phases_pass_clean() {
        let mut bus = SimBus::new();
        let mut delay = NopDelay;
        let mut mcu = test_mcu();
        phy_training_mode(&mut bus, &mut delay, &mut mcu).unwrap();
        assert_eq!(mcu.training.rank_err_mask, 0);
    }

    #[test]
    fn wrlvl_failure_is_immediately_fatal() {
        let mut bus = SimBus::new();
        // Rank 1 fails write leveling (observation error bit).
        bus.train_fail
            .insert((TrainMode::WriteLevel as u32, 1), 1 << 31);
        let mut delay = NopDelay;
        let mut mcu = test_mcu();
        let err = phy_training_mode(&mut bus, &mut delay, &mut mcu).unwrap_err();
        assert_eq!(err, DdrError::WriteLeveling { mcu: 0, rank: 1 });
        assert_eq!(mcu.training.rank_err_mask, 0b10);

        // Rank 0 went through every hardware phase before rank 1 aborted:
        // three TRAIN commands for rank 0, one for rank 1.
        let trains: std::vec::Vec<u8> = bus
            .direct_cmds
            .iter()
            .filter(|&&(op, _)| op == DirectOp::Train as u32)
            .map(|&(_, ranks)| ranks)
            .collect();
        assert!(trains.len() >= 4);
        assert_eq!(trains.iter().filter(|&&m| m == 0b01).count(), 3);
        assert_eq!(trains.iter().filter(|&&m| m == 0b10).count(), 1);
    }

    #[test]
    fn rdgate_failure_skips_later_phases_for_that_rank_only() {
        let mut bus = SimBus::new();
        // Rank 1 fails read gate: slice-fail bits, no summary error.
        bus.train_fail
            .insert((TrainMode::ReadGate as u32, 1), 0x3);
        let mut delay = NopDelay;
        let mut mcu = test_mcu();
        let err = phy_training_mode(&mut bus, &mut delay, &mut mcu).unwrap_err();
        assert_eq!(
            err,
            DdrError::Training {
                mcu: 0,
                rank_err_mask: 0b10
            }
        );

        // Rank 1 got write-level + read-gate passes but no read-level;
        // rank 0 got all three.
        let trains_rank1 = bus
            .direct_cmds
            .iter()
            .filter(|&&(op, m)| op == DirectOp::Train as u32 && m == 0b10)
            .count();
        let trains_rank0 = bus
            .direct_cmds
            .iter()
            .filter(|&&(op, m)| op == DirectOp::Train as u32 && m == 0b01)
            .count();
        assert_eq!(trains_rank1, 2);
        assert_eq!(trains_rank0, 3);
    }

    #[test]
    fn default_params_train_first_rank_only() {
        let mut bus = SimBus::new();
        let mut delay = NopDelay;
        let mut mcu = test_mcu();
        mcu.params.per_cs_training = false;
        phy_training_mode(&mut bus, &mut delay, &mut mcu).unwrap();
        assert!(
            bus.direct_cmds
                .iter()
                .filter(|&&(op, _)| op == DirectOp::Train as u32)
                .all(|&(_, m)| m == 0b01)
        );
    }

    #[test]
    fn trained_delays_are_captured_per_slice() {
        let mut bus = SimBus::new();
        // Pre-load the PHY leveling results for slice 2 and 8.
        bus.regs.insert(
            crate::bus::phy_addr(0, 2, phy::WRLVL_RESULT),
            0x120,
        );
        bus.regs.insert(
            crate::bus::phy_addr(0, 8, phy::WRLVL_RESULT),
            0x47,
        );
        let mut delay = NopDelay;
        let mut mcu = test_mcu();
        phy_training_mode(&mut bus, &mut delay, &mut mcu).unwrap();
        assert_eq!(mcu.training.wrlvl_delay[0][2], 0x120);
        assert_eq!(mcu.training.wrlvl_delay[0][8], 0x47);
        assert_eq!(mcu.training.wrlvl_delay[0][0], 0);
    }
}
