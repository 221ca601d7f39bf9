//! PHY configuration.
//!
//! Programs the per-slice analog front end (input/output enable windows,
//! drive and termination, impedance calibration mode) and the leveling
//! defaults hardware training starts from. Pure register writes; training
//! later replaces every slave-delay value programmed here.

use arbitrary_int::{u2, u3, u4, u5, u6, u7, u11};
use xgene::phy::{self, *};

use crate::bus::{self, RingBus};
use crate::{Mcu, MemoryGeneration, NUM_PHY_SLICES};

/// Mid-scale starting point for every slave delay line.
const DELAY_MIDPOINT: u16 = 0x200;

/// Input/output enable windows per slice, derived from the burst framing.
pub fn set_phy_ie_oe_config<B: RingBus>(bus: &mut B, mcu: &Mcu) {
    let id = mcu.id as usize;
    let info = &mcu.info;
    let dq = DqTiming::builder()
        .with_oe_start(u4::new(1))
        .with_oe_end(u4::new(2))
        .with_ie_start(u4::new(1))
        .with_ie_end(u4::new(2))
        .with_dm_follow_dq(true)
        .build();
    let dqs = DqsTiming::builder()
        .with_oe_start(u4::new(1))
        .with_oe_end(u4::new(2))
        .with_preamble(u2::new(info.wr_preamble.min(2)))
        .with_diff_rx_enable(info.ddr_type == MemoryGeneration::Ddr4)
        .build();
    for slice in 0..NUM_PHY_SLICES {
        bus::phy_write(bus, id, slice, DQ_TIMING, dq.raw_value());
        bus::phy_write(bus, id, slice, DQS_TIMING, dqs.raw_value());
        bus::phy_write(
            bus,
            id,
            slice,
            GATE_LPBK_CTRL,
            GateLpbkCtrl::builder()
                .with_mode(u2::new(0))
                .with_gate_open(u6::new(4))
                .build()
                .raw_value(),
        );
        bus::phy_write(
            bus,
            id,
            slice,
            READ_CTRL,
            ReadCtrl::builder()
                .with_fifo_ptr_gap(u3::new(2))
                .with_dfi_aligned(true)
                .build()
                .raw_value(),
        );
    }
}

/// Pad drive strength and receiver termination per slice.
pub fn set_phy_drive_term_config<B: RingBus>(bus: &mut B, mcu: &Mcu) {
    let id = mcu.id as usize;
    // Driver codes step with the board drive-strength selection; the
    // termination follows RTT_NOM so the pad matches the DRAM setting.
    let drive_code = 0x10 + (mcu.params.drive_strength as u8 & 0x3) * 4;
    let drive = DriveCtrl::builder()
        .with_drive_p(u5::new(drive_code.min(31)))
        .with_drive_n(u5::new(drive_code.min(31)))
        .with_slew(u3::new(2))
        .build();
    let term = TermCtrl::builder()
        .with_term_code(u5::new(((mcu.params.rtt_nom & 0x7) * 4).min(31)))
        .with_term_enable(true)
        .with_dynamic_odt(mcu.info.two_dpc_enable)
        .build();
    for slice in 0..NUM_PHY_SLICES {
        bus::phy_write(bus, id, slice, DRIVE_CTRL, drive.raw_value());
        bus::phy_write(bus, id, slice, TERM_CTRL, term.raw_value());
    }
}

/// Impedance calibration mode: periodic recalibration plus a pass on every
/// self-refresh exit.
pub fn set_phy_cal_config<B: RingBus>(bus: &mut B, mcu: &Mcu) {
    let id = mcu.id as usize;
    let cal = CalMode::builder()
        .with_periodic_enable(true)
        .with_interval_log2(u4::new(10))
        .with_on_srx_exit(true)
        .build();
    for slice in 0..NUM_PHY_SLICES {
        bus::phy_write(bus, id, slice, CAL_MODE, cal.raw_value());
    }
}

/// Slave-delay and Vref starting points for hardware leveling.
pub fn set_phy_leveling_defaults<B: RingBus>(bus: &mut B, mcu: &Mcu) {
    let id = mcu.id as usize;
    let mid = SlaveDelay::DEFAULT
        .with_taps(u11::new(DELAY_MIDPOINT))
        .raw_value();
    let vref = VrefCtrl::DEFAULT
        .with_code(u7::new(phy::VREF_MAX / 2))
        .with_enable(true)
        .with_range(u2::new(0))
        .raw_value();
    for slice in 0..NUM_PHY_SLICES {
        bus::phy_write(bus, id, slice, WRLVL_DELAY, mid);
        bus::phy_write(bus, id, slice, GATE_SLAVE_DELAY, mid);
        bus::phy_write(bus, id, slice, RDLVL_DELAY, mid);
        bus::phy_write(bus, id, slice, WRDQS_EXTRA_CYCLE, 0);
        bus::phy_write(bus, id, slice, VREF_CTRL, vref);
        for bit in 0..BITS_PER_SLICE {
            bus::phy_write(bus, id, slice, wrdq_bit_delay(bit), mid);
            bus::phy_write(bus, id, slice, rddq_bit_delay(bit), mid);
        }
    }
}

/// Full PHY setup for one controller.
pub fn configure_phy<B: RingBus>(bus: &mut B, mcu: &Mcu) {
    let id = mcu.id as usize;
    // Reset pulse, then enable the calibration clock before any slice
    // register is touched.
    bus::phy_global_write(
        bus,
        id,
        PHY_CTRL,
        PhyCtrl::DEFAULT.with_reset(true).raw_value(),
    );
    let ctrl = PhyCtrl::DEFAULT
        .with_reset(false)
        .with_cal_clk_enable(true)
        .with_multi_rank_mode(mcu.info.max_ranks > 1)
        .with_cs_map_sel(u3::new(0));
    bus::phy_global_write(bus, id, PHY_CTRL, ctrl.raw_value());
    bus::phy_global_write(bus, id, PHY_FREQ_SEL, freq_sel(mcu));

    set_phy_ie_oe_config(bus, mcu);
    set_phy_drive_term_config(bus, mcu);
    set_phy_cal_config(bus, mcu);
    set_phy_leveling_defaults(bus, mcu);

    bus::phy_global_write(
        bus,
        id,
        PHY_LVL_CTRL,
        PhyLvlCtrl::DEFAULT
            .with_dfi_leveling_enable(true)
            .with_rank_sel(u3::new(0))
            .raw_value(),
    );
    log::debug!("MCU {id}: PHY configured");
}

/// DLL frequency-range selector for the operating clock.
fn freq_sel(mcu: &Mcu) -> u32 {
    match mcu.info.t_ck_ps {
        0..=749 => 3,
        750..=937 => 2,
        938..=1249 => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use crate::params::UserParams;
    use crate::sim::SimBus;
    use crate::spd::SpdInfo;

    fn test_mcu() -> Mcu {
        let mut mcu = Mcu {
            id: 1,
            enabled: true,
            info: crate::DdrInfo::default(),
            params: UserParams::default(),
            spd: [Some(SpdInfo::new(1, 0, crate::sim::fake_ddr4_spd())), None],
            training: Default::default(),
        };
        crate::spd::populate_ddr_info(&mut mcu).unwrap();
        mcu
    }

    #[test]
    fn every_slice_gets_the_front_end_block() {
        let mut bus = SimBus::new();
        let mcu = test_mcu();
        configure_phy(&mut bus, &mcu);
        for slice in 0..NUM_PHY_SLICES {
            for reg in [DQ_TIMING, DQS_TIMING, DRIVE_CTRL, TERM_CTRL, CAL_MODE] {
                let addr = crate::bus::phy_addr(1, slice, reg);
                assert!(
                    bus.regs.contains_key(&addr),
                    "slice {slice} register {reg:#x} was not programmed"
                );
            }
        }
    }

    #[test]
    fn multi_rank_mode_follows_rank_count() {
        let mut bus = SimBus::new();
        let mcu = test_mcu();
        assert!(mcu.info.max_ranks > 1);
        configure_phy(&mut bus, &mcu);
        let ctrl = PhyCtrl::new_with_raw_value(
            bus.regs[&crate::bus::phy_global_addr(1, PHY_CTRL)],
        );
        assert!(ctrl.multi_rank_mode());
        assert!(ctrl.cal_clk_enable());
        assert!(!ctrl.reset());
    }

    #[test]
    fn leveling_defaults_start_mid_scale() {
        let mut bus = SimBus::new();
        let mcu = test_mcu();
        set_phy_leveling_defaults(&mut bus, &mcu);
        let val = SlaveDelay::new_with_raw_value(
            bus.regs[&crate::bus::phy_addr(1, 4, WRLVL_DELAY)],
        );
        assert_eq!(val.taps().value(), DELAY_MIDPOINT);
    }
}
