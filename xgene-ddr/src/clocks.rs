//! MCU PLL and reset sequencing.
//!
//! All enabled MCUs are walked in lock-step: each step is applied to every
//! controller before the next step proceeds, because the SoC-level async
//! reset at the end is a single shared SMpro register covering all of them.

use arbitrary_int::{u3, u9};
use embedded_hal::delay::DelayNs;
use xgene::pcp::{self, McuClockControl, McuPllControl, McuResetControl};

use crate::bus::{self, RingBus};
use crate::params::PllDividers;
use crate::time::Hertz;
use crate::{DdrError, DdrHooks, MemoryComplex};

/// Fixed PLL reference clock feeding every MCU.
pub const PLL_REF_CLK: Hertz = Hertz::from_raw(100_000_000);

/// Safe bring-up feedback divider used before the target ratio is known.
const SAFE_FBDIVC: u16 = 0x28;

/// PLL pre-stabilization time after releasing power-down.
const PLL_PRESTAB_US: u32 = 2_000;
/// PLL lock time after reset deassert.
const PLL_LOCK_US: u32 = 250;
/// Lock-bit poll budget on top of the fixed lock wait.
const PLL_LOCK_RETRIES: u32 = 1_000;
/// Bit 0 of the PLL status register, see [McuPllStatus].
const PLL_LOCK_MASK: u32 = 0x1;

/// Divider triple for the requested speed bin.
///
/// Breakpoints follow the speed-bin table of the clock unit; a user force
/// via the parameter store wins over the table.
pub fn mcu_set_pll_params(speed_grade: u32, force: Option<PllDividers>) -> PllDividers {
    if let Some(forced) = force {
        return forced;
    }
    match speed_grade {
        0..=1333 => PllDividers { fbdivc: 40, outdiv2: 1, outdiv3: 1 },
        1334..=1466 => PllDividers { fbdivc: 44, outdiv2: 1, outdiv3: 1 },
        1467..=1600 => PllDividers { fbdivc: 32, outdiv2: 1, outdiv3: 0 },
        1601..=1866 => PllDividers { fbdivc: 28, outdiv2: 0, outdiv3: 1 },
        1867..=2133 => PllDividers { fbdivc: 32, outdiv2: 0, outdiv3: 1 },
        2134..=2400 => PllDividers { fbdivc: 24, outdiv2: 0, outdiv3: 0 },
        _ => PllDividers { fbdivc: 40, outdiv2: 0, outdiv3: 1 },
    }
}

/// PLL output rate for a divider triple: the reference is multiplied by
/// the feedback divider and divided by `2^outdiv2` and the fractional
/// post-divider `(outdiv3 + 2) / 2`.
pub fn pll_output_rate(div: &PllDividers) -> Hertz {
    let num = u64::from(PLL_REF_CLK.raw()) * u64::from(div.fbdivc) * 2;
    let den = (1u64 << div.outdiv2) * (u64::from(div.outdiv3) + 2);
    Hertz::from_raw((num / den) as u32)
}

fn modify_pll_ctrl<B: RingBus>(
    bus: &mut B,
    mcu: usize,
    f: impl FnOnce(McuPllControl) -> McuPllControl,
) {
    let reg = pcp::csw_mcu_pll_ctrl(mcu);
    let val = McuPllControl::new_with_raw_value(bus::csw_read(bus, reg));
    bus::csw_write(bus, reg, f(val).raw_value());
}

fn modify_clk_ctrl<B: RingBus>(
    bus: &mut B,
    mcu: usize,
    f: impl FnOnce(McuClockControl) -> McuClockControl,
) {
    let reg = pcp::csw_mcu_clk_ctrl(mcu);
    let val = McuClockControl::new_with_raw_value(bus::csw_read(bus, reg));
    bus::csw_write(bus, reg, f(val).raw_value());
}

fn write_dividers<B: RingBus>(bus: &mut B, mcu: usize, div: PllDividers) {
    modify_pll_ctrl(bus, mcu, |mut v| {
        v.set_fbdivc(u9::new(div.fbdivc));
        v.set_outdiv2(u3::new(div.outdiv2));
        v.set_outdiv3(u3::new(div.outdiv3));
        v
    });
}

/// Bring every enabled MCU's PLL and clock/reset tree up.
///
/// Any poll failure aborts the whole sequence with the first failing MCU's
/// error; the caller treats that as fatal.
pub fn mcu_unreset<B: RingBus, D: DelayNs, H: DdrHooks>(
    bus: &mut B,
    delay: &mut D,
    hooks: &mut H,
    memc: &MemoryComplex,
) -> Result<(), DdrError> {
    // Step 1: assert PLL power-down everywhere.
    for mcu in memc.enabled_mcus() {
        modify_pll_ctrl(bus, mcu, |mut v| {
            v.set_pwrdn(true);
            v
        });
    }

    // Step 2: safe bring-up divider.
    for mcu in memc.enabled_mcus() {
        write_dividers(
            bus,
            mcu,
            PllDividers {
                fbdivc: SAFE_FBDIVC,
                outdiv2: 0,
                outdiv3: 0,
            },
        );
    }

    // Step 3: release power-down, then let the PLL pre-stabilize.
    for mcu in memc.enabled_mcus() {
        modify_pll_ctrl(bus, mcu, |mut v| {
            v.set_pwrdn(false);
            v
        });
    }
    delay.delay_us(PLL_PRESTAB_US);

    // Step 4: enable the PLL output clock.
    for mcu in memc.enabled_mcus() {
        modify_pll_ctrl(bus, mcu, |mut v| {
            v.set_clken(true);
            v
        });
    }

    // Step 5: final dividers for the target speed bin.
    for mcu in memc.enabled_mcus() {
        let params = &memc.mcus[mcu].params;
        let div = mcu_set_pll_params(params.speed_grade, params.pll_force);
        log::debug!(
            "MCU {mcu}: PLL dividers fbdivc={} outdiv2={} outdiv3={}",
            div.fbdivc,
            div.outdiv2,
            div.outdiv3
        );
        write_dividers(bus, mcu, div);
    }

    // Step 6: assert PLL reset to load the new ratio; hold >= 200 ns.
    for mcu in memc.enabled_mcus() {
        modify_pll_ctrl(bus, mcu, |mut v| {
            v.set_reset(true);
            v
        });
    }
    delay.delay_ns(400);

    // Step 7: deassert reset, wait the lock time, then poll the lock bit.
    for mcu in memc.enabled_mcus() {
        modify_pll_ctrl(bus, mcu, |mut v| {
            v.set_reset(false);
            v
        });
    }
    delay.delay_us(PLL_LOCK_US);
    for mcu in memc.enabled_mcus() {
        let addr = bus::csw_addr(pcp::csw_mcu_pll_status(mcu));
        bus::poll(bus, delay, addr, PLL_LOCK_MASK, PLL_LOCK_MASK, PLL_LOCK_RETRIES)
            .map_err(|_| DdrError::PllLock { mcu: mcu as u8 })?;
    }

    // Step 8: ungate the agent-macro clock tree.
    delay.delay_ns(16 * 834);
    for mcu in memc.enabled_mcus() {
        modify_clk_ctrl(bus, mcu, |mut v| {
            v.set_macro_clk_pwrdn(false);
            v
        });
    }
    delay.delay_ns(200);
    for mcu in memc.enabled_mcus() {
        modify_clk_ctrl(bus, mcu, |mut v| {
            v.set_macro_clk_reset(false);
            v
        });
    }
    delay.delay_ns(16 * 834);
    for mcu in memc.enabled_mcus() {
        modify_clk_ctrl(bus, mcu, |mut v| {
            v.set_agent_clk_en(true);
            v
        });
    }
    delay.delay_ns(25 * 834);

    // Step 9: deassert the SoC-level async reset through the SMpro.
    update_async_reset_mcu(hooks, memc.mcu_mask)?;

    // Step 10: release the per-MCU interface resets and publish readiness.
    delay.delay_us(1);
    let mut ready = bus::csw_read(bus, pcp::CSW_DDR_BUS_READY);
    for mcu in memc.enabled_mcus() {
        let reg = pcp::csw_mcu_reset(mcu);
        let val = McuResetControl::new_with_raw_value(bus::csw_read(bus, reg))
            .with_apb_reset(false)
            .with_interface_reset(false)
            .with_phy_reset(false);
        bus::csw_write(bus, reg, val.raw_value());
        ready |= 1 << mcu;
    }
    bus::csw_write(bus, pcp::CSW_DDR_BUS_READY, ready);
    Ok(())
}

/// Read-modify-write the SMpro async-reset register and wait until the
/// management processor reflects the new value.
///
/// The readback poll has no bound: the register lives in the management
/// processor and is specified to always converge. A missing SMpro would
/// spin here forever, hence the breadcrumb beforehand.
pub fn update_async_reset_mcu<H: DdrHooks>(hooks: &mut H, mcu_mask: u8) -> Result<(), DdrError> {
    let reg = pcp::SMPRO_MCU_ASYNC_RESET;
    let mut val = hooks.smpro_read(reg)?;
    for mcu in 0..crate::MAX_MCU {
        if mcu_mask & (1 << mcu) != 0 {
            val |= pcp::smpro_async_reset_bit(mcu);
        }
    }
    hooks.smpro_write(reg, val)?;
    log::warn!("waiting for SMpro async-reset ack (unbounded)");
    loop {
        if hooks.smpro_read(reg)? == val {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;

    #[test]
    fn pll_table_documented_breakpoints() {
        let d = mcu_set_pll_params(1600, None);
        assert_eq!((d.fbdivc, d.outdiv2, d.outdiv3), (32, 1, 0));
        let d = mcu_set_pll_params(2667, None);
        assert_eq!((d.fbdivc, d.outdiv2, d.outdiv3), (40, 0, 1));
    }

    #[test]
    fn pll_table_every_bin() {
        for (grade, expect) in [
            (1333, (40, 1, 1)),
            (1466, (44, 1, 1)),
            (1600, (32, 1, 0)),
            (1866, (28, 0, 1)),
            (2133, (32, 0, 1)),
            (2400, (24, 0, 0)),
            (2667, (40, 0, 1)),
        ] {
            let d = mcu_set_pll_params(grade, None);
            assert_eq!((d.fbdivc, d.outdiv2, d.outdiv3), expect, "bin {grade}");
        }
    }

    #[test]
    fn pll_output_rate_matches_the_bin() {
        for grade in [1333u32, 1466, 1600, 1866, 2133, 2400, 2667] {
            let rate = pll_output_rate(&mcu_set_pll_params(grade, None));
            let mhz = rate.raw() / 1_000_000;
            assert!(
                mhz.abs_diff(grade) <= 1,
                "bin {grade}: PLL output {mhz} MHz"
            );
        }
    }

    #[test]
    fn pll_range_boundaries_round_up_to_the_bin() {
        // Grades inside a range select the bin at its top.
        let d = mcu_set_pll_params(1700, None);
        assert_eq!((d.fbdivc, d.outdiv2, d.outdiv3), (28, 0, 1));
    }

    #[test]
    fn user_force_wins_over_table() {
        let forced = PllDividers {
            fbdivc: 50,
            outdiv2: 2,
            outdiv3: 2,
        };
        assert_eq!(mcu_set_pll_params(1600, Some(forced)), forced);
    }
}
