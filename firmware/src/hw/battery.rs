//! Battery voltage from the STM32G0 internal reference.
//!
//! The node runs straight off its cell, so VDDA is the battery voltage. It is
//! recovered from a VREFINT conversion and the factory calibration value
//! taken at 3.0 V.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

/// Supply voltage at which `VREFINT_CAL` was measured.
pub const VREFINT_CAL_MILLIVOLTS: u32 = 3_000;

/// Supply voltage implied by a VREFINT `reading` and its calibration value.
pub fn vdda_millivolts(calibration: u16, reading: u16) -> u16 {
    if reading == 0 {
        return 0;
    }
    let millivolts = VREFINT_CAL_MILLIVOLTS * u32::from(calibration) / u32::from(reading);
    u16::try_from(millivolts).unwrap_or(u16::MAX)
}

#[cfg(target_os = "none")]
pub use board::BatteryMonitor;

#[cfg(target_os = "none")]
mod board {
    use core::ptr;

    use embassy_stm32::adc::{Adc, SampleTime, VrefInt};
    use embassy_stm32::peripherals::ADC1;

    use super::vdda_millivolts;

    /// Factory-programmed calibration constant sampled at 3.0 V.
    const VREFINT_CAL_ADDR: *const u16 = 0x1FFF_75AA as *const u16;

    fn read_vrefint_calibration() -> u16 {
        unsafe { ptr::read_volatile(VREFINT_CAL_ADDR) }
    }

    /// ADC wrapper that samples VREFINT on demand.
    pub struct BatteryMonitor<'d> {
        adc: Adc<'d, ADC1>,
        channel: VrefInt,
        calibration: u16,
        discard_next: bool,
    }

    impl<'d> BatteryMonitor<'d> {
        pub fn new(mut adc: Adc<'d, ADC1>) -> Self {
            adc.set_sample_time(SampleTime::CYCLES160_5);
            let channel = adc.enable_vrefint();
            Self {
                adc,
                channel,
                calibration: read_vrefint_calibration(),
                discard_next: true,
            }
        }

        pub fn millivolts(&mut self) -> u16 {
            if self.discard_next {
                let _ = self.adc.blocking_read(&mut self.channel);
                self.discard_next = false;
            }
            let reading = self.adc.blocking_read(&mut self.channel);
            vdda_millivolts(self.calibration, reading)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_equal_to_calibration_is_three_volts() {
        assert_eq!(vdda_millivolts(1_650, 1_650), 3_000);
    }

    #[test]
    fn lower_supply_raises_the_reading() {
        assert_eq!(vdda_millivolts(1_650, 1_800), 2_750);
        assert_eq!(vdda_millivolts(1_650, 0), 0);
        assert_eq!(vdda_millivolts(u16::MAX, 1), u16::MAX);
    }
}
