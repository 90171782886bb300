use embassy_stm32::exti::ExtiInput;
use embassy_time::{Duration, Timer};
use node_core::events::{Event, HallLevel};
use node_core::mailbox::PostError;

use super::NodeMailbox;
use crate::hw;

/// Contact bounce settles well within this.
const DEBOUNCE: Duration = Duration::from_millis(20);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Sensor {
    /// Active-low push button; only presses are reported.
    Button,
    /// Hall switch; both edges are reported.
    Hall,
}

pub fn level_of(input: &ExtiInput<'_>) -> HallLevel {
    if input.is_high() {
        HallLevel::High
    } else {
        HallLevel::Low
    }
}

/// Turns debounced edges on one EXTI line into mailbox events.
#[embassy_executor::task(pool_size = 2)]
pub async fn run(mut input: ExtiInput<'static>, sensor: Sensor, mailbox: &'static NodeMailbox) -> ! {
    loop {
        match sensor {
            Sensor::Button => input.wait_for_falling_edge().await,
            Sensor::Hall => input.wait_for_any_edge().await,
        }
        Timer::after(DEBOUNCE).await;

        let event = match sensor {
            Sensor::Button => {
                if input.is_high() {
                    continue;
                }
                Event::SensorEdgeButton
            }
            Sensor::Hall => {
                let level = level_of(&input);
                if level == hw::hall_level() {
                    continue;
                }
                hw::store_hall_level(level);
                Event::SensorEdgeHall
            }
        };

        if !hw::sensors_armed() {
            continue;
        }
        if let Err(error) = mailbox.post(event) {
            log_post_rejected(sensor, error);
        }
    }
}

fn log_post_rejected(sensor: Sensor, error: PostError) {
    defmt::warn!(
        "sensors: {} edge dropped: {}",
        defmt::Debug2Format(&sensor),
        defmt::Display2Format(&error)
    );
}
