use embassy_futures::select::{Either, select};
use embassy_stm32::gpio::Output;
use embassy_time::Timer;
use node_core::ports::Led;

use crate::hw::indicator::LedTrack;
use crate::hw::{IndicatorCommand, IndicatorQueue};
use crate::instant::FirmwareInstant;

/// Drives both LEDs from the engine's indicator requests.
#[embassy_executor::task]
pub async fn run(
    queue: &'static IndicatorQueue,
    orange: Output<'static>,
    red: Output<'static>,
) -> ! {
    let mut outputs = [orange, red];
    let mut tracks = [LedTrack::new(); Led::ALL.len()];

    loop {
        let wake = tracks.iter().filter_map(LedTrack::next_wake).min();
        let command = match wake {
            Some(at) => match select(queue.receive(), Timer::at(at.into_embassy())).await {
                Either::First(command) => Some(command),
                Either::Second(()) => None,
            },
            None => Some(queue.receive().await),
        };

        let now = FirmwareInstant::now();
        match command {
            Some(IndicatorCommand::Show(request)) => {
                if !tracks[request.led.as_index()].show(request, now) {
                    defmt::debug!(
                        "indicator: {} busy, ignoring {}",
                        request.led.label(),
                        request.pattern.label()
                    );
                }
            }
            Some(IndicatorCommand::Cancel(led)) => tracks[led.as_index()].cancel(),
            None => {}
        }

        for led in Led::ALL {
            let index = led.as_index();
            if tracks[index].advance(now) {
                outputs[index].set_high();
            } else {
                outputs[index].set_low();
            }
        }
    }
}
