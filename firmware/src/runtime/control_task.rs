use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Timer};
use node_core::engine::{DispatchOutcome, RestartReason};
use node_core::events::Event;
use node_core::telemetry::{TelemetryEventKind, TelemetrySink};

use super::{NodeEngineImpl, NodeMailbox};
use crate::instant::FirmwareInstant;
use crate::telemetry::TelemetryLog;

/// Grace period that lets RTT drain the restart reason before the reset.
const RESTART_FLUSH_DELAY: Duration = Duration::from_millis(50);

/// Sole owner of the engine: waits for the next event or timer deadline and
/// dispatches it.
#[embassy_executor::task]
pub async fn run(mut engine: NodeEngineImpl, mailbox: &'static NodeMailbox) -> ! {
    let mut telemetry = TelemetryLog::new();
    let mut reported_drops = 0;

    let outcome = engine.start(FirmwareInstant::now(), &mut telemetry);
    telemetry.mirror();
    if let DispatchOutcome::RestartRequested(reason) = outcome {
        restart(reason).await;
    }

    loop {
        let woken = match engine.next_deadline() {
            Some(deadline) => {
                match select(mailbox.receive(), Timer::at(deadline.into_embassy())).await {
                    Either::First(event) => Some(event),
                    Either::Second(()) => None,
                }
            }
            None => Some(mailbox.receive().await),
        };

        let now = FirmwareInstant::now();
        let outcome = match woken {
            Some(event) => {
                if let Event::RadioRxData(notice) = &event
                    && let Some(downlink) = engine.radio().take_downlink()
                {
                    defmt::info!(
                        "control: downlink port={} len={} {=[u8]:x}",
                        notice.port,
                        notice.len,
                        downlink.data.as_slice()
                    );
                }
                Some(engine.dispatch(&event, now, &mut telemetry))
            }
            None => engine.poll_timer(now, &mut telemetry),
        };

        let dropped = mailbox.dropped();
        if dropped != reported_drops {
            reported_drops = dropped;
            telemetry.record(TelemetryEventKind::MailboxOverflow { total: dropped }, now);
        }
        telemetry.mirror();

        if let Some(DispatchOutcome::RestartRequested(reason)) = outcome {
            restart(reason).await;
        }
    }
}

async fn restart(reason: RestartReason) -> ! {
    defmt::error!("control: restarting ({})", defmt::Display2Format(&reason));
    Timer::after(RESTART_FLUSH_DELAY).await;
    cortex_m::peripheral::SCB::sys_reset();
}
