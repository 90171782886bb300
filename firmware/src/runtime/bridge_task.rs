use embassy_time::Delay;

use super::NodeBridge;
use crate::telemetry::log_service_report;

/// Waits on the stack for every accepted uplink and posts its completion.
#[embassy_executor::task]
pub async fn run(bridge: &'static NodeBridge) -> ! {
    let mut delay = Delay;
    bridge.run(&mut delay, log_service_report).await
}
