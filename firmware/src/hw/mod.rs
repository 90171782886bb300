//! Board glue: sensor state shared with the EXTI tasks, the indicator queue
//! and the [`NodeHardware`] implementation handed to the engine.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

pub mod battery;
pub mod indicator;

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::{Channel, Sender, TrySendError};
use node_core::events::HallLevel;
use node_core::ports::{IndicatorRequest, Led, NodeHardware};
use portable_atomic::{AtomicBool, AtomicU8, Ordering};

#[cfg(target_os = "none")]
pub type BoardMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
pub type BoardMutex = NoopRawMutex;

/// Depth of the queue between the engine and the indicator task.
///
/// A whole transition cascade runs before the indicator task gets a turn,
/// so this covers a show and a cancel per LED for several hops.
pub const INDICATOR_QUEUE_DEPTH: usize = 8;

/// Work for the indicator task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IndicatorCommand {
    Show(IndicatorRequest),
    Cancel(Led),
}

pub type IndicatorQueue = Channel<BoardMutex, IndicatorCommand, INDICATOR_QUEUE_DEPTH>;
pub type IndicatorSender<'a> = Sender<'a, BoardMutex, IndicatorCommand, INDICATOR_QUEUE_DEPTH>;

/// Sensor edges are ignored until the engine arms them after the join.
static SENSORS_ARMED: AtomicBool = AtomicBool::new(false);
/// Last level seen on the hall input.
static HALL_LEVEL: AtomicU8 = AtomicU8::new(0);

pub fn sensors_armed() -> bool {
    SENSORS_ARMED.load(Ordering::Acquire)
}

pub fn store_hall_level(level: HallLevel) {
    HALL_LEVEL.store(level.as_raw(), Ordering::Release);
}

pub fn hall_level() -> HallLevel {
    HallLevel::from_raw(HALL_LEVEL.load(Ordering::Acquire))
}

/// Source of battery readings.
pub trait BatterySense {
    fn millivolts(&mut self) -> u16;
}

#[cfg(target_os = "none")]
impl BatterySense for battery::BatteryMonitor<'_> {
    fn millivolts(&mut self) -> u16 {
        battery::BatteryMonitor::millivolts(self)
    }
}

/// The node's peripherals as the engine sees them.
///
/// Cancels are only queued for an LED that was handed a pattern since its
/// last cancel.
pub struct BoardHardware<'a, B> {
    battery: B,
    indicators: IndicatorSender<'a>,
    lit: [bool; 2],
}

impl<'a, B: BatterySense> BoardHardware<'a, B> {
    pub fn new(battery: B, indicators: IndicatorSender<'a>) -> Self {
        Self {
            battery,
            indicators,
            lit: [false; 2],
        }
    }

    fn queue(&self, command: IndicatorCommand) -> bool {
        match self.indicators.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                log_indicator_dropped(dropped);
                false
            }
        }
    }
}

impl<B: BatterySense> NodeHardware for BoardHardware<'_, B> {
    fn battery_millivolts(&mut self) -> u16 {
        self.battery.millivolts()
    }

    fn hall_level(&mut self) -> HallLevel {
        hall_level()
    }

    fn enable_sensor_interrupts(&mut self) {
        if !SENSORS_ARMED.swap(true, Ordering::AcqRel) {
            log_sensors_armed();
        }
    }

    fn indicate(&mut self, request: IndicatorRequest) {
        if self.queue(IndicatorCommand::Show(request)) {
            self.lit[request.led.as_index()] = true;
        }
    }

    fn cancel_indicator(&mut self, led: Led) {
        let index = led.as_index();
        if self.lit[index] && self.queue(IndicatorCommand::Cancel(led)) {
            self.lit[index] = false;
        }
    }
}

#[cfg(target_os = "none")]
fn log_indicator_dropped(command: IndicatorCommand) {
    match command {
        IndicatorCommand::Show(request) => defmt::warn!(
            "indicator: queue full, dropping {} {}",
            request.led.label(),
            request.pattern.label()
        ),
        IndicatorCommand::Cancel(led) => {
            defmt::warn!("indicator: queue full, dropping cancel {}", led.label());
        }
    }
}

#[cfg(not(target_os = "none"))]
fn log_indicator_dropped(command: IndicatorCommand) {
    println!("indicator: queue full, dropping {command:?}");
}

#[cfg(target_os = "none")]
fn log_sensors_armed() {
    defmt::info!("sensors: button and hall interrupts armed");
}

#[cfg(not(target_os = "none"))]
fn log_sensors_armed() {
    println!("sensors: button and hall interrupts armed");
}
