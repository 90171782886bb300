use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::Adc;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use node_core::bridge::TransportBridge;
use node_core::config::{BridgeConfig, RadioConfig};
use node_core::engine::NodeEngine;
use node_core::mailbox::Mailbox;
use static_cell::StaticCell;

use crate::hw::battery::BatteryMonitor;
use crate::hw::{self, BoardHardware, BoardMutex, IndicatorQueue};
use crate::instant::FirmwareInstant;
use crate::modem::{ModemChannels, ModemStack};

mod bridge_task;
mod control_task;
mod indicator_task;
mod modem_task;
mod sensor_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

pub(super) type NodeMailbox = Mailbox<BoardMutex>;
pub(super) type NodeBridge = TransportBridge<'static, BoardMutex, ModemStack<'static, BoardMutex>>;
pub(super) type NodeEngineImpl = NodeEngine<
    BoardHardware<'static, BatteryMonitor<'static>>,
    &'static NodeBridge,
    FirmwareInstant,
>;

const RADIO_CONFIG: RadioConfig = RadioConfig::new();

pub(super) static MAILBOX: NodeMailbox = Mailbox::new();
pub(super) static MODEM_CHANNELS: ModemChannels<BoardMutex> = ModemChannels::new();
pub(super) static INDICATOR_QUEUE: IndicatorQueue = IndicatorQueue::new();
static BRIDGE: StaticCell<NodeBridge> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA3,
        PB0,
        PB1,
        PB12,
        PB14,
        EXTI12,
        EXTI14,
        ADC1,
        USART5,
        ..
    } = hal::init(config);

    let orange = Output::new(PA0, Level::Low, Speed::Low);
    let red = Output::new(PA3, Level::Low, Speed::Low);
    let button = ExtiInput::new(PB12, EXTI12, Pull::Up);
    let hall = ExtiInput::new(PB14, EXTI14, Pull::Up);
    hw::store_hall_level(sensor_task::level_of(&hall));

    let bridge = TransportBridge::new(
        ModemStack::new(&MODEM_CHANNELS),
        &MAILBOX,
        BridgeConfig::for_radio(&RADIO_CONFIG),
    )
    .unwrap_or_else(|error| defmt::panic!("bridge setup failed: {}", defmt::Display2Format(&error)));
    let bridge: &'static NodeBridge = BRIDGE.init(bridge);

    let board = BoardHardware::new(BatteryMonitor::new(Adc::new(ADC1)), INDICATOR_QUEUE.sender());
    let engine = NodeEngine::new(
        board,
        bridge,
        RADIO_CONFIG.device_id(),
        FirmwareInstant::now(),
    );

    spawner
        .spawn(indicator_task::run(&INDICATOR_QUEUE, orange, red))
        .expect("failed to spawn indicator task");
    spawner
        .spawn(modem_task::run(&MODEM_CHANNELS, RADIO_CONFIG, USART5, PB0, PB1))
        .expect("failed to spawn modem task");
    spawner
        .spawn(bridge_task::run(bridge))
        .expect("failed to spawn bridge task");
    spawner
        .spawn(sensor_task::run(button, sensor_task::Sensor::Button, &MAILBOX))
        .expect("failed to spawn button task");
    spawner
        .spawn(sensor_task::run(hall, sensor_task::Sensor::Hall, &MAILBOX))
        .expect("failed to spawn hall task");
    spawner
        .spawn(control_task::run(engine, &MAILBOX))
        .expect("failed to spawn control task");

    core::future::pending::<()>().await;
}
