use embassy_futures::select::{Either3, select3};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::usart::{
    BufferedUart, BufferedUartRx, BufferedUartTx, Config as UartConfig, DataBits, Parity, StopBits,
};
use embassy_time::{Duration, Instant, Timer, with_timeout};
use embedded_io_async::{Read, Write};
use node_core::bridge::StackEvent;
use node_core::config::RadioConfig;
use static_cell::StaticCell;

use crate::hw::BoardMutex;
use crate::modem::protocol::{
    self, Command, LineAssembler, ModemLine, ModemParseError, format_command,
};
use crate::modem::{ModemChannels, UplinkCompletion, UplinkRequest};

const MODEM_UART_BAUD: u32 = 115_200;
const MODEM_UART_BUFFER_SIZE: usize = 256;

/// Reply to a plain command.
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);
/// Covers confirmed-uplink retries inside the modem.
const SEND_EVENT_TIMEOUT: Duration = Duration::from_secs(30);
/// Wait before a new join after the modem gave up.
const REJOIN_DELAY: Duration = Duration::from_secs(300);

static UART_TX_BUFFER: StaticCell<[u8; MODEM_UART_BUFFER_SIZE]> = StaticCell::new();
static UART_RX_BUFFER: StaticCell<[u8; MODEM_UART_BUFFER_SIZE]> = StaticCell::new();

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART5>;
});

/// The command could not be completed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum CommandFailure {
    Rejected,
    Busy,
    NoReply,
    Io,
}

/// UART side of the modem: owns the serial port and the join state.
struct Modem<'d> {
    tx: BufferedUartTx<'d>,
    rx: BufferedUartRx<'d>,
    lines: LineAssembler,
    chunk: [u8; 32],
    filled: usize,
    cursor: usize,
    joined: bool,
    rejoin_at: Option<Instant>,
    channels: &'static ModemChannels<BoardMutex>,
}

#[embassy_executor::task]
pub async fn run(
    channels: &'static ModemChannels<BoardMutex>,
    config: RadioConfig,
    usart: Peri<'static, hal::peripherals::USART5>,
    tx_pin: Peri<'static, hal::peripherals::PB0>,
    rx_pin: Peri<'static, hal::peripherals::PB1>,
) -> ! {
    let mut uart_config = UartConfig::default();
    uart_config.baudrate = MODEM_UART_BAUD;
    uart_config.data_bits = DataBits::DataBits8;
    uart_config.stop_bits = StopBits::STOP1;
    uart_config.parity = Parity::ParityNone;

    let uart = BufferedUart::new(
        usart,
        rx_pin,
        tx_pin,
        UART_TX_BUFFER.init([0; MODEM_UART_BUFFER_SIZE]),
        UART_RX_BUFFER.init([0; MODEM_UART_BUFFER_SIZE]),
        UartIrqs,
        uart_config,
    )
    .expect("failed to initialize modem UART");
    let (tx, rx) = uart.split();

    let mut modem = Modem {
        tx,
        rx,
        lines: LineAssembler::new(),
        chunk: [0; 32],
        filled: 0,
        cursor: 0,
        joined: false,
        rejoin_at: None,
        channels,
    };

    modem.provision(&config).await;
    modem.join().await;

    loop {
        let rejoin = sleep_until(modem.rejoin_at);
        match select3(channels.uplinks.receive(), modem.next_line(), rejoin).await {
            Either3::First(request) => {
                let sequence = request.sequence;
                let event = modem.transmit(request).await;
                if channels
                    .completions
                    .try_send(UplinkCompletion { sequence, event })
                    .is_err()
                {
                    defmt::warn!("modem: completion queue full, seq={} lost", sequence);
                }
            }
            Either3::Second(line) => modem.unsolicited(line),
            Either3::Third(()) => {
                modem.rejoin_at = None;
                modem.join().await;
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => Timer::at(deadline).await,
        None => core::future::pending().await,
    }
}

impl Modem<'_> {
    async fn provision(&mut self, config: &RadioConfig) {
        for command in protocol::provisioning(config) {
            if let Err(failure) = self.command(&command).await {
                defmt::warn!(
                    "modem: provisioning step failed: {}",
                    defmt::Debug2Format(&failure)
                );
            }
        }
        defmt::info!("modem: provisioned");
    }

    async fn join(&mut self) {
        match self.command(&Command::Join).await {
            Ok(()) => defmt::info!("modem: join started"),
            Err(failure) => {
                defmt::warn!("modem: join refused: {}", defmt::Debug2Format(&failure));
                self.rejoin_at = Some(Instant::now() + REJOIN_DELAY);
            }
        }
    }

    async fn transmit(&mut self, request: UplinkRequest) -> StackEvent {
        if !self.joined {
            defmt::warn!("modem: uplink seq={} before join", request.sequence);
            return StackEvent::Error;
        }

        let send = Command::Send {
            port: request.port,
            frame: &request.frame,
        };
        if let Err(failure) = self.command(&send).await {
            defmt::warn!(
                "modem: send seq={} failed: {}",
                request.sequence,
                defmt::Debug2Format(&failure)
            );
            return StackEvent::Error;
        }

        let completion = async {
            loop {
                let line = self.next_line().await;
                if let Some(event) = line.stack_event() {
                    return event;
                }
                self.unsolicited(line);
            }
        };
        with_timeout(SEND_EVENT_TIMEOUT, completion)
            .await
            .unwrap_or(StackEvent::None)
    }

    /// Sends `command` and waits for its `OK`.
    async fn command(&mut self, command: &Command<'_>) -> Result<(), CommandFailure> {
        let Ok(line) = format_command(command) else {
            return Err(CommandFailure::Rejected);
        };
        self.write_line(line.as_bytes()).await?;

        let reply = async {
            loop {
                match self.next_line().await {
                    ModemLine::Ok => return Ok(()),
                    ModemLine::Busy => return Err(CommandFailure::Busy),
                    ModemLine::Error => return Err(CommandFailure::Rejected),
                    other => self.unsolicited(other),
                }
            }
        };
        with_timeout(REPLY_TIMEOUT, reply)
            .await
            .unwrap_or(Err(CommandFailure::NoReply))
    }

    async fn write_line(&mut self, line: &[u8]) -> Result<(), CommandFailure> {
        for part in [line, b"\r\n".as_slice()] {
            if self.tx.write_all(part).await.is_err() {
                defmt::warn!("modem: UART write error");
                return Err(CommandFailure::Io);
            }
        }
        self.tx.flush().await.map_err(|_| CommandFailure::Io)
    }

    /// Next complete line from the modem. Cancel-safe: partial input stays
    /// buffered in `self`.
    async fn next_line(&mut self) -> ModemLine {
        loop {
            while self.cursor < self.filled {
                let byte = self.chunk[self.cursor];
                self.cursor += 1;
                match self.lines.push(byte) {
                    Some(Ok(line)) => return line,
                    Some(Err(error)) => log_parse_error(error),
                    None => {}
                }
            }

            match self.rx.read(&mut self.chunk).await {
                Ok(count) => {
                    self.filled = count;
                    self.cursor = 0;
                }
                Err(_) => {
                    defmt::warn!("modem: UART read error");
                    Timer::after(Duration::from_millis(5)).await;
                }
            }
        }
    }

    /// Handles a line nobody was waiting for.
    fn unsolicited(&mut self, line: ModemLine) {
        match line {
            ModemLine::Joined => {
                self.joined = true;
                self.rejoin_at = None;
                defmt::info!("modem: joined");
            }
            ModemLine::JoinFailed => {
                self.joined = false;
                self.rejoin_at = Some(Instant::now() + REJOIN_DELAY);
                defmt::warn!("modem: join failed, retrying in {}s", REJOIN_DELAY.as_secs());
            }
            ModemLine::Downlink(downlink) => {
                let port = downlink.port;
                defmt::info!(
                    "modem: downlink port={} len={} rssi={} snr={}",
                    port,
                    downlink.data.len(),
                    downlink.rssi,
                    downlink.snr
                );
                if self.channels.downlinks.try_send(downlink).is_err() {
                    defmt::warn!("modem: downlink queue full, port={} dropped", port);
                }
            }
            other => defmt::debug!("modem: ignoring {}", other.label()),
        }
    }
}

fn log_parse_error(error: ModemParseError) {
    defmt::warn!("modem: bad line: {}", defmt::Display2Format(&error));
}
