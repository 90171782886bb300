//! Line protocol spoken by the RUI3 LoRaWAN modem.
//!
//! Commands are formatted into bounded [`CommandLine`] buffers. Replies and
//! asynchronous `+EVT:` notifications are parsed with `winnow` into
//! [`ModemLine`] values.

use core::fmt::{self, Write as _};

use heapless::{String, Vec};
use node_core::bridge::StackEvent;
use node_core::config::RadioConfig;
use node_core::events::MAX_DOWNLINK_LEN;
use winnow::ascii::{dec_int, dec_uint};
use winnow::combinator::{alt, cut_err, eof, opt, preceded, terminated};
use winnow::prelude::*;
use winnow::token::{rest, take_while};

/// Longest command the formatter produces: `AT+SEND=<port>:` plus a full
/// payload in hex.
pub const COMMAND_CAPACITY: usize = 16 + 2 * MAX_DOWNLINK_LEN;

/// Longest line accepted from the modem.
pub const LINE_CAPACITY: usize = 64 + 2 * MAX_DOWNLINK_LEN;

/// Highest EIRP of the regional plan; `AT+TXP` counts 2 dB steps down from it.
const MAX_EIRP_DBM: u8 = 16;

/// Formatted command, without the line terminator.
pub type CommandLine = String<COMMAND_CAPACITY>;

/// Commands understood by the modem.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command<'a> {
    DevEui([u8; 8]),
    AppEui([u8; 8]),
    AppKey([u8; 16]),
    /// Over-the-air activation.
    OtaaMode,
    ConfirmedUplinks(bool),
    DataRate(u8),
    TxPowerIndex(u8),
    AdaptiveDataRate(bool),
    DutyCycle(bool),
    /// Join now, no auto-join, 10 s between attempts, 8 attempts.
    Join,
    Send { port: u8, frame: &'a [u8] },
}

/// The formatted command did not fit into [`CommandLine`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CommandTooLong;

impl fmt::Display for CommandTooLong {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("command exceeds line buffer")
    }
}

/// Renders `command` as the text sent to the modem.
///
/// # Errors
///
/// Returns [`CommandTooLong`] if the frame does not fit into a single line.
pub fn format_command(command: &Command<'_>) -> Result<CommandLine, CommandTooLong> {
    let mut line = CommandLine::new();
    write_command(&mut line, command).map_err(|_| CommandTooLong)?;
    Ok(line)
}

fn write_command(line: &mut CommandLine, command: &Command<'_>) -> fmt::Result {
    match command {
        Command::DevEui(eui) => {
            line.write_str("AT+DEVEUI=")?;
            write_hex(line, eui)
        }
        Command::AppEui(eui) => {
            line.write_str("AT+APPEUI=")?;
            write_hex(line, eui)
        }
        Command::AppKey(key) => {
            line.write_str("AT+APPKEY=")?;
            write_hex(line, key)
        }
        Command::OtaaMode => line.write_str("AT+NJM=1"),
        Command::ConfirmedUplinks(enabled) => write!(line, "AT+CFM={}", u8::from(*enabled)),
        Command::DataRate(index) => write!(line, "AT+DR={index}"),
        Command::TxPowerIndex(index) => write!(line, "AT+TXP={index}"),
        Command::AdaptiveDataRate(enabled) => write!(line, "AT+ADR={}", u8::from(*enabled)),
        Command::DutyCycle(enabled) => write!(line, "AT+DCS={}", u8::from(*enabled)),
        Command::Join => line.write_str("AT+JOIN=1:0:10:8"),
        Command::Send { port, frame } => {
            write!(line, "AT+SEND={port}:")?;
            write_hex(line, frame)
        }
    }
}

fn write_hex(line: &mut CommandLine, bytes: &[u8]) -> fmt::Result {
    bytes.iter().try_for_each(|byte| write!(line, "{byte:02X}"))
}

/// `AT+TXP` index for the requested output power.
pub const fn tx_power_index(dbm: u8) -> u8 {
    MAX_EIRP_DBM.saturating_sub(dbm) / 2
}

/// Commands that load `config` into the modem, in the order they are sent.
pub fn provisioning(config: &RadioConfig) -> [Command<'static>; 9] {
    [
        Command::DevEui(config.dev_eui),
        Command::AppEui(config.app_eui),
        Command::AppKey(config.app_key),
        Command::OtaaMode,
        Command::ConfirmedUplinks(config.confirmed_uplinks),
        Command::DataRate(config.data_rate.index()),
        Command::TxPowerIndex(tx_power_index(config.tx_power_dbm)),
        Command::AdaptiveDataRate(config.adaptive_data_rate),
        Command::DutyCycle(config.duty_cycle),
    ]
}

/// Downlink reported in an `+EVT:RX_*` line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModemDownlink {
    pub rssi: i16,
    pub snr: i8,
    pub port: u8,
    pub data: Vec<u8, MAX_DOWNLINK_LEN>,
}

/// One line received from the modem.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ModemLine {
    Ok,
    /// `AT_BUSY_ERROR`: the modem is still handling the previous command.
    Busy,
    /// Any other `AT_*` error reply.
    Error,
    Joined,
    JoinFailed,
    /// Unconfirmed uplink left the radio.
    TxDone,
    /// Confirmed uplink acknowledged by the network.
    SendConfirmed,
    /// Confirmed uplink not acknowledged after the modem's retries.
    SendUnconfirmed,
    Downlink(ModemDownlink),
    /// Echoes, banners and events nothing reacts to.
    Other,
}

impl ModemLine {
    /// Transmit completion carried by this line, if any.
    pub const fn stack_event(&self) -> Option<StackEvent> {
        match self {
            ModemLine::Busy | ModemLine::Error => Some(StackEvent::Error),
            ModemLine::TxDone => Some(StackEvent::Sent),
            ModemLine::SendConfirmed => Some(StackEvent::Acknowledged),
            ModemLine::SendUnconfirmed => Some(StackEvent::None),
            _ => None,
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            ModemLine::Ok => "ok",
            ModemLine::Busy => "busy",
            ModemLine::Error => "error",
            ModemLine::Joined => "joined",
            ModemLine::JoinFailed => "join-failed",
            ModemLine::TxDone => "tx-done",
            ModemLine::SendConfirmed => "send-confirmed",
            ModemLine::SendUnconfirmed => "send-unconfirmed",
            ModemLine::Downlink(_) => "downlink",
            ModemLine::Other => "other",
        }
    }
}

/// Reasons a modem line was rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ModemParseError {
    Empty,
    /// A recognised event whose fields did not parse.
    Malformed,
    /// The line did not fit the receive buffer.
    Overflow,
    NotUtf8,
}

impl fmt::Display for ModemParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModemParseError::Empty => f.write_str("empty line"),
            ModemParseError::Malformed => f.write_str("malformed event"),
            ModemParseError::Overflow => f.write_str("line overflow"),
            ModemParseError::NotUtf8 => f.write_str("line is not utf-8"),
        }
    }
}

/// Parses one line, with or without its terminator.
///
/// # Errors
///
/// Returns [`ModemParseError::Empty`] for blank lines and
/// [`ModemParseError::Malformed`] for `+EVT:RX_*` lines with bad fields.
pub fn parse_line(line: &str) -> Result<ModemLine, ModemParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ModemParseError::Empty);
    }
    modem_line
        .parse(line)
        .map_err(|_| ModemParseError::Malformed)
}

fn modem_line(input: &mut &str) -> ModalResult<ModemLine> {
    alt((
        preceded("+EVT:", event),
        terminated("OK", eof).value(ModemLine::Ok),
        terminated("AT_BUSY_ERROR", eof).value(ModemLine::Busy),
        preceded("AT_", rest).value(ModemLine::Error),
        rest.value(ModemLine::Other),
    ))
    .parse_next(input)
}

fn event(input: &mut &str) -> ModalResult<ModemLine> {
    alt((
        terminated("JOINED", eof).value(ModemLine::Joined),
        preceded("JOIN_FAILED", rest).value(ModemLine::JoinFailed),
        terminated("TX_DONE", eof).value(ModemLine::TxDone),
        terminated("SEND_CONFIRMED_OK", eof).value(ModemLine::SendConfirmed),
        preceded("SEND_CONFIRMED_FAILED", rest).value(ModemLine::SendUnconfirmed),
        preceded("RX_", cut_err(downlink)),
        rest.value(ModemLine::Other),
    ))
    .parse_next(input)
}

/// `<window>:<rssi>:<snr>:<cast>:<port>[:<hex>]`
fn downlink(input: &mut &str) -> ModalResult<ModemLine> {
    let _window = take_while(1.., |c: char| c.is_ascii_alphanumeric()).parse_next(input)?;
    let rssi: i16 = preceded(':', dec_int).parse_next(input)?;
    let snr: i8 = preceded(':', dec_int).parse_next(input)?;
    let _cast = preceded(':', take_while(1.., |c: char| c.is_ascii_uppercase())).parse_next(input)?;
    let port: u8 = preceded(':', dec_uint).parse_next(input)?;
    let data = opt(preceded(':', hex_payload))
        .parse_next(input)?
        .unwrap_or_default();
    eof.parse_next(input)?;

    Ok(ModemLine::Downlink(ModemDownlink {
        rssi,
        snr,
        port,
        data,
    }))
}

fn hex_payload(input: &mut &str) -> ModalResult<Vec<u8, MAX_DOWNLINK_LEN>> {
    take_while(0.., |c: char| c.is_ascii_hexdigit())
        .verify_map(decode_hex)
        .parse_next(input)
}

fn decode_hex(digits: &str) -> Option<Vec<u8, MAX_DOWNLINK_LEN>> {
    if !digits.len().is_multiple_of(2) {
        return None;
    }
    let mut bytes = Vec::new();
    for pair in digits.as_bytes().chunks_exact(2) {
        let pair = core::str::from_utf8(pair).ok()?;
        let byte = u8::from_str_radix(pair, 16).ok()?;
        bytes.push(byte).ok()?;
    }
    Some(bytes)
}

/// Assembles bytes from the UART into parsed lines.
pub struct LineAssembler {
    buffer: Vec<u8, LINE_CAPACITY>,
    overflowed: bool,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            overflowed: false,
        }
    }

    /// Feeds one byte; returns a result whenever a non-blank line completes.
    pub fn push(&mut self, byte: u8) -> Option<Result<ModemLine, ModemParseError>> {
        if byte != b'\r' && byte != b'\n' {
            if self.buffer.push(byte).is_err() {
                self.overflowed = true;
            }
            return None;
        }

        if self.overflowed {
            self.reset();
            return Some(Err(ModemParseError::Overflow));
        }
        if self.buffer.is_empty() {
            return None;
        }

        let parsed = match core::str::from_utf8(&self.buffer) {
            Ok(text) => parse_line(text),
            Err(_) => Err(ModemParseError::NotUtf8),
        };
        self.reset();
        match parsed {
            Err(ModemParseError::Empty) => None,
            other => Some(other),
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(assembler: &mut LineAssembler, text: &str) -> std::vec::Vec<Result<ModemLine, ModemParseError>> {
        text.bytes().filter_map(|byte| assembler.push(byte)).collect()
    }

    #[test]
    fn provisioning_renders_default_identity() {
        let config = RadioConfig::new();
        let lines: std::vec::Vec<CommandLine> = provisioning(&config)
            .iter()
            .map(|command| format_command(command).unwrap())
            .collect();

        assert_eq!(
            lines,
            [
                "AT+DEVEUI=38B8EBE0000000AA",
                "AT+APPEUI=EFCDAB8967452301",
                "AT+APPKEY=FFEEDDCCBBAA99887766554433221100",
                "AT+NJM=1",
                "AT+CFM=1",
                "AT+DR=0",
                "AT+TXP=1",
                "AT+ADR=0",
                "AT+DCS=0",
            ]
        );
    }

    #[test]
    fn send_renders_port_and_hex_frame() {
        let frame = [0xaa, 0x00, 0x03, 0x00, 0x1c, 0x0c, 0, 0, 0, 0];
        let line = format_command(&Command::Send { port: 3, frame: &frame }).unwrap();
        assert_eq!(line, "AT+SEND=3:AA0003001C0C00000000");
        assert_eq!(format_command(&Command::Join).unwrap(), "AT+JOIN=1:0:10:8");
    }

    #[test]
    fn oversized_frame_is_refused() {
        let frame = [0u8; COMMAND_CAPACITY];
        assert_eq!(
            format_command(&Command::Send { port: 3, frame: &frame }),
            Err(CommandTooLong)
        );
    }

    #[test]
    fn replies_and_events_map_to_stack_events() {
        let cases = [
            ("OK", ModemLine::Ok, None),
            ("AT_BUSY_ERROR", ModemLine::Busy, Some(StackEvent::Error)),
            ("AT_NO_NETWORK_JOINED", ModemLine::Error, Some(StackEvent::Error)),
            ("+EVT:JOINED", ModemLine::Joined, None),
            ("+EVT:JOIN_FAILED_RX_TIMEOUT", ModemLine::JoinFailed, None),
            ("+EVT:TX_DONE", ModemLine::TxDone, Some(StackEvent::Sent)),
            (
                "+EVT:SEND_CONFIRMED_OK",
                ModemLine::SendConfirmed,
                Some(StackEvent::Acknowledged),
            ),
            (
                "+EVT:SEND_CONFIRMED_FAILED(4)",
                ModemLine::SendUnconfirmed,
                Some(StackEvent::None),
            ),
            ("RAKwireless RUI3", ModemLine::Other, None),
            ("+EVT:LINKCHECK:0:0:0:0:0", ModemLine::Other, None),
        ];

        for (text, line, event) in cases {
            let parsed = parse_line(text).unwrap();
            assert_eq!(parsed, line, "{text}");
            assert_eq!(parsed.stack_event(), event, "{text}");
        }
    }

    #[test]
    fn downlink_event_carries_port_and_payload() {
        let parsed = parse_line("+EVT:RX_1:-72:9:UNICAST:3:0102FF\r\n").unwrap();
        let ModemLine::Downlink(downlink) = parsed else {
            panic!("expected downlink, got {parsed:?}");
        };
        assert_eq!(downlink.rssi, -72);
        assert_eq!(downlink.snr, 9);
        assert_eq!(downlink.port, 3);
        assert_eq!(downlink.data.as_slice(), &[0x01, 0x02, 0xff]);
    }

    #[test]
    fn downlink_without_payload_is_empty() {
        let parsed = parse_line("+EVT:RX_C:-90:-3:MULTICAST:10").unwrap();
        assert!(matches!(parsed, ModemLine::Downlink(ref d) if d.data.is_empty() && d.port == 10));
    }

    #[test]
    fn malformed_downlink_is_an_error() {
        assert_eq!(
            parse_line("+EVT:RX_1:-72:9:UNICAST:3:ABC"),
            Err(ModemParseError::Malformed)
        );
        assert_eq!(
            parse_line("+EVT:RX_1:loud:9:UNICAST:3:AB"),
            Err(ModemParseError::Malformed)
        );
        assert_eq!(parse_line("  \r"), Err(ModemParseError::Empty));
    }

    #[test]
    fn assembler_splits_on_any_terminator() {
        let mut assembler = LineAssembler::new();
        let lines = feed(&mut assembler, "OK\r\n\r\n+EVT:TX_DONE\nAT_ERROR\r");
        assert_eq!(
            lines,
            [Ok(ModemLine::Ok), Ok(ModemLine::TxDone), Ok(ModemLine::Error)]
        );
        assert!(feed(&mut assembler, "+EVT:JOI").is_empty());
        assert_eq!(feed(&mut assembler, "NED\r\n"), [Ok(ModemLine::Joined)]);
    }

    #[test]
    fn assembler_reports_overflow_once_and_recovers() {
        let mut assembler = LineAssembler::new();
        let long = "X".repeat(LINE_CAPACITY + 5);
        assert!(feed(&mut assembler, &long).is_empty());
        assert_eq!(feed(&mut assembler, "\r\n"), [Err(ModemParseError::Overflow)]);
        assert_eq!(feed(&mut assembler, "OK\r\n"), [Ok(ModemLine::Ok)]);
    }
}
