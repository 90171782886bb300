//! Console grammar of the node emulator.
//!
//! A line is a keyword followed by its arguments. Keywords are matched
//! case-insensitively; arguments are parsed per keyword so a bad argument
//! is reported against the command that owns it.

use std::fmt;
use std::time::Duration;

use node_core::events::{HallLevel, MAX_DOWNLINK_LEN};
use winnow::ascii::{Caseless, dec_uint, hex_digit1, space1};
use winnow::combinator::{alt, eof, opt, separated_pair, terminated};
use winnow::prelude::*;

/// Outcome the simulated stack reports for the next accepted frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RadioOutcome {
    Sent,
    Ack,
    Timeout,
    Error,
    /// The next send is rejected outright.
    Fatal,
}

impl RadioOutcome {
    pub fn label(self) -> &'static str {
        match self {
            RadioOutcome::Sent => "sent",
            RadioOutcome::Ack => "ack",
            RadioOutcome::Timeout => "timeout",
            RadioOutcome::Error => "error",
            RadioOutcome::Fatal => "fatal",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EmulatorCommand {
    Button,
    Hall(HallLevel),
    Radio(RadioOutcome),
    Busy,
    Downlink { port: u8, data: Vec<u8> },
    Advance(Duration),
    Status,
    Help,
    Quit,
}

/// Keyword of a command, used to report argument errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandKind {
    Button,
    Hall,
    Radio,
    Busy,
    Downlink,
    Advance,
    Status,
    Help,
    Quit,
}

impl CommandKind {
    pub fn usage(self) -> &'static str {
        match self {
            CommandKind::Button => "button",
            CommandKind::Hall => "hall <0|1>",
            CommandKind::Radio => "radio <sent|ack|timeout|error|fatal>",
            CommandKind::Busy => "busy",
            CommandKind::Downlink => "downlink <port> <hex>",
            CommandKind::Advance => "advance <seconds>[s|ms]",
            CommandKind::Status => "status",
            CommandKind::Help => "help",
            CommandKind::Quit => "quit",
        }
    }
}

pub const HELP_TOPICS: &[(CommandKind, &str)] = &[
    (CommandKind::Button, "press the test button"),
    (CommandKind::Hall, "set the closure sensor level"),
    (
        CommandKind::Radio,
        "script the completion of the next accepted frame",
    ),
    (CommandKind::Busy, "reject the next send as port busy"),
    (
        CommandKind::Downlink,
        "queue a downlink for the receive window of the next uplink",
    ),
    (CommandKind::Advance, "move the simulated clock forward"),
    (CommandKind::Status, "show engine, mailbox and radio state"),
    (CommandKind::Help, "list commands"),
    (CommandKind::Quit, "leave the emulator"),
];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandParseError {
    Empty,
    UnknownCommand,
    InvalidArguments(CommandKind),
}

impl fmt::Display for CommandParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandParseError::Empty => f.write_str("empty command"),
            CommandParseError::UnknownCommand => f.write_str("unknown command"),
            CommandParseError::InvalidArguments(kind) => {
                write!(f, "usage: {}", kind.usage())
            }
        }
    }
}

impl std::error::Error for CommandParseError {}

pub fn parse_command(line: &str) -> Result<EmulatorCommand, CommandParseError> {
    let mut input = line.trim();
    if input.is_empty() {
        return Err(CommandParseError::Empty);
    }

    let kind = terminated(keyword, alt((space1, eof)))
        .parse_next(&mut input)
        .map_err(|_| CommandParseError::UnknownCommand)?;
    let args = input.trim();

    let command = match kind {
        CommandKind::Button => no_arguments(args, EmulatorCommand::Button),
        CommandKind::Busy => no_arguments(args, EmulatorCommand::Busy),
        CommandKind::Status => no_arguments(args, EmulatorCommand::Status),
        CommandKind::Help => Some(EmulatorCommand::Help),
        CommandKind::Quit => no_arguments(args, EmulatorCommand::Quit),
        CommandKind::Hall => hall_level.parse(args).ok().map(EmulatorCommand::Hall),
        CommandKind::Radio => radio_outcome.parse(args).ok().map(EmulatorCommand::Radio),
        CommandKind::Advance => advance_duration
            .parse(args)
            .ok()
            .map(EmulatorCommand::Advance),
        CommandKind::Downlink => downlink
            .parse(args)
            .ok()
            .map(|(port, data)| EmulatorCommand::Downlink { port, data }),
    };
    command.ok_or(CommandParseError::InvalidArguments(kind))
}

fn no_arguments(args: &str, command: EmulatorCommand) -> Option<EmulatorCommand> {
    args.is_empty().then_some(command)
}

fn keyword(input: &mut &str) -> ModalResult<CommandKind> {
    alt((
        Caseless("button").value(CommandKind::Button),
        Caseless("busy").value(CommandKind::Busy),
        Caseless("hall").value(CommandKind::Hall),
        Caseless("help").value(CommandKind::Help),
        Caseless("radio").value(CommandKind::Radio),
        Caseless("downlink").value(CommandKind::Downlink),
        Caseless("advance").value(CommandKind::Advance),
        Caseless("status").value(CommandKind::Status),
        alt((Caseless("quit"), Caseless("exit"))).value(CommandKind::Quit),
    ))
    .parse_next(input)
}

fn hall_level(input: &mut &str) -> ModalResult<HallLevel> {
    alt((
        alt(("1", Caseless("high"))).value(HallLevel::High),
        alt(("0", Caseless("low"))).value(HallLevel::Low),
    ))
    .parse_next(input)
}

fn radio_outcome(input: &mut &str) -> ModalResult<RadioOutcome> {
    alt((
        Caseless("sent").value(RadioOutcome::Sent),
        Caseless("ack").value(RadioOutcome::Ack),
        Caseless("timeout").value(RadioOutcome::Timeout),
        Caseless("error").value(RadioOutcome::Error),
        Caseless("fatal").value(RadioOutcome::Fatal),
    ))
    .parse_next(input)
}

/// `<n>`, `<n>s` or `<n>ms`; a bare number is seconds.
fn advance_duration(input: &mut &str) -> ModalResult<Duration> {
    let amount: u64 = dec_uint.parse_next(input)?;
    let unit = opt(alt((Caseless("ms"), Caseless("s")))).parse_next(input)?;
    Ok(match unit {
        Some(unit) if unit.eq_ignore_ascii_case("ms") => Duration::from_millis(amount),
        _ => Duration::from_secs(amount),
    })
}

fn downlink(input: &mut &str) -> ModalResult<(u8, Vec<u8>)> {
    separated_pair(dec_uint, space1, hex_bytes).parse_next(input)
}

fn hex_bytes(input: &mut &str) -> ModalResult<Vec<u8>> {
    hex_digit1.verify_map(decode_hex).parse_next(input)
}

fn decode_hex(digits: &str) -> Option<Vec<u8>> {
    if !digits.len().is_multiple_of(2) || digits.len() / 2 > MAX_DOWNLINK_LEN {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&digits[index..index + 2], 16).ok())
        .collect()
}
