use std::cell::Cell;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use embassy_futures::block_on;
use embassy_futures::join::join;
use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use node_core::bridge::{ServiceReport, TransportBridge};
use node_core::config::{BridgeConfig, RadioConfig};
use node_core::engine::{DispatchOutcome, NodeEngine, RestartReason, RetryCounter, State};
use node_core::events::{Downlink, Event, HallLevel};
use node_core::mailbox::Mailbox;
use node_core::ports::Led;
use node_core::telemetry::{TelemetryEventKind, TelemetryRecorder, TelemetrySink};

use crate::commands::{EmulatorCommand, HELP_TOPICS, RadioOutcome, parse_command};
use crate::sim::{NoDelay, SimHardware, SimInstant, SimStack};

const RADIO_CONFIG: RadioConfig = RadioConfig::new();
const TELEMETRY_DEPTH: usize = 256;
/// Timer expiries handled by one `advance` before it gives up.
const MAX_TIMER_STEPS: usize = 10_000;

type SimMailbox = Mailbox<NoopRawMutex>;
type SimBridge = TransportBridge<'static, NoopRawMutex, SimStack>;
type SimEngine = NodeEngine<SimHardware, &'static SimBridge, SimInstant>;
type Recorder = TelemetryRecorder<SimInstant, TELEMETRY_DEPTH>;

/// One boot of the simulated board.
///
/// The mailbox and bridge are leaked so the engine can hold a `'static`
/// radio link, the same shape the firmware gets from its statics. A session
/// leaks one pair per restart.
struct Node {
    engine: SimEngine,
    bridge: &'static SimBridge,
    mailbox: &'static SimMailbox,
    dropped_seen: u32,
    restart: Option<RestartReason>,
    /// Bytes collected from the bridge for the last announced downlink.
    last_downlink: Option<Downlink>,
}

impl Node {
    fn boot(hall: HallLevel, now: SimInstant) -> io::Result<Self> {
        let mailbox: &'static SimMailbox = Box::leak(Box::new(Mailbox::new()));
        let bridge = TransportBridge::new(
            SimStack::new(),
            mailbox,
            BridgeConfig::for_radio(&RADIO_CONFIG),
        )
        .map_err(|error| io::Error::other(error.to_string()))?;
        let bridge: &'static SimBridge = Box::leak(Box::new(bridge));

        let mut hardware = SimHardware::new(hall);
        hardware.now = now;
        Ok(Self {
            engine: NodeEngine::new(hardware, bridge, RADIO_CONFIG.device_id(), now),
            bridge,
            mailbox,
            dropped_seen: 0,
            restart: None,
            last_downlink: None,
        })
    }

    fn stack(&self) -> &SimStack {
        self.bridge.stack()
    }

    fn start(&mut self, now: SimInstant, telemetry: &mut dyn TelemetrySink<SimInstant>) {
        self.engine.hardware_mut().now = now;
        let outcome = self.engine.start(now, telemetry);
        self.settle(outcome);
    }

    fn dispatch(
        &mut self,
        event: &Event,
        now: SimInstant,
        telemetry: &mut dyn TelemetrySink<SimInstant>,
    ) {
        if matches!(event, Event::RadioRxData(_)) {
            self.last_downlink = self.bridge.take_downlink();
        }
        self.engine.hardware_mut().now = now;
        let outcome = self.engine.dispatch(event, now, telemetry);
        self.settle(outcome);
    }

    fn poll_timer(
        &mut self,
        now: SimInstant,
        telemetry: &mut dyn TelemetrySink<SimInstant>,
    ) -> bool {
        self.engine.hardware_mut().now = now;
        match self.engine.poll_timer(now, telemetry) {
            Some(outcome) => {
                self.settle(outcome);
                true
            }
            None => false,
        }
    }

    fn settle(&mut self, outcome: DispatchOutcome) {
        if let DispatchOutcome::RestartRequested(reason) = outcome {
            self.restart = Some(reason);
        }
    }

    fn note_overflow(&mut self, now: SimInstant, telemetry: &mut dyn TelemetrySink<SimInstant>) {
        let dropped = self.mailbox.dropped();
        if dropped != self.dropped_seen {
            self.dropped_seen = dropped;
            telemetry.record(TelemetryEventKind::MailboxOverflow { total: dropped }, now);
        }
    }
}

/// Console session: one simulated node plus an optional transcript.
pub struct Session {
    node: Node,
    telemetry: Recorder,
    now: SimInstant,
    boots: u32,
    transcript: Option<TranscriptLogger>,
}

impl Session {
    pub fn new(transcript: Option<TranscriptLogger>) -> io::Result<Self> {
        Ok(Self {
            node: Node::boot(HallLevel::Low, SimInstant::ZERO)?,
            telemetry: Recorder::new(),
            now: SimInstant::ZERO,
            boots: 0,
            transcript,
        })
    }

    /// Powers the node on and reports what the first boot did.
    pub fn start(&mut self) -> io::Result<Vec<String>> {
        let mark = self.telemetry.next_id();
        self.boots += 1;
        let mut notes = Vec::new();
        self.node.start(self.now, &mut self.telemetry);
        self.pump(&mut notes)?;

        let mut output = vec![format!("{} boot #{}", self.now, self.boots)];
        output.extend(self.telemetry_lines(mark));
        output.append(&mut notes);
        self.record_output(&output)?;
        Ok(output)
    }

    pub fn now(&self) -> SimInstant {
        self.now
    }

    pub fn state(&self) -> State {
        self.node.engine.state()
    }

    pub fn boots(&self) -> u32 {
        self.boots
    }

    /// Frames the current boot handed to the radio.
    pub fn frames(&self) -> Vec<(u8, Vec<u8>)> {
        self.node.stack().frames()
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(self.now.since_start(), TranscriptRole::Host, trimmed)?;
        }

        let lines = match parse_command(trimmed) {
            Ok(command) => self.execute(command)?,
            Err(err) => vec![format!("ERR {err}")],
        };
        self.record_output(&lines)?;
        Ok(lines)
    }

    fn execute(&mut self, command: EmulatorCommand) -> io::Result<Vec<String>> {
        let mark = self.telemetry.next_id();
        let mut notes = Vec::new();

        match command {
            EmulatorCommand::Button => self.sensor_edge(Event::SensorEdgeButton, &mut notes)?,
            EmulatorCommand::Hall(level) => {
                let hardware = self.node.engine.hardware_mut();
                let changed = hardware.hall != level;
                hardware.hall = level;
                notes.push(format!("hall sensor reads {level}"));
                if changed {
                    self.sensor_edge(Event::SensorEdgeHall, &mut notes)?;
                }
            }
            EmulatorCommand::Radio(outcome) => {
                self.node.stack().script(outcome);
                notes.push(format!("next radio outcome queued: {}", outcome.label()));
            }
            EmulatorCommand::Busy => {
                self.node.stack().reject_next_send();
                notes.push("next send will be rejected as busy".to_string());
            }
            EmulatorCommand::Downlink { port, data } => {
                let len = data.len();
                self.node.stack().queue_downlink(port, data);
                notes.push(format!(
                    "downlink port={port} len={len} waits for the next receive window"
                ));
            }
            EmulatorCommand::Advance(duration) => self.advance(duration, &mut notes)?,
            EmulatorCommand::Status => return Ok(self.status_lines()),
            EmulatorCommand::Help => return Ok(help_lines()),
            EmulatorCommand::Quit => return Ok(vec!["Session closed.".to_string()]),
        }

        let mut lines = self.telemetry_lines(mark);
        lines.append(&mut notes);
        Ok(lines)
    }

    /// Posts a sensor edge the way the firmware's sensor tasks do: ignored
    /// until the engine arms the interrupts.
    fn sensor_edge(&mut self, event: Event, notes: &mut Vec<String>) -> io::Result<()> {
        if !self.node.engine.hardware().armed {
            notes.push("sensors not armed, edge ignored".to_string());
            return Ok(());
        }
        if let Err(error) = self.node.mailbox.post(event) {
            notes.push(format!("edge dropped: {error}"));
        }
        self.pump(notes)
    }

    fn advance(&mut self, duration: Duration, notes: &mut Vec<String>) -> io::Result<()> {
        let target = self.now + duration;
        for _ in 0..MAX_TIMER_STEPS {
            match self.node.engine.next_deadline() {
                Some(deadline) if deadline <= target => {
                    self.now = self.now.max(deadline);
                    if !self.node.poll_timer(self.now, &mut self.telemetry) {
                        break;
                    }
                    self.pump(notes)?;
                }
                _ => break,
            }
        }
        self.now = target;
        self.node.engine.hardware_mut().now = target;
        Ok(())
    }

    /// Feeds the engine until the mailbox is empty and no transmission is
    /// pending, rebooting if the engine asked for a restart.
    fn pump(&mut self, notes: &mut Vec<String>) -> io::Result<()> {
        loop {
            if !self.node.bridge.is_ready() {
                let report = self.service_bridge();
                notes.extend(describe_report(&report));
            }
            self.node.note_overflow(self.now, &mut self.telemetry);
            notes.extend(self.node.engine.hardware_mut().take_notes());

            if let Some(reason) = self.node.restart.take() {
                notes.push(format!("restart requested ({reason}), rebooting"));
                let hall = self.node.engine.hardware().hall;
                self.node = Node::boot(hall, self.now)?;
                self.boots += 1;
                notes.push(format!("{} boot #{}", self.now, self.boots));
                self.node.start(self.now, &mut self.telemetry);
                continue;
            }

            match self.node.mailbox.take() {
                Some(event) => self.node.dispatch(&event, self.now, &mut self.telemetry),
                None if self.node.bridge.is_ready() => return Ok(()),
                None => {}
            }
        }
    }

    /// Runs one bridge iteration while the control side keeps draining the
    /// mailbox, as the two firmware tasks would.
    fn service_bridge(&mut self) -> ServiceReport {
        let bridge = self.node.bridge;
        let mailbox = self.node.mailbox;
        let now = self.now;
        let node = &mut self.node;
        let telemetry = &mut self.telemetry;
        let done = Cell::new(false);

        let service = async {
            let report = bridge.service_once(&mut NoDelay).await;
            done.set(true);
            report
        };
        let control = async {
            while !done.get() {
                if let Some(event) = mailbox.take() {
                    node.dispatch(&event, now, telemetry);
                }
                yield_now().await;
            }
        };

        let (report, ()) = block_on(join(service, control));
        report
    }

    fn telemetry_lines(&self, mark: u32) -> Vec<String> {
        self.telemetry
            .since(mark)
            .map(|record| format!("{} {}", record.timestamp, record.event))
            .collect()
    }

    fn status_lines(&self) -> Vec<String> {
        let engine = &self.node.engine;
        let cx = engine.context();
        let hardware = engine.hardware();
        let stack = self.node.stack();

        let next_timer = engine
            .next_deadline()
            .map_or_else(|| "none".to_string(), |deadline| deadline.to_string());
        let recorded = cx
            .recorded_closure()
            .map_or_else(|| "none".to_string(), |level| level.to_string());
        let payload: Vec<String> = cx
            .payload()
            .fields()
            .iter()
            .map(|field| format!("{field:04x}"))
            .collect();
        let scripted: Vec<&str> = stack
            .scripted()
            .into_iter()
            .map(RadioOutcome::label)
            .collect();
        let last_downlink = self.node.last_downlink.as_ref().map_or_else(
            || "none".to_string(),
            |downlink| {
                let hex: Vec<String> =
                    downlink.data.iter().map(|byte| format!("{byte:02x}")).collect();
                format!("port={} data={}", downlink.port, hex.concat())
            },
        );
        let leds: Vec<String> = Led::ALL
            .iter()
            .map(|&led| {
                let pattern = hardware
                    .active_pattern(led)
                    .map_or("off", |request| request.pattern.label());
                format!("{}={pattern}", led.label())
            })
            .collect();

        vec![
            format!(
                "state: {}{}",
                engine.state(),
                if engine.is_halted() { " (halted)" } else { "" }
            ),
            format!("clock: {} next-timer: {next_timer}", self.now),
            format!(
                "counters: timeouts={} errors={}",
                cx.counter(RetryCounter::Timeouts),
                cx.counter(RetryCounter::Errors)
            ),
            format!(
                "closure: recorded={recorded} sensor={} armed={}",
                hardware.hall,
                yes_no(hardware.armed)
            ),
            format!("payload: {}", payload.join(" ")),
            format!(
                "mailbox: posted={} dropped={}",
                self.node.mailbox.posted(),
                self.node.mailbox.dropped()
            ),
            format!(
                "radio: ready={} frames={} scripted=[{}] busy={} downlinks={}",
                yes_no(self.node.bridge.is_ready()),
                stack.frames().len(),
                scripted.join(", "),
                yes_no(stack.busy_pending()),
                stack.pending_downlinks()
            ),
            format!("last-downlink: {last_downlink}"),
            format!("leds: {}", leds.join(" ")),
            format!("boots: {}", self.boots),
        ]
    }

    fn record_output(&mut self, lines: &[String]) -> io::Result<()> {
        let elapsed = self.now.since_start();
        if let Some(transcript) = self.transcript.as_mut() {
            for line in lines {
                transcript.append_line(elapsed, TranscriptRole::Emulator, line)?;
            }
        }
        Ok(())
    }
}

fn describe_report(report: &ServiceReport) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(completion) = &report.completion {
        let mut line = format!(
            "radio: stack reported {:?}, classified {}",
            completion.event, completion.result
        );
        if let Err(error) = completion.delivery {
            line.push_str(&format!(" (not delivered: {error})"));
        }
        lines.push(line);
    }
    if let Some(downlink) = &report.downlink {
        let mut line = format!("radio: downlink port={} len={}", downlink.port, downlink.len);
        if let Err(error) = downlink.delivery {
            line.push_str(&format!(" (not delivered: {error})"));
        }
        lines.push(line);
    }
    lines
}

fn help_lines() -> Vec<String> {
    HELP_TOPICS
        .iter()
        .map(|(kind, summary)| format!("{:<38} - {summary}", kind.usage()))
        .collect()
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

/// Writes `HOST>` commands and `EMU <` responses stamped with simulated time.
pub struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    pub fn create(path: &Path, header: &str) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        logger.write_header(header)?;
        Ok(logger)
    }

    fn write_header(&mut self, header: &str) -> io::Result<()> {
        writeln!(self.writer, "# {header}")?;
        writeln!(
            self.writer,
            "# Timestamps are simulated milliseconds since power-on"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
