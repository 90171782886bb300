use std::io;
use std::path::Path;

#[allow(dead_code)]
#[path = "../commands.rs"]
mod commands;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;
#[allow(dead_code)]
#[path = "../sim.rs"]
mod sim;

use session::{Session, TranscriptLogger};

/// Scripted console sessions, each written to its own transcript.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Scenario {
    BootJoin,
    DoorOpen,
    TestEscalation,
}

impl Scenario {
    const ALL: [Scenario; 3] = [
        Scenario::BootJoin,
        Scenario::DoorOpen,
        Scenario::TestEscalation,
    ];

    fn log_path(self) -> &'static str {
        match self {
            Scenario::BootJoin => "transcripts/boot-join.log",
            Scenario::DoorOpen => "transcripts/door-open.log",
            Scenario::TestEscalation => "transcripts/test-escalation.log",
        }
    }

    fn header(self) -> &'static str {
        match self {
            Scenario::BootJoin => "Hatch sensor node boot and join transcript",
            Scenario::DoorOpen => "Hatch sensor node closure reporting transcript",
            Scenario::TestEscalation => "Hatch sensor node test sequence escalation transcript",
        }
    }

    /// Commands issued before power-on, to script the join.
    fn preboot(self) -> &'static [&'static str] {
        match self {
            Scenario::BootJoin => &["radio timeout", "radio timeout"],
            Scenario::DoorOpen | Scenario::TestEscalation => &[],
        }
    }

    fn script(self) -> &'static [&'static str] {
        match self {
            Scenario::BootJoin => &[
                "status",
                "button",
                "advance 20",
                "status",
                "advance 300",
                "status",
            ],
            Scenario::DoorOpen => &[
                "hall 1",
                "advance 10",
                "radio timeout",
                "hall 0",
                "advance 20",
                "radio error",
                "advance 300",
                "status",
            ],
            Scenario::TestEscalation => &[
                "button",
                "radio timeout",
                "radio timeout",
                "radio timeout",
                "radio timeout",
                "radio timeout",
                "radio timeout",
                "advance 30",
                "advance 10",
                "advance 10",
                "advance 10",
                "status",
                "advance 15",
                "status",
            ],
        }
    }
}

fn main() -> io::Result<()> {
    for scenario in Scenario::ALL {
        record(scenario)?;
    }
    Ok(())
}

fn record(scenario: Scenario) -> io::Result<()> {
    let transcript = TranscriptLogger::create(Path::new(scenario.log_path()), scenario.header())?;
    let mut session = Session::new(Some(transcript))?;
    for line in scenario.preboot() {
        session.handle_command(line)?;
    }
    session.start()?;
    for line in scenario.script() {
        session.handle_command(line)?;
    }
    println!(
        "wrote {} ({} at {}, {} boot(s))",
        scenario.log_path(),
        session.state(),
        session.now(),
        session.boots()
    );
    Ok(())
}
