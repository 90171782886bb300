mod commands;
mod session;
mod sim;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use commands::{EmulatorCommand, parse_command};
use session::{Session, TranscriptLogger};

const DEFAULT_TRANSCRIPT: &str = "transcripts/interactive.log";

fn main() -> io::Result<()> {
    let transcript_path = parse_transcript_path().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: node-emulator [--transcript <path>] [--no-transcript]");
        process::exit(2);
    });

    let transcript = transcript_path
        .map(|path| TranscriptLogger::create(&path, "Hatch sensor node emulator session"))
        .transpose()?;

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(transcript)?;
    let mut line = String::new();

    writeln!(
        writer,
        "Hatch sensor node emulator ready. Type `help` for commands or `quit` to leave."
    )?;
    for response in session.start()? {
        writeln!(writer, "{response}")?;
    }

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }

        if should_terminate(trimmed) {
            break;
        }
    }

    writeln!(
        writer,
        "{}: {} after {} boot(s), {} frame(s) this boot",
        session.now(),
        session.state(),
        session.boots(),
        session.frames().len()
    )?;
    Ok(())
}

fn should_terminate(input: &str) -> bool {
    parse_command(input) == Ok(EmulatorCommand::Quit)
}

fn parse_transcript_path() -> Result<Option<PathBuf>, String> {
    let mut args = env::args().skip(1);
    match args.next() {
        None => Ok(Some(PathBuf::from(DEFAULT_TRANSCRIPT))),
        Some(arg) if arg == "--no-transcript" => Ok(None),
        Some(arg) => {
            if let Some(value) = arg.strip_prefix("--transcript=") {
                Ok(Some(PathBuf::from(value)))
            } else if arg == "--transcript" {
                args.next()
                    .map(|value| Some(PathBuf::from(value)))
                    .ok_or_else(|| "Expected value after --transcript".to_string())
            } else {
                Err(format!("Unknown argument `{arg}`"))
            }
        }
    }
}
