mod command;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use session::Session;

fn main() -> io::Result<()> {
    let transcript = parse_transcript_arg().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: auth-emulator [--transcript <path>]");
        process::exit(2);
    });

    let mut session = Session::with_defaults();
    if let Some(path) = transcript {
        session = session.with_transcript(&path)?;
    }

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut line = String::new();

    writeln!(
        writer,
        "PS4 auth passthrough emulator ready at t=+{}ms. Type `help` for commands or `exit` to quit.",
        session.now().since_start().as_millis()
    )?;
    for response in session.handle_line("status")? {
        writeln!(writer, "{response}")?;
    }

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        if reader.read_line(&mut line)? == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for response in session.handle_line(trimmed)? {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_transcript_arg() -> Result<Option<PathBuf>, String> {
    let mut args = env::args().skip(1);
    let Some(arg) = args.next() else {
        return Ok(None);
    };
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
