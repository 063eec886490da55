// src/common.rs
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

use crate::error::ConfigError;

static TRACING: OnceLock<()> = OnceLock::new();

/// Installs the global `tracing` subscriber, writing to stderr.
///
/// Only the first call installs anything; later calls are no-ops.
pub fn init_tracing(filter: &str) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_new(filter).map_err(|e| ConfigError::LogFilter(e.to_string()))?;
    if TRACING.get().is_some() {
        return Ok(());
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .try_init()
        .map_err(|e| ConfigError::Subscriber(e.to_string()))?;
    let _ = TRACING.set(());
    Ok(())
}

/// Copies the server's greeting, up to and including its blank line.
pub fn print_banner<R: BufRead, W: Write>(reader: &mut R, out: &mut W) -> io::Result<()> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        out.write_all(line.as_bytes())?;
        if line.trim().is_empty() {
            break;
        }
    }
    out.flush()
}

/// Calls `process_command` for each non-empty trimmed input line until
/// end of input or `quit`.
pub fn command_loop<R, F>(input: R, mut process_command: F) -> io::Result<()>
where
    R: BufRead,
    F: FnMut(&str) -> io::Result<()>,
{
    for line in input.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("quit") {
            break;
        }
        if trimmed.is_empty() {
            continue;
        }
        process_command(trimmed)?;
    }
    Ok(())
}
