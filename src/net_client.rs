use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::process;
use std::thread;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use net_exec::common;
use net_exec::config::ClientConfig;

fn connect_and_run(address: &str) -> anyhow::Result<()> {
    let mut stream =
        TcpStream::connect(address).with_context(|| format!("failed to connect to {address}"))?;
    info!(address, "connected");

    let mut reader = BufReader::new(stream.try_clone()?);
    common::print_banner(&mut reader, &mut io::stdout())?;

    // Server output arrives whenever a command finishes; print it as it comes.
    thread::spawn(move || {
        let mut buffer = [0; 1024];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => {
                    info!("connection closed by server");
                    process::exit(0);
                }
                Ok(n) => {
                    let mut stdout = io::stdout();
                    let _ = stdout.write_all(&buffer[..n]);
                    let _ = stdout.flush();
                }
                Err(e) => {
                    warn!(error = %e, "error reading from server");
                    process::exit(1);
                }
            }
        }
    });

    let sent = common::command_loop(io::stdin().lock(), |command| {
        stream.write_all(command.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()
    });
    match sent {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            info!("server went away");
        }
        other => other?,
    }
    let _ = stream.shutdown(Shutdown::Both);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let config = ClientConfig::parse();
    common::init_tracing(&config.log_filter)?;
    connect_and_run(&config.address)
}
